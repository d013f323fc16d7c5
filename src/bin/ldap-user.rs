//! Inspect the users of a directory section: show them, list their groups
//! and check their passwords.
//!
//! Usage: `ldap-user <section> show|groups|check <uid>` or
//! `ldap-user <section> search <filter>`. The password for `check` is read
//! from `LDAP_MAPPER_PASSWORD`.

use std::{path::Path, str::FromStr};

use anyhow_ext::{Context, Result};
use ldap_mapper::{Config, Connection, GroupMember, Role, models::User};
use tracing::level_filters::LevelFilter;

#[tokio::main]
#[anyhow_trace::anyhow_trace]
async fn main() -> Result<()> {
	// Config
	let config_path =
		std::env::var("LDAP_MAPPER_CONFIG").unwrap_or_else(|_| "./config.yaml".to_owned());
	let config = Config::new(Path::new(&config_path))?;

	// Tracing
	let subscriber = tracing_subscriber::FmtSubscriber::builder()
		.with_max_level(
			config
				.log_level
				.as_ref()
				.map_or(Ok(LevelFilter::INFO), |s| LevelFilter::from_str(s))?,
		)
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("Setting default tracing subscriber failed")?;

	let args: Vec<String> = std::env::args().skip(1).collect();
	let [section, command, argument] = args.as_slice() else {
		anyhow::bail!("usage: ldap-user <section> show|groups|check|search <uid or filter>");
	};

	let conn = Connection::from_config(&config, section)
		.await
		.context(format!("failed to connect to section `{section}`"))?;

	match command.as_str() {
		"show" => {
			let mut user = conn.get_user(argument);
			let dump = user.pprint().await.context(format!("failed to read user `{argument}`"))?;
			tracing::info!("\n{dump}");
		}
		"groups" => {
			let user = User::new(conn.get_user(argument));
			let groups = user.groups().await.context("failed to search groups")?;
			tracing::info!(user = %argument, groups = ?groups, "group memberships");
		}
		"check" => {
			let password = std::env::var("LDAP_MAPPER_PASSWORD")
				.context("LDAP_MAPPER_PASSWORD must hold the password to check")?;
			let valid = conn.check(argument, &password).await.context("password check failed")?;
			tracing::info!(user = %argument, valid, "checked password");
		}
		"search" => {
			let class = conn.class_for(Role::User);
			let users = conn.unlimited_search(&class, argument).await.context("search failed")?;
			for user in &users {
				tracing::info!(dn = ?user.dn(), "{user}");
			}
			tracing::info!(count = users.len(), "search complete");
		}
		other => anyhow::bail!("unknown command `{other}`"),
	}

	conn.close().await.context("failed to unbind")?;
	Ok(())
}
