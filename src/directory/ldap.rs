//! Directory access through an `ldap3` connection.
use std::{collections::HashSet, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use ldap3::{
	Ldap, LdapConnAsync, LdapConnSettings, LdapError, Mod, Scope, SearchEntry,
	exop::PasswordModify,
};
use native_tls::{Certificate, Identity, TlsConnector};

use super::{Connector, DirectoryClient};
use crate::config::{SectionConfig, TlsConfig};

/// A bound `ldap3` session
#[derive(Clone)]
pub struct LdapDirectory {
	/// The multiplexed connection handle
	ldap: Ldap,
	/// Limit for every single operation
	operation_timeout: Option<Duration>,
}

impl fmt::Debug for LdapDirectory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("LdapDirectory")
			.field("operation_timeout", &self.operation_timeout)
			.finish_non_exhaustive()
	}
}

impl LdapDirectory {
	/// Connect to the server of `settings` and bind as `dn`
	#[tracing::instrument(skip(settings, password), fields(url = %settings.url))]
	pub async fn connect(
		settings: &SectionConfig,
		dn: &str,
		password: &str,
	) -> Result<Self, LdapError> {
		let conn_settings = connection_settings(settings).await?;
		let (conn, mut ldap) =
			LdapConnAsync::from_url_with_settings(conn_settings, &settings.url).await?;
		ldap3::drive!(conn);

		let operation_timeout = settings.operation_timeout.map(Duration::from_secs);
		if let Some(timeout) = operation_timeout {
			ldap.with_timeout(timeout);
		}
		ldap.simple_bind(dn, password).await?.success()?;
		tracing::debug!("bound to directory");

		Ok(Self { ldap, operation_timeout })
	}

	/// A handle for one operation, with the operation timeout applied
	fn handle(&self) -> Ldap {
		let mut ldap = self.ldap.clone();
		if let Some(timeout) = self.operation_timeout {
			ldap.with_timeout(timeout);
		}
		ldap
	}
}

#[async_trait]
impl DirectoryClient for LdapDirectory {
	async fn search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: Vec<String>,
	) -> Result<Vec<SearchEntry>, LdapError> {
		let mut ldap = self.handle();
		let (entries, _) = ldap.search(base, scope, filter, attributes).await?.success()?;
		Ok(entries.into_iter().map(SearchEntry::construct).collect())
	}

	async fn add(
		&self,
		dn: &str,
		attributes: Vec<(String, HashSet<String>)>,
	) -> Result<(), LdapError> {
		let mut ldap = self.handle();
		ldap.add(dn, attributes).await?.success()?;
		Ok(())
	}

	async fn modify(&self, dn: &str, modifications: Vec<Mod<String>>) -> Result<(), LdapError> {
		let mut ldap = self.handle();
		ldap.modify(dn, modifications).await?.success()?;
		Ok(())
	}

	async fn delete(&self, dn: &str) -> Result<(), LdapError> {
		let mut ldap = self.handle();
		ldap.delete(dn).await?.success()?;
		Ok(())
	}

	async fn change_password(&self, dn: &str, new_password: &str) -> Result<(), LdapError> {
		let mut ldap = self.handle();
		let exop =
			PasswordModify { user_id: Some(dn), old_pass: None, new_pass: Some(new_password) };
		ldap.extended(exop).await?.success()?;
		Ok(())
	}

	async fn unbind(&self) -> Result<(), LdapError> {
		self.handle().unbind().await
	}
}

/// Opens `ldap3` sessions to the server of one section
#[derive(Clone, Debug)]
pub struct LdapConnector {
	/// Where to connect and how
	settings: Arc<SectionConfig>,
}

impl LdapConnector {
	/// Create a connector for `settings`
	#[must_use]
	pub fn new(settings: Arc<SectionConfig>) -> Self {
		Self { settings }
	}
}

#[async_trait]
impl Connector for LdapConnector {
	async fn connect(
		&self,
		dn: &str,
		password: &str,
	) -> Result<Arc<dyn DirectoryClient>, LdapError> {
		Ok(Arc::new(LdapDirectory::connect(&self.settings, dn, password).await?))
	}
}

/// Translate the section's timeout and TLS settings
async fn connection_settings(settings: &SectionConfig) -> Result<LdapConnSettings, LdapError> {
	let mut conn_settings =
		LdapConnSettings::new().set_conn_timeout(Duration::from_secs(settings.timeout));

	if let Some(tls) = &settings.tls {
		conn_settings = conn_settings
			.set_starttls(tls.danger_use_start_tls)
			.set_no_tls_verify(tls.danger_disable_tls_verify)
			.set_connector(tls_connector(tls).await?);
	}

	Ok(conn_settings)
}

/// Build a TLS connector trusting the configured server certificate and
/// presenting the configured client identity
async fn tls_connector(tls: &TlsConfig) -> Result<TlsConnector, LdapError> {
	let mut builder = TlsConnector::builder();

	if let Some(path) = &tls.server_certificate {
		builder.add_root_certificate(Certificate::from_pem(&tokio::fs::read(path).await?)?);
	}

	match (&tls.client_certificate, &tls.client_key) {
		(Some(certificate), Some(key)) => {
			let certificate = tokio::fs::read(certificate).await?;
			let key = tokio::fs::read(key).await?;
			builder.identity(Identity::from_pkcs8(&certificate, &key)?);
		}
		(None, None) => {}
		_ => {
			tracing::warn!("client certificate and key must be configured together, ignoring both");
		}
	}

	builder.danger_accept_invalid_certs(tls.danger_disable_tls_verify);
	Ok(builder.build()?)
}
