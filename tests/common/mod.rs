//! Common test helpers

#![cfg(test)]
#![allow(clippy::expect_used, dead_code)]

use std::{collections::HashSet, path::Path, sync::Arc, time::Duration};

use ldap3::{Ldap as LdapClient, LdapConnAsync, LdapConnSettings};
use ldap_mapper::{
	ClassCatalog, Config, Connection, SectionConfig,
	directory::{Connector, MemoryDirectory},
};
use tokio::sync::OnceCell;

/// The administrative identity of the seeded directories
pub const ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
/// Its password
pub const ADMIN_PASSWORD: &str = "adminpassword";
/// Name of the section the tests use
pub const SECTION: &str = "example";

static CONFIG: OnceCell<Config> = OnceCell::const_new();

/// Get the test environment config
pub async fn config() -> &'static Config {
	CONFIG
		.get_or_init(|| async {
			Config::new(Path::new("tests/environment/config.yaml"))
				.expect("failed to parse test env file")
		})
		.await
}

/// The section the tests use
pub async fn section() -> SectionConfig {
	config().await.section(SECTION).expect("test section must be configured").clone()
}

/// A directory with the users `gawel` and `ada` and the group `afpy`
pub fn seeded_directory() -> MemoryDirectory {
	let directory = MemoryDirectory::new().with_admin(ADMIN_DN, ADMIN_PASSWORD);
	for unit in ["members", "groups", "permissions"] {
		directory.insert(&format!("ou={unit},dc=example,dc=org"), [
			("objectClass", vec!["organizationalUnit", "top"]),
			("ou", vec![unit]),
		]);
	}
	let members = [("gawel", "Gael Pasgrimaud", "Pasgrimaud"), ("ada", "Ada Lovelace", "Lovelace")];
	for (uid, cn, sn) in members {
		let mail = format!("{uid}@example.org");
		directory.insert(&format!("uid={uid},ou=members,dc=example,dc=org"), [
			("objectClass", vec![
				"top",
				"person",
				"associationMember",
				"organizationalPerson",
				"inetOrgPerson",
			]),
			("uid", vec![uid]),
			("cn", vec![cn]),
			("sn", vec![sn]),
			("mail", vec![mail.as_str()]),
			("birthDate", vec!["19750410000000Z"]),
			("userPassword", vec!["secret"]),
		]);
	}
	directory.insert("cn=afpy,ou=groups,dc=example,dc=org", [
		("objectClass", vec!["groupOfNames", "top"]),
		("cn", vec!["afpy"]),
		("member", vec!["uid=gawel,ou=members,dc=example,dc=org"]),
	]);
	directory
}

/// A seeded directory and an administrative connection to it, with the
/// classes of the test environment config
pub async fn memory_connection() -> (MemoryDirectory, Connection) {
	let directory = seeded_directory();
	let settings = section().await;
	let catalog = ClassCatalog::builtin(&settings)
		.with_config_classes(&config().await.classes)
		.expect("configured classes must resolve");
	let client = directory.connect(ADMIN_DN, ADMIN_PASSWORD).await.expect("admin must bind");
	let conn = Connection::new(settings, catalog, client, Arc::new(directory.clone()))
		.expect("role classes must resolve");
	(directory, conn)
}

/// Raw LDAP client to prepare a live directory
pub struct Ldap {
	client: LdapClient,
}

impl Ldap {
	/// Connect and bind as the configured administrator
	pub async fn new() -> Self {
		let section = section().await;
		let settings = LdapConnSettings::new()
			.set_conn_timeout(Duration::from_secs(section.timeout))
			.set_starttls(false);

		let (conn, mut ldap) = LdapConnAsync::from_url_with_settings(settings, &section.url)
			.await
			.expect("could not connect to ldap");
		ldap3::drive!(conn);

		ldap.simple_bind(&section.bind_dn, &section.bind_password)
			.await
			.expect("could not authenticate to ldap")
			.success()
			.expect("could not authenticate to ldap");

		Self { client: ldap }
	}

	/// Create a test user below the configured user DN
	pub async fn create_user(&mut self, uid: &str, sn: &str, password: &str) {
		tracing::info!("Adding test user to LDAP: `{uid}`");
		let base = section().await.user_dn.expect("user DN must be configured");
		let dn = format!("uid={uid},{base}");
		let attrs = vec![
			(
				"objectClass",
				HashSet::from(["top", "person", "organizationalPerson", "inetOrgPerson"]),
			),
			("uid", HashSet::from([uid])),
			("cn", HashSet::from([uid])),
			("sn", HashSet::from([sn])),
			("userPassword", HashSet::from([password])),
		];

		self.client
			.add(&dn, attrs)
			.await
			.expect("failed to create test user")
			.success()
			.expect("failed to create test user");
	}

	/// Delete an entry, ignoring entries that do not exist
	pub async fn delete(&mut self, dn: &str) {
		let result = self.client.delete(dn).await.expect("failed to delete entry");
		if result.rc != 32 {
			result.success().expect("failed to delete entry");
		}
	}
}
