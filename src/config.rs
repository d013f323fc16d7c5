//! Configuration of directory sections and custom entry classes.
use std::{
	collections::BTreeMap,
	path::{Path, PathBuf},
};

use anyhow_ext::{Context, Result};
use config::{Config as ConfigSource, Environment, File};
use serde::Deserialize;
use url::Url;

use crate::{dn, schema::Role};

/// Prefix of environment variables overriding file settings
const ENV_VAR_CONFIG_PREFIX: &str = "LDAP_MAPPER";
/// Separator between nested keys in environment variable names
const ENV_VAR_SEPARATOR: &str = "__";

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
	/// Directory sections, by name
	pub sections: BTreeMap<String, SectionConfig>,
	/// Custom entry classes, by name
	#[serde(default)]
	pub classes: BTreeMap<String, ClassConfig>,
	/// Maximum level of log messages, e.g. `debug`
	pub log_level: Option<String>,
}

impl Config {
	/// Read the configuration file at `path`, with `LDAP_MAPPER__*`
	/// environment variables taking precedence
	pub fn new(path: &Path) -> Result<Self> {
		ConfigSource::builder()
			.add_source(File::from(path))
			.add_source(
				Environment::with_prefix(ENV_VAR_CONFIG_PREFIX)
					.prefix_separator(ENV_VAR_SEPARATOR)
					.separator(ENV_VAR_SEPARATOR)
					.try_parsing(true),
			)
			.build()
			.context(format!("failed to read configuration from `{}`", path.display()))?
			.try_deserialize()
			.context("invalid configuration")
	}

	/// The section called `name`
	pub fn section(&self, name: &str) -> Result<&SectionConfig> {
		self.sections.get(name).context(format!("no section named `{name}` is configured"))
	}
}

/// Connection settings and tree layout of one directory
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SectionConfig {
	/// The URL of the LDAP server
	pub url: Url,
	/// The DN to bind for administration
	pub bind_dn: String,
	/// The password for the bind DN
	pub bind_password: String,
	/// Root of all searches; the bind DN without its first RDN if unset
	pub base_dn: Option<String>,
	/// Where users live
	pub user_dn: Option<String>,
	/// Where groups live
	pub group_dn: Option<String>,
	/// Where permission groups live
	pub perm_dn: Option<String>,
	/// Naming attribute of users
	#[serde(default = "default_user_rdn")]
	pub user_rdn: String,
	/// Naming attribute of groups
	#[serde(default = "default_group_rdn")]
	pub group_rdn: String,
	/// DN pattern of users, `{uid}` is replaced by the identifier
	pub user_mask: Option<String>,
	/// DN pattern of groups, `{gid}` is replaced by the identifier
	pub group_mask: Option<String>,
	/// Class name for the user role
	pub user_class: Option<String>,
	/// Class name for the group role
	pub group_class: Option<String>,
	/// Class name for the permission role
	pub perm_class: Option<String>,
	/// Timeout for establishing connections in seconds
	#[serde(default = "default_timeout")]
	pub timeout: u64,
	/// Timeout for single operations in seconds
	pub operation_timeout: Option<u64>,
	/// TLS-related configuration
	pub tls: Option<TlsConfig>,
}

/// The usual naming attribute of people
fn default_user_rdn() -> String {
	"uid".to_owned()
}

/// The usual naming attribute of groups
fn default_group_rdn() -> String {
	"cn".to_owned()
}

/// Seconds to wait for a connection
fn default_timeout() -> u64 {
	5
}

impl SectionConfig {
	/// Root of all searches
	#[must_use]
	pub fn base_dn(&self) -> &str {
		match &self.base_dn {
			Some(base_dn) => base_dn,
			None => dn::parent(&self.bind_dn).unwrap_or(&self.bind_dn),
		}
	}

	/// Where entries of `role` live, if configured
	#[must_use]
	pub fn role_dn(&self, role: Role) -> Option<&str> {
		match role {
			Role::Node => None,
			Role::User => self.user_dn.as_deref(),
			Role::Group => self.group_dn.as_deref(),
			Role::Permission => self.perm_dn.as_deref(),
		}
	}

	/// The class name configured for `role`
	#[must_use]
	pub fn role_class(&self, role: Role) -> Option<&str> {
		match role {
			Role::Node => None,
			Role::User => self.user_class.as_deref(),
			Role::Group => self.group_class.as_deref(),
			Role::Permission => self.perm_class.as_deref(),
		}
	}
}

/// The LDAP TLS configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct TlsConfig {
	/// Path to the client key; without it the server must not ask for
	/// client certificates
	pub client_key: Option<PathBuf>,
	/// Path to the client certificate, in PEM format
	pub client_certificate: Option<PathBuf>,
	/// Path to the server certificate; if not specified, the host's
	/// CA will be used to verify the server.
	pub server_certificate: Option<PathBuf>,
	/// Skip certificate verification. Test environments only.
	#[serde(default)]
	pub danger_disable_tls_verify: bool,
	/// Upgrade a plain connection with StartTLS instead of using an
	/// `ldaps` URL
	#[serde(default)]
	pub danger_use_start_tls: bool,
}

/// Declaration of a custom entry class
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ClassConfig {
	/// Name of the class to inherit from
	pub extends: Option<String>,
	/// Attribute whose value forms the first RDN
	pub naming_attribute: Option<String>,
	/// DN new entries are created under
	pub base_location: Option<String>,
	/// Structural object class used in search filters
	pub object_class: Option<String>,
	/// Attribute listing group members
	pub member_attribute: Option<String>,
	/// Values every new entry starts with
	#[serde(default)]
	pub defaults: BTreeMap<String, Vec<String>>,
	/// Declared attributes
	#[serde(default)]
	pub attributes: Vec<AttributeConfig>,
}

/// Declaration of one attribute of a custom class
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AttributeConfig {
	/// Directory attribute name
	pub name: String,
	/// Accessor name, the attribute name if unset
	pub key: Option<String>,
	/// Human readable title
	pub title: Option<String>,
	/// Longer description
	#[serde(default)]
	pub description: String,
	/// Whether a value is required
	#[serde(default)]
	pub required: bool,
	/// Accepted values
	#[serde(default)]
	pub kind: AttributeKind,
	/// For entry sets: class of the related entries
	pub class: Option<String>,
	/// For entry sets: role whose class the related entries have
	pub role: Option<Role>,
}

/// Value kinds of configured attributes
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
	/// ASCII text
	#[default]
	String,
	/// Any text
	Unicode,
	/// A calendar date
	Date,
	/// A date and time
	Datetime,
	/// A decimal integer
	Integer,
	/// Several text values
	StringSet,
	/// DNs of other entries
	EntrySet,
}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use std::io::Write;

	use indoc::indoc;

	use super::*;

	const EXAMPLE_CONFIG: &str = indoc! {r#"
        log_level: debug

        sections:
          afpy:
            url: ldap://localhost:1389
            bind_dn: cn=admin,dc=example,dc=org
            bind_password: adminpassword
            user_dn: ou=members,dc=example,dc=org
            group_dn: ou=groups,dc=example,dc=org
            user_class: member
            operation_timeout: 10
            tls:
              server_certificate: ./tests/environment/certs/server.crt
              danger_use_start_tls: true
          legacy:
            url: ldap://localhost:1389
            bind_dn: cn=admin,dc=legacy,dc=org
            bind_password: adminpassword
            base_dn: dc=legacy,dc=org
            user_mask: "uid={uid},ou=people,dc=legacy,dc=org"

        classes:
          staff:
            extends: user
            object_class: staffMember
            attributes:
              - name: employeeNumber
                kind: integer
	"#};

	fn load_config() -> Config {
		serde_yaml::from_str(EXAMPLE_CONFIG).expect("invalid config")
	}

	#[test]
	fn sections_fill_defaults() {
		let config = load_config();
		let afpy = config.section("afpy").expect("section must exist");

		assert_eq!(afpy.base_dn(), "dc=example,dc=org");
		assert_eq!(afpy.user_rdn, "uid");
		assert_eq!(afpy.group_rdn, "cn");
		assert_eq!(afpy.timeout, 5);
		assert_eq!(afpy.operation_timeout, Some(10));
		assert_eq!(afpy.role_dn(Role::Group), Some("ou=groups,dc=example,dc=org"));
		assert_eq!(afpy.role_dn(Role::Permission), None);
		assert_eq!(afpy.role_class(Role::User), Some("member"));
		assert!(afpy.tls.as_ref().is_some_and(|tls| tls.danger_use_start_tls));

		let legacy = config.section("legacy").expect("section must exist");
		assert_eq!(legacy.base_dn(), "dc=legacy,dc=org");
		assert!(config.section("missing").is_err());

		let staff = config.classes.get("staff").expect("class must exist");
		assert_eq!(staff.extends.as_deref(), Some("user"));
		assert_eq!(staff.attributes[0].kind, AttributeKind::Integer);
	}

	#[test]
	fn reads_yaml_files() {
		let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().expect("temp file");
		file.write_all(EXAMPLE_CONFIG.as_bytes()).expect("write config");

		let config = Config::new(file.path()).expect("config must load");
		assert_eq!(config, load_config());

		assert!(Config::new(Path::new("/nonexistent/config.yaml")).is_err());
	}
}
