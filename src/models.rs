//! Builtin entry classes, the catalog resolving class names, and typed
//! wrappers for the common kinds of entries.
use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{
	config::{ClassConfig, SectionConfig},
	entry::Entry,
	err::{Error, Result},
	schema::EntryClass,
};

pub mod group;
pub mod member;
pub mod ou;
pub mod payment;
pub mod user;

pub use group::Group;
pub use member::Member;
pub use ou::OrganizationalUnit;
pub use payment::Payment;
pub use user::User;

/// The class of generic entries: no schema, no naming attribute
#[must_use]
pub fn node_class() -> EntryClass {
	EntryClass::builder("node").build()
}

/// Entry classes by name
#[derive(Clone, Debug, Default)]
pub struct ClassCatalog {
	/// Registered classes
	classes: BTreeMap<String, Arc<EntryClass>>,
}

impl ClassCatalog {
	/// The builtin classes, placed in the tree of `section`
	#[must_use]
	pub fn builtin(section: &SectionConfig) -> Self {
		let node = node_class();
		let user = user::user_class(&node, section);
		let member = member::member_class(&user);
		let payment = payment::payment_class(&node);
		let group = group::group_of_names(&node, section);
		let unique = group::group_of_unique_names(&group);
		let permission = group::permission_class(&group, section);
		let unit = ou::organizational_unit(&node, section);

		let mut catalog = Self::default();
		for class in [node, user, member, payment, group, unique, permission, unit] {
			catalog.insert(Arc::new(class));
		}
		catalog
	}

	/// Add the configured classes. Classes may extend or relate to each
	/// other in any order; cycles fail with [`Error::UnknownClass`].
	pub fn with_config_classes(mut self, classes: &BTreeMap<String, ClassConfig>) -> Result<Self> {
		let mut pending: Vec<_> = classes.iter().collect();
		while !pending.is_empty() {
			let (ready, waiting): (Vec<_>, Vec<_>) = pending.into_iter().partition(|(_, config)| {
				references(config)
					.all(|name| self.classes.contains_key(name) || !classes.contains_key(name))
			});
			if ready.is_empty() {
				let name = waiting.first().map(|(name, _)| (*name).clone()).unwrap_or_default();
				return Err(Error::UnknownClass(name));
			}

			for (name, config) in ready {
				let class = EntryClass::from_config(name, config, &self)?;
				tracing::debug!(class = name.as_str(), "registered configured class");
				self.insert(Arc::new(class));
			}
			pending = waiting;
		}
		Ok(self)
	}

	/// Register `class`, replacing a class of the same name
	pub fn insert(&mut self, class: Arc<EntryClass>) {
		self.classes.insert(class.name().to_owned(), class);
	}

	/// The class called `name`
	pub fn get(&self, name: &str) -> Result<Arc<EntryClass>> {
		self.classes.get(name).cloned().ok_or_else(|| Error::UnknownClass(name.to_owned()))
	}

	/// Names of all registered classes
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.classes.keys().map(String::as_str)
	}
}

/// Names of the classes a configured class depends on
fn references(config: &ClassConfig) -> impl Iterator<Item = &String> {
	config
		.extends
		.iter()
		.chain(config.attributes.iter().filter_map(|attribute| attribute.class.as_ref()))
}

/// Access to the entry behind a typed wrapper
pub trait Identifiable {
	/// The wrapped entry
	fn entry(&self) -> &Entry;

	/// The wrapped entry, for writes
	fn entry_mut(&mut self) -> &mut Entry;

	/// DN of the entry
	fn dn(&self) -> Option<String> {
		self.entry().dn()
	}

	/// Value of the first RDN, e.g. the uid of a user
	fn identifier(&self) -> Option<String> {
		self.entry().rdn_value()
	}
}

/// Entries that can log in
#[async_trait]
pub trait PasswordCheckable: Identifiable {
	/// Whether `password` is valid for this entry, checked with a separate
	/// bind
	async fn check(&self, password: &str) -> Result<bool> {
		let entry = self.entry();
		let conn = entry.connection().ok_or_else(|| entry.unbound())?;
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		conn.check(&dn, password).await
	}

	/// Let the server set a new password for this entry
	async fn change_password(&self, new_password: &str) -> Result<()> {
		let entry = self.entry();
		let conn = entry.connection().ok_or_else(|| entry.unbound())?;
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		conn.change_password(&dn, new_password).await
	}
}

/// Entries listed as members of groups
#[async_trait]
pub trait GroupMember: Identifiable {
	/// The groups listing this entry
	async fn group_entries(&self) -> Result<Vec<Entry>> {
		let entry = self.entry();
		let conn = entry.connection().ok_or_else(|| entry.unbound())?;
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		conn.get_groups(&dn).await
	}

	/// Names of the groups listing this entry
	async fn groups(&self) -> Result<Vec<String>> {
		Ok(self.group_entries().await?.iter().filter_map(Entry::rdn_value).collect())
	}

	/// The permission groups listing this entry
	async fn permission_entries(&self) -> Result<Vec<Entry>> {
		let entry = self.entry();
		let conn = entry.connection().ok_or_else(|| entry.unbound())?;
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		conn.get_permissions(&dn).await
	}

	/// Make this entry a member of exactly the groups named `names`: join
	/// the missing ones and leave the others, saving each changed group
	async fn set_groups(&self, names: &[&str]) -> Result<()> {
		let entry = self.entry();
		let conn = entry.connection().ok_or_else(|| entry.unbound())?;
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;

		let current = self.group_entries().await?;
		for group in current {
			let name = group.rdn_value().unwrap_or_default();
			if !names.iter().any(|wanted| wanted.eq_ignore_ascii_case(&name)) {
				let mut group = Group::new(group);
				if group.remove_member(&dn).await? {
					tracing::info!(%dn, group = %name, "leaving group");
					group.save().await?;
				}
			}
		}
		for name in names {
			let mut group = Group::new(conn.get_group(name));
			if group.add_member(&dn).await? {
				tracing::info!(%dn, group = %name, "joining group");
				group.save().await?;
			}
		}
		Ok(())
	}
}

#[cfg(test)]
pub(crate) mod test_helpers {
	//! A seeded in-memory directory and a connection to it
	#![allow(clippy::expect_used)]

	use indoc::indoc;

	use super::*;
	use crate::{
		connection::Connection,
		directory::{Connector, MemoryDirectory},
	};

	/// The administrative identity
	pub(crate) const ADMIN_DN: &str = "cn=admin,dc=example,dc=org";
	/// Its password
	pub(crate) const ADMIN_PASSWORD: &str = "adminpassword";

	/// Section settings of the seeded tree
	pub(crate) fn section() -> SectionConfig {
		serde_yaml::from_str(indoc! {r#"
			url: ldap://localhost:1389
			bind_dn: cn=admin,dc=example,dc=org
			bind_password: adminpassword
			user_dn: ou=members,dc=example,dc=org
			group_dn: ou=groups,dc=example,dc=org
			perm_dn: ou=permissions,dc=example,dc=org
		"#})
		.expect("valid section")
	}

	/// A directory with one user, `gawel`, in one group, `afpy`
	pub(crate) fn directory() -> MemoryDirectory {
		let directory = MemoryDirectory::new().with_admin(ADMIN_DN, ADMIN_PASSWORD);
		directory.insert("dc=example,dc=org", [
			("objectClass", vec!["dcObject", "organization", "top"]),
			("dc", vec!["example"]),
		]);
		for unit in ["members", "groups", "permissions"] {
			directory.insert(&format!("ou={unit},dc=example,dc=org"), [
				("objectClass", vec!["organizationalUnit", "top"]),
				("ou", vec![unit]),
			]);
		}
		directory.insert("uid=gawel,ou=members,dc=example,dc=org", [
			("objectClass", vec!["inetOrgPerson", "person", "top"]),
			("uid", vec!["gawel"]),
			("cn", vec!["Gael Pasgrimaud"]),
			("sn", vec!["Pasgrimaud"]),
			("mail", vec!["gawel@example.org"]),
			("telephoneNumber", vec!["0102030405"]),
			("userPassword", vec!["secret"]),
		]);
		directory.insert("cn=afpy,ou=groups,dc=example,dc=org", [
			("objectClass", vec!["groupOfNames", "top"]),
			("cn", vec!["afpy"]),
			("member", vec!["uid=gawel,ou=members,dc=example,dc=org"]),
		]);
		directory
	}

	/// The seeded directory and an administrative connection to it
	pub(crate) async fn connection() -> (MemoryDirectory, Connection) {
		let directory = directory();
		let settings = section();
		let client = directory.connect(ADMIN_DN, ADMIN_PASSWORD).await.expect("admin must bind");
		let conn = Connection::new(
			settings.clone(),
			ClassCatalog::builtin(&settings),
			client,
			Arc::new(directory.clone()),
		)
		.expect("builtin classes must resolve");
		(directory, conn)
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use indoc::indoc;
	use test_log::test;

	use super::*;
	use crate::{codec::Value, schema::Role};

	fn classes(yaml: &str) -> BTreeMap<String, ClassConfig> {
		serde_yaml::from_str(yaml).expect("valid classes")
	}

	#[test]
	fn builtin_classes_follow_the_section() {
		let catalog = ClassCatalog::builtin(&test_helpers::section());

		let user = catalog.get("user").expect("user class");
		assert_eq!(user.naming_attribute(), Some("uid"));
		assert_eq!(user.base_location(), Some("ou=members,dc=example,dc=org"));

		let member = catalog.get("member").expect("member class");
		assert!(member.is_a(&user));
		assert!(member.defaults().contains_key("st"));

		let unique = catalog.get("group_of_unique_names").expect("unique group class");
		assert_eq!(unique.member_attribute(), Some("uniqueMember"));
		assert_eq!(unique.base_location(), Some("ou=groups,dc=example,dc=org"));
		assert_eq!(
			catalog.get("permission").expect("permission class").base_location(),
			Some("ou=permissions,dc=example,dc=org")
		);
		assert!(matches!(catalog.get("nope"), Err(Error::UnknownClass(_))));
	}

	#[test]
	fn configured_classes_resolve_in_any_order() {
		let catalog = ClassCatalog::builtin(&test_helpers::section())
			.with_config_classes(&classes(indoc! {r#"
				alumni:
				  extends: staff
				  attributes:
				    - name: graduationDate
				      kind: date
				staff:
				  extends: user
				  object_class: staffMember
				  attributes:
				    - name: employeeNumber
				      kind: integer
				    - name: manager
				      key: managers
				      kind: entry_set
				      role: user
			"#}))
			.expect("classes must resolve");

		let alumni = catalog.get("alumni").expect("alumni class");
		let staff = catalog.get("staff").expect("staff class");
		assert!(alumni.is_a(&staff));
		assert!(alumni.is_a(&catalog.get("user").expect("user class")));
		assert_eq!(alumni.object_class(), Some("staffMember"));
		assert!(alumni.descriptor("employeeNumber").is_some());
		assert!(
			staff.descriptor("managers").is_some_and(|managers| managers.attribute() == "manager")
		);
	}

	#[test]
	fn cyclic_classes_are_rejected() {
		let result = ClassCatalog::builtin(&test_helpers::section()).with_config_classes(&classes(
			indoc! {r#"
				left:
				  extends: right
				right:
				  extends: left
			"#},
		));
		assert!(matches!(result, Err(Error::UnknownClass(_))));
	}

	#[test(tokio::test)]
	async fn users_know_their_groups() {
		let (directory, conn) = test_helpers::connection().await;
		let user = User::new(conn.get_user("gawel"));

		assert_eq!(user.identifier().as_deref(), Some("gawel"));
		assert_eq!(user.groups().await.expect("search must succeed"), ["afpy"]);

		let mut staff = conn
			.new_entry_with(conn.class_for(Role::Group), [("cn", "staff")])
			.expect("attributes must encode");
		staff.set("member", vec![test_helpers::ADMIN_DN]).await.expect("set must succeed");
		staff.save().await.expect("add must succeed");

		user.set_groups(&["staff"]).await.expect("membership must change");
		assert_eq!(user.groups().await.expect("search must succeed"), ["staff"]);
		let stored =
			directory.attributes("cn=staff,ou=groups,dc=example,dc=org").expect("group exists");
		assert_eq!(stored.get("member").map(Vec::len), Some(2));
		let afpy =
			directory.attributes("cn=afpy,ou=groups,dc=example,dc=org").expect("group exists");
		assert!(!afpy.contains_key("member"));
	}

	#[test(tokio::test)]
	async fn group_names_may_contain_separators() {
		let (directory, conn) = test_helpers::connection().await;
		let board = r"cn=Doe\, John,ou=groups,dc=example,dc=org";
		directory.insert(board, [
			("objectClass", vec!["groupOfNames", "top"]),
			("cn", vec!["Doe, John"]),
			("member", vec!["uid=gawel,ou=members,dc=example,dc=org"]),
		]);
		let user = User::new(conn.get_user("gawel"));
		assert_eq!(user.groups().await.expect("search must succeed"), ["afpy", "Doe, John"]);

		let writes = directory.write_count();
		user.set_groups(&["afpy", "Doe, John"]).await.expect("nothing to change");
		assert_eq!(directory.write_count(), writes);

		user.set_groups(&["Doe, John"]).await.expect("membership must change");
		assert_eq!(user.groups().await.expect("search must succeed"), ["Doe, John"]);
		assert!(directory.attributes(board).is_some_and(|stored| stored.contains_key("member")));
	}

	#[test(tokio::test)]
	async fn passwords_go_through_the_connection() {
		let (_, conn) = test_helpers::connection().await;
		let user = User::new(conn.get_user("gawel"));

		assert!(user.check("secret").await.expect("bind works"));
		assert!(!user.check("").await.expect("nothing to bind"));
		user.change_password("changed").await.expect("admin may change passwords");
		assert!(user.check("changed").await.expect("bind works"));

		let mut unbound = User::new(Entry::new(
			conn.class_for(Role::User),
			Arc::clone(conn.codecs()),
		));
		unbound.entry_mut().set("uid", "nobody").await.expect("set must succeed");
		assert_eq!(unbound.entry_mut().get("uid").await.ok(), Some(Value::from("nobody")));
		assert!(matches!(unbound.check("secret").await, Err(Error::Unbound { .. })));
	}
}
