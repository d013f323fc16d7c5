//! Groups of names and groups of unique names.
use crate::{
	codec::RawValue,
	config::SectionConfig,
	dn::{dn_eq, first_rdn},
	entry::Entry,
	err::Result,
	models::Identifiable,
	schema::{AttributeDescriptor, EntryClass, Role, SubEntryClass},
};

/// Member attribute of groups that do not declare one
const DEFAULT_MEMBER_ATTRIBUTE: &str = "member";

/// The `group_of_names` class, stored below the section's group DN
#[must_use]
pub fn group_of_names(node: &EntryClass, section: &SectionConfig) -> EntryClass {
	node.extend("group_of_names")
		.naming_attribute(&section.group_rdn)
		.base_location(section.role_dn(Role::Group).unwrap_or(section.base_dn()))
		.object_class("groupOfNames")
		.member_attribute("member")
		.default("objectClass", vec!["groupOfNames", "top"])
		.attribute(AttributeDescriptor::unicode("cn").with_title("Name").required())
		.attribute(AttributeDescriptor::unicode("description"))
		.attribute(AttributeDescriptor::string_set("member").with_title("Members"))
		.attribute(
			AttributeDescriptor::entry_set("member", SubEntryClass::Role(Role::User))
				.with_key("member_nodes")
				.with_title("Members"),
		)
		.build()
}

/// The `group_of_unique_names` class, a group listing its members in
/// `uniqueMember`
#[must_use]
pub fn group_of_unique_names(group: &EntryClass) -> EntryClass {
	group
		.extend("group_of_unique_names")
		.object_class("groupOfUniqueNames")
		.member_attribute("uniqueMember")
		.default("objectClass", vec!["groupOfUniqueNames", "top"])
		.attribute(
			AttributeDescriptor::string_set("uniqueMember")
				.with_key("member")
				.with_title("Members"),
		)
		.attribute(
			AttributeDescriptor::entry_set("uniqueMember", SubEntryClass::Role(Role::User))
				.with_key("member_nodes")
				.with_title("Members"),
		)
		.build()
}

/// The `permission` class: groups granting permissions, stored below the
/// section's permission DN, or its group DN without one
#[must_use]
pub fn permission_class(group: &EntryClass, section: &SectionConfig) -> EntryClass {
	let base = section
		.role_dn(Role::Permission)
		.or(section.role_dn(Role::Group))
		.unwrap_or(section.base_dn());
	group.extend("permission").base_location(base).build()
}

/// A group of entries
#[derive(Clone, Debug)]
pub struct Group {
	/// The group's entry
	entry: Entry,
}

impl Group {
	/// Wrap `entry`
	#[must_use]
	pub fn new(entry: Entry) -> Self {
		Self { entry }
	}

	/// Unwrap the entry
	#[must_use]
	pub fn into_entry(self) -> Entry {
		self.entry
	}

	/// The attribute listing members
	fn member_attribute(&self) -> String {
		self.entry.class().member_attribute().unwrap_or(DEFAULT_MEMBER_ATTRIBUTE).to_owned()
	}

	/// DNs of the members
	pub async fn members(&mut self) -> Result<Vec<String>> {
		let attribute = self.member_attribute();
		let members = self.entry.get_raw(&attribute).await?;
		Ok(members.map(RawValue::to_vec).unwrap_or_default())
	}

	/// The members, as entries of the user role's class
	pub async fn member_entries(&mut self) -> Result<Vec<Entry>> {
		self.entry.get_entries("member_nodes").await
	}

	/// Add `dn` to the members; `false` if it already is one
	pub async fn add_member(&mut self, dn: &str) -> Result<bool> {
		let mut members = self.members().await?;
		if members.iter().any(|member| dn_eq(member, dn)) {
			return Ok(false);
		}
		members.push(dn.to_owned());
		let attribute = self.member_attribute();
		self.entry.set_raw(&attribute, members).await?;
		Ok(true)
	}

	/// Remove `dn` from the members; `false` if it is not one
	pub async fn remove_member(&mut self, dn: &str) -> Result<bool> {
		let mut members = self.members().await?;
		let before = members.len();
		members.retain(|member| !dn_eq(member, dn));
		if members.len() == before {
			return Ok(false);
		}
		let attribute = self.member_attribute();
		self.entry.set_raw(&attribute, members).await?;
		Ok(true)
	}

	/// Store the group
	pub async fn save(&mut self) -> Result<()> {
		self.entry.save().await
	}

	/// The group name underlined, then one member identifier per line
	pub async fn pprint(&mut self) -> Result<String> {
		self.entry.ensure_loaded().await?;
		let name = self.entry.to_string();
		let mut lines = vec![name.clone(), "-".repeat(name.chars().count())];
		for dn in self.members().await? {
			lines.push(first_rdn(&dn).map_or(dn, |(_, value)| value));
		}
		Ok(lines.join("\n"))
	}
}

impl Identifiable for Group {
	fn entry(&self) -> &Entry {
		&self.entry
	}

	fn entry_mut(&mut self) -> &mut Entry {
		&mut self.entry
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use std::sync::Arc;

	use test_log::test;

	use super::*;
	use crate::models::test_helpers;

	#[test(tokio::test)]
	async fn membership_changes_are_saved() {
		let (directory, conn) = test_helpers::connection().await;
		let mut group = Group::new(conn.get_group("afpy"));
		let admin = test_helpers::ADMIN_DN;

		assert!(group.add_member(admin).await.expect("group loads"));
		assert!(!group.add_member(&admin.to_uppercase()).await.expect("group loads"));
		group.save().await.expect("save must succeed");

		let stored =
			directory.attributes("cn=afpy,ou=groups,dc=example,dc=org").expect("group exists");
		assert_eq!(stored.get("member").map(Vec::len), Some(2));

		let gawel = "UID=gawel,OU=members,DC=example,DC=org";
		assert!(group.remove_member(gawel).await.expect("reloads"));
		assert!(!group.remove_member("uid=nobody,dc=example,dc=org").await.expect("cached"));
		group.save().await.expect("save must succeed");
		assert_eq!(group.members().await.expect("reloads"), [admin]);
	}

	#[test(tokio::test)]
	async fn unique_names_use_their_own_attribute() {
		let (directory, mut conn) = test_helpers::connection().await;
		conn.set_role(Role::Group, conn.catalog().get("group_of_unique_names").expect("class"));
		directory.insert("cn=board,ou=groups,dc=example,dc=org", [
			("objectClass", vec!["groupOfUniqueNames", "top"]),
			("cn", vec!["board"]),
			("uniqueMember", vec!["uid=gawel,ou=members,dc=example,dc=org"]),
		]);

		let mut board = Group::new(conn.get_group("board"));
		let members = board.member_entries().await.expect("members resolve");
		assert_eq!(members, [conn.get_user("gawel")]);
		assert_eq!(
			board.entry_mut().get("member").await.expect("loaded").into_list(),
			["uid=gawel,ou=members,dc=example,dc=org"]
		);

		let groups =
			conn.get_groups("uid=gawel,ou=members,dc=example,dc=org").await.expect("search");
		assert_eq!(groups, [board.into_entry()]);
		assert!(Arc::ptr_eq(groups[0].class(), &conn.class_for(Role::Group)));
	}

	#[test(tokio::test)]
	async fn pprint_lists_member_identifiers() {
		let (_, conn) = test_helpers::connection().await;
		let mut group = Group::new(conn.get_group("afpy"));

		assert_eq!(group.pprint().await.expect("group loads"), "afpy\n----\ngawel");
	}
}
