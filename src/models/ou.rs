//! Organizational units.
use crate::{
	config::SectionConfig,
	entry::Entry,
	err::Result,
	models::Identifiable,
	schema::{AttributeDescriptor, EntryClass},
};

/// The `organizational_unit` class, stored below the base DN
#[must_use]
pub fn organizational_unit(node: &EntryClass, section: &SectionConfig) -> EntryClass {
	node.extend("organizational_unit")
		.naming_attribute("ou")
		.base_location(section.base_dn())
		.object_class("organizationalUnit")
		.default("objectClass", vec!["organizationalUnit", "top"])
		.attribute(AttributeDescriptor::string("ou").with_title("Name").required())
		.attribute(AttributeDescriptor::unicode("description"))
		.build()
}

/// A container of entries
#[derive(Clone, Debug)]
pub struct OrganizationalUnit {
	/// The unit's entry
	entry: Entry,
}

impl OrganizationalUnit {
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

	/// Name of the unit
	pub async fn name(&mut self) -> Result<Option<String>> {
		Ok(self.entry.get("ou").await?.into_text())
	}

	/// Store `child` directly below this unit
	pub async fn append(&mut self, child: &mut Entry) -> Result<()> {
		self.entry.append(child).await
	}
}

impl Identifiable for OrganizationalUnit {
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

	use test_log::test;

	use super::*;
	use crate::models::test_helpers;

	#[test(tokio::test)]
	async fn units_hold_sub_units() {
		let (directory, conn) = test_helpers::connection().await;
		let class = conn.catalog().get("organizational_unit").expect("unit class");
		let mut members =
			OrganizationalUnit::new(conn.lazy_entry(class.clone(), "ou=members,dc=example,dc=org"));
		assert_eq!(members.name().await.expect("unit loads").as_deref(), Some("members"));

		let mut alumni =
			conn.new_entry_with(class, [("ou", "alumni")]).expect("attributes must encode");
		members.append(&mut alumni).await.expect("sub unit is stored");

		let dn = "ou=alumni,ou=members,dc=example,dc=org";
		assert_eq!(alumni.dn().as_deref(), Some(dn));
		assert_eq!(
			directory.attributes(dn).and_then(|stored| stored.get("ou").cloned()),
			Some(vec!["alumni".to_owned()])
		);
	}
}
