//! People.
use crate::{
	codec::Value,
	config::SectionConfig,
	entry::Entry,
	err::Result,
	models::{GroupMember, Identifiable, PasswordCheckable},
	schema::{AttributeDescriptor, EntryClass, Role},
};

/// The `user` class: an `inetOrgPerson` named after the section's user
/// naming attribute and stored below its user DN
#[must_use]
pub fn user_class(node: &EntryClass, section: &SectionConfig) -> EntryClass {
	node.extend("user")
		.naming_attribute(&section.user_rdn)
		.base_location(section.role_dn(Role::User).unwrap_or(section.base_dn()))
		.object_class("person")
		.default("objectClass", vec!["top", "person", "organizationalPerson", "inetOrgPerson"])
		.attribute(AttributeDescriptor::string("uid").with_title("Login").required())
		.attribute(AttributeDescriptor::unicode("cn").with_title("Full name"))
		.attribute(AttributeDescriptor::unicode("givenName").with_title("First name"))
		.attribute(AttributeDescriptor::unicode("sn").with_title("Last name").required())
		.attribute(AttributeDescriptor::string("mail").with_title("E-mail"))
		.attribute(AttributeDescriptor::string("telephoneNumber").with_title("Phone"))
		.attribute(AttributeDescriptor::unicode("description"))
		.build()
}

/// A person able to log in and join groups
#[derive(Clone, Debug)]
pub struct User {
	/// The person's entry
	entry: Entry,
}

impl User {
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

	/// The login
	pub async fn uid(&mut self) -> Result<Option<String>> {
		Ok(self.entry.get("uid").await?.into_text())
	}

	/// The primary e-mail address
	pub async fn mail(&mut self) -> Result<Option<String>> {
		Ok(self.entry.get("mail").await?.into_text())
	}

	/// Change the primary e-mail address; saved with [`Entry::save`]
	pub async fn set_mail(&mut self, mail: Option<&str>) -> Result<()> {
		self.entry.set("mail", mail.map_or(Value::None, Value::from)).await
	}
}

impl Identifiable for User {
	fn entry(&self) -> &Entry {
		&self.entry
	}

	fn entry_mut(&mut self) -> &mut Entry {
		&mut self.entry
	}
}

impl PasswordCheckable for User {}

impl GroupMember for User {}
