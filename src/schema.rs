//! Typed attribute descriptors and the entry classes that declare them.
use std::{
	collections::BTreeMap,
	fmt,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};

use serde::Deserialize;

use crate::{
	codec::{RawValue, ValueKind},
	config::{AttributeConfig, AttributeKind, ClassConfig},
	err::Result,
	models::ClassCatalog,
};

/// Source of declaration order numbers, shared by every descriptor in the
/// process
static DECLARATION_ORDER: AtomicUsize = AtomicUsize::new(0);

/// The roles a connection assigns an entry class to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	/// Generic entries
	Node,
	/// People
	User,
	/// Groups of people
	Group,
	/// Groups granting permissions
	Permission,
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Node => "node",
			Self::User => "user",
			Self::Group => "group",
			Self::Permission => "permission",
		})
	}
}

/// The class members of a relation attribute are materialized as
#[derive(Clone, Debug)]
pub enum SubEntryClass {
	/// Always this class
	Fixed(Arc<EntryClass>),
	/// Whatever class the connection currently uses for this role
	Role(Role),
}

/// The domain of values an attribute accepts
#[derive(Clone, Debug)]
pub enum Domain {
	/// ASCII text
	String,
	/// Any text
	Unicode,
	/// A calendar date
	Date,
	/// A date and time
	DateTime,
	/// A decimal integer
	Integer,
	/// Several text values
	StringSet,
	/// DNs of other entries
	EntrySet(SubEntryClass),
}

impl Domain {
	/// The value kind the codec decodes this domain to
	#[must_use]
	pub fn kind(&self) -> ValueKind {
		match self {
			Self::String | Self::Unicode => ValueKind::Text,
			Self::Date => ValueKind::Date,
			Self::DateTime => ValueKind::DateTime,
			Self::Integer => ValueKind::Integer,
			Self::StringSet | Self::EntrySet(_) => ValueKind::List,
		}
	}

	/// The sub-entry class, if this is a relation
	#[must_use]
	pub fn sub_entry_class(&self) -> Option<&SubEntryClass> {
		match self {
			Self::EntrySet(class) => Some(class),
			_ => None,
		}
	}
}

/// A typed, named accessor for one directory attribute
#[derive(Clone, Debug)]
pub struct AttributeDescriptor {
	/// Name used to access the attribute on an entry
	key: String,
	/// Directory attribute name
	attribute: String,
	/// Human readable title
	title: String,
	/// Longer description
	description: String,
	/// Whether forms must ask for a value
	required: bool,
	/// Accepted values
	domain: Domain,
	/// Position in the global declaration order
	order: usize,
}

impl AttributeDescriptor {
	/// Declare an accessor for `attribute`, keyed by the attribute name
	pub fn new(attribute: impl Into<String>, domain: Domain) -> Self {
		let attribute = attribute.into();
		Self {
			key: attribute.clone(),
			title: title_case(&attribute),
			attribute,
			description: String::new(),
			required: false,
			domain,
			order: DECLARATION_ORDER.fetch_add(1, Ordering::Relaxed),
		}
	}

	/// An ASCII text attribute
	pub fn string(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::String)
	}

	/// A text attribute
	pub fn unicode(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::Unicode)
	}

	/// A date attribute
	pub fn date(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::Date)
	}

	/// A datetime attribute
	pub fn datetime(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::DateTime)
	}

	/// An integer attribute
	pub fn integer(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::Integer)
	}

	/// A multi-valued text attribute
	pub fn string_set(attribute: impl Into<String>) -> Self {
		Self::new(attribute, Domain::StringSet)
	}

	/// A relation holding the DNs of entries of `class`
	pub fn entry_set(attribute: impl Into<String>, class: SubEntryClass) -> Self {
		Self::new(attribute, Domain::EntrySet(class))
	}

	/// Access the attribute under a different name
	#[must_use]
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = key.into();
		self
	}

	/// Set the title
	#[must_use]
	pub fn with_title(mut self, title: impl Into<String>) -> Self {
		self.title = title.into();
		self
	}

	/// Set the description
	#[must_use]
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();
		self
	}

	/// Mark the attribute as required
	#[must_use]
	pub fn required(mut self) -> Self {
		self.required = true;
		self
	}

	/// Accessor name
	#[must_use]
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Directory attribute name
	#[must_use]
	pub fn attribute(&self) -> &str {
		&self.attribute
	}

	/// Human readable title
	#[must_use]
	pub fn title(&self) -> &str {
		&self.title
	}

	/// Longer description
	#[must_use]
	pub fn description(&self) -> &str {
		&self.description
	}

	/// Whether a value is required
	#[must_use]
	pub fn is_required(&self) -> bool {
		self.required
	}

	/// Accepted values
	#[must_use]
	pub fn domain(&self) -> &Domain {
		&self.domain
	}

	/// Position in the global declaration order
	#[must_use]
	pub fn order(&self) -> usize {
		self.order
	}
}

/// `birthDate` -> `Birthdate`
fn title_case(name: &str) -> String {
	let mut chars = name.chars();
	chars
		.next()
		.map(|first| first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect())
		.unwrap_or_default()
}

/// The schema shared by all entries of one kind
#[derive(Clone, Debug)]
pub struct EntryClass {
	/// Class name
	name: String,
	/// Names of the classes this one was derived from, nearest first
	lineage: Vec<String>,
	/// Attribute whose value forms the first RDN
	naming_attribute: Option<String>,
	/// DN new entries are created under
	base_location: Option<String>,
	/// Structural object class used in search filters
	object_class: Option<String>,
	/// Attribute listing the members of a group
	member_attribute: Option<String>,
	/// Values every new entry starts with
	defaults: BTreeMap<String, RawValue>,
	/// Declared accessors
	descriptors: Vec<AttributeDescriptor>,
}

impl EntryClass {
	/// Start declaring a class from scratch
	pub fn builder(name: impl Into<String>) -> EntryClassBuilder {
		EntryClassBuilder {
			class: Self {
				name: name.into(),
				lineage: Vec::new(),
				naming_attribute: None,
				base_location: None,
				object_class: None,
				member_attribute: None,
				defaults: BTreeMap::new(),
				descriptors: Vec::new(),
			},
		}
	}

	/// Start declaring a class that inherits everything from this one
	pub fn extend(&self, name: impl Into<String>) -> EntryClassBuilder {
		let mut class = self.clone();
		class.lineage.insert(0, std::mem::replace(&mut class.name, name.into()));
		EntryClassBuilder { class }
	}

	/// Build a class from its configuration, resolving `extends` and entry
	/// set classes through `catalog`
	pub fn from_config(name: &str, config: &ClassConfig, catalog: &ClassCatalog) -> Result<Self> {
		let mut builder = match &config.extends {
			Some(base) => catalog.get(base)?.extend(name),
			None => Self::builder(name),
		};

		if let Some(attribute) = &config.naming_attribute {
			builder = builder.naming_attribute(attribute);
		}
		if let Some(location) = &config.base_location {
			builder = builder.base_location(location);
		}
		if let Some(object_class) = &config.object_class {
			builder = builder.object_class(object_class);
		}
		if let Some(attribute) = &config.member_attribute {
			builder = builder.member_attribute(attribute);
		}
		for (attribute, values) in &config.defaults {
			builder = builder.default(attribute, RawValue::from_values(values.clone()));
		}
		for attribute in &config.attributes {
			builder = builder.attribute(descriptor_from_config(attribute, catalog)?);
		}

		Ok(builder.build())
	}

	/// Class name
	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Attribute whose value forms the first RDN
	#[must_use]
	pub fn naming_attribute(&self) -> Option<&str> {
		self.naming_attribute.as_deref()
	}

	/// DN new entries are created under
	#[must_use]
	pub fn base_location(&self) -> Option<&str> {
		self.base_location.as_deref()
	}

	/// Structural object class used in search filters
	#[must_use]
	pub fn object_class(&self) -> Option<&str> {
		self.object_class.as_deref()
	}

	/// Attribute listing the members of a group
	#[must_use]
	pub fn member_attribute(&self) -> Option<&str> {
		self.member_attribute.as_deref()
	}

	/// Values every new entry starts with
	#[must_use]
	pub fn defaults(&self) -> &BTreeMap<String, RawValue> {
		&self.defaults
	}

	/// The accessor registered under `key`
	#[must_use]
	pub fn descriptor(&self, key: &str) -> Option<&AttributeDescriptor> {
		self.descriptors.iter().find(|descriptor| descriptor.key == key)
	}

	/// Declared accessors in declaration order
	#[must_use]
	pub fn properties(&self) -> Vec<&AttributeDescriptor> {
		let mut properties: Vec<_> = self.descriptors.iter().collect();
		properties.sort_by_key(|descriptor| descriptor.order);
		properties
	}

	/// Whether this class is `other` or was derived from it
	#[must_use]
	pub fn is_a(&self, other: &Self) -> bool {
		self.name == other.name || self.lineage.contains(&other.name)
	}
}

/// Declares an [`EntryClass`]
#[derive(Debug)]
pub struct EntryClassBuilder {
	/// The class under construction
	class: EntryClass,
}

impl EntryClassBuilder {
	/// Name entries after `attribute`
	#[must_use]
	pub fn naming_attribute(mut self, attribute: impl Into<String>) -> Self {
		self.class.naming_attribute = Some(attribute.into());
		self
	}

	/// Create new entries under `location`
	#[must_use]
	pub fn base_location(mut self, location: impl Into<String>) -> Self {
		self.class.base_location = Some(location.into());
		self
	}

	/// Create new entries under `location`, if there is one
	#[must_use]
	pub fn maybe_base_location(mut self, location: Option<&str>) -> Self {
		if let Some(location) = location {
			self.class.base_location = Some(location.to_owned());
		}
		self
	}

	/// Search for entries of this class with `objectClass=<object_class>`
	#[must_use]
	pub fn object_class(mut self, object_class: impl Into<String>) -> Self {
		self.class.object_class = Some(object_class.into());
		self
	}

	/// List group members in `attribute`
	#[must_use]
	pub fn member_attribute(mut self, attribute: impl Into<String>) -> Self {
		self.class.member_attribute = Some(attribute.into());
		self
	}

	/// Start new entries with this value
	#[must_use]
	pub fn default(mut self, attribute: impl Into<String>, value: impl Into<RawValue>) -> Self {
		self.class.defaults.insert(attribute.into(), value.into());
		self
	}

	/// Declare an accessor, replacing an inherited one with the same key
	#[must_use]
	pub fn attribute(mut self, descriptor: AttributeDescriptor) -> Self {
		self.class.descriptors.retain(|existing| existing.key != descriptor.key);
		self.class.descriptors.push(descriptor);
		self
	}

	/// Finish the declaration
	#[must_use]
	pub fn build(self) -> EntryClass {
		self.class
	}
}

/// Turn a configured attribute into a descriptor
fn descriptor_from_config(
	config: &AttributeConfig,
	catalog: &ClassCatalog,
) -> Result<AttributeDescriptor> {
	let domain = match config.kind {
		AttributeKind::String => Domain::String,
		AttributeKind::Unicode => Domain::Unicode,
		AttributeKind::Date => Domain::Date,
		AttributeKind::Datetime => Domain::DateTime,
		AttributeKind::Integer => Domain::Integer,
		AttributeKind::StringSet => Domain::StringSet,
		AttributeKind::EntrySet => Domain::EntrySet(match (&config.class, config.role) {
			(Some(class), _) => SubEntryClass::Fixed(catalog.get(class)?),
			(None, role) => SubEntryClass::Role(role.unwrap_or(Role::Node)),
		}),
	};

	let mut descriptor =
		AttributeDescriptor::new(&config.name, domain).with_description(&config.description);
	if let Some(key) = &config.key {
		descriptor = descriptor.with_key(key);
	}
	if let Some(title) = &config.title {
		descriptor = descriptor.with_title(title);
	}
	if config.required {
		descriptor = descriptor.required();
	}
	Ok(descriptor)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn person() -> EntryClass {
		EntryClass::builder("person")
			.naming_attribute("uid")
			.base_location("ou=people,dc=example,dc=org")
			.default("objectClass", vec!["top", "person"])
			.attribute(AttributeDescriptor::string("uid").with_title("Login").required())
			.attribute(AttributeDescriptor::unicode("sn"))
			.build()
	}

	#[test]
	fn declaration_order_is_monotonic() {
		let first = AttributeDescriptor::string("a");
		let second = AttributeDescriptor::string("b");
		assert!(first.order() < second.order());
	}

	#[test]
	fn derived_classes_append_properties() {
		let base = person();
		let derived = base
			.extend("member")
			.attribute(AttributeDescriptor::date("birthDate"))
			.attribute(AttributeDescriptor::unicode("sn").with_title("Last name"))
			.default("st", "FR")
			.build();

		let keys: Vec<_> = derived.properties().iter().map(|descriptor| descriptor.key()).collect();
		assert_eq!(keys, ["uid", "birthDate", "sn"]);
		assert_eq!(
			derived.descriptor("birthDate").map(AttributeDescriptor::title),
			Some("Birthdate")
		);
		assert_eq!(derived.naming_attribute(), Some("uid"));
		assert_eq!(derived.defaults().len(), 2);

		assert!(derived.is_a(&base));
		assert!(!base.is_a(&derived));
		assert_eq!(base.properties().len(), 2);
	}

	#[test]
	fn domains_map_to_value_kinds() {
		assert_eq!(Domain::Unicode.kind(), ValueKind::Text);
		assert_eq!(Domain::Integer.kind(), ValueKind::Integer);
		assert_eq!(Domain::EntrySet(SubEntryClass::Role(Role::User)).kind(), ValueKind::List);
		assert!(Domain::StringSet.sub_entry_class().is_none());
	}

	#[test]
	fn classes_build_from_config() {
		let config: ClassConfig = serde_yaml::from_str(indoc::indoc! {"
			extends: user
			base_location: ou=staff,dc=example,dc=org
			object_class: staffMember
			defaults:
			  objectClass: [top, person, staffMember]
			attributes:
			  - name: employeeNumber
			    kind: integer
			    title: Number
			    required: true
			  - name: manager
			    key: managers
			    kind: entry_set
			    role: user
		"})
		.expect("invalid class config");

		let mut catalog = ClassCatalog::default();
		catalog.insert(Arc::new(person().extend("user").build()));
		let class = EntryClass::from_config("staff", &config, &catalog).expect("class must build");

		assert_eq!(class.name(), "staff");
		assert_eq!(class.naming_attribute(), Some("uid"));
		assert_eq!(class.base_location(), Some("ou=staff,dc=example,dc=org"));
		let number = class.descriptor("employeeNumber").expect("declared attribute");
		assert_eq!(number.title(), "Number");
		assert!(number.is_required());
		let managers = class.descriptor("managers").expect("declared relation");
		assert_eq!(managers.attribute(), "manager");
		assert!(matches!(
			managers.domain().sub_entry_class(),
			Some(SubEntryClass::Role(Role::User))
		));
		assert!(class.is_a(&person()));

		let orphan = ClassConfig { extends: Some("nobody".to_owned()), ..config };
		assert!(EntryClass::from_config("orphan", &orphan, &catalog).is_err());
	}
}
