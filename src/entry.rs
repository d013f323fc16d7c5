//! One directory object: its identity and a lazily loaded attribute cache.
use std::{
	collections::{BTreeMap, BTreeSet, HashSet},
	fmt,
	sync::Arc,
};

use itertools::Itertools;
use ldap3::{SearchEntry, dn_escape};

use crate::{
	codec::{CodecRegistry, RawValue, Value, ValueKind},
	connection::Connection,
	dn::{dn_eq, first_rdn, normalize},
	err::{Error, Result},
	schema::{EntryClass, SubEntryClass},
};

/// Cached attribute values, keyed by directory attribute name
pub type EntryData = BTreeMap<String, RawValue>;

/// Whether the attribute cache reflects the directory
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadState {
	/// Nothing fetched yet, or the cache was cleared after a write
	Unloaded,
	/// A fetch is in flight, or was abandoned before completing
	Loading,
	/// The cache is usable
	Loaded,
}

/// A directory entry of some [`EntryClass`]
#[derive(Clone)]
pub struct Entry {
	/// Schema of this entry
	class: Arc<EntryClass>,
	/// Converts between cached and typed values
	codecs: Arc<CodecRegistry>,
	/// Repository the entry is loaded from and saved to
	conn: Option<Connection>,
	/// Explicit DN; derived from the naming attribute if unset
	dn: Option<String>,
	/// Attribute cache
	data: EntryData,
	/// Whether `data` reflects the directory
	state: LoadState,
	/// Attributes changed since the last load or save
	dirty: BTreeSet<String>,
	/// Whether the entry has never been stored
	is_new: bool,
}

impl Entry {
	/// A new, unbound entry without values
	#[must_use]
	pub fn new(class: Arc<EntryClass>, codecs: Arc<CodecRegistry>) -> Self {
		Self {
			class,
			codecs,
			conn: None,
			dn: None,
			data: EntryData::new(),
			state: LoadState::Loaded,
			dirty: BTreeSet::new(),
			is_new: true,
		}
	}

	/// A new, unbound entry starting with the class defaults overlaid with
	/// `attributes`, which are keyed by accessor or attribute name
	pub fn with_attrs<K, V>(
		class: Arc<EntryClass>,
		codecs: Arc<CodecRegistry>,
		attributes: impl IntoIterator<Item = (K, V)>,
	) -> Result<Self>
	where
		K: AsRef<str>,
		V: Into<Value>,
	{
		let mut entry = Self::new(class, codecs);
		entry.data = entry.class.defaults().clone();
		for (key, value) in attributes {
			let attribute = entry.attribute_name(key.as_ref())?;
			let raw = entry.codecs.encode(&value.into())?;
			entry.store(attribute, raw);
		}
		entry.dirty.clear();
		Ok(entry)
	}

	/// An entry hydrated from a search result. Binary values are transcoded
	/// with the codec registry's charsets.
	pub fn from_search(
		class: Arc<EntryClass>,
		codecs: Arc<CodecRegistry>,
		conn: Option<Connection>,
		result: SearchEntry,
	) -> Result<Self> {
		let (dn, data) = hydrate(&codecs, result)?;
		Ok(Self {
			class,
			codecs,
			conn,
			dn: Some(dn),
			data,
			state: LoadState::Loaded,
			dirty: BTreeSet::new(),
			is_new: false,
		})
	}

	/// A bound entry whose values are fetched on first access
	#[must_use]
	pub fn lazy(
		class: Arc<EntryClass>,
		codecs: Arc<CodecRegistry>,
		conn: Connection,
		dn: impl Into<String>,
	) -> Self {
		Self {
			class,
			codecs,
			conn: Some(conn),
			dn: Some(dn.into()),
			data: EntryData::new(),
			state: LoadState::Unloaded,
			dirty: BTreeSet::new(),
			is_new: false,
		}
	}

	/// Set the DN explicitly
	#[must_use]
	pub fn with_dn(mut self, dn: impl Into<String>) -> Self {
		self.dn = Some(dn.into());
		self
	}

	/// Bind the entry to `conn`
	pub fn bind(&mut self, conn: Connection) {
		self.conn = Some(conn);
	}

	/// Schema of this entry
	#[must_use]
	pub fn class(&self) -> &Arc<EntryClass> {
		&self.class
	}

	/// The codec registry used for typed access
	#[must_use]
	pub fn codecs(&self) -> &Arc<CodecRegistry> {
		&self.codecs
	}

	/// The repository the entry is bound to
	#[must_use]
	pub fn connection(&self) -> Option<&Connection> {
		self.conn.as_ref()
	}

	/// Load state of the attribute cache
	#[must_use]
	pub fn load_state(&self) -> LoadState {
		self.state
	}

	/// Whether the entry has never been stored
	#[must_use]
	pub fn is_new(&self) -> bool {
		self.is_new
	}

	/// Attributes changed since the last load or save
	pub fn dirty_attributes(&self) -> impl Iterator<Item = &str> {
		self.dirty.iter().map(String::as_str)
	}

	/// The explicit DN, or `<naming attribute>=<value>,<base location>`
	#[must_use]
	pub fn dn(&self) -> Option<String> {
		if let Some(dn) = &self.dn {
			return Some(dn.clone());
		}
		let naming_attribute = self.class.naming_attribute()?;
		let base = self.class.base_location()?;
		let value = self.lookup(naming_attribute)?.first()?;
		Some(format!("{naming_attribute}={},{base}", dn_escape(value)))
	}

	/// Unescaped value of the first RDN of the DN
	#[must_use]
	pub fn rdn_value(&self) -> Option<String> {
		let dn = self.dn()?;
		first_rdn(&dn).map(|(_, value)| value)
	}

	/// Fetch the attribute cache from the directory unless it is loaded.
	///
	/// Zero or several results leave the cache unloaded and fail with
	/// [`Error::NotFound`] or [`Error::AmbiguousResult`].
	pub async fn ensure_loaded(&mut self) -> Result<()> {
		if self.state == LoadState::Loaded {
			return Ok(());
		}
		let (Some(conn), Some(dn)) = (self.conn.clone(), self.dn()) else {
			self.state = LoadState::Loaded;
			return Ok(());
		};

		self.state = LoadState::Loading;
		let fetched = match conn.get_dn(&dn).await {
			Ok(result) => hydrate(&self.codecs, result),
			Err(error) => Err(error),
		};

		match fetched {
			Ok((_, data)) => {
				tracing::debug!(%dn, attributes = data.len(), "loaded entry");
				self.data = data;
				self.state = LoadState::Loaded;
				Ok(())
			}
			Err(error) => {
				self.state = LoadState::Unloaded;
				Err(error)
			}
		}
	}

	/// The attribute cache, loading it if needed
	pub async fn normalized_data(&mut self) -> Result<&EntryData> {
		self.ensure_loaded().await?;
		Ok(&self.data)
	}

	/// Read a typed value by accessor name. Keys without a declared
	/// accessor are read as text from the attribute of the same name.
	pub async fn get(&mut self, key: &str) -> Result<Value> {
		self.ensure_loaded().await?;
		let (attribute, kind) = match self.class.descriptor(key) {
			Some(descriptor) => (descriptor.attribute(), descriptor.domain().kind()),
			None => (key, ValueKind::Text),
		};
		Ok(self.codecs.decode(self.lookup(attribute), kind)?)
	}

	/// Write a typed value by accessor name, marking the attribute dirty.
	/// [`Value::None`] removes all values.
	pub async fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
		let attribute = self.attribute_name(key)?;
		let raw = self.codecs.encode(&value.into())?;

		self.ensure_loaded().await?;
		self.store(attribute, raw);
		Ok(())
	}

	/// Remove all values of an accessor
	pub async fn delete(&mut self, key: &str) -> Result<()> {
		self.set(key, Value::None).await
	}

	/// Read the cached value of a directory attribute
	pub async fn get_raw(&mut self, attribute: &str) -> Result<Option<&RawValue>> {
		self.ensure_loaded().await?;
		Ok(self.lookup(attribute))
	}

	/// Write the cached value of a directory attribute
	pub async fn set_raw(&mut self, attribute: &str, value: impl Into<RawValue>) -> Result<()> {
		self.ensure_loaded().await?;
		self.store(attribute.to_owned(), value.into());
		Ok(())
	}

	/// The entries a relation accessor refers to, bound to this entry's
	/// connection; empty for unbound entries
	pub async fn get_entries(&mut self, key: &str) -> Result<Vec<Self>> {
		let (attribute, sub_class) = self.relation(key)?;
		let Some(conn) = self.conn.clone() else {
			return Ok(Vec::new());
		};
		let class = conn.resolve(&sub_class);

		self.ensure_loaded().await?;
		Ok(self
			.lookup(&attribute)
			.map(RawValue::to_vec)
			.unwrap_or_default()
			.into_iter()
			.unique_by(|dn| normalize(dn))
			.map(|dn| conn.lazy_entry(Arc::clone(&class), dn))
			.collect())
	}

	/// Point a relation accessor at `entries`, which must all be of the
	/// relation's class. Nothing is written if any of them is not.
	pub async fn set_entries(&mut self, key: &str, entries: &[Self]) -> Result<()> {
		let (attribute, sub_class) = self.relation(key)?;
		let expected = match &sub_class {
			SubEntryClass::Fixed(class) => Arc::clone(class),
			SubEntryClass::Role(_) => {
				self.conn.as_ref().ok_or_else(|| self.unbound())?.resolve(&sub_class)
			}
		};

		let mut dns = Vec::with_capacity(entries.len());
		for entry in entries {
			if !entry.class.is_a(&expected) {
				return Err(Error::WrongEntryClass {
					attribute: key.to_owned(),
					expected: expected.name().to_owned(),
					found: entry.class.name().to_owned(),
				});
			}
			dns.push(entry.dn().ok_or_else(|| entry.unbound())?);
		}
		let dns = dns.into_iter().unique_by(|dn| normalize(dn)).collect();

		self.ensure_loaded().await?;
		self.store(attribute, RawValue::Many(dns));
		Ok(())
	}

	/// Store the entry: add it if new, otherwise write the changed
	/// attributes, adding it instead if it vanished from the directory
	pub async fn save(&mut self) -> Result<()> {
		let conn = self.conn.clone().ok_or_else(|| self.unbound())?;
		if self.dn().is_none() {
			return Err(self.unbound());
		}

		if self.is_new {
			return conn.add(self).await;
		}
		match conn.save(self).await {
			Err(error) if error.is_no_such_object() => {
				tracing::debug!(dn = ?self.dn(), "entry vanished, adding it instead");
				conn.add(self).await
			}
			result => result,
		}
	}

	/// Place `sub` below this entry, bind it to this entry's connection and
	/// store it
	pub async fn append(&mut self, sub: &mut Self) -> Result<()> {
		let dn = self.place(sub).await?;
		let conn = self.conn.clone().ok_or_else(|| self.unbound())?;

		match conn.get_dn(&dn).await {
			Err(error) if error.is_no_such_object() => conn.add(sub).await,
			Err(error) => Err(error),
			Ok(_) => conn.save(sub).await,
		}
	}

	/// Place `sub` below this entry and bind it, without storing it
	pub async fn append_unsaved(&mut self, sub: &mut Self) -> Result<()> {
		self.place(sub).await.map(|_| ())
	}

	/// Give `sub` a DN below this entry, returning it
	async fn place(&mut self, sub: &mut Self) -> Result<String> {
		let parent = self.dn().ok_or_else(|| self.unbound())?;
		let naming_attribute = sub
			.class
			.naming_attribute()
			.ok_or_else(|| Error::MissingNamingAttribute { class: sub.class.name().to_owned() })?
			.to_owned();
		let value = sub
			.get_raw(&naming_attribute)
			.await?
			.and_then(RawValue::first)
			.ok_or_else(|| Error::MissingNamingValue { attribute: naming_attribute.clone() })?
			.to_owned();

		let dn = format!("{naming_attribute}={},{parent}", dn_escape(value));
		sub.dn = Some(dn.clone());
		if let Some(conn) = &self.conn {
			sub.bind(conn.clone());
		}
		Ok(dn)
	}

	/// A human readable dump of the entry
	pub async fn pprint(&mut self) -> Result<String> {
		self.ensure_loaded().await?;
		let class = Arc::clone(&self.class);

		let name = self.to_string();
		let mut lines = vec![
			name.clone(),
			"-".repeat(name.chars().count()),
			field_line("dn", &self.dn().unwrap_or_default()),
		];
		for descriptor in class.properties() {
			let value = self.get(descriptor.key()).await?;
			if !value.is_none() {
				lines.push(field_line(descriptor.title(), &value.to_string()));
			}
		}

		Ok(lines.join("\n"))
	}

	/// The cached value of `attribute`, matching its name case-insensitively
	fn lookup(&self, attribute: &str) -> Option<&RawValue> {
		self.data.get(attribute).or_else(|| {
			self.data
				.iter()
				.find(|(name, _)| name.eq_ignore_ascii_case(attribute))
				.map(|(_, value)| value)
		})
	}

	/// Cache a value under the stored spelling of `attribute`, marking it
	/// dirty
	fn store(&mut self, attribute: String, value: RawValue) {
		let attribute = self
			.data
			.keys()
			.find(|name| name.eq_ignore_ascii_case(&attribute))
			.cloned()
			.unwrap_or(attribute);
		self.dirty.insert(attribute.clone());
		self.data.insert(attribute, value);
	}

	/// The directory attribute behind a non-relation accessor
	fn attribute_name(&self, key: &str) -> Result<String> {
		match self.class.descriptor(key) {
			Some(descriptor) if descriptor.domain().sub_entry_class().is_some() => {
				Err(Error::ExpectedEntries { attribute: key.to_owned() })
			}
			Some(descriptor) => Ok(descriptor.attribute().to_owned()),
			None => Ok(key.to_owned()),
		}
	}

	/// The directory attribute and sub-entry class of a relation accessor
	fn relation(&self, key: &str) -> Result<(String, SubEntryClass)> {
		self.class
			.descriptor(key)
			.and_then(|descriptor| {
				let sub_class = descriptor.domain().sub_entry_class()?.clone();
				Some((descriptor.attribute().to_owned(), sub_class))
			})
			.ok_or_else(|| Error::NotARelation { attribute: key.to_owned() })
	}

	/// The error for operations needing a connection or a DN
	pub(crate) fn unbound(&self) -> Error {
		Error::Unbound { entry: format!("{self:?}") }
	}

	/// Fail if `dn` disagrees with the DN or naming value in the cache
	pub(crate) fn check_identity(&self, dn: &str) -> Result<()> {
		let inconsistent = |found: &str| Error::InconsistentIdentity {
			dn: dn.to_owned(),
			found: found.to_owned(),
		};

		if let Some(declared) = self.lookup("dn").and_then(RawValue::first) {
			if !dn_eq(declared, dn) {
				return Err(inconsistent(declared));
			}
		}

		let (Some(naming_attribute), Some((attribute, value))) =
			(self.class.naming_attribute(), first_rdn(dn))
		else {
			return Ok(());
		};
		if !attribute.trim().eq_ignore_ascii_case(naming_attribute) {
			return Ok(());
		}
		match self.lookup(naming_attribute) {
			Some(local) if !local.is_empty() => {
				if local.values().any(|local| local.trim().to_lowercase() == value.to_lowercase()) {
					Ok(())
				} else {
					Err(inconsistent(&local.to_string()))
				}
			}
			_ => Ok(()),
		}
	}

	/// Attributes a save has to compare with the directory: everything for
	/// entries never stored, otherwise the dirty ones
	pub(crate) fn tracked_attributes(&self) -> Vec<String> {
		let attributes: Vec<&String> =
			if self.is_new { self.data.keys().collect() } else { self.dirty.iter().collect() };
		attributes
			.into_iter()
			.filter(|attribute| !attribute.eq_ignore_ascii_case("dn"))
			.cloned()
			.collect()
	}

	/// Cached values of `attribute`
	pub(crate) fn values(&self, attribute: &str) -> Vec<String> {
		self.lookup(attribute).map(RawValue::to_vec).unwrap_or_default()
	}

	/// Class defaults overlaid with the cache, without empty values
	pub(crate) fn add_payload(&self) -> Vec<(String, HashSet<String>)> {
		let mut payload = self.class.defaults().clone();
		for (attribute, value) in &self.data {
			payload.retain(|name, _| !name.eq_ignore_ascii_case(attribute));
			payload.insert(attribute.clone(), value.clone());
		}
		payload
			.into_iter()
			.filter(|(attribute, _)| !attribute.eq_ignore_ascii_case("dn"))
			.map(|(attribute, value)| {
				(attribute, value.to_vec().into_iter().collect::<HashSet<_>>())
			})
			.filter(|(_, values)| !values.is_empty())
			.collect()
	}

	/// Forget the cache after a write to `dn`; the next access reloads it
	pub(crate) fn mark_stored(&mut self, dn: String) {
		self.dn = Some(dn);
		self.data.clear();
		self.dirty.clear();
		self.state = LoadState::Unloaded;
		self.is_new = false;
	}
}

/// Split a search result into its DN and flattened attribute values
fn hydrate(codecs: &CodecRegistry, result: SearchEntry) -> Result<(String, EntryData)> {
	let mut data: EntryData = result
		.attrs
		.into_iter()
		.map(|(attribute, values)| (attribute, RawValue::from_values(values)))
		.collect();
	for (attribute, values) in result.bin_attrs {
		let values = values
			.iter()
			.map(|value| codecs.transcode(value))
			.collect::<std::result::Result<Vec<_>, _>>()?;
		data.insert(attribute, RawValue::from_values(values));
	}
	Ok((result.dn, data))
}

/// One `title : value` line of [`Entry::pprint`]
fn field_line(title: &str, value: &str) -> String {
	format!("{title:<20} : {value}")
}

impl PartialEq for Entry {
	fn eq(&self, other: &Self) -> bool {
		match (self.dn(), other.dn()) {
			(Some(left), Some(right)) => dn_eq(&left, &right),
			_ => false,
		}
	}
}

impl fmt::Debug for Entry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Entry")
			.field("class", &self.class.name())
			.field("dn", &self.dn())
			.field("state", &self.state)
			.field("dirty", &self.dirty)
			.finish_non_exhaustive()
	}
}

impl fmt::Display for Entry {
	/// The common name, the naming value or the DN, whichever is known first
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = self
			.lookup("cn")
			.and_then(RawValue::first)
			.map(str::to_owned)
			.or_else(|| self.rdn_value())
			.or_else(|| self.dn())
			.unwrap_or_else(|| self.class.name().to_owned());
		f.write_str(&name)
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use chrono::NaiveDate;
	use test_log::test;

	use super::*;
	use crate::{
		models::{self, test_helpers},
		schema::AttributeDescriptor,
	};

	#[test(tokio::test)]
	async fn lazy_entries_load_once_and_flatten() {
		let (directory, conn) = test_helpers::connection().await;
		let mut user = conn.get_user("gawel");
		assert_eq!(user.load_state(), LoadState::Unloaded);
		let searches = directory.search_count();

		assert_eq!(user.get("mail").await.ok(), Some(Value::from("gawel@example.org")));
		assert_eq!(user.load_state(), LoadState::Loaded);
		assert_eq!(
			user.normalized_data().await.expect("loaded").get("uid"),
			Some(&RawValue::from("gawel"))
		);
		assert_eq!(
			user.get_raw("objectClass").await.expect("loaded"),
			Some(&RawValue::from(vec!["inetOrgPerson", "person", "top"]))
		);
		assert_eq!(directory.search_count(), searches + 1);
	}

	#[test(tokio::test)]
	async fn missing_entries_cache_nothing() {
		let (directory, conn) = test_helpers::connection().await;
		let mut ghost = conn.get_user("ghost");
		let searches = directory.search_count();

		assert!(matches!(ghost.get("mail").await, Err(Error::NotFound { .. })));
		assert_eq!(ghost.load_state(), LoadState::Unloaded);
		assert!(matches!(ghost.get("mail").await, Err(Error::NotFound { .. })));
		assert_eq!(directory.search_count(), searches + 2);
	}

	#[test(tokio::test)]
	async fn dirty_tracking_and_fallthrough() {
		let (_, conn) = test_helpers::connection().await;
		let mut user = conn.get_user("gawel");

		user.set("sn", "Pelletier").await.expect("set must succeed");
		user.set_raw("description", "python fan").await.expect("raw set must succeed");
		user.delete("telephoneNumber").await.expect("delete must succeed");

		assert_eq!(
			user.dirty_attributes().collect::<Vec<_>>(),
			["description", "sn", "telephoneNumber"]
		);
		assert_eq!(user.get("description").await.ok(), Some(Value::from("python fan")));
		assert_eq!(user.get("telephoneNumber").await.ok(), Some(Value::None));
	}

	#[test(tokio::test)]
	async fn unbound_entries_need_a_connection() {
		let codecs = Arc::new(CodecRegistry::default());
		let mut node = Entry::new(Arc::new(models::node_class()), codecs);

		assert_eq!(node.normalized_data().await.map(BTreeMap::len).ok(), Some(0));
		assert!(node.dn().is_none());
		assert!(matches!(node.save().await, Err(Error::Unbound { .. })));
	}

	#[test(tokio::test)]
	async fn typed_values_round_trip_through_the_cache() {
		let (_, conn) = test_helpers::connection().await;
		let class = conn.catalog().get("payment").expect("payment class");
		let date = NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date");
		let mut payment = Entry::with_attrs(class, Arc::clone(conn.codecs()), [
			("paymentDate", Value::from(date)),
			("paymentAmount", Value::from(20)),
		])
		.expect("attributes must encode");

		assert_eq!(
			payment.get_raw("paymentDate").await.expect("loaded"),
			Some(&RawValue::from("20200101000000Z"))
		);
		assert_eq!(payment.get("paymentDate").await.ok(), Some(Value::Date(date)));
		assert_eq!(payment.get("paymentAmount").await.ok(), Some(Value::Integer(20)));
		assert_eq!(
			payment.get_raw("objectClass").await.expect("loaded"),
			Some(&RawValue::from(vec!["top", "payment"]))
		);
		assert_eq!(payment.dirty_attributes().count(), 0);
		assert!(payment.is_new());
	}

	#[test(tokio::test)]
	async fn append_derives_the_sub_entry_dn() {
		let (directory, conn) = test_helpers::connection().await;
		let mut member = conn.get_user("gawel");
		let class = conn.catalog().get("payment").expect("payment class");
		let mut payment = Entry::with_attrs(class, Arc::clone(conn.codecs()), [(
			"paymentDate",
			NaiveDate::from_ymd_opt(2020, 1, 1).expect("valid date"),
		)])
		.expect("attributes must encode");

		member.append(&mut payment).await.expect("append must succeed");

		let dn = "paymentDate=20200101000000Z,uid=gawel,ou=members,dc=example,dc=org";
		assert_eq!(payment.dn().as_deref(), Some(dn));
		assert!(payment.connection().is_some());
		let stored = directory.attributes(dn).expect("payment must be stored");
		assert_eq!(stored.get("objectClass"), Some(&vec!["payment".to_owned(), "top".to_owned()]));

		let mut orphan = Entry::new(Arc::new(models::node_class()), Arc::clone(conn.codecs()));
		assert!(matches!(
			member.append_unsaved(&mut orphan).await,
			Err(Error::MissingNamingAttribute { .. })
		));
	}

	#[test(tokio::test)]
	async fn relations_reject_foreign_classes_before_writing() {
		let (_, conn) = test_helpers::connection().await;
		let mut group = conn.get_group("afpy");
		let user = conn.get_user("gawel");
		let outsider = conn.get_node("ou=groups,dc=example,dc=org");

		let before = group.get("member").await.expect("group loads");
		let error = group
			.set_entries("member_nodes", &[user.clone(), outsider])
			.await
			.expect_err("organizational units are not users");
		assert!(matches!(error, Error::WrongEntryClass { .. }));
		assert_eq!(group.get("member").await.ok(), Some(before));
		assert_eq!(group.dirty_attributes().count(), 0);

		group.set_entries("member_nodes", &[user.clone()]).await.expect("users are members");
		let members = group.get_entries("member_nodes").await.expect("members resolve");
		assert_eq!(members, [user]);
		assert!(matches!(
			group.set("member_nodes", vec!["uid=x"]).await,
			Err(Error::ExpectedEntries { .. })
		));
	}

	#[test(tokio::test)]
	async fn equality_ignores_dn_case() {
		let (_, conn) = test_helpers::connection().await;
		let lower = conn.get_node("uid=gawel,ou=members,dc=example,dc=org");
		let upper = conn.get_node("UID=Gawel,OU=Members,DC=example,DC=org");
		assert_eq!(lower, upper);
		assert_ne!(lower, Entry::new(Arc::new(models::node_class()), Arc::clone(conn.codecs())));
	}

	#[test(tokio::test)]
	async fn identity_must_match_the_naming_value() {
		let (_, conn) = test_helpers::connection().await;
		let mut user = conn.get_user("gawel");
		user.set("uid", "someone").await.expect("set must succeed");

		assert!(matches!(user.save().await, Err(Error::InconsistentIdentity { .. })));
	}

	#[test(tokio::test)]
	async fn escaped_dns_keep_their_identity() {
		let (directory, conn) = test_helpers::connection().await;
		let dn = r"cn=Doe\, John,ou=groups,dc=example,dc=org";
		directory.insert(dn, [
			("objectClass", vec!["groupOfNames", "top"]),
			("cn", vec!["Doe, John"]),
			("member", vec!["uid=gawel,ou=members,dc=example,dc=org"]),
		]);

		let mut group = conn.get_group(dn);
		assert_eq!(group.rdn_value().as_deref(), Some("Doe, John"));
		group.set("description", "board").await.expect("group loads");
		group.save().await.expect("the stored DN matches the naming value");
		assert_eq!(
			directory.attributes(dn).and_then(|stored| stored.get("description").cloned()),
			Some(vec!["board".to_owned()])
		);

		let mut by_name = conn.get_group("Doe, John");
		assert_eq!(by_name, group);
		assert_eq!(by_name.get("description").await.ok(), Some(Value::from("board")));
	}

	#[test(tokio::test)]
	async fn pprint_lists_properties_in_declaration_order() {
		let class = Arc::new(
			EntryClass::builder("contact")
				.naming_attribute("cn")
				.base_location("ou=contacts,dc=example,dc=org")
				.attribute(AttributeDescriptor::unicode("cn").with_title("Name"))
				.attribute(AttributeDescriptor::string("mail").with_title("E-mail"))
				.attribute(AttributeDescriptor::string("telephoneNumber").with_title("Phone"))
				.build(),
		);
		let mut contact = Entry::with_attrs(class, Arc::new(CodecRegistry::default()), [
			("mail", "ada@example.org"),
			("cn", "Ada"),
		])
		.expect("attributes must encode");

		let dump = contact.pprint().await.expect("pprint must succeed");
		assert_eq!(
			dump.lines().collect::<Vec<_>>(),
			[
				"Ada",
				"---",
				"dn                   : cn=Ada,ou=contacts,dc=example,dc=org",
				"Name                 : Ada",
				"E-mail               : ada@example.org",
			]
		);
	}
}
