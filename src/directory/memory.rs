//! A directory kept in process memory.
//!
//! It understands enough of LDAP for the mapper: base, one-level and subtree
//! searches with `&`, `|`, `!`, equality, presence and substring filters,
//! simple binds checked against registered credentials or `userPassword`,
//! and writes restricted to registered administrators. It can also simulate
//! a server side size limit.
use std::{
	collections::{BTreeMap, HashMap, HashSet},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use ldap3::{LdapError, Mod, Scope, SearchEntry};
use ldap3_proto::proto::{LdapFilter, LdapSubstringFilter};

use super::{Connector, DirectoryClient, failure, rc};
use crate::dn::{dn_eq, normalize, parent};

/// A shared in-memory directory tree
#[derive(Clone, Debug, Default)]
pub struct MemoryDirectory {
	/// Tree contents and bookkeeping
	state: Arc<Mutex<State>>,
}

/// Contents of a [`MemoryDirectory`]
#[derive(Debug, Default)]
struct State {
	/// Entries by normalized DN
	entries: BTreeMap<String, StoredEntry>,
	/// Passwords by normalized DN, checked before `userPassword`
	credentials: HashMap<String, String>,
	/// Normalized DNs allowed to write
	writers: HashSet<String>,
	/// Maximum number of entries a search may return
	size_limit: Option<usize>,
	/// Number of searches served
	searches: usize,
	/// Number of successful writes
	writes: usize,
	/// Number of bind attempts
	binds: usize,
}

/// One entry of the tree
#[derive(Clone, Debug)]
struct StoredEntry {
	/// DN as it was written
	dn: String,
	/// Values by attribute name as it was written
	attributes: BTreeMap<String, Vec<String>>,
}

impl StoredEntry {
	/// The stored name of `attribute`, matched case-insensitively
	fn key_of(&self, attribute: &str) -> Option<String> {
		self.attributes.keys().find(|name| name.eq_ignore_ascii_case(attribute)).cloned()
	}

	/// The values of `attribute`
	fn values(&self, attribute: &str) -> Option<&Vec<String>> {
		self.attributes
			.iter()
			.find(|(name, _)| name.eq_ignore_ascii_case(attribute))
			.map(|(_, values)| values)
	}

	/// Apply one change
	fn apply(&mut self, modification: Mod<String>) -> Result<(), LdapError> {
		match modification {
			Mod::Add(attribute, values) => {
				let key = self.key_of(&attribute).unwrap_or(attribute);
				let current = self.attributes.entry(key).or_default();
				for value in sorted(values) {
					if current.contains(&value) {
						return Err(failure(rc::ATTRIBUTE_OR_VALUE_EXISTS, value));
					}
					current.push(value);
				}
			}
			Mod::Delete(attribute, values) => {
				let Some(key) = self.key_of(&attribute) else {
					return Err(failure(rc::NO_SUCH_ATTRIBUTE, attribute));
				};
				if values.is_empty() {
					self.attributes.remove(&key);
				} else {
					let current = self.attributes.entry(key.clone()).or_default();
					for value in values {
						let position = current.iter().position(|stored| *stored == value);
						let Some(position) = position else {
							return Err(failure(rc::NO_SUCH_ATTRIBUTE, value));
						};
						current.remove(position);
					}
					if current.is_empty() {
						self.attributes.remove(&key);
					}
				}
			}
			Mod::Replace(attribute, values) => {
				let key = self.key_of(&attribute).unwrap_or(attribute);
				if values.is_empty() {
					self.attributes.remove(&key);
				} else {
					self.attributes.insert(key, sorted(values));
				}
			}
			_ => return Err(failure(UNWILLING_TO_PERFORM, "unsupported modification")),
		}
		Ok(())
	}

	/// The entry as a search result, restricted to `attributes`
	fn to_search_entry(&self, attributes: &[String]) -> SearchEntry {
		let all = attributes.is_empty() || attributes.iter().any(|attribute| attribute == "*");
		SearchEntry {
			dn: self.dn.clone(),
			attrs: self
				.attributes
				.iter()
				.filter(|(name, _)| {
					all || attributes.iter().any(|attribute| attribute.eq_ignore_ascii_case(name))
				})
				.map(|(name, values)| (name.clone(), values.clone()))
				.collect(),
			bin_attrs: HashMap::new(),
		}
	}
}

/// Result code for requests the directory does not support
const UNWILLING_TO_PERFORM: u32 = 53;

/// Values of a set in a stable order
fn sorted(values: HashSet<String>) -> Vec<String> {
	let mut values: Vec<_> = values.into_iter().collect();
	values.sort();
	values
}

impl MemoryDirectory {
	/// An empty directory
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Register an identity that may bind with `password` and write
	#[must_use]
	pub fn with_admin(self, dn: &str, password: &str) -> Self {
		{
			let mut state = self.lock();
			state.credentials.insert(normalize(dn), password.to_owned());
			state.writers.insert(normalize(dn));
		}
		self
	}

	/// Store an entry, replacing any entry at the same DN
	pub fn insert<A, V>(&self, dn: &str, attributes: impl IntoIterator<Item = (A, Vec<V>)>)
	where
		A: Into<String>,
		V: Into<String>,
	{
		let attributes = attributes
			.into_iter()
			.map(|(name, values)| (name.into(), values.into_iter().map(Into::into).collect()))
			.filter(|(_, values): &(String, Vec<String>)| !values.is_empty())
			.collect();
		self.lock()
			.entries
			.insert(normalize(dn), StoredEntry { dn: dn.to_owned(), attributes });
	}

	/// Make searches matching more than `limit` entries fail
	pub fn set_size_limit(&self, limit: Option<usize>) {
		self.lock().size_limit = limit;
	}

	/// The stored attributes of the entry at `dn`
	#[must_use]
	pub fn attributes(&self, dn: &str) -> Option<BTreeMap<String, Vec<String>>> {
		self.lock().entries.get(&normalize(dn)).map(|entry| entry.attributes.clone())
	}

	/// Whether an entry exists at `dn`
	#[must_use]
	pub fn contains(&self, dn: &str) -> bool {
		self.lock().entries.contains_key(&normalize(dn))
	}

	/// Number of searches served so far
	#[must_use]
	pub fn search_count(&self) -> usize {
		self.lock().searches
	}

	/// Number of successful writes so far
	#[must_use]
	pub fn write_count(&self) -> usize {
		self.lock().writes
	}

	/// Number of bind attempts so far
	#[must_use]
	pub fn bind_count(&self) -> usize {
		self.lock().binds
	}

	/// Lock the state; a panicking test thread leaves it usable
	fn lock(&self) -> MutexGuard<'_, State> {
		self.state.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[async_trait]
impl Connector for MemoryDirectory {
	async fn connect(
		&self,
		dn: &str,
		password: &str,
	) -> Result<Arc<dyn DirectoryClient>, LdapError> {
		let mut state = self.lock();
		state.binds += 1;

		// An empty password is an anonymous bind
		if password.is_empty() {
			return Ok(Arc::new(MemoryClient { directory: self.clone(), bound: None }));
		}

		let key = normalize(dn);
		let accepted = match state.credentials.get(&key) {
			Some(stored) => stored == password,
			None => state
				.entries
				.get(&key)
				.and_then(|entry| entry.values("userPassword"))
				.is_some_and(|passwords| passwords.iter().any(|stored| stored == password)),
		};
		if !accepted {
			return Err(failure(rc::INVALID_CREDENTIALS, format!("invalid credentials for `{dn}`")));
		}

		Ok(Arc::new(MemoryClient { directory: self.clone(), bound: Some(key) }))
	}
}

/// A session with a [`MemoryDirectory`]
#[derive(Clone, Debug)]
pub struct MemoryClient {
	/// The shared tree
	directory: MemoryDirectory,
	/// Normalized DN of the bound identity, `None` when anonymous
	bound: Option<String>,
}

impl MemoryClient {
	/// Fail unless the bound identity may write
	fn check_writer(&self, state: &State) -> Result<(), LdapError> {
		match &self.bound {
			Some(dn) if state.writers.contains(dn) => Ok(()),
			_ => Err(failure(rc::INSUFFICIENT_ACCESS_RIGHTS, "write access denied")),
		}
	}
}

/// Whether the entry at `dn` lies within `scope` of `base`; both normalized
fn in_scope(dn: &str, base: &str, scope: Scope) -> bool {
	match scope {
		Scope::Base => dn == base,
		Scope::OneLevel => parent(dn) == Some(base),
		Scope::Subtree => base.is_empty() || dn == base || dn.ends_with(&format!(",{base}")),
	}
}

#[async_trait]
impl DirectoryClient for MemoryClient {
	async fn search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: Vec<String>,
	) -> Result<Vec<SearchEntry>, LdapError> {
		let filter = parse_filter(filter)?;
		let mut state = self.directory.lock();
		state.searches += 1;

		let base = normalize(base);
		if matches!(scope, Scope::Base) && !state.entries.contains_key(&base) {
			return Err(failure(rc::NO_SUCH_OBJECT, format!("no entry at `{base}`")));
		}

		let found: Vec<SearchEntry> = state
			.entries
			.iter()
			.filter(|(dn, entry)| in_scope(dn, &base, scope) && matches(&filter, entry))
			.map(|(_, entry)| entry.to_search_entry(&attributes))
			.collect();

		if state.size_limit.is_some_and(|limit| found.len() > limit) {
			return Err(failure(rc::SIZE_LIMIT_EXCEEDED, "size limit exceeded"));
		}
		Ok(found)
	}

	async fn add(
		&self,
		dn: &str,
		attributes: Vec<(String, HashSet<String>)>,
	) -> Result<(), LdapError> {
		let mut state = self.directory.lock();
		self.check_writer(&state)?;

		let key = normalize(dn);
		if state.entries.contains_key(&key) {
			return Err(failure(rc::ENTRY_ALREADY_EXISTS, format!("`{dn}` already exists")));
		}

		let attributes = attributes
			.into_iter()
			.filter(|(_, values)| !values.is_empty())
			.map(|(name, values)| (name, sorted(values)))
			.collect();
		state.entries.insert(key, StoredEntry { dn: dn.to_owned(), attributes });
		state.writes += 1;
		Ok(())
	}

	async fn modify(&self, dn: &str, modifications: Vec<Mod<String>>) -> Result<(), LdapError> {
		let mut state = self.directory.lock();
		self.check_writer(&state)?;

		let key = normalize(dn);
		let Some(mut entry) = state.entries.get(&key).cloned() else {
			return Err(failure(rc::NO_SUCH_OBJECT, format!("no entry at `{dn}`")));
		};
		for modification in modifications {
			entry.apply(modification)?;
		}

		state.entries.insert(key, entry);
		state.writes += 1;
		Ok(())
	}

	async fn delete(&self, dn: &str) -> Result<(), LdapError> {
		let mut state = self.directory.lock();
		self.check_writer(&state)?;

		if state.entries.remove(&normalize(dn)).is_none() {
			return Err(failure(rc::NO_SUCH_OBJECT, format!("no entry at `{dn}`")));
		}
		state.writes += 1;
		Ok(())
	}

	async fn change_password(&self, dn: &str, new_password: &str) -> Result<(), LdapError> {
		let mut state = self.directory.lock();
		let key = normalize(dn);
		if self.bound.as_deref() != Some(key.as_str()) {
			self.check_writer(&state)?;
		}
		if !state.entries.contains_key(&key) {
			return Err(failure(rc::NO_SUCH_OBJECT, format!("no entry at `{dn}`")));
		}

		state.credentials.insert(key, new_password.to_owned());
		state.writes += 1;
		Ok(())
	}

	async fn unbind(&self) -> Result<(), LdapError> {
		Ok(())
	}
}

/// Parse `filter`, rejecting the kinds of filters this directory does not
/// evaluate
fn parse_filter(filter: &str) -> Result<LdapFilter, LdapError> {
	let parsed =
		ldap3_proto::parse_ldap_filter_str(filter.trim()).map_err(|_| LdapError::FilterParsing)?;
	check_supported(&parsed)?;
	Ok(parsed)
}

/// Fail on ordering, approximate and extensible matches
fn check_supported(filter: &LdapFilter) -> Result<(), LdapError> {
	match filter {
		LdapFilter::And(filters) | LdapFilter::Or(filters) => {
			filters.iter().try_for_each(check_supported)
		}
		LdapFilter::Not(filter) => check_supported(filter),
		LdapFilter::Equality(..) | LdapFilter::Substring(..) | LdapFilter::Present(_) => Ok(()),
		other => Err(failure(UNWILLING_TO_PERFORM, format!("unsupported filter {other:?}"))),
	}
}

/// Whether `entry` matches `filter`
fn matches(filter: &LdapFilter, entry: &StoredEntry) -> bool {
	match filter {
		LdapFilter::And(filters) => filters.iter().all(|filter| matches(filter, entry)),
		LdapFilter::Or(filters) => filters.iter().any(|filter| matches(filter, entry)),
		LdapFilter::Not(filter) => !matches(filter, entry),
		LdapFilter::Present(attribute) => entry.values(attribute).is_some(),
		LdapFilter::Equality(attribute, expected) => entry
			.values(attribute)
			.is_some_and(|values| values.iter().any(|value| value_eq(value, expected))),
		LdapFilter::Substring(attribute, pieces) => entry
			.values(attribute)
			.is_some_and(|values| values.iter().any(|value| substring_match(pieces, value))),
		_ => false,
	}
}

/// Case-insensitive value comparison; DN values also ignore escaping
fn value_eq(value: &str, expected: &str) -> bool {
	value.to_lowercase() == expected.to_lowercase()
		|| (value.contains('=') && expected.contains('=') && dn_eq(value, expected))
}

/// Match `value` against a substring filter, ignoring case: the initial
/// piece is a prefix, the final one a suffix, the others appear in order in
/// between
fn substring_match(pieces: &LdapSubstringFilter, value: &str) -> bool {
	let value = value.to_lowercase();
	let mut remaining = value.as_str();

	if let Some(initial) = &pieces.initial {
		let Some(rest) = remaining.strip_prefix(initial.to_lowercase().as_str()) else {
			return false;
		};
		remaining = rest;
	}
	for piece in &pieces.any {
		let piece = piece.to_lowercase();
		let Some(position) = remaining.find(piece.as_str()) else {
			return false;
		};
		remaining = &remaining[position + piece.len()..];
	}
	pieces.final_.as_ref().is_none_or(|last| remaining.ends_with(last.to_lowercase().as_str()))
}
