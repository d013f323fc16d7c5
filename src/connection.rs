//! The repository: searches, lookups by identity, writes and password
//! checks against one directory section.
use std::{fmt, sync::Arc};

use ldap3::{Mod, Scope, SearchEntry, dn_escape};

use crate::{
	codec::CodecRegistry,
	config::{Config, SectionConfig},
	directory::{self, Connector, DirectoryClient, LdapConnector, rc},
	entry::Entry,
	err::{Error, Result},
	models::ClassCatalog,
	modlist::{self, ModifyOptions, Snapshot},
	schema::{EntryClass, Role, SubEntryClass},
};

/// Filter matching every entry
const MATCH_ALL: &str = "(objectClass=*)";

/// Parameters of a directory search
#[derive(Clone, Debug)]
pub struct SearchRequest {
	/// LDAP filter, parentheses optional
	filter: String,
	/// Search root; the section's base DN if unset
	base: Option<String>,
	/// How deep to search
	scope: Scope,
	/// Attributes to return
	attributes: Vec<String>,
}

impl SearchRequest {
	/// A subtree search below the base DN returning all user attributes
	pub fn new(filter: impl Into<String>) -> Self {
		Self {
			filter: filter.into(),
			base: None,
			scope: Scope::Subtree,
			attributes: vec!["*".to_owned()],
		}
	}

	/// Search below `base`
	#[must_use]
	pub fn with_base(mut self, base: impl Into<String>) -> Self {
		self.base = Some(base.into());
		self
	}

	/// Search with `scope`
	#[must_use]
	pub fn with_scope(mut self, scope: Scope) -> Self {
		self.scope = scope;
		self
	}

	/// Only return `attributes`
	#[must_use]
	pub fn with_attributes(mut self, attributes: Vec<String>) -> Self {
		self.attributes = attributes;
		self
	}
}

impl Default for SearchRequest {
	fn default() -> Self {
		Self::new(MATCH_ALL)
	}
}

/// Wrap a bare filter expression in parentheses
#[must_use]
pub fn normalize_filter(filter: &str) -> String {
	let filter = filter.trim();
	if filter.is_empty() {
		MATCH_ALL.to_owned()
	} else if filter.starts_with('(') {
		filter.to_owned()
	} else {
		format!("({filter})")
	}
}

/// The classes a connection materializes entries of each role as
#[derive(Clone, Debug)]
struct Roles {
	/// Generic entries
	node: Arc<EntryClass>,
	/// People
	user: Arc<EntryClass>,
	/// Groups of people
	group: Arc<EntryClass>,
	/// Permission groups
	permission: Arc<EntryClass>,
}

impl Roles {
	/// Look up the classes configured for `settings`, falling back to the
	/// builtin ones
	fn from_section(settings: &SectionConfig, catalog: &ClassCatalog) -> Result<Self> {
		let class =
			|role: Role, fallback: &str| catalog.get(settings.role_class(role).unwrap_or(fallback));
		Ok(Self {
			node: catalog.get("node")?,
			user: class(Role::User, "user")?,
			group: class(Role::Group, "group_of_names")?,
			permission: class(Role::Permission, "permission")?,
		})
	}

	/// The class of `role`
	fn get(&self, role: Role) -> &Arc<EntryClass> {
		match role {
			Role::Node => &self.node,
			Role::User => &self.user,
			Role::Group => &self.group,
			Role::Permission => &self.permission,
		}
	}

	/// Replace the class of `role`
	fn set(&mut self, role: Role, class: Arc<EntryClass>) {
		match role {
			Role::Node => self.node = class,
			Role::User => self.user = class,
			Role::Group => self.group = class,
			Role::Permission => self.permission = class,
		}
	}
}

/// A bound session with one directory section. Clones share the session.
#[derive(Clone)]
pub struct Connection {
	/// The administrative session
	client: Arc<dyn DirectoryClient>,
	/// Opens the throwaway sessions of password checks
	connector: Arc<dyn Connector>,
	/// Section settings
	settings: Arc<SectionConfig>,
	/// Known entry classes
	catalog: Arc<ClassCatalog>,
	/// Classes per role
	roles: Arc<Roles>,
	/// Codecs handed to every entry
	codecs: Arc<CodecRegistry>,
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Connection")
			.field("url", &self.settings.url.as_str())
			.field("base_dn", &self.settings.base_dn())
			.field("client", &self.client)
			.finish_non_exhaustive()
	}
}

impl Connection {
	/// Wrap an already bound session
	pub fn new(
		settings: SectionConfig,
		catalog: ClassCatalog,
		client: Arc<dyn DirectoryClient>,
		connector: Arc<dyn Connector>,
	) -> Result<Self> {
		let roles = Roles::from_section(&settings, &catalog)?;
		Ok(Self {
			client,
			connector,
			settings: Arc::new(settings),
			catalog: Arc::new(catalog),
			roles: Arc::new(roles),
			codecs: Arc::new(CodecRegistry::default()),
		})
	}

	/// Bind to the server of `settings` as its administrative identity
	#[tracing::instrument(skip_all, fields(url = %settings.url, bind_dn = %settings.bind_dn))]
	pub async fn open(settings: SectionConfig, catalog: ClassCatalog) -> Result<Self> {
		let connector = LdapConnector::new(Arc::new(settings.clone()));
		let client = connector.connect(&settings.bind_dn, &settings.bind_password).await?;
		tracing::info!("connected to directory");
		Self::new(settings, catalog, client, Arc::new(connector))
	}

	/// Open the section called `section` of `config`, with the builtin and
	/// configured classes
	pub async fn from_config(config: &Config, section: &str) -> anyhow_ext::Result<Self> {
		let settings = config.section(section)?.clone();
		let catalog = ClassCatalog::builtin(&settings).with_config_classes(&config.classes)?;
		Ok(Self::open(settings, catalog).await?)
	}

	/// Use `codecs` for entries created from now on
	#[must_use]
	pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
		self.codecs = Arc::new(codecs);
		self
	}

	/// Materialize entries of `role` as `class` from now on
	pub fn set_role(&mut self, role: Role, class: Arc<EntryClass>) {
		tracing::debug!(%role, class = class.name(), "assigning role");
		Arc::make_mut(&mut self.roles).set(role, class);
	}

	/// The class entries of `role` are materialized as
	#[must_use]
	pub fn class_for(&self, role: Role) -> Arc<EntryClass> {
		Arc::clone(self.roles.get(role))
	}

	/// The class a relation's members are materialized as
	#[must_use]
	pub fn resolve(&self, class: &SubEntryClass) -> Arc<EntryClass> {
		match class {
			SubEntryClass::Fixed(class) => Arc::clone(class),
			SubEntryClass::Role(role) => self.class_for(*role),
		}
	}

	/// Known entry classes
	#[must_use]
	pub fn catalog(&self) -> &ClassCatalog {
		&self.catalog
	}

	/// Codecs handed to entries
	#[must_use]
	pub fn codecs(&self) -> &Arc<CodecRegistry> {
		&self.codecs
	}

	/// Section settings
	#[must_use]
	pub fn settings(&self) -> &SectionConfig {
		&self.settings
	}

	/// Root of all searches
	#[must_use]
	pub fn base_dn(&self) -> &str {
		self.settings.base_dn()
	}

	/// A bound entry at `dn` whose values are fetched on first access
	#[must_use]
	pub fn lazy_entry(&self, class: Arc<EntryClass>, dn: impl Into<String>) -> Entry {
		Entry::lazy(class, Arc::clone(&self.codecs), self.clone(), dn)
	}

	/// A bound entry that does not exist in the directory yet
	#[must_use]
	pub fn new_entry(&self, class: Arc<EntryClass>) -> Entry {
		let mut entry = Entry::new(class, Arc::clone(&self.codecs));
		entry.bind(self.clone());
		entry
	}

	/// A bound entry that does not exist in the directory yet, starting
	/// with the class defaults and `attributes`
	pub fn new_entry_with<K, V>(
		&self,
		class: Arc<EntryClass>,
		attributes: impl IntoIterator<Item = (K, V)>,
	) -> Result<Entry>
	where
		K: AsRef<str>,
		V: Into<crate::codec::Value>,
	{
		let mut entry = Entry::with_attrs(class, Arc::clone(&self.codecs), attributes)?;
		entry.bind(self.clone());
		Ok(entry)
	}

	/// Materialize a search result as a bound entry of `class`
	pub fn hydrate(&self, class: Arc<EntryClass>, result: SearchEntry) -> Result<Entry> {
		Entry::from_search(class, Arc::clone(&self.codecs), Some(self.clone()), result)
	}

	/// Run a search and return the raw results
	#[tracing::instrument(skip_all, fields(filter = %request.filter))]
	pub async fn search(&self, request: &SearchRequest) -> Result<Vec<SearchEntry>> {
		let base = request.base.as_deref().unwrap_or(self.settings.base_dn());
		let filter = normalize_filter(&request.filter);
		let results =
			self.client.search(base, request.scope, &filter, request.attributes.clone()).await?;
		tracing::debug!(base, found = results.len(), "searched directory");
		Ok(results)
	}

	/// Run a search and materialize the results as entries of `class`
	pub async fn search_entries(
		&self,
		class: &Arc<EntryClass>,
		request: &SearchRequest,
	) -> Result<Vec<Entry>> {
		self.search(request)
			.await?
			.into_iter()
			.map(|result| self.hydrate(Arc::clone(class), result))
			.collect()
	}

	/// Search entries of `class` below its base location, restricted to its
	/// object class if it declares one
	pub async fn search_class(&self, class: &Arc<EntryClass>, filter: &str) -> Result<Vec<Entry>> {
		let filter = match class.object_class() {
			Some(object_class) => format!(
				"(&(objectClass={}){})",
				ldap3::ldap_escape(object_class),
				normalize_filter(filter)
			),
			None => normalize_filter(filter),
		};
		let mut request = SearchRequest::new(filter);
		if let Some(base) = class.base_location() {
			request = request.with_base(base);
		}
		self.search_entries(class, &request).await
	}

	/// Search entries of `class` even if the server limits result sizes:
	/// when the limit is hit, search again once per initial letter of the
	/// naming attribute. Letters still over the limit are skipped.
	#[tracing::instrument(skip(self, class), fields(class = class.name()))]
	pub async fn unlimited_search(
		&self,
		class: &Arc<EntryClass>,
		filter: &str,
	) -> Result<Vec<Entry>> {
		let filter = normalize_filter(filter);
		match self.search_class(class, &filter).await {
			Err(error) if error.is_size_limit_exceeded() => {
				tracing::info!("size limit exceeded, searching by initial letter");
			}
			result => return result,
		}

		let naming_attribute = class
			.naming_attribute()
			.ok_or_else(|| Error::MissingNamingAttribute { class: class.name().to_owned() })?;
		let mut entries = Vec::new();
		for letter in 'a'..='z' {
			let narrowed = format!("(&({naming_attribute}={letter}*){filter})");
			match self.search_class(class, &narrowed).await {
				Ok(found) => entries.extend(found),
				Err(error) if error.is_size_limit_exceeded() => {
					tracing::warn!(%letter, "size limit exceeded, skipping entries");
				}
				Err(error) => return Err(error),
			}
		}
		Ok(entries)
	}

	/// Fetch the entry at exactly `dn`
	pub async fn get_dn(&self, dn: &str) -> Result<SearchEntry> {
		self.lookup(dn, vec!["*".to_owned()]).await
	}

	/// Whether an entry exists at `dn`
	pub async fn exists(&self, dn: &str) -> Result<bool> {
		match self.lookup(dn, vec!["1.1".to_owned()]).await {
			Ok(_) => Ok(true),
			Err(Error::NotFound { .. }) => Ok(false),
			Err(error) => Err(error),
		}
	}

	/// Base-scope search for `dn`, returning `attributes`
	async fn lookup(&self, dn: &str, attributes: Vec<String>) -> Result<SearchEntry> {
		let mut results = match self.client.search(dn, Scope::Base, MATCH_ALL, attributes).await {
			Err(error) if directory::result_code(&error) == Some(rc::NO_SUCH_OBJECT) => {
				return Err(Error::NotFound { dn: dn.to_owned() });
			}
			result => result?,
		};
		match results.len() {
			0 => Err(Error::NotFound { dn: dn.to_owned() }),
			1 => results.pop().ok_or_else(|| Error::NotFound { dn: dn.to_owned() }),
			count => Err(Error::AmbiguousResult { dn: dn.to_owned(), count }),
		}
	}

	/// The DN of the user `uid`; values containing `=` already are DNs
	#[must_use]
	pub fn uid_to_dn(&self, uid: &str) -> String {
		self.masked_dn(
			self.settings.user_mask.as_deref(),
			"{uid}",
			uid,
			&self.roles.user,
			&self.settings.user_rdn,
		)
	}

	/// The DN of the group `gid`; values containing `=` already are DNs
	#[must_use]
	pub fn group_to_dn(&self, gid: &str) -> String {
		self.masked_dn(
			self.settings.group_mask.as_deref(),
			"{gid}",
			gid,
			&self.roles.group,
			&self.settings.group_rdn,
		)
	}

	/// Apply the configured mask, or name the entry after the class naming
	/// attribute (`rdn` if it has none) below its base location
	fn masked_dn(
		&self,
		mask: Option<&str>,
		placeholder: &str,
		identifier: &str,
		class: &EntryClass,
		rdn: &str,
	) -> String {
		if identifier.contains('=') {
			return identifier.to_owned();
		}
		match mask {
			Some(mask) => mask.replace(placeholder, &dn_escape(identifier)),
			None => {
				let attribute = class.naming_attribute().unwrap_or(rdn);
				let base = class.base_location().unwrap_or(self.settings.base_dn());
				format!("{attribute}={},{base}", dn_escape(identifier))
			}
		}
	}

	/// The entry of `class` named `identifier`, fetched on first access
	pub fn get_by_identifier(&self, class: &Arc<EntryClass>, identifier: &str) -> Result<Entry> {
		if identifier.contains('=') {
			return Ok(self.lazy_entry(Arc::clone(class), identifier));
		}
		let attribute = class
			.naming_attribute()
			.ok_or_else(|| Error::MissingNamingAttribute { class: class.name().to_owned() })?;
		let base = class.base_location().unwrap_or(self.settings.base_dn());
		let dn = format!("{attribute}={},{base}", dn_escape(identifier));
		Ok(self.lazy_entry(Arc::clone(class), dn))
	}

	/// The user `uid`, fetched on first access
	#[must_use]
	pub fn get_user(&self, uid: &str) -> Entry {
		self.lazy_entry(self.class_for(Role::User), self.uid_to_dn(uid))
	}

	/// The group `gid`, fetched on first access
	#[must_use]
	pub fn get_group(&self, gid: &str) -> Entry {
		self.lazy_entry(self.class_for(Role::Group), self.group_to_dn(gid))
	}

	/// The permission group `name`, fetched on first access
	pub fn get_permission(&self, name: &str) -> Result<Entry> {
		self.get_by_identifier(&self.class_for(Role::Permission), name)
	}

	/// The generic entry at `dn`, fetched on first access
	#[must_use]
	pub fn get_node(&self, dn: &str) -> Entry {
		self.lazy_entry(self.class_for(Role::Node), dn)
	}

	/// Groups of `class` (the group role's class if unset) listing `dn` in
	/// their member attribute, searched below `base` or the class's base
	/// location
	#[tracing::instrument(skip(self, class))]
	pub async fn get_groups_containing(
		&self,
		dn: &str,
		class: Option<&Arc<EntryClass>>,
		base: Option<&str>,
	) -> Result<Vec<Entry>> {
		let class = class.map_or_else(|| self.class_for(Role::Group), Arc::clone);
		let member_attribute = class.member_attribute().unwrap_or("member");

		let mut filter = format!("({member_attribute}={})", ldap3::ldap_escape(dn));
		if let Some(object_class) = class.object_class() {
			filter = format!("(&(objectClass={}){filter})", ldap3::ldap_escape(object_class));
		}
		let mut request = SearchRequest::new(filter);
		if let Some(base) = base.or(class.base_location()) {
			request = request.with_base(base);
		}
		self.search_entries(&class, &request).await
	}

	/// Groups listing the entry at `dn` as a member
	pub async fn get_groups(&self, dn: &str) -> Result<Vec<Entry>> {
		self.get_groups_containing(dn, None, None).await
	}

	/// Permission groups listing the entry at `dn` as a member
	pub async fn get_permissions(&self, dn: &str) -> Result<Vec<Entry>> {
		let class = self.class_for(Role::Permission);
		self.get_groups_containing(dn, Some(&class), None).await
	}

	/// Write the changed attributes of `entry` with the default options
	pub async fn save(&self, entry: &mut Entry) -> Result<()> {
		self.save_with(entry, &ModifyOptions::default()).await
	}

	/// Write the changed attributes of `entry`: compare them with the values
	/// stored in the directory and apply the difference. Afterwards the
	/// entry is bound to this connection and reloads on next access.
	#[tracing::instrument(skip_all, fields(dn = ?entry.dn()))]
	pub async fn save_with(&self, entry: &mut Entry, options: &ModifyOptions) -> Result<()> {
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		entry.check_identity(&dn)?;

		let attributes = entry.tracked_attributes();
		if attributes.is_empty() {
			tracing::debug!("nothing to save");
		} else {
			let stored = self.lookup(&dn, attributes.clone()).await?;
			let old = self.snapshot(&stored, &attributes)?;
			let new: Snapshot = attributes
				.iter()
				.map(|attribute| (attribute.clone(), entry.values(attribute)))
				.collect();

			let modifications = modlist::build(&old, &new, options);
			if modifications.is_empty() {
				tracing::debug!("entry is unchanged");
			} else {
				let count = modifications.len();
				self.client
					.modify(&dn, modifications.into_iter().map(Mod::from).collect())
					.await
					.map_err(|source| Error::Operation {
						operation: "modify",
						dn: dn.clone(),
						attributes: attributes.clone(),
						source,
					})?;
				tracing::info!(count, "modified entry");
			}
		}

		entry.bind(self.clone());
		entry.mark_stored(dn);
		Ok(())
	}

	/// The stored values of `attributes`, empty where the directory has none
	fn snapshot(&self, stored: &SearchEntry, attributes: &[String]) -> Result<Snapshot> {
		let mut snapshot = Snapshot::new();
		for attribute in attributes {
			let text = stored.attrs.iter().find(|(name, _)| name.eq_ignore_ascii_case(attribute));
			let binary =
				stored.bin_attrs.iter().find(|(name, _)| name.eq_ignore_ascii_case(attribute));
			let values = match (text, binary) {
				(Some((_, values)), _) => values.clone(),
				(None, Some((_, values))) => values
					.iter()
					.map(|value| self.codecs.transcode(value))
					.collect::<std::result::Result<_, _>>()?,
				(None, None) => Vec::new(),
			};
			snapshot.insert(attribute.clone(), values);
		}
		Ok(snapshot)
	}

	/// Create `entry` with the class defaults and its cached values
	#[tracing::instrument(skip_all, fields(dn = ?entry.dn()))]
	pub async fn add(&self, entry: &mut Entry) -> Result<()> {
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		entry.check_identity(&dn)?;

		let payload = entry.add_payload();
		let attributes = payload.iter().map(|(attribute, _)| attribute.clone()).collect();
		self.client.add(&dn, payload).await.map_err(|source| Error::Operation {
			operation: "add",
			dn: dn.clone(),
			attributes,
			source,
		})?;
		tracing::info!("added entry");

		entry.bind(self.clone());
		entry.mark_stored(dn);
		Ok(())
	}

	/// Remove `entry` from the directory and forget its cached values
	#[tracing::instrument(skip_all, fields(dn = ?entry.dn()))]
	pub async fn delete(&self, entry: &mut Entry) -> Result<()> {
		let dn = entry.dn().ok_or_else(|| entry.unbound())?;
		self.client.delete(&dn).await.map_err(|source| Error::Operation {
			operation: "delete",
			dn: dn.clone(),
			attributes: Vec::new(),
			source,
		})?;
		tracing::info!("deleted entry");

		entry.mark_stored(dn);
		Ok(())
	}

	/// Whether `password` is valid for the user `uid`, checked with a
	/// separate bind. Empty passwords are rejected without asking the
	/// server, which would treat them as an anonymous bind.
	#[tracing::instrument(skip(self, password))]
	pub async fn check(&self, uid: &str, password: &str) -> Result<bool> {
		if password.is_empty() {
			tracing::debug!("empty password rejected");
			return Ok(false);
		}

		let dn = self.uid_to_dn(uid);
		match self.connector.connect(&dn, password).await {
			Ok(probe) => {
				if let Err(error) = probe.unbind().await {
					tracing::warn!(%error, "failed to unbind password probe");
				}
				Ok(true)
			}
			Err(error) if directory::result_code(&error) == Some(rc::INVALID_CREDENTIALS) => {
				tracing::debug!(%dn, "invalid credentials");
				Ok(false)
			}
			Err(error) => Err(error.into()),
		}
	}

	/// Let the server set a new password for the user `uid`
	#[tracing::instrument(skip(self, new_password))]
	pub async fn change_password(&self, uid: &str, new_password: &str) -> Result<()> {
		let dn = self.uid_to_dn(uid);
		self.client.change_password(&dn, new_password).await.map_err(|source| Error::Operation {
			operation: "password modify",
			dn,
			attributes: vec!["userPassword".to_owned()],
			source,
		})?;
		tracing::info!("changed password");
		Ok(())
	}

	/// End the administrative session
	pub async fn close(&self) -> Result<()> {
		Ok(self.client.unbind().await?)
	}
}
