//! Directory servers the mapper talks to.
use std::{collections::HashSet, fmt, sync::Arc};

use async_trait::async_trait;
use ldap3::{LdapError, LdapResult, Mod, Scope, SearchEntry};

pub mod ldap;
#[cfg(any(test, feature = "test-utils"))]
pub mod memory;

pub use ldap::{LdapConnector, LdapDirectory};
#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryClient, MemoryDirectory};

/// LDAP result codes the mapper reacts to
pub mod rc {
	/// The search matched more entries than the server returns
	pub const SIZE_LIMIT_EXCEEDED: u32 = 4;
	/// The attribute or value to delete does not exist
	pub const NO_SUCH_ATTRIBUTE: u32 = 16;
	/// The value to add already exists
	pub const ATTRIBUTE_OR_VALUE_EXISTS: u32 = 20;
	/// The entry does not exist
	pub const NO_SUCH_OBJECT: u32 = 32;
	/// Wrong DN or password
	pub const INVALID_CREDENTIALS: u32 = 49;
	/// The bound identity may not perform the operation
	pub const INSUFFICIENT_ACCESS_RIGHTS: u32 = 50;
	/// The entry to add already exists
	pub const ENTRY_ALREADY_EXISTS: u32 = 68;
}

/// An authenticated session with a directory server
#[async_trait]
pub trait DirectoryClient: fmt::Debug + Send + Sync {
	/// Search below `base`
	async fn search(
		&self,
		base: &str,
		scope: Scope,
		filter: &str,
		attributes: Vec<String>,
	) -> Result<Vec<SearchEntry>, LdapError>;

	/// Create an entry
	async fn add(
		&self,
		dn: &str,
		attributes: Vec<(String, HashSet<String>)>,
	) -> Result<(), LdapError>;

	/// Apply changes to an entry
	async fn modify(&self, dn: &str, modifications: Vec<Mod<String>>) -> Result<(), LdapError>;

	/// Remove an entry
	async fn delete(&self, dn: &str) -> Result<(), LdapError>;

	/// Let the server set a new password for `dn`
	async fn change_password(&self, dn: &str, new_password: &str) -> Result<(), LdapError>;

	/// End the session
	async fn unbind(&self) -> Result<(), LdapError>;
}

/// Opens new, independent sessions
#[async_trait]
pub trait Connector: fmt::Debug + Send + Sync {
	/// Open a session bound as `dn`
	async fn connect(&self, dn: &str, password: &str)
		-> Result<Arc<dyn DirectoryClient>, LdapError>;
}

/// The result code of an error reported by the server
#[must_use]
pub fn result_code(error: &LdapError) -> Option<u32> {
	match error {
		LdapError::LdapResult { result } => Some(result.rc),
		_ => None,
	}
}

/// An error as the server would report it
pub fn failure(rc: u32, text: impl Into<String>) -> LdapError {
	LdapError::from(LdapResult {
		rc,
		matched: String::new(),
		text: text.into(),
		refs: Vec::new(),
		ctrls: Vec::new(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn result_codes_come_from_server_errors() {
		assert_eq!(result_code(&failure(rc::NO_SUCH_OBJECT, "gone")), Some(32));
		assert_eq!(result_code(&LdapError::FilterParsing), None);
	}
}
