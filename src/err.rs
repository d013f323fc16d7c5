//! Errors raised by the mapper.
use ldap3::LdapError;
use thiserror::Error;

use crate::{
	codec::CodecError,
	directory::{self, rc},
};

/// Everything that can go wrong while mapping or storing an entry
#[derive(Debug, Error)]
pub enum Error {
	/// A lookup by identity returned no entry
	#[error("no entry found at `{dn}`")]
	NotFound {
		/// The DN that was looked up
		dn: String,
	},
	/// A lookup by identity returned more than one entry
	#[error("{count} entries found at `{dn}`, expected exactly one")]
	AmbiguousResult {
		/// The DN that was looked up
		dn: String,
		/// Number of entries the directory returned
		count: usize,
	},
	/// An operation needed a connection or a DN the entry does not have
	#[error("{entry} is not bound to a connection or has no DN")]
	Unbound {
		/// Description of the offending entry
		entry: String,
	},
	/// The DN of an entry disagrees with its own data
	#[error("inconsistent DN for `{dn}`: the entry data names `{found}`")]
	InconsistentIdentity {
		/// The DN the entry would be written to
		dn: String,
		/// The identity found in the entry data
		found: String,
	},
	/// The entry class has no naming attribute
	#[error("entry class `{class}` has no naming attribute")]
	MissingNamingAttribute {
		/// Name of the entry class
		class: String,
	},
	/// The naming attribute of an entry has no value
	#[error("naming attribute `{attribute}` has no value")]
	MissingNamingValue {
		/// Name of the naming attribute
		attribute: String,
	},
	/// A relation attribute received an entry of the wrong class
	#[error("`{attribute}` only holds `{expected}` entries, got a `{found}` entry")]
	WrongEntryClass {
		/// The relation attribute
		attribute: String,
		/// The configured sub-entry class
		expected: String,
		/// The class of the rejected entry
		found: String,
	},
	/// A relation attribute was assigned plain values instead of entries
	#[error("`{attribute}` holds entries, assign them with `set_entries`")]
	ExpectedEntries {
		/// The relation attribute
		attribute: String,
	},
	/// The accessor is not declared as a relation
	#[error("`{attribute}` is not a relation accessor")]
	NotARelation {
		/// The accessor name
		attribute: String,
	},
	/// An entry class name could not be resolved
	#[error("unknown entry class `{0}`")]
	UnknownClass(String),
	/// A value could not be converted
	#[error(transparent)]
	Codec(#[from] CodecError),
	/// The directory rejected a request
	#[error("directory request failed")]
	Directory(#[from] LdapError),
	/// The directory rejected a write for a specific entry
	#[error("failed to {operation} `{dn}` (attributes: {attributes:?})")]
	Operation {
		/// The write that failed
		operation: &'static str,
		/// The DN of the entry
		dn: String,
		/// The attributes involved in the write
		attributes: Vec<String>,
		/// The directory error
		#[source]
		source: LdapError,
	},
}

impl Error {
	/// The LDAP result code behind this error, if the directory produced one
	#[must_use]
	pub fn result_code(&self) -> Option<u32> {
		match self {
			Self::Directory(source) | Self::Operation { source, .. } => {
				directory::result_code(source)
			}
			_ => None,
		}
	}

	/// Whether the targeted entry does not exist
	#[must_use]
	pub fn is_no_such_object(&self) -> bool {
		matches!(self, Self::NotFound { .. }) || self.result_code() == Some(rc::NO_SUCH_OBJECT)
	}

	/// Whether a search matched more entries than the server returns at once
	#[must_use]
	pub fn is_size_limit_exceeded(&self) -> bool {
		self.result_code() == Some(rc::SIZE_LIMIT_EXCEEDED)
	}

	/// Whether a bind was refused because of wrong credentials
	#[must_use]
	pub fn is_invalid_credentials(&self) -> bool {
		self.result_code() == Some(rc::INVALID_CREDENTIALS)
	}
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
