//! Object mapper for LDAP directories.
//!
//! Entries of a directory are described by [`EntryClass`]es declaring typed
//! [`AttributeDescriptor`]s. An [`Entry`] caches its attributes, loads them
//! lazily through its [`Connection`] and writes back only what changed.

pub mod codec;
pub mod config;
pub mod connection;
pub mod directory;
pub mod dn;
pub mod entry;
mod err;
pub mod models;
pub mod modlist;
pub mod schema;

pub use codec::{CodecError, CodecRegistry, RawValue, Value, ValueKind};
pub use config::{Config, SectionConfig};
pub use connection::{Connection, SearchRequest};
pub use entry::{Entry, LoadState};
pub use err::{Error, Result};
pub use models::{ClassCatalog, GroupMember, Identifiable, PasswordCheckable};
pub use modlist::{Modification, ModifyOptions};
pub use schema::{AttributeDescriptor, Domain, EntryClass, Role, SubEntryClass};
