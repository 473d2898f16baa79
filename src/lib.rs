//! A directory-entry object model, schema-aware modification algebra, and a
//! synchronous connection manager for LDAP v2/v3 (RFC 4511).
//!
//! The crate is organized the way the wire protocol and the object model
//! split naturally: [`entry`] and [`checked`]/[`account`] build up an
//! in-memory representation of a directory entry and its pending changes;
//! [`schema`] models the server's published attribute/object-class
//! definitions; [`filter`] and [`protocol`] are the BER/RFC 4515
//! collaborators the connection manager depends on; [`conn`] ties it all
//! together into a blocking client with pool failover.

pub mod account;
pub mod checked;
pub mod conn;
pub mod entry;
mod filter;
pub mod oid;
mod protocol;
pub mod result;
pub mod schema;
mod schema_parse;
pub mod search;
mod transport;
mod util;

pub use account::{AccountEntry, Generator, GeneratorFn, Registry, Service};
pub use checked::{Flavor, SchemaCheckedEntry};
pub use conn::{LdapConn, LdapConnSettings, SearchStream};
pub use entry::{ChangeType, Entry, EntryLike, ModOp, Op, Record};
pub use filter::parse as parse_filter;
pub use oid::Oid;
pub use result::{CompareResult, GenerationError, LdapError, LdapResult, LocalError, ResultCode};
pub use schema::{AttributeTypeDef, ObjectClassDef, ObjectClassKind, Schema};
pub use search::{DerefAliases, Scope, SearchItem};
pub use transport::{Endpoint, Transport};
pub use util::{dn_escape, ldap_escape};
