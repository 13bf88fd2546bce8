//! # LDAP Directory Connector
//!
//! `ldap3`-backed implementation of the `dirsync-connector` capability
//! traits for LDAP and Active Directory servers.
//!
//! ## Features
//!
//! - Lazily established, cached connection with StartTLS policy handling
//! - Paged searches via the simple-paged-results control
//! - Modification lists mapped onto protocol add/replace/delete operations
//! - Rename through the modify-DN operation
//! - Attribute multiplicity introspection from the server's sub-schema
//! - Transitive group expansion using the directory's recursive matching
//!   rule where available
//!
//! The wire protocol itself is the client library's business; this crate
//! only adapts it to the connector boundary.

pub mod config;
pub mod connector;
pub mod filter;

pub use config::LdapConfig;
pub use connector::LdapDirectory;
