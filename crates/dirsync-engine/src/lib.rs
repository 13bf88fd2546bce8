//! # Directory Reconciliation Engine
//!
//! Keeps two independent identity stores consistent: an external network
//! directory (reached through the `dirsync-connector` traits) and the
//! application's local user registry (reached through the
//! `dirsync-registry` store boundary).
//!
//! ## Architecture
//!
//! - [`mapping`] - declarative per-field map between registry properties and
//!   directory attributes, built once per session
//! - [`groups`] - recursive group membership resolution into a
//!   priority-ordered eligibility table
//! - [`compare`] - per-user attribute change computation in both directions
//! - [`contacts`] - ordered multi-valued contact list reconciliation
//! - [`photo`] - photo payload transcoding against a byte budget
//! - [`linked`] - linked-account ownership resolution
//! - [`session`] / [`orchestrator`] - the [`SyncSession`] driving single-user
//!   and full-population synchronization with dry-run support and a
//!   change-count circuit breaker
//!
//! ## Example
//!
//! ```ignore
//! use dirsync_engine::{SyncConfig, SyncSession};
//!
//! let directory = Arc::new(LdapDirectory::new(ldap_config)?);
//! let mut session = SyncSession::connect(directory, registry, SyncConfig::default()).await?;
//!
//! // One user, inbound
//! session.sync_user_from_directory("ada@example.com").await?;
//!
//! // Whole population, outbound, guarded by a change budget
//! let summary = session.sync_all_to_directory(Some(50)).await?;
//! println!("changed {} users", summary.users_changed);
//! ```
//!
//! Sessions hold no state beyond the two stores; every invocation constructs
//! a fresh [`SyncSession`] and discards it at the end of the run.

pub mod compare;
pub mod config;
pub mod contacts;
pub mod error;
pub mod groups;
pub mod linked;
pub mod mapping;
pub mod orchestrator;
pub mod photo;
pub mod session;

pub use config::SyncConfig;
pub use contacts::{ContactPlan, OutboundContactPlan};
pub use error::{SyncError, SyncResult};
pub use groups::{EligibilityGroup, GroupTable};
pub use mapping::{ContactMapping, InboundConverter, MappingEntry, MappingRegistry, OutboundRule};
pub use photo::{fit_photo, PhotoError};
pub use session::{RunCounters, RunSummary, SyncDirection, SyncSession};
