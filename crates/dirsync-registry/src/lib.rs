//! # Registry Collaborator Boundary
//!
//! Typed record model and store trait for the application's local user
//! registry ("Directory B"). The registry's persistence engine is not part
//! of the reconciliation core; the engine consumes it exclusively through
//! the [`RegistryStore`] trait, which provides lookup-by-unique-key with a
//! distinguishable not-found condition, typed CRUD, filtered enumeration
//! with stable sort order, and a transactional commit boundary.

pub mod error;
pub mod store;
pub mod types;
pub mod user;

pub use error::{RegistryError, RegistryResult};
pub use store::RegistryStore;
pub use types::{ContactDraft, ContactEntry, ContactId, Photo, StatusId, StatusRecord, UserId};
pub use user::{PropertyValue, RegistryUser, UserPatch};

// Re-export async_trait for store implementors
pub use async_trait::async_trait;
