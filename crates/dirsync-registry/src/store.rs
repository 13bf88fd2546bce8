//! Registry store boundary.
//!
//! The engine's only view of the registry persistence engine. Implementations
//! are expected to provide atomic create/set/retire semantics and a
//! transactional commit; the engine commits once per changed record.

use async_trait::async_trait;

use crate::error::RegistryResult;
use crate::types::{ContactDraft, ContactEntry, ContactId, Photo, StatusId, StatusRecord, UserId};
use crate::user::{RegistryUser, UserPatch};

/// CRUD and query surface of the application user registry.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Resolve a username to its user id.
    ///
    /// Fails with a not-found kind error (see
    /// [`RegistryError::is_not_found`](crate::RegistryError::is_not_found))
    /// when no user carries the name.
    async fn lookup_username(&self, username: &str) -> RegistryResult<UserId>;

    /// Find the user holding the given hex-rendered directory GUID.
    async fn find_by_guid(&self, guid_hex: &str) -> RegistryResult<Option<UserId>>;

    /// Read one user record.
    async fn user(&self, id: UserId) -> RegistryResult<RegistryUser>;

    /// Create a user from a patch; `username` and `status` must be present.
    async fn create_user(&self, patch: UserPatch) -> RegistryResult<UserId>;

    /// Apply a patch to an existing user.
    async fn update_user(&self, id: UserId, patch: UserPatch) -> RegistryResult<()>;

    /// Property names the registry schema actually carries.
    ///
    /// The mapping registry only maps properties reported here.
    fn properties(&self) -> Vec<String> {
        RegistryUser::PROPERTIES
            .iter()
            .map(|s| (*s).to_string())
            .collect()
    }

    /// All usernames, sorted.
    async fn all_usernames(&self) -> RegistryResult<Vec<String>>;

    /// Usernames of users in any of the given statuses, sorted.
    async fn usernames_with_status(&self, statuses: &[StatusId]) -> RegistryResult<Vec<String>>;

    /// All lifecycle status records, in id order.
    async fn statuses(&self) -> RegistryResult<Vec<StatusRecord>>;

    /// Read one status record.
    async fn status(&self, id: StatusId) -> RegistryResult<StatusRecord>;

    /// Resolve a status name to its id.
    async fn lookup_status(&self, name: &str) -> RegistryResult<StatusId>;

    /// Contact kinds known to the registry.
    async fn contact_kinds(&self) -> RegistryResult<Vec<String>>;

    /// Contact rows of one user, sorted by (kind, order).
    async fn contacts(&self, user: UserId) -> RegistryResult<Vec<ContactEntry>>;

    /// Create a contact row.
    async fn create_contact(&self, draft: ContactDraft) -> RegistryResult<ContactId>;

    /// Rewrite the order of a contact row.
    async fn set_contact_order(&self, id: ContactId, order: u32) -> RegistryResult<()>;

    /// Retire a contact row.
    async fn retire_contact(&self, id: ContactId) -> RegistryResult<()>;

    /// Photos of one user, most recent first.
    async fn photos(&self, user: UserId) -> RegistryResult<Vec<Photo>>;

    /// Commit pending writes.
    async fn commit(&self) -> RegistryResult<()>;
}
