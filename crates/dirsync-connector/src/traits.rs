//! Directory capability traits.
//!
//! The reconciliation engine consumes the directory exclusively through these
//! traits. Semantic lookups (`find_user`, `find_by_guid`, `all_users`) live
//! here rather than raw filter strings so implementations control filter
//! construction and escaping for their protocol dialect.

use async_trait::async_trait;

use crate::entry::DirectoryEntry;
use crate::error::DirectoryResult;
use crate::ops::{AttributeChange, RenameRequest};

/// Base trait for directory implementations.
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Display name for this directory instance (host, label).
    fn display_name(&self) -> &str;

    /// Establish the session connection and authenticate with the configured
    /// service credentials. Idempotent.
    async fn bind(&self) -> DirectoryResult<()>;

    /// Verify a user's own credentials against the directory.
    ///
    /// Returns `Ok(false)` when the directory rejects the credentials;
    /// errors are reserved for connection-level failures.
    async fn rebind(&self, dn: &str, password: &str) -> DirectoryResult<bool>;
}

/// A lazy page sequence over a search result.
#[async_trait]
pub trait EntryPages: Send {
    /// Fetch the next page, or `None` when the sequence is exhausted.
    async fn next_page(&mut self) -> DirectoryResult<Option<Vec<DirectoryEntry>>>;
}

/// Capability for reading entries from the directory.
#[async_trait]
pub trait DirectorySearch: DirectoryService {
    /// Run a search with an implementation-dialect filter, returning zero or
    /// more entries with the requested attributes.
    async fn search(
        &self,
        filter: &str,
        attributes: &[String],
    ) -> DirectoryResult<Vec<DirectoryEntry>>;

    /// Locate the person entry for a username, with all attributes.
    ///
    /// Usernames carrying a domain match the principal-name attribute;
    /// legacy short names match the plain account-name attribute.
    async fn find_user(&self, username: &str) -> DirectoryResult<Option<DirectoryEntry>>;

    /// Locate the person entry whose stable identifier matches the given
    /// hex-rendered GUID.
    async fn find_by_guid(&self, guid_hex: &str) -> DirectoryResult<Option<DirectoryEntry>>;

    /// Read one entry by DN, or `None` when the DN does not exist.
    async fn entry_by_dn(&self, dn: &str) -> DirectoryResult<Option<DirectoryEntry>>;

    /// Enumerate all person entries as a lazy page sequence, fetching only
    /// the requested attributes.
    async fn all_users(&self, attributes: &[String]) -> DirectoryResult<Box<dyn EntryPages>>;
}

/// Capability for writing to the directory.
#[async_trait]
pub trait DirectoryModify: DirectoryService {
    /// Apply a modification list to one entry.
    async fn modify(&self, dn: &str, changes: Vec<AttributeChange>) -> DirectoryResult<()>;

    /// Change the relative distinguished name of an entry.
    async fn rename(&self, request: &RenameRequest) -> DirectoryResult<()>;
}

/// Capability for attribute schema introspection.
#[async_trait]
pub trait DirectorySchema: DirectoryService {
    /// Whether the directory schema declares the attribute single-valued.
    ///
    /// Attributes the schema does not know are reported as multi-valued.
    async fn is_single_valued(&self, attribute: &str) -> DirectoryResult<bool>;
}

/// Members of one group entry, split by object kind.
#[derive(Debug, Clone, Default)]
pub struct GroupMembers {
    /// DNs of contained person entries.
    pub users: Vec<String>,
    /// DNs of contained group entries.
    pub groups: Vec<String>,
}

/// Capability for group membership expansion.
///
/// `expand_group` returns the person and subgroup entries contained in one
/// group. Implementations may return direct members only or the full
/// transitive closure (servers with a recursive matching rule do the
/// latter); the caller runs an explicit breadth-first traversal with a
/// visited-set guard either way, so both shapes converge and cycles are
/// handled without protocol tricks.
#[async_trait]
pub trait GroupExpansion: DirectoryService {
    /// Locate a group entry by its account name.
    async fn find_group(&self, name: &str) -> DirectoryResult<Option<DirectoryEntry>>;

    /// Expand the membership of the group entry at `group_dn`.
    async fn expand_group(&self, group_dn: &str) -> DirectoryResult<GroupMembers>;
}

/// Marker trait for full directory implementations.
pub trait Directory:
    DirectorySearch + DirectoryModify + DirectorySchema + GroupExpansion
{
}

// Blanket implementation for anything providing all capabilities
impl<T> Directory for T where
    T: DirectorySearch + DirectoryModify + DirectorySchema + GroupExpansion
{
}
