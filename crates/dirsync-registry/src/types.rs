//! Typed identifiers and auxiliary registry records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier of a registry user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user{}", self.0)
    }
}

/// Stable identifier of a contact row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContactId(pub i64);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact{}", self.0)
    }
}

/// Stable identifier of a lifecycle status record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusId(pub i64);

impl fmt::Display for StatusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status{}", self.0)
    }
}

/// One lifecycle status of a registry user.
///
/// Statuses double as the configuration anchor for directory eligibility:
/// a status that names a directory group participates in membership-derived
/// authorization with the given priority rank and role set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: StatusId,
    /// Unique status name, e.g. `active`, `obsolete`, `system`.
    pub name: String,
    /// Directory group whose transitive members carry this status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_group: Option<String>,
    /// Priority rank; the lowest rank wins when a user is in several groups.
    #[serde(default)]
    pub group_priority: i32,
    /// Roles granted to users in this status.
    #[serde(default)]
    pub roles: Vec<String>,
    /// System-reserved statuses are never touched by synchronization.
    #[serde(default)]
    pub is_system: bool,
}

/// One ordered contact row owned by a user.
///
/// `order` is 1-based and dense per contact kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    pub id: ContactId,
    pub user: UserId,
    /// Contact kind name, e.g. `email`, `mobile`.
    pub kind: String,
    pub value: String,
    pub order: u32,
}

/// A contact row to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactDraft {
    /// Owner; absent while the owning user itself is still being created.
    pub user: Option<UserId>,
    pub kind: String,
    pub value: String,
    pub order: u32,
}

/// One stored photo of a user.
#[derive(Clone)]
pub struct Photo {
    pub id: i64,
    pub content: Vec<u8>,
    pub added_at: DateTime<Utc>,
}

impl fmt::Debug for Photo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Photo")
            .field("id", &self.id)
            .field("content", &format_args!("<{} bytes>", self.content.len()))
            .field("added_at", &self.added_at)
            .finish()
    }
}
