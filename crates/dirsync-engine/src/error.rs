//! Engine error taxonomy.
//!
//! Per-record failures never abort a sweep; the orchestrator converts them
//! into counters and log entries. Only session-construction failures (bad
//! credentials, unreachable directory, broken configuration) and the change
//! budget propagate to the caller.

use thiserror::Error;

use crate::photo::PhotoError;
use crate::session::SyncDirection;

/// Error that can occur during synchronization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A directory operation failed.
    #[error(transparent)]
    Directory(#[from] dirsync_connector::DirectoryError),

    /// A registry operation failed.
    #[error(transparent)]
    Registry(#[from] dirsync_registry::RegistryError),

    /// Photo transcoding failed.
    #[error(transparent)]
    Photo(#[from] PhotoError),

    /// The configuration is unusable for the requested operation.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// A record's linked-account declarations contradict each other.
    #[error("conflict for {username}: {message}")]
    Conflict { username: String, message: String },

    /// A username failed domain validation.
    #[error("invalid username {username}: {reason}")]
    InvalidUsername { username: String, reason: String },

    /// The dry-run change count exceeded the configured maximum; the sweep
    /// was aborted without writes.
    #[error("{direction} sweep aborted: {would_change} changes exceed maximum {max_changes}")]
    BudgetExceeded {
        direction: SyncDirection,
        would_change: usize,
        max_changes: usize,
    },
}

impl SyncError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        SyncError::Configuration {
            message: message.into(),
        }
    }

    /// Create a conflict error for one record.
    pub fn conflict(username: impl Into<String>, message: impl Into<String>) -> Self {
        SyncError::Conflict {
            username: username.into(),
            message: message.into(),
        }
    }

    /// Whether this error concerns a single record and must not abort the
    /// sweep over the remaining population.
    pub fn is_record_level(&self) -> bool {
        match self {
            SyncError::Conflict { .. } | SyncError::InvalidUsername { .. } => true,
            SyncError::Photo(_) => true,
            SyncError::Directory(e) => !matches!(
                e,
                dirsync_connector::DirectoryError::ConnectionFailed { .. }
                    | dirsync_connector::DirectoryError::AuthenticationFailed
            ),
            SyncError::Registry(e) => e.is_not_found(),
            SyncError::Configuration { .. } | SyncError::BudgetExceeded { .. } => false,
        }
    }
}

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;
