//! Registry error types.

use thiserror::Error;

/// Error that can occur during registry store operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A record was not found by its unique key.
    ///
    /// Distinguishable from storage failures so the engine can treat a
    /// missing user as a recoverable skip rather than a broken run.
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness or referential constraint was violated.
    #[error("constraint violation: {message}")]
    Constraint { message: String },

    /// The underlying store failed.
    #[error("storage error: {message}")]
    Storage { message: String },

    /// The transactional commit failed.
    #[error("commit failed: {message}")]
    Commit { message: String },
}

impl RegistryError {
    /// Check if this error means "no such record".
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound { .. })
    }

    /// Create a not-found error for a user.
    pub fn user_not_found(key: impl Into<String>) -> Self {
        RegistryError::NotFound {
            entity: "user",
            key: key.into(),
        }
    }

    /// Create a not-found error for a status record.
    pub fn status_not_found(key: impl Into<String>) -> Self {
        RegistryError::NotFound {
            entity: "status",
            key: key.into(),
        }
    }

    /// Create a not-found error for a contact row.
    pub fn contact_not_found(key: impl Into<String>) -> Self {
        RegistryError::NotFound {
            entity: "contact",
            key: key.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        RegistryError::Storage {
            message: message.into(),
        }
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
