//! Directory error types
//!
//! Error definitions with transient/permanent classification. Record-level
//! recovery decisions (skip, downgrade, continue) are made by the engine;
//! this crate only classifies what went wrong at the protocol boundary.

use thiserror::Error;

/// Error that can occur during directory operations.
#[derive(Debug, Error)]
pub enum DirectoryError {
    // Connection errors (usually transient)
    /// Failed to establish a connection to the directory server.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Bind was refused for the configured credentials.
    #[error("authentication failed: invalid credentials")]
    AuthenticationFailed,

    /// Connector configuration is invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    // Lookup errors
    /// No entry matched the lookup.
    #[error("entry not found: {identifier}")]
    EntryNotFound { identifier: String },

    /// A lookup that must match at most one entry matched several.
    #[error("ambiguous result: {count} entries matched {filter}")]
    AmbiguousResult { filter: String, count: usize },

    /// An attribute was requested on an entry that does not carry it.
    ///
    /// Distinct from a present-but-empty attribute, which is surfaced as an
    /// empty value by [`crate::DirectoryEntry`].
    #[error("attribute not present: {attribute}")]
    AttributeMissing { attribute: String },

    /// A distinguished name could not be parsed.
    #[error("invalid distinguished name '{dn}': {message}")]
    InvalidDn { dn: String, message: String },

    // Operation errors
    /// A directory operation (search, modify, rename) failed. Carries the
    /// protocol-supplied diagnostic text.
    #[error("{operation} failed: {diagnostic}")]
    OperationFailed {
        operation: String,
        diagnostic: String,
    },

    /// The server-side attribute schema could not be read or parsed.
    #[error("schema discovery failed: {message}")]
    SchemaDiscoveryFailed { message: String },
}

impl DirectoryError {
    /// Check if this error is transient and the operation may be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, DirectoryError::ConnectionFailed { .. })
    }

    /// Check if this error is permanent and retry won't help.
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Check if this error means "nothing matched" rather than "broken".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DirectoryError::EntryNotFound { .. } | DirectoryError::AttributeMissing { .. }
        )
    }

    /// Get an error code for classification in logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            DirectoryError::ConnectionFailed { .. } => "CONNECTION_FAILED",
            DirectoryError::AuthenticationFailed => "AUTH_FAILED",
            DirectoryError::InvalidConfiguration { .. } => "INVALID_CONFIG",
            DirectoryError::EntryNotFound { .. } => "ENTRY_NOT_FOUND",
            DirectoryError::AmbiguousResult { .. } => "AMBIGUOUS_RESULT",
            DirectoryError::AttributeMissing { .. } => "ATTRIBUTE_MISSING",
            DirectoryError::InvalidDn { .. } => "INVALID_DN",
            DirectoryError::OperationFailed { .. } => "OPERATION_FAILED",
            DirectoryError::SchemaDiscoveryFailed { .. } => "SCHEMA_DISCOVERY_FAILED",
        }
    }

    // Convenience constructors

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failed error with source.
    pub fn connection_failed_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        DirectoryError::ConnectionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an operation failed error from a protocol diagnostic.
    pub fn operation_failed(operation: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        DirectoryError::OperationFailed {
            operation: operation.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Create an entry-not-found error.
    pub fn entry_not_found(identifier: impl Into<String>) -> Self {
        DirectoryError::EntryNotFound {
            identifier: identifier.into(),
        }
    }
}

/// Result type for directory operations.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
