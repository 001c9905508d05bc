//! # Error Handling
//!
//! Error types shared by every store in the crate.
//!
//! ## Key Types
//!
//! - [`StoreError`]: Main error enum covering every failure a store operation can report
//! - [`ErrorCode`]: Machine-readable error classification
//! - [`StoreResult<T>`]: Convenience type alias for Results using `StoreError`
//!
//! ## Absent Is Not An Error
//!
//! Looking up a package, version, tarball or user that does not exist yields
//! `Ok(None)` (or `Ok(false)`), never an error. The one deliberate exception is
//! [`TarballStore::delete`](crate::tarball::TarballStore::delete), which reports
//! [`StoreError::NotFound`] so that cascading deletes can tell a missing blob
//! apart from a successful removal.
//!
//! ## Error Classifications
//!
//! - **Conflict** (`AlreadyExists`): duplicate name+version on publish, duplicate username
//! - **Validation**: malformed names, versions, payloads or queries
//! - **Not Found**: deleting a blob that is not there
//! - **Storage**: I/O failures and malformed backing documents
//! - **Credential**: failures inside the password hasher
//! - **Upstream**: failures talking to the fallback registry

use crate::validation::ValidationError;
use std::path::PathBuf;

/// Error code classification for machine-readable error types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ValidationError, // Input validation failures
    NotFound,        // Missing resources
    Conflict,        // Duplicate name+version or username
    StorageError,    // Disk and document failures
    CredentialError, // Hashing failures
    UpstreamError,   // Fallback registry failures
    InternalError,   // Everything else
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::NotFound => "not_found",
            ErrorCode::Conflict => "conflict",
            ErrorCode::StorageError => "storage_error",
            ErrorCode::CredentialError => "credential_error",
            ErrorCode::UpstreamError => "upstream_error",
            ErrorCode::InternalError => "internal_error",
        }
    }

    /// HTTP status the surrounding service is expected to answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::NotFound => 404,
            ErrorCode::Conflict => 409,
            ErrorCode::UpstreamError => 502,
            ErrorCode::StorageError | ErrorCode::CredentialError | ErrorCode::InternalError => {
                500
            }
        }
    }
}

/// Errors reported by the registry stores
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Backing document {} is malformed: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    NotFound(String),

    #[error("Document update conflict: {0}")]
    AlreadyExists(String),

    #[error("Invalid semantic version: {0}")]
    InvalidVersion(String),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("Upstream registry error: {0}")]
    Upstream(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            StoreError::BadRequest(_)
            | StoreError::InvalidVersion(_)
            | StoreError::Validation(_) => ErrorCode::ValidationError,
            StoreError::NotFound(_) => ErrorCode::NotFound,
            StoreError::AlreadyExists(_) => ErrorCode::Conflict,
            StoreError::Io(_) | StoreError::Json(_) | StoreError::Corrupt { .. } => {
                ErrorCode::StorageError
            }
            StoreError::Credential(_) => ErrorCode::CredentialError,
            StoreError::Upstream(_) => ErrorCode::UpstreamError,
            StoreError::Config(_) => ErrorCode::InternalError,
        }
    }

    /// True when the error is the conflict outcome rather than a failure.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// True when the error reports an absent resource.
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Convenient result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
