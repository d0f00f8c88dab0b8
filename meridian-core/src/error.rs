//! Error types for Meridian operations

use crate::{ElementType, ObjectId, Timestamp, Version};
use thiserror::Error;

/// Errors surfaced by an API client and, through it, by relation resolution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("Element not found: {element_type} {id}")]
    NotFound { element_type: ElementType, id: ObjectId },

    #[error("Version {version} of {element_type} {id} not found")]
    VersionNotFound {
        element_type: ElementType,
        id: ObjectId,
        version: Version,
    },

    #[error("{element_type} {id} did not exist at {as_of}")]
    NotFoundAt {
        element_type: ElementType,
        id: ObjectId,
        as_of: Timestamp,
    },

    #[error("Expected {expected} for id {id}, upstream returned {got}")]
    UnexpectedType {
        id: ObjectId,
        expected: ElementType,
        got: ElementType,
    },

    #[error("Upstream request failed: {reason}")]
    Upstream { reason: String },
}

/// Durable-tier errors. Caches log and discard these; they only reach
/// callers from backend constructors and direct backend use.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Failed to open durable store: {reason}")]
    Open { reason: String },

    #[error("Transaction failed: {reason}")]
    Transaction { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Deserialization failed: {reason}")]
    Deserialization { reason: String },

    #[error("I/O error: {reason}")]
    Io { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("A live durable cache named {name} is already registered")]
    DuplicateCacheName { name: String },
}

/// Errors constructing a [`Version`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Version numbers start at 1")]
    Zero,
}

/// Master error type for all Meridian errors.
#[derive(Debug, Clone, Error)]
pub enum MeridianError {
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}

/// Result type alias for API client and resolver operations.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for Meridian operations.
pub type MeridianResult<T> = Result<T, MeridianError>;

// =============================================================================
// TESTS
// =============================================================================
