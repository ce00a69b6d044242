//! Error types for stage_cache
//!
//! This module defines the error types for all components of the crate.
//! Each domain has its own enum; [`AppError`] aggregates them for callers
//! that do not care which layer failed.

use std::path::PathBuf;
use thiserror::Error;

/// Object store client errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object does not exist in the store
    #[error("Object not found: {location}")]
    NotFound { location: String },

    /// Access to the object was refused
    #[error("Access denied for object: {location}")]
    Forbidden { location: String },

    /// HTTP request error
    #[error("HTTP request failed")]
    Http(#[from] reqwest::Error),

    /// I/O error while writing a fetched object
    #[error("File I/O error")]
    Io(#[from] std::io::Error),

    /// Server returned an unexpected status
    #[error("Server error: HTTP {status} for {location}")]
    ServerError { status: u16, location: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded. Server responded with HTTP 429")]
    RateLimitExceeded,

    /// Server overloaded
    #[error("Server overloaded. Server responded with HTTP 503")]
    ServerOverloaded,

    /// Maximum retries exceeded
    #[error("Maximum retry attempts ({max_retries}) exceeded for {location}")]
    MaxRetriesExceeded { max_retries: u32, location: String },

    /// Location cannot be expressed as a request to this store
    #[error("Invalid object location {location}: {reason}")]
    InvalidLocation { location: String, reason: String },

    /// Client settings cannot be used to build a store
    #[error("Invalid object store configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Store could not serve the request right now
    #[error("Object store unavailable for {location}: {reason}")]
    Unavailable { location: String, reason: String },

    /// Store refused or failed the delete request
    #[error("Error deleting object {location}")]
    DeleteFailed { location: String },

    /// Object still visible after every polling phase
    #[error("{location} was not deleted within the waiting period ({waited_secs}s)")]
    DeleteConsistencyTimeout { location: String, waited_secs: u64 },
}

impl StoreError {
    /// Whether this error means the object is absent rather than unreachable
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Local blob cache errors
#[derive(Error, Debug)]
pub enum CacheError {
    /// Staging directory could not be created or accessed
    #[error("Cache directory not accessible: {path}")]
    DirectoryNotAccessible { path: PathBuf },

    /// Fetching a remote part into the staging directory failed
    #[error("Failed to stage {key}")]
    FetchFailure {
        key: String,
        #[source]
        source: StoreError,
    },

    /// The logical resource does not exist remotely
    #[error("Resource not found: {key}")]
    NotFound { key: String },

    /// Capacity must hold at least one entry
    #[error("Invalid cache capacity: {capacity}. Must be greater than 0")]
    InvalidCapacity { capacity: usize },

    /// Cache was shut down and its staging root removed
    #[error("Cache has been shut down")]
    ShutDown,
}

/// Local decoder errors
#[derive(Error, Debug)]
pub enum DecodeError {
    /// I/O error while reading staged files
    #[error("Decoder I/O error")]
    Io(#[from] std::io::Error),

    /// One of the paired parts is missing from the directory
    #[error("Missing {part} part in {}", .dir.display())]
    MissingPart { dir: PathBuf, part: &'static str },

    /// File contents do not follow the record framing
    #[error("Corrupt record file {}: {reason}", .path.display())]
    Corrupt { path: PathBuf, reason: String },

    /// Keys must be appended in strictly ascending order
    #[error("Key out of order at record {record}")]
    UnsortedKey { record: u64 },
}

/// Staged reader façade errors
#[derive(Error, Debug)]
pub enum ReaderError {
    /// Logical path could not be parsed or qualified
    #[error("Invalid resource path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// Scheme is neither staged nor readable in place
    #[error("Unsupported scheme '{scheme}' for {path}")]
    UnsupportedScheme { scheme: String, path: String },

    /// Local resource does not exist
    #[error("Resource not found: {path}")]
    NotFound { path: String },

    /// Reader was used after close()
    #[error("Reader for {path} is closed")]
    Closed { path: String },

    /// Staging through the cache failed
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Decoder failed
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Direct object store operation failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local filesystem operation failed
    #[error("File I/O error")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid configuration format
    #[error("Invalid configuration format")]
    InvalidFormat(#[from] toml::de::Error),

    /// Configuration could not be written as TOML
    #[error("Failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}. {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<String> },

    /// I/O error reading or writing a configuration file
    #[error("Configuration file I/O error")]
    Io(#[from] std::io::Error),
}

/// Top-level application error that can represent any error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Object store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Cache error
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Decoder error
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Reader error
    #[error(transparent)]
    Reader(#[from] ReaderError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Generic I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic application error with context
    #[error("Application error: {message}")]
    Generic { message: String },
}

impl AppError {
    /// Create a generic application error with a message
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Check if the error is transient and the operation may succeed on retry
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Store(e) | AppError::Reader(ReaderError::Store(e)) => store_recoverable(e),
            AppError::Cache(CacheError::FetchFailure { source, .. })
            | AppError::Reader(ReaderError::Cache(CacheError::FetchFailure { source, .. })) => {
                store_recoverable(source)
            }
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Store(_) => "store",
            AppError::Cache(_) => "cache",
            AppError::Decode(_) => "decode",
            AppError::Reader(_) => "reader",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Generic { .. } => "generic",
        }
    }
}

fn store_recoverable(error: &StoreError) -> bool {
    matches!(
        error,
        StoreError::Http(_)
            | StoreError::RateLimitExceeded
            | StoreError::ServerOverloaded
            | StoreError::Unavailable { .. }
            | StoreError::DeleteConsistencyTimeout { .. }
    )
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;

/// Object store result type alias
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Cache result type alias
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Decoder result type alias
pub type DecodeResult<T> = std::result::Result<T, DecodeError>;

/// Reader result type alias
pub type ReaderResult<T> = std::result::Result<T, ReaderError>;

/// Configuration result type alias
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
