//! Application constants for stage_cache
//!
//! This module centralizes all constants used throughout the crate,
//! organized by functional domain.

use std::time::Duration;

/// Environment variable names for configuration overrides
pub mod env {
    /// Overrides `cache.size.elements`
    pub const CACHE_SIZE_ELEMENTS: &str = "STAGE_CACHE_SIZE_ELEMENTS";

    /// Overrides `cache.dir`
    pub const CACHE_DIR: &str = "STAGE_CACHE_DIR";

    /// Overrides `store.endpoint`
    pub const STORE_ENDPOINT: &str = "STAGE_CACHE_ENDPOINT";
}

/// Local blob cache defaults
pub mod cache {
    /// Default maximum number of staged resources held at once
    pub const DEFAULT_MAX_ELEMENTS: usize = 200;

    /// Directory name appended to the platform temp dir when `cache.dir` is unset
    pub const DEFAULT_DIR_NAME: &str = "stage-cache";

    /// Prefix of the per-process staging root created under `cache.dir`
    pub const STAGING_ROOT_PREFIX: &str = "stage";
}

/// Remote resolution and local staging layout
pub mod layout {
    /// Name of the index part of a paired resource
    pub const INDEX_PART: &str = "index";

    /// Name of the data part of a paired resource
    pub const DATA_PART: &str = "data";

    /// URL schemes served from an object store and therefore staged locally
    pub const STAGED_SCHEMES: &[&str] = &["s3", "s3a", "s3n"];

    /// Scheme every staged alias is rewritten to
    pub const CANONICAL_STAGED_SCHEME: &str = "s3";

    /// URL scheme for paths read in place from the local filesystem
    pub const LOCAL_SCHEME: &str = "file";
}

/// HTTP object store client constants
pub mod http {
    use super::Duration;

    /// Default user agent for all HTTP requests
    pub const USER_AGENT: &str = "stage-cache/0.1.0";

    /// Default endpoint for path-style object requests
    pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:9000/";

    /// Default HTTP request timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connection establishment timeout
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection pool idle timeout
    pub const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

    /// Maximum idle connections per host in pool
    pub const POOL_MAX_PER_HOST: usize = 16;
}

/// Rate limiting and retry configuration
pub mod limits {
    /// Default rate limit for object store requests (requests per second)
    pub const DEFAULT_RATE_LIMIT_RPS: u32 = 50;

    /// Maximum retry attempts for transient request failures
    pub const MAX_RETRIES: u32 = 3;

    /// Base delay for exponential backoff (milliseconds)
    pub const RETRY_BASE_DELAY_MS: u64 = 500;
}

/// Delete consistency polling for eventually-consistent stores
pub mod consistency {
    /// (checks, seconds between checks) for each polling phase
    pub const WAIT_PHASES: &[(u32, u64)] = &[(60, 1), (120, 2), (60, 15)];
}

/// File operation constants
pub mod files {
    /// Temporary file suffix for atomic operations
    pub const TEMP_FILE_SUFFIX: &str = ".tmp";

    /// Default number of data records between index entries
    pub const DEFAULT_INDEX_INTERVAL: usize = 128;

    /// Upper bound on a single key or value length accepted by the decoders
    pub const MAX_FIELD_LEN: u32 = 256 * 1024 * 1024;
}

/// Logging constants
pub mod logging {
    /// Default log level
    pub const DEFAULT_LOG_LEVEL: &str = "info";
}

// Re-export commonly used constants for convenience
pub use cache::DEFAULT_MAX_ELEMENTS;
pub use http::USER_AGENT;
pub use layout::{DATA_PART, INDEX_PART};
pub use limits::{DEFAULT_RATE_LIMIT_RPS, MAX_RETRIES, RETRY_BASE_DELAY_MS};
