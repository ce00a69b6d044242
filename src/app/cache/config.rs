//! Cache configuration types and defaults
//!
//! This module contains the runtime configuration for the local blob cache.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::cache;

/// Configuration for the local blob cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Base directory under which the per-process staging root is created
    pub base_dir: PathBuf,
    /// Maximum number of staged resources held at once
    pub max_elements: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            max_elements: cache::DEFAULT_MAX_ELEMENTS,
        }
    }
}

impl CacheConfig {
    /// Create a new cache configuration with a custom base directory
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self {
            base_dir,
            ..Default::default()
        }
    }

    /// Set the maximum number of staged resources
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }
}

/// Platform temp directory joined with the crate's cache directory name
pub fn default_base_dir() -> PathBuf {
    std::env::temp_dir().join(cache::DEFAULT_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.max_elements, 200);
        assert!(config.base_dir.starts_with(std::env::temp_dir()));
        assert!(config.base_dir.ends_with("stage-cache"));
    }

    #[test]
    fn test_config_builder() {
        let base_dir = PathBuf::from("/tmp/test");
        let config = CacheConfig::with_base_dir(base_dir.clone()).with_max_elements(2);

        assert_eq!(config.base_dir, base_dir);
        assert_eq!(config.max_elements, 2);
    }
}
