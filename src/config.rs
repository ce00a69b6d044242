//! Configuration management for stage_cache
//!
//! Settings are resolved from four sources, later ones winning:
//! built-in defaults, a TOML config file, environment variables, and the
//! command line (applied by the CLI after [`AppConfig::load`]).

use std::path::{Path, PathBuf};
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::cache::config::default_base_dir;
use crate::app::cache::CacheConfig;
use crate::app::store::{ConsistencyPolicy, StoreConfig, WaitPhase};
use crate::constants::{cache, env, http, limits, logging};
use crate::errors::{ConfigError, ConfigResult};

/// Unified application configuration for TOML serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Local blob cache settings
    pub cache: CacheConfigToml,
    /// Object store client settings
    pub store: StoreConfigToml,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TOML-friendly cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfigToml {
    /// Base directory for staging roots (None = platform temp dir)
    pub dir: Option<PathBuf>,
    /// Capacity limits
    pub size: CacheSizeToml,
}

/// Capacity limits of the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSizeToml {
    /// Maximum number of staged resources
    pub elements: usize,
}

impl Default for CacheSizeToml {
    fn default() -> Self {
        Self {
            elements: cache::DEFAULT_MAX_ELEMENTS,
        }
    }
}

/// TOML-friendly object store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfigToml {
    /// Path-style endpoint URL
    pub endpoint: String,
    /// Request timeout, e.g. "60s"
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Connect timeout, e.g. "30s"
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Maximum idle connections per host
    pub pool_max_per_host: usize,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
    /// Existence polling after a delete, in phases of increasing interval
    pub delete_phases: Vec<WaitPhase>,
}

impl Default for StoreConfigToml {
    fn default() -> Self {
        Self {
            endpoint: http::DEFAULT_ENDPOINT.to_string(),
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
            delete_phases: ConsistencyPolicy::default().phases,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level for the application
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: logging::DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl AppConfig {
    /// Convert TOML-friendly configuration to runtime configuration
    pub fn to_runtime_config(&self) -> (CacheConfig, StoreConfig) {
        (
            self.cache.to_runtime_config(),
            self.store.to_runtime_config(),
        )
    }

    /// Load configuration with multi-source precedence:
    /// 1. Default values
    /// 2. Config file (explicit path, or the first one found)
    /// 3. Environment variables
    ///
    /// # Errors
    ///
    /// Fails if an explicitly given file does not exist, if a file cannot be
    /// parsed, or if the merged configuration is invalid.
    pub async fn load(config_file_override: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = match config_file_override {
            Some(path) => {
                if !path.exists() {
                    return Err(ConfigError::NotFound { path });
                }
                Self::load_from_file(&path).await?
            }
            None => match Self::find_config_file() {
                Some(path) => Self::load_from_file(&path).await?,
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STAGE_CACHE_*` environment variables
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides using `lookup` to resolve variable names
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(env::CACHE_SIZE_ELEMENTS) {
            self.cache.size.elements =
                value
                    .trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        field: env::CACHE_SIZE_ELEMENTS.to_string(),
                        value: value.clone(),
                        reason: e.to_string(),
                    })?;
            debug!("cache.size.elements overridden from environment");
        }

        if let Some(value) = lookup(env::CACHE_DIR) {
            if !value.trim().is_empty() {
                self.cache.dir = Some(PathBuf::from(value.trim()));
                debug!("cache.dir overridden from environment");
            }
        }

        if let Some(value) = lookup(env::STORE_ENDPOINT) {
            if !value.trim().is_empty() {
                self.store.endpoint = value.trim().to_string();
                debug!("store.endpoint overridden from environment");
            }
        }

        Ok(())
    }

    /// Check the merged configuration
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();

        if self.cache.size.elements == 0 {
            errors.push("cache.size.elements must be greater than 0".to_string());
        }
        if self.store.rate_limit_rps == 0 {
            errors.push("store.rate_limit_rps must be greater than 0".to_string());
        }
        for (i, phase) in self.store.delete_phases.iter().enumerate() {
            if phase.checks > 0 && phase.interval.is_zero() {
                errors.push(format!(
                    "store.delete_phases[{}].interval must be greater than 0",
                    i
                ));
            }
        }
        if let Err(e) = self.store.to_runtime_config().endpoint_url() {
            errors.push(format!("store.endpoint: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationFailed { errors })
        }
    }

    /// Serialize the effective configuration
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut search_paths = vec![PathBuf::from("./stage-cache.toml")];
        if let Some(path) = Self::default_config_path() {
            search_paths.push(path);
        }

        for path in search_paths {
            if path.exists() {
                debug!("Found config file: {}", path.display());
                return Some(path);
            }
        }

        None
    }

    /// Default config file path for the current user
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stage-cache").join("config.toml"))
    }

    /// Load configuration from a TOML file
    async fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let config: AppConfig = toml::from_str(&content)?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Write a commented default configuration file
    ///
    /// Writes to `path`, or the user config location when `None`. An
    /// existing file is only replaced when `force` is set.
    pub async fn write_default_config(path: Option<PathBuf>, force: bool) -> ConfigResult<PathBuf> {
        let path = match path.or_else(Self::default_config_path) {
            Some(path) => path,
            None => {
                return Err(ConfigError::InvalidValue {
                    field: "config path".to_string(),
                    value: String::new(),
                    reason: "could not determine user config directory".to_string(),
                })
            }
        };

        if path.exists() && !force {
            return Err(ConfigError::InvalidValue {
                field: "config path".to_string(),
                value: path.display().to_string(),
                reason: "file exists; use --force to overwrite".to_string(),
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, Self::generate_default_config_content()).await?;

        info!("Wrote default configuration to {}", path.display());
        Ok(path)
    }

    /// Generate default configuration content with helpful comments
    pub fn generate_default_config_content() -> String {
        let delete_phases: String = ConsistencyPolicy::default()
            .phases
            .iter()
            .map(|phase| {
                format!(
                    "\n[[store.delete_phases]]\nchecks = {}\ninterval = \"{}\"\n",
                    phase.checks,
                    humantime::format_duration(phase.interval)
                )
            })
            .collect();

        format!(
            r#"# stage-cache configuration
# Environment variables {size_env}, {dir_env} and {endpoint_env}
# override the values below.

[cache]
# Base directory for staging roots (default: {default_dir})
# dir = "/var/tmp/stage-cache"

[cache.size]
# Maximum number of resources staged at once
elements = {elements}

[store]
# Path-style object store endpoint: objects live at <endpoint>/<bucket>/<key>
endpoint = "{endpoint}"
request_timeout = "{request_timeout}"
connect_timeout = "{connect_timeout}"
pool_max_per_host = {pool}
rate_limit_rps = {rps}

# After a delete, poll until the store stops reporting the object
{delete_phases}
[logging]
level = "{level}"  # error, warn, info, debug, trace
"#,
            size_env = env::CACHE_SIZE_ELEMENTS,
            dir_env = env::CACHE_DIR,
            endpoint_env = env::STORE_ENDPOINT,
            default_dir = default_base_dir().display(),
            elements = cache::DEFAULT_MAX_ELEMENTS,
            endpoint = http::DEFAULT_ENDPOINT,
            request_timeout = humantime::format_duration(http::DEFAULT_TIMEOUT),
            connect_timeout = humantime::format_duration(http::CONNECT_TIMEOUT),
            pool = http::POOL_MAX_PER_HOST,
            rps = limits::DEFAULT_RATE_LIMIT_RPS,
            delete_phases = delete_phases.trim_start(),
            level = logging::DEFAULT_LOG_LEVEL,
        )
    }
}

impl CacheConfigToml {
    /// Convert to runtime CacheConfig
    pub fn to_runtime_config(&self) -> CacheConfig {
        CacheConfig {
            base_dir: self.dir.clone().unwrap_or_else(default_base_dir),
            max_elements: self.size.elements,
        }
    }
}

impl StoreConfigToml {
    /// Convert to runtime StoreConfig
    pub fn to_runtime_config(&self) -> StoreConfig {
        StoreConfig {
            endpoint: self.endpoint.clone(),
            pool_max_per_host: self.pool_max_per_host,
            request_timeout: self.request_timeout,
            connect_timeout: self.connect_timeout,
            rate_limit_rps: self.rate_limit_rps,
            ..StoreConfig::default()
        }
    }

    /// Polling schedule for consistent deletes
    pub fn consistency_policy(&self) -> ConsistencyPolicy {
        ConsistencyPolicy {
            phases: self.delete_phases.clone(),
        }
    }
}
