//! HTTP object store client configuration and building logic

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{http, limits};
use crate::errors::{StoreError, StoreResult};

/// Configuration for the HTTP object store client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base URL objects are addressed under, path style
    pub endpoint: String,
    /// TCP keep-alive settings
    pub tcp_keepalive: Option<Duration>,
    /// TCP nodelay (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
    /// Connection pool idle timeout
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum number of connections per host
    pub pool_max_per_host: usize,
    /// Request timeout
    pub request_timeout: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
    /// Rate limit (requests per second)
    pub rate_limit_rps: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: http::DEFAULT_ENDPOINT.to_string(),
            tcp_keepalive: Some(Duration::from_secs(30)),
            tcp_nodelay: true,
            pool_idle_timeout: Some(http::POOL_IDLE_TIMEOUT),
            pool_max_per_host: http::POOL_MAX_PER_HOST,
            request_timeout: http::DEFAULT_TIMEOUT,
            connect_timeout: http::CONNECT_TIMEOUT,
            rate_limit_rps: limits::DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

impl StoreConfig {
    /// Create a configuration for the given endpoint with default settings
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Parse the endpoint, ensuring it ends with `/` so that joins append
    pub fn endpoint_url(&self) -> StoreResult<Url> {
        let mut endpoint = self.endpoint.clone();
        if !endpoint.ends_with('/') {
            endpoint.push('/');
        }
        let url = Url::parse(&endpoint).map_err(|e| StoreError::InvalidConfig {
            reason: format!("endpoint '{}': {}", self.endpoint, e),
        })?;
        if url.cannot_be_a_base() {
            return Err(StoreError::InvalidConfig {
                reason: format!("endpoint '{}' cannot be a base URL", self.endpoint),
            });
        }
        Ok(url)
    }

    /// Builds the HTTP client with the specified configuration
    pub fn build_http_client(&self) -> StoreResult<Client> {
        let mut client_builder = Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .user_agent(http::USER_AGENT)
            .tcp_nodelay(self.tcp_nodelay)
            .pool_max_idle_per_host(self.pool_max_per_host);

        if let Some(keepalive) = self.tcp_keepalive {
            client_builder = client_builder.tcp_keepalive(keepalive);
        }

        if let Some(idle_timeout) = self.pool_idle_timeout {
            client_builder = client_builder.pool_idle_timeout(idle_timeout);
        }

        client_builder.build().map_err(StoreError::Http)
    }
}
