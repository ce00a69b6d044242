//! Path-style HTTP object store client
//!
//! Objects are addressed as `{endpoint}/{bucket}/{key}`. Every request goes
//! through a rate limiter and is retried with exponential backoff on 429,
//! 503 and transport errors. Fetched objects are streamed into a temporary
//! file and renamed into place once complete.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::{Client, Method, Response, StatusCode};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use url::Url;

use crate::app::resource::ObjectLocation;
use crate::constants::{files, limits};
use crate::errors::{StoreError, StoreResult};

use super::config::StoreConfig;
use super::ObjectStore;

type DirectRateLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP object store with rate limiting and retries
#[derive(Debug)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: Url,
    rate_limiter: DirectRateLimiter,
}

impl HttpObjectStore {
    /// Creates a store from its configuration
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidConfig` if the endpoint cannot be parsed
    /// or the rate limit is zero.
    pub fn new(config: &StoreConfig) -> StoreResult<Self> {
        let client = config.build_http_client()?;
        let endpoint = config.endpoint_url()?;
        let rate_limiter = Self::build_rate_limiter(config.rate_limit_rps)?;
        tracing::debug!("Created HTTP object store for {}", endpoint);
        Ok(Self {
            client,
            endpoint,
            rate_limiter,
        })
    }

    fn build_rate_limiter(rate_limit_rps: u32) -> StoreResult<DirectRateLimiter> {
        let quota = Quota::per_second(NonZeroU32::new(rate_limit_rps).ok_or_else(|| {
            StoreError::InvalidConfig {
                reason: "Rate limit must be non-zero".to_string(),
            }
        })?);
        Ok(RateLimiter::direct(quota))
    }

    /// Endpoint objects are addressed under
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// URL of an object, path style
    pub fn object_url(&self, location: &ObjectLocation) -> StoreResult<Url> {
        if location.bucket.is_empty() || location.key.is_empty() {
            return Err(StoreError::InvalidLocation {
                location: location.to_string(),
                reason: "bucket and key must be non-empty".to_string(),
            });
        }
        self.endpoint
            .join(&format!("{}/{}", location.bucket, location.key))
            .map_err(|e| StoreError::InvalidLocation {
                location: location.to_string(),
                reason: e.to_string(),
            })
    }

    fn backoff(retries: u32) -> Duration {
        Duration::from_millis(limits::RETRY_BASE_DELAY_MS * 2_u64.pow(retries))
    }

    /// Sends a request with rate limiting and retry logic
    async fn send(&self, method: Method, url: &Url) -> StoreResult<Response> {
        // Apply rate limiting with jitter to avoid thundering herd
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let mut retries = 0;
        loop {
            match self.client.request(method.clone(), url.clone()).send().await {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;

                    if retryable && retries < limits::MAX_RETRIES {
                        retries += 1;
                        let delay = Self::backoff(retries);
                        tracing::warn!(
                            "{} {} returned {}. Backing off for {}ms",
                            method,
                            url,
                            status,
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(StoreError::RateLimitExceeded);
                    }
                    if status == StatusCode::SERVICE_UNAVAILABLE {
                        return Err(StoreError::ServerOverloaded);
                    }

                    tracing::debug!("{} {} -> {}", method, url, status);
                    return Ok(response);
                }
                Err(e) if retries < limits::MAX_RETRIES => {
                    retries += 1;
                    let delay = Self::backoff(retries);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {}ms",
                        retries,
                        limits::MAX_RETRIES,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        "Request failed after {} retries: {}",
                        limits::MAX_RETRIES,
                        e
                    );
                    return Err(StoreError::MaxRetriesExceeded {
                        max_retries: limits::MAX_RETRIES,
                        location: url.to_string(),
                    });
                }
            }
        }
    }

    /// Streams one GET attempt into `temp_path`
    async fn fetch_attempt(
        &self,
        url: &Url,
        location: &ObjectLocation,
        temp_path: &Path,
    ) -> StoreResult<u64> {
        let mut response = self.send(Method::GET, url).await?;
        check_status(response.status(), location)?;

        let mut file = File::create(temp_path).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

fn check_status(status: StatusCode, location: &ObjectLocation) -> StoreResult<()> {
    if status.is_success() {
        return Ok(());
    }
    let location = location.to_string();
    Err(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound { location },
        StatusCode::FORBIDDEN => StoreError::Forbidden { location },
        status => StoreError::ServerError {
            status: status.as_u16(),
            location,
        },
    })
}

/// `dest` with the temporary suffix appended to its full file name
fn temp_path_for(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(files::TEMP_FILE_SUFFIX);
    destination.with_file_name(name)
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch_to(&self, location: &ObjectLocation, destination: &Path) -> StoreResult<u64> {
        let url = self.object_url(location)?;

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp_path = temp_path_for(destination);

        let mut retries = 0;
        loop {
            match self.fetch_attempt(&url, location, &temp_path).await {
                Ok(bytes) => {
                    tokio::fs::rename(&temp_path, destination).await?;
                    tracing::debug!(
                        "Fetched {} ({} bytes) to {}",
                        location,
                        bytes,
                        destination.display()
                    );
                    return Ok(bytes);
                }
                // Body interrupted mid-stream
                Err(StoreError::Http(e)) if retries < limits::MAX_RETRIES => {
                    retries += 1;
                    let delay = Self::backoff(retries);
                    tracing::warn!(
                        "Fetch of {} failed (attempt {}/{}): {}. Retrying in {}ms",
                        location,
                        retries,
                        limits::MAX_RETRIES,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    if temp_path.exists() {
                        let _ = tokio::fs::remove_file(&temp_path).await;
                    }
                    return Err(e);
                }
            }
        }
    }

    async fn exists(&self, location: &ObjectLocation) -> StoreResult<bool> {
        let url = self.object_url(location)?;
        let response = self.send(Method::HEAD, &url).await?;
        match check_status(response.status(), location) {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn delete(&self, location: &ObjectLocation) -> StoreResult<()> {
        let url = self.object_url(location)?;
        let response = self.send(Method::DELETE, &url).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            tracing::debug!("Delete request for {} accepted ({})", location, status);
            Ok(())
        } else {
            tracing::warn!("Delete request for {} refused ({})", location, status);
            Err(StoreError::DeleteFailed {
                location: location.to_string(),
            })
        }
    }
}
