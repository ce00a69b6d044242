//! Delete with bounded polling for eventually-consistent stores
//!
//! A successful delete request does not mean the object is gone: listing and
//! existence checks may keep returning it for a while. [`delete_consistent`]
//! issues the delete and then polls existence in phases of increasing
//! interval until the object disappears or the phases are exhausted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::app::resource::ObjectLocation;
use crate::constants::consistency;
use crate::errors::{StoreError, StoreResult};

use super::ObjectStore;

/// One polling phase: up to `checks` existence checks, `interval` apart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitPhase {
    pub checks: u32,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

/// Polling schedule used after a delete request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyPolicy {
    pub phases: Vec<WaitPhase>,
}

impl Default for ConsistencyPolicy {
    fn default() -> Self {
        Self {
            phases: consistency::WAIT_PHASES
                .iter()
                .map(|&(checks, secs)| WaitPhase {
                    checks,
                    interval: Duration::from_secs(secs),
                })
                .collect(),
        }
    }
}

impl ConsistencyPolicy {
    /// Longest time the policy can wait after the delete request
    pub fn max_wait(&self) -> Duration {
        self.phases
            .iter()
            .map(|phase| phase.interval * phase.checks)
            .sum()
    }
}

/// What happened during a consistent delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteReport {
    /// Whether the object existed when the delete started
    pub existed: bool,
    /// Polling checks performed after the immediate check
    pub polls: u32,
    /// Zero-based phase in which the object disappeared; `None` if no
    /// polling was needed
    pub final_phase: Option<usize>,
    /// Total time spent sleeping between checks
    pub waited: Duration,
}

/// Delete `location` and wait until the store stops reporting it
///
/// # Errors
///
/// Returns `StoreError::DeleteConsistencyTimeout` if the object is still
/// visible after every phase, or any error from the store itself.
pub async fn delete_consistent(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    policy: &ConsistencyPolicy,
) -> StoreResult<DeleteReport> {
    let mut report = DeleteReport {
        existed: false,
        polls: 0,
        final_phase: None,
        waited: Duration::ZERO,
    };

    if !store.exists(location).await? {
        info!("{} does not exist, nothing to delete", location);
        return Ok(report);
    }
    report.existed = true;

    store.delete(location).await?;

    if !store.exists(location).await? {
        debug!("{} deleted", location);
        return Ok(report);
    }

    for (phase, wait) in policy.phases.iter().enumerate() {
        if phase > 0 {
            warn!(
                "{} still visible after {:?}; polling every {:?}",
                location, report.waited, wait.interval
            );
        }

        for _ in 0..wait.checks {
            tokio::time::sleep(wait.interval).await;
            report.waited += wait.interval;
            report.polls += 1;

            if !store.exists(location).await? {
                info!(
                    "{} deleted after {} polls ({:?})",
                    location, report.polls, report.waited
                );
                report.final_phase = Some(phase);
                return Ok(report);
            }
        }
    }

    Err(StoreError::DeleteConsistencyTimeout {
        location: location.to_string(),
        waited_secs: report.waited.as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::store::InMemoryObjectStore;

    #[test]
    fn test_default_policy() {
        let policy = ConsistencyPolicy::default();
        assert_eq!(policy.phases.len(), 3);
        assert_eq!(policy.phases[1].checks, 120);
        assert_eq!(policy.phases[1].interval, Duration::from_secs(2));
        assert_eq!(policy.max_wait(), Duration::from_secs(60 + 240 + 900));
    }

    #[tokio::test]
    async fn test_absent_object_succeeds_without_delete() {
        let store = InMemoryObjectStore::new();
        let report = delete_consistent(
            &store,
            &ObjectLocation::new("bucket", "missing"),
            &ConsistencyPolicy::default(),
        )
        .await
        .unwrap();

        assert!(!report.existed);
        assert_eq!(report.polls, 0);
    }

    #[tokio::test]
    async fn test_immediately_consistent_delete() {
        let store = InMemoryObjectStore::new();
        let location = ObjectLocation::new("bucket", "a/index");
        store.put(location.clone(), b"i".to_vec()).await;

        let report = delete_consistent(&store, &location, &ConsistencyPolicy::default())
            .await
            .unwrap();

        assert!(report.existed);
        assert_eq!(report.polls, 0);
        assert_eq!(report.final_phase, None);
        assert_eq!(report.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_phases_time_out() {
        let store = InMemoryObjectStore::new().with_delete_visibility_lag(u32::MAX);
        let location = ObjectLocation::new("bucket", "a/data");
        store.put(location.clone(), b"d".to_vec()).await;

        let policy = ConsistencyPolicy {
            phases: vec![
                WaitPhase {
                    checks: 3,
                    interval: Duration::from_secs(1),
                },
                WaitPhase {
                    checks: 2,
                    interval: Duration::from_secs(5),
                },
            ],
        };

        let result = delete_consistent(&store, &location, &policy).await;
        assert!(matches!(
            result,
            Err(StoreError::DeleteConsistencyTimeout { waited_secs: 13, .. })
        ));
    }
}
