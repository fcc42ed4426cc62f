//! # Conflict Retry
//!
//! Re-runs a read-modify-write when another writer bumped the profile
//! version first. Every attempt re-reads the profile, so the retried write
//! sees the winner's result.
//!
//! ```text
//! attempt 1: read v3 ─► compute ─► write WHERE version = 3 ─► VersionConflict
//!                                         (sleep 10ms, jittered)
//! attempt 2: read v4 ─► compute ─► write WHERE version = 4 ─► ok
//! ```

use backoff::future::retry;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::CycleSettings;
use crate::error::{BillingError, BillingResult};

/// Backoff timings for conflict retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::from(&CycleSettings::default())
    }
}

impl From<&CycleSettings> for RetryPolicy {
    fn from(settings: &CycleSettings) -> Self {
        RetryPolicy {
            initial: Duration::from_millis(settings.retry_initial_ms),
            max_interval: Duration::from_millis(settings.retry_max_ms),
            max_elapsed: Duration::from_millis(settings.retry_max_elapsed_ms),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial,
            current_interval: self.initial,
            max_interval: self.max_interval,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-conflict error, or the
/// retry budget runs out.
///
/// Exhausted retries surface as [`BillingError::Conflict`].
pub async fn with_conflict_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> BillingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BillingResult<T>>,
{
    let mut attempts: u32 = 0;

    let result = retry(policy.backoff(), || {
        attempts += 1;
        let fut = op();
        async move {
            fut.await.map_err(|e| match e {
                BillingError::Database(ref db) if db.is_conflict() => {
                    debug!(operation, error = %e, "Write lost a race, retrying");
                    backoff::Error::transient(e)
                }
                other => backoff::Error::permanent(other),
            })
        }
    })
    .await;

    result.map_err(|e| match e {
        BillingError::Database(ref db) if db.is_conflict() => BillingError::Conflict(format!(
            "{} still conflicting after {} attempts: {}",
            operation, attempts, db
        )),
        other => other,
    })
}
