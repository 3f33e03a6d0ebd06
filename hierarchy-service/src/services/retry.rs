//! Bounded retry of operations that lost a concurrency race.

use backoff::future::retry_notify;
use backoff::ExponentialBackoff;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::error::HierarchyError;
use super::metrics::RETRIES_TOTAL;

#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f64,
    pub add_jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    pub fn no_retry() -> Self {
        Self::with_max_retries(0)
    }

    /// Immediate retries, for tests.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Interval schedule; the retry count is bounded separately.
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            // up to 25% either way
            randomization_factor: if self.add_jitter { 0.25 } else { 0.0 },
            multiplier: self.backoff_multiplier,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }
}

/// Runs `f` until it succeeds, fails with anything but a concurrent
/// modification, or `policy.max_retries` retries are used up.
pub async fn retry_on_conflict<F, Fut, T>(
    policy: &RetryPolicy,
    operation: &str,
    mut f: F,
) -> Result<T, HierarchyError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HierarchyError>>,
{
    let attempts = AtomicU32::new(0);

    let result = retry_notify(
        policy.backoff(),
        || {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            let pending = f();
            async move {
                pending.await.map_err(|err| match err {
                    HierarchyError::ConcurrentModification(_) if attempt < policy.max_retries => {
                        backoff::Error::transient(err)
                    }
                    err => backoff::Error::permanent(err),
                })
            }
        },
        |err: HierarchyError, wait: Duration| {
            RETRIES_TOTAL.with_label_values(&[operation]).inc();
            warn!(
                operation,
                attempt = attempts.load(Ordering::Relaxed),
                detail = %err,
                backoff_ms = wait.as_millis() as u64,
                "Concurrent modification, retrying after backoff"
            );
        },
    )
    .await;

    let attempts = attempts.load(Ordering::Relaxed);
    match &result {
        Ok(_) if attempts > 1 => {
            info!(operation, attempt = attempts, "Succeeded after retry");
        }
        Err(HierarchyError::ConcurrentModification(_)) => {
            warn!(
                operation,
                attempt = attempts,
                "Concurrent modification persisted after max retries"
            );
        }
        _ => {}
    }
    result
}
