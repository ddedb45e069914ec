//! Batched, rate-limit aware price fetching
//!
//! Keys are fetched in fixed-size batches. Within a batch every key runs
//! concurrently with its own timeout and linear backoff; between batches
//! the fetcher pauses to stay under the upstream's request rate. One
//! key's failure never affects another key.

use super::source::PriceSource;
use crate::config::PricingConfig;
use crate::error::FetchError;

use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Keys in flight at once
    pub batch_size: usize,
    /// Per-attempt timeout
    pub request_timeout: Duration,
    /// Attempts per key, including the first
    pub max_attempts: u32,
    /// Backoff unit: after failed attempt n, wait n × base_delay
    pub base_delay: Duration,
    /// Pause between consecutive batches
    pub batch_delay: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 2,
            request_timeout: Duration::from_secs(15),
            max_attempts: 3,
            base_delay: Duration::from_millis(2000),
            batch_delay: Duration::from_millis(1000),
        }
    }
}

impl From<&PricingConfig> for FetchPolicy {
    fn from(config: &PricingConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            request_timeout: config.request_timeout(),
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            batch_delay: config.batch_delay(),
        }
    }
}

impl FetchPolicy {
    fn backoff(&self, failed_attempt: u32) -> Duration {
        self.base_delay * failed_attempt
    }
}

/// Merged outcome of `fetch_all`. Failed keys are absent from `values`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchReport {
    /// Resolved keys; `None` when the upstream had no quote
    pub values: HashMap<String, Option<f64>>,
    /// Why each unresolved key failed, for logging
    pub failures: HashMap<String, FetchError>,
}

impl FetchReport {
    pub fn all_failed(&self) -> bool {
        self.values.is_empty() && !self.failures.is_empty()
    }
}

pub struct BatchedRetryingFetcher<Q: ?Sized> {
    source: Arc<Q>,
    policy: FetchPolicy,
}

impl<Q: PriceSource + ?Sized> BatchedRetryingFetcher<Q> {
    pub fn new(source: Arc<Q>, mut policy: FetchPolicy) -> Self {
        policy.batch_size = policy.batch_size.max(1);
        policy.max_attempts = policy.max_attempts.max(1);
        Self { source, policy }
    }

    /// Fetch every key. Never fails as a whole.
    pub async fn fetch_all(&self, keys: &[String]) -> FetchReport {
        let mut seen = HashSet::new();
        let keys: Vec<&String> = keys.iter().filter(|k| seen.insert(k.as_str())).collect();

        let mut report = FetchReport::default();
        let batch_count = keys.len().div_ceil(self.policy.batch_size);

        for (index, batch) in keys.chunks(self.policy.batch_size).enumerate() {
            if index > 0 {
                sleep(self.policy.batch_delay).await;
            }

            debug!(batch = index + 1, of = batch_count, keys = batch.len(), "Fetching batch");

            let outcomes = join_all(batch.iter().map(|key| async move {
                let outcome = self.fetch_with_retry(key).await;
                ((*key).clone(), outcome)
            }))
            .await;

            for (key, outcome) in outcomes {
                match outcome {
                    Ok(value) => {
                        crate::metrics::record_fetch_key("resolved");
                        report.values.insert(key, value);
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "Price unavailable");
                        crate::metrics::record_fetch_key("failed");
                        report.failures.insert(key, e);
                    }
                }
            }
        }

        info!(
            requested = keys.len(),
            resolved = report.values.len(),
            failed = report.failures.len(),
            "Batch fetch complete"
        );
        report
    }

    /// Single-key path: no batching, error returned directly
    pub async fn fetch_one(&self, key: &str) -> Result<Option<f64>, FetchError> {
        let outcome = self.fetch_with_retry(key).await;
        crate::metrics::record_fetch_key(if outcome.is_ok() { "resolved" } else { "failed" });
        outcome
    }

    async fn fetch_with_retry(&self, key: &str) -> Result<Option<f64>, FetchError> {
        let mut attempt = 1;

        loop {
            let outcome = match timeout(self.policy.request_timeout, self.source.price(key)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FetchError::Timeout(self.policy.request_timeout)),
            };

            match outcome {
                Ok(value) => {
                    crate::metrics::record_fetch_attempt("success");
                    if attempt > 1 {
                        debug!(%key, attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_attempts => {
                    crate::metrics::record_fetch_attempt("retry");
                    let delay = self.policy.backoff(attempt);
                    debug!(
                        %key,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retryable fetch failure, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    crate::metrics::record_fetch_attempt("failed");
                    if e.is_retryable() {
                        debug!(%key, attempts = attempt, "Retry budget exhausted");
                    }
                    return Err(e);
                }
            }
        }
    }
}
