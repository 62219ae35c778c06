//! Rate-limited provider client
//!
//! Wraps every outbound call to one provider with:
//! - a minimum delay between calls, shared by all workers using this instance
//! - a random jitter before each call
//! - bounded retries with random backoff for retryable [`ProviderError`]s,
//!   driven by `tokio_retry::RetryIf`
//!
//! Whatever happens, the caller gets `Ok(value)` or `Err(FailureReason)`.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;

use rand::RngExt;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tokio_retry::RetryIf;
use tokio_retry::strategy::{FixedInterval, jitter};
use tracing::{debug, instrument, warn};

use crate::config::PacingConfig;
use crate::error::{FailureReason, ProviderError};

/// Spacing of outbound calls
#[derive(Debug, Clone)]
pub struct Pacing {
    pub min_delay: Duration,
    /// Milliseconds of random delay before each call
    pub jitter_ms: RangeInclusive<u64>,
}

impl Pacing {
    /// No delay and no jitter
    #[must_use]
    pub fn none() -> Self {
        Self {
            min_delay: Duration::ZERO,
            jitter_ms: 0..=0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    /// Milliseconds of random delay between attempts
    pub backoff_ms: RangeInclusive<u64>,
}

impl RetryPolicy {
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            backoff_ms: 0..=0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_ms: 500..=1500,
        }
    }
}

/// One provider's pacing state plus its retry policy.
///
/// Owned by the engine and shared by reference with every worker.
#[derive(Debug)]
pub struct RateLimitedClient {
    provider: String,
    pacing: Pacing,
    retry: RetryPolicy,
    /// Last outbound call time for this provider instance
    last_call: Mutex<Option<Instant>>,
}

fn random_delay(range: &RangeInclusive<u64>) -> Duration {
    let (low, high) = (*range.start(), *range.end());
    if low >= high {
        return Duration::from_millis(low);
    }
    Duration::from_millis(rand::rng().random_range(low..=high))
}

impl RateLimitedClient {
    #[must_use]
    pub fn new(provider: impl Into<String>, pacing: Pacing, retry: RetryPolicy) -> Self {
        Self {
            provider: provider.into(),
            pacing,
            retry,
            last_call: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn from_config(provider: impl Into<String>, config: &PacingConfig) -> Self {
        Self::new(
            provider,
            Pacing {
                min_delay: config.min_delay(),
                jitter_ms: config.jitter_min_ms..=config.jitter_max_ms,
            },
            RetryPolicy {
                max_retries: config.max_retries,
                backoff_ms: config.backoff_min_ms..=config.backoff_max_ms,
            },
        )
    }

    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Run `attempt` until it succeeds, fails permanently or the retry budget is spent
    #[instrument(name = "provider_call", level = "debug", skip_all, fields(provider = %self.provider))]
    pub async fn execute<T, F, Fut>(&self, mut attempt: F) -> Result<T, FailureReason>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts = 0u32;
        let action = || {
            attempts += 1;
            let call = attempt();
            async move {
                self.pace().await;
                call.await
            }
        };
        let retryable = |err: &ProviderError| {
            let retry = err.is_retryable();
            if retry {
                debug!(error = %err, "Retryable provider failure");
            }
            retry
        };

        let outcome = RetryIf::spawn(self.backoff(), action, retryable).await;
        match outcome {
            Ok(value) => {
                debug!(attempts, "Provider call succeeded");
                Ok(value)
            }
            Err(err) if err.is_retryable() => {
                warn!(attempts, error = %err, "Giving up after retries");
                Err(FailureReason::RetriesExhausted {
                    attempts,
                    last_error: err.to_string(),
                })
            }
            Err(err) => {
                debug!(attempts, error = %err, "Permanent provider failure");
                Err(match err {
                    ProviderError::NoData => FailureReason::NoData,
                    ProviderError::Unavailable(detail) => FailureReason::ProviderUnavailable(detail),
                    other => FailureReason::Rejected(other.to_string()),
                })
            }
        }
    }

    /// Delays between attempts: uniform over the backoff range, one per retry
    fn backoff(&self) -> impl Iterator<Item = Duration> + use<> {
        let low = *self.retry.backoff_ms.start();
        let spread = self.retry.backoff_ms.end().saturating_sub(low);
        FixedInterval::from_millis(spread)
            .map(jitter)
            .map(move |delay| delay + Duration::from_millis(low))
            .take(self.retry.max_retries as usize)
    }

    /// Jitter, then wait out the minimum delay since the previous call
    async fn pace(&self) {
        let jitter = random_delay(&self.pacing.jitter_ms);
        if !jitter.is_zero() {
            sleep(jitter).await;
        }

        // The lock is held while waiting so two workers cannot both pass the check.
        let mut last = self.last_call.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.pacing.min_delay {
                sleep(self.pacing.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Read a provider response as JSON, classifying every way it can go wrong
pub(crate) async fn json_body<T: DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(ProviderError::from_status(status, &body));
    }
    if body.trim().is_empty() {
        return Err(ProviderError::Transient("empty response body".into()));
    }
    serde_json::from_str(&body)
        .map_err(|e| ProviderError::Transient(format!("malformed response body: {e}")))
}
