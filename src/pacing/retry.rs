//! WAF-aware retry with exponential backoff.
//!
//! The upstream's firewall answers rate-limited requests with an HTML
//! challenge page and HTTP 200, so outcomes are classified by the *shape* of
//! the response rather than by status code. Each endpoint supplies a
//! [`ResponseShape`] describing what a good answer looks like:
//!
//! - [`Classification::Success`] - the payload matched the expected shape
//! - [`Classification::SoftBlock`] - anything else the firewall might send;
//!   retried with backoff
//! - [`Classification::Rejected`] - a well-formed error the upstream means,
//!   such as 404; never retried
//!
//! # Delay Calculation
//!
//! ```text
//! wait = max(base_delay * 2^retry_index, Retry-After) * uniform(0.5, 1.5)
//! ```
//!
//! Every outcome is fed back into the run-wide [`AdaptiveDelay`], so a burst
//! of blocks slows the whole run down, not just the current retry loop.

use std::future::Future;
use std::marker::PhantomData;
use std::time::Duration;

use rand::Rng;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::adaptive::AdaptiveDelay;
use super::retry_after::parse_retry_after;
use crate::api::{ApiResponse, TransportError};
use crate::error::SyncError;

/// Maximum upstream calls per logical request.
pub const MAX_RETRIES: u32 = 5;

/// Default base delay for exponential backoff (3 seconds).
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(3);

/// Default fractional jitter applied to backoff waits (±50%).
const DEFAULT_JITTER: f64 = 0.5;

/// Largest exponent used for backoff growth.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Outcome of inspecting one upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification<T> {
    /// Content of the expected shape.
    Success(T),
    /// Nominally successful but semantically a rate-limit rejection.
    SoftBlock {
        /// Why the response was not accepted.
        reason: String,
    },
    /// A genuine upstream error that retrying will not fix.
    Rejected {
        /// HTTP status code.
        status: u16,
    },
}

/// Describes what a good response looks like for one endpoint.
pub trait ResponseShape {
    /// Decoded value produced on success.
    type Output;

    /// Classifies a raw response.
    fn classify(&self, response: &ApiResponse) -> Classification<Self::Output>;
}

/// Shape for JSON endpoints decoding into `T`.
///
/// # Classification
///
/// | Response | Result |
/// |----------|--------|
/// | HTML content type or HTML body, any status | `SoftBlock` |
/// | JSON with 408, 429, or 5xx | `SoftBlock` |
/// | JSON with other 4xx | `Rejected` |
/// | Body that does not decode into `T` | `SoftBlock` |
/// | Body that decodes into `T` | `Success` |
#[derive(Debug)]
pub struct JsonShape<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonShape<T> {
    /// Creates the shape.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonShape<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> ResponseShape for JsonShape<T> {
    type Output = T;

    fn classify(&self, response: &ApiResponse) -> Classification<T> {
        if response.is_html_content_type() || response.body_looks_like_html() {
            return Classification::SoftBlock {
                reason: format!("HTML challenge page (HTTP {})", response.status),
            };
        }

        match response.status {
            408 | 429 | 500..=599 => {
                return Classification::SoftBlock {
                    reason: format!("HTTP {}", response.status),
                };
            }
            status @ 400..=499 => return Classification::Rejected { status },
            _ => {}
        }

        match serde_json::from_slice::<T>(&response.body) {
            Ok(value) => Classification::Success(value),
            Err(error) => Classification::SoftBlock {
                reason: format!("payload shape mismatch: {error}"),
            },
        }
    }
}

/// Per-call retry state. Scoped to one logical request, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    /// Upstream calls made so far.
    pub attempt: u32,
    /// Most recent `Retry-After` hint.
    pub last_retry_after: Option<Duration>,
    /// Total time slept between attempts.
    pub total_waited: Duration,
}

/// Backoff settings.
///
/// # Default Values
///
/// - `max_attempts`: [`MAX_RETRIES`] (5)
/// - `base_delay`: 3 seconds
/// - `jitter`: ±50%
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_RETRIES,
            base_delay: DEFAULT_RETRY_BASE_DELAY,
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy; `max_attempts` is at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Overrides the jitter fraction (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns a copy whose base delay is multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            base_delay: self.base_delay.saturating_mul(factor),
            ..self.clone()
        }
    }

    /// Maximum upstream calls per logical request.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Base delay of the backoff curve.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Computes the wait before the next attempt, before jitter.
    ///
    /// `retry_index` is 0 for the wait after the first failed call.
    #[must_use]
    pub fn backoff_delay(&self, retry_index: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << retry_index.min(MAX_BACKOFF_EXPONENT));
        retry_after.map_or(exponential, |hint| exponential.max(hint))
    }

    /// Applies a fresh jitter factor from `[1 - jitter, 1 + jitter]`.
    #[must_use]
    pub fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        delay.mul_f64(factor)
    }
}

/// Runs single upstream calls under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Creates an executor.
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Returns the policy in use.
    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns an executor whose base delay is multiplied by `factor`.
    #[must_use]
    pub fn scaled(&self, factor: u32) -> Self {
        Self::new(self.policy.scaled(factor))
    }

    /// Performs `make_request` until `shape` accepts the response.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Transport`] immediately on a connection-level failure
    /// - [`SyncError::Rejected`] immediately on a non-retryable upstream error
    /// - [`SyncError::RateLimitExceeded`] once `max_attempts` calls were soft-blocked
    #[instrument(level = "debug", skip(self, pacing, shape, make_request), fields(max_attempts = self.policy.max_attempts))]
    pub async fn execute<S, F, Fut>(
        &self,
        pacing: &mut AdaptiveDelay,
        endpoint: &str,
        shape: &S,
        mut make_request: F,
    ) -> Result<S::Output, SyncError>
    where
        S: ResponseShape,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<ApiResponse, TransportError>>,
    {
        let mut context = RetryContext::default();

        loop {
            context.attempt += 1;

            let response = match make_request().await {
                Ok(response) => response,
                Err(error) => {
                    pacing.record_failure();
                    warn!(endpoint, attempt = context.attempt, error = %error, "transport failure");
                    return Err(error.into());
                }
            };

            match shape.classify(&response) {
                Classification::Success(value) => {
                    pacing.record_success();
                    if context.attempt > 1 {
                        info!(
                            endpoint,
                            attempts = context.attempt,
                            waited_secs = context.total_waited.as_secs(),
                            "recovered after soft block"
                        );
                    }
                    return Ok(value);
                }
                Classification::Rejected { status } => {
                    debug!(endpoint, status, "upstream rejected request");
                    return Err(SyncError::Rejected {
                        endpoint: endpoint.to_string(),
                        status,
                    });
                }
                Classification::SoftBlock { reason } => {
                    pacing.record_failure();
                    context.last_retry_after = response
                        .retry_after
                        .as_deref()
                        .and_then(parse_retry_after);

                    if context.attempt >= self.policy.max_attempts {
                        warn!(
                            endpoint,
                            attempts = context.attempt,
                            reason = %reason,
                            "retry budget exhausted"
                        );
                        return Err(SyncError::RateLimitExceeded {
                            endpoint: endpoint.to_string(),
                            attempts: context.attempt,
                            waited: context.total_waited,
                        });
                    }

                    let delay = self.policy.jittered(
                        self.policy
                            .backoff_delay(context.attempt - 1, context.last_retry_after),
                    );
                    warn!(
                        endpoint,
                        attempt = context.attempt,
                        reason = %reason,
                        retry_after_secs = context.last_retry_after.map(|d| d.as_secs()),
                        delay_ms = delay.as_millis(),
                        "soft block, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    context.total_waited += delay;
                }
            }
        }
    }
}
