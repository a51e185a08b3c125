//! Adaptive request pacing.
//!
//! [`AdaptiveDelay`] holds the delay applied between upstream requests and
//! moves it in response to per-request outcomes: every success shaves 10% off,
//! every failure doubles it. Both moves are clamped to `[min_delay, max_delay]`.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use articlesync_core::pacing::AdaptiveDelay;
//!
//! let mut pacing = AdaptiveDelay::new(
//!     Duration::from_secs(9),
//!     Duration::from_secs(3),
//!     Duration::from_secs(120),
//! );
//! pacing.record_failure();
//! assert_eq!(pacing.current_delay(), Duration::from_secs(18));
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{debug, trace};

/// Multiplier applied to the delay after a successful request.
const SUCCESS_FACTOR: f64 = 0.9;

/// Multiplier applied to the delay after a failed or blocked request.
const FAILURE_FACTOR: f64 = 2.0;

/// Fractional jitter applied by [`AdaptiveDelay::wait`] (0.5 means ±50%).
pub const DEFAULT_JITTER: f64 = 0.5;

/// Self-adjusting delay between upstream requests.
///
/// The controller is owned by the sync engine for the length of one run and
/// lent (`&mut`) to every retry sequence, so global pacing reacts to outcomes
/// anywhere in the run. Nothing is persisted; each process starts at the
/// configured base.
#[derive(Debug, Clone)]
pub struct AdaptiveDelay {
    /// Current nominal delay in seconds.
    current: f64,
    /// Lower bound in seconds.
    min_delay: f64,
    /// Upper bound in seconds.
    max_delay: f64,
    /// Jitter fraction re-sampled on every wait.
    jitter: f64,
}

impl AdaptiveDelay {
    /// Creates a controller starting at `base`, clamped into `[min_delay, max_delay]`.
    ///
    /// If `min_delay > max_delay` the bounds are swapped.
    #[must_use]
    pub fn new(base: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        let (low, high) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        let min_delay = low.as_secs_f64();
        let max_delay = high.as_secs_f64();
        Self {
            current: base.as_secs_f64().clamp(min_delay, max_delay),
            min_delay,
            max_delay,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Overrides the jitter fraction (clamped to `0.0..=1.0`).
    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Returns the nominal delay before jitter.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        Duration::from_secs_f64(self.current)
    }

    /// Returns the lower bound.
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        Duration::from_secs_f64(self.min_delay)
    }

    /// Returns the upper bound.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_delay)
    }

    /// Speeds up after a successful request.
    pub fn record_success(&mut self) {
        self.current = (self.current * SUCCESS_FACTOR).max(self.min_delay);
        trace!(delay_secs = self.current, "pacing: success");
    }

    /// Backs off after a failed or blocked request.
    pub fn record_failure(&mut self) {
        self.current = (self.current * FAILURE_FACTOR)
            .max(self.min_delay)
            .min(self.max_delay);
        debug!(delay_secs = self.current, "pacing: backing off");
    }

    /// Samples one jittered sleep duration from the current delay.
    ///
    /// The factor is drawn uniformly from `[1 - jitter, 1 + jitter]` on every
    /// call, independent of the stored delay.
    #[must_use]
    pub fn jittered_delay(&self) -> Duration {
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        Duration::from_secs_f64(self.current * factor)
    }

    /// Sleeps for the current delay scaled by a fresh jitter factor.
    ///
    /// Returns how long it slept.
    pub async fn wait(&self) -> Duration {
        let delay = self.jittered_delay();
        debug!(delay_ms = delay.as_millis(), "pacing wait");
        tokio::time::sleep(delay).await;
        delay
    }
}
