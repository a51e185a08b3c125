//! Request pacing: adaptive inter-request delay and WAF-aware retry.
//!
//! [`AdaptiveDelay`] spaces out successive upstream calls for a whole run,
//! while [`RetryExecutor`] handles a single logical request and reports each
//! outcome back to the delay controller.

mod adaptive;
mod retry;
mod retry_after;

pub use adaptive::{AdaptiveDelay, DEFAULT_JITTER};
pub use retry::{
    Classification, DEFAULT_RETRY_BASE_DELAY, JsonShape, MAX_RETRIES, ResponseShape,
    RetryContext, RetryExecutor, RetryPolicy,
};
pub use retry_after::{MAX_RETRY_AFTER, parse_retry_after};
