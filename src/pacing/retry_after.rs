//! `Retry-After` header parsing.

use std::time::{Duration, SystemTime};

use tracing::{debug, instrument, warn};

/// Maximum Retry-After value honored (1 hour).
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parses a Retry-After header value into a Duration.
///
/// Supports both RFC 7231 forms:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Values above one hour are
/// capped; dates in the past yield zero.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use articlesync_core::pacing::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("0"), Some(Duration::ZERO));
/// assert_eq!(parse_retry_after("soon"), None);
/// ```
#[must_use]
#[instrument(level = "trace")]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    let Ok(datetime) = httpdate::parse_http_date(header_value) else {
        debug!(header_value, "unparseable Retry-After value");
        return None;
    };

    match datetime.duration_since(SystemTime::now()) {
        Ok(duration) if duration > MAX_RETRY_AFTER => {
            warn!(
                delay_secs = duration.as_secs(),
                max_secs = MAX_RETRY_AFTER.as_secs(),
                "Retry-After date exceeds maximum, capping"
            );
            Some(MAX_RETRY_AFTER)
        }
        Ok(duration) => Some(duration),
        Err(_) => {
            debug!(header_value, "Retry-After date is in the past");
            Some(Duration::ZERO)
        }
    }
}
