//! The per-target retry policy: which failures are worth retrying and
//! how long to wait before doing so.

use std::time::Duration;

use chrono::Utc;

use crate::error::TransportCode;

/// The retry knobs of a download.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// How many retries a single target gets.
    pub max_retries: u32,
    /// The seed of the backoff sequence, in seconds.
    pub retry_timeout_secs: f64,
    /// Each retry multiplies the wait by this factor.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_timeout_secs: 2.0,
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Whether a failed attempt may be retried. All conditions must
    /// hold: a recoverable transport code, a retryable HTTP status, a
    /// non-`file://` scheme, and remaining budget.
    pub fn should_retry(
        &self,
        transport_code: TransportCode,
        http_status: Option<u16>,
        scheme: &str,
        retries_used: u32,
    ) -> bool {
        transport_code.is_recoverable()
            && matches!(http_status, Some(413 | 429) | Some(500..))
            && scheme != "file"
            && retries_used < self.max_retries
    }

    /// The wait before retry number `retries_used + 1`:
    /// `seed × backoff^retries_used`, unless the server's `Retry-After`
    /// header dictates otherwise.
    pub fn wait_duration(&self, retries_used: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(retry_after) = retry_after {
            return retry_after;
        }
        Duration::from_secs_f64(
            self.retry_timeout_secs * self.backoff_factor.powi(retries_used as i32),
        )
    }
}

/// Parses a `Retry-After` header value: either a number of seconds or
/// an HTTP date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let date = chrono::DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let delta = date.with_timezone(&Utc) - Utc::now();
    delta.to_std().ok()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{parse_retry_after, RetryPolicy};
    use crate::error::TransportCode;

    #[test]
    fn retry_conditions() {
        let policy = RetryPolicy::default();

        // A 503 with a recoverable code is retryable.
        assert!(policy.should_retry(TransportCode::HttpReturnedError, Some(503), "https", 0));
        assert!(policy.should_retry(TransportCode::HttpReturnedError, Some(429), "https", 2));
        assert!(policy.should_retry(TransportCode::HttpReturnedError, Some(413), "https", 0));

        // Out of budget.
        assert!(!policy.should_retry(TransportCode::HttpReturnedError, Some(503), "https", 3));
        // Timeouts are not retryable.
        assert!(!policy.should_retry(TransportCode::OperationTimedout, Some(503), "https", 0));
        // Non-5xx statuses are not retryable.
        assert!(!policy.should_retry(TransportCode::HttpReturnedError, Some(404), "https", 0));
        assert!(!policy.should_retry(TransportCode::HttpReturnedError, None, "https", 0));
        // file:// urls are never retried.
        assert!(!policy.should_retry(TransportCode::HttpReturnedError, Some(503), "file", 0));
    }

    #[test]
    fn backoff_sequence() {
        let policy = RetryPolicy {
            max_retries: 5,
            retry_timeout_secs: 2.0,
            backoff_factor: 3.0,
        };
        assert_eq!(policy.wait_duration(0, None), Duration::from_secs(2));
        assert_eq!(policy.wait_duration(1, None), Duration::from_secs(6));
        assert_eq!(policy.wait_duration(2, None), Duration::from_secs(18));
    }

    #[test]
    fn retry_after_overrides() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.wait_duration(2, Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
        assert_eq!(parse_retry_after("1"), Some(Duration::from_secs(1)));
        assert_eq!(parse_retry_after("  120 "), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after("not-a-date"), None);
    }
}
