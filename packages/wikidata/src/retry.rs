//! Retry policy for the knowledge-base services.
//!
//! Only throttling and gateway responses are retried. A query that fails
//! because it ran too long would fail again, so every other status goes
//! back to the caller.

use reqwest::StatusCode;
use wikimatch_http::RetryPolicy;

/// Four retries: 2s, 4s, 8s, 16s.
pub const POLICY: RetryPolicy = RetryPolicy {
    max_retries: 4,
    retryable_status: is_retryable_status,
};

#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE
    )
}
