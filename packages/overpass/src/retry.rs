//! Retry policy for the Overpass service.
//!
//! `429` and `504` are returned to the caller, which knows what those mean
//! for an Overpass query: no free slot, or a query that needs a smaller
//! area.

use reqwest::StatusCode;
use wikimatch_http::RetryPolicy;

/// Three retries: 2s, 4s, 8s.
pub const POLICY: RetryPolicy = RetryPolicy {
    max_retries: 3,
    retryable_status: is_retryable_status,
};

/// Gateway failures in front of the interpreter.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::BAD_GATEWAY || status == StatusCode::SERVICE_UNAVAILABLE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_timeout_is_not_retried() {
        assert!(is_retryable_status(StatusCode::BAD_GATEWAY));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(StatusCode::GATEWAY_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::OK));
    }
}
