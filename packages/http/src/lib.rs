#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! HTTP retry with exponential backoff.
//!
//! Transport failures are always worth another attempt. Which response
//! statuses are retried depends on the service, so each client supplies a
//! [`RetryPolicy`].

use std::time::Duration;

use reqwest::StatusCode;

/// How often and on which statuses a client retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts after the first; the wait doubles from 2s.
    pub max_retries: u32,
    pub retryable_status: fn(StatusCode) -> bool,
}

impl RetryPolicy {
    const fn delay(attempt: u32) -> Duration {
        Duration::from_secs(1u64 << attempt)
    }
}

/// Sends the request built by `build_request`, retrying transient failures
/// and retryable statuses as `policy` allows. The closure is called once
/// per attempt since builders are consumed by `send()`.
///
/// Any other response, successful or not, is returned for the caller to
/// interpret.
///
/// # Errors
///
/// Returns the client's error converted from [`reqwest::Error`] if the
/// request still fails after all retries or fails with a non-transient
/// error.
#[allow(clippy::future_not_send)]
pub async fn send<F, E>(build_request: F, policy: &RetryPolicy) -> Result<reqwest::Response, E>
where
    F: Fn() -> reqwest::RequestBuilder,
    E: From<reqwest::Error>,
{
    let max_retries = policy.max_retries;
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = RetryPolicy::delay(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) if is_transient(&e) && attempt < max_retries => {
                log::warn!("  transient error: {e}");
            }
            Err(e) => return Err(e.into()),
            Ok(response) if (policy.retryable_status)(response.status()) && attempt < max_retries => {
                log::warn!("  HTTP {}", response.status());
            }
            Ok(response) => return Ok(response),
        }
        attempt += 1;
    }
}

/// Connection resets, timeouts and truncated bodies.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_decode() || e.is_request()
}
