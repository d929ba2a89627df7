#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Client for the Overpass map-extract service.
//!
//! The service enforces a per-client rate limit, so callers check
//! [`MapExtractService::get_status`] for a free slot before each
//! [`MapExtractService::run_query`]. Query failures are classified into
//! rate limiting, timeouts (recoverable by asking for a smaller area) and
//! hard errors.

pub mod oql;
pub mod retry;
pub mod status;

use std::time::Duration;

use async_trait::async_trait;

pub use status::{Slot, Status, parse_status};

/// Responses smaller than this may be an error page rather than data.
const SMALL_RESPONSE: usize = 2000;

/// Errors from the map-extract service.
#[derive(Debug, thiserror::Error)]
pub enum OverpassError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server refused the query because no slot was free.
    #[error("rate limited")]
    RateLimited,

    /// The query ran past the server's time limit.
    #[error("overpass timeout")]
    Timeout,

    /// The query needed more memory than the server allows.
    #[error("Query run out of memory")]
    OutOfMemory,

    /// The server reported some other runtime error.
    #[error("runtime error: {message}")]
    Runtime {
        /// Remark text from the server.
        message: String,
    },

    /// The status page could not be read.
    #[error("Can't access overpass API: {message}")]
    Status {
        /// The start of the unexpected page.
        message: String,
    },

    /// Unexpected HTTP status.
    #[error("HTTP {status}: {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// The start of the response body.
        message: String,
    },
}

impl OverpassError {
    /// Whether asking for a smaller area may succeed.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout)
    }
}

/// The remote map-extract service.
#[async_trait]
pub trait MapExtractService: Send + Sync {
    /// Current rate-limit state for this client.
    ///
    /// # Errors
    ///
    /// Returns [`OverpassError`] if the status page is unreachable or
    /// malformed.
    async fn get_status(&self) -> Result<Status, OverpassError>;

    /// Runs a query and returns the raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`OverpassError::RateLimited`], [`OverpassError::Timeout`],
    /// [`OverpassError::OutOfMemory`] or [`OverpassError::Runtime`] as
    /// classified by [`classify_response`], or a transport error.
    async fn run_query(&self, oql: &str) -> Result<Vec<u8>, OverpassError>;
}

fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(&body[..body.len().min(200)]).into_owned()
}

fn contains(haystack: &[u8], needle: &str) -> bool {
    haystack
        .windows(needle.len())
        .any(|w| w == needle.as_bytes())
}

/// The text of a `runtime error:` remark near the end of the body.
fn runtime_remark(body: &[u8]) -> Option<String> {
    let tail = &body[body.len().saturating_sub(SMALL_RESPONSE)..];
    let text = String::from_utf8_lossy(tail);
    let start = text.find("runtime error: ")? + "runtime error: ".len();
    let rest = &text[start..];
    let end = rest.find(['"', '<', '\n']).unwrap_or(rest.len());
    Some(rest[..end].trim().to_string())
}

/// Classifies a query response.
///
/// # Errors
///
/// Returns the matching [`OverpassError`] variant for rate limiting,
/// gateway timeouts, out-of-memory and other runtime remarks, and
/// unexpected statuses.
pub fn classify_response(status: u16, body: &[u8]) -> Result<(), OverpassError> {
    if status == 429 && contains(body, "rate_limited") {
        return Err(OverpassError::RateLimited);
    }
    if status == 504 || (body.len() < SMALL_RESPONSE && contains(body, "504 Gateway")) {
        return Err(OverpassError::Timeout);
    }
    if let Some(remark) = runtime_remark(body) {
        if remark.starts_with("Query run out of memory") {
            return Err(OverpassError::OutOfMemory);
        }
        if remark.starts_with("Query timed out") {
            return Err(OverpassError::Timeout);
        }
        return Err(OverpassError::Runtime { message: remark });
    }
    if !(200..300).contains(&status) {
        return Err(OverpassError::Server {
            status,
            message: preview(body),
        });
    }
    Ok(())
}

/// HTTP client for an Overpass instance.
#[derive(Debug, Clone)]
pub struct OverpassClient {
    client: reqwest::Client,
    base_url: String,
}

impl OverpassClient {
    /// Creates a client for the instance at `base_url` (without `/api`).
    ///
    /// # Errors
    ///
    /// Returns [`OverpassError::Http`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self, OverpassError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn interpreter_url(&self) -> String {
        format!("{}/api/interpreter", self.base_url)
    }

    fn status_url(&self) -> String {
        format!("{}/api/status", self.base_url)
    }
}

#[async_trait]
impl MapExtractService for OverpassClient {
    async fn get_status(&self) -> Result<Status, OverpassError> {
        let url = self.status_url();
        let response = wikimatch_http::send::<_, OverpassError>(
            || self.client.get(&url).timeout(Duration::from_secs(10)),
            &retry::POLICY,
        )
        .await?;
        let text = response.text().await?;
        parse_status(&text)
    }

    async fn run_query(&self, oql: &str) -> Result<Vec<u8>, OverpassError> {
        let url = self.interpreter_url();
        log::debug!("overpass query ({} bytes) to {url}", oql.len());
        let response = wikimatch_http::send::<_, OverpassError>(
            || self.client.post(&url).body(oql.to_string()),
            &retry::POLICY,
        )
        .await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        classify_response(status, &body)?;
        Ok(body)
    }
}
