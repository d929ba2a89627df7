//! Parser for the plain-text `/api/status` page.
//!
//! ```text
//! Connected as: 1234567890
//! Current time: 2024-05-01T10:00:00Z
//! Rate limit: 2
//! Slot available after: 2024-05-01T10:00:12Z, in 12 seconds.
//! 1 slots available now.
//! Currently running queries (pid, space limit, time limit, start time):
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::OverpassError;

static SLOT_AVAILABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Slot available after: ([^,]+), in (-?\d+) seconds?\.$").expect("valid regex")
});

static AVAILABLE_NOW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+) slots available now\.$").expect("valid regex"));

const CONNECTED_AS: &str = "Connected as: ";
const CURRENT_TIME: &str = "Current time: ";
const RATE_LIMIT: &str = "Rate limit: ";
const RUNNING_HEADER: &str = "Currently running queries (pid, space limit, time limit, start time):";

/// A slot that frees up later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    /// Server timestamp at which the slot frees up, as printed.
    pub available_after: String,
    /// Seconds until then; negative once the moment has passed.
    pub seconds: i64,
}

/// Rate-limit state reported by the server for this client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub connected_as: String,
    pub current_time: String,
    /// Concurrent queries allowed; 0 means unlimited.
    pub rate_limit: u32,
    /// Busy slots, soonest first.
    pub slots: Vec<Slot>,
    /// Free slots, when reported.
    pub available_now: Option<u32>,
    /// Number of queries this client currently has running.
    pub running: usize,
}

impl Status {
    /// Seconds to wait before the next query may start, if any.
    #[must_use]
    pub fn wait_seconds(&self) -> Option<u64> {
        if self.available_now.is_some_and(|n| n > 0) {
            return None;
        }
        let first = self.slots.first()?;
        u64::try_from(first.seconds).ok().filter(|s| *s > 0)
    }
}

fn malformed(text: &str) -> OverpassError {
    OverpassError::Status {
        message: text.lines().take(5).collect::<Vec<_>>().join(" | "),
    }
}

/// Parses the status page.
///
/// # Errors
///
/// Returns [`OverpassError::Status`] when the page does not have the
/// expected shape, which is what a proxy error page looks like.
pub fn parse_status(text: &str) -> Result<Status, OverpassError> {
    if text.contains("502 Bad Gateway") {
        return Err(malformed(text));
    }

    let lines: Vec<&str> = text.lines().collect();
    let connected_as = lines
        .first()
        .and_then(|l| l.strip_prefix(CONNECTED_AS))
        .ok_or_else(|| malformed(text))?;
    let current_time = lines
        .get(1)
        .and_then(|l| l.strip_prefix(CURRENT_TIME))
        .ok_or_else(|| malformed(text))?;

    // Some servers print an announcement line before the rate limit.
    let rate_limit_line = (2..=3)
        .find(|&i| lines.get(i).is_some_and(|l| l.starts_with(RATE_LIMIT)))
        .ok_or_else(|| malformed(text))?;
    let rate_limit = lines[rate_limit_line][RATE_LIMIT.len()..]
        .trim()
        .parse::<u32>()
        .map_err(|_| malformed(text))?;

    let mut slots = Vec::new();
    let mut i = rate_limit_line + 1;
    while let Some(line) = lines.get(i) {
        if !line.starts_with("Slot available after:") {
            break;
        }
        let caps = SLOT_AVAILABLE_RE.captures(line).ok_or_else(|| malformed(text))?;
        slots.push(Slot {
            available_after: caps[1].to_string(),
            seconds: caps[2].parse().map_err(|_| malformed(text))?,
        });
        i += 1;
    }

    let mut available_now = None;
    if let Some(caps) = lines.get(i).and_then(|l| AVAILABLE_NOW_RE.captures(l)) {
        available_now = caps[1].parse().ok();
        i += 1;
    }

    let running = match lines.get(i) {
        Some(line) if *line == RUNNING_HEADER => lines.len() - (i + 1),
        Some(_) => return Err(malformed(text)),
        None => 0,
    };

    Ok(Status {
        connected_as: connected_as.to_string(),
        current_time: current_time.to_string(),
        rate_limit,
        slots,
        available_now,
        running,
    })
}
