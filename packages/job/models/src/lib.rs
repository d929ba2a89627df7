#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types exchanged between match jobs and their observers.
//!
//! Progress events go to every subscriber of a job as JSON objects with a
//! `type` and the seconds elapsed since the job started in `time`. Request
//! bodies arrive on the job-control connection after the command word.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wikimatch_match_models::OsmType;

/// One event on a job's progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Seconds since the job started.
    pub time: f64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProgressEvent {
    #[must_use]
    pub const fn new(time: f64, kind: EventKind) -> Self {
        Self { time, kind }
    }

    /// Whether the stream ends after this event.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        matches!(self.kind, EventKind::Done | EventKind::Error { .. })
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// First event a new subscriber receives.
    Connected,
    /// Human-readable progress line.
    Msg { msg: String },
    /// Per-entity result line.
    Item { msg: String },
    /// Entity retrieval has started.
    GetWikidataItems,
    /// Positions of the entities found.
    Pins { pins: Vec<Pin> },
    /// Category and extract loading has started.
    LoadCat,
    LoadCatDone,
    /// The entity list has been stored.
    ItemsSaved,
    /// Chunks with nothing to ask for.
    Empty { empty: Vec<usize> },
    GetChunk { chunk_num: usize },
    ChunkDone { chunk_num: usize },
    /// Waiting for the map-extract service.
    Status { wait: u64 },
    OverpassDone,
    Error { msg: String },
    /// The area was already matched.
    AlreadyDone,
    /// The area is unknown.
    NotFound,
    Done,
}

/// Map pin for an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pin {
    pub qid: String,
    pub lat: f64,
    pub lon: f64,
    pub label: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A running job as listed by the `jobs` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub osm_type: OsmType,
    pub osm_id: i64,
    pub subscribers: usize,
    pub start: DateTime<Utc>,
    pub stopping: bool,
}

/// Body of a `match` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub osm_type: OsmType,
    pub osm_id: i64,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub remote_addr: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Classification items to restrict matching to.
    #[serde(default)]
    pub want_isa: Vec<String>,
}

impl MatchRequest {
    #[must_use]
    pub const fn new(osm_type: OsmType, osm_id: i64) -> Self {
        Self {
            osm_type,
            osm_id,
            user: None,
            remote_addr: None,
            user_agent: None,
            want_isa: Vec::new(),
        }
    }
}

/// Body of a `stop` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    pub osm_type: OsmType,
    pub osm_id: i64,
}

/// Replies to job-control commands that are not progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Reply {
    Pong,
    Jobs { items: Vec<JobSummary> },
    Stop { success: bool },
    Error { msg: String },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn events_carry_type_and_time() {
        let event = ProgressEvent::new(1.5, EventKind::ChunkDone { chunk_num: 3 });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"time": 1.5, "type": "chunk_done", "chunk_num": 3})
        );
        let done = ProgressEvent::new(2.0, EventKind::Done);
        assert_eq!(serde_json::to_value(&done).unwrap(), json!({"time": 2.0, "type": "done"}));
        assert!(done.is_final());
    }

    #[test]
    fn event_parses_back() {
        let event: ProgressEvent =
            serde_json::from_value(json!({"type": "msg", "time": 0.25, "msg": "hello"})).unwrap();
        assert_eq!(event.kind, EventKind::Msg { msg: "hello".to_string() });
        assert!(!event.is_final());
    }

    #[test]
    fn match_request_defaults() {
        let request: MatchRequest =
            serde_json::from_str(r#"{"osm_type":"relation","osm_id":62149}"#).unwrap();
        assert_eq!(request.osm_type, OsmType::Relation);
        assert!(request.want_isa.is_empty());
    }

    #[test]
    fn replies() {
        assert_eq!(serde_json::to_value(Reply::Pong).unwrap(), json!({"type": "pong"}));
        assert_eq!(
            serde_json::to_value(Reply::Stop { success: true }).unwrap(),
            json!({"type": "stop", "success": true})
        );
    }
}
