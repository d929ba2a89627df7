#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Match jobs.
//!
//! A [`Job`] takes one area through the pipeline: entity list, entity
//! details and enrichment, chunked map fetch, merge, bulk load and
//! candidate selection. Each completed stage is written back to the
//! [`AreaStore`] so an interrupted job resumes where it stopped.
//! [`JobRegistry`] keeps at most one job per area and lets any number of
//! observers follow its progress.

pub mod broadcast;
pub mod job;
pub mod loader;
pub mod orchestrator;
pub mod store;

use wikimatch_queue::SchedulerError;
use wikimatch_spatial::LoadError;
use wikimatch_wikidata::WikidataError;

pub use broadcast::Broadcaster;
pub use job::{Job, JobRegistry, Subscription};
pub use loader::{BulkLoader, MemoryLoader};
pub use orchestrator::{Orchestrator, Settings};
pub use store::{AreaStore, CandidateMap, JsonAreaStore, StoreError};
pub use wikimatch_queue::{LogNotifier, Notifier};

/// Errors that end a job or refuse to start one.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// A stop was requested.
    #[error("job stopped")]
    Stopped,

    /// A job for the area is already running.
    #[error("job already running for {area}")]
    AlreadyActive {
        /// The area, as `type/id`.
        area: String,
    },

    /// The area has been matched and no refresh was requested.
    #[error("{area} already matched")]
    AlreadyDone {
        /// The area, as `type/id`.
        area: String,
    },

    /// The area is not in the store.
    #[error("{area} not found")]
    NotFound {
        /// The area, as `type/id`.
        area: String,
    },

    /// Reading or writing stored state failed.
    #[error("store: {0}")]
    Store(#[from] StoreError),

    /// The knowledge base failed.
    #[error("wikidata: {0}")]
    Wikidata(#[from] WikidataError),

    /// The fetch scheduler refused the request.
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// The map-extract service reported a failure for one or more chunks.
    #[error("{message}")]
    Fetch {
        /// Failure messages, joined.
        message: String,
    },

    /// A chunk still timed out at the deepest subdivision.
    #[error("overpass timeout for chunk {chunk}")]
    FetchTimeout {
        /// The chunk label, e.g. `3.0.2`.
        chunk: String,
    },

    /// A fetched payload carries a server-side error.
    #[error("overpass: {message}")]
    Overpass {
        /// The server remark.
        message: String,
    },

    /// The entity-list query timed out at the deepest subdivision.
    #[error("wikidata query timeout")]
    EntityListTimeout,

    /// Loading the merged payload failed.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Filesystem failure on cached chunk data.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A cached payload is not valid JSON.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl JobError {
    /// Whether the failure belongs to the map fetch stage.
    #[must_use]
    pub const fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::Scheduler(_) | Self::Fetch { .. } | Self::FetchTimeout { .. } | Self::Overpass { .. }
        )
    }
}
