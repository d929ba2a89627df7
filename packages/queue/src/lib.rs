#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Serialized access to the map-extract service.
//!
//! Every outbound query goes through one [`FetchScheduler`] worker. Fetch
//! requests wait in a priority queue ordered by the area's size, smallest
//! first, with ties served in submission order. The worker services one
//! request at a time, chunk by chunk, waiting for a free slot on the
//! service before each query and reporting progress as [`FetchEvent`]s on
//! the request's own channel.

pub mod cache;
pub mod notify;

use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Notify, mpsc};
use wikimatch_overpass::{MapExtractService, OverpassError};
use wikimatch_place_models::{AreaId, Chunk};

pub use cache::ChunkCache;
pub use notify::{LogNotifier, Notifier};

/// Extra seconds waited past the reported slot time.
const SLOT_MARGIN_SECS: u64 = 1;

/// Message sent when the status endpoint cannot be read.
pub const STATUS_FAILURE_MSG: &str = "Can't access overpass API";

/// Errors from submitting fetch work.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// A request for this area is queued or running.
    #[error("fetch already queued for {area}")]
    AlreadyQueued {
        /// The area, as `type/id`.
        area: String,
    },

    /// The worker has shut down.
    #[error("fetch scheduler stopped")]
    Stopped,
}

/// Progress of one fetch request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchEvent {
    /// The chunk has no query; nothing inside it is wanted.
    Empty { num: usize, chunk: String },
    /// Waiting for a free slot.
    Status { wait: u64 },
    /// The query for the chunk is being sent.
    GetChunk { num: usize, chunk: String },
    /// The chunk's payload is in the cache.
    ChunkDone { num: usize, chunk: String, filename: String },
    /// The chunk's query ran too long; a smaller area may work.
    Timeout { num: usize, chunk: String },
    /// A failure the requester should report.
    Error { msg: String },
    /// Every chunk has been handled.
    Done,
}

struct FetchRequest {
    area: AreaId,
    chunks: Vec<Chunk>,
    events: mpsc::UnboundedSender<FetchEvent>,
}

struct Queued {
    priority: f64,
    seq: u64,
    request: FetchRequest,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    /// Reversed so the max-heap yields the smallest area, then the oldest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct QueueState {
    heap: BinaryHeap<Queued>,
    seq: u64,
    /// Areas queued or being serviced.
    active: BTreeSet<AreaId>,
    stopped: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Notify,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self) -> Option<FetchRequest> {
        self.lock().heap.pop().map(|q| q.request)
    }

    fn finish(&self, area: AreaId) {
        self.lock().active.remove(&area);
    }
}

/// Handle to the process-wide fetch worker.
#[derive(Clone)]
pub struct FetchScheduler {
    shared: Arc<Shared>,
}

impl FetchScheduler {
    /// Spawns the worker. It runs until [`Self::shutdown`] is called.
    #[must_use]
    pub fn start(
        service: Arc<dyn MapExtractService>,
        cache: ChunkCache,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Notify::new(),
        });
        let worker = Worker {
            shared: shared.clone(),
            service,
            cache,
            notifier,
        };
        let handle = tokio::spawn(worker.run());
        (Self { shared }, handle)
    }

    /// Queues the chunks of one area. `priority` is the area's size; smaller
    /// areas are served first.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::AlreadyQueued`] while a request for the
    /// same area is pending, or [`SchedulerError::Stopped`] after shutdown.
    pub fn submit(
        &self,
        area: AreaId,
        priority: f64,
        chunks: Vec<Chunk>,
    ) -> Result<mpsc::UnboundedReceiver<FetchEvent>, SchedulerError> {
        let (events, rx) = mpsc::unbounded_channel();
        {
            let mut state = self.shared.lock();
            if state.stopped {
                return Err(SchedulerError::Stopped);
            }
            if !state.active.insert(area) {
                return Err(SchedulerError::AlreadyQueued {
                    area: area.to_string(),
                });
            }
            let seq = state.seq;
            state.seq += 1;
            log::debug!("queue fetch for {area}: {} chunks, priority {priority:.1}", chunks.len());
            state.heap.push(Queued {
                priority,
                seq,
                request: FetchRequest {
                    area,
                    chunks,
                    events,
                },
            });
        }
        self.shared.wake.notify_one();
        Ok(rx)
    }

    /// Number of requests waiting, not counting the one being serviced.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.shared.lock().heap.len()
    }

    /// Stops the worker after the request it is servicing.
    pub fn shutdown(&self) {
        self.shared.lock().stopped = true;
        self.shared.wake.notify_one();
    }
}

struct Worker {
    shared: Arc<Shared>,
    service: Arc<dyn MapExtractService>,
    cache: ChunkCache,
    notifier: Arc<dyn Notifier>,
}

enum Slot {
    Free,
    Unavailable,
}

impl Worker {
    async fn run(self) {
        loop {
            let request = loop {
                if self.shared.lock().stopped {
                    log::info!("fetch scheduler stopped");
                    return;
                }
                if let Some(request) = self.shared.pop() {
                    break request;
                }
                self.shared.wake.notified().await;
            };
            let FetchRequest { area, chunks, events } = request;
            let complete = self.process(area, &chunks, &events).await;
            // Clear the area before `Done` so the requester can resubmit
            // as soon as it sees it.
            self.shared.finish(area);
            if complete {
                log::info!("fetch for {area} complete");
                let _ = events.send(FetchEvent::Done);
            }
        }
    }

    /// Waits until the service has a free slot, telling the requester how
    /// long.
    async fn wait_for_slot(&self, events: &mpsc::UnboundedSender<FetchEvent>) -> Slot {
        let status = match self.service.get_status().await {
            Ok(status) => status,
            Err(e) => {
                log::warn!("overpass status: {e}");
                self.notifier
                    .notify("Overpass API unavailable", &e.to_string())
                    .await;
                let _ = events.send(FetchEvent::Error {
                    msg: STATUS_FAILURE_MSG.to_string(),
                });
                return Slot::Unavailable;
            }
        };
        if let Some(wait) = status.wait_seconds() {
            log::info!("overpass slot free in {wait}s");
            let _ = events.send(FetchEvent::Status { wait });
            tokio::time::sleep(Duration::from_secs(wait + SLOT_MARGIN_SECS)).await;
        }
        Slot::Free
    }

    /// Handles every chunk of one request. Returns `false` if the request
    /// was abandoned part way.
    async fn process(&self, area: AreaId, chunks: &[Chunk], events: &mpsc::UnboundedSender<FetchEvent>) -> bool {
        log::info!("fetching {} chunks for {area}", chunks.len());

        for chunk in chunks {
            if events.is_closed() {
                log::info!("requester for {area} went away, dropping fetch");
                return false;
            }
            let num = chunk.id.num;
            let label = chunk.id.to_string();
            let filename = chunk.filename();

            let Some(oql) = &chunk.oql else {
                let _ = events.send(FetchEvent::Empty { num, chunk: label });
                continue;
            };

            if !self.cache.contains(&filename) {
                if let Slot::Unavailable = self.wait_for_slot(events).await {
                    return false;
                }
                let _ = events.send(FetchEvent::GetChunk {
                    num,
                    chunk: label.clone(),
                });
                match self.fetch(oql, events).await {
                    Ok(Some(payload)) => {
                        if let Err(e) = self.cache.write(&filename, &payload) {
                            log::error!("writing {filename}: {e}");
                            let _ = events.send(FetchEvent::Error {
                                msg: format!("writing {filename}: {e}"),
                            });
                            continue;
                        }
                        log::debug!("chunk {label} of {area}: {} bytes", payload.len());
                    }
                    Ok(None) => return false,
                    Err(e) if e.is_timeout() => {
                        log::warn!("chunk {label} of {area} timed out");
                        let _ = events.send(FetchEvent::Timeout { num, chunk: label });
                        continue;
                    }
                    Err(e) => {
                        log::error!("chunk {label} of {area}: {e}");
                        let _ = events.send(FetchEvent::Error {
                            msg: format!("overpass: {e}"),
                        });
                        continue;
                    }
                }
            }

            let _ = events.send(FetchEvent::ChunkDone {
                num,
                chunk: label,
                filename,
            });
        }

        true
    }

    /// Runs one query, waiting out rate limiting. `Ok(None)` means the
    /// status endpoint failed while waiting.
    async fn fetch(
        &self,
        oql: &str,
        events: &mpsc::UnboundedSender<FetchEvent>,
    ) -> Result<Option<Vec<u8>>, OverpassError> {
        loop {
            match self.service.run_query(oql).await {
                Ok(payload) => return Ok(Some(payload)),
                Err(OverpassError::RateLimited) => {
                    log::warn!("rate limited");
                    if let Slot::Unavailable = self.wait_for_slot(events).await {
                        return Ok(None);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
