//! Fan-out of a job's progress events.
//!
//! Every event goes to each current subscriber and, once a run log is
//! open, to one JSON line in that log. Subscribers come and go while the
//! job runs; a new one first sees a `connected` event. Once the job has
//! sent its final event, late subscribers get `connected` and that final
//! event, and [`Broadcaster::close`] ends every open stream.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::mpsc;
use uuid::Uuid;
use wikimatch_job_models::{EventKind, ProgressEvent};

#[derive(Default)]
struct Sinks {
    open: BTreeMap<Uuid, mpsc::UnboundedSender<ProgressEvent>>,
    /// The `done` or `error` event, once sent.
    last: Option<ProgressEvent>,
    closed: bool,
}

/// Progress hub for one job.
pub struct Broadcaster {
    started: Instant,
    sinks: Mutex<Sinks>,
    log: Mutex<Option<File>>,
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl Broadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            sinks: Mutex::new(Sinks::default()),
            log: Mutex::new(None),
        }
    }

    fn elapsed(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn sinks(&self) -> std::sync::MutexGuard<'_, Sinks> {
        self.sinks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends every later event to a JSON-lines file.
    ///
    /// # Errors
    ///
    /// Returns any I/O error from creating the file or its directory.
    pub fn open_log(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::options().create(true).append(true).open(path)?;
        log::debug!("run log {}", path.display());
        *self.log.lock().unwrap_or_else(PoisonError::into_inner) = Some(file);
        Ok(())
    }

    pub fn send(&self, kind: EventKind) {
        let event = ProgressEvent::new(self.elapsed(), kind);
        {
            let mut sinks = self.sinks();
            for tx in sinks.open.values() {
                let _ = tx.send(event.clone());
            }
            if event.is_final() {
                sinks.last = Some(event.clone());
            }
        }

        let mut log = self.log.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = log.as_mut() {
            let written = serde_json::to_string(&event)
                .map_err(std::io::Error::from)
                .and_then(|line| writeln!(file, "{line}"));
            if let Err(e) = written {
                log::warn!("run log write failed: {e}");
                *log = None;
            }
        }
    }

    /// Progress line; empty messages are dropped.
    pub fn status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        if !msg.is_empty() {
            self.send(EventKind::Msg { msg });
        }
    }

    /// Per-entity line; empty messages are dropped.
    pub fn item_line(&self, msg: impl Into<String>) {
        let msg = msg.into();
        if !msg.is_empty() {
            self.send(EventKind::Item { msg });
        }
    }

    pub fn error(&self, msg: impl Into<String>) {
        self.send(EventKind::Error { msg: msg.into() });
    }

    /// Opens a stream of events. On a finished hub the stream holds
    /// `connected` and the final event, then ends.
    #[must_use]
    pub fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ProgressEvent::new(self.elapsed(), EventKind::Connected));
        let id = Uuid::new_v4();
        let mut sinks = self.sinks();
        if let Some(last) = &sinks.last {
            let _ = tx.send(last.clone());
        } else if !sinks.closed {
            sinks.open.insert(id, tx);
        }
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) {
        self.sinks().open.remove(&id);
    }

    /// Ends every open stream. Later subscribers get a closed stream.
    pub fn close(&self) {
        let mut sinks = self.sinks();
        sinks.closed = true;
        sinks.open.clear();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sinks().open.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_sees_connected_then_events() {
        let hub = Broadcaster::new();
        hub.status("before anyone listens");
        let (id, mut rx) = hub.subscribe();
        hub.status("");
        hub.item_line("Old Mill (Q1): 1 candidate found");
        hub.unsubscribe(id);
        hub.status("after unsubscribing");

        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Connected);
        assert_eq!(
            rx.try_recv().unwrap().kind,
            EventKind::Item {
                msg: "Old Mill (Q1): 1 candidate found".to_string()
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn late_subscriber_sees_the_final_event() {
        let hub = Broadcaster::new();
        hub.send(EventKind::Done);
        let (_, mut rx) = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 0);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Connected);
        assert_eq!(rx.try_recv().unwrap().kind, EventKind::Done);
        assert!(matches!(rx.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn close_ends_open_streams() {
        let hub = Broadcaster::new();
        let (_, mut early) = hub.subscribe();
        hub.close();
        let (_, mut late) = hub.subscribe();

        assert_eq!(early.try_recv().unwrap().kind, EventKind::Connected);
        assert!(matches!(early.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
        assert_eq!(late.try_recv().unwrap().kind, EventKind::Connected);
        assert!(matches!(late.try_recv(), Err(mpsc::error::TryRecvError::Disconnected)));
    }

    #[test]
    fn every_event_goes_to_the_log() {
        let path = std::env::temp_dir()
            .join(format!("wikimatch_broadcast_{}", std::process::id()))
            .join("run.jsonl");
        let hub = Broadcaster::new();
        hub.open_log(&path).unwrap();
        hub.send(EventKind::GetWikidataItems);
        hub.error("boom");

        let text = std::fs::read_to_string(&path).unwrap();
        let types: Vec<String> = text
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].to_string())
            .collect();
        assert_eq!(types, vec!["\"get_wikidata_items\"", "\"error\""]);
        std::fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }
}
