//! Running jobs and the registry that owns them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use uuid::Uuid;
use wikimatch_job_models::{JobSummary, MatchRequest, ProgressEvent};
use wikimatch_place_models::AreaId;

use crate::JobError;
use crate::broadcast::Broadcaster;
use crate::orchestrator::Orchestrator;

/// One pipeline run for one area.
pub struct Job {
    pub area: AreaId,
    pub request: MatchRequest,
    pub start: DateTime<Utc>,
    stop: AtomicBool,
    hub: Broadcaster,
}

impl Job {
    #[must_use]
    pub fn new(request: MatchRequest) -> Self {
        Self {
            area: AreaId::new(request.osm_type, request.osm_id),
            request,
            start: Utc::now(),
            stop: AtomicBool::new(false),
            hub: Broadcaster::new(),
        }
    }

    #[must_use]
    pub const fn hub(&self) -> &Broadcaster {
        &self.hub
    }

    /// Asks the pipeline to stop at its next check.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn stopping(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Returns [`JobError::Stopped`] once a stop has been requested.
    pub fn check_for_stop(&self) -> Result<(), JobError> {
        if self.stopping() {
            return Err(JobError::Stopped);
        }
        Ok(())
    }

    #[must_use]
    pub fn summary(&self) -> JobSummary {
        JobSummary {
            osm_type: self.area.osm_type,
            osm_id: self.area.osm_id,
            subscribers: self.hub.subscriber_count(),
            start: self.start,
            stopping: self.stopping(),
        }
    }

    /// Starts following the job's progress. The first event is
    /// `connected`.
    #[must_use]
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (id, rx) = self.hub.subscribe();
        Subscription {
            id,
            rx,
            job: Arc::clone(self),
        }
    }
}

/// A live view of one job's events. Dropping it unsubscribes.
pub struct Subscription {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    job: Arc<Job>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    #[must_use]
    pub fn job(&self) -> &Arc<Job> {
        &self.job
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.job.hub.unsubscribe(self.id);
    }
}

/// The active jobs, at most one per area.
pub struct JobRegistry {
    jobs: Mutex<BTreeMap<AreaId, Arc<Job>>>,
    orchestrator: Arc<Orchestrator>,
}

impl JobRegistry {
    #[must_use]
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        Arc::new(Self {
            jobs: Mutex::new(BTreeMap::new()),
            orchestrator,
        })
    }

    fn jobs(&self) -> std::sync::MutexGuard<'_, BTreeMap<AreaId, Arc<Job>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn get(&self, area: AreaId) -> Option<Arc<Job>> {
        self.jobs().get(&area).cloned()
    }

    /// Creates and spawns a job for the requested area, returning a
    /// subscription taken before the job sends anything.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::AlreadyActive`] if the area has a job,
    /// [`JobError::NotFound`] for an unknown area,
    /// [`JobError::AlreadyDone`] for an area that is ready, or
    /// [`JobError::Store`] if the area cannot be read.
    pub async fn start(self: &Arc<Self>, request: MatchRequest) -> Result<Subscription, JobError> {
        let area = AreaId::new(request.osm_type, request.osm_id);
        if self.get(area).is_some() {
            return Err(JobError::AlreadyActive {
                area: area.to_string(),
            });
        }
        match self.orchestrator.store().get_area(area).await? {
            None => {
                return Err(JobError::NotFound {
                    area: area.to_string(),
                });
            }
            Some(a) if a.state.is_terminal() => {
                return Err(JobError::AlreadyDone {
                    area: area.to_string(),
                });
            }
            Some(_) => {}
        }

        let job = Arc::new(Job::new(request));
        {
            let mut jobs = self.jobs();
            if jobs.contains_key(&area) {
                return Err(JobError::AlreadyActive {
                    area: area.to_string(),
                });
            }
            jobs.insert(area, Arc::clone(&job));
        }
        let subscription = job.subscribe();

        log::info!("start job {area}");
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let pipeline = {
                let orchestrator = Arc::clone(&registry.orchestrator);
                let job = Arc::clone(&job);
                tokio::spawn(async move { orchestrator.run_job(&job).await })
            };
            if let Err(e) = pipeline.await {
                let msg = format!("unexpected error: {}", crash_message(e));
                registry.orchestrator.report_failure(&job, &msg).await;
            }
            registry.end(&job);
        });
        Ok(subscription)
    }

    /// Follows the area's running job, starting one if there is none.
    ///
    /// # Errors
    ///
    /// See [`Self::start`].
    pub async fn join_or_start(self: &Arc<Self>, request: MatchRequest) -> Result<Subscription, JobError> {
        let area = AreaId::new(request.osm_type, request.osm_id);
        match self.get(area) {
            Some(job) => Ok(job.subscribe()),
            None => self.start(request).await,
        }
    }

    /// Requests a stop. Returns `false` if no job runs for the area.
    pub fn stop(&self, area: AreaId) -> bool {
        self.get(area).is_some_and(|job| {
            log::info!("stop job {area}");
            job.stop();
            true
        })
    }

    #[must_use]
    pub fn list(&self) -> Vec<JobSummary> {
        self.jobs().values().map(|job| job.summary()).collect()
    }

    fn end(&self, job: &Arc<Job>) {
        log::info!("end job {}", job.area);
        job.hub.close();
        let mut jobs = self.jobs();
        if jobs.get(&job.area).is_some_and(|j| Arc::ptr_eq(j, job)) {
            jobs.remove(&job.area);
        }
    }
}

fn crash_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "job panicked".to_string())
}

#[cfg(test)]
mod tests {
    use wikimatch_job_models::EventKind;
    use wikimatch_match_models::OsmType;

    use super::*;

    fn request(osm_id: i64) -> MatchRequest {
        MatchRequest::new(OsmType::Relation, osm_id)
    }

    #[test]
    fn stop_is_cooperative() {
        let job = Job::new(request(1));
        assert!(job.check_for_stop().is_ok());
        job.stop();
        assert!(matches!(job.check_for_stop(), Err(JobError::Stopped)));
        assert!(job.summary().stopping);
    }

    #[tokio::test]
    async fn dropping_a_subscription_unsubscribes() {
        let job = Arc::new(Job::new(request(2)));
        let mut sub = job.subscribe();
        assert_eq!(job.summary().subscribers, 1);
        assert_eq!(sub.recv().await.unwrap().kind, EventKind::Connected);
        drop(sub);
        assert_eq!(job.summary().subscribers, 0);
    }
}
