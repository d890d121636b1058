use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use common::config::{MAX_TOPIC_CONCURRENCY, MIN_TOPIC_CONCURRENCY};
use common::event::{EventName, JobEvent};
use common::job::{JobErrorCode, MAX_PAYLOAD_LEN, truncate_bytes};
use common::storage::Library;
use common::{JobMessage, JobStatus, JobTopic};
use dashmap::DashMap;
use mq::MessageBus;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};
use worker::{Governors, JobFailure, JobLifecycle};

use super::service::{JobService, ResolveResult, StatusUpdate};
use super::{BatchRequest, ImageJobPayload, JobBusError, JobSource, targets};
use crate::entity::worker_job;
use crate::events::EventBroker;

/// Snapshot of per-topic load, keyed by topic name.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct JobCounts {
    pub running_by_topic: HashMap<String, usize>,
    pub queued_by_topic: HashMap<String, usize>,
    pub concurrency: HashMap<String, usize>,
}

/// Result of [`JobBus::get`].
#[derive(Debug, Clone)]
pub enum JobLookup {
    Row(worker_job::Model),
    /// Known only to this process, e.g. when the row could not be read.
    Active { uid: String, status: JobStatus },
}

/// Owns the worker-job rows and the in-memory view of live jobs.
///
/// `active` holds the status of jobs that are queued, running, or cancelled
/// but not yet seen by a dispatcher. Terminal jobs leave it.
pub struct JobBus {
    db: DatabaseConnection,
    bus: Arc<dyn MessageBus>,
    governors: Arc<Governors>,
    events: Arc<EventBroker>,
    active: DashMap<String, JobStatus>,
    queued: HashMap<JobTopic, AtomicUsize>,
}

impl JobBus {
    pub fn new(
        db: DatabaseConnection,
        bus: Arc<dyn MessageBus>,
        governors: Arc<Governors>,
        events: Arc<EventBroker>,
    ) -> Self {
        let queued = JobTopic::ALL
            .iter()
            .map(|t| (*t, AtomicUsize::new(0)))
            .collect();
        Self {
            db,
            bus,
            governors,
            events,
            active: DashMap::new(),
            queued,
        }
    }

    fn service(&self) -> JobService<'_, DatabaseConnection> {
        JobService::new(&self.db)
    }

    /// Persist a queued job and publish it. Returns the job uid.
    pub async fn enqueue<T: Serialize>(
        &self,
        topic: JobTopic,
        payload: &T,
        command: Option<&str>,
        image_uid: Option<&str>,
    ) -> Result<String, JobBusError> {
        let payload = serde_json::to_string(payload)?;
        self.enqueue_raw(topic, &payload, command, image_uid).await
    }

    #[instrument(skip(self, payload), fields(topic = %topic))]
    pub async fn enqueue_raw(
        &self,
        topic: JobTopic,
        payload: &str,
        command: Option<&str>,
        image_uid: Option<&str>,
    ) -> Result<String, JobBusError> {
        let message = JobMessage {
            job_uid: common::uid::generate(),
            topic,
            command: command.map(str::to_string),
            image_uid: image_uid.map(str::to_string),
            payload: truncate_bytes(payload, MAX_PAYLOAD_LEN),
            enqueued_at: Utc::now(),
        };
        self.service().insert_queued(&message).await?;

        if let Err(e) = self.publish(&message).await {
            error!(job_uid = %message.job_uid, error = %e, "Publish failed");
            let msg = e.to_string();
            self.service()
                .transition(
                    &message.job_uid,
                    JobStatus::Failed,
                    StatusUpdate::failed(Utc::now(), JobErrorCode::PUBLISH_FAILED, &msg),
                )
                .await?;
            self.emit(
                EventName::JOB_FAILED,
                &message,
                JobStatus::Failed,
                None,
                Some((JobErrorCode::PUBLISH_FAILED, &msg)),
            );
            return Err(JobBusError::Publish {
                job_uid: message.job_uid,
                source: e,
            });
        }

        debug!(job_uid = %message.job_uid, "Job enqueued");
        Ok(message.job_uid)
    }

    /// Count a message as queued and send it to the bus.
    ///
    /// The count and the active entry are in place before the message is
    /// visible to a dispatcher, and are undone if the bus refuses it.
    pub async fn publish(&self, message: &JobMessage) -> Result<(), mq::MqError> {
        self.mark_queued(message);
        if let Err(e) = self.bus.publish(message).await {
            self.dequeued(message.topic);
            self.active
                .remove_if(&message.job_uid, |_, status| *status == JobStatus::Queued);
            return Err(e);
        }
        Ok(())
    }

    fn mark_queued(&self, message: &JobMessage) {
        if let Some(counter) = self.queued.get(&message.topic) {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.active
            .insert(message.job_uid.clone(), JobStatus::Queued);
    }

    fn dequeued(&self, topic: JobTopic) {
        if let Some(counter) = self.queued.get(&topic) {
            let _ = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            });
        }
    }

    /// Apply a status transition to the row. Returns false if the current
    /// status does not allow it.
    pub async fn update_status(
        &self,
        uid: &str,
        status: JobStatus,
        update: StatusUpdate,
    ) -> Result<bool, JobBusError> {
        let changed = self.service().transition(uid, status, update).await?;
        if changed {
            if status.is_terminal() {
                self.active.remove(uid);
            } else {
                self.active.insert(uid.to_string(), status);
            }
        }
        Ok(changed)
    }

    /// The persisted row, or the in-memory status when there is no row.
    pub async fn get(&self, uid: &str) -> Result<Option<JobLookup>, JobBusError> {
        match self.service().find(uid).await {
            Ok(Some(row)) => return Ok(Some(JobLookup::Row(row))),
            Ok(None) => {}
            Err(e) => {
                warn!(job_uid = %uid, error = %e, "Job row lookup failed, using in-memory status");
                if !self.active.contains_key(uid) {
                    return Err(e.into());
                }
            }
        }
        Ok(self.active.get(uid).map(|status| JobLookup::Active {
            uid: uid.to_string(),
            status: *status,
        }))
    }

    /// Cancel a queued or running job. Running handlers notice at their next
    /// progress checkpoint.
    #[instrument(skip(self))]
    pub async fn cancel(&self, uid: &str) -> Result<JobStatus, JobBusError> {
        let row = self.service().find(uid).await?.ok_or(JobBusError::NotFound)?;
        if row.status.is_terminal() {
            return Err(JobBusError::Conflict(format!(
                "Job is already {}",
                row.status
            )));
        }

        let changed = self
            .service()
            .transition(uid, JobStatus::Cancelled, StatusUpdate::finished(Utc::now()))
            .await?;
        if !changed {
            return Err(JobBusError::Conflict("Job finished before it could be cancelled".into()));
        }

        self.active.insert(uid.to_string(), JobStatus::Cancelled);
        let topic = row.topic.parse::<JobTopic>().ok();
        if row.status == JobStatus::Queued
            && let Some(topic) = topic
        {
            self.dequeued(topic);
        }

        if let Some(message) = message_from_row(&row) {
            self.emit(EventName::JOB_CANCELLED, &message, JobStatus::Cancelled, None, None);
        }
        info!(job_uid = %uid, previous = %row.status, "Job cancelled");
        Ok(row.status)
    }

    pub fn set_concurrency(&self, topic: JobTopic, n: usize) -> Result<usize, JobBusError> {
        if !(MIN_TOPIC_CONCURRENCY..=MAX_TOPIC_CONCURRENCY).contains(&n) {
            return Err(JobBusError::Invalid(format!(
                "concurrency must be between {MIN_TOPIC_CONCURRENCY} and {MAX_TOPIC_CONCURRENCY}"
            )));
        }
        self.governors
            .set_concurrency(topic, n)
            .ok_or_else(|| JobBusError::Invalid(format!("Unknown topic {topic}")))
    }

    pub fn counts(&self) -> JobCounts {
        let by_name = |m: HashMap<JobTopic, usize>| {
            m.into_iter()
                .map(|(t, n)| (t.as_str().to_string(), n))
                .collect::<HashMap<_, _>>()
        };
        let queued = self
            .queued
            .iter()
            .map(|(t, n)| (*t, n.load(Ordering::SeqCst)))
            .collect();
        JobCounts {
            running_by_topic: by_name(self.governors.running_by_topic()),
            queued_by_topic: by_name(queued),
            concurrency: by_name(self.governors.limits()),
        }
    }

    /// Enqueue one job per image selected by `request`.
    #[instrument(skip(self, library), fields(kind = ?request.kind, command = %request.command))]
    pub async fn enqueue_batch(
        &self,
        library: &Library,
        request: &BatchRequest,
        requested_by: &str,
    ) -> Result<Vec<String>, JobBusError> {
        let topic = request.kind.topic();
        let uids = targets::select(
            &self.db,
            library,
            topic,
            request.command,
            request.image_uid.as_deref(),
        )
        .await?;

        let mut jobs = Vec::with_capacity(uids.len());
        for uid in uids {
            let payload = ImageJobPayload {
                image_uid: uid.clone(),
                requested_by: requested_by.to_string(),
                source: JobSource::Admin,
            };
            jobs.push(
                self.enqueue(topic, &payload, Some(request.command.as_str()), Some(&uid))
                    .await?,
            );
        }
        info!(count = jobs.len(), topic = %topic, "Batch enqueued");
        Ok(jobs)
    }

    /// The three processing jobs every new upload gets.
    pub async fn enqueue_for_upload(
        &self,
        image_uid: &str,
        owner_uid: &str,
    ) -> Result<Vec<String>, JobBusError> {
        let payload = ImageJobPayload {
            image_uid: image_uid.to_string(),
            requested_by: owner_uid.to_string(),
            source: JobSource::Upload,
        };
        let mut jobs = Vec::with_capacity(JobTopic::ALL.len());
        for topic in [
            JobTopic::ImageProcess,
            JobTopic::ExifProcess,
            JobTopic::XmpGeneration,
        ] {
            jobs.push(self.enqueue(topic, &payload, None, Some(image_uid)).await?);
        }
        Ok(jobs)
    }

    /// Re-enqueue a dead-lettered job under a new uid and resolve the entry.
    #[instrument(skip(self))]
    pub async fn retry_dead_letter(&self, id: i32, resolved_by: &str) -> Result<String, JobBusError> {
        let entry = self
            .service()
            .get_dead_letter(id)
            .await?
            .ok_or(JobBusError::NotFound)?;
        if entry.resolved {
            return Err(JobBusError::Conflict("Dead-letter entry is already resolved".into()));
        }
        let topic: JobTopic = entry.topic.parse().map_err(JobBusError::Invalid)?;

        let job_uid = self
            .enqueue_raw(topic, &entry.payload, Some("retry"), entry.image_uid.as_deref())
            .await?;
        match self.service().resolve_dead_letter(id, resolved_by).await? {
            ResolveResult::Resolved => Ok(job_uid),
            ResolveResult::AlreadyResolved => Err(JobBusError::Conflict(
                "Dead-letter entry was resolved concurrently".into(),
            )),
            ResolveResult::NotFound => Err(JobBusError::NotFound),
        }
    }

    /// Reconcile rows left behind by a previous process.
    ///
    /// Running rows become failed with `interrupted`. Queued rows are
    /// republished when the bus does not survive restarts; otherwise they
    /// are only counted, since the broker still holds their messages.
    pub async fn recover_interrupted(&self, republish_queued: bool) -> Result<(), JobBusError> {
        let now = Utc::now();
        let running = self.service().with_status(JobStatus::Running).await?;
        for row in &running {
            self.service()
                .transition(
                    &row.uid,
                    JobStatus::Failed,
                    StatusUpdate::failed(now, JobErrorCode::INTERRUPTED, "server stopped while the job was running"),
                )
                .await?;
        }

        let queued = self.service().with_status(JobStatus::Queued).await?;
        let mut restored = 0usize;
        for row in &queued {
            let Some(message) = message_from_row(row) else {
                warn!(job_uid = %row.uid, topic = %row.topic, "Queued job has an unknown topic");
                continue;
            };
            if republish_queued {
                if let Err(e) = self.publish(&message).await {
                    error!(job_uid = %row.uid, error = %e, "Republish failed");
                    let msg = e.to_string();
                    self.service()
                        .transition(
                            &row.uid,
                            JobStatus::Failed,
                            StatusUpdate::failed(now, JobErrorCode::PUBLISH_FAILED, &msg),
                        )
                        .await?;
                    continue;
                }
            } else {
                self.mark_queued(&message);
            }
            restored += 1;
        }

        if !running.is_empty() || restored > 0 {
            info!(
                interrupted = running.len(),
                requeued = restored,
                "Recovered jobs from previous run"
            );
        }
        Ok(())
    }

    fn emit(
        &self,
        event: &str,
        message: &JobMessage,
        status: JobStatus,
        progress: Option<u8>,
        error: Option<(&str, &str)>,
    ) {
        self.events.broadcast(
            event,
            JobEvent {
                job_uid: message.job_uid.clone(),
                topic: message.topic,
                status,
                image_uid: message.image_uid.clone(),
                progress,
                error_code: error.map(|(code, _)| code.to_string()),
                error: error.map(|(_, msg)| msg.to_string()),
            },
        );
    }
}

fn message_from_row(row: &worker_job::Model) -> Option<JobMessage> {
    Some(JobMessage {
        job_uid: row.uid.clone(),
        topic: row.topic.parse().ok()?,
        command: row.command.clone(),
        image_uid: row.image_uid.clone(),
        payload: row.payload.clone(),
        enqueued_at: row.enqueued_at,
    })
}

#[async_trait]
impl JobLifecycle for JobBus {
    async fn on_started(&self, message: &JobMessage) -> bool {
        let uid = &message.job_uid;
        if self.is_cancelled(uid) {
            self.active.remove(uid);
            return false;
        }
        self.dequeued(message.topic);

        match self
            .update_status(uid, JobStatus::Running, StatusUpdate::started(Utc::now()))
            .await
        {
            Ok(true) => {
                self.emit(EventName::JOB_STARTED, message, JobStatus::Running, None, None);
                true
            }
            Ok(false) => {
                debug!(job_uid = %uid, "Job row is no longer queued, skipping");
                self.active.remove(uid);
                false
            }
            Err(e) => {
                // The handler will meet the same database trouble and retry.
                error!(job_uid = %uid, error = %e, "Failed to mark job running");
                self.active.insert(uid.clone(), JobStatus::Running);
                self.emit(EventName::JOB_STARTED, message, JobStatus::Running, None, None);
                true
            }
        }
    }

    async fn on_progress(&self, message: &JobMessage, progress: u8) {
        self.emit(
            EventName::JOB_PROGRESS,
            message,
            JobStatus::Running,
            Some(progress),
            None,
        );
    }

    async fn on_retry(&self, message: &JobMessage, attempt: u32, error: &str) {
        if let Err(e) = self
            .service()
            .record_attempt(&message.job_uid, attempt, error)
            .await
        {
            warn!(job_uid = %message.job_uid, error = %e, "Failed to record attempt");
        }
    }

    async fn on_completed(&self, message: &JobMessage) {
        match self
            .update_status(
                &message.job_uid,
                JobStatus::Completed,
                StatusUpdate::finished(Utc::now()),
            )
            .await
        {
            Ok(true) => {
                self.emit(EventName::JOB_COMPLETED, message, JobStatus::Completed, Some(100), None);
            }
            Ok(false) => {
                // Cancelled while the handler was finishing.
                self.active.remove(&message.job_uid);
            }
            Err(e) => {
                error!(job_uid = %message.job_uid, error = %e, "Failed to mark job completed");
                self.active.remove(&message.job_uid);
            }
        }
    }

    async fn on_cancelled(&self, message: &JobMessage) {
        // The row was written by `cancel`; this only settles a running row
        // whose cancellation raced with the start.
        if let Err(e) = self
            .update_status(
                &message.job_uid,
                JobStatus::Cancelled,
                StatusUpdate::finished(Utc::now()),
            )
            .await
        {
            warn!(job_uid = %message.job_uid, error = %e, "Failed to mark job cancelled");
        }
        self.active.remove(&message.job_uid);
    }

    async fn on_failed(&self, message: &JobMessage, failure: JobFailure) {
        let now = Utc::now();
        if let Err(e) = self
            .update_status(
                &message.job_uid,
                JobStatus::Failed,
                StatusUpdate::failed(now, failure.error_code, &failure.error_msg),
            )
            .await
        {
            error!(job_uid = %message.job_uid, error = %e, "Failed to mark job failed");
        }
        self.active.remove(&message.job_uid);

        if let Err(e) = self
            .service()
            .dead_letter(message, failure.error_code, &failure.error_msg, &failure.history)
            .await
        {
            error!(job_uid = %message.job_uid, error = %e, "Failed to dead-letter job");
        }

        self.emit(
            EventName::JOB_FAILED,
            message,
            JobStatus::Failed,
            None,
            Some((failure.error_code, &failure.error_msg)),
        );
    }

    fn is_cancelled(&self, job_uid: &str) -> bool {
        matches!(
            self.active.get(job_uid).map(|s| *s),
            Some(JobStatus::Cancelled)
        )
    }
}
