use std::sync::Arc;

use async_trait::async_trait;
use common::JobMessage;
use common::retry::RetryHistory;
use serde::de::DeserializeOwned;

use crate::error::JobError;

/// Processes messages of one topic.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Why a job ended up failed.
#[derive(Debug, Clone)]
pub struct JobFailure {
    pub error_code: &'static str,
    pub error_msg: String,
    /// Every failed attempt, oldest first.
    pub history: RetryHistory,
    /// True when the retry policy gave up, false for fatal errors.
    pub retries_exhausted: bool,
}

/// Where the pool reports job state. The server persists it and emits events.
#[async_trait]
pub trait JobLifecycle: Send + Sync {
    /// The job is about to run for the first time. Returning `false` skips
    /// it, e.g. because it was cancelled while queued.
    async fn on_started(&self, message: &JobMessage) -> bool;

    async fn on_progress(&self, message: &JobMessage, progress: u8);

    async fn on_retry(&self, _message: &JobMessage, _attempt: u32, _error: &str) {}

    async fn on_completed(&self, message: &JobMessage);

    async fn on_cancelled(&self, message: &JobMessage);

    async fn on_failed(&self, message: &JobMessage, failure: JobFailure);

    fn is_cancelled(&self, job_uid: &str) -> bool;
}

/// What a handler sees of the job it is running.
pub struct JobContext {
    message: JobMessage,
    attempt: u32,
    lifecycle: Arc<dyn JobLifecycle>,
}

impl JobContext {
    pub fn new(message: JobMessage, attempt: u32, lifecycle: Arc<dyn JobLifecycle>) -> Self {
        Self {
            message,
            attempt,
            lifecycle,
        }
    }

    pub fn message(&self) -> &JobMessage {
        &self.message
    }

    pub fn job_uid(&self) -> &str {
        &self.message.job_uid
    }

    pub fn image_uid(&self) -> Option<&str> {
        self.message.image_uid.as_deref()
    }

    /// The image this job targets, or a fatal error if it has none.
    pub fn require_image_uid(&self) -> Result<&str, JobError> {
        self.image_uid()
            .ok_or_else(|| JobError::Fatal("job has no target image".into()))
    }

    /// 1-based attempt number.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, JobError> {
        serde_json::from_str(&self.message.payload).map_err(JobError::fatal)
    }

    /// Fails with [`JobError::Cancelled`] once the job has been cancelled.
    pub fn checkpoint(&self) -> Result<(), JobError> {
        if self.lifecycle.is_cancelled(&self.message.job_uid) {
            return Err(JobError::Cancelled);
        }
        Ok(())
    }

    /// Report progress (0..=100). Doubles as a cancellation checkpoint.
    pub async fn progress(&self, progress: u8) -> Result<(), JobError> {
        self.checkpoint()?;
        self.lifecycle
            .on_progress(&self.message, progress.min(100))
            .await;
        Ok(())
    }
}
