use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobStatus, JobTopic};

/// Event names emitted for the job and image lifecycle.
pub struct EventName;

impl EventName {
    pub const JOB_STARTED: &'static str = "job-started";
    pub const JOB_PROGRESS: &'static str = "job-progress";
    pub const JOB_COMPLETED: &'static str = "job-completed";
    pub const JOB_FAILED: &'static str = "job-failed";
    pub const JOB_CANCELLED: &'static str = "job-cancelled";
    pub const IMAGE_CREATED: &'static str = "image-created";
    pub const IMAGE_UPDATED: &'static str = "image-updated";
    pub const IMAGE_RESTORED: &'static str = "image-restored";
    pub const IMAGE_DELETED: &'static str = "image-deleted";
}

/// One entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct EventRecord {
    /// Strictly increasing, assigned when the event is fanned out.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event: String,
    #[schema(value_type = Object)]
    pub data: serde_json::Value,
}

/// Payload of `job-*` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_uid: String,
    pub topic: JobTopic,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_uid: Option<String>,
    /// 0..=100, only on progress events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
