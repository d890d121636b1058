use chrono::{DateTime, Utc};
use common::{JobCommand, JobStatus};
use serde::{Deserialize, Serialize};

use crate::entity::{dead_letter_job, worker_job};
use crate::jobs::{JobKind, JobLookup};

use super::shared::Pagination;

/// Body of `POST /admin/jobs`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct EnqueueJobsRequest {
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub command: JobCommand,
    /// Required for `single`.
    pub image_uid: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct EnqueueJobsResponse {
    pub count: usize,
    pub job_uids: Vec<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub uid: String,
    #[schema(example = "image_process")]
    pub topic: String,
    pub command: Option<String>,
    pub image_uid: Option<String>,
    pub status: JobStatus,
    pub attempts: i32,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_code: Option<String>,
    pub error_msg: Option<String>,
    /// False when only the in-memory state was available.
    pub persisted: bool,
}

impl From<worker_job::Model> for JobResponse {
    fn from(m: worker_job::Model) -> Self {
        Self {
            uid: m.uid,
            topic: m.topic,
            command: m.command,
            image_uid: m.image_uid,
            status: m.status,
            attempts: m.attempts,
            enqueued_at: Some(m.enqueued_at),
            started_at: m.started_at,
            completed_at: m.completed_at,
            error_code: m.error_code,
            error_msg: m.error_msg,
            persisted: true,
        }
    }
}

impl From<JobLookup> for JobResponse {
    fn from(lookup: JobLookup) -> Self {
        match lookup {
            JobLookup::Row(row) => row.into(),
            JobLookup::Active { uid, status } => Self {
                uid,
                topic: String::new(),
                command: None,
                image_uid: None,
                status,
                attempts: 0,
                enqueued_at: None,
                started_at: None,
                completed_at: None,
                error_code: None,
                error_msg: None,
                persisted: false,
            },
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsQuery {
    /// Topic or admin job type.
    pub topic: Option<String>,
    pub status: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct JobListResponse {
    pub data: Vec<JobResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CancelJobResponse {
    pub uid: String,
    /// Status before the cancellation.
    pub previous_status: JobStatus,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ConcurrencyRequest {
    #[schema(example = 4, minimum = 1, maximum = 100)]
    pub concurrency: usize,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ConcurrencyResponse {
    #[schema(example = "image_process")]
    pub topic: String,
    pub concurrency: usize,
    pub previous: usize,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListDeadLettersQuery {
    pub resolved: Option<bool>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DeadLetterResponse {
    pub id: i32,
    pub job_uid: String,
    pub topic: String,
    pub image_uid: Option<String>,
    #[schema(example = "max_retries_exceeded")]
    pub error_code: String,
    pub error_message: String,
    pub retry_count: i32,
    /// `[{attempt, error, timestamp}]`
    #[schema(value_type = Object)]
    pub retry_history: serde_json::Value,
    pub first_failed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

impl From<dead_letter_job::Model> for DeadLetterResponse {
    fn from(m: dead_letter_job::Model) -> Self {
        Self {
            id: m.id,
            job_uid: m.job_uid,
            topic: m.topic,
            image_uid: m.image_uid,
            error_code: m.error_code,
            error_message: m.error_message,
            retry_count: m.retry_count,
            retry_history: m.retry_history,
            first_failed_at: m.first_failed_at,
            created_at: m.created_at,
            resolved: m.resolved,
            resolved_at: m.resolved_at,
            resolved_by: m.resolved_by,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DeadLetterListResponse {
    pub data: Vec<DeadLetterResponse>,
    pub pagination: Pagination,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct RetryDeadLetterResponse {
    /// Uid of the newly enqueued job.
    pub job_uid: String,
}
