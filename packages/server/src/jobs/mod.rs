pub mod bus;
pub mod service;
pub mod targets;

pub use bus::{JobBus, JobCounts, JobLookup};
pub use service::{JobService, ResolveResult, StatusUpdate};

use common::{JobCommand, JobTopic};
use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::AppError;

/// Job type as named by the admin API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum JobKind {
    ThumbnailGeneration,
    XmpGeneration,
    ExifProcessing,
}

impl JobKind {
    pub fn topic(&self) -> JobTopic {
        match self {
            Self::ThumbnailGeneration => JobTopic::ImageProcess,
            Self::XmpGeneration => JobTopic::XmpGeneration,
            Self::ExifProcessing => JobTopic::ExifProcess,
        }
    }

    /// Accepts both the admin name (`thumbnailGeneration`) and the topic
    /// name (`image_process`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "thumbnailGeneration" | "image_process" => Some(Self::ThumbnailGeneration),
            "xmpGeneration" | "xmp_generation" => Some(Self::XmpGeneration),
            "exifProcessing" | "exif_process" => Some(Self::ExifProcessing),
            _ => None,
        }
    }
}

/// Where a job came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSource {
    Upload,
    Admin,
    DeadLetterRetry,
}

/// Payload carried by every image job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageJobPayload {
    pub image_uid: String,
    pub requested_by: String,
    pub source: JobSource,
}

#[derive(Debug, Error)]
pub enum JobBusError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),

    #[error("Failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The row exists and is failed with `publish_failed`.
    #[error("Failed to publish job {job_uid}: {source}")]
    Publish {
        job_uid: String,
        #[source]
        source: mq::MqError,
    },

    #[error("Job not found")]
    NotFound,

    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    Conflict(String),
}

impl From<JobBusError> for AppError {
    fn from(err: JobBusError) -> Self {
        match err {
            JobBusError::NotFound => AppError::NotFound("Job not found".into()),
            JobBusError::Invalid(msg) => AppError::Validation(msg),
            JobBusError::Conflict(msg) => AppError::Conflict(msg),
            other => AppError::Internal(other.to_string()),
        }
    }
}

/// Which images a batch of `command` jobs targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchRequest {
    pub kind: JobKind,
    pub command: JobCommand,
    pub image_uid: Option<String>,
}
