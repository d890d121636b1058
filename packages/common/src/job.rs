#[cfg(feature = "sea-orm")]
use sea_orm::prelude::StringLen;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upper bound on the serialized payload stored with a job.
pub const MAX_PAYLOAD_LEN: usize = 10_000;

/// Upper bound on `error_msg` stored with a job.
pub const MAX_ERROR_MSG_LEN: usize = 1024;

/// Machine-readable error codes recorded on failed jobs.
pub struct JobErrorCode;

impl JobErrorCode {
    /// The bus refused the message at enqueue time.
    pub const PUBLISH_FAILED: &'static str = "publish_failed";
    /// The handler returned an unrecoverable error.
    pub const HANDLER_FAILED: &'static str = "handler_failed";
    /// The handler kept failing or panicking until the retry cap.
    pub const MAX_RETRIES_EXCEEDED: &'static str = "max_retries_exceeded";
    /// The process stopped while the job was running.
    pub const INTERRUPTED: &'static str = "interrupted";
}

/// Named partition of the job bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobTopic {
    ImageProcess,
    ExifProcess,
    XmpGeneration,
}

impl JobTopic {
    pub const ALL: &'static [JobTopic] = &[Self::ImageProcess, Self::ExifProcess, Self::XmpGeneration];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageProcess => "image_process",
            Self::ExifProcess => "exif_process",
            Self::XmpGeneration => "xmp_generation",
        }
    }
}

impl fmt::Display for JobTopic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobTopic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image_process" => Ok(Self::ImageProcess),
            "exif_process" => Ok(Self::ExifProcess),
            "xmp_generation" => Ok(Self::XmpGeneration),
            _ => Err(format!(
                "Invalid topic '{s}'. Must be one of: image_process, exif_process, xmp_generation"
            )),
        }
    }
}

/// Lifecycle state of a worker job.
///
/// When the `sea-orm` feature is enabled, this enum can be used directly in SeaORM entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[cfg_attr(
    feature = "sea-orm",
    derive(sea_orm::DeriveActiveEnum, sea_orm::EnumIter),
    sea_orm(rs_type = "String", db_type = "String(StringLen::None)")
)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "queued"))]
    Queued,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "running"))]
    Running,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "completed"))]
    Completed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "failed"))]
    Failed,
    #[cfg_attr(feature = "sea-orm", sea_orm(string_value = "cancelled"))]
    Cancelled,
}

impl JobStatus {
    pub const ALL: &'static [JobStatus] = &[
        Self::Queued,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether `self -> next` is an allowed transition.
    ///
    /// `queued -> running -> {completed, failed, cancelled}`, plus
    /// `queued -> {cancelled, failed}` (cancel before dispatch, publish failure).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (Self::Queued, Self::Running | Self::Cancelled | Self::Failed) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|st| st.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid status '{s}'"))
    }
}

/// How a batch of jobs selects its target images.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobCommand {
    /// Every non-deleted image.
    All,
    /// Only images lacking the artifact the topic produces.
    Missing,
    /// Exactly one image, named by `image_uid`.
    Single,
}

impl JobCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Missing => "missing",
            Self::Single => "single",
        }
    }
}

impl fmt::Display for JobCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message carried by the bus. `job_uid` doubles as the message id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_uid: String,
    pub topic: JobTopic,
    pub command: Option<String>,
    pub image_uid: Option<String>,
    /// Serialized payload, already truncated to [`MAX_PAYLOAD_LEN`].
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
}

/// Keep at most the first `max` bytes of `s`, backing off to a char boundary.
pub fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Bound an error message for storage on the job row.
pub fn bound_error_msg(msg: &str) -> String {
    truncate_bytes(msg, MAX_ERROR_MSG_LEN)
}
