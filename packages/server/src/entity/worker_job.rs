use common::JobStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Persistent record of a job. `uid` is also the bus message id.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "worker_job")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,

    /// `image_process`, `exif_process` or `xmp_generation`.
    #[sea_orm(indexed)]
    pub topic: String,

    pub command: Option<String>,

    #[sea_orm(indexed)]
    pub image_uid: Option<String>,

    #[sea_orm(indexed)]
    pub status: JobStatus,

    pub attempts: i32,

    pub enqueued_at: DateTimeUtc,
    pub started_at: Option<DateTimeUtc>,
    pub completed_at: Option<DateTimeUtc>,

    pub error_code: Option<String>,

    /// At most 1024 bytes.
    #[sea_orm(column_type = "Text", nullable)]
    pub error_msg: Option<String>,

    /// Serialized payload, at most 10 000 bytes.
    #[sea_orm(column_type = "Text")]
    pub payload: String,
}

impl ActiveModelBehavior for ActiveModel {}
