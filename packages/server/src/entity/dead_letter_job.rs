use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A job that failed for good, kept with its retry history.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "dead_letter_job")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub job_uid: String,

    #[sea_orm(indexed)]
    pub topic: String,

    #[sea_orm(indexed)]
    pub image_uid: Option<String>,

    #[sea_orm(column_type = "Text")]
    pub payload: String,

    #[sea_orm(column_type = "Text")]
    pub error_message: String,

    /// `max_retries_exceeded` or `handler_failed`.
    #[sea_orm(indexed)]
    pub error_code: String,

    pub retry_count: i32,

    /// Full retry history as JSON array: [{attempt, error, timestamp}]
    #[sea_orm(column_type = "JsonBinary")]
    pub retry_history: Json,

    pub first_failed_at: DateTimeUtc,

    pub created_at: DateTimeUtc,

    #[sea_orm(default_value = false, indexed)]
    pub resolved: bool,

    pub resolved_at: Option<DateTimeUtc>,

    pub resolved_by: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
