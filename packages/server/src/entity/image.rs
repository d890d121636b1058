use chrono::{DateTime, Utc};
use common::{ExifData, ImageMetadata};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// An uploaded image. The original and its variants live in the library
/// directory named after `uid`, or in the trash while `deleted_at` is set.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "image")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,

    #[sea_orm(indexed)]
    pub owner_uid: String,

    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub private: bool,

    /// False until the image_process job has written thumbhash and thumbnail.
    #[sea_orm(indexed)]
    pub processed: bool,

    pub width: i32,
    pub height: i32,

    /// Copy of `image_metadata.checksum`, indexed for duplicate detection.
    #[sea_orm(indexed)]
    pub checksum: String,

    /// [`ImageMetadata`] as JSON.
    #[sea_orm(column_type = "JsonBinary")]
    pub image_metadata: Json,

    /// [`ExifData`] as JSON, once extracted.
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub exif: Option<Json>,

    #[sea_orm(indexed)]
    pub taken_at: Option<DateTimeUtc>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub deleted_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Decoded metadata column. A malformed column reads as defaults.
    pub fn metadata(&self) -> ImageMetadata {
        serde_json::from_value(self.image_metadata.clone()).unwrap_or_default()
    }

    pub fn exif_data(&self) -> Option<ExifData> {
        self.exif
            .clone()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Timestamp served as `Last-Modified`.
    pub fn last_modified(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
