use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One entry of a collection's ordered image list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CollectionImage {
    pub image_uid: String,
    pub added_at: chrono::DateTime<chrono::Utc>,
    pub added_by: String,
}

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "collection")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,

    pub name: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    pub private: bool,

    #[sea_orm(indexed)]
    pub owner_uid: String,

    /// Ordered list of [`CollectionImage`] stored as a JSON array.
    #[sea_orm(column_type = "JsonBinary")]
    pub images: Json,

    /// Always equal to the length of `images`.
    pub image_count: i32,

    pub thumbnail_uid: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn image_list(&self) -> Vec<CollectionImage> {
        serde_json::from_value(self.images.clone()).unwrap_or_default()
    }
}
