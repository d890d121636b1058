use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collections::{CollectionPatch, NewCollection};
use crate::entity::collection::{self, CollectionImage};

use super::shared::{Pagination, double_option};

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CreateCollectionRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
}

impl From<CreateCollectionRequest> for NewCollection {
    fn from(r: CreateCollectionRequest) -> Self {
        Self {
            name: r.name,
            description: r.description,
            private: r.private,
        }
    }
}

#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct UpdateCollectionRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub private: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub thumbnail_uid: Option<Option<String>>,
}

impl From<UpdateCollectionRequest> for CollectionPatch {
    fn from(r: UpdateCollectionRequest) -> Self {
        Self {
            name: r.name,
            description: r.description,
            private: r.private,
            thumbnail_uid: r.thumbnail_uid,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct CollectionImagesRequest {
    pub uids: Vec<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CollectionResponse {
    pub uid: String,
    pub name: String,
    pub description: Option<String>,
    pub private: bool,
    pub owner_uid: String,
    pub images: Vec<CollectionImage>,
    pub image_count: i32,
    pub thumbnail_uid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<collection::Model> for CollectionResponse {
    fn from(m: collection::Model) -> Self {
        Self {
            images: m.image_list(),
            uid: m.uid,
            name: m.name,
            description: m.description,
            private: m.private,
            owner_uid: m.owner_uid,
            image_count: m.image_count,
            thumbnail_uid: m.thumbnail_uid,
            created_at: m.created_at,
            updated_at: m.updated_at,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct CollectionListResponse {
    pub data: Vec<CollectionResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListCollectionsQuery {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}
