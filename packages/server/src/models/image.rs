use chrono::{DateTime, Utc};
use common::{ColorLabel, ExifData, ImageMetadata};
use serde::{Deserialize, Serialize};

use crate::assets::AssetPatch;
use crate::entity::image;

use super::shared::{Pagination, double_option};

/// Query parameters for listing images.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ImageListQuery {
    /// Page number (1-indexed).
    #[param(example = 1)]
    pub page: Option<u64>,
    /// Items per page (1-100, default 20).
    #[param(example = 20)]
    pub limit: Option<u64>,
    /// Only images of this owner.
    pub owner: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ImageResponse {
    #[schema(example = "2bE9x0QkLwM1aV7cZr4HyP8d")]
    pub uid: String,
    pub owner_uid: String,
    #[schema(example = "beach")]
    pub name: String,
    pub description: Option<String>,
    pub private: bool,
    /// True once thumbnail and thumbhash exist.
    pub processed: bool,
    pub width: i32,
    pub height: i32,
    #[schema(example = "da39a3ee5e6b4b0d3255bfef95601890afd80709")]
    pub checksum: String,
    pub metadata: ImageMetadata,
    pub taken_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<image::Model> for ImageResponse {
    fn from(m: image::Model) -> Self {
        let metadata = m.metadata();
        Self {
            uid: m.uid,
            owner_uid: m.owner_uid,
            name: m.name,
            description: m.description,
            private: m.private,
            processed: m.processed,
            width: m.width,
            height: m.height,
            checksum: m.checksum,
            metadata,
            taken_at: m.taken_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
            deleted_at: m.deleted_at,
        }
    }
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ImageListResponse {
    pub data: Vec<ImageResponse>,
    pub pagination: Pagination,
}

/// Body of `POST /images/url`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct UrlUploadRequest {
    #[schema(example = "https://example.com/photo.jpg")]
    pub url: String,
    /// Name to store the file under. Defaults to the last URL path segment.
    pub filename: Option<String>,
    /// Expected hex SHA-1 of the fetched bytes.
    pub checksum: Option<String>,
}

/// PATCH body for an image. Absent fields are left unchanged.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct UpdateImageRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<String>)]
    pub description: Option<Option<String>>,
    pub private: Option<bool>,
    /// 0-5, or null to clear.
    #[serde(default, deserialize_with = "double_option")]
    #[schema(value_type = Option<u8>)]
    pub rating: Option<Option<u8>>,
    pub label: Option<ColorLabel>,
    pub keywords: Option<Vec<String>>,
}

impl From<UpdateImageRequest> for AssetPatch {
    fn from(r: UpdateImageRequest) -> Self {
        Self {
            name: r.name,
            description: r.description,
            private: r.private,
            rating: r.rating,
            label: r.label,
            keywords: r.keywords,
        }
    }
}

/// Body of `DELETE /images`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct DeleteImagesRequest {
    pub uids: Vec<String>,
    /// Delete permanently instead of moving to the trash.
    #[serde(default)]
    pub force: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DeleteResult {
    pub uid: String,
    /// HTTP status for this uid alone.
    #[schema(example = 204)]
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct DeleteImagesResponse {
    pub results: Vec<DeleteResult>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ExifQuery {
    /// Return the stored record instead of reading the file again.
    #[serde(default)]
    pub simple: bool,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ExifResponse {
    pub uid: String,
    pub exif: Option<ExifData>,
}
