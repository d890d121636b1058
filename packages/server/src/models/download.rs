use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::download_token;

fn default_true() -> bool {
    true
}

/// Body of `POST /download/sign`.
#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct SignRequest {
    pub uids: Vec<String>,
    /// Seconds until the token expires. Omit for no expiry.
    #[schema(example = 3600)]
    pub expires_in: Option<i64>,
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub allow_download: bool,
    #[serde(default)]
    pub allow_embed: bool,
    #[serde(default = "default_true")]
    pub show_metadata: bool,
    pub description: Option<String>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct TokenResponse {
    /// Opaque token, 64 hex characters.
    pub token: String,
    pub uids: Vec<String>,
    pub allow_download: bool,
    pub allow_embed: bool,
    pub show_metadata: bool,
    pub password_protected: bool,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<download_token::Model> for TokenResponse {
    fn from(m: download_token::Model) -> Self {
        Self {
            uids: m.uids(),
            token: m.uid,
            allow_download: m.allow_download,
            allow_embed: m.allow_embed,
            show_metadata: m.show_metadata,
            password_protected: m.password_hash.is_some(),
            description: m.description,
            created_at: m.created_at,
            expires_at: m.expires_at,
        }
    }
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct DownloadQuery {
    pub token: String,
    pub password: Option<String>,
}

/// Body of `POST /download`. An empty list downloads every authorized image.
#[derive(Debug, Default, Deserialize, utoipa::ToSchema)]
pub struct BulkDownloadRequest {
    #[serde(default)]
    pub uids: Vec<String>,
}

/// Token credentials accepted by the file endpoints in place of a session.
#[derive(Debug, Default, Deserialize, utoipa::IntoParams)]
pub struct TokenParams {
    pub token: Option<String>,
    pub password: Option<String>,
}
