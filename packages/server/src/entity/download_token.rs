use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Capability to download a fixed set of images. `uid` is the opaque token.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "download_token")]
pub struct Model {
    /// 32 random bytes, hex encoded.
    #[sea_orm(primary_key, auto_increment = false)]
    pub uid: String,

    /// Authorized image UIDs as a JSON array of strings.
    #[sea_orm(column_type = "JsonBinary")]
    pub image_uids: Json,

    pub allow_download: bool,
    pub allow_embed: bool,
    pub show_metadata: bool,

    /// Argon2 PHC string when the token is password protected.
    pub password_hash: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,

    #[sea_orm(indexed)]
    pub created_by: String,

    pub created_at: DateTimeUtc,

    #[sea_orm(indexed)]
    pub expires_at: Option<DateTimeUtc>,
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn uids(&self) -> Vec<String> {
        serde_json::from_value(self.image_uids.clone()).unwrap_or_default()
    }
}
