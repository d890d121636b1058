//! Image rows together with their directories in the library.

use chrono::Utc;
use common::storage::library::{canonical_file_name, file_extension};
use common::storage::{Checksum, Library, StorageError};
use common::{ColorLabel, ImageMetadata};
use imaging::{ImagingRuntime, probe_dimensions};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, instrument, warn};

use crate::entity::{collection, download_token, image};
use crate::error::AppError;

/// An upload as received from a client.
#[derive(Debug)]
pub struct NewAsset {
    pub bytes: Vec<u8>,
    pub original_name: String,
    pub owner_uid: String,
    /// Hex SHA-1 the client claims; the upload is rejected on mismatch.
    pub expected_checksum: Option<String>,
}

/// User-editable fields. `None` leaves a field untouched; for `description`
/// and `rating`, `Some(None)` clears it.
#[derive(Debug, Default, Clone)]
pub struct AssetPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub private: Option<bool>,
    pub rating: Option<Option<u8>>,
    pub label: Option<ColorLabel>,
    pub keywords: Option<Vec<String>>,
}

impl AssetPatch {
    fn touches_metadata(&self) -> bool {
        self.rating.is_some() || self.label.is_some() || self.keywords.is_some()
    }
}

/// Filters for [`AssetStore::list`].
#[derive(Debug, Default, Clone)]
pub struct ListFilter {
    /// Restrict to one owner.
    pub owner_uid: Option<String>,
    /// Also return private images of other owners.
    pub include_private: bool,
    /// Viewer whose own private images are always visible.
    pub viewer_uid: Option<String>,
}

/// Outcome of a hard delete, for logging and the bulk delete response.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HardDeleteReport {
    pub tokens_removed: u64,
    pub collections_updated: u64,
}

pub struct AssetStore<'a> {
    db: &'a DatabaseConnection,
    library: &'a Library,
    imaging: &'a ImagingRuntime,
}

impl<'a> AssetStore<'a> {
    pub fn new(db: &'a DatabaseConnection, library: &'a Library, imaging: &'a ImagingRuntime) -> Self {
        Self {
            db,
            library,
            imaging,
        }
    }

    /// Store a new original and its row.
    ///
    /// The file is written before the row is committed and removed again if
    /// the insert fails.
    #[instrument(skip(self, asset), fields(owner = %asset.owner_uid, name = %asset.original_name, size = asset.bytes.len()))]
    pub async fn create(&self, asset: NewAsset) -> Result<image::Model, AppError> {
        if asset.bytes.is_empty() {
            return Err(AppError::Validation("File is empty".into()));
        }
        let checksum = Checksum::compute(&asset.bytes);
        if let Some(expected) = asset.expected_checksum.as_deref().filter(|c| !c.is_empty())
            && Checksum::from_hex(expected)? != checksum
        {
            return Err(AppError::Validation(
                "checksum does not match the uploaded bytes".into(),
            ));
        }
        let checksum = checksum.to_hex();

        let duplicate = image::Entity::find()
            .filter(image::Column::OwnerUid.eq(&asset.owner_uid))
            .filter(image::Column::Checksum.eq(&checksum))
            .filter(image::Column::DeletedAt.is_null())
            .one(self.db)
            .await?;
        if let Some(existing) = duplicate {
            return Err(AppError::Conflict(format!(
                "Image already uploaded as {}",
                existing.uid
            )));
        }

        let file_type = file_extension(&asset.original_name).unwrap_or_default();
        let bytes = asset.bytes;
        let ft = file_type.clone();
        let (bytes, (width, height)) = self
            .imaging
            .run(move |limits| {
                let dims = probe_dimensions(&bytes, limits, (!ft.is_empty()).then_some(ft.as_str()))?;
                Ok((bytes, dims))
            })
            .await
            .map_err(|e| AppError::Validation(format!("Unsupported image: {e}")))?;

        let uid = common::uid::generate();
        let file_name = canonical_file_name(&uid, &asset.original_name);
        self.library.write_original(&uid, &file_name, &bytes).await?;

        let now = Utc::now();
        let metadata = ImageMetadata {
            file_name,
            original_file_name: asset.original_name.clone(),
            file_type,
            size_bytes: bytes.len() as i64,
            checksum: checksum.clone(),
            file_modified_at: Some(now),
            ..Default::default()
        };
        let metadata = serde_json::to_value(&metadata)
            .map_err(|e| AppError::Internal(format!("Failed to encode metadata: {e}")))?;

        let row = image::ActiveModel {
            uid: Set(uid.clone()),
            owner_uid: Set(asset.owner_uid),
            name: Set(display_name(&asset.original_name)),
            description: Set(None),
            private: Set(false),
            processed: Set(false),
            width: Set(width as i32),
            height: Set(height as i32),
            checksum: Set(checksum),
            image_metadata: Set(metadata),
            exif: Set(None),
            taken_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            deleted_at: Set(None),
        };

        match row.insert(self.db).await {
            Ok(model) => {
                info!(image_uid = %uid, width, height, "Image stored");
                Ok(model)
            }
            Err(e) => {
                if let Err(purge_err) = self.library.purge(&uid).await {
                    warn!(image_uid = %uid, error = %purge_err, "Failed to remove orphaned original");
                }
                Err(e.into())
            }
        }
    }

    /// A live row. Soft-deleted images are not found.
    pub async fn get(&self, uid: &str) -> Result<image::Model, AppError> {
        image::Entity::find_by_id(uid.to_string())
            .filter(image::Column::DeletedAt.is_null())
            .one(self.db)
            .await?
            .ok_or_else(not_found)
    }

    /// The original bytes of a live image.
    pub async fn read(&self, uid: &str) -> Result<(image::Model, Vec<u8>), AppError> {
        let row = self.get(uid).await?;
        let path = self.library.original_path(uid, &row.metadata().file_name)?;
        let bytes = self.library.read(&path).await?;
        Ok((row, bytes))
    }

    #[instrument(skip(self, patch))]
    pub async fn update(&self, uid: &str, patch: AssetPatch) -> Result<image::Model, AppError> {
        if let Some(Some(rating)) = patch.rating
            && rating > 5
        {
            return Err(AppError::Validation("rating must be between 0 and 5".into()));
        }
        if let Some(name) = &patch.name
            && name.trim().is_empty()
        {
            return Err(AppError::Validation("name must not be empty".into()));
        }

        let txn = self.db.begin().await?;
        let current = image::Entity::find_by_id(uid.to_string())
            .filter(image::Column::DeletedAt.is_null())
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(not_found)?;

        let mut update = image::Entity::update_many()
            .col_expr(image::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(image::Column::Uid.eq(uid));
        if let Some(name) = patch.name.clone() {
            update = update.col_expr(image::Column::Name, Expr::value(name.trim().to_string()));
        }
        if let Some(description) = patch.description.clone() {
            update = update.col_expr(image::Column::Description, Expr::value(description));
        }
        if let Some(private) = patch.private {
            update = update.col_expr(image::Column::Private, Expr::value(private));
        }
        if patch.touches_metadata() {
            let mut metadata = current.metadata();
            if let Some(rating) = patch.rating {
                metadata.rating = rating;
            }
            if let Some(label) = patch.label {
                metadata.label = label;
            }
            if let Some(keywords) = patch.keywords {
                metadata.keywords = normalize_keywords(keywords);
            }
            let metadata = serde_json::to_value(&metadata)
                .map_err(|e| AppError::Internal(format!("Failed to encode metadata: {e}")))?;
            update = update.col_expr(image::Column::ImageMetadata, Expr::value(metadata));
        }
        update.exec(&txn).await?;

        let updated = image::Entity::find_by_id(uid.to_string())
            .one(&txn)
            .await?
            .ok_or_else(not_found)?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Move the directory into the trash and stamp `deleted_at`, both or neither.
    #[instrument(skip(self))]
    pub async fn soft_delete(&self, uid: &str) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        image::Entity::find_by_id(uid.to_string())
            .filter(image::Column::DeletedAt.is_null())
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(not_found)?;

        let now = Utc::now();
        image::Entity::update_many()
            .col_expr(image::Column::DeletedAt, Expr::value(Some(now)))
            .col_expr(image::Column::UpdatedAt, Expr::value(now))
            .filter(image::Column::Uid.eq(uid))
            .exec(&txn)
            .await?;

        // Dropping `txn` on error rolls the row back.
        self.library.move_to_trash(uid).await?;
        if let Err(e) = txn.commit().await {
            if let Err(undo) = self.library.restore_from_trash(uid).await {
                warn!(image_uid = %uid, error = %undo, "Failed to move directory back after commit failure");
            }
            return Err(e.into());
        }
        info!(image_uid = %uid, "Image moved to trash");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restore(&self, uid: &str) -> Result<image::Model, AppError> {
        let txn = self.db.begin().await?;
        image::Entity::find_by_id(uid.to_string())
            .filter(image::Column::DeletedAt.is_not_null())
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("Image not found in trash".into()))?;

        image::Entity::update_many()
            .col_expr(image::Column::DeletedAt, Expr::value(Option::<chrono::DateTime<Utc>>::None))
            .col_expr(image::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(image::Column::Uid.eq(uid))
            .exec(&txn)
            .await?;

        self.library.restore_from_trash(uid).await?;
        if let Err(e) = txn.commit().await {
            if let Err(undo) = self.library.move_to_trash(uid).await {
                warn!(image_uid = %uid, error = %undo, "Failed to move directory back after commit failure");
            }
            return Err(e.into());
        }

        let row = self.get(uid).await?;
        info!(image_uid = %uid, "Image restored");
        Ok(row)
    }

    /// Remove the row (deleted or not), its directory, tokens that authorize
    /// only this image, and its collection entries.
    ///
    /// Tokens that also name other images are left as they are.
    #[instrument(skip(self))]
    pub async fn hard_delete(&self, uid: &str) -> Result<HardDeleteReport, AppError> {
        let txn = self.db.begin().await?;
        image::Entity::find_by_id(uid.to_string())
            .lock(LockType::Update)
            .one(&txn)
            .await?
            .ok_or_else(not_found)?;

        let mut report = HardDeleteReport::default();

        let tokens = download_token::Entity::find()
            .filter(Expr::cust_with_values(
                r#""image_uids" @> $1"#,
                [serde_json::json!([uid])],
            ))
            .all(&txn)
            .await?;
        let sole: Vec<String> = tokens
            .into_iter()
            .filter(|t| {
                let uids = t.uids();
                !uids.is_empty() && uids.iter().all(|u| u == uid)
            })
            .map(|t| t.uid)
            .collect();
        if !sole.is_empty() {
            report.tokens_removed = download_token::Entity::delete_many()
                .filter(download_token::Column::Uid.is_in(sole))
                .exec(&txn)
                .await?
                .rows_affected;
        }

        let collections = collection::Entity::find()
            .filter(Expr::cust_with_values(
                r#""images" @> $1"#,
                [serde_json::json!([{ "image_uid": uid }])],
            ))
            .lock(LockType::Update)
            .all(&txn)
            .await?;
        for c in collections {
            let images = c.image_list();
            if !images.iter().any(|i| i.image_uid == uid) {
                continue;
            }
            let kept: Vec<_> = images.into_iter().filter(|i| i.image_uid != uid).collect();
            let count = kept.len() as i32;
            let next_thumbnail = kept.first().map(|i| i.image_uid.clone());
            let kept = serde_json::to_value(&kept)
                .map_err(|e| AppError::Internal(format!("Failed to encode collection: {e}")))?;
            let mut update = collection::Entity::update_many()
                .col_expr(collection::Column::Images, Expr::value(kept))
                .col_expr(collection::Column::ImageCount, Expr::value(count))
                .col_expr(collection::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(collection::Column::Uid.eq(&c.uid));
            if c.thumbnail_uid.as_deref() == Some(uid) {
                update = update.col_expr(
                    collection::Column::ThumbnailUid,
                    Expr::value(next_thumbnail),
                );
            }
            update.exec(&txn).await?;
            report.collections_updated += 1;
        }

        image::Entity::delete_by_id(uid.to_string()).exec(&txn).await?;
        txn.commit().await?;

        // The row is gone; a leftover directory only wastes space.
        if let Err(e) = self.library.purge(uid).await {
            warn!(image_uid = %uid, error = %e, "Failed to remove image directory");
        }
        info!(
            image_uid = %uid,
            tokens_removed = report.tokens_removed,
            collections_updated = report.collections_updated,
            "Image permanently deleted"
        );
        Ok(report)
    }

    /// Live images, newest first. `page` is 1-based.
    pub async fn list(
        &self,
        page: u64,
        limit: u64,
        filter: &ListFilter,
    ) -> Result<(Vec<image::Model>, u64), AppError> {
        let mut query = image::Entity::find().filter(image::Column::DeletedAt.is_null());
        if let Some(owner) = &filter.owner_uid {
            query = query.filter(image::Column::OwnerUid.eq(owner));
        }
        if !filter.include_private {
            let mut visible = sea_orm::Condition::any().add(image::Column::Private.eq(false));
            if let Some(viewer) = &filter.viewer_uid {
                visible = visible.add(image::Column::OwnerUid.eq(viewer));
            }
            query = query.filter(visible);
        }

        let paginator = query
            .order_by_desc(image::Column::CreatedAt)
            .order_by_asc(image::Column::Uid)
            .paginate(self.db, limit);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((rows, total))
    }
}

fn not_found() -> AppError {
    AppError::from(StorageError::NotFound("image".into()))
}

/// Upload name without its extension.
pub fn display_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or(original);
    match base.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => base.to_string(),
    }
}

/// Trimmed, non-empty, first occurrence wins.
pub fn normalize_keywords(keywords: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(keywords.len());
    for k in keywords {
        let k = k.trim().to_string();
        if !k.is_empty() && !out.contains(&k) {
            out.push(k);
        }
    }
    out
}
