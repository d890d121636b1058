use async_trait::async_trait;
use chrono::Utc;
use common::JobTopic;
use common::storage::write_atomic;
use imaging::color::{color_space_label, normalize_to_srgb};
use imaging::exif::extract_exif;
use imaging::thumbnail::{DISPLAY_THUMBNAIL_WIDTH, thumbhash_base64, thumbnail_jpeg};
use imaging::transform::autorotate;
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QuerySelect, TransactionTrait};
use tracing::{debug, info, warn};
use worker::{JobContext, JobError, JobHandler};

use super::{
    HandlerDeps, announce_update, db_error, imaging_error, load_live_image, storage_error,
};
use crate::entity::image;

const THUMBNAIL_TEMP_PREFIX: &str = ".thumb-";

/// Display thumbnail, thumbhash, color info and EXIF for one image.
pub struct ImageProcessHandler {
    deps: HandlerDeps,
}

impl ImageProcessHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ImageProcessHandler {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        let uid = ctx.require_image_uid()?.to_string();
        let row = load_live_image(&self.deps.db, &uid).await?;
        let meta = row.metadata();

        let original = self
            .deps
            .library
            .original_path(&uid, &meta.file_name)
            .map_err(storage_error)?;
        let bytes = self.deps.library.read(&original).await.map_err(storage_error)?;
        ctx.progress(25).await?;

        let file_type = meta.file_type.clone();
        let (oriented, thumbnail, color_space, has_icc, decoded_bytes) = self
            .deps
            .imaging
            .run(move |limits| {
                let ft = (!file_type.is_empty()).then_some(file_type.as_str());
                let decoded = imaging::decode(&bytes, limits, ft)?;
                let color_space = color_space_label(&decoded);
                let has_icc = decoded.icc_profile.is_some();
                let mut image = normalize_to_srgb(&decoded);
                autorotate(&mut image, decoded.orientation);
                let thumbnail = thumbnail_jpeg(&image, DISPLAY_THUMBNAIL_WIDTH, 0)?;
                Ok((image, thumbnail, color_space, has_icc, bytes))
            })
            .await
            .map_err(imaging_error)?;

        let thumb_path = self.deps.library.thumbnail_path(&uid).map_err(storage_error)?;
        let (Some(dir), Some(name)) = (thumb_path.parent(), thumb_path.file_name()) else {
            return Err(JobError::Fatal("thumbnail path has no parent".into()));
        };
        write_atomic(dir, &name.to_string_lossy(), &thumbnail, THUMBNAIL_TEMP_PREFIX)
            .await
            .map_err(storage_error)?;
        ctx.progress(40).await?;

        let (width, height) = (oriented.width(), oriented.height());
        let thumbhash = self
            .deps
            .imaging
            .run(move |_| Ok(thumbhash_base64(&oriented)))
            .await
            .map_err(imaging_error)?;
        ctx.progress(55).await?;

        let exif = match self
            .deps
            .imaging
            .run(move |_| extract_exif(&decoded_bytes))
            .await
        {
            Ok(exif) => exif,
            Err(e) => {
                // A broken EXIF block does not make the image unusable.
                warn!(image_uid = %uid, error = %e, "EXIF extraction failed");
                None
            }
        };
        ctx.progress(70).await?;

        // Re-read under a row lock and touch only the columns this job owns,
        // so edits made since the job started survive.
        let txn = self.deps.db.begin().await.map_err(db_error)?;
        let current = image::Entity::find_by_id(uid.clone())
            .filter(image::Column::DeletedAt.is_null())
            .lock(LockType::Update)
            .one(&txn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| JobError::Fatal(format!("image {uid} was deleted during processing")))?;
        ctx.progress(80).await?;

        let mut metadata = current.metadata();
        metadata.thumbhash = Some(thumbhash);
        metadata.color_space = Some(color_space);
        metadata.has_icc_profile = has_icc;
        let metadata = serde_json::to_value(&metadata).map_err(JobError::fatal)?;

        let mut update = image::Entity::update_many()
            .col_expr(image::Column::ImageMetadata, Expr::value(metadata))
            .col_expr(image::Column::Processed, Expr::value(true))
            .col_expr(image::Column::Width, Expr::value(width as i32))
            .col_expr(image::Column::Height, Expr::value(height as i32))
            .col_expr(image::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(image::Column::Uid.eq(uid.as_str()));
        if let Some(exif) = exif {
            let exif = serde_json::to_value(&exif).map_err(JobError::fatal)?;
            update = update.col_expr(image::Column::Exif, Expr::value(Some(exif)));
        } else {
            debug!(image_uid = %uid, "No EXIF to store");
        }
        update.exec(&txn).await.map_err(db_error)?;
        txn.commit().await.map_err(db_error)?;
        ctx.progress(90).await?;

        announce_update(&self.deps.events, &uid, JobTopic::ImageProcess);
        info!(image_uid = %uid, width, height, "Image processed");
        Ok(())
    }
}
