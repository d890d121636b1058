use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::asset::parse_exif_datetime;
use common::{CaptureTimes, EmbeddedTags, ExifData, ImageMetadata, JobTopic};
use imaging::exif::extract_exif;
use imaging::xmp::{find_xmp_packet, parse_tags};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QuerySelect, TransactionTrait};
use tracing::{info, warn};
use worker::{JobContext, JobError, JobHandler};

use super::{
    HandlerDeps, announce_update, db_error, imaging_error, load_live_image, storage_error,
};
use crate::entity::image;

/// EXIF, embedded XMP tags and capture times for one image.
pub struct ExifProcessHandler {
    deps: HandlerDeps,
}

impl ExifProcessHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for ExifProcessHandler {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        let uid = ctx.require_image_uid()?.to_string();
        let row = load_live_image(&self.deps.db, &uid).await?;
        let original = self
            .deps
            .library
            .original_path(&uid, &row.metadata().file_name)
            .map_err(storage_error)?;
        let bytes = self.deps.library.read(&original).await.map_err(storage_error)?;
        ctx.progress(25).await?;

        let (exif, tags) = self
            .deps
            .imaging
            .run(move |_| {
                let exif = extract_exif(&bytes)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Unreadable EXIF block, storing empty record");
                        None
                    })
                    .unwrap_or_default();
                let tags = find_xmp_packet(&bytes)
                    .map(|packet| parse_tags(&packet))
                    .unwrap_or_default();
                Ok((exif, tags))
            })
            .await
            .map_err(imaging_error)?;
        ctx.progress(50).await?;

        let txn = self.deps.db.begin().await.map_err(db_error)?;
        let current = image::Entity::find_by_id(uid.clone())
            .filter(image::Column::DeletedAt.is_null())
            .lock(LockType::Update)
            .one(&txn)
            .await
            .map_err(db_error)?
            .ok_or_else(|| JobError::Fatal(format!("image {uid} was deleted during processing")))?;

        let mut metadata = current.metadata();
        let taken_at = merge_extracted(&mut metadata, &exif, &tags, Utc::now());
        let metadata = serde_json::to_value(&metadata).map_err(JobError::fatal)?;
        let exif_json = serde_json::to_value(&exif).map_err(JobError::fatal)?;

        image::Entity::update_many()
            .col_expr(image::Column::ImageMetadata, Expr::value(metadata))
            .col_expr(image::Column::Exif, Expr::value(Some(exif_json)))
            .col_expr(image::Column::TakenAt, Expr::value(Some(taken_at)))
            .col_expr(image::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(image::Column::Uid.eq(uid.as_str()))
            .exec(&txn)
            .await
            .map_err(db_error)?;
        txn.commit().await.map_err(db_error)?;
        ctx.progress(90).await?;

        announce_update(&self.deps.events, &uid, JobTopic::ExifProcess);
        info!(image_uid = %uid, taken_at = %taken_at, "EXIF processed");
        Ok(())
    }
}

/// Fold freshly extracted EXIF and XMP tags into the stored metadata.
///
/// Rating, label and keywords are only filled while unset. Capture times
/// come from EXIF; when EXIF has no dates, times recorded by an earlier
/// run are kept so running the job twice changes nothing. Returns the
/// resulting `taken_at`.
pub fn merge_extracted(
    metadata: &mut ImageMetadata,
    exif: &ExifData,
    tags: &EmbeddedTags,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    let mut tags = tags.clone();
    if tags.rating.is_none() {
        tags.rating = exif.rating_value();
    }
    metadata.fill_from_tags(&tags);

    let has_exif_dates = [&exif.date_taken, &exif.date_modified]
        .iter()
        .any(|d| d.as_deref().and_then(parse_exif_datetime).is_some());

    if has_exif_dates || metadata.file_created_at.is_none() {
        let times = CaptureTimes::resolve(exif, now);
        metadata.file_created_at = Some(times.created);
        metadata.file_modified_at = Some(times.modified);
    }
    metadata.file_created_at.unwrap_or(now)
}
