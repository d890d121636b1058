use async_trait::async_trait;
use common::asset::parse_exif_datetime;
use common::storage::write_atomic;
use common::JobTopic;
use imaging::xmp::{SidecarFields, render_sidecar};
use tracing::info;
use worker::{JobContext, JobError, JobHandler};

use super::{HandlerDeps, announce_update, load_live_image, storage_error};
use crate::entity::image;

pub const CREATOR_TOOL: &str = "Lumen";
const SIDECAR_TEMP_PREFIX: &str = ".xmp-";

/// Writes `<uid>.xmp` next to the original, replacing any earlier one.
pub struct XmpGenerationHandler {
    deps: HandlerDeps,
}

impl XmpGenerationHandler {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl JobHandler for XmpGenerationHandler {
    async fn handle(&self, ctx: &JobContext) -> Result<(), JobError> {
        let uid = ctx.require_image_uid()?.to_string();
        let row = load_live_image(&self.deps.db, &uid).await?;
        ctx.progress(30).await?;

        let xml = render_sidecar(&sidecar_fields(&row));
        let path = self.deps.library.sidecar_path(&uid).map_err(storage_error)?;
        let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(JobError::Fatal("sidecar path has no parent".into()));
        };
        ctx.progress(60).await?;

        write_atomic(dir, &name.to_string_lossy(), xml.as_bytes(), SIDECAR_TEMP_PREFIX)
            .await
            .map_err(storage_error)?;
        ctx.progress(90).await?;

        announce_update(&self.deps.events, &uid, JobTopic::XmpGeneration);
        info!(image_uid = %uid, "Sidecar written");
        Ok(())
    }
}

/// Sidecar content for an image row.
pub fn sidecar_fields(row: &image::Model) -> SidecarFields {
    let meta = row.metadata();
    let exif = row.exif_data().unwrap_or_default();
    let date = |v: &Option<String>| v.as_deref().and_then(parse_exif_datetime);

    SidecarFields {
        creator_tool: CREATOR_TOOL.to_string(),
        create_date: date(&exif.date_taken).or(meta.file_created_at),
        modify_date: date(&exif.date_modified).or(meta.file_modified_at),
        make: non_empty(&exif.make),
        model: non_empty(&exif.model),
        software: non_empty(&exif.software),
        orientation: exif.orientation_value(),
        label: meta.label,
        rating: meta.rating,
        keywords: meta.keywords,
        description: row.description.clone(),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
