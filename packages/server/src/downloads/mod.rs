//! Capability tokens for downloading sets of images, and the ZIP stream
//! they unlock.

pub mod archive;
pub mod token;

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use common::storage::Library;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::entity::image;
use crate::error::AppError;

pub use archive::{ArchiveEntry, zip_stream};
pub use token::{TokenOptions, TokenOutcome, ValidToken};

/// Archive entries for `uids` in request order. Deleted or unknown images
/// are left out.
pub async fn archive_entries(
    db: &DatabaseConnection,
    library: &Library,
    uids: &[String],
) -> Result<Vec<ArchiveEntry>, AppError> {
    let rows: HashMap<String, image::Model> = image::Entity::find()
        .filter(image::Column::Uid.is_in(uids.iter().cloned()))
        .filter(image::Column::DeletedAt.is_null())
        .all(db)
        .await?
        .into_iter()
        .map(|row| (row.uid.clone(), row))
        .collect();

    let mut entries = Vec::with_capacity(rows.len());
    for uid in uids {
        let Some(row) = rows.get(uid) else {
            debug!(image_uid = %uid, "Skipping image missing from archive request");
            continue;
        };
        let meta = row.metadata();
        let name = if meta.original_file_name.is_empty() {
            meta.file_name.clone()
        } else {
            meta.original_file_name.clone()
        };
        entries.push(ArchiveEntry {
            path: library.original_path(uid, &meta.file_name)?,
            name,
            modified: meta.file_modified_at.unwrap_or(row.updated_at),
        });
    }
    Ok(entries)
}

/// `lumen-<timestamp>.zip`
pub fn archive_file_name() -> String {
    format!("lumen-{}.zip", Utc::now().format("%Y%m%d-%H%M%S"))
}

/// Periodically delete expired tokens.
pub async fn run_token_gc_loop(db: DatabaseConnection, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Starting download token sweep");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match token::sweep_expired(&db).await {
            Ok(0) => {}
            Ok(n) => info!(removed = n, "Expired download tokens removed"),
            Err(e) => error!(error = %e, "Download token sweep failed"),
        }
    }
    debug!("Download token sweep stopped");
}
