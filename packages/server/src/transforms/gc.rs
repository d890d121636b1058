//! Background sweep of the transform cache.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use common::storage::library::TRANSFORMS_DIR;
use common::storage::{Library, StorageError};
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::cache::{cache_file_name, is_temp_file};
use super::etag::transform_etag;
use super::params::PermanentTransform;
use crate::config::TransformsConfig;
use crate::entity::image;

#[derive(Debug, Error)]
pub enum GcError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One cached rendition as seen by the sweep.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
    pub permanent: bool,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub expired: usize,
    pub evicted: usize,
    pub bytes_freed: u64,
    pub bytes_remaining: u64,
}

/// Limits applied by [`plan`].
#[derive(Debug, Clone)]
pub struct GcPolicy {
    pub max_age: Duration,
    pub max_size_bytes: u64,
    pub preserve_permanent: bool,
}

impl From<&TransformsConfig> for GcPolicy {
    fn from(cfg: &TransformsConfig) -> Self {
        Self {
            max_age: Duration::from_secs(cfg.max_age_days.saturating_mul(24 * 60 * 60)),
            max_size_bytes: cfg.max_size_bytes,
            preserve_permanent: cfg.preserve_permanent,
        }
    }
}

/// Decide which entries to delete: first everything past `max_age`, then
/// the oldest until the total fits in `max_size_bytes`.
///
/// Returns `(expired, evicted)`. Protected permanent entries count towards
/// the total but are never chosen.
pub fn plan(
    mut entries: Vec<CacheEntry>,
    now: SystemTime,
    policy: &GcPolicy,
) -> (Vec<CacheEntry>, Vec<CacheEntry>) {
    let protected = |e: &CacheEntry| e.permanent && policy.preserve_permanent;

    let (expired, mut kept): (Vec<_>, Vec<_>) = entries.drain(..).partition(|e| {
        !protected(e)
            && now
                .duration_since(e.modified)
                .is_ok_and(|age| age > policy.max_age)
    });

    let mut total: u64 = kept.iter().map(|e| e.size).sum();
    let mut evicted = Vec::new();
    if total > policy.max_size_bytes {
        kept.sort_by_key(|e| e.modified);
        for entry in kept {
            if total <= policy.max_size_bytes {
                break;
            }
            if protected(&entry) {
                continue;
            }
            total = total.saturating_sub(entry.size);
            evicted.push(entry);
        }
    }
    (expired, evicted)
}

/// File names of the permanent renditions of every live image, by uid.
async fn permanent_names(db: &DatabaseConnection) -> Result<HashMap<String, HashSet<String>>, DbErr> {
    let rows: Vec<(String, String)> = image::Entity::find()
        .select_only()
        .column(image::Column::Uid)
        .column(image::Column::Checksum)
        .filter(image::Column::DeletedAt.is_null())
        .into_tuple()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|(uid, checksum)| {
            let names = PermanentTransform::ALL
                .iter()
                .map(|t| {
                    let spec = t.spec();
                    let ext = spec.format.map(|f| f.extension()).unwrap_or("jpg");
                    cache_file_name(&transform_etag(&checksum, &spec), ext)
                })
                .collect();
            (uid, names)
        })
        .collect())
}

async fn scan(library: &Library, permanent: &HashMap<String, HashSet<String>>) -> Result<Vec<CacheEntry>, GcError> {
    let mut entries = Vec::new();
    let mut images = tokio::fs::read_dir(library.library_root()).await?;
    while let Some(image_dir) = images.next_entry().await? {
        let uid = image_dir.file_name().to_string_lossy().into_owned();
        let dir = image_dir.path().join(TRANSFORMS_DIR);
        let mut files = match tokio::fs::read_dir(&dir).await {
            Ok(files) => files,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Cannot read transform directory");
                continue;
            }
        };
        let keep = permanent.get(&uid);
        while let Some(file) = files.next_entry().await? {
            let name = file.file_name().to_string_lossy().into_owned();
            if is_temp_file(&name) {
                continue;
            }
            let path = file.path();
            // Requests and other sweeps may remove files under our feet.
            let meta = match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot stat cached transform");
                    continue;
                }
            };
            entries.push(CacheEntry {
                path,
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                permanent: keep.is_some_and(|k| k.contains(&name)),
            });
        }
    }
    Ok(entries)
}

/// One full sweep.
pub async fn collect(
    db: &DatabaseConnection,
    library: &Library,
    policy: &GcPolicy,
) -> Result<GcReport, GcError> {
    let permanent = permanent_names(db).await?;
    let entries = scan(library, &permanent).await?;
    let total: u64 = entries.iter().map(|e| e.size).sum();
    let (expired, evicted) = plan(entries, SystemTime::now(), policy);

    let mut report = GcReport::default();
    for (entry, is_expired) in expired
        .iter()
        .map(|e| (e, true))
        .chain(evicted.iter().map(|e| (e, false)))
    {
        match tokio::fs::remove_file(&entry.path).await {
            Ok(()) => {
                report.bytes_freed += entry.size;
                if is_expired {
                    report.expired += 1;
                } else {
                    report.evicted += 1;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %entry.path.display(), error = %e, "Failed to remove cached transform"),
        }
    }
    report.bytes_remaining = total.saturating_sub(report.bytes_freed);
    Ok(report)
}

/// Sweep every `interval` until `cancel` fires.
pub async fn run_gc_loop(
    db: DatabaseConnection,
    library: Library,
    policy: GcPolicy,
    interval: Duration,
    cancel: CancellationToken,
) {
    info!(
        interval_secs = interval.as_secs(),
        max_age_secs = policy.max_age.as_secs(),
        max_size_bytes = policy.max_size_bytes,
        "Starting transform cache GC"
    );
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        match collect(&db, &library, &policy).await {
            Ok(report) if report.expired + report.evicted > 0 => info!(
                expired = report.expired,
                evicted = report.evicted,
                bytes_freed = report.bytes_freed,
                bytes_remaining = report.bytes_remaining,
                "Transform cache swept"
            ),
            Ok(_) => debug!("Transform cache sweep found nothing to remove"),
            Err(e) => error!(error = %e, "Transform cache sweep failed"),
        }
    }
    debug!("Transform cache GC stopped");
}
