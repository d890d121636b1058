//! Handlers for the three job topics.

pub mod exif_process;
pub mod image_process;
pub mod xmp_generation;

use std::sync::Arc;

use common::JobTopic;
use common::event::EventName;
use common::storage::{Library, StorageError};
use imaging::{ImagingError, ImagingRuntime};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use serde_json::json;
use worker::{JobError, WorkerPool};

use crate::entity::image;
use crate::events::EventBroker;

pub use exif_process::ExifProcessHandler;
pub use image_process::ImageProcessHandler;
pub use xmp_generation::XmpGenerationHandler;

/// What every handler needs from the server.
#[derive(Clone)]
pub struct HandlerDeps {
    pub db: sea_orm::DatabaseConnection,
    pub library: Library,
    pub imaging: ImagingRuntime,
    pub events: Arc<EventBroker>,
}

/// Attach one handler per topic to the pool.
pub fn register(pool: &mut WorkerPool, deps: HandlerDeps) {
    pool.register(
        JobTopic::ImageProcess,
        Arc::new(ImageProcessHandler::new(deps.clone())),
    )
    .register(
        JobTopic::ExifProcess,
        Arc::new(ExifProcessHandler::new(deps.clone())),
    )
    .register(
        JobTopic::XmpGeneration,
        Arc::new(XmpGenerationHandler::new(deps)),
    );
}

/// The live (not soft-deleted) row a job targets.
pub(crate) async fn load_live_image<C: ConnectionTrait>(
    conn: &C,
    uid: &str,
) -> Result<image::Model, JobError> {
    image::Entity::find_by_id(uid.to_string())
        .filter(image::Column::DeletedAt.is_null())
        .one(conn)
        .await
        .map_err(db_error)?
        .ok_or_else(|| JobError::Fatal(format!("image {uid} not found")))
}

pub(crate) fn db_error(err: DbErr) -> JobError {
    JobError::transient(err)
}

/// Missing files cannot reappear by retrying; other I/O errors might.
pub(crate) fn storage_error(err: StorageError) -> JobError {
    match err {
        StorageError::Io(_) => JobError::transient(err),
        other => JobError::fatal(other),
    }
}

pub(crate) fn imaging_error(err: ImagingError) -> JobError {
    match err {
        ImagingError::Closed | ImagingError::Task(_) => JobError::transient(err),
        other => JobError::fatal(other),
    }
}

pub(crate) fn announce_update(events: &EventBroker, image_uid: &str, topic: JobTopic) {
    events.broadcast(
        EventName::IMAGE_UPDATED,
        json!({ "image_uid": image_uid, "topic": topic }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(matches!(
            storage_error(StorageError::NotFound("x".into())),
            JobError::Fatal(_)
        ));
        assert!(storage_error(StorageError::Io(std::io::Error::other("disk"))).is_retryable());
        assert!(matches!(
            imaging_error(ImagingError::Decode("bad".into())),
            JobError::Fatal(_)
        ));
        assert!(imaging_error(ImagingError::Closed).is_retryable());
        assert!(db_error(DbErr::Custom("gone".into())).is_retryable());
    }
}
