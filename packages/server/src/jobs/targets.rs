//! Selection of the images a batch command targets.

use common::storage::Library;
use common::{JobCommand, JobTopic};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
};

use super::JobBusError;
use crate::entity::image;

/// UIDs of the non-deleted images `command` selects for `topic`.
///
/// `missing` means: no thumbhash or not processed (image_process), no EXIF
/// column (exif_process), no sidecar on disk (xmp_generation).
pub async fn select(
    db: &DatabaseConnection,
    library: &Library,
    topic: JobTopic,
    command: JobCommand,
    image_uid: Option<&str>,
) -> Result<Vec<String>, JobBusError> {
    match command {
        JobCommand::Single => {
            let uid = image_uid
                .filter(|u| !u.is_empty())
                .ok_or_else(|| JobBusError::Invalid("image_uid is required for command 'single'".into()))?;
            let found = image::Entity::find_by_id(uid.to_string())
                .filter(image::Column::DeletedAt.is_null())
                .one(db)
                .await?;
            match found {
                Some(row) => Ok(vec![row.uid]),
                None => Err(JobBusError::Invalid(format!("Image {uid} not found"))),
            }
        }
        JobCommand::All => {
            let uids = image::Entity::find()
                .select_only()
                .column(image::Column::Uid)
                .filter(image::Column::DeletedAt.is_null())
                .order_by_asc(image::Column::CreatedAt)
                .into_tuple::<String>()
                .all(db)
                .await?;
            Ok(uids)
        }
        JobCommand::Missing => missing(db, library, topic).await,
    }
}

async fn missing(
    db: &DatabaseConnection,
    library: &Library,
    topic: JobTopic,
) -> Result<Vec<String>, JobBusError> {
    let live = image::Entity::find()
        .filter(image::Column::DeletedAt.is_null())
        .order_by_asc(image::Column::CreatedAt);

    match topic {
        JobTopic::ImageProcess => {
            let rows = live.all(db).await?;
            Ok(rows
                .into_iter()
                .filter(|row| !row.processed || row.metadata().thumbhash.is_none())
                .map(|row| row.uid)
                .collect())
        }
        JobTopic::ExifProcess => {
            let uids = live
                .filter(image::Column::Exif.is_null())
                .select_only()
                .column(image::Column::Uid)
                .into_tuple::<String>()
                .all(db)
                .await?;
            Ok(uids)
        }
        JobTopic::XmpGeneration => {
            let uids = live
                .select_only()
                .column(image::Column::Uid)
                .into_tuple::<String>()
                .all(db)
                .await?;
            let mut out = Vec::new();
            for uid in uids {
                let Ok(path) = library.sidecar_path(&uid) else {
                    continue;
                };
                if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                    out.push(uid);
                }
            }
            Ok(out)
        }
    }
}
