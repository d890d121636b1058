//! Named, ordered sets of images.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockType};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, instrument};

use crate::entity::collection::{self, CollectionImage};
use crate::entity::image;
use crate::error::AppError;
use crate::extractors::auth::AuthUser;

#[derive(Debug, Clone)]
pub struct NewCollection {
    pub name: String,
    pub description: Option<String>,
    pub private: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CollectionPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub private: Option<bool>,
    pub thumbnail_uid: Option<Option<String>>,
}

pub struct CollectionStore<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> CollectionStore<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        owner: &AuthUser,
        new: NewCollection,
    ) -> Result<collection::Model, AppError> {
        let name = validate_name(&new.name)?;
        let now = Utc::now();
        let row = collection::ActiveModel {
            uid: Set(common::uid::generate()),
            name: Set(name),
            description: Set(new.description.filter(|d| !d.trim().is_empty())),
            private: Set(new.private),
            owner_uid: Set(owner.user_uid.clone()),
            images: Set(serde_json::json!([])),
            image_count: Set(0),
            thumbnail_uid: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db)
        .await?;
        info!(collection_uid = %row.uid, "Collection created");
        Ok(row)
    }

    /// A collection the viewer may see.
    pub async fn get(&self, viewer: &AuthUser, uid: &str) -> Result<collection::Model, AppError> {
        let row = collection::Entity::find_by_id(uid.to_string())
            .one(self.db)
            .await?
            .ok_or_else(not_found)?;
        if row.private && !viewer.can_access(&row.owner_uid) {
            return Err(not_found());
        }
        Ok(row)
    }

    /// Collections visible to the viewer, most recently updated first.
    pub async fn list(
        &self,
        viewer: &AuthUser,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<collection::Model>, u64), AppError> {
        let mut query = collection::Entity::find();
        if !viewer.is_admin() {
            query = query.filter(
                Condition::any()
                    .add(collection::Column::Private.eq(false))
                    .add(collection::Column::OwnerUid.eq(viewer.user_uid.as_str())),
            );
        }
        let paginator = query
            .order_by_desc(collection::Column::UpdatedAt)
            .order_by_asc(collection::Column::Uid)
            .paginate(self.db, per_page);
        let total = paginator.num_items().await?;
        let rows = paginator.fetch_page(page.saturating_sub(1)).await?;
        Ok((rows, total))
    }

    pub async fn update(
        &self,
        actor: &AuthUser,
        uid: &str,
        patch: CollectionPatch,
    ) -> Result<collection::Model, AppError> {
        let txn = self.db.begin().await?;
        let current = self.lock_owned(&txn, actor, uid).await?;

        let mut update = collection::Entity::update_many()
            .col_expr(collection::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(collection::Column::Uid.eq(uid));
        if let Some(name) = &patch.name {
            update = update.col_expr(collection::Column::Name, Expr::value(validate_name(name)?));
        }
        if let Some(description) = patch.description {
            update = update.col_expr(collection::Column::Description, Expr::value(description));
        }
        if let Some(private) = patch.private {
            update = update.col_expr(collection::Column::Private, Expr::value(private));
        }
        if let Some(thumbnail) = patch.thumbnail_uid {
            if let Some(thumb) = &thumbnail
                && !current.image_list().iter().any(|i| &i.image_uid == thumb)
            {
                return Err(AppError::Validation(
                    "thumbnail_uid must be an image of the collection".into(),
                ));
            }
            update = update.col_expr(collection::Column::ThumbnailUid, Expr::value(thumbnail));
        }
        update.exec(&txn).await?;
        txn.commit().await?;
        self.get(actor, uid).await
    }

    pub async fn delete(&self, actor: &AuthUser, uid: &str) -> Result<(), AppError> {
        let txn = self.db.begin().await?;
        self.lock_owned(&txn, actor, uid).await?;
        collection::Entity::delete_by_id(uid.to_string())
            .exec(&txn)
            .await?;
        txn.commit().await?;
        info!(collection_uid = %uid, "Collection deleted");
        Ok(())
    }

    /// Append images not yet in the collection. Unknown or deleted images
    /// are rejected. Returns the updated collection.
    #[instrument(skip(self, actor, uids), fields(count = uids.len()))]
    pub async fn add_images(
        &self,
        actor: &AuthUser,
        uid: &str,
        uids: &[String],
    ) -> Result<collection::Model, AppError> {
        if uids.is_empty() {
            return Err(AppError::Validation("uids must not be empty".into()));
        }
        let live = image::Entity::find()
            .filter(image::Column::Uid.is_in(uids.iter().cloned()))
            .filter(image::Column::DeletedAt.is_null())
            .count(self.db)
            .await?;
        let distinct: std::collections::HashSet<&String> = uids.iter().collect();
        if live != distinct.len() as u64 {
            return Err(AppError::NotFound("Image not found".into()));
        }

        let txn = self.db.begin().await?;
        let current = self.lock_owned(&txn, actor, uid).await?;
        let mut images = current.image_list();
        let added = append_images(&mut images, uids, &actor.user_uid, Utc::now());
        let thumbnail = current
            .thumbnail_uid
            .clone()
            .or_else(|| images.first().map(|i| i.image_uid.clone()));
        write_images(&txn, uid, &images, thumbnail).await?;
        txn.commit().await?;
        info!(collection_uid = %uid, added, "Images added to collection");
        self.get(actor, uid).await
    }

    pub async fn remove_images(
        &self,
        actor: &AuthUser,
        uid: &str,
        uids: &[String],
    ) -> Result<collection::Model, AppError> {
        let txn = self.db.begin().await?;
        let current = self.lock_owned(&txn, actor, uid).await?;
        let mut images = current.image_list();
        let removed = drop_images(&mut images, uids);
        let thumbnail = current
            .thumbnail_uid
            .clone()
            .filter(|t| images.iter().any(|i| &i.image_uid == t))
            .or_else(|| images.first().map(|i| i.image_uid.clone()));
        write_images(&txn, uid, &images, thumbnail).await?;
        txn.commit().await?;
        info!(collection_uid = %uid, removed, "Images removed from collection");
        self.get(actor, uid).await
    }

    async fn lock_owned(
        &self,
        txn: &DatabaseTransaction,
        actor: &AuthUser,
        uid: &str,
    ) -> Result<collection::Model, AppError> {
        let row = collection::Entity::find_by_id(uid.to_string())
            .lock(LockType::Update)
            .one(txn)
            .await?
            .ok_or_else(not_found)?;
        if !actor.can_access(&row.owner_uid) {
            return Err(if row.private {
                not_found()
            } else {
                AppError::PermissionDenied
            });
        }
        Ok(row)
    }
}

async fn write_images(
    txn: &DatabaseTransaction,
    uid: &str,
    images: &[CollectionImage],
    thumbnail: Option<String>,
) -> Result<(), AppError> {
    let json = serde_json::to_value(images)
        .map_err(|e| AppError::Internal(format!("Failed to encode collection: {e}")))?;
    collection::Entity::update_many()
        .col_expr(collection::Column::Images, Expr::value(json))
        .col_expr(collection::Column::ImageCount, Expr::value(images.len() as i32))
        .col_expr(collection::Column::ThumbnailUid, Expr::value(thumbnail))
        .col_expr(collection::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(collection::Column::Uid.eq(uid))
        .exec(txn)
        .await?;
    Ok(())
}

/// Append `uids` that are not in `images` yet, keeping request order.
fn append_images(
    images: &mut Vec<CollectionImage>,
    uids: &[String],
    added_by: &str,
    now: DateTime<Utc>,
) -> usize {
    let before = images.len();
    for uid in uids {
        if images.iter().any(|i| &i.image_uid == uid) {
            continue;
        }
        images.push(CollectionImage {
            image_uid: uid.clone(),
            added_at: now,
            added_by: added_by.to_string(),
        });
    }
    images.len() - before
}

fn drop_images(images: &mut Vec<CollectionImage>, uids: &[String]) -> usize {
    let before = images.len();
    images.retain(|i| !uids.contains(&i.image_uid));
    before - images.len()
}

fn validate_name(name: &str) -> Result<String, AppError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 256 {
        return Err(AppError::Validation("name must be 1-256 characters".into()));
    }
    Ok(name.to_string())
}

fn not_found() -> AppError {
    AppError::NotFound("Collection not found".into())
}
