use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;

use crate::collections::CollectionStore;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::{AppJson, AppQuery};
use crate::models::collection::{
    CollectionImagesRequest, CollectionListResponse, CollectionResponse, CreateCollectionRequest,
    ListCollectionsQuery, UpdateCollectionRequest,
};
use crate::models::shared::{Pagination, page_params};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/",
    tag = "Collections",
    operation_id = "listCollections",
    summary = "List collections",
    description = "Public collections plus the caller's own. Admins see all.",
    params(ListCollectionsQuery),
    responses(
        (status = 200, description = "Collection list", body = CollectionListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn list_collections(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListCollectionsQuery>,
) -> Result<Json<CollectionListResponse>, AppError> {
    let (page, per_page) = page_params(query.page, query.per_page);
    let (rows, total) = CollectionStore::new(&state.db)
        .list(&auth_user, page, per_page)
        .await?;

    Ok(Json(CollectionListResponse {
        data: rows.into_iter().map(CollectionResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Collections",
    operation_id = "createCollection",
    summary = "Create a collection",
    request_body = CreateCollectionRequest,
    responses(
        (status = 201, description = "Collection created", body = CollectionResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(name = %payload.name))]
pub async fn create_collection(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateCollectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let row = CollectionStore::new(&state.db)
        .create(&auth_user, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(CollectionResponse::from(row))))
}

#[utoipa::path(
    get,
    path = "/{uid}",
    tag = "Collections",
    operation_id = "getCollection",
    summary = "Get a collection",
    params(("uid" = String, Path, description = "Collection UID")),
    responses(
        (status = 200, description = "Collection", body = CollectionResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Collection not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn get_collection(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<CollectionResponse>, AppError> {
    let row = CollectionStore::new(&state.db).get(&auth_user, &uid).await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    patch,
    path = "/{uid}",
    tag = "Collections",
    operation_id = "updateCollection",
    summary = "Edit a collection",
    description = "Partial update. `thumbnail_uid` must name an image in the collection; `null` clears it.",
    params(("uid" = String, Path, description = "Collection UID")),
    request_body = UpdateCollectionRequest,
    responses(
        (status = 200, description = "Collection updated", body = CollectionResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Collection not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(uid = %uid))]
pub async fn update_collection(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppJson(payload): AppJson<UpdateCollectionRequest>,
) -> Result<Json<CollectionResponse>, AppError> {
    let row = CollectionStore::new(&state.db)
        .update(&auth_user, &uid, payload.into())
        .await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    delete,
    path = "/{uid}",
    tag = "Collections",
    operation_id = "deleteCollection",
    summary = "Delete a collection",
    description = "Removes the collection only; its images are untouched.",
    params(("uid" = String, Path, description = "Collection UID")),
    responses(
        (status = 204, description = "Collection deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Collection not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn delete_collection(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<StatusCode, AppError> {
    CollectionStore::new(&state.db).delete(&auth_user, &uid).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/{uid}/images",
    tag = "Collections",
    operation_id = "addCollectionImages",
    summary = "Add images to a collection",
    description = "Appends live images in request order. Images already present are skipped.",
    params(("uid" = String, Path, description = "Collection UID")),
    request_body = CollectionImagesRequest,
    responses(
        (status = 200, description = "Updated collection", body = CollectionResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Collection or image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(uid = %uid, count = payload.uids.len()))]
pub async fn add_collection_images(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppJson(payload): AppJson<CollectionImagesRequest>,
) -> Result<Json<CollectionResponse>, AppError> {
    let row = CollectionStore::new(&state.db)
        .add_images(&auth_user, &uid, &payload.uids)
        .await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    delete,
    path = "/{uid}/images",
    tag = "Collections",
    operation_id = "removeCollectionImages",
    summary = "Remove images from a collection",
    params(("uid" = String, Path, description = "Collection UID")),
    request_body = CollectionImagesRequest,
    responses(
        (status = 200, description = "Updated collection", body = CollectionResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Collection not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(uid = %uid, count = payload.uids.len()))]
pub async fn remove_collection_images(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppJson(payload): AppJson<CollectionImagesRequest>,
) -> Result<Json<CollectionResponse>, AppError> {
    let row = CollectionStore::new(&state.db)
        .remove_images(&auth_user, &uid, &payload.uids)
        .await?;
    Ok(Json(row.into()))
}
