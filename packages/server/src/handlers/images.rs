use std::path::Path as FsPath;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use common::event::EventName;
use imaging::exif::extract_exif;
use sea_orm::EntityTrait;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use crate::assets::{AssetStore, ListFilter, NewAsset};
use crate::downloads::token::{self, TokenOptions};
use crate::entity::image;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::{AuthUser, MaybeAuthUser};
use crate::extractors::json::{AppJson, AppQuery};
use crate::models::download::TokenParams;
use crate::models::image::{
    DeleteImagesRequest, DeleteImagesResponse, DeleteResult, ExifQuery, ExifResponse,
    ImageListQuery, ImageListResponse, ImageResponse, UpdateImageRequest, UrlUploadRequest,
};
use crate::models::shared::{Pagination, page_params, validate_bulk_uids};
use crate::state::AppState;
use crate::transforms::{FileQuery, PermanentTransform, Served};
use crate::utils::http::{content_disposition, quoted_etag, request_host};

/// Most uids one bulk delete may name.
const MAX_BULK_DELETE: usize = 1000;

pub fn upload_body_limit(max_bytes: u64) -> DefaultBodyLimit {
    // Multipart framing on top of the file itself.
    DefaultBodyLimit::max(usize::try_from(max_bytes).unwrap_or(usize::MAX).saturating_add(64 * 1024))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Images",
    operation_id = "listImages",
    summary = "List images",
    description = "Returns non-deleted images, newest first. Private images of other users are \
        hidden unless the caller is an admin.",
    params(ImageListQuery),
    responses(
        (status = 200, description = "Image list", body = ImageListResponse),
        (status = 400, description = "Invalid query (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, query), fields(page, limit))]
pub async fn list_images(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ImageListQuery>,
) -> Result<Json<ImageListResponse>, AppError> {
    let (page, limit) = page_params(query.page, query.limit);
    tracing::Span::current().record("page", page).record("limit", limit);

    let filter = ListFilter {
        owner_uid: query.owner,
        include_private: auth_user.is_admin(),
        viewer_uid: Some(auth_user.user_uid.clone()),
    };
    let (rows, total) = state.assets().list(page, limit, &filter).await?;

    Ok(Json(ImageListResponse {
        data: rows.into_iter().map(ImageResponse::from).collect(),
        pagination: Pagination::new(page, limit, total),
    }))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Images",
    operation_id = "uploadImage",
    summary = "Upload an image",
    description = "Stores the `data` multipart part as a new original. The `filename` field \
        overrides the part's file name; `checksum` (hex SHA-1) is verified against the bytes. \
        Thumbnail, EXIF and XMP jobs are enqueued for the new image.",
    request_body(content_type = "multipart/form-data", description = "`data` file with optional `filename` and `checksum`"),
    responses(
        (status = 201, description = "Image stored", body = ImageResponse),
        (status = 400, description = "Missing part, bad checksum or undecodable image (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 409, description = "Same bytes already uploaded (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user = %auth_user.user_uid))]
pub async fn upload_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut data: Option<Vec<u8>> = None;
    let mut part_name: Option<String> = None;
    let mut file_name: Option<String> = None;
    let mut checksum: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        match field.name() {
            Some("data") => {
                part_name = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read data: {e}")))?;
                data = Some(bytes.to_vec());
            }
            Some("filename") => {
                file_name = Some(text_field(field, "filename").await?);
            }
            Some("checksum") => {
                checksum = Some(text_field(field, "checksum").await?);
            }
            _ => {}
        }
    }

    let bytes = data.ok_or_else(|| AppError::Validation("Missing 'data' field".into()))?;
    let name = file_name
        .filter(|n| !n.trim().is_empty())
        .or(part_name)
        .ok_or_else(|| AppError::Validation("Missing 'filename' field".into()))?;

    store_upload(&state, &auth_user, bytes, &name, checksum).await
}

#[utoipa::path(
    post,
    path = "/url",
    tag = "Images",
    operation_id = "uploadImageFromUrl",
    summary = "Upload an image from a URL",
    description = "Fetches `url` and stores it like a multipart upload. Disabled unless \
        `storage.allow_url_upload` is set.",
    request_body = UrlUploadRequest,
    responses(
        (status = 201, description = "Image stored", body = ImageResponse),
        (status = 400, description = "Bad URL, fetch failure or undecodable image (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "URL uploads disabled (PERMISSION_DENIED)", body = ErrorBody),
        (status = 409, description = "Same bytes already uploaded (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_uid, url = %payload.url))]
pub async fn upload_image_from_url(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<UrlUploadRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.config.storage.allow_url_upload {
        return Err(AppError::PermissionDenied);
    }

    let url = reqwest::Url::parse(payload.url.trim())
        .map_err(|e| AppError::Validation(format!("Invalid url: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(AppError::Validation("url must be http or https".into()));
    }
    let name = payload
        .filename
        .filter(|n| !n.trim().is_empty())
        .or_else(|| {
            url.path_segments()
                .and_then(|mut segments| segments.next_back())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "download".to_string());

    let max = state.config.storage.max_upload_bytes;
    let mut response = state
        .http
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to fetch url: {e}")))?;
    if !response.status().is_success() {
        return Err(AppError::Validation(format!(
            "Fetching url returned {}",
            response.status()
        )));
    }
    if response.content_length().is_some_and(|len| len > max) {
        return Err(AppError::Validation(format!("File exceeds {max} bytes")));
    }

    let mut bytes = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to fetch url: {e}")))?
    {
        if (bytes.len() + chunk.len()) as u64 > max {
            return Err(AppError::Validation(format!("File exceeds {max} bytes")));
        }
        bytes.extend_from_slice(&chunk);
    }

    store_upload(&state, &auth_user, bytes, &name, payload.checksum).await
}

#[utoipa::path(
    get,
    path = "/{uid}",
    tag = "Images",
    operation_id = "getImage",
    summary = "Get image details",
    params(("uid" = String, Path, description = "Image UID")),
    responses(
        (status = 200, description = "Image details", body = ImageResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn get_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ImageResponse>, AppError> {
    let row = visible_image(&state.assets(), &auth_user, &uid).await?;
    Ok(Json(row.into()))
}

#[utoipa::path(
    patch,
    path = "/{uid}",
    tag = "Images",
    operation_id = "updateImage",
    summary = "Edit an image",
    description = "Partial update. Omitted fields are unchanged; `null` clears `description` \
        and `rating`. Rating, label and keywords are user values that background jobs never \
        overwrite.",
    params(("uid" = String, Path, description = "Image UID")),
    request_body = UpdateImageRequest,
    responses(
        (status = 200, description = "Image updated", body = ImageResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(uid = %uid))]
pub async fn update_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppJson(payload): AppJson<UpdateImageRequest>,
) -> Result<Json<ImageResponse>, AppError> {
    let assets = state.assets();
    let row = visible_image(&assets, &auth_user, &uid).await?;
    if !auth_user.can_access(&row.owner_uid) {
        return Err(AppError::PermissionDenied);
    }

    let updated = assets.update(&uid, payload.into()).await?;
    state
        .events
        .broadcast(EventName::IMAGE_UPDATED, json!({ "image_uid": uid }));
    Ok(Json(updated.into()))
}

#[utoipa::path(
    get,
    path = "/{uid}/file",
    tag = "Images",
    operation_id = "getImageFile",
    summary = "Serve an image",
    description = "Without transform parameters the original bytes are returned with \
        `ETag: <checksum>`. With any of `format`, `w`, `h`, `quality`, `rotate`, `flip` or \
        `kernel` a rendition is served from the transform cache, rendering it on a miss. \
        A matching `If-None-Match` answers 304 without reading the file. A download `token` \
        (and its `password`) may stand in for the bearer header.",
    params(("uid" = String, Path, description = "Image UID"), FileQuery),
    responses(
        (status = 200, description = "Image bytes"),
        (status = 304, description = "ETag matched"),
        (status = 400, description = "Invalid transform parameter (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Missing or invalid credentials (TOKEN_MISSING, TOKEN_INVALID, PASSWORD_REQUIRED)", body = ErrorBody),
        (status = 403, description = "Embedding or download not allowed (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security((), ("jwt" = [])),
)]
#[instrument(skip(state, auth_user, query, headers), fields(uid = %uid))]
pub async fn get_image_file(
    auth_user: MaybeAuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppQuery(query): AppQuery<FileQuery>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let download = query.wants_download();
    let spec = query.transform()?;
    let row = authorize_read(
        &state,
        &auth_user,
        query.token.as_deref(),
        query.password.as_deref(),
        &headers,
        &uid,
        download,
    )
    .await?;

    let engine = state.transforms();
    let served = match &spec {
        None => engine.serve_original(&row, &headers).await?,
        Some(spec) => engine.serve_transform(&row, spec, &headers).await?,
    };
    served_response(served, &row.name, download)
}

#[utoipa::path(
    get,
    path = "/{uid}/transforms/{name}",
    tag = "Images",
    operation_id = "getImageTransform",
    summary = "Serve a permanent rendition",
    description = "`thumbnail` (WebP 400×400, q85) or `preview` (WebP 1920×1920, q90). Cached \
        and validated like any other transform.",
    params(
        ("uid" = String, Path, description = "Image UID"),
        ("name" = String, Path, description = "`thumbnail` or `preview`"),
        TokenParams,
    ),
    responses(
        (status = 200, description = "Rendition bytes"),
        (status = 304, description = "ETag matched"),
        (status = 401, description = "Missing or invalid credentials (TOKEN_MISSING, TOKEN_INVALID, PASSWORD_REQUIRED)", body = ErrorBody),
        (status = 403, description = "Embedding not allowed (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown rendition or image (NOT_FOUND)", body = ErrorBody),
    ),
    security((), ("jwt" = [])),
)]
#[instrument(skip(state, auth_user, params, headers), fields(uid = %uid, name = %name))]
pub async fn get_image_transform(
    auth_user: MaybeAuthUser,
    State(state): State<AppState>,
    Path((uid, name)): Path<(String, String)>,
    AppQuery(params): AppQuery<TokenParams>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let transform = PermanentTransform::parse(&name)
        .ok_or_else(|| AppError::NotFound(format!("Unknown transform '{name}'")))?;
    let row = authorize_read(
        &state,
        &auth_user,
        params.token.as_deref(),
        params.password.as_deref(),
        &headers,
        &uid,
        false,
    )
    .await?;

    let served = state
        .transforms()
        .serve_transform(&row, &transform.spec(), &headers)
        .await?;
    served_response(served, &row.name, false)
}

#[utoipa::path(
    get,
    path = "/{uid}/exif",
    tag = "Images",
    operation_id = "getImageExif",
    summary = "Get EXIF data",
    description = "With `simple=true` the record stored by the EXIF job is returned. Otherwise \
        EXIF is read from the original file again.",
    params(("uid" = String, Path, description = "Image UID"), ExifQuery),
    responses(
        (status = 200, description = "EXIF data, null when the file has none", body = ExifResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid, simple = query.simple))]
pub async fn get_image_exif(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
    AppQuery(query): AppQuery<ExifQuery>,
) -> Result<Json<ExifResponse>, AppError> {
    let assets = state.assets();
    let row = visible_image(&assets, &auth_user, &uid).await?;

    let exif = if query.simple {
        row.exif_data()
    } else {
        let (_, bytes) = assets.read(&uid).await?;
        state.imaging.run(move |_| extract_exif(&bytes)).await?
    };
    Ok(Json(ExifResponse { uid, exif }))
}

#[utoipa::path(
    get,
    path = "/{uid}/download",
    tag = "Images",
    operation_id = "downloadImage",
    summary = "Download the original",
    description = "Mints a short-lived token for this image alone and redirects to the file \
        endpoint with `download=1`.",
    params(("uid" = String, Path, description = "Image UID")),
    responses(
        (status = 302, description = "Redirect to the signed file URL"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Image not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn download_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Response, AppError> {
    visible_image(&state.assets(), &auth_user, &uid).await?;

    let mut opts = TokenOptions::new(vec![uid.clone()], auth_user.user_uid.clone());
    opts.expires_in = Some(state.config.downloads.single_download_ttl_secs as i64);
    opts.description = Some("single download".into());
    let minted = token::create(&state.db, opts).await?;

    let location = format!(
        "/api/v1/images/{uid}/file?download=1&token={}",
        minted.uid
    );
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::empty())
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}

#[utoipa::path(
    delete,
    path = "/",
    tag = "Images",
    operation_id = "deleteImages",
    summary = "Delete images",
    description = "Moves each image into the trash, or removes it permanently with \
        `force=true`. Each uid is handled on its own; the response is 207 when any of them \
        failed.",
    request_body = DeleteImagesRequest,
    responses(
        (status = 200, description = "All images deleted", body = DeleteImagesResponse),
        (status = 207, description = "Some deletions failed", body = DeleteImagesResponse),
        (status = 400, description = "Empty, duplicate or malformed uids (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(count = payload.uids.len(), force = payload.force))]
pub async fn delete_images(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<DeleteImagesRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_bulk_uids(&payload.uids, "uids", MAX_BULK_DELETE)?;

    let assets = state.assets();
    let mut results = Vec::with_capacity(payload.uids.len());
    for uid in payload.uids {
        let outcome = delete_one(&state, &assets, &auth_user, &uid, payload.force).await;
        results.push(match outcome {
            Ok(()) => DeleteResult {
                uid,
                status: StatusCode::NO_CONTENT.as_u16(),
                error: None,
            },
            Err(e) => {
                let (status, body) = e.status_and_body();
                DeleteResult {
                    uid,
                    status: status.as_u16(),
                    error: Some(body.message),
                }
            }
        });
    }

    let status = if results.iter().all(|r| r.error.is_none()) {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(DeleteImagesResponse { results })))
}

#[utoipa::path(
    post,
    path = "/{uid}/restore",
    tag = "Images",
    operation_id = "restoreImage",
    summary = "Restore an image from the trash",
    params(("uid" = String, Path, description = "Image UID")),
    responses(
        (status = 200, description = "Image restored", body = ImageResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not the owner (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Image not in the trash (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn restore_image(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<ImageResponse>, AppError> {
    let row = image::Entity::find_by_id(uid.clone())
        .one(&state.db)
        .await?
        .filter(|row| row.is_deleted())
        .ok_or_else(|| AppError::NotFound("Image not found in trash".into()))?;
    if !auth_user.can_access(&row.owner_uid) {
        return Err(AppError::PermissionDenied);
    }

    let restored = state.assets().restore(&uid).await?;
    state
        .events
        .broadcast(EventName::IMAGE_RESTORED, json!({ "image_uid": uid }));
    Ok(Json(restored.into()))
}

async fn text_field(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|e| AppError::Validation(format!("Failed to read {name}: {e}")))
}

async fn store_upload(
    state: &AppState,
    auth_user: &AuthUser,
    bytes: Vec<u8>,
    name: &str,
    checksum: Option<String>,
) -> Result<(StatusCode, Json<ImageResponse>), AppError> {
    // Client paths are reduced to their last component.
    let original_name = FsPath::new(name.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| AppError::Validation("Invalid filename".into()))?
        .to_string();

    let row = state
        .assets()
        .create(NewAsset {
            bytes,
            original_name,
            owner_uid: auth_user.user_uid.clone(),
            expected_checksum: checksum,
        })
        .await?;

    // The original is safe on disk; a failed enqueue leaves a failed job row
    // that an admin batch can pick up again.
    match state.jobs.enqueue_for_upload(&row.uid, &auth_user.user_uid).await {
        Ok(jobs) => info!(image_uid = %row.uid, jobs = jobs.len(), "Processing jobs enqueued"),
        Err(e) => error!(image_uid = %row.uid, error = %e, "Failed to enqueue processing jobs"),
    }
    state
        .events
        .broadcast(EventName::IMAGE_CREATED, json!({ "image_uid": row.uid }));

    Ok((StatusCode::CREATED, Json(row.into())))
}

/// A live image the user may see. Other users' private images are reported
/// as missing.
async fn visible_image(
    assets: &AssetStore<'_>,
    auth_user: &AuthUser,
    uid: &str,
) -> Result<image::Model, AppError> {
    let row = assets.get(uid).await?;
    if row.private && !auth_user.can_access(&row.owner_uid) {
        return Err(AppError::NotFound("Image not found".into()));
    }
    Ok(row)
}

/// Resolve the credentials of a file request: a download token when one is
/// given, the bearer session otherwise.
async fn authorize_read(
    state: &AppState,
    auth_user: &MaybeAuthUser,
    token: Option<&str>,
    password: Option<&str>,
    headers: &HeaderMap,
    uid: &str,
    download: bool,
) -> Result<image::Model, AppError> {
    let assets = state.assets();
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        let user = auth_user.0.as_ref().ok_or(AppError::TokenMissing)?;
        return visible_image(&assets, user, uid).await;
    };

    let valid = token::validate(&state.db, token, password)
        .await?
        .into_result()?;
    if !valid.authorizes(uid) {
        return Err(AppError::TokenInvalid);
    }
    if download && !valid.allow_download {
        return Err(AppError::PermissionDenied);
    }
    token::check_embed(&valid, headers, &own_host(state, headers))?;
    assets.get(uid).await
}

/// Host requests are expected to come from: the configured public host,
/// else whatever the client addressed.
pub(crate) fn own_host(state: &AppState, headers: &HeaderMap) -> String {
    state
        .config
        .server
        .public_host
        .clone()
        .or_else(|| request_host(headers))
        .unwrap_or_else(|| state.config.own_host())
}

async fn delete_one(
    state: &AppState,
    assets: &AssetStore<'_>,
    auth_user: &AuthUser,
    uid: &str,
    force: bool,
) -> Result<(), AppError> {
    let row = image::Entity::find_by_id(uid.to_string())
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Image not found".into()))?;
    if !auth_user.can_access(&row.owner_uid) {
        return Err(if row.private {
            AppError::NotFound("Image not found".into())
        } else {
            AppError::PermissionDenied
        });
    }

    if force {
        assets.hard_delete(uid).await?;
    } else if row.is_deleted() {
        return Err(AppError::NotFound("Image already in trash".into()));
    } else {
        assets.soft_delete(uid).await?;
    }
    state.events.broadcast(
        EventName::IMAGE_DELETED,
        json!({ "image_uid": uid, "permanent": force }),
    );
    Ok(())
}

fn served_response(served: Served, name: &str, download: bool) -> Result<Response, AppError> {
    let builder = Response::builder();
    let response = match served {
        Served::NotModified {
            etag,
            cache_control,
        } => builder
            .status(StatusCode::NOT_MODIFIED)
            .header(header::ETAG, quoted_etag(&etag))
            .header(header::CACHE_CONTROL, cache_control)
            .body(Body::empty()),
        Served::Bytes {
            bytes,
            content_type,
            etag,
            cache_control,
            last_modified,
            extension,
        } => {
            let file_name = if extension.is_empty() {
                name.to_string()
            } else {
                format!("{name}.{extension}")
            };
            let disposition = if download { "attachment" } else { "inline" };
            let mut builder = builder
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, bytes.len())
                .header(header::ETAG, quoted_etag(&etag))
                .header(header::CACHE_CONTROL, cache_control)
                .header(
                    header::CONTENT_DISPOSITION,
                    content_disposition(disposition, &file_name),
                );
            if let Some(modified) = last_modified {
                builder = builder.header(
                    header::LAST_MODIFIED,
                    modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
                );
            }
            builder.body(Body::from(bytes))
        }
    };
    response.map_err(|e| {
        warn!(error = %e, "Failed to build file response");
        AppError::Internal(format!("Failed to build response: {e}"))
    })
}
