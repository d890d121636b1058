use axum::Json;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tracing::{info, instrument};

use crate::downloads::token::{self, TokenOptions};
use crate::downloads::{archive_entries, archive_file_name, zip_stream};
use crate::entity::image;
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::{AppJson, AppQuery};
use crate::handlers::images::own_host;
use crate::models::download::{BulkDownloadRequest, DownloadQuery, SignRequest, TokenResponse};
use crate::models::shared::validate_bulk_uids;
use crate::state::AppState;
use crate::utils::http::content_disposition;

/// Most images one token may authorize.
const MAX_TOKEN_UIDS: usize = 10_000;

#[utoipa::path(
    post,
    path = "/sign",
    tag = "Downloads",
    operation_id = "signDownload",
    summary = "Create a download token",
    description = "Issues an opaque token authorizing the given images. Every uid must be a \
        live image the caller can see. `expires_in` is in seconds; without it the token does \
        not expire.",
    request_body = SignRequest,
    responses(
        (status = 201, description = "Token created", body = TokenResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "An image was not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(count = payload.uids.len()))]
pub async fn sign_download(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<SignRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_bulk_uids(&payload.uids, "uids", MAX_TOKEN_UIDS)?;

    let rows = image::Entity::find()
        .filter(image::Column::Uid.is_in(payload.uids.iter().cloned()))
        .filter(image::Column::DeletedAt.is_null())
        .all(&state.db)
        .await?;
    for uid in &payload.uids {
        let visible = rows
            .iter()
            .find(|r| &r.uid == uid)
            .is_some_and(|r| !r.private || auth_user.can_access(&r.owner_uid));
        if !visible {
            return Err(AppError::NotFound(format!("Image {uid} not found")));
        }
    }

    let opts = TokenOptions {
        image_uids: payload.uids,
        expires_in: payload.expires_in,
        password: payload.password.filter(|p| !p.is_empty()),
        allow_download: payload.allow_download,
        allow_embed: payload.allow_embed,
        show_metadata: payload.show_metadata,
        description: payload.description,
        created_by: auth_user.user_uid,
    };
    let row = token::create(&state.db, opts).await?;
    Ok((StatusCode::CREATED, Json(TokenResponse::from(row))))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Downloads",
    operation_id = "downloadArchive",
    summary = "Download images as a ZIP archive",
    description = "Streams a ZIP of the requested images. The token query parameter is the only \
        credential. Requested uids must all be authorized by the token; an empty list means \
        every image it authorizes. Files that cannot be read are left out of the archive.",
    params(DownloadQuery),
    request_body(content = BulkDownloadRequest, description = "Optional; defaults to all authorized images"),
    responses(
        (status = 200, description = "ZIP stream", content_type = "application/zip"),
        (status = 400, description = "Malformed body (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Invalid token, password, or uid outside the token (TOKEN_INVALID, PASSWORD_REQUIRED)", body = ErrorBody),
        (status = 403, description = "Downloads or embedding not allowed (PERMISSION_DENIED)", body = ErrorBody),
    ),
)]
#[instrument(skip(state, query, headers, body))]
pub async fn download_archive(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<DownloadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let request: BulkDownloadRequest = if body.iter().all(u8::is_ascii_whitespace) {
        BulkDownloadRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::Validation(format!("Invalid request body: {e}")))?
    };

    let valid = token::validate(&state.db, &query.token, query.password.as_deref())
        .await?
        .into_result()?;
    if !valid.allow_download {
        return Err(AppError::PermissionDenied);
    }
    token::check_embed(&valid, &headers, &own_host(&state, &headers))?;
    let uids = token::authorize_subset(&valid, &request.uids)?;

    let entries = archive_entries(&state.db, &state.library, &uids).await?;
    let file_name = archive_file_name();
    info!(entries = entries.len(), file = %file_name, "Streaming archive");

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition("attachment", &file_name),
        )
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(zip_stream(entries)))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
