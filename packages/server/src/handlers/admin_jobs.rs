use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use common::{JobCommand, JobStatus};
use tracing::{info, instrument};

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::{AppJson, AppQuery};
use crate::jobs::{BatchRequest, JobCounts, JobKind, JobService};
use crate::models::job::{
    CancelJobResponse, ConcurrencyRequest, ConcurrencyResponse, DeadLetterListResponse,
    DeadLetterResponse, EnqueueJobsRequest, EnqueueJobsResponse, JobListResponse, JobResponse,
    ListDeadLettersQuery, ListJobsQuery, RetryDeadLetterResponse,
};
use crate::models::shared::{Pagination, page_params};
use crate::state::AppState;

#[utoipa::path(
    post,
    path = "/",
    tag = "Admin Jobs",
    operation_id = "enqueueJobs",
    summary = "Enqueue processing jobs",
    description = "Enqueues one job per selected image. `all` targets every live image, \
        `missing` only those lacking the artifact the job type produces, `single` the image \
        named by `image_uid`.",
    request_body = EnqueueJobsRequest,
    responses(
        (status = 202, description = "Jobs enqueued", body = EnqueueJobsResponse),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Image not found for `single` (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user = %auth_user.user_uid))]
pub async fn enqueue_jobs(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<EnqueueJobsRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require_admin()?;

    let image_uid = payload.image_uid.filter(|u| !u.trim().is_empty());
    if payload.command == JobCommand::Single
        && let Some(uid) = &image_uid
    {
        state.assets().get(uid).await?;
    }

    let request = BatchRequest {
        kind: payload.kind,
        command: payload.command,
        image_uid,
    };
    let job_uids = state
        .jobs
        .enqueue_batch(&state.library, &request, &auth_user.user_uid)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueJobsResponse {
            count: job_uids.len(),
            job_uids,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Admin Jobs",
    operation_id = "listJobs",
    summary = "List job rows",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Job list", body = JobListResponse),
        (status = 400, description = "Unknown topic or status (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn list_jobs(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListJobsQuery>,
) -> Result<Json<JobListResponse>, AppError> {
    auth_user.require_admin()?;

    let topic = match query.topic.as_deref().filter(|t| !t.is_empty()) {
        None => None,
        Some(t) => Some(parse_kind(t)?.topic()),
    };
    let status = match query.status.as_deref().filter(|s| !s.is_empty()) {
        None => None,
        Some(s) => Some(s.parse::<JobStatus>().map_err(AppError::Validation)?),
    };
    let (page, per_page) = page_params(query.page, query.per_page);

    let (rows, total) = JobService::new(&state.db)
        .list(topic, status, page, per_page)
        .await?;

    Ok(Json(JobListResponse {
        data: rows.into_iter().map(JobResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    get,
    path = "/stats",
    tag = "Admin Jobs",
    operation_id = "jobStats",
    summary = "Queued and running jobs per topic",
    responses(
        (status = 200, description = "Per-topic counters", body = JobCounts),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
pub async fn job_stats(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<JobCounts>, AppError> {
    auth_user.require_admin()?;
    Ok(Json(state.jobs.counts()))
}

#[utoipa::path(
    get,
    path = "/{uid}",
    tag = "Admin Jobs",
    operation_id = "getJob",
    summary = "Get a job",
    description = "Returns the persisted row, or the in-memory status when the row cannot be read.",
    params(("uid" = String, Path, description = "Job UID")),
    responses(
        (status = 200, description = "Job", body = JobResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn get_job(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    auth_user.require_admin()?;
    let lookup = state
        .jobs
        .get(&uid)
        .await?
        .ok_or_else(|| AppError::NotFound("Job not found".into()))?;
    Ok(Json(lookup.into()))
}

#[utoipa::path(
    delete,
    path = "/{uid}",
    tag = "Admin Jobs",
    operation_id = "cancelJob",
    summary = "Cancel a job",
    description = "Queued jobs are skipped when dispatched. A running handler stops at its next \
        progress checkpoint.",
    params(("uid" = String, Path, description = "Job UID")),
    responses(
        (status = 200, description = "Job cancelled", body = CancelJobResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Job not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Job already finished (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(uid = %uid))]
pub async fn cancel_job(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> Result<Json<CancelJobResponse>, AppError> {
    auth_user.require_admin()?;
    let previous_status = state.jobs.cancel(&uid).await?;
    Ok(Json(CancelJobResponse {
        uid,
        previous_status,
    }))
}

#[utoipa::path(
    put,
    path = "/types/{type}/concurrency",
    tag = "Admin Jobs",
    operation_id = "setJobConcurrency",
    summary = "Set per-topic concurrency",
    description = "Resizes the limit of handlers running at once for a job type. Takes effect \
        for the next dispatch; running handlers are not interrupted.",
    params(("type" = String, Path, description = "Job type (`thumbnailGeneration`) or topic (`image_process`)")),
    request_body = ConcurrencyRequest,
    responses(
        (status = 200, description = "Concurrency updated", body = ConcurrencyResponse),
        (status = 400, description = "Out of range 1..=100 (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown job type (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(job_type = %job_type))]
pub async fn set_concurrency(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    AppJson(payload): AppJson<ConcurrencyRequest>,
) -> Result<Json<ConcurrencyResponse>, AppError> {
    auth_user.require_admin()?;
    let topic = JobKind::parse(&job_type)
        .ok_or_else(|| AppError::NotFound(format!("Unknown job type '{job_type}'")))?
        .topic();

    let previous = state.jobs.set_concurrency(topic, payload.concurrency)?;
    info!(topic = %topic, concurrency = payload.concurrency, previous, "Topic concurrency changed");
    Ok(Json(ConcurrencyResponse {
        topic: topic.as_str().to_string(),
        concurrency: payload.concurrency,
        previous,
    }))
}

#[utoipa::path(
    get,
    path = "/dead-letter",
    tag = "Admin Jobs",
    operation_id = "listDeadLetters",
    summary = "List dead-lettered jobs",
    description = "Jobs that exhausted their retries or failed fatally, with their retry history.",
    params(ListDeadLettersQuery),
    responses(
        (status = 200, description = "Dead-letter list", body = DeadLetterListResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn list_dead_letters(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ListDeadLettersQuery>,
) -> Result<Json<DeadLetterListResponse>, AppError> {
    auth_user.require_admin()?;
    let (page, per_page) = page_params(query.page, query.per_page);

    let (rows, total) = JobService::new(&state.db)
        .list_dead_letters(query.resolved, page, per_page)
        .await?;

    Ok(Json(DeadLetterListResponse {
        data: rows.into_iter().map(DeadLetterResponse::from).collect(),
        pagination: Pagination::new(page, per_page, total),
    }))
}

#[utoipa::path(
    post,
    path = "/dead-letter/{id}/retry",
    tag = "Admin Jobs",
    operation_id = "retryDeadLetter",
    summary = "Retry a dead-lettered job",
    description = "Enqueues the stored payload again under a new job uid and marks the entry resolved.",
    params(("id" = i32, Path, description = "Dead-letter entry ID")),
    responses(
        (status = 202, description = "Job re-enqueued", body = RetryDeadLetterResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Entry not found (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Entry already resolved (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(id))]
pub async fn retry_dead_letter(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require_admin()?;
    let job_uid = state.jobs.retry_dead_letter(id, &auth_user.user_uid).await?;
    Ok((StatusCode::ACCEPTED, Json(RetryDeadLetterResponse { job_uid })))
}

fn parse_kind(s: &str) -> Result<JobKind, AppError> {
    JobKind::parse(s).ok_or_else(|| AppError::Validation(format!("Unknown job type '{s}'")))
}
