use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::Response;
use common::event::EventRecord;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::events::serve_socket;
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppQuery;
use crate::models::event::{
    ClientsResponse, RecentQuery, SinceQuery, SinceResponse, SocketQuery, clamp_limit,
};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/",
    tag = "Events",
    operation_id = "eventSocket",
    summary = "Subscribe to live events",
    description = "Upgrades to a WebSocket that receives every broadcast event as a JSON text \
        frame. With `cursor`, history newer than it is replayed first. Slow clients lose \
        messages rather than stalling others.",
    params(SocketQuery),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, ws), fields(user = %auth_user.user_uid))]
pub async fn event_socket(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let broker = state.events.clone();
    let ping_every = Duration::from_secs(state.config.events.ping_interval_secs.max(1));
    ws.on_upgrade(move |socket| {
        serve_socket(socket, broker, auth_user.user_uid, ping_every, query.cursor)
    })
}

#[utoipa::path(
    get,
    path = "/since",
    tag = "Events",
    operation_id = "eventsSince",
    summary = "Replay events after a cursor",
    description = "Events with an id greater than `cursor`, oldest first. Pass `next_cursor` \
        back to continue. Only the bounded history is available.",
    params(SinceQuery),
    responses(
        (status = 200, description = "Events", body = SinceResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user))]
pub async fn events_since(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<SinceQuery>,
) -> Result<Json<SinceResponse>, AppError> {
    let (events, next_cursor) = state.events.since(query.cursor, clamp_limit(query.limit));
    Ok(Json(SinceResponse {
        events,
        next_cursor,
        last_id: state.events.last_id(),
    }))
}

#[utoipa::path(
    get,
    path = "/recent",
    tag = "Events",
    operation_id = "recentEvents",
    summary = "Most recent events",
    params(RecentQuery),
    responses(
        (status = 200, description = "Events, oldest first", body = Vec<EventRecord>),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
pub async fn recent_events(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<RecentQuery>,
) -> Result<Json<Vec<EventRecord>>, AppError> {
    Ok(Json(state.events.recent(clamp_limit(query.limit))))
}

#[utoipa::path(
    get,
    path = "/clients",
    tag = "Events",
    operation_id = "eventClients",
    summary = "Connected WebSocket clients",
    responses(
        (status = 200, description = "Clients", body = ClientsResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Not an admin (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
pub async fn event_clients(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ClientsResponse>, AppError> {
    auth_user.require_admin()?;
    let clients = state.events.clients();
    Ok(Json(ClientsResponse {
        count: clients.len(),
        clients,
    }))
}
