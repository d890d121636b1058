use common::event::EventRecord;
use serde::{Deserialize, Serialize};

use crate::events::ClientInfo;

/// Largest page `GET /events/since` and `/events/recent` return.
pub const MAX_EVENT_PAGE: usize = 500;

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SinceQuery {
    /// Last event id the client has seen. 0 replays the whole history.
    #[serde(default)]
    pub cursor: u64,
    /// Default 100, max 500.
    pub limit: Option<usize>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct SinceResponse {
    pub events: Vec<EventRecord>,
    /// Pass as `cursor` on the next call.
    pub next_cursor: u64,
    /// Id of the newest event in the broker.
    pub last_id: u64,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct RecentQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct SocketQuery {
    /// Replay history newer than this id before streaming live events.
    pub cursor: Option<u64>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct ClientsResponse {
    pub count: usize,
    pub clients: Vec<ClientInfo>,
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(100).clamp(1, MAX_EVENT_PAGE)
}
