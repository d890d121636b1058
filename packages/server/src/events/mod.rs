//! Process-wide event broker behind the `/events` WebSocket.
//!
//! Every broadcast gets the next id from one counter, lands in a bounded
//! history ring and is offered to each connected client. A client whose
//! buffer is full misses that message; the history still has it.

mod socket;

pub use socket::serve_socket;

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::event::EventRecord;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::config::EventsConfig;

/// A connected WebSocket client as listed by `GET /events/clients`.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ClientInfo {
    pub id: String,
    pub user_uid: String,
    pub connected_at: DateTime<Utc>,
    /// Messages not delivered because the client's buffer was full.
    pub dropped: u64,
}

struct Client {
    info: ClientInfo,
    tx: mpsc::Sender<EventRecord>,
}

struct Inner {
    last_id: u64,
    history: VecDeque<EventRecord>,
    clients: HashMap<String, Client>,
}

pub struct EventBroker {
    inner: Mutex<Inner>,
    history_size: usize,
    client_buffer: usize,
}

impl EventBroker {
    pub fn new(config: &EventsConfig) -> Self {
        let history_size = config.history_size.max(1);
        Self {
            inner: Mutex::new(Inner {
                last_id: 0,
                history: VecDeque::with_capacity(history_size),
                clients: HashMap::new(),
            }),
            history_size,
            client_buffer: config.client_buffer.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(inner: &mut Inner, event: &str, data: serde_json::Value) -> EventRecord {
        inner.last_id += 1;
        EventRecord {
            id: inner.last_id,
            timestamp: Utc::now(),
            event: event.to_string(),
            data,
        }
    }

    /// Record an event and offer it to every client.
    pub fn broadcast(&self, event: &str, data: impl Serialize) -> EventRecord {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        let mut inner = self.lock();
        let record = Self::record(&mut inner, event, data);

        if inner.history.len() == self.history_size {
            inner.history.pop_front();
        }
        inner.history.push_back(record.clone());

        let mut gone = Vec::new();
        for (id, client) in inner.clients.iter_mut() {
            match client.tx.try_send(record.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    client.info.dropped += 1;
                    debug!(client_id = %id, event_id = record.id, "Client buffer full, event dropped");
                }
                Err(TrySendError::Closed(_)) => gone.push(id.clone()),
            }
        }
        for id in gone {
            inner.clients.remove(&id);
        }
        record
    }

    /// Send an event to one client only. Not kept in the history.
    /// Returns false if the client is unknown or could not take it.
    pub fn send_to(&self, client_id: &str, event: &str, data: impl Serialize) -> bool {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        let mut inner = self.lock();
        if !inner.clients.contains_key(client_id) {
            return false;
        }
        let record = Self::record(&mut inner, event, data);
        let Some(client) = inner.clients.get_mut(client_id) else {
            return false;
        };
        match client.tx.try_send(record) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                client.info.dropped += 1;
                false
            }
            Err(TrySendError::Closed(_)) => {
                inner.clients.remove(client_id);
                false
            }
        }
    }

    /// The newest `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EventRecord> {
        let inner = self.lock();
        let skip = inner.history.len().saturating_sub(limit);
        inner.history.iter().skip(skip).cloned().collect()
    }

    /// Up to `limit` events with `id > cursor`, and the cursor to pass next.
    pub fn since(&self, cursor: u64, limit: usize) -> (Vec<EventRecord>, u64) {
        let inner = self.lock();
        let records: Vec<EventRecord> = inner
            .history
            .iter()
            .filter(|r| r.id > cursor)
            .take(limit)
            .cloned()
            .collect();
        let next = records.last().map_or(cursor, |r| r.id);
        (records, next)
    }

    pub fn last_id(&self) -> u64 {
        self.lock().last_id
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> =
            self.lock().clients.values().map(|c| c.info.clone()).collect();
        clients.sort_by_key(|c| c.connected_at);
        clients
    }

    /// Add a client; events arrive on the returned receiver.
    pub fn register(&self, user_uid: &str) -> (String, mpsc::Receiver<EventRecord>) {
        let (tx, rx) = mpsc::channel(self.client_buffer);
        let id = uuid::Uuid::new_v4().to_string();
        let info = ClientInfo {
            id: id.clone(),
            user_uid: user_uid.to_string(),
            connected_at: Utc::now(),
            dropped: 0,
        };
        self.lock().clients.insert(id.clone(), Client { info, tx });
        debug!(client_id = %id, user_uid, "Event client connected");
        (id, rx)
    }

    /// Remove a client, closing its channel.
    pub fn unregister(&self, client_id: &str) {
        if let Some(client) = self.lock().clients.remove(client_id) {
            if client.info.dropped > 0 {
                warn!(client_id, dropped = client.info.dropped, "Event client disconnected after drops");
            } else {
                debug!(client_id, "Event client disconnected");
            }
        }
    }

    /// Drop every client, e.g. at shutdown.
    pub fn disconnect_all(&self) {
        self.lock().clients.clear();
    }
}
