use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use common::event::EventRecord;
use futures::{SinkExt, StreamExt};
use tracing::debug;

use super::EventBroker;

/// Pump broker events into one WebSocket until either side goes away.
///
/// With `cursor` set, history newer than it is replayed first. Events that
/// also arrive live during the replay are sent once.
pub async fn serve_socket(
    socket: WebSocket,
    broker: Arc<EventBroker>,
    user_uid: String,
    ping_every: Duration,
    cursor: Option<u64>,
) {
    let (client_id, mut rx) = broker.register(&user_uid);
    let (mut sink, mut stream) = socket.split();
    let mut last_sent = 0u64;

    if let Some(cursor) = cursor {
        let (backlog, _) = broker.since(cursor, usize::MAX);
        for record in backlog {
            if send(&mut sink, &record).await.is_err() {
                broker.unregister(&client_id);
                return;
            }
            last_sent = record.id;
        }
    }

    let mut ping = tokio::time::interval(ping_every);
    ping.tick().await;

    loop {
        tokio::select! {
            next = rx.recv() => match next {
                Some(record) if record.id <= last_sent => {}
                Some(record) => {
                    if send(&mut sink, &record).await.is_err() {
                        break;
                    }
                    last_sent = record.id;
                }
                None => break,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    debug!(client_id = %client_id, last_sent, "Event socket closed");
    broker.unregister(&client_id);
}

async fn send<S>(sink: &mut S, record: &EventRecord) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = serde_json::to_string(record).map_err(|_| ())?;
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}
