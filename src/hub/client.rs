//! Per-socket client tasks.
//!
//! Each connection runs one task that splits the socket and races a reader
//! against a writer:
//!
//! - the **writer** drains the client's bounded send queue into the socket;
//!   it ends when the hub drops the queue sender (eviction, forced
//!   disconnect) or on a write error.
//! - the **reader** drains inbound frames; it answers `PING` with `PONG`,
//!   reports heartbeats to the hub, and ends when the socket closes.
//!
//! Whichever half finishes first tears the connection down; the client is
//! then unregistered from its room.

use super::{Hub, MessageType, WsMessage, SEND_QUEUE_CAPACITY};
use crate::clock::Clock;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Identity of one socket within the hub.
#[derive(Debug, Clone, Copy)]
pub struct ClientMeta {
    pub client_id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
}

impl ClientMeta {
    pub fn new(event_id: Uuid, user_id: Uuid, is_admin: bool) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            event_id,
            user_id,
            is_admin,
        }
    }
}

/// Run a client connection to completion.
pub async fn run_client(socket: WebSocket, hub: Hub, meta: ClientMeta, clock: Arc<dyn Clock>) {
    let (tx, rx) = mpsc::channel::<WsMessage>(SEND_QUEUE_CAPACITY);
    // The reader only holds a weak sender: the hub owning the sole strong
    // sender means dropping it ends the writer and closes the socket.
    let reply_tx = tx.downgrade();
    hub.register(meta, tx).await;

    let (sink, stream) = socket.split();

    tokio::select! {
        _ = write_pump(sink, rx) => {}
        _ = read_pump(stream, &hub, meta, reply_tx, clock) => {}
    }

    hub.unregister(meta.event_id, meta.client_id).await;
    debug!(client_id = %meta.client_id, "Connection closed");
}

/// Drain the send queue into the socket.
async fn write_pump(mut sink: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<WsMessage>) {
    while let Some(frame) = rx.recv().await {
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "Failed to serialize frame");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            // Write error: the connection is gone.
            return;
        }
    }
    // Queue closed by the hub; deliver a close frame before teardown.
    let _ = sink.send(Message::Close(None)).await;
}

/// Drain inbound frames from the socket.
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    hub: &Hub,
    meta: ClientMeta,
    reply_tx: mpsc::WeakSender<WsMessage>,
    clock: Arc<dyn Clock>,
) {
    while let Some(result) = stream.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!(client_id = %meta.client_id, error = %e, "Socket read error");
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let frame: WsMessage = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        debug!(client_id = %meta.client_id, error = %e, "Unparseable frame");
                        continue;
                    }
                };

                // PING is the only inbound type the hub interprets.
                if frame.message_type == MessageType::Ping {
                    hub.heartbeat(meta.event_id, meta.client_id).await;
                    if let Some(tx) = reply_tx.upgrade() {
                        let pong = WsMessage::new(
                            MessageType::Pong,
                            meta.event_id,
                            Value::Null,
                            clock.now_millis(),
                        );
                        let _ = tx.try_send(pong);
                    }
                }
            }
            Message::Close(_) => break,
            // Protocol-level ping/pong and binary frames are ignored.
            _ => {}
        }
    }
}
