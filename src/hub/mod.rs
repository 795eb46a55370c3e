//! Presence hub: event-scoped rooms of live WebSocket clients.
//!
//! The hub is an actor. A single task owns the rooms map and processes
//! register/unregister/broadcast commands and heartbeat-sweep ticks
//! sequentially, which eliminates the interleavings where a socket close
//! races a broadcast. Per client there are two further tasks, a reader and
//! a writer (see [`client`]); neither touches the map.
//!
//! Delivery to a client is never blocking: a frame is queued on the
//! client's bounded send queue or, if the queue is full, the client is
//! evicted and its socket closed. Ordering is preserved per client by the
//! single writer task; there is no ordering across rooms.

mod client;
mod message;

pub use client::{run_client, ClientMeta};
pub use message::{MessageType, WsMessage};

use crate::clock::Clock;
use crate::config::HubConfig;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of each client's outbound frame queue.
const SEND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the hub's command queue.
const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Notice text sent to clients on a forced disconnect.
const ADMIN_DISCONNECT_NOTICE: &str = "You have been disconnected by an administrator. \
     Please refresh the page to reconnect to the event.";

/// Timing knobs resolved from [`HubConfig`].
#[derive(Debug, Clone, Copy)]
struct HubTimings {
    heartbeat_timeout: Duration,
    sweep_interval: Duration,
    presence_debounce: Duration,
    disconnect_grace: Duration,
}

impl From<&HubConfig> for HubTimings {
    fn from(config: &HubConfig) -> Self {
        Self {
            heartbeat_timeout: Duration::from_secs(config.heartbeat_timeout_secs),
            sweep_interval: Duration::from_secs(config.sweep_interval_secs),
            presence_debounce: Duration::from_millis(config.presence_debounce_ms),
            disconnect_grace: Duration::from_millis(config.disconnect_grace_ms),
        }
    }
}

/// Per-connection debug info.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionEntry {
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub is_admin: bool,
    pub seconds_since_heartbeat: i64,
}

/// Debug snapshot of one room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub event_id: Uuid,
    pub total_connections: usize,
    pub unique_users: usize,
    pub connections: Vec<ConnectionEntry>,
}

/// Commands processed by the hub actor.
enum HubCommand {
    Register {
        meta: ClientMeta,
        sender: mpsc::Sender<WsMessage>,
    },
    Unregister {
        event_id: Uuid,
        client_id: Uuid,
    },
    Heartbeat {
        event_id: Uuid,
        client_id: Uuid,
    },
    Broadcast {
        event_id: Uuid,
        message_type: MessageType,
        data: Value,
        admins_only: bool,
    },
    ClearNonAdmin {
        event_id: Uuid,
        reply_tx: oneshot::Sender<usize>,
    },
    PresentUsers {
        event_id: Uuid,
        reply_tx: oneshot::Sender<Vec<Uuid>>,
    },
    IsPresent {
        event_id: Uuid,
        user_id: Uuid,
        reply_tx: oneshot::Sender<bool>,
    },
    ConnectionInfo {
        event_id: Uuid,
        reply_tx: oneshot::Sender<ConnectionInfo>,
    },
    /// A presence debounce timer fired.
    FlushPresence {
        event_id: Uuid,
    },
}

/// Cloneable handle to the hub actor.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawn the hub actor and return a handle to it.
    pub fn spawn(config: &HubConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

        let actor = HubActor {
            rooms: HashMap::new(),
            pending_presence: HashSet::new(),
            timings: HubTimings::from(config),
            clock,
            cmd_tx: tx.clone(),
        };

        tokio::spawn(async move {
            actor.run(rx).await;
        });

        Self { tx }
    }

    /// Register a client in its event room. The hub takes ownership of the
    /// send-queue sender; dropping it is how the hub closes the client.
    pub async fn register(&self, meta: ClientMeta, sender: mpsc::Sender<WsMessage>) {
        let _ = self.tx.send(HubCommand::Register { meta, sender }).await;
    }

    /// Remove a client from its room.
    pub async fn unregister(&self, event_id: Uuid, client_id: Uuid) {
        let _ = self
            .tx
            .send(HubCommand::Unregister {
                event_id,
                client_id,
            })
            .await;
    }

    /// Record a heartbeat for a client.
    pub async fn heartbeat(&self, event_id: Uuid, client_id: Uuid) {
        let _ = self
            .tx
            .send(HubCommand::Heartbeat {
                event_id,
                client_id,
            })
            .await;
    }

    /// Broadcast to every client of an event room. Never blocks the caller;
    /// if the hub queue is full the message is dropped and logged.
    pub fn broadcast_event(&self, event_id: Uuid, message_type: MessageType, data: Value) {
        self.enqueue_broadcast(event_id, message_type, data, false);
    }

    /// Broadcast to the admin clients of an event room only.
    pub fn broadcast_admins(&self, event_id: Uuid, message_type: MessageType, data: Value) {
        self.enqueue_broadcast(event_id, message_type, data, true);
    }

    fn enqueue_broadcast(
        &self,
        event_id: Uuid,
        message_type: MessageType,
        data: Value,
        admins_only: bool,
    ) {
        let command = HubCommand::Broadcast {
            event_id,
            message_type,
            data,
            admins_only,
        };
        if self.tx.try_send(command).is_err() {
            warn!(
                %event_id,
                message_type = message_type.as_str(),
                "Hub queue full, dropping broadcast"
            );
            crate::metrics::FRAMES_DROPPED.inc();
        }
    }

    /// Force-disconnect every non-admin client of an event room; returns how
    /// many clients were disconnected. Admin clients remain connected.
    pub async fn clear_non_admin(&self, event_id: Uuid) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubCommand::ClearNonAdmin { event_id, reply_tx })
            .await;
        reply_rx.await.unwrap_or(0)
    }

    /// Distinct user ids currently connected to an event.
    pub async fn present_users(&self, event_id: Uuid) -> Vec<Uuid> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubCommand::PresentUsers { event_id, reply_tx })
            .await;
        reply_rx.await.unwrap_or_default()
    }

    /// Number of distinct users currently connected to an event.
    pub async fn present_count(&self, event_id: Uuid) -> usize {
        self.present_users(event_id).await.len()
    }

    /// Whether a user has at least one live connection to an event.
    pub async fn is_present(&self, event_id: Uuid, user_id: Uuid) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubCommand::IsPresent {
                event_id,
                user_id,
                reply_tx,
            })
            .await;
        reply_rx.await.unwrap_or(false)
    }

    /// Debug snapshot of an event room.
    pub async fn connection_info(&self, event_id: Uuid) -> ConnectionInfo {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .tx
            .send(HubCommand::ConnectionInfo { event_id, reply_tx })
            .await;
        reply_rx.await.unwrap_or(ConnectionInfo {
            event_id,
            total_connections: 0,
            unique_users: 0,
            connections: Vec::new(),
        })
    }

    /// Ask for a (debounced) presence update to admins of an event.
    pub async fn refresh_presence(&self, event_id: Uuid) {
        let _ = self.tx.send(HubCommand::FlushPresence { event_id }).await;
    }
}

/// A connected client as the actor sees it.
struct ClientEntry {
    user_id: Uuid,
    is_admin: bool,
    sender: mpsc::Sender<WsMessage>,
    last_heartbeat: DateTime<Utc>,
}

/// The hub actor. Owns the rooms map; runs until every handle is dropped.
struct HubActor {
    /// event_id -> client_id -> entry
    rooms: HashMap<Uuid, HashMap<Uuid, ClientEntry>>,
    /// Events with a presence debounce timer in flight.
    pending_presence: HashSet<Uuid>,
    timings: HubTimings,
    clock: Arc<dyn Clock>,
    /// Handle for debounce timers to post back into the queue.
    cmd_tx: mpsc::Sender<HubCommand>,
}

impl HubActor {
    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>) {
        let mut sweep = tokio::time::interval(self.timings.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of an interval fires immediately.
        sweep.tick().await;

        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    self.sweep_stale_clients();
                }
            }
        }
    }

    fn handle_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { meta, sender } => self.register(meta, sender),
            HubCommand::Unregister {
                event_id,
                client_id,
            } => self.unregister(event_id, client_id),
            HubCommand::Heartbeat {
                event_id,
                client_id,
            } => {
                if let Some(entry) = self
                    .rooms
                    .get_mut(&event_id)
                    .and_then(|room| room.get_mut(&client_id))
                {
                    entry.last_heartbeat = self.clock.now();
                }
            }
            HubCommand::Broadcast {
                event_id,
                message_type,
                data,
                admins_only,
            } => self.broadcast(event_id, message_type, data, admins_only),
            HubCommand::ClearNonAdmin { event_id, reply_tx } => {
                let cleared = self.clear_non_admin(event_id);
                let _ = reply_tx.send(cleared);
            }
            HubCommand::PresentUsers { event_id, reply_tx } => {
                let _ = reply_tx.send(self.present_users(event_id));
            }
            HubCommand::IsPresent {
                event_id,
                user_id,
                reply_tx,
            } => {
                let present = self
                    .rooms
                    .get(&event_id)
                    .is_some_and(|room| room.values().any(|c| c.user_id == user_id));
                let _ = reply_tx.send(present);
            }
            HubCommand::ConnectionInfo { event_id, reply_tx } => {
                let _ = reply_tx.send(self.connection_info(event_id));
            }
            HubCommand::FlushPresence { event_id } => self.flush_presence(event_id),
        }
    }

    fn register(&mut self, meta: ClientMeta, sender: mpsc::Sender<WsMessage>) {
        let room = self.rooms.entry(meta.event_id).or_default();
        room.insert(
            meta.client_id,
            ClientEntry {
                user_id: meta.user_id,
                is_admin: meta.is_admin,
                sender,
                last_heartbeat: self.clock.now(),
            },
        );
        crate::metrics::CLIENTS_CONNECTED.inc();
        debug!(
            client_id = %meta.client_id,
            event_id = %meta.event_id,
            user_id = %meta.user_id,
            is_admin = meta.is_admin,
            "Client joined event room"
        );

        self.schedule_presence(meta.event_id);
    }

    fn unregister(&mut self, event_id: Uuid, client_id: Uuid) {
        let Some(room) = self.rooms.get_mut(&event_id) else {
            return;
        };
        if room.remove(&client_id).is_some() {
            crate::metrics::CLIENTS_CONNECTED.dec();
            debug!(%client_id, %event_id, "Client left event room");
            if room.is_empty() {
                self.rooms.remove(&event_id);
            }
            self.schedule_presence(event_id);
        }
    }

    fn broadcast(
        &mut self,
        event_id: Uuid,
        message_type: MessageType,
        data: Value,
        admins_only: bool,
    ) {
        let Some(room) = self.rooms.get_mut(&event_id) else {
            return;
        };

        let frame = WsMessage::new(message_type, event_id, data, self.clock.now_millis());
        crate::metrics::record_broadcast(message_type.as_str());

        // Non-blocking fan-out: a full send queue evicts the client.
        let mut evicted = Vec::new();
        for (client_id, entry) in room.iter() {
            if admins_only && !entry.is_admin {
                continue;
            }
            match entry.sender.try_send(frame.clone()) {
                Ok(()) => crate::metrics::FRAMES_SENT.inc(),
                Err(_) => evicted.push(*client_id),
            }
        }

        for client_id in evicted {
            if room.remove(&client_id).is_some() {
                crate::metrics::CLIENTS_CONNECTED.dec();
                crate::metrics::FRAMES_DROPPED.inc();
                warn!(%client_id, %event_id, "Send queue full, evicting client");
            }
        }
        if room.is_empty() {
            self.rooms.remove(&event_id);
        }
    }

    fn clear_non_admin(&mut self, event_id: Uuid) -> usize {
        let Some(room) = self.rooms.get_mut(&event_id) else {
            info!(%event_id, "No connections to clear");
            return 0;
        };

        let targets: Vec<Uuid> = room
            .iter()
            .filter(|(_, entry)| !entry.is_admin)
            .map(|(id, _)| *id)
            .collect();

        let timestamp = self.clock.now_millis();
        let mut draining = Vec::with_capacity(targets.len());
        for client_id in &targets {
            if let Some(entry) = room.remove(client_id) {
                let notice = WsMessage::new(
                    MessageType::AdminDisconnect,
                    event_id,
                    json!({
                        "message": ADMIN_DISCONNECT_NOTICE,
                        "reason": "admin_disconnect",
                    }),
                    timestamp,
                );
                let _ = entry.sender.try_send(notice);
                crate::metrics::CLIENTS_CONNECTED.dec();
                draining.push(entry.sender);
            }
        }
        if room.is_empty() {
            self.rooms.remove(&event_id);
        }

        let cleared = draining.len();
        info!(%event_id, cleared, "Cleared non-admin connections");

        // Give the writers a moment to flush the notice, then drop the
        // senders; each writer drains its queue and closes the socket.
        let grace = self.timings.disconnect_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            drop(draining);
        });

        // Presence changed; tell the remaining admins right away.
        self.flush_presence(event_id);

        cleared
    }

    fn sweep_stale_clients(&mut self) {
        let now = self.clock.now();
        let threshold = chrono::Duration::from_std(self.timings.heartbeat_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(90));

        let mut stale = Vec::new();
        for (event_id, room) in &self.rooms {
            for (client_id, entry) in room {
                if now - entry.last_heartbeat > threshold {
                    stale.push((*event_id, *client_id));
                }
            }
        }

        for (event_id, client_id) in &stale {
            warn!(%client_id, %event_id, "Removing stale client");
            crate::metrics::STALE_EVICTIONS.inc();
            self.unregister(*event_id, *client_id);
        }
    }

    fn present_users(&self, event_id: Uuid) -> Vec<Uuid> {
        let Some(room) = self.rooms.get(&event_id) else {
            return Vec::new();
        };
        // Deduplicate users with multiple connections (multiple tabs).
        let users: HashSet<Uuid> = room.values().map(|c| c.user_id).collect();
        users.into_iter().collect()
    }

    fn connection_info(&self, event_id: Uuid) -> ConnectionInfo {
        let now = self.clock.now();
        let Some(room) = self.rooms.get(&event_id) else {
            return ConnectionInfo {
                event_id,
                total_connections: 0,
                unique_users: 0,
                connections: Vec::new(),
            };
        };

        let connections: Vec<ConnectionEntry> = room
            .iter()
            .map(|(client_id, entry)| ConnectionEntry {
                client_id: *client_id,
                user_id: entry.user_id,
                is_admin: entry.is_admin,
                seconds_since_heartbeat: (now - entry.last_heartbeat).num_seconds(),
            })
            .collect();
        let unique_users = room
            .values()
            .map(|c| c.user_id)
            .collect::<HashSet<_>>()
            .len();

        ConnectionInfo {
            event_id,
            total_connections: room.len(),
            unique_users,
            connections,
        }
    }

    /// Schedule a debounced presence update for an event.
    ///
    /// Bursts of membership churn (a page reload opens and closes a socket
    /// in quick succession) coalesce into one update per debounce window.
    fn schedule_presence(&mut self, event_id: Uuid) {
        if !self.pending_presence.insert(event_id) {
            return;
        }
        let debounce = self.timings.presence_debounce;
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = cmd_tx.send(HubCommand::FlushPresence { event_id }).await;
        });
    }

    /// Recompute the unique-user count and push it to the room's admins.
    fn flush_presence(&mut self, event_id: Uuid) {
        self.pending_presence.remove(&event_id);
        let present_count = self.present_users(event_id).len();
        self.broadcast(
            event_id,
            MessageType::AttendanceStatsUpdate,
            json!({
                "presentCount": present_count,
                "type": "presence_update",
            }),
            true,
        );
    }
}
