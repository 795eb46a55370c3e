//! Shared fixtures for integration tests.
//!
//! Tests run against the real store (in-memory SQLite) and the real hub
//! actor. Clients are synthetic: a registered `ClientMeta` plus a channel
//! receiver standing in for the socket's writer task, which lets tests
//! observe exactly what a connected browser would receive.

// Not every test binary uses every helper.
#![allow(dead_code)]

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;
use velvetd::clock::{Clock, ManualClock};
use velvetd::config::HubConfig;
use velvetd::coordinator::Coordinator;
use velvetd::handlers::AppState;
use velvetd::db::Database;
use velvetd::hub::{ClientMeta, Hub, MessageType, WsMessage};

/// How long a test waits for a frame before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(2);

pub struct TestApp {
    pub db: Database,
    pub hub: Hub,
    pub clock: ManualClock,
    pub coordinator: Arc<Coordinator>,
    pub event_id: Uuid,
    user_counter: u32,
}

/// A synthetic connected client.
pub struct TestClient {
    pub user_id: Uuid,
    pub client_id: Uuid,
    rx: mpsc::Receiver<WsMessage>,
}

impl TestApp {
    /// Spawn an app with default hub timings and one active event.
    pub async fn spawn(total_rounds: i64) -> Self {
        Self::spawn_with(total_rounds, HubConfig::default()).await
    }

    /// Spawn an app with custom hub timings (tests compress time).
    pub async fn spawn_with(total_rounds: i64, hub_config: HubConfig) -> Self {
        let db = Database::new(":memory:").await.expect("database");
        // Millisecond resolution, matching what the store round-trips.
        let start = chrono::DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
            .expect("valid timestamp");
        let clock = ManualClock::new(start);
        let hub = Hub::spawn(&hub_config, Arc::new(clock.clone()));
        let coordinator = Arc::new(Coordinator::new(
            db.clone(),
            hub.clone(),
            Arc::new(clock.clone()),
        ));

        let event = db
            .events()
            .create("Velvet Soiree", true, clock.now())
            .await
            .expect("event");
        db.events().set_active(event.id).await.expect("activate");
        db.events()
            .update_round_config(event.id, None, None, Some(total_rounds))
            .await
            .expect("config");

        Self {
            db,
            hub,
            clock,
            coordinator,
            event_id: event.id,
            user_counter: 0,
        }
    }

    /// Create a user marked attending for the event.
    pub async fn attending_user(&mut self, role: &str) -> Uuid {
        self.user_counter += 1;
        let user = self
            .db
            .users()
            .create(
                &format!("User {}", self.user_counter),
                &format!("user{}@{}.test", self.user_counter, self.event_id),
                role,
                self.clock.now(),
            )
            .await
            .expect("user");
        self.db
            .events()
            .set_attending(self.event_id, user.id, true)
            .await
            .expect("attendance");
        user.id
    }

    /// Build the HTTP router over this app's state.
    pub fn router(&self) -> axum::Router {
        velvetd::handlers::router(AppState {
            db: self.db.clone(),
            hub: self.hub.clone(),
            coordinator: self.coordinator.clone(),
            clock: Arc::new(self.clock.clone()),
        })
    }

    /// Issue a bearer token for a user.
    pub async fn token_for(&self, user_id: Uuid) -> String {
        self.db
            .users()
            .issue_token(user_id, self.clock.now())
            .await
            .expect("token")
    }

    /// Connect a synthetic client for a user.
    pub async fn connect(&self, user_id: Uuid, is_admin: bool) -> TestClient {
        let (tx, rx) = mpsc::channel(64);
        let meta = ClientMeta::new(self.event_id, user_id, is_admin);
        self.hub.register(meta, tx).await;
        TestClient {
            user_id,
            client_id: meta.client_id,
            rx,
        }
    }
}

impl TestClient {
    /// Receive the next frame, failing the test on timeout.
    pub async fn recv(&mut self) -> WsMessage {
        tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
    }

    /// Receive frames until one of the given type arrives.
    pub async fn recv_until(&mut self, message_type: MessageType) -> WsMessage {
        loop {
            let frame = self.recv().await;
            if frame.message_type == message_type {
                return frame;
            }
        }
    }

    /// Try to receive one frame within `wait`; `None` on silence.
    pub async fn try_recv_within(&mut self, wait: Duration) -> Option<WsMessage> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok()?
    }

    /// Wait for the hub to close this client's queue.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(RECV_TIMEOUT, self.rx.recv())
                .await
                .expect("timed out waiting for close")
            {
                Some(_) => continue,
                None => return,
            }
        }
    }

    /// Discard everything currently buffered.
    pub fn drain(&mut self) {
        while self.rx.try_recv().is_ok() {}
    }
}
