//! HTTP surface: JSON REST endpoints plus the WebSocket upgrade.
//!
//! Handlers are thin: they authenticate the caller, translate the request
//! into a coordinator verb or a store read, and map [`VelvetError`] onto the
//! HTTP status vocabulary. Hub emissions happen inside the coordinator and
//! never fail a request.

pub mod admin;
pub mod auth;
pub mod velvet_hour;
pub mod ws;

use crate::clock::Clock;
use crate::coordinator::Coordinator;
use crate::db::Database;
use crate::hub::Hub;
use axum::routing::{get, patch, post};
use axum::Router;
use std::sync::Arc;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub hub: Hub,
    pub coordinator: Arc<Coordinator>,
    pub clock: Arc<dyn Clock>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        // Participant surface
        .route("/velvet-hour/status", get(velvet_hour::status))
        .route("/velvet-hour/join", post(velvet_hour::join))
        .route("/velvet-hour/confirm", post(velvet_hour::confirm))
        .route("/velvet-hour/feedback", post(velvet_hour::feedback))
        // Operator surface
        .route("/admin/events/{event_id}/velvet-hour", get(admin::status))
        .route(
            "/admin/events/{event_id}/velvet-hour/start",
            post(admin::start_session),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/round",
            post(admin::start_round),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/end",
            post(admin::end_session),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/reset",
            post(admin::reset),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/clear-connections",
            post(admin::clear_connections),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/attendance",
            get(admin::attendance_stats),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/present",
            get(admin::present_users),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/connections",
            get(admin::connection_info),
        )
        .route(
            "/admin/events/{event_id}/velvet-hour/config",
            patch(admin::update_config),
        )
        // Real-time
        .route("/ws/events/{event_id}", get(ws::upgrade))
        // Observability
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}
