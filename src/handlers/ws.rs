//! WebSocket upgrade endpoint.
//!
//! `GET /ws/events/{event_id}` upgrades to the event room socket. The caller
//! authenticates with the usual bearer header or, for browser clients that
//! cannot set headers on upgrade requests, a `token` query parameter.

use super::auth::resolve_token;
use super::AppState;
use crate::error::VelvetError;
use crate::hub::{run_client, ClientMeta};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// GET /ws/events/{event_id}
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(event_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
) -> Result<Response, VelvetError> {
    // Header first, query parameter as the fallback. Clients sometimes send
    // the query value with its own "Bearer " prefix; tolerate that.
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .map(str::to_string)
        .or_else(|| {
            query
                .token
                .as_deref()
                .map(|t| t.strip_prefix("Bearer ").unwrap_or(t).trim().to_string())
        })
        .ok_or(VelvetError::Unauthorized)?;

    let user = resolve_token(&state, &token).await?;
    state.db.events().find(event_id).await?;

    let meta = ClientMeta::new(event_id, user.id, user.is_admin());
    info!(
        %event_id,
        user_id = %user.id,
        is_admin = meta.is_admin,
        "WebSocket connection accepted"
    );

    let hub = state.hub.clone();
    let clock = state.clock.clone();
    Ok(ws.on_upgrade(move |socket| run_client(socket, hub, meta, clock)))
}
