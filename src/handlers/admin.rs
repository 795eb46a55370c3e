//! Operator endpoints for driving a Velvet Hour session.

use super::auth::AdminUser;
use super::velvet_hour::RoundConfig;
use super::AppState;
use crate::db::{Match, NewMatch, Participant, Session, SessionStatus};
use crate::error::VelvetError;
use crate::hub::ConnectionInfo;
use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Admin view of the Velvet Hour for one event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminStatusResponse {
    pub session: Option<Session>,
    pub participants: Vec<Participant>,
    pub current_matches: Vec<Match>,
    pub completed_rounds: i64,
    pub can_start_round: bool,
    pub config: RoundConfig,
}

/// GET /admin/events/{event_id}/velvet-hour
pub async fn status(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<AdminStatusResponse>, VelvetError> {
    let event = state.db.events().find(event_id).await?;
    let session = state.db.velvet_hour().active_session(event_id).await?;

    let (participants, current_matches) = match &session {
        Some(session) => {
            let participants = state.db.velvet_hour().participants(session.id).await?;
            let matches = if session.current_round > 0 {
                state
                    .db
                    .velvet_hour()
                    .matches_for_round(session.id, session.current_round)
                    .await?
            } else {
                Vec::new()
            };
            (participants, matches)
        }
        None => (Vec::new(), Vec::new()),
    };

    let can_start_round = session.as_ref().is_some_and(|s| {
        matches!(s.status, SessionStatus::Waiting | SessionStatus::Break)
            && s.current_round < event.total_rounds
            && participants.len() >= 2
    });
    let completed_rounds = session.as_ref().map_or(0, |s| s.current_round);

    Ok(Json(AdminStatusResponse {
        session,
        participants,
        current_matches,
        completed_rounds,
        can_start_round,
        config: RoundConfig::from(&event),
    }))
}

/// POST /admin/events/{event_id}/velvet-hour/start
pub async fn start_session(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    let session = state.coordinator.start_session(event_id).await?;
    Ok(Json(json!({
        "message": "Velvet Hour session started",
        "sessionId": session.id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualMatchBody {
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub match_number: i64,
    pub match_color: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRoundRequest {
    /// Operator-supplied matches; omitted to let the pairer decide.
    #[serde(default)]
    pub matches: Vec<ManualMatchBody>,
}

/// POST /admin/events/{event_id}/velvet-hour/round
pub async fn start_round(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
    Json(body): Json<StartRoundRequest>,
) -> Result<Json<Value>, VelvetError> {
    let manual = if body.matches.is_empty() {
        None
    } else {
        Some(
            body.matches
                .into_iter()
                .map(|m| NewMatch {
                    user1_id: m.user1_id,
                    user2_id: m.user2_id,
                    match_number: m.match_number,
                    match_color: m.match_color,
                })
                .collect(),
        )
    };

    let started = state.coordinator.start_round(event_id, manual).await?;
    Ok(Json(json!({
        "message": format!("Round {} started", started.round_number),
        "round": started.round_number,
        "matchCount": started.match_count,
    })))
}

/// POST /admin/events/{event_id}/velvet-hour/end
pub async fn end_session(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    let session_id = state.coordinator.end_session(event_id).await?;
    Ok(Json(json!({
        "message": "Velvet Hour session ended",
        "sessionId": session_id,
    })))
}

/// POST /admin/events/{event_id}/velvet-hour/reset
pub async fn reset(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    state.coordinator.reset(event_id).await?;
    Ok(Json(json!({ "message": "Velvet Hour reset" })))
}

/// POST /admin/events/{event_id}/velvet-hour/clear-connections
pub async fn clear_connections(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    let disconnected = state.coordinator.clear_connections(event_id).await;
    Ok(Json(json!({
        "success": true,
        "message": format!("Cleared {disconnected} connections"),
        "disconnectedCount": disconnected,
    })))
}

/// GET /admin/events/{event_id}/velvet-hour/attendance
pub async fn attendance_stats(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    let event = state.db.events().find(event_id).await?;
    let attending_count = state.db.events().count_attending(event_id).await?;
    let present_count = state.hub.present_count(event_id).await;
    let min_participants = event.min_participants();
    let can_start = present_count >= min_participants && !event.already_started;

    Ok(Json(json!({
        "attendingCount": attending_count,
        "presentCount": present_count,
        "minParticipants": min_participants,
        "canStart": can_start,
        "alreadyStarted": event.already_started,
    })))
}

/// GET /admin/events/{event_id}/velvet-hour/present
pub async fn present_users(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<Value>, VelvetError> {
    let present = state.hub.present_users(event_id).await;
    let users = state.db.users().by_ids(&present).await?;
    Ok(Json(json!(users)))
}

/// GET /admin/events/{event_id}/velvet-hour/connections
pub async fn connection_info(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
) -> Result<Json<ConnectionInfo>, VelvetError> {
    Ok(Json(state.hub.connection_info(event_id).await))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigRequest {
    pub round_duration: Option<i64>,
    pub break_duration: Option<i64>,
    pub total_rounds: Option<i64>,
}

/// PATCH /admin/events/{event_id}/velvet-hour/config
pub async fn update_config(
    State(state): State<AppState>,
    AdminUser(_admin): AdminUser,
    Path(event_id): Path<Uuid>,
    Json(body): Json<UpdateConfigRequest>,
) -> Result<Json<RoundConfig>, VelvetError> {
    for value in [body.round_duration, body.break_duration, body.total_rounds]
        .into_iter()
        .flatten()
    {
        if value <= 0 {
            return Err(VelvetError::InvalidInput(
                "round settings must be positive".to_string(),
            ));
        }
    }

    let event = state
        .db
        .events()
        .update_round_config(
            event_id,
            body.round_duration,
            body.break_duration,
            body.total_rounds,
        )
        .await?;

    Ok(Json(RoundConfig::from(&event)))
}
