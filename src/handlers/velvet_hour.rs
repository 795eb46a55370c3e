//! Participant endpoints for the Velvet Hour.

use super::auth::AuthUser;
use super::AppState;
use crate::clock::Clock;
use crate::db::{EventRecord, Match, Participant, Session};
use crate::error::VelvetError;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

/// Round configuration as clients see it. `minParticipants` is derived from
/// the round count, never configured directly.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundConfig {
    pub round_duration: i64,
    pub break_duration: i64,
    pub total_rounds: i64,
    pub min_participants: usize,
}

impl From<&EventRecord> for RoundConfig {
    fn from(event: &EventRecord) -> Self {
        Self {
            round_duration: event.round_duration_minutes,
            break_duration: event.break_duration_minutes,
            total_rounds: event.total_rounds,
            min_participants: event.min_participants(),
        }
    }
}

/// Full participant view of the Velvet Hour.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant: Option<Participant>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_match: Option<Match>,
    /// Seconds remaining in the current round, when one is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<RoundConfig>,
}

impl StatusResponse {
    fn inactive() -> Self {
        Self {
            is_active: false,
            event_id: None,
            session: None,
            participant: None,
            current_match: None,
            time_left: None,
            config: None,
        }
    }
}

/// GET /velvet-hour/status
pub async fn status(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<StatusResponse>, VelvetError> {
    let Some(event) = state.db.events().active_velvet_event().await? else {
        return Ok(Json(StatusResponse::inactive()));
    };
    if !state.db.events().is_attending(event.id, user.id).await? {
        return Ok(Json(StatusResponse::inactive()));
    }

    let config = RoundConfig::from(&event);
    let Some(session) = state.db.velvet_hour().active_session(event.id).await? else {
        // No session yet, but the user may connect for presence tracking.
        return Ok(Json(StatusResponse {
            is_active: true,
            event_id: Some(event.id),
            config: Some(config),
            ..StatusResponse::inactive()
        }));
    };

    let participant = state
        .db
        .velvet_hour()
        .participant(session.id, user.id)
        .await?;
    let current_match = if participant.is_some() && session.current_round > 0 {
        state
            .db
            .velvet_hour()
            .match_for_user(session.id, session.current_round, user.id)
            .await?
    } else {
        None
    };

    let time_left = session
        .round_ends_at
        .map(|ends_at| (ends_at - state.clock.now()).num_seconds())
        .filter(|remaining| *remaining > 0);

    Ok(Json(StatusResponse {
        is_active: true,
        event_id: Some(event.id),
        session: Some(session),
        participant,
        current_match,
        time_left,
        config: Some(config),
    }))
}

/// POST /velvet-hour/join
pub async fn join(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<Value>, VelvetError> {
    let session = state.coordinator.join(user.id).await?;
    Ok(Json(json!({
        "message": "Joined the Velvet Hour session",
        "sessionId": session.id,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub match_id: Uuid,
}

/// POST /velvet-hour/confirm
pub async fn confirm(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<ConfirmRequest>,
) -> Result<Json<Value>, VelvetError> {
    let outcome = state
        .coordinator
        .confirm_match(user.id, body.match_id)
        .await?;
    Ok(Json(json!({
        "message": "Match confirmed",
        "matchId": outcome.match_id,
        "bothConfirmed": outcome.both_confirmed,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRequest {
    pub match_id: Uuid,
    pub want_to_connect: bool,
    pub feedback_reason: String,
}

/// POST /velvet-hour/feedback
pub async fn feedback(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<Value>, VelvetError> {
    state
        .coordinator
        .submit_feedback(
            user.id,
            body.match_id,
            body.want_to_connect,
            &body.feedback_reason,
        )
        .await?;
    Ok(Json(json!({ "message": "Feedback submitted" })))
}
