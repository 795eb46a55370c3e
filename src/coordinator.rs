//! The Velvet Hour session state machine.
//!
//! The coordinator owns no state of its own: every verb re-reads
//! authoritative state from the store, mutates inside a store transaction,
//! and then emits best-effort messages through the hub. Time never advances
//! the machine; the round-end timestamp is advisory for clients.
//!
//! Sessions move `waiting → in_round → (break) → … → completed` across
//! rounds, driven by operator verbs and by match confirmations. The round
//! timer starts when the first match of the round has both sides confirmed;
//! a later duplicate confirmation never moves it.

use crate::clock::Clock;
use crate::db::{Database, DbError, NewMatch, Session, SessionStatus};
use crate::error::VelvetError;
use crate::hub::{Hub, MessageType};
use crate::pairing;
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Retry a store operation once on a transient (busy/locked) failure.
async fn retry_once<T, F, Fut>(op: F) -> Result<T, DbError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, DbError>>,
{
    match op().await {
        Err(e) if e.is_retryable() => {
            debug!(error = %e, "Transient store failure, retrying once");
            op().await
        }
        other => other,
    }
}

/// Outcome of a `start-round` verb.
#[derive(Debug, Clone, Copy)]
pub struct RoundStarted {
    pub session_id: Uuid,
    pub round_number: i64,
    pub match_count: usize,
}

/// Outcome of a `confirm-match` verb.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmOutcome {
    pub match_id: Uuid,
    pub both_confirmed: bool,
}

/// Orchestrates the session state machine over store, hub, and clock.
pub struct Coordinator {
    db: Database,
    hub: Hub,
    clock: Arc<dyn Clock>,
}

impl Coordinator {
    pub fn new(db: Database, hub: Hub, clock: Arc<dyn Clock>) -> Self {
        Self { db, hub, clock }
    }

    /// Operator: start a session for an event.
    ///
    /// Requires the event to have Velvet Hour enabled, to not have run it
    /// before, and to have at least `min_participants` users connected.
    pub async fn start_session(&self, event_id: Uuid) -> Result<Session, VelvetError> {
        let event = self.db.events().find(event_id).await?;
        if !event.velvet_hour_enabled {
            return Err(VelvetError::Precondition(
                "velvet hour is not enabled for this event",
            ));
        }
        if event.already_started {
            return Err(VelvetError::AlreadyRun);
        }

        let required = event.min_participants();
        let present = self.hub.present_count(event_id).await;
        if present < required {
            return Err(VelvetError::NotEnoughPresent { required, present });
        }

        let now = self.clock.now();
        let session =
            retry_once(|| async move { self.db.velvet_hour().create_session(event_id, now).await })
                .await?;
        self.db.events().set_already_started(event_id, true).await?;

        info!(%event_id, session_id = %session.id, present, "Velvet hour session started");
        self.hub.broadcast_event(
            event_id,
            MessageType::VelvetHourSessionStarted,
            json!({
                "sessionId": session.id,
                "status": SessionStatus::Waiting.as_str(),
            }),
        );

        Ok(session)
    }

    /// Operator: schedule the next round.
    ///
    /// Matches are either supplied explicitly by the operator or generated
    /// by the pairer from the participants currently connected. The round is
    /// scheduled in `waiting`: matched pairs still have to find each other
    /// and confirm before the timer starts.
    pub async fn start_round(
        &self,
        event_id: Uuid,
        manual_matches: Option<Vec<NewMatch>>,
    ) -> Result<RoundStarted, VelvetError> {
        let event = self.db.events().find(event_id).await?;
        let session = self
            .db
            .velvet_hour()
            .active_session(event_id)
            .await?
            .ok_or(VelvetError::NotFound("session"))?;

        if !matches!(
            session.status,
            SessionStatus::Waiting | SessionStatus::Break
        ) {
            return Err(VelvetError::Precondition("session is not between rounds"));
        }
        if session.current_round >= event.total_rounds {
            return Err(VelvetError::Precondition("all rounds have been played"));
        }

        let next_round = session.current_round + 1;
        let matches = match manual_matches {
            Some(manual) if !manual.is_empty() => {
                self.validate_manual_matches(&session, &manual).await?;
                manual
            }
            _ => self.generate_matches(&session).await?,
        };

        let now = self.clock.now();
        let session_id = session.id;
        let matches_ref = &matches;
        retry_once(|| async move {
            self.db
                .velvet_hour()
                .schedule_round(session_id, next_round, matches_ref, now)
                .await
        })
        .await?;

        info!(
            %event_id,
            session_id = %session.id,
            round = next_round,
            matches = matches.len(),
            "Round scheduled"
        );
        self.hub.broadcast_event(
            event_id,
            MessageType::VelvetHourRoundStarted,
            json!({
                "sessionId": session.id,
                "roundNumber": next_round,
                "matchCount": matches.len(),
            }),
        );

        Ok(RoundStarted {
            session_id: session.id,
            round_number: next_round,
            match_count: matches.len(),
        })
    }

    /// Operator overrides may pair users who have already met; everything
    /// else about a round's shape is still enforced.
    async fn validate_manual_matches(
        &self,
        session: &Session,
        manual: &[NewMatch],
    ) -> Result<(), VelvetError> {
        let participants: HashSet<Uuid> = self
            .db
            .velvet_hour()
            .participants(session.id)
            .await?
            .into_iter()
            .map(|p| p.user_id)
            .collect();

        let mut seen: HashSet<Uuid> = HashSet::new();
        for m in manual {
            if m.user1_id == m.user2_id {
                return Err(VelvetError::InvalidInput(
                    "a match cannot pair a user with themselves".to_string(),
                ));
            }
            for user_id in [m.user1_id, m.user2_id] {
                if !participants.contains(&user_id) {
                    return Err(VelvetError::Precondition(
                        "match includes a user who has not joined the session",
                    ));
                }
                if !seen.insert(user_id) {
                    return Err(VelvetError::InvalidInput(
                        "a user appears in more than one match".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    async fn generate_matches(&self, session: &Session) -> Result<Vec<NewMatch>, VelvetError> {
        let present = self.hub.present_users(session.event_id).await;
        let participants = self
            .db
            .velvet_hour()
            .present_participants(session.id, &present)
            .await?;
        let prior_pairs = self.db.velvet_hour().prior_pairs(session.id).await?;

        let participant_ids: Vec<Uuid> = participants.iter().map(|p| p.user_id).collect();
        let seed = self.clock.now_millis() as u64;
        let planned = pairing::build_round(&participant_ids, &prior_pairs, seed)?;

        Ok(planned
            .into_iter()
            .map(|m| NewMatch {
                user1_id: m.user1_id,
                user2_id: m.user2_id,
                match_number: m.match_number,
                match_color: m.match_color,
            })
            .collect())
    }

    /// Participant: join the active session.
    ///
    /// Idempotent; rejoining resets the participant back to `waiting`.
    pub async fn join(&self, user_id: Uuid) -> Result<Session, VelvetError> {
        let event = self
            .db
            .events()
            .active_velvet_event()
            .await?
            .ok_or(VelvetError::NotFound("event"))?;
        if !self.db.events().is_attending(event.id, user_id).await? {
            return Err(VelvetError::Forbidden("not attending this event"));
        }

        let session = self
            .db
            .velvet_hour()
            .active_session(event.id)
            .await?
            .ok_or(VelvetError::NotFound("session"))?;

        let now = self.clock.now();
        let session_id = session.id;
        retry_once(|| async move {
            self.db
                .velvet_hour()
                .upsert_participant(session_id, user_id, now)
                .await
        })
        .await?;

        self.hub.broadcast_event(
            event.id,
            MessageType::VelvetHourParticipantJoined,
            json!({
                "userId": user_id,
                "sessionId": session.id,
            }),
        );
        self.hub.refresh_presence(event.id).await;

        Ok(session)
    }

    /// Participant: confirm having found the match partner.
    ///
    /// When the second side confirms, one transaction stamps the match;
    /// the first fully-confirmed match of the round also starts the round
    /// timer. Confirmations race: both sides may observe "other side
    /// already confirmed", but only the first write moves the session out
    /// of `waiting`, so `round_ends_at` is set exactly once.
    pub async fn confirm_match(
        &self,
        user_id: Uuid,
        match_id: Uuid,
    ) -> Result<ConfirmOutcome, VelvetError> {
        let m = self.db.velvet_hour().match_by_id(match_id).await?;
        if m.partner_of(user_id).is_none() {
            return Err(VelvetError::NotFound("match"));
        }

        let session = self.db.velvet_hour().session_by_id(m.session_id).await?;
        if !session.is_active {
            return Err(VelvetError::Precondition("session has ended"));
        }
        if m.round_number != session.current_round {
            return Err(VelvetError::Precondition(
                "match is not part of the current round",
            ));
        }

        let (confirmed_user1, confirmed_user2) = retry_once(|| async move {
            self.db
                .velvet_hour()
                .record_confirmation(match_id, user_id)
                .await
        })
        .await?;
        let both_confirmed = confirmed_user1 && confirmed_user2;

        self.hub.broadcast_event(
            session.event_id,
            MessageType::VelvetHourMatchConfirmed,
            json!({
                "matchId": match_id,
                "userId": user_id,
                "bothConfirmed": both_confirmed,
            }),
        );

        if both_confirmed {
            let event = self.db.events().find(session.event_id).await?;
            let now = self.clock.now();
            let ends_at = now + chrono::Duration::minutes(event.round_duration_minutes);
            let session_id = session.id;
            let started = retry_once(|| async move {
                self.db
                    .velvet_hour()
                    .start_round_timer(session_id, match_id, now, ends_at)
                    .await
            })
            .await?;
            if started {
                info!(
                    session_id = %session.id,
                    round = session.current_round,
                    %match_id,
                    "Round timer started"
                );
            }
        }

        Ok(ConfirmOutcome {
            match_id,
            both_confirmed,
        })
    }

    /// Participant: submit feedback about the match partner.
    pub async fn submit_feedback(
        &self,
        user_id: Uuid,
        match_id: Uuid,
        want_to_connect: bool,
        reason: &str,
    ) -> Result<(), VelvetError> {
        if reason.trim().is_empty() {
            return Err(VelvetError::InvalidInput(
                "feedbackReason must not be empty".to_string(),
            ));
        }

        let m = self.db.velvet_hour().match_by_id(match_id).await?;
        let Some(partner_id) = m.partner_of(user_id) else {
            return Err(VelvetError::NotFound("match"));
        };

        // Feedback opens once the match's round has started. Earlier rounds
        // have necessarily run; the current round must have its timer going.
        let session = self.db.velvet_hour().session_by_id(m.session_id).await?;
        let round_started = if m.round_number == session.current_round {
            session.round_started_at.is_some()
        } else {
            m.round_number < session.current_round
        };
        if !round_started {
            return Err(VelvetError::Precondition("round has not started yet"));
        }

        let now = self.clock.now();
        retry_once(|| async move {
            self.db
                .velvet_hour()
                .insert_feedback(match_id, user_id, partner_id, want_to_connect, reason, now)
                .await
        })
        .await?;

        self.hub.broadcast_event(
            session.event_id,
            MessageType::VelvetHourFeedbackSubmitted,
            json!({
                "matchId": match_id,
                "fromUserId": user_id,
                "toUserId": partner_id,
                "wantToConnect": want_to_connect,
            }),
        );

        Ok(())
    }

    /// Operator: end the active session.
    pub async fn end_session(&self, event_id: Uuid) -> Result<Uuid, VelvetError> {
        let session = self
            .db
            .velvet_hour()
            .active_session(event_id)
            .await?
            .ok_or(VelvetError::NotFound("session"))?;

        let now = self.clock.now();
        let session_id = session.id;
        retry_once(|| async move { self.db.velvet_hour().end_session(session_id, now).await })
            .await?;

        info!(%event_id, %session_id, "Velvet hour session ended");
        self.hub.broadcast_event(
            event_id,
            MessageType::VelvetHourSessionEnded,
            json!({ "sessionId": session.id }),
        );

        Ok(session.id)
    }

    /// Operator: wipe all Velvet Hour state for an event so it can run again.
    pub async fn reset(&self, event_id: Uuid) -> Result<(), VelvetError> {
        retry_once(|| async move { self.db.velvet_hour().reset_event(event_id).await }).await?;

        info!(%event_id, "Velvet hour reset");
        self.hub.broadcast_event(
            event_id,
            MessageType::VelvetHourSessionReset,
            json!({
                "eventId": event_id,
                "message": "The operator has reset the Velvet Hour session. \
                     Please refresh and rejoin if you would like to participate.",
            }),
        );
        self.hub.broadcast_admins(
            event_id,
            MessageType::VelvetHourStatusUpdate,
            json!({
                "status": "reset",
                "sessionActive": false,
                "theHourStarted": false,
            }),
        );

        Ok(())
    }

    /// Operator: force-disconnect all non-admin clients of the event room.
    pub async fn clear_connections(&self, event_id: Uuid) -> usize {
        self.hub.clear_non_admin(event_id).await
    }
}
