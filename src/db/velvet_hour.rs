//! Velvet Hour repository: sessions, participants, matches, and feedback.
//!
//! This is the transactional store behind the session state machine. Every
//! operation is atomic; multi-statement operations run inside a single
//! transaction. Timestamps are supplied by the caller so the whole subsystem
//! shares one clock.

use super::{is_unique_violation, DbError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Waiting,
    InRound,
    Break,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::InRound => "in_round",
            Self::Break => "break",
            Self::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "in_round" => Ok(Self::InRound),
            "break" => Ok(Self::Break),
            "completed" => Ok(Self::Completed),
            other => Err(DbError::Decode(format!("unknown session status: {other}"))),
        }
    }
}

/// Participant lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    Waiting,
    Matched,
    InRound,
    Completed,
}

impl ParticipantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Matched => "matched",
            Self::InRound => "in_round",
            Self::Completed => "completed",
        }
    }

    fn parse(s: &str) -> Result<Self, DbError> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "matched" => Ok(Self::Matched),
            "in_round" => Ok(Self::InRound),
            "completed" => Ok(Self::Completed),
            other => Err(DbError::Decode(format!("unknown participant status: {other}"))),
        }
    }
}

/// A Velvet Hour session row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub event_id: Uuid,
    pub status: SessionStatus,
    pub current_round: i64,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub round_started_at: Option<DateTime<Utc>>,
    pub round_ends_at: Option<DateTime<Utc>>,
}

/// A participant row, joined with the user's display fields.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub status: ParticipantStatus,
    pub joined_at: DateTime<Utc>,
    pub user_name: String,
    pub user_email: String,
}

/// A match row, joined with both users' display names.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: Uuid,
    pub session_id: Uuid,
    pub round_number: i64,
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub match_number: i64,
    pub match_color: String,
    pub confirmed_user1: bool,
    pub confirmed_user2: bool,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub user1_name: String,
    pub user2_name: String,
}

impl Match {
    /// The other participant of this match, if `user_id` is one of the two.
    pub fn partner_of(&self, user_id: Uuid) -> Option<Uuid> {
        if user_id == self.user1_id {
            Some(self.user2_id)
        } else if user_id == self.user2_id {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

/// Input for a match to be inserted for a round.
#[derive(Debug, Clone)]
pub struct NewMatch {
    pub user1_id: Uuid,
    pub user2_id: Uuid,
    pub match_number: i64,
    pub match_color: String,
}

/// A feedback row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: Uuid,
    pub match_id: Uuid,
    pub from_user_id: Uuid,
    pub to_user_id: Uuid,
    pub want_to_connect: bool,
    pub feedback_reason: String,
    pub submitted_at: DateTime<Utc>,
}

const SESSION_COLUMNS: &str = "id, event_id, status, current_round, is_active, \
     started_at, ended_at, round_started_at, round_ends_at";

type SessionRow = (
    Uuid,
    Uuid,
    String,
    i64,
    bool,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

fn session_from_row(row: SessionRow) -> Result<Session, DbError> {
    let (
        id,
        event_id,
        status,
        current_round,
        is_active,
        started_at,
        ended_at,
        round_started_at,
        round_ends_at,
    ) = row;
    Ok(Session {
        id,
        event_id,
        status: SessionStatus::parse(&status)?,
        current_round,
        is_active,
        started_at,
        ended_at,
        round_started_at,
        round_ends_at,
    })
}

const MATCH_COLUMNS: &str = "m.id, m.session_id, m.round_number, m.user1_id, m.user2_id, \
     m.match_number, m.match_color, m.confirmed_user1, m.confirmed_user2, \
     m.confirmed_at, m.started_at, u1.display_name, u2.display_name";

const MATCH_JOINS: &str = "JOIN users u1 ON u1.id = m.user1_id \
     JOIN users u2 ON u2.id = m.user2_id";

type MatchRow = (
    Uuid,
    Uuid,
    i64,
    Uuid,
    Uuid,
    i64,
    String,
    bool,
    bool,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    String,
    String,
);

fn match_from_row(row: MatchRow) -> Match {
    let (
        id,
        session_id,
        round_number,
        user1_id,
        user2_id,
        match_number,
        match_color,
        confirmed_user1,
        confirmed_user2,
        confirmed_at,
        started_at,
        user1_name,
        user2_name,
    ) = row;
    Match {
        id,
        session_id,
        round_number,
        user1_id,
        user2_id,
        match_number,
        match_color,
        confirmed_user1,
        confirmed_user2,
        confirmed_at,
        started_at,
        user1_name,
        user2_name,
    }
}

/// Repository for Velvet Hour session state.
pub struct VelvetHourRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> VelvetHourRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// The active session for an event, if one exists.
    pub async fn active_session(&self, event_id: Uuid) -> Result<Option<Session>, DbError> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM velvet_hour_sessions WHERE event_id = ? AND is_active = 1"
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(event_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(session_from_row).transpose()
    }

    /// A session by id.
    pub async fn session_by_id(&self, session_id: Uuid) -> Result<Session, DbError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM velvet_hour_sessions WHERE id = ?");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(session_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(session_from_row)
            .transpose()?
            .ok_or(DbError::NotFound("session"))
    }

    /// Create a fresh session in `waiting` with no rounds played.
    ///
    /// Fails with [`DbError::SessionAlreadyActive`] when the event already
    /// has one; the partial unique index backs this up under races.
    pub async fn create_session(
        &self,
        event_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Session, DbError> {
        if self.active_session(event_id).await?.is_some() {
            return Err(DbError::SessionAlreadyActive);
        }

        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO velvet_hour_sessions
                (id, event_id, status, current_round, is_active, started_at, updated_at)
            VALUES (?, ?, 'waiting', 0, 1, ?, ?)
            "#,
        )
        .bind(id)
        .bind(event_id)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(Session {
                id,
                event_id,
                status: SessionStatus::Waiting,
                current_round: 0,
                is_active: true,
                started_at: now,
                ended_at: None,
                round_started_at: None,
                round_ends_at: None,
            }),
            Err(e) if is_unique_violation(&e) => Err(DbError::SessionAlreadyActive),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert a participant, or reset an existing one back to `waiting`.
    pub async fn upsert_participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO velvet_hour_participants (id, session_id, user_id, status, joined_at, updated_at)
            VALUES (?, ?, ?, 'waiting', ?, ?)
            ON CONFLICT (session_id, user_id)
            DO UPDATE SET status = 'waiting', updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(session_id)
        .bind(user_id)
        .bind(now)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// All participants of a session, in join order.
    pub async fn participants(&self, session_id: Uuid) -> Result<Vec<Participant>, DbError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, DateTime<Utc>, String, String)>(
            r#"
            SELECT p.id, p.session_id, p.user_id, p.status, p.joined_at,
                   u.display_name, u.email
            FROM velvet_hour_participants p
            JOIN users u ON u.id = p.user_id
            WHERE p.session_id = ?
            ORDER BY p.joined_at
            "#,
        )
        .bind(session_id)
        .fetch_all(self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, session_id, user_id, status, joined_at, user_name, user_email)| {
                    Ok(Participant {
                        id,
                        session_id,
                        user_id,
                        status: ParticipantStatus::parse(&status)?,
                        joined_at,
                        user_name,
                        user_email,
                    })
                },
            )
            .collect()
    }

    /// A single participant row for a user, if they joined the session.
    pub async fn participant(
        &self,
        session_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Participant>, DbError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, String, DateTime<Utc>, String, String)>(
            r#"
            SELECT p.id, p.session_id, p.user_id, p.status, p.joined_at,
                   u.display_name, u.email
            FROM velvet_hour_participants p
            JOIN users u ON u.id = p.user_id
            WHERE p.session_id = ? AND p.user_id = ?
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?;

        row.map(
            |(id, session_id, user_id, status, joined_at, user_name, user_email)| {
                Ok(Participant {
                    id,
                    session_id,
                    user_id,
                    status: ParticipantStatus::parse(&status)?,
                    joined_at,
                    user_name,
                    user_email,
                })
            },
        )
        .transpose()
    }

    /// Participants of a session restricted to the given present users,
    /// excluding anyone already `completed`.
    pub async fn present_participants(
        &self,
        session_id: Uuid,
        present_user_ids: &[Uuid],
    ) -> Result<Vec<Participant>, DbError> {
        let present: HashSet<Uuid> = present_user_ids.iter().copied().collect();
        let mut participants = self.participants(session_id).await?;
        participants.retain(|p| {
            p.status != ParticipantStatus::Completed && present.contains(&p.user_id)
        });
        Ok(participants)
    }

    /// All unordered pairs already matched in earlier rounds of a session.
    ///
    /// Pairs are normalized to `(low, high)` so lookups are order-independent.
    pub async fn prior_pairs(&self, session_id: Uuid) -> Result<HashSet<(Uuid, Uuid)>, DbError> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT user1_id, user2_id FROM velvet_hour_matches WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(a, b)| if a <= b { (a, b) } else { (b, a) })
            .collect())
    }

    /// Schedule a round: insert its matches and advance the session, as one
    /// all-or-nothing transaction.
    ///
    /// The session must be `waiting` or `break` with `current_round` exactly
    /// one behind; the guard claims the round so a racing duplicate fails
    /// without inserting anything. The round timer fields are cleared
    /// because the new round has not been confirmed yet.
    pub async fn schedule_round(
        &self,
        session_id: Uuid,
        new_round: i64,
        matches: &[NewMatch],
        now: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        let claimed = sqlx::query(
            r#"
            UPDATE velvet_hour_sessions
            SET current_round = ?, status = 'waiting',
                round_started_at = NULL, round_ends_at = NULL, updated_at = ?
            WHERE id = ? AND is_active = 1 AND status IN ('waiting', 'break')
              AND current_round = ? - 1
            "#,
        )
        .bind(new_round)
        .bind(now)
        .bind(session_id)
        .bind(new_round)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if claimed == 0 {
            tx.rollback().await?;
            return Err(DbError::Precondition("session is not between rounds"));
        }

        for m in matches {
            sqlx::query(
                r#"
                INSERT INTO velvet_hour_matches
                    (id, session_id, round_number, user1_id, user2_id,
                     match_number, match_color, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(session_id)
            .bind(new_round)
            .bind(m.user1_id)
            .bind(m.user2_id)
            .bind(m.match_number)
            .bind(&m.match_color)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// A match by id, with both users' names.
    pub async fn match_by_id(&self, match_id: Uuid) -> Result<Match, DbError> {
        let sql =
            format!("SELECT {MATCH_COLUMNS} FROM velvet_hour_matches m {MATCH_JOINS} WHERE m.id = ?");
        let row = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(match_id)
            .fetch_optional(self.pool)
            .await?;

        row.map(match_from_row).ok_or(DbError::NotFound("match"))
    }

    /// The match a user is in for a given round, if any.
    pub async fn match_for_user(
        &self,
        session_id: Uuid,
        round_number: i64,
        user_id: Uuid,
    ) -> Result<Option<Match>, DbError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM velvet_hour_matches m {MATCH_JOINS} \
             WHERE m.session_id = ? AND m.round_number = ? \
               AND (m.user1_id = ? OR m.user2_id = ?)"
        );
        let row = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(session_id)
            .bind(round_number)
            .bind(user_id)
            .bind(user_id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(match_from_row))
    }

    /// All matches of a round, in match-number order.
    pub async fn matches_for_round(
        &self,
        session_id: Uuid,
        round_number: i64,
    ) -> Result<Vec<Match>, DbError> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM velvet_hour_matches m {MATCH_JOINS} \
             WHERE m.session_id = ? AND m.round_number = ? \
             ORDER BY m.match_number"
        );
        let rows = sqlx::query_as::<_, MatchRow>(&sql)
            .bind(session_id)
            .bind(round_number)
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(match_from_row).collect())
    }

    /// Record one side's confirmation and return the post-update flag pair
    /// `(confirmed_user1, confirmed_user2)`.
    pub async fn record_confirmation(
        &self,
        match_id: Uuid,
        user_id: Uuid,
    ) -> Result<(bool, bool), DbError> {
        let row = sqlx::query_as::<_, (Uuid, Uuid)>(
            "SELECT user1_id, user2_id FROM velvet_hour_matches WHERE id = ?",
        )
        .bind(match_id)
        .fetch_optional(self.pool)
        .await?;

        let Some((user1_id, user2_id)) = row else {
            return Err(DbError::NotFound("match"));
        };

        let column = if user_id == user1_id {
            "confirmed_user1"
        } else if user_id == user2_id {
            "confirmed_user2"
        } else {
            return Err(DbError::NotFound("match"));
        };

        let sql = format!("UPDATE velvet_hour_matches SET {column} = 1 WHERE id = ?");
        sqlx::query(&sql).bind(match_id).execute(self.pool).await?;

        let flags = sqlx::query_as::<_, (bool, bool)>(
            "SELECT confirmed_user1, confirmed_user2 FROM velvet_hour_matches WHERE id = ?",
        )
        .bind(match_id)
        .fetch_one(self.pool)
        .await?;

        Ok(flags)
    }

    /// Stamp a fully-confirmed match and, for the first such match of the
    /// round, move the session to `in_round` with the advisory end time.
    /// One transaction.
    ///
    /// Every match whose pair completes confirmation gets its `started_at`
    /// and `confirmed_at` recorded. Only the session transition is guarded:
    /// racing confirmations both observe "other side confirmed", but a
    /// session already out of `waiting` is left untouched, so
    /// `round_ends_at` is set exactly once per round. Returns whether this
    /// call started the timer.
    pub async fn start_round_timer(
        &self,
        session_id: Uuid,
        match_id: Uuid,
        now: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE velvet_hour_matches
            SET started_at = ?, confirmed_at = ?
            WHERE id = ? AND started_at IS NULL
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(match_id)
        .execute(&mut *tx)
        .await?;

        let started = sqlx::query(
            r#"
            UPDATE velvet_hour_sessions
            SET status = 'in_round', round_started_at = ?, round_ends_at = ?, updated_at = ?
            WHERE id = ? AND is_active = 1 AND status = 'waiting' AND round_started_at IS NULL
            "#,
        )
        .bind(now)
        .bind(ends_at)
        .bind(now)
        .bind(session_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(started == 1)
    }

    /// Insert feedback from one match participant about the other.
    pub async fn insert_feedback(
        &self,
        match_id: Uuid,
        from_user_id: Uuid,
        to_user_id: Uuid,
        want_to_connect: bool,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Feedback, DbError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO velvet_hour_feedback
                (id, match_id, from_user_id, to_user_id, want_to_connect, feedback_reason, submitted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(match_id)
        .bind(from_user_id)
        .bind(to_user_id)
        .bind(want_to_connect)
        .bind(reason)
        .bind(now)
        .execute(self.pool)
        .await;

        match result {
            Ok(_) => Ok(Feedback {
                id,
                match_id,
                from_user_id,
                to_user_id,
                want_to_connect,
                feedback_reason: reason.to_string(),
                submitted_at: now,
            }),
            Err(e) if is_unique_violation(&e) => Err(DbError::FeedbackAlreadySubmitted),
            Err(e) => Err(e.into()),
        }
    }

    /// End the active session: terminal state, no longer active.
    pub async fn end_session(&self, session_id: Uuid, now: DateTime<Utc>) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE velvet_hour_sessions
            SET is_active = 0, ended_at = ?, status = 'completed', updated_at = ?
            WHERE id = ? AND is_active = 1
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(session_id)
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("session"));
        }
        Ok(())
    }

    /// Delete every Velvet Hour row of an event and clear its run-once flag.
    ///
    /// Deletes cascade feedback → matches → participants → sessions for all
    /// sessions of the event, batched per table, in one transaction.
    pub async fn reset_event(&self, event_id: Uuid) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM velvet_hour_feedback
            WHERE match_id IN (
                SELECT m.id FROM velvet_hour_matches m
                JOIN velvet_hour_sessions s ON s.id = m.session_id
                WHERE s.event_id = ?
            )
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM velvet_hour_matches
            WHERE session_id IN (SELECT id FROM velvet_hour_sessions WHERE event_id = ?)
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            DELETE FROM velvet_hour_participants
            WHERE session_id IN (SELECT id FROM velvet_hour_sessions WHERE event_id = ?)
            "#,
        )
        .bind(event_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM velvet_hour_sessions WHERE event_id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("UPDATE events SET already_started = 0 WHERE id = ?")
            .bind(event_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DbError::NotFound("event"));
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    async fn fixture() -> (Database, Uuid, Vec<Uuid>) {
        let db = Database::new(":memory:").await.expect("db");
        let now = Utc::now();
        let event = db
            .events()
            .create("Soiree", true, now)
            .await
            .expect("event");

        let mut users = Vec::new();
        for i in 0..4 {
            let user = db
                .users()
                .create(
                    &format!("User {i}"),
                    &format!("user{i}@example.com"),
                    "attendee",
                    now,
                )
                .await
                .expect("user");
            users.push(user.id);
        }

        (db, event.id, users)
    }

    #[tokio::test]
    async fn only_one_active_session_per_event() {
        let (db, event_id, _) = fixture().await;
        let now = Utc::now();

        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("first session");
        assert_eq!(session.status, SessionStatus::Waiting);
        assert_eq!(session.current_round, 0);

        let err = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect_err("second session must fail");
        assert!(matches!(err, DbError::SessionAlreadyActive));

        // Ending the session frees the slot.
        db.velvet_hour()
            .end_session(session.id, now)
            .await
            .expect("end");
        db.velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("new session after end");
    }

    #[tokio::test]
    async fn join_is_idempotent_and_resets_status() {
        let (db, event_id, users) = fixture().await;
        let now = Utc::now();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");

        db.velvet_hour()
            .upsert_participant(session.id, users[0], now)
            .await
            .expect("join");
        db.velvet_hour()
            .upsert_participant(session.id, users[0], now + Duration::seconds(5))
            .await
            .expect("rejoin");

        let participants = db
            .velvet_hour()
            .participants(session.id)
            .await
            .expect("list");
        assert_eq!(participants.len(), 1);
        assert_eq!(participants[0].status, ParticipantStatus::Waiting);
    }

    #[tokio::test]
    async fn prior_pairs_are_order_independent() {
        let (db, event_id, users) = fixture().await;
        let now = Utc::now();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");

        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[NewMatch {
                    user1_id: users[0],
                    user2_id: users[1],
                    match_number: 1,
                    match_color: "blue".into(),
                }],
                now,
            )
            .await
            .expect("insert");

        let pairs = db.velvet_hour().prior_pairs(session.id).await.expect("pairs");
        assert_eq!(pairs.len(), 1);
        let normalized = if users[0] <= users[1] {
            (users[0], users[1])
        } else {
            (users[1], users[0])
        };
        assert!(pairs.contains(&normalized));
    }

    #[tokio::test]
    async fn round_timer_is_idempotent() {
        let (db, event_id, users) = fixture().await;
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");

        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[NewMatch {
                    user1_id: users[0],
                    user2_id: users[1],
                    match_number: 1,
                    match_color: "blue".into(),
                }],
                now,
            )
            .await
            .expect("schedule");

        let matches = db
            .velvet_hour()
            .matches_for_round(session.id, 1)
            .await
            .expect("matches");
        let match_id = matches[0].id;

        let ends_at = now + Duration::minutes(10);
        let started = db
            .velvet_hour()
            .start_round_timer(session.id, match_id, now, ends_at)
            .await
            .expect("start");
        assert!(started);

        // A duplicate confirmation arrives later and must not move the timer.
        let later = now + Duration::seconds(30);
        let started_again = db
            .velvet_hour()
            .start_round_timer(session.id, match_id, later, later + Duration::minutes(10))
            .await
            .expect("repeat");
        assert!(!started_again);

        let session = db
            .velvet_hour()
            .active_session(event_id)
            .await
            .expect("query")
            .expect("active");
        assert_eq!(session.status, SessionStatus::InRound);
        assert_eq!(session.round_ends_at, Some(ends_at));
    }

    #[tokio::test]
    async fn every_confirmed_match_gets_its_start_stamp() {
        let (db, event_id, users) = fixture().await;
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");

        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[
                    NewMatch {
                        user1_id: users[0],
                        user2_id: users[1],
                        match_number: 1,
                        match_color: "blue".into(),
                    },
                    NewMatch {
                        user1_id: users[2],
                        user2_id: users[3],
                        match_number: 2,
                        match_color: "green".into(),
                    },
                ],
                now,
            )
            .await
            .expect("schedule");
        let matches = db
            .velvet_hour()
            .matches_for_round(session.id, 1)
            .await
            .expect("matches");

        let ends_at = now + Duration::minutes(10);
        assert!(db
            .velvet_hour()
            .start_round_timer(session.id, matches[0].id, now, ends_at)
            .await
            .expect("first match"));

        // The second pair completes confirmation a minute later: their match
        // is stamped even though the session is already in the round.
        let later = now + Duration::minutes(1);
        let started = db
            .velvet_hour()
            .start_round_timer(session.id, matches[1].id, later, later + Duration::minutes(10))
            .await
            .expect("second match");
        assert!(!started);

        let second = db
            .velvet_hour()
            .match_by_id(matches[1].id)
            .await
            .expect("match");
        assert_eq!(second.started_at, Some(later));
        assert_eq!(second.confirmed_at, Some(later));

        let session = db
            .velvet_hour()
            .session_by_id(session.id)
            .await
            .expect("session");
        assert_eq!(session.round_ends_at, Some(ends_at));
        assert_eq!(session.round_started_at, Some(now));
    }

    #[tokio::test]
    async fn duplicate_feedback_is_rejected() {
        let (db, event_id, users) = fixture().await;
        let now = Utc::now();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");
        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[NewMatch {
                    user1_id: users[0],
                    user2_id: users[1],
                    match_number: 1,
                    match_color: "blue".into(),
                }],
                now,
            )
            .await
            .expect("insert");
        let matches = db
            .velvet_hour()
            .matches_for_round(session.id, 1)
            .await
            .expect("matches");
        let match_id = matches[0].id;

        db.velvet_hour()
            .insert_feedback(match_id, users[0], users[1], true, "great chat", now)
            .await
            .expect("first");

        let err = db
            .velvet_hour()
            .insert_feedback(match_id, users[0], users[1], false, "changed my mind", now)
            .await
            .expect_err("duplicate must fail");
        assert!(matches!(err, DbError::FeedbackAlreadySubmitted));

        // The other side is unaffected.
        db.velvet_hour()
            .insert_feedback(match_id, users[1], users[0], true, "likewise", now)
            .await
            .expect("other side");
    }

    #[tokio::test]
    async fn reset_event_leaves_no_rows_and_clears_flag() {
        let (db, event_id, users) = fixture().await;
        let now = Utc::now();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");
        db.events()
            .set_already_started(event_id, true)
            .await
            .expect("flag");

        db.velvet_hour()
            .upsert_participant(session.id, users[0], now)
            .await
            .expect("join");
        db.velvet_hour()
            .upsert_participant(session.id, users[1], now)
            .await
            .expect("join");
        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[NewMatch {
                    user1_id: users[0],
                    user2_id: users[1],
                    match_number: 1,
                    match_color: "blue".into(),
                }],
                now,
            )
            .await
            .expect("matches");
        let matches = db
            .velvet_hour()
            .matches_for_round(session.id, 1)
            .await
            .expect("matches");
        db.velvet_hour()
            .insert_feedback(matches[0].id, users[0], users[1], true, "hi", now)
            .await
            .expect("feedback");

        db.velvet_hour().reset_event(event_id).await.expect("reset");

        assert!(db
            .velvet_hour()
            .active_session(event_id)
            .await
            .expect("query")
            .is_none());
        assert!(!db.events().has_already_run(event_id).await.expect("flag"));

        let orphans =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM velvet_hour_participants")
                .fetch_one(db.pool())
                .await
                .expect("count");
        assert_eq!(orphans, 0);

        // Prior pairs are gone, so the event can run again fresh.
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("new session");
        let pairs = db.velvet_hour().prior_pairs(session.id).await.expect("pairs");
        assert!(pairs.is_empty());
    }

    #[tokio::test]
    async fn confirmation_tracks_the_correct_side() {
        let (db, event_id, users) = fixture().await;
        let now = Utc::now();
        let session = db
            .velvet_hour()
            .create_session(event_id, now)
            .await
            .expect("session");
        db.velvet_hour()
            .schedule_round(
                session.id,
                1,
                &[NewMatch {
                    user1_id: users[0],
                    user2_id: users[1],
                    match_number: 1,
                    match_color: "blue".into(),
                }],
                now,
            )
            .await
            .expect("matches");
        let matches = db
            .velvet_hour()
            .matches_for_round(session.id, 1)
            .await
            .expect("matches");
        let match_id = matches[0].id;

        let flags = db
            .velvet_hour()
            .record_confirmation(match_id, users[1])
            .await
            .expect("confirm user2");
        assert_eq!(flags, (false, true));

        let flags = db
            .velvet_hour()
            .record_confirmation(match_id, users[0])
            .await
            .expect("confirm user1");
        assert_eq!(flags, (true, true));

        let err = db
            .velvet_hour()
            .record_confirmation(match_id, users[2])
            .await
            .expect_err("outsider cannot confirm");
        assert!(matches!(err, DbError::NotFound("match")));
    }
}
