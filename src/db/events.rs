//! Event repository: configuration, attendance, and the run-once flag.
//!
//! Events are owned by the wider backend; the Velvet Hour core only reads
//! their configuration and toggles `already_started` on session start and
//! reset.

use super::{DbError, UserRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

/// An event row, as seen by the Velvet Hour core.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub id: Uuid,
    pub title: String,
    pub is_active: bool,
    pub velvet_hour_enabled: bool,
    pub round_duration_minutes: i64,
    pub break_duration_minutes: i64,
    pub total_rounds: i64,
    pub already_started: bool,
}

impl EventRecord {
    /// Minimum present participants for unique pairings across all rounds.
    ///
    /// Round-robin bound: R participants suffice for R rounds when R is odd,
    /// R+1 when R is even.
    pub fn min_participants(&self) -> usize {
        let rounds = self.total_rounds.max(0) as usize;
        if rounds % 2 == 0 {
            rounds + 1
        } else {
            rounds
        }
    }
}

const EVENT_COLUMNS: &str = "id, title, is_active, velvet_hour_enabled, \
     round_duration_minutes, break_duration_minutes, total_rounds, already_started";

type EventRow = (Uuid, String, bool, bool, i64, i64, i64, bool);

fn event_from_row(row: EventRow) -> EventRecord {
    let (
        id,
        title,
        is_active,
        velvet_hour_enabled,
        round_duration_minutes,
        break_duration_minutes,
        total_rounds,
        already_started,
    ) = row;
    EventRecord {
        id,
        title,
        is_active,
        velvet_hour_enabled,
        round_duration_minutes,
        break_duration_minutes,
        total_rounds,
        already_started,
    }
}

/// Repository for event operations.
pub struct EventRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> EventRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create an event. Round settings use their schema defaults unless
    /// updated afterwards.
    pub async fn create(
        &self,
        title: &str,
        velvet_hour_enabled: bool,
        now: DateTime<Utc>,
    ) -> Result<EventRecord, DbError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO events (id, title, is_active, velvet_hour_enabled, created_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(id)
        .bind(title)
        .bind(velvet_hour_enabled)
        .bind(now)
        .execute(self.pool)
        .await?;

        self.find(id).await
    }

    /// Find an event by id.
    pub async fn find(&self, id: Uuid) -> Result<EventRecord, DbError> {
        let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        row.map(event_from_row).ok_or(DbError::NotFound("event"))
    }

    /// The currently active event with Velvet Hour enabled, if any.
    ///
    /// Participant verbs are scoped to this event; the wider backend keeps at
    /// most one event active at a time.
    pub async fn active_velvet_event(&self) -> Result<Option<EventRecord>, DbError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE is_active = 1 AND velvet_hour_enabled = 1"
        );
        let row = sqlx::query_as::<_, EventRow>(&sql)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(event_from_row))
    }

    /// Mark an event active (deactivating others).
    pub async fn set_active(&self, id: Uuid) -> Result<(), DbError> {
        sqlx::query("UPDATE events SET is_active = (id = ?)")
            .bind(id)
            .execute(self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear a user's attendance flag for an event.
    pub async fn set_attending(
        &self,
        event_id: Uuid,
        user_id: Uuid,
        attending: bool,
    ) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO event_attendance (event_id, user_id, attending)
            VALUES (?, ?, ?)
            ON CONFLICT (event_id, user_id) DO UPDATE SET attending = excluded.attending
            "#,
        )
        .bind(event_id)
        .bind(user_id)
        .bind(attending)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    /// Whether a user is marked attending for an event.
    pub async fn is_attending(&self, event_id: Uuid, user_id: Uuid) -> Result<bool, DbError> {
        let attending = sqlx::query_scalar::<_, bool>(
            "SELECT COALESCE((SELECT attending FROM event_attendance WHERE event_id = ? AND user_id = ?), 0)",
        )
        .bind(event_id)
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;
        Ok(attending)
    }

    /// Count users marked attending for an event.
    pub async fn count_attending(&self, event_id: Uuid) -> Result<usize, DbError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM event_attendance WHERE event_id = ? AND attending = 1",
        )
        .bind(event_id)
        .fetch_one(self.pool)
        .await?;
        Ok(count as usize)
    }

    /// Users marked attending, ordered by display name.
    pub async fn attending_users(&self, event_id: Uuid) -> Result<Vec<UserRecord>, DbError> {
        let rows = sqlx::query_as::<_, (Uuid, String, String, String)>(
            r#"
            SELECT u.id, u.display_name, u.email, u.role
            FROM event_attendance ea
            JOIN users u ON u.id = ea.user_id
            WHERE ea.event_id = ? AND ea.attending = 1
            ORDER BY u.display_name
            "#,
        )
        .bind(event_id)
        .fetch_all(self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, display_name, email, role)| UserRecord {
                id,
                display_name,
                email,
                role,
            })
            .collect())
    }

    /// Whether Velvet Hour has already been run for this event.
    pub async fn has_already_run(&self, event_id: Uuid) -> Result<bool, DbError> {
        let row = sqlx::query_scalar::<_, bool>("SELECT already_started FROM events WHERE id = ?")
            .bind(event_id)
            .fetch_optional(self.pool)
            .await?;
        row.ok_or(DbError::NotFound("event"))
    }

    /// Flip the event's run-once flag.
    pub async fn set_already_started(&self, event_id: Uuid, started: bool) -> Result<(), DbError> {
        let result = sqlx::query("UPDATE events SET already_started = ? WHERE id = ?")
            .bind(started)
            .bind(event_id)
            .execute(self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound("event"));
        }
        Ok(())
    }

    /// Update round configuration; `None` fields keep their current value.
    pub async fn update_round_config(
        &self,
        event_id: Uuid,
        round_duration: Option<i64>,
        break_duration: Option<i64>,
        total_rounds: Option<i64>,
    ) -> Result<EventRecord, DbError> {
        sqlx::query(
            r#"
            UPDATE events SET
                round_duration_minutes = COALESCE(?, round_duration_minutes),
                break_duration_minutes = COALESCE(?, break_duration_minutes),
                total_rounds = COALESCE(?, total_rounds)
            WHERE id = ?
            "#,
        )
        .bind(round_duration)
        .bind(break_duration)
        .bind(total_rounds)
        .bind(event_id)
        .execute(self.pool)
        .await?;

        self.find(event_id).await
    }
}
