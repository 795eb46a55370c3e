//! Database module for persistent storage.
//!
//! Provides async SQLite database access using SQLx for:
//! - Users and bearer tokens
//! - Events, configuration, and attendance
//! - Velvet Hour sessions, participants, matches, and feedback

mod events;
mod users;
mod velvet_hour;

pub use events::{EventRecord, EventRepository};
pub use users::{UserRecord, UserRepository};
pub use velvet_hour::{
    Feedback, Match, NewMatch, Participant, ParticipantStatus, Session, SessionStatus,
    VelvetHourRepository,
};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("a session is already active for this event")]
    SessionAlreadyActive,
    #[error("feedback already submitted for this match")]
    FeedbackAlreadySubmitted,
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
}

impl DbError {
    /// Whether the failed operation may succeed on retry.
    ///
    /// SQLite signals serialization pressure as BUSY/LOCKED; callers retry
    /// such a verb once before surfacing an internal error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(e)) => {
                let msg = e.message();
                matches!(e.code().as_deref(), Some("5") | Some("6") | Some("517"))
                    || msg.contains("database is locked")
                    || msg.contains("database table is locked")
            }
            _ => false,
        }
    }
}

/// Check whether a sqlx error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(e) => {
            matches!(e.code().as_deref(), Some("1555") | Some("2067"))
                || e.message().contains("UNIQUE constraint failed")
        }
        _ => false,
    }
}

/// Database handle with connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Create a new database connection, running migrations if needed.
    pub async fn new(path: &str) -> Result<Self, DbError> {
        let pool = if path == ":memory:" {
            // In-memory database. A single pinned connection keeps the
            // database alive for the lifetime of the pool and isolates it
            // from other in-memory handles in the same process.
            let options = SqliteConnectOptions::new()
                .filename(":memory:")
                .foreign_keys(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            // File-based database
            if let Some(parent) = Path::new(path).parent() {
                if !parent.as_os_str().is_empty() {
                    if let Err(e) = std::fs::create_dir_all(parent) {
                        tracing::warn!(path = %parent.display(), error = %e, "Failed to create database directory");
                    }
                }
            }

            let options = SqliteConnectOptions::new()
                .filename(path)
                .foreign_keys(true)
                .create_if_missing(true);

            SqlitePoolOptions::new()
                .max_connections(5)
                .acquire_timeout(Self::ACQUIRE_TIMEOUT)
                .idle_timeout(Some(Self::IDLE_TIMEOUT))
                .test_before_acquire(true)
                .connect_with(options)
                .await?
        };

        info!(path = %path, "Database connected");

        // Run embedded migrations
        Self::run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    /// Get reference to the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run embedded migrations.
    /// Checks for each table and runs the full migration if any are missing.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
        async fn table_exists(pool: &SqlitePool, table: &str) -> bool {
            sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name=?)",
            )
            .bind(table)
            .fetch_one(pool)
            .await
            .unwrap_or(false)
        }

        // 001_init.sql: full schema.
        let tables = [
            "users",
            "api_tokens",
            "events",
            "event_attendance",
            "velvet_hour_sessions",
            "velvet_hour_participants",
            "velvet_hour_matches",
            "velvet_hour_feedback",
        ];
        let mut init_ok = true;
        for t in tables {
            if !table_exists(pool, t).await {
                init_ok = false;
                break;
            }
        }

        if init_ok {
            info!("Database already initialized");
        } else {
            Self::run_migration_file(pool, include_str!("../../migrations/001_init.sql")).await;
            info!("Database migrations applied (001_init)");
        }

        Ok(())
    }

    /// Run a single migration file, executing each statement.
    async fn run_migration_file(pool: &SqlitePool, migration: &str) {
        for statement in migration.split(';') {
            // Remove leading comments and whitespace to get actual SQL
            let mut sql_lines: Vec<&str> = Vec::new();
            for line in statement.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with("--") {
                    continue;
                }
                sql_lines.push(line);
            }

            if sql_lines.is_empty() {
                continue;
            }

            let sql = sql_lines.join("\n");

            if let Err(e) = sqlx::query(&sql).execute(pool).await {
                let err_str = e.to_string();
                if !err_str.contains("already exists") {
                    tracing::warn!(sql = %sql, error = %e, "Migration statement failed");
                }
            }
        }
    }

    /// Get user repository.
    pub fn users(&self) -> UserRepository<'_> {
        UserRepository::new(&self.pool)
    }

    /// Get event repository.
    pub fn events(&self) -> EventRepository<'_> {
        EventRepository::new(&self.pool)
    }

    /// Get Velvet Hour repository.
    pub fn velvet_hour(&self) -> VelvetHourRepository<'_> {
        VelvetHourRepository::new(&self.pool)
    }
}
