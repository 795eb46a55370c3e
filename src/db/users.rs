//! User repository: accounts and bearer tokens.

use super::DbError;
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

/// A registered user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: Uuid,
    pub display_name: String,
    pub email: String,
    pub role: String,
}

impl UserRecord {
    pub fn is_admin(&self) -> bool {
        self.role == "admin"
    }
}

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user with the given role (`attendee` or `admin`).
    pub async fn create(
        &self,
        display_name: &str,
        email: &str,
        role: &str,
        now: DateTime<Utc>,
    ) -> Result<UserRecord, DbError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO users (id, display_name, email, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(display_name)
        .bind(email)
        .bind(role)
        .bind(now)
        .execute(self.pool)
        .await?;

        Ok(UserRecord {
            id,
            display_name: display_name.to_string(),
            email: email.to_string(),
            role: role.to_string(),
        })
    }

    /// Find a user by id.
    pub async fn find(&self, id: Uuid) -> Result<UserRecord, DbError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String)>(
            "SELECT id, display_name, email, role FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool)
        .await?;

        match row {
            Some((id, display_name, email, role)) => Ok(UserRecord {
                id,
                display_name,
                email,
                role,
            }),
            None => Err(DbError::NotFound("user")),
        }
    }

    /// Issue a new opaque bearer token for a user.
    pub async fn issue_token(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<String, DbError> {
        let token: String = {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            format!("vlv_{suffix}")
        };

        sqlx::query("INSERT INTO api_tokens (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(now)
            .execute(self.pool)
            .await?;

        Ok(token)
    }

    /// Resolve a bearer token to its user, touching `last_used_at`.
    ///
    /// Returns `None` for unknown tokens; the caller decides the 401.
    pub async fn user_for_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserRecord>, DbError> {
        let row = sqlx::query_as::<_, (Uuid, String, String, String)>(
            r#"
            SELECT u.id, u.display_name, u.email, u.role
            FROM api_tokens t
            JOIN users u ON u.id = t.user_id
            WHERE t.token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool)
        .await?;

        let Some((id, display_name, email, role)) = row else {
            return Ok(None);
        };

        // Best-effort usage bookkeeping; a failure here must not fail auth.
        if let Err(e) = sqlx::query("UPDATE api_tokens SET last_used_at = ? WHERE token = ?")
            .bind(now)
            .bind(token)
            .execute(self.pool)
            .await
        {
            tracing::warn!(error = %e, "Failed to update token last_used_at");
        }

        Ok(Some(UserRecord {
            id,
            display_name,
            email,
            role,
        }))
    }

    /// Load users by id, ordered by display name.
    pub async fn by_ids(&self, ids: &[Uuid]) -> Result<Vec<UserRecord>, DbError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT id, display_name, email, role FROM users WHERE id IN ({placeholders}) ORDER BY display_name",
        );

        let mut query = sqlx::query_as::<_, (Uuid, String, String, String)>(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(self.pool).await?;
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
}
