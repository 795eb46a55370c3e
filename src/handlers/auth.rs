//! Bearer-token authentication extractors.
//!
//! Callers authenticate with `Authorization: Bearer <token>`; the WebSocket
//! route additionally accepts a `token` query parameter because browsers
//! cannot attach headers to upgrade requests.

use super::AppState;
use crate::clock::Clock;
use crate::db::UserRecord;
use crate::error::VelvetError;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;

/// Any authenticated user.
pub struct AuthUser(pub UserRecord);

/// An authenticated user with the admin role.
pub struct AdminUser(pub UserRecord);

/// Extract the bearer token from an Authorization header value.
fn strip_bearer(value: &str) -> Option<&str> {
    value.strip_prefix("Bearer ").map(str::trim)
}

/// Resolve a raw token string to a user.
pub async fn resolve_token(state: &AppState, token: &str) -> Result<UserRecord, VelvetError> {
    let now = state.clock.now();
    state
        .db
        .users()
        .user_for_token(token, now)
        .await?
        .ok_or(VelvetError::Unauthorized)
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = VelvetError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(strip_bearer)
            .ok_or(VelvetError::Unauthorized)?;

        let user = resolve_token(state, token).await?;
        Ok(AuthUser(user))
    }
}

impl FromRequestParts<AppState> for AdminUser {
    type Rejection = VelvetError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(VelvetError::Forbidden("admin access required"));
        }
        Ok(AdminUser(user))
    }
}
