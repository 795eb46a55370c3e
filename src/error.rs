//! Unified error handling for velvetd.
//!
//! This module provides the centralized error hierarchy for the Velvet Hour
//! core, with HTTP status mapping, structured JSON bodies, and metric
//! labeling. Database errors live beside sqlx in `db`; everything a handler
//! can fail with funnels through [`VelvetError`].

use crate::db::DbError;
use crate::pairing::PairingError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors produced by the Velvet Hour verbs and their HTTP handlers.
#[derive(Debug, Error)]
pub enum VelvetError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("a session is already active for this event")]
    SessionAlreadyActive,

    #[error("velvet hour has already been run for this event")]
    AlreadyRun,

    #[error("feedback already submitted for this match")]
    AlreadySubmitted,

    #[error("not enough participants present: need {required}, have {present}")]
    NotEnoughPresent { required: usize, present: usize },

    #[error("no valid pairing exists for this round")]
    NoValidPairing,

    #[error("precondition failed: {0}")]
    Precondition(&'static str),

    #[error("database error: {0}")]
    Db(sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VelvetError {
    /// Get a static error code string for metrics labeling and JSON bodies.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::SessionAlreadyActive => "session_already_active",
            Self::AlreadyRun => "already_run",
            Self::AlreadySubmitted => "already_submitted",
            Self::NotEnoughPresent { .. } => "not_enough_present",
            Self::NoValidPairing => "no_valid_pairing",
            Self::Precondition(_) => "precondition_failed",
            Self::Db(_) => "database_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionAlreadyActive | Self::AlreadyRun | Self::AlreadySubmitted => {
                StatusCode::CONFLICT
            }
            Self::NotEnoughPresent { .. } | Self::NoValidPairing | Self::Precondition(_) => {
                StatusCode::PRECONDITION_FAILED
            }
            Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DbError> for VelvetError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => Self::NotFound(what),
            DbError::SessionAlreadyActive => Self::SessionAlreadyActive,
            DbError::FeedbackAlreadySubmitted => Self::AlreadySubmitted,
            DbError::Precondition(what) => Self::Precondition(what),
            DbError::Decode(what) => Self::Internal(what),
            DbError::Sqlx(e) => Self::Db(e),
        }
    }
}

impl From<PairingError> for VelvetError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::NoValidPairing { .. } => Self::NoValidPairing,
        }
    }
}

impl IntoResponse for VelvetError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(code = self.error_code(), error = %self, "Request failed");
        }
        crate::metrics::record_verb_error(self.error_code());

        let mut body = json!({
            "error": self.to_string(),
            "code": self.error_code(),
        });
        if let Self::NotEnoughPresent { required, present } = &self {
            body["required"] = json!(required);
            body["present"] = json!(present);
        }

        (status, Json(body)).into_response()
    }
}
