use std::fmt;

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Which kind of ballot a window belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Election,
    Poll,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Election => f.write_str("Voting"),
            Scope::Poll => f.write_str("Poll"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedReason {
    NotStarted,
    Ended,
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClosedReason::NotStarted => f.write_str("not started yet"),
            ClosedReason::Ended => f.write_str("ended"),
        }
    }
}

/// Every way a voting operation can be refused.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Validation(String),

    #[error("{scope} has {reason}")]
    WindowClosed { scope: Scope, reason: ClosedReason },

    #[error("You have already voted in this poll")]
    AlreadyVoted,

    #[error("{0}")]
    InvalidChoice(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    NotAvailable(String),

    #[error("Not authorized to delete this {0}")]
    NotOwner(&'static str),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl VoteError {
    pub fn validation(msg: impl Into<String>) -> Self {
        VoteError::Validation(msg.into())
    }

    /// Stable identifier sent to clients alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            VoteError::Configuration(_) => "configuration",
            VoteError::Validation(_) => "validation",
            VoteError::WindowClosed { .. } => "window_closed",
            VoteError::AlreadyVoted => "already_voted",
            VoteError::InvalidChoice(_) => "invalid_choice",
            VoteError::NotFound(_) => "not_found",
            VoteError::NotAvailable(_) => "not_available",
            VoteError::NotOwner(_) => "forbidden",
            VoteError::Storage(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            VoteError::Configuration(_)
            | VoteError::Validation(_)
            | VoteError::InvalidChoice(_) => StatusCode::BAD_REQUEST,
            VoteError::WindowClosed { .. }
            | VoteError::NotAvailable(_)
            | VoteError::NotOwner(_) => StatusCode::FORBIDDEN,
            VoteError::AlreadyVoted => StatusCode::CONFLICT,
            VoteError::NotFound(_) => StatusCode::NOT_FOUND,
            VoteError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

// ===== HTTP boundary =====

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Unauthorized - invalid or missing bearer token")]
    Unauthorized,

    #[error("Admin access required")]
    Forbidden,

    #[error(transparent)]
    Vote(#[from] VoteError),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Vote(VoteError::Storage(err))
    }
}

/// Malformed or incomplete JSON bodies answer as validation errors.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Vote(VoteError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::Vote(VoteError::Storage(err)) => {
                tracing::error!("Database error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
            AppError::Vote(err) => (err.status(), err.code(), err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": code,
            "message": message,
        }));
        (status, body).into_response()
    }
}
