use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::ApiResponse;
use crate::services::{
    AccessError, AccountError, AuthError, PipelineRejection, SessionError,
};

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),

    DatabaseError(String),

    ValidationError(String),

    Conflict(String),

    InternalError(String),

    Unauthorized(String),

    Forbidden(String),

    Locked { until: DateTime<Utc> },
}

#[derive(Serialize)]
struct LockedBody {
    locked_until: DateTime<Utc>,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {msg}"),
            ApiError::DatabaseError(msg) => write!(f, "Database error: {msg}"),
            ApiError::ValidationError(msg) => write!(f, "Validation error: {msg}"),
            ApiError::Conflict(msg) => write!(f, "Conflict: {msg}"),
            ApiError::InternalError(msg) => write!(f, "Internal error: {msg}"),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {msg}"),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {msg}"),
            ApiError::Locked { until } => write!(f, "Locked until {until}"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::DatabaseError(msg) => {
                tracing::error!("Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "A database error occurred".to_string(),
                )
            }
            ApiError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::Locked { until } => {
                let body = ApiResponse {
                    success: false,
                    data: Some(LockedBody {
                        locked_until: *until,
                    }),
                    error: Some("Account is temporarily locked".to_string()),
                };
                return (StatusCode::LOCKED, Json(body)).into_response();
            }
        };

        let body = ApiResponse::<()>::error(error_message);
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(format!("{err:#}"))
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Invalid(msg) => ApiError::ValidationError(msg),
            AuthError::Database(msg) => ApiError::DatabaseError(msg),
            AuthError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<AccountError> for ApiError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NotFound(msg) => ApiError::NotFound(msg),
            AccountError::Conflict(msg) => ApiError::Conflict(msg),
            AccountError::Invalid(msg) => ApiError::ValidationError(msg),
            AccountError::Database(msg) => ApiError::DatabaseError(msg),
            AccountError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<AccessError> for ApiError {
    fn from(err: AccessError) -> Self {
        match err {
            AccessError::NotFound(msg) => ApiError::NotFound(msg),
            AccessError::Forbidden(msg) => ApiError::Forbidden(msg),
            AccessError::Invalid(msg) => ApiError::ValidationError(msg),
            AccessError::Database(msg) => ApiError::DatabaseError(msg),
            AccessError::Internal(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Expired | SessionError::FingerprintMismatch => {
                ApiError::Unauthorized(err.to_string())
            }
            SessionError::Storage(msg) => ApiError::InternalError(msg),
        }
    }
}

impl From<PipelineRejection> for ApiError {
    fn from(rejection: PipelineRejection) -> Self {
        match rejection {
            PipelineRejection::Locked { until } => ApiError::Locked { until },
            PipelineRejection::Internal(msg) => ApiError::InternalError(msg),
            PipelineRejection::Unauthenticated
            | PipelineRejection::SessionExpired
            | PipelineRejection::FingerprintMismatch
            | PipelineRejection::Inactive => ApiError::Unauthorized(rejection.to_string()),
        }
    }
}

impl ApiError {
    pub fn not_found(resource: &str, id: impl fmt::Display) -> Self {
        ApiError::NotFound(format!("{resource} {id} not found"))
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::ValidationError(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        ApiError::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ApiError::InternalError(msg.into())
    }
}
