//! Uniform error envelope:
//! `{"error": {"code", "message", "details", "request_id"}}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use super::request_id::current_request_id;
use crate::docker::DockerError;
use crate::scan::{ScanError, ScanErrorCode};
use crate::store::page::PageError;
use crate::store::MigrateError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{1}")]
    NotFound(&'static str, String),
    #[error("{1}")]
    BadRequest(&'static str, String),
    #[error("{1}")]
    Unauthorized(&'static str, String),
    #[error("{1}")]
    Forbidden(&'static str, String),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Migrate(#[from] MigrateError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("runtime error: {0}")]
    Docker(#[from] DockerError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<PageError> for ApiError {
    fn from(e: PageError) -> Self {
        ApiError::BadRequest("INVALID_REQUEST", e.to_string())
    }
}

fn scan_status(code: ScanErrorCode) -> StatusCode {
    match code {
        ScanErrorCode::VolumeNotFound | ScanErrorCode::PathNotFound => StatusCode::NOT_FOUND,
        ScanErrorCode::PathValidationFailed => StatusCode::BAD_REQUEST,
        ScanErrorCode::PermissionDenied => StatusCode::FORBIDDEN,
        ScanErrorCode::MethodUnavailable | ScanErrorCode::ScanQueueTimeout => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ScanErrorCode::ScanTimeout => StatusCode::GATEWAY_TIMEOUT,
        ScanErrorCode::InsufficientSpace => StatusCode::INSUFFICIENT_STORAGE,
        ScanErrorCode::ScanCanceled
        | ScanErrorCode::AllMethodsFailed
        | ScanErrorCode::ResultValidationFailed => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(..) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(..) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(..) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(..) => StatusCode::FORBIDDEN,
            ApiError::Scan(e) => scan_status(e.code),
            ApiError::Migrate(e) => match e {
                MigrateError::NotFound(_) => StatusCode::NOT_FOUND,
                MigrateError::NoPending => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Db(sqlx::Error::PoolTimedOut) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Docker(DockerError::Unreachable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Docker(DockerError::VolumeNotFound(_))
            | ApiError::Docker(DockerError::ContainerNotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Docker(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(code, _)
            | ApiError::BadRequest(code, _)
            | ApiError::Unauthorized(code, _)
            | ApiError::Forbidden(code, _) => code,
            ApiError::Scan(e) => e.code.as_str(),
            ApiError::Migrate(e) => match e {
                MigrateError::NotFound(_) => "MIGRATION_NOT_FOUND",
                MigrateError::NoPending => "NO_PENDING_MIGRATIONS",
                MigrateError::Rollback { .. } => "MIGRATION_ROLLBACK_ERROR",
                _ => "MIGRATION_APPLY_ERROR",
            },
            ApiError::Db(sqlx::Error::PoolTimedOut) => "DATABASE_UNAVAILABLE",
            ApiError::Db(_) => "DATABASE_ERROR",
            ApiError::Docker(DockerError::Unreachable(_)) => "RUNTIME_UNAVAILABLE",
            ApiError::Docker(DockerError::VolumeNotFound(_)) => "VOLUME_NOT_FOUND",
            ApiError::Docker(DockerError::ContainerNotFound(_)) => "CONTAINER_NOT_FOUND",
            ApiError::Docker(_) => "RUNTIME_ERROR",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn details(&self) -> serde_json::Value {
        match self {
            ApiError::Scan(e) => serde_json::to_value(e.details()).unwrap_or_default(),
            _ => json!({}),
        }
    }

    fn public_message(&self) -> String {
        match self {
            // Backend detail stays in the logs.
            ApiError::Db(e) => {
                error!(error = %e, "database error");
                "a database error occurred".to_string()
            }
            ApiError::Internal(detail) => {
                error!(detail, "internal error");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.public_message(),
                "details": self.details(),
                "request_id": current_request_id(),
            }
        });
        (status, Json(body)).into_response()
    }
}

/// Envelope builder for middleware that rejects before reaching a handler.
pub fn reject(status: StatusCode, code: &str, message: &str) -> Response {
    let body = json!({
        "error": {
            "code": code,
            "message": message,
            "details": {},
            "request_id": current_request_id(),
        }
    });
    (status, Json(body)).into_response()
}
