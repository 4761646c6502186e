//! Database administration handlers: health, migration status/history,
//! apply, and rollback.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::error::ApiError;
use crate::state::AppState;
use crate::store::migrate::{AppliedMigration, MigrationStatus};
use crate::store::HealthStatus;

pub async fn db_health(State(state): State<AppState>) -> Response {
    let health = state.store.health(state.config.db.max_open).await;
    let status = match health.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        // Degraded still serves traffic.
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(health)).into_response()
}

pub async fn migration_status(
    State(state): State<AppState>,
) -> Result<Json<MigrationStatus>, ApiError> {
    Ok(Json(state.migrator.status().await?))
}

pub async fn migration_history(
    State(state): State<AppState>,
) -> Result<Json<Vec<AppliedMigration>>, ApiError> {
    Ok(Json(state.migrator.applied().await?))
}

#[derive(Debug, Serialize)]
pub struct ApplyResponse {
    pub applied: Vec<String>,
}

pub async fn apply_migrations(
    State(state): State<AppState>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let applied = state.migrator.apply_all_pending().await?;
    Ok(Json(ApplyResponse { applied }))
}

#[derive(Debug, Serialize)]
pub struct RollbackResponse {
    pub rolled_back: String,
}

pub async fn rollback_migration(
    State(state): State<AppState>,
    Path(version): Path<String>,
) -> Result<Json<RollbackResponse>, ApiError> {
    state.migrator.rollback(&version).await?;
    Ok(Json(RollbackResponse {
        rolled_back: version,
    }))
}
