//! Scan execution handlers: refresh (sync/async), progress polling, bulk
//! fan-out, and method discovery.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::volumes::volume_not_found;
use crate::scan::MethodInfo;
use crate::state::AppState;
use crate::store::model::JobStatus;

/// Upper bound on one bulk-scan request; the global semaphore is the only
/// other limiter.
const BULK_SCAN_MAX: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default, rename = "async")]
    pub run_async: bool,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AsyncScanResponse {
    pub scan_id: String,
    pub volume_id: String,
    pub status: JobStatus,
}

pub async fn refresh_volume_size(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
    body: axum::body::Bytes,
) -> Result<Response, ApiError> {
    // An empty body means a default synchronous refresh.
    let request: RefreshRequest = if body.is_empty() {
        RefreshRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::BadRequest("INVALID_REQUEST", format!("invalid JSON body: {e}"))
        })?
    };

    if state.store.volumes.get(&volume_id).await?.is_none() {
        return Err(volume_not_found(&volume_id));
    }

    if request.run_async {
        let scan_id = state
            .engine
            .scan_volume_async(&volume_id, request.method)
            .await?;
        let response = AsyncScanResponse {
            scan_id,
            volume_id,
            status: JobStatus::Queued,
        };
        return Ok((StatusCode::ACCEPTED, Json(response)).into_response());
    }

    let report = state
        .engine
        .scan_volume_with(&volume_id, request.method.as_deref())
        .await?;
    Ok(Json(report).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ScanStatusQuery {
    pub scan_id: String,
}

pub async fn scan_status(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
    Query(query): Query<ScanStatusQuery>,
) -> Result<Json<crate::scan::JobProgress>, ApiError> {
    match state.engine.get_scan_progress(&query.scan_id).await {
        Some(progress) if progress.volume_id == volume_id => Ok(Json(progress)),
        _ => Err(ApiError::NotFound(
            "SCAN_NOT_FOUND",
            format!("no scan {} for volume {volume_id}", query.scan_id),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkScanRequest {
    pub volume_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkScanEntry {
    pub volume_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_id: Option<String>,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BulkScanResponse {
    pub results: Vec<BulkScanEntry>,
}

/// Fan out one async scan per volume. Per-volume failures land in the entry
/// rather than failing the whole request.
pub async fn bulk_scan(
    State(state): State<AppState>,
    Json(request): Json<BulkScanRequest>,
) -> Result<(StatusCode, Json<BulkScanResponse>), ApiError> {
    if request.volume_ids.is_empty() {
        return Err(ApiError::BadRequest(
            "INVALID_REQUEST",
            "volume_ids must not be empty".to_string(),
        ));
    }
    if request.volume_ids.len() > BULK_SCAN_MAX {
        return Err(ApiError::BadRequest(
            "INVALID_REQUEST",
            format!("at most {BULK_SCAN_MAX} volumes per bulk scan"),
        ));
    }

    let mut results = Vec::with_capacity(request.volume_ids.len());
    for volume_id in request.volume_ids {
        let known = state
            .store
            .volumes
            .get(&volume_id)
            .await
            .map(|v| v.is_some())
            .unwrap_or(false);
        if !known {
            results.push(BulkScanEntry {
                volume_id,
                scan_id: None,
                status: "failed".to_string(),
                error: Some("volume not found".to_string()),
            });
            continue;
        }

        match state.engine.scan_volume_async(&volume_id, None).await {
            Ok(scan_id) => results.push(BulkScanEntry {
                volume_id,
                scan_id: Some(scan_id),
                status: JobStatus::Queued.as_str().to_string(),
                error: None,
            }),
            Err(e) => results.push(BulkScanEntry {
                volume_id,
                scan_id: None,
                status: "failed".to_string(),
                error: Some(e.to_string()),
            }),
        }
    }

    Ok((StatusCode::ACCEPTED, Json(BulkScanResponse { results })))
}

pub async fn available_methods(
    State(state): State<AppState>,
) -> Result<Json<Vec<MethodInfo>>, ApiError> {
    Ok(Json(state.engine.available_methods().await))
}
