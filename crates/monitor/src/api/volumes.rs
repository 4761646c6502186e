//! Volume listing, detail, attachments, size, and aggregate handlers.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use crate::scan::ScanReport;
use crate::state::AppState;
use crate::store::model::{ScanResultRecord, VolumeRecord};
use crate::store::page::{Page, PageRequest};
use crate::store::volumes::{VolumeAggregates, VolumeFilter, VOLUME_SORT_FIELDS};

#[derive(Debug, Deserialize)]
pub struct VolumeListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
    /// Free-text search across name and driver.
    pub q: Option<String>,
    pub driver: Option<String>,
    pub label: Option<String>,
    pub orphaned: Option<bool>,
    pub system: Option<bool>,
    pub user_only: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

pub async fn list_volumes(
    State(state): State<AppState>,
    Query(query): Query<VolumeListQuery>,
) -> Result<Json<Page<VolumeRecord>>, ApiError> {
    let request = PageRequest::new(
        query.page,
        query.page_size,
        query.sort.as_deref(),
        VOLUME_SORT_FIELDS,
        "name:asc",
    )?;
    let filter = VolumeFilter {
        driver: query.driver,
        label: query.label,
        search: query.q,
        created_after: query.created_after,
        created_before: query.created_before,
        orphaned: query.orphaned.unwrap_or(false),
        system: query.system.unwrap_or(false),
        user_only: query.user_only.unwrap_or(false),
    };

    let page = state.store.volumes.page(&filter, &request).await?;
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
pub struct VolumeDetail {
    #[serde(flatten)]
    pub volume: VolumeRecord,
    pub attachments_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_size: Option<i64>,
}

pub async fn get_volume(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
) -> Result<Json<VolumeDetail>, ApiError> {
    let volume = state
        .store
        .volumes
        .get(&volume_id)
        .await?
        .ok_or_else(|| volume_not_found(&volume_id))?;

    let attachments_count = state.store.mounts.count_active_by_volume(&volume_id).await?;
    let total_size = state
        .store
        .scan_results
        .latest_by_volume(&volume_id)
        .await?
        .map(|r| r.total_size);

    Ok(Json(VolumeDetail {
        volume,
        attachments_count,
        total_size,
    }))
}

#[derive(Debug, Serialize)]
pub struct AttachmentView {
    pub container_id: String,
    pub container_name: Option<String>,
    pub mount_path: String,
    pub access_mode: String,
}

pub async fn get_attachments(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
) -> Result<Json<Vec<AttachmentView>>, ApiError> {
    if state.store.volumes.get(&volume_id).await?.is_none() {
        return Err(volume_not_found(&volume_id));
    }

    let mounts = state.store.mounts.list_active_by_volume(&volume_id).await?;
    let mut attachments = Vec::with_capacity(mounts.len());
    for mount in mounts {
        let container_name = state
            .store
            .containers
            .get(&mount.container_id)
            .await?
            .map(|c| c.name);
        attachments.push(AttachmentView {
            container_id: mount.container_id,
            container_name,
            mount_path: mount.mount_path,
            access_mode: mount.access_mode,
        });
    }
    Ok(Json(attachments))
}

/// Most recent known size: the live cache entry when one exists, otherwise
/// the latest persisted scan result.
pub async fn get_volume_size(
    State(state): State<AppState>,
    Path(volume_id): Path<String>,
) -> Result<Json<ScanReport>, ApiError> {
    if state.store.volumes.get(&volume_id).await?.is_none() {
        return Err(volume_not_found(&volume_id));
    }

    if let Some(report) = state.engine.cached_report(&volume_id).await {
        return Ok(Json(report));
    }

    match state.store.scan_results.latest_by_volume(&volume_id).await? {
        Some(record) => Ok(Json(report_from_record(&record))),
        None => Err(ApiError::NotFound(
            "NO_SCAN_DATA",
            format!("volume {volume_id} has never been scanned"),
        )),
    }
}

pub async fn aggregates(
    State(state): State<AppState>,
) -> Result<Json<VolumeAggregates>, ApiError> {
    Ok(Json(state.store.volumes.aggregates().await?))
}

pub(super) fn volume_not_found(volume_id: &str) -> ApiError {
    ApiError::NotFound("VOLUME_NOT_FOUND", format!("volume not found: {volume_id}"))
}

pub(super) fn report_from_record(record: &ScanResultRecord) -> ScanReport {
    ScanReport {
        volume_id: record.volume_id.clone(),
        total_size: record.total_size,
        file_count: record.file_count,
        directory_count: record.directory_count,
        largest_file: record.largest_file,
        scan_method: record.scan_method.clone(),
        scan_duration: record.scan_duration_ns,
        filesystem_type: record.filesystem_type.clone(),
        scanned_at: record.created_at,
    }
}
