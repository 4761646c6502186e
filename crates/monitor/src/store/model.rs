//! Persisted entity records and their row mappings.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::docker::{ContainerInfo, VolumeInfo};

pub(crate) fn map_to_json(map: &HashMap<String, String>) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "{}".to_string())
}

pub(crate) fn json_to_map(raw: &str) -> HashMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeRecord {
    pub id: i64,
    pub volume_id: String,
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: HashMap<String, String>,
    pub options: HashMap<String, String>,
    pub scope: String,
    pub status: String,
    pub last_scanned: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VolumeRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            volume_id: row.try_get("volume_id")?,
            name: row.try_get("name")?,
            driver: row.try_get("driver")?,
            mountpoint: row.try_get("mountpoint")?,
            labels: json_to_map(&row.try_get::<String, _>("labels")?),
            options: json_to_map(&row.try_get::<String, _>("options")?),
            scope: row.try_get("scope")?,
            status: row.try_get("status")?,
            last_scanned: row.try_get("last_scanned")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewVolume {
    pub volume_id: String,
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: HashMap<String, String>,
    pub options: HashMap<String, String>,
    pub scope: String,
    pub status: String,
}

impl NewVolume {
    pub fn from_runtime(v: &VolumeInfo) -> Self {
        Self {
            volume_id: v.name.clone(),
            name: v.name.clone(),
            driver: if v.driver.is_empty() {
                "local".to_string()
            } else {
                v.driver.clone()
            },
            mountpoint: v.mountpoint.clone(),
            labels: v.labels.clone(),
            options: v.options.clone(),
            scope: v.scope.clone(),
            status: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContainerRecord {
    pub id: i64,
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            container_id: row.try_get("container_id")?,
            name: row.try_get("name")?,
            image: row.try_get("image")?,
            state: row.try_get("state")?,
            status: row.try_get("status")?,
            labels: json_to_map(&row.try_get::<String, _>("labels")?),
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Container states accepted by the schema CHECK constraint.
const KNOWN_STATES: &[&str] = &[
    "created",
    "running",
    "paused",
    "restarting",
    "removing",
    "exited",
    "dead",
];

#[derive(Debug, Clone)]
pub struct NewContainer {
    pub container_id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl NewContainer {
    pub fn from_runtime(c: &ContainerInfo) -> Self {
        let state = if KNOWN_STATES.contains(&c.state.as_str()) {
            c.state.clone()
        } else {
            "unknown".to_string()
        };
        Self {
            container_id: c.id.clone(),
            name: c.name.clone(),
            image: c.image.clone(),
            state,
            status: c.status.clone(),
            labels: c.labels.clone(),
            started_at: c.started_at,
            finished_at: c.finished_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MountRecord {
    pub id: i64,
    pub volume_id: String,
    pub container_id: String,
    pub mount_path: String,
    pub access_mode: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MountRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            volume_id: row.try_get("volume_id")?,
            container_id: row.try_get("container_id")?,
            mount_path: row.try_get("mount_path")?,
            access_mode: row.try_get("access_mode")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanResultRecord {
    pub id: i64,
    pub volume_id: String,
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub largest_file: i64,
    pub scan_method: String,
    pub scan_duration_ns: i64,
    pub filesystem_type: String,
    pub checksum: String,
    pub is_valid: bool,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanResultRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            volume_id: row.try_get("volume_id")?,
            total_size: row.try_get("total_size")?,
            file_count: row.try_get("file_count")?,
            directory_count: row.try_get("directory_count")?,
            largest_file: row.try_get("largest_file")?,
            scan_method: row.try_get("scan_method")?,
            scan_duration_ns: row.try_get("scan_duration_ns")?,
            filesystem_type: row.try_get("filesystem_type")?,
            checksum: row.try_get("checksum")?,
            is_valid: row.try_get("is_valid")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewScanResult {
    pub volume_id: String,
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub largest_file: i64,
    pub scan_method: String,
    pub scan_duration_ns: i64,
    pub filesystem_type: String,
    pub checksum: String,
    pub is_valid: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanJobRecord {
    pub id: i64,
    pub scan_id: String,
    pub volume_id: String,
    pub status: JobStatus,
    pub progress: i64,
    pub method: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub result_id: Option<i64>,
    pub estimated_duration_ns: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanJobRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_status: String = row.try_get("status")?;
        let status = JobStatus::parse(&raw_status).ok_or_else(|| sqlx::Error::Decode(
            format!("unknown scan job status: {raw_status}").into(),
        ))?;
        Ok(Self {
            id: row.try_get("id")?,
            scan_id: row.try_get("scan_id")?,
            volume_id: row.try_get("volume_id")?,
            status,
            progress: row.try_get("progress")?,
            method: row.try_get("method")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            error: row.try_get("error")?,
            result_id: row.try_get("result_id")?,
            estimated_duration_ns: row.try_get("estimated_duration_ns")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanCacheRecord {
    pub cache_key: String,
    pub volume_id: String,
    /// Serialized scan result payload.
    pub result: String,
    pub expires_at: DateTime<Utc>,
    pub hit_count: i64,
    pub last_accessed: DateTime<Utc>,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl ScanCacheRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            cache_key: row.try_get("cache_key")?,
            volume_id: row.try_get("volume_id")?,
            result: row.try_get("result")?,
            expires_at: row.try_get("expires_at")?,
            hit_count: row.try_get("hit_count")?,
            last_accessed: row.try_get("last_accessed")?,
            is_valid: row.try_get("is_valid")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeMetricRecord {
    pub id: i64,
    pub volume_id: String,
    pub metric_timestamp: DateTime<Utc>,
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub growth_rate: f64,
    pub access_frequency: f64,
    pub container_count: i64,
}

impl VolumeMetricRecord {
    pub(crate) fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            volume_id: row.try_get("volume_id")?,
            metric_timestamp: row.try_get("metric_timestamp")?,
            total_size: row.try_get("total_size")?,
            file_count: row.try_get("file_count")?,
            directory_count: row.try_get("directory_count")?,
            growth_rate: row.try_get("growth_rate")?,
            access_frequency: row.try_get("access_frequency")?,
            container_count: row.try_get("container_count")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewVolumeMetric {
    pub volume_id: String,
    pub metric_timestamp: DateTime<Utc>,
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub growth_rate: f64,
    pub access_frequency: f64,
    pub container_count: i64,
}
