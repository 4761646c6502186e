//! Canonical runtime inventory records derived from the daemon's wire models.

use std::collections::HashMap;

use bollard::models::{ContainerInspectResponse, ContainerSummary, MountPoint, MountPointTypeEnum};
use chrono::{DateTime, Utc};

/// A volume as reported by the runtime.
#[derive(Debug, Clone)]
pub struct VolumeInfo {
    /// Volume name; doubles as the runtime-wide volume id.
    pub name: String,
    pub driver: String,
    pub mountpoint: String,
    pub labels: HashMap<String, String>,
    pub options: HashMap<String, String>,
    pub scope: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// A container as reported by the runtime, including its volume mounts.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: String,
    pub status: String,
    pub labels: HashMap<String, String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Volume-backed mounts only; bind and tmpfs mounts are not tracked.
    pub mounts: Vec<MountInfo>,
}

impl ContainerInfo {
    pub fn is_running(&self) -> bool {
        self.state == "running"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub volume_name: String,
    pub mount_path: String,
    /// "rw" or "ro".
    pub access_mode: String,
}

/// Docker reports unset timestamps as the zero value of its time type.
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?;
    if raw.is_empty() || raw.starts_with("0001-01-01") {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn volume_mounts(mounts: Option<Vec<MountPoint>>) -> Vec<MountInfo> {
    mounts
        .unwrap_or_default()
        .into_iter()
        .filter(|m| matches!(m.typ, Some(MountPointTypeEnum::VOLUME)))
        .filter_map(|m| {
            let volume_name = m.name?;
            let mount_path = m.destination.unwrap_or_default();
            if mount_path.is_empty() {
                return None;
            }
            let access_mode = match m.rw {
                Some(false) => "ro",
                _ => "rw",
            };
            Some(MountInfo {
                volume_name,
                mount_path,
                access_mode: access_mode.to_string(),
            })
        })
        .collect()
}

impl From<bollard::models::Volume> for VolumeInfo {
    fn from(v: bollard::models::Volume) -> Self {
        Self {
            created_at: parse_timestamp(v.created_at.as_deref()),
            name: v.name,
            driver: v.driver,
            mountpoint: v.mountpoint,
            labels: v.labels,
            options: v.options,
            scope: v
                .scope
                .map(|s| s.to_string())
                .unwrap_or_else(|| "local".to_string()),
        }
    }
}

impl From<ContainerSummary> for ContainerInfo {
    fn from(s: ContainerSummary) -> Self {
        Self {
            id: s.id.unwrap_or_default(),
            name: s
                .names
                .as_deref()
                .and_then(|n| n.first())
                .map(|n| n.trim_start_matches('/'))
                .unwrap_or("unknown")
                .to_string(),
            image: s.image.unwrap_or_default(),
            state: s
                .state
                .map(|st| st.to_string())
                .unwrap_or_else(|| "unknown".into()),
            status: s.status.unwrap_or_default(),
            labels: s.labels.unwrap_or_default(),
            // Not available in the list API; filled by inspect.
            started_at: None,
            finished_at: None,
            mounts: volume_mounts(s.mounts),
        }
    }
}

impl From<ContainerInspectResponse> for ContainerInfo {
    fn from(details: ContainerInspectResponse) -> Self {
        let state = details
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into());

        let started_at = details
            .state
            .as_ref()
            .and_then(|s| s.started_at.as_deref())
            .and_then(|ts| parse_timestamp(Some(ts)));
        let finished_at = details
            .state
            .as_ref()
            .and_then(|s| s.finished_at.as_deref())
            .and_then(|ts| parse_timestamp(Some(ts)));

        // Inspect's top-level image is the content hash; the configured
        // image name is friendlier when present.
        let image = details
            .config
            .as_ref()
            .and_then(|c| c.image.clone())
            .or(details.image)
            .unwrap_or_default();

        Self {
            id: details.id.unwrap_or_default(),
            name: details
                .name
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| "unknown".into()),
            image,
            status: state.clone(),
            state,
            labels: details
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
            started_at,
            finished_at,
            mounts: volume_mounts(details.mounts),
        }
    }
}
