//! The pluggable scan-method contract and shared parsing helpers for the
//! external-tool methods.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::{ScanError, ScanErrorCode};

/// Raw numbers produced by a single method run. The engine annotates these
/// into a [`ScanReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub largest_file: i64,
}

impl ScanOutcome {
    pub fn size_only(total_size: i64) -> Self {
        Self {
            total_size,
            file_count: 0,
            directory_count: 0,
            largest_file: 0,
        }
    }
}

/// Periodic progress emitted by methods that support it.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub files_scanned: u64,
    pub current_path: String,
    pub elapsed: Duration,
}

pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<ProgressUpdate>;

/// A directory-sizing strategy. Implementations must be cancel-safe: they
/// observe the token and return `ScanCanceled` promptly when it fires.
#[async_trait]
pub trait ScanMethod: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the method can run on this host right now.
    async fn available(&self) -> bool;

    fn estimated_duration(&self, path: &Path) -> Duration;

    fn supports_progress(&self) -> bool;

    async fn scan(
        &self,
        path: &Path,
        cancel: CancellationToken,
        progress: Option<ProgressSender>,
    ) -> Result<ScanOutcome, ScanError>;
}

/// Method metadata surfaced by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct MethodInfo {
    pub name: &'static str,
    pub available: bool,
    pub supports_progress: bool,
    pub estimated_duration_ms: u64,
}

/// A finished, annotated scan — the unit stored in the cache and returned to
/// API consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub volume_id: String,
    pub total_size: i64,
    pub file_count: i64,
    pub directory_count: i64,
    pub largest_file: i64,
    pub scan_method: String,
    /// Nanoseconds.
    pub scan_duration: i64,
    pub filesystem_type: String,
    pub scanned_at: DateTime<Utc>,
}

/// Strict single-integer grammar for external tool stdout. Anything other
/// than one base-10 integer token is rejected.
pub(crate) fn parse_single_integer(stdout: &str) -> Option<i64> {
    let token = stdout.trim();
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Strict `<integer><whitespace><rest>` grammar: the first whitespace
/// separated field must be a base-10 integer.
pub(crate) fn parse_leading_integer(stdout: &str) -> Option<i64> {
    let first_line = stdout.lines().next()?;
    let field = first_line.split_whitespace().next()?;
    if !field.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Classify an external tool failure from its stderr.
pub(crate) fn classify_tool_stderr(method: &str, path: &Path, stderr: &str) -> ScanError {
    let lowered = stderr.to_lowercase();
    let code = if lowered.contains("permission denied") {
        ScanErrorCode::PermissionDenied
    } else if lowered.contains("no such file") {
        ScanErrorCode::VolumeNotFound
    } else if lowered.contains("no space left") {
        ScanErrorCode::InsufficientSpace
    } else {
        ScanErrorCode::ResultValidationFailed
    };

    ScanError::new(code, format!("{method} failed: {}", stderr.trim()))
        .with_path(path)
        .with_method(method)
}
