//! In-process scan method: a recursive filesystem walk with progress.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use super::error::{ScanError, ScanErrorCode};
use super::method::{ProgressSender, ProgressUpdate, ScanMethod, ScanOutcome};

/// Emit a progress update at least every this many entries...
const PROGRESS_EVERY_ENTRIES: u64 = 1000;
/// ...or at least this often.
const PROGRESS_EVERY: Duration = Duration::from_secs(1);

pub struct NativeMethod;

impl NativeMethod {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeMethod {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanMethod for NativeMethod {
    fn name(&self) -> &'static str {
        "native"
    }

    async fn available(&self) -> bool {
        true
    }

    fn estimated_duration(&self, _path: &Path) -> Duration {
        Duration::from_secs(120)
    }

    fn supports_progress(&self) -> bool {
        true
    }

    async fn scan(
        &self,
        path: &Path,
        cancel: CancellationToken,
        progress: Option<ProgressSender>,
    ) -> Result<ScanOutcome, ScanError> {
        let root = path.to_path_buf();
        let name = self.name();

        tokio::task::spawn_blocking(move || walk(&root, cancel, progress))
            .await
            .map_err(|e| {
                ScanError::new(
                    ScanErrorCode::ResultValidationFailed,
                    "filesystem walker terminated unexpectedly",
                )
                .with_method(name)
                .with_cause(e)
            })?
    }
}

fn walk(
    root: &Path,
    cancel: CancellationToken,
    progress: Option<ProgressSender>,
) -> Result<ScanOutcome, ScanError> {
    let started = Instant::now();
    let mut files: i64 = 0;
    let mut directories: i64 = 0;
    let mut total_size: i64 = 0;
    let mut largest_file: i64 = 0;
    let mut entries_seen: u64 = 0;
    let mut last_emit = Instant::now();

    for entry in WalkDir::new(root) {
        if cancel.is_cancelled() {
            return Err(ScanError::new(ScanErrorCode::ScanCanceled, "scan canceled")
                .with_path(root)
                .with_method("native"));
        }

        // Per-entry permission and vanished-file errors are skipped; the
        // walk keeps going.
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        let metadata = match entry.metadata() {
            Ok(metadata) => metadata,
            Err(_) => continue,
        };

        if metadata.is_dir() {
            directories += 1;
        } else if metadata.is_file() {
            files += 1;
            let len = metadata.len().min(i64::MAX as u64) as i64;
            total_size = total_size.saturating_add(len);
            largest_file = largest_file.max(len);
        }

        entries_seen += 1;
        if let Some(sender) = &progress {
            if entries_seen % PROGRESS_EVERY_ENTRIES == 0 || last_emit.elapsed() >= PROGRESS_EVERY {
                let _ = sender.send(ProgressUpdate {
                    files_scanned: files.max(0) as u64,
                    current_path: entry.path().display().to_string(),
                    elapsed: started.elapsed(),
                });
                last_emit = Instant::now();
            }
        }
    }

    Ok(ScanOutcome {
        total_size,
        file_count: files,
        directory_count: directories,
        largest_file,
    })
}
