//! Fast external scan method backed by the `diskus` utility.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::error::{ScanError, ScanErrorCode};
use super::method::{
    classify_tool_stderr, parse_single_integer, ProgressSender, ScanMethod, ScanOutcome,
};

pub struct DiskusMethod {
    binary: String,
}

impl DiskusMethod {
    pub fn new() -> Self {
        Self {
            binary: "diskus".to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DiskusMethod {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanMethod for DiskusMethod {
    fn name(&self) -> &'static str {
        "diskus"
    }

    async fn available(&self) -> bool {
        Command::new(&self.binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn estimated_duration(&self, _path: &Path) -> Duration {
        Duration::from_secs(10)
    }

    fn supports_progress(&self) -> bool {
        false
    }

    async fn scan(
        &self,
        path: &Path,
        cancel: CancellationToken,
        _progress: Option<ProgressSender>,
    ) -> Result<ScanOutcome, ScanError> {
        let mut command = Command::new(&self.binary);
        command.arg(path).kill_on_drop(true);

        let output = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ScanError::new(ScanErrorCode::ScanCanceled, "scan canceled")
                    .with_path(path)
                    .with_method(self.name()));
            }
            output = command.output() => output.map_err(|e| {
                ScanError::new(
                    ScanErrorCode::MethodUnavailable,
                    format!("failed to launch {}: {e}", self.binary),
                )
                .with_path(path)
                .with_method(self.name())
                .with_cause(e)
            })?,
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(classify_tool_stderr(self.name(), path, &stderr));
        }
        if stdout.trim().is_empty() {
            return Err(ScanError::new(
                ScanErrorCode::ResultValidationFailed,
                "diskus produced no output",
            )
            .with_path(path)
            .with_method(self.name()));
        }

        let total_size = parse_single_integer(&stdout).ok_or_else(|| {
            ScanError::new(
                ScanErrorCode::ResultValidationFailed,
                format!("diskus output is not a single integer: {:?}", stdout.trim()),
            )
            .with_path(path)
            .with_method(self.name())
        })?;

        Ok(ScanOutcome::size_only(total_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The external binary is exercised through a stand-in shell script so the
    // tests do not depend on diskus being installed.
    fn fake_tool(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-diskus");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_scan_parses_single_integer() {
        let dir = tempfile::tempdir().unwrap();
        let method = DiskusMethod::with_binary(fake_tool(dir.path(), "echo 4096"));

        let outcome = method
            .scan(dir.path(), CancellationToken::new(), None)
            .await
            .unwrap();
        assert_eq!(outcome.total_size, 4096);
        assert_eq!(outcome.file_count, 0);
    }

    #[tokio::test]
    async fn test_scan_rejects_non_integer_output() {
        let dir = tempfile::tempdir().unwrap();
        let method = DiskusMethod::with_binary(fake_tool(dir.path(), "echo '4.2G (4,200,000 bytes)'"));

        let err = method
            .scan(dir.path(), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ScanErrorCode::ResultValidationFailed);
    }

    #[tokio::test]
    async fn test_scan_maps_permission_denied_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let method = DiskusMethod::with_binary(fake_tool(
            dir.path(),
            "echo 'diskus: Permission denied' >&2; exit 1",
        ));

        let err = method
            .scan(dir.path(), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ScanErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn test_scan_maps_missing_path_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let method = DiskusMethod::with_binary(fake_tool(
            dir.path(),
            "echo 'diskus: No such file or directory' >&2; exit 1",
        ));

        let err = method
            .scan(dir.path(), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ScanErrorCode::VolumeNotFound);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let method = DiskusMethod::with_binary("/nonexistent/diskus-binary");
        assert!(!method.available().await);

        let dir = tempfile::tempdir().unwrap();
        let err = method
            .scan(dir.path(), CancellationToken::new(), None)
            .await
            .unwrap_err();
        assert_eq!(err.code, ScanErrorCode::MethodUnavailable);
    }
}
