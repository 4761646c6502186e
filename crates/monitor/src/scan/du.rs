//! Standard external scan method backed by POSIX `du`.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::error::{ScanError, ScanErrorCode};
use super::method::{
    classify_tool_stderr, parse_leading_integer, ProgressSender, ScanMethod, ScanOutcome,
};

pub struct DuMethod {
    binary: String,
}

impl DuMethod {
    pub fn new() -> Self {
        Self {
            binary: "du".to_string(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for DuMethod {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanMethod for DuMethod {
    fn name(&self) -> &'static str {
        "du"
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
        Duration::from_secs(30)
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
        // Summary mode with a 1-byte block size so the first field is an
        // exact byte total.
        let mut command = Command::new(&self.binary);
        command
            .arg("-s")
            .arg("--block-size=1")
            .arg(path)
            .kill_on_drop(true);

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

        // du exits non-zero when it had to skip unreadable subtrees but still
        // prints a usable summary; prefer the summary when it parses.
        if let Some(total_size) = parse_leading_integer(&stdout) {
            return Ok(ScanOutcome::size_only(total_size));
        }

        if !output.status.success() || !stderr.trim().is_empty() {
            return Err(classify_tool_stderr(self.name(), path, &stderr));
        }

        Err(ScanError::new(
            ScanErrorCode::ResultValidationFailed,
            format!("du output did not start with an integer: {:?}", stdout.trim()),
        )
        .with_path(path)
        .with_method(self.name()))
    }
}
