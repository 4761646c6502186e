//! Structured scan errors. Scan failures are values, not unwinding: every
//! failure carries a machine code, the offending path/method when known, and
//! free-form context for the error envelope.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ScanErrorCode {
    PermissionDenied,
    VolumeNotFound,
    PathNotFound,
    PathValidationFailed,
    MethodUnavailable,
    AllMethodsFailed,
    ResultValidationFailed,
    ScanTimeout,
    ScanCanceled,
    ScanQueueTimeout,
    InsufficientSpace,
}

impl ScanErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ScanErrorCode::VolumeNotFound => "VOLUME_NOT_FOUND",
            ScanErrorCode::PathNotFound => "PATH_NOT_FOUND",
            ScanErrorCode::PathValidationFailed => "PATH_VALIDATION_FAILED",
            ScanErrorCode::MethodUnavailable => "METHOD_UNAVAILABLE",
            ScanErrorCode::AllMethodsFailed => "ALL_METHODS_FAILED",
            ScanErrorCode::ResultValidationFailed => "RESULT_VALIDATION_FAILED",
            ScanErrorCode::ScanTimeout => "SCAN_TIMEOUT",
            ScanErrorCode::ScanCanceled => "SCAN_CANCELED",
            ScanErrorCode::ScanQueueTimeout => "SCAN_QUEUE_TIMEOUT",
            ScanErrorCode::InsufficientSpace => "INSUFFICIENT_SPACE",
        }
    }
}

impl std::fmt::Display for ScanErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{code}: {message}")]
pub struct ScanError {
    pub code: ScanErrorCode,
    pub message: String,
    pub path: Option<PathBuf>,
    pub method: Option<String>,
    pub context: BTreeMap<String, String>,
    #[source]
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ScanError {
    pub fn new(code: ScanErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            method: None,
            context: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn with_path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// Context plus path/method, flattened for the error envelope.
    pub fn details(&self) -> BTreeMap<String, String> {
        let mut details = self.context.clone();
        if let Some(path) = &self.path {
            details.insert("path".to_string(), path.display().to_string());
        }
        if let Some(method) = &self.method {
            details.insert("method".to_string(), method.clone());
        }
        details
    }
}
