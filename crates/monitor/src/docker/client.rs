//! Docker client — core struct, constructor, error types.
//!
//! Domain methods live in sibling modules (`volume`, `container`, `event`)
//! which add `impl DockerClient` blocks.

use bollard::Docker;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DockerError {
    #[error("Docker daemon unreachable: {0}")]
    Unreachable(String),
    #[error("Volume not found: {0}")]
    VolumeNotFound(String),
    #[error("Container not found: {0}")]
    ContainerNotFound(String),
    #[error("Permission denied")]
    PermissionDenied,
    #[error("Event stream closed")]
    StreamClosed,
    #[error("Bollard error: {0}")]
    BollardError(#[from] bollard::errors::Error),
}

impl DockerError {
    /// True for transport-level failures where the daemon could not be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, DockerError::Unreachable(_))
    }
}

/// Returns true when the bollard error is a 404 from the daemon.
pub(super) fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[derive(Debug, Clone)]
pub struct DockerClient {
    /// The bollard Docker client. `pub(super)` so that domain modules in
    /// sibling files can call bollard APIs directly.
    pub(super) client: Docker,
}

impl DockerClient {
    /// Connect to the daemon. An empty host means the platform default
    /// socket; otherwise the value is treated as a unix socket path.
    pub fn new(host: &str, timeout: std::time::Duration) -> Result<Self, DockerError> {
        let timeout_secs = timeout.as_secs().max(1);
        let connection = if host.is_empty() {
            Docker::connect_with_defaults().map_err(|e| DockerError::Unreachable(e.to_string()))?
        } else {
            let clean_path = host.trim_start_matches("unix://");
            Docker::connect_with_socket(clean_path, timeout_secs, &bollard::API_DEFAULT_VERSION)
                .map_err(|e| DockerError::Unreachable(e.to_string()))?
        };

        Ok(DockerClient { client: connection })
    }

    pub async fn ping(&self) -> Result<(), DockerError> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| DockerError::Unreachable(e.to_string()))
    }

    pub async fn version(&self) -> Result<String, DockerError> {
        let version = self.client.version().await?;
        Ok(version.version.unwrap_or_else(|| "unknown".to_string()))
    }
}
