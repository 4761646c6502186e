//! Volume domain — list and inspect.

use super::client::{is_not_found, DockerClient, DockerError};
use super::inventory::VolumeInfo;

impl DockerClient {
    /// List all volumes known to the daemon.
    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DockerError> {
        let response = self
            .client
            .list_volumes(None::<bollard::query_parameters::ListVolumesOptions>)
            .await?;

        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(VolumeInfo::from)
            .collect())
    }

    /// Inspect a specific volume by name.
    pub async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, DockerError> {
        match self.client.inspect_volume(name).await {
            Ok(volume) => Ok(VolumeInfo::from(volume)),
            Err(e) if is_not_found(&e) => Err(DockerError::VolumeNotFound(name.to_string())),
            Err(e) => Err(DockerError::from(e)),
        }
    }
}
