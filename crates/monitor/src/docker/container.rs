//! Container domain — list and inspect, including the volume mount set.

use bollard::query_parameters::ListContainersOptions;

use super::client::{is_not_found, DockerClient, DockerError};
use super::inventory::ContainerInfo;

impl DockerClient {
    /// List all containers, running or not.
    pub async fn list_containers(&self) -> Result<Vec<ContainerInfo>, DockerError> {
        let options = Some(ListContainersOptions {
            all: true,
            ..Default::default()
        });
        let containers = self.client.list_containers(options).await?;
        Ok(containers.into_iter().map(ContainerInfo::from).collect())
    }

    /// Inspect a container; the result carries the full volume mount set.
    pub async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError> {
        match self.client.inspect_container(id, None).await {
            Ok(details) => Ok(ContainerInfo::from(details)),
            Err(e) if is_not_found(&e) => Err(DockerError::ContainerNotFound(id.to_string())),
            Err(e) => Err(DockerError::from(e)),
        }
    }
}
