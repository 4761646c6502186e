//! Container runtime access — a thin client over the Docker daemon plus the
//! `RuntimeClient` trait the rest of the service programs against.

pub mod client;
pub mod container;
pub mod event;
pub mod inventory;
pub mod volume;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

pub use client::{DockerClient, DockerError};
pub use inventory::{ContainerInfo, MountInfo, VolumeInfo};

use crate::events::model::RuntimeEvent;

/// Narrow contract over the container runtime daemon.
///
/// The concrete implementation is [`DockerClient`]; the ingester, reconciler,
/// and scan engine take `Arc<dyn RuntimeClient>` so they can be exercised
/// against a mock.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RuntimeClient: Send + Sync {
    async fn ping(&self) -> Result<(), DockerError>;

    async fn version(&self) -> Result<String, DockerError>;

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DockerError>;

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, DockerError>;

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, DockerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError>;

    /// Infinite stream of typed volume/container events. The stream yields
    /// one error and ends on disconnect; callers reconnect with backoff.
    fn subscribe_events(&self) -> BoxStream<'static, Result<RuntimeEvent, DockerError>>;
}

#[async_trait]
impl RuntimeClient for DockerClient {
    async fn ping(&self) -> Result<(), DockerError> {
        DockerClient::ping(self).await
    }

    async fn version(&self) -> Result<String, DockerError> {
        DockerClient::version(self).await
    }

    async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, DockerError> {
        DockerClient::list_volumes(self).await
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeInfo, DockerError> {
        DockerClient::inspect_volume(self, name).await
    }

    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, DockerError> {
        DockerClient::list_containers(self).await
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerInfo, DockerError> {
        DockerClient::inspect_container(self, id).await
    }

    fn subscribe_events(&self) -> BoxStream<'static, Result<RuntimeEvent, DockerError>> {
        DockerClient::subscribe_events(self)
    }
}
