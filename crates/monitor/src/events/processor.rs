//! Event → store mutation mapping. Every handler is idempotent: replaying an
//! event leaves the store in the same state.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::model::{EventAction, EventKind, RuntimeEvent};
use super::reconciler::sync_container_mounts;
use crate::docker::{DockerError, RuntimeClient};
use crate::scan::ScanCache;
use crate::store::model::{NewContainer, NewVolume};
use crate::store::Store;

/// Seam between the ingester's processing worker and the concrete handler,
/// so queue behavior can be tested with a stub.
#[async_trait]
pub trait ProcessEvent: Send + Sync {
    async fn process(&self, event: &RuntimeEvent) -> anyhow::Result<()>;
}

pub struct EventProcessor {
    runtime: Arc<dyn RuntimeClient>,
    store: Store,
    cache: Arc<ScanCache>,
}

impl EventProcessor {
    pub fn new(runtime: Arc<dyn RuntimeClient>, store: Store, cache: Arc<ScanCache>) -> Self {
        Self {
            runtime,
            store,
            cache,
        }
    }

    async fn on_volume_create(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        match self.runtime.inspect_volume(&event.id).await {
            Ok(info) => {
                self.store
                    .volumes
                    .upsert(&NewVolume::from_runtime(&info))
                    .await?;
            }
            Err(DockerError::VolumeNotFound(_)) => {
                // Created and removed before we could inspect it; the remove
                // event or the next reconciliation settles the store.
                debug!(volume_id = %event.id, "volume vanished before inspect");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn on_volume_remove(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        self.store.volumes.soft_delete(&event.id).await?;
        self.store.mounts.deactivate_by_volume(&event.id).await?;
        self.cache.invalidate(&event.id).await;
        Ok(())
    }

    async fn on_container_start(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        match self.runtime.inspect_container(&event.id).await {
            Ok(info) => {
                self.store
                    .containers
                    .upsert(&NewContainer::from_runtime(&info))
                    .await?;
                sync_container_mounts(&self.store, &info.id, &info.mounts).await?;
            }
            Err(DockerError::ContainerNotFound(_)) => {
                debug!(container_id = %event.id, "container vanished before inspect");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    async fn on_container_stopped(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        self.store
            .containers
            .mark_stopped(&event.id, "exited", Some(event.time))
            .await?;
        // Mount rows are kept for history but marked inactive.
        self.store.mounts.deactivate_by_container(&event.id).await?;
        Ok(())
    }

    async fn on_container_destroy(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        self.store.containers.soft_delete(&event.id).await?;
        self.store.mounts.deactivate_by_container(&event.id).await?;
        Ok(())
    }
}

#[async_trait]
impl ProcessEvent for EventProcessor {
    async fn process(&self, event: &RuntimeEvent) -> anyhow::Result<()> {
        match (event.kind, event.action) {
            (EventKind::Volume, EventAction::Create) => self.on_volume_create(event).await,
            (EventKind::Volume, EventAction::Remove) => self.on_volume_remove(event).await,
            (EventKind::Container, EventAction::Start) => self.on_container_start(event).await,
            (EventKind::Container, EventAction::Stop)
            | (EventKind::Container, EventAction::Die) => self.on_container_stopped(event).await,
            (EventKind::Container, EventAction::Destroy) => self.on_container_destroy(event).await,
            // Remaining combinations are filtered out before enqueue.
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{ContainerInfo, MockRuntimeClient, MountInfo, VolumeInfo};
    use crate::store::test_store;
    use chrono::Utc;
    use std::collections::HashMap;

    fn volume_event(action: EventAction, id: &str) -> RuntimeEvent {
        RuntimeEvent {
            kind: EventKind::Volume,
            id: id.to_string(),
            name: id.to_string(),
            action,
            time: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    fn container_event(action: EventAction, id: &str) -> RuntimeEvent {
        RuntimeEvent {
            kind: EventKind::Container,
            id: id.to_string(),
            name: id.to_string(),
            action,
            time: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    fn volume_info(name: &str) -> VolumeInfo {
        VolumeInfo {
            name: name.to_string(),
            driver: "local".to_string(),
            mountpoint: format!("/var/lib/docker/volumes/{name}/_data"),
            labels: HashMap::new(),
            options: HashMap::new(),
            scope: "local".to_string(),
            created_at: None,
        }
    }

    fn running_container(id: &str, mounts: Vec<MountInfo>) -> ContainerInfo {
        ContainerInfo {
            id: id.to_string(),
            name: format!("{id}-name"),
            image: "nginx".to_string(),
            state: "running".to_string(),
            status: "Up".to_string(),
            labels: HashMap::new(),
            started_at: Some(Utc::now()),
            finished_at: None,
            mounts,
        }
    }

    async fn processor_with(runtime: MockRuntimeClient) -> (EventProcessor, Store) {
        let store = test_store().await;
        let cache = Arc::new(ScanCache::new(store.scan_cache.clone(), 16));
        (
            EventProcessor::new(Arc::new(runtime), store.clone(), cache),
            store,
        )
    }

    #[tokio::test]
    async fn test_volume_create_is_idempotent() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_inspect_volume()
            .returning(|name| Ok(volume_info(name)));
        let (processor, store) = processor_with(runtime).await;

        let event = volume_event(EventAction::Create, "v1");
        processor.process(&event).await.unwrap();
        processor.process(&event).await.unwrap();

        let all = store.volumes.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert!(all[0].is_active);
    }

    #[tokio::test]
    async fn test_volume_remove_soft_deletes_and_invalidates() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_inspect_volume()
            .returning(|name| Ok(volume_info(name)));
        let (processor, store) = processor_with(runtime).await;

        processor
            .process(&volume_event(EventAction::Create, "v1"))
            .await
            .unwrap();
        processor
            .process(&volume_event(EventAction::Remove, "v1"))
            .await
            .unwrap();

        let volume = store.volumes.get("v1").await.unwrap().unwrap();
        assert!(!volume.is_active);

        // Replay of the remove is harmless.
        processor
            .process(&volume_event(EventAction::Remove, "v1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_container_start_upserts_mounts() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_inspect_volume()
            .returning(|name| Ok(volume_info(name)));
        runtime.expect_inspect_container().returning(|id| {
            Ok(running_container(
                id,
                vec![MountInfo {
                    volume_name: "v1".to_string(),
                    mount_path: "/data".to_string(),
                    access_mode: "rw".to_string(),
                }],
            ))
        });
        let (processor, store) = processor_with(runtime).await;

        // The volume referenced by the mount must exist for the FK.
        processor
            .process(&volume_event(EventAction::Create, "v1"))
            .await
            .unwrap();
        processor
            .process(&container_event(EventAction::Start, "c1"))
            .await
            .unwrap();

        let container = store.containers.get("c1").await.unwrap().unwrap();
        assert!(container.is_active);
        let mounts = store.mounts.list_by_container("c1").await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert!(mounts[0].is_active);
    }

    #[tokio::test]
    async fn test_container_die_keeps_rows_but_deactivates() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_inspect_volume()
            .returning(|name| Ok(volume_info(name)));
        runtime.expect_inspect_container().returning(|id| {
            Ok(running_container(
                id,
                vec![MountInfo {
                    volume_name: "v1".to_string(),
                    mount_path: "/data".to_string(),
                    access_mode: "rw".to_string(),
                }],
            ))
        });
        let (processor, store) = processor_with(runtime).await;

        processor
            .process(&volume_event(EventAction::Create, "v1"))
            .await
            .unwrap();
        processor
            .process(&container_event(EventAction::Start, "c1"))
            .await
            .unwrap();
        processor
            .process(&container_event(EventAction::Die, "c1"))
            .await
            .unwrap();

        let container = store.containers.get("c1").await.unwrap().unwrap();
        assert!(!container.is_active);
        assert_eq!(container.state, "exited");

        let mounts = store.mounts.list_by_container("c1").await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert!(!mounts[0].is_active);
    }

    #[tokio::test]
    async fn test_container_destroy_soft_deletes() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_inspect_container().returning(|id| {
            Ok(running_container(id, vec![]))
        });
        let (processor, store) = processor_with(runtime).await;

        processor
            .process(&container_event(EventAction::Start, "c1"))
            .await
            .unwrap();
        processor
            .process(&container_event(EventAction::Destroy, "c1"))
            .await
            .unwrap();

        let container = store.containers.get("c1").await.unwrap().unwrap();
        assert!(!container.is_active);
    }

    #[tokio::test]
    async fn test_vanished_volume_before_inspect_is_skipped() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_inspect_volume()
            .returning(|name| Err(DockerError::VolumeNotFound(name.to_string())));
        let (processor, store) = processor_with(runtime).await;

        processor
            .process(&volume_event(EventAction::Create, "ghost"))
            .await
            .unwrap();
        assert!(store.volumes.get("ghost").await.unwrap().is_none());
    }
}
