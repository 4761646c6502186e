//! Reconciliation — a three-way diff between the runtime's live inventory
//! and the stored inventory, applied as inserts, updates, and soft deletes.
//!
//! Per-item failures are logged, metered, and skipped so one bad record
//! cannot stall a pass; only top-level list failures abort.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::docker::{ContainerInfo, DockerError, MountInfo, RuntimeClient, VolumeInfo};
use crate::metrics::ServiceMetrics;
use crate::store::model::{NewContainer, NewVolume, VolumeRecord};
use crate::store::Store;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Reconcile: Send + Sync {
    async fn reconcile_volumes(&self) -> anyhow::Result<()>;
    async fn reconcile_containers(&self) -> anyhow::Result<()>;
    async fn full_reconcile(&self) -> anyhow::Result<()>;
}

pub struct Reconciler {
    runtime: Arc<dyn RuntimeClient>,
    store: Store,
    metrics: ServiceMetrics,
}

impl Reconciler {
    pub fn new(runtime: Arc<dyn RuntimeClient>, store: Store, metrics: ServiceMetrics) -> Self {
        Self {
            runtime,
            store,
            metrics,
        }
    }

    fn item_error(&self, entity: &str, id: &str, error: impl std::fmt::Display) {
        self.metrics.reconcile_item_error();
        warn!(entity, id, %error, "reconciliation item failed, skipping");
    }

    /// True when a stored row no longer matches the runtime observation.
    fn volume_differs(stored: &VolumeRecord, observed: &VolumeInfo) -> bool {
        let observed_driver = if observed.driver.is_empty() {
            "local"
        } else {
            observed.driver.as_str()
        };
        !stored.is_active
            || stored.driver != observed_driver
            || stored.mountpoint != observed.mountpoint
            || stored.scope != observed.scope
            || stored.labels != observed.labels
    }

    async fn apply_container(&self, observed: &ContainerInfo) -> anyhow::Result<()> {
        // Inspect refreshes the mount set; the list API's view can be stale.
        let detailed = match self.runtime.inspect_container(&observed.id).await {
            Ok(detailed) => detailed,
            Err(DockerError::ContainerNotFound(_)) => {
                // Raced away between list and inspect; the next pass will
                // soft-delete it.
                debug!(container_id = %observed.id, "container vanished during reconcile");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        self.store
            .containers
            .upsert(&NewContainer::from_runtime(&detailed))
            .await?;
        self.reconcile_container_mounts(&detailed.id, &detailed.mounts)
            .await?;
        Ok(())
    }

    /// Three-way diff on the (volume_id, container_id, mount_path) triple.
    pub async fn reconcile_container_mounts(
        &self,
        container_id: &str,
        observed: &[MountInfo],
    ) -> anyhow::Result<()> {
        sync_container_mounts(&self.store, container_id, observed).await?;
        Ok(())
    }
}

/// Upsert the observed mount set of a container and deactivate stored rows
/// that are no longer present. Shared by the event processor and the
/// reconciler.
pub(crate) async fn sync_container_mounts(
    store: &Store,
    container_id: &str,
    observed: &[MountInfo],
) -> Result<(), sqlx::Error> {
    for mount in observed {
        store
            .mounts
            .upsert(
                &mount.volume_name,
                container_id,
                &mount.mount_path,
                &mount.access_mode,
            )
            .await?;
    }

    let stored = store.mounts.list_by_container(container_id).await?;
    for row in stored.iter().filter(|row| row.is_active) {
        let still_present = observed
            .iter()
            .any(|m| m.volume_name == row.volume_id && m.mount_path == row.mount_path);
        if !still_present {
            store
                .mounts
                .deactivate(&row.volume_id, container_id, &row.mount_path)
                .await?;
        }
    }
    Ok(())
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile_volumes(&self) -> anyhow::Result<()> {
        let observed = self.runtime.list_volumes().await?;
        let stored = self.store.volumes.list_all().await?;

        let observed_by_id: HashMap<&str, &VolumeInfo> =
            observed.iter().map(|v| (v.name.as_str(), v)).collect();
        let stored_by_id: HashMap<&str, &VolumeRecord> =
            stored.iter().map(|v| (v.volume_id.as_str(), v)).collect();

        let mut inserted = 0usize;
        let mut updated = 0usize;
        let mut removed = 0usize;

        for volume in &observed {
            match stored_by_id.get(volume.name.as_str()) {
                None => {
                    match self
                        .store
                        .volumes
                        .upsert(&NewVolume::from_runtime(volume))
                        .await
                    {
                        Ok(()) => inserted += 1,
                        Err(e) => self.item_error("volume", &volume.name, e),
                    }
                }
                Some(record) if Self::volume_differs(record, volume) => {
                    match self
                        .store
                        .volumes
                        .upsert(&NewVolume::from_runtime(volume))
                        .await
                    {
                        Ok(()) => updated += 1,
                        Err(e) => self.item_error("volume", &volume.name, e),
                    }
                }
                Some(_) => {}
            }
        }

        for record in stored.iter().filter(|r| r.is_active) {
            if !observed_by_id.contains_key(record.volume_id.as_str()) {
                let result = async {
                    self.store.volumes.soft_delete(&record.volume_id).await?;
                    self.store
                        .mounts
                        .deactivate_by_volume(&record.volume_id)
                        .await
                }
                .await;
                match result {
                    Ok(_) => removed += 1,
                    Err(e) => self.item_error("volume", &record.volume_id, e),
                }
            }
        }

        self.metrics.reconcile_run("volumes");
        info!(inserted, updated, removed, "volume reconciliation pass done");
        Ok(())
    }

    async fn reconcile_containers(&self) -> anyhow::Result<()> {
        let observed = self.runtime.list_containers().await?;
        let stored = self.store.containers.list_all().await?;

        let observed_ids: HashMap<&str, &ContainerInfo> =
            observed.iter().map(|c| (c.id.as_str(), c)).collect();

        for container in &observed {
            if let Err(e) = self.apply_container(container).await {
                self.item_error("container", &container.id, e);
            }
        }

        for record in stored.iter().filter(|r| r.is_active) {
            if !observed_ids.contains_key(record.container_id.as_str()) {
                let result = async {
                    self.store
                        .mounts
                        .deactivate_by_container(&record.container_id)
                        .await?;
                    self.store
                        .containers
                        .soft_delete(&record.container_id)
                        .await
                }
                .await;
                if let Err(e) = result {
                    self.item_error("container", &record.container_id, e);
                }
            }
        }

        self.metrics.reconcile_run("containers");
        Ok(())
    }

    async fn full_reconcile(&self) -> anyhow::Result<()> {
        self.reconcile_volumes().await?;
        self.reconcile_containers().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::MockRuntimeClient;
    use crate::store::test_store;
    use chrono::Utc;

    fn volume_info(name: &str, driver: &str) -> VolumeInfo {
        VolumeInfo {
            name: name.to_string(),
            driver: driver.to_string(),
            mountpoint: format!("/var/lib/docker/volumes/{name}/_data"),
            labels: HashMap::new(),
            options: HashMap::new(),
            scope: "local".to_string(),
            created_at: None,
        }
    }

    fn container_info(id: &str, mounts: Vec<MountInfo>) -> ContainerInfo {
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

    fn mount(volume: &str, path: &str) -> MountInfo {
        MountInfo {
            volume_name: volume.to_string(),
            mount_path: path.to_string(),
            access_mode: "rw".to_string(),
        }
    }

    async fn reconciler_with(
        runtime: MockRuntimeClient,
    ) -> (Reconciler, Store, ServiceMetrics) {
        let store = test_store().await;
        let metrics = ServiceMetrics::new();
        (
            Reconciler::new(Arc::new(runtime), store.clone(), metrics.clone()),
            store,
            metrics,
        )
    }

    #[tokio::test]
    async fn test_new_volumes_are_inserted() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("a", "local"), volume_info("b", "nfs")]));
        let (reconciler, store, _) = reconciler_with(runtime).await;

        reconciler.reconcile_volumes().await.unwrap();

        let all = store.volumes.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|v| v.is_active));
    }

    #[tokio::test]
    async fn test_changed_volume_updated_preserving_identity() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("a", "nfs")]));
        let (reconciler, store, _) = reconciler_with(runtime).await;

        store
            .volumes
            .upsert(&NewVolume::from_runtime(&volume_info("a", "local")))
            .await
            .unwrap();
        let before = store.volumes.get("a").await.unwrap().unwrap();

        reconciler.reconcile_volumes().await.unwrap();

        let after = store.volumes.get("a").await.unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.created_at, before.created_at);
        assert_eq!(after.driver, "nfs");
    }

    #[tokio::test]
    async fn test_missing_volume_soft_deleted_with_mounts() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("a", "local")]));
        let (reconciler, store, metrics) = reconciler_with(runtime).await;

        // Store starts with active volumes {a, b}; the runtime only has a.
        store
            .volumes
            .upsert(&NewVolume::from_runtime(&volume_info("a", "local")))
            .await
            .unwrap();
        store
            .volumes
            .upsert(&NewVolume::from_runtime(&volume_info("b", "local")))
            .await
            .unwrap();
        store
            .containers
            .upsert(&NewContainer::from_runtime(&container_info("c1", vec![])))
            .await
            .unwrap();
        store.mounts.upsert("b", "c1", "/data", "rw").await.unwrap();

        reconciler.reconcile_volumes().await.unwrap();

        let b = store.volumes.get("b").await.unwrap().unwrap();
        assert!(!b.is_active);
        let mounts = store.mounts.list_by_container("c1").await.unwrap();
        assert!(mounts.iter().all(|m| !m.is_active));
        assert_eq!(
            metrics.snapshot().reconcile_runs.get("volumes"),
            Some(&1)
        );

        let a = store.volumes.get("a").await.unwrap().unwrap();
        assert!(a.is_active);
    }

    #[tokio::test]
    async fn test_exactly_one_active_row_after_reconcile() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("a", "local")]));
        let (reconciler, store, _) = reconciler_with(runtime).await;

        reconciler.reconcile_volumes().await.unwrap();
        reconciler.reconcile_volumes().await.unwrap();

        let active: Vec<_> = store
            .volumes
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_active && v.volume_id == "a")
            .collect();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_container_reconcile_refreshes_mounts() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("v1", "local"), volume_info("v2", "local")]));
        runtime
            .expect_list_containers()
            .returning(|| Ok(vec![container_info("c1", vec![])]));
        runtime
            .expect_inspect_container()
            .returning(|id| Ok(container_info(id, vec![mount("v2", "/fresh")])));
        let (reconciler, store, metrics) = reconciler_with(runtime).await;

        reconciler.full_reconcile().await.unwrap();

        // Stale mount row for c1 that inspect no longer reports.
        store.mounts.upsert("v1", "c1", "/stale", "rw").await.unwrap();

        reconciler.reconcile_containers().await.unwrap();

        let mounts = store.mounts.list_by_container("c1").await.unwrap();
        let stale = mounts.iter().find(|m| m.mount_path == "/stale").unwrap();
        let fresh = mounts.iter().find(|m| m.mount_path == "/fresh").unwrap();
        assert!(!stale.is_active);
        assert!(fresh.is_active);
        assert_eq!(fresh.access_mode, "rw");
        assert!(metrics.snapshot().reconcile_runs.get("containers").copied() >= Some(1));
    }

    #[tokio::test]
    async fn test_gone_container_deactivates_mounts_then_soft_deletes() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Ok(vec![volume_info("v1", "local")]));
        runtime.expect_list_containers().returning(|| Ok(vec![]));
        let (reconciler, store, _) = reconciler_with(runtime).await;

        store
            .volumes
            .upsert(&NewVolume::from_runtime(&volume_info("v1", "local")))
            .await
            .unwrap();
        store
            .containers
            .upsert(&NewContainer::from_runtime(&container_info("c1", vec![])))
            .await
            .unwrap();
        store.mounts.upsert("v1", "c1", "/data", "rw").await.unwrap();

        reconciler.reconcile_containers().await.unwrap();

        let container = store.containers.get("c1").await.unwrap().unwrap();
        assert!(!container.is_active);
        let mounts = store.mounts.list_by_container("c1").await.unwrap();
        assert!(mounts.iter().all(|m| !m.is_active));
    }

    #[tokio::test]
    async fn test_top_level_list_failure_aborts() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_list_volumes()
            .returning(|| Err(DockerError::Unreachable("socket gone".to_string())));
        let (reconciler, _, metrics) = reconciler_with(runtime).await;

        assert!(reconciler.reconcile_volumes().await.is_err());
        assert!(metrics.snapshot().reconcile_runs.get("volumes").is_none());
    }
}
