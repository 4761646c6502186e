//! Durable store — connection pool, migrations, and per-entity repositories.

pub mod containers;
pub mod migrate;
pub mod model;
pub mod mounts;
pub mod page;
pub mod pool;
pub mod scan_cache;
pub mod scan_jobs;
pub mod scan_results;
pub mod volume_metrics;
pub mod volumes;

use sqlx::sqlite::SqlitePool;

pub use migrate::{MigrateError, MigrationManager};
pub use page::{Page, PageRequest, SortSpec};
pub use pool::{DbHealth, HealthStatus};

use containers::ContainerRepository;
use mounts::MountRepository;
use scan_cache::ScanCacheRepository;
use scan_jobs::ScanJobRepository;
use scan_results::ScanResultRepository;
use volume_metrics::VolumeMetricsRepository;
use volumes::VolumeRepository;

/// Bundle of repositories sharing one pool. Cheap to clone; handed to every
/// component that touches the database.
#[derive(Debug, Clone)]
pub struct Store {
    pool: SqlitePool,
    pub volumes: VolumeRepository,
    pub containers: ContainerRepository,
    pub mounts: MountRepository,
    pub scan_results: ScanResultRepository,
    pub scan_jobs: ScanJobRepository,
    pub scan_cache: ScanCacheRepository,
    pub volume_metrics: VolumeMetricsRepository,
}

impl Store {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            volumes: VolumeRepository::new(pool.clone()),
            containers: ContainerRepository::new(pool.clone()),
            mounts: MountRepository::new(pool.clone()),
            scan_results: ScanResultRepository::new(pool.clone()),
            scan_jobs: ScanJobRepository::new(pool.clone()),
            scan_cache: ScanCacheRepository::new(pool.clone()),
            volume_metrics: VolumeMetricsRepository::new(pool.clone()),
            pool,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health(&self, max_open: u32) -> DbHealth {
        pool::health(&self.pool, max_open).await
    }
}

/// In-memory store with the real schema applied. Single connection so every
/// query sees the same memory database.
#[cfg(test)]
pub(crate) async fn test_store() -> Store {
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;

    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations");
    MigrationManager::new(pool.clone(), dir)
        .apply_all_pending()
        .await
        .unwrap();

    Store::new(pool)
}
