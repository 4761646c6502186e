//! Shared application state. Wiring happens once at startup; every component
//! gets its dependencies handed to it explicitly.

use std::sync::Arc;

use sqlx::sqlite::SqlitePool;
use tokio::sync::watch;
use tracing::info;

use crate::config::AppConfig;
use crate::docker::RuntimeClient;
use crate::events::{EventIngester, EventProcessor, Reconciler};
use crate::metrics::ServiceMetrics;
use crate::scan::{ScanCache, ScanEngine};
use crate::store::{MigrationManager, Store};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Store,
    pub engine: Arc<ScanEngine>,
    pub ingester: Arc<EventIngester>,
    pub migrator: Arc<MigrationManager>,
    pub metrics: ServiceMetrics,
    /// Root shutdown signal every long-lived worker descends from.
    /// Watch semantics: late subscribers still observe the latest value.
    pub shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: AppConfig, runtime: Arc<dyn RuntimeClient>, pool: SqlitePool) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let store = Store::new(pool.clone());
        let metrics = ServiceMetrics::new();

        let cache = Arc::new(ScanCache::new(
            store.scan_cache.clone(),
            config.scan.cache_capacity,
        ));
        let engine = Arc::new(ScanEngine::new(
            Arc::clone(&runtime),
            ScanEngine::default_methods(),
            Arc::clone(&cache),
            store.clone(),
            metrics.clone(),
            config.scan.clone(),
        ));

        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&runtime),
            store.clone(),
            cache,
        ));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&runtime),
            store.clone(),
            metrics.clone(),
        ));
        let ingester = Arc::new(EventIngester::new(
            runtime,
            processor,
            reconciler,
            config.events.clone(),
            metrics.clone(),
        ));

        let migrator = Arc::new(MigrationManager::new(pool, config.migrations_dir.clone()));

        Self {
            config: Arc::new(config),
            store,
            engine,
            ingester,
            migrator,
            metrics,
            shutdown_tx,
        }
    }

    /// Start the long-lived workers. A no-op when event ingestion is
    /// disabled by configuration.
    pub fn start_background(&self) {
        if self.config.events.enabled {
            self.ingester.start();
        } else {
            info!("event ingestion disabled by configuration");
        }
    }

    /// Propagate shutdown and wait for workers to drain.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        if self.config.events.enabled {
            self.ingester.stop().await;
        }
    }
}
