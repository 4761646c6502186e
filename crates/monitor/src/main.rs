use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use monitor::api;
use monitor::config::AppConfig;
use monitor::docker::DockerClient;
use monitor::state::AppState;
use monitor::store::{pool, MigrateError, MigrationManager};

// Exit codes: 0 clean shutdown, 1 configuration error, 2 database failure,
// 3 runtime connection failure, 130 on interrupt.
const EXIT_OK: i32 = 0;
const EXIT_CONFIG: i32 = 1;
const EXIT_DATABASE: i32 = 2;
const EXIT_RUNTIME: i32 = 3;
const EXIT_INTERRUPT: i32 = 130;

#[tokio::main]
async fn main() {
    std::process::exit(run().await);
}

async fn run() -> i32 {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "monitor=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Volume Monitor v{}", env!("CARGO_PKG_VERSION"));

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return EXIT_CONFIG;
        }
    };
    info!("Configuration loaded: bind_addr={}", config.http.bind_addr);

    // Durable store.
    let db_pool = match pool::connect(&config.db).await {
        Ok(db_pool) => db_pool,
        Err(e) => {
            error!("Failed to connect to the database: {e}");
            return EXIT_DATABASE;
        }
    };
    let migrator = MigrationManager::new(db_pool.clone(), config.migrations_dir.clone());
    match migrator.apply_all_pending().await {
        Ok(applied) => info!("Applied migrations: {}", applied.join(", ")),
        Err(MigrateError::NoPending) => info!("Database schema is up to date"),
        Err(e) => {
            error!("Migration failure: {e}");
            return EXIT_DATABASE;
        }
    }

    // Container runtime.
    info!(
        "Connecting to container runtime at: {}",
        if config.runtime.host.is_empty() {
            "default socket"
        } else {
            &config.runtime.host
        }
    );
    let docker = match DockerClient::new(&config.runtime.host, config.runtime.timeout) {
        Ok(docker) => docker,
        Err(e) => {
            error!("Failed to create runtime client: {e}");
            return EXIT_RUNTIME;
        }
    };
    if let Err(e) = docker.ping().await {
        error!("Container runtime is unreachable: {e}");
        return EXIT_RUNTIME;
    }
    match docker.version().await {
        Ok(version) => info!("Connected to container runtime v{version}"),
        Err(e) => info!("Connected to container runtime (version unknown: {e})"),
    }

    let state = AppState::new(config.clone(), Arc::new(docker), db_pool);
    state.start_background();

    let app = api::build_router(state.clone());
    let addr: SocketAddr = match config.http.bind_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid bind address: {e}");
            return EXIT_CONFIG;
        }
    };
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind {addr}: {e}");
            return EXIT_CONFIG;
        }
    };

    info!("========================================");
    info!("Volume Monitor is ready");
    info!("Listening on: http://{addr}");
    info!("API base: {}", config.http.url_base);
    info!("========================================");

    let (cause_tx, mut cause_rx) = tokio::sync::watch::channel(ShutdownCause::Term);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let cause = shutdown_signal().await;
            let _ = cause_tx.send(cause);
        })
        .await;

    state.shutdown().await;

    if let Err(e) = serve_result {
        error!("Server error: {e}");
        return EXIT_CONFIG;
    }

    info!("Shutdown complete");
    match *cause_rx.borrow_and_update() {
        ShutdownCause::Interrupt => EXIT_INTERRUPT,
        ShutdownCause::Term => EXIT_OK,
    }
}

#[derive(Debug, Clone, Copy)]
enum ShutdownCause {
    /// SIGINT (Ctrl+C).
    Interrupt,
    /// SIGTERM or other clean termination.
    Term,
}

/// Wait for SIGINT or SIGTERM and report which one fired.
async fn shutdown_signal() -> ShutdownCause {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down gracefully");
            ShutdownCause::Interrupt
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully");
            ShutdownCause::Term
        }
    }
}
