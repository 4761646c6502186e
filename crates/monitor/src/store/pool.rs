//! Database connection pool and health probe.

use std::str::FromStr;
use std::time::Instant;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::DbConfig;

/// Ping latency above which the pool is reported as degraded.
const DEGRADED_THRESHOLD_MS: u128 = 100;

/// Open a pool against the configured DSN with foreign keys enforced.
pub async fn connect(cfg: &DbConfig) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&cfg.dsn)?
        .create_if_missing(true)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(cfg.max_open)
        .min_connections(cfg.max_idle)
        .max_lifetime(cfg.conn_max_lifetime)
        .connect_with(options)
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct DbHealth {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    pub open: u32,
    pub idle: u32,
    pub max_open: u32,
}

/// Ping-based health check: a round trip over an acquired connection.
pub async fn health(pool: &SqlitePool, max_open: u32) -> DbHealth {
    let started = Instant::now();
    let ping = sqlx::query("SELECT 1").execute(pool).await;
    let elapsed = started.elapsed().as_millis();

    let status = match ping {
        Ok(_) if elapsed > DEGRADED_THRESHOLD_MS => HealthStatus::Degraded,
        Ok(_) => HealthStatus::Healthy,
        Err(_) => HealthStatus::Unhealthy,
    };

    DbHealth {
        status,
        response_time_ms: elapsed.min(u64::MAX as u128) as u64,
        open: pool.size(),
        idle: pool.num_idle() as u32,
        max_open,
    }
}
