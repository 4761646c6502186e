use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Full service configuration, loaded from environment variables only.
/// `.env` files are honored via dotenvy before the first read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub http: HttpConfig,
    pub auth: AuthConfig,
    pub db: DbConfig,
    pub runtime: RuntimeConfig,
    pub events: EventsConfig,
    pub scan: ScanConfig,
    /// Directory holding `NNN_<slug>.sql` / `NNN_<slug>_down.sql` pairs.
    pub migrations_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub url_base: String,
    pub cors_allowed_origins: Vec<String>,
    pub cors_max_age_seconds: u64,
    pub https_redirect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub enabled: bool,
    pub hs256_secret: String,
    /// Minimum role required by the mutating-operation guard.
    pub required_role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub dsn: String,
    pub max_open: u32,
    pub max_idle: u32,
    pub conn_max_lifetime: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Docker daemon address; empty means the platform default socket.
    pub host: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    pub enabled: bool,
    pub queue_size: usize,
    pub backoff_min: Duration,
    pub backoff_max: Duration,
    pub reconcile_interval: Duration,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub default_timeout: Duration,
    pub max_concurrent: usize,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_parse(key, default_secs))
}

fn env_list(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|raw| {
            raw.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

impl AppConfig {
    pub fn load() -> Result<Self, String> {
        let config = Self::from_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Self {
        Self {
            http: HttpConfig {
                bind_addr: env_string("HTTP_BIND_ADDR", "0.0.0.0:8080"),
                url_base: env_string("API_URL_BASE", "/api/v1"),
                cors_allowed_origins: env_list("CORS_ALLOWED_ORIGINS"),
                cors_max_age_seconds: env_parse("CORS_MAX_AGE_SECONDS", 300),
                https_redirect: env_parse("HTTPS_REDIRECT", false),
            },
            auth: AuthConfig {
                enabled: env_parse("AUTH_ENABLED", false),
                hs256_secret: env_string("AUTH_HS256_SECRET", ""),
                required_role: env_string("AUTH_REQUIRED_ROLE", "operator"),
            },
            db: DbConfig {
                dsn: env_string("DB_DSN", "sqlite://monitor.db?mode=rwc"),
                max_open: env_parse("DB_MAX_OPEN", 10),
                max_idle: env_parse("DB_MAX_IDLE", 2),
                conn_max_lifetime: env_secs("DB_CONN_MAX_LIFETIME", 1800),
            },
            runtime: RuntimeConfig {
                host: env_string("RUNTIME_HOST", ""),
                timeout: env_secs("RUNTIME_TIMEOUT", 30),
            },
            events: EventsConfig {
                enabled: env_parse("EVENTS_ENABLED", true),
                queue_size: env_parse("EVENTS_QUEUE_SIZE", 1024),
                backoff_min: env_secs("EVENTS_BACKOFF_MIN", 1),
                backoff_max: env_secs("EVENTS_BACKOFF_MAX", 60),
                reconcile_interval: env_secs("RECONCILE_INTERVAL", 300),
                shutdown_grace: env_secs("SHUTDOWN_GRACE", 30),
            },
            scan: ScanConfig {
                default_timeout: env_secs("SCAN_DEFAULT_TIMEOUT", 300),
                max_concurrent: env_parse("SCAN_MAX_CONCURRENT", 5),
                cache_ttl: env_secs("SCAN_CACHE_TTL", 300),
                cache_capacity: env_parse("SCAN_CACHE_CAPACITY", 1024),
            },
            migrations_dir: env_string("MIGRATIONS_DIR", "migrations"),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.http.bind_addr.is_empty() {
            return Err("HTTP_BIND_ADDR must not be empty".to_string());
        }
        if self.http.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(format!(
                "HTTP_BIND_ADDR is not a valid socket address: {}",
                self.http.bind_addr
            ));
        }
        if self.auth.enabled && self.auth.hs256_secret.is_empty() {
            return Err("AUTH_HS256_SECRET is required when AUTH_ENABLED=true".to_string());
        }
        if self.db.max_open == 0 {
            return Err("DB_MAX_OPEN must be > 0".to_string());
        }
        if self.db.max_idle > self.db.max_open {
            return Err("DB_MAX_IDLE must not exceed DB_MAX_OPEN".to_string());
        }
        if self.events.queue_size == 0 {
            return Err("EVENTS_QUEUE_SIZE must be > 0".to_string());
        }
        if self.events.backoff_min.is_zero() || self.events.backoff_min > self.events.backoff_max {
            return Err("EVENTS_BACKOFF_MIN must be > 0 and <= EVENTS_BACKOFF_MAX".to_string());
        }
        if self.events.reconcile_interval.is_zero() {
            return Err("RECONCILE_INTERVAL must be > 0".to_string());
        }
        if self.scan.max_concurrent == 0 {
            return Err("SCAN_MAX_CONCURRENT must be > 0".to_string());
        }
        if self.scan.default_timeout.is_zero() {
            return Err("SCAN_DEFAULT_TIMEOUT must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Defaults are computed from an empty environment; values present in
        // the process environment still win, so tests that need fixed values
        // construct the structs directly.
        Self::from_env()
    }
}
