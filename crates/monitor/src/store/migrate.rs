//! Schema migration manager.
//!
//! Reads paired `NNN_<slug>.sql` / `NNN_<slug>_down.sql` scripts from a
//! directory and tracks applied versions in `migration_history`. Each applied
//! row stores the reverse script and the forward script's checksum; a script
//! file whose checksum no longer matches its history row is reported as
//! corrupt and blocks further applies.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("migration {0} was never applied")]
    NotFound(String),
    #[error("no pending migrations")]
    NoPending,
    #[error("migration {0} is corrupt: script checksum differs from applied checksum")]
    Corrupt(String),
    #[error("migration {0} has no companion down script")]
    MissingDown(String),
    #[error("invalid migration filename: {0}")]
    InvalidFilename(String),
    #[error("failed to apply migration {version}: {source}")]
    Apply {
        version: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("failed to roll back migration {version}: {source}")]
    Rollback {
        version: String,
        #[source]
        source: sqlx::Error,
    },
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("failed to read migration scripts: {0}")]
    Io(#[from] std::io::Error),
}

/// A forward/reverse script pair loaded from disk.
#[derive(Debug, Clone)]
pub struct MigrationScript {
    pub version: String,
    pub description: String,
    pub up_sql: String,
    pub down_sql: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Applied,
    Pending,
    Corrupt,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationEntry {
    pub version: String,
    pub description: String,
    pub state: MigrationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MigrationStatus {
    pub total: usize,
    pub applied: usize,
    pub pending: usize,
    pub migrations: Vec<MigrationEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedMigration {
    pub version: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
    pub checksum: String,
    pub execution_time_ms: i64,
}

#[derive(Debug, Clone)]
pub struct MigrationManager {
    pool: SqlitePool,
    dir: PathBuf,
}

impl MigrationManager {
    pub fn new(pool: SqlitePool, dir: impl Into<PathBuf>) -> Self {
        Self {
            pool,
            dir: dir.into(),
        }
    }

    pub async fn ensure_history_table(&self) -> Result<(), MigrateError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS migration_history (
                version           TEXT PRIMARY KEY,
                description       TEXT NOT NULL,
                applied_at        TIMESTAMP NOT NULL,
                rollback_sql      TEXT NOT NULL,
                checksum          TEXT NOT NULL,
                execution_time_ms INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Load the script pairs from the migration directory, ascending.
    pub fn load_scripts(&self) -> Result<Vec<MigrationScript>, MigrateError> {
        let mut scripts = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.ends_with(".sql") || name.ends_with("_down.sql") {
                continue;
            }

            let (version, slug) = parse_script_name(name)
                .ok_or_else(|| MigrateError::InvalidFilename(name.to_string()))?;

            let down_path = self.dir.join(format!("{version}_{slug}_down.sql"));
            if !down_path.exists() {
                return Err(MigrateError::MissingDown(version));
            }

            let up_sql = std::fs::read_to_string(&path)?;
            let down_sql = std::fs::read_to_string(&down_path)?;
            let checksum = checksum(&up_sql);

            scripts.push(MigrationScript {
                version,
                description: slug.replace('_', " "),
                up_sql,
                down_sql,
                checksum,
            });
        }

        scripts.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(scripts)
    }

    /// Status of every known migration: applied rows matched against the
    /// on-disk scripts, plus never-applied scripts as pending.
    pub async fn status(&self) -> Result<MigrationStatus, MigrateError> {
        self.ensure_history_table().await?;
        let scripts = self.load_scripts()?;
        let applied = self.applied().await?;

        let mut migrations = Vec::with_capacity(scripts.len());
        let mut applied_count = 0;
        for script in &scripts {
            let entry = match applied.iter().find(|a| a.version == script.version) {
                Some(row) if row.checksum != script.checksum => MigrationEntry {
                    version: script.version.clone(),
                    description: script.description.clone(),
                    state: MigrationState::Corrupt,
                    applied_at: Some(row.applied_at),
                },
                Some(row) => {
                    applied_count += 1;
                    MigrationEntry {
                        version: script.version.clone(),
                        description: script.description.clone(),
                        state: MigrationState::Applied,
                        applied_at: Some(row.applied_at),
                    }
                }
                None => MigrationEntry {
                    version: script.version.clone(),
                    description: script.description.clone(),
                    state: MigrationState::Pending,
                    applied_at: None,
                },
            };
            migrations.push(entry);
        }

        Ok(MigrationStatus {
            total: scripts.len(),
            applied: applied_count,
            pending: migrations
                .iter()
                .filter(|m| m.state == MigrationState::Pending)
                .count(),
            migrations,
        })
    }

    /// Apply every pending script in ascending version order, each inside its
    /// own transaction. Errors with `NoPending` when nothing is left to do
    /// and refuses to proceed past a corrupt applied script.
    pub async fn apply_all_pending(&self) -> Result<Vec<String>, MigrateError> {
        self.ensure_history_table().await?;
        let scripts = self.load_scripts()?;
        let applied = self.applied().await?;

        let mut newly_applied = Vec::new();
        for script in &scripts {
            if let Some(row) = applied.iter().find(|a| a.version == script.version) {
                if row.checksum != script.checksum {
                    return Err(MigrateError::Corrupt(script.version.clone()));
                }
                continue;
            }

            let started = std::time::Instant::now();
            let mut tx = self.pool.begin().await?;
            sqlx::raw_sql(&script.up_sql)
                .execute(&mut *tx)
                .await
                .map_err(|source| MigrateError::Apply {
                    version: script.version.clone(),
                    source,
                })?;

            let execution_time_ms = started.elapsed().as_millis().min(i64::MAX as u128) as i64;
            sqlx::query(
                r#"
                INSERT INTO migration_history
                    (version, description, applied_at, rollback_sql, checksum, execution_time_ms)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&script.version)
            .bind(&script.description)
            .bind(Utc::now())
            .bind(&script.down_sql)
            .bind(&script.checksum)
            .bind(execution_time_ms)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            info!(version = %script.version, "applied migration");
            newly_applied.push(script.version.clone());
        }

        if newly_applied.is_empty() {
            return Err(MigrateError::NoPending);
        }
        Ok(newly_applied)
    }

    /// Execute the stored reverse script for a version and forget it.
    pub async fn rollback(&self, version: &str) -> Result<(), MigrateError> {
        self.ensure_history_table().await?;
        let row = sqlx::query("SELECT rollback_sql FROM migration_history WHERE version = ?")
            .bind(version)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| MigrateError::NotFound(version.to_string()))?;
        let rollback_sql: String = row.try_get("rollback_sql")?;

        let mut tx = self.pool.begin().await?;
        sqlx::raw_sql(&rollback_sql)
            .execute(&mut *tx)
            .await
            .map_err(|source| MigrateError::Rollback {
                version: version.to_string(),
                source,
            })?;
        sqlx::query("DELETE FROM migration_history WHERE version = ?")
            .bind(version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(version, "rolled back migration");
        Ok(())
    }

    /// Applied migrations, ascending, for the history endpoint.
    pub async fn applied(&self) -> Result<Vec<AppliedMigration>, MigrateError> {
        let rows = sqlx::query(
            "SELECT version, description, applied_at, checksum, execution_time_ms \
             FROM migration_history ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(AppliedMigration {
                    version: row.try_get("version")?,
                    description: row.try_get("description")?,
                    applied_at: row.try_get("applied_at")?,
                    checksum: row.try_get("checksum")?,
                    execution_time_ms: row.try_get("execution_time_ms")?,
                })
            })
            .collect()
    }
}

fn checksum(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split `NNN_slug.sql` into ("NNN", "slug").
fn parse_script_name(name: &str) -> Option<(String, String)> {
    let stem = name.strip_suffix(".sql")?;
    let (version, slug) = stem.split_once('_')?;
    if version.is_empty() || !version.chars().all(|c| c.is_ascii_digit()) || slug.is_empty() {
        return None;
    }
    Some((version.to_string(), slug.to_string()))
}
