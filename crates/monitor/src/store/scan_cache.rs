//! Durable side of the scan cache. The hot path is the in-process map in
//! `scan::cache`; these rows let warm entries survive a restart.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::model::ScanCacheRecord;

#[derive(Debug, Clone)]
pub struct ScanCacheRepository {
    pool: SqlitePool,
}

impl ScanCacheRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Fetch an entry regardless of expiry; the caller applies the
    /// expires_at / is_valid policy.
    pub async fn get(&self, cache_key: &str) -> Result<Option<ScanCacheRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM scan_cache WHERE cache_key = ?")
            .bind(cache_key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ScanCacheRecord::from_row).transpose()
    }

    pub async fn put(&self, record: &ScanCacheRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO scan_cache
                (cache_key, volume_id, result, expires_at, hit_count,
                 last_accessed, is_valid, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.cache_key)
        .bind(&record.volume_id)
        .bind(&record.result)
        .bind(record.expires_at)
        .bind(record.hit_count)
        .bind(record.last_accessed)
        .bind(record.is_valid)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a hit: bumps hit_count and the access timestamp.
    pub async fn touch(
        &self,
        cache_key: &str,
        accessed_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scan_cache SET hit_count = hit_count + 1, last_accessed = ? \
             WHERE cache_key = ?",
        )
        .bind(accessed_at)
        .bind(cache_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_by_volume(&self, volume_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM scan_cache WHERE volume_id = ?")
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Drop rows past their expiry. Called opportunistically on writes.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM scan_cache WHERE expires_at < ? OR is_valid = 0")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
