//! Scan result repository.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;

use super::model::{NewScanResult, ScanResultRecord};

#[derive(Debug, Clone)]
pub struct ScanResultRepository {
    pool: SqlitePool,
}

impl ScanResultRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a result row and return its surrogate id.
    pub async fn insert(&self, result: &NewScanResult) -> Result<i64, sqlx::Error> {
        let now = Utc::now();
        let done = sqlx::query(
            r#"
            INSERT INTO scan_results
                (volume_id, total_size, file_count, directory_count, largest_file,
                 scan_method, scan_duration_ns, filesystem_type, checksum,
                 is_valid, error, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.volume_id)
        .bind(result.total_size)
        .bind(result.file_count)
        .bind(result.directory_count)
        .bind(result.largest_file)
        .bind(&result.scan_method)
        .bind(result.scan_duration_ns)
        .bind(&result.filesystem_type)
        .bind(&result.checksum)
        .bind(result.is_valid)
        .bind(&result.error)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(done.last_insert_rowid())
    }

    /// The most recent valid result for a volume, if any.
    pub async fn latest_by_volume(
        &self,
        volume_id: &str,
    ) -> Result<Option<ScanResultRecord>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT * FROM scan_results
            WHERE volume_id = ? AND is_valid = 1
            ORDER BY created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(volume_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(ScanResultRecord::from_row).transpose()
    }

    pub async fn get(&self, id: i64) -> Result<Option<ScanResultRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM scan_results WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ScanResultRecord::from_row).transpose()
    }
}
