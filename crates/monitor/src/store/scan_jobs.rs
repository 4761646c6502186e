//! Scan job repository — async scan lifecycle rows.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::model::{JobStatus, ScanJobRecord};

#[derive(Debug, Clone)]
pub struct ScanJobRepository {
    pool: SqlitePool,
}

impl ScanJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        scan_id: &str,
        volume_id: &str,
        method: &str,
        estimated_duration_ns: Option<i64>,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO scan_jobs
                (scan_id, volume_id, status, progress, method,
                 estimated_duration_ns, created_at, updated_at)
            VALUES (?, ?, 'queued', 0, ?, ?, ?, ?)
            "#,
        )
        .bind(scan_id)
        .bind(volume_id)
        .bind(method)
        .bind(estimated_duration_ns)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_running(
        &self,
        scan_id: &str,
        started_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scan_jobs SET status = 'running', started_at = ?, updated_at = ? \
             WHERE scan_id = ?",
        )
        .bind(started_at)
        .bind(Utc::now())
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Progress is monotonic: a lower value than the stored one is ignored.
    pub async fn update_progress(&self, scan_id: &str, progress: i64) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE scan_jobs SET progress = MAX(progress, ?), updated_at = ? \
             WHERE scan_id = ? AND status IN ('queued', 'running')",
        )
        .bind(progress.clamp(0, 100))
        .bind(Utc::now())
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal transition to `completed`. The result row must already exist.
    pub async fn complete(
        &self,
        scan_id: &str,
        result_id: i64,
        method: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = 'completed', progress = 100, method = ?,
                result_id = ?, completed_at = ?, updated_at = ?
            WHERE scan_id = ?
            "#,
        )
        .bind(method)
        .bind(result_id)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Terminal transition to `failed` or `cancelled`.
    pub async fn finish_with_error(
        &self,
        scan_id: &str,
        status: JobStatus,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        debug_assert!(status.is_terminal());
        sqlx::query(
            r#"
            UPDATE scan_jobs
            SET status = ?, error = ?, completed_at = ?, updated_at = ?
            WHERE scan_id = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(scan_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_scan_id(&self, scan_id: &str) -> Result<Option<ScanJobRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM scan_jobs WHERE scan_id = ?")
            .bind(scan_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ScanJobRecord::from_row).transpose()
    }

    pub async fn list_by_volume(&self, volume_id: &str) -> Result<Vec<ScanJobRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM scan_jobs WHERE volume_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(ScanJobRecord::from_row).collect()
    }

    /// Job counts per status.
    pub async fn stats(&self) -> Result<HashMap<String, i64>, sqlx::Error> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM scan_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;
        let mut out = HashMap::new();
        for row in rows {
            out.insert(row.try_get::<String, _>("status")?, row.try_get("n")?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;

    #[tokio::test]
    async fn test_lifecycle_queued_running_completed() {
        let store = test_store().await;
        store.scan_jobs.create("scan_v1_1", "v1", "", None).await.unwrap();

        let job = store.scan_jobs.get_by_scan_id("scan_v1_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());

        store.scan_jobs.set_running("scan_v1_1", Utc::now()).await.unwrap();
        store.scan_jobs.update_progress("scan_v1_1", 40).await.unwrap();

        let job = store.scan_jobs.get_by_scan_id("scan_v1_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.progress, 40);
        assert!(job.started_at.is_some());

        // The result row is inserted before the job flips to completed.
        let result_id = store
            .scan_results
            .insert(&crate::store::model::NewScanResult {
                volume_id: "v1".to_string(),
                total_size: 1024,
                file_count: 1,
                directory_count: 1,
                largest_file: 1024,
                scan_method: "native".to_string(),
                scan_duration_ns: 1,
                filesystem_type: "ext4".to_string(),
                checksum: String::new(),
                is_valid: true,
                error: None,
            })
            .await
            .unwrap();

        store
            .scan_jobs
            .complete("scan_v1_1", result_id, "native")
            .await
            .unwrap();
        let job = store.scan_jobs.get_by_scan_id("scan_v1_1").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_id, Some(result_id));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let store = test_store().await;
        store.scan_jobs.create("s", "v1", "", None).await.unwrap();
        store.scan_jobs.set_running("s", Utc::now()).await.unwrap();

        store.scan_jobs.update_progress("s", 60).await.unwrap();
        store.scan_jobs.update_progress("s", 30).await.unwrap();

        let job = store.scan_jobs.get_by_scan_id("s").await.unwrap().unwrap();
        assert_eq!(job.progress, 60);
    }

    #[tokio::test]
    async fn test_finish_with_error() {
        let store = test_store().await;
        store.scan_jobs.create("s", "v1", "", None).await.unwrap();
        store
            .scan_jobs
            .finish_with_error("s", JobStatus::Failed, "all scan methods failed")
            .await
            .unwrap();

        let job = store.scan_jobs.get_by_scan_id("s").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("all scan methods failed"));
        assert!(job.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_stats_groups_by_status() {
        let store = test_store().await;
        store.scan_jobs.create("a", "v1", "", None).await.unwrap();
        store.scan_jobs.create("b", "v1", "", None).await.unwrap();
        store
            .scan_jobs
            .finish_with_error("b", JobStatus::Failed, "boom")
            .await
            .unwrap();

        let stats = store.scan_jobs.stats().await.unwrap();
        assert_eq!(stats.get("queued"), Some(&1));
        assert_eq!(stats.get("failed"), Some(&1));
    }
}
