//! Per-volume metric time series, one row per successful scan.

use sqlx::sqlite::SqlitePool;

use super::model::{NewVolumeMetric, VolumeMetricRecord};

#[derive(Debug, Clone)]
pub struct VolumeMetricsRepository {
    pool: SqlitePool,
}

impl VolumeMetricsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a metric point. The (volume_id, metric_timestamp) pair is
    /// unique; a duplicate timestamp for the same volume is replaced so the
    /// series stays monotonic per volume.
    pub async fn insert(&self, metric: &NewVolumeMetric) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO volume_metrics
                (volume_id, metric_timestamp, total_size, file_count,
                 directory_count, growth_rate, access_frequency, container_count)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&metric.volume_id)
        .bind(metric.metric_timestamp)
        .bind(metric.total_size)
        .bind(metric.file_count)
        .bind(metric.directory_count)
        .bind(metric.growth_rate)
        .bind(metric.access_frequency)
        .bind(metric.container_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn latest_by_volume(
        &self,
        volume_id: &str,
    ) -> Result<Option<VolumeMetricRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM volume_metrics WHERE volume_id = ? \
             ORDER BY metric_timestamp DESC LIMIT 1",
        )
        .bind(volume_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(VolumeMetricRecord::from_row).transpose()
    }

    pub async fn list_by_volume(
        &self,
        volume_id: &str,
        limit: i64,
    ) -> Result<Vec<VolumeMetricRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM volume_metrics WHERE volume_id = ? \
             ORDER BY metric_timestamp DESC LIMIT ?",
        )
        .bind(volume_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(VolumeMetricRecord::from_row).collect()
    }
}
