//! Volume mount repository — the (volume, container, path) binding table.

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::model::MountRecord;

#[derive(Debug, Clone)]
pub struct MountRepository {
    pool: SqlitePool,
}

impl MountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a mount binding; reactivates a previously
    /// deactivated row for the same triple.
    pub async fn upsert(
        &self,
        volume_id: &str,
        container_id: &str,
        mount_path: &str,
        access_mode: &str,
    ) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO volume_mounts
                (volume_id, container_id, mount_path, access_mode, is_active,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(volume_id, container_id, mount_path) DO UPDATE SET
                access_mode = excluded.access_mode,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(volume_id)
        .bind(container_id)
        .bind(mount_path)
        .bind(access_mode)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deactivate(
        &self,
        volume_id: &str,
        container_id: &str,
        mount_path: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE volume_mounts SET is_active = 0, updated_at = ?
            WHERE volume_id = ? AND container_id = ? AND mount_path = ?
            "#,
        )
        .bind(Utc::now())
        .bind(volume_id)
        .bind(container_id)
        .bind(mount_path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Deactivate every mount of a container. Returns the row count.
    pub async fn deactivate_by_container(&self, container_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE volume_mounts SET is_active = 0, updated_at = ? WHERE container_id = ?",
        )
        .bind(Utc::now())
        .bind(container_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Deactivate every mount of a volume. Returns the row count.
    pub async fn deactivate_by_volume(&self, volume_id: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE volume_mounts SET is_active = 0, updated_at = ? WHERE volume_id = ?",
        )
        .bind(Utc::now())
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// All mount rows of a container, active or not. Used by reconciliation.
    pub async fn list_by_container(
        &self,
        container_id: &str,
    ) -> Result<Vec<MountRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM volume_mounts WHERE container_id = ? ORDER BY mount_path",
        )
        .bind(container_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(MountRecord::from_row).collect()
    }

    pub async fn list_active_by_volume(
        &self,
        volume_id: &str,
    ) -> Result<Vec<MountRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM volume_mounts WHERE volume_id = ? AND is_active = 1 \
             ORDER BY container_id, mount_path",
        )
        .bind(volume_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(MountRecord::from_row).collect()
    }

    pub async fn count_active_by_volume(&self, volume_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM volume_mounts WHERE volume_id = ? AND is_active = 1",
        )
        .bind(volume_id)
        .fetch_one(&self.pool)
        .await?;
        row.try_get("n")
    }
}
