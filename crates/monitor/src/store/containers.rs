//! Container repository.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;

use super::model::{map_to_json, ContainerRecord, NewContainer};

#[derive(Debug, Clone)]
pub struct ContainerRepository {
    pool: SqlitePool,
}

impl ContainerRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a container from a runtime observation.
    /// `is_active` is derived from the observed state.
    pub async fn upsert(&self, container: &NewContainer) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO containers
                (container_id, name, image, state, status, labels,
                 started_at, finished_at, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(container_id) DO UPDATE SET
                name = excluded.name,
                image = excluded.image,
                state = excluded.state,
                status = excluded.status,
                labels = excluded.labels,
                started_at = excluded.started_at,
                finished_at = excluded.finished_at,
                is_active = excluded.is_active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&container.container_id)
        .bind(&container.name)
        .bind(&container.image)
        .bind(&container.state)
        .bind(&container.status)
        .bind(map_to_json(&container.labels))
        .bind(container.started_at)
        .bind(container.finished_at)
        .bind(container.is_active())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mark a container stopped without removing it. Mount rows are handled
    /// separately by the caller.
    pub async fn mark_stopped(
        &self,
        container_id: &str,
        state: &str,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE containers
            SET state = ?, status = ?, is_active = 0,
                finished_at = COALESCE(?, finished_at), updated_at = ?
            WHERE container_id = ?
            "#,
        )
        .bind(state)
        .bind(state)
        .bind(finished_at)
        .bind(Utc::now())
        .bind(container_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Soft delete. Returns false when the container was not present.
    pub async fn soft_delete(&self, container_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE containers SET is_active = 0, updated_at = ? WHERE container_id = ?",
        )
        .bind(Utc::now())
        .bind(container_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, container_id: &str) -> Result<Option<ContainerRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM containers WHERE container_id = ?")
            .bind(container_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ContainerRecord::from_row).transpose()
    }

    /// Every row, active or not. Used by reconciliation.
    pub async fn list_all(&self) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM containers ORDER BY container_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ContainerRecord::from_row).collect()
    }

    pub async fn list_active(&self) -> Result<Vec<ContainerRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM containers WHERE is_active = 1 ORDER BY container_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(ContainerRecord::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_store;
    use std::collections::HashMap;

    fn container(id: &str, state: &str) -> NewContainer {
        NewContainer {
            container_id: id.to_string(),
            name: format!("{id}-name"),
            image: "nginx:latest".to_string(),
            state: state.to_string(),
            status: "Up 1 minute".to_string(),
            labels: HashMap::new(),
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_sets_active_from_state() {
        let store = test_store().await;
        store.containers.upsert(&container("c1", "running")).await.unwrap();
        assert!(store.containers.get("c1").await.unwrap().unwrap().is_active);

        store.containers.upsert(&container("c1", "exited")).await.unwrap();
        assert!(!store.containers.get("c1").await.unwrap().unwrap().is_active);
    }

    #[tokio::test]
    async fn test_mark_stopped() {
        let store = test_store().await;
        store.containers.upsert(&container("c1", "running")).await.unwrap();

        let now = Utc::now();
        assert!(store
            .containers
            .mark_stopped("c1", "exited", Some(now))
            .await
            .unwrap());

        let record = store.containers.get("c1").await.unwrap().unwrap();
        assert_eq!(record.state, "exited");
        assert!(!record.is_active);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_list_active_excludes_deleted() {
        let store = test_store().await;
        store.containers.upsert(&container("c1", "running")).await.unwrap();
        store.containers.upsert(&container("c2", "running")).await.unwrap();
        store.containers.soft_delete("c2").await.unwrap();

        let active = store.containers.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].container_id, "c1");

        let all = store.containers.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
