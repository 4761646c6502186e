//! Volume repository — upserts, soft deletes, filtered listing, aggregates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Row};

use super::model::{map_to_json, NewVolume, VolumeRecord};
use super::page::{Page, PageRequest};

/// Sortable columns for volume list queries.
pub const VOLUME_SORT_FIELDS: &[&str] =
    &["name", "driver", "created_at", "updated_at", "last_scanned"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct VolumeFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Substring match against the serialized label map.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Free-text match against name and driver.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    /// Volumes with no active mounts.
    pub orphaned: bool,
    /// Anonymous volumes (64-char hex names minted by the runtime).
    pub system: bool,
    /// Excludes anonymous volumes.
    pub user_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriverAggregate {
    pub driver: String,
    pub volume_count: i64,
    pub scanned_count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SizeRangeAggregate {
    pub range: String,
    pub volume_count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeAggregates {
    pub total_volumes: i64,
    pub active_volumes: i64,
    pub drivers: Vec<DriverAggregate>,
    pub size_ranges: Vec<SizeRangeAggregate>,
}

#[derive(Debug, Clone)]
pub struct VolumeRepository {
    pool: SqlitePool,
}

impl VolumeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh a volume from a runtime observation. The surrogate
    /// id and original created timestamp are preserved on conflict, and the
    /// row is reactivated.
    pub async fn upsert(&self, volume: &NewVolume) -> Result<(), sqlx::Error> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO volumes
                (volume_id, name, driver, mountpoint, labels, options, scope,
                 status, is_active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(volume_id) DO UPDATE SET
                name = excluded.name,
                driver = excluded.driver,
                mountpoint = excluded.mountpoint,
                labels = excluded.labels,
                options = excluded.options,
                scope = excluded.scope,
                status = excluded.status,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&volume.volume_id)
        .bind(&volume.name)
        .bind(&volume.driver)
        .bind(&volume.mountpoint)
        .bind(map_to_json(&volume.labels))
        .bind(map_to_json(&volume.options))
        .bind(&volume.scope)
        .bind(&volume.status)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Soft delete. Returns false when the volume was not present.
    pub async fn soft_delete(&self, volume_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE volumes SET is_active = 0, updated_at = ? WHERE volume_id = ?",
        )
        .bind(Utc::now())
        .bind(volume_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get(&self, volume_id: &str) -> Result<Option<VolumeRecord>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM volumes WHERE volume_id = ?")
            .bind(volume_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(VolumeRecord::from_row).transpose()
    }

    /// Every row, active or not. Used by reconciliation.
    pub async fn list_all(&self) -> Result<Vec<VolumeRecord>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM volumes ORDER BY volume_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(VolumeRecord::from_row).collect()
    }

    pub async fn touch_last_scanned(
        &self,
        volume_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE volumes SET last_scanned = ?, updated_at = ? WHERE volume_id = ?")
            .bind(at)
            .bind(Utc::now())
            .bind(volume_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Filtered, paginated, sorted listing over active volumes.
    pub async fn page(
        &self,
        filter: &VolumeFilter,
        request: &PageRequest,
    ) -> Result<Page<VolumeRecord>, sqlx::Error> {
        let mut count_query = QueryBuilder::new("SELECT COUNT(*) AS n FROM volumes v");
        push_filters(&mut count_query, filter);
        let total: i64 = count_query
            .build()
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        let mut data_query = QueryBuilder::new("SELECT v.* FROM volumes v");
        push_filters(&mut data_query, filter);
        // The sort field is whitelist-validated; only the limit and offset
        // are bound values.
        data_query.push(format!(" ORDER BY v.{}", request.sort.as_sql()));
        data_query.push(" LIMIT ");
        data_query.push_bind(request.limit());
        data_query.push(" OFFSET ");
        data_query.push_bind(request.offset());

        let rows = data_query.build().fetch_all(&self.pool).await?;
        let data = rows
            .iter()
            .map(VolumeRecord::from_row)
            .collect::<Result<Vec<_>, _>>()?;

        let filters = serde_json::to_value(filter).unwrap_or_default();
        Ok(Page::new(data, request, total, filters))
    }

    /// Per-driver and per-size-range rollups over active volumes, using each
    /// volume's most recent valid scan result.
    pub async fn aggregates(&self) -> Result<VolumeAggregates, sqlx::Error> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(is_active), 0) AS active
             FROM volumes",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_volumes: i64 = totals.try_get("total")?;
        let active_volumes: i64 = totals.try_get("active")?;

        let driver_rows = sqlx::query(
            r#"
            WITH latest AS (
                SELECT volume_id, total_size, MAX(created_at) AS created_at
                FROM scan_results
                WHERE is_valid = 1
                GROUP BY volume_id
            )
            SELECT v.driver,
                   COUNT(*) AS volume_count,
                   COUNT(l.volume_id) AS scanned_count,
                   COALESCE(SUM(l.total_size), 0) AS total_size
            FROM volumes v
            LEFT JOIN latest l ON l.volume_id = v.volume_id
            WHERE v.is_active = 1
            GROUP BY v.driver
            ORDER BY v.driver
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let drivers = driver_rows
            .iter()
            .map(|row| {
                Ok(DriverAggregate {
                    driver: row.try_get("driver")?,
                    volume_count: row.try_get("volume_count")?,
                    scanned_count: row.try_get("scanned_count")?,
                    total_size: row.try_get("total_size")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let range_rows = sqlx::query(
            r#"
            WITH latest AS (
                SELECT volume_id, total_size, MAX(created_at) AS created_at
                FROM scan_results
                WHERE is_valid = 1
                GROUP BY volume_id
            )
            SELECT CASE
                       WHEN l.total_size IS NULL THEN 'unscanned'
                       WHEN l.total_size < 1073741824 THEN '<1GiB'
                       WHEN l.total_size < 10737418240 THEN '1-10GiB'
                       WHEN l.total_size < 107374182400 THEN '10-100GiB'
                       ELSE '>100GiB'
                   END AS size_range,
                   COUNT(*) AS volume_count,
                   COALESCE(SUM(l.total_size), 0) AS total_size
            FROM volumes v
            LEFT JOIN latest l ON l.volume_id = v.volume_id
            WHERE v.is_active = 1
            GROUP BY size_range
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let size_ranges = range_rows
            .iter()
            .map(|row| {
                Ok(SizeRangeAggregate {
                    range: row.try_get("size_range")?,
                    volume_count: row.try_get("volume_count")?,
                    total_size: row.try_get("total_size")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        Ok(VolumeAggregates {
            total_volumes,
            active_volumes,
            drivers,
            size_ranges,
        })
    }
}

/// Anonymous volumes get 64-char hex names from the runtime.
const ANONYMOUS_NAME_PREDICATE: &str =
    "(length(v.name) = 64 AND NOT v.name GLOB '*[^0-9a-f]*')";

fn push_filters(query: &mut QueryBuilder<'_, sqlx::Sqlite>, filter: &VolumeFilter) {
    query.push(" WHERE v.is_active = 1");

    if let Some(driver) = &filter.driver {
        query.push(" AND v.driver = ");
        query.push_bind(driver.clone());
    }
    if let Some(label) = &filter.label {
        query.push(" AND v.labels LIKE ");
        query.push_bind(format!("%{label}%"));
    }
    if let Some(search) = &filter.search {
        let pattern = format!("%{search}%");
        query.push(" AND (v.name LIKE ");
        query.push_bind(pattern.clone());
        query.push(" OR v.driver LIKE ");
        query.push_bind(pattern);
        query.push(")");
    }
    if let Some(after) = filter.created_after {
        query.push(" AND v.created_at >= ");
        query.push_bind(after);
    }
    if let Some(before) = filter.created_before {
        query.push(" AND v.created_at <= ");
        query.push_bind(before);
    }
    if filter.orphaned {
        query.push(
            " AND NOT EXISTS (SELECT 1 FROM volume_mounts m \
             WHERE m.volume_id = v.volume_id AND m.is_active = 1)",
        );
    }
    if filter.system {
        query.push(" AND ");
        query.push(ANONYMOUS_NAME_PREDICATE);
    }
    if filter.user_only {
        query.push(" AND NOT ");
        query.push(ANONYMOUS_NAME_PREDICATE);
    }
}
