//! Process-local scan result cache with write-through persistence.
//!
//! The in-memory map is the hot path and must be safe for concurrent use;
//! the `scan_cache` table is the durable side so warm entries survive a
//! restart. Persistence failures are logged and never fail the caller.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::method::ScanReport;
use crate::store::model::ScanCacheRecord;
use crate::store::scan_cache::ScanCacheRepository;

#[derive(Debug, Clone)]
struct CacheEntry {
    report: ScanReport,
    expires_at: DateTime<Utc>,
    hit_count: i64,
    last_accessed: DateTime<Utc>,
    is_valid: bool,
}

pub struct ScanCache {
    entries: DashMap<String, CacheEntry>,
    repo: ScanCacheRepository,
    capacity: usize,
}

impl ScanCache {
    pub fn new(repo: ScanCacheRepository, capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            repo,
            capacity: capacity.max(1),
        }
    }

    /// Unexpired valid entry for a volume, or `None`. Falls back to the
    /// durable row when the in-memory map has no entry (fresh process).
    pub async fn get(&self, volume_id: &str) -> Option<ScanReport> {
        let now = Utc::now();

        let memory_hit = {
            match self.entries.get_mut(volume_id) {
                Some(mut entry) => {
                    if entry.is_valid && entry.expires_at > now {
                        entry.hit_count += 1;
                        entry.last_accessed = now;
                        Some(entry.report.clone())
                    } else {
                        drop(entry);
                        self.entries.remove(volume_id);
                        return None;
                    }
                }
                None => None,
            }
        };

        if let Some(report) = memory_hit {
            if let Err(e) = self.repo.touch(volume_id, now).await {
                debug!(volume_id, error = %e, "failed to record cache hit");
            }
            return Some(report);
        }

        // Cold map: consult the durable side.
        match self.repo.get(volume_id).await {
            Ok(Some(row)) if row.is_valid && row.expires_at > now => {
                let report: ScanReport = match serde_json::from_str(&row.result) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!(volume_id, error = %e, "discarding undecodable cache row");
                        let _ = self.repo.delete_by_volume(volume_id).await;
                        return None;
                    }
                };
                self.entries.insert(
                    volume_id.to_string(),
                    CacheEntry {
                        report: report.clone(),
                        expires_at: row.expires_at,
                        hit_count: row.hit_count + 1,
                        last_accessed: now,
                        is_valid: true,
                    },
                );
                if let Err(e) = self.repo.touch(volume_id, now).await {
                    debug!(volume_id, error = %e, "failed to record cache hit");
                }
                Some(report)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(volume_id, error = %e, "cache lookup against store failed");
                None
            }
        }
    }

    /// Store a report under the volume id with the given TTL.
    pub async fn put(&self, report: &ScanReport, ttl: Duration) {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300));

        if self.entries.len() >= self.capacity && !self.entries.contains_key(&report.volume_id) {
            self.evict_soonest_expiring();
        }

        self.entries.insert(
            report.volume_id.clone(),
            CacheEntry {
                report: report.clone(),
                expires_at,
                hit_count: 0,
                last_accessed: now,
                is_valid: true,
            },
        );

        let record = ScanCacheRecord {
            cache_key: report.volume_id.clone(),
            volume_id: report.volume_id.clone(),
            result: serde_json::to_string(report).unwrap_or_else(|_| "{}".to_string()),
            expires_at,
            hit_count: 0,
            last_accessed: now,
            is_valid: true,
            created_at: now,
        };
        if let Err(e) = self.repo.put(&record).await {
            warn!(volume_id = %report.volume_id, error = %e, "cache write-through failed");
        }
        if let Err(e) = self.repo.purge_expired(now).await {
            debug!(error = %e, "cache purge failed");
        }
    }

    pub async fn invalidate(&self, volume_id: &str) {
        self.entries.remove(volume_id);
        if let Err(e) = self.repo.delete_by_volume(volume_id).await {
            warn!(volume_id, error = %e, "cache invalidation against store failed");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_soonest_expiring(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.expires_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = victim {
            self.entries.remove(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn clear_memory(&self) {
        self.entries.clear();
    }
}
