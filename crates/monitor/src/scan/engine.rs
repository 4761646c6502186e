//! Scan engine — cache probe, concurrency admission, method fallback,
//! result validation, annotation, persistence, and async job tracking.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use super::cache::ScanCache;
use super::diskus::DiskusMethod;
use super::du::DuMethod;
use super::error::{ScanError, ScanErrorCode};
use super::fstype;
use super::method::{MethodInfo, ProgressSender, ScanMethod, ScanReport};
use super::native::NativeMethod;
use crate::config::ScanConfig;
use crate::docker::{DockerError, RuntimeClient};
use crate::metrics::ServiceMetrics;
use crate::store::model::{JobStatus, NewScanResult, NewVolumeMetric};
use crate::store::Store;

const GIB: i64 = 1 << 30;

/// Snapshot of an async scan visible to pollers. The job worker is the sole
/// writer until the job reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct JobProgress {
    pub scan_id: String,
    pub volume_id: String,
    pub status: JobStatus,
    pub progress: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct ScanEngine {
    runtime: Arc<dyn RuntimeClient>,
    methods: Vec<Arc<dyn ScanMethod>>,
    semaphore: Arc<Semaphore>,
    cache: Arc<ScanCache>,
    store: Store,
    metrics: ServiceMetrics,
    cfg: ScanConfig,
    jobs: DashMap<String, JobProgress>,
}

impl ScanEngine {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        methods: Vec<Arc<dyn ScanMethod>>,
        cache: Arc<ScanCache>,
        store: Store,
        metrics: ServiceMetrics,
        cfg: ScanConfig,
    ) -> Self {
        Self {
            runtime,
            methods,
            semaphore: Arc::new(Semaphore::new(cfg.max_concurrent)),
            cache,
            store,
            metrics,
            cfg,
            jobs: DashMap::new(),
        }
    }

    /// The built-in registry in preferred order: fast external tool, then the
    /// standard tool, then the in-process walker.
    pub fn default_methods() -> Vec<Arc<dyn ScanMethod>> {
        vec![
            Arc::new(DiskusMethod::new()),
            Arc::new(DuMethod::new()),
            Arc::new(NativeMethod::new()),
        ]
    }

    /// Synchronous scan. Serves from the cache when possible; otherwise may
    /// block on admission until a slot frees up.
    pub async fn scan_volume(&self, volume_id: &str) -> Result<ScanReport, ScanError> {
        self.scan_volume_with(volume_id, None).await
    }

    /// Synchronous scan with an optional method override. An explicit method
    /// request bypasses the cache probe.
    pub async fn scan_volume_with(
        &self,
        volume_id: &str,
        preferred: Option<&str>,
    ) -> Result<ScanReport, ScanError> {
        if preferred.is_none() {
            if let Some(hit) = self.cache.get(volume_id).await {
                self.metrics.cache_hit();
                return Ok(hit);
            }
            self.metrics.cache_miss();
        }

        let (report, _) = self.run_scan(volume_id, preferred, None).await?;
        Ok(report)
    }

    /// Start an async scan and return its id immediately. Progress is
    /// tracked in memory and mirrored to the scan_jobs table.
    pub async fn scan_volume_async(
        self: &Arc<Self>,
        volume_id: &str,
        preferred: Option<String>,
    ) -> Result<String, ScanError> {
        let mut scan_id = format!("scan_{}_{}", volume_id, Utc::now().timestamp());
        if self.jobs.contains_key(&scan_id) {
            // Same volume twice within a second; fall back to nanoseconds.
            scan_id = format!(
                "scan_{}_{}",
                volume_id,
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            );
        }

        let estimated = self
            .estimate_for(preferred.as_deref())
            .as_nanos()
            .min(i64::MAX as u128) as i64;
        self.store
            .scan_jobs
            .create(
                &scan_id,
                volume_id,
                preferred.as_deref().unwrap_or(""),
                Some(estimated),
            )
            .await
            .map_err(|e| {
                ScanError::new(
                    ScanErrorCode::ScanQueueTimeout,
                    "failed to enqueue scan job",
                )
                .with_context("volume_id", volume_id)
                .with_cause(e)
            })?;

        self.jobs.insert(
            scan_id.clone(),
            JobProgress {
                scan_id: scan_id.clone(),
                volume_id: volume_id.to_string(),
                status: JobStatus::Queued,
                progress: 0,
                current_path: None,
                error: None,
            },
        );

        let engine = Arc::clone(self);
        let job_scan_id = scan_id.clone();
        let job_volume_id = volume_id.to_string();
        let handle = tokio::spawn(async move {
            engine
                .run_async_job(job_scan_id, job_volume_id, preferred)
                .await;
        });

        // Worker boundary: a panic is logged, counted, and turns the job
        // into a failed terminal state instead of killing the runtime.
        let engine = Arc::clone(self);
        let watched_scan_id = scan_id.clone();
        tokio::spawn(async move {
            if let Err(join_err) = handle.await {
                if join_err.is_panic() {
                    engine.metrics.worker_panic();
                    error!(scan_id = %watched_scan_id, "scan worker panicked");
                    engine
                        .mark_job_failed(&watched_scan_id, "scan worker panicked")
                        .await;
                }
            }
        });

        Ok(scan_id)
    }

    /// Progress snapshot for a scan id: the in-memory view when the process
    /// ran the job, otherwise the persisted row.
    pub async fn get_scan_progress(&self, scan_id: &str) -> Option<JobProgress> {
        if let Some(progress) = self.jobs.get(scan_id) {
            return Some(progress.clone());
        }
        match self.store.scan_jobs.get_by_scan_id(scan_id).await {
            Ok(Some(job)) => Some(JobProgress {
                scan_id: job.scan_id,
                volume_id: job.volume_id,
                status: job.status,
                progress: job.progress,
                current_path: None,
                error: job.error,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(scan_id, error = %e, "failed to load scan job");
                None
            }
        }
    }

    pub async fn available_methods(&self) -> Vec<MethodInfo> {
        let mut out = Vec::with_capacity(self.methods.len());
        for method in &self.methods {
            out.push(MethodInfo {
                name: method.name(),
                available: method.available().await,
                supports_progress: method.supports_progress(),
                estimated_duration_ms: method
                    .estimated_duration(Path::new("/"))
                    .as_millis()
                    .min(u64::MAX as u128) as u64,
            });
        }
        out
    }

    pub async fn invalidate_cache(&self, volume_id: &str) {
        self.cache.invalidate(volume_id).await;
    }

    /// Cache peek for read paths that must never trigger a scan.
    pub async fn cached_report(&self, volume_id: &str) -> Option<ScanReport> {
        self.cache.get(volume_id).await
    }

    /// The full scan pipeline behind the cache: admission, path resolution,
    /// validation, ordered method fallback, annotation, cache write,
    /// persistence. Returns the report and the persisted result row id.
    async fn run_scan(
        &self,
        volume_id: &str,
        preferred: Option<&str>,
        progress: Option<ProgressSender>,
    ) -> Result<(ScanReport, Option<i64>), ScanError> {
        self.metrics.scan_attempt();

        let _permit = match timeout(self.cfg.default_timeout, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(self.fail(
                    ScanError::new(ScanErrorCode::ScanQueueTimeout, "scan engine is shut down")
                        .with_context("volume_id", volume_id),
                ));
            }
            Err(_) => {
                return Err(self.fail(
                    ScanError::new(
                        ScanErrorCode::ScanQueueTimeout,
                        "timed out waiting for a scan slot",
                    )
                    .with_context("volume_id", volume_id),
                ));
            }
        };

        let volume = self.runtime.inspect_volume(volume_id).await.map_err(|e| {
            let err = match e {
                DockerError::VolumeNotFound(_) => ScanError::new(
                    ScanErrorCode::VolumeNotFound,
                    format!("volume not found: {volume_id}"),
                ),
                other => ScanError::new(
                    ScanErrorCode::PathNotFound,
                    format!("failed to resolve mountpoint for {volume_id}"),
                )
                .with_cause(other),
            };
            self.fail(err.with_context("volume_id", volume_id))
        })?;

        if volume.mountpoint.is_empty() {
            return Err(self.fail(
                ScanError::new(
                    ScanErrorCode::PathNotFound,
                    format!("volume {volume_id} has no mountpoint"),
                )
                .with_context("volume_id", volume_id),
            ));
        }
        let path = PathBuf::from(&volume.mountpoint);

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(self.fail(
                    ScanError::new(
                        ScanErrorCode::PathValidationFailed,
                        "mountpoint is not a directory",
                    )
                    .with_path(&path),
                ));
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(self.fail(
                    ScanError::new(ScanErrorCode::PermissionDenied, "mountpoint is not readable")
                        .with_path(&path)
                        .with_cause(e),
                ));
            }
            Err(e) => {
                return Err(self.fail(
                    ScanError::new(
                        ScanErrorCode::PathValidationFailed,
                        "mountpoint does not exist",
                    )
                    .with_path(&path)
                    .with_cause(e),
                ));
            }
        }

        let cancel = CancellationToken::new();
        let mut attempted: Vec<&'static str> = Vec::new();

        for method in &self.methods {
            if let Some(name) = preferred {
                if method.name() != name {
                    continue;
                }
            }
            attempted.push(method.name());

            if !method.available().await {
                debug!(method = method.name(), "scan method unavailable, skipping");
                continue;
            }

            let started = Instant::now();
            let run = method.scan(&path, cancel.clone(), progress.clone());
            match timeout(self.cfg.default_timeout, run).await {
                Err(_) => {
                    cancel.cancel();
                    return Err(self.fail(
                        ScanError::new(
                            ScanErrorCode::ScanTimeout,
                            format!("scan exceeded {:?}", self.cfg.default_timeout),
                        )
                        .with_path(&path)
                        .with_method(method.name()),
                    ));
                }
                Ok(Err(e)) => {
                    self.metrics.scan_failure(e.code.as_str());
                    warn!(method = method.name(), error = %e, "scan method failed");
                    continue;
                }
                Ok(Ok(outcome)) => {
                    if outcome.total_size < 0
                        || outcome.file_count < 0
                        || outcome.directory_count < 0
                    {
                        self.metrics
                            .scan_failure(ScanErrorCode::ResultValidationFailed.as_str());
                        warn!(method = method.name(), "scan produced negative counters");
                        continue;
                    }

                    let duration = started.elapsed();
                    self.metrics.scan_duration(method.name(), duration);

                    let report = ScanReport {
                        volume_id: volume_id.to_string(),
                        total_size: outcome.total_size,
                        file_count: outcome.file_count,
                        directory_count: outcome.directory_count,
                        largest_file: outcome.largest_file,
                        scan_method: method.name().to_string(),
                        scan_duration: duration.as_nanos().min(i64::MAX as u128) as i64,
                        filesystem_type: fstype::filesystem_type(&path),
                        scanned_at: Utc::now(),
                    };
                    debug!(
                        volume_id,
                        method = method.name(),
                        attempted = attempted.join(","),
                        total_size = report.total_size,
                        "scan complete"
                    );

                    let ttl = adaptive_ttl(self.cfg.cache_ttl, report.total_size);
                    self.cache.put(&report, ttl).await;
                    let result_id = self.persist(&report).await;
                    return Ok((report, result_id));
                }
            }
        }

        if preferred.is_some() && attempted.is_empty() {
            return Err(self.fail(
                ScanError::new(
                    ScanErrorCode::MethodUnavailable,
                    format!("requested method is not registered: {}", preferred.unwrap_or("")),
                )
                .with_context("volume_id", volume_id),
            ));
        }

        Err(self.fail(
            ScanError::new(ScanErrorCode::AllMethodsFailed, "every scan method failed")
                .with_path(&path)
                .with_context("attempted", attempted.join(",")),
        ))
    }

    /// Persist the result row, bump last_scanned, and append a metric point.
    /// Failures here are logged but never fail the scan that produced them.
    async fn persist(&self, report: &ScanReport) -> Option<i64> {
        let new_result = NewScanResult {
            volume_id: report.volume_id.clone(),
            total_size: report.total_size,
            file_count: report.file_count,
            directory_count: report.directory_count,
            largest_file: report.largest_file,
            scan_method: report.scan_method.clone(),
            scan_duration_ns: report.scan_duration,
            filesystem_type: report.filesystem_type.clone(),
            checksum: report_checksum(report),
            is_valid: true,
            error: None,
        };
        let result_id = match self.store.scan_results.insert(&new_result).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(volume_id = %report.volume_id, error = %e, "failed to persist scan result");
                None
            }
        };

        if let Err(e) = self
            .store
            .volumes
            .touch_last_scanned(&report.volume_id, report.scanned_at)
            .await
        {
            warn!(volume_id = %report.volume_id, error = %e, "failed to update last_scanned");
        }

        let container_count = self
            .store
            .mounts
            .count_active_by_volume(&report.volume_id)
            .await
            .unwrap_or(0);
        let previous = self
            .store
            .volume_metrics
            .latest_by_volume(&report.volume_id)
            .await
            .ok()
            .flatten();
        let growth_rate = previous
            .map(|prev| {
                let dt = (report.scanned_at - prev.metric_timestamp).num_seconds();
                if dt <= 0 {
                    0.0
                } else {
                    (report.total_size - prev.total_size) as f64 / dt as f64
                }
            })
            .unwrap_or(0.0);
        let access_frequency = match self.store.scan_cache.get(&report.volume_id).await {
            Ok(Some(row)) => row.hit_count as f64,
            _ => 0.0,
        };

        let metric = NewVolumeMetric {
            volume_id: report.volume_id.clone(),
            metric_timestamp: report.scanned_at,
            total_size: report.total_size,
            file_count: report.file_count,
            directory_count: report.directory_count,
            growth_rate,
            access_frequency,
            container_count,
        };
        if let Err(e) = self.store.volume_metrics.insert(&metric).await {
            warn!(volume_id = %report.volume_id, error = %e, "failed to append volume metric");
        }

        result_id
    }

    async fn run_async_job(
        self: Arc<Self>,
        scan_id: String,
        volume_id: String,
        preferred: Option<String>,
    ) {
        self.update_job(&scan_id, |job| {
            job.status = JobStatus::Running;
        });
        if let Err(e) = self.store.scan_jobs.set_running(&scan_id, Utc::now()).await {
            warn!(scan_id, error = %e, "failed to mark scan job running");
        }

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<crate::scan::method::ProgressUpdate>();
        let estimate = self.estimate_for(preferred.as_deref());
        let forwarder_engine = Arc::clone(&self);
        let forwarder_scan_id = scan_id.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                let percent = progress_percent(update.elapsed, estimate);
                forwarder_engine
                    .record_progress(&forwarder_scan_id, percent, update.current_path)
                    .await;
            }
        });

        let result = self
            .run_scan(&volume_id, preferred.as_deref(), Some(tx))
            .await;
        let _ = forwarder.await;

        match result {
            Ok((report, Some(result_id))) => {
                self.update_job(&scan_id, |job| {
                    job.status = JobStatus::Completed;
                    job.progress = 100;
                    job.error = None;
                });
                if let Err(e) = self
                    .store
                    .scan_jobs
                    .complete(&scan_id, result_id, &report.scan_method)
                    .await
                {
                    error!(scan_id, error = %e, "failed to complete scan job");
                }
            }
            Ok((_, None)) => {
                self.mark_job_failed(&scan_id, "scan succeeded but the result row was not persisted")
                    .await;
            }
            Err(e) => {
                self.mark_job_failed(&scan_id, &e.to_string()).await;
            }
        }
    }

    /// Monotonic progress update from the job worker.
    async fn record_progress(&self, scan_id: &str, percent: i64, current_path: String) {
        self.update_job(scan_id, |job| {
            job.progress = job.progress.max(percent);
            job.current_path = Some(current_path.clone());
        });
        if let Err(e) = self.store.scan_jobs.update_progress(scan_id, percent).await {
            debug!(scan_id, error = %e, "failed to persist scan progress");
        }
    }

    async fn mark_job_failed(&self, scan_id: &str, message: &str) {
        self.update_job(scan_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(message.to_string());
        });
        if let Err(e) = self
            .store
            .scan_jobs
            .finish_with_error(scan_id, JobStatus::Failed, message)
            .await
        {
            error!(scan_id, error = %e, "failed to mark scan job failed");
        }
    }

    fn update_job(&self, scan_id: &str, apply: impl FnOnce(&mut JobProgress)) {
        if let Some(mut job) = self.jobs.get_mut(scan_id) {
            apply(&mut job);
        }
    }

    fn estimate_for(&self, preferred: Option<&str>) -> Duration {
        let method = match preferred {
            Some(name) => self.methods.iter().find(|m| m.name() == name),
            None => self.methods.first(),
        };
        method
            .map(|m| m.estimated_duration(Path::new("/")))
            .unwrap_or(Duration::from_secs(60))
    }

    fn fail(&self, err: ScanError) -> ScanError {
        self.metrics.scan_failure(err.code.as_str());
        err
    }
}

/// TTL adapts to volume size: big volumes change slowly, tiny ones are cheap
/// to rescan.
fn adaptive_ttl(base: Duration, total_size: i64) -> Duration {
    if total_size > 100 * GIB {
        base * 2
    } else if total_size < GIB {
        base / 2
    } else {
        base
    }
}

fn progress_percent(elapsed: Duration, estimate: Duration) -> i64 {
    if estimate.is_zero() {
        return 50;
    }
    let percent = (elapsed.as_secs_f64() / estimate.as_secs_f64() * 100.0) as i64;
    percent.clamp(0, 95)
}

fn report_checksum(report: &ScanReport) -> String {
    let mut hasher = Sha256::new();
    hasher.update(report.volume_id.as_bytes());
    hasher.update(report.total_size.to_le_bytes());
    hasher.update(report.file_count.to_le_bytes());
    hasher.update(report.directory_count.to_le_bytes());
    hasher.update(report.largest_file.to_le_bytes());
    hasher.update(report.scan_method.as_bytes());
    format!("{:x}", hasher.finalize())
}
