//! Event ingester — consumes the runtime event stream through a bounded
//! queue, dispatches to the processor, reconnects with jittered exponential
//! backoff, and drives periodic full reconciliation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, MissedTickBehavior};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::model::RuntimeEvent;
use super::processor::ProcessEvent;
use super::reconciler::Reconcile;
use crate::config::EventsConfig;
use crate::docker::RuntimeClient;
use crate::metrics::{MetricsSnapshot, ServiceMetrics};

/// Per-event processing deadline.
const PROCESS_TIMEOUT: Duration = Duration::from_secs(30);

pub struct EventIngester {
    runtime: Arc<dyn RuntimeClient>,
    processor: Arc<dyn ProcessEvent>,
    reconciler: Arc<dyn Reconcile>,
    cfg: EventsConfig,
    metrics: ServiceMetrics,
    connected: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl EventIngester {
    pub fn new(
        runtime: Arc<dyn RuntimeClient>,
        processor: Arc<dyn ProcessEvent>,
        reconciler: Arc<dyn Reconcile>,
        cfg: EventsConfig,
        metrics: ServiceMetrics,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            runtime,
            processor,
            reconciler,
            cfg,
            metrics,
            connected: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the stream, processing, and reconciliation workers.
    pub fn start(&self) {
        let (tx, rx) = mpsc::channel(self.cfg.queue_size);

        let mut workers = self.workers.lock();
        workers.push(self.spawn_stream_worker(tx));
        workers.push(self.spawn_processing_worker(rx));
        workers.push(self.spawn_reconcile_worker());
        info!(
            queue_size = self.cfg.queue_size,
            reconcile_interval_secs = self.cfg.reconcile_interval.as_secs(),
            "event ingester started"
        );
    }

    /// Signal shutdown and wait (bounded by `shutdown_grace`) for workers to
    /// drain. In-flight events finish or hit their timeout; dropped events
    /// are not retried.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        let grace = self.cfg.shutdown_grace;
        for worker in workers {
            let abort = worker.abort_handle();
            if timeout(grace, worker).await.is_err() {
                warn!("worker did not stop within grace period, aborting");
                abort.abort();
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        info!("event ingester stopped");
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn spawn_stream_worker(&self, tx: mpsc::Sender<RuntimeEvent>) -> JoinHandle<()> {
        let runtime = Arc::clone(&self.runtime);
        let metrics = self.metrics.clone();
        let connected = Arc::clone(&self.connected);
        let mut shutdown = self.shutdown_tx.subscribe();
        let mut backoff = Backoff::new(self.cfg.backoff_min, self.cfg.backoff_max);

        tokio::spawn(async move {
            loop {
                let mut stream = runtime.subscribe_events();
                connected.store(true, Ordering::SeqCst);
                debug!("event stream opened");

                // The stream must survive indefinite inactivity; only an
                // explicit error or end-of-stream breaks the inner loop.
                let mut stream_failed = false;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => return,
                        item = stream.next() => match item {
                            Some(Ok(event)) => {
                                backoff.reset();
                                try_enqueue(&tx, event, &metrics);
                            }
                            Some(Err(e)) => {
                                warn!(error = %e, "event stream error");
                                stream_failed = true;
                                break;
                            }
                            None => {
                                warn!("event stream closed by the daemon");
                                stream_failed = true;
                                break;
                            }
                        }
                    }
                }

                connected.store(false, Ordering::SeqCst);
                if !stream_failed {
                    return;
                }

                let delay = backoff.next_delay();
                metrics.reconnect();
                info!(delay_ms = delay.as_millis() as u64, "reconnecting to event stream");
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = time::sleep(delay) => {}
                }
            }
        })
    }

    fn spawn_processing_worker(&self, mut rx: mpsc::Receiver<RuntimeEvent>) -> JoinHandle<()> {
        let processor = Arc::clone(&self.processor);
        let metrics = self.metrics.clone();
        let mut shutdown = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.changed() => return,
                    event = rx.recv() => match event {
                        Some(event) => event,
                        None => return,
                    },
                };

                match timeout(PROCESS_TIMEOUT, processor.process(&event)).await {
                    Ok(Ok(())) => metrics.event_processed(event.kind.as_str()),
                    Ok(Err(e)) => {
                        metrics.event_error("processing");
                        warn!(
                            kind = event.kind.as_str(),
                            action = event.action.as_str(),
                            id = %event.id,
                            error = %e,
                            "event processing failed"
                        );
                    }
                    Err(_) => {
                        metrics.event_error("timeout");
                        error!(
                            kind = event.kind.as_str(),
                            id = %event.id,
                            "event processing timed out"
                        );
                    }
                }
            }
        })
    }

    fn spawn_reconcile_worker(&self) -> JoinHandle<()> {
        let reconciler = Arc::clone(&self.reconciler);
        let mut shutdown = self.shutdown_tx.subscribe();
        let reconcile_interval = self.cfg.reconcile_interval;

        tokio::spawn(async move {
            // The first tick fires immediately: that is the startup full pass.
            let mut interval = time::interval(reconcile_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {
                        if let Err(e) = reconciler.full_reconcile().await {
                            warn!(error = %e, "full reconciliation failed");
                        }
                    }
                }
            }
        })
    }
}

/// Non-blocking enqueue with drop-on-full. The runtime stream is never
/// blocked by slow processing; overflow is observable via `dropped_total`.
fn try_enqueue(tx: &mpsc::Sender<RuntimeEvent>, event: RuntimeEvent, metrics: &ServiceMetrics) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            metrics.event_dropped();
            debug!(
                kind = event.kind.as_str(),
                id = %event.id,
                "event queue full, dropping event"
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event queue closed, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::{DockerError, MockRuntimeClient};
    use crate::events::model::{EventAction, EventKind};
    use crate::events::reconciler::MockReconcile;
    use async_trait::async_trait;
    use chrono::Utc;
    use futures_util::stream;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    fn event(id: &str) -> RuntimeEvent {
        RuntimeEvent {
            kind: EventKind::Volume,
            id: id.to_string(),
            name: id.to_string(),
            action: EventAction::Create,
            time: Utc::now(),
            attributes: HashMap::new(),
        }
    }

    fn events_config() -> EventsConfig {
        EventsConfig {
            enabled: true,
            queue_size: 1024,
            backoff_min: Duration::from_millis(10),
            backoff_max: Duration::from_millis(50),
            reconcile_interval: Duration::from_secs(600),
            shutdown_grace: Duration::from_secs(1),
        }
    }

    struct CountingProcessor {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl ProcessEvent for CountingProcessor {
        async fn process(&self, _event: &RuntimeEvent) -> anyhow::Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingProcessor;

    #[async_trait]
    impl ProcessEvent for FailingProcessor {
        async fn process(&self, _event: &RuntimeEvent) -> anyhow::Result<()> {
            anyhow::bail!("handler exploded")
        }
    }

    fn quiet_reconciler() -> Arc<MockReconcile> {
        let mut reconciler = MockReconcile::new();
        reconciler.expect_full_reconcile().returning(|| Ok(()));
        Arc::new(reconciler)
    }

    async fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
        let started = std::time::Instant::now();
        while started.elapsed() < deadline {
            if check() {
                return true;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[test]
    fn test_try_enqueue_drops_when_full() {
        // Queue capacity 2, five volume events: the first two are queued and
        // the remaining three are dropped.
        let metrics = ServiceMetrics::new();
        let (tx, mut rx) = mpsc::channel(2);

        for i in 1..=5 {
            try_enqueue(&tx, event(&format!("v{i}")), &metrics);
        }

        assert_eq!(metrics.events_dropped(), 3);
        assert_eq!(rx.try_recv().unwrap().id, "v1");
        assert_eq!(rx.try_recv().unwrap().id, "v2");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_events_flow_through_to_processor() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_subscribe_events().returning(|| {
            let items = vec![Ok(event("v1")), Ok(event("v2")), Ok(event("v3"))];
            Box::pin(stream::iter(items).chain(stream::pending()))
        });

        let processor = Arc::new(CountingProcessor {
            seen: AtomicUsize::new(0),
        });
        let metrics = ServiceMetrics::new();
        let ingester = EventIngester::new(
            Arc::new(runtime),
            processor.clone(),
            quiet_reconciler(),
            events_config(),
            metrics.clone(),
        );

        ingester.start();
        assert!(
            wait_until(Duration::from_secs(2), || {
                processor.seen.load(Ordering::SeqCst) == 3
            })
            .await
        );
        assert!(ingester.is_connected());
        assert_eq!(ingester.metrics().events_processed.get("volume"), Some(&3));

        ingester.stop().await;
        assert!(!ingester.is_connected());
    }

    #[tokio::test]
    async fn test_processing_errors_are_counted_and_skipped() {
        let mut runtime = MockRuntimeClient::new();
        runtime.expect_subscribe_events().returning(|| {
            let items = vec![Ok(event("v1")), Ok(event("v2"))];
            Box::pin(stream::iter(items).chain(stream::pending()))
        });

        let metrics = ServiceMetrics::new();
        let ingester = EventIngester::new(
            Arc::new(runtime),
            Arc::new(FailingProcessor),
            quiet_reconciler(),
            events_config(),
            metrics.clone(),
        );

        ingester.start();
        assert!(
            wait_until(Duration::from_secs(2), || {
                metrics.snapshot().event_errors.get("processing") == Some(&2)
            })
            .await
        );
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_stream_errors_trigger_backoff_reconnects() {
        // The stream fails twice, then stays healthy: two reconnects.
        let attempts = Arc::new(AtomicUsize::new(0));
        let attempts_in_mock = attempts.clone();

        let mut runtime = MockRuntimeClient::new();
        runtime.expect_subscribe_events().returning(move || {
            let attempt = attempts_in_mock.fetch_add(1, Ordering::SeqCst);
            if attempt < 2 {
                Box::pin(stream::iter(vec![Err(DockerError::StreamClosed)]))
            } else {
                Box::pin(stream::pending())
            }
        });

        let metrics = ServiceMetrics::new();
        let ingester = EventIngester::new(
            Arc::new(runtime),
            Arc::new(CountingProcessor {
                seen: AtomicUsize::new(0),
            }),
            quiet_reconciler(),
            events_config(),
            metrics.clone(),
        );

        ingester.start();
        assert!(
            wait_until(Duration::from_secs(2), || metrics.reconnects() == 2).await
        );
        assert!(
            wait_until(Duration::from_secs(2), || {
                attempts.load(Ordering::SeqCst) == 3
            })
            .await
        );
        assert!(ingester.is_connected());
        ingester.stop().await;
    }

    #[tokio::test]
    async fn test_initial_reconcile_fires_on_start() {
        let mut runtime = MockRuntimeClient::new();
        runtime
            .expect_subscribe_events()
            .returning(|| Box::pin(stream::pending()));

        let reconciled = Arc::new(AtomicUsize::new(0));
        let reconciled_in_mock = reconciled.clone();
        let mut reconciler = MockReconcile::new();
        reconciler.expect_full_reconcile().returning(move || {
            reconciled_in_mock.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let ingester = EventIngester::new(
            Arc::new(runtime),
            Arc::new(CountingProcessor {
                seen: AtomicUsize::new(0),
            }),
            Arc::new(reconciler),
            events_config(),
            ServiceMetrics::new(),
        );

        ingester.start();
        assert!(
            wait_until(Duration::from_secs(2), || {
                reconciled.load(Ordering::SeqCst) >= 1
            })
            .await
        );
        ingester.stop().await;
    }
}
