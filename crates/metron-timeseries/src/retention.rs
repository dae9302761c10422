//! Metron Time Series Retention
//!
//! Background deletion of points older than the retention horizon. Each
//! sweep removes points in bounded chunks, every chunk atomic on its own,
//! so ingestion and aggregation keep running while a sweep is in progress.
//! The store is compacted once enough deletions have built up across sweeps.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::timeout::bounded;
use chrono::{DateTime, Utc};
use metron_common::config::RetentionConfig;
use metron_storage::ValueStore;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

// =============================================================================
// Sweep Report
// =============================================================================

/// Outcome of one retention sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub deleted: usize,
    pub chunks: usize,
    pub elapsed_ms: u64,
    /// False when a chunk failed and the sweep stopped early.
    pub completed: bool,
    /// Whether the store was compacted at the end of this sweep.
    pub compacted: bool,
}

/// Whether a sweep is currently executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweeperState {
    Idle,
    Running,
}

// =============================================================================
// Sweep Execution
// =============================================================================

struct SweepCore {
    store: Arc<dyn ValueStore>,
    config: RetentionConfig,
    timeout: Duration,
    running: AtomicBool,
    /// Rows deleted since the store was last compacted.
    pending_compaction: AtomicUsize,
    last_report: RwLock<Option<SweepReport>>,
}

/// Resets the running flag however the sweep ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SweepCore {
    async fn sweep(&self, cutoff: DateTime<Utc>) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Retention sweep already running; skipping");
            return None;
        }
        let _guard = RunGuard(&self.running);

        let started = Instant::now();
        let chunk_size = self.config.chunk_size.max(1);
        let mut report = SweepReport {
            cutoff,
            deleted: 0,
            chunks: 0,
            elapsed_ms: 0,
            completed: true,
            compacted: false,
        };

        loop {
            let result = bounded(
                self.timeout,
                "delete_before",
                self.store.delete_before(cutoff, chunk_size),
            )
            .await;

            match result {
                Ok(deleted) => {
                    report.deleted += deleted;
                    if deleted > 0 {
                        report.chunks += 1;
                    }
                    if deleted < chunk_size {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        "Retention sweep stopped after {} points: {}",
                        report.deleted,
                        e
                    );
                    report.completed = false;
                    break;
                }
            }

            // Let writers and readers in between chunks.
            tokio::task::yield_now().await;
        }

        let pending =
            self.pending_compaction.fetch_add(report.deleted, Ordering::SeqCst) + report.deleted;
        if report.deleted > 0 && pending >= self.config.compact_after_deletes {
            match bounded(self.timeout, "compact", self.store.compact()).await {
                Ok(()) => {
                    self.pending_compaction.fetch_sub(pending, Ordering::SeqCst);
                    report.compacted = true;
                }
                Err(e) => tracing::warn!("Compaction after retention sweep failed: {}", e),
            }
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            "Retention sweep removed {} points older than {} in {} chunks ({}ms)",
            report.deleted,
            report.cutoff,
            report.chunks,
            report.elapsed_ms
        );

        *self.last_report.write() = Some(report.clone());
        Some(report)
    }
}

// =============================================================================
// Retention Sweeper
// =============================================================================

struct SweeperTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Deletes expired points on a schedule or on demand.
pub struct RetentionSweeper {
    core: Arc<SweepCore>,
    task: Mutex<Option<SweeperTask>>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn ValueStore>, config: RetentionConfig, timeout: Duration) -> Self {
        Self {
            core: Arc::new(SweepCore {
                store,
                config,
                timeout,
                running: AtomicBool::new(false),
                pending_compaction: AtomicUsize::new(0),
                last_report: RwLock::new(None),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SweeperState {
        if self.core.running.load(Ordering::SeqCst) {
            SweeperState::Running
        } else {
            SweeperState::Idle
        }
    }

    /// Current deletion cutoff.
    pub fn cutoff(&self) -> DateTime<Utc> {
        Utc::now() - self.core.config.horizon()
    }

    /// Sweep immediately. Returns `None` if a sweep is already running.
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        self.core.sweep(self.cutoff()).await
    }

    /// Sweep everything recorded before `cutoff`.
    pub async fn sweep_with_cutoff(&self, cutoff: DateTime<Utc>) -> Option<SweepReport> {
        self.core.sweep(cutoff).await
    }

    pub fn last_report(&self) -> Option<SweepReport> {
        self.core.last_report.read().clone()
    }

    pub fn is_scheduled(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Spawn the scheduled sweep task. The first sweep runs immediately.
    /// Returns false if the task is already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let core = Arc::clone(&self.core);
        let period = core.config.sweep_interval().max(Duration::from_secs(1));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let cutoff = Utc::now() - core.config.horizon();
                        core.sweep(cutoff).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Retention sweeper task exited");
        });

        tracing::info!(
            "Retention sweeper started: horizon {} days, interval {:?}",
            self.core.config.retention_days,
            period
        );
        *task = Some(SweeperTask { shutdown, handle });
        true
    }

    /// Signal the scheduled task and wait for it. An in-progress sweep
    /// finishes its current run first.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            tracing::warn!("Retention sweeper task failed: {}", e);
        }
        tracing::info!("Retention sweeper stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use metron_common::{Decimal, MetricKind, NewPoint};
    use metron_storage::MemoryStore;

    async fn seeded_store(old: i64, fresh: i64) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let (metric, _) = store
            .get_or_create_metric("requests", MetricKind::Counter)
            .await
            .expect("create should succeed");

        let now = Utc::now();
        let mut batch = Vec::new();
        for i in 0..old {
            batch.push(NewPoint {
                metric_id: metric.id,
                value: Decimal::ONE,
                recorded_at: now - ChronoDuration::days(45) + ChronoDuration::seconds(i),
            });
        }
        for i in 0..fresh {
            batch.push(NewPoint {
                metric_id: metric.id,
                value: Decimal::ONE,
                recorded_at: now - ChronoDuration::days(1) + ChronoDuration::seconds(i),
            });
        }
        store.insert_batch(batch).await.expect("insert should succeed");
        store
    }

    fn config(chunk_size: usize) -> RetentionConfig {
        RetentionConfig {
            chunk_size,
            ..RetentionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = seeded_store(25, 7).await;
        let sweeper = RetentionSweeper::new(store.clone(), config(10), Duration::from_secs(5));

        let report = sweeper.sweep_now().await.expect("sweep should run");
        assert!(report.completed);
        assert_eq!(report.deleted, 25);
        assert_eq!(report.chunks, 3);
        assert_eq!(store.count_points(None).await.expect("count"), 7);
        assert_eq!(sweeper.last_report(), Some(report));
        assert_eq!(sweeper.state(), SweeperState::Idle);
    }

    #[tokio::test]
    async fn test_compaction_waits_for_enough_deletions() {
        let store = seeded_store(25, 0).await;
        let retention = RetentionConfig {
            compact_after_deletes: 30,
            ..config(10)
        };
        let sweeper = RetentionSweeper::new(store.clone(), retention, Duration::from_secs(5));

        let first = sweeper.sweep_now().await.expect("sweep should run");
        assert_eq!(first.deleted, 25);
        assert!(!first.compacted);

        let (metric, _) = store
            .get_or_create_metric("requests", MetricKind::Counter)
            .await
            .expect("lookup should succeed");
        let old = Utc::now() - ChronoDuration::days(60);
        let batch = (0..10)
            .map(|i| NewPoint {
                metric_id: metric.id,
                value: Decimal::ONE,
                recorded_at: old + ChronoDuration::seconds(i),
            })
            .collect();
        store.insert_batch(batch).await.expect("insert should succeed");

        let second = sweeper.sweep_now().await.expect("sweep should run");
        assert_eq!(second.deleted, 10);
        assert!(second.compacted);

        let third = sweeper.sweep_now().await.expect("sweep should run");
        assert_eq!(third.deleted, 0);
        assert!(!third.compacted);
    }

    #[tokio::test]
    async fn test_sweep_with_nothing_expired() {
        let store = seeded_store(0, 5).await;
        let sweeper = RetentionSweeper::new(store.clone(), config(10), Duration::from_secs(5));

        let report = sweeper.sweep_now().await.expect("sweep should run");
        assert_eq!(report.deleted, 0);
        assert_eq!(report.chunks, 0);
        assert!(report.completed);
    }

    #[tokio::test]
    async fn test_overlapping_sweep_is_skipped() {
        let store = seeded_store(5, 0).await;
        let sweeper = RetentionSweeper::new(store, config(10), Duration::from_secs(5));

        sweeper.core.running.store(true, Ordering::SeqCst);
        assert_eq!(sweeper.state(), SweeperState::Running);
        assert!(sweeper.sweep_now().await.is_none());

        sweeper.core.running.store(false, Ordering::SeqCst);
        assert!(sweeper.sweep_now().await.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_task_sweeps_and_stops() {
        let store = seeded_store(12, 3).await;
        let sweeper = RetentionSweeper::new(store.clone(), config(5), Duration::from_secs(5));

        assert!(sweeper.start());
        assert!(!sweeper.start());

        for _ in 0..100 {
            if sweeper.last_report().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweeper.stop().await;

        assert!(!sweeper.is_scheduled());
        let report = sweeper.last_report().expect("scheduled sweep should have run");
        assert_eq!(report.deleted, 12);
        assert_eq!(store.count_points(None).await.expect("count"), 3);
    }
}
