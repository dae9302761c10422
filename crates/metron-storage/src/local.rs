//! Metron Local - Durable Local Store
//!
//! Value store persisted to a data directory. State is served from memory
//! and every mutation is written to the point log first; opening the store
//! replays the log, discarding any torn tail left by a crash.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backend::{ScanResult, StoreStats, ValueStore};
use crate::memory::MemoryStore;
use crate::wal::PointLog;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metron_common::{Metric, MetricId, MetricKind, NewPoint, Point, Result, TimeRange};
use std::path::{Path, PathBuf};

// =============================================================================
// Local Store
// =============================================================================

/// Local filesystem value store with crash recovery.
pub struct LocalStore {
    data_dir: PathBuf,
    inner: MemoryStore,
}

impl LocalStore {
    /// Open (or create) the store in `data_dir`.
    pub fn open(data_dir: impl Into<PathBuf>, sync_writes: bool) -> Result<Self> {
        let data_dir = data_dir.into();
        let (journal, recovery) = PointLog::open(&data_dir, sync_writes)?;

        if recovery.discarded_bytes > 0 {
            tracing::warn!(
                "Discarded {} bytes of incomplete writes from {}",
                recovery.discarded_bytes,
                journal.path().display()
            );
        }
        tracing::info!(
            "Recovered {} point log records from {}",
            recovery.mutations.len(),
            data_dir.display()
        );

        Ok(Self {
            data_dir,
            inner: MemoryStore::with_journal(journal, recovery),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }
}

#[async_trait]
impl ValueStore for LocalStore {
    async fn get_or_create_metric(&self, name: &str, kind: MetricKind) -> Result<(Metric, bool)> {
        self.inner.get_or_create_metric(name, kind).await
    }

    async fn find_metric(&self, name: &str) -> Result<Option<Metric>> {
        self.inner.find_metric(name).await
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        self.inner.list_metrics().await
    }

    async fn delete_metric(&self, name: &str) -> Result<Option<usize>> {
        self.inner.delete_metric(name).await
    }

    async fn insert_batch(&self, points: Vec<NewPoint>) -> Result<Vec<Point>> {
        self.inner.insert_batch(points).await
    }

    async fn scan(&self, metric_id: MetricId, range: &TimeRange, limit: usize) -> Result<ScanResult> {
        self.inner.scan(metric_id, range, limit).await
    }

    async fn scan_many(
        &self,
        metric_ids: &[MetricId],
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<ScanResult>> {
        self.inner.scan_many(metric_ids, range, limit).await
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>, max_rows: usize) -> Result<usize> {
        self.inner.delete_before(cutoff, max_rows).await
    }

    async fn count_points(&self, metric_id: Option<MetricId>) -> Result<usize> {
        self.inner.count_points(metric_id).await
    }

    async fn compact(&self) -> Result<()> {
        self.inner.compact().await
    }

    async fn sync(&self) -> Result<()> {
        self.inner.sync().await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::LOG_FILE_NAME;
    use chrono::Duration;
    use metron_common::Decimal;
    use std::io::Write;

    fn point(metric_id: MetricId, value: &str, recorded_at: DateTime<Utc>) -> NewPoint {
        NewPoint {
            metric_id,
            value: value.parse::<Decimal>().expect("valid decimal"),
            recorded_at,
        }
    }

    #[tokio::test]
    async fn test_reopen_recovers_state() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let now = Utc::now();

        let metric_id = {
            let store = LocalStore::open(dir.path(), true).expect("open should succeed");
            let (metric, _) = store
                .get_or_create_metric("disk.used", MetricKind::Value)
                .await
                .expect("create should succeed");
            store
                .insert_batch(vec![
                    point(metric.id, "1.5", now - Duration::minutes(2)),
                    point(metric.id, "2.25", now - Duration::minutes(1)),
                ])
                .await
                .expect("insert should succeed");
            metric.id
        };

        let store = LocalStore::open(dir.path(), true).expect("reopen should succeed");
        let metric = store
            .find_metric("disk.used")
            .await
            .expect("find should succeed")
            .expect("metric should survive reopen");
        assert_eq!(metric.id, metric_id);
        assert_eq!(metric.kind, MetricKind::Value);

        let range = TimeRange::new(now - Duration::hours(1), now);
        let scan = store.scan(metric.id, &range, 10).await.expect("scan should succeed");
        let values: Vec<String> = scan.points.iter().map(|p| p.value.to_string()).collect();
        assert_eq!(values, vec!["1.5", "2.25"]);

        // New ids continue past recovered ones.
        let (other, created) = store
            .get_or_create_metric("disk.free", MetricKind::Value)
            .await
            .expect("create should succeed");
        assert!(created);
        assert!(other.id > metric.id);
        let stored = store
            .insert_batch(vec![point(other.id, "3", now)])
            .await
            .expect("insert should succeed");
        assert!(stored[0].id > scan.points[1].id);
    }

    #[tokio::test]
    async fn test_deletions_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let now = Utc::now();

        {
            let store = LocalStore::open(dir.path(), false).expect("open should succeed");
            let (metric, _) = store
                .get_or_create_metric("events", MetricKind::Counter)
                .await
                .expect("create should succeed");
            store
                .insert_batch(vec![
                    point(metric.id, "1", now - Duration::days(60)),
                    point(metric.id, "1", now - Duration::days(1)),
                ])
                .await
                .expect("insert should succeed");
            assert_eq!(
                store.delete_before(now - Duration::days(30), 100).await.expect("delete"),
                1
            );
            store.sync().await.expect("sync should succeed");
        }

        let store = LocalStore::open(dir.path(), false).expect("reopen should succeed");
        assert_eq!(store.count_points(None).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_torn_batch_is_not_visible() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let now = Utc::now();

        {
            let store = LocalStore::open(dir.path(), true).expect("open should succeed");
            let (metric, _) = store
                .get_or_create_metric("temp", MetricKind::Value)
                .await
                .expect("create should succeed");
            store
                .insert_batch(vec![point(metric.id, "20", now)])
                .await
                .expect("insert should succeed");
        }

        // Simulate a crash halfway through writing the next record.
        let log_path = dir.path().join(LOG_FILE_NAME);
        {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&log_path)
                .expect("open log");
            file.write_all(&[9, 0, 0, 0, 0, 0, 0, 0, 2, 0xFF, 0, 0, 0, b'{'])
                .expect("write partial record");
        }

        let store = LocalStore::open(dir.path(), true).expect("reopen should succeed");
        assert_eq!(store.count_points(None).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_compact_preserves_live_state() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let now = Utc::now();

        {
            let store = LocalStore::open(dir.path(), false).expect("open should succeed");
            let (metric, _) = store
                .get_or_create_metric("queue.depth", MetricKind::Value)
                .await
                .expect("create should succeed");
            let batch = (0..50)
                .map(|i| point(metric.id, "1", now - Duration::days(i)))
                .collect();
            store.insert_batch(batch).await.expect("insert should succeed");
            store.delete_before(now - Duration::days(9) - Duration::hours(12), 1000).await.expect("delete");

            let before = std::fs::metadata(dir.path().join(LOG_FILE_NAME)).expect("metadata").len();
            store.compact().await.expect("compact should succeed");
            let after = std::fs::metadata(dir.path().join(LOG_FILE_NAME)).expect("metadata").len();
            assert!(after < before);
        }

        let store = LocalStore::open(dir.path(), false).expect("reopen should succeed");
        assert_eq!(store.count_points(None).await.expect("count"), 10);
        assert!(store.find_metric("queue.depth").await.expect("find").is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_writes_during_compaction_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let now = Utc::now();

        {
            let store = std::sync::Arc::new(LocalStore::open(dir.path(), false).expect("open should succeed"));
            let (metric, _) = store
                .get_or_create_metric("jobs", MetricKind::Counter)
                .await
                .expect("create should succeed");
            let seed = (0..2_000)
                .map(|i| point(metric.id, "1", now - Duration::seconds(i)))
                .collect();
            store.insert_batch(seed).await.expect("insert should succeed");

            let writer = {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move {
                    for i in 0..200 {
                        store
                            .insert_batch(vec![point(metric.id, "1", now + Duration::seconds(i))])
                            .await
                            .expect("insert during compaction should succeed");
                        tokio::task::yield_now().await;
                    }
                })
            };
            for _ in 0..5 {
                store.compact().await.expect("compact should succeed");
            }
            writer.await.expect("writer should not panic");

            assert_eq!(store.count_points(None).await.expect("count"), 2_200);
            assert!(store.stats().compactions >= 1);
        }

        let store = LocalStore::open(dir.path(), false).expect("reopen should succeed");
        assert_eq!(store.count_points(None).await.expect("count"), 2_200);
    }
}
