//! Metron Memory - In-Memory Value Store
//!
//! Snapshot-consistent point store kept entirely in memory. All state sits
//! behind one lock: writers hold it exclusively for the duration of a
//! mutation, so readers see either none or all of a batch. When a point log
//! is attached, each mutation is journaled before it is applied. Compaction
//! takes a snapshot under the shared lock and rewrites the log on a blocking
//! thread while writes continue.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::backend::{PointKey, ScanResult, StoreStats, ValueStore};
use crate::wal::{Mutation, PointLog, RecoveryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metron_common::{
    Metric, MetricId, MetricKind, MetronError, NewPoint, Point, PointId, Result, TimeRange,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Points per record when the journal is rewritten from a snapshot.
const COMPACTION_CHUNK: usize = 1024;

// =============================================================================
// Store State
// =============================================================================

type Series = BTreeMap<(DateTime<Utc>, PointId), Point>;

#[derive(Debug, Default)]
struct StoreState {
    metrics: HashMap<String, Metric>,
    names: HashMap<MetricId, String>,
    series: HashMap<MetricId, Series>,
    by_time: BTreeSet<PointKey>,
}

impl StoreState {
    /// Apply a mutation, returning the number of points it touched. Records
    /// that no longer match the state are skipped so replay is idempotent.
    fn apply(&mut self, mutation: &Mutation) -> usize {
        match mutation {
            Mutation::CreateMetric { metric } => {
                if self.metrics.contains_key(&metric.name) {
                    return 0;
                }
                self.names.insert(metric.id, metric.name.clone());
                self.metrics.insert(metric.name.clone(), metric.clone());
                0
            }
            Mutation::InsertPoints { points } => {
                let mut inserted = 0;
                for point in points {
                    if !self.names.contains_key(&point.metric_id) {
                        continue;
                    }
                    let series = self.series.entry(point.metric_id).or_default();
                    if series
                        .insert((point.recorded_at, point.id), point.clone())
                        .is_none()
                    {
                        self.by_time.insert(PointKey::of(point));
                        inserted += 1;
                    }
                }
                inserted
            }
            Mutation::DeletePoints { keys } => {
                let mut removed = 0;
                for key in keys {
                    let Some(series) = self.series.get_mut(&key.metric_id) else {
                        continue;
                    };
                    if series.remove(&(key.recorded_at, key.id)).is_some() {
                        self.by_time.remove(key);
                        removed += 1;
                    }
                }
                removed
            }
            Mutation::DeleteMetric { metric_id } => {
                if let Some(name) = self.names.remove(metric_id) {
                    self.metrics.remove(&name);
                }
                let series = self.series.remove(metric_id).unwrap_or_default();
                for point in series.values() {
                    self.by_time.remove(&PointKey::of(point));
                }
                series.len()
            }
        }
    }

    /// Mutations that rebuild this state from nothing.
    fn snapshot(&self) -> Vec<Mutation> {
        let mut metrics: Vec<&Metric> = self.metrics.values().collect();
        metrics.sort_by_key(|m| m.id);

        let mut mutations = Vec::with_capacity(metrics.len());
        for metric in metrics {
            mutations.push(Mutation::CreateMetric {
                metric: metric.clone(),
            });
            let Some(series) = self.series.get(&metric.id) else {
                continue;
            };
            let points: Vec<Point> = series.values().cloned().collect();
            for chunk in points.chunks(COMPACTION_CHUNK) {
                mutations.push(Mutation::InsertPoints {
                    points: chunk.to_vec(),
                });
            }
        }
        mutations
    }

    /// Points of one metric in `range`, at most `limit` of them.
    fn scan_series(&self, metric_id: MetricId, range: &TimeRange, limit: usize) -> ScanResult {
        let mut result = ScanResult::default();
        if range.is_empty() {
            return result;
        }
        let Some(series) = self.series.get(&metric_id) else {
            return result;
        };

        let bounds = (range.start, PointId(0))..(range.end, PointId(0));
        for point in series.range(bounds).map(|(_, p)| p) {
            if result.points.len() == limit {
                result.truncated = true;
                break;
            }
            result.points.push(point.clone());
        }
        result
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// In-memory value store, optionally journaled to a point log.
pub struct MemoryStore {
    state: RwLock<StoreState>,
    next_metric_id: AtomicU64,
    next_point_id: AtomicU64,
    stats: RwLock<StoreStats>,
    journal: Option<Arc<PointLog>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            next_metric_id: AtomicU64::new(1),
            next_point_id: AtomicU64::new(1),
            stats: RwLock::new(StoreStats::default()),
            journal: None,
        }
    }

    /// Build a store from a recovered point log, replaying its mutations.
    pub(crate) fn with_journal(journal: PointLog, recovery: RecoveryResult) -> Self {
        let mut state = StoreState::default();
        let mut max_metric_id = 0u64;
        let mut max_point_id = 0u64;

        for mutation in &recovery.mutations {
            match mutation {
                Mutation::CreateMetric { metric } => {
                    max_metric_id = max_metric_id.max(metric.id.0);
                }
                Mutation::InsertPoints { points } => {
                    if let Some(max) = points.iter().map(|p| p.id.0).max() {
                        max_point_id = max_point_id.max(max);
                    }
                }
                _ => {}
            }
            state.apply(mutation);
        }

        Self {
            state: RwLock::new(state),
            next_metric_id: AtomicU64::new(max_metric_id + 1),
            next_point_id: AtomicU64::new(max_point_id + 1),
            stats: RwLock::new(StoreStats::default()),
            journal: Some(Arc::new(journal)),
        }
    }

    fn allocate_metric_id(&self) -> MetricId {
        MetricId(self.next_metric_id.fetch_add(1, Ordering::SeqCst))
    }

    fn allocate_point_id(&self) -> PointId {
        PointId(self.next_point_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Journal then apply. Callers hold the state write lock.
    fn commit(&self, state: &mut StoreState, mutation: &Mutation) -> Result<usize> {
        if let Some(journal) = &self.journal {
            journal.append(mutation)?;
        }
        Ok(state.apply(mutation))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn get_or_create_metric(&self, name: &str, kind: MetricKind) -> Result<(Metric, bool)> {
        // Fast path: read lock
        {
            let state = self.state.read();
            if let Some(metric) = state.metrics.get(name) {
                return Ok((metric.clone(), false));
            }
        }

        // Slow path: write lock, check again
        let mut state = self.state.write();
        if let Some(metric) = state.metrics.get(name) {
            return Ok((metric.clone(), false));
        }

        let metric = Metric {
            id: self.allocate_metric_id(),
            name: name.to_string(),
            kind,
            created_at: Utc::now(),
        };
        self.commit(
            &mut state,
            &Mutation::CreateMetric {
                metric: metric.clone(),
            },
        )?;

        let mut stats = self.stats.write();
        stats.metrics_created += 1;
        stats.write_ops += 1;

        Ok((metric, true))
    }

    async fn find_metric(&self, name: &str) -> Result<Option<Metric>> {
        Ok(self.state.read().metrics.get(name).cloned())
    }

    async fn list_metrics(&self) -> Result<Vec<Metric>> {
        let state = self.state.read();
        let mut metrics: Vec<Metric> = state.metrics.values().cloned().collect();
        metrics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(metrics)
    }

    async fn delete_metric(&self, name: &str) -> Result<Option<usize>> {
        let mut state = self.state.write();
        let Some(metric_id) = state.metrics.get(name).map(|m| m.id) else {
            return Ok(None);
        };

        let removed = self.commit(&mut state, &Mutation::DeleteMetric { metric_id })?;

        let mut stats = self.stats.write();
        stats.delete_ops += 1;
        stats.points_deleted += removed as u64;

        Ok(Some(removed))
    }

    async fn insert_batch(&self, points: Vec<NewPoint>) -> Result<Vec<Point>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.state.write();
        if let Some(missing) = points.iter().find(|p| !state.names.contains_key(&p.metric_id)) {
            return Err(MetronError::Storage(format!(
                "metric {} no longer exists",
                missing.metric_id
            )));
        }

        let ingested_at = Utc::now();
        let stored: Vec<Point> = points
            .into_iter()
            .map(|p| Point {
                id: self.allocate_point_id(),
                metric_id: p.metric_id,
                value: p.value,
                recorded_at: p.recorded_at,
                ingested_at,
            })
            .collect();

        self.commit(
            &mut state,
            &Mutation::InsertPoints {
                points: stored.clone(),
            },
        )?;

        let mut stats = self.stats.write();
        stats.write_ops += 1;
        stats.points_written += stored.len() as u64;

        Ok(stored)
    }

    async fn scan(&self, metric_id: MetricId, range: &TimeRange, limit: usize) -> Result<ScanResult> {
        let result = self.state.read().scan_series(metric_id, range, limit);

        let mut stats = self.stats.write();
        stats.scan_ops += 1;
        stats.points_scanned += result.points.len() as u64;

        Ok(result)
    }

    async fn scan_many(
        &self,
        metric_ids: &[MetricId],
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<ScanResult>> {
        let results: Vec<ScanResult> = {
            let state = self.state.read();
            metric_ids
                .iter()
                .map(|id| state.scan_series(*id, range, limit))
                .collect()
        };

        let mut stats = self.stats.write();
        stats.scan_ops += 1;
        stats.points_scanned += results.iter().map(|r| r.points.len() as u64).sum::<u64>();

        Ok(results)
    }

    async fn delete_before(&self, cutoff: DateTime<Utc>, max_rows: usize) -> Result<usize> {
        if max_rows == 0 {
            return Ok(0);
        }

        let mut state = self.state.write();
        let keys: Vec<PointKey> = state
            .by_time
            .iter()
            .take_while(|key| key.recorded_at < cutoff)
            .take(max_rows)
            .copied()
            .collect();
        if keys.is_empty() {
            return Ok(0);
        }

        let removed = self.commit(&mut state, &Mutation::DeletePoints { keys })?;

        let mut stats = self.stats.write();
        stats.delete_ops += 1;
        stats.points_deleted += removed as u64;

        Ok(removed)
    }

    async fn count_points(&self, metric_id: Option<MetricId>) -> Result<usize> {
        let state = self.state.read();
        Ok(match metric_id {
            Some(id) => state.series.get(&id).map_or(0, |s| s.len()),
            None => state.by_time.len(),
        })
    }

    async fn compact(&self) -> Result<()> {
        let Some(journal) = &self.journal else {
            return Ok(());
        };

        // Commits append under the write lock, so the mark matches the snapshot.
        let (snapshot, mark) = {
            let state = self.state.read();
            (state.snapshot(), journal.position())
        };

        let journal = Arc::clone(journal);
        let swapped = tokio::task::spawn_blocking(move || journal.compact_from(&snapshot, mark))
            .await
            .map_err(|e| MetronError::Storage(format!("compaction task failed: {}", e)))??;

        if swapped {
            self.stats.write().compactions += 1;
        } else {
            tracing::debug!("Point log replaced during compaction, skipping swap");
        }
        Ok(())
    }

    async fn sync(&self) -> Result<()> {
        match &self.journal {
            Some(journal) => journal.sync(),
            None => Ok(()),
        }
    }

    fn stats(&self) -> StoreStats {
        let mut stats = self.stats.read().clone();
        let state = self.state.read();
        stats.metrics = state.metrics.len() as u64;
        stats.points = state.by_time.len() as u64;
        stats
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use metron_common::Decimal;
    use std::sync::Arc;

    fn new_point(metric_id: MetricId, value: i64, recorded_at: DateTime<Utc>) -> NewPoint {
        NewPoint {
            metric_id,
            value: Decimal::from_i64(value),
            recorded_at,
        }
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = MemoryStore::new();

        let (first, created) = store
            .get_or_create_metric("requests", MetricKind::Counter)
            .await
            .expect("create should succeed");
        assert!(created);

        let (second, created) = store
            .get_or_create_metric("requests", MetricKind::Value)
            .await
            .expect("lookup should succeed");
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(second.kind, MetricKind::Counter);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_create() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .get_or_create_metric("shared", MetricKind::Value)
                    .await
                    .expect("get_or_create should succeed")
            }));
        }

        let mut ids = Vec::new();
        let mut creations = 0;
        for handle in handles {
            let (metric, created) = handle.await.expect("task should not panic");
            ids.push(metric.id);
            creations += created as usize;
        }

        assert_eq!(creations, 1);
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.list_metrics().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_insert_and_scan() {
        let store = MemoryStore::new();
        let (metric, _) = store
            .get_or_create_metric("latency", MetricKind::Value)
            .await
            .expect("create should succeed");

        let base = Utc::now() - Duration::hours(1);
        let batch = (0..10)
            .map(|i| new_point(metric.id, i, base + Duration::minutes(i)))
            .collect();
        let stored = store.insert_batch(batch).await.expect("insert should succeed");
        assert_eq!(stored.len(), 10);
        assert!(stored.windows(2).all(|w| w[0].id < w[1].id));

        let range = TimeRange::new(base + Duration::minutes(2), base + Duration::minutes(5));
        let scan = store.scan(metric.id, &range, 100).await.expect("scan should succeed");
        let values: Vec<Decimal> = scan.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![Decimal::from_i64(2), Decimal::from_i64(3), Decimal::from_i64(4)]);
        assert!(!scan.truncated);
    }

    #[tokio::test]
    async fn test_scan_limit_truncates() {
        let store = MemoryStore::new();
        let (metric, _) = store
            .get_or_create_metric("hits", MetricKind::Counter)
            .await
            .expect("create should succeed");

        let base = Utc::now();
        let batch = (0..5).map(|i| new_point(metric.id, 1, base + Duration::seconds(i))).collect();
        store.insert_batch(batch).await.expect("insert should succeed");

        let range = TimeRange::new(base, base + Duration::minutes(1));
        let scan = store.scan(metric.id, &range, 3).await.expect("scan should succeed");
        assert_eq!(scan.points.len(), 3);
        assert!(scan.truncated);

        let empty = TimeRange::new(base, base);
        let scan = store.scan(metric.id, &empty, 3).await.expect("scan should succeed");
        assert!(scan.points.is_empty());
    }

    #[tokio::test]
    async fn test_scan_many_reads_one_snapshot() {
        let store = MemoryStore::new();
        let (a, _) = store.get_or_create_metric("a", MetricKind::Value).await.expect("create a");
        let (b, _) = store.get_or_create_metric("b", MetricKind::Value).await.expect("create b");

        let base = Utc::now() - Duration::minutes(30);
        let batch = vec![
            new_point(a.id, 1, base),
            new_point(b.id, 2, base),
            new_point(b.id, 3, base + Duration::minutes(1)),
            new_point(b.id, 4, base + Duration::minutes(2)),
        ];
        store.insert_batch(batch).await.expect("insert should succeed");

        let range = TimeRange::new(base, base + Duration::minutes(10));
        let scans = store
            .scan_many(&[b.id, MetricId(404), a.id], &range, 2)
            .await
            .expect("scan should succeed");

        assert_eq!(scans.len(), 3);
        assert_eq!(scans[0].points.len(), 2);
        assert!(scans[0].truncated);
        assert!(scans[1].points.is_empty());
        assert_eq!(scans[2].points[0].value, Decimal::from_i64(1));
        assert!(!scans[2].truncated);

        let stats = store.stats();
        assert_eq!(stats.scan_ops, 1);
        assert_eq!(stats.points_scanned, 3);
    }

    #[tokio::test]
    async fn test_insert_rejects_unknown_metric() {
        let store = MemoryStore::new();
        let (metric, _) = store
            .get_or_create_metric("known", MetricKind::Value)
            .await
            .expect("create should succeed");

        let now = Utc::now();
        let batch = vec![new_point(metric.id, 1, now), new_point(MetricId(999), 2, now)];
        let err = store.insert_batch(batch).await.expect_err("insert should fail");
        assert!(matches!(err, MetronError::Storage(_)));
        assert_eq!(store.count_points(None).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_delete_before_in_chunks() {
        let store = MemoryStore::new();
        let (a, _) = store.get_or_create_metric("a", MetricKind::Value).await.expect("create a");
        let (b, _) = store.get_or_create_metric("b", MetricKind::Value).await.expect("create b");

        let now = Utc::now();
        let mut batch = Vec::new();
        for i in 0..5 {
            batch.push(new_point(a.id, i, now - Duration::days(40) + Duration::minutes(i)));
            batch.push(new_point(b.id, i, now - Duration::days(10) + Duration::minutes(i)));
        }
        store.insert_batch(batch).await.expect("insert should succeed");

        let cutoff = now - Duration::days(30);
        assert_eq!(store.delete_before(cutoff, 3).await.expect("delete"), 3);
        assert_eq!(store.delete_before(cutoff, 3).await.expect("delete"), 2);
        assert_eq!(store.delete_before(cutoff, 3).await.expect("delete"), 0);

        assert_eq!(store.count_points(Some(a.id)).await.expect("count a"), 0);
        assert_eq!(store.count_points(Some(b.id)).await.expect("count b"), 5);

        let stats = store.stats();
        assert_eq!(stats.points, 5);
        assert_eq!(stats.points_deleted, 5);
    }

    #[tokio::test]
    async fn test_delete_metric_removes_points() {
        let store = MemoryStore::new();
        let (metric, _) = store
            .get_or_create_metric("gone", MetricKind::Counter)
            .await
            .expect("create should succeed");
        let now = Utc::now();
        store
            .insert_batch(vec![new_point(metric.id, 1, now), new_point(metric.id, 2, now)])
            .await
            .expect("insert should succeed");

        assert_eq!(store.delete_metric("gone").await.expect("delete"), Some(2));
        assert_eq!(store.delete_metric("gone").await.expect("delete"), None);
        assert!(store.find_metric("gone").await.expect("find").is_none());
        assert_eq!(store.count_points(None).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_list_metrics_sorted_by_name() {
        let store = MemoryStore::new();
        for name in ["zeta", "alpha", "mid"] {
            store.get_or_create_metric(name, MetricKind::Value).await.expect("create");
        }
        let names: Vec<String> = store
            .list_metrics()
            .await
            .expect("list")
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }
}
