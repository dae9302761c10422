//! Metron Backend - Value Store Abstraction
//!
//! Defines the store trait consumed by the registry, ingestion, aggregation
//! and retention components. Implementations must provide:
//! - atomic insert-or-get of metric definitions (unique by name)
//! - all-or-nothing visibility of inserted batches
//! - snapshot range scans that never observe half a write, including
//!   multi-metric scans read at a single point in time
//! - bounded deletes where each call is atomic on its own
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metron_common::{Metric, MetricId, MetricKind, NewPoint, Point, PointId, Result, TimeRange};
use serde::{Deserialize, Serialize};

// =============================================================================
// Value Store Trait
// =============================================================================

/// Pluggable value store interface.
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Return the metric named `name`, creating it with `kind` if absent.
    /// The flag is true when this call created it. An existing metric is
    /// returned as stored, whatever its kind.
    async fn get_or_create_metric(&self, name: &str, kind: MetricKind) -> Result<(Metric, bool)>;

    /// Look up a metric by name.
    async fn find_metric(&self, name: &str) -> Result<Option<Metric>>;

    /// All metrics, ordered by name.
    async fn list_metrics(&self) -> Result<Vec<Metric>>;

    /// Delete a metric and every point it owns. Returns the number of
    /// points removed, or `None` if no such metric exists.
    async fn delete_metric(&self, name: &str) -> Result<Option<usize>>;

    /// Insert a batch of points as one atomic unit.
    async fn insert_batch(&self, points: Vec<NewPoint>) -> Result<Vec<Point>>;

    /// Snapshot of one metric's points with `recorded_at` in the half-open
    /// range, ascending by time. At most `limit` points are returned;
    /// `truncated` reports whether more existed.
    async fn scan(&self, metric_id: MetricId, range: &TimeRange, limit: usize) -> Result<ScanResult>;

    /// Scan several metrics from one snapshot, so a batch touching more
    /// than one of them is seen for all or for none. Results follow the
    /// order of `metric_ids`; `limit` applies to each metric separately.
    async fn scan_many(
        &self,
        metric_ids: &[MetricId],
        range: &TimeRange,
        limit: usize,
    ) -> Result<Vec<ScanResult>>;

    /// Delete up to `max_rows` of the oldest points recorded before
    /// `cutoff`, across all metrics, as one atomic chunk.
    async fn delete_before(&self, cutoff: DateTime<Utc>, max_rows: usize) -> Result<usize>;

    /// Count stored points, for one metric or all of them.
    async fn count_points(&self, metric_id: Option<MetricId>) -> Result<usize>;

    /// Reclaim space held by deleted rows. Must not hold up concurrent
    /// reads and writes for longer than a brief swap.
    async fn compact(&self) -> Result<()> {
        Ok(())
    }

    /// Sync all pending writes to durable storage.
    async fn sync(&self) -> Result<()>;

    /// Get storage statistics.
    fn stats(&self) -> StoreStats;
}

// =============================================================================
// Scan Result
// =============================================================================

/// Points returned by a range scan.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub points: Vec<Point>,
    pub truncated: bool,
}

// =============================================================================
// Point Key
// =============================================================================

/// Retention index key, ordered by time first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointKey {
    pub recorded_at: DateTime<Utc>,
    pub id: PointId,
    pub metric_id: MetricId,
}

impl PointKey {
    pub fn of(point: &Point) -> Self {
        Self {
            recorded_at: point.recorded_at,
            id: point.id,
            metric_id: point.metric_id,
        }
    }
}

// =============================================================================
// Storage Statistics
// =============================================================================

/// Statistics about storage usage and operations.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub metrics: u64,
    pub points: u64,
    pub metrics_created: u64,
    pub points_written: u64,
    pub points_deleted: u64,
    pub write_ops: u64,
    pub delete_ops: u64,
    pub scan_ops: u64,
    pub points_scanned: u64,
    pub compactions: u64,
}
