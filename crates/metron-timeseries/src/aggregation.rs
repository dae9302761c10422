//! Metron Time Series Aggregation
//!
//! Deterministic time-bucketed aggregation over stored points. The ranges
//! of all requested metrics are copied out of the store in one snapshot,
//! then grouped into buckets outside any lock.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::registry::MetricRegistry;
use crate::timeout::bounded;
use crate::types::{AggregateQuery, AggregateResult, Bucket, MetricSeries};
use chrono::{DateTime, Utc};
use metron_common::config::QueryConfig;
use metron_common::{
    BatchIssue, Decimal, ErrorKind, Metric, MetricId, MetronError, Point, Result,
};
use metron_storage::{ScanResult, ValueStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const MICROS_PER_SECOND: i64 = 1_000_000;

// =============================================================================
// Aggregate Function
// =============================================================================

/// Per-bucket statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    Count,
}

impl AggregateFunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::Count => "count",
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregateFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sum" => Ok(Self::Sum),
            "avg" | "mean" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "count" => Ok(Self::Count),
            other => Err(format!("unknown aggregate function: {}", other)),
        }
    }
}

// =============================================================================
// Bucket Width
// =============================================================================

/// Width of an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketWidth {
    Minute,
    Hour,
    Day,
    Seconds(u32),
}

impl BucketWidth {
    /// Width in microseconds.
    pub fn micros(&self) -> i64 {
        let seconds = match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Seconds(n) => *n as i64,
        };
        seconds * MICROS_PER_SECOND
    }

    /// Bucket key of a timestamp: its floored microsecond epoch. Floors
    /// toward negative infinity, so pre-epoch times bucket consistently.
    pub fn bucket_key(&self, timestamp: DateTime<Utc>) -> i64 {
        let width = self.micros();
        timestamp.timestamp_micros().div_euclid(width) * width
    }

    /// Start of the bucket containing `timestamp`.
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> Result<DateTime<Utc>> {
        key_to_time(self.bucket_key(timestamp))
    }

    /// Buckets a half-open range can touch at most.
    pub fn bucket_span(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        if start >= end {
            return 0;
        }
        let first = self.bucket_key(start);
        let last = self.bucket_key(end - chrono::Duration::microseconds(1));
        ((last - first) / self.micros()) as u64 + 1
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Minute => f.write_str("minute"),
            Self::Hour => f.write_str("hour"),
            Self::Day => f.write_str("day"),
            Self::Seconds(n) => write!(f, "{}s", n),
        }
    }
}

impl FromStr for BucketWidth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "minute" | "1m" => return Ok(Self::Minute),
            "hour" | "1h" => return Ok(Self::Hour),
            "day" | "1d" => return Ok(Self::Day),
            _ => {}
        }

        let seconds = lower
            .strip_suffix('s')
            .and_then(|n| n.parse::<u32>().ok())
            .ok_or_else(|| format!("unknown bucket width: {}", s))?;
        if seconds == 0 {
            return Err("bucket width must be positive".to_string());
        }
        Ok(Self::Seconds(seconds))
    }
}

fn key_to_time(key: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(key).ok_or_else(|| {
        MetronError::InternalInvariantViolation(format!("bucket key {} is not a valid time", key))
    })
}

// =============================================================================
// Bucket Accumulator
// =============================================================================

/// Running statistics for one bucket.
#[derive(Debug, Clone, Copy)]
pub struct BucketAccumulator {
    count: u64,
    sum: Decimal,
    min: Decimal,
    max: Decimal,
}

impl BucketAccumulator {
    pub fn new(first: Decimal) -> Self {
        Self {
            count: 1,
            sum: first,
            min: first,
            max: first,
        }
    }

    pub fn add(&mut self, value: Decimal) -> Result<()> {
        self.count += 1;
        self.sum = self.sum.checked_add(value).ok_or_else(|| {
            MetronError::InternalInvariantViolation("bucket sum overflowed".to_string())
        })?;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Final value of the statistic.
    pub fn finish(&self, function: AggregateFunction) -> Result<Decimal> {
        Ok(match function {
            AggregateFunction::Sum => self.sum,
            AggregateFunction::Avg => self.sum.checked_div_count(self.count).ok_or_else(|| {
                MetronError::InternalInvariantViolation("average of an empty bucket".to_string())
            })?,
            AggregateFunction::Min => self.min,
            AggregateFunction::Max => self.max,
            AggregateFunction::Count => Decimal::from_i64(self.count as i64),
        })
    }
}

/// Group points into buckets. Points need not be sorted.
pub fn bucketize(
    points: &[Point],
    function: AggregateFunction,
    width: BucketWidth,
) -> Result<Vec<Bucket>> {
    let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
    for point in points {
        fold_point(&mut buckets, width, point)?;
    }
    finish_buckets(buckets, function)
}

fn fold_point(
    buckets: &mut BTreeMap<i64, BucketAccumulator>,
    width: BucketWidth,
    point: &Point,
) -> Result<()> {
    let key = width.bucket_key(point.recorded_at);
    match buckets.get_mut(&key) {
        Some(acc) => acc.add(point.value)?,
        None => {
            buckets.insert(key, BucketAccumulator::new(point.value));
        }
    }
    Ok(())
}

fn finish_buckets(
    buckets: BTreeMap<i64, BucketAccumulator>,
    function: AggregateFunction,
) -> Result<Vec<Bucket>> {
    buckets
        .into_iter()
        .map(|(key, acc)| {
            Ok(Bucket {
                start: key_to_time(key)?,
                value: acc.finish(function)?,
                count: acc.count(),
            })
        })
        .collect()
}

// =============================================================================
// Aggregator
// =============================================================================

/// Executes aggregation queries against the value store.
pub struct Aggregator {
    store: Arc<dyn ValueStore>,
    registry: Arc<MetricRegistry>,
    config: QueryConfig,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn ValueStore>,
        registry: Arc<MetricRegistry>,
        config: QueryConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            timeout,
        }
    }

    /// Run a query. Names that do not exist are listed in `not_found`; the
    /// call fails only when none of the requested names exist. Every metric
    /// is read from the same store snapshot.
    pub async fn aggregate(
        &self,
        query: &AggregateQuery,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult> {
        let started = Instant::now();
        self.check_query(query)?;

        let mut seen = HashSet::new();
        let names: Vec<&str> = query
            .metrics
            .iter()
            .map(String::as_str)
            .filter(|name| seen.insert(*name))
            .collect();

        let mut metrics = Vec::with_capacity(names.len());
        let mut not_found = Vec::new();
        for name in names {
            if cancel.is_cancelled() {
                return Err(MetronError::Cancelled);
            }
            match self.registry.lookup(name).await? {
                Some(metric) => metrics.push(metric),
                None => not_found.push(name.to_string()),
            }
        }

        if metrics.is_empty() {
            return Err(MetronError::MetricNotFound(not_found.join(", ")));
        }

        let ids: Vec<MetricId> = metrics.iter().map(|m| m.id).collect();
        let limit = self.config.max_scan_points;
        let scan = bounded(self.timeout, "scan", self.store.scan_many(&ids, &query.range, limit));
        let scans = tokio::select! {
            _ = cancel.cancelled() => return Err(MetronError::Cancelled),
            scans = scan => scans?,
        };
        if scans.len() != metrics.len() {
            return Err(MetronError::InternalInvariantViolation(format!(
                "scan of {} metrics returned {} results",
                metrics.len(),
                scans.len()
            )));
        }

        let mut series = Vec::with_capacity(metrics.len());
        let mut points_scanned = 0u64;
        for (metric, scan) in metrics.into_iter().zip(scans) {
            let (buckets, scanned) = self.fold_scan(&metric, scan, query, cancel).await?;
            points_scanned += scanned;
            series.push(MetricSeries {
                name: metric.name,
                metric_id: metric.id,
                kind: metric.kind,
                buckets,
            });
        }

        let query_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            "Aggregated {} points into {} series ({} by {}) in {}ms",
            points_scanned,
            series.len(),
            query.function,
            query.width,
            query_time_ms
        );

        Ok(AggregateResult {
            function: query.function,
            width: query.width,
            range: query.range,
            series,
            not_found,
            points_scanned,
            query_time_ms,
        })
    }

    fn check_query(&self, query: &AggregateQuery) -> Result<()> {
        if query.metrics.is_empty() {
            return Err(MetronError::Validation {
                issues: vec![BatchIssue::batch(
                    ErrorKind::ValidationError,
                    "no metrics requested",
                )],
            });
        }
        if !query.range.is_valid() {
            return Err(MetronError::InvalidRange(format!(
                "start {} is after end {}",
                query.range.start, query.range.end
            )));
        }
        if query.width.micros() <= 0 {
            return Err(MetronError::InvalidRange(
                "bucket width must be positive".to_string(),
            ));
        }

        let span = query.width.bucket_span(query.range.start, query.range.end);
        if span > self.config.max_buckets as u64 {
            return Err(MetronError::RangeTooLarge {
                detail: format!("range spans {} {} buckets", span, query.width),
                limit: self.config.max_buckets,
            });
        }
        Ok(())
    }

    async fn fold_scan(
        &self,
        metric: &Metric,
        scan: ScanResult,
        query: &AggregateQuery,
        cancel: &CancellationToken,
    ) -> Result<(Vec<Bucket>, u64)> {
        let limit = self.config.max_scan_points;
        if scan.truncated {
            return Err(MetronError::RangeTooLarge {
                detail: format!("metric {} has more points in range than may be scanned", metric.name),
                limit,
            });
        }

        let check_every = self.config.cancel_check_interval.max(1);
        let mut buckets: BTreeMap<i64, BucketAccumulator> = BTreeMap::new();
        for (i, point) in scan.points.iter().enumerate() {
            if i > 0 && i % check_every == 0 {
                if cancel.is_cancelled() {
                    return Err(MetronError::Cancelled);
                }
                tokio::task::yield_now().await;
            }
            if !query.range.contains(&point.recorded_at) || point.metric_id != metric.id {
                return Err(MetronError::InternalInvariantViolation(format!(
                    "scan of {} returned point {} outside the request",
                    metric.name, point.id
                )));
            }
            fold_point(&mut buckets, query.width, point)?;
        }

        Ok((finish_buckets(buckets, query.function)?, scan.points.len() as u64))
    }
}

// =============================================================================
// Tests
// =============================================================================
