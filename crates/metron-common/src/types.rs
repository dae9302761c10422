//! Metron Types - Core Data Types
//!
//! Fundamental data types shared by the storage and time series layers:
//! type-safe identifiers, the metric kind, stored records, and time ranges.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::decimal::Decimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// =============================================================================
// Identifier Types
// =============================================================================

/// Stable identifier of a metric definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetricId(pub u64);

/// Identifier of a stored point. Allocated in commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub u64);

/// Log sequence number for point log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

// =============================================================================
// Metric Kind
// =============================================================================

/// Semantic kind of a metric. Fixed when the metric is first created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Conventionally non-negative increments (e.g., request count).
    Counter,
    /// Arbitrary numeric measurement (e.g., temperature).
    Value,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Value => "value",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "counter" => Ok(MetricKind::Counter),
            "value" => Ok(MetricKind::Value),
            other => Err(format!("unknown metric kind: {}", other)),
        }
    }
}

// =============================================================================
// Stored Records
// =============================================================================

/// A metric definition as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metric {
    pub id: MetricId,
    pub name: String,
    pub kind: MetricKind,
    pub created_at: DateTime<Utc>,
}

/// A point as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub id: PointId,
    pub metric_id: MetricId,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// A validated point ready to be written. The store assigns the id and
/// `ingested_at` at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPoint {
    pub metric_id: MetricId,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Time Range
// =============================================================================

/// Half-open time range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, timestamp: &DateTime<Utc>) -> bool {
        timestamp >= &self.start && timestamp < &self.end
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_metric_kind_parse() {
        assert_eq!("counter".parse::<MetricKind>(), Ok(MetricKind::Counter));
        assert_eq!("VALUE".parse::<MetricKind>(), Ok(MetricKind::Value));
        assert!("gauge".parse::<MetricKind>().is_err());
    }

    #[test]
    fn test_metric_kind_serde() {
        let json = serde_json::to_string(&MetricKind::Counter).expect("serialize kind");
        assert_eq!(json, "\"counter\"");
    }

    #[test]
    fn test_time_range_half_open() {
        let start = Utc::now();
        let range = TimeRange::new(start, start + Duration::hours(1));

        assert!(range.contains(&start));
        assert!(range.contains(&(start + Duration::minutes(59))));
        assert!(!range.contains(&(start + Duration::hours(1))));
        assert!(range.is_valid());
        assert!(!range.is_empty());
    }

    #[test]
    fn test_time_range_inverted() {
        let start = Utc::now();
        let range = TimeRange::new(start, start - Duration::seconds(1));
        assert!(!range.is_valid());
        assert!(range.is_empty());
    }
}
