//! Metron Time Series Types
//!
//! Request and result types for ingestion and aggregation.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::aggregation::{AggregateFunction, BucketWidth};
use chrono::{DateTime, Utc};
use metron_common::{Decimal, MetricId, MetricKind, PointId, TimeRange};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Ingestion Input
// =============================================================================

/// A point as submitted by a caller, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointInput {
    pub name: String,
    pub kind: MetricKind,
    /// Textual value. JSON numbers are accepted and kept as text so that
    /// parsing stays strict.
    #[serde(default, deserialize_with = "deserialize_value")]
    pub value: Option<String>,
    #[serde(default)]
    pub recorded_at: Option<DateTime<Utc>>,
}

impl PointInput {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            value: Some(value.into()),
            recorded_at: None,
        }
    }

    /// Counter increment with the default value.
    pub fn counter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: MetricKind::Counter,
            value: None,
            recorded_at: None,
        }
    }

    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }
}

fn deserialize_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ValueVisitor;

    impl<'de> Visitor<'de> for ValueVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number, a numeric string, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(self)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    deserializer.deserialize_option(ValueVisitor)
}

// =============================================================================
// Ingestion Results
// =============================================================================

/// A single point as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPoint {
    pub metric: String,
    pub metric_id: MetricId,
    pub kind: MetricKind,
    pub point_id: PointId,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// One accepted entry of a batch, keyed by its position in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptedPoint {
    pub index: usize,
    pub metric_id: MetricId,
    pub point_id: PointId,
    pub recorded_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
}

/// Confirmation that a whole batch was committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReceipt {
    pub accepted: usize,
    pub points: Vec<AcceptedPoint>,
}

// =============================================================================
// Aggregation Query
// =============================================================================

/// Windowed aggregation over one or more metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateQuery {
    pub metrics: Vec<String>,
    pub function: AggregateFunction,
    pub width: BucketWidth,
    pub range: TimeRange,
}

impl AggregateQuery {
    pub fn new(
        metrics: impl IntoIterator<Item = impl Into<String>>,
        function: AggregateFunction,
        width: BucketWidth,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Self {
        Self {
            metrics: metrics.into_iter().map(Into::into).collect(),
            function,
            width,
            range: TimeRange::new(start, end),
        }
    }
}

// =============================================================================
// Aggregation Results
// =============================================================================

/// One non-empty bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub value: Decimal,
    /// Points that fell into the bucket.
    pub count: u64,
}

/// Buckets for one metric, ascending by start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub name: String,
    pub metric_id: MetricId,
    pub kind: MetricKind,
    pub buckets: Vec<Bucket>,
}

/// Result of an aggregation query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub function: AggregateFunction,
    pub width: BucketWidth,
    pub range: TimeRange,
    /// Series in request order.
    pub series: Vec<MetricSeries>,
    /// Requested names that do not exist.
    pub not_found: Vec<String>,
    pub points_scanned: u64,
    pub query_time_ms: u64,
}

impl AggregateResult {
    pub fn series_for(&self, name: &str) -> Option<&MetricSeries> {
        self.series.iter().find(|s| s.name == name)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_input_accepts_numbers_and_strings() {
        let input: PointInput =
            serde_json::from_str(r#"{"name":"cpu","kind":"value","value":12.5}"#)
                .expect("numeric value should deserialize");
        assert_eq!(input.value.as_deref(), Some("12.5"));

        let input: PointInput =
            serde_json::from_str(r#"{"name":"cpu","kind":"value","value":"0.000001"}"#)
                .expect("string value should deserialize");
        assert_eq!(input.value.as_deref(), Some("0.000001"));

        let input: PointInput = serde_json::from_str(r#"{"name":"hits","kind":"counter"}"#)
            .expect("missing value should deserialize");
        assert_eq!(input.value, None);
        assert_eq!(input.recorded_at, None);
    }

    #[test]
    fn test_point_input_rejects_unknown_kind() {
        let result: Result<PointInput, _> =
            serde_json::from_str(r#"{"name":"cpu","kind":"gauge","value":1}"#);
        assert!(result.is_err());
    }
}
