//! Metron Ingestion
//!
//! Validates and writes points. A batch is checked in full before anything
//! is written, then committed with a single store insert, so it is visible
//! entirely or not at all.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::registry::MetricRegistry;
use crate::timeout::bounded;
use crate::types::{AcceptedPoint, BatchReceipt, PointInput, StoredPoint};
use chrono::{DateTime, Utc};
use metron_common::config::IngestConfig;
use metron_common::utils::validate_metric_name;
use metron_common::{
    BatchIssue, Decimal, ErrorKind, Metric, MetricKind, MetronError, NewPoint, Point, Result,
    SkewDirection,
};
use metron_storage::ValueStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Prepared Point
// =============================================================================

/// A point that passed validation but has not been written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPoint {
    pub name: String,
    pub kind: MetricKind,
    pub value: Decimal,
    pub recorded_at: DateTime<Utc>,
}

// =============================================================================
// Ingestor
// =============================================================================

/// Write path for single points and batches.
pub struct Ingestor {
    store: Arc<dyn ValueStore>,
    registry: Arc<MetricRegistry>,
    config: IngestConfig,
    timeout: Duration,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ValueStore>,
        registry: Arc<MetricRegistry>,
        config: IngestConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            timeout,
        }
    }

    /// Check name, value and timestamp of one input against `now`.
    pub fn prepare(&self, input: &PointInput, now: DateTime<Utc>) -> Result<PreparedPoint> {
        validate_metric_name(&input.name)?;

        let value = match (&input.value, input.kind) {
            (Some(text), _) => parse_value(text)?,
            (None, MetricKind::Counter) => Decimal::ONE,
            (None, MetricKind::Value) => {
                return Err(MetronError::MissingValue {
                    name: input.name.clone(),
                    kind: input.kind,
                })
            }
        };

        let recorded_at = match input.recorded_at {
            Some(recorded_at) => {
                self.check_skew(recorded_at, now)?;
                recorded_at
            }
            None => now,
        };

        Ok(PreparedPoint {
            name: input.name.clone(),
            kind: input.kind,
            value,
            recorded_at,
        })
    }

    fn check_skew(&self, recorded_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<()> {
        let window = self.config.skew_window();
        let direction = if recorded_at < now - window {
            SkewDirection::TooOld
        } else if recorded_at > now + window {
            SkewDirection::TooFarInFuture
        } else {
            return Ok(());
        };

        Err(MetronError::TimestampOutOfRange {
            recorded_at,
            server_time: now,
            window_secs: window.num_seconds(),
            direction,
        })
    }

    /// Validate and store a single point.
    pub async fn ingest_one(&self, input: PointInput) -> Result<StoredPoint> {
        let prepared = self.prepare(&input, Utc::now())?;
        let (metric, _) = self.registry.resolve(&prepared.name, prepared.kind).await?;

        let new_point = NewPoint {
            metric_id: metric.id,
            value: prepared.value,
            recorded_at: prepared.recorded_at,
        };
        let mut stored = self.write(vec![new_point], &[metric.name.as_str()]).await?;
        let point = stored.pop().ok_or_else(|| {
            MetronError::InternalInvariantViolation("store returned no point for a write".to_string())
        })?;

        Ok(StoredPoint {
            metric: metric.name,
            metric_id: metric.id,
            kind: metric.kind,
            point_id: point.id,
            value: point.value,
            recorded_at: point.recorded_at,
            ingested_at: point.ingested_at,
        })
    }

    /// Validate and store a batch as one unit. Every problem is reported;
    /// nothing is written unless the whole batch is valid. Cancellation is
    /// observed only before the commit starts.
    pub async fn ingest_batch(
        &self,
        inputs: Vec<PointInput>,
        cancel: &CancellationToken,
    ) -> Result<BatchReceipt> {
        let limit = self.config.max_batch_size;
        if inputs.len() > limit {
            tracing::warn!("Rejected batch of {} points (limit {})", inputs.len(), limit);
            return Err(MetronError::BatchTooLarge {
                size: inputs.len(),
                limit,
            });
        }
        if inputs.is_empty() {
            return Err(MetronError::Validation {
                issues: vec![BatchIssue::batch(ErrorKind::ValidationError, "batch is empty")],
            });
        }

        let prepared = self.validate_batch(&inputs, cancel).await?;

        if cancel.is_cancelled() {
            return Err(MetronError::Cancelled);
        }

        // Commit: from here on the batch runs to completion.
        let mut metrics: HashMap<&str, Metric> = HashMap::new();
        let mut conflicts = Vec::new();
        for (index, point) in prepared.iter().enumerate() {
            if metrics.contains_key(point.name.as_str()) {
                continue;
            }
            match self.registry.resolve(&point.name, point.kind).await {
                Ok((metric, _)) => {
                    metrics.insert(point.name.as_str(), metric);
                }
                Err(e @ MetronError::TypeConflict { .. }) => {
                    conflicts.push(BatchIssue::at(index, &e));
                }
                Err(e) => return Err(e),
            }
        }
        if !conflicts.is_empty() {
            return Err(MetronError::Validation { issues: conflicts });
        }

        let mut new_points = Vec::with_capacity(prepared.len());
        for point in &prepared {
            let metric = metrics.get(point.name.as_str()).ok_or_else(|| {
                MetronError::InternalInvariantViolation(format!(
                    "metric {} was not resolved before commit",
                    point.name
                ))
            })?;
            new_points.push(NewPoint {
                metric_id: metric.id,
                value: point.value,
                recorded_at: point.recorded_at,
            });
        }

        let names: Vec<&str> = metrics.keys().copied().collect();
        let stored = self.write(new_points, &names).await?;
        if stored.len() != prepared.len() {
            return Err(MetronError::InternalInvariantViolation(format!(
                "batch of {} points stored {}",
                prepared.len(),
                stored.len()
            )));
        }

        let points: Vec<AcceptedPoint> = stored
            .into_iter()
            .enumerate()
            .map(|(index, point)| AcceptedPoint {
                index,
                metric_id: point.metric_id,
                point_id: point.id,
                recorded_at: point.recorded_at,
                ingested_at: point.ingested_at,
            })
            .collect();

        tracing::debug!("Committed batch of {} points across {} metrics", points.len(), metrics.len());
        Ok(BatchReceipt {
            accepted: points.len(),
            points,
        })
    }

    /// Validate every entry, collecting all issues.
    async fn validate_batch(
        &self,
        inputs: &[PointInput],
        cancel: &CancellationToken,
    ) -> Result<Vec<PreparedPoint>> {
        let now = Utc::now();
        let mut issues = Vec::new();
        let mut prepared = Vec::with_capacity(inputs.len());
        let mut kinds: HashMap<&str, MetricKind> = HashMap::new();

        for (index, input) in inputs.iter().enumerate() {
            match self.prepare(input, now) {
                Ok(point) => {
                    match kinds.get(input.name.as_str()) {
                        Some(&kind) if kind != input.kind => {
                            issues.push(BatchIssue {
                                index: Some(index),
                                kind: ErrorKind::TypeConflict,
                                reason: format!(
                                    "metric {:?} is written as both {} and {} in this batch",
                                    input.name, kind, input.kind
                                ),
                            });
                        }
                        Some(_) => {}
                        None => {
                            kinds.insert(input.name.as_str(), input.kind);
                        }
                    }
                    prepared.push((index, point));
                }
                Err(e) => issues.push(BatchIssue::at(index, &e)),
            }
        }

        // Kinds already on record.
        let mut existing: HashMap<&str, Option<MetricKind>> = HashMap::new();
        for (index, point) in &prepared {
            if cancel.is_cancelled() {
                return Err(MetronError::Cancelled);
            }
            let stored_kind = match existing.get(point.name.as_str()) {
                Some(kind) => *kind,
                None => {
                    let kind = self.registry.lookup(&point.name).await?.map(|m| m.kind);
                    existing.insert(point.name.as_str(), kind);
                    kind
                }
            };
            if let Some(stored_kind) = stored_kind {
                if stored_kind != point.kind {
                    let conflict = MetronError::TypeConflict {
                        name: point.name.clone(),
                        existing: stored_kind,
                        requested: point.kind,
                    };
                    issues.push(BatchIssue::at(*index, &conflict));
                }
            }
        }

        if !issues.is_empty() {
            issues.sort_by_key(|issue| issue.index);
            tracing::warn!(
                "Rejected batch of {} points with {} issues",
                inputs.len(),
                issues.len()
            );
            return Err(MetronError::Validation { issues });
        }

        Ok(prepared.into_iter().map(|(_, point)| point).collect())
    }

    async fn write(&self, points: Vec<NewPoint>, names: &[&str]) -> Result<Vec<Point>> {
        match bounded(self.timeout, "insert_batch", self.store.insert_batch(points)).await {
            Ok(stored) => Ok(stored),
            Err(e) => {
                // A concurrent delete may have removed a cached metric.
                for name in names {
                    self.registry.invalidate(name);
                }
                Err(e)
            }
        }
    }
}

fn parse_value(text: &str) -> Result<Decimal> {
    text.parse::<Decimal>().map_err(|e| MetronError::InvalidValue {
        input: text.to_string(),
        reason: e.to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================
