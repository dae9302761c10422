//! Metron Time Series - Metrics Engine
//!
//! Write and aggregation engine for time-stamped numeric measurements.
//! Coordinates the metric registry, batch ingestion, bucketed aggregation
//! and retention over a shared value store.
//!
//! Key Features:
//! - Idempotent, race-safe metric creation with immutable kinds
//! - All-or-nothing batch ingestion with per-entry diagnostics
//! - Deterministic time-bucketed sum/avg/min/max/count
//! - Cancellable aggregation with scan and bucket limits
//! - Chunked retention sweeps that run alongside live traffic
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod aggregation;
pub mod engine;
pub mod ingest;
pub mod registry;
pub mod retention;
mod timeout;
pub mod types;

pub use aggregation::{AggregateFunction, Aggregator, BucketAccumulator, BucketWidth};
pub use engine::{EngineStats, MetricsEngine};
pub use ingest::{Ingestor, PreparedPoint};
pub use registry::MetricRegistry;
pub use retention::{RetentionSweeper, SweepReport, SweeperState};
pub use types::{
    AcceptedPoint, AggregateQuery, AggregateResult, Bucket, BatchReceipt, MetricSeries,
    PointInput, StoredPoint,
};

pub use tokio_util::sync::CancellationToken;
