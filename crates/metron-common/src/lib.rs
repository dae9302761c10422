//! Metron Common - Shared Types and Utilities
//!
//! Foundational types, error handling, and configuration used across all
//! Metron components. Provides the core abstractions that keep the storage,
//! ingestion, and aggregation layers consistent with one another.
//!
//! Key Features:
//! - Unified error taxonomy with stable machine-readable kinds
//! - Core identifiers and records (MetricId, PointId, Metric, Point)
//! - Fixed-point decimal values for drift-free accumulation
//! - Configuration structures for every engine component
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod decimal;
pub mod error;
pub mod types;
pub mod utils;

pub use config::MetronConfig;
pub use decimal::{Decimal, DecimalParseError};
pub use error::{BatchIssue, ErrorKind, MetronError, Result, SkewDirection};
pub use types::*;
