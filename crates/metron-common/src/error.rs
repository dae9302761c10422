//! Metron Error - Unified Error Types
//!
//! Error handling for every Metron operation. Each variant maps onto a stable
//! machine-readable [`ErrorKind`] that the request layer translates into its
//! own status signals, together with a human-readable message.
//!
//! Key Features:
//! - Validation errors carry enough detail to correct and resubmit
//! - Retryable error detection (storage faults and timeouts)
//! - User vs system error classification
//! - Seamless integration with std::io::Error
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::types::MetricKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Stable classification of every error the core can return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidName,
    MissingValue,
    InvalidValue,
    TimestampOutOfRange,
    TypeConflict,
    BatchTooLarge,
    ValidationError,
    MetricNotFound,
    InvalidRange,
    RangeTooLarge,
    StorageError,
    Cancelled,
    Configuration,
    InternalInvariantViolation,
}

impl ErrorKind {
    /// Machine-readable code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidName => "invalid_name",
            ErrorKind::MissingValue => "missing_value",
            ErrorKind::InvalidValue => "invalid_value",
            ErrorKind::TimestampOutOfRange => "timestamp_out_of_range",
            ErrorKind::TypeConflict => "type_conflict",
            ErrorKind::BatchTooLarge => "batch_too_large",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::MetricNotFound => "metric_not_found",
            ErrorKind::InvalidRange => "invalid_range",
            ErrorKind::RangeTooLarge => "range_too_large",
            ErrorKind::StorageError => "storage_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Configuration => "configuration",
            ErrorKind::InternalInvariantViolation => "internal_invariant_violation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which side of the skew window a rejected timestamp fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkewDirection {
    TooOld,
    TooFarInFuture,
}

impl fmt::Display for SkewDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkewDirection::TooOld => f.write_str("too old"),
            SkewDirection::TooFarInFuture => f.write_str("too far in the future"),
        }
    }
}

// =============================================================================
// Batch Issues
// =============================================================================

/// One rejected entry of a batch. `index` is `None` for batch-level problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchIssue {
    pub index: Option<usize>,
    pub kind: ErrorKind,
    pub reason: String,
}

impl BatchIssue {
    pub fn at(index: usize, error: &MetronError) -> Self {
        Self {
            index: Some(index),
            kind: error.kind(),
            reason: error.to_string(),
        }
    }

    pub fn batch(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Self {
            index: None,
            kind,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BatchIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.index {
            Some(index) => write!(f, "[{}] {}", index, self.reason),
            None => write!(f, "{}", self.reason),
        }
    }
}

fn describe_issues(issues: &[BatchIssue]) -> String {
    issues
        .iter()
        .map(|issue| issue.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Error Types
// =============================================================================

/// Unified error type for all Metron operations.
#[derive(Error, Debug)]
pub enum MetronError {
    // Validation errors
    #[error("invalid metric name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("metric {name:?} of kind {kind} requires a value")]
    MissingValue { name: String, kind: MetricKind },

    #[error("invalid value {input:?}: {reason}")]
    InvalidValue { input: String, reason: String },

    #[error("timestamp {recorded_at} is {direction}: allowed skew is {window_secs}s around {server_time}")]
    TimestampOutOfRange {
        recorded_at: DateTime<Utc>,
        server_time: DateTime<Utc>,
        window_secs: i64,
        direction: SkewDirection,
    },

    #[error("metric {name:?} is a {existing} metric and cannot be written as {requested}")]
    TypeConflict {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },

    #[error("batch of {size} points exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("batch rejected: {}", describe_issues(.issues))]
    Validation { issues: Vec<BatchIssue> },

    // Query errors
    #[error("metric not found: {0}")]
    MetricNotFound(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("range too large: {detail} (limit {limit})")]
    RangeTooLarge { detail: String, limit: usize },

    // Storage errors
    #[error("storage error: {0}")]
    Storage(String),

    #[error("storage operation {operation} timed out after {timeout:?}")]
    Timeout { operation: String, timeout: Duration },

    #[error("corruption detected: {0}")]
    Corruption(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Control errors
    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

// =============================================================================
// Type Aliases
// =============================================================================

/// Result type alias for Metron operations.
pub type Result<T> = std::result::Result<T, MetronError>;

// =============================================================================
// Error Classification
// =============================================================================

impl MetronError {
    /// The stable kind reported to callers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MetronError::InvalidName { .. } => ErrorKind::InvalidName,
            MetronError::MissingValue { .. } => ErrorKind::MissingValue,
            MetronError::InvalidValue { .. } => ErrorKind::InvalidValue,
            MetronError::TimestampOutOfRange { .. } => ErrorKind::TimestampOutOfRange,
            MetronError::TypeConflict { .. } => ErrorKind::TypeConflict,
            MetronError::BatchTooLarge { .. } => ErrorKind::BatchTooLarge,
            MetronError::Validation { .. } => ErrorKind::ValidationError,
            MetronError::MetricNotFound(_) => ErrorKind::MetricNotFound,
            MetronError::InvalidRange(_) => ErrorKind::InvalidRange,
            MetronError::RangeTooLarge { .. } => ErrorKind::RangeTooLarge,
            MetronError::Storage(_)
            | MetronError::Timeout { .. }
            | MetronError::Corruption(_)
            | MetronError::Io(_) => ErrorKind::StorageError,
            MetronError::Cancelled => ErrorKind::Cancelled,
            MetronError::Configuration(_) => ErrorKind::Configuration,
            MetronError::InternalInvariantViolation(_) => ErrorKind::InternalInvariantViolation,
        }
    }

    /// Returns true if the caller may safely retry the whole operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MetronError::Storage(_) | MetronError::Timeout { .. } | MetronError::Io(_)
        )
    }

    /// Returns true if the input itself was at fault.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidName
                | ErrorKind::MissingValue
                | ErrorKind::InvalidValue
                | ErrorKind::TimestampOutOfRange
                | ErrorKind::TypeConflict
                | ErrorKind::BatchTooLarge
                | ErrorKind::ValidationError
                | ErrorKind::MetricNotFound
                | ErrorKind::InvalidRange
                | ErrorKind::RangeTooLarge
        )
    }

    /// Per-entry detail for rejected batches.
    pub fn issues(&self) -> &[BatchIssue] {
        match self {
            MetronError::Validation { issues } => issues,
            _ => &[],
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes_are_stable() {
        let err = MetronError::BatchTooLarge { size: 1001, limit: 1000 };
        assert_eq!(err.kind(), ErrorKind::BatchTooLarge);
        assert_eq!(err.kind().code(), "batch_too_large");
        assert_eq!(err.to_string(), "batch of 1001 points exceeds the limit of 1000");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(MetronError::Storage("disk full".into()).is_retryable());
        assert!(MetronError::Timeout {
            operation: "scan".into(),
            timeout: Duration::from_millis(10)
        }
        .is_retryable());
        assert!(!MetronError::MetricNotFound("cpu".into()).is_retryable());
        assert!(!MetronError::InternalInvariantViolation("bug".into()).is_retryable());
    }

    #[test]
    fn test_user_error_classification() {
        let conflict = MetronError::TypeConflict {
            name: "requests".into(),
            existing: MetricKind::Counter,
            requested: MetricKind::Value,
        };
        assert!(conflict.is_user_error());
        assert!(conflict.to_string().contains("counter"));
        assert!(!MetronError::Storage("x".into()).is_user_error());
        assert!(!MetronError::Cancelled.is_user_error());
    }

    #[test]
    fn test_validation_message_lists_indices() {
        let missing = MetronError::MissingValue {
            name: "temp".into(),
            kind: MetricKind::Value,
        };
        let err = MetronError::Validation {
            issues: vec![
                BatchIssue::at(3, &missing),
                BatchIssue::batch(ErrorKind::ValidationError, "second problem"),
            ],
        };
        let message = err.to_string();
        assert!(message.contains("[3]"));
        assert!(message.contains("second problem"));
        assert_eq!(err.issues().len(), 2);
        assert_eq!(err.issues()[0].kind, ErrorKind::MissingValue);
    }
}
