//! Metron Config - Configuration Structures
//!
//! Configuration types for every Metron component. Loaded once at startup
//! from a TOML file (or built programmatically) and passed explicitly into
//! each component at construction; there is no runtime reconfiguration.
//!
//! Key Features:
//! - Storage configuration (data directory, sync policy, operation timeout)
//! - Ingestion limits (batch size, timestamp skew window)
//! - Query limits (bucket and scan budgets)
//! - Retention horizon and sweep schedule
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{MetronError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Widest accepted timestamp skew window.
pub const MAX_SKEW_WINDOW_SECS: u64 = 365 * SECONDS_PER_DAY;
/// Longest accepted retention horizon.
pub const MAX_RETENTION_DAYS: u32 = 36_500;
/// Longest accepted pause between scheduled sweeps.
pub const MAX_SWEEP_INTERVAL_SECS: u64 = 365 * SECONDS_PER_DAY;

// =============================================================================
// Storage Configuration
// =============================================================================

/// Configuration for the value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the point log. `None` keeps everything in memory.
    pub data_directory: Option<PathBuf>,
    pub sync_writes: bool,
    /// Upper bound for a single storage operation.
    pub operation_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: None,
            sync_writes: true,
            operation_timeout_ms: 5_000,
        }
    }
}

impl StorageConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

// =============================================================================
// Ingestion Configuration
// =============================================================================

/// Configuration for the ingestion path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub max_batch_size: usize,
    /// Allowed distance between `recorded_at` and server time, either way.
    pub skew_window_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1000,
            skew_window_secs: 7 * SECONDS_PER_DAY,
        }
    }
}

impl IngestConfig {
    /// The skew window, capped at [`MAX_SKEW_WINDOW_SECS`].
    pub fn skew_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.skew_window_secs.min(MAX_SKEW_WINDOW_SECS) as i64)
    }
}

// =============================================================================
// Query Configuration
// =============================================================================

/// Configuration for aggregation queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Most buckets a single metric's range may span.
    pub max_buckets: usize,
    /// Most points scanned for a single metric.
    pub max_scan_points: usize,
    /// Points folded between cancellation checks.
    pub cancel_check_interval: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_buckets: 10_000,
            max_scan_points: 1_000_000,
            cancel_check_interval: 4_096,
        }
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Configuration for the retention sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub enabled: bool,
    pub retention_days: u32,
    pub sweep_interval_secs: u64,
    /// Rows deleted per atomic chunk.
    pub chunk_size: usize,
    /// Deleted rows that accumulate across sweeps before the store is
    /// compacted.
    pub compact_after_deletes: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: 30,
            sweep_interval_secs: SECONDS_PER_DAY,
            chunk_size: 5_000,
            compact_after_deletes: 100_000,
        }
    }
}

impl RetentionConfig {
    /// The retention horizon, capped at [`MAX_RETENTION_DAYS`].
    pub fn horizon(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days.min(MAX_RETENTION_DAYS) as i64)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

// =============================================================================
// Top-Level Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MetronConfig {
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
    pub query: QueryConfig,
    pub retention: RetentionConfig,
}

impl MetronConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| MetronError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_batch_size == 0 {
            return Err(MetronError::Configuration(
                "ingest.max_batch_size must be positive".to_string(),
            ));
        }
        if self.storage.operation_timeout_ms == 0 {
            return Err(MetronError::Configuration(
                "storage.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.query.max_buckets == 0 || self.query.max_scan_points == 0 {
            return Err(MetronError::Configuration(
                "query limits must be positive".to_string(),
            ));
        }
        if self.query.cancel_check_interval == 0 {
            return Err(MetronError::Configuration(
                "query.cancel_check_interval must be positive".to_string(),
            ));
        }
        if self.ingest.skew_window_secs > MAX_SKEW_WINDOW_SECS {
            return Err(MetronError::Configuration(format!(
                "ingest.skew_window_secs must be at most {}",
                MAX_SKEW_WINDOW_SECS
            )));
        }
        // Manual sweeps use the horizon even when scheduling is off.
        if self.retention.retention_days > MAX_RETENTION_DAYS {
            return Err(MetronError::Configuration(format!(
                "retention.retention_days must be at most {}",
                MAX_RETENTION_DAYS
            )));
        }
        if self.retention.sweep_interval_secs > MAX_SWEEP_INTERVAL_SECS {
            return Err(MetronError::Configuration(format!(
                "retention.sweep_interval_secs must be at most {}",
                MAX_SWEEP_INTERVAL_SECS
            )));
        }
        if self.retention.enabled {
            if self.retention.retention_days == 0 {
                return Err(MetronError::Configuration(
                    "retention.retention_days must be positive".to_string(),
                ));
            }
            if self.retention.chunk_size == 0 || self.retention.sweep_interval_secs == 0 {
                return Err(MetronError::Configuration(
                    "retention chunk size and interval must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// In-memory configuration for tests and development.
    pub fn development() -> Self {
        Self::default()
    }
}

// =============================================================================
// Tests
// =============================================================================
