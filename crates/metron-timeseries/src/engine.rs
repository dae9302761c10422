//! Metron Metrics Engine
//!
//! Core engine that wires the registry, ingestion, aggregation and retention
//! components to one value store and exposes the inbound operations.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::aggregation::Aggregator;
use crate::ingest::Ingestor;
use crate::registry::MetricRegistry;
use crate::retention::{RetentionSweeper, SweepReport};
use crate::types::{AggregateQuery, AggregateResult, BatchReceipt, PointInput, StoredPoint};
use metron_common::{ErrorKind, Metric, MetronConfig, MetronError, Result};
use metron_storage::{LocalStore, MemoryStore, StoreStats, ValueStore};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Engine Statistics
// =============================================================================

/// Engine statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineStats {
    pub points_ingested: u64,
    pub batches_committed: u64,
    pub batches_rejected: u64,
    pub queries_executed: u64,
    pub queries_cancelled: u64,
    pub errors: u64,
    pub store: StoreStats,
}

// =============================================================================
// Metrics Engine
// =============================================================================

/// The metrics ingestion and aggregation engine.
pub struct MetricsEngine {
    config: MetronConfig,
    store: Arc<dyn ValueStore>,
    registry: Arc<MetricRegistry>,
    ingestor: Ingestor,
    aggregator: Aggregator,
    sweeper: RetentionSweeper,
    stats: RwLock<EngineStats>,
}

impl MetricsEngine {
    /// Open an engine. Uses a durable local store when a data directory is
    /// configured, otherwise keeps everything in memory.
    pub fn open(config: MetronConfig) -> Result<Self> {
        config.validate()?;

        let store: Arc<dyn ValueStore> = match &config.storage.data_directory {
            Some(dir) => Arc::new(LocalStore::open(dir.clone(), config.storage.sync_writes)?),
            None => {
                tracing::info!("No data directory configured; points are kept in memory only");
                Arc::new(MemoryStore::new())
            }
        };

        Self::with_store(config, store)
    }

    /// Build an engine over an existing store.
    pub fn with_store(config: MetronConfig, store: Arc<dyn ValueStore>) -> Result<Self> {
        config.validate()?;

        let timeout = config.storage.operation_timeout();
        let registry = Arc::new(MetricRegistry::new(Arc::clone(&store), timeout));
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.ingest.clone(),
            timeout,
        );
        let aggregator = Aggregator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.query.clone(),
            timeout,
        );
        let sweeper = RetentionSweeper::new(Arc::clone(&store), config.retention.clone(), timeout);

        Ok(Self {
            config,
            store,
            registry,
            ingestor,
            aggregator,
            sweeper,
            stats: RwLock::new(EngineStats::default()),
        })
    }

    pub fn config(&self) -> &MetronConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Ingestion
    // -------------------------------------------------------------------------

    /// Write a single point.
    pub async fn ingest_one(&self, input: PointInput) -> Result<StoredPoint> {
        let result = self.ingestor.ingest_one(input).await;
        self.observe("ingest_one", &result);
        if result.is_ok() {
            self.stats.write().points_ingested += 1;
        }
        result
    }

    /// Write a batch atomically.
    pub async fn ingest_batch(
        &self,
        inputs: Vec<PointInput>,
        cancel: &CancellationToken,
    ) -> Result<BatchReceipt> {
        let result = self.ingestor.ingest_batch(inputs, cancel).await;
        self.observe("ingest_batch", &result);

        let mut stats = self.stats.write();
        match &result {
            Ok(receipt) => {
                stats.batches_committed += 1;
                stats.points_ingested += receipt.accepted as u64;
            }
            Err(_) => stats.batches_rejected += 1,
        }
        drop(stats);

        result
    }

    // -------------------------------------------------------------------------
    // Querying
    // -------------------------------------------------------------------------

    /// Execute an aggregation query.
    pub async fn aggregate(
        &self,
        query: &AggregateQuery,
        cancel: &CancellationToken,
    ) -> Result<AggregateResult> {
        let result = self.aggregator.aggregate(query, cancel).await;
        self.observe("aggregate", &result);

        let mut stats = self.stats.write();
        stats.queries_executed += 1;
        if matches!(result, Err(MetronError::Cancelled)) {
            stats.queries_cancelled += 1;
        }
        drop(stats);

        result
    }

    // -------------------------------------------------------------------------
    // Metric Administration
    // -------------------------------------------------------------------------

    pub async fn lookup_metric(&self, name: &str) -> Result<Option<Metric>> {
        self.registry.lookup(name).await
    }

    pub async fn list_metrics(&self) -> Result<Vec<Metric>> {
        self.registry.list().await
    }

    /// Delete a metric and every point it owns.
    pub async fn delete_metric(&self, name: &str) -> Result<usize> {
        let result = self.registry.delete(name).await;
        self.observe("delete_metric", &result);
        result
    }

    // -------------------------------------------------------------------------
    // Retention
    // -------------------------------------------------------------------------

    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }

    /// Run a retention sweep now. `None` if one is already running.
    pub async fn sweep_now(&self) -> Option<SweepReport> {
        self.sweeper.sweep_now().await
    }

    /// Start scheduled retention if enabled in the configuration.
    pub fn start_retention(&self) -> bool {
        if !self.config.retention.enabled {
            tracing::info!("Retention disabled; points are kept indefinitely");
            return false;
        }
        self.sweeper.start()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stop background work and flush the store.
    pub async fn shutdown(&self) -> Result<()> {
        self.sweeper.stop().await;
        self.store.sync().await?;
        tracing::info!("Metrics engine shut down");
        Ok(())
    }

    pub fn stats(&self) -> EngineStats {
        let mut stats = self.stats.read().clone();
        stats.store = self.store.stats();
        stats
    }

    fn observe<T>(&self, operation: &str, result: &Result<T>) {
        let Err(e) = result else {
            return;
        };

        if e.kind() == ErrorKind::InternalInvariantViolation {
            tracing::error!("{} aborted: {}", operation, e);
        } else if !e.is_user_error() && e.kind() != ErrorKind::Cancelled {
            tracing::warn!("{} failed: {}", operation, e);
        }
        self.stats.write().errors += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================
