//! Metron Metric Registry
//!
//! Maps metric names to their immutable kind. Unknown names are created on
//! first write through the store's atomic insert-or-get, so concurrent first
//! writes of the same name always agree on a single definition.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::timeout::bounded;
use metron_common::utils::validate_metric_name;
use metron_common::{Metric, MetricKind, MetronError, Result};
use metron_storage::ValueStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Metric Registry
// =============================================================================

/// Name to definition registry with a read-mostly cache over the store.
pub struct MetricRegistry {
    store: Arc<dyn ValueStore>,
    cache: RwLock<HashMap<String, Metric>>,
    timeout: Duration,
}

impl MetricRegistry {
    pub fn new(store: Arc<dyn ValueStore>, timeout: Duration) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    /// Find or create `name` with `kind`. Returns the definition and whether
    /// this call created it. A kind mismatch is a `TypeConflict` and leaves
    /// the stored definition untouched.
    pub async fn resolve(&self, name: &str, kind: MetricKind) -> Result<(Metric, bool)> {
        validate_metric_name(name)?;

        let cached = self.cache.read().get(name).cloned();
        if let Some(metric) = cached {
            return Self::check_kind(metric, kind).map(|m| (m, false));
        }

        let (metric, created) = bounded(
            self.timeout,
            "get_or_create_metric",
            self.store.get_or_create_metric(name, kind),
        )
        .await?;

        if created {
            tracing::info!("Created {} metric {} ({})", metric.kind, metric.name, metric.id);
        }
        self.cache.write().insert(metric.name.clone(), metric.clone());

        Self::check_kind(metric, kind).map(|m| (m, created))
    }

    fn check_kind(metric: Metric, requested: MetricKind) -> Result<Metric> {
        if metric.kind != requested {
            tracing::debug!(
                "Rejected {} write to {} metric {}",
                requested,
                metric.kind,
                metric.name
            );
            return Err(MetronError::TypeConflict {
                name: metric.name,
                existing: metric.kind,
                requested,
            });
        }
        Ok(metric)
    }

    /// Look up a metric without creating it.
    pub async fn lookup(&self, name: &str) -> Result<Option<Metric>> {
        let cached = self.cache.read().get(name).cloned();
        if cached.is_some() {
            return Ok(cached);
        }

        let found = bounded(self.timeout, "find_metric", self.store.find_metric(name)).await?;
        if let Some(metric) = &found {
            self.cache.write().insert(metric.name.clone(), metric.clone());
        }
        Ok(found)
    }

    /// All metrics, ordered by name.
    pub async fn list(&self) -> Result<Vec<Metric>> {
        bounded(self.timeout, "list_metrics", self.store.list_metrics()).await
    }

    /// Delete a metric and all of its points. Returns the points removed.
    pub async fn delete(&self, name: &str) -> Result<usize> {
        validate_metric_name(name)?;

        let removed = bounded(self.timeout, "delete_metric", self.store.delete_metric(name)).await;
        self.invalidate(name);

        match removed? {
            Some(points) => {
                tracing::info!("Deleted metric {} with {} points", name, points);
                Ok(points)
            }
            None => Err(MetronError::MetricNotFound(name.to_string())),
        }
    }

    /// Drop a cached definition so the next access reads the store.
    pub fn invalidate(&self, name: &str) {
        self.cache.write().remove(name);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.read().len()
    }
}

// =============================================================================
// Tests
// =============================================================================
