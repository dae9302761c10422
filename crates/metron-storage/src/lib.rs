//! Metron Storage - Value Store
//!
//! Durable, append-only storage of metric definitions and their points.
//! Readers always observe a consistent snapshot: batches become visible in
//! full or not at all, and deletions are applied one atomic chunk at a time.
//!
//! Key Features:
//! - Pluggable store trait used by the ingestion and aggregation engines
//! - Atomic insert-or-get for metric definitions
//! - Range scans indexed by (metric, recorded_at)
//! - Bounded deletes indexed by recorded_at for retention sweeps
//! - Write-ahead point log with checksummed records and crash recovery
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod backend;
pub mod local;
pub mod memory;
pub mod wal;

pub use backend::{PointKey, ScanResult, StoreStats, ValueStore};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use wal::{LogPosition, Mutation, PointLog, RecoveryResult};
