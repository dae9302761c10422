//! Metron Server
//!
//! Runtime pieces of the `metrond` binary: configuration loading, bulk
//! import of JSON lines and query argument handling.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

pub mod config;
pub mod import;
pub mod query;

pub use config::{load_config, ConfigOverrides};
pub use import::{import_file, import_reader, ImportSummary, LineProblem};
pub use query::{parse_window, QueryArgs};
