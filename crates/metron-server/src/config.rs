//! Metron Server Configuration
//!
//! Loads the engine configuration from TOML and overlays command line
//! settings on top of it.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use metron_common::{MetronConfig, Result};
use std::path::{Path, PathBuf};

// =============================================================================
// Overrides
// =============================================================================

/// Settings given on the command line. Each one, when present, replaces the
/// value from the configuration file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub data_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub no_retention: bool,
    pub max_batch_size: Option<usize>,
    pub no_sync: bool,
}

impl ConfigOverrides {
    pub fn apply(&self, config: &mut MetronConfig) {
        if let Some(dir) = &self.data_dir {
            config.storage.data_directory = Some(dir.clone());
        }
        if let Some(days) = self.retention_days {
            config.retention.retention_days = days;
        }
        if self.no_retention {
            config.retention.enabled = false;
        }
        if let Some(size) = self.max_batch_size {
            config.ingest.max_batch_size = size;
        }
        if self.no_sync {
            config.storage.sync_writes = false;
        }
    }
}

// =============================================================================
// Loading
// =============================================================================

/// Load configuration: defaults, then the file if given, then overrides.
pub fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<MetronConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!("Loading configuration from {}", path.display());
            MetronConfig::from_file(path)?
        }
        None => MetronConfig::default(),
    };

    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use metron_common::MetronError;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load_config(None, &ConfigOverrides::default()).expect("defaults should load");
        assert_eq!(config.retention.retention_days, 30);
        assert!(config.retention.enabled);
        assert!(config.storage.data_directory.is_none());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file should be created");
        writeln!(
            file,
            "[retention]\nretention_days = 90\n\n[ingest]\nmax_batch_size = 500"
        )
        .expect("write config");

        let overrides = ConfigOverrides {
            data_dir: Some(PathBuf::from("/tmp/metron-data")),
            retention_days: Some(7),
            ..Default::default()
        };
        let config = load_config(Some(file.path()), &overrides).expect("config should load");

        assert_eq!(config.retention.retention_days, 7);
        assert_eq!(config.ingest.max_batch_size, 500);
        assert_eq!(
            config.storage.data_directory.as_deref(),
            Some(Path::new("/tmp/metron-data"))
        );
    }

    #[test]
    fn test_invalid_override_rejected() {
        let overrides = ConfigOverrides {
            max_batch_size: Some(0),
            ..Default::default()
        };
        let err = load_config(None, &overrides).expect_err("zero batch size should be rejected");
        assert!(matches!(err, MetronError::Configuration(_)));
    }

    #[test]
    fn test_disabling_retention_skips_retention_checks() {
        let overrides = ConfigOverrides {
            retention_days: Some(0),
            no_retention: true,
            ..Default::default()
        };
        let config = load_config(None, &overrides).expect("config should load");
        assert!(!config.retention.enabled);
    }
}
