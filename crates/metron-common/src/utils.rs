//! Metron Utils - Utility Functions
//!
//! Metric name validation and checksum helpers shared across crates.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{MetronError, Result};

/// Longest accepted metric name, in characters.
pub const MAX_METRIC_NAME_LEN: usize = 191;

// =============================================================================
// Name Validation
// =============================================================================

/// Check a metric name: 1..=191 characters from `[A-Za-z0-9._-]`.
pub fn validate_metric_name(name: &str) -> Result<()> {
    let invalid = |reason: String| MetronError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }

    let length = name.chars().count();
    if length > MAX_METRIC_NAME_LEN {
        return Err(invalid(format!(
            "name is {} characters, at most {} allowed",
            length, MAX_METRIC_NAME_LEN
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(invalid(format!("character {:?} is not allowed", bad)));
    }

    Ok(())
}

// =============================================================================
// Checksum Functions
// =============================================================================

/// Compute CRC32 checksum for data integrity verification.
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Verify data against expected CRC32 checksum.
#[inline]
pub fn verify_crc32(data: &[u8], expected: u32) -> bool {
    crc32(data) == expected
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["requests", "api.latency_ms", "cpu-0", "A.b_C-9"] {
            assert!(validate_metric_name(name).is_ok(), "{}", name);
        }
        assert!(validate_metric_name(&"x".repeat(MAX_METRIC_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        assert!(validate_metric_name("").is_err());
        assert!(validate_metric_name(&"x".repeat(MAX_METRIC_NAME_LEN + 1)).is_err());
        for name in ["has space", "slash/name", "colon:name", "émoji", "tab\t"] {
            let err = validate_metric_name(name).expect_err("name should be rejected");
            assert!(matches!(err, MetronError::InvalidName { .. }), "{}", name);
        }
    }

    #[test]
    fn test_crc32() {
        let data = b"metron point log";
        let checksum = crc32(data);
        assert!(verify_crc32(data, checksum));
        assert!(!verify_crc32(b"metron point lag", checksum));
    }
}
