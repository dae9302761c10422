//! Metron Query Arguments
//!
//! Turns command line query arguments into an aggregation query. The range
//! is either explicit RFC 3339 bounds or a trailing window such as `2h`.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use chrono::{DateTime, Duration, Utc};
use metron_common::{MetronError, Result};
use metron_timeseries::{AggregateFunction, AggregateQuery, BucketWidth};

// =============================================================================
// Query Arguments
// =============================================================================

#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub metrics: Vec<String>,
    pub function: String,
    pub width: String,
    pub from: Option<String>,
    pub to: Option<String>,
    pub last: Option<String>,
}

impl QueryArgs {
    /// Build the query relative to `now`.
    pub fn build(&self, now: DateTime<Utc>) -> Result<AggregateQuery> {
        let function: AggregateFunction = self
            .function
            .parse()
            .map_err(|e| MetronError::Configuration(format!("--function: {}", e)))?;
        let width: BucketWidth = self
            .width
            .parse()
            .map_err(|e| MetronError::Configuration(format!("--width: {}", e)))?;
        let (start, end) = self.range(now)?;

        let metrics: Vec<&str> = self
            .metrics
            .iter()
            .flat_map(|m| m.split(','))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect();

        Ok(AggregateQuery::new(metrics, function, width, start, end))
    }

    fn range(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        match (&self.last, &self.from) {
            (Some(_), Some(_)) => Err(MetronError::InvalidRange(
                "use either --last or --from, not both".to_string(),
            )),
            (Some(window), None) => {
                let end = match &self.to {
                    Some(to) => parse_time(to)?,
                    None => now,
                };
                let start = end
                    .checked_sub_signed(parse_window(window)?)
                    .ok_or_else(|| {
                        MetronError::InvalidRange(format!(
                            "window {:?} reaches past the earliest representable time",
                            window
                        ))
                    })?;
                Ok((start, end))
            }
            (None, Some(from)) => {
                let end = match &self.to {
                    Some(to) => parse_time(to)?,
                    None => now,
                };
                Ok((parse_time(from)?, end))
            }
            (None, None) => Err(MetronError::InvalidRange(
                "a range is required: --from/--to or --last".to_string(),
            )),
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

fn parse_time(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| MetronError::InvalidRange(format!("bad timestamp {:?}: {}", text, e)))
}

/// Parse a trailing window: a positive integer followed by s, m, h or d.
pub fn parse_window(text: &str) -> Result<Duration> {
    let bad = || MetronError::InvalidRange(format!("bad window {:?}", text));

    let text = text.trim();
    let (split, _) = text.char_indices().last().ok_or_else(bad)?;
    let (amount, unit) = text.split_at(split);
    let amount: i64 = amount.parse().map_err(|_| bad())?;
    if amount <= 0 {
        return Err(bad());
    }

    let window = match unit {
        "s" => Duration::try_seconds(amount),
        "m" => Duration::try_minutes(amount),
        "h" => Duration::try_hours(amount),
        "d" => Duration::try_days(amount),
        _ => None,
    };
    window.ok_or_else(bad)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn args() -> QueryArgs {
        QueryArgs {
            metrics: vec!["requests".to_string()],
            function: "sum".to_string(),
            width: "hour".to_string(),
            from: None,
            to: None,
            last: None,
        }
    }

    #[test]
    fn test_parse_window() {
        assert_eq!(parse_window("30m").expect("valid"), Duration::minutes(30));
        assert_eq!(parse_window("2h").expect("valid"), Duration::hours(2));
        assert_eq!(parse_window("7d").expect("valid"), Duration::days(7));
        assert!(parse_window("").is_err());
        assert!(parse_window("0h").is_err());
        assert!(parse_window("5w").is_err());
        assert!(parse_window("h").is_err());
    }

    #[test]
    fn test_trailing_window() {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let query = QueryArgs {
            last: Some("2h".to_string()),
            ..args()
        }
        .build(now)
        .expect("query should build");

        assert_eq!(query.range.start, now - Duration::hours(2));
        assert_eq!(query.range.end, now);
        assert_eq!(query.function, AggregateFunction::Sum);
        assert_eq!(query.width, BucketWidth::Hour);
    }

    #[test]
    fn test_explicit_bounds_and_metric_lists() {
        let now = Utc::now();
        let query = QueryArgs {
            metrics: vec!["cpu, mem".to_string(), "disk".to_string()],
            function: "avg".to_string(),
            from: Some("2024-03-01T10:00:00Z".to_string()),
            to: Some("2024-03-01T11:00:00Z".to_string()),
            ..args()
        }
        .build(now)
        .expect("query should build");

        assert_eq!(query.metrics, vec!["cpu", "mem", "disk"]);
        assert_eq!(
            query.range.start,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_window_beyond_representable_time() {
        let err = QueryArgs {
            last: Some("200000000d".to_string()),
            ..args()
        }
        .build(Utc::now())
        .expect_err("window past the earliest time should fail");
        assert!(matches!(err, MetronError::InvalidRange(_)));
    }

    #[test]
    fn test_range_required() {
        let err = args().build(Utc::now()).expect_err("missing range should fail");
        assert!(matches!(err, MetronError::InvalidRange(_)));

        let both = QueryArgs {
            last: Some("1h".to_string()),
            from: Some("2024-03-01T10:00:00Z".to_string()),
            ..args()
        };
        assert!(both.build(Utc::now()).is_err());
    }
}
