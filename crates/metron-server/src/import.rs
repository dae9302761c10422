//! Metron Bulk Import
//!
//! Reads points from JSON lines and writes them through the engine in
//! batches. One object per line:
//!
//! `{"name": "requests", "kind": "counter", "value": 3, "recorded_at": "2024-03-01T10:15:00Z"}`
//!
//! Lines that are not valid JSON are skipped. A batch rejected by
//! validation is skipped as a whole; any other engine error stops the import.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use metron_common::{MetronError, Result};
use metron_timeseries::{CancellationToken, MetricsEngine, PointInput};
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Most per-line problems kept in a summary.
const MAX_REPORTED_PROBLEMS: usize = 100;

// =============================================================================
// Import Summary
// =============================================================================

/// A line that could not be imported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineProblem {
    pub line: usize,
    pub reason: String,
}

/// Outcome of an import run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub lines: usize,
    pub points_accepted: usize,
    pub points_rejected: usize,
    pub batches_committed: usize,
    pub batches_rejected: usize,
    pub malformed_lines: usize,
    pub problems: Vec<LineProblem>,
}

impl ImportSummary {
    fn problem(&mut self, line: usize, reason: String) {
        if self.problems.len() < MAX_REPORTED_PROBLEMS {
            self.problems.push(LineProblem { line, reason });
        }
    }
}

// =============================================================================
// Import
// =============================================================================

/// Import a JSON lines file.
pub async fn import_file(
    engine: &MetricsEngine,
    path: &Path,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let file = File::open(path)?;
    tracing::info!("Importing points from {}", path.display());
    import_reader(engine, BufReader::new(file), batch_size, cancel).await
}

/// Import JSON lines from any buffered reader.
pub async fn import_reader<R: BufRead>(
    engine: &MetricsEngine,
    reader: R,
    batch_size: usize,
    cancel: &CancellationToken,
) -> Result<ImportSummary> {
    let batch_size = batch_size.clamp(1, engine.config().ingest.max_batch_size);
    let mut summary = ImportSummary::default();
    let mut pending: Vec<PointInput> = Vec::with_capacity(batch_size);
    let mut pending_lines: Vec<usize> = Vec::with_capacity(batch_size);

    for (offset, line) in reader.lines().enumerate() {
        let line_no = offset + 1;
        let line = line?;
        summary.lines += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<PointInput>(trimmed) {
            Ok(input) => {
                pending.push(input);
                pending_lines.push(line_no);
            }
            Err(e) => {
                summary.malformed_lines += 1;
                summary.problem(line_no, format!("malformed JSON: {}", e));
                continue;
            }
        }

        if pending.len() == batch_size {
            flush(engine, &mut pending, &mut pending_lines, &mut summary, cancel).await?;
        }
    }

    if !pending.is_empty() {
        flush(engine, &mut pending, &mut pending_lines, &mut summary, cancel).await?;
    }

    tracing::info!(
        "Import finished: {} points accepted, {} rejected, {} malformed lines",
        summary.points_accepted,
        summary.points_rejected,
        summary.malformed_lines
    );
    Ok(summary)
}

async fn flush(
    engine: &MetricsEngine,
    pending: &mut Vec<PointInput>,
    pending_lines: &mut Vec<usize>,
    summary: &mut ImportSummary,
    cancel: &CancellationToken,
) -> Result<()> {
    let batch = std::mem::take(pending);
    let lines = std::mem::take(pending_lines);
    let size = batch.len();

    match engine.ingest_batch(batch, cancel).await {
        Ok(receipt) => {
            summary.batches_committed += 1;
            summary.points_accepted += receipt.accepted;
            Ok(())
        }
        Err(MetronError::Validation { issues }) => {
            summary.batches_rejected += 1;
            summary.points_rejected += size;
            for issue in issues {
                let line = issue
                    .index
                    .and_then(|i| lines.get(i).copied())
                    .unwrap_or_else(|| lines.first().copied().unwrap_or(0));
                summary.problem(line, issue.reason);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use metron_common::MetronConfig;
    use std::io::Cursor;

    fn engine() -> MetricsEngine {
        MetricsEngine::open(MetronConfig::development()).expect("engine should open")
    }

    fn line(name: &str, kind: &str, value: &str, minutes_ago: i64) -> String {
        let at = (Utc::now() - Duration::minutes(minutes_ago)).to_rfc3339();
        format!(
            r#"{{"name":"{}","kind":"{}","value":{},"recorded_at":"{}"}}"#,
            name, kind, value, at
        )
    }

    #[tokio::test]
    async fn test_import_in_batches() {
        let engine = engine();
        let input: String = (0..25)
            .map(|i| line("requests", "counter", "1", i) + "\n")
            .collect();

        let summary = import_reader(&engine, Cursor::new(input), 10, &CancellationToken::new())
            .await
            .expect("import should succeed");

        assert_eq!(summary.lines, 25);
        assert_eq!(summary.points_accepted, 25);
        assert_eq!(summary.batches_committed, 3);
        assert_eq!(engine.stats().store.points, 25);
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let engine = engine();
        let input = format!(
            "{}\nnot json\n\n{}\n",
            line("cpu", "value", "\"0.5\"", 1),
            line("cpu", "value", "0.75", 2)
        );

        let summary = import_reader(&engine, Cursor::new(input), 100, &CancellationToken::new())
            .await
            .expect("import should succeed");

        assert_eq!(summary.malformed_lines, 1);
        assert_eq!(summary.points_accepted, 2);
        assert_eq!(summary.problems[0].line, 2);
    }

    #[tokio::test]
    async fn test_rejected_batch_reports_lines() {
        let engine = engine();
        let input = format!(
            "{}\n{}\n{}\n",
            line("temp", "value", "1", 1),
            line("temp", "value", "\"NaN\"", 1),
            line("temp", "value", "3", 1)
        );

        let summary = import_reader(&engine, Cursor::new(input), 100, &CancellationToken::new())
            .await
            .expect("import should succeed");

        assert_eq!(summary.batches_rejected, 1);
        assert_eq!(summary.points_rejected, 3);
        assert_eq!(summary.points_accepted, 0);
        assert_eq!(summary.problems.len(), 1);
        assert_eq!(summary.problems[0].line, 2);
        assert_eq!(engine.stats().store.points, 0);
    }

    #[tokio::test]
    async fn test_import_file() {
        let engine = engine();
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("points.jsonl");
        std::fs::write(&path, line("disk", "value", "12", 5) + "\n").expect("write input");

        let summary = import_file(&engine, &path, 1000, &CancellationToken::new())
            .await
            .expect("import should succeed");
        assert_eq!(summary.points_accepted, 1);

        let missing = import_file(&engine, &dir.path().join("absent"), 10, &CancellationToken::new()).await;
        assert!(matches!(missing, Err(MetronError::Io(_))));
    }
}
