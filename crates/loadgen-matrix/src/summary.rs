// crates/loadgen-matrix/src/summary.rs
// ============================================================================
// Module: Matrix Summary
// Description: Markdown rendering of a completed matrix.
// Purpose: Produce `summary.md` next to the per-cell reports.
// Dependencies: time
// ============================================================================

//! ## Overview
//! Renders one markdown table row per cell in execution order, followed by a
//! section listing failed cells with the location of their captured output.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::MatrixError;
use crate::runner::MatrixSummary;

/// Formats unix milliseconds as RFC 3339, falling back to the raw value.
pub(crate) fn format_unix_millis(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|at| at.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}

/// Renders the summary document.
#[must_use]
pub fn render_summary(summary: &MatrixSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Matrix Summary\n");
    let _ = writeln!(out, "- Output directory: `{}`", summary.output_dir.display());
    if let Some(run_id) = summary.run_id {
        let _ = writeln!(out, "- Run id: {run_id}");
    }
    let _ = writeln!(out, "- Started: {}", format_unix_millis(summary.started_at));
    let _ = writeln!(out, "- Finished: {}", format_unix_millis(summary.finished_at));
    let _ = writeln!(
        out,
        "- Configurations: {} ({} succeeded, {} failed)\n",
        summary.outcomes.len(),
        summary.success_count(),
        summary.fail_count()
    );

    let _ = writeln!(
        out,
        "| Configuration | DBs | Conn/DB | Workers/DB | Total Ops | Ops/sec | p95 (ms) | p99 (ms) | Status |"
    );
    let _ = writeln!(out, "|---|---:|---:|---:|---:|---:|---:|---:|---|");
    for outcome in &summary.outcomes {
        let record = &outcome.record;
        let status = if record.success { "ok" } else { "failed" };
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} | {} | {:.2} | {:.3} | {:.3} | {status} |",
            record.config_name,
            record.databases,
            record.connections_per_db,
            record.workers_per_db,
            record.total_ops,
            record.throughput,
            record.p95_latency_ms,
            record.p99_latency_ms,
        );
    }

    let failed: Vec<_> = summary.outcomes.iter().filter(|outcome| !outcome.record.success).collect();
    if !failed.is_empty() {
        let _ = writeln!(out, "\n## Failures\n");
        for outcome in failed {
            let _ = writeln!(out, "- {}: see `{}.log`", outcome.record.config_name, outcome.record.config_name);
        }
    }
    out
}

/// Writes the summary document to `path`.
///
/// # Errors
///
/// Returns [`MatrixError::Io`] when the file cannot be written.
pub fn write_summary(path: &Path, summary: &MatrixSummary) -> Result<(), MatrixError> {
    fs::write(path, render_summary(summary))
        .map_err(|err| MatrixError::Io(format!("{}: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::format_unix_millis;

    #[test]
    fn timestamps_render_as_rfc3339() {
        assert_eq!(format_unix_millis(0), "1970-01-01T00:00:00Z");
        assert!(format_unix_millis(86_400_000).starts_with("1970-01-02T00:00:00"));
    }
}
