//! Tabular results and CSV persistence

use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

use crate::metrics::BenchmarkResult;

/// CSV header, in `BenchmarkResult` field order
pub const COLUMNS: [&str; 12] = [
    "model",
    "prompt",
    "response",
    "ttft",
    "total_latency",
    "output_tokens",
    "input_tokens",
    "tps",
    "cost",
    "success",
    "quality_score",
    "error",
];

/// One row per trial
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportTable {
    rows: Vec<BenchmarkResult>,
}

impl ReportTable {
    pub fn from_results(results: &[BenchmarkResult]) -> Self {
        ReportTable {
            rows: results.to_vec(),
        }
    }

    /// Copies `results` with `quality_score` taken from `score`
    pub fn with_quality_scores<F>(results: &[BenchmarkResult], mut score: F) -> Self
    where
        F: FnMut(&BenchmarkResult) -> f64,
    {
        let rows = results
            .iter()
            .map(|r| BenchmarkResult {
                quality_score: score(r),
                ..r.clone()
            })
            .collect();
        ReportTable { rows }
    }

    pub fn from_rows(rows: Vec<BenchmarkResult>) -> Self {
        ReportTable { rows }
    }

    pub fn rows(&self) -> &[BenchmarkResult] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn quality_scores(&self) -> Vec<f64> {
        self.rows.iter().map(|r| r.quality_score).collect()
    }

    pub fn to_csv_writer<W: std::io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        wtr.write_record(COLUMNS)?;
        for row in &self.rows {
            wtr.serialize(row)?;
        }
        wtr.flush()?;
        Ok(())
    }
}

/// Writes the table as CSV, replacing any existing file at `path`
pub fn save_report(table: &ReportTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    table
        .to_csv_writer(file)
        .with_context(|| format!("Failed to write report file: {}", path.display()))?;

    info!("Report saved to {}", path.display());
    Ok(())
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(width.saturating_sub(3)).collect();
        out.push_str("...");
        out
    }
}

pub fn print_results(table: &ReportTable) {
    println!();
    println!("Benchmark Results:");
    println!(
        "{:<4} {:<32} {:>9} {:>9} {:>10} {:>8} {:>8}",
        "#", "model", "ttft", "tps", "cost", "success", "quality"
    );
    println!("{}", "-".repeat(86));
    for (i, r) in table.rows().iter().enumerate() {
        println!(
            "{:<4} {:<32} {:>9.4} {:>9.2} {:>10.6} {:>8} {:>8.3}",
            i,
            truncate(&r.model, 32),
            r.ttft,
            r.tps,
            r.cost,
            r.success,
            r.quality_score
        );
    }
    let failures: Vec<&BenchmarkResult> = table.rows().iter().filter(|r| !r.success).collect();
    if !failures.is_empty() {
        println!();
        println!("Failures: {}", failures.len());
        for r in failures {
            println!(
                "  {} / {}: {}",
                r.model,
                truncate(&r.prompt, 40),
                r.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
