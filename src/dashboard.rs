//! Terminal summary of saved results files
//!
//! Reads `results_*.csv` files written by a benchmark run and renders the key
//! indicators and a per-model comparison.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::metrics::BenchmarkResult;
use crate::report::ReportTable;
use crate::{mean, percentile};

pub fn load_results_csv(path: impl AsRef<Path>) -> Result<ReportTable> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open results file: {}", path.display()))?;
    let rows = reader
        .deserialize::<BenchmarkResult>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse results file: {}", path.display()))?;
    Ok(ReportTable::from_rows(rows))
}

/// `results_*.csv` files directly under `dir`, sorted by name
pub fn find_results_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?
    {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("results_") && n.ends_with(".csv"))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Headline numbers over every row
#[derive(Debug, Clone, PartialEq)]
pub struct Kpis {
    pub avg_ttft: f64,
    pub avg_tps: f64,
    pub total_cost: f64,
}

impl Kpis {
    pub fn from_table(table: &ReportTable) -> Self {
        let ttft: Vec<f64> = table.rows().iter().map(|r| r.ttft).collect();
        let tps: Vec<f64> = table.rows().iter().map(|r| r.tps).collect();
        Kpis {
            avg_ttft: mean(&ttft),
            avg_tps: mean(&tps),
            total_cost: table.rows().iter().map(|r| r.cost).sum(),
        }
    }
}

/// Aggregates for one model; latency figures cover successful trials only
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSummary {
    pub model: String,
    pub trials: usize,
    pub successes: usize,
    pub avg_ttft: f64,
    pub avg_latency: f64,
    pub p95_latency: f64,
    pub avg_tps: f64,
    pub total_cost: f64,
    pub avg_quality: f64,
}

impl ModelSummary {
    pub fn success_rate(&self) -> f64 {
        if self.trials == 0 {
            return 0.0;
        }
        self.successes as f64 / self.trials as f64 * 100.0
    }
}

/// One summary per model, ordered by model name
pub fn summarize_by_model(table: &ReportTable) -> Vec<ModelSummary> {
    let mut groups: BTreeMap<&str, Vec<&BenchmarkResult>> = BTreeMap::new();
    for row in table.rows() {
        groups.entry(row.model.as_str()).or_default().push(row);
    }

    groups
        .into_iter()
        .map(|(model, rows)| {
            let ok: Vec<&BenchmarkResult> = rows.iter().copied().filter(|r| r.success).collect();
            let ttft: Vec<f64> = ok.iter().map(|r| r.ttft).collect();
            let mut latency: Vec<f64> = ok.iter().map(|r| r.total_latency).collect();
            latency.sort_by(|a, b| a.total_cmp(b));
            let tps: Vec<f64> = ok.iter().map(|r| r.tps).collect();
            let quality: Vec<f64> = ok.iter().map(|r| r.quality_score).collect();

            ModelSummary {
                model: model.to_string(),
                trials: rows.len(),
                successes: ok.len(),
                avg_ttft: mean(&ttft),
                avg_latency: mean(&latency),
                p95_latency: percentile(&latency, 95.0),
                avg_tps: mean(&tps),
                total_cost: rows.iter().map(|r| r.cost).sum(),
                avg_quality: mean(&quality),
            }
        })
        .collect()
}

/// Index of the best value; zeros are ignored when lower is better
fn find_winner(values: &[f64], lower_is_better: bool) -> Option<usize> {
    if values.iter().all(|&v| v == 0.0) {
        return None;
    }
    if lower_is_better {
        values
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    } else {
        values
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(i, _)| i)
    }
}

pub fn write_summary<W: Write>(out: &mut W, title: &str, table: &ReportTable) -> Result<()> {
    let kpis = Kpis::from_table(table);
    let summaries = summarize_by_model(table);

    writeln!(out, "============ {} ============", title)?;
    writeln!(
        out,
        "Trials:                                  {}",
        table.len()
    )?;
    writeln!(
        out,
        "Avg TTFT (s):                            {:.4}",
        kpis.avg_ttft
    )?;
    writeln!(
        out,
        "Avg TPS:                                 {:.2}",
        kpis.avg_tps
    )?;
    writeln!(
        out,
        "Total Cost ($):                          {:.4}",
        kpis.total_cost
    )?;

    if summaries.is_empty() {
        writeln!(out, "==================================================")?;
        return Ok(());
    }

    let names: Vec<&str> = summaries.iter().map(|s| s.model.as_str()).collect();
    let col_width = 14;
    let metric_width = 22;
    let total_width = metric_width + (col_width + 3) * names.len() + 10;

    writeln!(out, "\n## Per-Model Comparison\n")?;
    write!(out, "{:<width$}", "Metric", width = metric_width)?;
    for name in &names {
        write!(out, " | {:<width$}", name, width = col_width)?;
    }
    writeln!(out, " | Winner")?;
    writeln!(out, "{}", "-".repeat(total_width))?;

    macro_rules! write_row {
        ($label:expr, $values:expr, $format_fn:expr, $lower_is_better:expr) => {{
            let values: Vec<f64> = $values;
            let winner_idx = find_winner(&values, $lower_is_better);
            write!(out, "{:<width$}", $label, width = metric_width)?;
            for v in &values {
                write!(out, " | {:<width$}", $format_fn(*v), width = col_width)?;
            }
            match winner_idx {
                Some(idx) => writeln!(out, " | {}", names[idx])?,
                None => writeln!(out, " | -")?,
            }
        }};
    }

    write_row!(
        "Success Rate",
        summaries.iter().map(|s| s.success_rate()).collect(),
        |v: f64| format!("{:.1}%", v),
        false
    );
    write_row!(
        "Avg TTFT (s)",
        summaries.iter().map(|s| s.avg_ttft).collect(),
        |v: f64| format!("{:.3}", v),
        true
    );
    write_row!(
        "Avg Latency (s)",
        summaries.iter().map(|s| s.avg_latency).collect(),
        |v: f64| format!("{:.3}", v),
        true
    );
    write_row!(
        "P95 Latency (s)",
        summaries.iter().map(|s| s.p95_latency).collect(),
        |v: f64| format!("{:.3}", v),
        true
    );
    write_row!(
        "Avg TPS",
        summaries.iter().map(|s| s.avg_tps).collect(),
        |v: f64| format!("{:.2}", v),
        false
    );
    write_row!(
        "Total Cost ($)",
        summaries.iter().map(|s| s.total_cost).collect(),
        |v: f64| format!("{:.6}", v),
        true
    );
    write_row!(
        "Avg Quality",
        summaries.iter().map(|s| s.avg_quality).collect(),
        |v: f64| format!("{:.3}", v),
        false
    );

    // Quality per dollar: the efficiency frontier in one number
    write_row!(
        "Quality / $",
        summaries
            .iter()
            .map(|s| {
                if s.total_cost > 0.0 {
                    s.avg_quality / s.total_cost
                } else {
                    0.0
                }
            })
            .collect(),
        |v: f64| format!("{:.1}", v),
        false
    );

    writeln!(out, "\n{}", "=".repeat(total_width))?;
    Ok(())
}

pub fn print_summary(title: &str, table: &ReportTable) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    writeln!(out)?;
    write_summary(&mut out, title, table)
}

pub fn save_summary_to_file(
    tables: &[(String, ReportTable)],
    output_path: impl AsRef<Path>,
) -> Result<()> {
    let output_path = output_path.as_ref();
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut file = std::fs::File::create(output_path)
        .with_context(|| format!("Failed to create summary file: {}", output_path.display()))?;

    writeln!(file, "# Benchmark Summary")?;
    writeln!(
        file,
        "# Generated: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(file, "#")?;
    writeln!(file)?;

    for (title, table) in tables {
        write_summary(&mut file, title, table)?;
        writeln!(file)?;
    }

    info!("Summary saved to: {}", output_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial(model: &str, latency: f64, cost: f64, quality: f64) -> BenchmarkResult {
        BenchmarkResult {
            model: model.to_string(),
            prompt: "p".to_string(),
            response: "r".to_string(),
            ttft: latency / 4.0,
            total_latency: latency,
            output_tokens: 10,
            input_tokens: 1,
            tps: 10.0 / latency,
            cost,
            success: true,
            quality_score: quality,
            error: None,
        }
    }

    #[test]
    fn test_kpis() {
        let table = ReportTable::from_rows(vec![
            trial("a", 1.0, 0.01, 0.9),
            trial("b", 2.0, 0.03, 0.8),
        ]);
        let kpis = Kpis::from_table(&table);
        assert!((kpis.avg_ttft - 0.375).abs() < 1e-12);
        assert!((kpis.avg_tps - 7.5).abs() < 1e-12);
        assert!((kpis.total_cost - 0.04).abs() < 1e-12);
    }

    #[test]
    fn test_summaries_exclude_failed_latency() {
        let table = ReportTable::from_rows(vec![
            trial("a", 1.0, 0.01, 0.9),
            trial("a", 3.0, 0.01, 0.7),
            BenchmarkResult::failure("a", "q", "boom"),
        ]);
        let summaries = summarize_by_model(&table);
        assert_eq!(summaries.len(), 1);
        let a = &summaries[0];
        assert_eq!(a.trials, 3);
        assert_eq!(a.successes, 2);
        assert!((a.success_rate() - 200.0 / 3.0).abs() < 1e-9);
        assert!((a.avg_latency - 2.0).abs() < 1e-12);
        assert!((a.avg_quality - 0.8).abs() < 1e-12);
        assert_eq!(a.p95_latency, 3.0);
    }

    #[test]
    fn test_find_winner() {
        assert_eq!(find_winner(&[2.0, 1.0, 3.0], true), Some(1));
        assert_eq!(find_winner(&[2.0, 1.0, 3.0], false), Some(2));
        assert_eq!(find_winner(&[0.0, 2.0, 3.0], true), Some(1));
        assert_eq!(find_winner(&[0.0, 0.0], false), None);
    }

    #[test]
    fn test_write_summary_names_winners() {
        let table = ReportTable::from_rows(vec![
            trial("fast-cheap", 0.5, 0.001, 0.7),
            trial("slow-smart", 2.0, 0.05, 0.95),
        ]);
        let mut buf = Vec::new();
        write_summary(&mut buf, "demo", &table).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let line = |label: &str| {
            text.lines()
                .find(|l| l.starts_with(label) && l.contains(" | "))
                .unwrap_or_else(|| panic!("missing row {}", label))
                .to_string()
        };
        assert!(line("Avg Latency").ends_with("| fast-cheap"));
        assert!(line("Total Cost").ends_with("| fast-cheap"));
        assert!(line("Avg TPS").ends_with("| fast-cheap"));
        assert!(line("Avg Quality").ends_with("| slow-smart"));
    }

    #[test]
    fn test_find_results_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["results_b.csv", "results_a.csv", "notes.csv", "results_c.txt"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        let files = find_results_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["results_a.csv", "results_b.csv"]);
    }
}
