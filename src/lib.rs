//! LLM Benchmark Pro - latency, throughput, cost and quality comparison across
//! LLM providers

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::info;

pub mod config;
pub mod dashboard;
pub mod engine;
pub mod evaluation;
pub mod executor;
pub mod metrics;
pub mod provider;
pub mod report;

pub use config::{
    load_config_from_file, output_filename, parse_config, BenchmarkConfig, EvaluationConfig,
    ExecutionMode, PricingConfig, ProviderConfig, SimulationConfig, DEFAULT_CONFIG_PATH,
};
pub use dashboard::{
    find_results_files, load_results_csv, print_summary, save_summary_to_file,
    summarize_by_model, Kpis, ModelSummary,
};
pub use engine::BenchmarkEngine;
pub use evaluation::{
    synthetic_scores, DegradeReason, EvaluationEngine, EvaluationOutcome, LlmJudge,
    RelevancyJudge,
};
pub use executor::{
    is_mock_model, ExecutorSelector, LiveExecutor, SimulatedExecutor, TrialExecutor, MOCK_PREFIX,
};
pub use metrics::{
    calculate_cost, calculate_tps, estimate_tokens, BenchmarkResult, Price, PriceTable, TrialKey,
};
pub use provider::{build_http_client, Message, ProviderClient, ProviderRegistry};
pub use report::{print_results, save_report, ReportTable};

// ============================================================================
// Statistics
// ============================================================================

pub fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }
    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

// ============================================================================
// Pipeline
// ============================================================================

/// Everything a finished run produced
#[derive(Debug)]
pub struct RunOutput {
    pub results: Vec<BenchmarkResult>,
    pub evaluation: EvaluationOutcome,
    pub report_path: PathBuf,
}

/// Benchmark, evaluate and write `results_<name>.csv` under `output_dir`
pub async fn run_pipeline(
    config: &BenchmarkConfig,
    output_dir: impl AsRef<Path>,
) -> Result<RunOutput> {
    info!("Starting benchmark: {}", config.benchmark_name);
    info!("Models to test: {:?}", config.models);

    let engine = BenchmarkEngine::new(config)?;
    let results = engine.run_benchmarks().await?;

    let client = ProviderClient::new(
        build_http_client(config.evaluation.concurrency)?,
        ProviderRegistry::with_overrides(&config.providers),
        config.timeout(),
    );
    let evaluator = EvaluationEngine::new(&config.evaluation, client)?
        .simulated_run(config.mode == ExecutionMode::Simulated);
    let evaluation = evaluator.evaluate_results(&results).await;

    let report_path = output_dir.as_ref().join(config.output_filename());
    save_report(evaluation.table(), &report_path)?;

    Ok(RunOutput {
        results,
        evaluation,
        report_path,
    })
}
