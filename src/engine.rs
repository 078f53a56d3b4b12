//! Concurrent fan-out of every (model, prompt) trial

use anyhow::Result;
use async_channel::{bounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info};

use crate::config::BenchmarkConfig;
use crate::executor::ExecutorSelector;
use crate::metrics::BenchmarkResult;
use crate::provider::{build_http_client, ProviderClient, ProviderRegistry};

pub struct BenchmarkEngine {
    models: Vec<String>,
    prompts: Vec<String>,
    concurrency: Option<usize>,
    executors: ExecutorSelector,
}

impl BenchmarkEngine {
    /// Engine with live and simulated executors built from the config
    pub fn new(config: &BenchmarkConfig) -> Result<Self> {
        let pool_size = config
            .concurrency_limit()
            .unwrap_or_else(|| config.total_trials());
        let http = build_http_client(pool_size)?;
        let registry = ProviderRegistry::with_overrides(&config.providers);
        let client = ProviderClient::new(http, registry, config.timeout());
        let executors = ExecutorSelector::from_config(config, client);
        Ok(Self::with_executors(config, executors))
    }

    pub fn with_executors(config: &BenchmarkConfig, executors: ExecutorSelector) -> Self {
        BenchmarkEngine {
            models: config.models.clone(),
            prompts: config.prompts.clone(),
            concurrency: config.concurrency_limit(),
            executors,
        }
    }

    /// Runs every (model, prompt) pair and returns exactly one record per pair,
    /// in dispatch order (models outer, prompts inner). A failing or panicking
    /// trial never affects the others.
    pub async fn run_benchmarks(&self) -> Result<Vec<BenchmarkResult>> {
        let total = self.models.len() * self.prompts.len();
        info!(
            "Preparing to benchmark {} models with {} prompts...",
            self.models.len(),
            self.prompts.len()
        );
        if total == 0 {
            return Ok(Vec::new());
        }

        let semaphore = self.concurrency.map(|n| Arc::new(Semaphore::new(n)));
        let (tx, rx): (
            Sender<(usize, BenchmarkResult)>,
            Receiver<(usize, BenchmarkResult)>,
        ) = bounded(total);

        let progress = ProgressBar::new(total as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})",
                )?
                .progress_chars("#>-"),
        );

        info!(
            "Starting parallel execution of {} benchmarks (concurrency: {})...",
            total,
            self.concurrency
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );
        let start_time = Instant::now();

        let mut handles = Vec::with_capacity(total);

        let pairs = self
            .models
            .iter()
            .flat_map(|m| self.prompts.iter().map(move |p| (m, p)));

        for (idx, (model, prompt)) in pairs.enumerate() {
            let permit = match &semaphore {
                Some(s) => Some(s.clone().acquire_owned().await?),
                None => None,
            };
            let executor = self.executors.executor_for(model);
            let tx = tx.clone();
            let progress = progress.clone();
            let task_model = model.clone();
            let task_prompt = prompt.clone();

            let handle = tokio::spawn(async move {
                let result = executor.run_trial(&task_model, &task_prompt).await;
                progress.inc(1);
                drop(permit);
                let _ = tx.send((idx, result)).await;
            });

            handles.push((idx, model.clone(), prompt.clone(), handle));
        }

        drop(tx);

        let mut slots: Vec<Option<BenchmarkResult>> = vec![None; total];
        for (idx, model, prompt, handle) in handles {
            if let Err(e) = handle.await {
                error!("Trial task for {} panicked: {}", model, e);
                progress.inc(1);
                slots[idx] = Some(BenchmarkResult::failure(
                    &model,
                    &prompt,
                    format!("trial task failed: {}", e),
                ));
            }
        }

        progress.finish_with_message("Benchmark complete");

        while let Ok((idx, result)) = rx.recv().await {
            slots[idx] = Some(result);
        }
        let results: Vec<BenchmarkResult> = slots.into_iter().flatten().collect();

        let failed = results.iter().filter(|r| !r.success).count();
        info!(
            "All benchmarks completed in {:.2}s ({} succeeded, {} failed)",
            start_time.elapsed().as_secs_f64(),
            results.len() - failed,
            failed
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutionMode;
    use crate::executor::TrialExecutor;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records the peak number of trials running at once
    #[derive(Default)]
    struct Gauge {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TrialExecutor for Gauge {
        async fn run_trial(&self, model: &str, prompt: &str) -> BenchmarkResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if prompt == "panic" {
                panic!("boom");
            }
            BenchmarkResult::failure(model, prompt, "gauge")
        }
    }

    fn engine(
        models: &[&str],
        prompts: &[&str],
        concurrency: Option<usize>,
    ) -> (BenchmarkEngine, Arc<Gauge>) {
        let mut config = BenchmarkConfig::new(
            "test",
            models.iter().map(|s| s.to_string()).collect(),
            prompts.iter().map(|s| s.to_string()).collect(),
        );
        config.concurrency = concurrency;
        let gauge = Arc::new(Gauge::default());
        let selector = ExecutorSelector::new(ExecutionMode::Live, gauge.clone(), gauge.clone());
        (BenchmarkEngine::with_executors(&config, selector), gauge)
    }

    #[tokio::test]
    async fn test_one_record_per_pair() {
        let (engine, _) = engine(&["a", "b", "c"], &["p1", "p2"], None);
        let results = engine.run_benchmarks().await.unwrap();
        assert_eq!(results.len(), 6);
        for m in ["a", "b", "c"] {
            for p in ["p1", "p2"] {
                assert_eq!(
                    results.iter().filter(|r| r.model == m && r.prompt == p).count(),
                    1
                );
            }
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let (engine, gauge) = engine(&["a", "b"], &["1", "2", "3", "4"], Some(2));
        let results = engine.run_benchmarks().await.unwrap();
        assert_eq!(results.len(), 8);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_unbounded_runs_all_at_once() {
        let (engine, gauge) = engine(&["a", "b"], &["1", "2", "3"], None);
        engine.run_benchmarks().await.unwrap();
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_panicking_trial_becomes_failure_record() {
        let (engine, _) = engine(&["a"], &["ok", "panic"], None);
        let results = engine.run_benchmarks().await.unwrap();
        assert_eq!(results.len(), 2);
        let panicked = results.iter().find(|r| r.prompt == "panic").unwrap();
        assert!(!panicked.success);
        assert!(panicked.error.as_deref().unwrap().contains("trial task failed"));
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let (engine, _) = engine(&[], &["p"], None);
        assert!(engine.run_benchmarks().await.unwrap().is_empty());
    }

    /// Finishes trials for model "slow" long after everything else
    struct Staggered;

    #[async_trait]
    impl TrialExecutor for Staggered {
        async fn run_trial(&self, model: &str, prompt: &str) -> BenchmarkResult {
            let delay = if model == "slow" { 50 } else { 1 };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            if prompt == "panic" {
                panic!("boom");
            }
            BenchmarkResult::failure(model, prompt, "staggered")
        }
    }

    #[tokio::test]
    async fn test_results_follow_dispatch_order() {
        let config = BenchmarkConfig::new(
            "order",
            vec!["slow".to_string(), "fast".to_string()],
            vec!["p1".to_string(), "panic".to_string(), "p2".to_string()],
        );
        let staggered = Arc::new(Staggered);
        let selector = ExecutorSelector::new(ExecutionMode::Live, staggered.clone(), staggered);
        let engine = BenchmarkEngine::with_executors(&config, selector);

        let results = engine.run_benchmarks().await.unwrap();
        let order: Vec<(&str, &str)> = results
            .iter()
            .map(|r| (r.model.as_str(), r.prompt.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("slow", "p1"),
                ("slow", "panic"),
                ("slow", "p2"),
                ("fast", "p1"),
                ("fast", "panic"),
                ("fast", "p2"),
            ]
        );
    }
}
