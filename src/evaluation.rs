//! Response quality scoring
//!
//! Successful responses are scored for relevancy by an LLM judge. When the
//! judge is disabled, the run was simulated, or any judge call fails, the whole
//! batch falls back to synthetic scores and the outcome says so.

use anyhow::Result;
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use rand::Rng;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EvaluationConfig;
use crate::executor::is_mock_model;
use crate::metrics::{BenchmarkResult, TrialKey};
use crate::provider::{Message, ProviderClient};
use crate::report::ReportTable;

/// Why real scores were not produced
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DegradeReason {
    #[error("quality evaluation is disabled")]
    Disabled,
    #[error("simulated run, judge skipped")]
    SimulatedRun,
    #[error("judge call failed: {0}")]
    Judge(String),
    #[error("judge reply has no score in [0, 1]: {0:?}")]
    UnparseableScore(String),
}

#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    /// Judge scores for successes, 0.0 for failures
    Evaluated(ReportTable),
    /// Synthetic scores
    Degraded {
        reason: DegradeReason,
        table: ReportTable,
    },
}

impl EvaluationOutcome {
    pub fn table(&self) -> &ReportTable {
        match self {
            EvaluationOutcome::Evaluated(table) => table,
            EvaluationOutcome::Degraded { table, .. } => table,
        }
    }

    pub fn degrade_reason(&self) -> Option<&DegradeReason> {
        match self {
            EvaluationOutcome::Evaluated(_) => None,
            EvaluationOutcome::Degraded { reason, .. } => Some(reason),
        }
    }
}

/// Scores how relevant a response is to its prompt, in [0, 1]
#[async_trait]
pub trait RelevancyJudge: Send + Sync {
    async fn score(&self, prompt: &str, response: &str) -> Result<f64, DegradeReason>;
}

const JUDGE_INSTRUCTIONS: &str = "You grade answers for relevancy. Given a question and an \
answer, reply with a single number between 0 and 1, where 1 means the answer fully and \
directly addresses the question and 0 means it is unrelated. Reply with the number only.";

/// Asks a chat model for a relevancy score
pub struct LlmJudge {
    client: ProviderClient,
    judge_model: String,
    number: Regex,
}

impl LlmJudge {
    pub fn new(client: ProviderClient, judge_model: impl Into<String>) -> Result<Self> {
        Ok(LlmJudge {
            client,
            judge_model: judge_model.into(),
            number: Regex::new(r"\d+(?:\.\d+)?|\.\d+")?,
        })
    }

    fn parse_score(&self, reply: &str) -> Result<f64, DegradeReason> {
        self.number
            .find(reply)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .filter(|v| (0.0..=1.0).contains(v))
            .ok_or_else(|| DegradeReason::UnparseableScore(reply.to_string()))
    }
}

#[async_trait]
impl RelevancyJudge for LlmJudge {
    async fn score(&self, prompt: &str, response: &str) -> Result<f64, DegradeReason> {
        let messages = vec![
            Message::system(JUDGE_INSTRUCTIONS),
            Message::user(format!("Question:\n{}\n\nAnswer:\n{}", prompt, response)),
        ];
        let reply = self
            .client
            .complete(&self.judge_model, messages, 10)
            .await
            .map_err(|e| DegradeReason::Judge(format!("{:#}", e)))?;
        self.parse_score(&reply)
    }
}

pub struct EvaluationEngine {
    enabled: bool,
    concurrency: usize,
    simulated_run: bool,
    judge: Arc<dyn RelevancyJudge>,
}

impl EvaluationEngine {
    pub fn new(config: &EvaluationConfig, client: ProviderClient) -> Result<Self> {
        let judge = LlmJudge::new(client, config.judge_model.clone())?;
        Ok(Self::with_judge(config, Arc::new(judge)))
    }

    pub fn with_judge(config: &EvaluationConfig, judge: Arc<dyn RelevancyJudge>) -> Self {
        EvaluationEngine {
            enabled: config.enabled,
            concurrency: config.concurrency.max(1),
            simulated_run: false,
            judge,
        }
    }

    /// Marks every batch as simulated, regardless of model names
    pub fn simulated_run(mut self, simulated: bool) -> Self {
        self.simulated_run = simulated;
        self
    }

    /// Returns a table with a quality score for every record. Never fails:
    /// problems degrade the whole batch to synthetic scores.
    pub async fn evaluate_results(&self, results: &[BenchmarkResult]) -> EvaluationOutcome {
        if !self.enabled {
            return degrade(DegradeReason::Disabled, results);
        }
        if results.is_empty() {
            return EvaluationOutcome::Evaluated(ReportTable::default());
        }
        if self.simulated_run || is_mock_model(&results[0].model) {
            return degrade(DegradeReason::SimulatedRun, results);
        }

        let successes = results.iter().filter(|r| r.success).count();
        info!("Scoring {} successful responses for relevancy...", successes);

        match self.judge_all(results).await {
            Ok(scores) => {
                let table = ReportTable::with_quality_scores(results, |r| {
                    if r.success {
                        scores.get(&r.key()).copied().unwrap_or(0.0)
                    } else {
                        0.0
                    }
                });
                EvaluationOutcome::Evaluated(table)
            }
            Err(reason) => degrade(reason, results),
        }
    }

    async fn judge_all(
        &self,
        results: &[BenchmarkResult],
    ) -> Result<HashMap<TrialKey, f64>, DegradeReason> {
        let judge = &self.judge;
        futures::stream::iter(results.iter().filter(|r| r.success))
            .map(move |r| async move {
                let score = judge.score(&r.prompt, &r.response).await?;
                Ok::<_, DegradeReason>((r.key(), score))
            })
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await
    }
}

fn degrade(reason: DegradeReason, results: &[BenchmarkResult]) -> EvaluationOutcome {
    warn!("{}; using synthetic quality scores", reason);
    EvaluationOutcome::Degraded {
        reason,
        table: synthetic_scores(results),
    }
}

/// Random scores in [0.7, 0.99] for successes, 0.0 for failures
pub fn synthetic_scores(results: &[BenchmarkResult]) -> ReportTable {
    let mut rng = rand::thread_rng();
    ReportTable::with_quality_scores(results, |r| {
        if r.success {
            rng.gen_range(0.7..=0.99)
        } else {
            0.0
        }
    })
}
