//! Trial executors: how a single (model, prompt) trial is carried out

use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::{BenchmarkConfig, ExecutionMode, SimulationConfig};
use crate::metrics::{
    calculate_cost, calculate_tps, estimate_tokens, BenchmarkResult, PriceTable,
};
use crate::provider::ProviderClient;

/// Model identifiers with this prefix never touch the network in `auto` mode
pub const MOCK_PREFIX: &str = "mock/";

pub fn is_mock_model(model: &str) -> bool {
    model.starts_with(MOCK_PREFIX)
}

/// Runs one trial. Failures are reported in the returned record, never as errors.
#[async_trait]
pub trait TrialExecutor: Send + Sync {
    async fn run_trial(&self, model: &str, prompt: &str) -> BenchmarkResult;
}

/// Streams a real completion from the model's provider
pub struct LiveExecutor {
    client: ProviderClient,
    prices: PriceTable,
    max_tokens: u32,
}

impl LiveExecutor {
    pub fn new(client: ProviderClient, prices: PriceTable, max_tokens: u32) -> Self {
        LiveExecutor {
            client,
            prices,
            max_tokens,
        }
    }
}

#[async_trait]
impl TrialExecutor for LiveExecutor {
    async fn run_trial(&self, model: &str, prompt: &str) -> BenchmarkResult {
        let completion = match self
            .client
            .stream_completion(model, prompt, self.max_tokens)
            .await
        {
            Ok(completion) => completion,
            Err(e) => {
                warn!("Trial failed for {}: {:#}", model, e);
                return BenchmarkResult::failure(model, prompt, format!("{:#}", e));
            }
        };

        let (input_tokens, output_tokens) = match completion.usage {
            Some(usage) => (usage.prompt_tokens, usage.completion_tokens),
            None => (estimate_tokens(prompt), estimate_tokens(&completion.content)),
        };

        let total_latency = completion.total_time.as_secs_f64();
        let ttft = completion
            .ttft
            .map(|t| t.as_secs_f64())
            .unwrap_or(total_latency);

        debug!(
            "{}: {} chunks, ttft {:.3}s, total {:.3}s",
            model, completion.chunk_count, ttft, total_latency
        );

        BenchmarkResult {
            model: model.to_string(),
            prompt: prompt.to_string(),
            response: completion.content,
            ttft,
            total_latency,
            output_tokens,
            input_tokens,
            tps: calculate_tps(output_tokens, total_latency),
            cost: calculate_cost(&self.prices, model, input_tokens, output_tokens),
            success: true,
            quality_score: 0.0,
            error: None,
        }
    }
}

const SIMULATED_RESPONSE: &str = "This is a simulated response for demo purposes. ";
const SIMULATED_PREMIUM_PRICE: f64 = 0.01;
const SIMULATED_BASE_PRICE: f64 = 0.005;

/// Synthesises a plausible result after an artificial delay; used for demos
/// without API keys
pub struct SimulatedExecutor {
    premium_markers: Vec<String>,
}

impl SimulatedExecutor {
    pub fn new(config: &SimulationConfig) -> Self {
        SimulatedExecutor {
            premium_markers: config.premium_markers.clone(),
        }
    }

    fn price_per_1k(&self, model: &str) -> f64 {
        if self.premium_markers.iter().any(|m| model.contains(m.as_str())) {
            SIMULATED_PREMIUM_PRICE
        } else {
            SIMULATED_BASE_PRICE
        }
    }
}

#[async_trait]
impl TrialExecutor for SimulatedExecutor {
    async fn run_trial(&self, model: &str, prompt: &str) -> BenchmarkResult {
        // ThreadRng is not Send, so draw everything before the await
        let (latency, ttft, quality_score) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(0.5..=2.0),
                rng.gen_range(0.1..=0.5),
                rng.gen_range(0.7..=0.99),
            )
        };

        sleep(Duration::from_secs_f64(latency)).await;

        let response = SIMULATED_RESPONSE.repeat(5);
        let input_tokens = estimate_tokens(prompt);
        let output_tokens = estimate_tokens(&response);
        let cost = (input_tokens + output_tokens) as f64 / 1000.0 * self.price_per_1k(model);

        BenchmarkResult {
            model: model.to_string(),
            prompt: prompt.to_string(),
            response,
            ttft,
            total_latency: latency,
            output_tokens,
            input_tokens,
            tps: calculate_tps(output_tokens, latency),
            cost,
            success: true,
            quality_score,
            error: None,
        }
    }
}

/// Picks the executor for each model according to the configured mode
#[derive(Clone)]
pub struct ExecutorSelector {
    mode: ExecutionMode,
    live: Arc<dyn TrialExecutor>,
    simulated: Arc<dyn TrialExecutor>,
}

impl ExecutorSelector {
    pub fn new(
        mode: ExecutionMode,
        live: Arc<dyn TrialExecutor>,
        simulated: Arc<dyn TrialExecutor>,
    ) -> Self {
        ExecutorSelector {
            mode,
            live,
            simulated,
        }
    }

    pub fn from_config(config: &BenchmarkConfig, client: ProviderClient) -> Self {
        let live = LiveExecutor::new(client, config.price_table(), config.max_tokens);
        let simulated = SimulatedExecutor::new(&config.simulation);
        ExecutorSelector::new(config.mode, Arc::new(live), Arc::new(simulated))
    }

    pub fn executor_for(&self, model: &str) -> Arc<dyn TrialExecutor> {
        let simulate = match self.mode {
            ExecutionMode::Auto => is_mock_model(model),
            ExecutionMode::Live => false,
            ExecutionMode::Simulated => true,
        };
        if simulate {
            self.simulated.clone()
        } else {
            self.live.clone()
        }
    }
}
