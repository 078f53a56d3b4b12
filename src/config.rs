//! YAML benchmark configuration

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::metrics::{Price, PriceTable};

pub const DEFAULT_CONFIG_PATH: &str = "config/standard_test.yaml";

/// A benchmark run as described by the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Display name, also used to name the results file
    pub benchmark_name: String,
    /// Model identifiers, `provider/model` or `mock/...`
    pub models: Vec<String>,
    pub prompts: Vec<String>,
    /// Maximum tokens to generate per request
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Maximum trials in flight (unset or 0 = unbounded)
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Per-request timeout in seconds (unset = client default)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub pricing: Option<PricingConfig>,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_max_tokens() -> u32 {
    100
}

impl BenchmarkConfig {
    /// Minimal config with defaults for everything but the required keys
    pub fn new(
        benchmark_name: impl Into<String>,
        models: Vec<String>,
        prompts: Vec<String>,
    ) -> Self {
        BenchmarkConfig {
            benchmark_name: benchmark_name.into(),
            models,
            prompts,
            max_tokens: default_max_tokens(),
            concurrency: None,
            timeout_secs: None,
            mode: ExecutionMode::default(),
            pricing: None,
            providers: Vec::new(),
            evaluation: EvaluationConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn concurrency_limit(&self) -> Option<usize> {
        self.concurrency.filter(|&n| n > 0)
    }

    pub fn price_table(&self) -> PriceTable {
        match &self.pricing {
            Some(pricing) => pricing.to_table(),
            None => PriceTable::default(),
        }
    }

    pub fn total_trials(&self) -> usize {
        self.models.len() * self.prompts.len()
    }

    /// `results_<name lowercased, spaces to underscores>.csv`
    pub fn output_filename(&self) -> String {
        output_filename(&self.benchmark_name)
    }
}

pub fn output_filename(benchmark_name: &str) -> String {
    format!("results_{}.csv", benchmark_name.replace(' ', "_").to_lowercase())
}

/// How trials are executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// `mock/` models are simulated, everything else goes to the provider
    #[default]
    Auto,
    Live,
    Simulated,
}

/// Price overrides, merged over the built-in table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default)]
    pub default: Option<Price>,
    #[serde(default)]
    pub models: HashMap<String, Price>,
}

impl PricingConfig {
    pub fn to_table(&self) -> PriceTable {
        let mut table = PriceTable::default();
        if let Some(default) = self.default {
            table.set_default(default);
        }
        for (model, price) in &self.models {
            table.insert(model.clone(), *price);
        }
        table
    }
}

/// An OpenAI-compatible endpoint reachable as `<name>/<model>`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub base_url: String,
    /// Literal key (may reference `${VAR}`)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the key, read at call time
    #[serde(default)]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_judge_model")]
    pub judge_model: String,
    /// Maximum judge calls in flight
    #[serde(default = "default_judge_concurrency")]
    pub concurrency: usize,
}

fn default_true() -> bool {
    true
}
fn default_judge_model() -> String {
    "gpt-4o".to_string()
}
fn default_judge_concurrency() -> usize {
    4
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        EvaluationConfig {
            enabled: true,
            judge_model: default_judge_model(),
            concurrency: default_judge_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Substrings marking a model as high tier for simulated pricing
    #[serde(default = "default_premium_markers")]
    pub premium_markers: Vec<String>,
}

fn default_premium_markers() -> Vec<String> {
    vec!["gpt-4".to_string()]
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            premium_markers: default_premium_markers(),
        }
    }
}

/// Replaces `${VAR_NAME}` with the value of the environment variable
fn expand_env_vars(s: &str) -> Result<String> {
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")?;
    let mut result = s.to_string();
    let mut missing_vars = Vec::new();

    for caps in re.captures_iter(s) {
        if let Some(var_name) = caps.get(1) {
            let var_name_str = var_name.as_str();
            match std::env::var(var_name_str) {
                Ok(value) => {
                    let pattern = format!("${{{}}}", var_name_str);
                    result = result.replace(&pattern, &value);
                }
                Err(_) => {
                    missing_vars.push(var_name_str.to_string());
                }
            }
        }
    }

    if !missing_vars.is_empty() {
        return Err(anyhow!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        ));
    }

    Ok(result)
}

pub fn expand_config_env_vars(mut config: BenchmarkConfig) -> Result<BenchmarkConfig> {
    for provider in &mut config.providers {
        provider.base_url = expand_env_vars(&provider.base_url)
            .with_context(|| format!("provider '{}' base_url", provider.name))?;
        if let Some(key) = &provider.api_key {
            provider.api_key = Some(
                expand_env_vars(key)
                    .with_context(|| format!("provider '{}' api_key", provider.name))?,
            );
        }
    }
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<BenchmarkConfig> {
    let config: BenchmarkConfig = serde_yaml::from_str(content)?;
    expand_config_env_vars(config)
}

pub fn load_config_from_file(path: impl AsRef<Path>) -> Result<BenchmarkConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    debug!(
        "Loaded config '{}' with {} models and {} prompts",
        config.benchmark_name,
        config.models.len(),
        config.prompts.len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_defaults() {
        let yaml = r#"
benchmark_name: Standard Test
models: ["mock/gpt-4", "gpt-4o"]
prompts: ["hello", "write a haiku"]
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.benchmark_name, "Standard Test");
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.max_tokens, 100);
        assert_eq!(config.concurrency_limit(), None);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.mode, ExecutionMode::Auto);
        assert!(config.evaluation.enabled);
        assert_eq!(config.evaluation.judge_model, "gpt-4o");
        assert_eq!(config.total_trials(), 4);
    }

    #[test]
    fn test_full_config() {
        let yaml = r#"
benchmark_name: Full
models: [local/llama]
prompts: [hi]
max_tokens: 50
concurrency: 3
timeout_secs: 20
mode: simulated
pricing:
  default: { input: 0.1, output: 0.2 }
  models:
    local/llama: { input: 0.0, output: 0.0 }
providers:
  - name: local
    base_url: http://localhost:8000/v1
    api_key_env: LOCAL_KEY
evaluation:
  enabled: false
  judge_model: openai/gpt-4o-mini
simulation:
  premium_markers: [opus, gpt-4]
"#;
        let config = parse_config(yaml).unwrap();
        assert_eq!(config.max_tokens, 50);
        assert_eq!(config.concurrency_limit(), Some(3));
        assert_eq!(config.timeout(), Some(Duration::from_secs(20)));
        assert_eq!(config.mode, ExecutionMode::Simulated);
        assert_eq!(config.providers[0].api_key_env.as_deref(), Some("LOCAL_KEY"));
        assert!(!config.evaluation.enabled);
        assert_eq!(config.evaluation.concurrency, 4);
        assert_eq!(config.simulation.premium_markers, vec!["opus", "gpt-4"]);

        let prices = config.price_table();
        assert_eq!(prices.price_for("local/llama"), Price::new(0.0, 0.0));
        assert_eq!(prices.price_for("unlisted"), Price::new(0.1, 0.2));
        assert_eq!(prices.price_for("gpt-4o"), Price::new(0.005, 0.015));
    }

    #[test]
    fn test_zero_concurrency_is_unbounded() {
        let mut config = BenchmarkConfig::new("x", vec![], vec![]);
        config.concurrency = Some(0);
        assert_eq!(config.concurrency_limit(), None);
    }

    #[test]
    fn test_missing_required_key_is_error() {
        let yaml = "benchmark_name: x\nmodels: [a]\n";
        assert!(parse_config(yaml).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_error() {
        assert!(parse_config("benchmark_name: [unclosed").is_err());
    }

    #[test]
    fn test_output_filename() {
        assert_eq!(output_filename("Standard Test"), "results_standard_test.csv");
        assert_eq!(output_filename("demo"), "results_demo.csv");
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("LLM_BENCH_TEST_HOST", "example.internal");
        let expanded = expand_env_vars("https://${LLM_BENCH_TEST_HOST}/v1").unwrap();
        assert_eq!(expanded, "https://example.internal/v1");

        let err = expand_env_vars("${LLM_BENCH_TEST_DEFINITELY_UNSET}").unwrap_err();
        assert!(err.to_string().contains("LLM_BENCH_TEST_DEFINITELY_UNSET"));
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let err = load_config_from_file("/nonexistent/bench.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
