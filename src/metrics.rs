//! Per-trial result records and the cost/throughput formulas applied to them

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a single (model, prompt) trial.
///
/// Field order is the CSV column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub model: String,
    pub prompt: String,
    pub response: String,
    /// Seconds until the first streamed content token
    pub ttft: f64,
    /// Seconds from request start to stream completion
    pub total_latency: f64,
    pub output_tokens: u32,
    pub input_tokens: u32,
    /// Output tokens per second
    pub tps: f64,
    /// Estimated dollar cost
    pub cost: f64,
    pub success: bool,
    #[serde(default)]
    pub quality_score: f64,
    #[serde(default)]
    pub error: Option<String>,
}

impl BenchmarkResult {
    /// A failed trial: zeroed metrics and the error text.
    pub fn failure(model: &str, prompt: &str, error: impl Into<String>) -> Self {
        BenchmarkResult {
            model: model.to_string(),
            prompt: prompt.to_string(),
            response: String::new(),
            ttft: 0.0,
            total_latency: 0.0,
            output_tokens: 0,
            input_tokens: 0,
            tps: 0.0,
            cost: 0.0,
            success: false,
            quality_score: 0.0,
            error: Some(error.into()),
        }
    }

    pub fn key(&self) -> TrialKey {
        TrialKey {
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            response: self.response.clone(),
        }
    }
}

/// Identity of a trial's output, used to join scores back onto results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrialKey {
    pub model: String,
    pub prompt: String,
    pub response: String,
}

/// Dollars per 1K tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub input: f64,
    pub output: f64,
}

impl Price {
    pub const fn new(input: f64, output: f64) -> Self {
        Price { input, output }
    }
}

pub const DEFAULT_PRICE: Price = Price::new(0.001, 0.002);

/// Per-model prices with a fallback tier for unlisted models
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
    prices: HashMap<String, Price>,
    default: Price,
}

impl Default for PriceTable {
    fn default() -> Self {
        let prices = [
            ("gpt-4o", Price::new(0.005, 0.015)),
            ("claude-3-5-sonnet-20240620", Price::new(0.003, 0.015)),
            ("gemini/gemini-1.5-pro", Price::new(0.0035, 0.0105)),
        ]
        .into_iter()
        .map(|(model, price)| (model.to_string(), price))
        .collect();

        PriceTable {
            prices,
            default: DEFAULT_PRICE,
        }
    }
}

impl PriceTable {
    pub fn insert(&mut self, model: impl Into<String>, price: Price) {
        self.prices.insert(model.into(), price);
    }

    pub fn set_default(&mut self, price: Price) {
        self.default = price;
    }

    pub fn price_for(&self, model: &str) -> Price {
        self.prices.get(model).copied().unwrap_or(self.default)
    }
}

pub fn calculate_cost(
    prices: &PriceTable,
    model: &str,
    input_tokens: u32,
    output_tokens: u32,
) -> f64 {
    let price = prices.price_for(model);
    (input_tokens as f64 / 1000.0) * price.input + (output_tokens as f64 / 1000.0) * price.output
}

pub fn calculate_tps(output_tokens: u32, total_latency: f64) -> f64 {
    if total_latency == 0.0 {
        return 0.0;
    }
    output_tokens as f64 / total_latency
}

/// Whitespace word count, used when the provider reports no usage
pub fn estimate_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_uses_listed_price() {
        let prices = PriceTable::default();
        let cost = calculate_cost(&prices, "gpt-4o", 1000, 2000);
        assert!((cost - (0.005 + 2.0 * 0.015)).abs() < 1e-12);
    }

    #[test]
    fn test_cost_falls_back_to_default_tier() {
        let prices = PriceTable::default();
        let cost = calculate_cost(&prices, "some/unknown-model", 500, 1500);
        let expected = 0.5 * DEFAULT_PRICE.input + 1.5 * DEFAULT_PRICE.output;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn test_injected_prices_override_builtin() {
        let mut prices = PriceTable::default();
        prices.insert("gpt-4o", Price::new(1.0, 1.0));
        prices.set_default(Price::new(0.0, 0.0));

        assert_eq!(calculate_cost(&prices, "gpt-4o", 1000, 1000), 2.0);
        assert_eq!(calculate_cost(&prices, "unlisted", 1000, 1000), 0.0);
    }

    #[test]
    fn test_tps_zero_latency() {
        assert_eq!(calculate_tps(100, 0.0), 0.0);
        assert_eq!(calculate_tps(100, 2.0), 50.0);
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("  hello   world \n again"), 3);
    }

    #[test]
    fn test_failure_record_is_zeroed() {
        let r = BenchmarkResult::failure("openai/gpt-4o", "hi", "connection refused");
        assert!(!r.success);
        assert_eq!(r.response, "");
        assert_eq!(r.ttft, 0.0);
        assert_eq!(r.cost, 0.0);
        assert_eq!(r.tps, 0.0);
        assert_eq!(r.error.as_deref(), Some("connection refused"));
    }
}
