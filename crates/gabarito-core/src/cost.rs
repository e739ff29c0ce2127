//! Judge cost estimation from token usage.

use crate::config::JudgeMode;
use crate::judge::JudgeUsage;
use serde::{Deserialize, Serialize};

/// Price per 1M tokens (USD).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TokenPrice {
    pub input: f64,
    pub output: f64,
}

impl TokenPrice {
    pub const fn new(input: f64, output: f64) -> Self {
        Self { input, output }
    }

    pub fn calculate(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1_000_000.0) * self.input
            + (output_tokens as f64 / 1_000_000.0) * self.output
    }
}

/// Standard-tier list prices. Dated model ids resolve by longest prefix.
const PRICES: &[(&str, TokenPrice)] = &[
    ("gpt-4o-mini", TokenPrice::new(0.15, 0.60)),
    ("gpt-4o", TokenPrice::new(2.50, 10.00)),
    ("gpt-4.1-nano", TokenPrice::new(0.10, 0.40)),
    ("gpt-4.1-mini", TokenPrice::new(0.40, 1.60)),
    ("gpt-4.1", TokenPrice::new(2.00, 8.00)),
    ("gpt-4-turbo", TokenPrice::new(10.00, 30.00)),
    ("gpt-3.5-turbo", TokenPrice::new(0.50, 1.50)),
    ("gpt-5-nano", TokenPrice::new(0.05, 0.40)),
    ("gpt-5-mini", TokenPrice::new(0.25, 2.00)),
    ("gpt-5", TokenPrice::new(1.25, 10.00)),
    ("o4-mini", TokenPrice::new(1.10, 4.40)),
    ("o3-mini", TokenPrice::new(1.10, 4.40)),
    ("o3", TokenPrice::new(2.00, 8.00)),
];

pub fn price_for(model: &str) -> Option<TokenPrice> {
    PRICES
        .iter()
        .filter(|(prefix, _)| model.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(_, price)| *price)
}

/// Batch and flex are billed at half the standard rate.
pub fn mode_multiplier(mode: JudgeMode) -> f64 {
    match mode {
        JudgeMode::Standard => 1.0,
        JudgeMode::Flex | JudgeMode::Batch => 0.5,
    }
}

/// Estimated cost in USD, `None` for models without a known price.
pub fn estimate_cost(model: &str, mode: JudgeMode, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    price_for(model).map(|p| p.calculate(input_tokens, output_tokens) * mode_multiplier(mode))
}

/// USD to BRL conversion used when none is configured.
pub const DEFAULT_USD_TO_BRL: f64 = 5.0;

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub model: String,
    pub mode: JudgeMode,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub api_calls: u64,
    pub estimated_cost_usd: Option<f64>,
    #[serde(default)]
    pub estimated_cost_brl: Option<f64>,
    #[serde(default = "default_usd_to_brl")]
    pub usd_to_brl_rate: f64,
}

fn default_usd_to_brl() -> f64 {
    DEFAULT_USD_TO_BRL
}

impl CostSummary {
    pub fn new(model: &str, mode: JudgeMode, usage: JudgeUsage) -> Self {
        let prompt = usage.tokens.prompt_tokens;
        let completion = usage.tokens.completion_tokens;
        let usd = estimate_cost(model, mode, prompt, completion);
        Self {
            model: model.to_string(),
            mode,
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: usage.tokens.total(),
            api_calls: usage.api_calls,
            estimated_cost_usd: usd.map(round4),
            estimated_cost_brl: usd.map(|c| round4(c * DEFAULT_USD_TO_BRL)),
            usd_to_brl_rate: DEFAULT_USD_TO_BRL,
        }
    }

    /// Converts the USD estimate at `rate` instead of the default.
    pub fn with_usd_to_brl(mut self, rate: f64) -> Self {
        let usd = estimate_cost(
            &self.model,
            self.mode,
            self.prompt_tokens,
            self.completion_tokens,
        );
        self.usd_to_brl_rate = rate;
        self.estimated_cost_brl = usd.map(|c| round4(c * rate));
        self
    }
}
