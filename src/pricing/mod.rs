//! Token usage and cost accounting
//!
//! Running totals accumulate for the lifetime of an orchestrator instance;
//! pricing rates come from an external catalog with static fallbacks, so a
//! failed or partial lookup never leaves the estimate without a rate.

use crate::adapters::{base_model_name, ModelFamily};
use crate::transport::PricingSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Default fallback rates per 1000 tokens, used when the catalog lookup
/// fails or returns a partial result.
pub const DEFAULT_PROMPT_RATE: f64 = 0.002;
pub const DEFAULT_COMPLETION_RATE: f64 = 0.006;

const SERVICE_CODE: &str = "AmazonBedrock";

/// Token counts for one response, or accumulated across many.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Estimate a split from a bare total at a fixed 67% prompt / 33%
    /// completion ratio. Some responses report only `total_tokens`; this
    /// keeps the cost estimate usable rather than precise.
    pub fn from_total_estimate(total_tokens: u64) -> Self {
        let prompt_tokens = ((total_tokens as f64) * 0.67).round() as u64;
        Self {
            prompt_tokens,
            completion_tokens: total_tokens - prompt_tokens,
            total_tokens,
        }
    }

    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// Monotonic usage counters; only `reset` ever decreases them.
#[derive(Debug, Default)]
pub struct UsageTracker {
    totals: TokenUsage,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, usage: TokenUsage) {
        self.totals.add(usage);
    }

    pub fn totals(&self) -> TokenUsage {
        self.totals
    }

    pub fn reset(&mut self) {
        self.totals = TokenUsage::default();
    }
}

/// Rates in USD per 1000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub prompt_rate: f64,
    pub completion_rate: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            prompt_rate: DEFAULT_PROMPT_RATE,
            completion_rate: DEFAULT_COMPLETION_RATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub prompt_cost: f64,
    pub completion_cost: f64,
    pub total_cost: f64,
}

/// Cumulative usage with the pricing context to read it.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub usage: TokenUsage,
    pub pricing: TokenPricing,
    pub estimated_cost: f64,
}

impl std::fmt::Display for UsageReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Token Usage Summary ===")?;
        writeln!(f, "Prompt tokens:     {}", self.usage.prompt_tokens)?;
        writeln!(f, "Completion tokens: {}", self.usage.completion_tokens)?;
        writeln!(f, "Total tokens:      {}", self.usage.total_tokens)?;
        writeln!(f, "Prompt rate:       ${:.4}/1K tokens", self.pricing.prompt_rate)?;
        writeln!(
            f,
            "Completion rate:   ${:.4}/1K tokens",
            self.pricing.completion_rate
        )?;
        writeln!(f, "Estimated cost:    ${:.4}", self.estimated_cost)?;
        Ok(())
    }
}

/// Resolve the catalog display name for a model identifier.
///
/// Known models map to their exact catalog names; anything else falls back to
/// the family name from the shared classifier, so the factory and the pricing
/// lookup always agree on what a given identifier is.
pub fn pricing_model_name(model_id: &str) -> String {
    const MODEL_NAMES: &[(&str, &str)] = &[
        ("amazon.nova-lite", "Nova Lite"),
        ("amazon.nova-pro", "Nova Pro"),
        ("anthropic.claude-3-sonnet", "Claude 3 Sonnet"),
        ("anthropic.claude-3-haiku", "Claude 3 Haiku"),
        ("anthropic.claude-3-opus", "Claude 3 Opus"),
        ("mistral.mistral-large", "Mistral Large"),
        ("mistral.pixtral-large", "Pixtral Large 25.02"),
    ];

    let name = base_model_name(model_id);
    for (key, display) in MODEL_NAMES {
        if name.contains(key) {
            return (*display).to_string();
        }
    }

    match ModelFamily::classify(model_id) {
        Some(family) => family.to_string(),
        None => "Unknown".to_string(),
    }
}

/// Fetches and caches token rates for the active model.
pub struct PricingService {
    source: Box<dyn PricingSource>,
    current: TokenPricing,
}

impl PricingService {
    pub fn new(source: impl PricingSource + 'static) -> Self {
        Self {
            source: Box::new(source),
            current: TokenPricing::default(),
        }
    }

    pub fn get_pricing(&self) -> TokenPricing {
        self.current
    }

    pub fn reset_to_defaults(&mut self) {
        self.current = TokenPricing::default();
        debug!("pricing reset to defaults");
    }

    /// Refresh rates from the catalog for the given model and region.
    ///
    /// A failed lookup keeps the current rates; a partial result (only one of
    /// the two rates found) keeps the found rate and defaults the other.
    pub async fn load_model_pricing(&mut self, model_id: &str, region: &str) -> TokenPricing {
        let model_name = pricing_model_name(model_id);
        debug!(
            "fetching pricing data for model {} (catalog name: {}) in region {}",
            model_id, model_name, region
        );

        let records = match self
            .source
            .fetch_products(SERVICE_CODE, &model_name, region)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!("error fetching pricing data: {e}. Using current pricing.");
                return self.current;
            }
        };

        if records.is_empty() {
            warn!("no pricing data found for model {model_id}, using defaults");
            self.current = TokenPricing::default();
            return self.current;
        }

        debug!("found {} pricing items to parse", records.len());
        let (prompt_rate, completion_rate) = parse_price_records(&records, model_id);

        self.current = TokenPricing {
            prompt_rate: prompt_rate.unwrap_or(DEFAULT_PROMPT_RATE),
            completion_rate: completion_rate.unwrap_or(DEFAULT_COMPLETION_RATE),
        };

        match (prompt_rate, completion_rate) {
            (Some(p), Some(c)) => info!(
                "loaded pricing data: input ${p}/1K tokens, output ${c}/1K tokens"
            ),
            (Some(_), None) => {
                warn!("only found input token pricing, using default for output tokens")
            }
            (None, Some(_)) => {
                warn!("only found output token pricing, using default for input tokens")
            }
            (None, None) => {
                warn!("no applicable pricing data found for model {model_id}, using defaults")
            }
        }

        self.current
    }

    /// Pure rate arithmetic over the current pricing.
    pub fn calculate_cost(&self, prompt_tokens: u64, completion_tokens: u64) -> CostBreakdown {
        let prompt_cost = prompt_tokens as f64 * (self.current.prompt_rate / 1000.0);
        let completion_cost = completion_tokens as f64 * (self.current.completion_rate / 1000.0);
        CostBreakdown {
            prompt_cost,
            completion_cost,
            total_cost: prompt_cost + completion_cost,
        }
    }
}

/// Walk raw catalog records and pull out the on-demand input and output token
/// rates, skipping batch-inference and token-cache entries.
fn parse_price_records(records: &[Value], model_id: &str) -> (Option<f64>, Option<f64>) {
    let mut prompt_rate = None;
    let mut completion_rate = None;

    for record in records {
        // Entries may arrive as embedded JSON strings.
        let parsed;
        let record = match record {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(v) => {
                    parsed = v;
                    &parsed
                }
                Err(_) => continue,
            },
            other => other,
        };

        let attributes = &record["product"]["attributes"];
        let usage_type = attributes["usagetype"].as_str().unwrap_or("");
        let inference_type = attributes["inferenceType"].as_str().unwrap_or("");
        let feature = attributes["feature"].as_str().unwrap_or("");

        if feature.contains("Batch") && !model_id.contains("batch") {
            debug!("skipping batch pricing: {usage_type}");
            continue;
        }
        if inference_type.contains("cache") || usage_type.contains("cache") {
            debug!("skipping cache pricing: {usage_type}");
            continue;
        }

        let Some(price_per_unit) = first_price_per_unit(record) else {
            continue;
        };

        if inference_type.contains("Input") || usage_type.contains("input") {
            debug!("found input token price: ${price_per_unit}/1K tokens ({usage_type})");
            prompt_rate = Some(price_per_unit);
        } else if inference_type.contains("Output") || usage_type.contains("output") {
            debug!("found output token price: ${price_per_unit}/1K tokens ({usage_type})");
            completion_rate = Some(price_per_unit);
        }
    }

    (prompt_rate, completion_rate)
}

/// Dig the USD rate out of the first on-demand price dimension.
fn first_price_per_unit(record: &Value) -> Option<f64> {
    let on_demand = record["terms"]["OnDemand"].as_object()?;
    let term = on_demand.values().next()?;
    let dimensions = term["priceDimensions"].as_object()?;
    let dimension = dimensions.values().next()?;
    let usd = &dimension["pricePerUnit"]["USD"];
    match usd {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
