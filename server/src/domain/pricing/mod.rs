//! Pricing service for LLM cost calculations
//!
//! Costs come from a LiteLLM-format price table embedded at compile time,
//! optionally extended by a local pricing file. Model lookup tries several
//! strategies (exact, provider-prefixed, alias, family) and reports how the
//! match was made.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

use crate::core::config::PricingConfig;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Embedded pricing data (compile-time)
const EMBEDDED_PRICING_JSON: &str = include_str!("../../../data/model_prices.json");

// ============================================================================
// ERROR TYPE
// ============================================================================

#[derive(Error, Debug)]
pub enum PricingError {
    #[error("Failed to parse pricing data: {0}")]
    ParseError(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// PRICING DATA STRUCTURES
// ============================================================================

/// Parsed model pricing entry from LiteLLM JSON
#[derive(Debug, Clone, Default)]
pub struct ModelPricing {
    /// Cost per input token (USD)
    pub input_cost_per_token: f64,
    /// Cost per output token (USD)
    pub output_cost_per_token: f64,
    /// LiteLLM provider name
    pub litellm_provider: String,
    /// Mode: "chat", "embedding", "completion", etc.
    pub mode: String,
}

/// How a span's model was matched against the price table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Exact key match
    Exact,
    /// Matched via provider prefix, e.g., "azure/gpt-4o"
    ProviderPrefix,
    /// Matched via alias, e.g., "-latest" suffix stripped
    Alias,
    /// Matched base model family, e.g., date stripped
    Family,
    /// Unknown model priced at the configured flat rate
    Fallback,
    /// No match found
    #[default]
    NotFound,
}

// ============================================================================
// PRICING DATA
// ============================================================================

/// Parsed and indexed pricing data
#[derive(Debug, Default)]
pub struct PricingData {
    /// Lowercase model key -> pricing
    models: HashMap<String, ModelPricing>,

    /// (provider, model) -> canonical key
    provider_models: HashMap<(String, String), String>,
}

impl PricingData {
    /// Parse pricing data from JSON string
    pub fn from_json_str(json: &str) -> Result<Self, PricingError> {
        let raw: serde_json::Value =
            serde_json::from_str(json).map_err(|e| PricingError::ParseError(e.to_string()))?;

        let obj = raw
            .as_object()
            .ok_or_else(|| PricingError::ParseError("Expected JSON object".into()))?;

        let mut data = Self::default();

        for (key, value) in obj {
            if key == "sample_spec" {
                continue;
            }

            let Some(entry) = value.as_object() else {
                continue;
            };

            let input_cost = entry
                .get("input_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            let output_cost = entry
                .get("output_cost_per_token")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);

            // Image generation and per-query priced entries carry no token rates
            if input_cost == 0.0 && output_cost == 0.0 {
                continue;
            }

            if input_cost < 0.0 || output_cost < 0.0 {
                tracing::warn!(model = key, "Skipping model with negative pricing");
                continue;
            }

            if input_cost > 1.0 || output_cost > 1.0 {
                tracing::warn!(
                    model = key,
                    input_cost,
                    output_cost,
                    "Model has unusually high pricing"
                );
            }

            let pricing = ModelPricing {
                input_cost_per_token: input_cost,
                output_cost_per_token: output_cost,
                litellm_provider: entry
                    .get("litellm_provider")
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string(),
                mode: entry
                    .get("mode")
                    .and_then(|v| v.as_str())
                    .unwrap_or("chat")
                    .to_string(),
            };

            data.insert(key.to_lowercase(), pricing);
        }

        Ok(data)
    }

    fn insert(&mut self, key_lower: String, pricing: ModelPricing) {
        // "azure/gpt-4o" indexes as ("azure", "gpt-4o")
        if let Some((provider, model)) = key_lower.split_once('/') {
            self.provider_models
                .insert((provider.to_string(), model.to_string()), key_lower.clone());
        } else if !pricing.litellm_provider.is_empty() {
            self.provider_models.insert(
                (pricing.litellm_provider.to_lowercase(), key_lower.clone()),
                key_lower.clone(),
            );
        }
        self.models.insert(key_lower, pricing);
    }

    /// Merge another table into this one; entries in `other` win
    pub fn extend(&mut self, other: PricingData) {
        for (key, pricing) in other.models {
            self.insert(key, pricing);
        }
    }

    /// Number of priced models
    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Look up pricing for a model with multi-strategy fallback
    ///
    /// Lookup order:
    /// 1. Exact match on model name
    /// 2. Model part of a "provider/model" name
    /// 3. Provider-prefixed key and provider index
    /// 4. Normalized model name (strip -latest suffix)
    /// 5. Base model without version date (e.g., strip -20241022)
    pub fn lookup(&self, system: Option<&str>, model: &str) -> Option<(&ModelPricing, MatchType)> {
        let model_lower = model.trim().to_lowercase();
        let provider = system
            .map(map_system_to_litellm_provider)
            .filter(|p| !p.is_empty());

        if let Some(pricing) = self.models.get(&model_lower) {
            return Some((pricing, MatchType::Exact));
        }

        if let Some((_, model_part)) = model_lower.split_once('/')
            && !model_part.is_empty()
            && let Some(pricing) = self.models.get(model_part)
        {
            return Some((pricing, MatchType::ProviderPrefix));
        }

        if let Some(provider) = provider {
            let prefixed = format!("{}/{}", provider, model_lower);
            if let Some(pricing) = self.models.get(&prefixed) {
                return Some((pricing, MatchType::ProviderPrefix));
            }

            let key = (provider.to_string(), model_lower.clone());
            if let Some(canonical_key) = self.provider_models.get(&key)
                && let Some(pricing) = self.models.get(canonical_key)
            {
                return Some((pricing, MatchType::ProviderPrefix));
            }
        }

        let normalized = normalize_model_name(&model_lower);
        if normalized != model_lower {
            if let Some(provider) = provider {
                let prefixed = format!("{}/{}", provider, normalized);
                if let Some(pricing) = self.models.get(&prefixed) {
                    return Some((pricing, MatchType::Alias));
                }
            }
            if let Some(pricing) = self.models.get(normalized) {
                return Some((pricing, MatchType::Alias));
            }
        }

        let base = strip_date_suffix(normalized);
        if base != normalized {
            if let Some(provider) = provider {
                let prefixed = format!("{}/{}", provider, base);
                if let Some(pricing) = self.models.get(&prefixed) {
                    return Some((pricing, MatchType::Family));
                }
            }
            if let Some(pricing) = self.models.get(&base) {
                return Some((pricing, MatchType::Family));
            }
        }

        None
    }
}

// ============================================================================
// PROVIDER MAPPING
// ============================================================================

/// Maps a span's `provider` attribute to a LiteLLM provider name
///
/// Returns empty string for framework-only values (model lookup handles them)
fn map_system_to_litellm_provider(system: &str) -> &'static str {
    match system.to_lowercase().as_str() {
        "openai" => "openai",
        "anthropic" => "anthropic",
        "cohere" => "cohere",
        "mistral" | "mistralai" => "mistral",
        "aws_bedrock" | "aws.bedrock" | "bedrock" | "amazon_bedrock" => "bedrock",
        "azure" | "azure_openai" | "azure.openai" | "azureopenai" => "azure",
        "google" | "gemini" | "google_ai_studio" => "gemini",
        "vertex" | "vertex_ai" | "vertexai" | "google_vertexai" => "vertex_ai",
        "groq" => "groq",
        "together" | "together_ai" | "togetherai" => "together_ai",
        "ollama" => "ollama",
        "xai" | "x.ai" | "grok" => "xai",
        "openrouter" | "open_router" => "openrouter",
        _ => "",
    }
}

// ============================================================================
// MODEL NAME NORMALIZATION
// ============================================================================

/// Strip "-latest" / ":latest" suffixes added by some frameworks
///
/// Assumes input is already lowercased.
fn normalize_model_name(model: &str) -> &str {
    model
        .trim_end_matches("-latest")
        .trim_end_matches(":latest")
}

/// Strip date suffixes from model names (last resort fallback only)
///
/// Examples:
/// - "claude-3-5-sonnet-20241022" -> "claude-3-5-sonnet"
/// - "gpt-4o-2024-11-20" -> "gpt-4o"
fn strip_date_suffix(model: &str) -> String {
    use std::sync::OnceLock;

    static RE_DATE: OnceLock<Option<regex::Regex>> = OnceLock::new();

    let re = RE_DATE.get_or_init(|| regex::Regex::new(r"-(\d{8}|\d{4}-\d{2}-\d{2})$").ok());
    match re {
        Some(re) => re.replace(model, "").into_owned(),
        None => model.to_string(),
    }
}

// ============================================================================
// INPUT/OUTPUT TYPES
// ============================================================================

/// Input data for cost calculation
#[derive(Debug, Clone, Default)]
pub struct SpanCostInput {
    pub system: Option<String>,
    pub model: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
}

/// Calculated costs for a span (0.0 when no pricing applies)
#[derive(Debug, Clone, Default)]
pub struct SpanCostOutput {
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub match_type: Option<MatchType>,
}

// ============================================================================
// PRICING SERVICE
// ============================================================================

/// Price table shared by every ingest; immutable once built
pub struct PricingService {
    data: PricingData,
    fallback_per_1k: Option<f64>,
}

impl PricingService {
    /// Initialize from the embedded table, extended by the configured file
    ///
    /// A configured pricing file that cannot be read or parsed is an error.
    pub async fn init(config: &PricingConfig) -> Result<Arc<Self>, PricingError> {
        let mut data = PricingData::from_json_str(EMBEDDED_PRICING_JSON)?;
        tracing::debug!(models = data.model_count(), "Loaded embedded pricing");

        if let Some(path) = &config.file {
            let local = Self::load_file(path).await?;
            tracing::debug!(
                path = %path.display(),
                models = local.model_count(),
                "Loaded local pricing file"
            );
            data.extend(local);
        }

        Ok(Arc::new(Self {
            data,
            fallback_per_1k: config.fallback_cost_per_1k_tokens,
        }))
    }

    /// Embedded table only, no fallback rate
    pub fn embedded() -> Result<Self, PricingError> {
        Ok(Self {
            data: PricingData::from_json_str(EMBEDDED_PRICING_JSON)?,
            fallback_per_1k: None,
        })
    }

    /// Build from an explicit table (tests, tooling)
    pub fn from_json_str(json: &str, fallback_per_1k: Option<f64>) -> Result<Self, PricingError> {
        Ok(Self {
            data: PricingData::from_json_str(json)?,
            fallback_per_1k,
        })
    }

    async fn load_file(path: &Path) -> Result<PricingData, PricingError> {
        let json = tokio::fs::read_to_string(path).await?;
        PricingData::from_json_str(&json)
    }

    pub fn model_count(&self) -> usize {
        self.data.model_count()
    }

    /// Calculate costs for a span's token usage
    ///
    /// Never fails: unknown models cost zero unless a fallback rate is set.
    pub fn calculate_cost(&self, input: &SpanCostInput) -> SpanCostOutput {
        let model = match &input.model {
            Some(m) if !m.trim().is_empty() => m.as_str(),
            _ => return SpanCostOutput::default(),
        };

        let input_tokens = input.input_tokens.max(0) as f64;
        let output_tokens = input.output_tokens.max(0) as f64;

        let Some((pricing, match_type)) = self.data.lookup(input.system.as_deref(), model) else {
            return self.fallback_cost(model, input_tokens, output_tokens);
        };

        let input_cost = input_tokens * pricing.input_cost_per_token;
        let output_cost = if pricing.mode.eq_ignore_ascii_case("embedding") {
            0.0
        } else {
            output_tokens * pricing.output_cost_per_token
        };
        let total_cost = input_cost + output_cost;

        tracing::trace!(
            model = model,
            match_type = ?match_type,
            mode = pricing.mode,
            total_cost = total_cost,
            "Calculated cost"
        );

        SpanCostOutput {
            input_cost,
            output_cost,
            total_cost,
            match_type: Some(match_type),
        }
    }

    fn fallback_cost(&self, model: &str, input_tokens: f64, output_tokens: f64) -> SpanCostOutput {
        let tokens = input_tokens + output_tokens;
        match self.fallback_per_1k {
            Some(rate) if tokens > 0.0 => {
                tracing::trace!(model = model, rate, "Pricing model at fallback rate");
                let input_cost = input_tokens / 1000.0 * rate;
                let output_cost = output_tokens / 1000.0 * rate;
                SpanCostOutput {
                    input_cost,
                    output_cost,
                    total_cost: input_cost + output_cost,
                    match_type: Some(MatchType::Fallback),
                }
            }
            _ => {
                tracing::trace!(model = model, "No pricing found for model");
                SpanCostOutput {
                    match_type: Some(MatchType::NotFound),
                    ..Default::default()
                }
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cost_input(system: Option<&str>, model: &str, input: i64, output: i64) -> SpanCostInput {
        SpanCostInput {
            system: system.map(String::from),
            model: Some(model.to_string()),
            input_tokens: input,
            output_tokens: output,
        }
    }

    #[test]
    fn test_parse_embedded_pricing() {
        let data = PricingData::from_json_str(EMBEDDED_PRICING_JSON).unwrap();
        assert!(data.model_count() >= 15);
        // sample_spec and zero-priced entries are skipped
        assert!(data.models.get("sample_spec").is_none());
        assert!(data.models.get("dall-e-3").is_none());
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(PricingData::from_json_str("[]").is_err());
        assert!(PricingData::from_json_str("not json").is_err());
    }

    #[test]
    fn test_lookup_strategies() {
        let data = PricingData::from_json_str(EMBEDDED_PRICING_JSON).unwrap();

        let (_, m) = data.lookup(Some("openai"), "GPT-4o").unwrap();
        assert_eq!(m, MatchType::Exact);

        let (_, m) = data.lookup(None, "openai/gpt-4o-mini").unwrap();
        assert_eq!(m, MatchType::ProviderPrefix);

        let (_, m) = data.lookup(Some("google"), "gemini-1.5-pro").unwrap();
        assert_eq!(m, MatchType::ProviderPrefix);

        let (_, m) = data.lookup(Some("mistral"), "mistral-large-latest").unwrap();
        assert_eq!(m, MatchType::ProviderPrefix);

        let (_, m) = data.lookup(None, "claude-3-5-sonnet-latest").unwrap();
        assert_eq!(m, MatchType::Alias);

        let (_, m) = data.lookup(None, "claude-3-5-sonnet-20241022").unwrap();
        assert_eq!(m, MatchType::Family);

        let (_, m) = data.lookup(None, "gpt-4-turbo-2024-04-09").unwrap();
        assert_eq!(m, MatchType::Family);

        assert!(data.lookup(None, "nonexistent-model-xyz").is_none());
    }

    #[test]
    fn test_strip_date_suffix() {
        assert_eq!(strip_date_suffix("claude-3-opus-20240229"), "claude-3-opus");
        assert_eq!(strip_date_suffix("gpt-4o-2024-11-20"), "gpt-4o");
        assert_eq!(strip_date_suffix("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn test_calculate_cost() {
        let service = PricingService::embedded().unwrap();
        let output = service.calculate_cost(&cost_input(Some("openai"), "gpt-4o", 1000, 500));
        assert!((output.input_cost - 0.0025).abs() < 1e-12);
        assert!((output.output_cost - 0.005).abs() < 1e-12);
        assert!((output.total_cost - 0.0075).abs() < 1e-12);
        assert_eq!(output.match_type, Some(MatchType::Exact));
    }

    #[test]
    fn test_embedding_charges_input_only() {
        let service = PricingService::embedded().unwrap();
        let output =
            service.calculate_cost(&cost_input(None, "text-embedding-3-small", 1000, 1000));
        assert_eq!(output.output_cost, 0.0);
        assert!(output.total_cost > 0.0);
    }

    #[test]
    fn test_negative_tokens_clamped() {
        let service = PricingService::embedded().unwrap();
        let output = service.calculate_cost(&cost_input(None, "gpt-4o", -100, -5));
        assert_eq!(output.total_cost, 0.0);
    }

    #[test]
    fn test_no_model_is_zero() {
        let service = PricingService::embedded().unwrap();
        let output = service.calculate_cost(&SpanCostInput {
            input_tokens: 100,
            ..Default::default()
        });
        assert_eq!(output.total_cost, 0.0);
        assert!(output.match_type.is_none());
    }

    #[test]
    fn test_unknown_model_without_fallback() {
        let service = PricingService::embedded().unwrap();
        let output = service.calculate_cost(&cost_input(None, "my-local-llama", 100, 100));
        assert_eq!(output.total_cost, 0.0);
        assert_eq!(output.match_type, Some(MatchType::NotFound));
    }

    #[test]
    fn test_unknown_model_with_fallback() {
        let service = PricingService::from_json_str("{}", Some(0.002)).unwrap();
        let output = service.calculate_cost(&cost_input(None, "my-local-llama", 1500, 500));
        assert!((output.total_cost - 0.004).abs() < 1e-12);
        assert_eq!(output.match_type, Some(MatchType::Fallback));

        // No tokens, nothing to charge
        let output = service.calculate_cost(&cost_input(None, "my-local-llama", 0, 0));
        assert_eq!(output.match_type, Some(MatchType::NotFound));
    }

    #[tokio::test]
    async fn test_init_extends_with_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prices.json");
        std::fs::write(
            &path,
            r#"{ "my-local-llama": { "input_cost_per_token": 1e-06, "output_cost_per_token": 2e-06 },
                 "gpt-4o": { "input_cost_per_token": 1e-06, "output_cost_per_token": 1e-06 } }"#,
        )
        .unwrap();

        let config = PricingConfig {
            file: Some(path),
            fallback_cost_per_1k_tokens: None,
        };
        let service = PricingService::init(&config).await.unwrap();

        let local = service.calculate_cost(&cost_input(None, "my-local-llama", 1000, 0));
        assert_eq!(local.match_type, Some(MatchType::Exact));
        assert!((local.total_cost - 0.001).abs() < 1e-12);

        let overridden = service.calculate_cost(&cost_input(None, "gpt-4o", 1000, 0));
        assert!((overridden.total_cost - 0.001).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_init_missing_file_is_error() {
        let config = PricingConfig {
            file: Some("/nonexistent/arbor/prices.json".into()),
            fallback_cost_per_1k_tokens: None,
        };
        assert!(matches!(
            PricingService::init(&config).await,
            Err(PricingError::Io(_))
        ));
    }
}
