//! Model catalog and usage-to-cost conversion.

use std::collections::BTreeMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::model::{Model, ModelCost, ProviderId};
use crate::types::{Api, Cost, Usage};

/// Converts token counts into dollars using per-million pricing.
pub fn calculate_cost(pricing: &ModelCost, usage: &Usage) -> Cost {
    let input = pricing.input / 1_000_000.0 * usage.input as f64;
    let output = pricing.output / 1_000_000.0 * usage.output as f64;
    let cache_read = pricing.cache_read / 1_000_000.0 * usage.cache_read as f64;
    let cache_write = pricing.cache_write / 1_000_000.0 * usage.cache_write as f64;
    Cost {
        input,
        output,
        cache_read,
        cache_write,
        total: input + output + cache_read + cache_write,
    }
}

/// Vendor processing tier; discounted and priority tiers scale every cost
/// component uniformly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceTier {
    #[default]
    Default,
    Flex,
    Priority,
}

impl ServiceTier {
    pub fn multiplier(self) -> f64 {
        match self {
            Self::Default => 1.0,
            Self::Flex => 0.5,
            Self::Priority => 2.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Flex => "flex",
            Self::Priority => "priority",
        }
    }

    /// Applies the tier multiplier to an already computed cost.
    pub fn apply(self, cost: &mut Cost) {
        cost.scale(self.multiplier());
    }
}

/// Whether a model accepts the `xhigh` reasoning level.
pub fn supports_xhigh(model: &Model) -> bool {
    let id = model.id.as_str();
    id.contains("gpt-5.1-codex-max") || id.contains("gpt-5.2") || id.contains("opus-4-6")
}

/// Known models keyed by provider and model id.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<BTreeMap<ProviderId, BTreeMap<String, Model>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with [`builtin_models`].
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        for model in builtin_models() {
            registry.register(model);
        }
        registry
    }

    /// Adds or replaces a model.
    pub fn register(&self, model: Model) {
        let mut models = self.models.write().unwrap_or_else(|e| e.into_inner());
        models
            .entry(model.provider.clone())
            .or_default()
            .insert(model.id.clone(), model);
    }

    pub fn get(&self, provider: &str, model_id: &str) -> Option<Model> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models
            .get(&ProviderId::new(provider))
            .and_then(|by_id| by_id.get(model_id))
            .cloned()
    }

    pub fn providers(&self) -> Vec<ProviderId> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models.keys().cloned().collect()
    }

    pub fn models(&self, provider: &str) -> Vec<Model> {
        let models = self.models.read().unwrap_or_else(|e| e.into_inner());
        models
            .get(&ProviderId::new(provider))
            .map(|by_id| by_id.values().cloned().collect())
            .unwrap_or_default()
    }
}

const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Built-in catalog with list prices (dollars per million tokens).
pub fn builtin_models() -> Vec<Model> {
    vec![
        Model::new("claude-sonnet-4-5", Api::AnthropicMessages, "anthropic", ANTHROPIC_BASE_URL)
            .name("Claude Sonnet 4.5")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(3.0, 15.0, 0.3, 3.75))
            .limits(200_000, 64_000),
        Model::new("claude-haiku-4-5", Api::AnthropicMessages, "anthropic", ANTHROPIC_BASE_URL)
            .name("Claude Haiku 4.5")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(1.0, 5.0, 0.1, 1.25))
            .limits(200_000, 64_000),
        Model::new("claude-opus-4-1", Api::AnthropicMessages, "anthropic", ANTHROPIC_BASE_URL)
            .name("Claude Opus 4.1")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(15.0, 75.0, 1.5, 18.75))
            .limits(200_000, 32_000),
        Model::new("gpt-5", Api::OpenAiResponses, "openai", OPENAI_BASE_URL)
            .name("GPT-5")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(1.25, 10.0, 0.125, 0.0))
            .limits(400_000, 128_000),
        Model::new("gpt-5-mini", Api::OpenAiResponses, "openai", OPENAI_BASE_URL)
            .name("GPT-5 Mini")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(0.25, 2.0, 0.025, 0.0))
            .limits(400_000, 128_000),
        Model::new("gpt-4o-mini", Api::OpenAiCompletions, "openai", OPENAI_BASE_URL)
            .name("GPT-4o mini")
            .with_images()
            .cost(ModelCost::new(0.15, 0.6, 0.075, 0.0))
            .limits(128_000, 16_384),
        Model::new(
            "llama-3.3-70b-versatile",
            Api::OpenAiCompletions,
            "groq",
            "https://api.groq.com/openai/v1",
        )
        .name("Llama 3.3 70B Versatile")
        .cost(ModelCost::new(0.59, 0.79, 0.0, 0.0))
        .limits(131_072, 32_768),
        Model::new("grok-4", Api::OpenAiCompletions, "xai", "https://api.x.ai/v1")
            .name("Grok 4")
            .reasoning(true)
            .with_images()
            .cost(ModelCost::new(3.0, 15.0, 0.75, 0.0))
            .limits(256_000, 64_000),
        Model::new(
            "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
            Api::BedrockConverseStream,
            "amazon-bedrock",
            "https://bedrock-runtime.us-east-1.amazonaws.com",
        )
        .name("Claude Sonnet 4.5 (Bedrock)")
        .reasoning(true)
        .with_images()
        .cost(ModelCost::new(3.0, 15.0, 0.3, 3.75))
        .limits(200_000, 64_000),
        Model::new(
            "amazon.nova-pro-v1:0",
            Api::BedrockConverseStream,
            "amazon-bedrock",
            "https://bedrock-runtime.us-east-1.amazonaws.com",
        )
        .name("Amazon Nova Pro")
        .with_images()
        .cost(ModelCost::new(0.8, 3.2, 0.2, 0.0))
        .limits(300_000, 8_192),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_price_per_million_times_tokens() {
        let pricing = ModelCost::new(3.0, 15.0, 0.3, 3.75);
        let usage = Usage {
            input: 2_000,
            output: 1_000,
            cache_read: 10_000,
            cache_write: 4_000,
            ..Usage::default()
        };
        let cost = calculate_cost(&pricing, &usage);
        assert!((cost.input - 0.006).abs() < 1e-12);
        assert!((cost.output - 0.015).abs() < 1e-12);
        assert!((cost.cache_read - 0.003).abs() < 1e-12);
        assert!((cost.cache_write - 0.015).abs() < 1e-12);
        assert!((cost.total - 0.039).abs() < 1e-12);
    }

    #[test]
    fn service_tiers_scale_all_components() {
        let mut cost = Cost {
            input: 1.0,
            output: 2.0,
            cache_read: 0.5,
            cache_write: 0.5,
            total: 4.0,
        };
        ServiceTier::Flex.apply(&mut cost);
        assert!((cost.output - 1.0).abs() < 1e-12);
        assert!((cost.total - 2.0).abs() < 1e-12);
        ServiceTier::Priority.apply(&mut cost);
        assert!((cost.total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn builtin_catalog_resolves_by_provider_and_id() {
        let registry = ModelRegistry::with_builtins();
        let model = registry.get("anthropic", "claude-sonnet-4-5").expect("model");
        assert_eq!(model.api, Api::AnthropicMessages);
        assert!(registry.get("anthropic", "nope").is_none());
        assert!(registry.providers().contains(&ProviderId::new("amazon-bedrock")));
    }

    #[test]
    fn xhigh_support_is_model_specific() {
        let registry = ModelRegistry::with_builtins();
        let gpt5 = registry.get("openai", "gpt-5").expect("model");
        assert!(!supports_xhigh(&gpt5));
        let mut custom = gpt5.clone();
        custom.id = "gpt-5.2".into();
        assert!(supports_xhigh(&custom));
    }
}
