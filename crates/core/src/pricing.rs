//! Pricing table for every provider's models.
//!
//! - `ModelPricing` per-model rates in USD per token
//! - 200k tiered pricing for input/output
//! - `PricingTable::lookup()` with exact → longest-prefix → reverse-prefix fallback
//! - Hardcoded defaults for offline use
//!
//! The table is an immutable value built once and passed to the parsers; there
//! is no global pricing state.

use crate::normalize::{TokenSnapshot, UsageAliases};
use crate::types::Provider;
use std::collections::BTreeMap;

/// Per-model pricing in USD per token.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelPricing {
    pub input_cost_per_token: f64,
    pub output_cost_per_token: f64,
    pub cache_creation_cost_per_token: f64,
    pub cache_read_cost_per_token: f64,
    /// If set, input tokens above 200k are charged at this rate.
    pub input_cost_per_token_above_200k: Option<f64>,
    /// If set, output tokens above 200k are charged at this rate.
    pub output_cost_per_token_above_200k: Option<f64>,
}

impl ModelPricing {
    const fn flat(input: f64, output: f64, cache_write: f64, cache_read: f64) -> Self {
        Self {
            input_cost_per_token: input,
            output_cost_per_token: output,
            cache_creation_cost_per_token: cache_write,
            cache_read_cost_per_token: cache_read,
            input_cost_per_token_above_200k: None,
            output_cost_per_token_above_200k: None,
        }
    }

    const fn tiered(
        input: f64,
        output: f64,
        cache_write: f64,
        cache_read: f64,
        input_above: f64,
        output_above: f64,
    ) -> Self {
        Self {
            input_cost_per_token: input,
            output_cost_per_token: output,
            cache_creation_cost_per_token: cache_write,
            cache_read_cost_per_token: cache_read,
            input_cost_per_token_above_200k: Some(input_above),
            output_cost_per_token_above_200k: Some(output_above),
        }
    }

    /// Cost in USD of one usage snapshot.
    pub fn cost_of(&self, snapshot: &TokenSnapshot, aliases: &UsageAliases) -> f64 {
        let input = tiered_cost(
            snapshot.uncached_input(aliases),
            self.input_cost_per_token,
            self.input_cost_per_token_above_200k,
        );
        let output = tiered_cost(
            snapshot.billable_output(aliases),
            self.output_cost_per_token,
            self.output_cost_per_token_above_200k,
        );
        let cache_read = snapshot.cache_read as f64 * self.cache_read_cost_per_token;
        let cache_write = snapshot.cache_write as f64 * self.cache_creation_cost_per_token;
        input + output + cache_read + cache_write
    }
}

fn tiered_cost(tokens: u64, base_rate: f64, above_200k_rate: Option<f64>) -> f64 {
    const THRESHOLD: u64 = 200_000;
    if tokens == 0 {
        return 0.0;
    }

    match above_200k_rate {
        Some(high_rate) if tokens > THRESHOLD => {
            let below = THRESHOLD as f64 * base_rate;
            let above = (tokens - THRESHOLD) as f64 * high_rate;
            below + above
        }
        _ => tokens as f64 * base_rate,
    }
}

/// Immutable model → pricing lookup table.
#[derive(Debug, Clone, PartialEq)]
pub struct PricingTable {
    models: BTreeMap<String, ModelPricing>,
}

impl PricingTable {
    pub fn new(models: BTreeMap<String, ModelPricing>) -> Self {
        Self { models }
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Look up pricing for a model ID.
    ///
    /// The ID is lowercased and stripped of any `vendor/` or `models/` prefix, then:
    /// 1. Exact match (e.g. "gpt-5")
    /// 2. Longest key that prefixes the ID (key "gpt-5-mini" wins over "gpt-5"
    ///    for "gpt-5-mini-2025-08-07")
    /// 3. Smallest key that the ID prefixes (e.g. "claude-opus" matches "claude-opus-4-6")
    pub fn lookup(&self, model_id: &str) -> Option<&ModelPricing> {
        let id = canonical_model_id(model_id);
        if id.is_empty() {
            return None;
        }
        if let Some(p) = self.models.get(&id) {
            return Some(p);
        }
        let longest_prefix = self
            .models
            .iter()
            .filter(|(key, _)| id.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len());
        if let Some((_, p)) = longest_prefix {
            return Some(p);
        }
        self.models
            .iter()
            .find(|(key, _)| key.starts_with(id.as_str()))
            .map(|(_, p)| p)
    }

    /// Model used to price usage that carries no model name at all.
    pub fn default_model(provider: Provider) -> &'static str {
        match provider {
            Provider::Claude => "claude-sonnet-4-5",
            Provider::Codex => "gpt-5",
            Provider::Gemini => "gemini-2.5-pro",
        }
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::new(default_pricing())
    }
}

fn canonical_model_id(model_id: &str) -> String {
    let trimmed = model_id.trim();
    let bare = trimmed.rsplit('/').next().unwrap_or(trimmed);
    bare.to_ascii_lowercase()
}

/// Pricing for the models each CLI reports, for offline use.
pub fn default_pricing() -> BTreeMap<String, ModelPricing> {
    let mut m = BTreeMap::new();

    // Anthropic
    m.insert("claude-opus-4-6".into(), ModelPricing::tiered(5e-6, 25e-6, 6.25e-6, 0.5e-6, 10e-6, 37.5e-6));
    m.insert("claude-opus-4-5".into(), ModelPricing::flat(5e-6, 25e-6, 6.25e-6, 0.5e-6));
    m.insert("claude-opus-4-1".into(), ModelPricing::flat(15e-6, 75e-6, 18.75e-6, 1.5e-6));
    m.insert("claude-opus-4".into(), ModelPricing::flat(15e-6, 75e-6, 18.75e-6, 1.5e-6));
    m.insert("claude-sonnet-4-6".into(), ModelPricing::tiered(3e-6, 15e-6, 3.75e-6, 0.3e-6, 6e-6, 22.5e-6));
    m.insert("claude-sonnet-4-5".into(), ModelPricing::tiered(3e-6, 15e-6, 3.75e-6, 0.3e-6, 6e-6, 22.5e-6));
    m.insert("claude-sonnet-4".into(), ModelPricing::tiered(3e-6, 15e-6, 3.75e-6, 0.3e-6, 6e-6, 22.5e-6));
    m.insert("claude-haiku-4-5".into(), ModelPricing::flat(1e-6, 5e-6, 1.25e-6, 0.1e-6));
    m.insert("claude-3-7-sonnet".into(), ModelPricing::flat(3e-6, 15e-6, 3.75e-6, 0.3e-6));
    m.insert("claude-3-5-sonnet".into(), ModelPricing::flat(3e-6, 15e-6, 3.75e-6, 0.3e-6));
    m.insert("claude-3-5-haiku".into(), ModelPricing::flat(0.8e-6, 4e-6, 1e-6, 0.08e-6));

    // OpenAI (Codex)
    m.insert("gpt-5".into(), ModelPricing::flat(1.25e-6, 10e-6, 0.0, 0.125e-6));
    m.insert("gpt-5-codex".into(), ModelPricing::flat(1.25e-6, 10e-6, 0.0, 0.125e-6));
    m.insert("gpt-5-mini".into(), ModelPricing::flat(0.25e-6, 2e-6, 0.0, 0.025e-6));
    m.insert("gpt-5-nano".into(), ModelPricing::flat(0.05e-6, 0.4e-6, 0.0, 0.005e-6));
    m.insert("gpt-4.1".into(), ModelPricing::flat(2e-6, 8e-6, 0.0, 0.5e-6));
    m.insert("o3".into(), ModelPricing::flat(2e-6, 8e-6, 0.0, 0.5e-6));
    m.insert("o4-mini".into(), ModelPricing::flat(1.1e-6, 4.4e-6, 0.0, 0.275e-6));
    m.insert("codex-mini-latest".into(), ModelPricing::flat(1.5e-6, 6e-6, 0.0, 0.375e-6));

    // Google (Gemini)
    m.insert("gemini-3-pro".into(), ModelPricing::tiered(2e-6, 12e-6, 0.0, 0.2e-6, 4e-6, 18e-6));
    m.insert("gemini-2.5-pro".into(), ModelPricing::tiered(1.25e-6, 10e-6, 0.0, 0.31e-6, 2.5e-6, 15e-6));
    m.insert("gemini-2.5-flash".into(), ModelPricing::flat(0.3e-6, 2.5e-6, 0.0, 0.075e-6));
    m.insert("gemini-2.5-flash-lite".into(), ModelPricing::flat(0.1e-6, 0.4e-6, 0.0, 0.025e-6));
    m.insert("gemini-2.0-flash".into(), ModelPricing::flat(0.1e-6, 0.4e-6, 0.0, 0.025e-6));

    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::{CLAUDE_ALIASES, CODEX_ALIASES, GEMINI_ALIASES};

    #[test]
    fn test_every_provider_default_model_is_priced() {
        let table = PricingTable::default();
        for provider in Provider::ALL {
            assert!(
                table.lookup(PricingTable::default_model(provider)).is_some(),
                "{provider}"
            );
        }
    }

    #[test]
    fn test_tiered_pricing_opus_46() {
        let table = PricingTable::default();
        let p = table.lookup("claude-opus-4-6").unwrap();
        let snap = TokenSnapshot { input: 500_000, ..Default::default() };
        // First 200k at $5/M = $1.00, remaining 300k at $10/M = $3.00 => $4.00
        assert!((p.cost_of(&snap, &CLAUDE_ALIASES) - 4.0).abs() < 0.01);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = PricingTable::default();
        let mini = table.lookup("gpt-5-mini-2025-08-07").unwrap();
        assert_eq!(mini.input_cost_per_token, 0.25e-6);
        let dated = table.lookup("claude-sonnet-4-5-20250929").unwrap();
        assert_eq!(dated.input_cost_per_token, 3e-6);
    }

    #[test]
    fn test_vendor_prefix_stripped() {
        let table = PricingTable::default();
        assert!(table.lookup("models/gemini-2.5-flash").is_some());
        assert!(table.lookup("openai/GPT-5").is_some());
    }

    #[test]
    fn test_unknown_model_is_none() {
        let table = PricingTable::default();
        assert!(table.lookup("llama-3-70b").is_none());
        assert!(table.lookup("").is_none());
    }

    #[test]
    fn test_cached_input_not_double_billed() {
        let table = PricingTable::default();
        let p = table.lookup("gpt-5").unwrap();
        let snap = TokenSnapshot { input: 1_000_000, cache_read: 1_000_000, ..Default::default() };
        // All input was cached: only the cache-read rate applies.
        assert!((p.cost_of(&snap, &CODEX_ALIASES) - 0.125).abs() < 1e-9);
    }

    #[test]
    fn test_gemini_thoughts_billed_as_output() {
        let table = PricingTable::default();
        let p = table.lookup("gemini-2.5-flash").unwrap();
        let snap = TokenSnapshot { output: 500_000, reasoning: 500_000, ..Default::default() };
        assert!((p.cost_of(&snap, &GEMINI_ALIASES) - 2.5).abs() < 1e-9);
    }
}
