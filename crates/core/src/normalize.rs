//! Token/cost field normalization.
//!
//! Every provider spells its usage counters differently (`input_tokens`,
//! `inputTokens`, `promptTokenCount`, `cached`, ...). Each canonical field is
//! read through a priority-ordered alias list: the first alias that is present
//! with a non-null value wins, and that value is coerced to a finite
//! non-negative number (anything else becomes 0).

use crate::types::{ModelUsageMap, Provider};
use serde_json::Value;

/// Priority-ordered field names for each canonical usage counter.
#[derive(Debug, Clone, Copy)]
pub struct UsageAliases {
    pub input: &'static [&'static str],
    pub output: &'static [&'static str],
    pub cache_read: &'static [&'static str],
    pub cache_write: &'static [&'static str],
    pub reasoning: &'static [&'static str],
    /// Whether `input` already includes the cache-read portion.
    pub input_includes_cache_read: bool,
    /// Whether `output` already includes reasoning tokens.
    pub output_includes_reasoning: bool,
}

pub const CLAUDE_ALIASES: UsageAliases = UsageAliases {
    input: &["inputTokens", "input_tokens", "prompt_tokens"],
    output: &["outputTokens", "output_tokens", "completion_tokens"],
    cache_read: &[
        "cacheReadTokens",
        "cache_read_tokens",
        "cacheReadInputTokens",
        "cache_read_input_tokens",
    ],
    cache_write: &[
        "cacheWriteTokens",
        "cache_write_tokens",
        "cacheCreationInputTokens",
        "cache_creation_input_tokens",
        "cacheCreationTokens",
        "cache_creation_tokens",
    ],
    reasoning: &["reasoningTokens", "reasoning_tokens", "thinking_tokens"],
    input_includes_cache_read: false,
    output_includes_reasoning: true,
};

pub const CODEX_ALIASES: UsageAliases = UsageAliases {
    input: &["inputTokens", "input_tokens", "prompt_tokens"],
    output: &["outputTokens", "output_tokens", "completion_tokens"],
    cache_read: &[
        "cacheReadTokens",
        "cache_read_tokens",
        "cachedInputTokens",
        "cached_input_tokens",
        "cached_tokens",
    ],
    cache_write: &[
        "cacheWriteTokens",
        "cache_write_tokens",
        "cacheCreationInputTokens",
        "cache_creation_input_tokens",
        "cache_creation_tokens",
    ],
    reasoning: &[
        "reasoningTokens",
        "reasoning_tokens",
        "reasoningOutputTokens",
        "reasoning_output_tokens",
    ],
    input_includes_cache_read: true,
    output_includes_reasoning: true,
};

pub const GEMINI_ALIASES: UsageAliases = UsageAliases {
    input: &["inputTokens", "input_tokens", "promptTokenCount", "input"],
    output: &["outputTokens", "output_tokens", "candidatesTokenCount", "output"],
    cache_read: &[
        "cacheReadTokens",
        "cache_read_tokens",
        "cachedContentTokenCount",
        "cached",
    ],
    cache_write: &[
        "cacheWriteTokens",
        "cache_write_tokens",
        "cacheCreationInputTokens",
        "cache_creation_input_tokens",
        "cacheCreationTokens",
        "cache_creation_tokens",
    ],
    reasoning: &["reasoningTokens", "reasoning_tokens", "thoughtsTokenCount", "thoughts"],
    input_includes_cache_read: true,
    output_includes_reasoning: false,
};

impl UsageAliases {
    pub fn for_provider(provider: Provider) -> &'static UsageAliases {
        match provider {
            Provider::Claude => &CLAUDE_ALIASES,
            Provider::Codex => &CODEX_ALIASES,
            Provider::Gemini => &GEMINI_ALIASES,
        }
    }
}

/// Coerce a JSON value to a finite non-negative number.
///
/// Numbers pass through, numeric strings are parsed, everything else is 0.
pub fn coerce_non_negative(value: &Value) -> f64 {
    let n = match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() && n > 0.0 {
        n
    } else {
        0.0
    }
}

/// Read the first present, non-null alias from `obj` as a non-negative count.
pub fn read_count(obj: &Value, aliases: &[&str]) -> u64 {
    read_number(obj, aliases).round() as u64
}

/// Read the first present, non-null alias from `obj` as a non-negative float.
pub fn read_number(obj: &Value, aliases: &[&str]) -> f64 {
    aliases
        .iter()
        .find_map(|key| obj.get(*key).filter(|v| !v.is_null()))
        .map(coerce_non_negative)
        .unwrap_or(0.0)
}

/// One usage report in canonical form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenSnapshot {
    pub input: u64,
    pub output: u64,
    pub cache_read: u64,
    pub cache_write: u64,
    pub reasoning: u64,
}

impl TokenSnapshot {
    pub fn from_value(obj: &Value, aliases: &UsageAliases) -> Self {
        Self {
            input: read_count(obj, aliases.input),
            output: read_count(obj, aliases.output),
            cache_read: read_count(obj, aliases.cache_read),
            cache_write: read_count(obj, aliases.cache_write),
            reasoning: read_count(obj, aliases.reasoning),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0 && self.reasoning == 0
    }

    /// input + output + cache read + cache write.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_read + self.cache_write
    }

    /// Input tokens billed at the full input rate.
    pub fn uncached_input(&self, aliases: &UsageAliases) -> u64 {
        if aliases.input_includes_cache_read {
            self.input.saturating_sub(self.cache_read)
        } else {
            self.input
        }
    }

    /// Output tokens billed at the output rate.
    pub fn billable_output(&self, aliases: &UsageAliases) -> u64 {
        if aliases.output_includes_reasoning {
            self.output
        } else {
            self.output + self.reasoning
        }
    }

    /// Field-wise `self - previous`, saturating at zero.
    pub fn delta_since(&self, previous: &TokenSnapshot) -> TokenSnapshot {
        TokenSnapshot {
            input: self.input.saturating_sub(previous.input),
            output: self.output.saturating_sub(previous.output),
            cache_read: self.cache_read.saturating_sub(previous.cache_read),
            cache_write: self.cache_write.saturating_sub(previous.cache_write),
            reasoning: self.reasoning.saturating_sub(previous.reasoning),
        }
    }
}

/// Fill per-model message counts the provider never reported.
///
/// Every model whose count is still 0 receives `round(total / distinct models)`.
/// This is an approximation; it does not reconcile with per-turn counts of
/// models that did report their own.
pub fn distribute_message_counts(models: &mut ModelUsageMap, total_messages: u64) {
    if models.is_empty() {
        return;
    }
    let share = (total_messages as f64 / models.len() as f64).round() as u64;
    for usage in models.values_mut() {
        if usage.message_count == 0 {
            usage.message_count = share;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ModelUsage;
    use serde_json::json;

    #[test]
    fn first_present_alias_wins() {
        let v = json!({"cache_read_tokens": 5, "cacheReadTokens": 9});
        assert_eq!(read_count(&v, CLAUDE_ALIASES.cache_read), 9);
    }

    #[test]
    fn null_alias_falls_through() {
        let v = json!({"cacheReadTokens": null, "cache_read_input_tokens": 12});
        assert_eq!(read_count(&v, CLAUDE_ALIASES.cache_read), 12);
    }

    #[test]
    fn non_numeric_coerces_to_zero() {
        assert_eq!(coerce_non_negative(&json!("abc")), 0.0);
        assert_eq!(coerce_non_negative(&json!(-4)), 0.0);
        assert_eq!(coerce_non_negative(&json!(true)), 0.0);
        assert_eq!(coerce_non_negative(&json!("42")), 42.0);
        assert_eq!(read_count(&json!({}), CODEX_ALIASES.input), 0);
    }

    #[test]
    fn gemini_snapshot_reads_short_names() {
        let v = json!({"input": 7015, "output": 19, "cached": 2945, "thoughts": 40, "tool": 0});
        let s = TokenSnapshot::from_value(&v, &GEMINI_ALIASES);
        assert_eq!(s.input, 7015);
        assert_eq!(s.output, 19);
        assert_eq!(s.cache_read, 2945);
        assert_eq!(s.reasoning, 40);
        assert_eq!(s.uncached_input(&GEMINI_ALIASES), 7015 - 2945);
    }

    #[test]
    fn cache_write_aliases_all_resolve() {
        for key in ["cacheWriteTokens", "cache_creation_input_tokens", "cacheCreationTokens"] {
            for aliases in [&CLAUDE_ALIASES, &GEMINI_ALIASES] {
                let v = json!({ key: 10 });
                assert_eq!(TokenSnapshot::from_value(&v, aliases).cache_write, 10, "{key}");
            }
        }
    }

    #[test]
    fn delta_saturates() {
        let a = TokenSnapshot { input: 10, output: 5, ..Default::default() };
        let b = TokenSnapshot { input: 4, output: 9, ..Default::default() };
        let d = a.delta_since(&b);
        assert_eq!(d.input, 6);
        assert_eq!(d.output, 0);
    }

    #[test]
    fn even_split_fallback_rounds() {
        let mut models = ModelUsageMap::new();
        models.insert("a".into(), ModelUsage::default());
        models.insert("b".into(), ModelUsage::default());
        models.insert(
            "c".into(),
            ModelUsage { message_count: 7, ..Default::default() },
        );
        distribute_message_counts(&mut models, 5);
        assert_eq!(models["a"].message_count, 2);
        assert_eq!(models["b"].message_count, 2);
        assert_eq!(models["c"].message_count, 7);
    }
}
