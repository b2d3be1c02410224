// crates/core/src/tools.rs
//
// Tool-use extraction: categorize tool names, track invocations per session,
// attribute turn tokens to the tools a turn invoked, and expand composite
// delegation/skill buckets into per-target entries with conserved totals.

use crate::normalize::TokenSnapshot;
use crate::types::{EnrichedTools, Provider, ToolUsage, ToolUsageMap};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

/// Key prefix of an expanded sub-agent entry (`agent:Explore`).
pub const AGENT_PREFIX: &str = "agent:";
/// Key prefix of an expanded skill entry (`skill:brainstorming`).
pub const SKILL_PREFIX: &str = "skill:";

const AGENT_TOOL_NAMES: &[&str] = &[
    "Task",
    "Agent",
    "delegate",
    "delegate_to_agent",
    "spawn_agent",
    "subagent",
];
const SKILL_TOOL_NAMES: &[&str] = &["Skill", "activate_skill", "use_skill", "skill"];

const CLAUDE_CORE_TOOLS: &[&str] = &[
    "AskUserQuestion",
    "Bash",
    "BashOutput",
    "Edit",
    "ExitPlanMode",
    "Glob",
    "Grep",
    "KillShell",
    "LS",
    "MultiEdit",
    "NotebookEdit",
    "NotebookRead",
    "Read",
    "SlashCommand",
    "TodoWrite",
    "WebFetch",
    "WebSearch",
    "Write",
];
const CODEX_CORE_TOOLS: &[&str] = &[
    "apply_patch",
    "exec_command",
    "grep_files",
    "list_dir",
    "local_shell",
    "read_file",
    "shell",
    "unified_exec",
    "update_plan",
    "view_image",
    "web_search",
    "write_stdin",
];
const GEMINI_CORE_TOOLS: &[&str] = &[
    "glob",
    "google_web_search",
    "list_directory",
    "read_file",
    "read_many_files",
    "replace",
    "run_shell_command",
    "save_memory",
    "search_file_content",
    "web_fetch",
    "write_file",
    "write_todos",
];

fn core_tools(provider: Provider) -> &'static [&'static str] {
    match provider {
        Provider::Claude => CLAUDE_CORE_TOOLS,
        Provider::Codex => CODEX_CORE_TOOLS,
        Provider::Gemini => GEMINI_CORE_TOOLS,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Mcp,
    Core,
    Skill,
    Agent,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolClass {
    pub category: ToolCategory,
    pub group: String,
}

/// Classify a tool name. Rules apply in order: MCP namespace, provider
/// built-in, skill, delegation, other.
pub fn categorize(name: &str, provider: Provider) -> ToolClass {
    if let Some(ns) = mcp_namespace(name) {
        return ToolClass {
            category: ToolCategory::Mcp,
            group: format!("MCP: {ns}"),
        };
    }
    if core_tools(provider).contains(&name) {
        return ToolClass {
            category: ToolCategory::Core,
            group: format!("{} Core", provider.display_name()),
        };
    }
    match composite_kind(name) {
        Some(CompositeKind::Skill) => ToolClass {
            category: ToolCategory::Skill,
            group: "Skills".into(),
        },
        Some(CompositeKind::Agent) => ToolClass {
            category: ToolCategory::Agent,
            group: "Subagents".into(),
        },
        None => ToolClass {
            category: ToolCategory::Other,
            group: "Other".into(),
        },
    }
}

/// `mcp__github__create_issue` → `github`, `mcp:github:create_issue` → `github`.
fn mcp_namespace(name: &str) -> Option<&str> {
    let rest = name
        .strip_prefix("mcp__")
        .map(|r| (r, "__"))
        .or_else(|| name.strip_prefix("mcp:").map(|r| (r, ":")));
    let (rest, sep) = rest?;
    let ns = rest.split(sep).next().unwrap_or(rest);
    (!ns.is_empty()).then_some(ns)
}

/// The two kinds of composite bucket that get split per sub-target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositeKind {
    Agent,
    Skill,
}

impl CompositeKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            CompositeKind::Agent => AGENT_PREFIX,
            CompositeKind::Skill => SKILL_PREFIX,
        }
    }
}

/// Delegation or skill tool, by exact name or by expanded-entry prefix.
pub fn composite_kind(name: &str) -> Option<CompositeKind> {
    if AGENT_TOOL_NAMES.contains(&name) || name.starts_with(AGENT_PREFIX) {
        Some(CompositeKind::Agent)
    } else if SKILL_TOOL_NAMES.contains(&name) || name.starts_with(SKILL_PREFIX) {
        Some(CompositeKind::Skill)
    } else {
        None
    }
}

/// Which sub-agent type or skill a composite invocation targets.
///
/// Returns `None` for non-composite tools and for already-expanded names.
pub fn sub_target(name: &str, input: &Value) -> Option<String> {
    if name.starts_with(AGENT_PREFIX) || name.starts_with(SKILL_PREFIX) {
        return None;
    }
    let (keys, fallback): (&[&str], &str) = match composite_kind(name)? {
        CompositeKind::Agent => (
            &["subagent_type", "subagentType", "agent_type", "agent", "name"],
            "general-purpose",
        ),
        CompositeKind::Skill => (&["skill", "skill_name", "name", "command"], "unknown"),
    };
    let target = keys
        .iter()
        .find_map(|k| input.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(fallback);
    Some(target.to_string())
}

// ---------------------------------------------------------------------------
// Conserving splits
// ---------------------------------------------------------------------------

/// Split `total` across `weights`: every share but the last is
/// `round(total * w / sum(w))`, the last takes the remainder, so the shares
/// always sum to exactly `total`. Zero total weight yields all zeros.
pub fn split_conserving(total: u64, weights: &[u64]) -> Vec<u64> {
    let weight_sum: u64 = weights.iter().sum();
    if weights.is_empty() {
        return Vec::new();
    }
    if weight_sum == 0 {
        return vec![0; weights.len()];
    }
    let mut shares = Vec::with_capacity(weights.len());
    let mut allocated: u64 = 0;
    let last = weights.len() - 1;
    for (i, w) in weights.iter().enumerate() {
        if i == last {
            shares.push(total - allocated);
        } else {
            let ideal = (total as f64 * *w as f64 / weight_sum as f64).round() as u64;
            let share = ideal.min(total - allocated);
            allocated += share;
            shares.push(share);
        }
    }
    shares
}

/// Float variant of [`split_conserving`]. Shares are exact proportions, not
/// rounded; the last share absorbs the remainder.
pub fn split_conserving_f64(total: f64, weights: &[u64]) -> Vec<f64> {
    let weight_sum: u64 = weights.iter().sum();
    if weights.is_empty() {
        return Vec::new();
    }
    if weight_sum == 0 || !total.is_finite() {
        return vec![0.0; weights.len()];
    }
    let mut shares = Vec::with_capacity(weights.len());
    let mut allocated = 0.0;
    let last = weights.len() - 1;
    for (i, w) in weights.iter().enumerate() {
        if i == last {
            shares.push(total - allocated);
        } else {
            let share = total * *w as f64 / weight_sum as f64;
            allocated += share;
            shares.push(share);
        }
    }
    shares
}

/// Split one usage entry across weighted targets, field by field.
pub fn split_usage(parent: &ToolUsage, weights: &[u64]) -> Vec<ToolUsage> {
    let count = split_conserving(parent.count, weights);
    let total = split_conserving(parent.total_tokens, weights);
    let input = split_conserving(parent.input_tokens, weights);
    let output = split_conserving(parent.output_tokens, weights);
    let cache_read = split_conserving(parent.cache_read_tokens, weights);
    let cache_write = split_conserving(parent.cache_write_tokens, weights);
    let errors = split_conserving(parent.error_count, weights);
    let cost = split_conserving_f64(parent.estimated_cost, weights);
    (0..weights.len())
        .map(|i| ToolUsage {
            count: count[i],
            total_tokens: total[i],
            input_tokens: input[i],
            output_tokens: output[i],
            cache_read_tokens: cache_read[i],
            cache_write_tokens: cache_write[i],
            estimated_cost: cost[i],
            error_count: errors[i],
        })
        .collect()
}

/// Sub-targets in split order: most calls first, ties by name. The last one
/// absorbs rounding remainders.
fn ordered_targets(subs: &BTreeMap<String, u64>) -> Vec<(&String, u64)> {
    let mut targets: Vec<(&String, u64)> = subs.iter().map(|(k, v)| (k, *v)).collect();
    targets.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    targets
}

/// Replace each composite entry that has sub-counts with one entry per
/// sub-target (`agent:<type>` / `skill:<name>`). Entries without sub-counts
/// pass through unchanged.
pub fn expand_composites(usage: &ToolUsageMap, enriched: &EnrichedTools) -> ToolUsageMap {
    let mut out = ToolUsageMap::new();
    for (name, entry) in usage {
        let subs = enriched
            .get(name)
            .filter(|subs| subs.values().sum::<u64>() > 0);
        let Some(subs) = subs else {
            out.entry(name.clone()).or_default().add(entry);
            continue;
        };
        let prefix = composite_kind(name)
            .map(|k| k.prefix())
            .unwrap_or(AGENT_PREFIX);
        let targets = ordered_targets(subs);
        let weights: Vec<u64> = targets.iter().map(|(_, n)| *n).collect();
        for ((target, _), share) in targets.iter().zip(split_usage(entry, &weights)) {
            out.entry(format!("{prefix}{target}")).or_default().add(&share);
        }
    }
    out
}

/// Fill `estimated_cost` for tools without a reported cost, proportional to
/// the tool's share of the session's tokens.
pub fn impute_costs(usage: &mut ToolUsageMap, session_tokens: u64, session_cost: f64) {
    if session_tokens == 0 || !session_cost.is_finite() || session_cost <= 0.0 {
        return;
    }
    for entry in usage.values_mut() {
        if entry.estimated_cost == 0.0 {
            entry.estimated_cost = session_cost * entry.total_tokens as f64 / session_tokens as f64;
        }
    }
}

// ---------------------------------------------------------------------------
// Per-session tracker
// ---------------------------------------------------------------------------

/// Accumulates tool invocations while a parser walks a transcript.
#[derive(Debug, Default)]
pub struct ToolTracker {
    usage: ToolUsageMap,
    enriched: EnrichedTools,
    total_calls: u64,
    /// Calls since the last token attribution, by name.
    pending: BTreeMap<String, u64>,
    call_names: HashMap<String, String>,
}

impl ToolTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation of `name`.
    pub fn record_call(&mut self, name: &str, call_id: Option<&str>, input: &Value) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        self.total_calls += 1;
        self.usage.entry(name.to_string()).or_default().count += 1;
        *self.pending.entry(name.to_string()).or_default() += 1;
        if let Some(target) = sub_target(name, input) {
            *self
                .enriched
                .entry(name.to_string())
                .or_default()
                .entry(target)
                .or_default() += 1;
        }
        if let Some(id) = call_id.filter(|id| !id.is_empty()) {
            self.call_names.insert(id.to_string(), name.to_string());
        }
    }

    /// Record a failed result for a previously seen call id. Unknown ids are ignored.
    pub fn record_error_for_call(&mut self, call_id: &str) {
        if let Some(name) = self.call_names.get(call_id).cloned() {
            self.record_error(&name);
        }
    }

    pub fn record_error(&mut self, name: &str) {
        if let Some(entry) = self.usage.get_mut(name) {
            entry.error_count += 1;
        }
    }

    /// Tool name for a call id seen earlier in the transcript.
    pub fn name_for_call(&self, call_id: &str) -> Option<&str> {
        self.call_names.get(call_id).map(String::as_str)
    }

    /// Attribute a usage snapshot to the tools invoked since the previous
    /// attribution, split by call count. A turn without tool calls attributes
    /// nothing.
    pub fn attribute_turn(&mut self, snapshot: &TokenSnapshot) {
        if self.pending.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending);
        let names: Vec<&String> = pending.keys().collect();
        let weights: Vec<u64> = pending.values().copied().collect();
        let input = split_conserving(snapshot.input, &weights);
        let output = split_conserving(snapshot.output, &weights);
        let cache_read = split_conserving(snapshot.cache_read, &weights);
        let cache_write = split_conserving(snapshot.cache_write, &weights);
        for (i, name) in names.into_iter().enumerate() {
            let entry = self.usage.entry(name.clone()).or_default();
            entry.input_tokens += input[i];
            entry.output_tokens += output[i];
            entry.cache_read_tokens += cache_read[i];
            entry.cache_write_tokens += cache_write[i];
            entry.total_tokens += input[i] + output[i] + cache_read[i] + cache_write[i];
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.total_calls
    }

    /// Finalize: impute costs and hand back the raw map plus sub-counts.
    pub fn finish(mut self, session_tokens: u64, session_cost: f64) -> (ToolUsageMap, EnrichedTools, u64) {
        impute_costs(&mut self.usage, session_tokens, session_cost);
        (self.usage, self.enriched, self.total_calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn categorize_follows_rule_order() {
        let mcp = categorize("mcp__github__create_issue", Provider::Claude);
        assert_eq!(mcp.category, ToolCategory::Mcp);
        assert_eq!(mcp.group, "MCP: github");

        let core = categorize("Bash", Provider::Claude);
        assert_eq!(core.category, ToolCategory::Core);
        assert_eq!(core.group, "Claude Core");

        // Core sets differ per provider.
        assert_eq!(categorize("Bash", Provider::Gemini).category, ToolCategory::Other);
        assert_eq!(categorize("run_shell_command", Provider::Gemini).group, "Gemini Core");

        assert_eq!(categorize("Skill", Provider::Claude).group, "Skills");
        assert_eq!(categorize("skill:tdd", Provider::Codex).category, ToolCategory::Skill);
        assert_eq!(categorize("Task", Provider::Claude).group, "Subagents");
        assert_eq!(categorize("agent:Explore", Provider::Claude).category, ToolCategory::Agent);
        assert_eq!(categorize("frobnicate", Provider::Codex).group, "Other");
    }

    #[test]
    fn mcp_colon_form() {
        assert_eq!(categorize("mcp:playwright:click", Provider::Codex).group, "MCP: playwright");
    }

    #[test]
    fn sub_target_defaults() {
        assert_eq!(sub_target("Task", &json!({"subagent_type": "Explore"})).as_deref(), Some("Explore"));
        assert_eq!(sub_target("Task", &json!({})).as_deref(), Some("general-purpose"));
        assert_eq!(sub_target("Skill", &json!({"skill": "tdd"})).as_deref(), Some("tdd"));
        assert_eq!(sub_target("Read", &json!({})), None);
        assert_eq!(sub_target("agent:Explore", &json!({})), None);
    }

    #[test]
    fn split_conserves_with_remainder_on_last() {
        assert_eq!(split_conserving(10, &[1, 1, 1]), vec![3, 3, 4]);
        assert_eq!(split_conserving(2, &[1, 1, 1, 1]), vec![1, 1, 0, 0]);
        assert_eq!(split_conserving(7, &[5]), vec![7]);
        assert_eq!(split_conserving(9, &[0, 0]), vec![0, 0]);
        assert!(split_conserving(9, &[]).is_empty());
    }

    #[test]
    fn cost_shares_are_unrounded_proportions() {
        let shares = split_conserving_f64(1.0, &[1, 2]);
        assert!((shares[0] - 1.0 / 3.0).abs() < 1e-15);
        assert!((shares[0] + shares[1] - 1.0).abs() < 1e-15);
        assert_eq!(split_conserving_f64(0.07, &[3]), vec![0.07]);
        assert_eq!(split_conserving_f64(f64::NAN, &[1, 1]), vec![0.0, 0.0]);
    }

    #[test]
    fn expand_replaces_composite_with_targets() {
        let mut usage = ToolUsageMap::new();
        usage.insert(
            "Task".into(),
            ToolUsage {
                count: 3,
                total_tokens: 1000,
                input_tokens: 700,
                output_tokens: 300,
                estimated_cost: 0.9,
                error_count: 1,
                ..Default::default()
            },
        );
        usage.insert("Read".into(), ToolUsage { count: 4, ..Default::default() });
        let mut enriched = EnrichedTools::new();
        enriched.insert(
            "Task".into(),
            BTreeMap::from([("Explore".to_string(), 2), ("code-reviewer".to_string(), 1)]),
        );

        let expanded = expand_composites(&usage, &enriched);
        assert!(!expanded.contains_key("Task"));
        assert_eq!(expanded["Read"].count, 4);
        let explore = &expanded["agent:Explore"];
        let reviewer = &expanded["agent:code-reviewer"];
        assert_eq!(explore.count, 2);
        assert_eq!(reviewer.count, 1);
        assert_eq!(explore.total_tokens, 667);
        assert_eq!(explore.total_tokens + reviewer.total_tokens, 1000);
        assert_eq!(explore.error_count + reviewer.error_count, 1);
        assert!((explore.estimated_cost + reviewer.estimated_cost - 0.9).abs() < 1e-12);
    }

    #[test]
    fn tracker_attributes_turn_tokens_by_call_count() {
        let mut t = ToolTracker::new();
        t.record_call("Read", Some("a"), &json!({}));
        t.record_call("Read", Some("b"), &json!({}));
        t.record_call("Bash", Some("c"), &json!({}));
        t.attribute_turn(&TokenSnapshot { input: 90, output: 30, ..Default::default() });
        t.record_error_for_call("c");
        t.record_error_for_call("missing");

        let (usage, _, calls) = t.finish(120, 1.2);
        assert_eq!(calls, 3);
        assert_eq!(usage["Read"].count, 2);
        assert_eq!(usage["Bash"].count, 1);
        assert_eq!(usage["Bash"].error_count, 1);
        assert_eq!(usage["Read"].total_tokens + usage["Bash"].total_tokens, 120);
        let cost: f64 = usage.values().map(|u| u.estimated_cost).sum();
        assert!((cost - 1.2).abs() < 1e-9);
    }

    #[test]
    fn impute_skips_zero_token_sessions() {
        let mut usage = ToolUsageMap::new();
        usage.insert("Read".into(), ToolUsage { count: 1, ..Default::default() });
        impute_costs(&mut usage, 0, 5.0);
        assert_eq!(usage["Read"].estimated_cost, 0.0);
    }
}
