// crates/db/src/analytics.rs
//! Read-only analytics over stored sessions.
//!
//! Every query is scoped to a UTC day range `[from 00:00, to + 1 day 00:00)`
//! on `COALESCE(created_at, modified_at)` and then to the caller's
//! [`FilterClause`]. Breakdowns decode the JSON usage columns in Rust and
//! skip rows whose JSON is malformed.

use crate::filter::{bind_as, check_arity, FilterClause, SqlParam};
use crate::trends::{day_range_bounds, previous_window, TrendMetric};
use crate::{Database, DbResult};
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tokenscope_core::tools::{categorize, expand_composites, ToolCategory};
use tokenscope_core::{EnrichedTools, ModelUsage, ModelUsageMap, Provider, ToolUsageMap};
use tracing::debug;

/// Activity timestamp of a session row.
const TS: &str = "COALESCE(created_at, modified_at)";

/// Histogram upper bounds in dollars, inclusive. A final bucket is unbounded.
const COST_BUCKETS: [(f64, &str); 5] = [
    (1.0, "$0-1"),
    (5.0, "$1-5"),
    (10.0, "$5-10"),
    (25.0, "$10-25"),
    (50.0, "$25-50"),
];
const COST_OVERFLOW_LABEL: &str = "$50+";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[default]
    Day,
    Hour,
}

impl Granularity {
    fn strftime(&self) -> &'static str {
        match self {
            Granularity::Day => "%Y-%m-%d",
            Granularity::Hour => "%Y-%m-%dT%H:00",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(Granularity::Day),
            "hour" => Some(Granularity::Hour),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalyticsQuery {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub granularity: Granularity,
    pub filter: FilterClause,
}

impl AnalyticsQuery {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self {
            from,
            to,
            granularity: Granularity::Day,
            filter: FilterClause::default(),
        }
    }

    /// `<range> AND (<filter>)` and its parameters, in order.
    fn scope(&self) -> DbResult<(String, Vec<SqlParam>)> {
        let (start, end) = day_range_bounds(self.from, self.to)?;
        scope_between(start, end, &self.filter)
    }
}

fn scope_between(start: i64, end: i64, filter: &FilterClause) -> DbResult<(String, Vec<SqlParam>)> {
    let sql = format!("{TS} >= ? AND {TS} < ?{}", filter.and_sql());
    let mut params = vec![SqlParam::Int(start), SqlParam::Int(end)];
    params.extend(filter.params.iter().cloned());
    check_arity(&sql, &params)?;
    Ok((sql, params))
}

// ============================================================================
// Result types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeseriesPoint {
    pub bucket: String,
    pub sessions: i64,
    pub messages: i64,
    pub tool_calls: i64,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cache_read_tokens: i64,
    pub cache_write_tokens: i64,
    pub total_tokens: i64,
    pub cost: f64,
    pub avg_latency_ms: Option<f64>,
    pub avg_p95_latency_ms: Option<f64>,
    pub avg_duration_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodTotals {
    pub sessions: i64,
    pub messages: i64,
    pub tool_calls: i64,
    pub total_tokens: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodComparison {
    pub sessions: TrendMetric,
    pub tokens: TrendMetric,
    pub cost_cents: TrendMetric,
}

impl PeriodComparison {
    pub fn between(current: &PeriodTotals, previous: &PeriodTotals) -> Self {
        let cents = |c: f64| (c * 100.0).round() as i64;
        Self {
            sessions: TrendMetric::new(current.sessions, previous.sessions),
            tokens: TrendMetric::new(current.total_tokens, previous.total_tokens),
            cost_cents: TrendMetric::new(cents(current.cost), cents(previous.cost)),
        }
    }
}

/// Keyed `"YYYY-WW"` (SQLite `%W`: Monday-start week of year).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub week: String,
    pub sessions: i64,
    pub messages: i64,
    pub total_tokens: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostHistogramBucket {
    pub label: String,
    /// Exclusive lower bound.
    pub min: f64,
    /// Inclusive upper bound; `None` for the last bucket.
    pub max: Option<f64>,
    pub sessions: i64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostDistribution {
    pub sessions: i64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p99: f64,
    pub max: f64,
    pub histogram: Vec<CostHistogramBucket>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelBreakdownRow {
    pub model: String,
    pub sessions: u64,
    pub message_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub reasoning_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub total_tokens: u64,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBreakdownRow {
    pub tool: String,
    pub category: ToolCategory,
    pub group: String,
    pub count: u64,
    pub error_count: u64,
    pub total_tokens: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderBreakdownRow {
    pub provider: String,
    pub sessions: i64,
    pub messages: i64,
    pub total_tokens: i64,
    pub cost: f64,
}

/// Everything the dashboard needs for one range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsReport {
    pub from: NaiveDate,
    pub to: NaiveDate,
    pub granularity: Granularity,
    pub timeseries: Vec<TimeseriesPoint>,
    pub totals: PeriodTotals,
    pub previous_totals: PeriodTotals,
    pub comparison: PeriodComparison,
    pub weekly: Vec<WeeklyPoint>,
    pub cost_distribution: Option<CostDistribution>,
    pub model_breakdown: Vec<ModelBreakdownRow>,
    pub model_breakdown_by_role: BTreeMap<String, Vec<ModelBreakdownRow>>,
    pub model_breakdown_by_subagent_type: BTreeMap<String, Vec<ModelBreakdownRow>>,
    pub tool_breakdown: Vec<ToolBreakdownRow>,
    pub tool_breakdown_by_role: BTreeMap<String, Vec<ToolBreakdownRow>>,
    pub tool_breakdown_by_subagent_type: BTreeMap<String, Vec<ToolBreakdownRow>>,
    pub provider_breakdown: Vec<ProviderBreakdownRow>,
}

// ============================================================================
// Accumulators
// ============================================================================

#[derive(Debug, Default)]
struct ModelBucket {
    usage: ModelUsageMap,
    sessions: BTreeMap<String, u64>,
}

impl ModelBucket {
    fn add(&mut self, models: &ModelUsageMap) {
        for (name, usage) in models {
            self.usage.entry(name.clone()).or_default().add(usage);
            *self.sessions.entry(name.clone()).or_default() += 1;
        }
    }

    fn finish(self) -> Vec<ModelBreakdownRow> {
        let mut rows: Vec<ModelBreakdownRow> = self
            .usage
            .into_iter()
            .map(|(model, u): (String, ModelUsage)| ModelBreakdownRow {
                sessions: self.sessions.get(&model).copied().unwrap_or(0),
                message_count: u.message_count,
                input_tokens: u.input_tokens,
                output_tokens: u.output_tokens,
                reasoning_tokens: u.reasoning_tokens,
                cache_read_tokens: u.cache_read_tokens,
                cache_write_tokens: u.cache_write_tokens,
                total_tokens: u.total_tokens(),
                cost: u.cost,
                model,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.cost
                .total_cmp(&a.cost)
                .then_with(|| b.total_tokens.cmp(&a.total_tokens))
                .then_with(|| a.model.cmp(&b.model))
        });
        rows
    }
}

/// Raw tool maps summed over a bucket's sessions. Composite entries are
/// split once, after summing.
#[derive(Debug, Default)]
struct ToolBucket {
    usage: ToolUsageMap,
    enriched: EnrichedTools,
    providers: BTreeMap<String, BTreeSet<Provider>>,
}

impl ToolBucket {
    fn add(&mut self, usage: &ToolUsageMap, enriched: &EnrichedTools, provider: Provider) {
        for (name, entry) in usage {
            self.usage.entry(name.clone()).or_default().add(entry);
            self.providers.entry(name.clone()).or_default().insert(provider);
        }
        for (name, subs) in enriched {
            let target = self.enriched.entry(name.clone()).or_default();
            for (sub, n) in subs {
                *target.entry(sub.clone()).or_default() += n;
            }
        }
    }

    fn finish(self) -> Vec<ToolBreakdownRow> {
        let expanded = expand_composites(&self.usage, &self.enriched);
        let mut rows: Vec<ToolBreakdownRow> = expanded
            .into_iter()
            .map(|(tool, u)| {
                let class = self.classify(&tool);
                ToolBreakdownRow {
                    category: class.category,
                    group: class.group,
                    count: u.count,
                    error_count: u.error_count,
                    total_tokens: u.total_tokens,
                    input_tokens: u.input_tokens,
                    output_tokens: u.output_tokens,
                    cache_read_tokens: u.cache_read_tokens,
                    cache_write_tokens: u.cache_write_tokens,
                    estimated_cost: u.estimated_cost,
                    tool,
                }
            })
            .collect();
        rows.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tool.cmp(&b.tool)));
        rows
    }

    /// A tool is core if any provider that used it ships it.
    fn classify(&self, tool: &str) -> tokenscope_core::tools::ToolClass {
        if let Some(providers) = self.providers.get(tool) {
            for p in providers {
                let class = categorize(tool, *p);
                if class.category == ToolCategory::Core {
                    return class;
                }
            }
        }
        categorize(tool, Provider::PRIMARY)
    }
}

/// Decoded JSON columns of one breakdown row, or `None` if any is malformed.
struct DecodedUsage {
    models: Option<ModelUsageMap>,
    tools: Option<(ToolUsageMap, EnrichedTools)>,
}

fn decode<T: DeserializeOwned>(session_id: &str, column: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            debug!(session_id, column, error = %e, "Skipping row with malformed JSON");
            None
        }
    }
}

type BreakdownRow = (String, String, Option<String>, String, String, String, String);

impl DecodedUsage {
    fn from_row(row: &BreakdownRow) -> Self {
        let (id, _, _, _, models, tools, enriched) = row;
        let models = decode::<ModelUsageMap>(id, "model_usage", models);
        let tools = decode::<ToolUsageMap>(id, "tool_usage", tools)
            .zip(decode::<EnrichedTools>(id, "enriched_tools", enriched));
        Self { models, tools }
    }
}

// ============================================================================
// Queries
// ============================================================================

impl Database {
    /// All rollups for one range.
    pub async fn analytics(&self, query: &AnalyticsQuery) -> DbResult<AnalyticsReport> {
        let timeseries = self.timeseries(query).await?;
        let (totals, previous_totals) = self.totals_with_previous(query).await?;
        let weekly = self.weekly(query).await?;
        let cost_distribution = self.cost_distribution(query).await?;
        let breakdowns = self.breakdowns(query).await?;
        let provider_breakdown = self.provider_breakdown(query).await?;

        Ok(AnalyticsReport {
            from: query.from,
            to: query.to,
            granularity: query.granularity,
            timeseries,
            comparison: PeriodComparison::between(&totals, &previous_totals),
            totals,
            previous_totals,
            weekly,
            cost_distribution,
            model_breakdown: breakdowns.models,
            model_breakdown_by_role: breakdowns.models_by_role,
            model_breakdown_by_subagent_type: breakdowns.models_by_subagent_type,
            tool_breakdown: breakdowns.tools,
            tool_breakdown_by_role: breakdowns.tools_by_role,
            tool_breakdown_by_subagent_type: breakdowns.tools_by_subagent_type,
            provider_breakdown,
        })
    }

    /// One row per day (or hour) that has sessions, in order.
    pub async fn timeseries(&self, query: &AnalyticsQuery) -> DbResult<Vec<TimeseriesPoint>> {
        let (scope, params) = query.scope()?;
        let sql = format!(
            r#"
            SELECT
                strftime('{fmt}', {TS}, 'unixepoch') AS bucket,
                COUNT(*),
                COALESCE(SUM(message_count), 0),
                COALESCE(SUM(tool_call_count), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(SUM(cache_read_tokens), 0),
                COALESCE(SUM(cache_write_tokens), 0),
                COALESCE(SUM(total_tokens), 0),
                TOTAL(total_cost),
                AVG(avg_latency_ms),
                AVG(p95_latency_ms),
                AVG(session_duration_ms)
            FROM sessions
            WHERE {scope}
            GROUP BY bucket
            ORDER BY bucket
            "#,
            fmt = query.granularity.strftime(),
        );

        type Row = (
            String, i64, i64, i64, i64, i64, i64, i64, i64, f64,
            Option<f64>, Option<f64>, Option<f64>,
        );
        let rows: Vec<Row> = bind_as(sqlx::query_as(&sql), &params)
            .fetch_all(self.pool())
            .await?;

        Ok(rows
            .into_iter()
            .map(|r| TimeseriesPoint {
                bucket: r.0,
                sessions: r.1,
                messages: r.2,
                tool_calls: r.3,
                input_tokens: r.4,
                output_tokens: r.5,
                cache_read_tokens: r.6,
                cache_write_tokens: r.7,
                total_tokens: r.8,
                cost: r.9,
                avg_latency_ms: r.10,
                avg_p95_latency_ms: r.11,
                avg_duration_ms: r.12,
            })
            .collect())
    }

    /// Totals for the range and for the preceding window of equal length.
    ///
    /// With no filter both come from one scan; otherwise two filtered scans.
    pub async fn totals_with_previous(
        &self,
        query: &AnalyticsQuery,
    ) -> DbResult<(PeriodTotals, PeriodTotals)> {
        let (start, end) = day_range_bounds(query.from, query.to)?;
        let (prev_from, prev_to) = previous_window(query.from, query.to)?;
        let (prev_start, prev_end) = day_range_bounds(prev_from, prev_to)?;

        if !query.filter.is_empty() {
            let current = self.totals_between(start, end, &query.filter).await?;
            let previous = self.totals_between(prev_start, prev_end, &query.filter).await?;
            return Ok((current, previous));
        }

        debug_assert_eq!(prev_end, start);
        let sql = format!(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN {TS} >= ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} >= ?2 THEN message_count ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} >= ?2 THEN tool_call_count ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} >= ?2 THEN total_tokens ELSE 0 END), 0),
                TOTAL(CASE WHEN {TS} >= ?2 THEN total_cost ELSE 0.0 END),
                COALESCE(SUM(CASE WHEN {TS} < ?2 THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} < ?2 THEN message_count ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} < ?2 THEN tool_call_count ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN {TS} < ?2 THEN total_tokens ELSE 0 END), 0),
                TOTAL(CASE WHEN {TS} < ?2 THEN total_cost ELSE 0.0 END)
            FROM sessions
            WHERE {TS} >= ?1 AND {TS} < ?3
            "#
        );
        let r: (i64, i64, i64, i64, f64, i64, i64, i64, i64, f64) = sqlx::query_as(&sql)
            .bind(prev_start)
            .bind(start)
            .bind(end)
            .fetch_one(self.pool())
            .await?;

        Ok((
            PeriodTotals {
                sessions: r.0,
                messages: r.1,
                tool_calls: r.2,
                total_tokens: r.3,
                cost: r.4,
            },
            PeriodTotals {
                sessions: r.5,
                messages: r.6,
                tool_calls: r.7,
                total_tokens: r.8,
                cost: r.9,
            },
        ))
    }

    async fn totals_between(&self, start: i64, end: i64, filter: &FilterClause) -> DbResult<PeriodTotals> {
        let (scope, params) = scope_between(start, end, filter)?;
        let sql = format!(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(message_count), 0),
                   COALESCE(SUM(tool_call_count), 0),
                   COALESCE(SUM(total_tokens), 0),
                   TOTAL(total_cost)
            FROM sessions
            WHERE {scope}
            "#
        );
        let r: (i64, i64, i64, i64, f64) = bind_as(sqlx::query_as(&sql), &params)
            .fetch_one(self.pool())
            .await?;
        Ok(PeriodTotals {
            sessions: r.0,
            messages: r.1,
            tool_calls: r.2,
            total_tokens: r.3,
            cost: r.4,
        })
    }

    pub async fn weekly(&self, query: &AnalyticsQuery) -> DbResult<Vec<WeeklyPoint>> {
        let (scope, params) = query.scope()?;
        let sql = format!(
            r#"
            SELECT strftime('%Y-%W', {TS}, 'unixepoch') AS week,
                   COUNT(*),
                   COALESCE(SUM(message_count), 0),
                   COALESCE(SUM(total_tokens), 0),
                   TOTAL(total_cost)
            FROM sessions
            WHERE {scope}
            GROUP BY week
            ORDER BY week
            "#
        );
        let rows: Vec<(String, i64, i64, i64, f64)> = bind_as(sqlx::query_as(&sql), &params)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(week, sessions, messages, total_tokens, cost)| WeeklyPoint {
                week,
                sessions,
                messages,
                total_tokens,
                cost,
            })
            .collect())
    }

    /// Nearest-rank percentiles and a fixed histogram over sessions with
    /// cost > 0. `None` when there are none.
    pub async fn cost_distribution(&self, query: &AnalyticsQuery) -> DbResult<Option<CostDistribution>> {
        let (scope, params) = query.scope()?;
        let rank = |p: &str| format!("MAX(1, CAST(n * {p} AS INTEGER))");
        let sql = format!(
            r#"
            WITH costed AS (
                SELECT total_cost AS cost,
                       ROW_NUMBER() OVER (ORDER BY total_cost) AS rn,
                       COUNT(*) OVER () AS n
                FROM sessions
                WHERE {scope} AND total_cost > 0
            )
            SELECT
                MAX(n),
                MAX(CASE WHEN rn = {p50} THEN cost END),
                MAX(CASE WHEN rn = {p75} THEN cost END),
                MAX(CASE WHEN rn = {p90} THEN cost END),
                MAX(CASE WHEN rn = {p99} THEN cost END),
                MAX(cost)
            FROM costed
            "#,
            p50 = rank("0.50"),
            p75 = rank("0.75"),
            p90 = rank("0.90"),
            p99 = rank("0.99"),
        );
        type Row = (Option<i64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>);
        let r: Row = bind_as(sqlx::query_as(&sql), &params)
            .fetch_one(self.pool())
            .await?;

        let sessions = r.0.unwrap_or(0);
        if sessions == 0 {
            return Ok(None);
        }

        let mut case = String::from("CASE");
        for (i, (upper, _)) in COST_BUCKETS.iter().enumerate() {
            case.push_str(&format!(" WHEN total_cost <= {upper:.1} THEN {i}"));
        }
        case.push_str(&format!(" ELSE {} END", COST_BUCKETS.len()));
        let sql = format!(
            r#"
            SELECT {case} AS bucket, COUNT(*), TOTAL(total_cost)
            FROM sessions
            WHERE {scope} AND total_cost > 0
            GROUP BY bucket
            "#
        );
        let counts: Vec<(i64, i64, f64)> = bind_as(sqlx::query_as(&sql), &params)
            .fetch_all(self.pool())
            .await?;

        let mut histogram: Vec<CostHistogramBucket> = Vec::with_capacity(COST_BUCKETS.len() + 1);
        let mut lower = 0.0;
        for (upper, label) in COST_BUCKETS {
            histogram.push(CostHistogramBucket {
                label: label.to_string(),
                min: lower,
                max: Some(upper),
                sessions: 0,
                cost: 0.0,
            });
            lower = upper;
        }
        histogram.push(CostHistogramBucket {
            label: COST_OVERFLOW_LABEL.to_string(),
            min: lower,
            max: None,
            sessions: 0,
            cost: 0.0,
        });
        for (bucket, n, cost) in counts {
            if let Some(slot) = usize::try_from(bucket).ok().and_then(|b| histogram.get_mut(b)) {
                slot.sessions = n;
                slot.cost = cost;
            }
        }

        Ok(Some(CostDistribution {
            sessions,
            p50: r.1.unwrap_or(0.0),
            p75: r.2.unwrap_or(0.0),
            p90: r.3.unwrap_or(0.0),
            p99: r.4.unwrap_or(0.0),
            max: r.5.unwrap_or(0.0),
            histogram,
        }))
    }

    pub async fn provider_breakdown(&self, query: &AnalyticsQuery) -> DbResult<Vec<ProviderBreakdownRow>> {
        let (scope, params) = query.scope()?;
        let sql = format!(
            r#"
            SELECT provider, COUNT(*),
                   COALESCE(SUM(message_count), 0),
                   COALESCE(SUM(total_tokens), 0),
                   TOTAL(total_cost) AS cost
            FROM sessions
            WHERE {scope}
            GROUP BY provider
            ORDER BY cost DESC, provider ASC
            "#
        );
        let rows: Vec<(String, i64, i64, i64, f64)> = bind_as(sqlx::query_as(&sql), &params)
            .fetch_all(self.pool())
            .await?;
        Ok(rows
            .into_iter()
            .map(|(provider, sessions, messages, total_tokens, cost)| ProviderBreakdownRow {
                provider,
                sessions,
                messages,
                total_tokens,
                cost,
            })
            .collect())
    }

    pub async fn model_breakdown(&self, query: &AnalyticsQuery) -> DbResult<Vec<ModelBreakdownRow>> {
        Ok(self.breakdowns(query).await?.models)
    }

    pub async fn tool_breakdown(&self, query: &AnalyticsQuery) -> DbResult<Vec<ToolBreakdownRow>> {
        Ok(self.breakdowns(query).await?.tools)
    }

    /// Model and tool breakdowns, overall and per role / sub-agent type, from
    /// a single scan of the JSON columns.
    async fn breakdowns(&self, query: &AnalyticsQuery) -> DbResult<Breakdowns> {
        let (scope, params) = query.scope()?;
        let sql = format!(
            r#"
            SELECT id, session_role, subagent_type, provider,
                   model_usage, tool_usage, enriched_tools
            FROM sessions
            WHERE {scope}
            ORDER BY id
            "#
        );
        let rows: Vec<BreakdownRow> = bind_as(sqlx::query_as(&sql), &params)
            .fetch_all(self.pool())
            .await?;

        let mut models = ModelBucket::default();
        let mut models_by_role: BTreeMap<String, ModelBucket> = BTreeMap::new();
        let mut models_by_type: BTreeMap<String, ModelBucket> = BTreeMap::new();
        let mut tools = ToolBucket::default();
        let mut tools_by_role: BTreeMap<String, ToolBucket> = BTreeMap::new();
        let mut tools_by_type: BTreeMap<String, ToolBucket> = BTreeMap::new();

        for row in &rows {
            let decoded = DecodedUsage::from_row(row);
            let role = &row.1;
            let subagent_type = row.2.as_deref().filter(|t| !t.is_empty());
            let provider = Provider::from_str_or_primary(&row.3);

            if let Some(m) = &decoded.models {
                models.add(m);
                models_by_role.entry(role.clone()).or_default().add(m);
                if let Some(kind) = subagent_type {
                    models_by_type.entry(kind.to_string()).or_default().add(m);
                }
            }
            if let Some((usage, enriched)) = &decoded.tools {
                tools.add(usage, enriched, provider);
                tools_by_role
                    .entry(role.clone())
                    .or_default()
                    .add(usage, enriched, provider);
                if let Some(kind) = subagent_type {
                    tools_by_type
                        .entry(kind.to_string())
                        .or_default()
                        .add(usage, enriched, provider);
                }
            }
        }

        Ok(Breakdowns {
            models: models.finish(),
            models_by_role: models_by_role.into_iter().map(|(k, b)| (k, b.finish())).collect(),
            models_by_subagent_type: models_by_type.into_iter().map(|(k, b)| (k, b.finish())).collect(),
            tools: tools.finish(),
            tools_by_role: tools_by_role.into_iter().map(|(k, b)| (k, b.finish())).collect(),
            tools_by_subagent_type: tools_by_type.into_iter().map(|(k, b)| (k, b.finish())).collect(),
        })
    }
}

struct Breakdowns {
    models: Vec<ModelBreakdownRow>,
    models_by_role: BTreeMap<String, Vec<ModelBreakdownRow>>,
    models_by_subagent_type: BTreeMap<String, Vec<ModelBreakdownRow>>,
    tools: Vec<ToolBreakdownRow>,
    tools_by_role: BTreeMap<String, Vec<ToolBreakdownRow>>,
    tools_by_subagent_type: BTreeMap<String, Vec<ToolBreakdownRow>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenscope_core::ToolUsage;

    #[test]
    fn tool_bucket_splits_after_summing() {
        let mut bucket = ToolBucket::default();
        let mut usage = ToolUsageMap::new();
        usage.insert("Task".into(), ToolUsage { count: 2, total_tokens: 100, ..Default::default() });
        usage.insert("Read".into(), ToolUsage { count: 5, total_tokens: 10, ..Default::default() });
        let mut enriched = EnrichedTools::new();
        enriched.insert("Task".into(), BTreeMap::from([("explore".to_string(), 2)]));
        bucket.add(&usage, &enriched, Provider::Claude);

        let mut usage = ToolUsageMap::new();
        usage.insert("Task".into(), ToolUsage { count: 2, total_tokens: 100, ..Default::default() });
        let mut enriched = EnrichedTools::new();
        enriched.insert("Task".into(), BTreeMap::from([("plan".to_string(), 2)]));
        bucket.add(&usage, &enriched, Provider::Claude);

        let rows = bucket.finish();
        let by_name: BTreeMap<&str, &ToolBreakdownRow> = rows.iter().map(|r| (r.tool.as_str(), r)).collect();
        assert_eq!(by_name["agent:explore"].count + by_name["agent:plan"].count, 4);
        assert_eq!(by_name["agent:explore"].total_tokens + by_name["agent:plan"].total_tokens, 200);
        assert_eq!(by_name["Read"].category, ToolCategory::Core);
        assert_eq!(by_name["agent:plan"].category, ToolCategory::Agent);
        assert!(!by_name.contains_key("Task"));
    }

    #[test]
    fn core_tool_classified_by_any_provider_that_used_it() {
        let mut bucket = ToolBucket::default();
        let mut usage = ToolUsageMap::new();
        usage.insert("shell".into(), ToolUsage { count: 1, ..Default::default() });
        bucket.add(&usage, &EnrichedTools::new(), Provider::Codex);
        let rows = bucket.finish();
        assert_eq!(rows[0].category, ToolCategory::Core);
        assert_eq!(rows[0].group, "Codex Core");
    }

    #[test]
    fn model_bucket_counts_sessions_per_model() {
        let mut bucket = ModelBucket::default();
        let mut a = ModelUsageMap::new();
        a.insert("m1".into(), ModelUsage { input_tokens: 10, cost: 1.0, ..Default::default() });
        a.insert("m2".into(), ModelUsage { input_tokens: 5, cost: 3.0, ..Default::default() });
        bucket.add(&a);
        bucket.add(&a);
        let rows = bucket.finish();
        assert_eq!(rows[0].model, "m2");
        assert_eq!(rows[0].sessions, 2);
        assert_eq!(rows[1].input_tokens, 20);
    }

    #[test]
    fn comparison_rounds_cost_to_cents() {
        let current = PeriodTotals { sessions: 4, total_tokens: 100, cost: 1.234, ..Default::default() };
        let previous = PeriodTotals { sessions: 2, total_tokens: 0, cost: 0.5, ..Default::default() };
        let cmp = PeriodComparison::between(&current, &previous);
        assert_eq!(cmp.sessions.delta_percent, Some(100.0));
        assert_eq!(cmp.tokens.delta_percent, None);
        assert_eq!(cmp.cost_cents.current, 123);
        assert_eq!(cmp.cost_cents.previous, 50);
    }
}
