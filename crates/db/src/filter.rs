// crates/db/src/filter.rs
//! Session filter predicate.
//!
//! A [`SessionFilter`] is validated and turned into a [`FilterClause`]: a
//! boolean SQL expression over unqualified `sessions` columns with
//! positional `?` placeholders, plus its ordered parameters. Callers splice
//! the clause after their own predicate as `AND (<sql>)`.

use serde::{Deserialize, Serialize};
use sqlx::query::{Query, QueryAs};
use sqlx::sqlite::{Sqlite, SqliteArguments};
use thiserror::Error;
use tokenscope_core::{Provider, SessionRole};

/// Longest accepted free-text search, in characters.
pub const MAX_SEARCH_CHARS: usize = 200;

/// Model names arrive as JSON object keys; malformed JSON matches nothing.
const MODEL_KEYS: &str =
    "json_each(CASE WHEN json_valid(model_usage) THEN model_usage ELSE '{}' END)";

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("cost bounds must be finite and non-negative (got {0})")]
    InvalidCost(f64),

    #[error("min cost {min} exceeds max cost {max}")]
    InvertedCostRange { min: f64, max: f64 },

    #[error("min messages must be non-negative (got {0})")]
    NegativeMessages(i64),

    #[error("model list contains an empty name")]
    EmptyModelName,

    #[error("search text is {len} characters; the limit is {MAX_SEARCH_CHARS}")]
    SearchTooLong { len: usize },

    #[error("unknown filter key '{0}'")]
    UnknownKey(String),

    #[error("invalid value '{value}' for filter key '{key}'")]
    InvalidValue { key: String, value: String },
}

/// How a multi-model filter combines its names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelMatch {
    /// Session used at least one of the models.
    #[default]
    Any,
    /// Session used every listed model.
    All,
}

/// Recognized filter keys. Every field is optional; an all-default filter
/// matches every session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFilter {
    pub provider: Option<Provider>,
    pub models: Vec<String>,
    pub model_match: ModelMatch,
    pub role: Option<SessionRole>,
    pub subagent_type: Option<String>,
    pub effort_mode: Option<String>,
    /// `Some(true)` only archived, `Some(false)` only live, `None` both.
    pub compressed: Option<bool>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
    pub min_messages: Option<i64>,
    pub search: Option<String>,
    pub project_id: Option<String>,
}

/// One positional parameter of a [`FilterClause`].
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Real(f64),
}

/// Composable predicate: `sql` holds exactly `params.len()` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterClause {
    pub sql: String,
    pub params: Vec<SqlParam>,
}

impl FilterClause {
    pub fn is_empty(&self) -> bool {
        self.sql.trim().is_empty()
    }

    /// `" AND (<sql>)"`, or nothing for an empty clause.
    pub fn and_sql(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!(" AND ({})", self.sql)
        }
    }
}

impl SessionFilter {
    /// Build a filter from `key=value` pairs, as received from a query string
    /// or repeated `--filter` flags. Keys are camelCase; `model` takes a
    /// comma-separated list.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, FilterError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut filter = Self::default();
        for (key, value) in pairs {
            let value = value.trim();
            let invalid = || FilterError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            };
            match key {
                "provider" => filter.provider = Some(Provider::parse(value).ok_or_else(invalid)?),
                "model" | "models" => {
                    filter.models = value.split(',').map(|m| m.trim().to_string()).collect();
                }
                "modelMatch" => {
                    filter.model_match = match value.to_ascii_lowercase().as_str() {
                        "any" | "or" => ModelMatch::Any,
                        "all" | "and" => ModelMatch::All,
                        _ => return Err(invalid()),
                    }
                }
                "role" => filter.role = Some(SessionRole::parse(value).ok_or_else(invalid)?),
                "subagentType" => filter.subagent_type = Some(value.to_string()),
                "effort" | "effortMode" => filter.effort_mode = Some(value.to_ascii_lowercase()),
                "compressed" => {
                    filter.compressed = match value {
                        "true" | "only" => Some(true),
                        "false" | "none" => Some(false),
                        "any" | "all" => None,
                        _ => return Err(invalid()),
                    }
                }
                "minCost" => filter.min_cost = Some(value.parse().map_err(|_| invalid())?),
                "maxCost" => filter.max_cost = Some(value.parse().map_err(|_| invalid())?),
                "minMessages" => filter.min_messages = Some(value.parse().map_err(|_| invalid())?),
                "q" | "search" => filter.search = Some(value.to_string()),
                "project" => filter.project_id = Some(value.to_string()),
                other => return Err(FilterError::UnknownKey(other.to_string())),
            }
        }
        Ok(filter)
    }

    /// Reject out-of-contract input without building anything.
    pub fn validate(&self) -> Result<(), FilterError> {
        for bound in [self.min_cost, self.max_cost].into_iter().flatten() {
            if !bound.is_finite() || bound < 0.0 {
                return Err(FilterError::InvalidCost(bound));
            }
        }
        if let (Some(min), Some(max)) = (self.min_cost, self.max_cost) {
            if min > max {
                return Err(FilterError::InvertedCostRange { min, max });
            }
        }
        if let Some(n) = self.min_messages {
            if n < 0 {
                return Err(FilterError::NegativeMessages(n));
            }
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(FilterError::EmptyModelName);
        }
        if let Some(q) = &self.search {
            let len = q.chars().count();
            if len > MAX_SEARCH_CHARS {
                return Err(FilterError::SearchTooLong { len });
            }
        }
        Ok(())
    }

    pub fn to_clause(&self) -> Result<FilterClause, FilterError> {
        self.validate()?;

        let mut parts: Vec<String> = Vec::new();
        let mut params: Vec<SqlParam> = Vec::new();

        if let Some(provider) = self.provider {
            parts.push("provider = ?".into());
            params.push(SqlParam::Text(provider.as_str().into()));
        }

        if !self.models.is_empty() {
            let names: Vec<&str> = self.models.iter().map(|m| m.trim()).collect();
            match self.model_match {
                ModelMatch::Any => {
                    let marks = vec!["?"; names.len()].join(", ");
                    parts.push(format!(
                        "EXISTS (SELECT 1 FROM {MODEL_KEYS} WHERE key IN ({marks}))"
                    ));
                }
                ModelMatch::All => {
                    let each: Vec<String> = names
                        .iter()
                        .map(|_| format!("EXISTS (SELECT 1 FROM {MODEL_KEYS} WHERE key = ?)"))
                        .collect();
                    parts.push(each.join(" AND "));
                }
            }
            params.extend(names.into_iter().map(|n| SqlParam::Text(n.to_string())));
        }

        if let Some(role) = self.role {
            parts.push("session_role = ?".into());
            params.push(SqlParam::Text(role.as_str().into()));
        }
        if let Some(kind) = &self.subagent_type {
            parts.push("subagent_type = ?".into());
            params.push(SqlParam::Text(kind.clone()));
        }
        if let Some(effort) = &self.effort_mode {
            parts.push("effort_mode = ?".into());
            params.push(SqlParam::Text(effort.clone()));
        }
        match self.compressed {
            Some(true) => parts.push("compressed_at IS NOT NULL".into()),
            Some(false) => parts.push("compressed_at IS NULL".into()),
            None => {}
        }
        if let Some(min) = self.min_cost {
            parts.push("total_cost >= ?".into());
            params.push(SqlParam::Real(min));
        }
        if let Some(max) = self.max_cost {
            parts.push("total_cost <= ?".into());
            params.push(SqlParam::Real(max));
        }
        if let Some(n) = self.min_messages {
            parts.push("message_count >= ?".into());
            params.push(SqlParam::Int(n));
        }
        if let Some(q) = self.search.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            let pattern = format!("%{}%", escape_like(q));
            parts.push(
                "(id LIKE ? ESCAPE '\\' OR auto_summary LIKE ? ESCAPE '\\' \
                 OR project_path LIKE ? ESCAPE '\\' OR git_branch LIKE ? ESCAPE '\\')"
                    .into(),
            );
            params.extend(std::iter::repeat(SqlParam::Text(pattern)).take(4));
        }
        if let Some(project) = &self.project_id {
            parts.push("project_id = ?".into());
            params.push(SqlParam::Text(project.clone()));
        }

        Ok(FilterClause {
            sql: parts.join(" AND "),
            params,
        })
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Count `?` placeholders outside single-quoted literals.
pub(crate) fn placeholder_count(sql: &str) -> usize {
    let mut in_literal = false;
    let mut count = 0;
    for c in sql.chars() {
        match c {
            '\'' => in_literal = !in_literal,
            '?' if !in_literal => count += 1,
            _ => {}
        }
    }
    count
}

/// Error unless `sql` holds exactly one placeholder per parameter.
pub(crate) fn check_arity(sql: &str, params: &[SqlParam]) -> crate::DbResult<()> {
    let placeholders = placeholder_count(sql);
    if placeholders != params.len() {
        return Err(crate::DbError::Bind {
            placeholders,
            params: params.len(),
        });
    }
    Ok(())
}

/// Bind `params` positionally onto a typed query.
pub(crate) fn bind_as<'q, O>(
    mut query: QueryAs<'q, Sqlite, O, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> QueryAs<'q, Sqlite, O, SqliteArguments<'q>> {
    for p in params {
        query = match p {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
        };
    }
    query
}

/// Bind `params` positionally onto an untyped query.
pub(crate) fn bind_query<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[SqlParam],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for p in params {
        query = match p {
            SqlParam::Text(s) => query.bind(s.clone()),
            SqlParam::Int(i) => query.bind(*i),
            SqlParam::Real(f) => query.bind(*f),
        };
    }
    query
}
