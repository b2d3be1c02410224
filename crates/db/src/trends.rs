// crates/db/src/trends.rs
//! Period bounds and period-over-period trend metrics.

use crate::{DbError, DbResult};
use chrono::{Days, NaiveDate};
use serde::Serialize;

// ============================================================================
// Time Period Functions
// ============================================================================

/// Unix-second bounds of the UTC day range `[from 00:00, to + 1 day 00:00)`.
pub fn day_range_bounds(from: NaiveDate, to: NaiveDate) -> DbResult<(i64, i64)> {
    if from > to {
        return Err(DbError::InvalidRange { from, to });
    }
    let start = from.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    let end_day = to.checked_add_days(Days::new(1)).ok_or(DbError::InvalidRange { from, to })?;
    let end = end_day.and_time(chrono::NaiveTime::MIN).and_utc().timestamp();
    Ok((start, end))
}

/// Number of days in the inclusive range.
pub fn range_days(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days() + 1
}

/// The window of identical day length ending the day before `from`.
pub fn previous_window(from: NaiveDate, to: NaiveDate) -> DbResult<(NaiveDate, NaiveDate)> {
    if from > to {
        return Err(DbError::InvalidRange { from, to });
    }
    let len = range_days(from, to) as u64;
    let prev_to = from.checked_sub_days(Days::new(1)).ok_or(DbError::InvalidRange { from, to })?;
    let prev_from = from.checked_sub_days(Days::new(len)).ok_or(DbError::InvalidRange { from, to })?;
    Ok((prev_from, prev_to))
}

// ============================================================================
// Trend Metric Types
// ============================================================================

/// A single trend metric comparing current vs previous period.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendMetric {
    /// Current period value.
    pub current: i64,
    /// Previous period value.
    pub previous: i64,
    /// Absolute change (current - previous).
    pub delta: i64,
    /// Percentage change, rounded to 1 decimal place.
    /// None if previous == 0 (cannot calculate percentage).
    pub delta_percent: Option<f64>,
}

impl TrendMetric {
    /// Create a new TrendMetric from current and previous values.
    pub fn new(current: i64, previous: i64) -> Self {
        let delta = current - previous;
        let delta_percent = if previous == 0 {
            None
        } else {
            let percent = (delta as f64 / previous as f64) * 100.0;
            Some((percent * 10.0).round() / 10.0)
        };
        Self {
            current,
            previous,
            delta,
            delta_percent,
        }
    }
}
