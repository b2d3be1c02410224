//! Response latency from conversational turn pairs, and session duration.

use chrono::{DateTime, Utc};

/// Which side of the conversation a timestamped record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnSide {
    User,
    Assistant,
}

/// Summary of the per-turn response latencies of one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LatencyStats {
    pub avg_ms: Option<u64>,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub sample_count: u64,
}

/// Parse an RFC 3339 / ISO 8601 instant. Also accepts epoch milliseconds.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Pair each user record with the next assistant record and return the
/// deltas in milliseconds.
///
/// Records must be in chronological order. A user record followed by another
/// user record restarts the pair from the later one. Negative deltas (clock
/// skew) are dropped.
pub fn turn_latencies(records: &[(TurnSide, Option<DateTime<Utc>>)]) -> Vec<u64> {
    let mut samples = Vec::new();
    let mut pending_user: Option<DateTime<Utc>> = None;
    for (side, ts) in records {
        match side {
            TurnSide::User => {
                if ts.is_some() {
                    pending_user = *ts;
                }
            }
            TurnSide::Assistant => {
                if let (Some(start), Some(end)) = (pending_user.take(), ts) {
                    let delta = (*end - start).num_milliseconds();
                    if delta >= 0 {
                        samples.push(delta as u64);
                    }
                }
            }
        }
    }
    samples
}

/// Select from an ascending array at `min(n - 1, floor(n * p))`.
fn select(sorted: &[u64], p: f64) -> u64 {
    let n = sorted.len();
    let idx = ((n as f64 * p).floor() as usize).min(n - 1);
    sorted[idx]
}

/// Mean, p50, p95, and max over the samples. With fewer than two samples
/// only the count is reported.
pub fn summarize(samples: &[u64]) -> LatencyStats {
    if samples.len() < 2 {
        return LatencyStats {
            sample_count: samples.len() as u64,
            ..LatencyStats::default()
        };
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let sum: u128 = sorted.iter().map(|v| *v as u128).sum();
    let avg = (sum as f64 / sorted.len() as f64).round() as u64;
    LatencyStats {
        avg_ms: Some(avg),
        p50_ms: Some(select(&sorted, 0.50)),
        p95_ms: Some(select(&sorted, 0.95)),
        max_ms: sorted.last().copied(),
        sample_count: sorted.len() as u64,
    }
}

/// Session duration: first-to-last content timestamp when there are at
/// least two, else filesystem `modified - created`. Never negative.
pub fn session_duration_ms(
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
    fs_created: Option<DateTime<Utc>>,
    fs_modified: Option<DateTime<Utc>>,
) -> u64 {
    let span = match (first, last) {
        (Some(a), Some(b)) if a != b => Some(b - a),
        _ => match (fs_created, fs_modified) {
            (Some(c), Some(m)) => Some(m - c),
            _ => None,
        },
    };
    span.map(|d| d.num_milliseconds().max(0) as u64).unwrap_or(0)
}
