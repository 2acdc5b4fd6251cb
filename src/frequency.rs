//! Sampling frequency inference
//!
//! Infers the natural spacing of a timestamp column. This is a heuristic that
//! handles the two common cases and refuses to guess otherwise:
//!
//! 1. Strictly regular sampling: exactly one distinct delta, which is the
//!    frequency.
//! 2. Monthly reporting: the most common delta falls within 28..=31 days,
//!    reported as a canonical 30-day period.
//!
//! Anything else (mixed granularity, sensor jitter, event timestamps) fails
//! with [`Error::FrequencyIndeterminate`].
//!
//! [`classify_irregularities`] is the ingestion-time companion that flags
//! series which will need grouping, are unevenly spaced, or contain gaps.

use crate::error::{Error, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

/// More distinct deltas than this marks a series as uneven
pub const UNEVEN_DISTINCT_DELTAS: usize = 10;

/// Largest delta over smallest delta above this marks a series as gappy
pub const GAP_RATIO: i64 = 5;

const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Result of frequency estimation with its supporting evidence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrequencyEstimate {
    /// Inferred period, `None` when undetermined
    pub period: Option<Duration>,
    /// Number of distinct consecutive deltas observed
    pub distinct_deltas: usize,
    /// Most common delta and how often it occurred
    pub dominant: Option<(Duration, usize)>,
}

/// Counts of each consecutive delta (microseconds) after an ascending sort
///
/// Null timestamps are skipped. A delta too large for an `i64` is counted
/// as `i64::MAX`.
fn delta_counts(timestamps: &[Option<i64>]) -> BTreeMap<i64, usize> {
    let mut sorted: Vec<i64> = timestamps.iter().flatten().copied().collect();
    sorted.sort_unstable();

    let mut counts = BTreeMap::new();
    for pair in sorted.windows(2) {
        *counts
            .entry(pair[1].checked_sub(pair[0]).unwrap_or(i64::MAX))
            .or_insert(0) += 1;
    }
    counts
}

/// Estimate the sampling frequency of a timestamp sequence
pub fn estimate_frequency(timestamps: &[Option<i64>]) -> FrequencyEstimate {
    let counts = delta_counts(timestamps);

    // Highest count wins; ties go to the smallest delta
    let dominant = counts
        .iter()
        .max_by_key(|(delta, count)| (**count, Reverse(**delta)))
        .map(|(delta, count)| (*delta, *count));

    let period = match dominant {
        Some((delta, _)) if delta <= 0 || delta == i64::MAX => None,
        Some((delta, _)) if counts.len() == 1 => Some(Duration::microseconds(delta)),
        Some((delta, _)) if is_monthly(delta) => Some(Duration::days(30)),
        _ => None,
    };

    FrequencyEstimate {
        period,
        distinct_deltas: counts.len(),
        dominant: dominant.map(|(delta, count)| (Duration::microseconds(delta), count)),
    }
}

/// Infer the dominant spacing of a timestamp sequence
///
/// # Errors
///
/// [`Error::FrequencyIndeterminate`] when fewer than two timestamps are
/// present, when the timestamps are all identical, or when the spacing is
/// neither regular nor monthly.
///
/// # Example
///
/// ```rust
/// use chrono::Duration;
/// use tsview::frequency::infer_frequency;
///
/// let minute = 60_000_000;
/// let ts: Vec<Option<i64>> = (0..5).map(|i| Some(i * minute)).collect();
/// assert_eq!(infer_frequency(&ts).unwrap(), Duration::minutes(1));
/// ```
pub fn infer_frequency(timestamps: &[Option<i64>]) -> Result<Duration> {
    let estimate = estimate_frequency(timestamps);
    estimate.period.ok_or(Error::FrequencyIndeterminate {
        distinct_deltas: estimate.distinct_deltas,
    })
}

fn is_monthly(delta_us: i64) -> bool {
    (28 * MICROS_PER_DAY..=31 * MICROS_PER_DAY).contains(&delta_us)
}

/// Irregularities detected in a timestamp column at ingestion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Irregularity {
    /// Timestamps repeat; consumers must group by or filter on another column
    GroupOrFilter,
    /// More than [`UNEVEN_DISTINCT_DELTAS`] distinct deltas
    Uneven,
    /// Largest delta exceeds [`GAP_RATIO`] times the smallest
    Gaps,
}

impl fmt::Display for Irregularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Irregularity::GroupOrFilter => write!(f, "GroupOrFilter"),
            Irregularity::Uneven => write!(f, "Uneven"),
            Irregularity::Gaps => write!(f, "Gaps"),
        }
    }
}

/// Flag repeated timestamps, uneven spacing and gaps
///
/// The gap check is skipped when the series needs grouping, since repeated
/// timestamps dominate the delta distribution in that case. Conditions are
/// returned in a fixed order.
pub fn classify_irregularities(timestamps: &[Option<i64>]) -> Vec<Irregularity> {
    let counts = delta_counts(timestamps);
    let (min_delta, max_delta) = match (counts.keys().next(), counts.keys().next_back()) {
        (Some(min), Some(max)) => (*min, *max),
        _ => return Vec::new(),
    };

    let group_or_filter = min_delta <= 0;
    let uneven = counts.len() > UNEVEN_DISTINCT_DELTAS;
    let gaps = !group_or_filter && max_delta > GAP_RATIO.saturating_mul(min_delta);

    let mut conditions = Vec::new();
    if group_or_filter {
        conditions.push(Irregularity::GroupOrFilter);
    }
    if uneven {
        conditions.push(Irregularity::Uneven);
    }
    if gaps {
        conditions.push(Irregularity::Gaps);
    }
    conditions
}
