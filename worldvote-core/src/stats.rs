//! Derived statistics over a tally.
//!
//! Pure functions, deterministic and order-independent over the country
//! set. Percentages are computed against FOR votes only; "don't know"
//! votes count toward the grand total but never toward the denominator.

use crate::country::COUNTRIES;
use crate::tally::Tally;

/// Aggregates derived from a tally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TallyStats {
    /// All votes, FOR and "don't know" combined
    pub total: u64,
    /// FOR votes only, the percentage denominator
    pub total_for: u64,
    /// Highest FOR count, None when every FOR count is zero
    pub max_for: Option<u64>,
    /// Lowest FOR count strictly above zero, None when every FOR count is zero
    pub min_positive_for: Option<u64>,
}

/// Compute aggregates over the configured country set
pub fn compute_stats(tally: &Tally) -> TallyStats {
    let mut total_for = 0u64;
    let mut total_unknown = 0u64;
    let mut max_for: Option<u64> = None;
    let mut min_positive_for: Option<u64> = None;

    for c in &COUNTRIES {
        let count = tally.get(c.code);
        // Adopted snapshots may carry arbitrarily large counts.
        total_for = total_for.saturating_add(count.for_votes);
        total_unknown = total_unknown.saturating_add(count.unknown_votes);

        if count.for_votes > 0 {
            max_for = Some(max_for.map_or(count.for_votes, |m| m.max(count.for_votes)));
            min_positive_for =
                Some(min_positive_for.map_or(count.for_votes, |m| m.min(count.for_votes)));
        }
    }

    TallyStats {
        total: total_for.saturating_add(total_unknown),
        total_for,
        max_for,
        min_positive_for,
    }
}

/// Percentage to one decimal place, half-up. Zero denominator yields 0.
pub fn percentage(count: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    ((count as f64 / denominator as f64) * 1000.0).round() / 10.0
}
