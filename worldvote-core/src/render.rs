//! Presentation helpers: the per-country table and the map color scale.
//!
//! Pure functions over a tally. The color scale mirrors the choropleth
//! styling of the voting widget: zero-vote countries get a neutral fill,
//! the leader gets green, and everything in between walks a red-to-amber
//! gradient anchored at the smallest positive count.

use crate::country::COUNTRIES;
use crate::stats::{compute_stats, percentage};
use crate::tally::{Tally, VoteKind};
use std::collections::BTreeMap;

/// Column the table is sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Name,
    Votes,
    Percent,
    Unknown,
}

/// Current sort state. A fresh sort on any column starts ascending;
/// re-sorting the same column flips the direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortOrder {
    pub key: SortKey,
    pub ascending: bool,
}

impl SortOrder {
    pub fn new(key: SortKey) -> Self {
        Self {
            key,
            ascending: true,
        }
    }

    pub fn toggled(self, key: SortKey) -> Self {
        if self.key == key {
            Self {
                key,
                ascending: !self.ascending,
            }
        } else {
            Self::new(key)
        }
    }
}

/// One table line.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRow {
    pub code: &'static str,
    pub name: &'static str,
    pub votes_for: u64,
    pub votes_unknown: u64,
    /// Share of FOR votes, one decimal place.
    pub percent: f64,
}

/// Builds the table over every configured country. Percentages are taken
/// against FOR votes only. Without a sort order rows follow registry
/// order.
pub fn build_table(tally: &Tally, order: Option<SortOrder>) -> Vec<TableRow> {
    let stats = compute_stats(tally);

    let mut rows: Vec<TableRow> = COUNTRIES
        .iter()
        .map(|country| {
            let count = tally.get(country.code);
            TableRow {
                code: country.code,
                name: country.name,
                votes_for: count.for_votes,
                votes_unknown: count.unknown_votes,
                percent: percentage(count.for_votes, stats.total_for),
            }
        })
        .collect();

    if let Some(order) = order {
        rows.sort_by(|a, b| {
            let ordering = match order.key {
                SortKey::Name => a.name.cmp(b.name),
                SortKey::Votes => a.votes_for.cmp(&b.votes_for),
                SortKey::Percent => a.percent.total_cmp(&b.percent),
                SortKey::Unknown => a.votes_unknown.cmp(&b.votes_unknown),
            };
            if order.ascending {
                ordering
            } else {
                ordering.reverse()
            }
        });
    }

    rows
}

/// Fill for countries with zero FOR votes.
pub const ZERO_FILL: &str = "#374151";
/// Fill for the current leader.
pub const TOP_FILL: &str = "#22c55e";
/// Fill when every voted country holds the same count.
pub const FLAT_FILL: &str = "#f59e0b";

/// Red-to-amber ramp for everything between the smallest positive count
/// and the leader.
const GRADIENT_STOPS: [&str; 6] = [
    "#991b1b", "#dc2626", "#ef4444", "#f97316", "#f59e0b", "#fbbf24",
];

/// Computes the fill color for every configured country.
pub fn map_colors(tally: &Tally) -> BTreeMap<&'static str, String> {
    let stats = compute_stats(tally);

    COUNTRIES
        .iter()
        .map(|country| {
            let votes = tally.count(country.code, VoteKind::For);
            let fill = if votes == 0 {
                ZERO_FILL.to_string()
            } else if Some(votes) == stats.max_for {
                TOP_FILL.to_string()
            } else {
                gradient_color(votes, stats.min_positive_for, stats.max_for)
            };
            (country.code, fill)
        })
        .collect()
}

/// Position a positive count on the gradient. With a degenerate scale
/// (all positive counts equal) the midpoint amber is used.
pub fn gradient_color(votes: u64, min_positive: Option<u64>, max: Option<u64>) -> String {
    if votes == 0 {
        return ZERO_FILL.to_string();
    }

    let (low, high) = match (min_positive, max) {
        (Some(low), Some(high)) if low != high => (low, high),
        _ => return FLAT_FILL.to_string(),
    };

    let normalized = (votes - low) as f64 / (high - low) as f64;
    let segments = (GRADIENT_STOPS.len() - 1) as f64;
    let segment_size = 1.0 / segments;
    let segment_index =
        ((normalized / segment_size).floor() as usize).min(GRADIENT_STOPS.len() - 2);
    let local = (normalized - segment_index as f64 * segment_size) / segment_size;

    interpolate_color(
        GRADIENT_STOPS[segment_index],
        GRADIENT_STOPS[segment_index + 1],
        local,
    )
}

/// Linear per-channel blend of two `#rrggbb` colors.
fn interpolate_color(from: &str, to: &str, factor: f64) -> String {
    let (r1, g1, b1) = parse_hex(from);
    let (r2, g2, b2) = parse_hex(to);

    let blend = |a: u8, b: u8| -> u8 { (a as f64 + (b as f64 - a as f64) * factor).round() as u8 };

    format!(
        "#{:02x}{:02x}{:02x}",
        blend(r1, r2),
        blend(g1, g2),
        blend(b1, b2)
    )
}

fn parse_hex(color: &str) -> (u8, u8, u8) {
    let hex = color.trim_start_matches('#');
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).unwrap_or(0);
    (channel(0), channel(2), channel(4))
}
