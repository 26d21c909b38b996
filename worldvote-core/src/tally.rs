//! Ballot tally, vote kinds, and reset epochs.
//!
//! Wire format (shared by the local store and the remote store): a flat
//! JSON object mapping `CODE` to the FOR count and `CODE_unknown` to the
//! "don't know" count. Readers accept sparse, partially garbled maps;
//! writers always emit every configured key with explicit zeros.

use crate::country::{self, COUNTRIES};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

/// Suffix distinguishing "don't know" counters in wire keys
const UNKNOWN_SUFFIX: &str = "_unknown";

/// Tally generation token, milliseconds since the Unix epoch.
///
/// Epochs are compared for difference, not order: any observed value that
/// differs from the stored one marks a reset.
pub type Epoch = u64;

/// Per-client record of already-cast ballot keys
pub type BallotSet = BTreeSet<String>;

/// The two kinds of vote a user may cast per country
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum VoteKind {
    /// A vote for the country
    For,
    /// A "don't know" vote
    Unknown,
}

impl VoteKind {
    /// Wire/ballot key for this kind: bare code or `_unknown`-suffixed
    pub fn ballot_key(&self, code: &str) -> String {
        match self {
            VoteKind::For => code.to_string(),
            VoteKind::Unknown => format!("{}{}", code, UNKNOWN_SUFFIX),
        }
    }
}

/// Split a wire/ballot key into country code and kind
pub fn parse_ballot_key(key: &str) -> (&str, VoteKind) {
    match key.strip_suffix(UNKNOWN_SUFFIX) {
        Some(code) => (code, VoteKind::Unknown),
        None => (key, VoteKind::For),
    }
}

/// Whether the client already holds a ballot of either kind for the country
pub fn has_any_ballot(ballots: &BallotSet, code: &str) -> bool {
    ballots.contains(code) || ballots.contains(&VoteKind::Unknown.ballot_key(code))
}

/// Counts for one country
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountryCount {
    pub for_votes: u64,
    pub unknown_votes: u64,
}

impl CountryCount {
    fn of_kind(&self, kind: VoteKind) -> u64 {
        match kind {
            VoteKind::For => self.for_votes,
            VoteKind::Unknown => self.unknown_votes,
        }
    }

    fn of_kind_mut(&mut self, kind: VoteKind) -> &mut u64 {
        match kind {
            VoteKind::For => &mut self.for_votes,
            VoteKind::Unknown => &mut self.unknown_votes,
        }
    }
}

/// Sparse ballot tally over the configured country set.
///
/// An absent country reads as zero counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    counts: BTreeMap<String, CountryCount>,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts for a country (zeros when absent)
    pub fn get(&self, code: &str) -> CountryCount {
        self.counts.get(code).copied().unwrap_or_default()
    }

    /// Count for a single (country, kind) key
    pub fn count(&self, code: &str, kind: VoteKind) -> u64 {
        self.get(code).of_kind(kind)
    }

    /// Add one vote. Unknown codes are ignored, and a counter already
    /// at `u64::MAX` stays there.
    pub fn increment(&mut self, code: &str, kind: VoteKind) {
        if !country::is_known(code) {
            return;
        }
        let entry = self.counts.entry(code.to_string()).or_default();
        let slot = entry.of_kind_mut(kind);
        *slot = slot.saturating_add(1);
    }

    /// True when no country has a recorded count
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Full wire map: every configured key, zeros explicit
    pub fn to_wire_map(&self) -> BTreeMap<String, u64> {
        let mut map = BTreeMap::new();
        for c in &COUNTRIES {
            let count = self.get(c.code);
            map.insert(c.code.to_string(), count.for_votes);
            map.insert(VoteKind::Unknown.ballot_key(c.code), count.unknown_votes);
        }
        map
    }

    /// Build a tally from a wire map, applying the coercion policy:
    /// unknown countries are dropped, negative or non-numeric values
    /// become 0.
    pub fn from_wire_map(map: &serde_json::Map<String, Value>) -> Self {
        let mut tally = Tally::new();
        for (key, value) in map {
            let (code, kind) = parse_ballot_key(key);
            if !country::is_known(code) {
                continue;
            }
            let entry = tally.counts.entry(code.to_string()).or_default();
            *entry.of_kind_mut(kind) = coerce_count(value);
        }
        tally
    }

    /// Build a tally from already-numeric counts keyed by ballot key.
    /// Unknown countries are dropped.
    pub fn from_counts(map: &BTreeMap<String, u64>) -> Self {
        let mut tally = Tally::new();
        for (key, value) in map {
            let (code, kind) = parse_ballot_key(key);
            if !country::is_known(code) {
                continue;
            }
            let entry = tally.counts.entry(code.to_string()).or_default();
            *entry.of_kind_mut(kind) = *value;
        }
        tally
    }
}

/// Coerce a wire value to a count: non-negative numbers pass (floats are
/// truncated), numeric strings are parsed, everything else is 0.
pub fn coerce_count(value: &Value) -> u64 {
    if let Some(n) = value.as_u64() {
        return n;
    }
    if let Some(f) = value.as_f64() {
        return if f.is_finite() && f > 0.0 { f as u64 } else { 0 };
    }
    if let Some(s) = value.as_str() {
        return match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() && f > 0.0 => f as u64,
            _ => 0,
        };
    }
    0
}

/// Parse a reset epoch from a wire value (number or numeric string)
pub fn parse_epoch(value: &Value) -> Option<Epoch> {
    if let Some(n) = value.as_u64() {
        return Some(n);
    }
    if let Some(f) = value.as_f64() {
        return if f.is_finite() && f >= 0.0 { Some(f as u64) } else { None };
    }
    value.as_str().and_then(|s| s.trim().parse::<Epoch>().ok())
}

/// Milliseconds since the Unix epoch
pub fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Mint a reset epoch strictly different from (and greater than) the
/// previous one, even when two resets land in the same millisecond. A
/// previous epoch of `u64::MAX` (only reachable through wire data, never
/// through a real clock) saturates instead of wrapping.
pub fn mint_epoch(prev: Option<Epoch>) -> Epoch {
    let now = unix_timestamp_ms();
    match prev {
        Some(p) if now <= p => p.saturating_add(1),
        _ => now,
    }
}
