// src/matcher.rs
//! # Similarity Matcher
//!
//! Scores a [`NormalizedSubmission`] against a bounded candidate set of
//! canonical events and picks the best duplicate, if any.
//!
//! `S = w_title·titleSim + w_venue·venueSim + w_date·dateProximity + w_price·priceOverlap`
//!
//! - text similarity: max of `strsim::normalized_levenshtein` on whitespace-free
//!   comparison keys and token-set Jaccard (so "Clean Up" ≈ "Cleanup").
//! - date proximity: 1.0 on the same calendar day, linear decay to 0 over the window.
//! - price overlap: 1.0 only when both ranges are present and intersect.
//! - disjoint price ranges subtract `price_conflict_penalty` before clamping.
//! - missing fields score 0; nothing here returns an error.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strsim::normalized_levenshtein;

use crate::ingest::comparison_key;
use crate::ingest::types::NormalizedSubmission;
use crate::model::CanonicalEvent;

pub const DEFAULT_THRESHOLD: f32 = 0.75;
pub const DEFAULT_DATE_WINDOW_DAYS: u32 = 3;
/// Upper bound for `date_window_days`; every lookup reads `2 * window + 1` buckets.
pub const MAX_DATE_WINDOW_DAYS: u32 = 30;
pub const DEFAULT_PRICE_CONFLICT_PENALTY: f32 = 0.25;
pub const DEFAULT_MAX_CANDIDATES: usize = 50;

/// Tunable weights and limits. Loaded from the `[matching]` config section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    pub title_weight: f32,
    pub venue_weight: f32,
    pub date_weight: f32,
    pub price_weight: f32,
    pub threshold: f32,
    pub date_window_days: u32,
    pub price_conflict_penalty: f32,
    pub max_candidates: usize,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            title_weight: 0.45,
            venue_weight: 0.25,
            date_weight: 0.20,
            price_weight: 0.10,
            threshold: DEFAULT_THRESHOLD,
            date_window_days: DEFAULT_DATE_WINDOW_DAYS,
            price_conflict_penalty: DEFAULT_PRICE_CONFLICT_PENALTY,
            max_candidates: DEFAULT_MAX_CANDIDATES,
        }
    }
}

impl MatchConfig {
    /// Clamp out-of-range values coming from config files or env.
    pub fn sanitized(mut self) -> Self {
        let fix = |w: f32| if w.is_finite() { w.max(0.0) } else { 0.0 };
        self.title_weight = fix(self.title_weight);
        self.venue_weight = fix(self.venue_weight);
        self.date_weight = fix(self.date_weight);
        self.price_weight = fix(self.price_weight);
        self.price_conflict_penalty = fix(self.price_conflict_penalty);
        self.threshold = if self.threshold.is_finite() {
            self.threshold.clamp(0.0, 1.0)
        } else {
            DEFAULT_THRESHOLD
        };
        self.max_candidates = self.max_candidates.max(1);
        self.date_window_days = self.date_window_days.clamp(1, MAX_DATE_WINDOW_DAYS);
        self
    }
}

/// Per-component scores, kept for logging and the HTTP response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub title: f32,
    pub venue: f32,
    pub date: f32,
    pub price: f32,
    pub penalty: f32,
    pub total: f32,
}

/// Best candidate above threshold.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub event: &'a CanonicalEvent,
    pub score: ScoreBreakdown,
}

/// Similarity of two free-text strings in `[0, 1]`. Empty input scores 0.
pub fn text_similarity(a: &str, b: &str) -> f32 {
    let ka = comparison_key(a);
    let kb = comparison_key(b);
    if ka.is_empty() || kb.is_empty() {
        return 0.0;
    }
    if ka == kb {
        return 1.0;
    }

    let squash = |s: &str| s.split_whitespace().collect::<String>();
    let lev = normalized_levenshtein(&squash(&ka), &squash(&kb)) as f32;

    let ta: BTreeSet<&str> = ka.split_whitespace().collect();
    let tb: BTreeSet<&str> = kb.split_whitespace().collect();
    let inter = ta.intersection(&tb).count() as f32;
    let union = ta.union(&tb).count() as f32;
    let jaccard = if union > 0.0 { inter / union } else { 0.0 };

    lev.max(jaccard).clamp(0.0, 1.0)
}

/// 1.0 on the same day, decaying linearly to 0 at `window_days`.
pub fn date_proximity(a: NaiveDate, b: NaiveDate, window_days: u32) -> f32 {
    let diff = (a - b).num_days().unsigned_abs();
    if window_days == 0 {
        return if diff == 0 { 1.0 } else { 0.0 };
    }
    (1.0 - diff as f32 / window_days as f32).max(0.0)
}

/// `Some(true)` when both ranges are present and intersect, `Some(false)` when
/// both are present and disjoint, `None` when either side is missing.
pub fn price_overlap(
    a: (Option<f64>, Option<f64>),
    b: (Option<f64>, Option<f64>),
) -> Option<bool> {
    let (a_lo, a_hi) = range(a)?;
    let (b_lo, b_hi) = range(b)?;
    Some(a_lo <= b_hi && b_lo <= a_hi)
}

fn range((lo, hi): (Option<f64>, Option<f64>)) -> Option<(f64, f64)> {
    match (lo, hi) {
        (Some(l), Some(h)) => Some((l.min(h), l.max(h))),
        (Some(x), None) | (None, Some(x)) => Some((x, x)),
        (None, None) => None,
    }
}

/// The fields a comparison looks at, borrowed from either side.
#[derive(Debug, Clone, Copy)]
struct Side<'a> {
    title: &'a str,
    venue: &'a str,
    bucket: NaiveDate,
    price: (Option<f64>, Option<f64>),
}

impl<'a> From<&'a NormalizedSubmission> for Side<'a> {
    fn from(s: &'a NormalizedSubmission) -> Self {
        Self {
            title: &s.title,
            venue: &s.venue_name,
            bucket: s.date_bucket(),
            price: (s.price_min, s.price_max),
        }
    }
}

impl<'a> From<&'a CanonicalEvent> for Side<'a> {
    fn from(e: &'a CanonicalEvent) -> Self {
        Self {
            title: &e.title,
            venue: &e.venue_name,
            bucket: e.date_bucket(),
            price: (e.price_min, e.price_max),
        }
    }
}

fn score_sides(a: Side<'_>, b: Side<'_>, cfg: &MatchConfig) -> ScoreBreakdown {
    let title = text_similarity(a.title, b.title);
    let venue = text_similarity(a.venue, b.venue);
    let date = date_proximity(a.bucket, b.bucket, cfg.date_window_days);
    let overlap = price_overlap(a.price, b.price);
    let price = if overlap == Some(true) { 1.0 } else { 0.0 };
    let penalty = if overlap == Some(false) {
        cfg.price_conflict_penalty
    } else {
        0.0
    };

    let raw = cfg.title_weight * title
        + cfg.venue_weight * venue
        + cfg.date_weight * date
        + cfg.price_weight * price
        - penalty;

    ScoreBreakdown {
        title,
        venue,
        date,
        price,
        penalty,
        total: raw.clamp(0.0, 1.0),
    }
}

/// Score one candidate.
pub fn score(sub: &NormalizedSubmission, ev: &CanonicalEvent, cfg: &MatchConfig) -> ScoreBreakdown {
    score_sides(sub.into(), ev.into(), cfg)
}

/// Score two stored records against each other (duplicate sweep).
pub fn score_events(a: &CanonicalEvent, b: &CanonicalEvent, cfg: &MatchConfig) -> ScoreBreakdown {
    score_sides(a.into(), b.into(), cfg)
}

/// Highest-scoring ACTIVE candidate at or above the threshold. Ties go to the
/// higher source tier, then to the most recently updated record.
pub fn best_match<'a>(
    sub: &NormalizedSubmission,
    candidates: impl IntoIterator<Item = &'a CanonicalEvent>,
    cfg: &MatchConfig,
) -> Option<Match<'a>> {
    candidates
        .into_iter()
        .filter(|ev| ev.is_active())
        .map(|ev| Match {
            event: ev,
            score: score(sub, ev, cfg),
        })
        .filter(|m| m.score.total >= cfg.threshold)
        .max_by(rank)
}

fn rank(a: &Match<'_>, b: &Match<'_>) -> Ordering {
    a.score
        .total
        .total_cmp(&b.score.total)
        .then_with(|| a.event.source_tier.cmp(&b.event.source_tier))
        .then_with(|| a.event.updated_at.cmp(&b.event.updated_at))
}
