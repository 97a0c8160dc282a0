//! model.rs: canonical event record, source tiers and lifecycle status.
//!
//! `CanonicalEvent` is the single authoritative record for a real-world event
//! after duplicate resolution. Content fields are only changed by the merge
//! resolver; `status` and the deletion timestamps only by the lifecycle scheduler.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Priority class of an upstream collector. Ordering is `Low < Medium < High`,
/// which is also merge precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Low,
    Medium,
    High,
}

impl SourceTier {
    pub const ALL: [SourceTier; 3] = [SourceTier::High, SourceTier::Medium, SourceTier::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTier::High => "high",
            SourceTier::Medium => "medium",
            SourceTier::Low => "low",
        }
    }
}

impl fmt::Display for SourceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceTier {
    type Err = ();

    /// Case-insensitive; accepts the `*_priority` spelling used by some collectors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        match t.trim_end_matches("_priority") {
            "high" => Ok(SourceTier::High),
            "medium" | "med" => Ok(SourceTier::Medium),
            "low" => Ok(SourceTier::Low),
            _ => Err(()),
        }
    }
}

/// Deletion state machine. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    Active,
    SoftDeleted,
    HardDeleted,
}

impl EventStatus {
    /// True when `next` is the single legal successor of `self`.
    pub fn can_advance_to(self, next: EventStatus) -> bool {
        matches!(
            (self, next),
            (EventStatus::Active, EventStatus::SoftDeleted)
                | (EventStatus::SoftDeleted, EventStatus::HardDeleted)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEvent {
    pub id: String,
    /// Coarse hash of title + venue + date bucket. Narrows candidate search only.
    pub fingerprint: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub venue_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_url: Option<String>,
    /// Collector names that reported this event.
    #[serde(default)]
    pub sources: BTreeSet<String>,
    pub source_tier: SourceTier,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_deleted_at: Option<DateTime<Utc>>,
    pub delete_after: DateTime<Utc>,
    pub quality_score: f32,
    /// Submission ids merged into this record (including the one that created it).
    #[serde(default)]
    pub alias_ids: BTreeSet<String>,
}

impl CanonicalEvent {
    /// Calendar day used for candidate bucketing.
    pub fn date_bucket(&self) -> NaiveDate {
        self.start_date.date_naive()
    }

    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    /// ACTIVE and past its retention window (inclusive boundary).
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.delete_after <= now
    }

    /// Clear content fields, keeping identity, aliases and timestamps.
    pub(crate) fn into_tombstone(mut self, now: DateTime<Utc>) -> Self {
        self.title.clear();
        self.description = None;
        self.venue_name.clear();
        self.area = None;
        self.price_min = None;
        self.price_max = None;
        self.tags.clear();
        self.booking_url = None;
        self.status = EventStatus::HardDeleted;
        self.hard_deleted_at = Some(now);
        self.updated_at = now;
        self
    }
}

/// Read-side filter for `get_active_events`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub area: Option<String>,
    /// Events starting at or after this instant.
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Events starting strictly before this instant.
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub min_quality: Option<f32>,
    #[serde(default)]
    pub tier: Option<SourceTier>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl EventFilter {
    pub fn matches(&self, ev: &CanonicalEvent) -> bool {
        if !ev.is_active() {
            return false;
        }
        if let Some(area) = &self.area {
            match &ev.area {
                Some(a) if a.eq_ignore_ascii_case(area.trim()) => {}
                _ => return false,
            }
        }
        if let Some(from) = self.from {
            if ev.start_date < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if ev.start_date >= to {
                return false;
            }
        }
        if let Some(q) = self.min_quality {
            if ev.quality_score < q {
                return false;
            }
        }
        if let Some(t) = self.tier {
            if ev.source_tier != t {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ordering_is_merge_precedence() {
        assert!(SourceTier::High > SourceTier::Medium);
        assert!(SourceTier::Medium > SourceTier::Low);
        assert_eq!("HIGH".parse::<SourceTier>(), Ok(SourceTier::High));
        assert_eq!("medium_priority".parse::<SourceTier>(), Ok(SourceTier::Medium));
        assert!("platinum".parse::<SourceTier>().is_err());
    }

    #[test]
    fn status_only_moves_forward() {
        use EventStatus::*;
        assert!(Active.can_advance_to(SoftDeleted));
        assert!(SoftDeleted.can_advance_to(HardDeleted));
        assert!(!Active.can_advance_to(HardDeleted));
        assert!(!SoftDeleted.can_advance_to(Active));
        assert!(!HardDeleted.can_advance_to(SoftDeleted));
    }

    #[test]
    fn status_serializes_uppercase() {
        let v = serde_json::to_value(EventStatus::SoftDeleted).unwrap();
        assert_eq!(v, serde_json::json!("SOFT_DELETED"));
        let t = serde_json::to_value(SourceTier::High).unwrap();
        assert_eq!(t, serde_json::json!("high"));
    }
}
