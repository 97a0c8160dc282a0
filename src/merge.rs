// src/merge.rs
//! # Merge Resolver
//!
//! Promotes a normalized submission into a new [`CanonicalEvent`], folds it
//! into an existing one, or folds one stored record into another (duplicate sweep).
//!
//! Precedence on merge:
//! - non-null beats null;
//! - conflicting non-null values: the higher source tier wins, equal tiers keep
//!   the stored value (descriptions: the longer text wins);
//! - tags and sources are unioned, `end_date` only moves later, tier only up;
//! - `delete_after` is escalated, never shortened;
//! - fingerprint and quality score are recomputed.
//!
//! Everything here is pure. Persistence and retries live in the engine.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::ingest::fingerprint;
use crate::ingest::types::NormalizedSubmission;
use crate::model::{CanonicalEvent, EventStatus, SourceTier};
use crate::retention::RetentionPolicy;

/// Result of folding a submission into an existing record.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Submission id already recorded in `alias_ids`; nothing to write.
    AlreadyMerged,
    Updated(Box<CanonicalEvent>),
}

/// Weighted completeness over populated fields, in `[0, 1]`.
pub fn quality_score(ev: &CanonicalEvent) -> f32 {
    let mut q = 0.0f32;
    if !ev.title.trim().is_empty() {
        q += 0.20;
    }
    if ev.description.as_deref().is_some_and(|d| !d.trim().is_empty()) {
        q += 0.15;
    }
    if !ev.venue_name.trim().is_empty() {
        q += 0.15;
    }
    if ev.area.is_some() {
        q += 0.10;
    }
    if ev.end_date > ev.start_date {
        q += 0.10;
    }
    if ev.price_min.is_some() || ev.price_max.is_some() {
        q += 0.15;
    }
    if !ev.tags.is_empty() {
        q += 0.10;
    }
    if ev.booking_url.is_some() {
        q += 0.05;
    }
    q.min(1.0)
}

/// Build a fresh canonical event from a submission that matched nothing.
pub fn promote(sub: &NormalizedSubmission, policy: &RetentionPolicy, now: DateTime<Utc>) -> CanonicalEvent {
    let mut ev = CanonicalEvent {
        id: uuid::Uuid::new_v4().to_string(),
        fingerprint: sub.fingerprint.clone(),
        title: sub.title.clone(),
        description: sub.description.clone(),
        venue_name: sub.venue_name.clone(),
        area: sub.area.clone(),
        start_date: sub.start_date,
        end_date: sub.end_date,
        price_min: sub.price_min,
        price_max: sub.price_max,
        tags: sub.tags.clone(),
        booking_url: sub.booking_url.clone(),
        sources: [sub.source_name.clone()].into_iter().collect(),
        source_tier: sub.source_tier,
        status: EventStatus::Active,
        created_at: now,
        updated_at: now,
        soft_deleted_at: None,
        hard_deleted_at: None,
        delete_after: policy.delete_after(sub.source_tier, sub.end_date, now),
        quality_score: 0.0,
        alias_ids: [sub.submission_id.clone()].into_iter().collect(),
    };
    ev.quality_score = quality_score(&ev);
    ev
}

/// Content folded into an existing record.
struct Incoming<'a> {
    tier: SourceTier,
    title: &'a str,
    venue_name: &'a str,
    area: &'a Option<String>,
    booking_url: &'a Option<String>,
    description: &'a Option<String>,
    price_min: Option<f64>,
    price_max: Option<f64>,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    tags: &'a BTreeSet<String>,
}

impl<'a> From<&'a NormalizedSubmission> for Incoming<'a> {
    fn from(s: &'a NormalizedSubmission) -> Self {
        Self {
            tier: s.source_tier,
            title: &s.title,
            venue_name: &s.venue_name,
            area: &s.area,
            booking_url: &s.booking_url,
            description: &s.description,
            price_min: s.price_min,
            price_max: s.price_max,
            start_date: s.start_date,
            end_date: s.end_date,
            tags: &s.tags,
        }
    }
}

impl<'a> From<&'a CanonicalEvent> for Incoming<'a> {
    fn from(e: &'a CanonicalEvent) -> Self {
        Self {
            tier: e.source_tier,
            title: &e.title,
            venue_name: &e.venue_name,
            area: &e.area,
            booking_url: &e.booking_url,
            description: &e.description,
            price_min: e.price_min,
            price_max: e.price_max,
            start_date: e.start_date,
            end_date: e.end_date,
            tags: &e.tags,
        }
    }
}

/// Apply precedence rules; identity sets (sources, aliases) are left to the caller.
fn fold(
    existing: &CanonicalEvent,
    inc: &Incoming<'_>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> CanonicalEvent {
    let incoming_wins = inc.tier > existing.source_tier;
    let mut ev = existing.clone();

    ev.title = pick_text(&existing.title, inc.title, incoming_wins);
    ev.venue_name = pick_text(&existing.venue_name, inc.venue_name, incoming_wins);
    ev.area = pick(&existing.area, inc.area, incoming_wins);
    ev.booking_url = pick(&existing.booking_url, inc.booking_url, incoming_wins);
    ev.description = match (&existing.description, inc.description) {
        (Some(old), Some(new)) if !incoming_wins && inc.tier == existing.source_tier => {
            if new.chars().count() > old.chars().count() {
                Some(new.clone())
            } else {
                Some(old.clone())
            }
        }
        (old, new) => pick(old, new, incoming_wins),
    };

    // Prices travel as a pair so a range is never stitched from two sources.
    let has_old_price = existing.price_min.is_some() || existing.price_max.is_some();
    let has_new_price = inc.price_min.is_some() || inc.price_max.is_some();
    if has_new_price && (!has_old_price || incoming_wins) {
        ev.price_min = inc.price_min;
        ev.price_max = inc.price_max;
    }

    if incoming_wins {
        ev.start_date = inc.start_date;
    }
    ev.end_date = existing.end_date.max(inc.end_date).max(ev.start_date);

    ev.tags.extend(inc.tags.iter().cloned());
    ev.source_tier = existing.source_tier.max(inc.tier);

    ev.delete_after = policy.escalate(
        existing.delete_after,
        ev.source_tier,
        ev.end_date,
        ev.created_at,
    );
    ev.fingerprint = fingerprint(&ev.title, &ev.venue_name, ev.date_bucket());
    ev.updated_at = now;
    ev.quality_score = quality_score(&ev);
    ev
}

/// Fold `sub` into `existing`. Idempotent on `submission_id`.
pub fn merge(
    existing: &CanonicalEvent,
    sub: &NormalizedSubmission,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> MergeOutcome {
    if existing.alias_ids.contains(&sub.submission_id) {
        return MergeOutcome::AlreadyMerged;
    }

    let mut ev = fold(existing, &Incoming::from(sub), policy, now);
    ev.sources.insert(sub.source_name.clone());
    ev.alias_ids.insert(sub.submission_id.clone());

    tracing::debug!(
        target: "merge",
        canonical_id = %ev.id,
        submission_id = %sub.submission_id,
        incoming_tier = %sub.source_tier,
        tier = %ev.source_tier,
        "merged submission"
    );

    MergeOutcome::Updated(Box::new(ev))
}

/// Order two duplicates so the record that should survive comes first:
/// higher tier, then higher quality, then older, then smaller id.
pub fn survivor_first<'a>(
    a: &'a CanonicalEvent,
    b: &'a CanonicalEvent,
) -> (&'a CanonicalEvent, &'a CanonicalEvent) {
    let order = b
        .source_tier
        .cmp(&a.source_tier)
        .then_with(|| b.quality_score.total_cmp(&a.quality_score))
        .then_with(|| a.created_at.cmp(&b.created_at))
        .then_with(|| a.id.cmp(&b.id));
    if order == Ordering::Greater {
        (b, a)
    } else {
        (a, b)
    }
}

/// Fold a duplicate record into the survivor. The survivor keeps its id and
/// inherits every source and alias; `delete_after` is the later of the two.
pub fn absorb(
    survivor: &CanonicalEvent,
    absorbed: &CanonicalEvent,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> CanonicalEvent {
    let mut ev = fold(survivor, &Incoming::from(absorbed), policy, now);
    ev.sources.extend(absorbed.sources.iter().cloned());
    ev.alias_ids.extend(absorbed.alias_ids.iter().cloned());
    ev.delete_after = ev.delete_after.max(absorbed.delete_after);
    tracing::debug!(
        target: "merge",
        canonical_id = %ev.id,
        absorbed_id = %absorbed.id,
        "absorbed duplicate record"
    );
    ev
}

fn pick<T: Clone>(old: &Option<T>, new: &Option<T>, incoming_wins: bool) -> Option<T> {
    match (old, new) {
        (Some(_), Some(n)) if incoming_wins => Some(n.clone()),
        (Some(o), _) => Some(o.clone()),
        (None, n) => n.clone(),
    }
}

fn pick_text(old: &str, new: &str, incoming_wins: bool) -> String {
    let old_present = !old.trim().is_empty();
    let new_present = !new.trim().is_empty();
    if new_present && (!old_present || incoming_wins) {
        new.to_string()
    } else {
        old.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SourceTier;
    use chrono::{Duration, TimeZone};
    use std::collections::BTreeSet;

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, h, 0, 0).unwrap()
    }

    fn sub(id: &str, tier: SourceTier) -> NormalizedSubmission {
        NormalizedSubmission {
            submission_id: id.into(),
            source_name: format!("src_{id}"),
            source_tier: tier,
            tier_warning: None,
            title: "Beach Cleanup Day".into(),
            description: None,
            venue_name: "JBR Beach".into(),
            area: Some("dubai marina".into()),
            start_date: at(15, 8),
            end_date: at(15, 8),
            price_min: None,
            price_max: None,
            tags: BTreeSet::new(),
            booking_url: None,
            fingerprint: "fp".into(),
        }
    }

    fn updated(o: MergeOutcome) -> CanonicalEvent {
        match o {
            MergeOutcome::Updated(ev) => *ev,
            MergeOutcome::AlreadyMerged => panic!("expected an update"),
        }
    }

    #[test]
    fn promote_records_own_alias_and_policy_window() {
        let p = RetentionPolicy::default();
        let ev = promote(&sub("a", SourceTier::High), &p, at(1, 0));
        assert!(ev.alias_ids.contains("a"));
        assert_eq!(ev.status, EventStatus::Active);
        assert_eq!(ev.delete_after, at(15, 8) + Duration::days(7));
        assert!(ev.quality_score > 0.0);
    }

    #[test]
    fn same_submission_is_a_noop() {
        let p = RetentionPolicy::default();
        let ev = promote(&sub("a", SourceTier::High), &p, at(1, 0));
        assert_eq!(merge(&ev, &sub("a", SourceTier::High), &p, at(2, 0)), MergeOutcome::AlreadyMerged);
    }

    #[test]
    fn null_fields_are_filled_and_sets_unioned() {
        let p = RetentionPolicy::default();
        let ev = promote(&sub("a", SourceTier::High), &p, at(1, 0));
        let mut s = sub("b", SourceTier::Low);
        s.description = Some("Bring gloves".into());
        s.price_min = Some(0.0);
        s.price_max = Some(0.0);
        s.tags = ["outdoor".to_string()].into_iter().collect();
        s.end_date = at(15, 12);

        let m = updated(merge(&ev, &s, &p, at(2, 0)));
        assert_eq!(m.description.as_deref(), Some("Bring gloves"));
        assert_eq!(m.price_min, Some(0.0));
        assert!(m.tags.contains("outdoor"));
        assert_eq!(m.end_date, at(15, 12));
        assert_eq!(m.alias_ids.len(), 2);
        assert_eq!(m.sources.len(), 2);
        assert_eq!(m.source_tier, SourceTier::High);
        assert!(m.quality_score > ev.quality_score);
        assert_eq!(m.updated_at, at(2, 0));
    }

    #[test]
    fn conflicts_follow_tier_precedence() {
        let p = RetentionPolicy::default();
        let mut low = sub("a", SourceTier::Low);
        low.venue_name = "Beach at JBR".into();
        let ev = promote(&low, &p, at(1, 0));

        let high = sub("b", SourceTier::High);
        let m = updated(merge(&ev, &high, &p, at(2, 0)));
        assert_eq!(m.venue_name, "JBR Beach");
        assert_eq!(m.source_tier, SourceTier::High);

        let mut lower = sub("c", SourceTier::Low);
        lower.venue_name = "Somewhere Else".into();
        let m2 = updated(merge(&m, &lower, &p, at(3, 0)));
        assert_eq!(m2.venue_name, "JBR Beach");
    }

    #[test]
    fn equal_tier_prefers_longer_description() {
        let p = RetentionPolicy::default();
        let mut a = sub("a", SourceTier::Medium);
        a.description = Some("Short".into());
        let ev = promote(&a, &p, at(1, 0));
        let mut b = sub("b", SourceTier::Medium);
        b.description = Some("A much longer description".into());
        let m = updated(merge(&ev, &b, &p, at(2, 0)));
        assert_eq!(m.description.as_deref(), Some("A much longer description"));
    }

    #[test]
    fn end_date_never_moves_earlier() {
        let p = RetentionPolicy::default();
        let mut a = sub("a", SourceTier::High);
        a.end_date = at(17, 0);
        let ev = promote(&a, &p, at(1, 0));
        let m = updated(merge(&ev, &sub("b", SourceTier::High), &p, at(2, 0)));
        assert_eq!(m.end_date, at(17, 0));
    }

    #[test]
    fn delete_after_escalates_both_ways() {
        let p = RetentionPolicy::default();
        let high = promote(&sub("a", SourceTier::High), &p, at(1, 0));
        let m = updated(merge(&high, &sub("b", SourceTier::Low), &p, at(2, 0)));
        assert!(m.delete_after >= high.delete_after);

        let low = promote(&sub("c", SourceTier::Low), &p, at(1, 0));
        let m = updated(merge(&low, &sub("d", SourceTier::High), &p, at(2, 0)));
        assert!(m.delete_after > low.delete_after);
        assert_eq!(m.delete_after, at(15, 8) + Duration::days(7));
    }

    #[test]
    fn quality_is_weighted_completeness() {
        let p = RetentionPolicy::default();
        let mut s = sub("a", SourceTier::High);
        s.description = Some("d".into());
        s.end_date = at(15, 10);
        s.price_min = Some(10.0);
        s.tags = ["x".to_string()].into_iter().collect();
        s.booking_url = Some("https://example.test".into());
        let ev = promote(&s, &p, at(1, 0));
        assert!((ev.quality_score - 1.0).abs() < 1e-6);

        let bare = promote(&sub("b", SourceTier::High), &p, at(1, 0));
        // title + venue + area
        assert!((bare.quality_score - 0.45).abs() < 1e-6);
    }

    #[test]
    fn survivor_is_the_higher_tier_then_the_older_record() {
        let p = RetentionPolicy::default();
        let low = promote(&sub("a", SourceTier::Low), &p, at(1, 0));
        let high = promote(&sub("b", SourceTier::High), &p, at(2, 0));
        assert_eq!(survivor_first(&low, &high).0.id, high.id);
        assert_eq!(survivor_first(&high, &low).0.id, high.id);

        let older = promote(&sub("c", SourceTier::High), &p, at(1, 0));
        assert_eq!(survivor_first(&high, &older).0.id, older.id);
    }

    #[test]
    fn absorb_unions_identity_and_keeps_the_later_window() {
        let p = RetentionPolicy::default();
        let survivor = promote(&sub("a", SourceTier::High), &p, at(1, 0));
        let mut dup = sub("b", SourceTier::Low);
        dup.description = Some("Bring gloves".into());
        let mut absorbed = promote(&dup, &p, at(1, 0));
        absorbed.delete_after = survivor.delete_after + Duration::days(2);

        let m = absorb(&survivor, &absorbed, &p, at(3, 0));
        assert_eq!(m.id, survivor.id);
        assert!(m.alias_ids.contains("a") && m.alias_ids.contains("b"));
        assert!(m.sources.contains("src_a") && m.sources.contains("src_b"));
        assert_eq!(m.description.as_deref(), Some("Bring gloves"));
        assert_eq!(m.delete_after, absorbed.delete_after);
        assert_eq!(m.source_tier, SourceTier::High);
    }
}
