//! # Retention Policy
//!
//! Maps each [`SourceTier`] to a retention window (in days) plus a human-readable
//! rationale, and optionally to the list of collector names belonging to it.
//!
//! - `delete_after = max(end_date, created_at) + retention_days[tier]`
//! - Recomputation on merge is escalation-only: the stored window never shrinks.
//! - Unknown tiers fall back to the shortest configured window and produce a
//!   [`PolicyNotFoundError`] warning instead of blocking ingestion.
//!
//! Loads from TOML or JSON (`RETENTION_POLICY_PATH`, then
//! `config/retention.toml`, then `config/retention.json`), with built-in defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PolicyNotFoundError;
use crate::model::{CanonicalEvent, SourceTier};

pub const ENV_RETENTION_POLICY_PATH: &str = "RETENTION_POLICY_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub retention_days: u32,
    #[serde(default)]
    pub rationale: String,
    /// Collector names assigned to this tier.
    #[serde(default)]
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub tiers: BTreeMap<SourceTier, TierPolicy>,
}

/// Outcome of resolving a submission's tier.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTier {
    pub tier: SourceTier,
    pub retention_days: u32,
    pub warning: Option<PolicyNotFoundError>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        let mut tiers = BTreeMap::new();
        tiers.insert(
            SourceTier::High,
            TierPolicy {
                retention_days: 7,
                rationale: "High-value family events, keep for analytics".into(),
                sources: vec![
                    "dubai_calendar".into(),
                    "timeout_dubai".into(),
                    "timeout_kids_uae".into(),
                    "platinumlist".into(),
                ],
            },
        );
        tiers.insert(
            SourceTier::Medium,
            TierPolicy {
                retention_days: 3,
                rationale: "Good coverage, moderate retention".into(),
                sources: vec![
                    "eventbrite_dubai".into(),
                    "meetup_dubai".into(),
                    "whats_on_dubai".into(),
                    "timeout_market_dubai".into(),
                    "timeout_dxb".into(),
                    "dubai_web_events".into(),
                ],
            },
        );
        tiers.insert(
            SourceTier::Low,
            TierPolicy {
                retention_days: 1,
                rationale: "Limited family appeal, minimal retention".into(),
                sources: vec![
                    "7g_media".into(),
                    "social_rising".into(),
                    "instagram_influencers".into(),
                ],
            },
        );
        Self { tiers }
    }
}

impl RetentionPolicy {
    /// Tier with the shortest configured window (ties go to the lower tier).
    pub fn fallback_tier(&self) -> SourceTier {
        self.tiers
            .iter()
            .min_by_key(|(tier, p)| (p.retention_days, **tier))
            .map(|(tier, _)| *tier)
            .unwrap_or(SourceTier::Low)
    }

    /// Retention days for `tier`, falling back to the most conservative entry.
    pub fn retention_for(&self, tier: SourceTier) -> (u32, Option<PolicyNotFoundError>) {
        if let Some(p) = self.tiers.get(&tier) {
            return (p.retention_days, None);
        }
        let fallback = self.fallback_tier();
        let days = self
            .tiers
            .get(&fallback)
            .map(|p| p.retention_days)
            .unwrap_or(1);
        (
            days,
            Some(PolicyNotFoundError {
                requested: tier.to_string(),
                fallback,
            }),
        )
    }

    /// Look up the tier a collector belongs to (case-insensitive).
    pub fn tier_for_source(&self, source_name: &str) -> Option<SourceTier> {
        let s = source_name.trim();
        self.tiers
            .iter()
            .rev()
            .find(|(_, p)| p.sources.iter().any(|x| x.eq_ignore_ascii_case(s)))
            .map(|(tier, _)| *tier)
    }

    /// Resolve a submission's tier: explicit tier string first, then the source
    /// registry, then the conservative fallback with a warning.
    pub fn resolve_tier(&self, explicit: Option<&str>, source_name: &str) -> ResolvedTier {
        let explicit = explicit.map(str::trim).filter(|s| !s.is_empty());
        let parsed = explicit.and_then(|s| s.parse::<SourceTier>().ok());

        let candidate = parsed.or_else(|| {
            if explicit.is_none() {
                self.tier_for_source(source_name)
            } else {
                None
            }
        });

        match candidate {
            Some(tier) => {
                let (days, warning) = self.retention_for(tier);
                match warning {
                    None => ResolvedTier {
                        tier,
                        retention_days: days,
                        warning: None,
                    },
                    Some(w) => ResolvedTier {
                        tier: w.fallback,
                        retention_days: days,
                        warning: Some(w),
                    },
                }
            }
            None => {
                let fallback = self.fallback_tier();
                let (days, _) = self.retention_for(fallback);
                ResolvedTier {
                    tier: fallback,
                    retention_days: days,
                    warning: Some(PolicyNotFoundError {
                        requested: explicit.unwrap_or(source_name).to_string(),
                        fallback,
                    }),
                }
            }
        }
    }

    /// `max(end_date, created_at) + retention_days[tier]`.
    pub fn delete_after(
        &self,
        tier: SourceTier,
        end_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let (days, _) = self.retention_for(tier);
        end_date.max(created_at) + Duration::days(i64::from(days))
    }

    /// Escalation-only recomputation used on merge.
    pub fn escalate(
        &self,
        current: DateTime<Utc>,
        tier: SourceTier,
        end_date: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> DateTime<Utc> {
        current.max(self.delete_after(tier, end_date, created_at))
    }

    /// Tier and window `ev` would get under this policy, or `None` when neither
    /// moves. The tier only rises (registry lookup over every reporting source)
    /// and the window only grows.
    pub fn reapply(&self, ev: &CanonicalEvent) -> Option<(SourceTier, DateTime<Utc>)> {
        let tier = ev
            .sources
            .iter()
            .filter_map(|s| self.tier_for_source(s))
            .fold(ev.source_tier, SourceTier::max);
        let delete_after = self.escalate(ev.delete_after, tier, ev.end_date, ev.created_at);
        if tier == ev.source_tier && delete_after == ev.delete_after {
            None
        } else {
            Some((tier, delete_after))
        }
    }

    /// Reject tables without any tier entry.
    pub fn validate(self) -> Result<Self> {
        if self.tiers.is_empty() {
            return Err(anyhow!("retention policy has no tiers"));
        }
        Ok(self)
    }
}

/// Load a policy from an explicit path. Supports TOML or JSON.
pub fn load_policy_from(path: &Path) -> Result<RetentionPolicy> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading retention policy from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_policy(&content, ext.as_str())
}

/// Load the policy using env var + fallbacks:
/// 1) $RETENTION_POLICY_PATH
/// 2) config/retention.toml
/// 3) config/retention.json
/// 4) built-in defaults
pub fn load_policy_default() -> Result<RetentionPolicy> {
    if let Ok(p) = std::env::var(ENV_RETENTION_POLICY_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_policy_from(&pb);
        } else {
            return Err(anyhow!("RETENTION_POLICY_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/retention.toml");
    if toml_p.exists() {
        return load_policy_from(&toml_p);
    }
    let json_p = PathBuf::from("config/retention.json");
    if json_p.exists() {
        return load_policy_from(&json_p);
    }
    Ok(RetentionPolicy::default())
}

pub(crate) fn parse_policy(s: &str, hint_ext: &str) -> Result<RetentionPolicy> {
    let try_toml = hint_ext == "toml" || s.contains("[tiers");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return v.validate();
        }
    }
    if let Ok(v) = serde_json::from_str::<RetentionPolicy>(s) {
        return v.validate();
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return v.validate();
        }
    }
    Err(anyhow!("unsupported retention policy format"))
}

fn parse_toml(s: &str) -> Result<RetentionPolicy> {
    Ok(toml::from_str(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn default_windows_follow_tiers() {
        let p = RetentionPolicy::default();
        assert_eq!(p.retention_for(SourceTier::High).0, 7);
        assert_eq!(p.retention_for(SourceTier::Medium).0, 3);
        assert_eq!(p.retention_for(SourceTier::Low).0, 1);
        assert_eq!(p.fallback_tier(), SourceTier::Low);
    }

    #[test]
    fn delete_after_uses_later_of_end_and_created() {
        let p = RetentionPolicy::default();
        assert_eq!(p.delete_after(SourceTier::High, ts(15), ts(1)), ts(22));
        // Created after the event ended: window counts from creation.
        assert_eq!(p.delete_after(SourceTier::Low, ts(10), ts(12)), ts(13));
    }

    #[test]
    fn escalation_never_shortens() {
        let p = RetentionPolicy::default();
        let current = p.delete_after(SourceTier::High, ts(15), ts(1));
        let after_low = p.escalate(current, SourceTier::Low, ts(15), ts(1));
        assert_eq!(after_low, current);
    }

    fn stored(tier: SourceTier, end: DateTime<Utc>, created: DateTime<Utc>) -> CanonicalEvent {
        CanonicalEvent {
            id: "e1".into(),
            fingerprint: "fp".into(),
            title: "Pottery Class".into(),
            description: None,
            venue_name: "studio 1".into(),
            area: None,
            start_date: end,
            end_date: end,
            price_min: None,
            price_max: None,
            tags: Default::default(),
            booking_url: None,
            sources: Default::default(),
            source_tier: tier,
            status: crate::model::EventStatus::Active,
            created_at: created,
            updated_at: created,
            soft_deleted_at: None,
            hard_deleted_at: None,
            delete_after: created,
            quality_score: 0.0,
            alias_ids: Default::default(),
        }
    }

    #[test]
    fn reapply_only_ever_escalates() {
        let mut p = RetentionPolicy::default();
        let mut ev = stored(SourceTier::Medium, ts(15), ts(1));
        ev.sources.insert("meetup_dubai".into());
        ev.delete_after = p.delete_after(SourceTier::Medium, ts(15), ts(1));
        assert_eq!(p.reapply(&ev), None);

        // Longer medium window: the record escalates in place.
        p.tiers.get_mut(&SourceTier::Medium).unwrap().retention_days = 10;
        assert_eq!(p.reapply(&ev), Some((SourceTier::Medium, ts(25))));

        // Shorter window never shrinks a stored one.
        p.tiers.get_mut(&SourceTier::Medium).unwrap().retention_days = 1;
        assert_eq!(p.reapply(&ev), None);

        // Collector moved to the high tier in the registry.
        let mut p = RetentionPolicy::default();
        p.tiers.get_mut(&SourceTier::High).unwrap().sources.push("MEETUP_DUBAI".into());
        assert_eq!(p.reapply(&ev), Some((SourceTier::High, ts(22))));
    }

    #[test]
    fn unknown_tier_falls_back_with_warning() {
        let p = RetentionPolicy::default();
        let r = p.resolve_tier(Some("platinum"), "somewhere");
        assert_eq!(r.tier, SourceTier::Low);
        assert_eq!(r.retention_days, 1);
        assert_eq!(r.warning.unwrap().requested, "platinum");
    }

    #[test]
    fn registry_used_when_tier_absent() {
        let p = RetentionPolicy::default();
        let r = p.resolve_tier(None, "TimeOut_Dubai");
        assert_eq!(r.tier, SourceTier::High);
        assert!(r.warning.is_none());

        let unknown = p.resolve_tier(None, "random_blog");
        assert_eq!(unknown.tier, SourceTier::Low);
        assert!(unknown.warning.is_some());
    }

    #[test]
    fn missing_tier_entry_uses_shortest_window() {
        let mut p = RetentionPolicy::default();
        p.tiers.remove(&SourceTier::Medium);
        let r = p.resolve_tier(Some("medium"), "x");
        assert_eq!(r.tier, SourceTier::Low);
        assert_eq!(r.retention_days, 1);
        assert!(r.warning.is_some());
    }

    #[test]
    fn parses_toml_and_json() {
        let toml = r#"
[tiers.high]
retention_days = 10
rationale = "keep longer"
sources = ["a"]

[tiers.low]
retention_days = 2
"#;
        let p = parse_policy(toml, "toml").unwrap();
        assert_eq!(p.retention_for(SourceTier::High).0, 10);
        assert_eq!(p.fallback_tier(), SourceTier::Low);

        let json = r#"{"tiers":{"medium":{"retention_days":4}}}"#;
        let pj = parse_policy(json, "json").unwrap();
        assert_eq!(pj.retention_for(SourceTier::Medium).0, 4);
        // High is missing → falls back to medium (the only, hence shortest, entry).
        let (days, warn) = pj.retention_for(SourceTier::High);
        assert_eq!(days, 4);
        assert!(warn.is_some());

        assert!(parse_policy(r#"{"tiers":{}}"#, "json").is_err());
    }
}
