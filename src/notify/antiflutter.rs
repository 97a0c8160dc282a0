// src/notify/antiflutter.rs
use chrono::{DateTime, Duration as ChronoDuration, Utc};

use super::NoticeKind;

/// Cooldown gate so a persistently degraded store does not page every check.
/// - First alert always allowed.
/// - Inside cooldown, alerts of the same kind are suppressed.
/// - `try_claim` reserves the slot before sending; `release` hands it back
///   when delivery failed.
#[derive(Debug, Clone, Default)]
pub struct AntiFlutter {
    cooldown: ChronoDuration,
    last_alert_ts: Option<DateTime<Utc>>,
    last_kind: Option<NoticeKind>,
}

impl AntiFlutter {
    /// `cooldown_secs` < 0 is treated as 0 (no cooldown).
    pub fn new(cooldown_secs: i64) -> Self {
        Self {
            cooldown: ChronoDuration::seconds(cooldown_secs.max(0)),
            last_alert_ts: None,
            last_kind: None,
        }
    }

    /// Check if we may alert at `now` for `kind`. Does NOT mutate state.
    pub fn should_alert(&self, kind: NoticeKind, now: DateTime<Utc>) -> bool {
        match (self.last_alert_ts, self.last_kind) {
            (Some(ts), Some(last)) if last == kind => now.signed_duration_since(ts) >= self.cooldown,
            _ => true,
        }
    }

    pub fn record_alert(&mut self, kind: NoticeKind, now: DateTime<Utc>) {
        self.last_alert_ts = Some(now);
        self.last_kind = Some(kind);
    }

    /// Reserve the slot for `kind` at `now`. `None` while cooling down.
    pub fn try_claim(&mut self, kind: NoticeKind, now: DateTime<Utc>) -> Option<Claim> {
        if !self.should_alert(kind, now) {
            return None;
        }
        let claim = Claim {
            kind,
            at: now,
            prev_ts: self.last_alert_ts,
            prev_kind: self.last_kind,
        };
        self.record_alert(kind, now);
        Some(claim)
    }

    /// Undo `claim` unless a later alert already replaced it.
    pub fn release(&mut self, claim: Claim) {
        if self.last_alert_ts == Some(claim.at) && self.last_kind == Some(claim.kind) {
            self.last_alert_ts = claim.prev_ts;
            self.last_kind = claim.prev_kind;
        }
    }
}

/// A reserved alert slot plus the state it replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    kind: NoticeKind,
    at: DateTime<Utc>,
    prev_ts: Option<DateTime<Utc>>,
    prev_kind: Option<NoticeKind>,
}
