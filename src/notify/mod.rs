// src/notify/mod.rs
//! Delivery of weekly reports and degraded-health alerts to chat webhooks.
//!
//! Channels are enabled by env (`SLACK_WEBHOOK_URL`, `DISCORD_WEBHOOK_URL`).
//! Delivery failures are logged and never propagate to lifecycle operations.

pub mod antiflutter;
pub mod discord;
pub mod slack;

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::MonitorConfig;
use crate::monitor::{HealthReport, HealthStatus, WeeklyReport};
use antiflutter::AntiFlutter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    WeeklyReport,
    HealthDegraded,
}

/// Channel-agnostic message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub title: String,
    pub lines: Vec<String>,
    pub ts: DateTime<Utc>,
}

impl Notice {
    pub fn from_health(h: &HealthReport) -> Self {
        let mut lines = vec![
            format!("active {} / overdue {}", h.total_active, h.overdue_count),
            format!("high-tier share {:.0}%", h.high_tier_share * 100.0),
        ];
        lines.extend(h.alerts.iter().cloned());
        Self {
            kind: NoticeKind::HealthDegraded,
            title: "Event store degraded".into(),
            lines,
            ts: h.checked_at,
        }
    }

    pub fn from_weekly(r: &WeeklyReport) -> Self {
        let mut lines = vec![
            format!(
                "submitted {} / merged {} / created {} / quarantined {}",
                r.totals.submitted, r.totals.merged, r.totals.created, r.totals.quarantined
            ),
            format!("merge rate {:.0}%", r.merge_rate * 100.0),
            format!("active {} (avg quality {:.2})", r.total_active, r.average_quality),
            format!(
                "storage ≈ {:.4} GB, ${:.2}/month",
                r.cost.storage_gb, r.cost.monthly_usd
            ),
        ];
        lines.extend(r.alerts.iter().map(|a| format!("alert: {a}")));
        lines.extend(r.recommendations.iter().map(|a| format!("hint: {a}")));
        Self {
            kind: NoticeKind::WeeklyReport,
            title: format!("Weekly event lifecycle report ({} days)", r.window_days),
            lines,
            ts: r.generated_at,
        }
    }

    /// Plain-text body shared by the chat channels.
    pub fn render_text(&self) -> String {
        let mut out = format!("*{}*", self.title);
        for l in &self.lines {
            out.push_str("\n• ");
            out.push_str(l);
        }
        out.push_str(&format!("\n@ {}", self.ts.to_rfc3339()));
        out
    }
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn send(&self, notice: &Notice) -> Result<()>;
}

/// Keeps delivered notices in memory. Used by tests and as a no-op channel.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notice>>,
}

impl MemoryNotifier {
    pub fn sent(&self) -> Vec<Notice> {
        self.sent.lock().clone()
    }
}

#[async_trait::async_trait]
impl Notifier for MemoryNotifier {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        self.sent.lock().push(notice.clone());
        Ok(())
    }
}

/// Fan-out over all enabled channels, with a cooldown gate on health alerts.
pub struct NotifierMux {
    channels: Vec<Arc<dyn Notifier>>,
    gate: Mutex<AntiFlutter>,
}

impl NotifierMux {
    pub fn new(channels: Vec<Arc<dyn Notifier>>, cooldown_secs: i64) -> Self {
        Self {
            channels,
            gate: Mutex::new(AntiFlutter::new(cooldown_secs)),
        }
    }

    /// Slack/Discord channels for whichever webhook env vars are set.
    pub fn from_env(cfg: &MonitorConfig) -> Self {
        Self::from_channels(slack::SlackNotifier::from_env(), discord::DiscordNotifier::from_env(), cfg)
    }

    /// Apply the configured webhook timeout and retry count to each channel.
    pub fn from_channels(
        slack: Option<slack::SlackNotifier>,
        discord: Option<discord::DiscordNotifier>,
        cfg: &MonitorConfig,
    ) -> Self {
        let mut channels: Vec<Arc<dyn Notifier>> = Vec::new();
        if let Some(s) = slack {
            channels.push(Arc::new(
                s.with_timeout(cfg.webhook_timeout_secs)
                    .with_retries(cfg.webhook_retries),
            ));
        }
        if let Some(d) = discord {
            channels.push(Arc::new(
                d.with_timeout(cfg.webhook_timeout_secs)
                    .with_retries(cfg.webhook_retries),
            ));
        }
        Self::new(channels, cfg.alert_cooldown_secs)
    }

    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }

    pub fn is_enabled(&self) -> bool {
        !self.channels.is_empty()
    }

    /// Send to every channel; returns how many accepted it.
    pub async fn notify(&self, notice: &Notice) -> usize {
        let mut ok = 0;
        for ch in &self.channels {
            match ch.send(notice).await {
                Ok(()) => ok += 1,
                Err(e) => tracing::warn!(
                    target: "monitor",
                    channel = ch.name(),
                    error = ?e,
                    "notice delivery failed"
                ),
            }
        }
        ok
    }

    /// Deliver an alert for a degraded health check, at most once per cooldown.
    /// Returns true when the alert went out.
    pub async fn alert_on_health(&self, h: &HealthReport) -> bool {
        if h.status != HealthStatus::Degraded || !self.is_enabled() {
            return false;
        }
        // Reserved before the send so concurrent checks cannot both pass.
        let claim = self.gate.lock().try_claim(NoticeKind::HealthDegraded, h.checked_at);
        let Some(claim) = claim else {
            tracing::debug!(target: "monitor", "degraded alert suppressed by cooldown");
            return false;
        };
        let sent = self.notify(&Notice::from_health(h)).await > 0;
        if !sent {
            self.gate.lock().release(claim);
        }
        sent
    }

    pub async fn deliver_weekly(&self, r: &WeeklyReport) -> usize {
        self.notify(&Notice::from_weekly(r)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityTotals;
    use crate::monitor::health_check;
    use crate::store::StoreCensus;
    use chrono::{Duration, TimeZone};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Takes a while to deliver and can be switched to fail.
    #[derive(Default)]
    struct SlowNotifier {
        sent: MemoryNotifier,
        down: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Notifier for SlowNotifier {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, notice: &Notice) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            if self.down.load(Ordering::SeqCst) {
                return Err(anyhow::anyhow!("webhook unreachable"));
            }
            self.sent.send(notice).await
        }
    }

    fn degraded(at: DateTime<Utc>) -> HealthReport {
        let mut h = health_check(&StoreCensus::new(), ActivityTotals::default(), &MonitorConfig::default(), at);
        h.status = HealthStatus::Degraded;
        h
    }

    #[tokio::test]
    async fn health_alerts_respect_cooldown() {
        let mem = Arc::new(MemoryNotifier::default());
        let mux = NotifierMux::new(vec![mem.clone()], 3600);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

        assert!(mux.alert_on_health(&degraded(t0)).await);
        assert!(!mux.alert_on_health(&degraded(t0 + Duration::minutes(10))).await);
        assert!(mux.alert_on_health(&degraded(t0 + Duration::hours(2))).await);
        assert_eq!(mem.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_checks_send_a_single_alert() {
        let slow = Arc::new(SlowNotifier::default());
        let mux = NotifierMux::new(vec![slow.clone()], 3600);
        let h = degraded(Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap());

        let (a, b) = tokio::join!(mux.alert_on_health(&h), mux.alert_on_health(&h));
        assert!(a != b, "exactly one caller delivers");
        assert_eq!(slow.sent.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_frees_the_slot() {
        let slow = Arc::new(SlowNotifier::default());
        slow.down.store(true, Ordering::SeqCst);
        let mux = NotifierMux::new(vec![slow.clone()], 3600);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();

        assert!(!mux.alert_on_health(&degraded(t0)).await);
        slow.down.store(false, Ordering::SeqCst);
        assert!(mux.alert_on_health(&degraded(t0 + Duration::minutes(1))).await);
        assert_eq!(slow.sent.sent().len(), 1);
    }

    #[test]
    fn configured_webhooks_become_channels() {
        let cfg = MonitorConfig::default();
        let mux = NotifierMux::from_channels(
            Some(slack::SlackNotifier::new("https://hooks.slack.test/x".into())),
            Some(discord::DiscordNotifier::new("https://discord.test/api/webhooks/1".into())),
            &cfg,
        );
        assert_eq!(mux.channel_names(), vec!["slack", "discord"]);
        assert!(!NotifierMux::from_channels(None, None, &cfg).is_enabled());
    }

    #[tokio::test]
    async fn healthy_reports_are_not_sent() {
        let mem = Arc::new(MemoryNotifier::default());
        let mux = NotifierMux::new(vec![mem.clone()], 0);
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
        let h = health_check(&StoreCensus::new(), ActivityTotals::default(), &MonitorConfig::default(), t0);
        assert!(!mux.alert_on_health(&h).await);
        assert!(mem.sent().is_empty());
    }

    #[test]
    fn text_render_lists_lines() {
        let n = Notice {
            kind: NoticeKind::WeeklyReport,
            title: "Weekly".into(),
            lines: vec!["a".into(), "b".into()],
            ts: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        };
        let t = n.render_text();
        assert!(t.starts_with("*Weekly*"));
        assert!(t.contains("\n• a\n• b"));
    }
}
