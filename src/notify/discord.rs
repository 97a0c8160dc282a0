use super::{Notice, NoticeKind, Notifier};
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Clone)]
pub struct DiscordNotifier {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
}

impl DiscordNotifier {
    /// `None` when `DISCORD_WEBHOOK_URL` is unset or empty.
    pub fn from_env() -> Option<Self> {
        std::env::var("DISCORD_WEBHOOK_URL")
            .ok()
            .filter(|u| !u.trim().is_empty())
            .map(Self::new)
    }

    pub fn new(webhook: String) -> Self {
        Self {
            webhook,
            client: Client::new(),
            timeout: Duration::from_secs(5),
            max_retries: 3,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries.max(1);
        self
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    fn name(&self) -> &'static str {
        "discord"
    }

    async fn send(&self, notice: &Notice) -> Result<()> {
        let payload = DiscordWebhookPayload::from_notice(notice);

        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await;

            match res {
                Ok(rsp) => {
                    if let Err(e) = rsp.error_for_status_ref() {
                        if attempt < self.max_retries {
                            tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                            continue;
                        }
                        return Err(anyhow!("Discord webhook HTTP error: {e}"));
                    }
                    return Ok(());
                }
                Err(e) => {
                    if attempt < self.max_retries {
                        tokio::time::sleep(Duration::from_millis(500u64 << (attempt - 1))).await;
                        continue;
                    }
                    return Err(anyhow!("Discord webhook request failed: {e}"));
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct DiscordEmbed {
    title: String,
    description: String,
    color: u32,
}

#[derive(Debug, Serialize)]
struct DiscordWebhookPayload {
    content: Option<String>,
    embeds: Vec<DiscordEmbed>,
}

impl DiscordWebhookPayload {
    fn from_notice(n: &Notice) -> Self {
        let description = if n.lines.is_empty() {
            "(no details)".to_string()
        } else {
            n.lines.join("\n")
        };
        let color = match n.kind {
            NoticeKind::HealthDegraded => 0xE0_4F_3F,
            NoticeKind::WeeklyReport => 0x3F_7F_E0,
        };
        Self {
            content: None,
            embeds: vec![DiscordEmbed {
                title: n.title.clone(),
                description: format!("{description}\n**Time (UTC):** {}", n.ts.to_rfc3339()),
                color,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn retries_never_drop_below_one() {
        let d = DiscordNotifier::new("https://discord.test/api/webhooks/1".into())
            .with_timeout(2)
            .with_retries(0);
        assert_eq!((d.timeout, d.max_retries), (Duration::from_secs(2), 1));
    }

    #[test]
    fn embed_carries_title_and_lines() {
        let n = Notice {
            kind: NoticeKind::HealthDegraded,
            title: "Event store degraded".into(),
            lines: vec!["active 3 / overdue 60".into()],
            ts: Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
        };
        let v = serde_json::to_value(DiscordWebhookPayload::from_notice(&n)).unwrap();
        assert_eq!(v["embeds"][0]["title"], "Event store degraded");
        assert!(v["embeds"][0]["description"]
            .as_str()
            .unwrap()
            .starts_with("active 3 / overdue 60"));
    }
}
