// src/config/mod.rs
//! Engine configuration (`config/lifecycle.toml`).
//!
//! Resolution:
//! 1) `$LIFECYCLE_CONFIG_PATH` (must exist)
//! 2) `config/lifecycle.toml` (optional)
//! 3) built-in defaults
//!
//! `DEDUP_THRESHOLD` overrides `[matching].threshold`, clamped to `0.0..=1.0`.

use std::fs;
use std::path::PathBuf;
use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::matcher::MatchConfig;

pub const ENV_LIFECYCLE_CONFIG_PATH: &str = "LIFECYCLE_CONFIG_PATH";
pub const DEFAULT_LIFECYCLE_CONFIG_PATH: &str = "config/lifecycle.toml";
pub const ENV_DEDUP_THRESHOLD: &str = "DEDUP_THRESHOLD";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub matching: MatchConfig,
    pub lifecycle: LifecycleConfig,
    pub monitor: MonitorConfig,
    pub store: StoreConfig,
    pub ingest: IngestConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// SOFT_DELETED → HARD_DELETED delay.
    pub grace_period_hours: u32,
    /// Wall-clock budget for one `run_cleanup` call.
    pub budget_secs: u64,
    /// Records per cleanup page; the cursor is checkpointed after each page.
    pub page_size: usize,
    /// Days a tombstone is kept in full before its body is purged. 0 keeps them.
    pub tombstone_ttl_days: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            grace_period_hours: 24,
            budget_secs: 300,
            page_size: 500,
            tombstone_ttl_days: 30,
        }
    }
}

impl LifecycleConfig {
    pub fn grace_period(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.grace_period_hours))
    }

    pub fn budget(&self) -> StdDuration {
        StdDuration::from_secs(self.budget_secs)
    }

    pub fn tombstone_ttl(&self) -> Option<chrono::Duration> {
        (self.tombstone_ttl_days > 0).then(|| chrono::Duration::days(i64::from(self.tombstone_ttl_days)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub overdue_threshold: usize,
    pub min_high_tier_share: f32,
    pub report_window_days: u32,
    pub bytes_per_event: u64,
    pub usd_per_gb_month: f64,
    /// Cooldown between two delivered degraded-health alerts.
    pub alert_cooldown_secs: i64,
    /// Per-request timeout for webhook deliveries.
    pub webhook_timeout_secs: u64,
    /// Attempts per webhook delivery, with exponential backoff in between.
    pub webhook_retries: u8,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            overdue_threshold: 50,
            min_high_tier_share: 0.40,
            report_window_days: 7,
            bytes_per_event: 5 * 1024,
            usd_per_gb_month: 0.25,
            alert_cooldown_secs: 6 * 3600,
            webhook_timeout_secs: 5,
            webhook_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Per-call timeout for every store operation.
    pub timeout_ms: u64,
    /// Optimistic-concurrency attempts before a merge conflict surfaces.
    pub max_merge_attempts: u32,
    /// Extra passes over timed-out batch items before handing them back.
    pub requeue_passes: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2_000,
            max_merge_attempts: 5,
            requeue_passes: 1,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> StdDuration {
        StdDuration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub quarantine_capacity: usize,
    pub venues_path: String,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            quarantine_capacity: 1_000,
            venues_path: "config/venues.json".into(),
        }
    }
}

// parse optional float env and clamp to <0.0..=1.0>
fn parse_threshold_env(raw: Option<String>) -> Option<f32> {
    raw.and_then(|s| s.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
}

impl EngineConfig {
    /// Load using env var + fallbacks, then apply `DEDUP_THRESHOLD`.
    pub fn from_toml() -> Result<Self> {
        let explicit = std::env::var(ENV_LIFECYCLE_CONFIG_PATH).ok().map(PathBuf::from);
        let mut cfg = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(anyhow!(
                        "LIFECYCLE_CONFIG_PATH points to non-existent path {}",
                        path.display()
                    ));
                }
                Self::from_path(&path)?
            }
            None => {
                let path = PathBuf::from(DEFAULT_LIFECYCLE_CONFIG_PATH);
                if path.exists() {
                    Self::from_path(&path)?
                } else {
                    Self::default()
                }
            }
        };

        if let Some(t) = parse_threshold_env(std::env::var(ENV_DEDUP_THRESHOLD).ok()) {
            cfg.matching.threshold = t;
        }
        Ok(cfg)
    }

    pub fn from_path(path: &std::path::Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading engine config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing engine config at {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: EngineConfig = toml::from_str(s)?;
        cfg.matching = cfg.matching.sanitized();
        cfg.lifecycle.page_size = cfg.lifecycle.page_size.max(1);
        cfg.store.max_merge_attempts = cfg.store.max_merge_attempts.max(1);
        if !(0.0..=1.0).contains(&cfg.monitor.min_high_tier_share) {
            cfg.monitor.min_high_tier_share = MonitorConfig::default().min_high_tier_share;
        }
        Ok(cfg)
    }
}
