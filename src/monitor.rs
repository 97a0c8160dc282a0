// src/monitor.rs
//! # Health & Cost Monitor
//!
//! Read-only aggregation over a [`StoreCensus`] plus the ingest activity log.
//!
//! - `health_check`: record counts per status, overdue count, tier mix, and a
//!   `healthy | degraded` verdict (overdue above threshold, or high-tier share
//!   under the minimum while anything is active).
//! - `weekly_report`: per-source ingest counts, merge rate, average quality,
//!   cleanup efficiency, storage-cost estimate, alerts and recommendations.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use metrics::{describe_gauge, gauge};
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::activity::{ActivityTotals, SourceCounts};
use crate::config::MonitorConfig;
use crate::model::SourceTier;
use crate::store::StoreCensus;

const HIGH_EVENT_COUNT_ALERT: usize = 5_000;
const HIGH_EVENT_COUNT_HINT: usize = 3_000;
const OVERDUE_HINT: usize = 20;
const CLEANUP_GOOD_BELOW: usize = 10;
const MONTHLY_COST_TARGET_USD: f64 = 5.0;
const MIN_HIGH_TIER_SOURCES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub total_active: usize,
    pub total_soft_deleted: usize,
    /// Tombstones held plus tombstones already purged.
    pub total_hard_deleted: usize,
    pub purged_tombstones: usize,
    /// ACTIVE past `delete_after`; should stay near zero between cleanup runs.
    pub overdue_count: usize,
    pub tier_distribution: BTreeMap<SourceTier, usize>,
    pub high_tier_share: f32,
    pub parse_errors: u64,
    pub policy_warnings: u64,
    pub alerts: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanupEfficiency {
    pub overdue: usize,
    /// SOFT_DELETED whose grace period has elapsed.
    pub pending_hard_delete: usize,
    /// Soft-deleted inside the report window.
    pub recently_soft_deleted: usize,
    /// `good` or `needs_attention`.
    pub verdict: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostEstimate {
    pub stored_records: usize,
    pub storage_gb: f64,
    pub monthly_usd: f64,
    pub usd_per_event: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyReport {
    pub generated_at: DateTime<Utc>,
    pub window_days: u32,
    pub sources: BTreeMap<String, SourceCounts>,
    pub totals: SourceCounts,
    pub merge_rate: f32,
    pub total_active: usize,
    pub average_quality: f32,
    pub tier_distribution: BTreeMap<SourceTier, usize>,
    pub cleanup: CleanupEfficiency,
    pub cost: CostEstimate,
    pub alerts: Vec<String>,
    pub recommendations: Vec<String>,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_gauge!("events_active", "ACTIVE canonical events at the last health check.");
        describe_gauge!("events_overdue", "ACTIVE events past delete_after at the last health check.");
    });
}

fn share(part: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        part as f32 / total as f32
    }
}

fn health_alerts(c: &StoreCensus, cfg: &MonitorConfig) -> Vec<String> {
    let mut alerts = Vec::new();
    if c.overdue > cfg.overdue_threshold {
        alerts.push(format!(
            "{} events overdue for deletion - check the cleanup trigger",
            c.overdue
        ));
    }
    let high = c.tiers.get(&SourceTier::High).copied().unwrap_or(0);
    if c.active > 0 && share(high, c.active) < cfg.min_high_tier_share {
        alerts.push(format!(
            "high-tier share {:.0}% below {:.0}% - review source strategy",
            share(high, c.active) * 100.0,
            cfg.min_high_tier_share * 100.0
        ));
    }
    if c.active > HIGH_EVENT_COUNT_ALERT {
        alerts.push("High event count - consider more aggressive cleanup".to_string());
    }
    alerts
}

pub fn health_check(
    c: &StoreCensus,
    totals: ActivityTotals,
    cfg: &MonitorConfig,
    now: DateTime<Utc>,
) -> HealthReport {
    ensure_metrics_described();
    let high = c.tiers.get(&SourceTier::High).copied().unwrap_or(0);
    let high_share = share(high, c.active);
    let degraded = c.overdue > cfg.overdue_threshold
        || (c.active > 0 && high_share < cfg.min_high_tier_share);

    gauge!("events_active").set(c.active as f64);
    gauge!("events_overdue").set(c.overdue as f64);

    let status = if degraded {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };
    tracing::info!(
        target: "monitor",
        ?status,
        active = c.active,
        overdue = c.overdue,
        high_share,
        "health check"
    );

    HealthReport {
        status,
        total_active: c.active,
        total_soft_deleted: c.soft_deleted,
        total_hard_deleted: c.hard_deleted + c.purged,
        purged_tombstones: c.purged,
        overdue_count: c.overdue,
        high_tier_share: high_share,
        alerts: health_alerts(c, cfg),
        tier_distribution: c.tiers.clone(),
        parse_errors: totals.parse_errors,
        policy_warnings: totals.policy_warnings,
        checked_at: now,
    }
}

pub fn storage_cost(stored_records: usize, active: usize, cfg: &MonitorConfig) -> CostEstimate {
    let bytes = stored_records as f64 * cfg.bytes_per_event as f64;
    let storage_gb = bytes / (1024.0 * 1024.0 * 1024.0);
    let monthly_usd = storage_gb * cfg.usd_per_gb_month;
    CostEstimate {
        stored_records,
        storage_gb,
        monthly_usd,
        usd_per_event: if active > 0 {
            monthly_usd / active as f64
        } else {
            0.0
        },
    }
}

/// `c` must be taken with `since` at the start of the report window.
pub fn weekly_report(
    c: &StoreCensus,
    counts: &BTreeMap<String, SourceCounts>,
    cfg: &MonitorConfig,
    now: DateTime<Utc>,
) -> WeeklyReport {
    let mut totals = SourceCounts::default();
    for sc in counts.values() {
        totals.submitted += sc.submitted;
        totals.merged += sc.merged;
        totals.created += sc.created;
        totals.quarantined += sc.quarantined;
        totals.failed += sc.failed;
    }
    let resolved = totals.merged + totals.created;
    let merge_rate = if resolved == 0 {
        0.0
    } else {
        totals.merged as f32 / resolved as f32
    };

    let cleanup = CleanupEfficiency {
        overdue: c.overdue,
        pending_hard_delete: c.pending_hard_delete,
        recently_soft_deleted: c.recently_soft_deleted,
        verdict: if c.overdue < CLEANUP_GOOD_BELOW {
            "good"
        } else {
            "needs_attention"
        },
    };

    // Tombstones hold no content; count what still occupies a full document.
    let cost = storage_cost(c.active + c.soft_deleted, c.active, cfg);

    let mut recommendations = Vec::new();
    if c.active > HIGH_EVENT_COUNT_HINT {
        recommendations.push("Consider more aggressive cleanup for low-priority sources".to_string());
    }
    if c.overdue > OVERDUE_HINT {
        recommendations.push("Cleanup is falling behind - run it more often or raise its budget".to_string());
    }
    if cost.monthly_usd > MONTHLY_COST_TARGET_USD {
        recommendations.push("Storage costs exceeding target - review retention policies".to_string());
    }
    if c.high_tier_sources.len() < MIN_HIGH_TIER_SOURCES {
        recommendations.push(
            "Consider promoting more sources to high priority for better coverage".to_string(),
        );
    }

    let average_quality = if c.active == 0 {
        0.0
    } else {
        (c.quality_sum / c.active as f64) as f32
    };

    tracing::info!(
        target: "monitor",
        submitted = totals.submitted,
        merge_rate,
        active = c.active,
        monthly_usd = cost.monthly_usd,
        "weekly report"
    );

    WeeklyReport {
        generated_at: now,
        window_days: cfg.report_window_days,
        sources: counts.clone(),
        merge_rate,
        total_active: c.active,
        average_quality,
        alerts: health_alerts(c, cfg),
        tier_distribution: c.tiers.clone(),
        totals,
        cleanup,
        cost,
        recommendations,
    }
}
