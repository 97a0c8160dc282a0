// src/lifecycle.rs
//! # Lifecycle Scheduler
//!
//! `run_cleanup` advances expired records through
//! ACTIVE → SOFT_DELETED → HARD_DELETED (tombstone). There is no timer loop;
//! an external scheduler calls it, possibly concurrently and repeatedly.
//!
//! - Soft phase: ACTIVE with `delete_after <= now`, ascending `delete_after`.
//! - Hard phase: SOFT_DELETED with `soft_deleted_at + grace <= now`, ascending `soft_deleted_at`.
//! - Each transition is a status-conditioned write in the store, so overlapping
//!   runs converge and a second run finds nothing to do.
//! - A cursor is checkpointed after every page; an interrupted run resumes
//!   after the last finished record. A finished phase clears its cursor.
//! - Purge: tombstones older than `tombstone_ttl_days` lose their body; only
//!   the alias → id entries survive, so replays stay idempotent.
//! - The whole call stops at the execution budget and reports `completed: false`.
//!
//! `run_source_cleanup_at` runs the soft phase for one collector only, with a
//! private cursor, for operators draining a source ahead of the regular run.

use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::LifecycleConfig;
use crate::engine::timed;
use crate::error::EngineResult;
use crate::store::{CleanupCursor, CleanupPhase, EventStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub soft_deleted: usize,
    pub hard_deleted: usize,
    /// Tombstone bodies dropped after their TTL.
    pub purged: usize,
    /// Per-record failures; they are retried by the next run.
    pub failed: usize,
    /// False when the budget ran out before both phases finished.
    pub completed: bool,
    pub duration_ms: u64,
}

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("cleanup_soft_deleted_total", "ACTIVE → SOFT_DELETED transitions.");
        describe_counter!("cleanup_hard_deleted_total", "SOFT_DELETED → HARD_DELETED transitions.");
        describe_counter!("cleanup_failed_total", "Per-record cleanup failures.");
        describe_counter!("cleanup_tombstones_purged_total", "Tombstone bodies purged after their TTL.");
        describe_histogram!("cleanup_duration_ms", "Wall time of one cleanup call.");
        describe_gauge!("lifecycle_last_cleanup_ts", "Unix time of the last finished cleanup call.");
    });
}

pub async fn run_cleanup_at(
    store: &dyn EventStore,
    cfg: &LifecycleConfig,
    timeout: Duration,
    now: DateTime<Utc>,
) -> EngineResult<CleanupReport> {
    ensure_metrics_described();
    let started = Instant::now();
    let deadline = started + cfg.budget();
    let mut report = CleanupReport {
        completed: true,
        ..Default::default()
    };

    for phase in [CleanupPhase::SoftDelete, CleanupPhase::HardDelete] {
        let finished = run_phase(store, phase, cfg, timeout, now, deadline, &mut report).await?;
        if !finished {
            report.completed = false;
            break;
        }
    }
    if report.completed {
        if let Some(ttl) = cfg.tombstone_ttl() {
            report.completed = purge(store, now - ttl, cfg, timeout, deadline, &mut report).await?;
        }
    }

    report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    histogram!("cleanup_duration_ms").record(report.duration_ms as f64);
    gauge!("lifecycle_last_cleanup_ts").set(now.timestamp() as f64);
    tracing::info!(
        target: "lifecycle",
        soft_deleted = report.soft_deleted,
        hard_deleted = report.hard_deleted,
        purged = report.purged,
        failed = report.failed,
        completed = report.completed,
        duration_ms = report.duration_ms,
        "cleanup finished"
    );
    Ok(report)
}

/// Returns `Ok(true)` when the phase drained, `Ok(false)` when the budget ran out.
async fn run_phase(
    store: &dyn EventStore,
    phase: CleanupPhase,
    cfg: &LifecycleConfig,
    timeout: Duration,
    now: DateTime<Utc>,
    deadline: Instant,
    report: &mut CleanupReport,
) -> EngineResult<bool> {
    let grace = cfg.grace_period();
    let cutoff = match phase {
        CleanupPhase::SoftDelete => now,
        CleanupPhase::HardDelete => now - grace,
    };
    let page_size = cfg.page_size.max(1);
    let mut cursor = timed("load_cursor", timeout, store.load_cursor(phase)).await?;
    if let Some(c) = &cursor {
        tracing::info!(target: "lifecycle", ?phase, after = %c.id, "resuming cleanup from checkpoint");
    }

    loop {
        if Instant::now() >= deadline {
            tracing::warn!(target: "lifecycle", ?phase, "cleanup budget exhausted");
            return Ok(false);
        }

        let page = timed(
            "due_page",
            timeout,
            store.due_page(phase, cutoff, cursor.as_ref(), page_size),
        )
        .await?;
        let Some(last) = page.last() else {
            timed("clear_cursor", timeout, store.clear_cursor(phase)).await?;
            return Ok(true);
        };

        for due in &page {
            let res = match phase {
                CleanupPhase::SoftDelete => {
                    timed("soft_delete", timeout, store.soft_delete_if_expired(&due.id, now)).await
                }
                CleanupPhase::HardDelete => {
                    timed("hard_delete", timeout, store.hard_delete_if_elapsed(&due.id, grace, now))
                        .await
                }
            };
            match res {
                Ok(true) => match phase {
                    CleanupPhase::SoftDelete => {
                        report.soft_deleted += 1;
                        counter!("cleanup_soft_deleted_total").increment(1);
                    }
                    CleanupPhase::HardDelete => {
                        report.hard_deleted += 1;
                        counter!("cleanup_hard_deleted_total").increment(1);
                    }
                },
                // A concurrent run (or a merge that extended the window) got there first.
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    counter!("cleanup_failed_total").increment(1);
                    tracing::warn!(target: "lifecycle", id = %due.id, ?phase, error = %e, "transition failed");
                }
            }
        }

        let next = CleanupCursor {
            phase,
            key: last.key,
            id: last.id.clone(),
        };
        timed("save_cursor", timeout, store.save_cursor(next.clone())).await?;
        cursor = Some(next);

        if page.len() < page_size {
            timed("clear_cursor", timeout, store.clear_cursor(phase)).await?;
            return Ok(true);
        }
    }
}

/// Purge tombstones hard-deleted at or before `cutoff`, page by page.
async fn purge(
    store: &dyn EventStore,
    cutoff: DateTime<Utc>,
    cfg: &LifecycleConfig,
    timeout: Duration,
    deadline: Instant,
    report: &mut CleanupReport,
) -> EngineResult<bool> {
    let page_size = cfg.page_size.max(1);
    loop {
        if Instant::now() >= deadline {
            tracing::warn!(target: "lifecycle", "cleanup budget exhausted during purge");
            return Ok(false);
        }
        let n = timed("purge_tombstones", timeout, store.purge_tombstones(cutoff, page_size)).await?;
        report.purged += n;
        counter!("cleanup_tombstones_purged_total").increment(n as u64);
        if n < page_size {
            return Ok(true);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCleanupReport {
    pub source: String,
    pub soft_deleted: usize,
    pub failed: usize,
    pub completed: bool,
}

/// Soft-delete every expired ACTIVE record reported by `source`.
pub async fn run_source_cleanup_at(
    store: &dyn EventStore,
    source: &str,
    cfg: &LifecycleConfig,
    timeout: Duration,
    now: DateTime<Utc>,
) -> EngineResult<SourceCleanupReport> {
    ensure_metrics_described();
    let deadline = Instant::now() + cfg.budget();
    let page_size = cfg.page_size.max(1);
    let mut report = SourceCleanupReport {
        source: source.trim().to_string(),
        ..Default::default()
    };
    let mut cursor: Option<CleanupCursor> = None;

    report.completed = loop {
        if Instant::now() >= deadline {
            break false;
        }
        let page = timed(
            "due_for_source",
            timeout,
            store.due_for_source(&report.source, now, cursor.as_ref(), page_size),
        )
        .await?;
        let Some(last) = page.last() else {
            break true;
        };
        for due in &page {
            match timed("soft_delete", timeout, store.soft_delete_if_expired(&due.id, now)).await {
                Ok(true) => {
                    report.soft_deleted += 1;
                    counter!("cleanup_soft_deleted_total").increment(1);
                }
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    counter!("cleanup_failed_total").increment(1);
                    tracing::warn!(target: "lifecycle", id = %due.id, source = %report.source, error = %e, "transition failed");
                }
            }
        }
        cursor = Some(CleanupCursor {
            phase: CleanupPhase::SoftDelete,
            key: last.key,
            id: last.id.clone(),
        });
        if page.len() < page_size {
            break true;
        }
    };

    tracing::info!(
        target: "lifecycle",
        source = %report.source,
        soft_deleted = report.soft_deleted,
        failed = report.failed,
        completed = report.completed,
        "source cleanup finished"
    );
    Ok(report)
}
