//! # Ingest Activity
//! Sliding log of ingestion outcomes plus a bounded quarantine list.
//!
//! Feeds the weekly report (per-source counts, merge rate) and the health
//! check (parse errors, policy warnings). Informational only; nothing here
//! influences matching or retention.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

/// How one submission ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestKind {
    Merged,
    Created,
    Quarantined,
    /// Store timeout or exhausted merge retries.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub submitted: u64,
    pub merged: u64,
    pub created: u64,
    pub quarantined: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuarantineEntry {
    pub at: DateTime<Utc>,
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<String>,
    pub field: String,
    pub reason: String,
}

/// Lifetime counters surfaced by the health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTotals {
    pub parse_errors: u64,
    pub policy_warnings: u64,
    /// Submissions folded into an existing record at ingestion.
    pub merged: u64,
    /// Records absorbed by duplicate sweeps.
    pub absorbed: u64,
}

#[derive(Debug)]
pub struct ActivityLog {
    inner: Mutex<Inner>,
    /// Entries older than this are discarded on write.
    keep: Duration,
    quarantine_cap: usize,
}

#[derive(Debug, Default)]
struct Inner {
    /// `(at, source, kind)` in arrival order.
    buf: VecDeque<(DateTime<Utc>, String, IngestKind)>,
    quarantine: VecDeque<QuarantineEntry>,
    totals: ActivityTotals,
}

impl ActivityLog {
    pub fn new(keep: Duration, quarantine_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            keep,
            quarantine_cap: quarantine_cap.clamp(1, 100_000),
        }
    }

    /// Two report windows of history, 1000 quarantined items.
    pub fn with_report_window(days: u32) -> Self {
        Self::new(Duration::days(i64::from(days.max(1)) * 2), 1_000)
    }

    pub fn record(&self, source: &str, kind: IngestKind, at: DateTime<Utc>) {
        let cutoff = at - self.keep;
        let mut inner = self.inner.lock();
        if kind == IngestKind::Merged {
            inner.totals.merged += 1;
        }
        inner.buf.push_back((at, source.to_string(), kind));
        while let Some((t, _, _)) = inner.buf.front() {
            if *t < cutoff {
                inner.buf.pop_front();
            } else {
                break;
            }
        }
    }

    pub fn quarantine(&self, entry: QuarantineEntry) {
        let mut inner = self.inner.lock();
        inner.totals.parse_errors += 1;
        inner.quarantine.push_back(entry);
        while inner.quarantine.len() > self.quarantine_cap {
            inner.quarantine.pop_front();
        }
    }

    pub fn policy_warning(&self) {
        self.inner.lock().totals.policy_warnings += 1;
    }

    pub fn absorbed(&self, n: usize) {
        self.inner.lock().totals.absorbed += n as u64;
    }

    pub fn totals(&self) -> ActivityTotals {
        self.inner.lock().totals
    }

    /// Most recent `n` quarantined submissions, oldest first.
    pub fn quarantined_last_n(&self, n: usize) -> Vec<QuarantineEntry> {
        let inner = self.inner.lock();
        let start = inner.quarantine.len().saturating_sub(n);
        inner.quarantine.iter().skip(start).cloned().collect()
    }

    /// Per-source counts for entries at or after `since`.
    pub fn counts_since(&self, since: DateTime<Utc>) -> BTreeMap<String, SourceCounts> {
        let inner = self.inner.lock();
        let mut out: BTreeMap<String, SourceCounts> = BTreeMap::new();
        for (at, source, kind) in inner.buf.iter().rev() {
            if *at < since {
                break;
            }
            let c = out.entry(source.clone()).or_default();
            c.submitted += 1;
            match kind {
                IngestKind::Merged => c.merged += 1,
                IngestKind::Created => c.created += 1,
                IngestKind::Quarantined => c.quarantined += 1,
                IngestKind::Failed => c.failed += 1,
            }
        }
        out
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_report_window(7)
    }
}
