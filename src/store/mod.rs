// src/store/mod.rs
//! # Event Store
//!
//! Persistence seam for canonical events. Every write is conditional:
//! - inserts check a [`ClusterSnapshot`] taken when candidates were read,
//! - content updates compare-and-set on the record version,
//! - lifecycle transitions are conditioned on the current status and expiry.
//!
//! The engine wraps each call in a timeout, so implementations may block on I/O.

mod memory;

pub use memory::InMemoryStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::{CanonicalEvent, EventFilter, EventStatus, SourceTier};
use crate::retention::RetentionPolicy;

/// A stored record plus its monotonically increasing version.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub record: T,
    pub version: u64,
}

/// Versions of every date bucket read while gathering candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterSnapshot {
    pub buckets: BTreeMap<NaiveDate, u64>,
}

/// Bounded candidate lookup around one date bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateQuery {
    pub bucket: NaiveDate,
    pub window_days: u32,
    pub area: Option<String>,
    pub fingerprint: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Default)]
pub struct CandidateSet {
    pub candidates: Vec<Versioned<CanonicalEvent>>,
    pub snapshot: ClusterSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPhase {
    /// ACTIVE → SOFT_DELETED, keyed by `delete_after`.
    SoftDelete,
    /// SOFT_DELETED → HARD_DELETED, keyed by `soft_deleted_at`.
    HardDelete,
}

/// Position of the last record a cleanup phase finished with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupCursor {
    pub phase: CleanupPhase,
    pub key: DateTime<Utc>,
    pub id: String,
}

/// One due record in cleanup order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueRecord {
    pub key: DateTime<Utc>,
    pub id: String,
}

/// Position in `(date bucket, id)` order for full scans over ACTIVE records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor {
    pub bucket: NaiveDate,
    pub id: String,
}

/// Instants the census is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CensusQuery {
    pub now: DateTime<Utc>,
    /// SOFT_DELETED → HARD_DELETED delay, for `pending_hard_delete`.
    pub grace: Duration,
    /// Start of the reporting window, for `recently_soft_deleted`.
    pub since: DateTime<Utc>,
}

/// Aggregate counts over the whole store, computed without copying records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreCensus {
    pub active: usize,
    pub soft_deleted: usize,
    /// Tombstones still held in full.
    pub hard_deleted: usize,
    /// Tombstones whose body was purged; only their alias entries remain.
    pub purged: usize,
    pub overdue: usize,
    pub tiers: BTreeMap<SourceTier, usize>,
    pub quality_sum: f64,
    pub pending_hard_delete: usize,
    pub recently_soft_deleted: usize,
    /// Collectors behind ACTIVE high-tier records.
    pub high_tier_sources: BTreeSet<String>,
}

impl StoreCensus {
    pub fn new() -> Self {
        Self {
            tiers: SourceTier::ALL.iter().map(|t| (*t, 0)).collect(),
            ..Default::default()
        }
    }

    /// Fold one record into the counts.
    pub fn tally(&mut self, ev: &CanonicalEvent, q: &CensusQuery) {
        match ev.status {
            EventStatus::Active => {
                self.active += 1;
                self.quality_sum += f64::from(ev.quality_score);
                *self.tiers.entry(ev.source_tier).or_insert(0) += 1;
                if ev.is_overdue(q.now) {
                    self.overdue += 1;
                }
                if ev.source_tier == SourceTier::High {
                    self.high_tier_sources.extend(ev.sources.iter().cloned());
                }
            }
            EventStatus::SoftDeleted => {
                self.soft_deleted += 1;
                if ev.soft_deleted_at.is_some_and(|at| at + q.grace <= q.now) {
                    self.pending_hard_delete += 1;
                }
            }
            EventStatus::HardDeleted => self.hard_deleted += 1,
        }
        if ev.soft_deleted_at.is_some_and(|at| at >= q.since) {
            self.recently_soft_deleted += 1;
        }
    }

    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a CanonicalEvent>, q: &CensusQuery) -> Self {
        let mut c = Self::new();
        for ev in events {
            c.tally(ev, q);
        }
        c
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Versioned<CanonicalEvent>>, StoreError>;

    /// Canonical id that already owns `submission_id`, if any.
    async fn alias_owner(&self, submission_id: &str) -> Result<Option<String>, StoreError>;

    /// ACTIVE events within `±window_days` of the bucket whose area is equal
    /// or unknown on either side, same-fingerprint records first, at most `limit`.
    async fn candidates(&self, query: &CandidateQuery) -> Result<CandidateSet, StoreError>;

    /// Insert a new record unless any bucket in `snapshot` changed since it was
    /// taken or one of its alias ids is already owned. Returns the new version.
    async fn insert_if_unchanged(
        &self,
        event: CanonicalEvent,
        snapshot: &ClusterSnapshot,
    ) -> Result<u64, StoreError>;

    /// Replace a record if its stored version still equals `expected_version`.
    async fn update_if_version(
        &self,
        event: CanonicalEvent,
        expected_version: u64,
    ) -> Result<u64, StoreError>;

    /// Replace `survivor` and drop `absorbed_id` in one step, if both versions
    /// are unchanged. Aliases of the absorbed record move to the survivor.
    async fn absorb_if_versions(
        &self,
        survivor: CanonicalEvent,
        survivor_version: u64,
        absorbed_id: &str,
        absorbed_version: u64,
    ) -> Result<u64, StoreError>;

    /// ACTIVE records strictly after `after` in `(date bucket, id)` order.
    async fn active_page(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Versioned<CanonicalEvent>>, StoreError>;

    /// Due records for `phase` strictly after `after` in `(key, id)` order.
    async fn due_page(
        &self,
        phase: CleanupPhase,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError>;

    /// Like `due_page` for the soft phase, restricted to records reported by `source`.
    async fn due_for_source(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError>;

    /// ACTIVE → SOFT_DELETED iff still ACTIVE and `delete_after <= now`.
    async fn soft_delete_if_expired(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// SOFT_DELETED → HARD_DELETED (tombstone) iff `soft_deleted_at + grace <= now`.
    async fn hard_delete_if_elapsed(
        &self,
        id: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Drop the bodies of up to `limit` tombstones hard-deleted at or before
    /// `cutoff`. Alias ownership is kept so replays stay idempotent.
    async fn purge_tombstones(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize, StoreError>;

    async fn load_cursor(&self, phase: CleanupPhase) -> Result<Option<CleanupCursor>, StoreError>;
    async fn save_cursor(&self, cursor: CleanupCursor) -> Result<(), StoreError>;
    async fn clear_cursor(&self, phase: CleanupPhase) -> Result<(), StoreError>;

    /// ACTIVE records matching `filter`, ordered by start date then id.
    async fn query_active(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>, StoreError>;

    /// Counts for health checks and reports.
    async fn census(&self, query: &CensusQuery) -> Result<StoreCensus, StoreError>;

    async fn save_policy(&self, policy: &RetentionPolicy) -> Result<(), StoreError>;
    async fn load_policy(&self) -> Result<Option<RetentionPolicy>, StoreError>;
}
