// src/store/memory.rs
//! In-process [`EventStore`] backed by a single `parking_lot::RwLock`.
//!
//! Secondary indexes:
//! - `by_bucket`: day bucket → ids (candidate lookup without a full scan)
//! - `expiry`: `(delete_after, id)` for ACTIVE records
//! - `grace`: `(soft_deleted_at, id)` for SOFT_DELETED records
//! - `tombstones`: `(hard_deleted_at, id)` for HARD_DELETED records not yet purged
//! - `aliases`: submission id → canonical id, kept after a tombstone is purged

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parking_lot::RwLock;

use super::{
    CandidateQuery, CandidateSet, CensusQuery, CleanupCursor, CleanupPhase, ClusterSnapshot,
    DueRecord, EventStore, ScanCursor, StoreCensus, Versioned,
};
use crate::error::StoreError;
use crate::model::{CanonicalEvent, EventFilter, EventStatus};
use crate::retention::RetentionPolicy;

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Versioned<CanonicalEvent>>,
    by_bucket: BTreeMap<NaiveDate, BTreeSet<String>>,
    bucket_versions: HashMap<NaiveDate, u64>,
    expiry: BTreeSet<(DateTime<Utc>, String)>,
    grace: BTreeSet<(DateTime<Utc>, String)>,
    tombstones: BTreeSet<(DateTime<Utc>, String)>,
    aliases: HashMap<String, String>,
    purged: usize,
    cursors: HashMap<CleanupPhase, CleanupCursor>,
    policy: Option<RetentionPolicy>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records in any status.
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Inner {
    fn bump(&mut self, bucket: NaiveDate) {
        *self.bucket_versions.entry(bucket).or_insert(0) += 1;
    }

    fn bucket_version(&self, bucket: NaiveDate) -> u64 {
        self.bucket_versions.get(&bucket).copied().unwrap_or(0)
    }

    /// Every alias of `ev` is free, owned by `ev` itself, or owned by `absorbed`.
    fn check_aliases(&self, ev: &CanonicalEvent, absorbed: Option<&str>) -> Result<(), StoreError> {
        for alias in &ev.alias_ids {
            if let Some(owner) = self.aliases.get(alias) {
                if owner != &ev.id && Some(owner.as_str()) != absorbed {
                    return Err(StoreError::AliasClaimed {
                        submission_id: alias.clone(),
                        owner: owner.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn unindex(&mut self, ev: &CanonicalEvent) {
        let bucket = ev.date_bucket();
        if let Some(ids) = self.by_bucket.get_mut(&bucket) {
            ids.remove(&ev.id);
            if ids.is_empty() {
                self.by_bucket.remove(&bucket);
            }
        }
        self.expiry.remove(&(ev.delete_after, ev.id.clone()));
        if let Some(at) = ev.soft_deleted_at {
            self.grace.remove(&(at, ev.id.clone()));
        }
        if let Some(at) = ev.hard_deleted_at {
            self.tombstones.remove(&(at, ev.id.clone()));
        }
    }

    /// Remove a record and its indexes; aliases are left for the caller.
    fn remove(&mut self, id: &str) -> Option<CanonicalEvent> {
        let prev = self.records.remove(id)?.record;
        self.unindex(&prev);
        self.bump(prev.date_bucket());
        Some(prev)
    }

    fn index(&mut self, ev: &CanonicalEvent) {
        self.by_bucket
            .entry(ev.date_bucket())
            .or_default()
            .insert(ev.id.clone());
        match ev.status {
            EventStatus::Active => {
                self.expiry.insert((ev.delete_after, ev.id.clone()));
            }
            EventStatus::SoftDeleted => {
                if let Some(at) = ev.soft_deleted_at {
                    self.grace.insert((at, ev.id.clone()));
                }
            }
            EventStatus::HardDeleted => {
                if let Some(at) = ev.hard_deleted_at {
                    self.tombstones.insert((at, ev.id.clone()));
                }
            }
        }
        for alias in &ev.alias_ids {
            self.aliases.insert(alias.clone(), ev.id.clone());
        }
    }

    /// Swap in `next` for the stored record, keeping indexes and bucket versions current.
    fn replace(&mut self, next: CanonicalEvent) -> u64 {
        let prev = self
            .records
            .get(&next.id)
            .map(|v| (v.record.clone(), v.version));
        let version = match prev {
            Some((prev, version)) => {
                self.unindex(&prev);
                self.bump(prev.date_bucket());
                version + 1
            }
            None => 1,
        };
        self.index(&next);
        self.bump(next.date_bucket());
        self.records.insert(
            next.id.clone(),
            Versioned {
                record: next,
                version,
            },
        );
        version
    }
}

fn area_compatible(query: Option<&str>, ev: Option<&str>) -> bool {
    match (query, ev) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<CanonicalEvent>>, StoreError> {
        Ok(self.inner.read().records.get(id).cloned())
    }

    async fn alias_owner(&self, submission_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().aliases.get(submission_id).cloned())
    }

    async fn candidates(&self, query: &CandidateQuery) -> Result<CandidateSet, StoreError> {
        let inner = self.inner.read();
        let window = Duration::days(i64::from(query.window_days));
        let lo = query.bucket.checked_sub_signed(window).unwrap_or(NaiveDate::MIN);
        let hi = query.bucket.checked_add_signed(window).unwrap_or(NaiveDate::MAX);

        let mut snapshot = ClusterSnapshot::default();
        let mut day = lo;
        while day <= hi {
            snapshot.buckets.insert(day, inner.bucket_version(day));
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        let mut found: Vec<(bool, i64, &Versioned<CanonicalEvent>)> = inner
            .by_bucket
            .range(lo..=hi)
            .flat_map(|(_, ids)| ids.iter())
            .filter_map(|id| inner.records.get(id))
            .filter(|v| v.record.is_active())
            .filter(|v| area_compatible(query.area.as_deref(), v.record.area.as_deref()))
            .map(|v| {
                let same_fp = v.record.fingerprint == query.fingerprint;
                let distance = (v.record.date_bucket() - query.bucket).num_days().abs();
                (same_fp, distance, v)
            })
            .collect();

        found.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then_with(|| a.2.record.id.cmp(&b.2.record.id))
        });

        let candidates = found
            .into_iter()
            .take(query.limit)
            .map(|(_, _, v)| v.clone())
            .collect();

        Ok(CandidateSet {
            candidates,
            snapshot,
        })
    }

    async fn insert_if_unchanged(
        &self,
        event: CanonicalEvent,
        snapshot: &ClusterSnapshot,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        for (bucket, seen) in &snapshot.buckets {
            if inner.bucket_version(*bucket) != *seen {
                return Err(StoreError::Conflict {
                    key: format!("bucket:{bucket}"),
                });
            }
        }
        if inner.records.contains_key(&event.id) {
            return Err(StoreError::Conflict {
                key: event.id.clone(),
            });
        }
        inner.check_aliases(&event, None)?;
        Ok(inner.replace(event))
    }

    async fn update_if_version(
        &self,
        event: CanonicalEvent,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write();
        let current = inner
            .records
            .get(&event.id)
            .map(|v| v.version)
            .ok_or_else(|| StoreError::NotFound {
                id: event.id.clone(),
            })?;
        if current != expected_version {
            return Err(StoreError::Conflict {
                key: event.id.clone(),
            });
        }
        inner.check_aliases(&event, None)?;
        Ok(inner.replace(event))
    }

    async fn absorb_if_versions(
        &self,
        survivor: CanonicalEvent,
        survivor_version: u64,
        absorbed_id: &str,
        absorbed_version: u64,
    ) -> Result<u64, StoreError> {
        if survivor.id == absorbed_id {
            return Err(StoreError::Conflict {
                key: absorbed_id.to_string(),
            });
        }
        let mut inner = self.inner.write();
        for (id, expected) in [(survivor.id.as_str(), survivor_version), (absorbed_id, absorbed_version)] {
            let current = inner
                .records
                .get(id)
                .map(|v| v.version)
                .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
            if current != expected {
                return Err(StoreError::Conflict { key: id.to_string() });
            }
        }
        inner.check_aliases(&survivor, Some(absorbed_id))?;
        inner.remove(absorbed_id);
        Ok(inner.replace(survivor))
    }

    async fn active_page(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Versioned<CanonicalEvent>>, StoreError> {
        let inner = self.inner.read();
        let lower = match after {
            Some(c) => Bound::Included(c.bucket),
            None => Bound::Unbounded,
        };
        Ok(inner
            .by_bucket
            .range((lower, Bound::Unbounded))
            .flat_map(|(bucket, ids)| ids.iter().map(move |id| (*bucket, id)))
            .filter(|(bucket, id)| match after {
                Some(c) => (*bucket, id.as_str()) > (c.bucket, c.id.as_str()),
                None => true,
            })
            .filter_map(|(_, id)| inner.records.get(id))
            .filter(|v| v.record.is_active())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn due_page(
        &self,
        phase: CleanupPhase,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError> {
        let inner = self.inner.read();
        let index = match phase {
            CleanupPhase::SoftDelete => &inner.expiry,
            CleanupPhase::HardDelete => &inner.grace,
        };
        let lower = match after {
            Some(c) => Bound::Excluded((c.key, c.id.clone())),
            None => Bound::Unbounded,
        };
        Ok(index
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| *key <= cutoff)
            .take(limit)
            .map(|(key, id)| DueRecord {
                key: *key,
                id: id.clone(),
            })
            .collect())
    }

    async fn due_for_source(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError> {
        let inner = self.inner.read();
        let lower = match after {
            Some(c) => Bound::Excluded((c.key, c.id.clone())),
            None => Bound::Unbounded,
        };
        let source = source.trim();
        Ok(inner
            .expiry
            .range((lower, Bound::Unbounded))
            .take_while(|(key, _)| *key <= cutoff)
            .filter(|(_, id)| {
                inner.records.get(id).is_some_and(|v| {
                    v.record.sources.iter().any(|s| s.eq_ignore_ascii_case(source))
                })
            })
            .take(limit)
            .map(|(key, id)| DueRecord {
                key: *key,
                id: id.clone(),
            })
            .collect())
    }

    async fn soft_delete_if_expired(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let current = inner
            .records
            .get(id)
            .map(|v| v.record.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        if !current.status.can_advance_to(EventStatus::SoftDeleted) || current.delete_after > now {
            return Ok(false);
        }
        let mut next = current;
        next.status = EventStatus::SoftDeleted;
        next.soft_deleted_at = Some(now);
        next.updated_at = now;
        inner.replace(next);
        Ok(true)
    }

    async fn hard_delete_if_elapsed(
        &self,
        id: &str,
        grace: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write();
        let current = inner
            .records
            .get(id)
            .map(|v| v.record.clone())
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        let elapsed = current
            .soft_deleted_at
            .is_some_and(|at| at + grace <= now);
        if !current.status.can_advance_to(EventStatus::HardDeleted) || !elapsed {
            return Ok(false);
        }
        inner.replace(current.into_tombstone(now));
        Ok(true)
    }

    async fn purge_tombstones(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize, StoreError> {
        let mut inner = self.inner.write();
        let due: Vec<String> = inner
            .tombstones
            .iter()
            .take_while(|(at, _)| *at <= cutoff)
            .take(limit)
            .map(|(_, id)| id.clone())
            .collect();
        for id in &due {
            inner.remove(id);
        }
        inner.purged += due.len();
        Ok(due.len())
    }

    async fn load_cursor(&self, phase: CleanupPhase) -> Result<Option<CleanupCursor>, StoreError> {
        Ok(self.inner.read().cursors.get(&phase).cloned())
    }

    async fn save_cursor(&self, cursor: CleanupCursor) -> Result<(), StoreError> {
        self.inner.write().cursors.insert(cursor.phase, cursor);
        Ok(())
    }

    async fn clear_cursor(&self, phase: CleanupPhase) -> Result<(), StoreError> {
        self.inner.write().cursors.remove(&phase);
        Ok(())
    }

    async fn query_active(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>, StoreError> {
        let inner = self.inner.read();
        let mut out: Vec<CanonicalEvent> = inner
            .records
            .values()
            .filter(|v| filter.matches(&v.record))
            .map(|v| v.record.clone())
            .collect();
        out.sort_by(|a, b| a.start_date.cmp(&b.start_date).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            out.truncate(limit);
        }
        Ok(out)
    }

    async fn census(&self, query: &CensusQuery) -> Result<StoreCensus, StoreError> {
        let inner = self.inner.read();
        let mut c = StoreCensus::from_events(inner.records.values().map(|v| &v.record), query);
        c.purged = inner.purged;
        Ok(c)
    }

    async fn save_policy(&self, policy: &RetentionPolicy) -> Result<(), StoreError> {
        self.inner.write().policy = Some(policy.clone());
        Ok(())
    }

    async fn load_policy(&self) -> Result<Option<RetentionPolicy>, StoreError> {
        Ok(self.inner.read().policy.clone())
    }
}
