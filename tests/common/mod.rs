// tests/common/mod.rs
//
// Shared fixtures for integration tests: a submission builder and a store
// wrapper that can fail or stall selected calls.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use event_lifecycle_engine::error::StoreError;
use event_lifecycle_engine::model::{CanonicalEvent, EventFilter};
use event_lifecycle_engine::retention::RetentionPolicy;
use event_lifecycle_engine::store::{
    CandidateQuery, CandidateSet, CensusQuery, CleanupCursor, CleanupPhase, ClusterSnapshot,
    DueRecord, EventStore, InMemoryStore, ScanCursor, StoreCensus, Versioned,
};
use event_lifecycle_engine::RawSubmission;

pub fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
}

pub fn submission(id: &str, title: &str, venue: &str, start: &str, source: &str) -> RawSubmission {
    RawSubmission {
        submission_id: Some(id.to_string()),
        title: title.to_string(),
        venue_name: Some(venue.to_string()),
        start_date: start.to_string(),
        source_name: source.to_string(),
        ..Default::default()
    }
}

/// Delegates to an [`InMemoryStore`]; selected calls can be made to fail or hang.
#[derive(Debug, Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    /// 1-based `due_page` call that fails with `Unavailable`; 0 disables.
    pub fail_due_page_call: AtomicUsize,
    pub due_page_calls: AtomicUsize,
    /// Next N `candidates` calls sleep for an hour.
    pub stall_candidates: AtomicUsize,
    pub soft_delete_calls: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for FlakyStore {
    async fn get(&self, id: &str) -> Result<Option<Versioned<CanonicalEvent>>, StoreError> {
        self.inner.get(id).await
    }

    async fn alias_owner(&self, submission_id: &str) -> Result<Option<String>, StoreError> {
        self.inner.alias_owner(submission_id).await
    }

    async fn candidates(&self, query: &CandidateQuery) -> Result<CandidateSet, StoreError> {
        let stall = self
            .stall_candidates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.inner.candidates(query).await
    }

    async fn insert_if_unchanged(
        &self,
        event: CanonicalEvent,
        snapshot: &ClusterSnapshot,
    ) -> Result<u64, StoreError> {
        self.inner.insert_if_unchanged(event, snapshot).await
    }

    async fn update_if_version(
        &self,
        event: CanonicalEvent,
        expected_version: u64,
    ) -> Result<u64, StoreError> {
        self.inner.update_if_version(event, expected_version).await
    }

    async fn absorb_if_versions(
        &self,
        survivor: CanonicalEvent,
        survivor_version: u64,
        absorbed_id: &str,
        absorbed_version: u64,
    ) -> Result<u64, StoreError> {
        self.inner
            .absorb_if_versions(survivor, survivor_version, absorbed_id, absorbed_version)
            .await
    }

    async fn active_page(
        &self,
        after: Option<&ScanCursor>,
        limit: usize,
    ) -> Result<Vec<Versioned<CanonicalEvent>>, StoreError> {
        self.inner.active_page(after, limit).await
    }

    async fn due_page(
        &self,
        phase: CleanupPhase,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError> {
        let call = self.due_page_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_due_page_call.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                message: "injected due_page failure".into(),
            });
        }
        self.inner.due_page(phase, cutoff, after, limit).await
    }

    async fn due_for_source(
        &self,
        source: &str,
        cutoff: DateTime<Utc>,
        after: Option<&CleanupCursor>,
        limit: usize,
    ) -> Result<Vec<DueRecord>, StoreError> {
        self.inner.due_for_source(source, cutoff, after, limit).await
    }

    async fn soft_delete_if_expired(&self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        self.soft_delete_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.soft_delete_if_expired(id, now).await
    }

    async fn hard_delete_if_elapsed(
        &self,
        id: &str,
        grace: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.inner.hard_delete_if_elapsed(id, grace, now).await
    }

    async fn purge_tombstones(&self, cutoff: DateTime<Utc>, limit: usize) -> Result<usize, StoreError> {
        self.inner.purge_tombstones(cutoff, limit).await
    }

    async fn load_cursor(&self, phase: CleanupPhase) -> Result<Option<CleanupCursor>, StoreError> {
        self.inner.load_cursor(phase).await
    }

    async fn save_cursor(&self, cursor: CleanupCursor) -> Result<(), StoreError> {
        self.inner.save_cursor(cursor).await
    }

    async fn clear_cursor(&self, phase: CleanupPhase) -> Result<(), StoreError> {
        self.inner.clear_cursor(phase).await
    }

    async fn query_active(&self, filter: &EventFilter) -> Result<Vec<CanonicalEvent>, StoreError> {
        self.inner.query_active(filter).await
    }

    async fn census(&self, query: &CensusQuery) -> Result<StoreCensus, StoreError> {
        self.inner.census(query).await
    }

    async fn save_policy(&self, policy: &RetentionPolicy) -> Result<(), StoreError> {
        self.inner.save_policy(policy).await
    }

    async fn load_policy(&self) -> Result<Option<RetentionPolicy>, StoreError> {
        self.inner.load_policy().await
    }
}
