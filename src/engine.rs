//! # Lifecycle Engine
//! Wires the normalizer, matcher, merge resolver, retention policy and store
//! into the operations collaborators call.
//!
//! Match-then-merge runs under optimistic concurrency: candidates are read
//! together with a cluster snapshot, and the write (insert or compare-and-set
//! update) fails if the cluster moved in between. On conflict the match is
//! redone against the updated store, up to `max_merge_attempts` times.
//!
//! Every store call carries `store.timeout_ms`; a timeout surfaces as
//! [`EngineError::StoreTimeout`] and batch ingestion requeues the submission.
//!
//! Duplicate sweeps use the same conditional writes: a pair is absorbed only
//! if neither record changed since it was scored.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use parking_lot::RwLock;
use serde::Serialize;

use crate::activity::{ActivityLog, IngestKind, QuarantineEntry};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, IngestionParseError, StoreError};
use crate::ingest::types::{NormalizedSubmission, RawSubmission};
use crate::ingest::venues::VenueDirectory;
use crate::ingest::{self, Normalizer};
use crate::lifecycle::{self, CleanupReport, SourceCleanupReport};
use crate::matcher;
use crate::merge::{self, MergeOutcome};
use crate::model::{CanonicalEvent, EventFilter};
use crate::monitor::{self, HealthReport, WeeklyReport};
use crate::retention::{self, RetentionPolicy};
use crate::store::{CandidateQuery, CensusQuery, EventStore, InMemoryStore, ScanCursor, Versioned};

/// Answer to one ingestion call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub canonical_id: String,
    pub merged: bool,
    pub quality_score: f32,
    /// Similarity of the winning candidate; absent for new events and replays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_warning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemResult {
    Ingested { index: usize, outcome: IngestOutcome },
    Quarantined { index: usize, reason: String },
    Failed { index: usize, error: String },
    /// Still timing out after the requeue passes; handed back to the caller.
    Requeued { index: usize },
}

impl BatchItemResult {
    fn index(&self) -> usize {
        match self {
            BatchItemResult::Ingested { index, .. }
            | BatchItemResult::Quarantined { index, .. }
            | BatchItemResult::Failed { index, .. }
            | BatchItemResult::Requeued { index } => *index,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub items: Vec<BatchItemResult>,
    pub ingested: usize,
    pub quarantined: usize,
    pub failed: usize,
    /// Submissions the caller should resubmit later.
    pub requeued: Vec<RawSubmission>,
}

/// One pass of a new policy over the ACTIVE records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyReapplyReport {
    pub scanned: usize,
    pub escalated: usize,
    /// Records that changed underneath the pass; their next merge applies the policy.
    pub conflicts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub dry_run: bool,
    pub analyzed: usize,
    pub duplicates_found: usize,
    pub merged: usize,
    pub conflicts: usize,
    /// `false` when the run budget ran out first.
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceMergeCount {
    pub source: String,
    pub merged: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateStatistics {
    pub generated_at: DateTime<Utc>,
    pub total_active: usize,
    pub merged_at_ingest: u64,
    pub absorbed_by_sweeps: u64,
    /// Pairs a sweep would merge right now.
    pub estimated_duplicates: usize,
    /// Merges over merges plus surviving active records.
    pub dedup_rate: f64,
    /// Most merged collectors in the report window.
    pub top_sources: Vec<SourceMergeCount>,
}

/// Run a store future under `timeout`, mapping elapsed time to `StoreTimeout`.
pub(crate) async fn timed<T, F>(operation: &'static str, timeout: Duration, fut: F) -> EngineResult<T>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res.map_err(EngineError::from),
        Err(_) => {
            tracing::warn!(target: "ingest", operation, ?timeout, "store call timed out");
            Err(EngineError::StoreTimeout { operation, timeout })
        }
    }
}

pub struct Engine {
    store: Arc<dyn EventStore>,
    normalizer: Normalizer,
    policy: RwLock<RetentionPolicy>,
    cfg: EngineConfig,
    activity: ActivityLog,
}

impl Engine {
    pub fn new(
        store: Arc<dyn EventStore>,
        policy: RetentionPolicy,
        venues: VenueDirectory,
        mut cfg: EngineConfig,
    ) -> Self {
        ingest::ensure_metrics_described();
        cfg.matching = cfg.matching.sanitized();
        let activity = ActivityLog::new(
            chrono::Duration::days(i64::from(cfg.monitor.report_window_days.max(1)) * 2),
            cfg.ingest.quarantine_capacity,
        );
        Self {
            store,
            normalizer: Normalizer::new(venues),
            policy: RwLock::new(policy),
            cfg,
            activity,
        }
    }

    /// In-memory store, default policy, seeded venues, default config.
    pub fn in_memory() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(cfg: EngineConfig) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            RetentionPolicy::default(),
            VenueDirectory::default_seed(),
            cfg,
        )
    }

    /// Load config, policy and venue directory the way the service starts.
    /// A policy persisted in the store (admin override) wins over the file.
    pub async fn bootstrap(store: Arc<dyn EventStore>) -> anyhow::Result<Self> {
        let cfg = EngineConfig::from_toml()?;
        let timeout = cfg.store.timeout();
        let policy = match timed("load_policy", timeout, store.load_policy()).await? {
            Some(p) => p,
            None => {
                let p = retention::load_policy_default()?;
                timed("save_policy", timeout, store.save_policy(&p)).await?;
                p
            }
        };
        let venues = VenueDirectory::load_from_file(&cfg.ingest.venues_path);
        tracing::info!(
            target: "retention",
            tiers = policy.tiers.len(),
            threshold = cfg.matching.threshold,
            "engine bootstrapped"
        );
        Ok(Self::new(store, policy, venues, cfg))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy.read().clone()
    }

    pub async fn set_policy(&self, policy: RetentionPolicy) -> anyhow::Result<PolicyReapplyReport> {
        self.set_policy_at(policy, Utc::now()).await
    }

    /// Administrative override. New writes use it at once; ACTIVE records are
    /// then re-evaluated, escalation-only, so no stored window ever shrinks.
    pub async fn set_policy_at(
        &self,
        policy: RetentionPolicy,
        now: DateTime<Utc>,
    ) -> anyhow::Result<PolicyReapplyReport> {
        let policy = policy.validate()?;
        timed("save_policy", self.cfg.store.timeout(), self.store.save_policy(&policy)).await?;
        *self.policy.write() = policy.clone();
        tracing::info!(target: "retention", "retention policy replaced");
        Ok(self.reapply_policy(&policy, now).await?)
    }

    async fn reapply_policy(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> EngineResult<PolicyReapplyReport> {
        let timeout = self.cfg.store.timeout();
        let page_size = self.cfg.lifecycle.page_size.max(1);
        let mut report = PolicyReapplyReport::default();
        let mut cursor: Option<ScanCursor> = None;

        loop {
            let page = timed("active_page", timeout, self.store.active_page(cursor.as_ref(), page_size)).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(scan_cursor(last));
            let full = page.len() == page_size;

            for Versioned { record, version } in page {
                report.scanned += 1;
                let Some((tier, delete_after)) = policy.reapply(&record) else {
                    continue;
                };
                let id = record.id.clone();
                let mut next = record;
                next.source_tier = tier;
                next.delete_after = delete_after;
                next.updated_at = now;
                match timed("update_if_version", timeout, self.store.update_if_version(next, version)).await {
                    Ok(_) => report.escalated += 1,
                    Err(EngineError::Store(StoreError::Conflict { .. } | StoreError::NotFound { .. })) => {
                        report.conflicts += 1;
                        tracing::debug!(target: "retention", id = %id, "record moved during policy re-apply");
                    }
                    Err(e) => return Err(e),
                }
            }
            if !full {
                break;
            }
        }

        counter!("retention_policy_escalations_total").increment(report.escalated as u64);
        tracing::info!(
            target: "retention",
            scanned = report.scanned,
            escalated = report.escalated,
            conflicts = report.conflicts,
            "policy re-applied to active records"
        );
        Ok(report)
    }

    /// Re-read the policy file (`RETENTION_POLICY_PATH` or `config/retention.*`).
    pub async fn reload_policy(&self) -> anyhow::Result<RetentionPolicy> {
        let fresh = retention::load_policy_default()?;
        self.set_policy(fresh.clone()).await?;
        Ok(fresh)
    }

    pub async fn ingest(&self, raw: &RawSubmission) -> EngineResult<IngestOutcome> {
        self.ingest_at(raw, Utc::now()).await
    }

    pub async fn ingest_at(&self, raw: &RawSubmission, now: DateTime<Utc>) -> EngineResult<IngestOutcome> {
        counter!("ingest_submissions_total").increment(1);
        let source = raw.source_name.trim().to_string();
        let policy = self.policy();

        let sub = match self.normalizer.normalize(raw, &policy) {
            Ok(s) => s,
            Err(e) => {
                self.quarantine(raw, &e, now);
                return Err(e.into());
            }
        };

        if let Some(w) = &sub.tier_warning {
            counter!("retention_policy_fallback_total").increment(1);
            self.activity.policy_warning();
            tracing::warn!(
                target: "retention",
                submission_id = %sub.submission_id,
                requested = %w.requested,
                fallback = %w.fallback,
                "no policy for tier, using conservative retention"
            );
        }

        let res = self.resolve(&sub, &policy, now).await;
        match &res {
            Ok(out) if out.merged => {
                counter!("ingest_merged_total").increment(1);
                self.activity.record(&source, IngestKind::Merged, now);
            }
            Ok(_) => {
                counter!("ingest_created_total").increment(1);
                self.activity.record(&source, IngestKind::Created, now);
            }
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    submission_id = %sub.submission_id,
                    error = %e,
                    "submission not resolved"
                );
                self.activity.record(&source, IngestKind::Failed, now);
            }
        }
        res
    }

    fn quarantine(&self, raw: &RawSubmission, err: &IngestionParseError, now: DateTime<Utc>) {
        counter!("ingest_quarantined_total").increment(1);
        tracing::warn!(
            target: "ingest",
            source = %err.source_name,
            field = err.field,
            "submission quarantined"
        );
        self.activity.record(raw.source_name.trim(), IngestKind::Quarantined, now);
        self.activity.quarantine(QuarantineEntry {
            at: now,
            source_name: err.source_name.clone(),
            submission_id: raw.submission_id.clone(),
            field: err.field.to_string(),
            reason: err.reason.clone(),
        });
    }

    /// Match against the current cluster and write, retrying on version conflicts.
    async fn resolve(
        &self,
        sub: &NormalizedSubmission,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
    ) -> EngineResult<IngestOutcome> {
        let timeout = self.cfg.store.timeout();
        let attempts = self.cfg.store.max_merge_attempts.max(1);
        let warning = sub.tier_warning.as_ref().map(|w| w.to_string());
        let query = CandidateQuery {
            bucket: sub.date_bucket(),
            window_days: self.cfg.matching.date_window_days,
            area: sub.area.clone(),
            fingerprint: sub.fingerprint.clone(),
            limit: self.cfg.matching.max_candidates,
        };

        for attempt in 1..=attempts {
            if let Some(owner) =
                timed("alias_owner", timeout, self.store.alias_owner(&sub.submission_id)).await?
            {
                return self.replay(&owner, warning).await;
            }

            let set = timed("candidates", timeout, self.store.candidates(&query)).await?;
            let best = matcher::best_match(
                sub,
                set.candidates.iter().map(|v| &v.record),
                &self.cfg.matching,
            );
            histogram!("ingest_match_score").record(best.map_or(0.0, |m| f64::from(m.score.total)));

            let written = match best {
                Some(m) => {
                    let version = set
                        .candidates
                        .iter()
                        .find(|v| v.record.id == m.event.id)
                        .map(|v| v.version)
                        .unwrap_or_default();
                    match merge::merge(m.event, sub, policy, now) {
                        MergeOutcome::AlreadyMerged => {
                            return Ok(outcome(m.event, true, Some(m.score.total), warning));
                        }
                        MergeOutcome::Updated(ev) => {
                            let out = outcome(&ev, true, Some(m.score.total), warning.clone());
                            timed(
                                "update_if_version",
                                timeout,
                                self.store.update_if_version(*ev, version),
                            )
                            .await
                            .map(|_| out)
                        }
                    }
                }
                None => {
                    let ev = merge::promote(sub, policy, now);
                    let out = outcome(&ev, false, None, warning.clone());
                    timed(
                        "insert_if_unchanged",
                        timeout,
                        self.store.insert_if_unchanged(ev, &set.snapshot),
                    )
                    .await
                    .map(|_| out)
                }
            };

            match written {
                Ok(out) => {
                    tracing::info!(
                        target: "ingest",
                        canonical_id = %out.canonical_id,
                        submission_id = %sub.submission_id,
                        fingerprint = %sub.fingerprint,
                        merged = out.merged,
                        attempt,
                        "submission resolved"
                    );
                    return Ok(out);
                }
                Err(EngineError::Store(
                    e @ (StoreError::Conflict { .. } | StoreError::AliasClaimed { .. }),
                )) => {
                    counter!("ingest_merge_conflicts_total").increment(1);
                    tracing::debug!(
                        target: "merge",
                        submission_id = %sub.submission_id,
                        attempt,
                        error = %e,
                        "optimistic write lost, re-matching"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(EngineError::MergeConflict {
            submission_id: sub.submission_id.clone(),
            attempts,
        })
    }

    /// Submission id already owned by `owner`: report it as merged, write nothing.
    /// The owner's body may already be purged; the alias still answers.
    async fn replay(&self, owner: &str, warning: Option<String>) -> EngineResult<IngestOutcome> {
        let found = timed("get", self.cfg.store.timeout(), self.store.get(owner)).await?;
        Ok(match found {
            Some(ev) => outcome(&ev.record, true, None, warning),
            None => IngestOutcome {
                canonical_id: owner.to_string(),
                merged: true,
                quality_score: 0.0,
                score: None,
                policy_warning: warning,
            },
        })
    }

    pub async fn ingest_batch(&self, raws: Vec<RawSubmission>) -> BatchReport {
        self.ingest_batch_at(raws, Utc::now()).await
    }

    /// One malformed item never aborts the batch. Timed-out items are retried
    /// after the rest of the batch for `requeue_passes` extra passes, then
    /// handed back in `requeued`.
    pub async fn ingest_batch_at(&self, raws: Vec<RawSubmission>, now: DateTime<Utc>) -> BatchReport {
        let mut report = BatchReport::default();
        let mut queue: VecDeque<(usize, RawSubmission)> = raws.into_iter().enumerate().collect();

        for pass in 0..=self.cfg.store.requeue_passes {
            let mut retry = VecDeque::new();
            while let Some((index, raw)) = queue.pop_front() {
                match self.ingest_at(&raw, now).await {
                    Ok(outcome) => {
                        report.ingested += 1;
                        report.items.push(BatchItemResult::Ingested { index, outcome });
                    }
                    Err(EngineError::IngestionParse(e)) => {
                        report.quarantined += 1;
                        report.items.push(BatchItemResult::Quarantined {
                            index,
                            reason: e.to_string(),
                        });
                    }
                    Err(EngineError::StoreTimeout { .. }) => {
                        counter!("ingest_requeued_total").increment(1);
                        tracing::debug!(target: "ingest", index, pass, "requeued after timeout");
                        retry.push_back((index, raw));
                    }
                    Err(e) => {
                        report.failed += 1;
                        report.items.push(BatchItemResult::Failed {
                            index,
                            error: e.to_string(),
                        });
                    }
                }
            }
            if retry.is_empty() {
                break;
            }
            queue = retry;
        }

        for (index, raw) in queue {
            report.items.push(BatchItemResult::Requeued { index });
            report.requeued.push(raw);
        }
        report.items.sort_by_key(BatchItemResult::index);
        report
    }

    /// ACTIVE events only, never soft/hard-deleted records.
    pub async fn get_active_events(&self, filter: &EventFilter) -> EngineResult<Vec<CanonicalEvent>> {
        timed(
            "query_active",
            self.cfg.store.timeout(),
            self.store.query_active(filter),
        )
        .await
    }

    pub async fn run_cleanup(&self) -> EngineResult<CleanupReport> {
        self.run_cleanup_at(Utc::now()).await
    }

    pub async fn run_cleanup_at(&self, now: DateTime<Utc>) -> EngineResult<CleanupReport> {
        lifecycle::run_cleanup_at(
            self.store.as_ref(),
            &self.cfg.lifecycle,
            self.cfg.store.timeout(),
            now,
        )
        .await
    }

    pub async fn run_source_cleanup(&self, source: &str) -> EngineResult<SourceCleanupReport> {
        self.run_source_cleanup_at(source, Utc::now()).await
    }

    /// Soft-delete expired records of one collector without touching the
    /// global cleanup cursors.
    pub async fn run_source_cleanup_at(
        &self,
        source: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<SourceCleanupReport> {
        lifecycle::run_source_cleanup_at(
            self.store.as_ref(),
            source,
            &self.cfg.lifecycle,
            self.cfg.store.timeout(),
            now,
        )
        .await
    }

    pub async fn sweep_duplicates(&self, dry_run: bool) -> EngineResult<SweepReport> {
        self.sweep_duplicates_at(dry_run, Utc::now()).await
    }

    /// Walk every ACTIVE record, score it against its own candidate window and
    /// absorb the best match above threshold into the stronger record.
    /// `dry_run` only counts.
    pub async fn sweep_duplicates_at(&self, dry_run: bool, now: DateTime<Utc>) -> EngineResult<SweepReport> {
        let timeout = self.cfg.store.timeout();
        let page_size = self.cfg.lifecycle.page_size.max(1);
        let deadline = tokio::time::Instant::now() + self.cfg.lifecycle.budget();
        let policy = self.policy();
        let mut report = SweepReport {
            dry_run,
            completed: true,
            ..Default::default()
        };
        // Records already absorbed (or slated to be, in a dry run).
        let mut absorbed: HashSet<String> = HashSet::new();
        let mut cursor: Option<ScanCursor> = None;

        loop {
            if tokio::time::Instant::now() >= deadline {
                report.completed = false;
                break;
            }
            let page = timed("active_page", timeout, self.store.active_page(cursor.as_ref(), page_size)).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(scan_cursor(last));
            let full = page.len() == page_size;

            for scanned in page {
                if absorbed.contains(&scanned.record.id) {
                    continue;
                }
                let Some(current) = timed("get", timeout, self.store.get(&scanned.record.id)).await? else {
                    continue;
                };
                if !current.record.is_active() {
                    continue;
                }
                report.analyzed += 1;

                let ev = &current.record;
                let query = CandidateQuery {
                    bucket: ev.date_bucket(),
                    window_days: self.cfg.matching.date_window_days,
                    area: ev.area.clone(),
                    fingerprint: ev.fingerprint.clone(),
                    limit: self.cfg.matching.max_candidates,
                };
                let set = timed("candidates", timeout, self.store.candidates(&query)).await?;
                let best = set
                    .candidates
                    .iter()
                    .filter(|c| c.record.id != ev.id && !absorbed.contains(&c.record.id))
                    .map(|c| (c, matcher::score_events(ev, &c.record, &self.cfg.matching)))
                    .filter(|(_, s)| s.total >= self.cfg.matching.threshold)
                    .max_by(|a, b| a.1.total.total_cmp(&b.1.total));
                let Some((other, score)) = best else { continue };

                report.duplicates_found += 1;
                let (survivor, gone) = merge::survivor_first(ev, &other.record);
                absorbed.insert(gone.id.clone());
                if dry_run {
                    continue;
                }

                let (survivor_version, gone_version) = if survivor.id == ev.id {
                    (current.version, other.version)
                } else {
                    (other.version, current.version)
                };
                let folded = merge::absorb(survivor, gone, &policy, now);
                match timed(
                    "absorb_if_versions",
                    timeout,
                    self.store.absorb_if_versions(folded, survivor_version, &gone.id, gone_version),
                )
                .await
                {
                    Ok(_) => {
                        report.merged += 1;
                        counter!("dedup_sweep_merged_total").increment(1);
                        tracing::info!(
                            target: "merge",
                            canonical_id = %survivor.id,
                            absorbed_id = %gone.id,
                            score = score.total,
                            "duplicate records merged"
                        );
                    }
                    Err(EngineError::Store(
                        e @ (StoreError::Conflict { .. }
                        | StoreError::NotFound { .. }
                        | StoreError::AliasClaimed { .. }),
                    )) => {
                        report.conflicts += 1;
                        absorbed.remove(&gone.id);
                        counter!("dedup_sweep_conflicts_total").increment(1);
                        tracing::debug!(target: "merge", error = %e, "sweep write lost, pair skipped");
                    }
                    Err(e) => return Err(e),
                }
            }
            if !full {
                break;
            }
        }

        if !dry_run {
            self.activity.absorbed(report.merged);
        }
        tracing::info!(
            target: "merge",
            dry_run,
            analyzed = report.analyzed,
            found = report.duplicates_found,
            merged = report.merged,
            conflicts = report.conflicts,
            completed = report.completed,
            "duplicate sweep finished"
        );
        Ok(report)
    }

    pub async fn duplicate_statistics(&self) -> EngineResult<DuplicateStatistics> {
        self.duplicate_statistics_at(Utc::now()).await
    }

    pub async fn duplicate_statistics_at(&self, now: DateTime<Utc>) -> EngineResult<DuplicateStatistics> {
        let census = timed("census", self.cfg.store.timeout(), self.store.census(&self.census_query(now))).await?;
        let estimate = self.sweep_duplicates_at(true, now).await?;
        let totals = self.activity.totals();

        let mut top_sources: Vec<SourceMergeCount> = self
            .activity
            .counts_since(self.report_since(now))
            .into_iter()
            .filter(|(_, c)| c.merged > 0)
            .map(|(source, c)| SourceMergeCount {
                source,
                merged: c.merged,
            })
            .collect();
        top_sources.sort_by(|a, b| b.merged.cmp(&a.merged).then_with(|| a.source.cmp(&b.source)));
        top_sources.truncate(5);

        let merges = totals.merged + totals.absorbed;
        let denom = merges + census.active as u64;
        let dedup_rate = if denom == 0 {
            0.0
        } else {
            merges as f64 / denom as f64
        };

        Ok(DuplicateStatistics {
            generated_at: now,
            total_active: census.active,
            merged_at_ingest: totals.merged,
            absorbed_by_sweeps: totals.absorbed,
            estimated_duplicates: estimate.duplicates_found,
            dedup_rate,
            top_sources,
        })
    }

    fn report_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - chrono::Duration::days(i64::from(self.cfg.monitor.report_window_days))
    }

    fn census_query(&self, now: DateTime<Utc>) -> CensusQuery {
        CensusQuery {
            now,
            grace: self.cfg.lifecycle.grace_period(),
            since: self.report_since(now),
        }
    }

    pub async fn run_health_check(&self) -> EngineResult<HealthReport> {
        self.run_health_check_at(Utc::now()).await
    }

    pub async fn run_health_check_at(&self, now: DateTime<Utc>) -> EngineResult<HealthReport> {
        let census = timed("census", self.cfg.store.timeout(), self.store.census(&self.census_query(now))).await?;
        Ok(monitor::health_check(
            &census,
            self.activity.totals(),
            &self.cfg.monitor,
            now,
        ))
    }

    pub async fn run_weekly_report(&self) -> EngineResult<WeeklyReport> {
        self.run_weekly_report_at(Utc::now()).await
    }

    pub async fn run_weekly_report_at(&self, now: DateTime<Utc>) -> EngineResult<WeeklyReport> {
        let census = timed("census", self.cfg.store.timeout(), self.store.census(&self.census_query(now))).await?;
        let counts = self.activity.counts_since(self.report_since(now));
        Ok(monitor::weekly_report(&census, &counts, &self.cfg.monitor, now))
    }
}

fn scan_cursor(v: &Versioned<CanonicalEvent>) -> ScanCursor {
    ScanCursor {
        bucket: v.record.date_bucket(),
        id: v.record.id.clone(),
    }
}

fn outcome(
    ev: &CanonicalEvent,
    merged: bool,
    score: Option<f32>,
    policy_warning: Option<String>,
) -> IngestOutcome {
    IngestOutcome {
        canonical_id: ev.id.clone(),
        merged,
        quality_score: ev.quality_score,
        score,
        policy_warning,
    }
}
