// tests/batch_requeue.rs
//
// Store timeouts inside a batch: the submission is retried after the rest of
// the batch and handed back if it keeps timing out. Nothing is dropped.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{submission, utc, FlakyStore};
use event_lifecycle_engine::ingest::venues::VenueDirectory;
use event_lifecycle_engine::{
    BatchItemResult, Engine, EngineConfig, EngineError, EventFilter, RawSubmission, RetentionPolicy,
};

fn engine_on(store: Arc<FlakyStore>) -> Engine {
    Engine::new(
        store,
        RetentionPolicy::default(),
        VenueDirectory::default_seed(),
        EngineConfig::default(),
    )
}

fn batch() -> Vec<RawSubmission> {
    vec![
        submission("b-0", "Beach Cleanup Day", "JBR Beach", "2025-06-15", "timeout_dubai"),
        submission("b-1", "Opera Gala Night", "Dubai Opera", "2025-06-15", "timeout_dubai"),
        RawSubmission {
            title: "No Date Given".into(),
            source_name: "meetup_dubai".into(),
            ..Default::default()
        },
        submission("b-3", "Food Truck Festival", "Global Village", "2025-06-20", "eventbrite_dubai"),
    ]
}

#[tokio::test(start_paused = true)]
async fn single_timeout_is_retried_within_the_batch() {
    let store = Arc::new(FlakyStore::new());
    store.stall_candidates.store(1, Ordering::SeqCst);
    let engine = engine_on(store.clone());

    let report = engine.ingest_batch_at(batch(), utc(2025, 6, 10, 9, 0, 0)).await;

    assert_eq!(report.ingested, 3);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.failed, 0);
    assert!(report.requeued.is_empty());
    // Results are reported in submission order regardless of retry order.
    let indexes: Vec<_> = report
        .items
        .iter()
        .map(|i| match i {
            BatchItemResult::Ingested { index, .. }
            | BatchItemResult::Quarantined { index, .. }
            | BatchItemResult::Failed { index, .. }
            | BatchItemResult::Requeued { index } => *index,
        })
        .collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);
    assert!(matches!(report.items[2], BatchItemResult::Quarantined { .. }));
    assert_eq!(
        engine.get_active_events(&EventFilter::default()).await.unwrap().len(),
        3
    );
}

#[tokio::test(start_paused = true)]
async fn persistent_timeouts_are_handed_back() {
    let store = Arc::new(FlakyStore::new());
    store.stall_candidates.store(usize::MAX, Ordering::SeqCst);
    let engine = engine_on(store.clone());

    let input = batch();
    let report = engine.ingest_batch_at(input.clone(), utc(2025, 6, 10, 9, 0, 0)).await;

    assert_eq!(report.ingested, 0);
    assert_eq!(report.quarantined, 1);
    assert_eq!(report.requeued.len(), 3);
    assert_eq!(report.requeued[0], input[0]);
    assert!(matches!(report.items[0], BatchItemResult::Requeued { index: 0 }));
    assert!(store.inner.is_empty());
}

#[tokio::test(start_paused = true)]
async fn single_ingest_surfaces_store_timeout() {
    let store = Arc::new(FlakyStore::new());
    store.stall_candidates.store(1, Ordering::SeqCst);
    let engine = engine_on(store);

    let raw = submission("s-0", "Beach Cleanup Day", "JBR Beach", "2025-06-15", "timeout_dubai");
    let err = engine.ingest_at(&raw, utc(2025, 6, 10, 9, 0, 0)).await.unwrap_err();
    assert!(matches!(err, EngineError::StoreTimeout { operation: "candidates", .. }));
    assert!(err.is_retryable());
}
