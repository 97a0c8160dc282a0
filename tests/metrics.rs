// tests/metrics.rs
use std::sync::Arc;

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use event_lifecycle_engine::api::{self, AppState};
use event_lifecycle_engine::metrics::Metrics;
use event_lifecycle_engine::notify::NotifierMux;
use event_lifecycle_engine::Engine;

#[tokio::test]
async fn metrics_endpoint_contains_expected_series() {
    let metrics = Metrics::init().expect("install recorder");
    // A second init reuses the installed recorder.
    Metrics::init().expect("idempotent init");

    let state = AppState::new(Arc::new(Engine::in_memory()), Arc::new(NotifierMux::new(vec![], 0)));
    let app = api::router_with_metrics(state, &metrics);

    let payload = json!({
        "submission_id": "m1",
        "title": "Beach Cleanup Day",
        "venue_name": "JBR Beach",
        "start_date": "2099-06-15",
        "source_name": "timeout_dubai"
    });
    let resp = app
        .clone()
        .oneshot(
            Request::post("/events")
                .header("content-type", "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .clone()
        .oneshot(Request::post("/lifecycle/cleanup").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .clone()
        .oneshot(Request::get("/lifecycle/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap(); // 1 MiB
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "ingest_submissions_total",
        "ingest_created_total",
        "ingest_match_score",
        "cleanup_duration_ms",
        "lifecycle_last_cleanup_ts",
        "events_active",
    ] {
        assert!(text.contains(needle), "missing series {needle}:\n{text}");
    }
}
