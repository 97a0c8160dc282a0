// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::json;
use serde_json::Value as Json;
use tower::ServiceExt as _; // for `oneshot`

use event_lifecycle_engine::api::{self, AppState};
use event_lifecycle_engine::notify::{MemoryNotifier, Notifier, NotifierMux};
use event_lifecycle_engine::Engine;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn test_state() -> (AppState, Arc<MemoryNotifier>) {
    let mem = Arc::new(MemoryNotifier::default());
    let channels: Vec<Arc<dyn Notifier>> = vec![mem.clone()];
    let state = AppState::new(
        Arc::new(Engine::in_memory()),
        Arc::new(NotifierMux::new(channels, 3600)),
    );
    (state, mem)
}

fn test_router() -> Router {
    api::router(test_state().0)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.clone().oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    let v = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, v)
}

fn post_json(uri: &str, payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn beach(id: &str, title: &str) -> Json {
    json!({
        "submission_id": id,
        "title": title,
        "venue_name": "JBR Beach",
        "start_date": "2099-06-15T08:00:00Z",
        "source_name": "timeout_dubai"
    })
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = test_router();
    let resp = app.oneshot(get("/health")).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "OK");
}

#[tokio::test]
async fn api_ingest_creates_then_merges() {
    let app = test_router();

    let (status, first) = send(&app, post_json("/events", &beach("s1", "Beach Cleanup Day"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(first["merged"], false);

    let (status, second) = send(&app, post_json("/events", &beach("s2", "Beach Clean Up Day"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["merged"], true);
    assert_eq!(second["canonical_id"], first["canonical_id"]);

    let (status, list) = send(&app, get("/events?area=dubai%20marina")).await;
    assert_eq!(status, StatusCode::OK);
    let arr = list.as_array().expect("array of events");
    assert_eq!(arr.len(), 1);
    assert_eq!(arr[0]["status"], "ACTIVE");

    let (_, none) = send(&app, get("/events?tier=low")).await;
    assert_eq!(none.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn api_parse_error_is_422_and_quarantined() {
    let app = test_router();
    let payload = json!({
        "title": "Beach Cleanup Day",
        "start_date": "whenever",
        "source_name": "meetup_dubai"
    });
    let (status, body) = send(&app, post_json("/events", &payload)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap_or_default().contains("start_date"));

    let (_, q) = send(&app, get("/lifecycle/quarantine?limit=5")).await;
    let q = q.as_array().expect("quarantine list");
    assert_eq!(q.len(), 1);
    assert_eq!(q[0]["source_name"], "meetup_dubai");
    assert_eq!(q[0]["field"], "start_date");
}

#[tokio::test]
async fn api_batch_reports_each_item() {
    let app = test_router();
    let payload = json!([
        beach("b1", "Beach Cleanup Day"),
        { "title": "Broken", "start_date": "", "source_name": "meetup_dubai" },
        beach("b3", "Beach Clean Up Day"),
    ]);
    let (status, report) = send(&app, post_json("/events/batch", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["ingested"], 2);
    assert_eq!(report["quarantined"], 1);
    assert_eq!(report["items"][1]["status"], "quarantined");
    assert_eq!(report["items"][2]["outcome"]["merged"], true);
}

#[tokio::test]
async fn api_lifecycle_endpoints() {
    let app = test_router();
    send(&app, post_json("/events", &beach("s1", "Beach Cleanup Day"))).await;

    let (status, cleanup) = send(&app, post_json("/lifecycle/cleanup", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleanup["completed"], true);
    assert_eq!(cleanup["soft_deleted"], 0);

    let (status, health) = send(&app, get("/lifecycle/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["total_active"], 1);

    let (status, weekly) = send(&app, get("/lifecycle/weekly-report")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(weekly["totals"]["created"], 1);

    let (status, policy) = send(&app, get("/lifecycle/policies")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(policy["tiers"]["high"]["retention_days"], 7);
}

#[tokio::test]
async fn api_dedup_and_source_cleanup_endpoints() {
    let app = test_router();
    send(&app, post_json("/events", &beach("s1", "Beach Cleanup Day"))).await;
    send(&app, post_json("/events", &beach("s2", "Beach Clean Up Day"))).await;

    let (status, sweep) = send(&app, post_json("/lifecycle/dedup-sweep?dry_run=true", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sweep["dry_run"], true);
    assert_eq!(sweep["duplicates_found"], 0);

    let (status, stats) = send(&app, get("/lifecycle/duplicate-stats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stats["total_active"], 1);
    assert_eq!(stats["merged_at_ingest"], 1);
    assert_eq!(stats["top_sources"][0]["source"], "timeout_dubai");

    let (status, cleanup) = send(&app, post_json("/lifecycle/cleanup/source/timeout_dubai", &json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleanup["source"], "timeout_dubai");
    assert_eq!(cleanup["soft_deleted"], 0);
    assert_eq!(cleanup["completed"], true);
}

#[tokio::test]
async fn api_degraded_health_alerts_once() {
    let (state, mem) = test_state();
    let app = api::router(state);
    // Only low-tier events: high-tier share 0 → degraded.
    let low = json!({
        "submission_id": "l1",
        "title": "Open Mic",
        "venue_name": "Alserkal Avenue",
        "start_date": "2099-06-15",
        "source_name": "social_rising"
    });
    send(&app, post_json("/events", &low)).await;

    let (_, h) = send(&app, get("/lifecycle/health")).await;
    assert_eq!(h["status"], "degraded");
    send(&app, get("/lifecycle/health")).await;
    assert_eq!(mem.sent().len(), 1, "cooldown suppresses the repeat");

    send(&app, get("/lifecycle/weekly-report?deliver=true")).await;
    assert_eq!(mem.sent().len(), 2);
}

#[tokio::test]
async fn api_policy_override_validates() {
    let app = test_router();

    let req = Request::builder()
        .method("PUT")
        .uri("/admin/retention-policy")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "tiers": {} }).to_string()))
        .expect("build PUT");
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().is_some());

    let policy = json!({
        "tiers": {
            "high": { "retention_days": 14, "sources": ["timeout_dubai"] },
            "low": { "retention_days": 2 }
        }
    });
    let req = Request::builder()
        .method("PUT")
        .uri("/admin/retention-policy")
        .header("content-type", "application/json")
        .body(Body::from(policy.to_string()))
        .expect("build PUT");
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tiers"]["high"]["retention_days"], 14);

    let (_, current) = send(&app, get("/lifecycle/policies")).await;
    assert_eq!(current["tiers"]["low"]["retention_days"], 2);
    assert!(current["tiers"].get("medium").is_none());
}
