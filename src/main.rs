//! Event Lifecycle Service: Binary Entrypoint
//! Boots the Axum HTTP server with the lifecycle engine, webhook notifier
//! and Prometheus metrics.

use std::sync::Arc;

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use event_lifecycle_engine::api::{self, AppState};
use event_lifecycle_engine::metrics::Metrics;
use event_lifecycle_engine::notify::NotifierMux;
use event_lifecycle_engine::{Engine, InMemoryStore};

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - LIFECYCLE_DEV_LOG=1
/// LIFECYCLE_LOG_JSON=1 switches to JSON lines.
fn enable_dev_tracing() {
    let dev_flag = std::env::var("LIFECYCLE_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("ingest=info,merge=info,lifecycle=info,monitor=info,retention=info,api=info,warn")
    });

    let json = std::env::var("LIFECYCLE_LOG_JSON").is_ok_and(|v| v == "1");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let engine = Engine::bootstrap(Arc::new(InMemoryStore::new())).await?;
    let notifier = NotifierMux::from_env(&engine.config().monitor);
    if !notifier.is_enabled() {
        tracing::info!(target: "monitor", "no webhook configured, reports stay local");
    }
    let metrics = Metrics::init()?;

    let state = AppState::new(Arc::new(engine), Arc::new(notifier));
    let router = api::router_with_metrics(state, &metrics);

    Ok(router.into())
}
