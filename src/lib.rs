// src/lib.rs
// Public library surface for the service binary and integration tests.

pub mod activity;
pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod lifecycle;
pub mod matcher;
pub mod merge;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod notify;
pub mod retention;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::EngineConfig;
pub use crate::engine::{
    BatchItemResult, BatchReport, DuplicateStatistics, Engine, IngestOutcome, PolicyReapplyReport, SweepReport,
};
pub use crate::error::{EngineError, IngestionParseError, PolicyNotFoundError, StoreError};
pub use crate::ingest::types::RawSubmission;
pub use crate::lifecycle::{CleanupReport, SourceCleanupReport};
pub use crate::model::{CanonicalEvent, EventFilter, EventStatus, SourceTier};
pub use crate::monitor::{HealthReport, HealthStatus, WeeklyReport};
pub use crate::retention::RetentionPolicy;
pub use crate::store::{EventStore, InMemoryStore};
