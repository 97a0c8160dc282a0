// src/ingest/types.rs
use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PolicyNotFoundError;
use crate::model::SourceTier;

/// Submission as received from a discovery collector, before any cleaning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RawSubmission {
    /// Optional stable id from the collector; derived from content when absent.
    #[serde(default)]
    pub submission_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub venue_name: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    /// RFC 3339 or a few common naive layouts (UTC assumed).
    #[serde(default)]
    pub start_date: String,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub price_min: Option<f64>,
    #[serde(default)]
    pub price_max: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub booking_url: Option<String>,
    pub source_name: String, // e.g. "timeout_dubai"
    #[serde(default)]
    pub source_tier: Option<String>, // "high" | "medium" | "low"
}

/// Cleaned, comparable form of a [`RawSubmission`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSubmission {
    pub submission_id: String,
    pub source_name: String,
    pub source_tier: SourceTier,
    /// Set when the tier could not be resolved and the fallback was used.
    pub tier_warning: Option<PolicyNotFoundError>,
    pub title: String,
    pub description: Option<String>,
    pub venue_name: String,
    pub area: Option<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub price_min: Option<f64>,
    pub price_max: Option<f64>,
    pub tags: BTreeSet<String>,
    pub booking_url: Option<String>,
    pub fingerprint: String,
}

impl NormalizedSubmission {
    pub fn date_bucket(&self) -> NaiveDate {
        self.start_date.date_naive()
    }
}
