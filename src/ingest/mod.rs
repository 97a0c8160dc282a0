// src/ingest/mod.rs
//! Ingestion normalizer: turns a [`RawSubmission`] into a comparable
//! [`NormalizedSubmission`]. Pure apart from metrics/log side channels.

pub mod types;
pub mod venues;

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::error::IngestionParseError;
use crate::ingest::types::{NormalizedSubmission, RawSubmission};
use crate::ingest::venues::VenueDirectory;
use crate::retention::RetentionPolicy;

const MAX_TEXT_CHARS: usize = 1500;
const MAX_TITLE_CHARS: usize = 300;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_submissions_total", "Submissions received.");
        describe_counter!(
            "ingest_merged_total",
            "Submissions merged into an existing canonical event."
        );
        describe_counter!(
            "ingest_created_total",
            "Submissions promoted into a new canonical event."
        );
        describe_counter!(
            "ingest_quarantined_total",
            "Submissions quarantined because of parse errors."
        );
        describe_counter!(
            "ingest_merge_conflicts_total",
            "Optimistic-concurrency conflicts retried during match/merge."
        );
        describe_counter!(
            "ingest_requeued_total",
            "Submissions requeued after a store timeout."
        );
        describe_counter!(
            "retention_policy_fallback_total",
            "Submissions whose tier fell back to the conservative policy."
        );
        describe_counter!(
            "retention_policy_escalations_total",
            "Active records whose window grew when a new policy was applied."
        );
        describe_counter!(
            "dedup_sweep_merged_total",
            "Duplicate records absorbed by sweeps."
        );
        describe_counter!(
            "dedup_sweep_conflicts_total",
            "Sweep pairs skipped because a record changed underneath."
        );
        describe_histogram!("ingest_match_score", "Best similarity score per submission.");
    });
}

/// Normalize free text: decode entities, strip tags, fold quotes, collapse
/// whitespace, trim, cap length. Case is preserved.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| {
        regex::Regex::new(r"(?is)</?[^>]+>").expect("tag regex")
    });
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    out = out.split_whitespace().collect::<Vec<_>>().join(" ");

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    out
}

/// Lower-cased comparison key: punctuation folded to spaces, whitespace collapsed.
pub fn comparison_key(s: &str) -> String {
    let lower = s.to_lowercase();
    let folded: String = lower
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Coarse fingerprint over title + venue + day bucket (first 8 bytes of SHA-256, hex).
pub fn fingerprint(title: &str, venue: &str, bucket: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(comparison_key(title).as_bytes());
    hasher.update(b"|");
    hasher.update(comparison_key(venue).as_bytes());
    hasher.update(b"|");
    hasher.update(bucket.format("%Y-%m-%d").to_string().as_bytes());
    hex_prefix(&hasher.finalize(), 8)
}

fn hex_prefix(digest: &[u8], bytes: usize) -> String {
    use std::fmt::Write as _;
    let mut out = String::with_capacity(bytes * 2);
    for b in digest.iter().take(bytes) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Parse a collector timestamp. Accepts RFC 3339, naive date-times (UTC assumed)
/// and bare dates (midnight UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for layout in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|n| n.and_utc())
}

/// Drop negative/non-finite bounds, mirror a single bound, order the pair.
fn normalize_prices(min: Option<f64>, max: Option<f64>) -> (Option<f64>, Option<f64>) {
    let clean = |v: Option<f64>| v.filter(|x| x.is_finite() && *x >= 0.0);
    match (clean(min), clean(max)) {
        (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
        (Some(a), Some(b)) => (Some(a), Some(b)),
        (Some(a), None) => (Some(a), Some(a)),
        (None, Some(b)) => (Some(b), Some(b)),
        (None, None) => (None, None),
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.map(normalize_text).filter(|t| !t.is_empty())
}

/// Stable id for submissions that arrive without one.
pub fn derive_submission_id(raw: &RawSubmission) -> String {
    let mut hasher = Sha256::new();
    for part in [
        raw.source_name.trim().to_ascii_lowercase(),
        comparison_key(&raw.title),
        comparison_key(raw.venue_name.as_deref().unwrap_or_default()),
        raw.start_date.trim().to_string(),
        raw.end_date.as_deref().unwrap_or_default().trim().to_string(),
        format!("{:?}/{:?}", raw.price_min, raw.price_max),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\x1f");
    }
    format!("sub-{}", hex_prefix(&hasher.finalize(), 12))
}

/// Canonicalizes raw submissions using the venue directory and the source
/// registry of the retention policy.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    venues: VenueDirectory,
}

impl Normalizer {
    pub fn new(venues: VenueDirectory) -> Self {
        Self { venues }
    }

    pub fn normalize(
        &self,
        raw: &RawSubmission,
        policy: &RetentionPolicy,
    ) -> Result<NormalizedSubmission, IngestionParseError> {
        let source_name = raw.source_name.trim().to_string();
        let parse_err = |field: &'static str, reason: String| IngestionParseError {
            source_name: source_name.clone(),
            field,
            reason,
        };

        let start_date = parse_timestamp(&raw.start_date).ok_or_else(|| {
            if raw.start_date.trim().is_empty() {
                parse_err("start_date", "is missing".into())
            } else {
                parse_err(
                    "start_date",
                    format!("`{}` is not a recognised date", raw.start_date.trim()),
                )
            }
        })?;

        let mut title = normalize_text(&raw.title);
        if title.chars().count() > MAX_TITLE_CHARS {
            title = title.chars().take(MAX_TITLE_CHARS).collect();
        }
        if comparison_key(&title).is_empty() {
            return Err(parse_err("title", "is empty".into()));
        }

        let end_date = match raw.end_date.as_deref().map(str::trim) {
            None | Some("") => start_date,
            Some(s) => match parse_timestamp(s) {
                Some(end) => end.max(start_date),
                None => {
                    tracing::debug!(
                        target: "ingest",
                        source = %source_name,
                        "unparseable end_date, using start_date"
                    );
                    start_date
                }
            },
        };

        let venue = self
            .venues
            .resolve_venue(raw.venue_name.as_deref().unwrap_or_default());
        // A directory venue pins its area; the collector's area only fills in
        // for venues the directory does not know.
        let area = venue.area.clone().or_else(|| {
            raw.area
                .as_deref()
                .and_then(|a| self.venues.resolve_area(a))
        });

        let (price_min, price_max) = normalize_prices(raw.price_min, raw.price_max);

        let tags: BTreeSet<String> = raw
            .tags
            .iter()
            .map(|t| comparison_key(t))
            .filter(|t| !t.is_empty())
            .collect();

        let resolved = policy.resolve_tier(raw.source_tier.as_deref(), &source_name);

        let submission_id = raw
            .submission_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| derive_submission_id(raw));

        let fingerprint = fingerprint(&title, &venue.name, start_date.date_naive());

        Ok(NormalizedSubmission {
            submission_id,
            source_name,
            source_tier: resolved.tier,
            tier_warning: resolved.warning,
            title,
            description: non_empty(raw.description.as_deref()),
            venue_name: venue.name,
            area,
            start_date,
            end_date,
            price_min,
            price_max,
            tags,
            booking_url: raw
                .booking_url
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            fingerprint,
        })
    }
}
