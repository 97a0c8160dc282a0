//! # Venue Directory
//!
//! Resolves the many spellings collectors use for the same place to one
//! canonical venue name and, where known, its area.
//!
//! - Loads from JSON config (`venues` + `areas`), falling back to `default_seed()`.
//! - Case-insensitive lookup with punctuation, dashes and "the" folded away.
//! - Fallback order: exact venue alias → substring alias → unknown venue kept as-is.
//! - Area strings go through their own alias table.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

/// One venue entry: canonical display name plus optional area.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct VenueEntry {
    pub name: String,
    #[serde(default)]
    pub area: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct VenueDirectory {
    /// Normalized alias → venue.
    #[serde(default)]
    pub venues: HashMap<String, VenueEntry>,
    /// Normalized area alias → canonical area.
    #[serde(default)]
    pub areas: HashMap<String, String>,
}

/// Result of a venue lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVenue {
    pub name: String,
    pub area: Option<String>,
}

impl VenueDirectory {
    /// Load from a JSON file. Falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str::<Self>(&s)
                .map(Self::normalized_keys)
                .unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        }
    }

    fn normalized_keys(self) -> Self {
        Self {
            venues: self
                .venues
                .into_iter()
                .map(|(k, v)| (normalize(&k), v))
                .collect(),
            areas: self
                .areas
                .into_iter()
                .map(|(k, v)| (normalize(&k), v))
                .collect(),
        }
    }

    /// Resolve a venue spelling. Unknown venues keep their cleaned spelling
    /// and no area.
    pub fn resolve_venue(&self, raw: &str) -> ResolvedVenue {
        let s = normalize(raw);
        if s.is_empty() {
            return ResolvedVenue {
                name: String::new(),
                area: None,
            };
        }

        if let Some(v) = self.venues.get(&s) {
            return ResolvedVenue {
                name: v.name.clone(),
                area: v.area.clone(),
            };
        }

        // Longest alias contained in the spelling wins ("Hall 3, Dubai World Trade Centre").
        let best = self
            .venues
            .iter()
            .filter(|(k, _)| k.len() >= 4 && contains_words(&s, k))
            .max_by_key(|(k, _)| k.len());
        if let Some((_, v)) = best {
            return ResolvedVenue {
                name: v.name.clone(),
                area: v.area.clone(),
            };
        }

        ResolvedVenue {
            name: raw.split_whitespace().collect::<Vec<_>>().join(" "),
            area: None,
        }
    }

    /// Resolve an area spelling to its canonical form.
    pub fn resolve_area(&self, raw: &str) -> Option<String> {
        let s = normalize(raw);
        if s.is_empty() {
            return None;
        }
        Some(self.areas.get(&s).cloned().unwrap_or(s))
    }

    /// Built-in seed with common Dubai venues and areas.
    pub fn default_seed() -> Self {
        let mut venues = HashMap::new();
        let mut areas = HashMap::new();

        for (alias, name, area) in [
            ("jbr beach", "JBR Beach", "dubai marina"),
            ("beach jbr", "JBR Beach", "dubai marina"),
            ("jumeirah beach residence beach", "JBR Beach", "dubai marina"),
            ("dubai opera", "Dubai Opera", "downtown dubai"),
            ("opera dubai", "Dubai Opera", "downtown dubai"),
            ("dubai mall", "The Dubai Mall", "downtown dubai"),
            ("coca cola arena", "Coca-Cola Arena", "city walk"),
            ("cocacola arena", "Coca-Cola Arena", "city walk"),
            ("dubai world trade centre", "Dubai World Trade Centre", "trade centre"),
            ("dubai world trade center", "Dubai World Trade Centre", "trade centre"),
            ("dwtc", "Dubai World Trade Centre", "trade centre"),
            ("expo city dubai", "Expo City Dubai", "expo city"),
            ("expo city", "Expo City Dubai", "expo city"),
            ("global village", "Global Village", "dubailand"),
            ("kite beach", "Kite Beach", "umm suqeim"),
            ("alserkal avenue", "Alserkal Avenue", "al quoz"),
            ("la mer", "La Mer", "jumeirah"),
            ("madinat jumeirah", "Madinat Jumeirah", "jumeirah"),
            ("dubai festival city", "Dubai Festival City", "festival city"),
        ] {
            venues.insert(
                alias.to_string(),
                VenueEntry {
                    name: name.to_string(),
                    area: Some(area.to_string()),
                },
            );
        }

        for (a, c) in [
            ("jbr", "dubai marina"),
            ("marina", "dubai marina"),
            ("downtown", "downtown dubai"),
            ("burj khalifa district", "downtown dubai"),
            ("difc", "difc"),
            ("citywalk", "city walk"),
            ("al quoz industrial", "al quoz"),
            ("jumeira", "jumeirah"),
            ("dxb festival city", "festival city"),
        ] {
            areas.insert(a.to_string(), c.to_string());
        }

        Self { venues, areas }
    }
}

/// Lowercase, fold dashes/punctuation to spaces, drop a leading "the",
/// collapse whitespace.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    for ch in ['—', '–', '-', '_', '/', '\\', '@', '&'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\'', '(', ')'], " ");

    let words: Vec<&str> = out.split_whitespace().collect();
    let words = match words.first() {
        Some(&"the") => &words[1..],
        _ => &words[..],
    };
    words.join(" ")
}

/// Word-boundary containment so "la mer" does not match "gala merriment".
fn contains_words(haystack: &str, needle: &str) -> bool {
    let padded = format!(" {haystack} ");
    padded.contains(&format!(" {needle} "))
}
