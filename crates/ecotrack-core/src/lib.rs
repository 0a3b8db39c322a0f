//! Core domain model and location canonicalization for EcoTrack.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "ecotrack-core";

/// Country appended to city-only locations when no other country is named.
pub const DEFAULT_COUNTRY: &str = "Kenya";

/// Raw inputs treated as "no location given" (compared lower-cased, trimmed).
pub const UNSPECIFIED_SENTINELS: &[&str] = &["none", "unknown", "unknown region"];

/// Category tag for a logged action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Walk,
    Solar,
    Recycle,
    Plant,
    Refill,
    Bike,
    Compost,
    Share,
    Repair,
    SaveWater,
}

impl ActionKind {
    pub const ALL: [ActionKind; 10] = [
        ActionKind::Walk,
        ActionKind::Solar,
        ActionKind::Recycle,
        ActionKind::Plant,
        ActionKind::Refill,
        ActionKind::Bike,
        ActionKind::Compost,
        ActionKind::Share,
        ActionKind::Repair,
        ActionKind::SaveWater,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            ActionKind::Walk => "walk",
            ActionKind::Solar => "solar",
            ActionKind::Recycle => "recycle",
            ActionKind::Plant => "plant",
            ActionKind::Refill => "refill",
            ActionKind::Bike => "bike",
            ActionKind::Compost => "compost",
            ActionKind::Share => "share",
            ActionKind::Repair => "repair",
            ActionKind::SaveWater => "save_water",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ActionKind::Walk => "🚶 Walked instead of driving",
            ActionKind::Solar => "☀️ Used solar power",
            ActionKind::Recycle => "♻️ Recycled waste",
            ActionKind::Plant => "🌳 Planted a tree",
            ActionKind::Refill => "🧴 Used refillable container",
            ActionKind::Bike => "🚴 Rode a bicycle",
            ActionKind::Compost => "🍂 Composted organic waste",
            ActionKind::Share => "📤 Shared eco tips online",
            ActionKind::Repair => "🔧 Repaired instead of replacing",
            ActionKind::SaveWater => "💧 Conserved water",
        }
    }

    pub fn parse(code: &str) -> Option<ActionKind> {
        ActionKind::ALL.iter().copied().find(|k| k.code() == code)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Immutable record of one user-submitted action. Never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub contributor: String,
    pub action: ActionKind,
    pub location: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Submission payload before the store assigns identity and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub contributor: String,
    pub action: ActionKind,
    pub location: Option<String>,
}

/// Geocoded metadata cached per canonical location name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub emoji: Option<String>,
    pub address: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl RegionRecord {
    /// A record with coordinates is settled and is not re-fetched.
    pub fn is_resolved(&self) -> bool {
        self.latitude.is_some()
    }
}

/// Field overwrite applied by the enrichment orchestrator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RegionUpdate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub emoji: Option<String>,
    pub address: Option<String>,
}

/// Normalizer verdict: either a canonical group key or the unspecified bucket.
///
/// Null, empty, and the explicit unknown-region sentinel all collapse into
/// `Unspecified` so downstream code never special-cases the three separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalLocation {
    Unspecified,
    Named(String),
}

impl CanonicalLocation {
    pub fn as_named(&self) -> Option<&str> {
        match self {
            CanonicalLocation::Unspecified => None,
            CanonicalLocation::Named(name) => Some(name),
        }
    }
}

/// Pure raw-string-to-canonical-key normalizer.
///
/// Deterministic and side-effect free; distinct raw spellings collapsing to
/// one canonical string is the intended deduplication.
#[derive(Debug, Clone)]
pub struct LocationNormalizer {
    default_country: String,
}

impl Default for LocationNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTRY)
    }
}

impl LocationNormalizer {
    pub fn new(default_country: impl Into<String>) -> Self {
        Self {
            default_country: default_country.into(),
        }
    }

    pub fn default_country(&self) -> &str {
        &self.default_country
    }

    pub fn normalize(&self, raw: Option<&str>) -> CanonicalLocation {
        let trimmed = match raw {
            Some(raw) => raw.trim(),
            None => return CanonicalLocation::Unspecified,
        };
        if trimmed.is_empty() {
            return CanonicalLocation::Unspecified;
        }
        let lowered = trimmed.to_lowercase();
        if UNSPECIFIED_SENTINELS.contains(&lowered.as_str()) {
            return CanonicalLocation::Unspecified;
        }

        let mut canonical = title_case(trimmed);
        if canonical.to_lowercase().starts_with("none ") {
            canonical = canonical[5..].trim_start().to_string();
        }

        let lowered = canonical.to_lowercase();
        if !canonical.contains(',') && !lowered.ends_with(&self.default_country.to_lowercase()) {
            canonical.push_str(", ");
            canonical.push_str(&self.default_country);
        }

        CanonicalLocation::Named(canonical)
    }
}

/// Upper-cases each alphabetic char that follows a non-alphabetic boundary,
/// lower-cases the rest ("nairobi west" -> "Nairobi West").
fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if at_word_start {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(ch);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalizer() -> LocationNormalizer {
        LocationNormalizer::default()
    }

    #[test]
    fn null_empty_and_sentinels_are_unspecified() {
        let n = normalizer();
        assert_eq!(n.normalize(None), CanonicalLocation::Unspecified);
        assert_eq!(n.normalize(Some("")), CanonicalLocation::Unspecified);
        assert_eq!(n.normalize(Some("   ")), CanonicalLocation::Unspecified);
        assert_eq!(n.normalize(Some("none")), CanonicalLocation::Unspecified);
        assert_eq!(n.normalize(Some("Unknown")), CanonicalLocation::Unspecified);
        assert_eq!(
            n.normalize(Some("unknown region")),
            CanonicalLocation::Unspecified
        );
        assert_eq!(
            n.normalize(Some("Unknown Region")),
            CanonicalLocation::Unspecified
        );
    }

    #[test]
    fn casing_and_whitespace_collapse_to_one_key() {
        let n = normalizer();
        assert_eq!(n.normalize(Some(" nairobi ")), n.normalize(Some("Nairobi")));
        assert_eq!(
            n.normalize(Some("NAIROBI")),
            CanonicalLocation::Named("Nairobi, Kenya".into())
        );
    }

    #[test]
    fn city_only_input_gets_default_country() {
        let n = normalizer();
        assert_eq!(
            n.normalize(Some("mombasa")),
            CanonicalLocation::Named("Mombasa, Kenya".into())
        );
        // Already carries a comma: left alone.
        assert_eq!(
            n.normalize(Some("kigali, rwanda")),
            CanonicalLocation::Named("Kigali, Rwanda".into())
        );
        // Already ends with the default country: not doubled.
        assert_eq!(
            n.normalize(Some("western kenya")),
            CanonicalLocation::Named("Western Kenya".into())
        );
    }

    #[test]
    fn leading_none_remnant_is_stripped() {
        let n = normalizer();
        assert_eq!(
            n.normalize(Some("none Nakuru")),
            CanonicalLocation::Named("Nakuru, Kenya".into())
        );
    }

    #[test]
    fn custom_default_country_is_honored() {
        let n = LocationNormalizer::new("Rwanda");
        assert_eq!(
            n.normalize(Some("kigali")),
            CanonicalLocation::Named("Kigali, Rwanda".into())
        );
    }

    #[test]
    fn title_case_follows_non_alpha_boundaries() {
        assert_eq!(title_case("nairobi,kenya"), "Nairobi,Kenya");
        assert_eq!(title_case("fort-portal"), "Fort-Portal");
    }

    #[test]
    fn action_kind_codes_round_trip() {
        for kind in ActionKind::ALL {
            assert_eq!(ActionKind::parse(kind.code()), Some(kind));
            assert!(!kind.label().is_empty());
        }
        assert_eq!(ActionKind::parse("drive"), None);
        assert_eq!(ActionKind::SaveWater.to_string(), "save_water");
    }
}
