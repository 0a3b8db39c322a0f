//! Geocoding provider adapter: Nominatim client, bounded retry, flag emoji,
//! and the manual override table.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};

pub const CRATE_NAME: &str = "ecotrack-geo";

/// Fallback glyph for a missing or malformed country code.
pub const GLOBE_EMOJI: &str = "🌍";

const REGIONAL_INDICATOR_OFFSET: u32 = 127_397;

/// Maps a two-letter ISO country code to its flag glyph by offsetting each
/// letter into the regional-indicator symbol range. Anything else maps to the
/// generic globe.
pub fn flag_emoji(country_code: &str) -> String {
    let code = country_code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return GLOBE_EMOJI.to_string();
    }
    let mut flag = String::new();
    for ch in code.chars() {
        match char::from_u32(ch.to_ascii_uppercase() as u32 + REGIONAL_INDICATOR_OFFSET) {
            Some(indicator) => flag.push(indicator),
            None => return GLOBE_EMOJI.to_string(),
        }
    }
    flag
}

/// Successful provider response for one free-text query.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub latitude: f64,
    pub longitude: f64,
    pub display_name: String,
    pub country_code: Option<String>,
}

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocode request timed out: {0}")]
    Timeout(String),
    #[error("geocode request failed: {0}")]
    Request(String),
    #[error("geocoder returned http status {0}")]
    HttpStatus(StatusCode),
    #[error("geocoder response could not be decoded: {0}")]
    Decode(String),
}

impl GeocodeError {
    /// Only timeout-class failures are worth another attempt.
    pub fn is_timeout_class(&self) -> bool {
        matches!(self, GeocodeError::Timeout(_))
    }
}

pub fn classify_reqwest_error(err: reqwest::Error) -> GeocodeError {
    if err.is_timeout() || err.is_connect() {
        GeocodeError::Timeout(err.to_string())
    } else {
        GeocodeError::Request(err.to_string())
    }
}

/// Single request/response call against an external geocoding service.
///
/// `Ok(None)` means the provider answered but found no match; that is a
/// permanent outcome and is never retried.
#[async_trait]
pub trait GeocodeProvider: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>, GeocodeError>;
}

#[derive(Debug, Clone)]
pub struct NominatimConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for NominatimConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org".to_string(),
            user_agent: "ecotrack/0.1".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Thin adapter over the Nominatim search API. Network I/O only, no state.
#[derive(Debug, Clone)]
pub struct NominatimClient {
    http: reqwest::Client,
    endpoint: String,
}

impl NominatimClient {
    pub fn new(config: NominatimConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    display_name: String,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country_code: Option<String>,
}

#[async_trait]
impl GeocodeProvider for NominatimClient {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>, GeocodeError> {
        let url = format!("{}/search", self.endpoint);
        let response = self
            .http
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::HttpStatus(status));
        }

        let places: Vec<NominatimPlace> = response
            .json()
            .await
            .map_err(|err| GeocodeError::Decode(err.to_string()))?;
        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };
        let (Ok(latitude), Ok(longitude)) = (place.lat.parse::<f64>(), place.lon.parse::<f64>())
        else {
            return Err(GeocodeError::Decode(format!(
                "non-numeric coordinates {}/{}",
                place.lat, place.lon
            )));
        };

        Ok(Some(GeoHit {
            latitude,
            longitude,
            display_name: place.display_name,
            country_code: place.address.and_then(|a| a.country_code),
        }))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Additional attempts after the first, timeout-class failures only.
    pub max_retries: usize,
    /// Fixed delay between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Retry wrapper around a [`GeocodeProvider`].
///
/// `geocode` never surfaces an error: a batch of enrichments must degrade per
/// location, not abort, so every failure path collapses to `None` with a
/// warning log line.
#[derive(Debug, Clone)]
pub struct Geocoder<P> {
    provider: P,
    policy: RetryPolicy,
}

impl<P: GeocodeProvider> Geocoder<P> {
    pub fn new(provider: P, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    pub async fn geocode(&self, query: &str) -> Option<GeoHit> {
        let span = info_span!("geocode", query);
        self.geocode_with_retry(query).instrument(span).await
    }

    async fn geocode_with_retry(&self, query: &str) -> Option<GeoHit> {
        for attempt in 0..=self.policy.max_retries {
            match self.provider.lookup(query).await {
                Ok(hit) => return hit,
                Err(err) if err.is_timeout_class() && attempt < self.policy.max_retries => {
                    warn!(query, attempt, %err, "geocode timed out; retrying after backoff");
                    tokio::time::sleep(self.policy.backoff).await;
                }
                Err(err) => {
                    warn!(query, %err, "geocode failed; leaving location unresolved");
                    return None;
                }
            }
        }
        None
    }
}

/// Fixed coordinates for known-problematic names, consulted before any
/// network call. Keys are lower-cased canonical names; an override wins even
/// over a previously-resolved cache entry and is never recorded as failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualOverride {
    pub latitude: f64,
    pub longitude: f64,
    pub emoji: String,
    pub address: String,
}

#[derive(Debug, Clone, Default)]
pub struct ManualOverrides {
    entries: HashMap<String, ManualOverride>,
}

impl ManualOverrides {
    pub fn new(entries: HashMap<String, ManualOverride>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(key, value)| (key.to_lowercase(), value))
            .collect();
        Self { entries }
    }

    /// Overrides shipped with the application.
    pub fn builtin() -> Self {
        let mut entries = HashMap::new();
        entries.insert(
            "hotu, kenya".to_string(),
            ManualOverride {
                latitude: -1.95,
                longitude: 30.06,
                emoji: "🇷🇼".to_string(),
                address: "Hotu, Rwanda".to_string(),
            },
        );
        Self { entries }
    }

    pub fn lookup(&self, canonical: &str) -> Option<&ManualOverride> {
        self.entries.get(&canonical.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
