//! Event and region persistence: Postgres stores plus in-memory doubles.
//!
//! The traits are the seams the orchestrator and aggregation engine are
//! written against. The in-memory implementations back tests and demos; the
//! Postgres implementations are the production path.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use ecotrack_core::{Event, NewEvent, RegionRecord, RegionUpdate};

pub const CRATE_NAME: &str = "ecotrack-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Contributor and raw location of one recorded event; the minimal row shape
/// the aggregation engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLocation {
    pub contributor: String,
    pub raw_location: Option<String>,
}

/// Read-side event primitives. Events are owned by the ingestion layer; this
/// subsystem only ever reads them.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// One entry per event: contributor plus raw location string.
    async fn location_events(&self) -> StoreResult<Vec<EventLocation>>;

    /// Distinct non-blank raw location strings, for the batch sweep.
    async fn distinct_raw_locations(&self) -> StoreResult<Vec<String>>;
}

/// Write side of the event log.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(&self, event: NewEvent) -> StoreResult<Event>;
}

/// Persistent region cache keyed by canonical location name.
#[async_trait]
pub trait RegionStore: Send + Sync {
    /// Returns the record for `name`, creating a blank one if absent, plus
    /// whether this call created it. Must be atomic with respect to the
    /// unique-name invariant: a create race resolves to fetching the row the
    /// winner inserted, never to an error or a duplicate.
    async fn get_or_create(&self, name: &str) -> StoreResult<(RegionRecord, bool)>;

    async fn fetch(&self, name: &str) -> StoreResult<Option<RegionRecord>>;

    async fn fetch_by_names(&self, names: &[String]) -> StoreResult<Vec<RegionRecord>>;

    /// Overwrites the geocoded fields and bumps `last_updated`. Never deletes.
    async fn update(&self, name: &str, update: RegionUpdate) -> StoreResult<RegionRecord>;
}

pub async fn connect_pool(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventStore {
    async fn record(&self, event: NewEvent) -> StoreResult<Event> {
        let stored = Event {
            id: Uuid::new_v4(),
            contributor: event.contributor,
            action: event.action,
            location: event.location,
            recorded_at: Utc::now(),
        };
        sqlx::query(
            r#"
            INSERT INTO events (id, contributor, action_type, location, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(stored.id)
        .bind(&stored.contributor)
        .bind(stored.action.code())
        .bind(&stored.location)
        .bind(stored.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(stored)
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn location_events(&self) -> StoreResult<Vec<EventLocation>> {
        let rows = sqlx::query("SELECT contributor, location FROM events")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(EventLocation {
                contributor: row.try_get("contributor")?,
                raw_location: row.try_get("location")?,
            });
        }
        Ok(out)
    }

    async fn distinct_raw_locations(&self) -> StoreResult<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT location
              FROM events
             WHERE location IS NOT NULL
               AND btrim(location) <> ''
             ORDER BY location
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(row.try_get("location")?);
        }
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct PgRegionStore {
    pool: PgPool,
}

impl PgRegionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_region(row: &PgRow) -> StoreResult<RegionRecord> {
    Ok(RegionRecord {
        name: row.try_get("name")?,
        latitude: row.try_get("latitude")?,
        longitude: row.try_get("longitude")?,
        emoji: row.try_get("emoji")?,
        address: row.try_get("address")?,
        last_updated: row.try_get("last_updated")?,
    })
}

#[async_trait]
impl RegionStore for PgRegionStore {
    async fn get_or_create(&self, name: &str) -> StoreResult<(RegionRecord, bool)> {
        // The unique constraint is the source of truth: ON CONFLICT DO NOTHING
        // returns no row when another writer won the insert race, and the
        // follow-up select fetches the winner's row.
        let inserted = sqlx::query(
            r#"
            INSERT INTO region_records (name, last_updated)
            VALUES ($1, NOW())
            ON CONFLICT (name) DO NOTHING
            RETURNING name, latitude, longitude, emoji, address, last_updated
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((row_to_region(&row)?, true));
        }

        let row = sqlx::query(
            r#"
            SELECT name, latitude, longitude, emoji, address, last_updated
              FROM region_records
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok((row_to_region(&row)?, false))
    }

    async fn fetch(&self, name: &str) -> StoreResult<Option<RegionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT name, latitude, longitude, emoji, address, last_updated
              FROM region_records
             WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_region).transpose()
    }

    async fn fetch_by_names(&self, names: &[String]) -> StoreResult<Vec<RegionRecord>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT name, latitude, longitude, emoji, address, last_updated
              FROM region_records
             WHERE name = ANY($1)
            "#,
        )
        .bind(names)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_region).collect()
    }

    async fn update(&self, name: &str, update: RegionUpdate) -> StoreResult<RegionRecord> {
        let row = sqlx::query(
            r#"
            UPDATE region_records
               SET latitude = $2,
                   longitude = $3,
                   emoji = $4,
                   address = $5,
                   last_updated = NOW()
             WHERE name = $1
            RETURNING name, latitude, longitude, emoji, address, last_updated
            "#,
        )
        .bind(name)
        .bind(update.latitude)
        .bind(update.longitude)
        .bind(&update.emoji)
        .bind(&update.address)
        .fetch_one(&self.pool)
        .await?;
        row_to_region(&row)
    }
}

/// In-memory event log. A single mutex over the vector keeps appends and
/// reads consistent.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<Mutex<Vec<Event>>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }
}

#[async_trait]
impl EventSink for MemoryEventStore {
    async fn record(&self, event: NewEvent) -> StoreResult<Event> {
        let stored = Event {
            id: Uuid::new_v4(),
            contributor: event.contributor,
            action: event.action,
            location: event.location,
            recorded_at: Utc::now(),
        };
        self.events.lock().await.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn location_events(&self) -> StoreResult<Vec<EventLocation>> {
        Ok(self
            .events
            .lock()
            .await
            .iter()
            .map(|event| EventLocation {
                contributor: event.contributor.clone(),
                raw_location: event.location.clone(),
            })
            .collect())
    }

    async fn distinct_raw_locations(&self) -> StoreResult<Vec<String>> {
        let mut seen = Vec::new();
        for event in self.events.lock().await.iter() {
            if let Some(location) = &event.location {
                if !location.trim().is_empty() && !seen.contains(location) {
                    seen.push(location.clone());
                }
            }
        }
        Ok(seen)
    }
}

/// In-memory region cache. The map mutex plays the role of the database
/// uniqueness constraint: concurrent `get_or_create` calls for one new name
/// produce exactly one record.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegionStore {
    records: Arc<Mutex<HashMap<String, RegionRecord>>>,
}

impl MemoryRegionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegionStore for MemoryRegionStore {
    async fn get_or_create(&self, name: &str) -> StoreResult<(RegionRecord, bool)> {
        let mut records = self.records.lock().await;
        if let Some(existing) = records.get(name) {
            return Ok((existing.clone(), false));
        }
        let record = RegionRecord {
            name: name.to_string(),
            latitude: None,
            longitude: None,
            emoji: None,
            address: None,
            last_updated: Utc::now(),
        };
        records.insert(name.to_string(), record.clone());
        Ok((record, true))
    }

    async fn fetch(&self, name: &str) -> StoreResult<Option<RegionRecord>> {
        Ok(self.records.lock().await.get(name).cloned())
    }

    async fn fetch_by_names(&self, names: &[String]) -> StoreResult<Vec<RegionRecord>> {
        let records = self.records.lock().await;
        Ok(names
            .iter()
            .filter_map(|name| records.get(name).cloned())
            .collect())
    }

    async fn update(&self, name: &str, update: RegionUpdate) -> StoreResult<RegionRecord> {
        let mut records = self.records.lock().await;
        let record = records
            .get_mut(name)
            .ok_or(StoreError::Database(sqlx::Error::RowNotFound))?;
        record.latitude = update.latitude;
        record.longitude = update.longitude;
        record.emoji = update.emoji;
        record.address = update.address;
        record.last_updated = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecotrack_core::ActionKind;

    fn new_event(contributor: &str, location: Option<&str>) -> NewEvent {
        NewEvent {
            contributor: contributor.to_string(),
            action: ActionKind::Recycle,
            location: location.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn memory_event_store_records_and_lists() {
        let store = MemoryEventStore::new();
        store.record(new_event("amina", Some("Nairobi"))).await.unwrap();
        store.record(new_event("brian", None)).await.unwrap();

        let rows = store.location_events().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].contributor, "amina");
        assert_eq!(rows[0].raw_location.as_deref(), Some("Nairobi"));
        assert_eq!(rows[1].raw_location, None);
    }

    #[tokio::test]
    async fn distinct_raw_locations_skip_blank_and_duplicates() {
        let store = MemoryEventStore::new();
        store.record(new_event("amina", Some("Nairobi"))).await.unwrap();
        store.record(new_event("brian", Some("Nairobi"))).await.unwrap();
        store.record(new_event("celine", Some("  "))).await.unwrap();
        store.record(new_event("david", None)).await.unwrap();
        store.record(new_event("esther", Some("Kisumu"))).await.unwrap();

        assert_eq!(
            store.distinct_raw_locations().await.unwrap(),
            vec!["Nairobi".to_string(), "Kisumu".to_string()]
        );
    }

    #[tokio::test]
    async fn get_or_create_reports_creation_exactly_once() {
        let store = MemoryRegionStore::new();
        let (first, created) = store.get_or_create("Nairobi, Kenya").await.unwrap();
        assert!(created);
        assert!(!first.is_resolved());

        let (second, created) = store.get_or_create("Nairobi, Kenya").await.unwrap();
        assert!(!created);
        assert_eq!(second.name, first.name);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_yields_one_record() {
        let store = MemoryRegionStore::new();
        let (a, b) = tokio::join!(
            store.get_or_create("Eldoret, Kenya"),
            store.get_or_create("Eldoret, Kenya")
        );
        let (_, created_a) = a.unwrap();
        let (_, created_b) = b.unwrap();
        assert!(created_a ^ created_b, "exactly one caller creates the row");
    }

    #[tokio::test]
    async fn update_overwrites_fields_and_bumps_timestamp() {
        let store = MemoryRegionStore::new();
        let (record, _) = store.get_or_create("Kisumu, Kenya").await.unwrap();

        let updated = store
            .update(
                "Kisumu, Kenya",
                RegionUpdate {
                    latitude: Some(-0.0917),
                    longitude: Some(34.768),
                    emoji: Some("🇰🇪".into()),
                    address: Some("Kisumu, Kenya".into()),
                },
            )
            .await
            .unwrap();
        assert!(updated.is_resolved());
        assert!(updated.last_updated >= record.last_updated);

        let fetched = store.fetch("Kisumu, Kenya").await.unwrap().unwrap();
        assert_eq!(fetched.latitude, Some(-0.0917));
    }

    #[tokio::test]
    async fn update_of_missing_record_is_an_error() {
        let store = MemoryRegionStore::new();
        let result = store.update("Nowhere", RegionUpdate::default()).await;
        assert!(result.is_err());
    }
}
