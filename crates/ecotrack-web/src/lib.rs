//! Axum JSON API for EcoTrack: action ingestion and the region summary.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use ecotrack_core::{ActionKind, NewEvent};
use ecotrack_enrich::{AggregationEngine, AppConfig, Caller, Enricher, maybe_build_sweep_scheduler};
use ecotrack_geo::{GeocodeProvider, ManualOverrides};
use ecotrack_storage::{
    connect_pool, run_migrations, EventSink, EventStore, PgEventStore, PgRegionStore, RegionStore,
};

pub const CRATE_NAME: &str = "ecotrack-web";

/// Role header read by the summary endpoint. The value `staff` lifts the
/// region-count cap; trust in it is delegated to a fronting proxy.
pub const ROLE_HEADER: &str = "x-ecotrack-role";

pub struct AppState<E, R, P> {
    pub events: E,
    pub enricher: Arc<Enricher<R, P>>,
    pub aggregator: AggregationEngine<E, R>,
}

impl<E, R, P> AppState<E, R, P>
where
    E: EventStore + Clone,
    R: RegionStore + Clone,
    P: GeocodeProvider,
{
    pub fn new(events: E, regions: R, enricher: Enricher<R, P>) -> Self
    where
        E: EventSink,
    {
        let aggregator = AggregationEngine::new(
            events.clone(),
            regions,
            ecotrack_core::LocationNormalizer::default(),
        );
        Self {
            events,
            enricher: Arc::new(enricher),
            aggregator,
        }
    }
}

pub fn app<E, R, P>(state: AppState<E, R, P>) -> Router
where
    E: EventStore + EventSink + Clone + 'static,
    R: RegionStore + 'static,
    P: GeocodeProvider + 'static,
{
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/actions", post(record_action_handler::<E, R, P>))
        .route("/api/regions/summary", get(region_summary_handler::<E, R, P>))
        .with_state(Arc::new(state))
}

/// Wires the production stack from the environment and serves until shutdown.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    let pool = connect_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let events = PgEventStore::new(pool.clone());
    let regions = PgRegionStore::new(pool);
    let enricher = Enricher::new(
        regions.clone(),
        config.geocoder()?,
        ManualOverrides::builtin(),
        config.normalizer(),
    );
    let state = AppState::new(events.clone(), regions, enricher);

    if let Some(sched) =
        maybe_build_sweep_scheduler(&config, Arc::clone(&state.enricher), events).await?
    {
        sched.start().await?;
        info!(cron = %config.sweep_cron, "region sweep scheduler started");
    }

    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    info!(port = config.web_port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub contributor: String,
    pub action: ActionKind,
    pub location: Option<String>,
}

async fn healthz_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn record_action_handler<E, R, P>(
    State(state): State<Arc<AppState<E, R, P>>>,
    Json(request): Json<ActionRequest>,
) -> Response
where
    E: EventStore + EventSink + Clone + 'static,
    R: RegionStore + 'static,
    P: GeocodeProvider + 'static,
{
    if request.contributor.trim().is_empty() {
        return bad_request("contributor must not be blank");
    }

    let event = match state
        .events
        .record(NewEvent {
            contributor: request.contributor,
            action: request.action,
            location: request.location,
        })
        .await
    {
        Ok(event) => event,
        Err(err) => return server_error(err.into()),
    };

    // Enrichment is best effort and must not delay or fail the ingest; the
    // nightly sweep picks up whatever this attempt misses.
    let enricher = Arc::clone(&state.enricher);
    let location = event.location.clone();
    tokio::spawn(async move {
        if let Err(err) = enricher.ensure_enriched(location.as_deref()).await {
            warn!(%err, "post-ingest enrichment failed");
        }
    });

    (StatusCode::CREATED, Json(event)).into_response()
}

async fn region_summary_handler<E, R, P>(
    State(state): State<Arc<AppState<E, R, P>>>,
    headers: HeaderMap,
) -> Response
where
    E: EventStore + EventSink + Clone + 'static,
    R: RegionStore + 'static,
    P: GeocodeProvider + 'static,
{
    let caller = Caller {
        privileged: headers
            .get(ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("staff"))
            .unwrap_or(false),
    };
    match state.aggregator.summarize(&caller).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err) => server_error(err),
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(%err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}
