//! # csactl: Cold Start Analyzer service
//!
//! `csactl` receives per-invocation telemetry from serverless functions instrumented with the
//! [`coldtrace`](../coldtrace/index.html) collector, stores it, and answers the question "how
//! often do my functions start cold, how long does init take, and which dependencies make it
//! slow?".
//!
//! ## Overview
//!
//! Collectors send one JSON envelope per sampled invocation to `POST /api/v1/ingest`, or many
//! at once to `POST /api/v1/ingest/batch`. Each envelope names its function; the service finds
//! or creates that function inside the caller's project and appends the invocation. Nothing is
//! aggregated on write. Reads (`GET /api/v1/functions`, `GET /api/v1/functions/{id}`) load the
//! most recent invocations inside a time window and compute cold start rate, init and execution
//! duration percentiles, a per-dependency load time breakdown and a ranked list of dependencies
//! worth loading lazily.
//!
//! ## Architecture
//!
//! The HTTP layer is [Axum](https://github.com/tokio-rs/axum). Storage sits behind the
//! [`db::TelemetryStore`] trait with a PostgreSQL implementation for production and an
//! in-memory one for development and tests; `database.type` in the configuration selects it.
//!
//! ### Request flow
//!
//! Every route except `/health` passes through an API key middleware ([`auth::middleware`])
//! that hashes the `X-API-Key` header, looks up the key, and charges the key's token bucket
//! ([`limits`]) for the route kind: ingest and query budgets are separate. Authentication and
//! rate limiting happen once per HTTP call, before the body is read, so a batch of 1000
//! envelopes costs the same as one. Handlers then call into [`ingest`] or [`aggregation`].
//!
//! Errors map to a fixed taxonomy (see [`errors::ErrorCode`]) and always produce a
//! `{detail, error_code, timestamp}` body.
//!
//! ## Configuration
//!
//! YAML (`-f config.yaml`) overlaid with `CSACTL_`-prefixed environment variables, `__`
//! separating nested keys, plus `DATABASE_URL`. See [`config::Config`].
//!
//! ## Onboarding
//!
//! There is no key management API. Keys are issued from the command line:
//!
//! ```bash
//! csactl -f config.yaml --create-api-key acme --project-name "Acme Corp"
//! ```
//!
//! which creates the project if it does not exist and prints the key once.

pub mod aggregation;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod ingest;
pub mod limits;
pub mod metrics;
pub mod openapi;
pub mod telemetry;
#[cfg(test)]
mod test;
#[cfg(test)]
pub mod test_utils;
pub mod types;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{self, HeaderName, HeaderValue},
    middleware::from_fn_with_state,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

pub use config::Config;
use config::{CorsOrigin, DatabaseConfig};
use db::{InMemoryStore, PostgresStore, TelemetryStore};
use limits::RateLimiter;
use openapi::ApiDoc;

/// Shared by every handler and middleware.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn TelemetryStore>,
    pub limiter: Arc<RateLimiter>,
}

/// Get the csactl database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured store. For PostgreSQL this also runs pending migrations.
#[instrument(skip_all, err)]
pub async fn setup_store(config: &Config) -> anyhow::Result<Arc<dyn TelemetryStore>> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory storage; data is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        DatabaseConfig::External { url, pool } => {
            info!("Connecting to PostgreSQL");
            Ok(Arc::new(PostgresStore::connect(url, pool).await?))
        }
    }
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let cors = &config.cors;
    let allow_origin = if cors.allowed_origins.iter().any(|o| matches!(o, CorsOrigin::Wildcard)) {
        AllowOrigin::any()
    } else {
        let origins = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin {
                CorsOrigin::Url(url) => Some(url.origin().ascii_serialization().parse::<HeaderValue>()),
                CorsOrigin::Wildcard => None,
            })
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([http::header::CONTENT_TYPE, HeaderName::from_static("x-api-key")]);
    if let Some(max_age) = cors.max_age {
        layer = layer.max_age(std::time::Duration::from_secs(max_age));
    }
    Ok(layer)
}

/// Build the router: `/api/v1` routes behind their auth middleware, the docs UI, optional
/// Prometheus metrics, CORS and request tracing.
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let ingest_routes = Router::new()
        .route("/ingest", post(api::handlers::ingest::ingest))
        .route("/ingest/batch", post(api::handlers::ingest::ingest_batch_handler))
        .layer(DefaultBodyLimit::max(state.config.ingest.max_body_bytes))
        .route_layer(from_fn_with_state(state.clone(), auth::middleware::ingest_guard));

    let query_routes = Router::new()
        .route("/functions", get(api::handlers::functions::list_functions))
        .route("/functions/{id}", get(api::handlers::functions::get_function))
        .route_layer(from_fn_with_state(state.clone(), auth::middleware::query_guard));

    let api_routes = Router::new()
        .merge(ingest_routes)
        .merge(query_routes)
        .route("/health", get(api::handlers::health::health))
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .with_state(state.clone());

    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .merge(Scalar::with_url("/api/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    Ok(router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    ))
}

pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting csactl with configuration: {:#?}", config);
        let store = setup_store(&config).await?;
        Self::with_store(config, store)
    }

    /// Build the application around an existing store.
    pub fn with_store(config: Config, store: Arc<dyn TelemetryStore>) -> anyhow::Result<Self> {
        let app_state = AppState::builder()
            .config(Arc::new(config.clone()))
            .store(store)
            .limiter(Arc::new(RateLimiter::new(&config.rate_limits)))
            .build();
        let router = build_router(&app_state)?;
        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve_on<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let stop = CancellationToken::new();
        let pruner = limits::spawn_pruner(
            self.app_state.limiter.clone(),
            self.config.rate_limits.prune_interval,
            stop.clone(),
        );

        let result = axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await;

        stop.cancel();
        let _ = pruner.await;
        result?;
        Ok(())
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "csactl listening on http://{}, docs at http://localhost:{}/api/docs",
            bind_addr, self.config.port
        );

        self.serve_on(listener, shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();
        Ok(())
    }
}
