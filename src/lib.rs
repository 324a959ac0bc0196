//! Sharded bandwidth metering for an edge fleet.
//!
//! Edge nodes report per-tenant traffic in 5-minute buckets. Samples are
//! partitioned across a fixed set of tables by tenant, queried for peaks,
//! percentiles and gap-filled series, and purged after a retention horizon.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

pub mod auth;
pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod retention;
pub mod routes;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<config::MeterConfig>,
    pub db: Arc<db::DbPool>,
    pub services: services::Services,
    /// Verifies RPC tokens against the configured node credentials.
    pub verifier: Arc<auth::TokenVerifier>,
    /// Shared with the background loop so admin RPCs sweep with the same policy.
    pub sweeper: retention::RetentionSweeper,
}

impl AppState {
    /// Connect to the configured store, run migrations if enabled, and wire
    /// up services.
    pub async fn new(config: config::MeterConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = db::DbPool::from_config(&config.database).await?;
        if config.database.run_migrations() {
            db.run_migrations().await?;
        }
        Ok(Self::with_db(config, Arc::new(db)))
    }

    /// Build state around an existing pool.
    pub fn with_db(config: config::MeterConfig, db: Arc<db::DbPool>) -> Self {
        let services = services::Services::new(Arc::clone(&db));
        let verifier = Arc::new(auth::TokenVerifier::from_config(&config.auth));
        let sweeper =
            retention::RetentionSweeper::new(services.bandwidth.clone(), config.retention.clone());
        Self {
            config: Arc::new(config),
            db,
            services,
            verifier,
            sweeper,
        }
    }
}

pub fn build_app(config: &config::MeterConfig, state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/health/live", get(routes::health::liveness))
        .route("/health/ready", get(routes::health::readiness));

    if config.observability.metrics.enabled {
        app = app.route(
            &config.observability.metrics.path,
            get(routes::health::metrics),
        );
    }

    app.nest("/rpc", routes::rpc_routes(state.clone()))
        .layer(axum::middleware::from_fn(
            middleware::request_id_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(config.server.timeout()))
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes))
        .with_state(state)
}
