//! # licd-api — License Coordination Daemon HTTP Service
//!
//! Axum service that lends named software licenses to users as leases,
//! tracks commit, plain and overage capacity per tool, and records an
//! overage charge for every borrow beyond the nominal pool.
//!
//! ## API Surface
//!
//! | Route                          | Module                   | Auth |
//! |--------------------------------|--------------------------|------|
//! | `POST /licenses/borrow`        | [`routes::licenses`]     | yes  |
//! | `POST /licenses/return`        | [`routes::licenses`]     | yes  |
//! | `POST /licenses/heartbeat`     | [`routes::licenses`]     | yes  |
//! | `GET /licenses/status`         | [`routes::licenses`]     | yes  |
//! | `GET /licenses/{tool}/status`  | [`routes::licenses`]     | yes  |
//! | `GET /borrows`                 | [`routes::borrows`]      | yes  |
//! | `GET /overage-charges`         | [`routes::borrows`]      | yes  |
//! | `GET, PUT /config/budget`      | [`routes::budget`]       | yes  |
//! | `GET /health/*`, `/version`    | this module              | no   |
//! | `GET /metrics`                 | this module              | no   |
//! | `GET /openapi.json`            | [`openapi`]              | no   |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → AuthMiddleware → Handler
//! ```

pub mod auth;
pub mod bootstrap;
pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod journal;
pub mod middleware;
pub mod openapi;
pub mod reclaim;
pub mod routes;
pub mod state;
pub mod telemetry;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::auth::AuthConfig;
use crate::state::AppState;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes, `/version`, `/metrics` and `/openapi.json` are mounted
/// outside the auth middleware so they remain accessible without
/// credentials.
pub fn app(state: AppState) -> Router {
    let auth_config = AuthConfig {
        token: state.config.auth_token.clone(),
    };
    let metrics_on = state.config.metrics_enabled;

    // Body size limit: 64 KiB. License requests are tiny.
    let mut api = Router::new()
        .merge(routes::licenses::router())
        .merge(routes::borrows::router())
        .merge(routes::budget::router())
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(from_fn(auth::auth_middleware));

    if metrics_on {
        api = api.layer(from_fn(middleware::metrics::metrics_middleware));
    }

    let api = api
        .layer(TraceLayer::new_for_http())
        .layer(axum::Extension(auth_config))
        .with_state(state.clone());

    let mut unauthenticated = Router::new()
        .route("/health/liveness", get(liveness))
        .route("/health/readiness", get(readiness))
        .route("/version", get(version))
        .merge(openapi::router());

    if metrics_on {
        unauthenticated = unauthenticated.route("/metrics", get(prometheus_metrics));
    }

    let unauthenticated = unauthenticated.with_state(state);

    Router::new().merge(unauthenticated).merge(api)
}

/// GET /metrics — Prometheus scrape endpoint.
///
/// Pool gauges are refreshed from the coordinator on each scrape.
async fn prometheus_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let Some(handle) = &state.metrics else {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response();
    };
    for pool in state.coordinator.pools() {
        telemetry::record_pool(&pool);
    }
    telemetry::journal_pending(state.outbox.len());
    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
        .into_response()
}

/// Liveness probe. Always 200 while the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe.
///
/// Fails while the database is unreachable (when one is configured).
/// Returns 200 "ready" or 503 with a diagnostic message.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }
    (StatusCode::OK, "ready").into_response()
}

#[derive(Serialize)]
struct VersionResponse {
    version: String,
}

async fn version(State(state): State<AppState>) -> Json<VersionResponse> {
    Json(VersionResponse {
        version: state.config.app_version.clone(),
    })
}
