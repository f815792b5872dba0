//! # cashlock-api: HTTP Service for Reconciliation and Certification
//!
//! Axum application exposing the reconciliation engine: snapshots,
//! statement imports, matching runs, allocations, exceptions, trust
//! reports, the gated lock, and external certification.
//!
//! ## API Surface
//!
//! | Prefix                                  | Module                          |
//! |-----------------------------------------|---------------------------------|
//! | `/v1/snapshots`, `/v1/snapshots/{id}`   | [`routes::snapshots`]           |
//! | `/v1/snapshots/{id}/invoices`, `fx-rates` | [`routes::ledger`]            |
//! | `/v1/snapshots/{id}/imports[/bulk]`     | [`routes::imports`]             |
//! | `/v1/snapshots/{id}/matching-runs`      | [`routes::matching`]            |
//! | `/v1/snapshots/{id}/allocations/*`      | [`routes::allocations`]         |
//! | `/v1/snapshots/{id}/washes/*`           | [`routes::washes`]              |
//! | `/v1/snapshots/{id}/exceptions/*`       | [`routes::exceptions`]          |
//! | `/v1/snapshots/{id}/trust-report`, `invariant-runs` | [`routes::trust`]   |
//! | `/v1/snapshots/{id}/submit`, `reopen`, `lock` | [`routes::lifecycle`]     |
//! | `/v1/snapshots/{id}/certifications`, `/v1/certifications/*` | [`routes::certifications`] |
//! | `/v1/policies/{entity_id}`              | [`routes::policies`]            |
//! | `/v1/jobs/{id}`                         | [`routes::jobs`]                |
//! | `/v1/audit`                             | [`routes::audit`]               |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → Handler
//! ```
//!
//! ## OpenAPI
//!
//! Auto-generated OpenAPI 3.1 spec via utoipa derive macros at `/openapi.json`.

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod jobs;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod state;

pub use config::{AppConfig, EngineConfig};
pub use error::AppError;
pub use state::AppState;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::response::IntoResponse;
use axum::Router;
use tower_http::trace::TraceLayer;

/// Assemble the full application router with all routes and middleware.
///
/// Health probes and `/metrics` sit outside the metrics middleware so
/// scrapes do not count themselves.
pub fn app(state: AppState) -> Router {
    // Body size limit: 2 MiB, except bulk imports which carry several
    // statement files.
    let bulk = routes::imports::router().layer(DefaultBodyLimit::max(32 * 1024 * 1024));

    let api = Router::new()
        .merge(routes::snapshots::router())
        .merge(routes::ledger::router())
        .merge(routes::matching::router())
        .merge(routes::allocations::router())
        .merge(routes::washes::router())
        .merge(routes::exceptions::router())
        .merge(routes::trust::router())
        .merge(routes::lifecycle::router())
        .merge(routes::certifications::router())
        .merge(routes::policies::router())
        .merge(routes::jobs::router())
        .merge(routes::audit::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(2 * 1024 * 1024))
        .merge(bulk)
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let ops = Router::new()
        .route("/health/liveness", axum::routing::get(liveness))
        .route("/health/readiness", axum::routing::get(readiness))
        .route("/metrics", axum::routing::get(prometheus_metrics))
        .with_state(state);

    Router::new().merge(ops).merge(api)
}

/// GET /metrics: Prometheus text exposition of everything recorded
/// through the `metrics` facade.
async fn prometheus_metrics() -> impl IntoResponse {
    let body = middleware::metrics::prometheus_handle().render();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Liveness probe: always returns 200 if the process is running.
async fn liveness() -> &'static str {
    "ok"
}

/// Readiness probe: verifies the application is ready to serve traffic.
///
/// Checks that the engine configuration lock is acquirable and, when a
/// database is configured, that it answers. Returns 200 "ready" or 503
/// with a diagnostic message.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.try_read().is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "engine configuration locked").into_response();
    }

    if let Some(pool) = &state.db_pool {
        if let Err(e) = sqlx::query("SELECT 1").execute(pool).await {
            tracing::warn!("Database health check failed: {e}");
            return (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response();
        }
    }

    (StatusCode::OK, "ready").into_response()
}
