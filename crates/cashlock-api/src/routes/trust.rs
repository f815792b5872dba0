//! # Trust Routes
//!
//! Trust reports and on-demand invariant runs. The latest of each is
//! cached per snapshot; `regenerate=true` recomputes the report.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use cashlock_state::Snapshot;
use cashlock_trust::{generate, run_invariants, InvariantName, InvariantRun, TrustReport};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::jobs::blocking;
use crate::middleware::metrics::record_invariant_run;
use crate::state::{AppState, SnapshotHandle};

/// Trust report query.
#[derive(Debug, Default, Deserialize)]
pub struct TrustReportQuery {
    #[serde(default)]
    pub regenerate: bool,
}

/// Request to run invariants.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InvariantRunRequest {
    pub actor: String,
    /// Subset to run by name; every invariant when absent.
    #[serde(default)]
    pub invariants: Option<Vec<String>>,
}

impl InvariantRunRequest {
    fn selection(&self) -> Result<Option<Vec<InvariantName>>, String> {
        let Some(names) = &self.invariants else {
            return Ok(None);
        };
        names
            .iter()
            .map(|n| InvariantName::parse(n.trim()).ok_or_else(|| format!("unknown invariant: {n}")))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

impl Validate for InvariantRunRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if matches!(&self.invariants, Some(v) if v.is_empty()) {
            return Err("invariants must not be empty when given".to_string());
        }
        self.selection().map(|_| ())
    }
}

/// Build the trust router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots/{id}/trust-report", get(get_trust_report))
        .route("/v1/snapshots/{id}/invariant-runs", post(start_invariant_run))
        .route(
            "/v1/snapshots/{id}/invariant-runs/latest",
            get(latest_invariant_run),
        )
}

/// Compute a fresh trust report on the blocking pool and cache it.
pub async fn regenerate(state: &AppState, handle: &SnapshotHandle) -> Result<TrustReport, AppError> {
    let (state, handle) = (state.clone(), handle.clone());
    blocking("trust report", move || report_for(&state, &handle.read())).await
}

/// Trust report for a snapshot the caller already holds a guard on.
pub fn report_for(state: &AppState, snapshot: &Snapshot) -> TrustReport {
    let thresholds = state.engine.read().thresholds.clone();
    let report = generate(snapshot, &thresholds, state.now());
    record_invariant_run(report.invariants.passed(), report.invariants.elapsed_ms);
    state.store_trust_report(&report);
    tracing::info!(
        snapshot_id = %report.snapshot_id,
        trust_score = %report.trust_score,
        lock_eligible = report.lock_eligible,
        "trust report generated"
    );
    report
}

/// GET /v1/snapshots/{id}/trust-report: Latest trust report.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/trust-report",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("regenerate" = Option<bool>, Query, description = "Recompute the report"),
    ),
    responses(
        (status = 200, description = "Trust report"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "trust"
)]
pub async fn get_trust_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<TrustReportQuery>,
) -> Result<Json<TrustReport>, AppError> {
    let id = super::snapshot_id(&id)?;
    let handle = state.snapshot(&id)?;
    if !query.regenerate {
        if let Some(report) = state.trust_report(&id) {
            return Ok(Json(report));
        }
    }
    Ok(Json(regenerate(&state, &handle).await?))
}

/// POST /v1/snapshots/{id}/invariant-runs: Run invariants now.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/invariant-runs",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = InvariantRunRequest,
    responses(
        (status = 200, description = "Invariant run"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "A run is already in flight", body = crate::error::ErrorBody),
    ),
    tag = "trust"
)]
pub async fn start_invariant_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<InvariantRunRequest>, JsonRejection>,
) -> Result<Json<InvariantRun>, AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let selection = req.selection().map_err(AppError::Validation)?;
    let handle = state.snapshot(&id)?;
    let run = {
        let _guard = state.run_locks.try_acquire(id, "invariant run")?;
        let budget_ms = state.engine.read().thresholds.invariant_budget_ms;
        let now = state.now();
        blocking("invariant run", move || {
            run_invariants(&handle.read(), selection.as_deref(), budget_ms, now)
        })
        .await?
    };
    record_invariant_run(run.passed(), run.elapsed_ms);
    if run.over_budget {
        tracing::warn!(snapshot_id = %id, elapsed_ms = run.elapsed_ms, budget_ms = run.budget_ms, "invariant run over budget");
    }
    state.store_invariant_run(&run);
    let failed: Vec<&str> = run
        .results
        .iter()
        .filter(|r| !r.status.is_passing())
        .map(|r| r.name.as_str())
        .collect();
    state
        .record_audit(
            &req.actor,
            "invariants.run",
            "snapshot",
            id,
            None,
            Some(serde_json::json!({
                "checked": run.results.len(),
                "failed": failed,
                "passed": run.passed(),
            })),
        )
        .await?;
    Ok(Json(run))
}

/// GET /v1/snapshots/{id}/invariant-runs/latest: Most recent invariant
/// run.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/invariant-runs/latest",
    params(("id" = String, Path, description = "Snapshot ID")),
    responses(
        (status = 200, description = "Invariant run"),
        (status = 404, description = "No run yet", body = crate::error::ErrorBody),
    ),
    tag = "trust"
)]
pub async fn latest_invariant_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InvariantRun>, AppError> {
    let id = super::snapshot_id(&id)?;
    state.snapshot(&id)?;
    state
        .invariant_run(&id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("no invariant run for snapshot {id}")))
}
