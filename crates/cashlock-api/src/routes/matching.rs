//! # Matching Run Routes
//!
//! A matching run is a background job holding the snapshot's run lock.
//! Candidates are computed under a read lock on the blocking pool; the
//! resulting batch is committed under the write lock in one call, then
//! overdue exceptions are escalated.

use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::{ExceptionId, SnapshotId};
use cashlock_matching::MatchSummary;
use cashlock_state::CommitSummary;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::jobs::{blocking, Job, JobKind};
use crate::middleware::metrics::record_matching_run;
use crate::state::{AppState, SnapshotHandle};

use super::{admit, idempotency_key, job_accepted, Admission};

/// Request to start a matching run.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MatchingRunRequest {
    pub actor: String,
}

impl Validate for MatchingRunRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)
    }
}

/// Result of a completed matching run job.
#[derive(Debug, Clone, Serialize)]
pub struct MatchingRunResult {
    /// What the engine proposed.
    pub summary: MatchSummary,
    /// What the commit changed.
    pub commit: CommitSummary,
    /// Exceptions escalated for breaching the SLA.
    pub escalated: Vec<ExceptionId>,
}

/// Build the matching router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/snapshots/{id}/matching-runs", post(start_matching_run))
}

/// POST /v1/snapshots/{id}/matching-runs: Start a matching run.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/matching-runs",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Replay key"),
    ),
    request_body = MatchingRunRequest,
    responses(
        (status = 202, description = "Job accepted"),
        (status = 200, description = "Job already submitted under this key"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "A run is already in flight", body = crate::error::ErrorBody),
        (status = 422, description = "Snapshot is locked", body = crate::error::ErrorBody),
    ),
    tag = "matching"
)]
pub async fn start_matching_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<MatchingRunRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let key = idempotency_key(&headers);
    if let Some(job) = key
        .as_deref()
        .and_then(|k| state.jobs.find_by_key(JobKind::MatchingRun, id, k))
    {
        return Ok(job_accepted(job, true));
    }
    // Refuse up front rather than through a failed job.
    handle.read().ensure_mutable()?;
    let (job, guard) = match admit(&state, JobKind::MatchingRun, id, key.as_deref(), Some("matching run"))? {
        Admission::Replay(job) => return Ok(job_accepted(job, true)),
        Admission::New(job, guard) => (job, guard),
    };
    let work = run_matching(state.clone(), handle, id, req.actor);
    state.jobs.spawn(job.id, job.kind, guard, work);
    Ok(job_accepted(job, false))
}

/// Run matching and commit the result.
pub async fn run_matching(
    state: AppState,
    handle: SnapshotHandle,
    id: SnapshotId,
    actor: String,
) -> Result<serde_json::Value, AppError> {
    let started = Instant::now();
    let (policies, groups, sla_hours) = {
        let engine = state.engine.read();
        (
            engine.policies.clone(),
            engine.intercompany_groups.clone(),
            engine.thresholds.exception_sla_hours,
        )
    };
    let now = state.now();
    let work = handle.clone();
    let (summary, commit, escalated) = blocking("matching run", move || {
        let outcome = {
            let snapshot = work.read();
            cashlock_matching::run(&snapshot, &policies, &groups)?
        };
        let summary = outcome.summary.clone();
        let mut snapshot = work.write();
        let commit = snapshot.apply_batch(outcome.into_batch(), now)?;
        let escalated = snapshot.escalate_overdue(now, sla_hours)?;
        Ok::<_, AppError>((summary, commit, escalated))
    })
    .await??;
    record_matching_run(
        commit.allocations.len(),
        commit.exceptions_opened,
        started.elapsed().as_secs_f64(),
    );
    tracing::info!(
        snapshot_id = %id,
        allocations = commit.allocations.len(),
        exceptions_opened = commit.exceptions_opened,
        exceptions_resolved = commit.exceptions_resolved,
        washes = commit.washes,
        escalated = escalated.len(),
        "matching run committed"
    );
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &actor,
            "matching.run",
            "snapshot",
            id,
            None,
            Some(serde_json::json!({
                "allocations": commit.allocations.len(),
                "allocated_minor": summary.allocated_minor,
                "exceptions_opened": commit.exceptions_opened,
                "exceptions_resolved": commit.exceptions_resolved,
                "washes": commit.washes,
                "suggestions": commit.suggestions,
                "escalated": escalated.len(),
            })),
        )
        .await?;
    let result = MatchingRunResult {
        summary,
        commit,
        escalated,
    };
    serde_json::to_value(&result)
        .map_err(|e| AppError::Internal(format!("failed to serialize matching result: {e}")))
}
