//! # Exception Queue Routes
//!
//! Listing, assignment and status changes for unexplained transactions.
//! Listing reports SLA age against the configured threshold.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::ExceptionId;
use cashlock_state::{ExceptionItem, ExceptionStatus};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, require_actor, Validate};
use crate::state::AppState;

/// Listing filter.
#[derive(Debug, Default, Deserialize)]
pub struct ExceptionQuery {
    pub status: Option<String>,
    pub assignee: Option<String>,
}

/// An exception with its SLA position.
#[derive(Debug, Clone, Serialize)]
pub struct ExceptionView {
    #[serde(flatten)]
    pub item: ExceptionItem,
    pub age_hours: i64,
    pub sla_breached: bool,
}

/// Request to assign an exception.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignRequest {
    pub actor: String,
    pub assignee: String,
}

impl Validate for AssignRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        require_actor(&self.assignee).map_err(|e| e.replace("actor", "assignee"))
    }
}

/// Request to move an exception to another status.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StatusRequest {
    pub actor: String,
    /// `ASSIGNED`, `IN_REVIEW`, `RESOLVED` or `ESCALATED`.
    pub status: String,
    /// Required when resolving.
    #[serde(default)]
    pub note: Option<String>,
}

impl Validate for StatusRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if ExceptionStatus::parse(&self.status).is_none() {
            return Err(format!("unknown exception status: {}", self.status));
        }
        Ok(())
    }
}

/// Build the exceptions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots/{id}/exceptions", get(list_exceptions))
        .route(
            "/v1/snapshots/{id}/exceptions/{eid}/assign",
            post(assign_exception),
        )
        .route(
            "/v1/snapshots/{id}/exceptions/{eid}/status",
            post(transition_exception),
        )
}

/// GET /v1/snapshots/{id}/exceptions: Filtered exception queue.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/exceptions",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("status" = Option<String>, Query, description = "Status filter"),
        ("assignee" = Option<String>, Query, description = "Assignee filter"),
    ),
    responses(
        (status = 200, description = "Exceptions"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Unknown status", body = crate::error::ErrorBody),
    ),
    tag = "exceptions"
)]
pub async fn list_exceptions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExceptionQuery>,
) -> Result<Json<Vec<ExceptionView>>, AppError> {
    let id = super::snapshot_id(&id)?;
    let status = match query.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(
            ExceptionStatus::parse(raw)
                .ok_or_else(|| AppError::Validation(format!("unknown exception status: {raw}")))?,
        ),
        None => None,
    };
    let sla_hours = state.engine.read().thresholds.exception_sla_hours;
    let now = state.now();
    let handle = state.snapshot(&id)?;
    let snapshot = handle.read();
    let views = snapshot
        .exceptions()
        .filter(status, query.assignee.as_deref())
        .into_iter()
        .map(|item| ExceptionView {
            age_hours: item.sla_age_hours(&now),
            sla_breached: item.breaches_sla(&now, sla_hours),
            item: item.clone(),
        })
        .collect();
    Ok(Json(views))
}

/// POST /v1/snapshots/{id}/exceptions/{eid}/assign: Assign an exception.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/exceptions/{eid}/assign",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("eid" = String, Path, description = "Exception ID"),
    ),
    request_body = AssignRequest,
    responses(
        (status = 200, description = "Exception assigned"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "exceptions"
)]
pub async fn assign_exception(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Result<Json<AssignRequest>, JsonRejection>,
) -> Result<Json<ExceptionItem>, AppError> {
    let id = super::snapshot_id(&id)?;
    let eid = parse_id("exception", &eid, ExceptionId::from_uuid)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let (before, item) = {
        let mut snapshot = handle.write();
        let before = snapshot.exceptions().get(&eid).map(summary);
        let item = snapshot.assign_exception(&eid, req.assignee.trim(), &req.actor, now)?;
        (before, item)
    };
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "exception.assign",
            "exception",
            eid,
            before,
            Some(summary(&item)),
        )
        .await?;
    Ok(Json(item))
}

/// POST /v1/snapshots/{id}/exceptions/{eid}/status: Change an exception's
/// status.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/exceptions/{eid}/status",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("eid" = String, Path, description = "Exception ID"),
    ),
    request_body = StatusRequest,
    responses(
        (status = 200, description = "Status changed"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "exceptions"
)]
pub async fn transition_exception(
    State(state): State<AppState>,
    Path((id, eid)): Path<(String, String)>,
    body: Result<Json<StatusRequest>, JsonRejection>,
) -> Result<Json<ExceptionItem>, AppError> {
    let id = super::snapshot_id(&id)?;
    let eid = parse_id("exception", &eid, ExceptionId::from_uuid)?;
    let req = extract_validated_json(body)?;
    let to = ExceptionStatus::parse(&req.status)
        .ok_or_else(|| AppError::Validation(format!("unknown exception status: {}", req.status)))?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let (before, item) = {
        let mut snapshot = handle.write();
        let before = snapshot.exceptions().get(&eid).map(summary);
        let item = snapshot.transition_exception(&eid, to, &req.actor, req.note.as_deref(), now)?;
        (before, item)
    };
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "exception.transition",
            "exception",
            eid,
            before,
            Some(summary(&item)),
        )
        .await?;
    Ok(Json(item))
}

fn summary(item: &ExceptionItem) -> serde_json::Value {
    serde_json::json!({
        "status": item.status.as_str(),
        "assignee": item.assignee,
    })
}
