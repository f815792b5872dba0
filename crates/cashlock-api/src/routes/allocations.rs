//! # Allocation Routes
//!
//! The allocation log is append-only: a manual allocation or an approved
//! suggestion appends an event, and a reversal appends a compensating one.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use cashlock_core::{AllocationId, InvoiceId, TransactionId};
use cashlock_state::{AllocationEvent, ManualAllocation};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, require_actor, Validate};
use crate::state::AppState;

/// Request to allocate a transaction to an invoice, or to approve a
/// pending suggestion for the pair.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AllocateRequest {
    pub transaction_id: String,
    pub invoice_id: String,
    /// Defaults to the suggested amount, else the smaller open amount.
    #[serde(default)]
    pub amount_minor: Option<i64>,
    pub actor: String,
    #[serde(default)]
    pub reason: String,
}

impl Validate for AllocateRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if self.transaction_id.trim().is_empty() {
            return Err("transaction_id must not be empty".to_string());
        }
        if self.invoice_id.trim().is_empty() {
            return Err("invoice_id must not be empty".to_string());
        }
        if matches!(self.amount_minor, Some(a) if a <= 0) {
            return Err("amount_minor must be positive".to_string());
        }
        Ok(())
    }
}

/// Request to reverse an allocation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReverseRequest {
    pub actor: String,
    pub reason: String,
}

impl Validate for ReverseRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if self.reason.trim().is_empty() {
            return Err("reason must not be empty".to_string());
        }
        Ok(())
    }
}

/// Listing filter.
#[derive(Debug, Default, Deserialize)]
pub struct AllocationQuery {
    /// Only allocations that are neither reversals nor reversed.
    #[serde(default)]
    pub active: bool,
}

/// Build the allocations router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/snapshots/{id}/allocations",
            get(list_allocations).post(allocate),
        )
        .route(
            "/v1/snapshots/{id}/allocations/{aid}/reverse",
            post(reverse_allocation),
        )
}

/// GET /v1/snapshots/{id}/allocations: The allocation log.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/allocations",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("active" = Option<bool>, Query, description = "Only active allocations"),
    ),
    responses(
        (status = 200, description = "Allocation events in log order"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "allocations"
)]
pub async fn list_allocations(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AllocationQuery>,
) -> Result<Json<Vec<AllocationEvent>>, AppError> {
    let id = super::snapshot_id(&id)?;
    let handle = state.snapshot(&id)?;
    let snapshot = handle.read();
    let events = if query.active {
        snapshot.allocations().active().into_iter().cloned().collect()
    } else {
        snapshot.allocations().events().to_vec()
    };
    Ok(Json(events))
}

/// POST /v1/snapshots/{id}/allocations: Allocate manually.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/allocations",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = AllocateRequest,
    responses(
        (status = 201, description = "Allocation recorded"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Allocation rejected", body = crate::error::ErrorBody),
    ),
    tag = "allocations"
)]
pub async fn allocate(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<AllocateRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocationEvent>), AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let actor = req.actor.clone();
    let manual = ManualAllocation {
        transaction_id: TransactionId::new(req.transaction_id.trim()),
        invoice_id: InvoiceId::new(req.invoice_id.trim()),
        amount_minor: req.amount_minor,
        actor: req.actor,
        reason: req.reason,
    };
    let now = state.now();
    let event = handle.write().allocate(manual, now)?;
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &actor,
            "allocation.create",
            "allocation",
            event.id,
            None,
            Some(serde_json::to_value(&event).map_err(|e| AppError::Internal(e.to_string()))?),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// POST /v1/snapshots/{id}/allocations/{aid}/reverse: Reverse an
/// allocation.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/allocations/{aid}/reverse",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("aid" = String, Path, description = "Allocation ID"),
    ),
    request_body = ReverseRequest,
    responses(
        (status = 201, description = "Reversal recorded"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Reversal rejected", body = crate::error::ErrorBody),
    ),
    tag = "allocations"
)]
pub async fn reverse_allocation(
    State(state): State<AppState>,
    Path((id, aid)): Path<(String, String)>,
    body: Result<Json<ReverseRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AllocationEvent>), AppError> {
    let id = super::snapshot_id(&id)?;
    let aid = parse_id("allocation", &aid, AllocationId::from_uuid)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let event = handle
        .write()
        .reverse_allocation(&aid, &req.actor, &req.reason, now)?;
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "allocation.reverse",
            "allocation",
            aid,
            Some(serde_json::json!({ "active": true })),
            Some(serde_json::json!({
                "active": false,
                "reversal_id": event.id.to_string(),
                "reason": req.reason,
            })),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}
