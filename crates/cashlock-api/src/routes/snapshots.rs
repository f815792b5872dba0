//! # Snapshot Routes
//!
//! Creating a reconciliation snapshot and reading its summary.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::{ContentDigest, Currency, SnapshotId, Timestamp};
use cashlock_state::{GateDecision, Snapshot, SnapshotStatus, TransitionRecord};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::state::AppState;

/// Request to open a snapshot.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSnapshotRequest {
    pub name: String,
    /// Period end.
    pub as_of: NaiveDate,
    /// Reporting currency, ISO 4217.
    pub base_currency: String,
    pub actor: String,
}

impl Validate for CreateSnapshotRequest {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.name.len() > 255 {
            return Err("name must not exceed 255 characters".to_string());
        }
        require_actor(&self.actor)
    }
}

/// Record counts of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotCounts {
    pub statements: usize,
    pub transactions: usize,
    pub invoices: usize,
    pub allocations: usize,
    pub active_allocations: usize,
    pub exceptions: usize,
    pub open_exceptions: usize,
    pub washes: usize,
    pub suggestions: usize,
}

/// Snapshot summary returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub id: SnapshotId,
    pub name: String,
    pub as_of: NaiveDate,
    pub status: SnapshotStatus,
    pub base_currency: Currency,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_as_of: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ledger_as_of: Option<Timestamp>,
    pub counts: SnapshotCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_digest: Option<ContentDigest>,
    pub transitions: Vec<TransitionRecord>,
    pub gate_history: Vec<GateDecision>,
}

impl SnapshotView {
    pub fn of(s: &Snapshot) -> Self {
        Self {
            id: s.id(),
            name: s.name().to_string(),
            as_of: s.as_of(),
            status: s.status(),
            base_currency: s.base_currency().clone(),
            created_at: s.created_at(),
            bank_as_of: s.bank_as_of(),
            ledger_as_of: s.ledger_as_of(),
            counts: SnapshotCounts {
                statements: s.statements().len(),
                transactions: s.transactions().len(),
                invoices: s.invoices().len(),
                allocations: s.allocations().len(),
                active_allocations: s.allocations().active().len(),
                exceptions: s.exceptions().len(),
                open_exceptions: s.exceptions().iter().filter(|e| e.is_open()).count(),
                washes: s.washes().len(),
                suggestions: s.suggestions().len(),
            },
            sealed_digest: s.sealed_digest().cloned(),
            transitions: s.transitions().to_vec(),
            gate_history: s.gate_history().to_vec(),
        }
    }
}

/// Build the snapshots router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots", post(create_snapshot))
        .route("/v1/snapshots/{id}", get(get_snapshot))
}

/// POST /v1/snapshots: Open a snapshot in DRAFT.
#[utoipa::path(
    post,
    path = "/v1/snapshots",
    request_body = CreateSnapshotRequest,
    responses(
        (status = 201, description = "Snapshot created"),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "snapshots"
)]
pub async fn create_snapshot(
    State(state): State<AppState>,
    body: Result<Json<CreateSnapshotRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SnapshotView>), AppError> {
    let req = extract_validated_json(body)?;
    let base = Currency::new(&req.base_currency)
        .map_err(|e| AppError::Validation(format!("base_currency: {e}")))?;
    let snapshot = Snapshot::new(req.name.trim(), req.as_of, base, state.now());
    let view = SnapshotView::of(&snapshot);
    let handle = state.insert_snapshot(snapshot);
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "snapshot.create",
            "snapshot",
            view.id,
            None,
            Some(serde_json::json!({
                "name": view.name,
                "as_of": view.as_of.to_string(),
                "base_currency": view.base_currency.to_string(),
            })),
        )
        .await?;
    tracing::info!(snapshot_id = %view.id, name = %view.name, "snapshot created");
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /v1/snapshots/{id}: Snapshot summary.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}",
    params(("id" = String, Path, description = "Snapshot ID")),
    responses(
        (status = 200, description = "Snapshot found"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "snapshots"
)]
pub async fn get_snapshot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SnapshotView>, AppError> {
    let id = super::snapshot_id(&id)?;
    let handle = state.snapshot(&id)?;
    let view = SnapshotView::of(&handle.read());
    Ok(Json(view))
}
