//! # Ledger Data Routes
//!
//! Loading upstream invoices and FX rates into a snapshot. Both replace
//! by key, so a corrected extract can be reloaded.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::{Currency, FxRate, Invoice};
use cashlock_state::InvoiceLoadSummary;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::state::AppState;

const MAX_INVOICES_PER_LOAD: usize = 100_000;

/// Invoices to insert or replace.
#[derive(Debug, Deserialize, ToSchema)]
pub struct LoadInvoicesRequest {
    pub actor: String,
    #[schema(value_type = Vec<Object>)]
    pub invoices: Vec<Invoice>,
}

impl Validate for LoadInvoicesRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if self.invoices.is_empty() {
            return Err("invoices must not be empty".to_string());
        }
        if self.invoices.len() > MAX_INVOICES_PER_LOAD {
            return Err(format!(
                "invoices must not exceed {MAX_INVOICES_PER_LOAD} entries"
            ));
        }
        Ok(())
    }
}

/// FX rates to set and currencies to clear.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FxRatesRequest {
    pub actor: String,
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub rates: Vec<FxRate>,
    #[serde(default)]
    #[schema(value_type = Vec<String>)]
    pub remove: Vec<Currency>,
}

impl Validate for FxRatesRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if self.rates.is_empty() && self.remove.is_empty() {
            return Err("either rates or remove must be given".to_string());
        }
        Ok(())
    }
}

/// Result of an FX update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxUpdateResponse {
    /// Rates newly set or replaced.
    pub upserted: usize,
    /// Rates cleared.
    pub removed: usize,
    /// Every rate now in force.
    pub rates: Vec<FxRate>,
}

/// Build the ledger data router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots/{id}/invoices", post(load_invoices))
        .route("/v1/snapshots/{id}/fx-rates", post(update_fx_rates))
}

/// POST /v1/snapshots/{id}/invoices: Load invoices.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/invoices",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = LoadInvoicesRequest,
    responses(
        (status = 200, description = "Invoices loaded"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Rejected", body = crate::error::ErrorBody),
    ),
    tag = "ledger"
)]
pub async fn load_invoices(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<LoadInvoicesRequest>, JsonRejection>,
) -> Result<Json<InvoiceLoadSummary>, AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let summary = handle.write().load_invoices(req.invoices, now)?;
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "invoices.load",
            "snapshot",
            id,
            None,
            Some(serde_json::json!({
                "inserted": summary.inserted,
                "updated": summary.updated,
            })),
        )
        .await?;
    Ok(Json(summary))
}

/// POST /v1/snapshots/{id}/fx-rates: Set or clear FX rates.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/fx-rates",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = FxRatesRequest,
    responses(
        (status = 200, description = "Rates updated"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 422, description = "Rejected", body = crate::error::ErrorBody),
    ),
    tag = "ledger"
)]
pub async fn update_fx_rates(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<FxRatesRequest>, JsonRejection>,
) -> Result<Json<FxUpdateResponse>, AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let set: Vec<String> = req.rates.iter().map(|r| r.from.to_string()).collect();
    let cleared: Vec<String> = req.remove.iter().map(|c| c.to_string()).collect();
    let response = {
        let mut snapshot = handle.write();
        // Check every rate before applying any.
        let mut staged = snapshot.fx().clone();
        for rate in &req.rates {
            staged
                .insert(rate.clone())
                .map_err(|e| AppError::Validation(e.to_string()))?;
        }
        for rate in req.rates {
            snapshot.upsert_fx_rate(rate)?;
        }
        let mut removed = 0;
        for currency in &req.remove {
            if snapshot.remove_fx_rate(currency)?.is_some() {
                removed += 1;
            }
        }
        FxUpdateResponse {
            upserted: set.len(),
            removed,
            rates: snapshot.fx().rates().cloned().collect(),
        }
    };
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "fx_rates.update",
            "snapshot",
            id,
            None,
            Some(serde_json::json!({ "set": set, "removed": cleared })),
        )
        .await?;
    Ok(Json(response))
}
