//! # Audit Trail Routes
//!
//! Read access to the hash-chained audit trail, with the chain's
//! integrity check computed over the full trail.

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use cashlock_state::{AuditEntry, ChainIntegrity};

use crate::error::AppError;
use crate::state::AppState;

/// Audit query.
#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
    pub resource_id: Option<String>,
}

/// Audit entries with the chain check.
#[derive(Debug, Clone, Serialize)]
pub struct AuditResponse {
    pub entries: Vec<AuditEntry>,
    pub integrity: ChainIntegrity,
}

/// Build the audit router.
pub fn router() -> Router<AppState> {
    Router::new().route("/v1/audit", get(list_audit))
}

/// GET /v1/audit: Audit entries, optionally for one resource.
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(("resource_id" = Option<String>, Query, description = "Resource filter")),
    responses(
        (status = 200, description = "Audit entries in chain order"),
    ),
    tag = "audit"
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<AuditResponse>, AppError> {
    let resource = query
        .resource_id
        .as_deref()
        .map(str::trim)
        .filter(|r| !r.is_empty());
    let (entries, integrity) = state.audit_entries(resource);
    if !integrity.chain_valid {
        tracing::error!(broken_links = ?integrity.broken_links, "audit chain integrity failure");
    }
    Ok(Json(AuditResponse { entries, integrity }))
}
