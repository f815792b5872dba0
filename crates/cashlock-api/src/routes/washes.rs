//! # Wash Routes
//!
//! Intercompany wash pairs detected by matching, and their confirmation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use cashlock_core::{WashId, WashPair};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, require_actor, Validate};
use crate::state::AppState;

/// Request to confirm a wash pair.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmWashRequest {
    pub actor: String,
}

impl Validate for ConfirmWashRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)
    }
}

/// Build the washes router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots/{id}/washes", get(list_washes))
        .route("/v1/snapshots/{id}/washes/{wid}/confirm", post(confirm_wash))
}

/// GET /v1/snapshots/{id}/washes: Detected wash pairs.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/washes",
    params(("id" = String, Path, description = "Snapshot ID")),
    responses(
        (status = 200, description = "Wash pairs"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "washes"
)]
pub async fn list_washes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WashPair>>, AppError> {
    let id = super::snapshot_id(&id)?;
    let handle = state.snapshot(&id)?;
    let washes = handle.read().washes().to_vec();
    Ok(Json(washes))
}

/// POST /v1/snapshots/{id}/washes/{wid}/confirm: Confirm a wash pair.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/washes/{wid}/confirm",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("wid" = String, Path, description = "Wash pair ID"),
    ),
    request_body = ConfirmWashRequest,
    responses(
        (status = 200, description = "Wash pair confirmed"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "washes"
)]
pub async fn confirm_wash(
    State(state): State<AppState>,
    Path((id, wid)): Path<(String, String)>,
    body: Result<Json<ConfirmWashRequest>, JsonRejection>,
) -> Result<Json<WashPair>, AppError> {
    let id = super::snapshot_id(&id)?;
    let wid = parse_id("wash", &wid, WashId::from_uuid)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let pair = handle.write().confirm_wash(&wid, &req.actor, now)?;
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "wash.confirm",
            "wash",
            wid,
            Some(serde_json::json!({ "status": "pending" })),
            Some(serde_json::json!({ "status": "confirmed" })),
        )
        .await?;
    Ok(Json(pair))
}
