//! # Statement Import Routes
//!
//! Single imports run inline. Bulk imports run as a background job and
//! import each statement independently, so one malformed file does not
//! block the rest.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::{EntityId, SnapshotId, Timestamp};
use cashlock_ingest::{format_from_name, normalize, ImportContext};
use cashlock_state::{ImportSummary, StatementRecord};

use crate::error::{AppError, ErrorDetail};
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::jobs::{Job, JobKind};
use crate::middleware::metrics::record_import;
use crate::state::{AppState, SnapshotHandle};

use super::{admit, idempotency_key, job_accepted, Admission};

const MAX_STATEMENT_BYTES: usize = 1_500_000;
const MAX_BULK_STATEMENTS: usize = 200;

/// One raw statement file.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct StatementUpload {
    /// `mt940`, `bai2` or `camt053`.
    pub format: String,
    /// Owning entity of the accounts in the file.
    pub entity_id: String,
    /// The file contents.
    pub content: String,
}

impl Validate for StatementUpload {
    fn validate(&self) -> Result<(), String> {
        format_from_name(&self.format).map_err(|e| e.to_string())?;
        if self.entity_id.trim().is_empty() {
            return Err("entity_id must not be empty".to_string());
        }
        if self.content.trim().is_empty() {
            return Err("content must not be empty".to_string());
        }
        if self.content.len() > MAX_STATEMENT_BYTES {
            return Err(format!(
                "content must not exceed {MAX_STATEMENT_BYTES} bytes"
            ));
        }
        Ok(())
    }
}

/// Request to import one statement.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ImportRequest {
    pub actor: String,
    #[serde(flatten)]
    pub statement: StatementUpload,
}

impl Validate for ImportRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        self.statement.validate()
    }
}

/// Request to import several statements.
#[derive(Debug, Deserialize, ToSchema)]
pub struct BulkImportRequest {
    pub actor: String,
    pub statements: Vec<StatementUpload>,
}

impl Validate for BulkImportRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        if self.statements.is_empty() {
            return Err("statements must not be empty".to_string());
        }
        if self.statements.len() > MAX_BULK_STATEMENTS {
            return Err(format!(
                "statements must not exceed {MAX_BULK_STATEMENTS} entries"
            ));
        }
        for (i, s) in self.statements.iter().enumerate() {
            s.validate().map_err(|e| format!("statements[{i}]: {e}"))?;
        }
        Ok(())
    }
}

/// Per-statement outcome of a bulk import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportItem {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ImportSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Result of a bulk import job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkImportResult {
    pub imported: usize,
    pub failed: usize,
    pub items: Vec<BulkImportItem>,
}

/// Build the imports router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/snapshots/{id}/imports",
            post(import_statement).get(list_imports),
        )
        .route("/v1/snapshots/{id}/imports/bulk", post(bulk_import))
}

/// Normalize one statement and add it to the snapshot.
fn import_one(
    handle: &SnapshotHandle,
    upload: &StatementUpload,
    now: Timestamp,
) -> Result<ImportSummary, AppError> {
    let format = format_from_name(&upload.format)?;
    let ctx = ImportContext {
        entity_id: EntityId::new(upload.entity_id.trim()),
    };
    let normalized = match normalize(upload.content.as_bytes(), format, &ctx) {
        Ok(n) => n,
        Err(e) => {
            record_import(format.as_str(), "invalid", 0);
            return Err(e.into());
        }
    };
    match handle.write().import_statement(normalized, now) {
        Ok(summary) => {
            record_import(format.as_str(), "imported", summary.imported);
            Ok(summary)
        }
        Err(e) => {
            record_import(format.as_str(), "rejected", 0);
            Err(e.into())
        }
    }
}

fn import_audit(summary: &ImportSummary) -> serde_json::Value {
    serde_json::json!({
        "statement_id": summary.statement_id,
        "digest": summary.digest.to_string(),
        "imported": summary.imported,
        "duplicates_skipped": summary.duplicates_skipped,
        "verified": summary.verified,
    })
}

/// POST /v1/snapshots/{id}/imports: Import one statement.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/imports",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = ImportRequest,
    responses(
        (status = 201, description = "Statement imported"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Statement already imported", body = crate::error::ErrorBody),
        (status = 422, description = "Invalid statement", body = crate::error::ErrorBody),
    ),
    tag = "imports"
)]
pub async fn import_statement(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ImportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ImportSummary>), AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let summary = import_one(&handle, &req.statement, state.now())?;
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            "statement.import",
            "snapshot",
            id,
            None,
            Some(import_audit(&summary)),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /v1/snapshots/{id}/imports: Imported statements.
#[utoipa::path(
    get,
    path = "/v1/snapshots/{id}/imports",
    params(("id" = String, Path, description = "Snapshot ID")),
    responses(
        (status = 200, description = "Imported statements"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "imports"
)]
pub async fn list_imports(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<StatementRecord>>, AppError> {
    let id = super::snapshot_id(&id)?;
    let handle = state.snapshot(&id)?;
    let records = handle.read().statements().to_vec();
    Ok(Json(records))
}

/// POST /v1/snapshots/{id}/imports/bulk: Import several statements as a
/// job.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/imports/bulk",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Replay key"),
    ),
    request_body = BulkImportRequest,
    responses(
        (status = 202, description = "Job accepted"),
        (status = 200, description = "Job already submitted under this key"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "imports"
)]
pub async fn bulk_import(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<BulkImportRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let key = idempotency_key(&headers);
    let (job, guard) = match admit(&state, JobKind::BulkImport, id, key.as_deref(), None)? {
        Admission::Replay(job) => return Ok(job_accepted(job, true)),
        Admission::New(job, guard) => (job, guard),
    };
    let work = run_bulk_import(state.clone(), handle, id, req);
    state.jobs.spawn(job.id, job.kind, guard, work);
    Ok(job_accepted(job, false))
}

async fn run_bulk_import(
    state: AppState,
    handle: SnapshotHandle,
    id: SnapshotId,
    req: BulkImportRequest,
) -> Result<serde_json::Value, AppError> {
    let mut items = Vec::with_capacity(req.statements.len());
    for (index, upload) in req.statements.iter().enumerate() {
        let item = match import_one(&handle, upload, state.now()) {
            Ok(summary) => BulkImportItem {
                index,
                summary: Some(summary),
                error: None,
            },
            Err(e) => {
                tracing::warn!(snapshot_id = %id, index, error = %e, "bulk import item rejected");
                BulkImportItem {
                    index,
                    summary: None,
                    error: Some(e.detail()),
                }
            }
        };
        items.push(item);
    }
    let imported: Vec<serde_json::Value> = items
        .iter()
        .filter_map(|i| i.summary.as_ref().map(import_audit))
        .collect();
    let result = BulkImportResult {
        imported: imported.len(),
        failed: items.len() - imported.len(),
        items,
    };
    if result.imported > 0 {
        state.persist_snapshot(&handle).await?;
        state
            .record_audit(
                &req.actor,
                "statement.bulk_import",
                "snapshot",
                id,
                None,
                Some(serde_json::json!({ "statements": imported })),
            )
            .await?;
    }
    serde_json::to_value(&result)
        .map_err(|e| AppError::Internal(format!("failed to serialize bulk import result: {e}")))
}
