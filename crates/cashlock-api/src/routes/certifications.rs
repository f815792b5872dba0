//! # Certification Routes
//!
//! An external cash-position export is compared against a snapshot in a
//! background job, producing an append-only certification report. A
//! report can be certified once, and exported as a signed artifact. Only a
//! snapshot submitted for review or locked is compared or certified.

use std::path::{Component, Path as FsPath, PathBuf};

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_certify::{
    compare, ensure_certifiable, export_artifact, fetch_export, parse_export,
    CertificationArtifact, CertificationReport, CertifyError, ExportFormat, ExportMeta,
    FileSource, InlineSource,
};
use cashlock_core::{ReportId, SnapshotId, Timestamp};

use crate::error::AppError;
use crate::extractors::{extract_validated_json, parse_id, require_actor, Validate};
use crate::jobs::{blocking, Job, JobKind};
use crate::middleware::metrics::record_certification;
use crate::state::{AppState, SnapshotHandle};

use super::{admit, idempotency_key, job_accepted, Admission};

const MAX_EXPORT_BYTES: usize = 1_500_000;

/// Request to compare an external export against a snapshot.
///
/// Exactly one of `content` and `source_path` is given. `source_path` is
/// relative to the configured export directory.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CertificationRequest {
    pub actor: String,
    /// `csv` or `json`.
    pub format: String,
    /// External system name; CSV exports carry none of their own.
    #[serde(default)]
    pub system: Option<String>,
    /// When the export was produced; defaults to now for CSV.
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    pub generated_at: Option<Timestamp>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
}

impl Validate for CertificationRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)?;
        ExportFormat::from_name(&self.format).map_err(|e| e.to_string())?;
        match (&self.content, &self.source_path) {
            (Some(_), Some(_)) | (None, None) => {
                Err("exactly one of content and source_path must be given".to_string())
            }
            (Some(c), None) if c.trim().is_empty() => Err("content must not be empty".to_string()),
            (Some(c), None) if c.len() > MAX_EXPORT_BYTES => Err(format!(
                "content must not exceed {MAX_EXPORT_BYTES} bytes"
            )),
            (None, Some(p)) => relative_export_path(p).map(|_| ()),
            _ => Ok(()),
        }
    }
}

/// A path that stays inside the export directory.
fn relative_export_path(raw: &str) -> Result<PathBuf, String> {
    let path = FsPath::new(raw.trim());
    if raw.trim().is_empty() || !path.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(format!("source_path must be a relative path without '..': {raw}"));
    }
    Ok(path.to_path_buf())
}

/// Request to certify a report.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CertifyRequest {
    pub certifier: String,
}

impl Validate for CertifyRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.certifier).map_err(|e| e.replace("actor", "certifier"))
    }
}

/// A report with its supersession link.
#[derive(Debug, Clone, Serialize)]
pub struct CertificationView {
    #[serde(flatten)]
    pub report: CertificationReport,
    pub is_certified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_by: Option<ReportId>,
}

/// Build the certifications router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/snapshots/{id}/certifications",
            post(start_certification),
        )
        .route("/v1/certifications/{rid}", get(get_certification))
        .route("/v1/certifications/{rid}/certify", post(certify))
        .route("/v1/certifications/{rid}/artifact", get(get_artifact))
}

fn view(state: &AppState, id: &ReportId) -> Result<CertificationView, AppError> {
    let ledger = state.certifications.read();
    let report = ledger
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("certification report {id} not found")))?;
    Ok(CertificationView {
        is_certified: report.certification.is_some(),
        superseded_by: ledger.superseded_by(id).map(|r| r.report_id),
        report,
    })
}

/// POST /v1/snapshots/{id}/certifications: Compare an external export.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/certifications",
    params(
        ("id" = String, Path, description = "Snapshot ID"),
        ("Idempotency-Key" = Option<String>, Header, description = "Replay key"),
    ),
    request_body = CertificationRequest,
    responses(
        (status = 202, description = "Job accepted"),
        (status = 200, description = "Job already submitted under this key"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Snapshot is still a draft", body = crate::error::ErrorBody),
        (status = 422, description = "Validation error", body = crate::error::ErrorBody),
    ),
    tag = "certifications"
)]
pub async fn start_certification(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Result<Json<CertificationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Job>), AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    if req.source_path.is_some() && state.config.export_dir.is_none() {
        return Err(AppError::Validation(
            "source_path requires an export directory to be configured".to_string(),
        ));
    }
    let handle = state.snapshot(&id)?;
    ensure_certifiable(id, handle.read().status())?;
    let key = idempotency_key(&headers);
    let (job, guard) = match admit(&state, JobKind::Certification, id, key.as_deref(), None)? {
        Admission::Replay(job) => return Ok(job_accepted(job, true)),
        Admission::New(job, guard) => (job, guard),
    };
    let work = run_certification(state.clone(), handle, id, req);
    state.jobs.spawn(job.id, job.kind, guard, work);
    Ok(job_accepted(job, false))
}

async fn run_certification(
    state: AppState,
    handle: SnapshotHandle,
    id: SnapshotId,
    req: CertificationRequest,
) -> Result<serde_json::Value, AppError> {
    let format = ExportFormat::from_name(&req.format)?;
    let bytes = match (&req.content, &req.source_path, &state.config.export_dir) {
        (Some(content), _, _) => fetch_export(&InlineSource::new(content.as_bytes())).await?,
        (None, Some(path), Some(dir)) => {
            let relative = relative_export_path(path).map_err(AppError::Validation)?;
            fetch_export(&FileSource::new(dir.join(relative))).await?
        }
        _ => {
            return Err(AppError::Validation(
                "no export content or readable source".to_string(),
            ))
        }
    };
    let now = state.now();
    let meta = ExportMeta {
        system: req.system.clone().unwrap_or_else(|| "external".to_string()),
        generated_at: req.generated_at.unwrap_or(now),
    };
    let export = parse_export(&bytes, format, &meta)?;
    let settings = state.engine.read().certification.clone();
    let report = blocking("certification comparison", move || {
        let snapshot = handle.read();
        ensure_certifiable(id, snapshot.status())?;
        Ok::<_, CertifyError>(compare(&snapshot, &export, &settings, now))
    })
    .await??;
    let recorded = state.certifications.write().record(report).clone();
    record_certification("compared");
    tracing::info!(
        report_id = %recorded.report_id,
        snapshot_id = %id,
        score = %recorded.score,
        integrity_issues = recorded.integrity_issues.len(),
        "certification report generated"
    );
    state.persist_report(&recorded).await?;
    state
        .record_audit(
            &req.actor,
            "certification.compare",
            "certification_report",
            recorded.report_id,
            None,
            Some(serde_json::json!({
                "snapshot_id": id.to_string(),
                "external_system": recorded.external_system,
                "score": recorded.score.to_string(),
                "stale": recorded.stale,
                "supersedes": recorded.supersedes.map(|r| r.to_string()),
            })),
        )
        .await?;
    serde_json::to_value(&recorded)
        .map_err(|e| AppError::Internal(format!("failed to serialize certification report: {e}")))
}

/// GET /v1/certifications/{rid}: A certification report.
#[utoipa::path(
    get,
    path = "/v1/certifications/{rid}",
    params(("rid" = String, Path, description = "Report ID")),
    responses(
        (status = 200, description = "Certification report"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "certifications"
)]
pub async fn get_certification(
    State(state): State<AppState>,
    Path(rid): Path<String>,
) -> Result<Json<CertificationView>, AppError> {
    let rid = parse_id("certification report", &rid, ReportId::from_uuid)?;
    Ok(Json(view(&state, &rid)?))
}

/// POST /v1/certifications/{rid}/certify: Certify a report.
#[utoipa::path(
    post,
    path = "/v1/certifications/{rid}/certify",
    params(("rid" = String, Path, description = "Report ID")),
    request_body = CertifyRequest,
    responses(
        (status = 200, description = "Report certified"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Already certified, superseded, or the snapshot is a draft", body = crate::error::ErrorBody),
        (status = 422, description = "Below threshold or integrity issues", body = crate::error::ErrorBody),
    ),
    tag = "certifications"
)]
pub async fn certify(
    State(state): State<AppState>,
    Path(rid): Path<String>,
    body: Result<Json<CertifyRequest>, JsonRejection>,
) -> Result<Json<CertificationView>, AppError> {
    let rid = parse_id("certification report", &rid, ReportId::from_uuid)?;
    let req = extract_validated_json(body)?;
    let snapshot_id = state
        .certifications
        .read()
        .get(&rid)
        .map(|r| r.snapshot_id)
        .ok_or(CertifyError::NotFound(rid))?;
    let status = state.snapshot(&snapshot_id)?.read().status();
    let threshold = state.engine.read().certification.threshold;
    let now = state.now();
    let outcome = state
        .certifications
        .write()
        .certify(&rid, &req.certifier, status, threshold, now)
        .cloned();
    let report = match outcome {
        Ok(report) => report,
        Err(e) => {
            record_certification("certify_refused");
            return Err(e.into());
        }
    };
    record_certification("certified");
    state.persist_report(&report).await?;
    state
        .record_audit(
            &req.certifier,
            "certification.certify",
            "certification_report",
            rid,
            Some(serde_json::json!({ "certified": false })),
            Some(serde_json::json!({
                "certified": true,
                "score": report.score.to_string(),
                "threshold": threshold.to_string(),
            })),
        )
        .await?;
    Ok(Json(view(&state, &rid)?))
}

/// GET /v1/certifications/{rid}/artifact: Signed certification artifact.
#[utoipa::path(
    get,
    path = "/v1/certifications/{rid}/artifact",
    params(("rid" = String, Path, description = "Report ID")),
    responses(
        (status = 200, description = "Signed artifact"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
    ),
    tag = "certifications"
)]
pub async fn get_artifact(
    State(state): State<AppState>,
    Path(rid): Path<String>,
) -> Result<Json<CertificationArtifact>, AppError> {
    let rid = parse_id("certification report", &rid, ReportId::from_uuid)?;
    let report = view(&state, &rid)?.report;
    let artifact = export_artifact(&report, &state.signer, state.now())?;
    record_certification("artifact_exported");
    Ok(Json(artifact))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_paths_stay_inside_the_directory() {
        assert!(relative_export_path("tms/2026-03-31.csv").is_ok());
        assert!(relative_export_path("../etc/passwd").is_err());
        assert!(relative_export_path("/etc/passwd").is_err());
        assert!(relative_export_path("a/../../b").is_err());
        assert!(relative_export_path(" ").is_err());
    }
}
