//! # Review and Lock Routes
//!
//! DRAFT → READY_FOR_REVIEW → LOCKED / LOCKED_WITH_OVERRIDE, with reopen
//! back to DRAFT. A lock attempt is judged against the gates of a trust
//! report generated under the same write guard that applies the lock, and
//! recorded in the gate history whether or not it succeeds.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use cashlock_core::{ContentDigest, SnapshotId, Timestamp};
use cashlock_state::{LockOutcome, LockRequest, Role, Snapshot, SnapshotError, SnapshotStatus};
use cashlock_trust::TrustReport;

use crate::error::AppError;
use crate::extractors::{extract_validated_json, require_actor, Validate};
use crate::jobs::blocking;
use crate::middleware::metrics::record_lock_attempt;
use crate::state::AppState;

use super::snapshots::SnapshotView;

/// Request carrying only the acting user.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ActorRequest {
    pub actor: String,
}

impl Validate for ActorRequest {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)
    }
}

/// Lock attempt body.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LockBody {
    pub actor: String,
    /// One of `analyst`, `controller`, `treasurer`, `cfo`.
    #[schema(value_type = String, example = "cfo")]
    pub role: Role,
    /// `ACKNOWLEDGE <GATE>` phrases for every failing gate being overridden.
    #[serde(default)]
    pub override_acknowledgments: Vec<String>,
    #[serde(default)]
    pub reason: String,
}

impl Validate for LockBody {
    fn validate(&self) -> Result<(), String> {
        require_actor(&self.actor)
    }
}

impl From<LockBody> for LockRequest {
    fn from(body: LockBody) -> Self {
        Self {
            actor: body.actor,
            role: body.role,
            override_acknowledgments: body.override_acknowledgments,
            reason: body.reason,
        }
    }
}

type LockAttempt = Result<(LockOutcome, SnapshotStatus, Option<ContentDigest>), SnapshotError>;

/// Generate the gates and attempt the lock against one snapshot guard, so
/// no write can land between the evaluation and the transition.
pub(crate) fn lock_with_fresh_gates(
    state: &AppState,
    snapshot: &mut Snapshot,
    req: &LockRequest,
    now: Timestamp,
) -> (TrustReport, SnapshotStatus, LockAttempt) {
    let before = snapshot.status();
    let report = super::trust::report_for(state, snapshot);
    let attempt = snapshot
        .lock(&report.gate_checks, req, now)
        .map(|outcome| (outcome, snapshot.status(), snapshot.sealed_digest().cloned()));
    (report, before, attempt)
}

/// Result of a successful lock.
#[derive(Debug, Clone, Serialize)]
pub struct LockResponse {
    pub snapshot_id: SnapshotId,
    pub status: SnapshotStatus,
    #[serde(flatten)]
    pub outcome: LockOutcome,
    pub trust_score: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sealed_digest: Option<ContentDigest>,
}

/// Build the lifecycle router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/snapshots/{id}/submit", post(submit))
        .route("/v1/snapshots/{id}/reopen", post(reopen))
        .route("/v1/snapshots/{id}/lock", post(lock))
}

async fn transition(
    state: AppState,
    id: String,
    body: Result<Json<ActorRequest>, JsonRejection>,
    action: &'static str,
    apply: fn(&mut cashlock_state::Snapshot, &str, cashlock_core::Timestamp) -> Result<(), SnapshotError>,
) -> Result<Json<SnapshotView>, AppError> {
    let id = super::snapshot_id(&id)?;
    let req = extract_validated_json(body)?;
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let (before, view) = {
        let mut snapshot = handle.write();
        let before = snapshot.status();
        apply(&mut *snapshot, &req.actor, now)?;
        (before, SnapshotView::of(&snapshot))
    };
    state.persist_snapshot(&handle).await?;
    state
        .record_audit(
            &req.actor,
            action,
            "snapshot",
            id,
            Some(serde_json::json!({ "status": before.as_str() })),
            Some(serde_json::json!({ "status": view.status.as_str() })),
        )
        .await?;
    Ok(Json(view))
}

/// POST /v1/snapshots/{id}/submit: Submit for review.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/submit",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Snapshot is READY_FOR_REVIEW"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "lifecycle"
)]
pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ActorRequest>, JsonRejection>,
) -> Result<Json<SnapshotView>, AppError> {
    transition(state, id, body, "snapshot.submit", |s, actor, now| s.submit(actor, now)).await
}

/// POST /v1/snapshots/{id}/reopen: Return to DRAFT.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/reopen",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = ActorRequest,
    responses(
        (status = 200, description = "Snapshot is DRAFT"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Invalid transition", body = crate::error::ErrorBody),
    ),
    tag = "lifecycle"
)]
pub async fn reopen(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<ActorRequest>, JsonRejection>,
) -> Result<Json<SnapshotView>, AppError> {
    transition(state, id, body, "snapshot.reopen", |s, actor, now| s.reopen(actor, now)).await
}

/// POST /v1/snapshots/{id}/lock: Attempt to lock.
///
/// A refusal is `422` with `details.reason` naming the rule, and
/// `details.missing_acknowledgments` listing the gates still to
/// acknowledge when that is the cause.
#[utoipa::path(
    post,
    path = "/v1/snapshots/{id}/lock",
    params(("id" = String, Path, description = "Snapshot ID")),
    request_body = LockBody,
    responses(
        (status = 200, description = "Snapshot locked"),
        (status = 404, description = "Not found", body = crate::error::ErrorBody),
        (status = 409, description = "Not ready for review", body = crate::error::ErrorBody),
        (status = 422, description = "Lock refused", body = crate::error::ErrorBody),
    ),
    tag = "lifecycle"
)]
pub async fn lock(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<LockBody>, JsonRejection>,
) -> Result<Json<LockResponse>, AppError> {
    let id = super::snapshot_id(&id)?;
    let req = LockRequest::from(extract_validated_json(body)?);
    let handle = state.snapshot(&id)?;
    let now = state.now();
    let (report, before, attempt) = {
        let (state, handle, req) = (state.clone(), handle.clone(), req.clone());
        blocking("lock", move || {
            let mut snapshot = handle.write();
            lock_with_fresh_gates(&state, &mut snapshot, &req, now)
        })
        .await?
    };
    let failing: Vec<&str> = report.gate_failures.iter().map(|g| g.gate.as_str()).collect();

    match attempt {
        Ok((outcome, status, sealed_digest)) => {
            record_lock_attempt(match outcome {
                LockOutcome::Locked => "locked",
                LockOutcome::LockedWithOverride { .. } => "locked_with_override",
            });
            state.persist_snapshot(&handle).await?;
            let overridden = match &outcome {
                LockOutcome::LockedWithOverride { overridden } => overridden.clone(),
                LockOutcome::Locked => Vec::new(),
            };
            state
                .record_audit(
                    &req.actor,
                    "snapshot.lock",
                    "snapshot",
                    id,
                    Some(serde_json::json!({ "status": before.as_str() })),
                    Some(serde_json::json!({
                        "status": status.as_str(),
                        "role": req.role.as_str(),
                        "overridden": overridden,
                        "reason": req.reason,
                        "trust_score": report.trust_score.to_string(),
                    })),
                )
                .await?;
            Ok(Json(LockResponse {
                snapshot_id: id,
                status,
                outcome,
                trust_score: report.trust_score,
                sealed_digest,
            }))
        }
        Err(SnapshotError::Lock(refusal)) => {
            record_lock_attempt("refused");
            // The refused attempt is part of the gate history.
            state.persist_snapshot(&handle).await?;
            state
                .record_audit(
                    &req.actor,
                    "snapshot.lock_refused",
                    "snapshot",
                    id,
                    None,
                    Some(serde_json::json!({
                        "status": before.as_str(),
                        "role": req.role.as_str(),
                        "code": refusal.code(),
                        "failing_gates": failing,
                    })),
                )
                .await?;
            Err(AppError::LockRefused(refusal))
        }
        Err(e) => {
            record_lock_attempt("invalid");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::{Currency, EntityId, Invoice, InvoiceId, InvoiceKind, StatementFormat};
    use cashlock_ingest::{normalize, ImportContext};
    use cashlock_matching::{run, IntercompanyGroups, PolicyBook};
    use cashlock_state::LockError;
    use chrono::NaiveDate;

    const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

    fn now() -> Timestamp {
        Timestamp::parse("2026-04-01T09:00:00Z").unwrap()
    }

    fn matched() -> Snapshot {
        let eur = Currency::new("EUR").unwrap();
        let ctx = ImportContext {
            entity_id: EntityId::new("ACME-DE"),
        };
        let mut s = Snapshot::new("W13", NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), eur.clone(), now());
        s.import_statement(normalize(MT940.as_bytes(), StatementFormat::Mt940, &ctx).unwrap(), now())
            .unwrap();
        s.load_invoices(
            vec![Invoice {
                id: InvoiceId::new("INV-1001"),
                entity_id: EntityId::new("ACME-DE"),
                document_number: "INV-1001".into(),
                customer: "Acme GmbH".into(),
                kind: InvoiceKind::Receivable,
                amount_minor: 25_000,
                currency: eur,
                base_amount_minor: 25_000,
                due_date: NaiveDate::from_ymd_opt(2026, 3, 31),
                country: "DE".into(),
                payment_date: None,
                on_hold: false,
            }],
            now(),
        )
        .unwrap();
        let outcome = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        s.apply_batch(outcome.into_batch(), now()).unwrap();
        s
    }

    fn state() -> AppState {
        let state = AppState::new();
        state.freeze_clock(now());
        state
    }

    fn controller() -> LockRequest {
        LockRequest {
            actor: "controller@acme.example".into(),
            role: Role::Controller,
            override_acknowledgments: Vec::new(),
            reason: String::new(),
        }
    }

    #[test]
    fn lock_is_judged_on_the_snapshot_it_seals() {
        let state = state();
        let mut s = matched();
        let earlier = super::super::trust::report_for(&state, &s);
        assert!(earlier.lock_eligible, "{:?}", earlier.gate_failures);

        // A reversal lands after the earlier report was produced.
        let allocation = s.allocations().active()[0].id;
        s.reverse_allocation(&allocation, "analyst", "wrong customer", now())
            .unwrap();
        s.submit("analyst", now()).unwrap();

        let (report, before, attempt) = lock_with_fresh_gates(&state, &mut s, &controller(), now());
        assert_eq!(before, SnapshotStatus::ReadyForReview);
        assert!(!report.lock_eligible);
        assert!(matches!(
            attempt,
            Err(SnapshotError::Lock(LockError::MissingAcknowledgments { .. }))
        ));
        assert!(!s.status().is_locked());
        assert_eq!(s.gate_history()[0].gates, report.gate_checks);
        assert_eq!(state.trust_report(&s.id()), Some(report));
    }

    #[test]
    fn eligible_snapshot_locks_and_seals() {
        let state = state();
        let mut s = matched();
        s.submit("analyst", now()).unwrap();
        let (report, _, attempt) = lock_with_fresh_gates(&state, &mut s, &controller(), now());
        assert!(report.lock_eligible, "{:?}", report.gate_failures);
        let (outcome, status, sealed) = attempt.unwrap();
        assert_eq!(outcome, LockOutcome::Locked);
        assert_eq!(status, SnapshotStatus::Locked);
        assert_eq!(sealed, Some(s.allocations().digest().unwrap()));
    }

    #[test]
    fn lock_body_reads_role_names() {
        let body: LockBody = serde_json::from_value(serde_json::json!({
            "actor": "cfo@acme.example",
            "role": "cfo",
            "reason": "quarter end",
        }))
        .unwrap();
        assert!(body.validate().is_ok());
        let req = LockRequest::from(body);
        assert_eq!(req.role, Role::Cfo);
        assert!(req.override_acknowledgments.is_empty());
    }
}
