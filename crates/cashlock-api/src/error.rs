//! # API Error Types
//!
//! Structured error type implementing `axum::response::IntoResponse`.
//! Maps domain errors from cashlock-state, cashlock-certify, etc. to HTTP
//! status codes and a JSON body `{error: {code, message, details}}`.
//! Internal error messages never reach the client.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use cashlock_certify::CertifyError;
use cashlock_core::{CanonicalizationError, CashlockError, EvidenceRef};
use cashlock_ingest::IngestError;
use cashlock_matching::MatchingError;
use cashlock_state::{LockError, SnapshotError};

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "POLICY_VIOLATION").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Itemized reasons and evidence, present only for client errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request validation failed (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (422).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict with current resource state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Well-formed but not permitted (422), with itemized reasons.
    #[error("policy violation: {message}")]
    PolicyViolation {
        /// Summary.
        message: String,
        /// One reason per offending record or gate.
        reasons: Vec<String>,
        /// Offending records.
        evidence: Vec<EvidenceRef>,
    },

    /// A lock attempt was refused by the gate engine (422).
    #[error("lock refused: {0}")]
    LockRefused(LockError),

    /// Data-integrity failure (422).
    #[error("integrity failure: {message}")]
    Integrity {
        /// Summary.
        message: String,
        /// Records implicated.
        evidence: Vec<EvidenceRef>,
    },

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),

    /// Service dependency not available (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::PolicyViolation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "POLICY_VIOLATION"),
            Self::LockRefused(_) => (StatusCode::UNPROCESSABLE_ENTITY, "LOCK_REFUSED"),
            Self::Integrity { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "INTEGRITY_FAILURE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        self.status_and_code().0
    }

    /// The body detail a client sees. Job failures carry the same detail.
    pub fn detail(&self) -> ErrorDetail {
        let (_, code) = self.status_and_code();
        let message = match self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        let details = match self {
            Self::PolicyViolation {
                reasons, evidence, ..
            } => Some(json!({ "reasons": reasons, "evidence": evidence })),
            Self::LockRefused(e) => Some(lock_details(e)),
            Self::Integrity { evidence, .. } => Some(json!({ "evidence": evidence })),
            _ => None,
        };
        ErrorDetail {
            code: code.to_string(),
            message,
            details,
        }
    }
}

fn lock_details(e: &LockError) -> serde_json::Value {
    match e {
        LockError::MissingAcknowledgments { gates } => json!({
            "reason": e.code(),
            "missing_acknowledgments": gates,
        }),
        LockError::NonOverridable { gates } => json!({
            "reason": e.code(),
            "non_overridable_gates": gates,
        }),
        LockError::Unauthorized { role } | LockError::OverrideRequiresCfo { role } => json!({
            "reason": e.code(),
            "role": role,
        }),
        LockError::MissingReason => json!({ "reason": e.code() }),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server-side errors for operator visibility.
        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::ServiceUnavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        (status, Json(ErrorBody { error: self.detail() })).into_response()
    }
}

impl From<CashlockError> for AppError {
    fn from(err: CashlockError) -> Self {
        match err {
            CashlockError::Validation(m) | CashlockError::StaleData(m) => Self::Validation(m),
            CashlockError::Conflict(m) => Self::Conflict(m),
            CashlockError::PolicyViolation { message, reasons } => Self::PolicyViolation {
                message,
                reasons,
                evidence: Vec::new(),
            },
            CashlockError::Integrity { message, evidence } => Self::Integrity { message, evidence },
            CashlockError::Fx(f) => Self::Integrity {
                message: f.to_string(),
                evidence: vec![f.into()],
            },
            CashlockError::Canonicalization(c) => Self::Internal(c.to_string()),
        }
    }
}

impl From<SnapshotError> for AppError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::NotFound { .. } => Self::NotFound(err.to_string()),
            SnapshotError::AllocationRejected { reasons, evidence } => Self::PolicyViolation {
                message: "allocation rejected".into(),
                reasons,
                evidence,
            },
            SnapshotError::Lock(l) => Self::LockRefused(l),
            other => CashlockError::from(other).into(),
        }
    }
}

impl From<MatchingError> for AppError {
    fn from(err: MatchingError) -> Self {
        CashlockError::from(err).into()
    }
}

impl From<CertifyError> for AppError {
    fn from(err: CertifyError) -> Self {
        match err {
            CertifyError::NotFound(_) => Self::NotFound(err.to_string()),
            other => CashlockError::from(other).into(),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<CanonicalizationError> for AppError {
    fn from(err: CanonicalizationError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::{EntityKind, FxError, SnapshotId};
    use cashlock_state::{Role, SnapshotStatus};
    use http_body_util::BodyExt;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn status_codes() {
        let cases = [
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (AppError::Validation("x".into()), StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            (AppError::BadRequest("x".into()), StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT, "CONFLICT"),
            (AppError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            (
                AppError::ServiceUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
            ),
        ];
        for (err, status, code) in cases {
            assert_eq!(err.status_and_code(), (status, code));
        }
    }

    #[tokio::test]
    async fn internal_message_is_not_leaked() {
        let (status, body) = body_json(AppError::Internal("db password wrong".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["message"], "An internal error occurred");
        assert!(body["error"].get("details").is_none());
    }

    #[tokio::test]
    async fn missing_acknowledgments_are_listed() {
        let err: AppError = SnapshotError::Lock(LockError::MissingAcknowledgments {
            gates: vec!["unknown_exposure".into()],
        })
        .into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "LOCK_REFUSED");
        assert_eq!(
            body["error"]["details"]["missing_acknowledgments"],
            json!(["unknown_exposure"])
        );
    }

    #[tokio::test]
    async fn allocation_rejection_carries_reasons_and_evidence() {
        let err: AppError = SnapshotError::AllocationRejected {
            reasons: vec!["invoice_over_allocation: INV-1".into()],
            evidence: vec![EvidenceRef::new(EntityKind::Invoice, "INV-1")],
        }
        .into();
        let (status, body) = body_json(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "POLICY_VIOLATION");
        assert_eq!(body["error"]["details"]["reasons"][0], "invoice_over_allocation: INV-1");
        assert_eq!(body["error"]["details"]["evidence"][0]["entity_id"], "INV-1");
    }

    #[test]
    fn domain_errors_map_onto_statuses() {
        let locked: AppError = SnapshotError::Locked {
            snapshot_id: SnapshotId::new(),
            status: SnapshotStatus::Locked,
        }
        .into();
        assert_eq!(locked.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let missing: AppError = SnapshotError::NotFound {
            kind: EntityKind::Allocation,
            id: "a".into(),
        }
        .into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let unauthorized: AppError = SnapshotError::Lock(LockError::Unauthorized {
            role: Role::Analyst,
        })
        .into();
        assert_eq!(unauthorized.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let fx: AppError = CashlockError::Fx(FxError::MissingRate {
            from: "USD".into(),
            to: "EUR".into(),
        })
        .into();
        assert!(matches!(fx, AppError::Integrity { ref evidence, .. } if evidence.len() == 1));

        let certified: AppError = CertifyError::MissingCertifier.into();
        assert_eq!(certified.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
