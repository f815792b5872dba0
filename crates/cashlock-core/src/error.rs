//! # Error Types: Shared Error Taxonomy
//!
//! All errors use `thiserror`. Subsystem crates define their own enums and
//! map onto this taxonomy at the API boundary.
//!
//! ## Design
//!
//! - **Validation**: malformed input. Record-level problems in statement
//!   files are downgraded to skipped-record evidence by the normalizer.
//! - **Conflict**: the operation would duplicate existing state.
//! - **PolicyViolation**: the operation is well-formed but not allowed, with
//!   itemized reasons.
//! - **StaleData**: never fatal; it downgrades confidence.
//! - **Integrity**: a data-integrity failure that must surface, never be
//!   defaulted away.

use thiserror::Error;

use crate::evidence::EvidenceRef;

/// Top-level error type for the engine.
#[derive(Error, Debug)]
pub enum CashlockError {
    /// Malformed input file or field.
    #[error("validation error: {0}")]
    Validation(String),

    /// The operation would duplicate existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The operation is not permitted by policy.
    #[error("policy violation: {message}")]
    PolicyViolation {
        /// Summary of the violation.
        message: String,
        /// Itemized reasons, one per offending record or gate.
        reasons: Vec<String>,
    },

    /// External data older than the freshness threshold.
    #[error("stale data: {0}")]
    StaleData(String),

    /// Data-integrity failure.
    #[error("integrity failure: {message}")]
    Integrity {
        /// Summary of the failure.
        message: String,
        /// Records implicated in the failure.
        evidence: Vec<EvidenceRef>,
    },

    /// Canonicalization failed.
    #[error("canonicalization error: {0}")]
    Canonicalization(#[from] CanonicalizationError),

    /// FX conversion failed.
    #[error("fx error: {0}")]
    Fx(#[from] FxError),
}

/// Error during canonical serialization.
#[derive(Error, Debug)]
pub enum CanonicalizationError {
    /// Float values are not permitted in canonical representations.
    #[error("float values are not permitted in canonical representations; use integer minor units or decimal strings: {0}")]
    FloatRejected(f64),

    /// JSON serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// Error during currency conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FxError {
    /// No rate is loaded for the currency pair.
    #[error("no FX rate for {from}->{to}")]
    MissingRate {
        /// Source currency.
        from: String,
        /// Target currency.
        to: String,
    },

    /// The rate is zero, negative, or targets the wrong currency.
    #[error("invalid FX rate for {currency}: {reason}")]
    InvalidRate {
        /// Source currency of the offending rate.
        currency: String,
        /// Why the rate was rejected.
        reason: String,
    },

    /// The converted amount does not fit in minor units.
    #[error("converted amount overflows for {currency}")]
    Overflow {
        /// Source currency.
        currency: String,
    },
}

impl From<FxError> for crate::evidence::EvidenceRef {
    fn from(err: FxError) -> Self {
        use crate::evidence::{EntityKind, EvidenceRef};
        match err {
            FxError::MissingRate { from, to } => {
                EvidenceRef::new(EntityKind::FxRate, format!("{from}/{to}"))
                    .with_field("problem", "missing")
            }
            FxError::InvalidRate { currency, reason } => {
                EvidenceRef::new(EntityKind::FxRate, currency).with_field("problem", reason)
            }
            FxError::Overflow { currency } => {
                EvidenceRef::new(EntityKind::FxRate, currency).with_field("problem", "overflow")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violation_display_uses_message() {
        let err = CashlockError::PolicyViolation {
            message: "over-allocation".into(),
            reasons: vec!["invoice INV-1".into()],
        };
        assert_eq!(err.to_string(), "policy violation: over-allocation");
    }

    #[test]
    fn fx_error_converts_into_cashlock_error() {
        let err: CashlockError = FxError::MissingRate {
            from: "EUR".into(),
            to: "USD".into(),
        }
        .into();
        assert!(err.to_string().contains("EUR->USD"));
    }

    #[test]
    fn missing_rate_evidence_points_at_pair() {
        let ev: EvidenceRef = FxError::MissingRate {
            from: "GBP".into(),
            to: "USD".into(),
        }
        .into();
        assert_eq!(ev.entity_id, "GBP/USD");
        assert_eq!(ev.fields.get("problem").map(String::as_str), Some("missing"));
    }
}
