//! # Lock Gate Engine
//!
//! Decides whether a snapshot in `READY_FOR_REVIEW` may be locked, given
//! the gate checks of the current trust report and the caller's request.
//!
//! ## Rules
//!
//! 1. Only `controller`, `treasurer` and `cfo` may lock.
//! 2. If every gate passes, the snapshot locks.
//! 3. Otherwise every failing gate must be overridable, the request must
//!    carry each failing gate's exact acknowledgment phrase
//!    (`ACKNOWLEDGE <GATE>`), a non-empty reason, and come from the CFO.
//!    The snapshot then locks with override.
//!
//! Every attempt, accepted or refused, is recorded as a [`GateDecision`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cashlock_core::{GateCheck, Timestamp};

/// Role of the acting user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Works exceptions and suggestions; cannot lock.
    Analyst,
    /// May lock when gates pass.
    Controller,
    /// May lock when gates pass.
    Treasurer,
    /// May lock, and may override failing gates.
    Cfo,
}

impl Role {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyst => "analyst",
            Self::Controller => "controller",
            Self::Treasurer => "treasurer",
            Self::Cfo => "cfo",
        }
    }

    /// Whether the role may lock a snapshot whose gates all pass.
    pub fn can_lock(&self) -> bool {
        !matches!(self, Self::Analyst)
    }

    /// Whether the role may override failing gates.
    pub fn can_override(&self) -> bool {
        matches!(self, Self::Cfo)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to lock a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockRequest {
    /// Acting user.
    pub actor: String,
    /// Acting user's role.
    pub role: Role,
    /// Acknowledgment phrases for failing gates.
    #[serde(default)]
    pub override_acknowledgments: Vec<String>,
    /// Why the override is justified.
    #[serde(default)]
    pub reason: String,
}

/// Successful lock decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LockOutcome {
    /// Every gate passed.
    Locked,
    /// Failing gates were acknowledged by the CFO.
    LockedWithOverride {
        /// Gates that were overridden.
        overridden: Vec<String>,
    },
}

/// Why a lock attempt was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// The role may not lock at all.
    #[error("role {role} may not lock a snapshot")]
    Unauthorized {
        /// Offending role.
        role: Role,
    },

    /// Failing gates that cannot be overridden.
    #[error("gates cannot be overridden: {}", gates.join(", "))]
    NonOverridable {
        /// Gate names.
        gates: Vec<String>,
    },

    /// Failing gates whose acknowledgment phrase is missing.
    #[error("missing acknowledgments for gates: {}", gates.join(", "))]
    MissingAcknowledgments {
        /// Gate names.
        gates: Vec<String>,
    },

    /// Only the CFO may override.
    #[error("overriding failing gates requires the cfo role, got {role}")]
    OverrideRequiresCfo {
        /// Offending role.
        role: Role,
    },

    /// An override needs a written reason.
    #[error("an override requires a non-empty reason")]
    MissingReason,
}

impl LockError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized { .. } => "unauthorized_role",
            Self::NonOverridable { .. } => "non_overridable_gates",
            Self::MissingAcknowledgments { .. } => "missing_acknowledgments",
            Self::OverrideRequiresCfo { .. } => "override_requires_cfo",
            Self::MissingReason => "missing_reason",
        }
    }
}

/// Evaluate a lock request against gate checks. Pure.
pub fn evaluate_lock(gates: &[GateCheck], req: &LockRequest) -> Result<LockOutcome, LockError> {
    if !req.role.can_lock() {
        return Err(LockError::Unauthorized { role: req.role });
    }
    let failing: Vec<&GateCheck> = gates.iter().filter(|g| !g.passed).collect();
    if failing.is_empty() {
        return Ok(LockOutcome::Locked);
    }

    let blocked: Vec<String> = failing
        .iter()
        .filter(|g| !g.overridable)
        .map(|g| g.gate.clone())
        .collect();
    if !blocked.is_empty() {
        return Err(LockError::NonOverridable { gates: blocked });
    }

    let missing: Vec<String> = failing
        .iter()
        .filter(|g| {
            !req.override_acknowledgments
                .iter()
                .any(|a| a.trim() == g.required_acknowledgment)
        })
        .map(|g| g.gate.clone())
        .collect();
    if !missing.is_empty() {
        return Err(LockError::MissingAcknowledgments { gates: missing });
    }

    if !req.role.can_override() {
        return Err(LockError::OverrideRequiresCfo { role: req.role });
    }
    if req.reason.trim().is_empty() {
        return Err(LockError::MissingReason);
    }
    Ok(LockOutcome::LockedWithOverride {
        overridden: failing.iter().map(|g| g.gate.clone()).collect(),
    })
}

/// Result recorded for a lock attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionResult {
    /// Locked with all gates passing.
    Locked,
    /// Locked with override.
    LockedWithOverride,
    /// Refused.
    Rejected,
}

/// One entry of the gate-check history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateDecision {
    /// Attempt number, starting at 1.
    pub attempt: u64,
    /// Acting user.
    pub actor: String,
    /// Acting role.
    pub role: Role,
    /// When the attempt was made.
    pub timestamp: Timestamp,
    /// Gate checks evaluated.
    pub gates: Vec<GateCheck>,
    /// Acknowledgments supplied.
    #[serde(default)]
    pub acknowledgments: Vec<String>,
    /// Reason supplied.
    #[serde(default)]
    pub reason: String,
    /// Outcome.
    pub result: DecisionResult,
    /// Refusal code, when rejected.
    #[serde(default)]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::Comparison;
    use rust_decimal::Decimal;

    fn gate(name: &str, passed: bool, overridable: bool) -> GateCheck {
        let actual = if passed { Decimal::from(99) } else { Decimal::from(90) };
        GateCheck::evaluate(name, Comparison::AtLeast, Decimal::from(95), actual, 1_000, overridable)
    }

    fn req(role: Role, acks: &[&str], reason: &str) -> LockRequest {
        LockRequest {
            actor: "pat".into(),
            role,
            override_acknowledgments: acks.iter().map(|s| s.to_string()).collect(),
            reason: reason.into(),
        }
    }

    #[test]
    fn passing_gates_lock_for_controller() {
        let gates = vec![gate("cash_explained_pct", true, true)];
        assert_eq!(evaluate_lock(&gates, &req(Role::Controller, &[], "")), Ok(LockOutcome::Locked));
    }

    #[test]
    fn analyst_cannot_lock() {
        let gates = vec![gate("cash_explained_pct", true, true)];
        assert_eq!(
            evaluate_lock(&gates, &req(Role::Analyst, &[], "")),
            Err(LockError::Unauthorized { role: Role::Analyst })
        );
    }

    #[test]
    fn failing_gate_lists_missing_acknowledgments() {
        let gates = vec![gate("cash_explained_pct", false, true), gate("missing_fx_exposure", false, true)];
        let err = evaluate_lock(&gates, &req(Role::Cfo, &["ACKNOWLEDGE CASH_EXPLAINED_PCT"], "ok")).unwrap_err();
        assert_eq!(
            err,
            LockError::MissingAcknowledgments {
                gates: vec!["missing_fx_exposure".into()]
            }
        );
        assert_eq!(err.code(), "missing_acknowledgments");
    }

    #[test]
    fn cfo_override_with_phrases_and_reason() {
        let gates = vec![gate("cash_explained_pct", false, true), gate("duplicate_exposure", true, true)];
        let out = evaluate_lock(
            &gates,
            &req(Role::Cfo, &["ACKNOWLEDGE CASH_EXPLAINED_PCT"], "quarter-end timing"),
        )
        .unwrap();
        assert_eq!(
            out,
            LockOutcome::LockedWithOverride {
                overridden: vec!["cash_explained_pct".into()]
            }
        );
    }

    #[test]
    fn override_needs_cfo_and_reason() {
        let gates = vec![gate("cash_explained_pct", false, true)];
        let acks = ["ACKNOWLEDGE CASH_EXPLAINED_PCT"];
        assert_eq!(
            evaluate_lock(&gates, &req(Role::Treasurer, &acks, "why")),
            Err(LockError::OverrideRequiresCfo { role: Role::Treasurer })
        );
        assert_eq!(evaluate_lock(&gates, &req(Role::Cfo, &acks, " ")), Err(LockError::MissingReason));
    }

    #[test]
    fn wrong_phrase_is_not_accepted() {
        let gates = vec![gate("cash_explained_pct", false, true)];
        assert!(matches!(
            evaluate_lock(&gates, &req(Role::Cfo, &["acknowledge cash_explained_pct"], "x")),
            Err(LockError::MissingAcknowledgments { .. })
        ));
    }

    #[test]
    fn non_overridable_gate_blocks_even_cfo() {
        let gates = vec![gate("invariant:invoice_over_allocation", false, false)];
        assert!(matches!(
            evaluate_lock(
                &gates,
                &req(Role::Cfo, &["ACKNOWLEDGE INVARIANT:INVOICE_OVER_ALLOCATION"], "x")
            ),
            Err(LockError::NonOverridable { .. })
        ));
    }
}
