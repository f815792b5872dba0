//! Snapshot errors.

use thiserror::Error;

use cashlock_core::{
    CanonicalizationError, CashlockError, ContentDigest, EntityKind, EvidenceRef, FxError,
    SnapshotId,
};

use crate::exception::{ExceptionRefusal, ExceptionStatus};
use crate::lifecycle::SnapshotStatus;
use crate::lock::LockError;

/// Failure of a snapshot operation.
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// The snapshot is locked; nothing may change.
    #[error("snapshot {snapshot_id} is {status}; mutations are rejected")]
    Locked {
        /// Snapshot.
        snapshot_id: SnapshotId,
        /// Current (terminal) status.
        status: SnapshotStatus,
    },

    /// Lifecycle transition not allowed from the current state.
    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// Current state.
        from: SnapshotStatus,
        /// Requested state.
        to: SnapshotStatus,
        /// Why.
        reason: String,
    },

    /// The same statement bytes were already imported.
    #[error("statement {digest} was already imported")]
    DuplicateStatement {
        /// Digest of the raw statement bytes.
        digest: ContentDigest,
    },

    /// Every transaction in the statement is already in the snapshot.
    #[error("all {count} transactions of statement {statement_id} are already imported")]
    AllDuplicates {
        /// Statement identifier.
        statement_id: String,
        /// Number of duplicate transactions.
        count: usize,
    },

    /// Referenced record does not exist.
    #[error("{kind} {id} not found")]
    NotFound {
        /// Record kind.
        kind: EntityKind,
        /// Identifier.
        id: String,
    },

    /// One or more allocations violate the guards; nothing was applied.
    #[error("allocation rejected: {}", reasons.join("; "))]
    AllocationRejected {
        /// Itemized reasons.
        reasons: Vec<String>,
        /// Offending records.
        evidence: Vec<EvidenceRef>,
    },

    /// Exception transition not allowed.
    #[error("exception cannot move from {from} to {to}")]
    ExceptionTransition {
        /// Current status.
        from: ExceptionStatus,
        /// Requested status.
        to: ExceptionStatus,
    },

    /// Malformed request.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Lock attempt refused.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// FX table rejected a rate.
    #[error(transparent)]
    Fx(#[from] FxError),

    /// Digest computation failed.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
}

impl From<ExceptionRefusal> for SnapshotError {
    fn from(r: ExceptionRefusal) -> Self {
        match r {
            ExceptionRefusal::NotFound(id) => Self::NotFound {
                kind: EntityKind::Exception,
                id: id.to_string(),
            },
            ExceptionRefusal::Transition { from, to } => Self::ExceptionTransition { from, to },
            ExceptionRefusal::MissingNote => {
                Self::Validation("resolving an exception requires a note".into())
            }
            ExceptionRefusal::MissingAssignee => {
                Self::Validation("assignee must not be empty".into())
            }
        }
    }
}

impl From<SnapshotError> for CashlockError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Locked { .. } => CashlockError::PolicyViolation {
                message: e.to_string(),
                reasons: vec!["snapshot_locked".into()],
            },
            SnapshotError::AllocationRejected { reasons, .. } => CashlockError::PolicyViolation {
                message: "allocation rejected".into(),
                reasons,
            },
            SnapshotError::Lock(ref l) => CashlockError::PolicyViolation {
                message: l.to_string(),
                reasons: vec![l.code().to_string()],
            },
            SnapshotError::InvalidTransition { .. }
            | SnapshotError::DuplicateStatement { .. }
            | SnapshotError::AllDuplicates { .. }
            | SnapshotError::ExceptionTransition { .. } => CashlockError::Conflict(e.to_string()),
            SnapshotError::Fx(f) => CashlockError::Fx(f),
            SnapshotError::Canonicalization(c) => CashlockError::Canonicalization(c),
            SnapshotError::NotFound { .. } | SnapshotError::Validation(_) => {
                CashlockError::Validation(e.to_string())
            }
        }
    }
}
