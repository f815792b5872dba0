//! Matching errors.

use thiserror::Error;

use cashlock_core::{CashlockError, SnapshotId};
use cashlock_state::SnapshotStatus;

/// Failure of a matching run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchingError {
    /// A policy value is out of range.
    #[error("invalid matching policy: {0}")]
    InvalidPolicy(String),

    /// Locked snapshots are never matched.
    #[error("snapshot {snapshot_id} is {status}; matching is not allowed")]
    SnapshotLocked {
        /// Snapshot.
        snapshot_id: SnapshotId,
        /// Its status.
        status: SnapshotStatus,
    },
}

impl From<MatchingError> for CashlockError {
    fn from(e: MatchingError) -> Self {
        match e {
            MatchingError::InvalidPolicy(_) => CashlockError::Validation(e.to_string()),
            MatchingError::SnapshotLocked { .. } => CashlockError::PolicyViolation {
                message: e.to_string(),
                reasons: vec!["snapshot_locked".into()],
            },
        }
    }
}
