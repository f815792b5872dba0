//! # Snapshot Lifecycle
//!
//! ```text
//! DRAFT ──submit()──▶ READY_FOR_REVIEW ──lock()──▶ LOCKED
//!   ▲                       │            └─lock() with override──▶ LOCKED_WITH_OVERRIDE
//!   └──────reopen()─────────┘
//! ```
//!
//! Both locked states are terminal. Every transition is recorded with the
//! acting user and, for locks, the digest of the sealed allocation log.

use serde::{Deserialize, Serialize};

use cashlock_core::{ContentDigest, Timestamp};

/// Lifecycle state of a reconciliation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SnapshotStatus {
    /// Open for imports, matching and manual work.
    Draft,
    /// Submitted for review; still mutable, may be reopened.
    ReadyForReview,
    /// Locked with every gate passing. Terminal.
    Locked,
    /// Locked with a CFO override of failing gates. Terminal.
    LockedWithOverride,
}

impl SnapshotStatus {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::ReadyForReview => "READY_FOR_REVIEW",
            Self::Locked => "LOCKED",
            Self::LockedWithOverride => "LOCKED_WITH_OVERRIDE",
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Locked | Self::LockedWithOverride)
    }

    /// Whether the snapshot is immutable.
    pub fn is_locked(&self) -> bool {
        self.is_terminal()
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [SnapshotStatus] {
        match self {
            Self::Draft => &[Self::ReadyForReview],
            Self::ReadyForReview => &[Self::Draft, Self::Locked, Self::LockedWithOverride],
            Self::Locked | Self::LockedWithOverride => &[],
        }
    }

    /// Whether `to` is reachable in one step.
    pub fn can_transition_to(&self, to: SnapshotStatus) -> bool {
        self.valid_transitions().contains(&to)
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record of a single lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRecord {
    /// State before the transition.
    pub from_state: SnapshotStatus,
    /// State after the transition.
    pub to_state: SnapshotStatus,
    /// When the transition occurred.
    pub timestamp: Timestamp,
    /// Who performed it.
    pub actor: String,
    /// Digest of the sealed allocation log, for lock transitions.
    #[serde(default)]
    pub evidence_digest: Option<ContentDigest>,
}
