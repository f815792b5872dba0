//! # cashlock-trust: Trust Layer
//!
//! Answers "can this snapshot be locked, and how much should we trust it":
//!
//! - [`cash_explained`]: share of bank movement explained by bank categories
//!   and allocations, with the unknown remainder broken down.
//! - [`invariants`]: the golden suite of seven checks.
//! - [`score`]: the versioned `trust-score/v1` function.
//! - [`report`]: metrics, lock gates and the score in one [`TrustReport`].
//!
//! Everything here reads a snapshot and never changes it.

pub mod cash_explained;
pub mod config;
pub mod invariants;
pub mod report;
pub mod score;

#[cfg(test)]
mod test_support;

pub use cash_explained::{
    compute as compute_cash_explained, CashExplained, UnknownBreakdown, UnknownBucket,
};
pub use config::TrustThresholds;
pub use invariants::{
    check, run_invariants, InvariantName, InvariantResult, InvariantRun, InvariantStatus,
    MAX_EVIDENCE,
};
pub use report::{generate, generate_with, MetricStatus, MetricUnit, TrustMetric, TrustReport};
pub use score::{trust_score, ScoreInputs, TRUST_SCORE_VERSION};
