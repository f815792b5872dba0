//! # cashlock-matching: Tiered Matching Engine
//!
//! Pairs bank transactions with open invoices:
//!
//! - [`tiers`]: the three automatic tiers as pure functions.
//! - [`index::InvoiceIndex`]: open invoices ordered by amount per pool, so
//!   no tier scans the cross product.
//! - [`wash`]: intercompany wash detection.
//! - [`policy::PolicyBook`]: tolerances scoped per entity and currency.
//! - [`engine::run`]: one run over a snapshot, producing a
//!   [`engine::MatchOutcome`] for the snapshot to commit.
//!
//! Anything no tier clears goes to the exception queue (Tier 4, manual).

pub mod engine;
pub mod error;
pub mod index;
pub mod policy;
pub mod text;
pub mod tiers;
pub mod wash;

pub use engine::{run, Disposition, MatchOutcome, MatchSummary, TransactionResult};
pub use error::MatchingError;
pub use index::{InvoiceIndex, PoolKey};
pub use policy::{MatchingPolicy, PolicyBook, ScopedPolicy, TierToggles};
pub use tiers::{RankedCandidate, TierFn, TierInput};
pub use wash::{detect_washes, IntercompanyGroup, IntercompanyGroups};
