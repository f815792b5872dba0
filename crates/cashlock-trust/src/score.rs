//! # trust-score/v1
//!
//! ```text
//! score = 40 * explained
//!       + 30 * invariant_pass
//!       + 20 * (1 - exposure_ratio)
//!       + 10 * freshness
//! ```
//!
//! - `explained`: cash-explained fraction, `0..=1`.
//! - `invariant_pass`: severity-weighted share of passing checks. Weights are
//!   critical 3, error 2, warning 1, info 0.5. A warn counts half, a skip is
//!   left out. No applicable checks gives 1.
//! - `exposure_ratio`: (unknown + missing-FX + duplicate exposure) over total
//!   bank movement, capped at 1. With no movement it is 0 without exposure
//!   and 1 with.
//! - `freshness`: 1 while the bank/ledger gap is within the threshold,
//!   falling linearly to 0 at four times the threshold. 1 when either side
//!   has no as-of time yet.
//!
//! The result is clamped to `0..=100` and rounded to one decimal. Changing
//! any of this means a new version string.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use cashlock_core::Severity;

use crate::invariants::{InvariantResult, InvariantStatus};

/// Version tag stored on every report.
pub const TRUST_SCORE_VERSION: &str = "trust-score/v1";

/// Inputs to the score, kept on the report so it can be recomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreInputs {
    /// Cash-explained fraction.
    pub explained: Decimal,
    /// Weighted invariant pass fraction.
    pub invariant_pass: Decimal,
    /// Exposure over movement, capped at 1.
    pub exposure_ratio: Decimal,
    /// Freshness factor.
    pub freshness: Decimal,
}

fn weight(severity: Severity) -> Decimal {
    match severity {
        Severity::Critical => Decimal::from(3),
        Severity::Error => Decimal::from(2),
        Severity::Warning => Decimal::ONE,
        Severity::Info => Decimal::new(5, 1),
    }
}

/// Severity-weighted pass fraction.
pub fn invariant_pass_fraction(results: &[InvariantResult]) -> Decimal {
    let mut total = Decimal::ZERO;
    let mut passed = Decimal::ZERO;
    for r in results {
        let w = weight(r.severity);
        match r.status {
            InvariantStatus::Skip => continue,
            InvariantStatus::Pass => passed += w,
            InvariantStatus::Warn => passed += w / Decimal::TWO,
            InvariantStatus::Fail => {}
        }
        total += w;
    }
    if total.is_zero() {
        Decimal::ONE
    } else {
        passed / total
    }
}

/// Exposure over movement, capped at 1.
pub fn exposure_ratio(exposure_minor: i64, movement_minor: i64) -> Decimal {
    if movement_minor <= 0 {
        return if exposure_minor > 0 { Decimal::ONE } else { Decimal::ZERO };
    }
    (Decimal::from(exposure_minor.max(0)) / Decimal::from(movement_minor)).min(Decimal::ONE)
}

/// Freshness factor for a gap of `hours` against `threshold_hours`.
pub fn freshness_factor(hours: Option<i64>, threshold_hours: i64) -> Decimal {
    let Some(hours) = hours else {
        return Decimal::ONE;
    };
    let hours = hours.abs();
    let threshold = threshold_hours.max(1);
    if hours <= threshold {
        return Decimal::ONE;
    }
    let zero_at = threshold * 4;
    if hours >= zero_at {
        return Decimal::ZERO;
    }
    Decimal::from(zero_at - hours) / Decimal::from(zero_at - threshold)
}

/// Combine the inputs.
pub fn trust_score(inputs: &ScoreInputs) -> Decimal {
    let raw = Decimal::from(40) * inputs.explained
        + Decimal::from(30) * inputs.invariant_pass
        + Decimal::from(20) * (Decimal::ONE - inputs.exposure_ratio)
        + Decimal::from(10) * inputs.freshness;
    raw.clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}
