//! # certification-score/v1
//!
//! ```text
//! unexplained_pct = 100 * (|unknown| + |mapping_gap|) / compared_balance
//! score = max(0, 100 - weight * unexplained_pct) - (stale ? penalty : 0)
//! ```
//!
//! `compared_balance` is the larger of the gross internal and gross
//! external base-currency balances, and at least one minor unit. Explained
//! categories (FX policy, stale data, timing, unmatched bank transactions,
//! rounding) cost nothing. The result is clamped to `0..=100` and rounded to
//! one decimal.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::CertificationSettings;

/// Version tag stored on every certification report.
pub const CERTIFICATION_SCORE_VERSION: &str = "certification-score/v1";

/// Inputs to the score, kept on the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationScoreInputs {
    /// Gross unknown plus gross mapping-gap difference.
    pub unexplained_minor: i64,
    /// Denominator balance.
    pub compared_minor: i64,
    /// Export was stale.
    pub stale: bool,
}

impl CertificationScoreInputs {
    /// Unexplained share of the compared balance, in percent.
    pub fn unexplained_pct(&self) -> Decimal {
        Decimal::from(self.unexplained_minor.max(0)) * Decimal::ONE_HUNDRED
            / Decimal::from(self.compared_minor.max(1))
    }
}

/// Compute the score.
pub fn certification_score(
    inputs: &CertificationScoreInputs,
    settings: &CertificationSettings,
) -> Decimal {
    let loss = settings.unexplained_weight * inputs.unexplained_pct();
    let mut score = (Decimal::ONE_HUNDRED - loss).max(Decimal::ZERO);
    if inputs.stale {
        score -= settings.stale_penalty;
    }
    score
        .clamp(Decimal::ZERO, Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(1, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(unexplained: i64, compared: i64, stale: bool) -> CertificationScoreInputs {
        CertificationScoreInputs {
            unexplained_minor: unexplained,
            compared_minor: compared,
            stale,
        }
    }

    #[test]
    fn fully_explained_scores_one_hundred() {
        let s = CertificationSettings::default();
        assert_eq!(certification_score(&inputs(0, 1_000_000, false), &s), Decimal::ONE_HUNDRED);
        assert_eq!(certification_score(&inputs(0, 0, false), &s), Decimal::ONE_HUNDRED);
    }

    #[test]
    fn half_a_percent_unexplained_sits_on_the_default_threshold() {
        let s = CertificationSettings::default();
        assert_eq!(
            certification_score(&inputs(5_000, 1_000_000, false), &s),
            Decimal::from(95)
        );
        assert_eq!(
            certification_score(&inputs(20_000, 1_000_000, false), &s),
            Decimal::from(80)
        );
        assert_eq!(certification_score(&inputs(200_000, 1_000_000, false), &s), Decimal::ZERO);
    }

    #[test]
    fn stale_export_downgrades_without_failing() {
        let s = CertificationSettings::default();
        assert_eq!(certification_score(&inputs(0, 1_000_000, true), &s), Decimal::from(85));
        assert_eq!(certification_score(&inputs(200_000, 1_000_000, true), &s), Decimal::ZERO);
    }
}
