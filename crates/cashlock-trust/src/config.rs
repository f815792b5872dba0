//! Trust thresholds.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_state::DEFAULT_EXCEPTION_SLA_HOURS;

/// Thresholds for trust metrics, lock gates and the invariant run budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustThresholds {
    /// Lock gate: minimum cash-explained percentage.
    pub cash_explained_min_pct: Decimal,
    /// Cash explained meets its target while unknown% stays below this.
    pub unknown_target_pct: Decimal,
    /// Lock gate: maximum unknown exposure in base minor units.
    pub unknown_exposure_max_minor: i64,
    /// Lock gate: maximum exposure to amounts without an FX rate.
    pub missing_fx_exposure_max_minor: i64,
    /// Lock gate: maximum duplicate-transaction exposure.
    pub duplicate_exposure_max_minor: i64,
    /// Lock gate: maximum hours between the bank and ledger as-of times.
    pub freshness_max_hours: i64,
    /// Informational: pending suggestions above this are flagged.
    pub pending_suggested_max_minor: i64,
    /// Informational: minimum share of open invoice value with a due date.
    pub forecast_coverage_min_pct: Decimal,
    /// Hours an exception may stay open.
    pub exception_sla_hours: i64,
    /// Wall-time budget for an invariant run.
    pub invariant_budget_ms: u64,
}

impl Default for TrustThresholds {
    fn default() -> Self {
        Self {
            cash_explained_min_pct: Decimal::from(95),
            unknown_target_pct: Decimal::from(5),
            unknown_exposure_max_minor: 1_000_000,
            missing_fx_exposure_max_minor: 0,
            duplicate_exposure_max_minor: 0,
            freshness_max_hours: 24,
            pending_suggested_max_minor: 500_000,
            forecast_coverage_min_pct: Decimal::from(80),
            exception_sla_hours: DEFAULT_EXCEPTION_SLA_HOURS,
            invariant_budget_ms: 10_000,
        }
    }
}
