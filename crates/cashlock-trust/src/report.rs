//! # Trust Report
//!
//! Metrics, the invariant run and the lock gates for one snapshot, combined
//! into a [`TrustReport`] with a `trust-score/v1` score and a lock-eligible
//! verdict.
//!
//! ## Lock gates
//!
//! | Gate | Passes when | Overridable |
//! |------|-------------|-------------|
//! | `cash_explained_pct` | ≥ `cash_explained_min_pct` | yes |
//! | `unknown_exposure` | ≤ `unknown_exposure_max_minor` | yes |
//! | `missing_fx_exposure` | ≤ `missing_fx_exposure_max_minor` | yes |
//! | `duplicate_exposure` | ≤ `duplicate_exposure_max_minor` | yes |
//! | `freshness_mismatch_hours` | ≤ `freshness_max_hours` | yes |
//! | `invariant:<name>` | critical check did not fail | not for over-allocation |
//!
//! `lock_eligible` holds iff every gate passes. The remaining metrics are
//! informational.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_core::{Comparison, GateCheck, ReportId, Severity, SnapshotId, Timestamp};
use cashlock_state::{Snapshot, SnapshotStatus};

use crate::cash_explained::{self, CashExplained};
use crate::config::TrustThresholds;
use crate::invariants::{run_invariants, InvariantName, InvariantRun, InvariantStatus};
use crate::score::{
    exposure_ratio, freshness_factor, invariant_pass_fraction, trust_score, ScoreInputs,
    TRUST_SCORE_VERSION,
};

/// Unit of a metric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    /// Percentage, `0..=100`.
    Percent,
    /// Base-currency minor units.
    MinorUnits,
    /// Hours.
    Hours,
    /// A count.
    Count,
}

/// Derived status of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    /// Within its threshold.
    Pass,
    /// Outside its threshold.
    Fail,
    /// Could not be measured yet.
    Unknown,
}

/// One trust metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustMetric {
    /// Stable key.
    pub key: String,
    /// Observed value.
    pub value: Option<Decimal>,
    /// Unit.
    pub unit: MetricUnit,
    /// Threshold.
    pub threshold: Decimal,
    /// Direction of the comparison.
    pub comparison: Comparison,
    /// Derived status.
    pub status: MetricStatus,
    /// Whether the metric is a lock gate.
    pub lock_gate: bool,
}

impl TrustMetric {
    fn new(
        key: &str,
        value: Option<Decimal>,
        unit: MetricUnit,
        comparison: Comparison,
        threshold: Decimal,
        lock_gate: bool,
    ) -> Self {
        let status = match value {
            Some(v) if comparison.passes(v, threshold) => MetricStatus::Pass,
            Some(_) => MetricStatus::Fail,
            None => MetricStatus::Unknown,
        };
        Self {
            key: key.to_string(),
            value,
            unit,
            threshold,
            comparison,
            status,
            lock_gate,
        }
    }
}

/// The report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustReport {
    /// Report identifier.
    pub report_id: ReportId,
    /// Snapshot.
    pub snapshot_id: SnapshotId,
    /// Snapshot status when generated.
    pub snapshot_status: SnapshotStatus,
    /// Scoring function version.
    pub score_version: String,
    /// Score, `0..=100`, one decimal.
    pub trust_score: Decimal,
    /// Inputs the score was computed from.
    pub score_inputs: ScoreInputs,
    /// Whether every gate passes.
    pub lock_eligible: bool,
    /// Every gate, passing or not.
    pub gate_checks: Vec<GateCheck>,
    /// The failing gates.
    pub gate_failures: Vec<GateCheck>,
    /// Every metric.
    pub metrics: Vec<TrustMetric>,
    /// Cash-explained breakdown.
    pub cash_explained: CashExplained,
    /// Invariant run the report is based on.
    pub invariants: InvariantRun,
    /// Generation time.
    pub generated_at: Timestamp,
}

impl TrustReport {
    /// Metric by key.
    pub fn metric(&self, key: &str) -> Option<&TrustMetric> {
        self.metrics.iter().find(|m| m.key == key)
    }

    /// Gate by name.
    pub fn gate(&self, name: &str) -> Option<&GateCheck> {
        self.gate_checks.iter().find(|g| g.gate == name)
    }
}

/// Run the full invariant suite and build a report.
pub fn generate(snapshot: &Snapshot, thresholds: &TrustThresholds, now: Timestamp) -> TrustReport {
    let invariants = run_invariants(snapshot, None, thresholds.invariant_budget_ms, now);
    generate_with(snapshot, invariants, thresholds, now)
}

/// Build a report from an existing invariant run.
pub fn generate_with(
    snapshot: &Snapshot,
    invariants: InvariantRun,
    thresholds: &TrustThresholds,
    now: Timestamp,
) -> TrustReport {
    let ce = cash_explained::compute(snapshot, thresholds.unknown_target_pct);
    let duplicate_exposure = invariants
        .get(InvariantName::DuplicateTransactions)
        .map_or(0, |r| r.exposure_minor);
    let missing_fx = ce.breakdown.missing_fx.amount_minor;
    let unknown = ce.unknown_exposure_minor();
    let freshness_hours = match (snapshot.bank_as_of(), snapshot.ledger_as_of()) {
        (Some(bank), Some(ledger)) => Some(bank.hours_since(&ledger).abs()),
        _ => None,
    };

    let pending_suggested = pending_suggested_exposure(snapshot);
    let coverage = forecast_coverage_pct(snapshot);
    let sla_breaches = snapshot
        .exceptions()
        .sla_breaches(&now, thresholds.exception_sla_hours)
        .len();

    let metrics = vec![
        TrustMetric::new(
            "cash_explained_pct",
            Some(ce.explained_pct),
            MetricUnit::Percent,
            Comparison::AtLeast,
            thresholds.cash_explained_min_pct,
            true,
        ),
        TrustMetric::new(
            "unknown_exposure",
            Some(Decimal::from(unknown)),
            MetricUnit::MinorUnits,
            Comparison::AtMost,
            Decimal::from(thresholds.unknown_exposure_max_minor),
            true,
        ),
        TrustMetric::new(
            "missing_fx_exposure",
            Some(Decimal::from(missing_fx)),
            MetricUnit::MinorUnits,
            Comparison::AtMost,
            Decimal::from(thresholds.missing_fx_exposure_max_minor),
            true,
        ),
        TrustMetric::new(
            "duplicate_exposure",
            Some(Decimal::from(duplicate_exposure)),
            MetricUnit::MinorUnits,
            Comparison::AtMost,
            Decimal::from(thresholds.duplicate_exposure_max_minor),
            true,
        ),
        TrustMetric::new(
            "freshness_mismatch_hours",
            freshness_hours.map(Decimal::from),
            MetricUnit::Hours,
            Comparison::AtMost,
            Decimal::from(thresholds.freshness_max_hours),
            true,
        ),
        TrustMetric::new(
            "pending_suggested_exposure",
            Some(Decimal::from(pending_suggested)),
            MetricUnit::MinorUnits,
            Comparison::AtMost,
            Decimal::from(thresholds.pending_suggested_max_minor),
            false,
        ),
        TrustMetric::new(
            "forecast_calibration_coverage",
            Some(coverage),
            MetricUnit::Percent,
            Comparison::AtLeast,
            thresholds.forecast_coverage_min_pct,
            false,
        ),
        TrustMetric::new(
            "exception_sla_breaches",
            Some(Decimal::from(sla_breaches)),
            MetricUnit::Count,
            Comparison::AtMost,
            Decimal::ZERO,
            false,
        ),
    ];

    let exposure_of = |key: &str| -> i64 {
        match key {
            "cash_explained_pct" | "unknown_exposure" => unknown,
            "missing_fx_exposure" => missing_fx,
            "duplicate_exposure" => duplicate_exposure,
            _ => 0,
        }
    };
    let mut gate_checks: Vec<GateCheck> = metrics
        .iter()
        .filter(|m| m.lock_gate)
        .filter_map(|m| {
            // Unmeasured freshness is not a failure.
            let actual = m.value?;
            Some(GateCheck::evaluate(
                m.key.as_str(),
                m.comparison,
                m.threshold,
                actual,
                exposure_of(&m.key),
                true,
            ))
        })
        .collect();
    for r in invariants
        .results
        .iter()
        .filter(|r| r.severity == Severity::Critical)
    {
        let held = if r.status == InvariantStatus::Fail {
            Decimal::ZERO
        } else {
            Decimal::ONE
        };
        gate_checks.push(GateCheck::evaluate(
            format!("invariant:{}", r.name),
            Comparison::AtLeast,
            Decimal::ONE,
            held,
            r.exposure_minor,
            r.name.overridable(),
        ));
    }
    let gate_failures: Vec<GateCheck> = gate_checks.iter().filter(|g| !g.passed).cloned().collect();

    let score_inputs = ScoreInputs {
        explained: ce.explained_fraction(),
        invariant_pass: invariant_pass_fraction(&invariants.results),
        exposure_ratio: exposure_ratio(
            unknown
                .saturating_add(missing_fx)
                .saturating_add(duplicate_exposure),
            ce.total_movement_minor,
        ),
        freshness: freshness_factor(freshness_hours, thresholds.freshness_max_hours),
    };
    let score = trust_score(&score_inputs);

    let report = TrustReport {
        report_id: ReportId::new(),
        snapshot_id: snapshot.id(),
        snapshot_status: snapshot.status(),
        score_version: TRUST_SCORE_VERSION.to_string(),
        trust_score: score,
        score_inputs,
        lock_eligible: gate_failures.is_empty(),
        gate_checks,
        gate_failures,
        metrics,
        cash_explained: ce,
        invariants,
        generated_at: now,
    };
    tracing::info!(
        snapshot_id = %report.snapshot_id,
        trust_score = %report.trust_score,
        lock_eligible = report.lock_eligible,
        gate_failures = report.gate_failures.len(),
        "trust report generated"
    );
    report
}

/// Open amount of transactions waiting on a suggestion, in base units.
fn pending_suggested_exposure(snapshot: &Snapshot) -> i64 {
    let mut seen = std::collections::HashSet::new();
    snapshot
        .suggestions()
        .iter()
        .filter(|s| seen.insert(&s.transaction_id))
        .filter_map(|s| {
            let tx = snapshot.transactions().get(&s.transaction_id)?;
            let open = snapshot.open_amount_transaction(&s.transaction_id)?;
            Some(cash_explained::to_base_or_nominal(snapshot, open, &tx.currency).0)
        })
        .sum()
}

/// Share of open invoice base value that carries a due date.
fn forecast_coverage_pct(snapshot: &Snapshot) -> Decimal {
    let net = snapshot.allocations().net_by_invoice();
    let (mut dated, mut total) = (0i64, 0i64);
    for inv in snapshot.invoices().iter() {
        let open = inv.amount_minor - net.get(&inv.id).copied().unwrap_or(0);
        if open <= 0 {
            continue;
        }
        let b = inv.base_share(open);
        total = total.saturating_add(b);
        if inv.due_date.is_some() {
            dated = dated.saturating_add(b);
        }
    }
    cash_explained::percent(dated, total)
}
