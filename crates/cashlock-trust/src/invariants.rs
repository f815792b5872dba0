//! # Invariant Runner
//!
//! A fixed registry of seven named checks run against a snapshot. Each check
//! reports a status, its severity, the base-currency exposure at stake and
//! evidence pointers.
//!
//! ## Security Invariant
//!
//! Every match on [`InvariantName`] is exhaustive, so adding a check is a
//! compile error until the runner handles it. The checks read the snapshot
//! as stored, not as the matching engine would have written it, so edits
//! that bypass the engine (a post-lock allocation change, a fallback FX
//! rate of `1.0`, an over-allocation) fail on the next run.
//!
//! Runs are deterministic for identical snapshot state apart from the
//! recorded timings.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_core::{
    AllocationId, Currency, EntityKind, EvidenceRef, RateSource, Severity, SnapshotId, Timestamp,
};
use cashlock_state::{AllocationKind, Snapshot};

use crate::cash_explained::to_base_or_nominal;

/// Evidence entries kept per result.
pub const MAX_EVIDENCE: usize = 50;

/// The golden suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantName {
    /// Net allocations per invoice exceed the invoice amount.
    InvoiceOverAllocation,
    /// Net allocations per transaction exceed the transaction amount.
    TransactionOverAllocation,
    /// The allocation log changed after the snapshot was locked.
    LockedAllocationIntegrity,
    /// Missing, fallback-sourced or unpegged `1.0` FX rates.
    FxRateIntegrity,
    /// Two transaction records share a canonical id.
    DuplicateTransactions,
    /// Allocations pointing at unknown records, mismatched currencies or
    /// double reversals.
    AllocationReferentialIntegrity,
    /// Imported statements whose declared balances do not verify.
    StatementBalanceContinuity,
}

impl InvariantName {
    /// Every check, in run order.
    pub const ALL: [InvariantName; 7] = [
        Self::InvoiceOverAllocation,
        Self::TransactionOverAllocation,
        Self::LockedAllocationIntegrity,
        Self::FxRateIntegrity,
        Self::DuplicateTransactions,
        Self::AllocationReferentialIntegrity,
        Self::StatementBalanceContinuity,
    ];

    /// Stable name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvoiceOverAllocation => "invoice_over_allocation",
            Self::TransactionOverAllocation => "transaction_over_allocation",
            Self::LockedAllocationIntegrity => "locked_allocation_integrity",
            Self::FxRateIntegrity => "fx_rate_integrity",
            Self::DuplicateTransactions => "duplicate_transactions",
            Self::AllocationReferentialIntegrity => "allocation_referential_integrity",
            Self::StatementBalanceContinuity => "statement_balance_continuity",
        }
    }

    /// Parse a stable name.
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.as_str() == s)
    }

    /// Severity of a failure.
    pub fn severity(&self) -> Severity {
        match self {
            Self::InvoiceOverAllocation
            | Self::TransactionOverAllocation
            | Self::LockedAllocationIntegrity
            | Self::FxRateIntegrity => Severity::Critical,
            Self::DuplicateTransactions | Self::AllocationReferentialIntegrity => Severity::Error,
            Self::StatementBalanceContinuity => Severity::Warning,
        }
    }

    /// Whether a CFO may override a failure of this check at lock time.
    pub fn overridable(&self) -> bool {
        !matches!(
            self,
            Self::InvoiceOverAllocation | Self::TransactionOverAllocation
        )
    }
}

impl fmt::Display for InvariantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvariantStatus {
    /// Holds.
    Pass,
    /// Violated.
    Fail,
    /// Violated, but only at warning severity.
    Warn,
    /// Not applicable to this snapshot.
    Skip,
}

impl InvariantStatus {
    /// Whether the check did not fail outright.
    pub fn is_passing(&self) -> bool {
        !matches!(self, Self::Fail)
    }
}

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantResult {
    /// Check.
    pub name: InvariantName,
    /// Outcome.
    pub status: InvariantStatus,
    /// Severity of a failure.
    pub severity: Severity,
    /// Base-currency minor units at stake.
    pub exposure_minor: i64,
    /// Offending records, at most [`MAX_EVIDENCE`].
    pub evidence: Vec<EvidenceRef>,
    /// Offending records found in total.
    pub evidence_total: usize,
    /// Human-readable summary.
    pub message: String,
    /// Time spent on this check.
    pub elapsed_us: u64,
}

/// One run of the suite, or of a named subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantRun {
    /// Snapshot.
    pub snapshot_id: SnapshotId,
    /// When it ran.
    pub run_at: Timestamp,
    /// Results in registry order.
    pub results: Vec<InvariantResult>,
    /// Total wall time.
    pub elapsed_ms: u64,
    /// Budget the run was held to.
    pub budget_ms: u64,
    /// Whether the run took longer than its budget.
    pub over_budget: bool,
}

impl InvariantRun {
    /// Critical checks that failed.
    pub fn critical_failures(&self) -> impl Iterator<Item = &InvariantResult> {
        self.results
            .iter()
            .filter(|r| r.severity == Severity::Critical && r.status == InvariantStatus::Fail)
    }

    /// Whether no critical check failed.
    pub fn passed(&self) -> bool {
        self.critical_failures().next().is_none()
    }

    /// Result for `name`, if it was part of the run.
    pub fn get(&self, name: InvariantName) -> Option<&InvariantResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Findings collected by a check before they become a result.
struct Findings {
    evidence: Vec<EvidenceRef>,
    total: usize,
    exposure: i64,
}

impl Findings {
    fn new() -> Self {
        Self {
            evidence: Vec::new(),
            total: 0,
            exposure: 0,
        }
    }

    fn push(&mut self, evidence: EvidenceRef, exposure: i64) {
        self.total += 1;
        self.exposure = self.exposure.saturating_add(exposure.abs());
        if self.evidence.len() < MAX_EVIDENCE {
            self.evidence.push(evidence);
        }
    }

    fn is_empty(&self) -> bool {
        self.total == 0
    }
}

enum Verdict {
    Clean(String),
    Skipped(String),
    Violated(Findings, String),
}

fn base(snapshot: &Snapshot, amount_minor: i64, currency: &Currency) -> i64 {
    to_base_or_nominal(snapshot, amount_minor, currency).0
}

/// Run `selection`, or the whole suite when `None`.
pub fn run_invariants(
    snapshot: &Snapshot,
    selection: Option<&[InvariantName]>,
    budget_ms: u64,
    now: Timestamp,
) -> InvariantRun {
    let started = Instant::now();
    let wanted: BTreeSet<InvariantName> = match selection {
        Some(names) => names.iter().copied().collect(),
        None => InvariantName::ALL.into_iter().collect(),
    };
    let results: Vec<InvariantResult> = InvariantName::ALL
        .into_iter()
        .filter(|n| wanted.contains(n))
        .map(|n| check(snapshot, n))
        .collect();
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let run = InvariantRun {
        snapshot_id: snapshot.id(),
        run_at: now,
        results,
        elapsed_ms,
        budget_ms,
        over_budget: elapsed_ms > budget_ms,
    };
    if run.over_budget {
        tracing::warn!(snapshot_id = %run.snapshot_id, elapsed_ms, budget_ms, "invariant run over budget");
    }
    tracing::info!(
        snapshot_id = %run.snapshot_id,
        checks = run.results.len(),
        critical_failures = run.critical_failures().count(),
        elapsed_ms,
        "invariant run finished"
    );
    run
}

/// Run one check.
pub fn check(snapshot: &Snapshot, name: InvariantName) -> InvariantResult {
    let started = Instant::now();
    let verdict = match name {
        InvariantName::InvoiceOverAllocation => invoice_over_allocation(snapshot),
        InvariantName::TransactionOverAllocation => transaction_over_allocation(snapshot),
        InvariantName::LockedAllocationIntegrity => locked_allocation_integrity(snapshot),
        InvariantName::FxRateIntegrity => fx_rate_integrity(snapshot),
        InvariantName::DuplicateTransactions => duplicate_transactions(snapshot),
        InvariantName::AllocationReferentialIntegrity => referential_integrity(snapshot),
        InvariantName::StatementBalanceContinuity => statement_balance_continuity(snapshot),
    };
    let severity = name.severity();
    let (status, findings, message) = match verdict {
        Verdict::Clean(m) => (InvariantStatus::Pass, Findings::new(), m),
        Verdict::Skipped(m) => (InvariantStatus::Skip, Findings::new(), m),
        Verdict::Violated(f, m) => {
            let status = if severity == Severity::Warning {
                InvariantStatus::Warn
            } else {
                InvariantStatus::Fail
            };
            (status, f, m)
        }
    };
    InvariantResult {
        name,
        status,
        severity,
        exposure_minor: findings.exposure,
        evidence: findings.evidence,
        evidence_total: findings.total,
        message,
        elapsed_us: u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
    }
}

fn invoice_over_allocation(snapshot: &Snapshot) -> Verdict {
    let mut f = Findings::new();
    for (id, net) in snapshot.allocations().net_by_invoice() {
        let Some(inv) = snapshot.invoices().get(&id) else {
            continue;
        };
        if net > inv.amount_minor {
            let excess = net - inv.amount_minor;
            f.push(
                EvidenceRef::new(EntityKind::Invoice, id.as_str())
                    .with_field("amount_minor", inv.amount_minor)
                    .with_field("allocated_minor", net),
                inv.base_share(excess),
            );
        }
    }
    if f.is_empty() {
        Verdict::Clean("no invoice is allocated beyond its amount".into())
    } else {
        let m = format!("{} invoice(s) allocated beyond their amount", f.total);
        Verdict::Violated(f, m)
    }
}

fn transaction_over_allocation(snapshot: &Snapshot) -> Verdict {
    let mut f = Findings::new();
    for (id, net) in snapshot.allocations().net_by_transaction() {
        let Some(tx) = snapshot.transactions().get(&id) else {
            continue;
        };
        if net > tx.amount_minor {
            f.push(
                EvidenceRef::new(EntityKind::Transaction, id.as_str())
                    .with_field("amount_minor", tx.amount_minor)
                    .with_field("allocated_minor", net),
                base(snapshot, net - tx.amount_minor, &tx.currency),
            );
        }
    }
    if f.is_empty() {
        Verdict::Clean("no transaction is allocated beyond its amount".into())
    } else {
        let m = format!("{} transaction(s) allocated beyond their amount", f.total);
        Verdict::Violated(f, m)
    }
}

fn locked_allocation_integrity(snapshot: &Snapshot) -> Verdict {
    if !snapshot.status().is_locked() {
        return Verdict::Skipped("snapshot is not locked".into());
    }
    let exposure: i64 = snapshot
        .allocations()
        .active()
        .iter()
        .map(|e| base(snapshot, e.amount_minor, &e.currency))
        .sum();
    let current = snapshot.allocations().digest();
    let evidence = |detail: &str| {
        EvidenceRef::new(EntityKind::Snapshot, snapshot.id().to_string()).with_field("detail", detail)
    };
    match (snapshot.sealed_digest(), current) {
        (Some(sealed), Ok(now)) if *sealed == now => {
            Verdict::Clean("allocation log matches the digest sealed at lock".into())
        }
        (Some(sealed), Ok(now)) => {
            let mut f = Findings::new();
            f.push(
                evidence("allocation log digest differs from the sealed digest")
                    .with_field("sealed", sealed)
                    .with_field("current", &now),
                exposure,
            );
            Verdict::Violated(f, "allocation log changed after lock".into())
        }
        (None, _) => {
            let mut f = Findings::new();
            f.push(evidence("locked snapshot carries no sealed digest"), exposure);
            Verdict::Violated(f, "locked snapshot has no sealed allocation digest".into())
        }
        (Some(_), Err(e)) => {
            let mut f = Findings::new();
            f.push(evidence(&e.to_string()), exposure);
            Verdict::Violated(f, "allocation log could not be digested".into())
        }
    }
}

fn fx_rate_integrity(snapshot: &Snapshot) -> Verdict {
    let base_ccy = snapshot.base_currency();
    let mut exposure_by_currency: BTreeMap<Currency, i64> = BTreeMap::new();
    for tx in snapshot.transactions().iter() {
        if tx.currency != *base_ccy {
            *exposure_by_currency.entry(tx.currency.clone()).or_insert(0) += tx.amount_minor;
        }
    }
    let net_inv = snapshot.allocations().net_by_invoice();
    for inv in snapshot.invoices().iter() {
        let open = inv.amount_minor - net_inv.get(&inv.id).copied().unwrap_or(0);
        if inv.currency != *base_ccy && open > 0 {
            *exposure_by_currency.entry(inv.currency.clone()).or_insert(0) += inv.base_amount_minor;
        }
    }
    let loaded: Vec<_> = snapshot.fx().rates().collect();
    if exposure_by_currency.is_empty() && loaded.is_empty() {
        return Verdict::Skipped("no foreign-currency amounts or rates".into());
    }

    let mut f = Findings::new();
    for (ccy, nominal) in &exposure_by_currency {
        if snapshot.fx().get(ccy).is_none() {
            f.push(
                EvidenceRef::new(EntityKind::FxRate, format!("{ccy}/{base_ccy}"))
                    .with_field("problem", "missing"),
                *nominal,
            );
        }
    }
    for rate in loaded {
        let problem = if rate.source == RateSource::Fallback {
            Some("fallback_source")
        } else if rate.rate == Decimal::ONE && !rate.pegged {
            Some("unpegged_unit_rate")
        } else {
            None
        };
        if let Some(problem) = problem {
            let nominal = exposure_by_currency.get(&rate.from).copied().unwrap_or(0);
            f.push(
                EvidenceRef::new(EntityKind::FxRate, format!("{}/{}", rate.from, rate.to))
                    .with_field("problem", problem)
                    .with_field("rate", rate.rate),
                nominal,
            );
        }
    }
    if f.is_empty() {
        Verdict::Clean("every foreign currency has a trusted rate".into())
    } else {
        let m = format!("{} FX rate problem(s)", f.total);
        Verdict::Violated(f, m)
    }
}

fn duplicate_transactions(snapshot: &Snapshot) -> Verdict {
    let mut seen = HashSet::new();
    let mut f = Findings::new();
    for tx in snapshot.transactions().iter() {
        if !seen.insert(&tx.id) {
            f.push(
                EvidenceRef::new(EntityKind::Transaction, tx.id.as_str())
                    .with_field("statement_id", &tx.statement_id),
                base(snapshot, tx.amount_minor, &tx.currency),
            );
        }
    }
    let mut digests = HashSet::new();
    for st in snapshot.statements() {
        if !digests.insert(&st.digest) {
            f.push(
                EvidenceRef::new(EntityKind::Statement, &st.statement_id)
                    .with_field("digest", &st.digest),
                0,
            );
        }
    }
    if f.is_empty() {
        Verdict::Clean("every transaction and statement is unique".into())
    } else {
        let m = format!("{} duplicate record(s)", f.total);
        Verdict::Violated(f, m)
    }
}

fn referential_integrity(snapshot: &Snapshot) -> Verdict {
    let events = snapshot.allocations().events();
    let by_id: HashMap<&AllocationId, AllocationKind> = events.iter().map(|e| (&e.id, e.kind)).collect();
    let mut reversed: HashSet<&AllocationId> = HashSet::new();
    let mut f = Findings::new();

    for e in events {
        let ev = || EvidenceRef::new(EntityKind::Allocation, e.id.to_string());
        let exposure = base(snapshot, e.amount_minor, &e.currency);
        let tx = snapshot.transactions().get(&e.transaction_id);
        let inv = snapshot.invoices().get(&e.invoice_id);
        if tx.is_none() {
            f.push(ev().with_field("unknown_transaction", &e.transaction_id), exposure);
        }
        if inv.is_none() {
            f.push(ev().with_field("unknown_invoice", &e.invoice_id), exposure);
        }
        if let (Some(tx), Some(inv)) = (tx, inv) {
            if tx.currency != e.currency || inv.currency != e.currency {
                f.push(
                    ev().with_field("allocation_currency", &e.currency)
                        .with_field("transaction_currency", &tx.currency)
                        .with_field("invoice_currency", &inv.currency),
                    exposure,
                );
            }
        }
        if e.kind == AllocationKind::Reverse {
            match e.reverses.as_ref() {
                None => f.push(ev().with_field("problem", "reversal without target"), exposure),
                Some(target) => {
                    if by_id.get(target) != Some(&AllocationKind::Allocate) {
                        f.push(ev().with_field("reverses_unknown", target), exposure);
                    } else if !reversed.insert(target) {
                        f.push(ev().with_field("double_reversal_of", target), exposure);
                    }
                }
            }
        }
    }
    if f.is_empty() {
        Verdict::Clean("every allocation references known, consistent records".into())
    } else {
        let m = format!("{} allocation reference problem(s)", f.total);
        Verdict::Violated(f, m)
    }
}

fn statement_balance_continuity(snapshot: &Snapshot) -> Verdict {
    if snapshot.statements().is_empty() {
        return Verdict::Skipped("no statements imported".into());
    }
    let mut f = Findings::new();
    for st in snapshot.statements() {
        for c in st.verification.checks.iter().filter(|c| !c.passed) {
            f.push(
                EvidenceRef::new(EntityKind::Statement, &st.statement_id)
                    .with_field("account_id", &c.account_id)
                    .with_field("check", format!("{:?}", c.kind))
                    .with_field("expected", c.expected)
                    .with_field("actual", c.actual),
                c.expected - c.actual,
            );
        }
    }

    // Across statements: each opening balance should equal the previous
    // closing balance of the same account.
    let mut chains: BTreeMap<String, Vec<(chrono::NaiveDate, Option<i64>, Option<i64>, &str)>> =
        BTreeMap::new();
    for st in snapshot.statements() {
        for b in &st.balances {
            if let Some(date) = b.closing_date {
                chains.entry(b.account_id.normalized()).or_default().push((
                    date,
                    b.opening_minor,
                    b.closing_minor,
                    st.statement_id.as_str(),
                ));
            }
        }
    }
    for (account, mut chain) in chains {
        chain.sort();
        for pair in chain.windows(2) {
            let (_, _, prev_close, _) = pair[0];
            let (_, next_open, _, stmt) = pair[1];
            if let (Some(close), Some(open)) = (prev_close, next_open) {
                if close != open {
                    f.push(
                        EvidenceRef::new(EntityKind::Account, &account)
                            .with_field("statement_id", stmt)
                            .with_field("previous_closing_minor", close)
                            .with_field("opening_minor", open),
                        open - close,
                    );
                }
            }
        }
    }
    if f.is_empty() {
        Verdict::Clean("declared balances verify".into())
    } else {
        let m = format!("{} balance discrepancy(ies)", f.total);
        Verdict::Violated(f, m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cashlock_core::{Comparison, FxRate, GateCheck};
    use cashlock_state::{LockRequest, ManualAllocation, Role};

    fn allocated() -> Snapshot {
        let (mut s, credit) = loaded();
        s.allocate(
            ManualAllocation {
                transaction_id: credit,
                invoice_id: "INV-1001".into(),
                amount_minor: None,
                actor: "analyst".into(),
                reason: String::new(),
            },
            now(),
        )
        .unwrap();
        s
    }

    fn tamper(s: &Snapshot, edit: impl FnOnce(&mut serde_json::Value)) -> Snapshot {
        let mut doc = serde_json::to_value(s).unwrap();
        edit(&mut doc);
        serde_json::from_value(doc).unwrap()
    }

    fn status(s: &Snapshot, name: InvariantName) -> InvariantStatus {
        check(s, name).status
    }

    #[test]
    fn clean_snapshot_passes_everything_applicable() {
        let s = allocated();
        let run = run_invariants(&s, None, 10_000, now());
        assert_eq!(run.results.len(), 7);
        assert!(run.passed());
        assert_eq!(status(&s, InvariantName::LockedAllocationIntegrity), InvariantStatus::Skip);
        assert_eq!(status(&s, InvariantName::FxRateIntegrity), InvariantStatus::Skip);
        assert_eq!(status(&s, InvariantName::StatementBalanceContinuity), InvariantStatus::Pass);
    }

    #[test]
    fn subset_runs_only_named_checks() {
        let s = allocated();
        let run = run_invariants(&s, Some(&[InvariantName::FxRateIntegrity][..]), 10_000, now());
        assert_eq!(run.results.len(), 1);
        assert!(run.get(InvariantName::InvoiceOverAllocation).is_none());
    }

    #[test]
    fn direct_over_allocation_is_detected() {
        let s = tamper(&allocated(), |doc| {
            doc["allocations"][0]["amount_minor"] = serde_json::json!(30_000);
        });
        let r = check(&s, InvariantName::InvoiceOverAllocation);
        assert_eq!(r.status, InvariantStatus::Fail);
        assert_eq!(r.exposure_minor, 5_000);
        assert_eq!(r.evidence[0].entity_id, "INV-1001");
        assert_eq!(status(&s, InvariantName::TransactionOverAllocation), InvariantStatus::Fail);
        assert!(!run_invariants(&s, None, 10_000, now()).passed());
    }

    #[test]
    fn post_lock_edit_is_detected() {
        let mut s = allocated();
        s.submit("analyst", now()).unwrap();
        let gate = GateCheck::evaluate(
            "cash_explained_pct",
            Comparison::AtLeast,
            Decimal::from(95),
            Decimal::from(100),
            0,
            true,
        );
        let req = LockRequest {
            actor: "controller".into(),
            role: Role::Controller,
            override_acknowledgments: Vec::new(),
            reason: String::new(),
        };
        s.lock(&[gate], &req, now()).unwrap();
        assert_eq!(status(&s, InvariantName::LockedAllocationIntegrity), InvariantStatus::Pass);

        let edited = tamper(&s, |doc| {
            doc["allocations"][0]["amount_minor"] = serde_json::json!(20_000);
        });
        let r = check(&edited, InvariantName::LockedAllocationIntegrity);
        assert_eq!(r.status, InvariantStatus::Fail);
        assert_eq!(r.severity, Severity::Critical);
    }

    #[test]
    fn fallback_unit_rate_is_detected() {
        let (mut s, _) = loaded();
        let mut usd = invoice("INV-US-1", 10_000);
        usd.currency = usd_ccy();
        s.load_invoices(vec![usd], now()).unwrap();
        assert_eq!(status(&s, InvariantName::FxRateIntegrity), InvariantStatus::Fail);

        s.upsert_fx_rate(FxRate {
            from: usd_ccy(),
            to: eur(),
            rate: Decimal::ONE,
            source: RateSource::Fallback,
            pegged: false,
            as_of: as_of(),
        })
        .unwrap();
        let r = check(&s, InvariantName::FxRateIntegrity);
        assert_eq!(r.status, InvariantStatus::Fail);
        assert_eq!(r.evidence[0].fields["problem"], "fallback_source");

        s.upsert_fx_rate(FxRate {
            from: usd_ccy(),
            to: eur(),
            rate: Decimal::new(92, 2),
            source: RateSource::Market,
            pegged: false,
            as_of: as_of(),
        })
        .unwrap();
        assert_eq!(status(&s, InvariantName::FxRateIntegrity), InvariantStatus::Pass);
    }

    #[test]
    fn duplicated_record_is_detected() {
        let s = tamper(&allocated(), |doc| {
            let txs = doc["transactions"].as_array_mut().unwrap();
            let copy = txs[0].clone();
            txs.push(copy);
        });
        let r = check(&s, InvariantName::DuplicateTransactions);
        assert_eq!(r.status, InvariantStatus::Fail);
        assert_eq!(r.evidence_total, 1);
    }

    #[test]
    fn dangling_and_double_reversals_are_detected() {
        let mut s = allocated();
        let aid = s.allocations().events()[0].id;
        s.reverse_allocation(&aid, "controller", "wrong invoice", now()).unwrap();
        assert_eq!(
            status(&s, InvariantName::AllocationReferentialIntegrity),
            InvariantStatus::Pass
        );
        let s = tamper(&s, |doc| {
            let events = doc["allocations"].as_array_mut().unwrap();
            let mut again = events[1].clone();
            again["id"] = serde_json::json!(AllocationId::new());
            again["sequence"] = serde_json::json!(3);
            events.push(again);
            events[0]["invoice_id"] = serde_json::json!("INV-GONE");
        });
        let r = check(&s, InvariantName::AllocationReferentialIntegrity);
        assert_eq!(r.status, InvariantStatus::Fail);
        assert!(r.evidence.iter().any(|e| e.fields.contains_key("double_reversal_of")));
        assert!(r.evidence.iter().any(|e| e.fields.contains_key("unknown_invoice")));
    }

    #[test]
    fn unverified_statement_warns() {
        let s = tamper(&allocated(), |doc| {
            doc["statements"][0]["verification"]["verified"] = serde_json::json!(false);
            doc["statements"][0]["verification"]["checks"][0]["passed"] = serde_json::json!(false);
            doc["statements"][0]["verification"]["checks"][0]["actual"] = serde_json::json!(1);
        });
        let r = check(&s, InvariantName::StatementBalanceContinuity);
        assert_eq!(r.status, InvariantStatus::Warn);
        assert_eq!(r.severity, Severity::Warning);
    }

    #[test]
    fn names_round_trip() {
        for n in InvariantName::ALL {
            assert_eq!(InvariantName::parse(n.as_str()), Some(n));
        }
        assert_eq!(InvariantName::parse("nope"), None);
    }
}
