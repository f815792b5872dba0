//! # Cash Explained
//!
//! `explained_pct = (bank_true + reconciled) / total_bank_movement`, all in
//! absolute base-currency minor units over the snapshot's transactions.
//!
//! - Confirmed wash legs are left out entirely. Pending washes still count.
//! - Bank-true: transactions the bank categorized (fees, interest, tax,
//!   internal transfers, payroll).
//! - Reconciled: net allocated amount, capped at the transaction amount.
//!
//! The unknown remainder is broken down into buckets. A transaction whose
//! currency has no rate counts at its nominal amount and lands in the
//! missing-FX bucket. A foreign open invoice without a rate counts at its
//! ledger base amount.

use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use cashlock_core::{Currency, InvoiceKind, ReconciliationStatus, TransactionId};
use cashlock_state::Snapshot;

/// Count and amount of one unknown category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownBucket {
    /// Records in the bucket.
    pub count: usize,
    /// Base-currency minor units.
    pub amount_minor: i64,
}

impl UnknownBucket {
    fn add(&mut self, amount_minor: i64) {
        self.count += 1;
        self.amount_minor = self.amount_minor.saturating_add(amount_minor);
    }
}

/// Where the unknown comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownBreakdown {
    /// Open invoices without a due date.
    pub missing_due_dates: UnknownBucket,
    /// Open payables on hold.
    pub held_payables: UnknownBucket,
    /// Unexplained remainder of bank transactions.
    pub unmatched_bank_cash: UnknownBucket,
    /// Transactions and open invoices in a currency without a rate.
    pub missing_fx: UnknownBucket,
}

/// Result of the calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CashExplained {
    /// Currency of every amount below.
    pub base_currency: Currency,
    /// Absolute movement of counted transactions.
    pub total_movement_minor: i64,
    /// Explained by bank categories.
    pub bank_true_minor: i64,
    /// Explained by allocations.
    pub reconciled_minor: i64,
    /// Movement not explained.
    pub unexplained_minor: i64,
    /// Explained share of movement, two decimals.
    pub explained_pct: Decimal,
    /// `100 - explained_pct`.
    pub unknown_pct: Decimal,
    /// Target the unknown share must stay below.
    pub target_pct: Decimal,
    /// Whether `unknown_pct < target_pct`.
    pub meets_target: bool,
    /// Movement of pending wash legs, still counted above.
    pub pending_wash_minor: i64,
    /// Unknown categories.
    pub breakdown: UnknownBreakdown,
}

impl CashExplained {
    /// Explained share in `0..=1`.
    pub fn explained_fraction(&self) -> Decimal {
        self.explained_pct / Decimal::ONE_HUNDRED
    }

    /// Exposure that feeds the `unknown_exposure` gate.
    pub fn unknown_exposure_minor(&self) -> i64 {
        let b = &self.breakdown;
        b.unmatched_bank_cash
            .amount_minor
            .saturating_add(b.missing_due_dates.amount_minor)
            .saturating_add(b.held_payables.amount_minor)
    }
}

/// Percentage `part / whole * 100`, two decimals. An empty whole is 100%.
pub(crate) fn percent(part: i64, whole: i64) -> Decimal {
    if whole == 0 {
        return Decimal::ONE_HUNDRED;
    }
    (Decimal::from(part) * Decimal::ONE_HUNDRED / Decimal::from(whole))
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Base amount of `amount_minor` in `currency`, or the nominal amount when no
/// rate is loaded. The flag tells which.
pub(crate) fn to_base_or_nominal(
    snapshot: &Snapshot,
    amount_minor: i64,
    currency: &Currency,
) -> (i64, bool) {
    match snapshot.fx().convert_to_base(amount_minor, currency) {
        Ok(v) => (v, true),
        Err(_) => (amount_minor, false),
    }
}

/// Compute cash explained for `snapshot`.
pub fn compute(snapshot: &Snapshot, target_pct: Decimal) -> CashExplained {
    let net_tx: BTreeMap<TransactionId, i64> = snapshot.allocations().net_by_transaction();
    let net_inv = snapshot.allocations().net_by_invoice();
    let mut breakdown = UnknownBreakdown::default();
    let mut total = 0i64;
    let mut bank_true = 0i64;
    let mut reconciled = 0i64;
    let mut pending_wash = 0i64;

    for tx in snapshot.transactions().iter() {
        if tx.status == ReconciliationStatus::WashConfirmed {
            continue;
        }
        let (base, converted) = to_base_or_nominal(snapshot, tx.amount_minor, &tx.currency);
        let base = base.abs();
        if !converted {
            breakdown.missing_fx.add(base);
        }
        total = total.saturating_add(base);
        if tx.status == ReconciliationStatus::WashPending {
            pending_wash = pending_wash.saturating_add(base);
        }

        let explained = if tx.is_bank_true() {
            bank_true = bank_true.saturating_add(base);
            base
        } else {
            let allocated = net_tx
                .get(&tx.id)
                .copied()
                .unwrap_or(0)
                .clamp(0, tx.amount_minor);
            let allocated_base = if converted {
                to_base_or_nominal(snapshot, allocated, &tx.currency).0.abs()
            } else {
                allocated
            }
            .min(base);
            reconciled = reconciled.saturating_add(allocated_base);
            allocated_base
        };
        if base > explained {
            breakdown.unmatched_bank_cash.add(base - explained);
        }
    }

    let base_currency = snapshot.base_currency().clone();
    for inv in snapshot.invoices().iter() {
        let open = inv.amount_minor - net_inv.get(&inv.id).copied().unwrap_or(0);
        if open <= 0 {
            continue;
        }
        let open_base = inv.base_share(open);
        if inv.currency != base_currency && !snapshot.fx().can_convert(&inv.currency) {
            breakdown.missing_fx.add(inv.base_amount_minor);
        }
        if inv.due_date.is_none() {
            breakdown.missing_due_dates.add(open_base);
        }
        if inv.on_hold && inv.kind == InvoiceKind::Payable {
            breakdown.held_payables.add(open_base);
        }
    }

    let explained = bank_true.saturating_add(reconciled);
    let explained_pct = percent(explained, total);
    let unknown_pct = Decimal::ONE_HUNDRED - explained_pct;
    CashExplained {
        base_currency,
        total_movement_minor: total,
        bank_true_minor: bank_true,
        reconciled_minor: reconciled,
        unexplained_minor: total - explained,
        explained_pct,
        unknown_pct,
        target_pct,
        meets_target: unknown_pct < target_pct,
        pending_wash_minor: pending_wash,
        breakdown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use cashlock_core::{FxRate, RateSource};
    use cashlock_state::{CommitBatch, ManualAllocation};

    #[test]
    fn bank_true_and_allocations_explain_movement() {
        let (mut s, credit) = loaded();
        let before = compute(&s, Decimal::from(5));
        assert_eq!(before.total_movement_minor, 35_000);
        assert_eq!(before.bank_true_minor, 10_000);
        assert_eq!(before.reconciled_minor, 0);
        assert_eq!(before.breakdown.unmatched_bank_cash.amount_minor, 25_000);
        assert!(!before.meets_target);

        s.allocate(
            ManualAllocation {
                transaction_id: credit,
                invoice_id: "INV-1001".into(),
                amount_minor: None,
                actor: "analyst".into(),
                reason: "remittance".into(),
            },
            now(),
        )
        .unwrap();
        let after = compute(&s, Decimal::from(5));
        assert_eq!(after.reconciled_minor, 25_000);
        assert_eq!(after.explained_pct, Decimal::ONE_HUNDRED);
        assert!(after.meets_target);
        assert_eq!(after.breakdown.unmatched_bank_cash, UnknownBucket::default());
    }

    #[test]
    fn empty_snapshot_is_fully_explained() {
        let s = empty();
        let ce = compute(&s, Decimal::from(5));
        assert_eq!(ce.total_movement_minor, 0);
        assert_eq!(ce.explained_pct, Decimal::ONE_HUNDRED);
        assert!(ce.meets_target);
    }

    #[test]
    fn removing_a_rate_moves_the_invoice_into_missing_fx() {
        let (mut s, _) = loaded();
        let mut usd = invoice("INV-US-1", 10_000);
        usd.currency = usd_ccy();
        usd.base_amount_minor = 9_200;
        s.load_invoices(vec![usd], now()).unwrap();
        s.upsert_fx_rate(FxRate {
            from: usd_ccy(),
            to: eur(),
            rate: Decimal::new(92, 2),
            source: RateSource::Market,
            pegged: false,
            as_of: as_of(),
        })
        .unwrap();
        let with_rate = compute(&s, Decimal::from(5)).breakdown.missing_fx;
        s.remove_fx_rate(&usd_ccy()).unwrap();
        let without = compute(&s, Decimal::from(5)).breakdown.missing_fx;
        assert_eq!(without.amount_minor - with_rate.amount_minor, 9_200);
        assert_eq!(without.count, with_rate.count + 1);
    }

    #[test]
    fn confirmed_washes_leave_the_totals() {
        let (mut s, ids) = wash_pair_snapshot();
        s.apply_batch(
            CommitBatch {
                washes: vec![wash(&ids)],
                ..CommitBatch::default()
            },
            now(),
        )
        .unwrap();
        let pending = compute(&s, Decimal::from(5));
        assert_eq!(pending.total_movement_minor, 100_000);
        assert_eq!(pending.pending_wash_minor, 100_000);

        let wash_id = s.washes()[0].id;
        s.confirm_wash(&wash_id, "controller", now()).unwrap();
        let confirmed = compute(&s, Decimal::from(5));
        assert_eq!(confirmed.total_movement_minor, 0);
        assert_eq!(confirmed.pending_wash_minor, 0);
    }
}
