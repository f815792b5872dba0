//! # Certification Comparator
//!
//! Compares an external cash-position export with the snapshot's latest
//! declared closing balances, account by account, in base currency.
//!
//! ## Attribution
//!
//! Each account's difference (external minus internal) is explained by a
//! waterfall over [`DifferenceCategory::ALL`]. A step proposes an amount
//! from the records it looks at; it takes that amount only when it has the
//! same sign as what is still unexplained, and never more than that. What
//! remains at the end is `unknown`, so the attributions of an account always
//! sum to its difference.
//!
//! - `fx_policy_difference`: external base figure minus the external
//!   balance converted at the snapshot's rate.
//! - `stale_data`: transactions booked after the external balance date and
//!   up to the internal closing date.
//! - `timing_difference`: transactions whose value date and booking date
//!   straddle the external balance date.
//! - `unmatched_bank_transaction`: open, non-bank-true transactions booked
//!   by the external balance date.
//! - `rounding`: a residue within the configured tolerance.
//! - `mapping_gap`: the whole difference of an account present on one side
//!   only.
//!
//! ## Integrity
//!
//! A balance that cannot be valued in base currency is never valued at
//! 1.0. It is listed in `integrity_issues`, its side counts as zero, and
//! whatever it leaves unexplained lands in `unknown`.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use rust_decimal::Decimal;

use cashlock_core::fx::apply_rate;
use cashlock_core::{
    AccountId, BankTransaction, Currency, EntityKind, EvidenceRef, ReconciliationStatus, ReportId,
    Timestamp,
};
use cashlock_state::Snapshot;

use crate::config::CertificationSettings;
use crate::export::{ExternalExport, ExternalPosition};
use crate::mapping::MappingMethod;
use crate::report::{
    AccountComparison, Attribution, CategoryTotal, CertificationReport, DifferenceCategory,
};
use crate::score::{certification_score, CertificationScoreInputs, CERTIFICATION_SCORE_VERSION};

/// Evidence references kept per attribution.
pub const MAX_EVIDENCE: usize = 20;

struct Waterfall {
    remaining: i64,
    attributions: Vec<Attribution>,
}

impl Waterfall {
    fn new(difference: i64) -> Self {
        Self {
            remaining: difference,
            attributions: Vec::new(),
        }
    }

    fn take(&mut self, category: DifferenceCategory, proposed: i64, evidence: Vec<EvidenceRef>) {
        if proposed == 0 || self.remaining == 0 || proposed.signum() != self.remaining.signum() {
            return;
        }
        let amount = proposed.signum() * proposed.abs().min(self.remaining.abs());
        self.remaining -= amount;
        self.attributions.push(Attribution {
            category,
            amount_minor: amount,
            evidence,
        });
    }

    fn finish(mut self) -> Vec<Attribution> {
        if self.remaining != 0 {
            self.attributions.push(Attribution {
                category: DifferenceCategory::Unknown,
                amount_minor: self.remaining,
                evidence: Vec::new(),
            });
        }
        self.attributions
    }
}

struct InternalAccount {
    account_id: AccountId,
    currency: Currency,
    closing_minor: i64,
    closing_date: Option<NaiveDate>,
}

/// Compare `export` against `snapshot`.
pub fn compare(
    snapshot: &Snapshot,
    export: &ExternalExport,
    settings: &CertificationSettings,
    now: Timestamp,
) -> CertificationReport {
    let fx = snapshot.fx();
    let base = snapshot.base_currency().clone();

    let internal: Vec<InternalAccount> = snapshot
        .latest_balances()
        .into_iter()
        .filter_map(|b| {
            Some(InternalAccount {
                closing_minor: b.closing_minor?,
                account_id: b.account_id,
                currency: b.currency,
                closing_date: b.closing_date,
            })
        })
        .collect();
    let internal_ids: Vec<AccountId> = internal.iter().map(|a| a.account_id.clone()).collect();

    let mut integrity_issues = Vec::new();
    let mut claimed: BTreeSet<AccountId> = BTreeSet::new();
    let mut accounts = Vec::with_capacity(export.positions.len() + internal.len());

    for pos in &export.positions {
        let (target, mut method) = settings.account_mapping.resolve(&pos.account_id, &internal_ids);
        let target = match target {
            Some(id) if claimed.insert(id.clone()) => internal.iter().find(|a| a.account_id == *id),
            Some(_) => {
                method = MappingMethod::Unmapped;
                None
            }
            None => None,
        };

        let external_base = external_base(snapshot, pos);
        if external_base.is_none() {
            integrity_issues.push(
                EvidenceRef::new(EntityKind::FxRate, format!("{}/{}", pos.currency, base))
                    .with_field("side", "external")
                    .with_field("account_id", &pos.account_id),
            );
        }

        let comparison = match target {
            None => external_only(pos, method, external_base),
            Some(acct) => {
                let internal_base = fx.convert_to_base(acct.closing_minor, &acct.currency).ok();
                if internal_base.is_none() {
                    integrity_issues.push(
                        EvidenceRef::new(EntityKind::FxRate, format!("{}/{}", acct.currency, base))
                            .with_field("side", "internal")
                            .with_field("account_id", acct.account_id.as_str()),
                    );
                }
                paired(snapshot, pos, acct, method, external_base, internal_base, settings)
            }
        };
        accounts.push(comparison);
    }

    for acct in internal.iter().filter(|a| !claimed.contains(&a.account_id)) {
        let internal_base = fx.convert_to_base(acct.closing_minor, &acct.currency).ok();
        if internal_base.is_none() {
            integrity_issues.push(
                EvidenceRef::new(EntityKind::FxRate, format!("{}/{}", acct.currency, base))
                    .with_field("side", "internal")
                    .with_field("account_id", acct.account_id.as_str()),
            );
        }
        accounts.push(internal_only(acct, internal_base));
    }

    let external_total_minor: i64 = accounts.iter().filter_map(|a| a.external_base_minor).sum();
    let internal_total_minor: i64 = accounts.iter().filter_map(|a| a.internal_base_minor).sum();
    let net_difference_minor: i64 = accounts.iter().map(|a| a.difference_minor).sum();
    let gross_difference_minor: i64 = accounts.iter().map(|a| a.difference_minor.abs()).sum();

    let categories: Vec<CategoryTotal> = DifferenceCategory::ALL
        .iter()
        .map(|&category| {
            let mut total = CategoryTotal {
                category,
                net_minor: 0,
                gross_minor: 0,
                accounts: 0,
            };
            for a in &accounts {
                let mut hit = false;
                for attr in a.attributions.iter().filter(|x| x.category == category) {
                    total.net_minor += attr.amount_minor;
                    total.gross_minor += attr.amount_minor.abs();
                    hit = true;
                }
                if hit {
                    total.accounts += 1;
                }
            }
            total
        })
        .collect();

    let reference = snapshot.bank_as_of().unwrap_or(now);
    let export_age_hours = reference.hours_since(&export.generated_at);
    let stale = export_age_hours > settings.stale_after_hours;

    let compared_minor = accounts
        .iter()
        .filter_map(|a| a.internal_base_minor)
        .map(i64::abs)
        .sum::<i64>()
        .max(accounts.iter().filter_map(|a| a.external_base_minor).map(i64::abs).sum());
    let score_inputs = CertificationScoreInputs {
        unexplained_minor: categories
            .iter()
            .filter(|c| c.category.is_unexplained())
            .map(|c| c.gross_minor)
            .sum(),
        compared_minor,
        stale,
    };
    let score = certification_score(&score_inputs, settings);

    let report = CertificationReport {
        report_id: ReportId::new(),
        snapshot_id: snapshot.id(),
        external_system: export.system.clone(),
        export_generated_at: export.generated_at,
        export_age_hours,
        stale,
        base_currency: base,
        external_total_minor,
        internal_total_minor,
        net_difference_minor,
        gross_difference_minor,
        accounts,
        categories,
        integrity_issues,
        score_version: CERTIFICATION_SCORE_VERSION.to_string(),
        score_inputs,
        score,
        threshold: settings.threshold,
        generated_at: now,
        certification: None,
        supersedes: None,
    };

    if report.stale {
        tracing::warn!(
            snapshot_id = %report.snapshot_id,
            export_age_hours,
            "external export is stale; certification score downgraded"
        );
    }
    tracing::info!(
        snapshot_id = %report.snapshot_id,
        report_id = %report.report_id,
        system = %report.external_system,
        accounts = report.accounts.len(),
        net_difference_minor,
        score = %report.score,
        "certification comparison complete"
    );
    report
}

/// External balance in base currency.
///
/// Prefers the external system's own base figure, then its own rate, then
/// the snapshot's rate.
fn external_base(snapshot: &Snapshot, pos: &ExternalPosition) -> Option<i64> {
    if let Some(b) = pos.base_balance_minor {
        return Some(b);
    }
    if pos.currency == *snapshot.base_currency() {
        return Some(pos.balance_minor);
    }
    if let Some(rate) = pos.fx_rate {
        return apply_rate(pos.balance_minor, rate);
    }
    snapshot.fx().convert_to_base(pos.balance_minor, &pos.currency).ok()
}

fn external_only(
    pos: &ExternalPosition,
    method: MappingMethod,
    external_base: Option<i64>,
) -> AccountComparison {
    let difference = external_base.unwrap_or(0);
    let mut w = Waterfall::new(difference);
    w.take(
        DifferenceCategory::MappingGap,
        difference,
        vec![EvidenceRef::new(EntityKind::Account, &pos.account_id).with_field("side", "external")],
    );
    AccountComparison {
        external_account_id: Some(pos.account_id.clone()),
        internal_account_id: None,
        mapping: method,
        currency: pos.currency.clone(),
        external_as_of: Some(pos.as_of),
        internal_as_of: None,
        external_balance_minor: Some(pos.balance_minor),
        internal_balance_minor: None,
        external_base_minor: external_base,
        internal_base_minor: None,
        difference_minor: difference,
        attributions: w.finish(),
    }
}

fn internal_only(acct: &InternalAccount, internal_base: Option<i64>) -> AccountComparison {
    let difference = -internal_base.unwrap_or(0);
    let mut w = Waterfall::new(difference);
    w.take(
        DifferenceCategory::MappingGap,
        difference,
        vec![EvidenceRef::new(EntityKind::Account, acct.account_id.as_str())
            .with_field("side", "internal")],
    );
    AccountComparison {
        external_account_id: None,
        internal_account_id: Some(acct.account_id.clone()),
        mapping: MappingMethod::Unmapped,
        currency: acct.currency.clone(),
        external_as_of: None,
        internal_as_of: acct.closing_date,
        external_balance_minor: None,
        internal_balance_minor: Some(acct.closing_minor),
        external_base_minor: None,
        internal_base_minor: internal_base,
        difference_minor: difference,
        attributions: w.finish(),
    }
}

fn paired(
    snapshot: &Snapshot,
    pos: &ExternalPosition,
    acct: &InternalAccount,
    method: MappingMethod,
    external_base: Option<i64>,
    internal_base: Option<i64>,
    settings: &CertificationSettings,
) -> AccountComparison {
    let difference = external_base.unwrap_or(0) - internal_base.unwrap_or(0);
    let mut w = Waterfall::new(difference);

    if let (Some(ext), Some(_)) = (external_base, internal_base) {
        let fx = snapshot.fx();
        if pos.currency != *snapshot.base_currency() {
            if let Ok(at_internal_rate) = fx.convert_to_base(pos.balance_minor, &pos.currency) {
                let internal_rate = fx
                    .get(&pos.currency)
                    .map(|r| r.rate)
                    .unwrap_or(Decimal::ZERO);
                let mut ev = EvidenceRef::new(EntityKind::FxRate, pos.currency.as_str())
                    .with_field("internal_rate", internal_rate);
                if let Some(rate) = pos.fx_rate {
                    ev = ev.with_field("external_rate", rate);
                }
                w.take(DifferenceCategory::FxPolicyDifference, ext - at_internal_rate, vec![ev]);
            }
        }

        let txs: Vec<(&BankTransaction, i64)> = snapshot
            .transactions()
            .iter()
            .filter(|t| t.account_id == acct.account_id)
            .filter_map(|t| {
                fx.convert_to_base(t.signed_amount(), &t.currency)
                    .ok()
                    .map(|b| (t, b))
            })
            .collect();

        if let Some(closing) = acct.closing_date.filter(|d| pos.as_of < *d) {
            let after: Vec<_> = txs
                .iter()
                .filter(|(t, _)| t.booking_date > pos.as_of && t.booking_date <= closing)
                .collect();
            let proposed = -after.iter().map(|(_, b)| b).sum::<i64>();
            w.take(DifferenceCategory::StaleData, proposed, evidence(after.iter().map(|(t, _)| *t)));
        }

        let mut timing = 0i64;
        let mut straddling = Vec::new();
        for (t, b) in &txs {
            let Some(value_date) = t.value_date else {
                continue;
            };
            let by_value = value_date <= pos.as_of;
            let by_booking = t.booking_date <= pos.as_of;
            if by_value != by_booking {
                timing += if by_value { *b } else { -*b };
                straddling.push(*t);
            }
        }
        w.take(DifferenceCategory::TimingDifference, timing, evidence(straddling.into_iter()));

        let net = snapshot.allocations().net_by_transaction();
        let mut unmatched = 0i64;
        let mut open_txs = Vec::new();
        for (t, _) in &txs {
            if t.booking_date > pos.as_of || t.is_bank_true() || !counts_as_unmatched(t.status) {
                continue;
            }
            let open = t.amount_minor - net.get(&t.id).copied().unwrap_or(0);
            if open <= 0 {
                continue;
            }
            if let Ok(b) = fx.convert_to_base(open * t.direction.sign(), &t.currency) {
                unmatched += b;
                open_txs.push(*t);
            }
        }
        w.take(
            DifferenceCategory::UnmatchedBankTransaction,
            -unmatched,
            evidence(open_txs.into_iter()),
        );

        if w.remaining.abs() <= settings.rounding_tolerance_minor {
            let residue = w.remaining;
            w.take(DifferenceCategory::Rounding, residue, Vec::new());
        }
    }

    AccountComparison {
        external_account_id: Some(pos.account_id.clone()),
        internal_account_id: Some(acct.account_id.clone()),
        mapping: method,
        currency: acct.currency.clone(),
        external_as_of: Some(pos.as_of),
        internal_as_of: acct.closing_date,
        external_balance_minor: Some(pos.balance_minor),
        internal_balance_minor: Some(acct.closing_minor),
        external_base_minor: external_base,
        internal_base_minor: internal_base,
        difference_minor: difference,
        attributions: w.finish(),
    }
}

fn counts_as_unmatched(status: ReconciliationStatus) -> bool {
    match status {
        ReconciliationStatus::New
        | ReconciliationStatus::Candidate
        | ReconciliationStatus::Exception
        | ReconciliationStatus::Allocated => true,
        ReconciliationStatus::WashPending | ReconciliationStatus::WashConfirmed => false,
    }
}

fn evidence<'a>(txs: impl Iterator<Item = &'a BankTransaction>) -> Vec<EvidenceRef> {
    txs.take(MAX_EVIDENCE)
        .map(|t| {
            EvidenceRef::new(EntityKind::Transaction, t.id.as_str())
                .with_field("amount_minor", t.signed_amount())
                .with_field("booking_date", t.booking_date)
        })
        .collect()
}
