//! # Matching Run
//!
//! One run over a snapshot: wash detection first, then one pass per tier
//! over every transaction with an open amount, in canonical order (booking
//! date, id). Tier 1 clears the whole population before Tier 2 sees any of
//! it, so a tolerance match never takes an invoice another transaction
//! settles exactly. Suggestions are checked against the final open amounts
//! once every pass has run; a transaction left without a live candidate is
//! routed to the exception queue.
//!
//! The run is pure. It reads the snapshot and returns a [`MatchOutcome`];
//! committing it is the snapshot's job ([`Snapshot::apply_batch`]), which
//! applies the whole batch or nothing.
//!
//! ## Idempotence
//!
//! Open amounts come from the committed allocation log, a partly allocated
//! transaction whose remainder is within the amount tolerance is settled,
//! transactions that already carry an open exception are not routed again, a resolved
//! exception stands while the transaction's open amount is unchanged, and
//! wash legs are skipped. Re-running on an unchanged snapshot therefore
//! yields no new allocations, exceptions or washes.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Serialize;

use cashlock_core::{
    BankTransaction, ExceptionId, InvoiceId, MatchCandidate, MatchTier, TransactionId, WashId,
    WashPair,
};
use cashlock_state::{AllocationDraft, CommitBatch, ExceptionDraft, Snapshot, SYSTEM_ACTOR};

use crate::error::MatchingError;
use crate::index::InvoiceIndex;
use crate::policy::{MatchingPolicy, PolicyBook};
use crate::tiers::{self, RankedCandidate, TierFn, TierInput};
use crate::wash::{detect_washes, IntercompanyGroups};

/// Reason recorded on exceptions the run opens.
pub const NO_CANDIDATE_REASON: &str = "no candidate cleared any matching tier";

/// What happened to one transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Allocated automatically.
    Allocated {
        /// Tier that cleared it.
        tier: MatchTier,
        /// Invoice allocated to.
        invoice_id: InvoiceId,
        /// Amount allocated.
        amount_minor: i64,
        /// Tier confidence.
        confidence: f64,
    },
    /// Waiting for a human to approve one of the candidates.
    Suggested {
        /// Candidates, best first.
        candidates: Vec<MatchCandidate>,
    },
    /// Routed to the exception queue. `existing` when it was already there.
    Exception {
        /// Whether an open exception already covered it.
        existing: bool,
    },
    /// No candidate, but a resolved exception already explains the same
    /// open amount.
    Explained {
        /// The resolved exception.
        exception_id: ExceptionId,
    },
    /// Leg of a newly detected wash pair.
    Wash {
        /// The pair.
        wash_id: WashId,
    },
}

/// Per-transaction result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionResult {
    /// Transaction.
    pub transaction_id: TransactionId,
    /// Outcome.
    #[serde(flatten)]
    pub disposition: Disposition,
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    /// Transactions evaluated by the tiers or the wash detector.
    pub considered: usize,
    /// Tier 1 allocations.
    pub deterministic: usize,
    /// Tier 2 allocations.
    pub rules: usize,
    /// Transactions left with suggestions.
    pub suggested: usize,
    /// Transactions routed to exceptions, new or existing.
    pub exceptions: usize,
    /// New wash pairs.
    pub washes: usize,
    /// Total allocated by this run.
    pub allocated_minor: i64,
    /// Wall time of the run.
    pub elapsed_ms: u64,
}

/// Everything a run produced, ready to commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchOutcome {
    /// One entry per considered transaction, in canonical order.
    pub results: Vec<TransactionResult>,
    /// New allocations.
    pub allocations: Vec<AllocationDraft>,
    /// New exceptions.
    pub exceptions: Vec<ExceptionDraft>,
    /// Pending suggestions.
    pub suggestions: Vec<MatchCandidate>,
    /// New wash pairs.
    pub washes: Vec<WashPair>,
    /// Counters.
    pub summary: MatchSummary,
}

impl MatchOutcome {
    /// The batch the snapshot commits.
    pub fn into_batch(self) -> CommitBatch {
        CommitBatch {
            allocations: self.allocations,
            exceptions: self.exceptions,
            washes: self.washes,
            suggestions: self.suggestions,
        }
    }
}

/// Tier passes, in the order they run.
const PASSES: [MatchTier; 3] = [MatchTier::Deterministic, MatchTier::Rules, MatchTier::Suggested];

fn tier_fn(policy: &MatchingPolicy, tier: MatchTier) -> Option<TierFn> {
    match tier {
        MatchTier::Deterministic => policy.tiers.deterministic.then_some(tiers::deterministic as TierFn),
        MatchTier::Rules => policy.tiers.rules.then_some(tiers::rules as TierFn),
        MatchTier::Suggested => policy.tiers.suggested.then_some(tiers::suggested as TierFn),
        MatchTier::Manual => None,
    }
}

/// Where a transaction stands between passes.
enum Stage {
    Open,
    Held(Vec<RankedCandidate>),
    Done(Disposition),
}

/// Run matching over `snapshot`.
pub fn run(
    snapshot: &Snapshot,
    policies: &PolicyBook,
    groups: &IntercompanyGroups,
) -> Result<MatchOutcome, MatchingError> {
    if snapshot.status().is_locked() {
        return Err(MatchingError::SnapshotLocked {
            snapshot_id: snapshot.id(),
            status: snapshot.status(),
        });
    }
    policies.validate()?;
    let started = Instant::now();

    let net_tx = snapshot.allocations().net_by_transaction();
    let net_inv = snapshot.allocations().net_by_invoice();
    let open_tx = |tx: &BankTransaction| tx.amount_minor - net_tx.get(&tx.id).copied().unwrap_or(0);
    // A partly allocated transaction whose remainder a Tier 2 match may leave
    // behind counts as settled.
    let within_tolerance = |tx: &BankTransaction, open: i64| {
        net_tx.get(&tx.id).copied().unwrap_or(0) > 0
            && open <= policies.resolve(&tx.entity_id, &tx.currency).amount_tolerance_minor
    };
    let paired: HashSet<&TransactionId> = snapshot
        .washes()
        .iter()
        .flat_map(|w| [&w.outgoing, &w.incoming])
        .collect();

    let mut outcome = MatchOutcome::default();

    let wash_pool: Vec<&BankTransaction> = snapshot
        .transactions()
        .iter()
        .filter(|t| !t.is_wash() && !paired.contains(&t.id))
        .filter(|t| net_tx.get(&t.id).copied().unwrap_or(0) == 0)
        .collect();
    let washes = detect_washes(&wash_pool, groups, |t| {
        policies.resolve(&t.entity_id, &t.currency).wash_window_days
    });
    let mut washed: HashMap<TransactionId, WashId> = HashMap::new();
    for w in &washes {
        washed.insert(w.outgoing.clone(), w.id);
        washed.insert(w.incoming.clone(), w.id);
    }

    let mut ordered: Vec<(&BankTransaction, i64)> = snapshot
        .transactions()
        .iter()
        .filter(|t| !t.is_wash() && !paired.contains(&t.id))
        .filter(|t| washed.contains_key(&t.id) || !t.is_bank_true())
        .map(|t| (t, open_tx(t)))
        .filter(|(t, open)| washed.contains_key(&t.id) || (*open > 0 && !within_tolerance(*t, *open)))
        .collect();
    ordered.sort_by(|a, b| (a.0.booking_date, &a.0.id).cmp(&(b.0.booking_date, &b.0.id)));

    let mut index = InvoiceIndex::build(snapshot.invoices().iter(), |inv| {
        inv.amount_minor - net_inv.get(&inv.id).copied().unwrap_or(0)
    });

    let inputs: Vec<TierInput<'_>> = ordered
        .iter()
        .map(|&(tx, open)| TierInput::new(tx, open))
        .collect();
    let mut stages: Vec<Stage> = ordered
        .iter()
        .map(|(tx, _)| match washed.get(&tx.id) {
            Some(wash_id) => Stage::Done(Disposition::Wash { wash_id: *wash_id }),
            None => Stage::Open,
        })
        .collect();

    for tier in PASSES {
        for (input, stage) in inputs.iter().zip(stages.iter_mut()) {
            if !matches!(stage, Stage::Open) {
                continue;
            }
            let tx = input.transaction;
            let policy = policies.resolve(&tx.entity_id, &tx.currency);
            let Some(f) = tier_fn(policy, tier) else {
                continue;
            };
            let ranked = f(input, &index, policy);
            if ranked.is_empty() {
                continue;
            }
            *stage = match tier {
                MatchTier::Deterministic => Stage::Done(allocate(&mut outcome, &mut index, ranked)),
                MatchTier::Rules if policy.tier2_auto_approve => {
                    Stage::Done(allocate(&mut outcome, &mut index, ranked))
                }
                _ => Stage::Held(ranked),
            };
        }
    }

    for ((tx, open), stage) in ordered.iter().zip(stages) {
        outcome.summary.considered += 1;
        let disposition = match stage {
            Stage::Done(d) => d,
            Stage::Held(ranked) => {
                let candidates = live_candidates(&index, ranked);
                if candidates.is_empty() {
                    unexplained(&mut outcome, snapshot, tx, *open)
                } else {
                    outcome.summary.suggested += 1;
                    outcome.suggestions.extend(candidates.iter().cloned());
                    Disposition::Suggested { candidates }
                }
            }
            Stage::Open => unexplained(&mut outcome, snapshot, tx, *open),
        };
        outcome.results.push(TransactionResult {
            transaction_id: tx.id.clone(),
            disposition,
        });
    }

    outcome.summary.washes = washes.len();
    outcome.washes = washes;
    outcome.summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    tracing::info!(
        snapshot_id = %snapshot.id(),
        considered = outcome.summary.considered,
        deterministic = outcome.summary.deterministic,
        rules = outcome.summary.rules,
        suggested = outcome.summary.suggested,
        exceptions = outcome.summary.exceptions,
        washes = outcome.summary.washes,
        elapsed_ms = outcome.summary.elapsed_ms,
        "matching run finished"
    );
    Ok(outcome)
}

/// Held candidates whose invoice is still open after every pass, with the
/// suggested amount capped at what remains.
fn live_candidates(index: &InvoiceIndex<'_>, ranked: Vec<RankedCandidate>) -> Vec<MatchCandidate> {
    ranked
        .into_iter()
        .filter_map(|r| {
            let remaining = index.slot(r.slot).open_minor;
            (remaining > 0).then(|| MatchCandidate {
                suggested_amount_minor: r.candidate.suggested_amount_minor.min(remaining),
                ..r.candidate
            })
        })
        .collect()
}

/// No tier cleared `tx`.
fn unexplained(
    outcome: &mut MatchOutcome,
    snapshot: &Snapshot,
    tx: &BankTransaction,
    open: i64,
) -> Disposition {
    let queue = snapshot.exceptions();
    if queue.open_for_transaction(&tx.id).is_some() {
        outcome.summary.exceptions += 1;
        return Disposition::Exception { existing: true };
    }
    if let Some(done) = queue
        .last_resolved_for_transaction(&tx.id)
        .filter(|e| e.resolved_open_minor == Some(open))
    {
        return Disposition::Explained {
            exception_id: done.id,
        };
    }
    outcome.summary.exceptions += 1;
    outcome.exceptions.push(ExceptionDraft {
        transaction_id: tx.id.clone(),
        reason: NO_CANDIDATE_REASON.to_string(),
    });
    Disposition::Exception { existing: false }
}

fn allocate(
    outcome: &mut MatchOutcome,
    index: &mut InvoiceIndex<'_>,
    ranked: Vec<RankedCandidate>,
) -> Disposition {
    let Some(best) = ranked.into_iter().next() else {
        return Disposition::Exception { existing: false };
    };
    let c = best.candidate;
    index.reduce(best.slot, c.suggested_amount_minor);
    match c.tier {
        MatchTier::Deterministic => outcome.summary.deterministic += 1,
        _ => outcome.summary.rules += 1,
    }
    outcome.summary.allocated_minor += c.suggested_amount_minor;
    outcome.allocations.push(AllocationDraft {
        transaction_id: c.transaction_id.clone(),
        invoice_id: c.invoice_id.clone(),
        amount_minor: c.suggested_amount_minor,
        tier: c.tier,
        approver: SYSTEM_ACTOR.to_string(),
        reason: c.reasons.join("; "),
    });
    Disposition::Allocated {
        tier: c.tier,
        invoice_id: c.invoice_id,
        amount_minor: c.suggested_amount_minor,
        confidence: c.confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wash::IntercompanyGroup;
    use cashlock_core::{
        Currency, EntityId, Invoice, InvoiceKind, ReconciliationStatus,
        StatementFormat, Timestamp,
    };
    use cashlock_ingest::{normalize, ImportContext};
    use chrono::NaiveDate;

    const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:61:2603310331C77,00NTRFNONREF//B3\n:86:/NAME/Nobody Known/REMI/misc\n:62F:C260331EUR1227,00\n";

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    fn now() -> Timestamp {
        Timestamp::parse("2026-04-01T09:00:00Z").unwrap()
    }

    fn invoice(id: &str, amount: i64, customer: &str) -> Invoice {
        Invoice {
            id: InvoiceId::new(id),
            entity_id: EntityId::new("ACME-DE"),
            document_number: id.to_string(),
            customer: customer.into(),
            kind: InvoiceKind::Receivable,
            amount_minor: amount,
            currency: eur(),
            base_amount_minor: amount,
            due_date: None,
            country: "DE".into(),
            payment_date: None,
            on_hold: false,
        }
    }

    fn snapshot() -> Snapshot {
        let ctx = ImportContext {
            entity_id: EntityId::new("ACME-DE"),
        };
        let stmt = normalize(MT940.as_bytes(), StatementFormat::Mt940, &ctx).unwrap();
        let mut s = Snapshot::new("W13", NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), eur(), now());
        s.import_statement(stmt, now()).unwrap();
        s.load_invoices(
            vec![
                invoice("INV-1001", 25_000, "Acme GmbH"),
                invoice("INV-2002", 90_000, "Globex"),
            ],
            now(),
        )
        .unwrap();
        s
    }

    #[test]
    fn end_to_end_allocates_and_routes_exceptions() {
        let mut s = snapshot();
        let outcome = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();

        assert_eq!(outcome.summary.considered, 2, "bank fee is bank-true");
        assert_eq!(outcome.summary.deterministic, 1);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].invoice_id.as_str(), "INV-1001");
        assert_eq!(outcome.allocations[0].amount_minor, 25_000);
        assert_eq!(outcome.exceptions.len(), 1);

        s.apply_batch(outcome.into_batch(), now()).unwrap();
        assert_eq!(s.open_amount_invoice(&InvoiceId::new("INV-1001")), Some(0));
        let statuses: Vec<ReconciliationStatus> =
            s.transactions().iter().map(|t| t.status).collect();
        assert!(statuses.contains(&ReconciliationStatus::Allocated));
        assert!(statuses.contains(&ReconciliationStatus::Exception));
    }

    #[test]
    fn rerun_on_committed_snapshot_produces_nothing_new() {
        let mut s = snapshot();
        let first = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        s.apply_batch(first.into_batch(), now()).unwrap();
        let allocations_before = s.allocations().len();

        let second = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert!(second.allocations.is_empty());
        assert!(second.exceptions.is_empty());
        assert!(second.washes.is_empty());
        assert_eq!(
            second.results[0].disposition,
            Disposition::Exception { existing: true }
        );

        s.apply_batch(second.into_batch(), now()).unwrap();
        assert_eq!(s.allocations().len(), allocations_before);
        assert_eq!(s.exceptions().len(), 1);
    }

    #[test]
    fn disabled_tiers_route_to_exceptions() {
        let s = snapshot();
        let mut book = PolicyBook::default();
        book.default.tiers.deterministic = false;
        book.default.tiers.rules = false;
        book.default.tiers.suggested = false;
        let outcome = run(&s, &book, &IntercompanyGroups::default()).unwrap();
        assert!(outcome.allocations.is_empty());
        assert_eq!(outcome.exceptions.len(), 2);
    }

    #[test]
    fn locked_snapshot_is_refused() {
        use cashlock_core::{Comparison, GateCheck};
        use cashlock_state::{LockRequest, Role};
        use rust_decimal::Decimal;

        let mut s = snapshot();
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
            actor: "cfo".into(),
            role: Role::Controller,
            override_acknowledgments: Vec::new(),
            reason: String::new(),
        };
        s.lock(&[gate], &req, now()).unwrap();
        assert!(matches!(
            run(&s, &PolicyBook::default(), &IntercompanyGroups::default()),
            Err(MatchingError::SnapshotLocked { .. })
        ));
    }

    #[test]
    fn wash_legs_are_held_out_of_tiering() {
        let ctx_fr = ImportContext {
            entity_id: EntityId::new("ACME-FR"),
        };
        let de = ":20:STMT-DE\n:25:DE02100100100006820101\n:28C:1/1\n:60F:C260330EUR5000,00\n:61:2603310331D500,00NTRFIC-77//B9\n:86:/NAME/Acme France/REMI/cash pooling\n:62F:C260331EUR4500,00\n";
        let fr = ":20:STMT-FR\n:25:FR7630006000011234567890189\n:28C:1/1\n:60F:C260330EUR0,00\n:61:2604010401C500,00NTRFIC-77//B8\n:86:/NAME/Acme GmbH/REMI/cash pooling\n:62F:C260401EUR500,00\n";
        let ctx_de = ImportContext {
            entity_id: EntityId::new("ACME-DE"),
        };
        let mut s = Snapshot::new("W13", NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), eur(), now());
        s.import_statement(normalize(de.as_bytes(), StatementFormat::Mt940, &ctx_de).unwrap(), now())
            .unwrap();
        s.import_statement(normalize(fr.as_bytes(), StatementFormat::Mt940, &ctx_fr).unwrap(), now())
            .unwrap();
        let groups = IntercompanyGroups::new(vec![IntercompanyGroup {
            name: "ACME".into(),
            entities: vec![EntityId::new("ACME-DE"), EntityId::new("ACME-FR")],
        }]);

        let outcome = run(&s, &PolicyBook::default(), &groups).unwrap();
        assert_eq!(outcome.washes.len(), 1);
        assert!(outcome.exceptions.is_empty());
        assert!(outcome
            .results
            .iter()
            .all(|r| matches!(r.disposition, Disposition::Wash { .. })));

        s.apply_batch(outcome.into_batch(), now()).unwrap();
        assert!(s
            .transactions()
            .iter()
            .all(|t| t.status == ReconciliationStatus::WashPending));
        let again = run(&s, &PolicyBook::default(), &groups).unwrap();
        assert!(again.washes.is_empty());
        assert!(again.results.is_empty());
    }

    fn two_credit_snapshot(lines: &str, closing: &str, invoices: Vec<Invoice>) -> Snapshot {
        let text = format!(
            ":20:STMT-0002\n:25:DE89370400440532013000\n:28C:2/1\n:60F:C260329EUR0,00\n{lines}:62F:C260331EUR{closing}\n"
        );
        let ctx = ImportContext {
            entity_id: EntityId::new("ACME-DE"),
        };
        let stmt = normalize(text.as_bytes(), StatementFormat::Mt940, &ctx).unwrap();
        let mut s = Snapshot::new("W13", NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(), eur(), now());
        s.import_statement(stmt, now()).unwrap();
        s.load_invoices(invoices, now()).unwrap();
        s
    }

    fn tx_by_amount(s: &Snapshot, amount: i64) -> TransactionId {
        s.transactions()
            .iter()
            .find(|t| t.amount_minor == amount)
            .unwrap()
            .id
            .clone()
    }

    #[test]
    fn exact_match_is_not_taken_by_an_earlier_tolerance_match() {
        let mut inv = invoice("INV-X", 10_000, "Acme GmbH");
        inv.due_date = NaiveDate::from_ymd_opt(2026, 3, 31);
        let s = two_credit_snapshot(
            ":61:2603300330C100,50NTRFNONREF//B1\n:86:/NAME/Someone Else/REMI/misc\n\
             :61:2603310331C100,00NTRFINV-X//B2\n:86:/NAME/Acme GmbH/REMI/Invoice INV-X\n",
            "200,50",
            vec![inv],
        );
        let early = tx_by_amount(&s, 10_050);
        let exact = tx_by_amount(&s, 10_000);

        let outcome = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert_eq!(outcome.summary.deterministic, 1);
        assert_eq!(outcome.summary.rules, 0);
        assert_eq!(outcome.allocations.len(), 1);
        assert_eq!(outcome.allocations[0].transaction_id, exact);
        assert_eq!(outcome.allocations[0].tier, MatchTier::Deterministic);

        let ids: Vec<&TransactionId> = outcome.results.iter().map(|r| &r.transaction_id).collect();
        assert_eq!(ids, vec![&early, &exact], "results stay in booking order");
        assert_eq!(
            outcome.results[0].disposition,
            Disposition::Exception { existing: false }
        );
    }

    #[test]
    fn tolerance_remainder_is_not_reworked_on_rerun() {
        let mut inv = invoice("INV-X", 10_000, "Acme GmbH");
        inv.due_date = NaiveDate::from_ymd_opt(2026, 3, 31);
        let mut s = two_credit_snapshot(
            ":61:2603300330C100,50NTRFNONREF//B1\n:86:/NAME/Someone Else/REMI/misc\n",
            "100,50",
            vec![inv],
        );
        let first = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert_eq!(first.summary.rules, 1);
        assert_eq!(first.allocations[0].amount_minor, 10_000);
        s.apply_batch(first.into_batch(), now()).unwrap();

        let second = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert!(second.results.is_empty());
        assert!(second.exceptions.is_empty());
    }

    #[test]
    fn suggestion_never_points_at_an_invoice_settled_later_in_the_run() {
        let mut s = two_credit_snapshot(
            ":61:2603300330C95,00NTRFNONREF//B1\n:86:/NAME/Acme GmbH/REMI/misc\n\
             :61:2603310331C100,00NTRFINV-7//B2\n:86:/NAME/Acme GmbH/REMI/Invoice INV-7\n",
            "195,00",
            vec![invoice("INV-7", 10_000, "Acme GmbH")],
        );
        let early = tx_by_amount(&s, 9_500);

        let first = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert!(first.suggestions.is_empty());
        assert_eq!(first.summary.suggested, 0);
        assert_eq!(first.exceptions.len(), 1);
        assert_eq!(first.exceptions[0].transaction_id, early);
        s.apply_batch(first.into_batch(), now()).unwrap();

        let second = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert!(second.allocations.is_empty());
        assert!(second.exceptions.is_empty());
        assert!(second.suggestions.is_empty());
        assert_eq!(
            second.results[0].disposition,
            Disposition::Exception { existing: true }
        );
    }

    #[test]
    fn held_candidates_are_checked_against_final_open_amounts() {
        let invoices = vec![invoice("INV-A", 10_000, "A"), invoice("INV-B", 10_000, "B")];
        let mut index = InvoiceIndex::build(&invoices, |i| i.amount_minor);
        let held = |slot: usize, id: &str| RankedCandidate {
            slot,
            candidate: MatchCandidate {
                transaction_id: TransactionId::new("T1"),
                invoice_id: InvoiceId::new(id),
                suggested_amount_minor: 9_000,
                tier: MatchTier::Suggested,
                confidence: 0.8,
                reasons: Vec::new(),
            },
        };
        index.reduce(0, 10_000);
        index.reduce(1, 4_000);

        let live = live_candidates(&index, vec![held(0, "INV-A"), held(1, "INV-B")]);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].invoice_id.as_str(), "INV-B");
        assert_eq!(live[0].suggested_amount_minor, 6_000);
    }

    #[test]
    fn resolved_exception_stands_until_the_open_amount_moves() {
        use cashlock_state::{ExceptionStatus, ManualAllocation};

        let mut s = snapshot();
        let first = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        s.apply_batch(first.into_batch(), now()).unwrap();
        let tx = tx_by_amount(&s, 7_700);
        let id = s.exceptions().open_for_transaction(&tx).unwrap().id;
        s.transition_exception(&id, ExceptionStatus::Resolved, "bob", Some("refund from supplier"), now())
            .unwrap();

        let rerun = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert!(rerun.exceptions.is_empty());
        assert_eq!(rerun.summary.exceptions, 0);
        assert_eq!(
            rerun.results[0].disposition,
            Disposition::Explained { exception_id: id }
        );
        s.apply_batch(rerun.into_batch(), now()).unwrap();
        assert_eq!(s.exceptions().len(), 1);

        s.allocate(
            ManualAllocation {
                transaction_id: tx.clone(),
                invoice_id: InvoiceId::new("INV-2002"),
                amount_minor: Some(5_000),
                actor: "bob".into(),
                reason: "part payment".into(),
            },
            now(),
        )
        .unwrap();
        let moved = run(&s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
        assert_eq!(moved.exceptions.len(), 1);
        assert_eq!(moved.exceptions[0].transaction_id, tx);
        s.apply_batch(moved.into_batch(), now()).unwrap();
        assert_eq!(s.exceptions().open_for_transaction(&tx).unwrap().amount_minor, 7_700);
        assert_eq!(s.exceptions().len(), 2);
    }
}
