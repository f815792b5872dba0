//! # Matching Tiers
//!
//! Each tier is a pure function from a transaction, the invoice index and
//! the policy to a ranked candidate list, best first. The engine runs each
//! enabled tier as a pass over every transaction still open; a transaction
//! leaves the pipeline at the first tier that returns anything.
//!
//! | Tier | Clears when | Approval |
//! |------|-------------|----------|
//! | deterministic | exact open amount and the reference names the document, or a unique exact-amount invoice is due or paid on the booking date | automatic |
//! | rules | amount within tolerance and due date within the window | automatic when `tier2_auto_approve` |
//! | suggested | weighted similarity ≥ `suggest_min_score` | always a human |

use cashlock_core::{format_minor, BankTransaction, InvoiceKind, MatchCandidate, MatchTier};

use crate::index::{InvoiceIndex, PoolKey};
use crate::policy::MatchingPolicy;
use crate::text::{jaro_winkler, normalize_name, normalize_reference, reference_score};

/// Weight of name similarity in the Tier 3 score.
pub const NAME_WEIGHT: f64 = 0.5;
/// Weight of the reference score in the Tier 3 score.
pub const REFERENCE_WEIGHT: f64 = 0.25;
/// Weight of amount closeness in the Tier 3 score.
pub const AMOUNT_WEIGHT: f64 = 0.25;

/// A transaction prepared for the tiers.
#[derive(Debug)]
pub struct TierInput<'t> {
    /// The transaction.
    pub transaction: &'t BankTransaction,
    /// Amount not yet allocated.
    pub open_minor: i64,
    /// Invoice pool the transaction can settle.
    pub key: PoolKey,
    /// Normalized reference.
    pub reference_norm: String,
    /// Normalized description.
    pub description_norm: String,
    /// Normalized counterparty.
    pub counterparty_norm: String,
}

impl<'t> TierInput<'t> {
    /// Prepare `tx` with `open_minor` still to allocate.
    pub fn new(tx: &'t BankTransaction, open_minor: i64) -> Self {
        Self {
            transaction: tx,
            open_minor,
            key: PoolKey {
                entity_id: tx.entity_id.clone(),
                currency: tx.currency.clone(),
                kind: InvoiceKind::settled_by(tx.direction),
            },
            reference_norm: normalize_reference(&tx.reference),
            description_norm: normalize_reference(&tx.description),
            counterparty_norm: normalize_name(&tx.counterparty),
        }
    }

    fn names_document(&self, document_norm: &str) -> bool {
        !document_norm.is_empty()
            && (self.reference_norm.contains(document_norm)
                || self.description_norm.contains(document_norm))
    }
}

/// A candidate together with its index slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedCandidate {
    /// Slot in the invoice index.
    pub slot: usize,
    /// The candidate.
    pub candidate: MatchCandidate,
}

/// Signature shared by every tier.
pub type TierFn = fn(&TierInput<'_>, &InvoiceIndex<'_>, &MatchingPolicy) -> Vec<RankedCandidate>;

fn ranked(
    input: &TierInput<'_>,
    index: &InvoiceIndex<'_>,
    slot: usize,
    tier: MatchTier,
    confidence: f64,
    reasons: Vec<String>,
) -> RankedCandidate {
    let s = index.slot(slot);
    RankedCandidate {
        slot,
        candidate: MatchCandidate {
            transaction_id: input.transaction.id.clone(),
            invoice_id: s.invoice.id.clone(),
            tier,
            confidence,
            reasons,
            suggested_amount_minor: input.open_minor.min(s.open_minor),
        },
    }
}

/// Tier 1.
pub fn deterministic(
    input: &TierInput<'_>,
    index: &InvoiceIndex<'_>,
    _policy: &MatchingPolicy,
) -> Vec<RankedCandidate> {
    let exact = index.exact(&input.key, input.open_minor);
    if exact.is_empty() {
        return Vec::new();
    }
    let amount = format!("exact open amount {}", format_minor(input.open_minor));

    if let Some(&slot) = exact
        .iter()
        .find(|&&i| input.names_document(&index.slot(i).document_norm))
    {
        let doc = &index.slot(slot).invoice.document_number;
        return vec![ranked(
            input,
            index,
            slot,
            MatchTier::Deterministic,
            1.0,
            vec![amount, format!("reference names document {doc}")],
        )];
    }

    let booking = input.transaction.booking_date;
    let dated: Vec<usize> = exact
        .into_iter()
        .filter(|&i| {
            let inv = index.slot(i).invoice;
            inv.due_date == Some(booking) || inv.payment_date == Some(booking)
        })
        .collect();
    match dated.as_slice() {
        [slot] => vec![ranked(
            input,
            index,
            *slot,
            MatchTier::Deterministic,
            1.0,
            vec![amount, "unique invoice due or paid on the booking date".to_string()],
        )],
        _ => Vec::new(),
    }
}

/// Tier 2.
pub fn rules(
    input: &TierInput<'_>,
    index: &InvoiceIndex<'_>,
    policy: &MatchingPolicy,
) -> Vec<RankedCandidate> {
    let tol = policy.amount_tolerance_minor;
    let window = policy.date_window_days;
    let booking = input.transaction.booking_date;
    let lo = (input.open_minor - tol).max(1);
    let hi = input.open_minor.saturating_add(tol);

    let mut hits: Vec<(i64, i64, usize)> = index
        .range(&input.key, lo, hi)
        .into_iter()
        .filter_map(|i| {
            let s = index.slot(i);
            let due = s.invoice.due_date?;
            let day_gap = (booking - due).num_days().abs();
            (day_gap <= window).then(|| ((s.open_minor - input.open_minor).abs(), day_gap, i))
        })
        .collect();
    hits.sort_unstable();

    hits.into_iter()
        .map(|(amount_gap, day_gap, slot)| {
            let confidence = 0.95
                - 0.15 * amount_gap as f64 / tol.max(1) as f64
                - 0.15 * day_gap as f64 / window.max(1) as f64;
            ranked(
                input,
                index,
                slot,
                MatchTier::Rules,
                confidence.clamp(0.0, 1.0),
                vec![
                    format!("amount within {} of open amount", format_minor(amount_gap)),
                    format!("booked {day_gap} day(s) from due date"),
                ],
            )
        })
        .collect()
}

/// Tier 3.
pub fn suggested(
    input: &TierInput<'_>,
    index: &InvoiceIndex<'_>,
    policy: &MatchingPolicy,
) -> Vec<RankedCandidate> {
    let open = input.open_minor;
    let band = open.saturating_mul(i64::from(policy.suggest_amount_band_pct)) / 100;
    let lo = (open - band).max(1);
    let hi = open.saturating_add(band);

    let mut scored: Vec<(f64, RankedCandidate)> = index
        .nearest(&input.key, open, lo, hi, policy.max_suggest_candidates)
        .into_iter()
        .filter_map(|i| {
            let s = index.slot(i);
            let name = if input.counterparty_norm.is_empty() || s.customer_norm.is_empty() {
                0.0
            } else {
                jaro_winkler(&input.counterparty_norm, &s.customer_norm)
            };
            let reference = reference_score(&input.reference_norm, &s.document_norm)
                .max(reference_score(&input.description_norm, &s.document_norm));
            let larger = open.max(s.open_minor) as f64;
            let closeness = 1.0 - (open - s.open_minor).abs() as f64 / larger;
            let score = NAME_WEIGHT * name + REFERENCE_WEIGHT * reference + AMOUNT_WEIGHT * closeness;
            (score >= policy.suggest_min_score).then(|| {
                let reasons = vec![
                    format!("name similarity {name:.2}"),
                    format!("reference score {reference:.2}"),
                    format!("amount closeness {closeness:.2}"),
                ];
                (score, ranked(input, index, i, MatchTier::Suggested, score, reasons))
            })
        })
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.candidate.invoice_id.cmp(&b.1.candidate.invoice_id))
    });
    scored
        .into_iter()
        .take(policy.max_suggestions_per_transaction)
        .map(|(_, c)| c)
        .collect()
}
