//! # Shared Reconciliation Model
//!
//! Types exchanged between the normalizer, the matching engine, the
//! snapshot aggregate and the trust report: canonical bank transactions,
//! upstream invoices, match candidates, wash pairs and gate checks.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::identity::{AccountId, EntityId, InvoiceId, TransactionId, WashId};
use crate::money::Currency;

// ── Statement formats ────────────────────────────────────────────────

/// Supported bank statement formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementFormat {
    /// SWIFT MT940 customer statement.
    Mt940,
    /// BAI2 cash management balance reporting.
    Bai2,
    /// ISO 20022 camt.053 bank-to-customer statement.
    Camt053,
}

impl StatementFormat {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mt940 => "mt940",
            Self::Bai2 => "bai2",
            Self::Camt053 => "camt053",
        }
    }

    /// Parse a user-supplied format name. Accepts `camt.053` as an alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "mt940" => Some(Self::Mt940),
            "bai2" => Some(Self::Bai2),
            "camt053" | "camt.053" => Some(Self::Camt053),
            _ => None,
        }
    }
}

impl std::fmt::Display for StatementFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Bank transactions ────────────────────────────────────────────────

/// Direction of a bank movement from the account holder's view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Money in.
    Credit,
    /// Money out.
    Debit,
}

impl Direction {
    /// `+1` for credits, `-1` for debits.
    pub fn sign(&self) -> i64 {
        match self {
            Self::Credit => 1,
            Self::Debit => -1,
        }
    }
}

/// Bank-assigned category. A categorized movement is explained by the bank
/// statement itself and needs no invoice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankCategory {
    /// Bank charges and commissions.
    Fee,
    /// Interest credited or debited.
    Interest,
    /// Tax withheld or paid by the bank.
    Tax,
    /// Book transfer between the holder's own accounts.
    InternalTransfer,
    /// Salary batch.
    Payroll,
}

/// Where a transaction stands in reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    /// Ingested, not yet matched.
    New,
    /// Has pending suggestions awaiting approval.
    Candidate,
    /// At least one approved allocation.
    Allocated,
    /// No candidate cleared any tier; routed to the exception queue.
    Exception,
    /// Part of an intercompany wash pair awaiting confirmation.
    WashPending,
    /// Part of a confirmed wash pair; excluded from cash movement.
    WashConfirmed,
}

impl ReconciliationStatus {
    /// Whether the matching engine should still try to match this transaction.
    pub fn is_matchable(&self) -> bool {
        matches!(self, Self::New | Self::Candidate | Self::Exception)
    }
}

/// A canonical bank transaction.
///
/// Immutable once ingested except for `status`. `amount_minor` is always
/// non-negative; `direction` carries the sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankTransaction {
    /// Content-derived identifier.
    pub id: TransactionId,
    /// Owning legal entity.
    pub entity_id: EntityId,
    /// Bank account the movement was booked on.
    pub account_id: AccountId,
    /// Identifier of the statement it was imported from.
    pub statement_id: String,
    /// Booking date.
    pub booking_date: NaiveDate,
    /// Value date, when the statement carries one.
    #[serde(default)]
    pub value_date: Option<NaiveDate>,
    /// Absolute amount in minor units.
    pub amount_minor: i64,
    /// Credit or debit.
    pub direction: Direction,
    /// Account currency.
    pub currency: Currency,
    /// Counterparty name.
    #[serde(default)]
    pub counterparty: String,
    /// Payment reference (end-to-end or customer reference).
    #[serde(default)]
    pub reference: String,
    /// Free-text remittance information.
    #[serde(default)]
    pub description: String,
    /// Bank-assigned category, if any.
    #[serde(default)]
    pub category: Option<BankCategory>,
    /// Format of the source statement.
    pub source_format: StatementFormat,
    /// Reconciliation status.
    pub status: ReconciliationStatus,
}

impl BankTransaction {
    /// Signed amount: positive for credits, negative for debits.
    pub fn signed_amount(&self) -> i64 {
        self.amount_minor * self.direction.sign()
    }

    /// Whether the bank statement alone explains this movement.
    pub fn is_bank_true(&self) -> bool {
        self.category.is_some()
    }

    /// Whether the transaction is part of a wash pair.
    pub fn is_wash(&self) -> bool {
        matches!(
            self.status,
            ReconciliationStatus::WashPending | ReconciliationStatus::WashConfirmed
        )
    }
}

// ── Invoices ─────────────────────────────────────────────────────────

/// Receivable or payable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceKind {
    /// Customer owes us; settled by a bank credit.
    Receivable,
    /// We owe a supplier; settled by a bank debit.
    Payable,
}

impl InvoiceKind {
    /// The bank direction that settles this kind of invoice.
    pub fn settling_direction(&self) -> Direction {
        match self {
            Self::Receivable => Direction::Credit,
            Self::Payable => Direction::Debit,
        }
    }

    /// The invoice kind a bank movement in `direction` settles.
    pub fn settled_by(direction: Direction) -> Self {
        match direction {
            Direction::Credit => Self::Receivable,
            Direction::Debit => Self::Payable,
        }
    }
}

/// An invoice from the upstream ledger. Read-only to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invoice {
    /// Ledger identifier.
    pub id: InvoiceId,
    /// Owning legal entity.
    pub entity_id: EntityId,
    /// Printed document number, the usual payment reference.
    pub document_number: String,
    /// Customer or supplier name.
    pub customer: String,
    /// Receivable or payable.
    pub kind: InvoiceKind,
    /// Gross amount in minor units of `currency`.
    pub amount_minor: i64,
    /// Invoice currency.
    pub currency: Currency,
    /// Amount in base-currency minor units as booked by the ledger.
    pub base_amount_minor: i64,
    /// Due date, if the ledger has one.
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    /// Customer or supplier country.
    #[serde(default)]
    pub country: String,
    /// Date the ledger recorded payment, if any.
    #[serde(default)]
    pub payment_date: Option<NaiveDate>,
    /// Payment hold flag (payables only).
    #[serde(default)]
    pub on_hold: bool,
}

impl Invoice {
    /// Base-currency share of `open_minor`, using the ledger's own booking
    /// ratio so no FX lookup is involved.
    pub fn base_share(&self, open_minor: i64) -> i64 {
        if self.amount_minor == 0 {
            return 0;
        }
        let scaled = i128::from(self.base_amount_minor) * i128::from(open_minor)
            / i128::from(self.amount_minor);
        i64::try_from(scaled).unwrap_or(if scaled > 0 { i64::MAX } else { i64::MIN })
    }
}

// ── Matching ─────────────────────────────────────────────────────────

/// Matching confidence strategy bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    /// Exact amount with reference or date correspondence.
    Deterministic,
    /// Amount within tolerance and date within window.
    Rules,
    /// Similarity heuristic; always needs approval.
    Suggested,
    /// Human-created allocation.
    Manual,
}

impl MatchTier {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deterministic => "deterministic",
            Self::Rules => "rules",
            Self::Suggested => "suggested",
            Self::Manual => "manual",
        }
    }
}

/// A proposed (transaction, invoice) pairing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    /// Bank transaction.
    pub transaction_id: TransactionId,
    /// Invoice.
    pub invoice_id: InvoiceId,
    /// Tier that produced the candidate.
    pub tier: MatchTier,
    /// Confidence in `0.0..=1.0`.
    pub confidence: f64,
    /// Human-readable reasons, most significant first.
    pub reasons: Vec<String>,
    /// Amount that approving the candidate would allocate.
    pub suggested_amount_minor: i64,
}

/// Status of an intercompany wash pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WashStatus {
    /// Detected, awaiting confirmation.
    Pending,
    /// Confirmed; excluded from cash-explained totals.
    Confirmed,
}

/// An equal-and-opposite transfer between two related entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WashPair {
    /// Pair identifier.
    pub id: WashId,
    /// The debit leg.
    pub outgoing: TransactionId,
    /// The credit leg.
    pub incoming: TransactionId,
    /// Paying entity.
    pub from_entity: EntityId,
    /// Receiving entity.
    pub to_entity: EntityId,
    /// Amount of each leg.
    pub amount_minor: i64,
    /// Currency of both legs.
    pub currency: Currency,
    /// Days between the two booking dates.
    pub day_gap: i64,
    /// Pending or confirmed.
    pub status: WashStatus,
    /// Who confirmed the pair.
    #[serde(default)]
    pub confirmed_by: Option<String>,
}

// ── Severity and gates ───────────────────────────────────────────────

/// Severity of an invariant or gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Blocks locking unless overridden.
    Critical,
    /// Data defect that needs correction.
    Error,
    /// Suspicious but not blocking.
    Warning,
    /// Informational.
    Info,
}

/// How a gate's actual value is compared with its threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    /// Pass when `actual >= threshold`.
    AtLeast,
    /// Pass when `actual <= threshold`.
    AtMost,
}

impl Comparison {
    /// Evaluate `actual` against `threshold`.
    pub fn passes(&self, actual: Decimal, threshold: Decimal) -> bool {
        match self {
            Self::AtLeast => actual >= threshold,
            Self::AtMost => actual <= threshold,
        }
    }
}

/// A lock gate evaluated against the current snapshot state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateCheck {
    /// Gate name, e.g. `cash_explained_pct` or `invariant:fx_rate_integrity`.
    pub gate: String,
    /// Comparison direction.
    pub comparison: Comparison,
    /// Threshold value.
    pub threshold: Decimal,
    /// Observed value.
    pub actual: Decimal,
    /// Whether the gate passes.
    pub passed: bool,
    /// Amount at risk while the gate fails.
    pub exposure_minor: i64,
    /// Whether a CFO override may waive this gate.
    pub overridable: bool,
    /// Exact phrase an override must include for this gate.
    pub required_acknowledgment: String,
}

impl GateCheck {
    /// Build a gate check, deriving `passed` and the acknowledgment phrase.
    pub fn evaluate(
        gate: impl Into<String>,
        comparison: Comparison,
        threshold: Decimal,
        actual: Decimal,
        exposure_minor: i64,
        overridable: bool,
    ) -> Self {
        let gate = gate.into();
        let required_acknowledgment = Self::acknowledgment_phrase(&gate);
        Self {
            passed: comparison.passes(actual, threshold),
            gate,
            comparison,
            threshold,
            actual,
            exposure_minor,
            overridable,
            required_acknowledgment,
        }
    }

    /// The override phrase for `gate`: `ACKNOWLEDGE <GATE>` in upper case.
    pub fn acknowledgment_phrase(gate: &str) -> String {
        format!("ACKNOWLEDGE {}", gate.to_uppercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip() {
        for f in [StatementFormat::Mt940, StatementFormat::Bai2, StatementFormat::Camt053] {
            assert_eq!(StatementFormat::from_name(f.as_str()), Some(f));
        }
        assert_eq!(StatementFormat::from_name("CAMT.053"), Some(StatementFormat::Camt053));
        assert_eq!(StatementFormat::from_name("ofx"), None);
    }

    #[test]
    fn invoice_kind_follows_direction() {
        assert_eq!(InvoiceKind::settled_by(Direction::Credit), InvoiceKind::Receivable);
        assert_eq!(InvoiceKind::Payable.settling_direction(), Direction::Debit);
    }

    #[test]
    fn base_share_uses_ledger_ratio() {
        let inv = Invoice {
            id: InvoiceId::new("I1"),
            entity_id: EntityId::new("E1"),
            document_number: "INV-1".into(),
            customer: "Acme".into(),
            kind: InvoiceKind::Receivable,
            amount_minor: 10_000,
            currency: Currency::new("EUR").unwrap(),
            base_amount_minor: 11_000,
            due_date: None,
            country: "DE".into(),
            payment_date: None,
            on_hold: false,
        };
        assert_eq!(inv.base_share(10_000), 11_000);
        assert_eq!(inv.base_share(5_000), 5_500);
        assert_eq!(inv.base_share(0), 0);
    }

    #[test]
    fn gate_check_derives_pass_and_phrase() {
        let g = GateCheck::evaluate(
            "cash_explained_pct",
            Comparison::AtLeast,
            Decimal::from(95),
            Decimal::new(9420, 2),
            1_000,
            true,
        );
        assert!(!g.passed);
        assert_eq!(g.required_acknowledgment, "ACKNOWLEDGE CASH_EXPLAINED_PCT");
        let g = GateCheck::evaluate("missing_fx_exposure", Comparison::AtMost, Decimal::ZERO, Decimal::ZERO, 0, true);
        assert!(g.passed);
    }

    #[test]
    fn matchable_statuses() {
        assert!(ReconciliationStatus::New.is_matchable());
        assert!(ReconciliationStatus::Exception.is_matchable());
        assert!(!ReconciliationStatus::Allocated.is_matchable());
        assert!(!ReconciliationStatus::WashPending.is_matchable());
    }
}
