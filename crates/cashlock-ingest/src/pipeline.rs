//! # Normalization Pipeline
//!
//! Four stages, each invokable on its own:
//!
//! ```text
//! validate(bytes, format)  -> ValidatedInput      structural well-formedness
//! parse(&validated)        -> RawStatement        field extraction, bad records skipped
//! canonicalize(&raw, ctx)  -> Vec<BankTransaction> common schema + deterministic ids
//! verify(&raw)             -> VerificationReport  declared totals vs summed entries
//! ```
//!
//! [`normalize()`] runs all four.
//!
//! ## Security Invariant
//!
//! Transaction ids are the SHA-256 of the canonical bytes of the normalized
//! fields plus the ordinal of identical tuples within the statement. The
//! statement's own identifier and the import time are excluded, so the same
//! bytes always produce the same ids and a re-import is detectable.

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use cashlock_core::{
    raw_content_digest, sha256_hex, AccountId, BankCategory, BankTransaction, CanonicalBytes,
    ContentDigest, Currency, Direction, EntityId, EntityKind, EvidenceRef, ReconciliationStatus,
    StatementFormat, TransactionId,
};

use crate::error::IngestError;
use crate::{bai2, camt053, mt940};

// ── Stage inputs and outputs ─────────────────────────────────────────

/// Caller-supplied context for canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportContext {
    /// Entity that owns the accounts in the statement.
    pub entity_id: EntityId,
}

/// A payload that passed structural validation.
#[derive(Debug, Clone)]
pub struct ValidatedInput {
    format: StatementFormat,
    text: String,
    digest: ContentDigest,
}

impl ValidatedInput {
    /// Declared format.
    pub fn format(&self) -> StatementFormat {
        self.format
    }

    /// Decoded statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Digest of the raw bytes.
    pub fn digest(&self) -> &ContentDigest {
        &self.digest
    }
}

/// A dated balance as declared in the file. Signed minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBalance {
    /// Balance date.
    pub date: NaiveDate,
    /// Signed amount; negative means overdrawn.
    pub amount_minor: i64,
}

/// One movement extracted from the file, before canonicalization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    /// Location in the file (`line:12`, `entry:3`).
    pub record: String,
    /// Booking date.
    pub booking_date: NaiveDate,
    /// Value date.
    pub value_date: Option<NaiveDate>,
    /// Absolute amount in minor units.
    pub amount_minor: i64,
    /// Credit or debit.
    pub direction: Direction,
    /// Currency.
    pub currency: Currency,
    /// Counterparty name.
    pub counterparty: String,
    /// Payment reference.
    pub reference: String,
    /// Remittance text.
    pub description: String,
    /// Format-specific transaction type code.
    pub type_code: Option<String>,
    /// Category derived from the type code.
    pub category: Option<BankCategory>,
}

/// Totals the file declares about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredTotals {
    /// Declared number of entries.
    pub entry_count: Option<u64>,
    /// Declared sum of absolute entry amounts.
    pub entry_sum_minor: Option<i64>,
    /// BAI2 account control total.
    pub control_total_minor: Option<i64>,
    /// BAI2 declared number of records in the account block.
    pub record_count: Option<u64>,
}

/// One account section of a statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAccount {
    /// Account identifier as printed.
    pub account_id: AccountId,
    /// Account currency.
    pub currency: Currency,
    /// Opening booked balance.
    pub opening: Option<RawBalance>,
    /// Closing booked balance.
    pub closing: Option<RawBalance>,
    /// Parsed entries in file order.
    pub entries: Vec<RawEntry>,
    /// Totals the file declares.
    pub declared: DeclaredTotals,
    /// BAI2: sum of the summary amounts in the account header.
    #[serde(default)]
    pub summary_amount_minor: i64,
    /// BAI2: physical records seen in the account block.
    #[serde(default)]
    pub records_seen: u64,
}

/// A record that could not be parsed and was left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    /// Where the record is.
    pub evidence: EvidenceRef,
    /// Why it was skipped.
    pub reason: String,
}

impl SkippedRecord {
    pub(crate) fn at(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            evidence: EvidenceRef::new(EntityKind::Record, location),
            reason: reason.into(),
        }
    }
}

/// Output of the parse stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawStatement {
    /// Source format.
    pub format: StatementFormat,
    /// Statement or file identifier declared in the header.
    pub statement_id: String,
    /// Account sections in file order.
    pub accounts: Vec<RawAccount>,
    /// Records skipped during parsing.
    pub skipped: Vec<SkippedRecord>,
    /// Digest of the raw bytes.
    pub digest: ContentDigest,
}

/// Which declared total a check compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationKind {
    /// opening + credits - debits = closing.
    BalanceContinuity,
    /// Declared entry count.
    EntryCount,
    /// Declared sum of absolute entry amounts.
    EntrySum,
    /// BAI2 account control total.
    ControlTotal,
    /// BAI2 account record count.
    RecordCount,
}

/// One declared-vs-computed comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceCheck {
    /// Account the check applies to.
    pub account_id: AccountId,
    /// What was compared.
    pub kind: VerificationKind,
    /// Value the file declares.
    pub expected: i64,
    /// Value computed from parsed entries.
    pub actual: i64,
    /// Whether they agree.
    pub passed: bool,
}

/// Output of the verify stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Individual checks.
    pub checks: Vec<BalanceCheck>,
    /// True iff every check passed.
    pub verified: bool,
}

impl VerificationReport {
    /// Sum of absolute discrepancies across failing checks.
    pub fn discrepancy_minor(&self) -> i64 {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| (c.expected - c.actual).saturating_abs())
            .fold(0i64, |acc, d| acc.saturating_add(d))
    }
}

/// Declared balances of one account, kept with the imported statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account.
    pub account_id: AccountId,
    /// Account currency.
    pub currency: Currency,
    /// Opening booked balance.
    pub opening_minor: Option<i64>,
    /// Closing booked balance.
    pub closing_minor: Option<i64>,
    /// Date of the closing balance.
    pub closing_date: Option<NaiveDate>,
}

/// Result of the full pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedStatement {
    /// Statement or file identifier.
    pub statement_id: String,
    /// Source format.
    pub format: StatementFormat,
    /// Digest of the raw bytes.
    pub digest: ContentDigest,
    /// Canonical transactions in file order.
    pub transactions: Vec<BankTransaction>,
    /// Records skipped during parsing.
    pub skipped: Vec<SkippedRecord>,
    /// Declared-vs-computed checks.
    pub verification: VerificationReport,
    /// Declared balances per account.
    pub balances: Vec<AccountBalance>,
}

// ── Stages ───────────────────────────────────────────────────────────

/// Stage 1: decode and check structural well-formedness.
pub fn validate(bytes: &[u8], format: StatementFormat) -> Result<ValidatedInput, IngestError> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(IngestError::Empty);
    }
    let text = std::str::from_utf8(bytes).map_err(|e| IngestError::Encoding {
        valid_up_to: e.valid_up_to(),
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    match format {
        StatementFormat::Mt940 => mt940::validate(text)?,
        StatementFormat::Bai2 => bai2::validate(text)?,
        StatementFormat::Camt053 => camt053::validate(text)?,
    }
    Ok(ValidatedInput {
        format,
        text: text.to_string(),
        digest: raw_content_digest(bytes),
    })
}

/// Stage 2: extract fields. Malformed records are skipped with evidence.
pub fn parse(input: &ValidatedInput) -> Result<RawStatement, IngestError> {
    let parsed = match input.format {
        StatementFormat::Mt940 => mt940::parse(&input.text)?,
        StatementFormat::Bai2 => bai2::parse(&input.text)?,
        StatementFormat::Camt053 => camt053::parse(&input.text)?,
    };
    if !parsed.skipped.is_empty() {
        tracing::warn!(
            format = %input.format,
            statement_id = %parsed.statement_id,
            skipped = parsed.skipped.len(),
            "skipped malformed statement records"
        );
    }
    Ok(RawStatement {
        format: input.format,
        statement_id: parsed.statement_id,
        accounts: parsed.accounts,
        skipped: parsed.skipped,
        digest: input.digest.clone(),
    })
}

/// Fields hashed into a transaction id.
#[derive(Serialize)]
struct IdentityFields<'a> {
    entity_id: &'a str,
    account_id: &'a str,
    booking_date: String,
    value_date: Option<String>,
    amount_minor: i64,
    direction: Direction,
    currency: &'a str,
    counterparty: &'a str,
    reference: &'a str,
    description: &'a str,
    occurrence: u32,
}

/// Stage 3: map to canonical transactions with deterministic ids.
pub fn canonicalize(
    raw: &RawStatement,
    ctx: &ImportContext,
) -> Result<Vec<BankTransaction>, IngestError> {
    let mut occurrences: HashMap<Vec<u8>, u32> = HashMap::new();
    let mut out = Vec::new();
    for account in &raw.accounts {
        for entry in &account.entries {
            let counterparty = collapse_whitespace(&entry.counterparty);
            let reference = collapse_whitespace(&entry.reference);
            let description = collapse_whitespace(&entry.description);
            let mut fields = IdentityFields {
                entity_id: ctx.entity_id.as_str(),
                account_id: account.account_id.as_str(),
                booking_date: entry.booking_date.to_string(),
                value_date: entry.value_date.map(|d| d.to_string()),
                amount_minor: entry.amount_minor,
                direction: entry.direction,
                currency: entry.currency.as_str(),
                counterparty: &counterparty,
                reference: &reference,
                description: &description,
                occurrence: 0,
            };
            let tuple = CanonicalBytes::new(&fields)?;
            let seen = occurrences.entry(tuple.as_bytes().to_vec()).or_insert(0);
            fields.occurrence = *seen;
            *seen += 1;
            let id = sha256_hex(&CanonicalBytes::new(&fields)?);

            out.push(BankTransaction {
                id: TransactionId::new(id),
                entity_id: ctx.entity_id.clone(),
                account_id: account.account_id.clone(),
                statement_id: raw.statement_id.clone(),
                booking_date: entry.booking_date,
                value_date: entry.value_date,
                amount_minor: entry.amount_minor,
                direction: entry.direction,
                currency: entry.currency.clone(),
                counterparty,
                reference,
                description,
                category: entry.category,
                source_format: raw.format,
                status: ReconciliationStatus::New,
            });
        }
    }
    Ok(out)
}

/// Stage 4: cross-check declared balances and totals against parsed entries.
pub fn verify(raw: &RawStatement) -> VerificationReport {
    let mut checks = Vec::new();
    for account in &raw.accounts {
        let net: i64 = account
            .entries
            .iter()
            .map(|e| e.amount_minor * e.direction.sign())
            .sum();
        let gross: i64 = account.entries.iter().map(|e| e.amount_minor).sum();

        let mut push = |kind, expected: i64, actual: i64| {
            checks.push(BalanceCheck {
                account_id: account.account_id.clone(),
                kind,
                expected,
                actual,
                passed: expected == actual,
            });
        };

        if let (Some(open), Some(close)) = (account.opening, account.closing) {
            push(
                VerificationKind::BalanceContinuity,
                close.amount_minor,
                open.amount_minor + net,
            );
        }
        if let Some(count) = account.declared.entry_count {
            push(
                VerificationKind::EntryCount,
                i64::try_from(count).unwrap_or(i64::MAX),
                i64::try_from(account.entries.len()).unwrap_or(i64::MAX),
            );
        }
        if let Some(sum) = account.declared.entry_sum_minor {
            push(VerificationKind::EntrySum, sum, gross);
        }
        if let Some(control) = account.declared.control_total_minor {
            push(
                VerificationKind::ControlTotal,
                control,
                account.summary_amount_minor + gross,
            );
        }
        if let Some(records) = account.declared.record_count {
            push(
                VerificationKind::RecordCount,
                i64::try_from(records).unwrap_or(i64::MAX),
                i64::try_from(account.records_seen).unwrap_or(i64::MAX),
            );
        }
    }
    let verified = checks.iter().all(|c| c.passed);
    VerificationReport { checks, verified }
}

/// Run all four stages.
pub fn normalize(
    bytes: &[u8],
    format: StatementFormat,
    ctx: &ImportContext,
) -> Result<NormalizedStatement, IngestError> {
    let validated = validate(bytes, format)?;
    let raw = parse(&validated)?;
    let transactions = canonicalize(&raw, ctx)?;
    let verification = verify(&raw);
    if !verification.verified {
        tracing::warn!(
            statement_id = %raw.statement_id,
            discrepancy_minor = verification.discrepancy_minor(),
            "statement totals do not verify"
        );
    }
    let balances = raw
        .accounts
        .iter()
        .map(|a| AccountBalance {
            account_id: a.account_id.clone(),
            currency: a.currency.clone(),
            opening_minor: a.opening.map(|b| b.amount_minor),
            closing_minor: a.closing.map(|b| b.amount_minor),
            closing_date: a.closing.map(|b| b.date),
        })
        .collect();
    tracing::info!(
        format = %format,
        statement_id = %raw.statement_id,
        transactions = transactions.len(),
        skipped = raw.skipped.len(),
        "normalized statement"
    );
    Ok(NormalizedStatement {
        statement_id: raw.statement_id,
        format,
        digest: raw.digest,
        transactions,
        skipped: raw.skipped,
        verification,
        balances,
    })
}

/// Output shared by the format parsers.
pub(crate) struct ParsedFile {
    pub statement_id: String,
    pub accounts: Vec<RawAccount>,
    pub skipped: Vec<SkippedRecord>,
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a two-digit-year date (`YYMMDD`); years below 80 are 20xx.
pub(crate) fn parse_yymmdd(s: &str) -> Option<NaiveDate> {
    if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = s.get(0..2)?.parse().ok()?;
    let mm: u32 = s.get(2..4)?.parse().ok()?;
    let dd: u32 = s.get(4..6)?.parse().ok()?;
    let year = if yy < 80 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, mm, dd)
}
