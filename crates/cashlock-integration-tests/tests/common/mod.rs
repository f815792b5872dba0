//! Builders shared by the integration test files.
//!
//! Statements are generated as MT940 text and pushed through the real
//! ingest pipeline, so every test exercises the same path as production.

#![allow(dead_code)]

use chrono::NaiveDate;

use cashlock_core::{
    Currency, EntityId, Invoice, InvoiceId, InvoiceKind, StatementFormat, Timestamp,
};
use cashlock_ingest::{normalize, ImportContext, NormalizedStatement};
use cashlock_matching::{run, IntercompanyGroups, MatchSummary, PolicyBook};
use cashlock_state::Snapshot;

pub const ENTITY: &str = "ACME-DE";
pub const IBAN: &str = "DE89370400440532013000";

/// Opening 1000.00, a 250.00 customer credit naming INV-1001 and a 100.00
/// bank fee, closing 1150.00.
pub const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub fn usd() -> Currency {
    Currency::new("USD").unwrap()
}

pub fn now() -> Timestamp {
    Timestamp::parse("2026-04-01T09:00:00Z").unwrap()
}

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()
}

pub fn ctx(entity: &str) -> ImportContext {
    ImportContext {
        entity_id: EntityId::new(entity),
    }
}

/// Fixed-width document number, so no number is a substring of another.
pub fn doc(i: usize) -> String {
    format!("INV-{i:06}")
}

/// One statement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub amount_minor: i64,
    pub credit: bool,
    /// `:61:` customer reference; empty becomes `NONREF`.
    pub reference: String,
    pub name: String,
    pub remittance: String,
}

impl Line {
    pub fn credit(amount_minor: i64, reference: &str, name: &str) -> Self {
        Self {
            amount_minor,
            credit: true,
            reference: reference.to_string(),
            name: name.to_string(),
            remittance: "payment".to_string(),
        }
    }
}

fn mt940_amount(minor: i64) -> String {
    format!("{},{:02}", minor / 100, minor % 100)
}

/// Render an EUR MT940 statement opening at zero. The closing balance is
/// computed, so the statement always verifies.
pub fn mt940(statement_id: &str, account: &str, lines: &[Line]) -> String {
    let mut out = format!(":20:{statement_id}\n:25:{account}\n:28C:1/1\n:60F:C260330EUR0,00\n");
    let mut balance = 0i64;
    for (n, l) in lines.iter().enumerate() {
        let mark = if l.credit { 'C' } else { 'D' };
        balance += if l.credit { l.amount_minor } else { -l.amount_minor };
        let reference = if l.reference.is_empty() {
            "NONREF"
        } else {
            l.reference.as_str()
        };
        out.push_str(&format!(
            ":61:2603310331{mark}{}NTRF{reference}//B{n}\n:86:/NAME/{}/REMI/{}\n",
            mt940_amount(l.amount_minor),
            l.name,
            l.remittance
        ));
    }
    let mark = if balance >= 0 { 'C' } else { 'D' };
    out.push_str(&format!(
        ":62F:{mark}260331EUR{}\n",
        mt940_amount(balance.abs())
    ));
    out
}

pub fn statement(text: &str) -> NormalizedStatement {
    normalize(text.as_bytes(), StatementFormat::Mt940, &ctx(ENTITY)).unwrap()
}

pub fn invoice(id: &str, amount_minor: i64, customer: &str) -> Invoice {
    Invoice {
        id: InvoiceId::new(id),
        entity_id: EntityId::new(ENTITY),
        document_number: id.to_string(),
        customer: customer.to_string(),
        kind: InvoiceKind::Receivable,
        amount_minor,
        currency: eur(),
        base_amount_minor: amount_minor,
        due_date: Some(as_of()),
        country: "DE".into(),
        payment_date: None,
        on_hold: false,
    }
}

pub fn empty_snapshot() -> Snapshot {
    Snapshot::new("W13", as_of(), eur(), now())
}

/// A snapshot holding `text` and `invoices`.
pub fn snapshot(text: &str, invoices: Vec<Invoice>) -> Snapshot {
    let mut s = empty_snapshot();
    s.import_statement(statement(text), now()).unwrap();
    if !invoices.is_empty() {
        s.load_invoices(invoices, now()).unwrap();
    }
    s
}

/// Run matching with default policies and commit the result.
pub fn reconcile(s: &mut Snapshot) -> MatchSummary {
    let outcome = run(s, &PolicyBook::default(), &IntercompanyGroups::default()).unwrap();
    let summary = outcome.summary.clone();
    s.apply_batch(outcome.into_batch(), now()).unwrap();
    summary
}

/// Active allocations as sorted `(transaction, invoice, amount)` triples.
pub fn allocation_set(s: &Snapshot) -> Vec<(String, String, i64)> {
    let mut out: Vec<(String, String, i64)> = s
        .allocations()
        .active()
        .into_iter()
        .map(|e| {
            (
                e.transaction_id.as_str().to_string(),
                e.invoice_id.as_str().to_string(),
                e.amount_minor,
            )
        })
        .collect();
    out.sort();
    out
}
