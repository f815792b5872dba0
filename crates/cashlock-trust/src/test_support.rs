//! Shared fixtures for this crate's unit tests.

use chrono::NaiveDate;

use cashlock_core::{
    Currency, Direction, EntityId, Invoice, InvoiceId, InvoiceKind, StatementFormat, Timestamp,
    TransactionId, WashId, WashPair, WashStatus,
};
use cashlock_ingest::{normalize, ImportContext, NormalizedStatement};
use cashlock_state::Snapshot;

pub const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

const MT940_DE_OUT: &str = ":20:STMT-DE\n:25:DE02100100100006820101\n:28C:1/1\n:60F:C260330EUR5000,00\n:61:2603310331D500,00NTRFIC-77//B9\n:86:/NAME/Acme France/REMI/cash pooling\n:62F:C260331EUR4500,00\n";

const MT940_FR_IN: &str = ":20:STMT-FR\n:25:FR7630006000011234567890189\n:28C:1/1\n:60F:C260330EUR0,00\n:61:2604010401C500,00NTRFIC-77//B8\n:86:/NAME/Acme GmbH/REMI/cash pooling\n:62F:C260401EUR500,00\n";

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub fn usd_ccy() -> Currency {
    Currency::new("USD").unwrap()
}

pub fn now() -> Timestamp {
    Timestamp::parse("2026-04-01T09:00:00Z").unwrap()
}

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()
}

pub fn statement(text: &str, entity: &str) -> NormalizedStatement {
    let ctx = ImportContext {
        entity_id: EntityId::new(entity),
    };
    normalize(text.as_bytes(), StatementFormat::Mt940, &ctx).unwrap()
}

pub fn invoice(id: &str, amount: i64) -> Invoice {
    Invoice {
        id: InvoiceId::new(id),
        entity_id: EntityId::new("ACME-DE"),
        document_number: id.to_string(),
        customer: "Acme GmbH".into(),
        kind: InvoiceKind::Receivable,
        amount_minor: amount,
        currency: eur(),
        base_amount_minor: amount,
        due_date: Some(as_of()),
        country: "DE".into(),
        payment_date: None,
        on_hold: false,
    }
}

pub fn empty() -> Snapshot {
    Snapshot::new("W13", as_of(), eur(), now())
}

/// One 250.00 credit naming INV-1001, one 100.00 bank fee, and INV-1001
/// loaded for 250.00.
pub fn loaded() -> (Snapshot, TransactionId) {
    let mut s = empty();
    s.import_statement(statement(MT940, "ACME-DE"), now()).unwrap();
    s.load_invoices(vec![invoice("INV-1001", 25_000)], now()).unwrap();
    let credit = s
        .transactions()
        .iter()
        .find(|t| t.direction == Direction::Credit)
        .unwrap()
        .id
        .clone();
    (s, credit)
}

/// A 500.00 transfer out of ACME-DE and into ACME-FR one day later.
pub fn wash_pair_snapshot() -> (Snapshot, (TransactionId, TransactionId)) {
    let mut s = empty();
    s.import_statement(statement(MT940_DE_OUT, "ACME-DE"), now()).unwrap();
    s.import_statement(statement(MT940_FR_IN, "ACME-FR"), now()).unwrap();
    let leg = |d: Direction| {
        s.transactions()
            .iter()
            .find(|t| t.direction == d)
            .unwrap()
            .id
            .clone()
    };
    let ids = (leg(Direction::Debit), leg(Direction::Credit));
    (s, ids)
}

pub fn wash(ids: &(TransactionId, TransactionId)) -> WashPair {
    WashPair {
        id: WashId::new(),
        outgoing: ids.0.clone(),
        incoming: ids.1.clone(),
        from_entity: EntityId::new("ACME-DE"),
        to_entity: EntityId::new("ACME-FR"),
        amount_minor: 50_000,
        currency: eur(),
        day_gap: 1,
        status: WashStatus::Pending,
        confirmed_by: None,
    }
}
