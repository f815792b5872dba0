//! Shared fixtures for this crate's unit tests.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use cashlock_core::{Currency, EntityId, FxRate, RateSource, StatementFormat, Timestamp};
use cashlock_ingest::{normalize, ImportContext};
use cashlock_state::Snapshot;

use crate::export::{ExternalExport, ExternalPosition};

pub const DE_IBAN: &str = "DE89370400440532013000";
pub const DE_IBAN_PRINT: &str = "DE89 3704 0044 0532 0130 00";
pub const US_ACCOUNT: &str = "GB29NWBK60161331926819";

/// Opening 1000.00, a 250.00 customer credit and a 100.00 fee on the 31st.
pub const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

/// Same movements, but the credit is value-dated 1 April.
pub const MT940_VALUE_DATED: &str = ":20:STMT-0002\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2604010331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

/// A USD account receiving 200.00.
pub const MT940_USD: &str = ":20:STMT-US\n:25:GB29NWBK60161331926819\n:28C:1/1\n:60F:C260330USD0,00\n:61:2603310331C200,00NTRFREF-9//B1\n:86:/NAME/Globex Corp/REMI/payment\n:62F:C260331USD200,00\n";

pub fn eur() -> Currency {
    Currency::new("EUR").unwrap()
}

pub fn now() -> Timestamp {
    Timestamp::parse("2026-04-01T09:00:00Z").unwrap()
}

pub fn as_of() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 31).unwrap()
}

/// EUR-based snapshot holding one MT940 statement, with an optional
/// USD->EUR rate.
pub fn snapshot_with(text: &str, usd_rate: Option<Decimal>) -> Snapshot {
    let mut s = Snapshot::new("W13", as_of(), eur(), now());
    let ctx = ImportContext {
        entity_id: EntityId::new("ACME-DE"),
    };
    let stmt = normalize(text.as_bytes(), StatementFormat::Mt940, &ctx).unwrap();
    s.import_statement(stmt, now()).unwrap();
    if let Some(rate) = usd_rate {
        s.upsert_fx_rate(FxRate {
            from: Currency::new("USD").unwrap(),
            to: eur(),
            rate,
            source: RateSource::Market,
            pegged: false,
            as_of: as_of(),
        })
        .unwrap();
    }
    s
}

pub fn loaded() -> Snapshot {
    snapshot_with(MT940, None)
}

pub fn export(positions: Vec<ExternalPosition>) -> ExternalExport {
    ExternalExport {
        system: "Kyriba".into(),
        generated_at: Timestamp::parse("2026-03-31T18:00:00Z").unwrap(),
        positions,
    }
}
