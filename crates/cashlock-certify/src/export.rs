//! # External Cash-Position Exports
//!
//! A treasury management system reports one balance per account, in the
//! account currency, optionally with the rate it used and its own
//! base-currency figure. Two layouts are accepted.
//!
//! CSV, one position per row:
//!
//! ```text
//! account_id,currency,balance,as_of,fx_rate,base_balance
//! DE89 3704 0044 0532 0130 00,EUR,1150.00,2026-03-31,,
//! GB29NWBK60161331926819,USD,2000.00,2026-03-31,0.92,1840.00
//! ```
//!
//! JSON, with optional header fields overriding the caller's metadata:
//!
//! ```text
//! {"system": "Kyriba", "generated_at": "2026-03-31T18:00:00Z",
//!  "positions": [{"account_id": "...", "currency": "EUR",
//!                 "balance": "1150.00", "as_of": "2026-03-31"}]}
//! ```
//!
//! Amounts are decimal text in major units and become integer minor units
//! on the way in. Bare JSON numbers are read back through their shortest
//! decimal text; sub-cent residue is rejected rather than rounded.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_core::{parse_amount_minor, Currency, Timestamp};

use crate::error::CertifyError;

/// Supported export layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    /// Comma-separated with a header row.
    Csv,
    /// JSON document.
    Json,
}

impl ExportFormat {
    /// Resolve a format name or file extension.
    pub fn from_name(name: &str) -> Result<Self, CertifyError> {
        match name.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(CertifyError::UnsupportedFormat(other.to_string())),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Caller-supplied facts about an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportMeta {
    /// External system name.
    pub system: String,
    /// When the external system produced the export.
    pub generated_at: Timestamp,
}

/// One external account balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalPosition {
    /// Account identifier as the external system writes it.
    pub account_id: String,
    /// Account currency.
    pub currency: Currency,
    /// Balance in account-currency minor units.
    pub balance_minor: i64,
    /// Balance date.
    pub as_of: NaiveDate,
    /// Rate the external system applied into base, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fx_rate: Option<Decimal>,
    /// External base-currency balance, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_balance_minor: Option<i64>,
}

/// A parsed export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalExport {
    /// External system name.
    pub system: String,
    /// Production time.
    pub generated_at: Timestamp,
    /// Positions in file order.
    pub positions: Vec<ExternalPosition>,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    account_id: String,
    currency: String,
    balance: AmountText,
    as_of: String,
    #[serde(default)]
    fx_rate: Option<AmountText>,
    #[serde(default)]
    base_balance: Option<AmountText>,
}

/// Decimal text that JSON producers may also write as a bare number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountText {
    Text(String),
    Number(serde_json::Number),
}

impl AmountText {
    fn into_text(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Number(n) => n.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    account_id: String,
    currency: String,
    balance: String,
    as_of: String,
    #[serde(default)]
    fx_rate: Option<String>,
    #[serde(default)]
    base_balance: Option<String>,
}

impl From<CsvRow> for RawPosition {
    fn from(row: CsvRow) -> Self {
        Self {
            account_id: row.account_id,
            currency: row.currency,
            balance: AmountText::Text(row.balance),
            as_of: row.as_of,
            fx_rate: row.fx_rate.map(AmountText::Text),
            base_balance: row.base_balance.map(AmountText::Text),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    system: Option<String>,
    #[serde(default)]
    generated_at: Option<String>,
    positions: Vec<RawPosition>,
}

/// Parse an export.
///
/// # Errors
///
/// Any malformed record rejects the whole export: a certification built on
/// a partial position list would understate the external total.
pub fn parse_export(
    bytes: &[u8],
    format: ExportFormat,
    meta: &ExportMeta,
) -> Result<ExternalExport, CertifyError> {
    let (system, generated_at, raw) = match format {
        ExportFormat::Csv => (meta.system.clone(), meta.generated_at, read_csv(bytes)?),
        ExportFormat::Json => {
            let doc: RawDocument =
                serde_json::from_slice(bytes).map_err(|e| CertifyError::Parse {
                    format: "json",
                    record: 0,
                    message: e.to_string(),
                })?;
            let generated_at = match doc.generated_at.as_deref() {
                Some(ts) => Timestamp::parse_lenient(ts).map_err(|e| CertifyError::Parse {
                    format: "json",
                    record: 0,
                    message: e.to_string(),
                })?,
                None => meta.generated_at,
            };
            let system = doc
                .system
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| meta.system.clone());
            (system, generated_at, doc.positions)
        }
    };

    if raw.is_empty() {
        return Err(CertifyError::EmptyExport);
    }

    let mut seen = BTreeSet::new();
    let mut positions = Vec::with_capacity(raw.len());
    for (i, row) in raw.into_iter().enumerate() {
        let record = i + 1;
        let position = convert(row, format, record)?;
        if !seen.insert(position.account_id.clone()) {
            return Err(CertifyError::Parse {
                format: format.label(),
                record,
                message: format!("account {} appears more than once", position.account_id),
            });
        }
        positions.push(position);
    }

    tracing::info!(
        system = %system,
        format = format.label(),
        positions = positions.len(),
        "external export parsed"
    );
    Ok(ExternalExport {
        system,
        generated_at,
        positions,
    })
}

fn read_csv(bytes: &[u8]) -> Result<Vec<RawPosition>, CertifyError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for (i, rec) in rdr.deserialize::<CsvRow>().enumerate() {
        let row = rec.map_err(|e| CertifyError::Parse {
            format: "csv",
            record: i + 1,
            message: e.to_string(),
        })?;
        rows.push(row.into());
    }
    Ok(rows)
}

fn convert(
    row: RawPosition,
    format: ExportFormat,
    record: usize,
) -> Result<ExternalPosition, CertifyError> {
    let fail = |message: String| CertifyError::Parse {
        format: format.label(),
        record,
        message,
    };

    let account_id = row.account_id.trim().to_string();
    if account_id.is_empty() {
        return Err(fail("account_id is empty".into()));
    }
    let currency = Currency::new(row.currency.trim()).map_err(|e| fail(e.to_string()))?;
    let balance_minor =
        parse_amount_minor(&row.balance.into_text()).map_err(|e| fail(e.to_string()))?;
    let as_of = NaiveDate::parse_from_str(row.as_of.trim(), "%Y-%m-%d")
        .map_err(|e| fail(format!("as_of {:?}: {e}", row.as_of)))?;

    let fx_rate = match non_empty(row.fx_rate) {
        Some(text) => {
            let rate =
                Decimal::from_str(&text).map_err(|e| fail(format!("fx_rate {text:?}: {e}")))?;
            if rate <= Decimal::ZERO {
                return Err(fail(format!("fx_rate must be positive, got {rate}")));
            }
            Some(rate)
        }
        None => None,
    };
    let base_balance_minor = match non_empty(row.base_balance) {
        Some(text) => Some(parse_amount_minor(&text).map_err(|e| fail(e.to_string()))?),
        None => None,
    };

    Ok(ExternalPosition {
        account_id,
        currency,
        balance_minor,
        as_of,
        fx_rate,
        base_balance_minor,
    })
}

fn non_empty(value: Option<AmountText>) -> Option<String> {
    value
        .map(AmountText::into_text)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ExportMeta {
        ExportMeta {
            system: "Kyriba".into(),
            generated_at: Timestamp::parse("2026-03-31T18:00:00Z").unwrap(),
        }
    }

    #[test]
    fn csv_with_optional_columns() {
        let csv = "account_id,currency,balance,as_of,fx_rate,base_balance\n\
                   DE89 3704 0044 0532 0130 00,EUR,1150.00,2026-03-31,,\n\
                   GB29NWBK60161331926819,USD,2000.00,2026-03-31,0.92,1840.00\n";
        let export = parse_export(csv.as_bytes(), ExportFormat::Csv, &meta()).unwrap();
        assert_eq!(export.system, "Kyriba");
        assert_eq!(export.positions.len(), 2);
        assert_eq!(export.positions[0].balance_minor, 115_000);
        assert_eq!(export.positions[0].fx_rate, None);
        assert_eq!(export.positions[1].fx_rate, Some(Decimal::new(92, 2)));
        assert_eq!(export.positions[1].base_balance_minor, Some(184_000));
    }

    #[test]
    fn csv_without_optional_columns() {
        let csv = "account_id,currency,balance,as_of\nACC-1,EUR,-12.5,2026-03-31\n";
        let export = parse_export(csv.as_bytes(), ExportFormat::Csv, &meta()).unwrap();
        assert_eq!(export.positions[0].balance_minor, -1_250);
    }

    #[test]
    fn json_header_overrides_meta_and_numbers_are_exact() {
        let json = r#"{"system":"SAP TRM","generated_at":"2026-03-31T20:00:00+02:00",
            "positions":[{"account_id":"ACC-1","currency":"EUR","balance":1150.10,"as_of":"2026-03-31"}]}"#;
        let export = parse_export(json.as_bytes(), ExportFormat::Json, &meta()).unwrap();
        assert_eq!(export.system, "SAP TRM");
        assert_eq!(
            export.generated_at,
            Timestamp::parse("2026-03-31T18:00:00Z").unwrap()
        );
        assert_eq!(export.positions[0].balance_minor, 115_010);
    }

    #[test]
    fn malformed_rows_reject_the_export() {
        let bad_date = "account_id,currency,balance,as_of\nACC-1,EUR,1.00,31/03/2026\n";
        let err = parse_export(bad_date.as_bytes(), ExportFormat::Csv, &meta()).unwrap_err();
        assert!(matches!(err, CertifyError::Parse { record: 1, .. }));

        let dup = "account_id,currency,balance,as_of\nA,EUR,1.00,2026-03-31\nA,EUR,2.00,2026-03-31\n";
        let err = parse_export(dup.as_bytes(), ExportFormat::Csv, &meta()).unwrap_err();
        assert!(matches!(err, CertifyError::Parse { record: 2, .. }));

        let neg_rate = "account_id,currency,balance,as_of,fx_rate\nA,USD,1.00,2026-03-31,-1\n";
        assert!(parse_export(neg_rate.as_bytes(), ExportFormat::Csv, &meta()).is_err());
    }

    #[test]
    fn empty_export_is_rejected() {
        let err = parse_export(
            b"account_id,currency,balance,as_of\n",
            ExportFormat::Csv,
            &meta(),
        )
        .unwrap_err();
        assert!(matches!(err, CertifyError::EmptyExport));
        assert!(ExportFormat::from_name("xlsx").is_err());
        assert_eq!(ExportFormat::from_name("CSV").unwrap(), ExportFormat::Csv);
    }
}
