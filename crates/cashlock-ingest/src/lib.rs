//! # cashlock-ingest: Bank Statement Normalizer
//!
//! Turns raw MT940, BAI2 and camt.053 payloads into canonical
//! [`BankTransaction`](cashlock_core::BankTransaction)s through four
//! independently invokable stages (see [`pipeline`]).
//!
//! ## Guarantees
//!
//! - Deterministic: the same bytes and [`ImportContext`] always yield the
//!   same transactions, ids and skipped-record list.
//! - Lossless about loss: every record that cannot be parsed shows up in
//!   [`SkippedRecord`] with its location and the reason.
//! - A malformed header or trailer fails the whole import.

mod bai2;
mod camt053;
pub mod error;
mod mt940;
pub mod pipeline;

pub use error::IngestError;
pub use pipeline::{
    canonicalize, normalize, parse, validate, verify, AccountBalance, BalanceCheck,
    DeclaredTotals, ImportContext, NormalizedStatement, RawAccount, RawBalance, RawEntry,
    RawStatement, SkippedRecord, ValidatedInput, VerificationKind, VerificationReport,
};

use cashlock_core::StatementFormat;

/// Resolve a user-supplied format name.
pub fn format_from_name(name: &str) -> Result<StatementFormat, IngestError> {
    StatementFormat::from_name(name).ok_or_else(|| IngestError::UnsupportedFormat(name.to_string()))
}
