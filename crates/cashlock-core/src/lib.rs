//! # cashlock-core: Foundational Types for the Reconciliation Engine
//!
//! Every other crate in the workspace depends on `cashlock-core`; it depends
//! on nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Integer money.** Amounts are `i64` minor units. Floats never appear
//!    in amounts, allocation logs, or anything that feeds a digest.
//!
//! 2. **`CanonicalBytes` newtype.** All digest computation flows through
//!    `CanonicalBytes::new()`. Transaction IDs, allocation-log seals and
//!    certification artifacts are all hashed over canonical bytes.
//!
//! 3. **No silent FX.** [`FxRateTable::convert_to_base`] returns an error for
//!    a missing rate. There is no code path that substitutes `1.0`.
//!
//! 4. **Typed evidence.** Errors and check results point at the offending
//!    records through [`EvidenceRef`], never through untyped maps.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `cashlock-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod canonical;
pub mod digest;
pub mod error;
pub mod evidence;
pub mod fx;
pub mod identity;
pub mod model;
pub mod money;
pub mod temporal;

pub use canonical::CanonicalBytes;
pub use digest::{raw_content_digest, sha256_digest, sha256_hex, ContentDigest, DigestAlgorithm};
pub use error::{CanonicalizationError, CashlockError, FxError};
pub use evidence::{EntityKind, EvidenceRef};
pub use fx::{FxRate, FxRateTable, RateSource};
pub use identity::{
    AccountId, AllocationId, EntityId, ExceptionId, InvoiceId, ReportId, SnapshotId,
    TransactionId, WashId,
};
pub use model::{
    BankCategory, BankTransaction, Comparison, Direction, GateCheck, Invoice, InvoiceKind,
    MatchCandidate, MatchTier, ReconciliationStatus, Severity, StatementFormat, WashPair,
    WashStatus,
};
pub use money::{format_minor, parse_amount_minor, Currency};
pub use temporal::Timestamp;
