//! # Identity Newtypes
//!
//! Distinct identifier types so that a transaction id cannot be passed where
//! an invoice id is expected.
//!
//! Engine-issued identifiers ([`SnapshotId`], [`AllocationId`],
//! [`ExceptionId`], [`WashId`], [`ReportId`]) are random UUIDs. Identifiers
//! owned by upstream systems ([`EntityId`], [`AccountId`], [`InvoiceId`])
//! are opaque strings. [`TransactionId`] is content-derived: the hex SHA-256
//! of the transaction's canonical fields.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// UUID-based identifiers
// ---------------------------------------------------------------------------

/// Identifier of a reconciliation snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(Uuid);

/// Identifier of an allocation-log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationId(Uuid);

/// Identifier of an exception-queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionId(Uuid);

/// Identifier of an intercompany wash pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WashId(Uuid);

/// Identifier of a certification report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReportId(Uuid);

macro_rules! uuid_id {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Generate a new random identifier.
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }

                /// Wrap an existing UUID.
                pub fn from_uuid(id: Uuid) -> Self {
                    Self(id)
                }

                /// Access the underlying UUID.
                pub fn as_uuid(&self) -> &Uuid {
                    &self.0
                }
            }

            impl Default for $ty {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

uuid_id!(SnapshotId, AllocationId, ExceptionId, WashId, ReportId);

// ---------------------------------------------------------------------------
// String-based identifiers
// ---------------------------------------------------------------------------

/// Legal entity that owns bank accounts and invoices.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

/// Bank account identifier (IBAN or bank-local account number).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

/// Upstream ledger identifier of an invoice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceId(String);

/// Content-derived transaction identifier (64 lowercase hex chars).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

macro_rules! string_id {
    ($($ty:ident),*) => {
        $(
            impl $ty {
                /// Wrap a string identifier.
                pub fn new(id: impl Into<String>) -> Self {
                    Self(id.into())
                }

                /// The identifier as a string slice.
                pub fn as_str(&self) -> &str {
                    &self.0
                }
            }

            impl std::fmt::Display for $ty {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.write_str(&self.0)
                }
            }

            impl From<&str> for $ty {
                fn from(s: &str) -> Self {
                    Self(s.to_string())
                }
            }
        )*
    };
}

string_id!(EntityId, AccountId, InvoiceId, TransactionId);

impl AccountId {
    /// Account id with spaces removed and letters uppercased, for comparing
    /// IBANs written in print format against electronic format.
    pub fn normalized(&self) -> String {
        self.0
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }
}
