//! # Evidence References
//!
//! A tagged pointer from a check result, error or skipped record back to the
//! record that caused it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The kind of record an [`EvidenceRef`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A canonical bank transaction.
    Transaction,
    /// An upstream invoice.
    Invoice,
    /// An allocation-log event.
    Allocation,
    /// An exception-queue item.
    Exception,
    /// An imported bank statement.
    Statement,
    /// A line or element inside a statement file.
    Record,
    /// An FX rate or currency pair.
    FxRate,
    /// A bank account.
    Account,
    /// An intercompany wash pair.
    Wash,
    /// The snapshot itself.
    Snapshot,
}

impl EntityKind {
    /// Snake-case name used in serialized evidence.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transaction => "transaction",
            Self::Invoice => "invoice",
            Self::Allocation => "allocation",
            Self::Exception => "exception",
            Self::Statement => "statement",
            Self::Record => "record",
            Self::FxRate => "fx_rate",
            Self::Account => "account",
            Self::Wash => "wash",
            Self::Snapshot => "snapshot",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to the record behind a result, with optional detail fields.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// What kind of record this is.
    pub entity_kind: EntityKind,
    /// The record's identifier.
    pub entity_id: String,
    /// Free-form detail (amounts, expected vs actual, line numbers).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl EvidenceRef {
    /// Point at a record with no detail fields.
    pub fn new(entity_kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            entity_kind,
            entity_id: entity_id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Attach a detail field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.insert(key.into(), value.to_string());
        self
    }
}

impl std::fmt::Display for EvidenceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.entity_kind, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_fields_are_omitted() {
        let ev = EvidenceRef::new(EntityKind::Invoice, "INV-1");
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"entity_kind":"invoice","entity_id":"INV-1"}"#);
    }

    #[test]
    fn fields_serialize_in_key_order() {
        let ev = EvidenceRef::new(EntityKind::Record, "line:12")
            .with_field("reason", "bad amount")
            .with_field("line", 12);
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["fields"]["line"], "12");
        assert_eq!(ev.to_string(), "record:line:12");
    }
}
