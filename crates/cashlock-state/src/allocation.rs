//! # Allocation Log
//!
//! Insert-only event log of allocations between bank transactions and
//! invoices. Corrections are compensating `Reverse` events that reference
//! the original; nothing is ever edited or deleted. Net allocated amounts
//! are derived by folding the log.
//!
//! ## Security Invariant
//!
//! [`AllocationLog::digest`] hashes the canonical bytes of the full event
//! sequence. The digest sealed at lock time must equal the digest of the
//! log at any later point; any edit to a sealed log changes it.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use cashlock_core::{
    sha256_digest, AllocationId, CanonicalBytes, CanonicalizationError, ContentDigest, Currency,
    InvoiceId, MatchTier, Timestamp, TransactionId,
};

/// Kind of allocation event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    /// Allocate an amount of a transaction to an invoice.
    Allocate,
    /// Compensating entry cancelling an earlier `Allocate`.
    Reverse,
}

/// One entry in the allocation log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    /// Event identifier.
    pub id: AllocationId,
    /// Position in the log, starting at 1.
    pub sequence: u64,
    /// Allocate or reverse.
    pub kind: AllocationKind,
    /// For reversals, the allocation being cancelled.
    #[serde(default)]
    pub reverses: Option<AllocationId>,
    /// Bank transaction.
    pub transaction_id: TransactionId,
    /// Invoice.
    pub invoice_id: InvoiceId,
    /// Amount in minor units; always positive.
    pub amount_minor: i64,
    /// Currency shared by the transaction and the invoice.
    pub currency: Currency,
    /// Tier that produced the allocation.
    pub tier: MatchTier,
    /// Who approved it (`system` for automatic tiers).
    pub approver: String,
    /// When it was recorded.
    pub timestamp: Timestamp,
    /// Free-text reason.
    #[serde(default)]
    pub reason: String,
}

/// An allocation requested by the matching engine or a user, before it is
/// sequenced into the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationDraft {
    /// Bank transaction.
    pub transaction_id: TransactionId,
    /// Invoice.
    pub invoice_id: InvoiceId,
    /// Amount in minor units.
    pub amount_minor: i64,
    /// Producing tier.
    pub tier: MatchTier,
    /// Approver.
    pub approver: String,
    /// Reason.
    #[serde(default)]
    pub reason: String,
}

/// The append-only allocation log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocationLog {
    events: Vec<AllocationEvent>,
}

impl AllocationLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a log from persisted events.
    pub fn from_events(events: Vec<AllocationEvent>) -> Self {
        Self { events }
    }

    /// All events in order.
    pub fn events(&self) -> &[AllocationEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Look up an event.
    pub fn get(&self, id: &AllocationId) -> Option<&AllocationEvent> {
        self.events.iter().find(|e| e.id == *id)
    }

    pub(crate) fn append_allocation(
        &mut self,
        draft: AllocationDraft,
        currency: Currency,
        now: Timestamp,
    ) -> &AllocationEvent {
        let sequence = self.next_sequence();
        self.events.push(AllocationEvent {
            id: AllocationId::new(),
            sequence,
            kind: AllocationKind::Allocate,
            reverses: None,
            transaction_id: draft.transaction_id,
            invoice_id: draft.invoice_id,
            amount_minor: draft.amount_minor,
            currency,
            tier: draft.tier,
            approver: draft.approver,
            timestamp: now,
            reason: draft.reason,
        });
        &self.events[self.events.len() - 1]
    }

    pub(crate) fn append_reversal(
        &mut self,
        original: &AllocationEvent,
        actor: &str,
        reason: &str,
        now: Timestamp,
    ) -> &AllocationEvent {
        let sequence = self.next_sequence();
        self.events.push(AllocationEvent {
            id: AllocationId::new(),
            sequence,
            kind: AllocationKind::Reverse,
            reverses: Some(original.id),
            transaction_id: original.transaction_id.clone(),
            invoice_id: original.invoice_id.clone(),
            amount_minor: original.amount_minor,
            currency: original.currency.clone(),
            tier: original.tier,
            approver: actor.to_string(),
            timestamp: now,
            reason: reason.to_string(),
        });
        &self.events[self.events.len() - 1]
    }

    fn next_sequence(&self) -> u64 {
        self.events.last().map_or(1, |e| e.sequence + 1)
    }

    fn signed(e: &AllocationEvent) -> i64 {
        match e.kind {
            AllocationKind::Allocate => e.amount_minor,
            AllocationKind::Reverse => -e.amount_minor,
        }
    }

    /// Net allocated amount per invoice.
    pub fn net_by_invoice(&self) -> BTreeMap<InvoiceId, i64> {
        let mut out = BTreeMap::new();
        for e in &self.events {
            *out.entry(e.invoice_id.clone()).or_insert(0) += Self::signed(e);
        }
        out
    }

    /// Net allocated amount per transaction.
    pub fn net_by_transaction(&self) -> BTreeMap<TransactionId, i64> {
        let mut out = BTreeMap::new();
        for e in &self.events {
            *out.entry(e.transaction_id.clone()).or_insert(0) += Self::signed(e);
        }
        out
    }

    /// Ids of allocations that have been reversed.
    pub fn reversed_ids(&self) -> HashSet<AllocationId> {
        self.events.iter().filter_map(|e| e.reverses).collect()
    }

    /// Whether `id` has a compensating reversal.
    pub fn is_reversed(&self, id: &AllocationId) -> bool {
        self.events.iter().any(|e| e.reverses.as_ref() == Some(id))
    }

    /// `Allocate` events without a reversal.
    pub fn active(&self) -> Vec<&AllocationEvent> {
        let reversed = self.reversed_ids();
        self.events
            .iter()
            .filter(|e| e.kind == AllocationKind::Allocate && !reversed.contains(&e.id))
            .collect()
    }

    /// SHA-256 over the canonical bytes of the event sequence.
    pub fn digest(&self) -> Result<ContentDigest, CanonicalizationError> {
        Ok(sha256_digest(&CanonicalBytes::new(&self.events)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(tx: &str, inv: &str, amount: i64) -> AllocationDraft {
        AllocationDraft {
            transaction_id: TransactionId::new(tx),
            invoice_id: InvoiceId::new(inv),
            amount_minor: amount,
            tier: MatchTier::Deterministic,
            approver: "system".into(),
            reason: String::new(),
        }
    }

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    #[test]
    fn reversal_nets_out() {
        let mut log = AllocationLog::new();
        let now = Timestamp::now();
        let first = log.append_allocation(draft("T1", "I1", 500), eur(), now).clone();
        log.append_allocation(draft("T1", "I2", 300), eur(), now);
        log.append_reversal(&first, "alice", "wrong invoice", now);

        assert_eq!(log.len(), 3);
        assert_eq!(log.net_by_invoice()[&InvoiceId::new("I1")], 0);
        assert_eq!(log.net_by_invoice()[&InvoiceId::new("I2")], 300);
        assert_eq!(log.net_by_transaction()[&TransactionId::new("T1")], 300);
        assert!(log.is_reversed(&first.id));
        assert_eq!(log.active().len(), 1);
        assert_eq!(log.events()[2].sequence, 3);
    }

    #[test]
    fn digest_changes_on_edit() {
        let mut log = AllocationLog::new();
        log.append_allocation(draft("T1", "I1", 500), eur(), Timestamp::now());
        let sealed = log.digest().unwrap();
        assert_eq!(log.digest().unwrap(), sealed);

        let mut events = log.events().to_vec();
        events[0].amount_minor = 499;
        let tampered = AllocationLog::from_events(events);
        assert_ne!(tampered.digest().unwrap(), sealed);
    }

    #[test]
    fn serializes_as_plain_event_list() {
        let mut log = AllocationLog::new();
        log.append_allocation(draft("T1", "I1", 1), eur(), Timestamp::now());
        let v = serde_json::to_value(&log).unwrap();
        assert!(v.is_array());
        let back: AllocationLog = serde_json::from_value(v).unwrap();
        assert_eq!(back, log);
    }
}
