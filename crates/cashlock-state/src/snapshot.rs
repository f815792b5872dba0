//! # Snapshot Aggregate
//!
//! A snapshot is one reconciliation period for one base currency: the bank
//! transactions imported into it, the invoice pool loaded from the ledger,
//! the FX table, the allocation log, the exception queue, wash pairs, the
//! latest run's pending suggestions and the lock history.
//!
//! ## Security Invariant
//!
//! Every mutating operation starts with [`Snapshot::ensure_mutable`]. Once
//! the snapshot reaches a locked state nothing changes, and the allocation
//! log digest sealed at lock time is kept for later verification.
//!
//! ## Design
//!
//! Batches are validated in full before anything is applied, so a batch
//! that would over-allocate any invoice or transaction leaves the snapshot
//! untouched. Transaction statuses are derived from the allocation log,
//! wash pairs, open exceptions and suggestions after every commit.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use cashlock_core::{
    AccountId, AllocationId, BankTransaction, ContentDigest, Currency, EntityKind, EvidenceRef,
    ExceptionId, FxRate, FxRateTable, GateCheck, Invoice, InvoiceId, InvoiceKind, MatchCandidate,
    MatchTier, ReconciliationStatus, SnapshotId, StatementFormat, Timestamp, TransactionId, WashId,
    WashPair, WashStatus,
};
use cashlock_ingest::{AccountBalance, NormalizedStatement, SkippedRecord, VerificationReport};

use crate::allocation::{AllocationDraft, AllocationEvent, AllocationKind, AllocationLog};
use crate::book::Book;
use crate::error::SnapshotError;
use crate::exception::{ExceptionItem, ExceptionQueue, ExceptionRefusal, ExceptionStatus};
use crate::lifecycle::{SnapshotStatus, TransitionRecord};
use crate::lock::{evaluate_lock, DecisionResult, GateDecision, LockOutcome, LockRequest};

/// Approver recorded for automatic tiers and system actions.
pub const SYSTEM_ACTOR: &str = "system";

/// An imported statement, kept for duplicate detection and continuity checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRecord {
    /// Identifier declared by the file.
    pub statement_id: String,
    /// Source format.
    pub format: StatementFormat,
    /// Digest of the raw bytes.
    pub digest: ContentDigest,
    /// Import time.
    pub imported_at: Timestamp,
    /// Transactions added by this import.
    pub transaction_count: usize,
    /// Transactions already present from an earlier import.
    pub duplicates_skipped: usize,
    /// Records the parser could not read.
    #[serde(default)]
    pub skipped_records: Vec<SkippedRecord>,
    /// Declared-vs-computed balance checks.
    pub verification: VerificationReport,
    /// Declared balances per account.
    #[serde(default)]
    pub balances: Vec<AccountBalance>,
}

/// Result of importing one statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Statement identifier.
    pub statement_id: String,
    /// Digest of the raw bytes.
    pub digest: ContentDigest,
    /// Transactions added.
    pub imported: usize,
    /// Transactions skipped because they were already present.
    pub duplicates_skipped: usize,
    /// Records the parser could not read.
    pub skipped_records: usize,
    /// Whether declared balances verify.
    pub verified: bool,
}

/// Result of loading invoices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceLoadSummary {
    /// New invoices.
    pub inserted: usize,
    /// Replaced invoices.
    pub updated: usize,
}

/// A transaction to route to the exception queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionDraft {
    /// Unexplained transaction.
    pub transaction_id: TransactionId,
    /// Why no tier cleared it.
    pub reason: String,
}

/// Everything one matching run wants to commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitBatch {
    /// Auto-approved allocations.
    pub allocations: Vec<AllocationDraft>,
    /// Transactions with no candidate.
    pub exceptions: Vec<ExceptionDraft>,
    /// Newly detected wash pairs.
    pub washes: Vec<WashPair>,
    /// Pending suggestions; replace the previous run's.
    pub suggestions: Vec<MatchCandidate>,
}

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    /// Allocations appended.
    pub allocations: Vec<AllocationId>,
    /// Exceptions opened (existing open ones are reused).
    pub exceptions_opened: usize,
    /// Exceptions resolved because their transaction became fully allocated.
    pub exceptions_resolved: usize,
    /// Wash pairs recorded.
    pub washes: usize,
    /// Suggestions now pending.
    pub suggestions: usize,
}

/// A user allocation, or the approval of a pending suggestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualAllocation {
    /// Bank transaction.
    pub transaction_id: TransactionId,
    /// Invoice.
    pub invoice_id: InvoiceId,
    /// Amount; defaults to the suggestion's amount, else the smaller of the
    /// two open amounts.
    #[serde(default)]
    pub amount_minor: Option<i64>,
    /// Approving user.
    pub actor: String,
    /// Reason.
    #[serde(default)]
    pub reason: String,
}

/// The reconciliation snapshot aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    id: SnapshotId,
    name: String,
    as_of: NaiveDate,
    created_at: Timestamp,
    status: SnapshotStatus,
    fx: FxRateTable,
    #[serde(default)]
    transactions: Book<BankTransaction>,
    #[serde(default)]
    invoices: Book<Invoice>,
    #[serde(default)]
    statements: Vec<StatementRecord>,
    #[serde(default)]
    allocations: AllocationLog,
    #[serde(default)]
    exceptions: ExceptionQueue,
    #[serde(default)]
    washes: Vec<WashPair>,
    #[serde(default)]
    suggestions: Vec<MatchCandidate>,
    #[serde(default)]
    gate_history: Vec<GateDecision>,
    #[serde(default)]
    transitions: Vec<TransitionRecord>,
    #[serde(default)]
    sealed_digest: Option<ContentDigest>,
    #[serde(default)]
    bank_as_of: Option<Timestamp>,
    #[serde(default)]
    ledger_as_of: Option<Timestamp>,
}

impl Snapshot {
    /// New draft snapshot.
    pub fn new(name: impl Into<String>, as_of: NaiveDate, base: Currency, now: Timestamp) -> Self {
        Self {
            id: SnapshotId::new(),
            name: name.into(),
            as_of,
            created_at: now,
            status: SnapshotStatus::Draft,
            fx: FxRateTable::new(base),
            transactions: Book::default(),
            invoices: Book::default(),
            statements: Vec::new(),
            allocations: AllocationLog::new(),
            exceptions: ExceptionQueue::new(),
            washes: Vec::new(),
            suggestions: Vec::new(),
            gate_history: Vec::new(),
            transitions: Vec::new(),
            sealed_digest: None,
            bank_as_of: None,
            ledger_as_of: None,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// Identifier.
    pub fn id(&self) -> SnapshotId {
        self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Period end date.
    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Creation time.
    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    /// Lifecycle state.
    pub fn status(&self) -> SnapshotStatus {
        self.status
    }

    /// Base currency.
    pub fn base_currency(&self) -> &Currency {
        self.fx.base()
    }

    /// FX table.
    pub fn fx(&self) -> &FxRateTable {
        &self.fx
    }

    /// Bank transactions.
    pub fn transactions(&self) -> &Book<BankTransaction> {
        &self.transactions
    }

    /// Invoice pool.
    pub fn invoices(&self) -> &Book<Invoice> {
        &self.invoices
    }

    /// Imported statements, oldest first.
    pub fn statements(&self) -> &[StatementRecord] {
        &self.statements
    }

    /// Allocation log.
    pub fn allocations(&self) -> &AllocationLog {
        &self.allocations
    }

    /// Exception queue.
    pub fn exceptions(&self) -> &ExceptionQueue {
        &self.exceptions
    }

    /// Wash pairs.
    pub fn washes(&self) -> &[WashPair] {
        &self.washes
    }

    /// Suggestions pending approval.
    pub fn suggestions(&self) -> &[MatchCandidate] {
        &self.suggestions
    }

    /// Every lock attempt.
    pub fn gate_history(&self) -> &[GateDecision] {
        &self.gate_history
    }

    /// Lifecycle transitions.
    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    /// Allocation log digest sealed at lock time.
    pub fn sealed_digest(&self) -> Option<&ContentDigest> {
        self.sealed_digest.as_ref()
    }

    /// End of the latest day covered by imported bank data.
    pub fn bank_as_of(&self) -> Option<Timestamp> {
        self.bank_as_of
    }

    /// When the invoice pool was last loaded.
    pub fn ledger_as_of(&self) -> Option<Timestamp> {
        self.ledger_as_of
    }

    /// Invoice amount not yet allocated.
    pub fn open_amount_invoice(&self, id: &InvoiceId) -> Option<i64> {
        let inv = self.invoices.get(id)?;
        let allocated = self.allocations.net_by_invoice().get(id).copied().unwrap_or(0);
        Some(inv.amount_minor - allocated)
    }

    /// Transaction amount not yet allocated.
    pub fn open_amount_transaction(&self, id: &TransactionId) -> Option<i64> {
        let tx = self.transactions.get(id)?;
        let allocated = self
            .allocations
            .net_by_transaction()
            .get(id)
            .copied()
            .unwrap_or(0);
        Some(tx.amount_minor - allocated)
    }

    /// Latest declared closing balance per account.
    pub fn latest_balances(&self) -> Vec<AccountBalance> {
        let mut latest: BTreeMap<AccountId, AccountBalance> = BTreeMap::new();
        for b in self.statements.iter().flat_map(|s| &s.balances) {
            if b.closing_minor.is_none() {
                continue;
            }
            let newer = latest
                .get(&b.account_id)
                .map_or(true, |cur| b.closing_date >= cur.closing_date);
            if newer {
                latest.insert(b.account_id.clone(), b.clone());
            }
        }
        latest.into_values().collect()
    }

    /// Reject mutation of a locked snapshot.
    pub fn ensure_mutable(&self) -> Result<(), SnapshotError> {
        if self.status.is_locked() {
            return Err(SnapshotError::Locked {
                snapshot_id: self.id,
                status: self.status,
            });
        }
        Ok(())
    }

    // ── Inputs ───────────────────────────────────────────────────────

    /// Add a normalized statement.
    ///
    /// Byte-identical re-imports are refused. When only some transactions
    /// are already present, the rest are imported and the overlap is
    /// reported.
    pub fn import_statement(
        &mut self,
        stmt: NormalizedStatement,
        now: Timestamp,
    ) -> Result<ImportSummary, SnapshotError> {
        self.ensure_mutable()?;
        if self.statements.iter().any(|s| s.digest == stmt.digest) {
            return Err(SnapshotError::DuplicateStatement {
                digest: stmt.digest,
            });
        }
        let total = stmt.transactions.len();
        let fresh: Vec<BankTransaction> = stmt
            .transactions
            .into_iter()
            .filter(|t| !self.transactions.contains(&t.id))
            .collect();
        let duplicates = total - fresh.len();
        if total > 0 && fresh.is_empty() {
            return Err(SnapshotError::AllDuplicates {
                statement_id: stmt.statement_id,
                count: duplicates,
            });
        }

        let latest_day = fresh
            .iter()
            .map(|t| t.booking_date)
            .chain(stmt.balances.iter().filter_map(|b| b.closing_date))
            .max();
        if let Some(day) = latest_day {
            let end = Timestamp::start_of_day(day).plus_hours(24);
            self.bank_as_of = Some(self.bank_as_of.map_or(end, |cur| cur.max(end)));
        }

        let imported = fresh.len();
        for tx in fresh {
            self.transactions.insert(tx);
        }
        let summary = ImportSummary {
            statement_id: stmt.statement_id.clone(),
            digest: stmt.digest.clone(),
            imported,
            duplicates_skipped: duplicates,
            skipped_records: stmt.skipped.len(),
            verified: stmt.verification.verified,
        };
        self.statements.push(StatementRecord {
            statement_id: stmt.statement_id,
            format: stmt.format,
            digest: stmt.digest,
            imported_at: now,
            transaction_count: imported,
            duplicates_skipped: duplicates,
            skipped_records: stmt.skipped,
            verification: stmt.verification,
            balances: stmt.balances,
        });
        tracing::info!(
            snapshot_id = %self.id,
            statement_id = %summary.statement_id,
            imported,
            duplicates_skipped = duplicates,
            "imported statement"
        );
        Ok(summary)
    }

    /// Insert or replace invoices from the ledger.
    ///
    /// An update may not lower an invoice below what is already allocated
    /// to it, nor change its currency or kind while allocations exist.
    pub fn load_invoices(
        &mut self,
        invoices: Vec<Invoice>,
        now: Timestamp,
    ) -> Result<InvoiceLoadSummary, SnapshotError> {
        self.ensure_mutable()?;
        let net = self.allocations.net_by_invoice();
        let mut reasons = Vec::new();
        let mut evidence = Vec::new();
        for inv in &invoices {
            if inv.amount_minor < 0 {
                return Err(SnapshotError::Validation(format!(
                    "invoice {} has a negative amount",
                    inv.id
                )));
            }
            let allocated = net.get(&inv.id).copied().unwrap_or(0);
            if allocated == 0 {
                continue;
            }
            let Some(existing) = self.invoices.get(&inv.id) else {
                continue;
            };
            if inv.amount_minor < allocated {
                reasons.push(format!(
                    "invoice_over_allocation: invoice {} would drop to {} below allocated {}",
                    inv.id, inv.amount_minor, allocated
                ));
                evidence.push(
                    EvidenceRef::new(EntityKind::Invoice, inv.id.as_str())
                        .with_field("allocated_minor", allocated)
                        .with_field("amount_minor", inv.amount_minor),
                );
            }
            if inv.currency != existing.currency || inv.kind != existing.kind {
                reasons.push(format!(
                    "invoice {} changes currency or kind while allocated",
                    inv.id
                ));
                evidence.push(EvidenceRef::new(EntityKind::Invoice, inv.id.as_str()));
            }
        }
        if !reasons.is_empty() {
            return Err(SnapshotError::AllocationRejected { reasons, evidence });
        }

        let mut summary = InvoiceLoadSummary {
            inserted: 0,
            updated: 0,
        };
        for inv in invoices {
            match self.invoices.upsert(inv) {
                Some(_) => summary.updated += 1,
                None => summary.inserted += 1,
            }
        }
        self.ledger_as_of = Some(now);
        tracing::info!(
            snapshot_id = %self.id,
            inserted = summary.inserted,
            updated = summary.updated,
            "loaded invoices"
        );
        Ok(summary)
    }

    /// Insert or replace an FX rate.
    pub fn upsert_fx_rate(&mut self, rate: FxRate) -> Result<Option<FxRate>, SnapshotError> {
        self.ensure_mutable()?;
        Ok(self.fx.insert(rate)?)
    }

    /// Remove the rate for `currency`.
    pub fn remove_fx_rate(&mut self, currency: &Currency) -> Result<Option<FxRate>, SnapshotError> {
        self.ensure_mutable()?;
        Ok(self.fx.remove(currency))
    }

    // ── Allocation ───────────────────────────────────────────────────

    /// Check drafts against the current log, cumulatively. Returns
    /// itemized reasons and evidence; empty means the drafts are valid.
    fn check_allocations(&self, drafts: &[AllocationDraft]) -> (Vec<String>, Vec<EvidenceRef>) {
        let mut reasons = Vec::new();
        let mut evidence = Vec::new();
        let mut by_invoice = self.allocations.net_by_invoice();
        let mut by_tx = self.allocations.net_by_transaction();

        for d in drafts {
            let tx_ref = EvidenceRef::new(EntityKind::Transaction, d.transaction_id.as_str());
            let inv_ref = EvidenceRef::new(EntityKind::Invoice, d.invoice_id.as_str());
            let Some(tx) = self.transactions.get(&d.transaction_id) else {
                reasons.push(format!("unknown transaction {}", d.transaction_id));
                evidence.push(tx_ref);
                continue;
            };
            let Some(inv) = self.invoices.get(&d.invoice_id) else {
                reasons.push(format!("unknown invoice {}", d.invoice_id));
                evidence.push(inv_ref);
                continue;
            };
            if d.amount_minor <= 0 {
                reasons.push(format!(
                    "allocation amount must be positive, got {}",
                    d.amount_minor
                ));
                evidence.push(tx_ref.with_field("amount_minor", d.amount_minor));
                continue;
            }
            if tx.currency != inv.currency {
                reasons.push(format!(
                    "currency_mismatch: transaction {} is {}, invoice {} is {}",
                    tx.id, tx.currency, inv.id, inv.currency
                ));
                evidence.push(tx_ref);
                continue;
            }
            if InvoiceKind::settled_by(tx.direction) != inv.kind {
                reasons.push(format!(
                    "direction_mismatch: a {:?} cannot settle a {:?} invoice",
                    tx.direction, inv.kind
                ));
                evidence.push(inv_ref);
                continue;
            }
            if tx.is_wash() {
                reasons.push(format!("transaction {} is part of a wash pair", tx.id));
                evidence.push(tx_ref);
                continue;
            }

            let inv_total = by_invoice.entry(inv.id.clone()).or_insert(0);
            *inv_total += d.amount_minor;
            if *inv_total > inv.amount_minor {
                reasons.push(format!(
                    "invoice_over_allocation: invoice {} amount {} would have {} allocated",
                    inv.id, inv.amount_minor, inv_total
                ));
                evidence.push(
                    inv_ref
                        .with_field("amount_minor", inv.amount_minor)
                        .with_field("allocated_minor", *inv_total),
                );
            }
            let tx_total = by_tx.entry(tx.id.clone()).or_insert(0);
            *tx_total += d.amount_minor;
            if *tx_total > tx.amount_minor {
                reasons.push(format!(
                    "transaction_over_allocation: transaction {} amount {} would have {} allocated",
                    tx.id, tx.amount_minor, tx_total
                ));
                evidence.push(
                    tx_ref
                        .with_field("amount_minor", tx.amount_minor)
                        .with_field("allocated_minor", *tx_total),
                );
            }
        }
        (reasons, evidence)
    }

    /// Commit a matching run: all or nothing.
    pub fn apply_batch(
        &mut self,
        batch: CommitBatch,
        now: Timestamp,
    ) -> Result<CommitSummary, SnapshotError> {
        self.ensure_mutable()?;
        let (mut reasons, mut evidence) = self.check_allocations(&batch.allocations);

        for e in &batch.exceptions {
            if !self.transactions.contains(&e.transaction_id) {
                reasons.push(format!("unknown transaction {}", e.transaction_id));
                evidence.push(EvidenceRef::new(
                    EntityKind::Transaction,
                    e.transaction_id.as_str(),
                ));
            }
        }

        let mut washed: HashSet<&TransactionId> = self
            .washes
            .iter()
            .flat_map(|w| [&w.outgoing, &w.incoming])
            .collect();
        let net_tx = self.allocations.net_by_transaction();
        for w in &batch.washes {
            for leg in [&w.outgoing, &w.incoming] {
                let allocated = net_tx.get(leg).copied().unwrap_or(0) > 0;
                if !self.transactions.contains(leg) || allocated || !washed.insert(leg) {
                    reasons.push(format!("wash leg {leg} is unknown, allocated or already paired"));
                    evidence.push(
                        EvidenceRef::new(EntityKind::Wash, w.id.to_string())
                            .with_field("transaction_id", leg),
                    );
                }
            }
        }
        if !reasons.is_empty() {
            tracing::warn!(snapshot_id = %self.id, rejected = reasons.len(), "commit rejected");
            return Err(SnapshotError::AllocationRejected { reasons, evidence });
        }

        let mut summary = CommitSummary::default();
        for d in batch.allocations {
            let currency = match self.transactions.get(&d.transaction_id) {
                Some(tx) => tx.currency.clone(),
                None => continue,
            };
            let ev = self.allocations.append_allocation(d, currency, now);
            summary.allocations.push(ev.id);
        }
        for e in &batch.exceptions {
            if self.exceptions.open_for_transaction(&e.transaction_id).is_some() {
                continue;
            }
            if let Some(tx) = self.transactions.get(&e.transaction_id) {
                self.exceptions
                    .open(&tx.id, tx.amount_minor, tx.currency.clone(), &e.reason, now);
                summary.exceptions_opened += 1;
            }
        }
        summary.washes = batch.washes.len();
        self.washes.extend(batch.washes);
        self.suggestions = batch
            .suggestions
            .into_iter()
            .filter(|s| {
                self.transactions.contains(&s.transaction_id)
                    && self.invoices.contains(&s.invoice_id)
            })
            .collect();
        summary.suggestions = self.suggestions.len();
        summary.exceptions_resolved = self.resolve_settled_exceptions(SYSTEM_ACTOR, now);
        self.refresh_statuses();

        tracing::info!(
            snapshot_id = %self.id,
            allocations = summary.allocations.len(),
            exceptions_opened = summary.exceptions_opened,
            washes = summary.washes,
            suggestions = summary.suggestions,
            "committed batch"
        );
        Ok(summary)
    }

    /// Allocate by hand, or approve a pending suggestion for the same pair.
    pub fn allocate(
        &mut self,
        req: ManualAllocation,
        now: Timestamp,
    ) -> Result<AllocationEvent, SnapshotError> {
        self.ensure_mutable()?;
        if req.actor.trim().is_empty() {
            return Err(SnapshotError::Validation("actor must not be empty".into()));
        }
        let suggestion = self
            .suggestions
            .iter()
            .position(|s| s.transaction_id == req.transaction_id && s.invoice_id == req.invoice_id);
        let tier = suggestion.map_or(MatchTier::Manual, |i| self.suggestions[i].tier);
        let amount = match (req.amount_minor, suggestion) {
            (Some(a), _) => a,
            (None, Some(i)) => self.suggestions[i].suggested_amount_minor,
            (None, None) => {
                let tx_open = self.open_amount_transaction(&req.transaction_id).unwrap_or(0);
                let inv_open = self.open_amount_invoice(&req.invoice_id).unwrap_or(0);
                tx_open.min(inv_open)
            }
        };
        let draft = AllocationDraft {
            transaction_id: req.transaction_id,
            invoice_id: req.invoice_id,
            amount_minor: amount,
            tier,
            approver: req.actor,
            reason: req.reason,
        };
        let (reasons, evidence) = self.check_allocations(std::slice::from_ref(&draft));
        if !reasons.is_empty() {
            return Err(SnapshotError::AllocationRejected { reasons, evidence });
        }
        let currency = self
            .transactions
            .get(&draft.transaction_id)
            .map(|t| t.currency.clone())
            .ok_or_else(|| SnapshotError::NotFound {
                kind: EntityKind::Transaction,
                id: draft.transaction_id.to_string(),
            })?;
        let approver = draft.approver.clone();
        let event = self.allocations.append_allocation(draft, currency, now).clone();
        self.suggestions.retain(|s| s.transaction_id != event.transaction_id);
        self.resolve_if_settled(&event.transaction_id, &approver, now);
        self.refresh_statuses();
        tracing::info!(
            snapshot_id = %self.id,
            allocation_id = %event.id,
            tier = event.tier.as_str(),
            amount_minor = event.amount_minor,
            "allocated"
        );
        Ok(event)
    }

    /// Append a compensating reversal for an active allocation.
    pub fn reverse_allocation(
        &mut self,
        id: &AllocationId,
        actor: &str,
        reason: &str,
        now: Timestamp,
    ) -> Result<AllocationEvent, SnapshotError> {
        self.ensure_mutable()?;
        if reason.trim().is_empty() {
            return Err(SnapshotError::Validation("a reversal needs a reason".into()));
        }
        let original = self
            .allocations
            .get(id)
            .cloned()
            .ok_or_else(|| SnapshotError::NotFound {
                kind: EntityKind::Allocation,
                id: id.to_string(),
            })?;
        if original.kind != AllocationKind::Allocate {
            return Err(SnapshotError::Validation(format!(
                "allocation {id} is itself a reversal"
            )));
        }
        if self.allocations.is_reversed(id) {
            return Err(SnapshotError::AllocationRejected {
                reasons: vec![format!("allocation {id} is already reversed")],
                evidence: vec![EvidenceRef::new(EntityKind::Allocation, id.to_string())],
            });
        }
        let event = self
            .allocations
            .append_reversal(&original, actor, reason, now)
            .clone();
        self.refresh_statuses();
        tracing::info!(snapshot_id = %self.id, reversed = %id, "reversed allocation");
        Ok(event)
    }

    // ── Washes ───────────────────────────────────────────────────────

    /// Confirm a wash pair. Confirming twice is a no-op.
    pub fn confirm_wash(
        &mut self,
        id: &WashId,
        actor: &str,
        now: Timestamp,
    ) -> Result<WashPair, SnapshotError> {
        self.ensure_mutable()?;
        let pair = self
            .washes
            .iter_mut()
            .find(|w| w.id == *id)
            .ok_or_else(|| SnapshotError::NotFound {
                kind: EntityKind::Wash,
                id: id.to_string(),
            })?;
        if pair.status == WashStatus::Pending {
            pair.status = WashStatus::Confirmed;
            pair.confirmed_by = Some(actor.to_string());
        }
        let pair = pair.clone();
        self.refresh_statuses();
        tracing::info!(snapshot_id = %self.id, wash_id = %id, at = %now, "confirmed wash");
        Ok(pair)
    }

    // ── Exceptions ───────────────────────────────────────────────────

    /// Assign an exception.
    pub fn assign_exception(
        &mut self,
        id: &ExceptionId,
        assignee: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<ExceptionItem, SnapshotError> {
        self.ensure_mutable()?;
        Ok(self.exceptions.assign(id, assignee, actor, now)?.clone())
    }

    /// Move an exception to a new status.
    pub fn transition_exception(
        &mut self,
        id: &ExceptionId,
        to: ExceptionStatus,
        actor: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<ExceptionItem, SnapshotError> {
        self.ensure_mutable()?;
        let tx = self.exceptions.transition(id, to, actor, note, now)?.transaction_id.clone();
        if to == ExceptionStatus::Resolved {
            let open = self.open_amount_transaction(&tx).unwrap_or(0);
            self.exceptions.record_resolved_open(id, open);
        }
        self.refresh_statuses();
        self.exceptions
            .get(id)
            .cloned()
            .ok_or_else(|| ExceptionRefusal::NotFound(*id).into())
    }

    /// Escalate open exceptions older than `sla_hours`.
    pub fn escalate_overdue(
        &mut self,
        now: Timestamp,
        sla_hours: i64,
    ) -> Result<Vec<ExceptionId>, SnapshotError> {
        self.ensure_mutable()?;
        let escalated = self.exceptions.escalate_overdue(now, sla_hours, SYSTEM_ACTOR);
        if !escalated.is_empty() {
            tracing::warn!(
                snapshot_id = %self.id,
                escalated = escalated.len(),
                sla_hours,
                "escalated overdue exceptions"
            );
        }
        Ok(escalated)
    }

    fn resolve_if_settled(&mut self, tx: &TransactionId, actor: &str, now: Timestamp) {
        if self.open_amount_transaction(tx) == Some(0) {
            self.exceptions
                .resolve_for_transaction(tx, "transaction fully allocated", actor, now);
        }
    }

    fn resolve_settled_exceptions(&mut self, actor: &str, now: Timestamp) -> usize {
        let settled: Vec<TransactionId> = self
            .exceptions
            .iter()
            .filter(|e| e.is_open())
            .filter(|e| self.open_amount_transaction(&e.transaction_id) == Some(0))
            .map(|e| e.transaction_id.clone())
            .collect();
        settled
            .iter()
            .filter_map(|tx| {
                self.exceptions
                    .resolve_for_transaction(tx, "transaction fully allocated", actor, now)
            })
            .count()
    }

    /// Re-derive every transaction's reconciliation status.
    fn refresh_statuses(&mut self) {
        let net = self.allocations.net_by_transaction();
        let wash: HashMap<TransactionId, WashStatus> = self
            .washes
            .iter()
            .flat_map(|w| [(w.outgoing.clone(), w.status), (w.incoming.clone(), w.status)])
            .collect();
        let open: HashSet<TransactionId> = self
            .exceptions
            .iter()
            .filter(|e| e.is_open())
            .map(|e| e.transaction_id.clone())
            .collect();
        let candidates: HashSet<TransactionId> = self
            .suggestions
            .iter()
            .map(|s| s.transaction_id.clone())
            .collect();

        for tx in self.transactions.iter_mut() {
            tx.status = if let Some(w) = wash.get(&tx.id) {
                match w {
                    WashStatus::Pending => ReconciliationStatus::WashPending,
                    WashStatus::Confirmed => ReconciliationStatus::WashConfirmed,
                }
            } else if net.get(&tx.id).copied().unwrap_or(0) > 0 {
                ReconciliationStatus::Allocated
            } else if open.contains(&tx.id) {
                ReconciliationStatus::Exception
            } else if candidates.contains(&tx.id) {
                ReconciliationStatus::Candidate
            } else {
                ReconciliationStatus::New
            };
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    fn record_transition(
        &mut self,
        to: SnapshotStatus,
        actor: &str,
        now: Timestamp,
        evidence_digest: Option<ContentDigest>,
    ) {
        self.transitions.push(TransitionRecord {
            from_state: self.status,
            to_state: to,
            timestamp: now,
            actor: actor.to_string(),
            evidence_digest,
        });
        self.status = to;
    }

    fn require_transition(&self, to: SnapshotStatus) -> Result<(), SnapshotError> {
        self.ensure_mutable()?;
        if !self.status.can_transition_to(to) {
            return Err(SnapshotError::InvalidTransition {
                from: self.status,
                to,
                reason: format!(
                    "{} can only move to {:?}",
                    self.status,
                    self.status.valid_transitions()
                ),
            });
        }
        Ok(())
    }

    /// DRAFT → READY_FOR_REVIEW.
    pub fn submit(&mut self, actor: &str, now: Timestamp) -> Result<(), SnapshotError> {
        self.require_transition(SnapshotStatus::ReadyForReview)?;
        self.record_transition(SnapshotStatus::ReadyForReview, actor, now, None);
        tracing::info!(snapshot_id = %self.id, actor, "submitted for review");
        Ok(())
    }

    /// READY_FOR_REVIEW → DRAFT.
    pub fn reopen(&mut self, actor: &str, now: Timestamp) -> Result<(), SnapshotError> {
        self.require_transition(SnapshotStatus::Draft)?;
        self.record_transition(SnapshotStatus::Draft, actor, now, None);
        tracing::info!(snapshot_id = %self.id, actor, "reopened");
        Ok(())
    }

    /// Attempt to lock against `gates`.
    ///
    /// The attempt is recorded in the gate history whether or not it
    /// succeeds. On success the allocation log digest is sealed.
    pub fn lock(
        &mut self,
        gates: &[GateCheck],
        req: &LockRequest,
        now: Timestamp,
    ) -> Result<LockOutcome, SnapshotError> {
        self.require_transition(SnapshotStatus::Locked)?;
        let decision = evaluate_lock(gates, req);
        let (result, error) = match &decision {
            Ok(LockOutcome::Locked) => (DecisionResult::Locked, None),
            Ok(LockOutcome::LockedWithOverride { .. }) => (DecisionResult::LockedWithOverride, None),
            Err(e) => (DecisionResult::Rejected, Some(e.code().to_string())),
        };
        self.gate_history.push(GateDecision {
            attempt: self.gate_history.len() as u64 + 1,
            actor: req.actor.clone(),
            role: req.role,
            timestamp: now,
            gates: gates.to_vec(),
            acknowledgments: req.override_acknowledgments.clone(),
            reason: req.reason.clone(),
            result,
            error,
        });

        let outcome = match decision {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(snapshot_id = %self.id, actor = %req.actor, code = e.code(), "lock refused");
                return Err(e.into());
            }
        };
        let digest = self.allocations.digest()?;
        let to = match outcome {
            LockOutcome::Locked => SnapshotStatus::Locked,
            LockOutcome::LockedWithOverride { .. } => SnapshotStatus::LockedWithOverride,
        };
        self.sealed_digest = Some(digest.clone());
        self.record_transition(to, &req.actor, now, Some(digest));
        tracing::info!(snapshot_id = %self.id, actor = %req.actor, status = %to, "snapshot locked");
        Ok(outcome)
    }
}
