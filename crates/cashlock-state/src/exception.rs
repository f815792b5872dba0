//! # Exception Queue
//!
//! Transactions that cleared no matching tier are routed here for manual
//! work. Each item carries a status history and ages against an SLA.
//!
//! ```text
//! NEW ──▶ ASSIGNED ──▶ IN_REVIEW ──▶ RESOLVED
//!  │         │  ▲          │
//!  └────┬────┴──┼──────────┘
//!       ▼       │
//!   ESCALATED ──┘
//! ```
//!
//! Every non-terminal state may go straight to `RESOLVED` (with a note) or
//! to `ESCALATED`. `RESOLVED` is terminal.

use serde::{Deserialize, Serialize};

use cashlock_core::{Currency, ExceptionId, Timestamp, TransactionId};

/// Default SLA before an open exception counts as a breach.
pub const DEFAULT_EXCEPTION_SLA_HOURS: i64 = 48;

/// Workflow status of an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExceptionStatus {
    /// Just opened.
    New,
    /// Owned by an analyst.
    Assigned,
    /// Being investigated.
    InReview,
    /// Closed. Terminal.
    Resolved,
    /// Escalated past the SLA or by hand.
    Escalated,
}

impl ExceptionStatus {
    /// The canonical string name of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Assigned => "ASSIGNED",
            Self::InReview => "IN_REVIEW",
            Self::Resolved => "RESOLVED",
            Self::Escalated => "ESCALATED",
        }
    }

    /// Whether this state is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [ExceptionStatus] {
        match self {
            Self::New => &[Self::Assigned, Self::Escalated, Self::Resolved],
            Self::Assigned => &[Self::InReview, Self::Escalated, Self::Resolved],
            Self::InReview => &[Self::Resolved, Self::Escalated, Self::Assigned],
            Self::Escalated => &[Self::Assigned, Self::InReview, Self::Resolved],
            Self::Resolved => &[],
        }
    }

    /// Parse a status name, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NEW" => Some(Self::New),
            "ASSIGNED" => Some(Self::Assigned),
            "IN_REVIEW" | "INREVIEW" => Some(Self::InReview),
            "RESOLVED" => Some(Self::Resolved),
            "ESCALATED" => Some(Self::Escalated),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExceptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step in an exception's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionTransition {
    /// Previous status.
    pub from: ExceptionStatus,
    /// New status.
    pub to: ExceptionStatus,
    /// Who made the change.
    pub actor: String,
    /// When.
    pub at: Timestamp,
    /// Optional note.
    #[serde(default)]
    pub note: Option<String>,
}

/// An unexplained transaction awaiting manual work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionItem {
    /// Identifier.
    pub id: ExceptionId,
    /// The unexplained transaction.
    pub transaction_id: TransactionId,
    /// Transaction amount in minor units.
    pub amount_minor: i64,
    /// Transaction currency.
    pub currency: Currency,
    /// Why it was routed here.
    pub reason: String,
    /// Current status.
    pub status: ExceptionStatus,
    /// Current owner.
    #[serde(default)]
    pub assignee: Option<String>,
    /// When it was opened.
    pub opened_at: Timestamp,
    /// Resolution note, once resolved.
    #[serde(default)]
    pub resolution_note: Option<String>,
    /// Unallocated transaction amount at resolution. A matching run leaves
    /// the transaction alone while its open amount still equals this.
    #[serde(default)]
    pub resolved_open_minor: Option<i64>,
    /// Status history, oldest first.
    #[serde(default)]
    pub history: Vec<ExceptionTransition>,
}

impl ExceptionItem {
    /// Hours since the exception was opened.
    pub fn sla_age_hours(&self, now: &Timestamp) -> i64 {
        now.hours_since(&self.opened_at).max(0)
    }

    /// Whether the exception is still open.
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Whether the exception is open past `sla_hours`.
    pub fn breaches_sla(&self, now: &Timestamp, sla_hours: i64) -> bool {
        self.is_open() && self.sla_age_hours(now) > sla_hours
    }
}

/// Why an exception operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionRefusal {
    /// No exception with that id.
    NotFound(ExceptionId),
    /// The transition is not allowed from the current status.
    Transition {
        /// Current status.
        from: ExceptionStatus,
        /// Requested status.
        to: ExceptionStatus,
    },
    /// Resolving requires a note.
    MissingNote,
    /// Assigning requires an assignee.
    MissingAssignee,
}

/// The exception queue of one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExceptionQueue {
    items: Vec<ExceptionItem>,
}

impl ExceptionQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// All exceptions, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ExceptionItem> {
        self.items.iter()
    }

    /// Number of exceptions, open or resolved.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an exception.
    pub fn get(&self, id: &ExceptionId) -> Option<&ExceptionItem> {
        self.items.iter().find(|e| e.id == *id)
    }

    /// The open exception for a transaction, if any.
    pub fn open_for_transaction(&self, tx: &TransactionId) -> Option<&ExceptionItem> {
        self.items
            .iter()
            .find(|e| e.is_open() && e.transaction_id == *tx)
    }

    /// The most recently resolved exception for a transaction, if any.
    pub fn last_resolved_for_transaction(&self, tx: &TransactionId) -> Option<&ExceptionItem> {
        self.items
            .iter()
            .rev()
            .find(|e| e.status == ExceptionStatus::Resolved && e.transaction_id == *tx)
    }

    /// Filter by status and assignee.
    pub fn filter(
        &self,
        status: Option<ExceptionStatus>,
        assignee: Option<&str>,
    ) -> Vec<&ExceptionItem> {
        self.items
            .iter()
            .filter(|e| status.map_or(true, |s| e.status == s))
            .filter(|e| assignee.map_or(true, |a| e.assignee.as_deref() == Some(a)))
            .collect()
    }

    /// Open exceptions past the SLA.
    pub fn sla_breaches(&self, now: &Timestamp, sla_hours: i64) -> Vec<&ExceptionItem> {
        self.items
            .iter()
            .filter(|e| e.breaches_sla(now, sla_hours))
            .collect()
    }

    /// Open an exception for `tx`, or return the existing open one.
    pub(crate) fn open(
        &mut self,
        tx: &TransactionId,
        amount_minor: i64,
        currency: Currency,
        reason: &str,
        now: Timestamp,
    ) -> ExceptionId {
        if let Some(existing) = self.open_for_transaction(tx) {
            return existing.id;
        }
        let id = ExceptionId::new();
        self.items.push(ExceptionItem {
            id,
            transaction_id: tx.clone(),
            amount_minor,
            currency,
            reason: reason.to_string(),
            status: ExceptionStatus::New,
            assignee: None,
            opened_at: now,
            resolution_note: None,
            resolved_open_minor: None,
            history: Vec::new(),
        });
        id
    }

    fn get_mut(&mut self, id: &ExceptionId) -> Result<&mut ExceptionItem, ExceptionRefusal> {
        self.items
            .iter_mut()
            .find(|e| e.id == *id)
            .ok_or(ExceptionRefusal::NotFound(*id))
    }

    /// Assign (or reassign) an exception.
    pub(crate) fn assign(
        &mut self,
        id: &ExceptionId,
        assignee: &str,
        actor: &str,
        now: Timestamp,
    ) -> Result<&ExceptionItem, ExceptionRefusal> {
        if assignee.trim().is_empty() {
            return Err(ExceptionRefusal::MissingAssignee);
        }
        let item = self.get_mut(id)?;
        if item.status != ExceptionStatus::Assigned {
            if !item.status.valid_transitions().contains(&ExceptionStatus::Assigned) {
                return Err(ExceptionRefusal::Transition {
                    from: item.status,
                    to: ExceptionStatus::Assigned,
                });
            }
            item.history.push(ExceptionTransition {
                from: item.status,
                to: ExceptionStatus::Assigned,
                actor: actor.to_string(),
                at: now,
                note: Some(format!("assigned to {assignee}")),
            });
            item.status = ExceptionStatus::Assigned;
        }
        item.assignee = Some(assignee.to_string());
        Ok(item)
    }

    /// Move an exception to `to`.
    pub(crate) fn transition(
        &mut self,
        id: &ExceptionId,
        to: ExceptionStatus,
        actor: &str,
        note: Option<&str>,
        now: Timestamp,
    ) -> Result<&ExceptionItem, ExceptionRefusal> {
        let item = self.get_mut(id)?;
        if !item.status.valid_transitions().contains(&to) {
            return Err(ExceptionRefusal::Transition {
                from: item.status,
                to,
            });
        }
        let note = note.map(str::trim).filter(|n| !n.is_empty());
        if to == ExceptionStatus::Resolved {
            let Some(n) = note else {
                return Err(ExceptionRefusal::MissingNote);
            };
            item.resolution_note = Some(n.to_string());
        }
        item.history.push(ExceptionTransition {
            from: item.status,
            to,
            actor: actor.to_string(),
            at: now,
            note: note.map(str::to_string),
        });
        item.status = to;
        Ok(item)
    }

    /// Escalate every open, non-escalated exception past the SLA.
    pub(crate) fn escalate_overdue(
        &mut self,
        now: Timestamp,
        sla_hours: i64,
        actor: &str,
    ) -> Vec<ExceptionId> {
        let mut escalated = Vec::new();
        for item in &mut self.items {
            if item.status == ExceptionStatus::Escalated || !item.breaches_sla(&now, sla_hours) {
                continue;
            }
            item.history.push(ExceptionTransition {
                from: item.status,
                to: ExceptionStatus::Escalated,
                actor: actor.to_string(),
                at: now,
                note: Some(format!("open for more than {sla_hours}h")),
            });
            item.status = ExceptionStatus::Escalated;
            escalated.push(item.id);
        }
        escalated
    }

    /// Resolve the open exception of a fully allocated `tx`, if any.
    pub(crate) fn resolve_for_transaction(
        &mut self,
        tx: &TransactionId,
        note: &str,
        actor: &str,
        now: Timestamp,
    ) -> Option<ExceptionId> {
        let id = self.open_for_transaction(tx)?.id;
        self.transition(&id, ExceptionStatus::Resolved, actor, Some(note), now)
            .ok()?;
        self.record_resolved_open(&id, 0);
        Some(id)
    }

    /// Remember the open amount a resolution was made against.
    pub(crate) fn record_resolved_open(&mut self, id: &ExceptionId, open_minor: i64) {
        if let Ok(item) = self.get_mut(id) {
            item.resolved_open_minor = Some(open_minor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_with_one(now: Timestamp) -> (ExceptionQueue, ExceptionId) {
        let mut q = ExceptionQueue::new();
        let id = q.open(
            &TransactionId::new("T1"),
            1_000,
            Currency::new("EUR").unwrap(),
            "no candidate",
            now,
        );
        (q, id)
    }

    #[test]
    fn open_is_idempotent_per_transaction() {
        let now = Timestamp::now();
        let (mut q, id) = queue_with_one(now);
        let again = q.open(&TransactionId::new("T1"), 1_000, Currency::new("EUR").unwrap(), "x", now);
        assert_eq!(id, again);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn full_workflow() {
        let now = Timestamp::now();
        let (mut q, id) = queue_with_one(now);
        q.assign(&id, "bob", "lead", now).unwrap();
        q.transition(&id, ExceptionStatus::InReview, "bob", None, now).unwrap();
        let done = q
            .transition(&id, ExceptionStatus::Resolved, "bob", Some("bank fee"), now)
            .unwrap();
        assert_eq!(done.status, ExceptionStatus::Resolved);
        assert_eq!(done.resolution_note.as_deref(), Some("bank fee"));
        assert_eq!(done.history.len(), 3);
        assert!(q.open_for_transaction(&TransactionId::new("T1")).is_none());
    }

    #[test]
    fn resolution_requires_note_and_is_terminal() {
        let now = Timestamp::now();
        let (mut q, id) = queue_with_one(now);
        assert_eq!(
            q.transition(&id, ExceptionStatus::Resolved, "bob", Some("  "), now).unwrap_err(),
            ExceptionRefusal::MissingNote
        );
        q.transition(&id, ExceptionStatus::Resolved, "bob", Some("ok"), now).unwrap();
        assert!(matches!(
            q.transition(&id, ExceptionStatus::InReview, "bob", None, now),
            Err(ExceptionRefusal::Transition { .. })
        ));
        assert!(q.assign(&id, "carol", "lead", now).is_err());
    }

    #[test]
    fn new_cannot_jump_to_review() {
        let now = Timestamp::now();
        let (mut q, id) = queue_with_one(now);
        assert!(q.transition(&id, ExceptionStatus::InReview, "bob", None, now).is_err());
    }

    #[test]
    fn overdue_exceptions_escalate_once() {
        let opened = Timestamp::parse("2026-03-30T00:00:00Z").unwrap();
        let (mut q, id) = queue_with_one(opened);
        let later = opened.plus_hours(49);
        assert_eq!(q.sla_breaches(&later, DEFAULT_EXCEPTION_SLA_HOURS).len(), 1);
        assert_eq!(q.escalate_overdue(later, DEFAULT_EXCEPTION_SLA_HOURS, "system"), vec![id]);
        assert!(q.escalate_overdue(later, DEFAULT_EXCEPTION_SLA_HOURS, "system").is_empty());
        assert_eq!(q.get(&id).unwrap().sla_age_hours(&later), 49);
    }

    #[test]
    fn filter_by_status_and_assignee() {
        let now = Timestamp::now();
        let (mut q, id) = queue_with_one(now);
        q.open(&TransactionId::new("T2"), 5, Currency::new("EUR").unwrap(), "x", now);
        q.assign(&id, "bob", "lead", now).unwrap();
        assert_eq!(q.filter(Some(ExceptionStatus::Assigned), None).len(), 1);
        assert_eq!(q.filter(None, Some("bob")).len(), 1);
        assert_eq!(q.filter(Some(ExceptionStatus::New), None).len(), 1);
        assert_eq!(q.filter(None, None).len(), 2);
    }

    #[test]
    fn status_names_parse() {
        assert_eq!(ExceptionStatus::parse("in_review"), Some(ExceptionStatus::InReview));
        assert_eq!(ExceptionStatus::parse("bogus"), None);
    }
}
