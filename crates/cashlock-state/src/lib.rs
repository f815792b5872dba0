//! # cashlock-state: Snapshot Aggregate
//!
//! Owns everything that changes during a reconciliation period and enforces
//! the rules around it:
//!
//! - [`snapshot::Snapshot`]: the aggregate. Imports, invoice loads, batch
//!   commits, manual allocation, reversals, washes, lifecycle.
//! - [`allocation::AllocationLog`]: insert-only allocation events.
//! - [`exception::ExceptionQueue`]: manual work queue with SLA aging.
//! - [`lock`]: the lock gate decision, including the CFO override.
//! - [`audit::AuditTrail`]: hash-chained record of state-changing calls.
//!
//! ## Security Invariant
//!
//! For every invoice and every transaction, the net allocated amount never
//! exceeds its amount. The check runs before anything is appended, over the
//! whole batch at once.

pub mod allocation;
pub mod audit;
pub mod book;
pub mod error;
pub mod exception;
pub mod lifecycle;
pub mod lock;
pub mod snapshot;

pub use allocation::{AllocationDraft, AllocationEvent, AllocationKind, AllocationLog};
pub use audit::{AuditEntry, AuditRecord, AuditTrail, ChainIntegrity, GENESIS_HASH};
pub use book::{Book, Keyed};
pub use error::SnapshotError;
pub use exception::{
    ExceptionItem, ExceptionQueue, ExceptionStatus, ExceptionTransition,
    DEFAULT_EXCEPTION_SLA_HOURS,
};
pub use lifecycle::{SnapshotStatus, TransitionRecord};
pub use lock::{
    evaluate_lock, DecisionResult, GateDecision, LockError, LockOutcome, LockRequest, Role,
};
pub use snapshot::{
    CommitBatch, CommitSummary, ExceptionDraft, ImportSummary, InvoiceLoadSummary,
    ManualAllocation, Snapshot, StatementRecord, SYSTEM_ACTOR,
};
