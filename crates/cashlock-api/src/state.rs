//! # Application State
//!
//! Shared state for the Axum application: the snapshot store, cached trust
//! reports and invariant runs, the certification ledger, the audit chain,
//! background jobs, the signing key and the optional database pool.
//!
//! ## Concurrency
//!
//! Each snapshot sits behind its own `RwLock`. Reads proceed concurrently;
//! a commit takes the write lock for the duration of one synchronous call
//! on the aggregate, so a batch is applied entirely or not at all. Guards
//! are never held across an `.await`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use sqlx::PgPool;

use cashlock_certify::{ArtifactSigner, CertificationLedger, CertificationReport, CertifyError};
use cashlock_core::{SnapshotId, Timestamp};
use cashlock_state::{AuditEntry, AuditRecord, AuditTrail, Snapshot};
use cashlock_trust::{InvariantRun, TrustReport};

use crate::config::{AppConfig, EngineConfig};
use crate::db;
use crate::error::AppError;
use crate::jobs::{JobRegistry, RunLocks};

/// A snapshot shared between handlers and jobs.
pub type SnapshotHandle = Arc<RwLock<Snapshot>>;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Process settings.
    pub config: Arc<AppConfig>,
    /// Reconciliation rules; policies can change at runtime.
    pub engine: Arc<RwLock<EngineConfig>>,
    snapshots: Arc<RwLock<HashMap<SnapshotId, SnapshotHandle>>>,
    trust_reports: Arc<RwLock<HashMap<SnapshotId, TrustReport>>>,
    invariant_runs: Arc<RwLock<HashMap<SnapshotId, InvariantRun>>>,
    /// Append-only certification reports.
    pub certifications: Arc<RwLock<CertificationLedger>>,
    audit: Arc<Mutex<AuditTrail>>,
    /// Background jobs.
    pub jobs: JobRegistry,
    /// Per-snapshot run locks.
    pub run_locks: RunLocks,
    /// Certification artifact signer.
    pub signer: Arc<ArtifactSigner>,
    /// Database pool; in-memory only when `None`.
    pub db_pool: Option<PgPool>,
    clock: Arc<RwLock<Option<Timestamp>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("snapshots", &self.snapshots.read().len())
            .field("certifications", &self.certifications.read().len())
            .field("audit_entries", &self.audit.lock().entries().len())
            .field("signer", &self.signer)
            .field("db", &self.db_pool.is_some())
            .finish()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// In-memory state with default rules and an ephemeral signing key.
    pub fn new() -> Self {
        Self::assemble(
            AppConfig::default(),
            EngineConfig::default(),
            ArtifactSigner::ephemeral(),
            None,
        )
    }

    /// In-memory state with the given rules.
    pub fn with_engine(engine: EngineConfig) -> Self {
        Self::assemble(
            AppConfig::default(),
            engine,
            ArtifactSigner::ephemeral(),
            None,
        )
    }

    /// State for a configured process. Fails when the configured signing
    /// key is malformed.
    pub fn with_config(
        config: AppConfig,
        engine: EngineConfig,
        db_pool: Option<PgPool>,
    ) -> Result<Self, CertifyError> {
        let signer = ArtifactSigner::from_config(config.signing_key_hex.as_deref())?;
        Ok(Self::assemble(config, engine, signer, db_pool))
    }

    fn assemble(
        config: AppConfig,
        engine: EngineConfig,
        signer: ArtifactSigner,
        db_pool: Option<PgPool>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine: Arc::new(RwLock::new(engine)),
            snapshots: Arc::default(),
            trust_reports: Arc::default(),
            invariant_runs: Arc::default(),
            certifications: Arc::default(),
            audit: Arc::default(),
            jobs: JobRegistry::new(),
            run_locks: RunLocks::default(),
            signer: Arc::new(signer),
            db_pool,
            clock: Arc::default(),
        }
    }

    /// Rebuild the in-memory stores from the database.
    pub async fn hydrate(&self) -> Result<(), sqlx::Error> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let snapshots = db::snapshots::load_all(pool).await?;
        let reports = db::certifications::load_all(pool).await?;
        let trail = db::audit::load_trail(pool).await?;
        tracing::info!(
            snapshots = snapshots.len(),
            certification_reports = reports.len(),
            audit_entries = trail.entries().len(),
            "state restored from database"
        );
        {
            let mut store = self.snapshots.write();
            for s in snapshots {
                store.insert(s.id(), Arc::new(RwLock::new(s)));
            }
        }
        {
            let mut ledger = self.certifications.write();
            for r in reports {
                ledger.restore(r);
            }
        }
        *self.audit.lock() = trail;
        Ok(())
    }

    // ── Clock ────────────────────────────────────────────────────────

    /// Current time, or the frozen time when one is set.
    pub fn now(&self) -> Timestamp {
        self.clock.read().unwrap_or_else(Timestamp::now)
    }

    /// Freeze the clock at `at`. Used by tests and replays.
    pub fn freeze_clock(&self, at: Timestamp) {
        *self.clock.write() = Some(at);
    }

    // ── Snapshots ────────────────────────────────────────────────────

    /// Add a snapshot to the store.
    pub fn insert_snapshot(&self, snapshot: Snapshot) -> SnapshotHandle {
        let id = snapshot.id();
        let handle = Arc::new(RwLock::new(snapshot));
        self.snapshots.write().insert(id, handle.clone());
        handle
    }

    /// Snapshot by id.
    pub fn snapshot(&self, id: &SnapshotId) -> Result<SnapshotHandle, AppError> {
        self.snapshots
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("snapshot {id} not found")))
    }

    /// Number of snapshots held.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Latest trust report for a snapshot.
    pub fn trust_report(&self, id: &SnapshotId) -> Option<TrustReport> {
        self.trust_reports.read().get(id).cloned()
    }

    /// Cache a trust report and its invariant run.
    pub fn store_trust_report(&self, report: &TrustReport) {
        self.trust_reports
            .write()
            .insert(report.snapshot_id, report.clone());
        self.store_invariant_run(&report.invariants);
    }

    /// Latest invariant run for a snapshot.
    pub fn invariant_run(&self, id: &SnapshotId) -> Option<InvariantRun> {
        self.invariant_runs.read().get(id).cloned()
    }

    /// Cache an invariant run.
    pub fn store_invariant_run(&self, run: &InvariantRun) {
        self.invariant_runs
            .write()
            .insert(run.snapshot_id, run.clone());
    }

    // ── Audit ────────────────────────────────────────────────────────

    /// Append to the audit chain and write the entry through.
    pub async fn record_audit(
        &self,
        actor: &str,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        before: Option<Value>,
        after: Option<Value>,
    ) -> Result<AuditEntry, AppError> {
        let record = AuditRecord {
            actor: actor.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            before,
            after,
        };
        let now = self.now();
        let entry = self.audit.lock().append(record, now)?.clone();
        if let Some(pool) = &self.db_pool {
            if let Err(e) = db::audit::insert(pool, &entry).await {
                tracing::error!(sequence = entry.sequence, error = %e, "failed to persist audit entry");
                return Err(AppError::Internal(
                    "audit entry recorded in-memory but database persist failed".to_string(),
                ));
            }
        }
        Ok(entry)
    }

    /// Audit entries, optionally for one resource, with the chain check.
    pub fn audit_entries(
        &self,
        resource_id: Option<&str>,
    ) -> (Vec<AuditEntry>, cashlock_state::ChainIntegrity) {
        let trail = self.audit.lock();
        let entries = match resource_id {
            Some(r) => trail.for_resource(r).into_iter().cloned().collect(),
            None => trail.entries().to_vec(),
        };
        (entries, trail.verify())
    }

    // ── Write-through ────────────────────────────────────────────────

    /// Persist a snapshot after a successful in-memory change.
    pub async fn persist_snapshot(&self, handle: &SnapshotHandle) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        let snapshot = handle.read().clone();
        let result = async {
            db::snapshots::upsert(pool, &snapshot).await?;
            let mirrored = db::allocations::last_sequence(pool, snapshot.id()).await?;
            let fresh: Vec<_> = snapshot
                .allocations()
                .events()
                .iter()
                .filter(|e| e.sequence > mirrored)
                .cloned()
                .collect();
            db::allocations::insert_events(pool, snapshot.id(), &fresh).await
        }
        .await;
        if let Err(e) = result {
            tracing::error!(snapshot_id = %snapshot.id(), error = %e, "failed to persist snapshot");
            return Err(AppError::Internal(
                "snapshot updated in-memory but database persist failed".to_string(),
            ));
        }
        Ok(())
    }

    /// Persist a certification report.
    pub async fn persist_report(&self, report: &CertificationReport) -> Result<(), AppError> {
        let Some(pool) = &self.db_pool else {
            return Ok(());
        };
        if let Err(e) = db::certifications::upsert(pool, report).await {
            tracing::error!(report_id = %report.report_id, error = %e, "failed to persist certification report");
            return Err(AppError::Internal(
                "certification report recorded in-memory but database persist failed".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cashlock_core::Currency;
    use chrono::NaiveDate;

    fn snapshot(state: &AppState) -> Snapshot {
        Snapshot::new(
            "March close",
            NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
            Currency::new("EUR").unwrap(),
            state.now(),
        )
    }

    #[test]
    fn unknown_snapshot_is_not_found() {
        let state = AppState::new();
        let err = state.snapshot(&SnapshotId::new()).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn inserted_snapshot_is_shared() {
        let state = AppState::new();
        let handle = state.insert_snapshot(snapshot(&state));
        let id = handle.read().id();
        let again = state.snapshot(&id).unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert_eq!(state.snapshot_count(), 1);
    }

    #[test]
    fn frozen_clock() {
        let state = AppState::new();
        let at = Timestamp::parse("2026-04-01T09:00:00Z").unwrap();
        state.freeze_clock(at);
        assert_eq!(state.now(), at);
        assert_eq!(state.clone().now(), at);
    }

    #[tokio::test]
    async fn audit_chain_grows_and_verifies() {
        let state = AppState::new();
        state
            .record_audit("maria", "snapshot.create", "snapshot", "s-1", None, Some(serde_json::json!({"name": "March"})))
            .await
            .unwrap();
        state
            .record_audit("maria", "snapshot.submit", "snapshot", "s-1", None, None)
            .await
            .unwrap();
        state
            .record_audit("omar", "policy.update", "policy", "ACME-DE", None, None)
            .await
            .unwrap();
        let (all, integrity) = state.audit_entries(None);
        assert_eq!(all.len(), 3);
        assert!(integrity.chain_valid);
        let (mine, _) = state.audit_entries(Some("s-1"));
        assert_eq!(mine.len(), 2);
    }

    #[tokio::test]
    async fn floats_cannot_enter_the_audit_chain() {
        let state = AppState::new();
        let err = state
            .record_audit("maria", "x", "y", "z", None, Some(serde_json::json!({"score": 0.5})))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
    }
}
