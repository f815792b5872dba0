//! # Background Jobs
//!
//! Long operations (matching runs, bulk imports, certification comparisons)
//! run on tokio tasks behind a pollable [`Job`] record.
//!
//! ## Concurrency
//!
//! - [`RunLocks`] allows at most one in-flight run per snapshot. The
//!   [`RunGuard`] releases the lock when dropped, including when the task
//!   panics.
//! - A repeated `Idempotency-Key` for the same kind of job on the same
//!   snapshot returns the job created by the first request.
//! - CPU-bound work (matching, invariant runs, trust reports) goes through
//!   [`blocking`] so it never occupies an async worker.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cashlock_core::{SnapshotId, Timestamp};

use crate::error::{AppError, ErrorDetail};

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Several statements imported in one request.
    BulkImport,
    /// Matching over a snapshot, committed as one batch.
    MatchingRun,
    /// External export compared against a snapshot.
    Certification,
}

impl JobKind {
    /// Snake-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BulkImport => "bulk_import",
            Self::MatchingRun => "matching_run",
            Self::Certification => "certification",
        }
    }
}

/// Job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether the job has finished, one way or the other.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// A background job as returned by `GET /v1/jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub snapshot_id: SnapshotId,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Output of a completed job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error of a failed job, shaped like an API error body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
}

/// Outcome of [`JobRegistry::submit`].
#[derive(Debug, Clone)]
pub enum Submission {
    /// A job was created.
    Created(Job),
    /// The idempotency key was seen before; this is the original job.
    Existing(Job),
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<Uuid, Job>,
    by_key: HashMap<(JobKind, SnapshotId, String), Uuid>,
}

/// All jobs of this process.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<Registry>>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.inner.read().jobs.len())
            .finish()
    }
}

impl JobRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Job by id.
    pub fn get(&self, id: &Uuid) -> Option<Job> {
        self.inner.read().jobs.get(id).cloned()
    }

    /// The job created earlier under `key`, if any.
    pub fn find_by_key(&self, kind: JobKind, snapshot: SnapshotId, key: &str) -> Option<Job> {
        let inner = self.inner.read();
        inner
            .by_key
            .get(&(kind, snapshot, key.to_string()))
            .and_then(|id| inner.jobs.get(id))
            .cloned()
    }

    /// Create a pending job, or return the one already registered under
    /// `key`.
    pub fn submit(&self, kind: JobKind, snapshot: SnapshotId, key: Option<&str>) -> Submission {
        let mut inner = self.inner.write();
        if let Some(key) = key {
            let existing = inner
                .by_key
                .get(&(kind, snapshot, key.to_string()))
                .and_then(|id| inner.jobs.get(id));
            if let Some(job) = existing {
                return Submission::Existing(job.clone());
            }
        }
        let job = Job {
            id: Uuid::new_v4(),
            kind,
            snapshot_id: snapshot,
            status: JobStatus::Pending,
            idempotency_key: key.map(str::to_string),
            created_at: Timestamp::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        };
        if let Some(key) = key {
            inner.by_key.insert((kind, snapshot, key.to_string()), job.id);
        }
        inner.jobs.insert(job.id, job.clone());
        Submission::Created(job)
    }

    fn update(&self, id: &Uuid, f: impl FnOnce(&mut Job)) {
        if let Some(job) = self.inner.write().jobs.get_mut(id) {
            f(job);
        }
    }

    /// Run `work` on a tokio task and record its outcome on job `id`.
    ///
    /// `guard` is held until the work finishes.
    pub fn spawn<Fut>(&self, id: Uuid, kind: JobKind, guard: Option<RunGuard>, work: Fut)
    where
        Fut: Future<Output = Result<serde_json::Value, AppError>> + Send + 'static,
    {
        let registry = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            registry.update(&id, |j| {
                j.status = JobStatus::Running;
                j.started_at = Some(Timestamp::now());
            });
            let started = Instant::now();
            let outcome = work.await;
            let elapsed = started.elapsed().as_secs_f64();
            let status = match outcome {
                Ok(value) => {
                    registry.update(&id, |j| {
                        j.status = JobStatus::Completed;
                        j.result = Some(value);
                        j.finished_at = Some(Timestamp::now());
                    });
                    tracing::info!(job_id = %id, kind = kind.as_str(), elapsed_s = elapsed, "job completed");
                    JobStatus::Completed
                }
                Err(e) => {
                    let detail = e.detail();
                    tracing::warn!(job_id = %id, kind = kind.as_str(), error = %e, "job failed");
                    registry.update(&id, |j| {
                        j.status = JobStatus::Failed;
                        j.error = Some(detail);
                        j.finished_at = Some(Timestamp::now());
                    });
                    JobStatus::Failed
                }
            };
            crate::middleware::metrics::record_job(kind, status, elapsed);
        });
    }
}

/// Run CPU-bound `work` on the blocking pool so request workers stay free.
pub async fn blocking<T, F>(what: &'static str, work: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::Internal(format!("{what} task failed: {e}")))
}

/// Per-snapshot run locks.
#[derive(Clone, Default)]
pub struct RunLocks {
    held: Arc<Mutex<HashMap<SnapshotId, &'static str>>>,
}

impl std::fmt::Debug for RunLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLocks")
            .field("held", &self.held.lock().len())
            .finish()
    }
}

/// Holds a snapshot's run lock until dropped.
#[derive(Debug)]
pub struct RunGuard {
    held: Arc<Mutex<HashMap<SnapshotId, &'static str>>>,
    snapshot: SnapshotId,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.held.lock().remove(&self.snapshot);
    }
}

impl RunLocks {
    /// Take the lock for `snapshot` on behalf of `holder`, or report what
    /// is already running.
    pub fn try_acquire(&self, snapshot: SnapshotId, holder: &'static str) -> Result<RunGuard, AppError> {
        let mut held = self.held.lock();
        if let Some(current) = held.get(&snapshot) {
            return Err(AppError::Conflict(format!(
                "a {current} is already in flight for snapshot {snapshot}"
            )));
        }
        held.insert(snapshot, holder);
        Ok(RunGuard {
            held: self.held.clone(),
            snapshot,
        })
    }

    /// Whether a run is in flight for `snapshot`.
    pub fn is_held(&self, snapshot: &SnapshotId) -> bool {
        self.held.lock().contains_key(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn wait_finished(registry: &JobRegistry, id: Uuid) -> Job {
        for _ in 0..200 {
            if let Some(job) = registry.get(&id) {
                if job.status.is_finished() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {id} did not finish");
    }

    #[test]
    fn idempotency_key_returns_the_first_job() {
        let registry = JobRegistry::new();
        let snapshot = SnapshotId::new();
        let Submission::Created(first) = registry.submit(JobKind::MatchingRun, snapshot, Some("k1"))
        else {
            panic!("expected a new job");
        };
        let Submission::Existing(again) = registry.submit(JobKind::MatchingRun, snapshot, Some("k1"))
        else {
            panic!("expected the existing job");
        };
        assert_eq!(again.id, first.id);
        assert!(matches!(
            registry.submit(JobKind::Certification, snapshot, Some("k1")),
            Submission::Created(_)
        ));
        assert!(matches!(
            registry.submit(JobKind::MatchingRun, snapshot, None),
            Submission::Created(_)
        ));
    }

    #[test]
    fn run_lock_is_exclusive_and_released_on_drop() {
        let locks = RunLocks::default();
        let snapshot = SnapshotId::new();
        let guard = locks.try_acquire(snapshot, "matching run").unwrap();
        assert!(locks.is_held(&snapshot));
        assert!(matches!(
            locks.try_acquire(snapshot, "invariant run"),
            Err(AppError::Conflict(_))
        ));
        assert!(locks.try_acquire(SnapshotId::new(), "matching run").is_ok());
        drop(guard);
        assert!(!locks.is_held(&snapshot));
        assert!(locks.try_acquire(snapshot, "matching run").is_ok());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn blocking_work_leaves_the_runtime_responsive() {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let work = tokio::spawn(blocking("test", move || {
            // Parks until the async side has run.
            rx.recv().is_ok()
        }));
        tokio::task::yield_now().await;
        tx.send(()).unwrap();
        assert!(work.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn spawned_jobs_record_results_and_errors() {
        let registry = JobRegistry::new();
        let locks = RunLocks::default();
        let snapshot = SnapshotId::new();

        let Submission::Created(ok) = registry.submit(JobKind::MatchingRun, snapshot, None) else {
            panic!("expected a new job");
        };
        let guard = locks.try_acquire(snapshot, "matching run").unwrap();
        registry.spawn(ok.id, ok.kind, Some(guard), async {
            Ok(serde_json::json!({"allocated": 2}))
        });
        let done = wait_finished(&registry, ok.id).await;
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.unwrap()["allocated"], 2);
        assert!(!locks.is_held(&snapshot));

        let Submission::Created(bad) = registry.submit(JobKind::BulkImport, snapshot, None) else {
            panic!("expected a new job");
        };
        registry.spawn(bad.id, bad.kind, None, async {
            Err(AppError::Conflict("statement already imported".into()))
        });
        let failed = wait_finished(&registry, bad.id).await;
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.unwrap().code, "CONFLICT");
    }
}
