//! # Route Modules
//!
//! Each module defines an Axum Router for one API surface area.
//! Routers are merged into the application in [`crate::app`].

pub mod allocations;
pub mod audit;
pub mod certifications;
pub mod exceptions;
pub mod imports;
pub mod jobs;
pub mod ledger;
pub mod lifecycle;
pub mod matching;
pub mod policies;
pub mod snapshots;
pub mod trust;
pub mod washes;

use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use cashlock_core::SnapshotId;

use crate::error::AppError;
use crate::extractors::parse_id;
use crate::jobs::{Job, JobKind, RunGuard, Submission};
use crate::state::AppState;

/// Header carrying a client-chosen key that makes job submission
/// idempotent.
pub const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// The request's idempotency key, if a non-empty one was sent.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Parse a snapshot id path segment.
pub(crate) fn snapshot_id(raw: &str) -> Result<SnapshotId, AppError> {
    parse_id("snapshot", raw, SnapshotId::from_uuid)
}

/// A job ready to be spawned, or the job an earlier request with the same
/// key created.
pub(crate) enum Admission {
    New(Job, Option<RunGuard>),
    Replay(Job),
}

/// Admit a job for `snapshot`.
///
/// A replayed key returns the original job without touching the run lock.
/// `run_lock` names the holder when the job kind needs exclusive use of
/// the snapshot.
pub(crate) fn admit(
    state: &AppState,
    kind: JobKind,
    snapshot: SnapshotId,
    key: Option<&str>,
    run_lock: Option<&'static str>,
) -> Result<Admission, AppError> {
    if let Some(key) = key {
        if let Some(job) = state.jobs.find_by_key(kind, snapshot, key) {
            return Ok(Admission::Replay(job));
        }
    }
    let guard = match run_lock {
        Some(holder) => Some(state.run_locks.try_acquire(snapshot, holder)?),
        None => None,
    };
    Ok(match state.jobs.submit(kind, snapshot, key) {
        Submission::Created(job) => Admission::New(job, guard),
        Submission::Existing(job) => Admission::Replay(job),
    })
}

/// 202 for a new job, 200 for a replay.
pub(crate) fn job_accepted(job: Job, replay: bool) -> (StatusCode, Json<Job>) {
    let status = if replay {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    (status, Json(job))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn blank_idempotency_key_is_ignored() {
        let mut headers = HeaderMap::new();
        assert_eq!(idempotency_key(&headers), None);
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static("  "));
        assert_eq!(idempotency_key(&headers), None);
        headers.insert(IDEMPOTENCY_HEADER, HeaderValue::from_static(" run-7 "));
        assert_eq!(idempotency_key(&headers).as_deref(), Some("run-7"));
    }

    #[test]
    fn replayed_key_bypasses_the_run_lock() {
        let state = AppState::new();
        let snapshot = SnapshotId::new();
        let Admission::New(first, guard) =
            admit(&state, JobKind::MatchingRun, snapshot, Some("k"), Some("matching run")).unwrap()
        else {
            panic!("expected a new job");
        };
        assert!(guard.is_some());
        let Admission::Replay(again) =
            admit(&state, JobKind::MatchingRun, snapshot, Some("k"), Some("matching run")).unwrap()
        else {
            panic!("expected a replay");
        };
        assert_eq!(again.id, first.id);
        assert!(matches!(
            admit(&state, JobKind::MatchingRun, snapshot, None, Some("matching run")),
            Err(AppError::Conflict(_))
        ));
    }
}
