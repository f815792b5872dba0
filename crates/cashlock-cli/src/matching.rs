//! # Match: Offline matching run over a snapshot fixture.
//!
//! ```bash
//! cashlock match fixtures/w13.yaml
//! cashlock --config engine.yaml match fixtures/w13.yaml --out run.json
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use serde::Serialize;

use cashlock_api::EngineConfig;
use cashlock_core::{ExceptionId, Timestamp};
use cashlock_matching::MatchSummary;
use cashlock_state::{CommitSummary, Snapshot};

use crate::{emit, fixture};

/// Match subcommand arguments.
#[derive(Args, Debug)]
pub struct MatchArgs {
    /// Snapshot fixture (YAML or JSON).
    pub fixture: PathBuf,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// What a committed run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub summary: MatchSummary,
    pub commit: CommitSummary,
    pub escalated: Vec<ExceptionId>,
}

/// Run matching over `snapshot` and commit the batch, then escalate
/// overdue exceptions.
pub fn reconcile(snapshot: &mut Snapshot, engine: &EngineConfig, now: Timestamp) -> Result<RunReport> {
    let outcome = cashlock_matching::run(snapshot, &engine.policies, &engine.intercompany_groups)?;
    let summary = outcome.summary.clone();
    let commit = snapshot.apply_batch(outcome.into_batch(), now)?;
    let escalated = snapshot.escalate_overdue(now, engine.thresholds.exception_sla_hours)?;
    tracing::info!(
        allocations = commit.allocations.len(),
        exceptions_opened = commit.exceptions_opened,
        washes = commit.washes,
        escalated = escalated.len(),
        "matching run committed"
    );
    Ok(RunReport {
        summary,
        commit,
        escalated,
    })
}

/// Execute the match subcommand.
pub fn run_match(args: &MatchArgs, engine: &EngineConfig) -> Result<u8> {
    let mut loaded = fixture::load(&args.fixture)?;
    let report = reconcile(&mut loaded.snapshot, engine, loaded.now)?;
    emit(&report, args.out.as_deref())?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::test_support::fixture_dir;

    #[test]
    fn reconcile_allocates_and_is_idempotent() {
        let (_dir, path) = fixture_dir();
        let mut loaded = fixture::load(&path).unwrap();
        let engine = EngineConfig::default();

        let first = reconcile(&mut loaded.snapshot, &engine, loaded.now).unwrap();
        assert_eq!(first.commit.allocations.len(), 1);
        assert_eq!(first.summary.allocated_minor, 25_000);

        let second = reconcile(&mut loaded.snapshot, &engine, loaded.now).unwrap();
        assert!(second.commit.allocations.is_empty());
        assert_eq!(loaded.snapshot.allocations().len(), 1);
    }

    #[test]
    fn run_match_writes_report() {
        let (dir, path) = fixture_dir();
        let out = dir.path().join("run.json");
        let args = MatchArgs {
            fixture: path,
            out: Some(out.clone()),
        };
        assert_eq!(run_match(&args, &EngineConfig::default()).unwrap(), 0);
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out).unwrap()).unwrap();
        assert_eq!(report["commit"]["allocations"].as_array().unwrap().len(), 1);
    }
}
