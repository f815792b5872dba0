//! # Trust Report: Score a fixture and evaluate its lock gates.
//!
//! ```bash
//! cashlock trust-report fixtures/w13.yaml
//! cashlock trust-report fixtures/w13.yaml --check   # exit 2 unless lock-eligible
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use cashlock_api::EngineConfig;
use cashlock_trust::{generate, TrustReport};

use crate::matching::reconcile;
use crate::{emit, fixture, CHECK_FAILED};

/// Trust-report subcommand arguments.
#[derive(Args, Debug)]
pub struct TrustReportArgs {
    /// Snapshot fixture (YAML or JSON).
    pub fixture: PathBuf,

    /// Score the fixture as loaded, without a matching run first.
    #[arg(long)]
    pub no_match: bool,

    /// Exit with status 2 when the snapshot is not lock-eligible.
    #[arg(long)]
    pub check: bool,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Load, optionally reconcile, and report.
pub fn report_fixture(args: &TrustReportArgs, engine: &EngineConfig) -> Result<TrustReport> {
    let mut loaded = fixture::load(&args.fixture)?;
    if !args.no_match {
        reconcile(&mut loaded.snapshot, engine, loaded.now)?;
    }
    Ok(generate(&loaded.snapshot, &engine.thresholds, loaded.now))
}

/// Execute the trust-report subcommand.
pub fn run_trust_report(args: &TrustReportArgs, engine: &EngineConfig) -> Result<u8> {
    let report = report_fixture(args, engine)?;
    tracing::info!(
        trust_score = %report.trust_score,
        lock_eligible = report.lock_eligible,
        gate_failures = report.gate_failures.len(),
        "trust report generated"
    );
    emit(&report, args.out.as_deref())?;
    if args.check && !report.lock_eligible {
        for gate in &report.gate_failures {
            eprintln!(
                "gate {} failed: actual {} vs threshold {} (exposure {} minor units)",
                gate.gate, gate.actual, gate.threshold, gate.exposure_minor
            );
        }
        return Ok(CHECK_FAILED);
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::test_support::fixture_dir;

    fn args(fixture: PathBuf, no_match: bool) -> TrustReportArgs {
        TrustReportArgs {
            fixture,
            no_match,
            check: true,
            out: None,
        }
    }

    #[test]
    fn matched_fixture_is_lock_eligible() {
        let (_dir, path) = fixture_dir();
        let report = report_fixture(&args(path, false), &EngineConfig::default()).unwrap();
        assert!(report.lock_eligible, "{:?}", report.gate_failures);
        assert!(report.gate_failures.is_empty());
    }

    #[test]
    fn unmatched_fixture_fails_the_check() {
        let (_dir, path) = fixture_dir();
        let a = args(path, true);
        let report = report_fixture(&a, &EngineConfig::default()).unwrap();
        assert!(!report.lock_eligible);
        assert!(report.gate("cash_explained_pct").is_some_and(|g| !g.passed));
    }
}
