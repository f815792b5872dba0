//! # Invariants: Run the invariant suite over a fixture.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Args;

use cashlock_api::EngineConfig;
use cashlock_trust::{run_invariants, InvariantName, InvariantRun};

use crate::matching::reconcile;
use crate::{emit, fixture, CHECK_FAILED};

/// Invariants subcommand arguments.
#[derive(Args, Debug)]
pub struct InvariantsArgs {
    /// Snapshot fixture (YAML or JSON).
    pub fixture: PathBuf,

    /// Only these invariants. Repeatable; defaults to the full suite.
    #[arg(long = "only")]
    pub only: Vec<String>,

    /// Check the fixture as loaded, without a matching run first.
    #[arg(long)]
    pub no_match: bool,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

fn selection(names: &[String]) -> Result<Option<Vec<InvariantName>>> {
    if names.is_empty() {
        return Ok(None);
    }
    names
        .iter()
        .map(|n| InvariantName::parse(n.trim()).ok_or_else(|| anyhow!("unknown invariant: {n}")))
        .collect::<Result<Vec<_>>>()
        .map(Some)
}

/// Load, optionally reconcile, and check.
pub fn check_fixture(args: &InvariantsArgs, engine: &EngineConfig) -> Result<InvariantRun> {
    let wanted = selection(&args.only)?;
    let mut loaded = fixture::load(&args.fixture)?;
    if !args.no_match {
        reconcile(&mut loaded.snapshot, engine, loaded.now)?;
    }
    Ok(run_invariants(
        &loaded.snapshot,
        wanted.as_deref(),
        engine.thresholds.invariant_budget_ms,
        loaded.now,
    ))
}

/// Execute the invariants subcommand.
pub fn run_invariants_cmd(args: &InvariantsArgs, engine: &EngineConfig) -> Result<u8> {
    let run = check_fixture(args, engine)?;
    emit(&run, args.out.as_deref())?;
    if run.passed() {
        Ok(0)
    } else {
        for r in run.results.iter().filter(|r| !r.status.is_passing()) {
            eprintln!("invariant {} failed", r.name);
        }
        Ok(CHECK_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::test_support::fixture_dir;

    #[test]
    fn unknown_invariant_name_is_rejected() {
        assert!(selection(&["no_such_check".to_string()]).is_err());
        assert!(selection(&[]).unwrap().is_none());
    }

    #[test]
    fn clean_fixture_passes() {
        let (_dir, path) = fixture_dir();
        let args = InvariantsArgs {
            fixture: path,
            only: Vec::new(),
            no_match: false,
            out: None,
        };
        let run = check_fixture(&args, &EngineConfig::default()).unwrap();
        assert!(run.passed(), "{:?}", run.results);
        assert_eq!(run.results.len(), InvariantName::ALL.len());
    }

    #[test]
    fn selection_limits_the_suite() {
        let (_dir, path) = fixture_dir();
        let first = InvariantName::ALL[0];
        let args = InvariantsArgs {
            fixture: path,
            only: vec![first.as_str().to_string()],
            no_match: true,
            out: None,
        };
        let run = check_fixture(&args, &EngineConfig::default()).unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].name, first);
    }
}
