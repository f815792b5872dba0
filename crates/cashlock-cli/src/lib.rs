//! # cashlock-cli: Operator CLI for the Reconciliation Engine
//!
//! Provides the `cashlock` command-line interface. Every subcommand works
//! offline against files: raw bank statements, snapshot fixtures and
//! external cash-position exports. No server or database is involved.
//!
//! ## Subcommands
//!
//! - `cashlock normalize`: Statement file to canonical JSON plus the
//!   balance verification report.
//! - `cashlock match`: Build a snapshot from a fixture, run matching and
//!   print the outcome summary.
//! - `cashlock invariants`: Run the invariant suite over a fixture.
//! - `cashlock trust-report`: Generate the trust report for a fixture.
//! - `cashlock certify`: Compare an external export against a fixture and
//!   optionally stamp and sign the result.
//!
//! ```bash
//! cashlock normalize statements/de.sta --format mt940 --entity ACME-DE
//! cashlock match fixtures/w13.yaml
//! cashlock trust-report fixtures/w13.yaml --check
//! cashlock certify fixtures/w13.yaml exports/kyriba.csv --system Kyriba
//! ```
//!
//! ## Exit codes
//!
//! `0` on success, `1` on error, `2` when a check ran but did not pass
//! (unverified statement, failing invariant, lock-ineligible snapshot,
//! certification below threshold).

pub mod certify;
pub mod fixture;
pub mod invariants;
pub mod matching;
pub mod normalize;
pub mod trust;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use cashlock_api::EngineConfig;
use cashlock_core::Timestamp;

/// Exit code for a check that ran and failed.
pub const CHECK_FAILED: u8 = 2;

/// Resolve a path that may be relative to a fixture's directory.
///
/// Absolute paths are returned as-is. Relative paths are joined onto
/// `base_dir` when that file exists, and otherwise left relative to the
/// current directory.
pub fn resolve_path(path: &Path, base_dir: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    let relative = base_dir.join(path);
    if relative.exists() {
        relative
    } else {
        path.to_path_buf()
    }
}

/// Engine configuration from a YAML file, or the defaults.
pub fn load_engine(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => EngineConfig::load(p)
            .with_context(|| format!("failed to load engine config {}", p.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Parse a `--now`/`--generated-at` value, defaulting to the current time.
pub fn parse_timestamp(raw: Option<&str>) -> Result<Timestamp> {
    match raw {
        Some(s) => Timestamp::parse_lenient(s).with_context(|| format!("invalid timestamp {s:?}")),
        None => Ok(Timestamp::now()),
    }
}

/// Write `value` as pretty JSON to `out`, or to stdout when `None`.
pub fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    match out {
        Some(path) => {
            std::fs::write(path, format!("{json}\n"))
                .with_context(|| format!("failed to write {}", path.display()))?;
            tracing::info!(path = %path.display(), "output written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_path_absolute_path_returned_as_is() {
        let result = resolve_path(Path::new("/abs/export.csv"), Path::new("/fixtures"));
        assert_eq!(result, PathBuf::from("/abs/export.csv"));
    }

    #[test]
    fn resolve_path_prefers_fixture_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("de.sta"), b":20:X\n").unwrap();
        let result = resolve_path(Path::new("de.sta"), dir.path());
        assert_eq!(result, dir.path().join("de.sta"));
    }

    #[test]
    fn resolve_path_missing_file_stays_relative() {
        let dir = tempfile::tempdir().unwrap();
        let result = resolve_path(Path::new("missing.sta"), dir.path());
        assert_eq!(result, PathBuf::from("missing.sta"));
    }

    #[test]
    fn default_engine_without_path() {
        let engine = load_engine(None).unwrap();
        assert_eq!(engine.thresholds, cashlock_trust::TrustThresholds::default());
    }

    #[test]
    fn timestamps_parse_or_default() {
        let t = parse_timestamp(Some("2026-04-01T09:00:00Z")).unwrap();
        assert_eq!(t, Timestamp::parse("2026-04-01T09:00:00Z").unwrap());
        assert!(parse_timestamp(Some("yesterday")).is_err());
        assert!(parse_timestamp(None).is_ok());
    }

    #[test]
    fn emit_writes_pretty_json_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.json");
        emit(&serde_json::json!({"ok": true}), Some(&out)).unwrap();
        let text = std::fs::read_to_string(&out).unwrap();
        assert!(text.contains("\"ok\": true"));
    }
}
