//! # Certify: Compare an external cash-position export against a fixture.
//!
//! ```bash
//! cashlock certify fixtures/w13.yaml exports/kyriba.csv --system Kyriba
//! cashlock certify fixtures/w13.yaml exports/kyriba.csv \
//!     --certifier cfo@acme.example --artifact w13.signed.json
//! ```
//!
//! The signing key is read from `CERTIFICATION_SIGNING_KEY_HEX` when
//! `--key-hex` is not given; without either an ephemeral key is used and
//! its public half is printed with the artifact.
//!
//! The fixture snapshot is submitted for review after matching; a draft is
//! never certified.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use cashlock_api::EngineConfig;
use cashlock_certify::{
    compare, export_artifact, parse_export, ArtifactSigner, CertificationLedger,
    CertificationReport, CertifyError, ExportFormat, ExportMeta,
};

use crate::matching::reconcile;
use crate::{emit, fixture, parse_timestamp, CHECK_FAILED};

/// Certify subcommand arguments.
#[derive(Args, Debug)]
pub struct CertifyArgs {
    /// Snapshot fixture (YAML or JSON).
    pub fixture: PathBuf,

    /// External export file.
    pub export: PathBuf,

    /// `csv` or `json`. Guessed from the extension when omitted.
    #[arg(long)]
    pub format: Option<String>,

    /// External system name, for CSV exports.
    #[arg(long, default_value = "external")]
    pub system: String,

    /// When the export was produced (RFC 3339). Defaults to the fixture's
    /// clock.
    #[arg(long)]
    pub generated_at: Option<String>,

    /// Compare the fixture as loaded, without a matching run first.
    #[arg(long)]
    pub no_match: bool,

    /// Stamp the report as certified by this person.
    #[arg(long)]
    pub certifier: Option<String>,

    /// Write a signed artifact of the report here.
    #[arg(long)]
    pub artifact: Option<PathBuf>,

    /// Ed25519 signing seed, 64 hex characters.
    #[arg(long)]
    pub key_hex: Option<String>,

    /// Write the report JSON here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

fn export_format(args: &CertifyArgs) -> Result<ExportFormat> {
    if let Some(name) = &args.format {
        return Ok(ExportFormat::from_name(name)?);
    }
    let ext = args
        .export
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    ExportFormat::from_name(ext).with_context(|| {
        format!(
            "cannot tell the format of {}; pass --format",
            args.export.display()
        )
    })
}

/// Build the fixture, compare the export, and stamp when asked.
pub fn certify_fixture(args: &CertifyArgs, engine: &EngineConfig) -> Result<CertificationReport> {
    let format = export_format(args)?;
    let mut loaded = fixture::load(&args.fixture)?;
    if !args.no_match {
        reconcile(&mut loaded.snapshot, engine, loaded.now)?;
    }
    loaded.snapshot.submit("cashlock-cli", loaded.now)?;
    let bytes = std::fs::read(&args.export)
        .with_context(|| format!("failed to read export {}", args.export.display()))?;
    let generated_at = match &args.generated_at {
        Some(raw) => parse_timestamp(Some(raw))?,
        None => loaded.now,
    };
    let meta = ExportMeta {
        system: args.system.clone(),
        generated_at,
    };
    let export = parse_export(&bytes, format, &meta)
        .with_context(|| format!("failed to parse export {}", args.export.display()))?;
    let report = compare(&loaded.snapshot, &export, &engine.certification, loaded.now);

    let Some(certifier) = &args.certifier else {
        return Ok(report);
    };
    let mut ledger = CertificationLedger::new();
    let id = ledger.record(report).report_id;
    let stamped = ledger
        .certify(
            &id,
            certifier,
            loaded.snapshot.status(),
            engine.certification.threshold,
            loaded.now,
        )?
        .clone();
    Ok(stamped)
}

fn write_artifact(report: &CertificationReport, key_hex: Option<&str>, path: &Path) -> Result<()> {
    let env_key = std::env::var("CERTIFICATION_SIGNING_KEY_HEX").ok();
    let signer = ArtifactSigner::from_config(key_hex.or(env_key.as_deref()))?;
    let artifact = export_artifact(report, &signer, report.generated_at)?;
    emit(&artifact, Some(path))?;
    eprintln!(
        "artifact signed with {:?} key {}",
        artifact.key_source,
        artifact.public_key.to_hex()
    );
    Ok(())
}

/// Execute the certify subcommand.
pub fn run_certify(args: &CertifyArgs, engine: &EngineConfig) -> Result<u8> {
    let report = match certify_fixture(args, engine) {
        Ok(r) => r,
        Err(e) => match e.downcast_ref::<CertifyError>() {
            Some(
                refusal @ (CertifyError::BelowThreshold { .. }
                | CertifyError::IntegrityIssues { .. }
                | CertifyError::MissingCertifier),
            ) => {
                eprintln!("certification refused: {refusal}");
                return Ok(CHECK_FAILED);
            }
            _ => return Err(e),
        },
    };
    tracing::info!(
        report_id = %report.report_id,
        score = %report.score,
        integrity_issues = report.integrity_issues.len(),
        certified = report.is_certified(),
        "certification report generated"
    );
    emit(&report, args.out.as_deref())?;
    if let Some(path) = &args.artifact {
        write_artifact(&report, args.key_hex.as_deref(), path)?;
    }
    let certifiable =
        report.integrity_issues.is_empty() && report.score >= engine.certification.threshold;
    Ok(if certifiable { 0 } else { CHECK_FAILED })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::test_support::fixture_dir;

    const EXPORT: &str =
        "account_id,currency,balance,as_of\nDE89370400440532013000,EUR,1150.00,2026-03-31\n";

    fn args(dir: &Path, fixture: PathBuf, balance: &str) -> CertifyArgs {
        let export = dir.join("kyriba.csv");
        std::fs::write(
            &export,
            format!("account_id,currency,balance,as_of\nDE89370400440532013000,EUR,{balance},2026-03-31\n"),
        )
        .unwrap();
        CertifyArgs {
            fixture,
            export,
            format: None,
            system: "Kyriba".into(),
            generated_at: None,
            no_match: false,
            certifier: None,
            artifact: None,
            key_hex: None,
            out: Some(dir.join("report.json")),
        }
    }

    #[test]
    fn matching_export_certifies_and_signs() {
        let (dir, path) = fixture_dir();
        let mut a = args(dir.path(), path, "1150.00");
        a.certifier = Some("cfo@acme.example".into());
        a.artifact = Some(dir.path().join("artifact.json"));
        assert_eq!(run_certify(&a, &EngineConfig::default()).unwrap(), 0);

        let artifact: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("artifact.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(artifact["report"]["external_system"], "Kyriba");
        assert_eq!(
            artifact["report"]["certification"]["certifier"],
            "cfo@acme.example"
        );
        let report: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("report.json")).unwrap(),
        )
        .unwrap();
        let threshold = EngineConfig::default().certification.threshold.to_string();
        assert_eq!(report["certification"]["threshold"], threshold.as_str());
    }

    #[test]
    fn large_difference_is_refused() {
        let (dir, path) = fixture_dir();
        let mut a = args(dir.path(), path, "1400.00");
        assert_eq!(run_certify(&a, &EngineConfig::default()).unwrap(), CHECK_FAILED);
        a.certifier = Some("cfo".into());
        assert_eq!(run_certify(&a, &EngineConfig::default()).unwrap(), CHECK_FAILED);
    }

    #[test]
    fn format_comes_from_extension_or_flag() {
        let (dir, path) = fixture_dir();
        let mut a = args(dir.path(), path, "1150.00");
        assert_eq!(export_format(&a).unwrap(), ExportFormat::Csv);
        a.export = dir.path().join("positions.dat");
        std::fs::write(&a.export, EXPORT).unwrap();
        assert!(export_format(&a).is_err());
        a.format = Some("csv".into());
        assert_eq!(export_format(&a).unwrap(), ExportFormat::Csv);
    }
}
