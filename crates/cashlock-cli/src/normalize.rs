//! # Normalize: Statement file to canonical JSON.
//!
//! ```bash
//! cashlock normalize statements/de.sta --format mt940 --entity ACME-DE
//! cashlock normalize statements/us.bai --format bai2 --entity ACME-US --out us.json
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;

use cashlock_core::{EntityId, StatementFormat};
use cashlock_ingest::{format_from_name, normalize, ImportContext, NormalizedStatement};

use crate::{emit, CHECK_FAILED};

/// Normalize subcommand arguments.
#[derive(Args, Debug)]
pub struct NormalizeArgs {
    /// Statement file.
    pub path: PathBuf,

    /// `mt940`, `bai2` or `camt053`. Guessed from the extension when
    /// omitted.
    #[arg(long)]
    pub format: Option<String>,

    /// Legal entity that owns the accounts.
    #[arg(long = "entity")]
    pub entity_id: String,

    /// Write the JSON here instead of stdout.
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Print only the verification report.
    #[arg(long)]
    pub verify_only: bool,
}

fn guess_format(path: &Path) -> Option<StatementFormat> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "sta" | "mt940" | "940" => Some(StatementFormat::Mt940),
        "bai" | "bai2" => Some(StatementFormat::Bai2),
        "xml" | "camt" | "053" => Some(StatementFormat::Camt053),
        _ => None,
    }
}

/// Normalize one statement file.
pub fn normalize_file(args: &NormalizeArgs) -> Result<NormalizedStatement> {
    let format = match &args.format {
        Some(name) => format_from_name(name)?,
        None => guess_format(&args.path).with_context(|| {
            format!(
                "cannot tell the format of {}; pass --format",
                args.path.display()
            )
        })?,
    };
    let bytes = std::fs::read(&args.path)
        .with_context(|| format!("failed to read {}", args.path.display()))?;
    let ctx = ImportContext {
        entity_id: EntityId::new(args.entity_id.trim()),
    };
    normalize(&bytes, format, &ctx).with_context(|| format!("failed to normalize {}", args.path.display()))
}

/// Execute the normalize subcommand.
pub fn run_normalize(args: &NormalizeArgs) -> Result<u8> {
    let stmt = normalize_file(args)?;
    tracing::info!(
        statement_id = %stmt.statement_id,
        transactions = stmt.transactions.len(),
        skipped = stmt.skipped.len(),
        verified = stmt.verification.verified,
        "statement normalized"
    );
    if args.verify_only {
        emit(&stmt.verification, args.out.as_deref())?;
    } else {
        emit(&stmt, args.out.as_deref())?;
    }
    if stmt.verification.verified {
        Ok(0)
    } else {
        eprintln!(
            "statement {} does not verify: discrepancy {} minor units",
            stmt.statement_id,
            stmt.verification.discrepancy_minor()
        );
        Ok(CHECK_FAILED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::test_support::MT940;

    fn args(dir: &Path, name: &str, content: &str) -> NormalizeArgs {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        NormalizeArgs {
            path,
            format: None,
            entity_id: "ACME-DE".into(),
            out: Some(dir.join("out.json")),
            verify_only: false,
        }
    }

    #[test]
    fn format_is_guessed_from_extension() {
        assert_eq!(guess_format(Path::new("a.sta")), Some(StatementFormat::Mt940));
        assert_eq!(guess_format(Path::new("a.BAI2")), Some(StatementFormat::Bai2));
        assert_eq!(guess_format(Path::new("a.xml")), Some(StatementFormat::Camt053));
        assert_eq!(guess_format(Path::new("a.txt")), None);
        assert_eq!(guess_format(Path::new("noext")), None);
    }

    #[test]
    fn verified_statement_writes_json_and_exits_zero() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), "de.sta", MT940);
        assert_eq!(run_normalize(&a).unwrap(), 0);
        let out: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("out.json")).unwrap())
                .unwrap();
        assert_eq!(out["statement_id"], "STMT-0001");
        assert_eq!(out["transactions"].as_array().unwrap().len(), 2);
        assert_eq!(out["verification"]["verified"], true);
    }

    #[test]
    fn unknown_extension_needs_format() {
        let dir = tempfile::tempdir().unwrap();
        let a = args(dir.path(), "de.txt", MT940);
        assert!(run_normalize(&a).is_err());

        let mut explicit = args(dir.path(), "de2.txt", MT940);
        explicit.format = Some("mt940".into());
        assert_eq!(run_normalize(&explicit).unwrap(), 0);
    }
}
