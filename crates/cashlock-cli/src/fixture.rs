//! # Snapshot Fixtures
//!
//! A fixture is a YAML (or JSON) file describing a snapshot: its period,
//! the statement files to import, the ledger invoices and FX rates.
//! Statement paths are resolved relative to the fixture's directory.
//!
//! ```yaml
//! name: W13
//! as_of: 2026-03-31
//! base_currency: EUR
//! now: 2026-04-01T09:00:00Z
//! statements:
//!   - path: statements/de.sta
//!     format: mt940
//!     entity_id: ACME-DE
//! invoices:
//!   - id: INV-1001
//!     entity_id: ACME-DE
//!     document_number: INV-1001
//!     customer: Acme GmbH
//!     kind: receivable
//!     amount_minor: 25000
//!     currency: EUR
//!     base_amount_minor: 25000
//!     due_date: 2026-03-31
//!     country: DE
//! fx_rates: []
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;

use cashlock_core::{Currency, EntityId, FxRate, Invoice, Timestamp};
use cashlock_ingest::{format_from_name, normalize, ImportContext};
use cashlock_state::Snapshot;

use crate::resolve_path;

/// One statement file of a fixture.
#[derive(Debug, Clone, Deserialize)]
pub struct StatementFixture {
    pub path: PathBuf,
    /// `mt940`, `bai2` or `camt053`.
    pub format: String,
    pub entity_id: String,
}

/// A snapshot described on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotFixture {
    pub name: String,
    pub as_of: NaiveDate,
    pub base_currency: String,
    /// Clock for every time-dependent computation. Defaults to the
    /// current time.
    #[serde(default)]
    pub now: Option<Timestamp>,
    #[serde(default)]
    pub statements: Vec<StatementFixture>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub fx_rates: Vec<FxRate>,
}

/// A fixture turned into a live snapshot.
#[derive(Debug)]
pub struct LoadedFixture {
    pub snapshot: Snapshot,
    pub now: Timestamp,
}

impl SnapshotFixture {
    /// Parse a fixture from YAML or JSON text.
    pub fn parse(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("malformed snapshot fixture")
    }

    /// Read a fixture file.
    pub fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read fixture {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Build the snapshot: FX rates first, then statements, then invoices.
    pub fn build(&self, base_dir: &Path) -> Result<LoadedFixture> {
        let now = self.now.unwrap_or_else(Timestamp::now);
        let base = Currency::new(&self.base_currency)
            .with_context(|| format!("invalid base currency {:?}", self.base_currency))?;
        let mut snapshot = Snapshot::new(self.name.clone(), self.as_of, base, now);

        for rate in &self.fx_rates {
            snapshot
                .upsert_fx_rate(rate.clone())
                .with_context(|| format!("invalid FX rate for {}", rate.from))?;
        }

        for stmt in &self.statements {
            let path = resolve_path(&stmt.path, base_dir);
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read statement {}", path.display()))?;
            let format = format_from_name(&stmt.format)?;
            let ctx = ImportContext {
                entity_id: EntityId::new(stmt.entity_id.trim()),
            };
            let normalized = normalize(&bytes, format, &ctx)
                .with_context(|| format!("failed to normalize {}", path.display()))?;
            let summary = snapshot
                .import_statement(normalized, now)
                .with_context(|| format!("failed to import {}", path.display()))?;
            tracing::info!(
                path = %path.display(),
                imported = summary.imported,
                duplicates_skipped = summary.duplicates_skipped,
                verified = summary.verified,
                "statement imported"
            );
        }

        if !self.invoices.is_empty() {
            snapshot
                .load_invoices(self.invoices.clone(), now)
                .context("failed to load invoices")?;
        }
        if snapshot.transactions().is_empty() && snapshot.invoices().is_empty() {
            bail!("fixture {:?} has neither statements nor invoices", self.name);
        }
        Ok(LoadedFixture { snapshot, now })
    }
}

/// Read and build the fixture at `path`.
pub fn load(path: &Path) -> Result<LoadedFixture> {
    let fixture = SnapshotFixture::read(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    fixture.build(base_dir)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;

    pub const MT940: &str = ":20:STMT-0001\n:25:DE89370400440532013000\n:28C:1/1\n:60F:C260330EUR1000,00\n:61:2603310331C250,00NTRFINV-1001//B1\n:86:/NAME/Acme GmbH/REMI/Invoice INV-1001\n:61:2603310331D100,00NCHGNONREF\n:86:Account fee\n:62F:C260331EUR1150,00\n";

    pub const FIXTURE: &str = "\
name: W13
as_of: 2026-03-31
base_currency: EUR
now: 2026-04-01T09:00:00Z
statements:
  - path: de.sta
    format: mt940
    entity_id: ACME-DE
invoices:
  - id: INV-1001
    entity_id: ACME-DE
    document_number: INV-1001
    customer: Acme GmbH
    kind: receivable
    amount_minor: 25000
    currency: EUR
    base_amount_minor: 25000
    due_date: 2026-03-31
    country: DE
    payment_date: null
    on_hold: false
";

    /// A fixture directory holding `w13.yaml` and `de.sta`.
    pub fn fixture_dir() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("de.sta"), MT940).unwrap();
        let path = dir.path().join("w13.yaml");
        std::fs::write(&path, FIXTURE).unwrap();
        (dir, path)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn fixture_builds_snapshot() {
        let (_dir, path) = fixture_dir();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.snapshot.transactions().len(), 2);
        assert_eq!(loaded.snapshot.invoices().len(), 1);
        assert_eq!(loaded.now, Timestamp::parse("2026-04-01T09:00:00Z").unwrap());
    }

    #[test]
    fn missing_statement_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w13.yaml");
        std::fs::write(&path, FIXTURE).unwrap();
        let err = load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("de.sta"));
    }

    #[test]
    fn empty_fixture_is_rejected() {
        let fixture =
            SnapshotFixture::parse("name: W13\nas_of: 2026-03-31\nbase_currency: EUR\n").unwrap();
        assert!(fixture.build(Path::new(".")).is_err());
    }

    #[test]
    fn bad_currency_is_rejected() {
        let fixture =
            SnapshotFixture::parse("name: W13\nas_of: 2026-03-31\nbase_currency: euro\n").unwrap();
        assert!(fixture.build(Path::new(".")).is_err());
    }
}
