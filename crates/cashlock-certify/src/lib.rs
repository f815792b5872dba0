//! # cashlock-certify: External Certification
//!
//! Checks a snapshot against a treasury management system's own view of
//! cash:
//!
//! - [`export`]: CSV and JSON cash-position exports.
//! - [`mapping`]: external to internal account resolution.
//! - [`compare`]: per-account differences and their attribution.
//! - [`score`]: the versioned `certification-score/v1` function.
//! - [`ledger`]: append-only reports with a one-time certify stamp.
//! - [`artifact`] and [`signing`]: canonical, SHA-256 digested, Ed25519
//!   signed report exports.
//! - [`source`] and [`retry`]: fetching exports with bounded backoff.
//!
//! Stale exports lower the score; they never make a comparison fail.

pub mod artifact;
pub mod compare;
pub mod config;
pub mod error;
pub mod export;
pub mod ledger;
pub mod mapping;
pub mod report;
pub mod retry;
pub mod score;
pub mod signing;
pub mod source;

#[cfg(test)]
mod test_support;

pub use artifact::{export_artifact, verify_artifact, CertificationArtifact, ARTIFACT_FORMAT};
pub use compare::compare;
pub use config::CertificationSettings;
pub use error::CertifyError;
pub use export::{parse_export, ExportFormat, ExportMeta, ExternalExport, ExternalPosition};
pub use ledger::{ensure_certifiable, CertificationLedger};
pub use mapping::{AccountMapping, MappingMethod};
pub use report::{
    AccountComparison, Attribution, CategoryTotal, CertificationReport, CertificationStamp,
    DifferenceCategory,
};
pub use retry::{retry_transient, Transient, BASE_DELAY_MS, MAX_RETRIES};
pub use score::{certification_score, CertificationScoreInputs, CERTIFICATION_SCORE_VERSION};
pub use signing::{ArtifactSigner, Ed25519PublicKey, Ed25519Signature, KeySource};
pub use source::{fetch_export, ExportSource, FileSource, InlineSource};
