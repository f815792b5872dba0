//! Certification errors.

use thiserror::Error;

use cashlock_core::{CanonicalizationError, CashlockError, ReportId, SnapshotId};
use cashlock_state::SnapshotStatus;
use rust_decimal::Decimal;

/// Failure of a certification operation.
#[derive(Error, Debug)]
pub enum CertifyError {
    /// The export could not be read.
    #[error("invalid {format} export at record {record}: {message}")]
    Parse {
        /// `csv` or `json`.
        format: &'static str,
        /// 1-based record number, 0 for file-level problems.
        record: usize,
        /// What was wrong.
        message: String,
    },

    /// The export format name is not supported.
    #[error("unsupported export format {0:?}; expected csv or json")]
    UnsupportedFormat(String),

    /// The export holds no positions.
    #[error("export contains no positions")]
    EmptyExport,

    /// Referenced report does not exist.
    #[error("certification report {0} not found")]
    NotFound(ReportId),

    /// The report already carries a certification stamp.
    #[error("certification report {report_id} was already certified by {certifier}")]
    AlreadyCertified {
        /// Report.
        report_id: ReportId,
        /// Who certified it.
        certifier: String,
    },

    /// A newer report replaced this one.
    #[error("certification report {report_id} is superseded by {superseded_by}")]
    Superseded {
        /// Report.
        report_id: ReportId,
        /// Newer report.
        superseded_by: ReportId,
    },

    /// The snapshot has not been submitted for review.
    #[error("snapshot {snapshot_id} is {status}; certification needs a snapshot ready for review or locked")]
    SnapshotNotReady {
        /// Snapshot.
        snapshot_id: SnapshotId,
        /// Its current status.
        status: SnapshotStatus,
    },

    /// Score is under the configured threshold.
    #[error("certification score {score} is below the threshold {threshold}")]
    BelowThreshold {
        /// Report score.
        score: Decimal,
        /// Required score.
        threshold: Decimal,
    },

    /// The report has records that could not be valued.
    #[error("certification report {report_id} has {count} integrity issue(s)")]
    IntegrityIssues {
        /// Report.
        report_id: ReportId,
        /// Number of issues.
        count: usize,
    },

    /// Certifier identity is missing.
    #[error("certifier must not be empty")]
    MissingCertifier,

    /// Signing key material is malformed.
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    /// Artifact signature or digest does not verify.
    #[error("artifact verification failed: {0}")]
    VerificationFailed(String),

    /// Fetching the export failed.
    #[error("fetching export from {source_name} failed: {message}")]
    Fetch {
        /// Source description.
        source_name: String,
        /// Failure detail.
        message: String,
        /// Whether another attempt might succeed.
        transient: bool,
    },

    /// Digest computation failed.
    #[error(transparent)]
    Canonicalization(#[from] CanonicalizationError),
}

impl From<CertifyError> for CashlockError {
    fn from(e: CertifyError) -> Self {
        match e {
            CertifyError::AlreadyCertified { .. }
            | CertifyError::Superseded { .. }
            | CertifyError::SnapshotNotReady { .. } => CashlockError::Conflict(e.to_string()),
            CertifyError::BelowThreshold { .. } => CashlockError::PolicyViolation {
                message: e.to_string(),
                reasons: vec!["score_below_threshold".into()],
            },
            CertifyError::VerificationFailed(_) | CertifyError::IntegrityIssues { .. } => {
                CashlockError::Integrity {
                    message: e.to_string(),
                    evidence: Vec::new(),
                }
            }
            CertifyError::Canonicalization(c) => CashlockError::Canonicalization(c),
            CertifyError::Parse { .. }
            | CertifyError::UnsupportedFormat(_)
            | CertifyError::EmptyExport
            | CertifyError::NotFound(_)
            | CertifyError::MissingCertifier
            | CertifyError::InvalidKey(_)
            | CertifyError::Fetch { .. } => CashlockError::Validation(e.to_string()),
        }
    }
}
