//! # Certification Ledger
//!
//! Append-only store of certification reports.
//!
//! ## Security Invariant
//!
//! A report is never removed and its stamp is written at most once. A new
//! report for the same snapshot records which report it supersedes; the
//! superseded report keeps its stamp but can no longer be certified.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_core::{ReportId, SnapshotId, Timestamp};
use cashlock_state::SnapshotStatus;

use crate::error::CertifyError;
use crate::report::{CertificationReport, CertificationStamp};

/// Refuse a snapshot that is still in draft.
pub fn ensure_certifiable(snapshot_id: SnapshotId, status: SnapshotStatus) -> Result<(), CertifyError> {
    if status == SnapshotStatus::ReadyForReview || status.is_locked() {
        Ok(())
    } else {
        Err(CertifyError::SnapshotNotReady {
            snapshot_id,
            status,
        })
    }
}

/// All certification reports, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CertificationLedger {
    reports: Vec<CertificationReport>,
}

impl CertificationLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `report`, linking it to the latest report for its snapshot.
    pub fn record(&mut self, mut report: CertificationReport) -> &CertificationReport {
        report.supersedes = self.latest_for(&report.snapshot_id).map(|r| r.report_id);
        if let Some(prev) = report.supersedes {
            tracing::info!(
                report_id = %report.report_id,
                supersedes = %prev,
                "certification report supersedes an earlier one"
            );
        }
        self.reports.push(report);
        let last = self.reports.len() - 1;
        &self.reports[last]
    }

    /// Append a report loaded from storage, keeping its recorded links.
    pub fn restore(&mut self, report: CertificationReport) {
        if self.get(&report.report_id).is_none() {
            self.reports.push(report);
        }
    }

    /// Look up a report.
    pub fn get(&self, id: &ReportId) -> Option<&CertificationReport> {
        self.reports.iter().find(|r| r.report_id == *id)
    }

    /// Newest report for `snapshot_id`.
    pub fn latest_for(&self, snapshot_id: &SnapshotId) -> Option<&CertificationReport> {
        self.reports
            .iter()
            .rev()
            .find(|r| r.snapshot_id == *snapshot_id)
    }

    /// Every report for `snapshot_id`, oldest first.
    pub fn history(&self, snapshot_id: &SnapshotId) -> Vec<&CertificationReport> {
        self.reports
            .iter()
            .filter(|r| r.snapshot_id == *snapshot_id)
            .collect()
    }

    /// The report that replaced `id`, if any.
    pub fn superseded_by(&self, id: &ReportId) -> Option<&CertificationReport> {
        self.reports.iter().find(|r| r.supersedes == Some(*id))
    }

    /// Number of reports.
    pub fn len(&self) -> usize {
        self.reports.len()
    }

    /// True when no report has been recorded.
    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Stamp a report as certified.
    ///
    /// # Errors
    ///
    /// Refuses an unknown report, an empty certifier, a report that is
    /// already stamped or has been superseded, one whose snapshot
    /// (currently in `snapshot_status`) is still a draft, one with integrity
    /// issues, and one whose score is below `threshold`.
    pub fn certify(
        &mut self,
        id: &ReportId,
        certifier: &str,
        snapshot_status: SnapshotStatus,
        threshold: Decimal,
        now: Timestamp,
    ) -> Result<&CertificationReport, CertifyError> {
        let certifier = certifier.trim();
        if certifier.is_empty() {
            return Err(CertifyError::MissingCertifier);
        }
        if let Some(newer) = self.superseded_by(id) {
            return Err(CertifyError::Superseded {
                report_id: *id,
                superseded_by: newer.report_id,
            });
        }
        let report = self
            .reports
            .iter_mut()
            .find(|r| r.report_id == *id)
            .ok_or(CertifyError::NotFound(*id))?;
        if let Some(stamp) = &report.certification {
            return Err(CertifyError::AlreadyCertified {
                report_id: *id,
                certifier: stamp.certifier.clone(),
            });
        }
        ensure_certifiable(report.snapshot_id, snapshot_status)?;
        if !report.integrity_issues.is_empty() {
            return Err(CertifyError::IntegrityIssues {
                report_id: *id,
                count: report.integrity_issues.len(),
            });
        }
        if report.score < threshold {
            return Err(CertifyError::BelowThreshold {
                score: report.score,
                threshold,
            });
        }
        report.certification = Some(CertificationStamp {
            certifier: certifier.to_string(),
            certified_at: now,
            threshold,
        });
        tracing::info!(
            report_id = %report.report_id,
            snapshot_id = %report.snapshot_id,
            certifier,
            score = %report.score,
            "certification report certified"
        );
        Ok(report)
    }
}
