//! Certification report types.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use cashlock_core::{AccountId, Currency, EvidenceRef, ReportId, SnapshotId, Timestamp};

use crate::mapping::MappingMethod;
use crate::score::CertificationScoreInputs;

/// Where a difference between external and internal balances comes from.
///
/// Attribution runs in declaration order; each step takes at most what the
/// earlier steps left unexplained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifferenceCategory {
    /// External system converted at a different rate.
    FxPolicyDifference,
    /// External balance predates the internal closing balance.
    StaleData,
    /// External system counts by value date, the bank by booking date.
    TimingDifference,
    /// Bank transactions the ledger has not matched yet.
    UnmatchedBankTransaction,
    /// Sub-tolerance residue.
    Rounding,
    /// Account present on one side only.
    MappingGap,
    /// Nothing above explains it.
    Unknown,
}

impl DifferenceCategory {
    /// Every category in attribution order.
    pub const ALL: [DifferenceCategory; 7] = [
        Self::FxPolicyDifference,
        Self::StaleData,
        Self::TimingDifference,
        Self::UnmatchedBankTransaction,
        Self::Rounding,
        Self::MappingGap,
        Self::Unknown,
    ];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FxPolicyDifference => "fx_policy_difference",
            Self::StaleData => "stale_data",
            Self::TimingDifference => "timing_difference",
            Self::UnmatchedBankTransaction => "unmatched_bank_transaction",
            Self::Rounding => "rounding",
            Self::MappingGap => "mapping_gap",
            Self::Unknown => "unknown",
        }
    }

    /// Whether this category counts against the score.
    pub fn is_unexplained(&self) -> bool {
        matches!(self, Self::MappingGap | Self::Unknown)
    }
}

impl std::fmt::Display for DifferenceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A slice of one account's difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    /// Category.
    pub category: DifferenceCategory,
    /// Signed base-currency minor units, same sign as the difference.
    pub amount_minor: i64,
    /// Records behind it.
    pub evidence: Vec<EvidenceRef>,
}

/// External versus internal for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountComparison {
    /// Account id as the external system wrote it.
    pub external_account_id: Option<String>,
    /// Internal account.
    pub internal_account_id: Option<AccountId>,
    /// How the two were paired.
    pub mapping: MappingMethod,
    /// Account currency.
    pub currency: Currency,
    /// External balance date.
    pub external_as_of: Option<NaiveDate>,
    /// Internal closing date.
    pub internal_as_of: Option<NaiveDate>,
    /// External balance in account currency.
    pub external_balance_minor: Option<i64>,
    /// Internal closing balance in account currency.
    pub internal_balance_minor: Option<i64>,
    /// External balance in base currency.
    pub external_base_minor: Option<i64>,
    /// Internal balance in base currency.
    pub internal_base_minor: Option<i64>,
    /// External minus internal, base currency.
    pub difference_minor: i64,
    /// Breakdown of `difference_minor`; amounts sum to it.
    pub attributions: Vec<Attribution>,
}

impl AccountComparison {
    /// Attributed amount for `category`.
    pub fn attributed(&self, category: DifferenceCategory) -> i64 {
        self.attributions
            .iter()
            .filter(|a| a.category == category)
            .map(|a| a.amount_minor)
            .sum()
    }
}

/// Category roll-up across accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTotal {
    /// Category.
    pub category: DifferenceCategory,
    /// Signed sum.
    pub net_minor: i64,
    /// Sum of magnitudes.
    pub gross_minor: i64,
    /// Accounts contributing.
    pub accounts: usize,
}

/// Who certified a report, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationStamp {
    /// Certifier identity.
    pub certifier: String,
    /// Certification time.
    pub certified_at: Timestamp,
    /// Threshold in force when the stamp was written.
    #[serde(default)]
    pub threshold: Decimal,
}

/// Result of comparing an external export against a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificationReport {
    /// Report id.
    pub report_id: ReportId,
    /// Snapshot compared.
    pub snapshot_id: SnapshotId,
    /// External system name.
    pub external_system: String,
    /// When the export was produced.
    pub export_generated_at: Timestamp,
    /// Hours between the export and the snapshot's bank data.
    pub export_age_hours: i64,
    /// Export older than the freshness threshold.
    pub stale: bool,
    /// Reporting currency.
    pub base_currency: Currency,
    /// Sum of external base balances.
    pub external_total_minor: i64,
    /// Sum of internal base balances.
    pub internal_total_minor: i64,
    /// External minus internal.
    pub net_difference_minor: i64,
    /// Sum of per-account difference magnitudes.
    pub gross_difference_minor: i64,
    /// Per-account comparisons.
    pub accounts: Vec<AccountComparison>,
    /// Per-category roll-up in attribution order.
    pub categories: Vec<CategoryTotal>,
    /// Records that could not be valued, such as balances without an FX
    /// rate. Certification is refused while any exist.
    pub integrity_issues: Vec<EvidenceRef>,
    /// Score function version.
    pub score_version: String,
    /// Score inputs.
    pub score_inputs: CertificationScoreInputs,
    /// Certification score, `0..=100`.
    pub score: Decimal,
    /// Threshold in force when the report was generated.
    pub threshold: Decimal,
    /// Generation time.
    pub generated_at: Timestamp,
    /// Set once by an explicit certify action.
    pub certification: Option<CertificationStamp>,
    /// Earlier report for the same snapshot that this one replaces.
    pub supersedes: Option<ReportId>,
}

impl CertificationReport {
    /// Score clears the threshold.
    pub fn meets_threshold(&self) -> bool {
        self.score >= self.threshold
    }

    /// Certified: stamped and over threshold.
    pub fn is_certified(&self) -> bool {
        self.certification.is_some() && self.meets_threshold()
    }

    /// Roll-up for `category`.
    pub fn category(&self, category: DifferenceCategory) -> Option<&CategoryTotal> {
        self.categories.iter().find(|c| c.category == category)
    }
}
