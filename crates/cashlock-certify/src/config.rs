//! Certification settings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::mapping::AccountMapping;

/// Thresholds and mapping for external certification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificationSettings {
    /// Minimum score for `certify` to be accepted.
    pub threshold: Decimal,
    /// An export older than this, relative to the snapshot's bank data, is
    /// stale.
    pub stale_after_hours: i64,
    /// Points taken off the score for a stale export.
    pub stale_penalty: Decimal,
    /// Per-account residue at or below this is attributed to rounding.
    pub rounding_tolerance_minor: i64,
    /// Score points lost per percent of unexplained difference over the
    /// compared balance.
    pub unexplained_weight: Decimal,
    /// Explicit external-to-internal account map.
    pub account_mapping: AccountMapping,
}

impl Default for CertificationSettings {
    fn default() -> Self {
        Self {
            threshold: Decimal::from(95),
            stale_after_hours: 24,
            stale_penalty: Decimal::from(15),
            rounding_tolerance_minor: 2,
            unexplained_weight: Decimal::from(10),
            account_mapping: AccountMapping::new(),
        }
    }
}
