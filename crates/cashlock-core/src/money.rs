//! # Money Primitives
//!
//! Amounts are `i64` minor units with two implied decimal places. Statement
//! and export amounts arrive as decimal text (`1234,56`, `1234.56`, `-12.3`)
//! and are converted exactly through `rust_decimal`; input with more than two
//! fractional digits is rejected rather than rounded.

use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::CashlockError;

/// Number of minor units per major unit.
pub const MINOR_PER_MAJOR: i64 = 100;

/// ISO 4217 alphabetic currency code, always three uppercase ASCII letters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    /// Validate and construct a currency code. Lowercase input is accepted.
    pub fn new(code: &str) -> Result<Self, CashlockError> {
        let code = code.trim().to_ascii_uppercase();
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(CashlockError::Validation(format!(
                "currency code must be three letters, got {code:?}"
            )));
        }
        Ok(Self(code))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Currency {
    type Error = CashlockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Currency> for String {
    fn from(c: Currency) -> Self {
        c.0
    }
}

impl FromStr for Currency {
    type Err = CashlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Parse decimal text into signed minor units.
///
/// Accepts `.` or `,` as the decimal separator and an optional leading sign.
/// Thousands separators are not accepted.
pub fn parse_amount_minor(text: &str) -> Result<i64, CashlockError> {
    let cleaned = text.trim().replace(',', ".");
    if cleaned.is_empty() {
        return Err(CashlockError::Validation("empty amount".to_string()));
    }
    // MT940 allows a trailing separator with no fraction ("100,").
    let cleaned = cleaned.strip_suffix('.').unwrap_or(&cleaned);
    let value = Decimal::from_str(cleaned)
        .map_err(|e| CashlockError::Validation(format!("invalid amount {text:?}: {e}")))?;
    decimal_to_minor(value)
        .ok_or_else(|| CashlockError::Validation(format!("amount {text:?} is not representable in minor units")))
}

/// Convert a decimal major-unit amount to minor units, rejecting sub-minor
/// precision and overflow.
pub fn decimal_to_minor(value: Decimal) -> Option<i64> {
    let scaled = value.checked_mul(Decimal::from(MINOR_PER_MAJOR))?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    scaled.to_i64()
}

/// Render minor units as a decimal string with two places (`-12.30`).
pub fn format_minor(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    let per = MINOR_PER_MAJOR.unsigned_abs();
    format!("{sign}{}.{:02}", abs / per, abs % per)
}
