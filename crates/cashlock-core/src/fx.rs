//! # FX Rate Table
//!
//! Rates convert a foreign currency into the snapshot's base currency.
//!
//! ## Security Invariant
//!
//! Conversion of a foreign amount without a loaded rate is an error. The
//! table never substitutes `1.0`. Rates sourced from a fallback feed and
//! unpegged rates of exactly `1` are accepted for loading but flagged by the
//! `fx_rate_integrity` check.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::FxError;
use crate::money::Currency;

/// Where a rate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateSource {
    /// Published market rate.
    Market,
    /// Entered by a treasury user.
    Manual,
    /// Filled in by a fallback because the primary feed had no rate.
    Fallback,
}

/// A conversion rate from `from` into `to`: `to_amount = from_amount * rate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxRate {
    /// Source currency.
    pub from: Currency,
    /// Target currency; must equal the table's base currency.
    pub to: Currency,
    /// Multiplier, strictly positive.
    pub rate: Decimal,
    /// Provenance of the rate.
    pub source: RateSource,
    /// Whether the currency is officially pegged at this rate.
    #[serde(default)]
    pub pegged: bool,
    /// Date the rate applies to.
    pub as_of: NaiveDate,
}

/// Rates into a single base currency, keyed by source currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FxRateTable {
    base: Currency,
    rates: BTreeMap<Currency, FxRate>,
}

impl FxRateTable {
    /// Empty table for `base`.
    pub fn new(base: Currency) -> Self {
        Self {
            base,
            rates: BTreeMap::new(),
        }
    }

    /// The base currency all rates convert into.
    pub fn base(&self) -> &Currency {
        &self.base
    }

    /// Insert or replace the rate for `rate.from`, returning the previous one.
    pub fn insert(&mut self, rate: FxRate) -> Result<Option<FxRate>, FxError> {
        if rate.to != self.base {
            return Err(FxError::InvalidRate {
                currency: rate.from.to_string(),
                reason: format!("rate targets {} but base is {}", rate.to, self.base),
            });
        }
        if rate.from == self.base {
            return Err(FxError::InvalidRate {
                currency: rate.from.to_string(),
                reason: "base currency needs no rate".to_string(),
            });
        }
        if rate.rate <= Decimal::ZERO {
            return Err(FxError::InvalidRate {
                currency: rate.from.to_string(),
                reason: format!("rate must be positive, got {}", rate.rate),
            });
        }
        Ok(self.rates.insert(rate.from.clone(), rate))
    }

    /// Remove the rate for `currency`.
    pub fn remove(&mut self, currency: &Currency) -> Option<FxRate> {
        self.rates.remove(currency)
    }

    /// Look up the rate for `currency`.
    pub fn get(&self, currency: &Currency) -> Option<&FxRate> {
        self.rates.get(currency)
    }

    /// All loaded rates in currency order.
    pub fn rates(&self) -> impl Iterator<Item = &FxRate> {
        self.rates.values()
    }

    /// Whether a conversion for `currency` would succeed.
    pub fn can_convert(&self, currency: &Currency) -> bool {
        *currency == self.base || self.rates.contains_key(currency)
    }

    /// Convert signed minor units in `currency` into base minor units.
    ///
    /// Rounds half to even at the minor unit.
    pub fn convert_to_base(&self, amount_minor: i64, currency: &Currency) -> Result<i64, FxError> {
        if *currency == self.base {
            return Ok(amount_minor);
        }
        let rate = self.rates.get(currency).ok_or_else(|| FxError::MissingRate {
            from: currency.to_string(),
            to: self.base.to_string(),
        })?;
        apply_rate(amount_minor, rate.rate).ok_or_else(|| FxError::Overflow {
            currency: currency.to_string(),
        })
    }
}

/// Multiply minor units by a rate, rounding half to even.
pub fn apply_rate(amount_minor: i64, rate: Decimal) -> Option<i64> {
    Decimal::from(amount_minor)
        .checked_mul(rate)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usd() -> Currency {
        Currency::new("USD").unwrap()
    }

    fn eur() -> Currency {
        Currency::new("EUR").unwrap()
    }

    fn rate(from: Currency, r: Decimal, source: RateSource) -> FxRate {
        FxRate {
            from,
            to: usd(),
            rate: r,
            source,
            pegged: false,
            as_of: NaiveDate::from_ymd_opt(2026, 3, 31).unwrap(),
        }
    }

    #[test]
    fn base_currency_converts_without_rate() {
        let table = FxRateTable::new(usd());
        assert_eq!(table.convert_to_base(12_345, &usd()).unwrap(), 12_345);
    }

    #[test]
    fn missing_rate_is_an_error_not_one() {
        let table = FxRateTable::new(usd());
        let err = table.convert_to_base(10_000, &eur()).unwrap_err();
        assert_eq!(
            err,
            FxError::MissingRate {
                from: "EUR".into(),
                to: "USD".into()
            }
        );
    }

    #[test]
    fn converts_with_half_even_rounding() {
        let mut table = FxRateTable::new(usd());
        table
            .insert(rate(eur(), Decimal::new(105, 2), RateSource::Market))
            .unwrap();
        assert_eq!(table.convert_to_base(10_000, &eur()).unwrap(), 10_500);
        // 15 * 1.05 = 15.75 -> 16
        assert_eq!(table.convert_to_base(15, &eur()).unwrap(), 16);
        // 10 * 1.05 = 10.5 -> 10 (half to even)
        assert_eq!(table.convert_to_base(10, &eur()).unwrap(), 10);
        assert_eq!(table.convert_to_base(-10_000, &eur()).unwrap(), -10_500);
    }

    #[test]
    fn rejects_non_positive_and_mis_targeted_rates() {
        let mut table = FxRateTable::new(usd());
        assert!(table
            .insert(rate(eur(), Decimal::ZERO, RateSource::Market))
            .is_err());
        let mut wrong = rate(eur(), Decimal::ONE, RateSource::Market);
        wrong.to = Currency::new("GBP").unwrap();
        assert!(table.insert(wrong).is_err());
        assert!(table
            .insert(rate(usd(), Decimal::ONE, RateSource::Market))
            .is_err());
    }

    #[test]
    fn remove_makes_conversion_fail_again() {
        let mut table = FxRateTable::new(usd());
        table
            .insert(rate(eur(), Decimal::new(11, 1), RateSource::Manual))
            .unwrap();
        assert!(table.can_convert(&eur()));
        assert!(table.remove(&eur()).is_some());
        assert!(table.convert_to_base(1, &eur()).is_err());
    }
}
