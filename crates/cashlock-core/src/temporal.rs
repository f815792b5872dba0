//! # Temporal Types: UTC-Only Timestamps
//!
//! `Timestamp` is UTC with seconds precision so that timestamps embedded in
//! allocation events, audit entries and certification artifacts have one
//! canonical rendering: `YYYY-MM-DDTHH:MM:SSZ`.
//!
//! Business dates (booking, value, due dates) are `chrono::NaiveDate`; only
//! instants use this type.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CashlockError;

/// A UTC-only timestamp, truncated to seconds precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current UTC time, truncated.
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// From a `DateTime<Utc>`, truncating sub-seconds.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Midnight UTC at the start of `date`.
    pub fn start_of_day(date: NaiveDate) -> Self {
        Self(date.and_time(chrono::NaiveTime::MIN).and_utc())
    }

    /// Parse an RFC 3339 string with a `Z` suffix.
    ///
    /// # Errors
    ///
    /// Rejects non-UTC offsets, including `+00:00`, and malformed input.
    pub fn parse(s: &str) -> Result<Self, CashlockError> {
        if !s.ends_with('Z') {
            return Err(CashlockError::Validation(format!(
                "timestamp must use Z suffix (UTC only), got: {s:?}"
            )));
        }
        Self::parse_lenient(s)
    }

    /// Parse any RFC 3339 string, converting the offset to UTC.
    ///
    /// Used for external exports whose producers emit local offsets.
    pub fn parse_lenient(s: &str) -> Result<Self, CashlockError> {
        let dt = DateTime::parse_from_rfc3339(s.trim()).map_err(|e| {
            CashlockError::Validation(format!("invalid RFC 3339 timestamp {s:?}: {e}"))
        })?;
        Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc))))
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// The calendar date in UTC.
    pub fn date(&self) -> NaiveDate {
        self.0.date_naive()
    }

    /// Whole hours elapsed from `earlier` to `self`; negative if `earlier`
    /// is in the future.
    pub fn hours_since(&self, earlier: &Timestamp) -> i64 {
        (self.0 - earlier.0).num_hours()
    }

    /// This timestamp shifted by `hours`.
    pub fn plus_hours(&self, hours: i64) -> Self {
        Self(self.0 + Duration::hours(hours))
    }

    /// Render as ISO 8601 with Z suffix.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_has_no_subseconds() {
        assert_eq!(Timestamp::now().as_datetime().nanosecond(), 0);
    }

    #[test]
    fn parse_requires_z_suffix() {
        assert!(Timestamp::parse("2026-03-31T12:00:00Z").is_ok());
        assert!(Timestamp::parse("2026-03-31T12:00:00+00:00").is_err());
        assert!(Timestamp::parse("not a time").is_err());
    }

    #[test]
    fn lenient_parse_converts_offsets() {
        let ts = Timestamp::parse_lenient("2026-03-31T14:30:15.250+02:00").unwrap();
        assert_eq!(ts.to_iso8601(), "2026-03-31T12:30:15Z");
    }

    #[test]
    fn hours_since_is_signed() {
        let a = Timestamp::parse("2026-03-31T00:00:00Z").unwrap();
        let b = a.plus_hours(30);
        assert_eq!(b.hours_since(&a), 30);
        assert_eq!(a.hours_since(&b), -30);
    }

    #[test]
    fn start_of_day_is_midnight() {
        let d = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert_eq!(Timestamp::start_of_day(d).to_iso8601(), "2026-04-01T00:00:00Z");
        assert_eq!(Timestamp::start_of_day(d).date(), d);
    }
}
