//! Temporal helpers.
//!
//! The engine never reads the ambient clock: every comparison is made
//! against the `now` injected with the fact bag.
//! - **Parsing**: CRM dates arrive as ISO dates, RFC 3339 timestamps or
//!   French `dd/mm/YYYY` strings.
//! - **Windows**: half-open `[from, to)` ranges used for recency checks.
//! - **Offsets**: day and hour shifts from definitions and configuration
//!   are bounded at load and applied with checked arithmetic.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Largest day offset accepted in conditions and configuration (about a
/// century either way).
pub const MAX_OFFSET_DAYS: i64 = 36_500;

/// Largest hour window accepted in conditions and configuration.
pub const MAX_WINDOW_HOURS: i64 = MAX_OFFSET_DAYS * 24;

/// Shifts `at` by `days`, or `None` if the result is not representable.
#[must_use]
pub fn shift_days(at: DateTime<Utc>, days: i64) -> Option<DateTime<Utc>> {
    Duration::try_days(days).and_then(|delta| at.checked_add_signed(delta))
}

/// Shifts a calendar date by `days`, or `None` if out of range.
#[must_use]
pub fn shift_date(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    Duration::try_days(days).and_then(|delta| date.checked_add_signed(delta))
}

/// Parses a calendar date.
///
/// Accepts `YYYY-MM-DD`, `dd/mm/YYYY` and full timestamps (the date part is
/// kept).
///
/// # Examples
///
/// ```
/// use replymatrix::time::parse_date;
///
/// assert!(parse_date("2026-03-16").is_some());
/// assert!(parse_date("16/03/2026").is_some());
/// assert!(parse_date("2026-03-16T09:00:00Z").is_some());
/// assert!(parse_date("soon").is_none());
/// ```
#[must_use]
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| parse_datetime(raw).map(|dt| dt.date_naive()))
}

/// Parses a timestamp.
///
/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` (taken as UTC) and bare dates
/// (midnight UTC).
#[must_use]
pub fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// A range of time (half-open interval: [from, to)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub from: DateTime<Utc>,
    /// End of the range (exclusive).
    pub to: DateTime<Utc>,
}

impl TimeRange {
    /// Creates the range `[to - length, to)`, or `None` if the start is
    /// not representable.
    #[must_use]
    pub fn ending_at(to: DateTime<Utc>, length: Duration) -> Option<Self> {
        Some(Self {
            from: to.checked_sub_signed(length)?,
            to,
        })
    }

    /// Returns true if `at` falls within this range.
    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at < self.to
    }
}

/// How far back an earlier communication suppresses repeating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecencyWindow {
    hours: i64,
}

impl RecencyWindow {
    /// Creates a window of the given number of hours.
    #[must_use]
    pub const fn hours(hours: i64) -> Self {
        Self { hours }
    }

    /// Window length in hours.
    #[must_use]
    pub const fn as_hours(&self) -> i64 {
        self.hours
    }

    /// Returns true if `at` happened within the window ending at `now`.
    ///
    /// The upper bound is inclusive so that a communication stamped exactly
    /// at `now` still counts.
    #[must_use]
    pub fn covers(&self, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if self.hours <= 0 {
            return false;
        }
        let second = Duration::seconds(1);
        let Some(to) = now.checked_add_signed(second) else {
            return false;
        };
        match Duration::try_hours(self.hours).and_then(|len| TimeRange::ending_at(to, len + second)) {
            Some(range) => range.contains(at),
            // Window reaches past the earliest representable instant.
            None => at < to,
        }
    }
}

impl Default for RecencyWindow {
    fn default() -> Self {
        Self::hours(72)
    }
}
