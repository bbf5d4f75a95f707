//! Time range primitives.
//!
//! This module provides [`TimeRange`], a half-open interval `[start, end)` in
//! UTC, and the [`overlaps`] test used by the availability calculator and by
//! appointment conflict checks.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A half-open time range `[start, end)` in UTC.
///
/// Construction never panics: an inverted or zero-length range is allowed to
/// exist but is [empty](TimeRange::is_empty) and never overlaps anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// Start of the range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the range (exclusive).
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Creates a new time range.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Returns the local calendar day `date` in `tz` as a UTC range.
    ///
    /// Returns `None` when local midnight does not exist in `tz` for either
    /// bound (a DST gap at midnight).
    pub fn for_date<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Option<Self> {
        let start = tz
            .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
            .earliest()?
            .with_timezone(&Utc);
        let end = tz
            .from_local_datetime(&date.succ_opt()?.and_hms_opt(0, 0, 0)?)
            .earliest()?
            .with_timezone(&Utc);
        Some(Self { start, end })
    }

    /// Returns the duration of this range (negative for inverted ranges).
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Returns `true` if the range covers no time at all.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Checks if an instant falls within this range (`[start, end)`).
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Checks whether this range overlaps `other`. See [`overlaps`].
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self, other)
    }
}

/// Returns `true` iff `a` and `b` share some instant.
///
/// Ranges are half-open, so touching endpoints do not overlap. Empty ranges
/// never overlap anything, including themselves.
pub fn overlaps(a: &TimeRange, b: &TimeRange) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.start < b.end && a.end > b.start
}
