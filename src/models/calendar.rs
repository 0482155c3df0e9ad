//! Calendar primitives: minute-of-day windows and date ranges.
//!
//! # Time Model
//! Times of day are minutes after local midnight (`540` = 09:00). A
//! [`TimeWindow`] is half-open: `[start_min, end_min)`. Dates are
//! `chrono::NaiveDate` in the center's local calendar; time zones are the
//! caller's concern.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Minutes in a day.
pub const MINUTES_PER_DAY: i32 = 24 * 60;

/// Converts an hour/minute pair to minutes after midnight.
#[inline]
pub const fn hm(hour: i32, minute: i32) -> i32 {
    hour * 60 + minute
}

/// A time-of-day interval [start, end).
///
/// Half-open interval: includes start, excludes end. Two sessions that
/// touch (10:00-11:00 and 11:00-12:00) do not overlap.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct TimeWindow {
    /// Interval start (minutes after midnight, inclusive).
    pub start_min: i32,
    /// Interval end (minutes after midnight, exclusive).
    pub end_min: i32,
}

impl TimeWindow {
    /// Creates a new time window.
    pub fn new(start_min: i32, end_min: i32) -> Self {
        Self { start_min, end_min }
    }

    /// Creates a window from `HH`,`MM` pairs.
    pub fn hm(start: (i32, i32), end: (i32, i32)) -> Self {
        Self::new(hm(start.0, start.1), hm(end.0, end.1))
    }

    /// Duration of this window (minutes).
    #[inline]
    pub fn duration_min(&self) -> i32 {
        self.end_min - self.start_min
    }

    /// Whether `start < end` and both ends lie inside one day.
    pub fn is_well_formed(&self) -> bool {
        self.start_min >= 0 && self.end_min <= MINUTES_PER_DAY && self.start_min < self.end_min
    }

    /// Whether a minute falls within this window.
    #[inline]
    pub fn contains(&self, minute: i32) -> bool {
        minute >= self.start_min && minute < self.end_min
    }

    /// Whether `other` lies entirely inside this window.
    #[inline]
    pub fn contains_window(&self, other: &Self) -> bool {
        other.start_min >= self.start_min && other.end_min <= self.end_min
    }

    /// Whether two windows overlap.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start_min < other.end_min && other.start_min < self.end_min
    }

    /// Idle minutes between two disjoint windows (0 if they overlap or touch).
    pub fn gap_to(&self, other: &Self) -> i32 {
        if self.end_min <= other.start_min {
            other.start_min - self.end_min
        } else if other.end_min <= self.start_min {
            self.start_min - other.end_min
        } else {
            0
        }
    }

    /// Returns the window moved to start at `start_min`, keeping its length.
    pub fn moved_to(&self, start_min: i32) -> Self {
        Self::new(start_min, start_min + self.duration_min())
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start_min / 60,
            self.start_min % 60,
            self.end_min / 60,
            self.end_min % 60
        )
    }
}

/// Subtracts `holes` from `window`, returning the remaining pieces in order.
pub fn subtract_windows(window: &TimeWindow, holes: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut sorted: Vec<&TimeWindow> = holes.iter().filter(|h| h.overlaps(window)).collect();
    sorted.sort();

    let mut pieces = Vec::new();
    let mut cursor = window.start_min;
    for hole in sorted {
        if hole.start_min > cursor {
            pieces.push(TimeWindow::new(cursor, hole.start_min.min(window.end_min)));
        }
        cursor = cursor.max(hole.end_min);
        if cursor >= window.end_min {
            break;
        }
    }
    if cursor < window.end_min {
        pieces.push(TimeWindow::new(cursor, window.end_min));
    }
    pieces
}

/// An inclusive range of calendar dates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(deny_unknown_fields)]
pub struct DateRange {
    /// First date (inclusive).
    pub start: NaiveDate,
    /// Last date (inclusive).
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a new date range.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// A range covering a single day.
    pub fn day(date: NaiveDate) -> Self {
        Self::new(date, date)
    }

    /// Whether `start <= end`.
    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end
    }

    /// Number of days in the range (0 if inverted).
    pub fn days(&self) -> i64 {
        ((self.end - self.start).num_days() + 1).max(0)
    }

    /// Whether a date falls within the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }

    /// Whether two ranges share at least one day.
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Range shifted by `days`, or `None` past the calendar's range.
    pub fn shifted(&self, days: i64) -> Option<Self> {
        let by = Duration::try_days(days)?;
        Some(Self::new(
            self.start.checked_add_signed(by)?,
            self.end.checked_add_signed(by)?,
        ))
    }

    /// Iterates every date in the range.
    pub fn iter(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.days()).map(move |offset| start + Duration::days(offset))
    }
}
