//! Therapist availability model.
//!
//! One record describes a therapist's open window on one date, the breaks
//! carved out of it, and the daily session cap. A therapist may have several
//! records for the same date (split shifts).
//!
//! # Precedence
//! Breaks override the window. A session interval is bookable iff:
//! - the record is `Available`, AND
//! - the interval lies inside `window`, AND
//! - the interval does not intersect any break.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::calendar::{subtract_windows, TimeWindow};

/// Whether the therapist can take bookings in this window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityStatus {
    #[default]
    Available,
    Unavailable,
}

/// A therapist's open window for one date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TherapistAvailability {
    /// Therapist this window belongs to.
    pub therapist_id: String,
    /// Calendar date.
    pub date: NaiveDate,
    /// Working window.
    pub window: TimeWindow,
    /// Sub-ranges excluded from bookable time.
    #[serde(default)]
    pub breaks: Vec<TimeWindow>,
    /// Daily session cap.
    pub max_sessions_per_day: u32,
    /// Availability status.
    #[serde(default)]
    pub status: AvailabilityStatus,
}

impl TherapistAvailability {
    /// Creates an available window with no breaks and a cap of 8 sessions.
    pub fn new(therapist_id: impl Into<String>, date: NaiveDate, window: TimeWindow) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            date,
            window,
            breaks: Vec::new(),
            max_sessions_per_day: 8,
            status: AvailabilityStatus::Available,
        }
    }

    /// Adds a break.
    pub fn with_break(mut self, brk: TimeWindow) -> Self {
        self.breaks.push(brk);
        self
    }

    /// Sets the daily session cap.
    pub fn with_max_sessions(mut self, max: u32) -> Self {
        self.max_sessions_per_day = max;
        self
    }

    /// Marks the window unavailable (leave, sickness).
    pub fn unavailable(mut self) -> Self {
        self.status = AvailabilityStatus::Unavailable;
        self
    }

    /// Whether bookings are accepted in this window.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == AvailabilityStatus::Available
    }

    /// Whether `interval` lies inside the window (breaks not considered).
    pub fn covers(&self, interval: &TimeWindow) -> bool {
        self.window.contains_window(interval)
    }

    /// The first break intersecting `interval`, if any.
    pub fn break_overlapping(&self, interval: &TimeWindow) -> Option<&TimeWindow> {
        self.breaks.iter().find(|b| b.overlaps(interval))
    }

    /// Whether `interval` can be booked here.
    pub fn can_host(&self, interval: &TimeWindow) -> bool {
        self.is_open() && self.covers(interval) && self.break_overlapping(interval).is_none()
    }

    /// The window minus its breaks, in chronological order.
    pub fn bookable_windows(&self) -> Vec<TimeWindow> {
        if !self.is_open() {
            return Vec::new();
        }
        subtract_windows(&self.window, &self.breaks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TherapistAvailability {
        TherapistAvailability::new(
            "T1",
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            TimeWindow::hm((9, 0), (17, 0)),
        )
        .with_break(TimeWindow::hm((12, 0), (13, 0)))
    }

    #[test]
    fn test_can_host() {
        let a = sample();
        assert!(a.can_host(&TimeWindow::hm((9, 0), (10, 0))));
        assert!(!a.can_host(&TimeWindow::hm((11, 30), (12, 30)))); // break
        assert!(!a.can_host(&TimeWindow::hm((16, 30), (17, 30)))); // past close
        assert!(a.can_host(&TimeWindow::hm((13, 0), (14, 0))));
    }

    #[test]
    fn test_unavailable_blocks_everything() {
        let a = sample().unavailable();
        assert!(!a.can_host(&TimeWindow::hm((9, 0), (10, 0))));
        assert!(a.bookable_windows().is_empty());
    }

    #[test]
    fn test_bookable_windows_skip_break() {
        assert_eq!(
            sample().bookable_windows(),
            vec![TimeWindow::hm((9, 0), (12, 0)), TimeWindow::hm((13, 0), (17, 0))]
        );
    }
}
