//! Session (appointment) model.
//!
//! A session is one therapy appointment for one student. Its mutable part,
//! who/where/when, is a [`Placement`]; everything else (student, program,
//! type, equipment) is fixed when the booking is made.
//!
//! Sessions are never deleted. Cancellation is a status change so billing
//! and audit records keep their link.

use std::collections::BTreeSet;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::calendar::TimeWindow;

/// Therapy discipline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Speech,
    Occupational,
    Physical,
    Aba,
    /// Center-specific discipline.
    Custom(String),
}

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Rescheduled,
}

impl SessionStatus {
    /// Whether a session in this status holds its therapist, room and student.
    ///
    /// Only cancellation releases the slot.
    #[inline]
    pub fn occupies_slot(&self) -> bool {
        !matches!(self, SessionStatus::Cancelled)
    }
}

/// Therapist × room × date × time for one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Placement {
    pub therapist_id: String,
    pub room_id: String,
    pub date: NaiveDate,
    /// Start (minutes after midnight, inclusive).
    pub start_min: i32,
    /// End (minutes after midnight, exclusive).
    pub end_min: i32,
}

impl Placement {
    /// Creates a placement.
    pub fn new(
        therapist_id: impl Into<String>,
        room_id: impl Into<String>,
        date: NaiveDate,
        window: TimeWindow,
    ) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            room_id: room_id.into(),
            date,
            start_min: window.start_min,
            end_min: window.end_min,
        }
    }

    /// The time-of-day interval.
    #[inline]
    pub fn window(&self) -> TimeWindow {
        TimeWindow::new(self.start_min, self.end_min)
    }

    /// Whether both placements share a date and their intervals overlap.
    #[inline]
    pub fn overlaps(&self, other: &Placement) -> bool {
        self.date == other.date && self.window().overlaps(&other.window())
    }

    /// Same slot on another date.
    pub fn on_date(&self, date: NaiveDate) -> Self {
        Self { date, ..self.clone() }
    }

    /// Same slot shifted by `days`, or `None` past the calendar's range.
    pub fn shifted_days(&self, days: i64) -> Option<Self> {
        let date = self.date.checked_add_signed(Duration::try_days(days)?)?;
        Some(self.on_date(date))
    }

    /// Same date and room, another therapist.
    pub fn with_therapist(&self, therapist_id: impl Into<String>) -> Self {
        Self {
            therapist_id: therapist_id.into(),
            ..self.clone()
        }
    }

    /// Same day and resources, starting at `start_min`.
    pub fn starting_at(&self, start_min: i32) -> Self {
        let window = self.window().moved_to(start_min);
        Self {
            start_min: window.start_min,
            end_min: window.end_min,
            ..self.clone()
        }
    }
}

/// A single therapy appointment.
///
/// Serialized flat: placement fields sit next to the session fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    pub student_id: String,
    pub program_id: String,
    /// Where and when the session takes place.
    #[serde(flatten)]
    pub placement: Placement,
    /// Booked length (minutes). Equals `end - start` unless overridden.
    pub duration_min: i32,
    /// Allows `duration_min` to differ from the placed interval.
    #[serde(default)]
    pub duration_override: bool,
    pub session_type: SessionType,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub required_equipment: BTreeSet<String>,
}

impl Session {
    /// Creates a scheduled session; duration is taken from the window.
    pub fn new(
        id: impl Into<String>,
        student_id: impl Into<String>,
        session_type: SessionType,
        placement: Placement,
    ) -> Self {
        let duration_min = placement.window().duration_min();
        Self {
            id: id.into(),
            student_id: student_id.into(),
            program_id: String::new(),
            placement,
            duration_min,
            duration_override: false,
            session_type,
            status: SessionStatus::Scheduled,
            required_equipment: BTreeSet::new(),
        }
    }

    /// Sets the program reference.
    pub fn with_program(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = program_id.into();
        self
    }

    /// Adds required equipment.
    pub fn with_equipment(mut self, item: impl Into<String>) -> Self {
        self.required_equipment.insert(item.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: SessionStatus) -> Self {
        self.status = status;
        self
    }

    #[inline]
    pub fn therapist_id(&self) -> &str {
        &self.placement.therapist_id
    }

    #[inline]
    pub fn room_id(&self) -> &str {
        &self.placement.room_id
    }

    #[inline]
    pub fn date(&self) -> NaiveDate {
        self.placement.date
    }

    #[inline]
    pub fn window(&self) -> TimeWindow {
        self.placement.window()
    }

    /// Whether the session holds its slot (not cancelled).
    #[inline]
    pub fn is_active(&self) -> bool {
        self.status.occupies_slot()
    }

    /// The session moved to `placement`, duration kept in sync.
    pub fn placed_at(&self, placement: Placement) -> Self {
        let mut moved = self.clone();
        if !moved.duration_override {
            moved.duration_min = placement.window().duration_min();
        }
        moved.placement = placement;
        moved
    }

    /// Whether two active sessions of the same student overlap.
    pub fn student_clash(&self, other: &Session) -> bool {
        self.id != other.id
            && self.student_id == other.student_id
            && other.is_active()
            && self.placement.overlaps(&other.placement)
    }
}
