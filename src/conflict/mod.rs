//! Conflict detection for session placements.
//!
//! # Severity
//!
//! One taxonomy applies everywhere:
//! - **Blocking**: a hard rule is broken (double-booking, availability,
//!   room, equipment). The placement must not be committed.
//! - **Advisory**: a preference is not met. Reported, never prevents commit.
//!
//! The kind fixes the severity; no call site reclassifies a conflict.

mod detector;

pub use detector::{ConflictDetector, DetectorConfig};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::{Placement, TimeWindow};

/// Whether a conflict prevents commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Blocking,
    Advisory,
}

/// Conflict categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Therapist already has an overlapping session.
    TherapistDoubleBooking,
    /// Interval not inside an open availability window.
    OutsideAvailability,
    /// Interval intersects a declared break.
    BreakOverlap,
    /// Therapist's daily cap would be exceeded.
    MaxSessionsExceeded,
    /// Room already at capacity for the interval.
    RoomCapacity,
    /// Room does not support the session type.
    RoomUnsupportedType,
    /// Room is deactivated.
    RoomInactive,
    /// Room is not in the snapshot.
    UnknownRoom,
    /// Student already has an overlapping session.
    StudentDoubleBooking,
    /// Room lacks required equipment.
    EquipmentUnavailable,
    /// Required equipment is used by a concurrent session in the room.
    EquipmentInUse,
    /// Store changed between check and commit.
    ConcurrentModification,
    /// Interval touches a window the student avoids.
    StudentAvoidWindow,
    /// Interval outside all of the student's preferred windows.
    OutsidePreferredWindow,
    /// Less idle time than the therapist's break rule asks for.
    BackToBack,
    /// Less idle time than the student's minimum gap.
    StudentGap,
}

impl ConflictKind {
    /// Severity of this kind.
    pub fn severity(&self) -> Severity {
        match self {
            Self::StudentAvoidWindow
            | Self::OutsidePreferredWindow
            | Self::BackToBack
            | Self::StudentGap => Severity::Advisory,
            _ => Severity::Blocking,
        }
    }
}

/// A detected conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: Severity,
    /// Candidate first, then the sessions it collides with.
    pub session_ids: Vec<String>,
    pub date: NaiveDate,
    pub window: TimeWindow,
    pub message: String,
}

impl Conflict {
    /// Creates a conflict; severity follows the kind.
    pub fn new(
        kind: ConflictKind,
        session_ids: Vec<String>,
        date: NaiveDate,
        window: TimeWindow,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            session_ids,
            date,
            window,
            message: message.into(),
        }
    }

    #[inline]
    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Blocking
    }
}

/// Conflicts of one candidate placement plus suggested alternatives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub conflicts: Vec<Conflict>,
    /// Slots the same therapist and room could honor; filled only when a
    /// blocking conflict exists.
    pub alternatives: Vec<Placement>,
}

impl ConflictReport {
    pub fn has_blocking(&self) -> bool {
        self.conflicts.iter().any(Conflict::is_blocking)
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| c.is_blocking())
    }

    pub fn advisory(&self) -> impl Iterator<Item = &Conflict> {
        self.conflicts.iter().filter(|c| !c.is_blocking())
    }

    /// No conflict of any severity.
    pub fn is_clear(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Distinct kinds present, sorted.
    pub fn kinds(&self) -> Vec<ConflictKind> {
        let mut kinds: Vec<_> = self.conflicts.iter().map(|c| c.kind).collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }
}
