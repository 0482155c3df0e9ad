//! Input validation for scheduling requests.
//!
//! Checks structural integrity of sessions, availability records and rooms
//! before any scheduling computation. Detects:
//! - Duplicate IDs
//! - Missing required fields
//! - Inverted intervals and duration mismatches
//! - Breaks outside their window or overlapping each other
//! - References to unknown rooms
//!
//! All problems are collected; nothing short-circuits.

use std::collections::HashSet;

use crate::error::Error;
use crate::models::{DateRange, Session, TherapistAvailability, TherapyRoom};

/// Validation result.
pub type ValidationResult = Result<(), Vec<ValidationError>>;

/// A validation error.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ValidationError {
    /// Error category.
    pub kind: ValidationErrorKind,
    /// Human-readable description.
    pub message: String,
}

/// Categories of validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// Two entities share the same ID.
    DuplicateId,
    /// A required field is empty.
    MissingField,
    /// start >= end, or outside the day.
    InvalidInterval,
    /// Duration does not match the placed interval.
    DurationMismatch,
    /// Break outside its window or overlapping another break.
    InvalidBreak,
    /// A session references a room that doesn't exist.
    UnknownRoom,
    /// Room definition is unusable (zero capacity).
    InvalidRoom,
    /// Date range with start after end.
    InvalidDateRange,
    /// A request without anything to do.
    EmptyRequest,
    /// A numeric parameter outside its allowed range.
    OutOfRange,
}

impl ValidationError {
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Converts a validation result into the crate error type.
pub fn into_error(result: ValidationResult) -> crate::error::Result<()> {
    result.map_err(Error::Validation)
}

/// Validates one session.
pub fn validate_session(session: &Session) -> ValidationResult {
    let mut errors = Vec::new();
    check_session(session, &mut errors);
    finish(errors)
}

/// Validates an inclusive date range.
pub fn validate_date_range(name: &str, range: &DateRange) -> ValidationResult {
    if range.is_well_formed() {
        Ok(())
    } else {
        Err(vec![ValidationError::new(
            ValidationErrorKind::InvalidDateRange,
            format!("{name} starts {} after it ends {}", range.start, range.end),
        )])
    }
}

/// Validates a full scheduling snapshot.
///
/// Checks:
/// 1. Every session is well formed (ids, interval, duration)
/// 2. No duplicate session or room IDs
/// 3. Availability windows and breaks are well formed; breaks disjoint and inside
/// 4. Rooms have non-zero capacity
/// 5. Every active session references a known room
///
/// # Returns
/// `Ok(())` if all checks pass, `Err(errors)` with all detected issues.
pub fn validate_snapshot(
    sessions: &[Session],
    availabilities: &[TherapistAvailability],
    rooms: &[TherapyRoom],
) -> ValidationResult {
    let mut errors = Vec::new();

    let mut room_ids = HashSet::new();
    for room in rooms {
        if !room_ids.insert(room.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("Duplicate room ID: {}", room.id),
            ));
        }
        if room.capacity == 0 {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidRoom,
                format!("Room '{}' has zero capacity", room.id),
            ));
        }
    }

    let mut session_ids = HashSet::new();
    for session in sessions {
        if !session_ids.insert(session.id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("Duplicate session ID: {}", session.id),
            ));
        }
        check_session(session, &mut errors);
        if session.is_active() && !room_ids.contains(session.room_id()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::UnknownRoom,
                format!(
                    "Session '{}' references unknown room '{}'",
                    session.id,
                    session.room_id()
                ),
            ));
        }
    }

    for availability in availabilities {
        check_availability(availability, &mut errors);
    }

    finish(errors)
}

fn check_session(session: &Session, errors: &mut Vec<ValidationError>) {
    if session.id.is_empty() {
        errors.push(ValidationError::new(
            ValidationErrorKind::MissingField,
            "Session id is empty",
        ));
    }
    for (field, value) in [
        ("student_id", session.student_id.as_str()),
        ("therapist_id", session.therapist_id()),
        ("room_id", session.room_id()),
    ] {
        if value.is_empty() {
            errors.push(ValidationError::new(
                ValidationErrorKind::MissingField,
                format!("Session '{}' is missing {field}", session.id),
            ));
        }
    }

    let window = session.window();
    if !window.is_well_formed() {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidInterval,
            format!("Session '{}' has an invalid interval {window}", session.id),
        ));
    } else if !session.duration_override && session.duration_min != window.duration_min() {
        errors.push(ValidationError::new(
            ValidationErrorKind::DurationMismatch,
            format!(
                "Session '{}' duration {} min does not match its interval {window}",
                session.id, session.duration_min
            ),
        ));
    }
}

fn check_availability(availability: &TherapistAvailability, errors: &mut Vec<ValidationError>) {
    let who = format!("'{}' on {}", availability.therapist_id, availability.date);
    if !availability.window.is_well_formed() {
        errors.push(ValidationError::new(
            ValidationErrorKind::InvalidInterval,
            format!("Availability {who} has an invalid window {}", availability.window),
        ));
    }
    for (i, brk) in availability.breaks.iter().enumerate() {
        if !brk.is_well_formed() || !availability.window.contains_window(brk) {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidBreak,
                format!(
                    "Break {brk} of {who} lies outside the window {}",
                    availability.window
                ),
            ));
        }
        if availability.breaks[i + 1..].iter().any(|other| other.overlaps(brk)) {
            errors.push(ValidationError::new(
                ValidationErrorKind::InvalidBreak,
                format!("Break {brk} of {who} overlaps another break"),
            ));
        }
    }
}

fn finish(errors: Vec<ValidationError>) -> ValidationResult {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
