//! Conflict detector.
//!
//! # Algorithm
//!
//! For a candidate session, all checks run and every violation is collected:
//! 1. Therapist double-booking
//! 2. Therapist availability (window, breaks, daily cap)
//! 3. Room (known, active, supports the type, capacity)
//! 4. Student double-booking
//! 5. Equipment (present in the room, not used by a concurrent session)
//!
//! Advisory checks run only when preferences are attached.
//!
//! When a blocking conflict exists, alternatives are found by scanning the
//! therapist's bookable windows in fixed steps, same day first, then
//! adjacent days, re-running checks 1-4 on each slot.
//!
//! The detector holds no state between calls: identical inputs give
//! identical reports.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Conflict, ConflictKind, ConflictReport};
use crate::models::{
    find_room, OptimizationConstraints, Placement, Session, TherapistAvailability, TherapyRoom,
};

/// Detector tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Scan increment for alternatives (minutes).
    pub slot_step_min: i32,
    /// Alternatives proposed per report.
    pub max_alternatives: usize,
    /// Days before and after the candidate date scanned for alternatives.
    pub adjacent_days: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            slot_step_min: 15,
            max_alternatives: 3,
            adjacent_days: 1,
        }
    }
}

/// Checks candidate placements against a snapshot.
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    config: DetectorConfig,
    preferences: Option<OptimizationConstraints>,
}

impl ConflictDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            preferences: None,
        }
    }

    /// Enables advisory checks and the facility switches of `constraints`.
    pub fn with_preferences(mut self, constraints: &OptimizationConstraints) -> Self {
        self.preferences = Some(constraints.clone());
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Full report for `candidate`: blocking and advisory conflicts, plus
    /// alternatives when anything blocks.
    ///
    /// `sessions` may contain the candidate itself (it is skipped by id).
    /// Cancelled sessions hold no slot and are ignored.
    pub fn detect_conflicts(
        &self,
        candidate: &Session,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        rooms: &[TherapyRoom],
    ) -> ConflictReport {
        if !candidate.is_active() {
            return ConflictReport::default();
        }

        let mut conflicts = self.hard_conflicts(candidate, sessions, availabilities, rooms, true);
        if let Some(preferences) = &self.preferences {
            conflicts.extend(advisory_conflicts(candidate, sessions, preferences));
        }

        let alternatives = if conflicts.iter().any(Conflict::is_blocking) {
            self.find_alternatives(candidate, sessions, availabilities, rooms)
        } else {
            Vec::new()
        };

        if !conflicts.is_empty() {
            debug!(
                session_id = %candidate.id,
                conflicts = conflicts.len(),
                alternatives = alternatives.len(),
                "conflicts detected"
            );
        }

        ConflictReport {
            conflicts,
            alternatives,
        }
    }

    /// Blocking conflicts of `session` moved to `placement` (checks 1-5).
    pub fn check_placement(
        &self,
        session: &Session,
        placement: &Placement,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        rooms: &[TherapyRoom],
    ) -> Vec<Conflict> {
        let moved = session.placed_at(placement.clone());
        self.hard_conflicts(&moved, sessions, availabilities, rooms, true)
    }

    /// Up to `max_alternatives` slots on the candidate's therapist and room
    /// that pass checks 1-4. Never returns the candidate's own slot.
    pub fn find_alternatives(
        &self,
        candidate: &Session,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        rooms: &[TherapyRoom],
    ) -> Vec<Placement> {
        let mut found: Vec<Placement> = Vec::new();
        if self.config.max_alternatives == 0 {
            return found;
        }
        let step = self.config.slot_step_min.max(1);
        let length = candidate.window().duration_min();
        if length <= 0 {
            return found;
        }

        for date in self.search_dates(candidate.date()) {
            let records = availabilities
                .iter()
                .filter(|a| a.therapist_id == candidate.therapist_id() && a.date == date);
            for record in records {
                for free in record.bookable_windows() {
                    let mut start = free.start_min;
                    while start + length <= free.end_min {
                        let placement = Placement {
                            date,
                            start_min: start,
                            end_min: start + length,
                            ..candidate.placement.clone()
                        };
                        if placement != candidate.placement && !found.contains(&placement) {
                            let moved = candidate.placed_at(placement.clone());
                            let clear = self
                                .hard_conflicts(&moved, sessions, availabilities, rooms, false)
                                .is_empty();
                            if clear {
                                found.push(placement);
                                if found.len() >= self.config.max_alternatives {
                                    return found;
                                }
                            }
                        }
                        start += step;
                    }
                }
            }
        }
        found
    }

    /// Candidate date, then ±1, ±2, … up to `adjacent_days`.
    fn search_dates(&self, date: NaiveDate) -> Vec<NaiveDate> {
        let mut dates = vec![date];
        for offset in 1..=i64::from(self.config.adjacent_days) {
            dates.push(date - Duration::days(offset));
            dates.push(date + Duration::days(offset));
        }
        dates
    }

    fn hard_conflicts(
        &self,
        candidate: &Session,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        rooms: &[TherapyRoom],
        include_equipment: bool,
    ) -> Vec<Conflict> {
        let mut out = Vec::new();
        self.check_therapist_booking(candidate, sessions, &mut out);
        self.check_availability(candidate, sessions, availabilities, &mut out);
        self.check_room(candidate, sessions, rooms, &mut out);
        self.check_student_booking(candidate, sessions, &mut out);
        if include_equipment {
            self.check_equipment(candidate, sessions, rooms, &mut out);
        }
        out
    }

    fn check_therapist_booking(&self, candidate: &Session, sessions: &[Session], out: &mut Vec<Conflict>) {
        for other in others(candidate, sessions) {
            if other.therapist_id() == candidate.therapist_id()
                && other.placement.overlaps(&candidate.placement)
            {
                out.push(conflict(
                    ConflictKind::TherapistDoubleBooking,
                    candidate,
                    vec![other.id.clone()],
                    format!(
                        "Therapist '{}' already has session '{}' at {}",
                        candidate.therapist_id(),
                        other.id,
                        other.window()
                    ),
                ));
            }
        }
    }

    fn check_availability(
        &self,
        candidate: &Session,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        out: &mut Vec<Conflict>,
    ) {
        let window = candidate.window();
        let records: Vec<&TherapistAvailability> = availabilities
            .iter()
            .filter(|a| a.therapist_id == candidate.therapist_id() && a.date == candidate.date())
            .collect();
        let covering: Vec<&TherapistAvailability> = records
            .iter()
            .copied()
            .filter(|a| a.is_open() && a.covers(&window))
            .collect();

        if covering.is_empty() {
            let reason = if records.is_empty() {
                "has no availability on that date"
            } else if records.iter().all(|a| !a.is_open()) {
                "is marked unavailable"
            } else {
                "is not working for the whole interval"
            };
            out.push(conflict(
                ConflictKind::OutsideAvailability,
                candidate,
                Vec::new(),
                format!(
                    "Therapist '{}' {reason} ({} {window})",
                    candidate.therapist_id(),
                    candidate.date()
                ),
            ));
        } else if covering.iter().all(|a| a.break_overlapping(&window).is_some()) {
            let brk = covering
                .iter()
                .find_map(|a| a.break_overlapping(&window))
                .copied()
                .unwrap_or(window);
            out.push(conflict(
                ConflictKind::BreakOverlap,
                candidate,
                Vec::new(),
                format!(
                    "{window} overlaps break {brk} of therapist '{}'",
                    candidate.therapist_id()
                ),
            ));
        }

        let record_cap = if covering.is_empty() {
            records.iter().map(|a| a.max_sessions_per_day).min()
        } else {
            covering.iter().map(|a| a.max_sessions_per_day).min()
        };
        let rule_cap = self
            .preferences
            .as_ref()
            .map(|c| c.therapist.max_sessions_per_day);
        let cap = match (record_cap, rule_cap) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        if let Some(cap) = cap {
            let same_day: Vec<String> = others(candidate, sessions)
                .filter(|s| s.therapist_id() == candidate.therapist_id() && s.date() == candidate.date())
                .map(|s| s.id.clone())
                .collect();
            if same_day.len() as u64 >= u64::from(cap) {
                let booked = same_day.len();
                out.push(conflict(
                    ConflictKind::MaxSessionsExceeded,
                    candidate,
                    same_day,
                    format!(
                        "Therapist '{}' already has {booked} sessions on {} (max {cap})",
                        candidate.therapist_id(),
                        candidate.date()
                    ),
                ));
            }
        }
    }

    fn check_room(
        &self,
        candidate: &Session,
        sessions: &[Session],
        rooms: &[TherapyRoom],
        out: &mut Vec<Conflict>,
    ) {
        let Some(room) = find_room(rooms, candidate.room_id()) else {
            out.push(conflict(
                ConflictKind::UnknownRoom,
                candidate,
                Vec::new(),
                format!("Room '{}' does not exist", candidate.room_id()),
            ));
            return;
        };

        if !room.active {
            out.push(conflict(
                ConflictKind::RoomInactive,
                candidate,
                Vec::new(),
                format!("Room '{}' is inactive", room.id),
            ));
        }
        if !room.supported_session_types.contains(&candidate.session_type) {
            out.push(conflict(
                ConflictKind::RoomUnsupportedType,
                candidate,
                Vec::new(),
                format!(
                    "Room '{}' does not support {:?} sessions",
                    room.id, candidate.session_type
                ),
            ));
        }

        let enforce = self
            .preferences
            .as_ref()
            .map_or(true, |c| c.facility.enforce_room_capacity);
        if enforce {
            let concurrent: Vec<String> = others(candidate, sessions)
                .filter(|s| s.room_id() == room.id && s.placement.overlaps(&candidate.placement))
                .map(|s| s.id.clone())
                .collect();
            if concurrent.len() as u64 >= u64::from(room.capacity) {
                out.push(conflict(
                    ConflictKind::RoomCapacity,
                    candidate,
                    concurrent,
                    format!(
                        "Room '{}' is full at {} (capacity {})",
                        room.id,
                        candidate.window(),
                        room.capacity
                    ),
                ));
            }
        }
    }

    fn check_student_booking(&self, candidate: &Session, sessions: &[Session], out: &mut Vec<Conflict>) {
        for other in others(candidate, sessions) {
            if candidate.student_clash(other) {
                out.push(conflict(
                    ConflictKind::StudentDoubleBooking,
                    candidate,
                    vec![other.id.clone()],
                    format!(
                        "Student '{}' already has session '{}' at {}",
                        candidate.student_id,
                        other.id,
                        other.window()
                    ),
                ));
            }
        }
    }

    fn check_equipment(
        &self,
        candidate: &Session,
        sessions: &[Session],
        rooms: &[TherapyRoom],
        out: &mut Vec<Conflict>,
    ) {
        let enforce = self
            .preferences
            .as_ref()
            .map_or(true, |c| c.facility.enforce_equipment);
        if !enforce || candidate.required_equipment.is_empty() {
            return;
        }

        if let Some(room) = find_room(rooms, candidate.room_id()) {
            let missing = room.missing_equipment(&candidate.required_equipment);
            if !missing.is_empty() {
                out.push(conflict(
                    ConflictKind::EquipmentUnavailable,
                    candidate,
                    Vec::new(),
                    format!("Room '{}' lacks {}", room.id, missing.join(", ")),
                ));
            }
        }

        for other in others(candidate, sessions) {
            if other.room_id() != candidate.room_id() || !other.placement.overlaps(&candidate.placement) {
                continue;
            }
            let shared: Vec<&str> = candidate
                .required_equipment
                .intersection(&other.required_equipment)
                .map(String::as_str)
                .collect();
            if !shared.is_empty() {
                out.push(conflict(
                    ConflictKind::EquipmentInUse,
                    candidate,
                    vec![other.id.clone()],
                    format!("{} in use by session '{}'", shared.join(", "), other.id),
                ));
            }
        }
    }
}

fn advisory_conflicts(
    candidate: &Session,
    sessions: &[Session],
    preferences: &OptimizationConstraints,
) -> Vec<Conflict> {
    let mut out = Vec::new();
    let window = candidate.window();
    let student = candidate.student_id.as_str();

    if let Some(avoided) = preferences.avoided_for(student).iter().find(|w| w.overlaps(&window)) {
        out.push(conflict(
            ConflictKind::StudentAvoidWindow,
            candidate,
            Vec::new(),
            format!("{window} touches {avoided}, which student '{student}' avoids"),
        ));
    }
    let preferred = preferences.preferred_for(student);
    if !preferred.is_empty() && !preferred.iter().any(|w| w.contains_window(&window)) {
        out.push(conflict(
            ConflictKind::OutsidePreferredWindow,
            candidate,
            Vec::new(),
            format!("{window} is outside the preferred windows of student '{student}'"),
        ));
    }

    if preferences.therapist.avoid_back_to_back {
        let min_break = preferences.therapist.break_duration_min.max(1);
        for other in others(candidate, sessions) {
            if other.therapist_id() == candidate.therapist_id()
                && other.date() == candidate.date()
                && !other.window().overlaps(&window)
                && window.gap_to(&other.window()) < min_break
            {
                out.push(conflict(
                    ConflictKind::BackToBack,
                    candidate,
                    vec![other.id.clone()],
                    format!(
                        "Less than {min_break} min between '{}' and '{}' for therapist '{}'",
                        candidate.id,
                        other.id,
                        candidate.therapist_id()
                    ),
                ));
            }
        }
    }

    let min_gap = preferences.student.min_gap_between_sessions_min;
    if min_gap > 0 {
        for other in others(candidate, sessions) {
            if other.student_id == candidate.student_id
                && other.date() == candidate.date()
                && !other.window().overlaps(&window)
                && window.gap_to(&other.window()) < min_gap
            {
                out.push(conflict(
                    ConflictKind::StudentGap,
                    candidate,
                    vec![other.id.clone()],
                    format!(
                        "Less than {min_gap} min between '{}' and '{}' for student '{student}'",
                        candidate.id, other.id
                    ),
                ));
            }
        }
    }
    out
}

/// Active sessions other than the candidate.
fn others<'a>(candidate: &'a Session, sessions: &'a [Session]) -> impl Iterator<Item = &'a Session> {
    sessions
        .iter()
        .filter(move |s| s.id != candidate.id && s.is_active())
}

fn conflict(kind: ConflictKind, candidate: &Session, with: Vec<String>, message: String) -> Conflict {
    let mut ids = Vec::with_capacity(with.len() + 1);
    ids.push(candidate.id.clone());
    ids.extend(with);
    Conflict::new(kind, ids, candidate.date(), candidate.window(), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{hm, SessionStatus, SessionType, TimeWindow};

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    fn session(id: &str, student: &str, therapist: &str, room: &str, window: TimeWindow) -> Session {
        Session::new(
            id,
            student,
            SessionType::Speech,
            Placement::new(therapist, room, day(1), window),
        )
    }

    fn availability(therapist: &str, d: u32) -> TherapistAvailability {
        TherapistAvailability::new(therapist, day(d), TimeWindow::hm((9, 0), (17, 0)))
            .with_break(TimeWindow::hm((12, 0), (13, 0)))
    }

    fn rooms() -> Vec<TherapyRoom> {
        vec![
            TherapyRoom::new("R1")
                .supporting(SessionType::Speech)
                .with_equipment("mirror"),
            TherapyRoom::new("R2").supporting(SessionType::Speech),
        ]
    }

    fn kinds(report: &ConflictReport) -> Vec<ConflictKind> {
        report.kinds()
    }

    #[test]
    fn test_double_booking_with_alternatives() {
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST2", "T1", "R2", TimeWindow::hm((10, 30), (11, 30)));
        let detector = ConflictDetector::default();

        let report = detector.detect_conflicts(&candidate, &[existing], &[availability("T1", 1)], &rooms());

        assert!(report.has_blocking());
        assert_eq!(kinds(&report), vec![ConflictKind::TherapistDoubleBooking]);
        assert_eq!(report.conflicts[0].session_ids, vec!["S2", "S1"]);

        let allowed = [
            TimeWindow::hm((9, 0), (10, 0)),
            TimeWindow::hm((11, 0), (12, 0)),
            TimeWindow::hm((13, 0), (17, 0)),
        ];
        assert!(!report.alternatives.is_empty());
        for alt in &report.alternatives {
            assert_eq!(alt.window().duration_min(), 60);
            assert_eq!(alt.therapist_id, "T1");
            assert_eq!(alt.room_id, "R2");
            assert!(allowed.iter().any(|w| w.contains_window(&alt.window())));
        }
        assert_eq!(report.alternatives[0].window(), TimeWindow::hm((9, 0), (10, 0)));
        assert_eq!(report.alternatives[0].date, day(1));
    }

    #[test]
    fn test_detection_is_repeatable() {
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((10, 30), (11, 30)));
        let snapshot = vec![existing];
        let avail = vec![availability("T1", 1)];
        let detector = ConflictDetector::default();

        let a = detector.detect_conflicts(&candidate, &snapshot, &avail, &rooms());
        let b = detector.detect_conflicts(&candidate, &snapshot, &avail, &rooms());
        assert_eq!(a, b);
    }

    #[test]
    fn test_clear_placement() {
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((11, 0), (12, 0)));
        let report = ConflictDetector::default().detect_conflicts(
            &candidate,
            &[existing],
            &[availability("T1", 1)],
            &rooms(),
        );
        assert!(report.is_clear());
        assert!(report.alternatives.is_empty());
    }

    #[test]
    fn test_availability_checks() {
        let detector = ConflictDetector::default();
        let avail = [availability("T1", 1)];

        let on_break = session("S1", "ST1", "T1", "R1", TimeWindow::hm((11, 30), (12, 30)));
        let report = detector.detect_conflicts(&on_break, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::BreakOverlap]);

        let late = session("S2", "ST1", "T1", "R1", TimeWindow::hm((16, 30), (17, 30)));
        let report = detector.detect_conflicts(&late, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::OutsideAvailability]);

        let no_record = session("S3", "ST1", "T9", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let report = detector.detect_conflicts(&no_record, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::OutsideAvailability]);
        assert!(report.alternatives.is_empty());
    }

    #[test]
    fn test_max_sessions_per_day() {
        let avail = [availability("T1", 1).with_max_sessions(2)];
        let booked = vec![
            session("S1", "ST1", "T1", "R1", TimeWindow::hm((9, 0), (10, 0))),
            session("S2", "ST2", "T1", "R1", TimeWindow::hm((10, 0), (11, 0))),
        ];
        let candidate = session("S3", "ST3", "T1", "R1", TimeWindow::hm((14, 0), (15, 0)));
        let report = ConflictDetector::default().detect_conflicts(&candidate, &booked, &avail, &rooms());
        assert!(report.kinds().contains(&ConflictKind::MaxSessionsExceeded));
    }

    #[test]
    fn test_room_checks() {
        let detector = ConflictDetector::default();
        let avail = [availability("T1", 1), availability("T2", 1)];
        let existing = session("S1", "ST1", "T2", "R1", TimeWindow::hm((10, 0), (11, 0)));

        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let report = detector.detect_conflicts(&candidate, &[existing.clone()], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::RoomCapacity]);

        let mut group = rooms();
        group[0].capacity = 2;
        let report = detector.detect_conflicts(&candidate, &[existing], &avail, &group);
        assert!(report.is_clear());

        let mut physical = session("S3", "ST3", "T1", "R2", TimeWindow::hm((14, 0), (15, 0)));
        physical.session_type = SessionType::Physical;
        let report = detector.detect_conflicts(&physical, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::RoomUnsupportedType]);

        let nowhere = session("S4", "ST3", "T1", "R9", TimeWindow::hm((14, 0), (15, 0)));
        let report = detector.detect_conflicts(&nowhere, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::UnknownRoom]);
    }

    #[test]
    fn test_student_double_booking() {
        let avail = [availability("T1", 1), availability("T2", 1)];
        let existing = session("S1", "ST1", "T2", "R2", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST1", "T1", "R1", TimeWindow::hm((10, 30), (11, 30)));
        let report = ConflictDetector::default().detect_conflicts(&candidate, &[existing], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::StudentDoubleBooking]);
        assert!(!report.alternatives.is_empty());
    }

    #[test]
    fn test_equipment_checks() {
        let detector = ConflictDetector::default();
        let avail = [availability("T1", 1), availability("T2", 1)];

        let needs_swing = session("S1", "ST1", "T1", "R2", TimeWindow::hm((10, 0), (11, 0)))
            .with_equipment("swing");
        let report = detector.detect_conflicts(&needs_swing, &[], &avail, &rooms());
        assert_eq!(kinds(&report), vec![ConflictKind::EquipmentUnavailable]);

        let mut group = rooms();
        group[0].capacity = 2;
        let holder = session("S2", "ST2", "T2", "R1", TimeWindow::hm((10, 0), (11, 0)))
            .with_equipment("mirror");
        let candidate = session("S3", "ST3", "T1", "R1", TimeWindow::hm((10, 30), (11, 30)))
            .with_equipment("mirror");
        let report = detector.detect_conflicts(&candidate, &[holder], &avail, &group);
        assert_eq!(kinds(&report), vec![ConflictKind::EquipmentInUse]);
    }

    #[test]
    fn test_cancelled_sessions_hold_no_slot() {
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)))
            .with_status(SessionStatus::Cancelled);
        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let report = ConflictDetector::default().detect_conflicts(
            &candidate,
            &[existing],
            &[availability("T1", 1)],
            &rooms(),
        );
        assert!(report.is_clear());
    }

    #[test]
    fn test_alternatives_on_adjacent_day() {
        let full_day = TherapistAvailability::new("T1", day(1), TimeWindow::hm((10, 0), (11, 0)));
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let report = ConflictDetector::default().detect_conflicts(
            &candidate,
            &[existing],
            &[full_day, availability("T1", 2)],
            &rooms(),
        );
        assert!(report.has_blocking());
        assert!(!report.alternatives.is_empty());
        assert!(report.alternatives.iter().all(|p| p.date == day(2)));
    }

    #[test]
    fn test_advisory_preferences() {
        let prefs = OptimizationConstraints::default()
            .with_preferred_window("ST2", TimeWindow::hm((9, 0), (10, 0)))
            .with_back_to_back_avoidance(15);
        let detector = ConflictDetector::default().with_preferences(&prefs);
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let candidate = session("S2", "ST2", "T1", "R1", TimeWindow::hm((11, 0), (12, 0)));

        let report = detector.detect_conflicts(&candidate, &[existing], &[availability("T1", 1)], &rooms());
        assert!(!report.has_blocking());
        assert_eq!(
            kinds(&report),
            vec![ConflictKind::OutsidePreferredWindow, ConflictKind::BackToBack]
        );
        assert!(report.alternatives.is_empty());
    }

    #[test]
    fn test_check_placement() {
        let existing = session("S1", "ST1", "T1", "R1", TimeWindow::hm((10, 0), (11, 0)));
        let moving = session("S2", "ST2", "T1", "R1", TimeWindow::hm((14, 0), (15, 0)));
        let target = moving.placement.starting_at(hm(10, 0));
        let conflicts = ConflictDetector::default().check_placement(
            &moving,
            &target,
            &[existing],
            &[availability("T1", 1)],
            &rooms(),
        );
        assert!(conflicts.iter().any(|c| c.kind == ConflictKind::TherapistDoubleBooking));
    }
}
