//! Proposed schedule model.
//!
//! A proposed schedule maps sessions to placements. It is what the
//! optimizer returns; nothing is applied until the caller commits it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::session::Placement;

/// A session-placement assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionAssignment {
    pub session_id: String,
    /// Denormalized for per-student queries.
    pub student_id: String,
    pub placement: Placement,
}

/// A set of proposed placements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposedSchedule {
    pub assignments: Vec<SessionAssignment>,
}

impl SessionAssignment {
    /// Creates a new assignment.
    pub fn new(
        session_id: impl Into<String>,
        student_id: impl Into<String>,
        placement: Placement,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            student_id: student_id.into(),
            placement,
        }
    }
}

impl ProposedSchedule {
    /// Creates an empty schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an assignment.
    pub fn add(&mut self, assignment: SessionAssignment) {
        self.assignments.push(assignment);
    }

    /// Number of assignments.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// Whether nothing was placed.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Finds the assignment for a session.
    pub fn assignment_for(&self, session_id: &str) -> Option<&SessionAssignment> {
        self.assignments.iter().find(|a| a.session_id == session_id)
    }

    /// All assignments for a therapist.
    pub fn for_therapist(&self, therapist_id: &str) -> Vec<&SessionAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.placement.therapist_id == therapist_id)
            .collect()
    }

    /// All assignments in a room.
    pub fn for_room(&self, room_id: &str) -> Vec<&SessionAssignment> {
        self.assignments
            .iter()
            .filter(|a| a.placement.room_id == room_id)
            .collect()
    }

    /// Session count per therapist.
    pub fn sessions_per_therapist(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for a in &self.assignments {
            *counts.entry(a.placement.therapist_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Pairs of session ids that share a therapist and overlap in time.
    pub fn therapist_overlaps(&self) -> Vec<(String, String)> {
        self.overlapping_pairs(|a, b| a.placement.therapist_id == b.placement.therapist_id)
    }

    /// Pairs of session ids that share a room and overlap in time.
    ///
    /// Meaningful for single-capacity rooms only.
    pub fn room_overlaps(&self) -> Vec<(String, String)> {
        self.overlapping_pairs(|a, b| a.placement.room_id == b.placement.room_id)
    }

    fn overlapping_pairs<F>(&self, same_resource: F) -> Vec<(String, String)>
    where
        F: Fn(&SessionAssignment, &SessionAssignment) -> bool,
    {
        let mut pairs = Vec::new();
        for (i, a) in self.assignments.iter().enumerate() {
            for b in &self.assignments[i + 1..] {
                if same_resource(a, b) && a.placement.overlaps(&b.placement) {
                    pairs.push((a.session_id.clone(), b.session_id.clone()));
                }
            }
        }
        pairs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeWindow;
    use chrono::NaiveDate;

    fn placement(therapist: &str, room: &str, start: i32, end: i32) -> Placement {
        Placement::new(
            therapist,
            room,
            NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(),
            TimeWindow::new(start, end),
        )
    }

    fn sample() -> ProposedSchedule {
        let mut s = ProposedSchedule::new();
        s.add(SessionAssignment::new("S1", "ST1", placement("T1", "R1", 540, 600)));
        s.add(SessionAssignment::new("S2", "ST2", placement("T1", "R2", 600, 660)));
        s.add(SessionAssignment::new("S3", "ST3", placement("T2", "R1", 570, 630)));
        s
    }

    #[test]
    fn test_lookup() {
        let s = sample();
        assert_eq!(s.len(), 3);
        assert_eq!(s.assignment_for("S2").unwrap().placement.room_id, "R2");
        assert!(s.assignment_for("S9").is_none());
        assert_eq!(s.for_therapist("T1").len(), 2);
        assert_eq!(s.for_room("R1").len(), 2);
    }

    #[test]
    fn test_sessions_per_therapist() {
        let counts = sample().sessions_per_therapist();
        assert_eq!(counts["T1"], 2);
        assert_eq!(counts["T2"], 1);
    }

    #[test]
    fn test_overlap_detection() {
        let s = sample();
        assert!(s.therapist_overlaps().is_empty()); // touching, not overlapping
        assert_eq!(s.room_overlaps(), vec![("S1".to_string(), "S3".to_string())]);
    }
}
