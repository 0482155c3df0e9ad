//! Optimization constraints and objective weights.
//!
//! [`OptimizationConstraints`] is an immutable value object handed to one
//! optimization run. Every recognized option is a named field; unknown or
//! missing keys are rejected when the record is deserialized, and
//! [`OptimizationConstraints::validate`] rejects out-of-range values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::calendar::TimeWindow;
use crate::error::{Error, Result};

/// Tolerance on the sum of objective weights.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Therapist-side rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TherapistConstraints {
    /// Session cap applied on top of each availability record's own cap.
    pub max_sessions_per_day: u32,
    /// Minimum idle time between two sessions when back-to-back is avoided.
    pub break_duration_min: i32,
    /// Prefer a break between consecutive sessions.
    pub avoid_back_to_back: bool,
}

/// Student-side preferences, keyed by student id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StudentConstraints {
    /// Windows the student prefers. No entry = no preference.
    pub preferred_windows: BTreeMap<String, Vec<TimeWindow>>,
    /// Windows the student wants to avoid.
    pub avoid_windows: BTreeMap<String, Vec<TimeWindow>>,
    /// Minimum idle time between two sessions of one student on one day.
    pub min_gap_between_sessions_min: i32,
}

/// Facility-side rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FacilityConstraints {
    /// Enforce room capacity (otherwise rooms are treated as unlimited).
    pub enforce_room_capacity: bool,
    /// Enforce equipment availability.
    pub enforce_equipment: bool,
}

/// Priority weights of the objective. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObjectiveWeights {
    /// Workload balance and back-to-back avoidance.
    pub therapist_preference: f64,
    /// Sessions inside preferred windows, outside avoided ones.
    pub student_preference: f64,
    /// Therapist utilization (few idle gaps between sessions).
    pub efficiency: f64,
    /// Student idle time between sessions on the same day.
    pub cost: f64,
}

impl ObjectiveWeights {
    /// Equal weights.
    pub fn balanced() -> Self {
        Self {
            therapist_preference: 0.25,
            student_preference: 0.25,
            efficiency: 0.25,
            cost: 0.25,
        }
    }

    /// Sum of all weights.
    pub fn sum(&self) -> f64 {
        self.therapist_preference + self.student_preference + self.efficiency + self.cost
    }

    fn values(&self) -> [(&'static str, f64); 4] {
        [
            ("therapist_preference", self.therapist_preference),
            ("student_preference", self.student_preference),
            ("efficiency", self.efficiency),
            ("cost", self.cost),
        ]
    }
}

/// All inputs that shape one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConstraints {
    pub therapist: TherapistConstraints,
    pub student: StudentConstraints,
    pub facility: FacilityConstraints,
    pub weights: ObjectiveWeights,
}

impl Default for OptimizationConstraints {
    fn default() -> Self {
        Self {
            therapist: TherapistConstraints {
                max_sessions_per_day: 8,
                break_duration_min: 0,
                avoid_back_to_back: false,
            },
            student: StudentConstraints {
                preferred_windows: BTreeMap::new(),
                avoid_windows: BTreeMap::new(),
                min_gap_between_sessions_min: 0,
            },
            facility: FacilityConstraints {
                enforce_room_capacity: true,
                enforce_equipment: true,
            },
            weights: ObjectiveWeights::balanced(),
        }
    }
}

impl OptimizationConstraints {
    /// Parses and validates a JSON constraints record.
    pub fn from_json(json: &str) -> Result<Self> {
        let constraints: Self = serde_json::from_str(json)?;
        constraints.validate()?;
        Ok(constraints)
    }

    /// Sets the objective weights.
    pub fn with_weights(mut self, weights: ObjectiveWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Adds a preferred window for a student.
    pub fn with_preferred_window(mut self, student_id: impl Into<String>, window: TimeWindow) -> Self {
        self.student
            .preferred_windows
            .entry(student_id.into())
            .or_default()
            .push(window);
        self
    }

    /// Adds a window a student wants to avoid.
    pub fn with_avoid_window(mut self, student_id: impl Into<String>, window: TimeWindow) -> Self {
        self.student
            .avoid_windows
            .entry(student_id.into())
            .or_default()
            .push(window);
        self
    }

    /// Asks for breaks between consecutive sessions.
    pub fn with_back_to_back_avoidance(mut self, break_duration_min: i32) -> Self {
        self.therapist.avoid_back_to_back = true;
        self.therapist.break_duration_min = break_duration_min;
        self
    }

    /// Checks value ranges and the weight sum.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.weights.values() {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConstraints(format!(
                    "weight '{name}' must be a non-negative number, got {value}"
                )));
            }
        }
        let sum = self.weights.sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::InvalidConstraints(format!(
                "objective weights must sum to 1.0, got {sum}"
            )));
        }
        if self.therapist.max_sessions_per_day == 0 {
            return Err(Error::InvalidConstraints(
                "therapist.max_sessions_per_day must be at least 1".into(),
            ));
        }
        if self.therapist.break_duration_min < 0 || self.student.min_gap_between_sessions_min < 0 {
            return Err(Error::InvalidConstraints(
                "break and gap durations must not be negative".into(),
            ));
        }
        let windows = self
            .student
            .preferred_windows
            .iter()
            .chain(self.student.avoid_windows.iter());
        for (student_id, list) in windows {
            if let Some(bad) = list.iter().find(|w| !w.is_well_formed()) {
                return Err(Error::InvalidConstraints(format!(
                    "window {bad} for student '{student_id}' is malformed"
                )));
            }
        }
        Ok(())
    }

    /// Preferred windows for a student (empty = no preference).
    pub fn preferred_for(&self, student_id: &str) -> &[TimeWindow] {
        self.student
            .preferred_windows
            .get(student_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Avoided windows for a student.
    pub fn avoided_for(&self, student_id: &str) -> &[TimeWindow] {
        self.student
            .avoid_windows
            .get(student_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Preference satisfaction of one interval for a student, in [0, 1].
    ///
    /// 0 if it touches an avoided window; otherwise 1 if the student has no
    /// preferred windows or the interval lies inside one, else 0.
    pub fn preference_score(&self, student_id: &str, interval: &TimeWindow) -> f64 {
        if self.avoided_for(student_id).iter().any(|w| w.overlaps(interval)) {
            return 0.0;
        }
        let preferred = self.preferred_for(student_id);
        if preferred.is_empty() || preferred.iter().any(|w| w.contains_window(interval)) {
            1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(OptimizationConstraints::default().validate().is_ok());
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let c = OptimizationConstraints::default().with_weights(ObjectiveWeights {
            therapist_preference: 0.5,
            student_preference: 0.5,
            efficiency: 0.5,
            cost: 0.0,
        });
        let err = c.validate().unwrap_err();
        assert!(matches!(err, Error::InvalidConstraints(_)));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let c = OptimizationConstraints::default().with_weights(ObjectiveWeights {
            therapist_preference: 1.2,
            student_preference: -0.2,
            efficiency: 0.0,
            cost: 0.0,
        });
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let mut json = serde_json::to_value(OptimizationConstraints::default()).unwrap();
        json["facility"]["parking_spaces"] = serde_json::json!(4);
        let err = OptimizationConstraints::from_json(&json.to_string()).unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_missing_key_rejected() {
        let mut json = serde_json::to_value(OptimizationConstraints::default()).unwrap();
        json.as_object_mut().unwrap().remove("weights");
        assert!(OptimizationConstraints::from_json(&json.to_string()).is_err());
    }

    #[test]
    fn test_round_trip_through_json() {
        let c = OptimizationConstraints::default()
            .with_preferred_window("ST1", TimeWindow::hm((9, 0), (12, 0)));
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(OptimizationConstraints::from_json(&json).unwrap(), c);
    }

    #[test]
    fn test_preference_score() {
        let c = OptimizationConstraints::default()
            .with_preferred_window("ST1", TimeWindow::hm((9, 0), (12, 0)))
            .with_avoid_window("ST2", TimeWindow::hm((15, 0), (17, 0)));

        let morning = TimeWindow::hm((10, 0), (11, 0));
        let afternoon = TimeWindow::hm((15, 30), (16, 30));
        assert!((c.preference_score("ST1", &morning) - 1.0).abs() < 1e-10);
        assert!((c.preference_score("ST1", &afternoon) - 0.0).abs() < 1e-10);
        assert!((c.preference_score("ST2", &afternoon) - 0.0).abs() < 1e-10);
        assert!((c.preference_score("ST3", &afternoon) - 1.0).abs() < 1e-10);
    }
}
