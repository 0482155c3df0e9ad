//! Bulk rescheduling operation record.
//!
//! # State machine
//!
//! ```text
//! pending → in_progress → completed | failed
//!                          completed | failed → rolled_back
//! ```
//!
//! The record carries everything needed to undo it: each applied change keeps
//! the full placement before and after, plus the status the session had.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::calendar::DateRange;
use super::session::{Placement, Session, SessionStatus};
use crate::conflict::Conflict;
use crate::error::{Error, Result};

/// What a bulk operation does to each affected session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BulkOperationKind {
    /// Shift sessions from `source` into `target` by the distance between
    /// the two range starts.
    RescheduleRange { source: DateRange, target: DateRange },
    /// Hand sessions over to another therapist, same slot.
    RescheduleTherapist {
        from_therapist_id: String,
        to_therapist_id: String,
    },
    /// Any feasible slot within `max_day_offset` days, optionally with a
    /// replacement therapist.
    EmergencyReschedule {
        max_day_offset: u32,
        #[serde(default)]
        replacement_therapist_id: Option<String>,
        reason: String,
    },
    /// Cancel sessions in place (soft lifecycle).
    CancelSessions { reason: String },
}

impl BulkOperationKind {
    /// Short name used in logs and results.
    pub fn name(&self) -> &'static str {
        match self {
            Self::RescheduleRange { .. } => "reschedule_range",
            Self::RescheduleTherapist { .. } => "reschedule_therapist",
            Self::EmergencyReschedule { .. } => "emergency_reschedule",
            Self::CancelSessions { .. } => "cancel_sessions",
        }
    }

    /// Days between the source and target range starts.
    pub fn day_shift(&self) -> i64 {
        match self {
            Self::RescheduleRange { source, target } => (target.start - source.start).num_days(),
            _ => 0,
        }
    }

    /// Whether the operation prefers any feasible slot over quality.
    pub fn is_emergency(&self) -> bool {
        matches!(self, Self::EmergencyReschedule { .. })
    }

    /// The dates a session may land on when its direct move conflicts.
    pub fn search_dates(&self, session: &Session) -> Vec<NaiveDate> {
        match self {
            Self::RescheduleRange { target, .. } => target.iter().collect(),
            Self::EmergencyReschedule { max_day_offset, .. } => {
                let offset = i64::from(*max_day_offset);
                (-offset..=offset)
                    .filter_map(|d| session.date().checked_add_signed(Duration::days(d)))
                    .collect()
            }
            Self::RescheduleTherapist { .. } | Self::CancelSessions { .. } => vec![session.date()],
        }
    }
}

/// Operation lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkOperationStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl BulkOperationStatus {
    /// Whether processing has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::RolledBack)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

/// Incremental progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub total: usize,
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
}

/// Per-session result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: String,
    pub success: bool,
    /// Placement after the change, when one was applied.
    #[serde(default)]
    pub new_placement: Option<Placement>,
    /// Why the session could not be changed.
    #[serde(default)]
    pub reason: Option<String>,
    /// Blocking conflicts that prevented the change.
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

impl SessionOutcome {
    pub fn succeeded(session_id: impl Into<String>, placement: Placement) -> Self {
        Self {
            session_id: session_id.into(),
            success: true,
            new_placement: Some(placement),
            reason: None,
            conflicts: Vec::new(),
        }
    }

    pub fn failed(session_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            success: false,
            new_placement: None,
            reason: Some(reason.into()),
            conflicts: Vec::new(),
        }
    }

    pub fn with_conflicts(mut self, conflicts: Vec<Conflict>) -> Self {
        self.conflicts = conflicts;
        self
    }
}

/// A change the operation applied to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    pub session_id: String,
    pub before: Placement,
    pub after: Placement,
    pub previous_status: SessionStatus,
    pub new_status: SessionStatus,
}

/// A session rollback could not restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotReverted {
    pub session_id: String,
    pub reason: String,
}

/// Outcome of an explicit rollback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackSummary {
    /// Sessions restored to their pre-operation placement.
    pub reverted: Vec<String>,
    pub not_reverted: Vec<NotReverted>,
    pub rolled_back_at: DateTime<Utc>,
}

/// A batch change across many sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkReschedulingOperation {
    pub id: String,
    pub kind: BulkOperationKind,
    pub session_ids: Vec<String>,
    pub status: BulkOperationStatus,
    pub progress: BulkProgress,
    /// Blocking conflicts of every failed item.
    pub conflicts: Vec<Conflict>,
    pub outcomes: Vec<SessionOutcome>,
    pub changes: Vec<AppliedChange>,
    /// Processing budget; items left when it expires fail.
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    #[serde(default)]
    pub deadline_reached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub rollback: Option<RollbackSummary>,
}

impl BulkReschedulingOperation {
    /// Creates a pending operation with a fresh id.
    pub fn new(kind: BulkOperationKind, session_ids: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            progress: BulkProgress {
                total: session_ids.len(),
                ..BulkProgress::default()
            },
            session_ids,
            status: BulkOperationStatus::Pending,
            conflicts: Vec::new(),
            outcomes: Vec::new(),
            changes: Vec::new(),
            time_budget_ms: None,
            deadline_reached: false,
            created_at: now,
            updated_at: now,
            rollback: None,
        }
    }

    /// Sets the processing budget.
    pub fn with_time_budget(mut self, budget_ms: u64) -> Self {
        self.time_budget_ms = Some(budget_ms);
        self
    }

    /// `pending → in_progress`.
    pub fn start(&mut self) -> Result<()> {
        if self.status != BulkOperationStatus::Pending {
            return Err(self.invalid_state("started"));
        }
        self.status = BulkOperationStatus::InProgress;
        self.touch();
        Ok(())
    }

    /// Records a successful item together with the change it applied.
    pub fn record_success(&mut self, outcome: SessionOutcome, change: AppliedChange) {
        self.progress.processed += 1;
        self.progress.successful += 1;
        self.outcomes.push(outcome);
        self.changes.push(change);
        self.touch();
    }

    /// Records a failed item.
    pub fn record_failure(&mut self, outcome: SessionOutcome) {
        self.progress.processed += 1;
        self.progress.failed += 1;
        self.conflicts.extend(outcome.conflicts.iter().cloned());
        self.outcomes.push(outcome);
        self.touch();
    }

    /// `in_progress → completed | failed`.
    pub fn finish(&mut self) {
        self.status = if self.progress.failed == 0 {
            BulkOperationStatus::Completed
        } else {
            BulkOperationStatus::Failed
        };
        self.touch();
    }

    /// Checks that the operation may be rolled back.
    pub fn ensure_rollbackable(&self) -> Result<()> {
        match self.status {
            BulkOperationStatus::Completed | BulkOperationStatus::Failed => Ok(()),
            _ => Err(self.invalid_state("rolled back")),
        }
    }

    /// `completed | failed → rolled_back`.
    ///
    /// Reverted items no longer count as successful.
    pub fn mark_rolled_back(&mut self, summary: RollbackSummary) {
        self.progress.successful = self
            .progress
            .successful
            .saturating_sub(summary.reverted.len());
        for outcome in &mut self.outcomes {
            if summary.reverted.contains(&outcome.session_id) {
                outcome.success = false;
                outcome.reason = Some("rolled back".into());
            }
        }
        self.status = BulkOperationStatus::RolledBack;
        self.rollback = Some(summary);
        self.touch();
    }

    /// Ids of sessions this operation changed.
    pub fn successful_session_ids(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.session_id.as_str()).collect()
    }

    fn invalid_state(&self, action: &'static str) -> Error {
        Error::InvalidState {
            entity: "bulk operation",
            id: self.id.clone(),
            action,
            status: self.status.as_str().to_string(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SessionType, TimeWindow};

    fn date(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn placement(d: u32) -> Placement {
        Placement::new("T1", "R1", date(9, d), TimeWindow::hm((10, 0), (11, 0)))
    }

    fn change(id: &str) -> AppliedChange {
        AppliedChange {
            session_id: id.into(),
            before: placement(15),
            after: placement(16),
            previous_status: SessionStatus::Scheduled,
            new_status: SessionStatus::Rescheduled,
        }
    }

    fn range_kind() -> BulkOperationKind {
        BulkOperationKind::RescheduleRange {
            source: DateRange::new(date(9, 15), date(9, 20)),
            target: DateRange::new(date(10, 1), date(10, 6)),
        }
    }

    #[test]
    fn test_new_operation() {
        let op = BulkReschedulingOperation::new(range_kind(), vec!["S1".into(), "S2".into()]);
        assert_eq!(op.status, BulkOperationStatus::Pending);
        assert_eq!(op.progress.total, 2);
        assert_eq!(op.kind.day_shift(), 16);
        assert_eq!(op.kind.name(), "reschedule_range");
    }

    #[test]
    fn test_lifecycle_with_failure() {
        let mut op = BulkReschedulingOperation::new(range_kind(), vec!["S1".into(), "S2".into()]);
        op.start().unwrap();
        assert!(op.start().is_err());
        op.record_success(SessionOutcome::succeeded("S1", placement(16)), change("S1"));
        op.record_failure(SessionOutcome::failed("S2", "no slot"));
        op.finish();

        assert_eq!(op.status, BulkOperationStatus::Failed);
        assert_eq!(op.progress.processed, 2);
        assert_eq!(op.progress.successful, 1);
        assert_eq!(op.progress.failed, 1);
        assert_eq!(op.successful_session_ids(), vec!["S1"]);
    }

    #[test]
    fn test_rollback_state() {
        let mut op = BulkReschedulingOperation::new(range_kind(), vec!["S1".into()]);
        assert!(op.ensure_rollbackable().is_err());
        op.start().unwrap();
        op.record_success(SessionOutcome::succeeded("S1", placement(16)), change("S1"));
        op.finish();
        assert!(op.ensure_rollbackable().is_ok());

        op.mark_rolled_back(RollbackSummary {
            reverted: vec!["S1".into()],
            not_reverted: Vec::new(),
            rolled_back_at: Utc::now(),
        });
        assert_eq!(op.status, BulkOperationStatus::RolledBack);
        assert_eq!(op.progress.successful, 0);
        assert!(!op.outcomes[0].success);
        assert!(op.ensure_rollbackable().is_err());
    }

    #[test]
    fn test_emergency_search_dates() {
        let kind = BulkOperationKind::EmergencyReschedule {
            max_day_offset: 2,
            replacement_therapist_id: None,
            reason: "sick leave".into(),
        };
        let s = Session::new("S1", "ST1", SessionType::Speech, placement(15));
        let dates = kind.search_dates(&s);
        assert_eq!(dates.len(), 5);
        assert_eq!(dates[0], date(9, 13));
        assert!(kind.is_emergency());
    }

    #[test]
    fn test_emergency_search_dates_stop_at_calendar_edge() {
        let kind = BulkOperationKind::EmergencyReschedule {
            max_day_offset: 3,
            replacement_therapist_id: None,
            reason: "sick leave".into(),
        };
        let mut s = Session::new("S1", "ST1", SessionType::Speech, placement(15));
        s.placement.date = NaiveDate::MAX;
        let dates = kind.search_dates(&s);
        assert_eq!(dates.len(), 4);
        assert_eq!(dates.last(), Some(&NaiveDate::MAX));
    }

    #[test]
    fn test_kind_json_tag() {
        let json = serde_json::to_value(range_kind()).unwrap();
        assert_eq!(json["type"], "reschedule_range");
    }
}
