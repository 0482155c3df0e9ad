//! Subscription freeze model.
//!
//! A freeze pauses one student's program for `[start_date, end_date)`.
//! The end date is exclusive, so the freeze lasts `end - start` days.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::calendar::DateRange;

/// What happens to sessions inside the freeze window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeStrategy {
    /// Move sessions past the freeze and push the program end date.
    #[default]
    ExtendProgram,
    /// Cancel sessions; the program end date stays.
    SkipSessions,
}

/// Freeze lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreezeStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Cancelled,
}

impl FreezeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Request to freeze a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FreezeRequest {
    pub subscription_id: String,
    pub student_id: String,
    #[serde(default)]
    pub reason: String,
    /// First frozen day.
    pub start_date: NaiveDate,
    /// First day after the freeze.
    pub end_date: NaiveDate,
    #[serde(default)]
    pub strategy: FreezeStrategy,
    /// Program end date before the freeze.
    pub program_end_date: NaiveDate,
    /// Price of one session, for skip credits.
    #[serde(default)]
    pub session_rate: Option<f64>,
}

impl FreezeRequest {
    pub fn new(
        subscription_id: impl Into<String>,
        student_id: impl Into<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
        program_end_date: NaiveDate,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            student_id: student_id.into(),
            reason: String::new(),
            start_date,
            end_date,
            strategy: FreezeStrategy::ExtendProgram,
            program_end_date,
            session_rate: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_strategy(mut self, strategy: FreezeStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_session_rate(mut self, rate: f64) -> Self {
        self.session_rate = Some(rate);
        self
    }

    /// Frozen duration in days.
    pub fn freeze_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }

    /// Whether `date` is frozen.
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date < self.end_date
    }

    /// Frozen days as an inclusive range. `None` for an empty freeze.
    pub fn frozen_range(&self) -> Option<DateRange> {
        self.end_date
            .pred_opt()
            .map(|last| DateRange::new(self.start_date, last))
            .filter(DateRange::is_well_formed)
    }
}

/// Computed consequences of a freeze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    /// Sessions of the student inside the freeze window.
    pub affected_session_ids: Vec<String>,
    pub affected_session_count: usize,
    pub freeze_days: i64,
    pub new_program_end_date: NaiveDate,
    /// Negative for a credit.
    pub cost_adjustment: f64,
    /// Session-count change per therapist (negative = freed).
    pub therapist_workload_delta: BTreeMap<String, i64>,
}

/// A persisted freeze.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionFreeze {
    pub id: String,
    pub subscription_id: String,
    pub student_id: String,
    pub reason: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub strategy: FreezeStrategy,
    pub status: FreezeStatus,
    pub impact: ImpactAnalysis,
    /// The bulk operation that moved or cancelled the affected sessions.
    #[serde(default)]
    pub bulk_operation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionFreeze {
    /// A pending freeze for `request`.
    pub fn from_request(request: &FreezeRequest, impact: ImpactAnalysis) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: request.subscription_id.clone(),
            student_id: request.student_id.clone(),
            reason: request.reason.clone(),
            start_date: request.start_date,
            end_date: request.end_date,
            strategy: request.strategy,
            status: FreezeStatus::Pending,
            impact,
            bulk_operation_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the freeze still blocks other freezes.
    pub fn is_live(&self) -> bool {
        matches!(self.status, FreezeStatus::Pending | FreezeStatus::Active)
    }

    /// Half-open overlap with another freeze period.
    pub fn overlaps(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.start_date < end && start < self.end_date
    }

    pub fn set_status(&mut self, status: FreezeStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
