//! Subscription freeze planning.
//!
//! # Lifecycle
//!
//! ```text
//! pending → active → completed
//!    ↘        ↘
//!     cancelled (bulk changes rolled back)
//! ```
//!
//! A freeze is stored `pending`, then its affected sessions are handed to
//! the bulk coordinator: shifted past the freeze (`extend_program`) or
//! cancelled (`skip_sessions`). Once that operation reaches a terminal state
//! the freeze becomes `active`.
//!
//! A request overlapping any non-cancelled freeze of the same subscription
//! is rejected before any session is touched. Completed freezes still hold
//! their dates.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::bulk::{BulkCoordinator, BulkOperationResult, RollbackResult};
use crate::error::{Error, Result};
use crate::models::{
    BulkOperationKind, BulkReschedulingOperation, FreezeRequest, FreezeStatus, FreezeStrategy,
    ImpactAnalysis, Session, SubscriptionFreeze,
};
use crate::ports::{PortError, ScheduleStore};
use crate::retry::RetryPolicy;
use crate::validation::{ValidationError, ValidationErrorKind};

/// Result of [`FreezePlanner::freeze_subscription`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeResult {
    /// True when every affected session was handled.
    pub success: bool,
    pub freeze: SubscriptionFreeze,
    /// Absent when no session was affected.
    pub bulk: Option<BulkOperationResult>,
}

/// Result of [`FreezePlanner::cancel_freeze`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelFreezeResult {
    pub freeze: SubscriptionFreeze,
    pub rollback: Option<RollbackResult>,
}

/// Plans and applies subscription freezes.
pub struct FreezePlanner {
    store: Arc<dyn ScheduleStore>,
    coordinator: Arc<BulkCoordinator>,
    retry: RetryPolicy,
}

impl FreezePlanner {
    pub fn new(store: Arc<dyn ScheduleStore>, coordinator: Arc<BulkCoordinator>) -> Self {
        Self {
            store,
            coordinator,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Affected sessions, new program end date, cost and workload change.
    pub async fn calculate_impact_analysis(&self, request: &FreezeRequest) -> Result<ImpactAnalysis> {
        validate_request(request)?;
        let Some(range) = request.frozen_range() else {
            return Err(Error::validation(empty_freeze()));
        };

        let sessions = self
            .retry
            .run("student sessions", || {
                self.store.sessions_for_student(&request.student_id, range)
            })
            .await?;
        Ok(analyze_impact(request, sessions))
    }

    /// Stores the freeze and moves or cancels its affected sessions.
    ///
    /// # Errors
    /// [`Error::FreezeOverlap`] when a non-cancelled freeze of the same
    /// subscription overlaps; validation and store errors otherwise.
    pub async fn freeze_subscription(&self, request: FreezeRequest) -> Result<FreezeResult> {
        validate_request(&request)?;
        let existing = self
            .retry
            .run("subscription freezes", || {
                self.store.freezes_for_subscription(&request.subscription_id)
            })
            .await?;
        if let Some(clash) = existing
            .iter()
            .find(|f| f.status != FreezeStatus::Cancelled && f.overlaps(request.start_date, request.end_date))
        {
            warn!(subscription_id = %request.subscription_id, existing = %clash.id, "overlapping freeze rejected");
            return Err(Error::FreezeOverlap {
                subscription_id: request.subscription_id.clone(),
                existing: clash.id.clone(),
            });
        }

        let impact = self.calculate_impact_analysis(&request).await?;
        let mut freeze = SubscriptionFreeze::from_request(&request, impact);
        self.save(&freeze).await?;
        info!(
            freeze_id = %freeze.id,
            subscription_id = %freeze.subscription_id,
            affected = freeze.impact.affected_session_count,
            strategy = ?freeze.strategy,
            "freeze created"
        );

        if freeze.impact.affected_session_ids.is_empty() {
            freeze.set_status(FreezeStatus::Active);
            self.save(&freeze).await?;
            return Ok(FreezeResult {
                success: true,
                freeze,
                bulk: None,
            });
        }

        let kind = match (request.strategy, request.frozen_range()) {
            (FreezeStrategy::ExtendProgram, Some(source)) => {
                let target = source
                    .shifted(freeze.impact.freeze_days)
                    .ok_or_else(|| Error::Validation(vec![beyond_calendar()]))?;
                BulkOperationKind::RescheduleRange { source, target }
            }
            (FreezeStrategy::SkipSessions, _) | (_, None) => BulkOperationKind::CancelSessions {
                reason: format!("subscription freeze {}", freeze.id),
            },
        };
        let operation = BulkReschedulingOperation::new(kind, freeze.impact.affected_session_ids.clone());
        freeze.bulk_operation_id = Some(operation.id.clone());
        self.save(&freeze).await?;

        let bulk = match self.coordinator.process_bulk_operation(operation, None).await {
            Ok(bulk) => bulk,
            Err(err) => {
                freeze.set_status(FreezeStatus::Cancelled);
                self.save(&freeze).await?;
                return Err(err);
            }
        };

        freeze.set_status(FreezeStatus::Active);
        self.save(&freeze).await?;
        info!(
            freeze_id = %freeze.id,
            successful = bulk.progress.successful,
            failed = bulk.progress.failed,
            "freeze active"
        );
        Ok(FreezeResult {
            success: bulk.success,
            freeze,
            bulk: Some(bulk),
        })
    }

    /// Cancels a live freeze, rolling back the sessions it changed.
    pub async fn cancel_freeze(&self, freeze_id: &str) -> Result<CancelFreezeResult> {
        let mut freeze = self.load(freeze_id).await?;
        if !freeze.is_live() {
            return Err(invalid_state(&freeze, "cancelled"));
        }
        let rollback = match &freeze.bulk_operation_id {
            Some(operation_id) => Some(self.coordinator.rollback_changes(operation_id).await?),
            None => None,
        };
        freeze.set_status(FreezeStatus::Cancelled);
        self.save(&freeze).await?;
        info!(freeze_id, "freeze cancelled");
        Ok(CancelFreezeResult { freeze, rollback })
    }

    /// Marks an active freeze completed.
    pub async fn complete_freeze(&self, freeze_id: &str) -> Result<SubscriptionFreeze> {
        let mut freeze = self.load(freeze_id).await?;
        if freeze.status != FreezeStatus::Active {
            return Err(invalid_state(&freeze, "completed"));
        }
        freeze.set_status(FreezeStatus::Completed);
        self.save(&freeze).await?;
        info!(freeze_id, "freeze completed");
        Ok(freeze)
    }

    async fn load(&self, freeze_id: &str) -> Result<SubscriptionFreeze> {
        self.retry
            .run("load freeze", || self.store.freeze(freeze_id))
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => Error::not_found("freeze", freeze_id),
                other => Error::Port(other),
            })
    }

    async fn save(&self, freeze: &SubscriptionFreeze) -> Result<()> {
        self.retry
            .run("save freeze", || self.store.save_freeze(freeze.clone()))
            .await
            .map_err(Error::Port)
    }
}

/// Impact of `request` on `sessions`.
///
/// Only active sessions of the request's student dated inside the freeze
/// window count; everything else in `sessions` is ignored.
pub fn analyze_impact(request: &FreezeRequest, mut sessions: Vec<Session>) -> ImpactAnalysis {
    sessions.retain(|s| s.student_id == request.student_id && s.is_active() && request.covers(s.date()));
    sessions.sort_by(|a, b| {
        (a.date(), a.window().start_min, &a.id).cmp(&(b.date(), b.window().start_min, &b.id))
    });

    let mut therapist_workload_delta: BTreeMap<String, i64> = BTreeMap::new();
    for s in &sessions {
        *therapist_workload_delta
            .entry(s.therapist_id().to_string())
            .or_insert(0) -= 1;
    }

    let freeze_days = request.freeze_days();
    let count = sessions.len();
    let (new_program_end_date, cost_adjustment) = match request.strategy {
        FreezeStrategy::ExtendProgram => (
            request
                .program_end_date
                .checked_add_signed(Duration::days(freeze_days))
                .unwrap_or(NaiveDate::MAX),
            0.0,
        ),
        FreezeStrategy::SkipSessions => (
            request.program_end_date,
            -(count as f64) * request.session_rate.unwrap_or(0.0),
        ),
    };

    ImpactAnalysis {
        affected_session_ids: sessions.into_iter().map(|s| s.id).collect(),
        affected_session_count: count,
        freeze_days,
        new_program_end_date,
        cost_adjustment,
        therapist_workload_delta,
    }
}

fn invalid_state(freeze: &SubscriptionFreeze, action: &'static str) -> Error {
    Error::InvalidState {
        entity: "freeze",
        id: freeze.id.clone(),
        action,
        status: freeze.status.as_str().to_string(),
    }
}

fn empty_freeze() -> ValidationError {
    ValidationError::new(
        ValidationErrorKind::InvalidDateRange,
        "freeze end date must be after its start date",
    )
}

fn beyond_calendar() -> ValidationError {
    ValidationError::new(
        ValidationErrorKind::OutOfRange,
        "extending the program past the freeze leaves the calendar",
    )
}

pub(crate) fn validate_request(request: &FreezeRequest) -> Result<()> {
    let mut errors = Vec::new();
    if request.subscription_id.is_empty() {
        errors.push(ValidationError::new(ValidationErrorKind::MissingField, "subscription_id is empty"));
    }
    if request.student_id.is_empty() {
        errors.push(ValidationError::new(ValidationErrorKind::MissingField, "student_id is empty"));
    }
    if request.freeze_days() <= 0 {
        errors.push(empty_freeze());
    } else if request.strategy == FreezeStrategy::ExtendProgram {
        let by = Duration::days(request.freeze_days());
        let fits = request.program_end_date.checked_add_signed(by).is_some()
            && request.frozen_range().is_none_or(|r| r.shifted(request.freeze_days()).is_some());
        if !fits {
            errors.push(beyond_calendar());
        }
    }
    if request.session_rate.is_some_and(|r| r < 0.0 || !r.is_finite()) {
        errors.push(ValidationError::new(
            ValidationErrorKind::OutOfRange,
            "session_rate must be a non-negative number",
        ));
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}
