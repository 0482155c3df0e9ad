//! Bulk operation processing and rollback.
//!
//! # Processing
//!
//! For each session, in the order given:
//! 1. Compute the direct target placement from the operation kind. A session
//!    whose stored copy changed since it was loaded is not touched.
//! 2. Check it against a fresh read of the affected dates.
//! 3. On a blocking conflict, search a single-session slot (first feasible
//!    for emergencies, best preference otherwise).
//! 4. Write the session and append the change to the undo log, or record
//!    the failure with its conflicts.
//!
//! The operation record is saved after every item so callers can poll it.
//! All `(therapist, date)` pairs the operation may touch are locked for its
//! whole run; operations on disjoint pairs run concurrently. Sessions are
//! read once to find those pairs and again once they are held.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{BulkConfig, BulkOperationResult, RollbackResult};
use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, DetectorConfig};
use crate::error::{Error, Result};
use crate::locks::{LockKey, ScheduleLocks};
use crate::models::{
    AppliedChange, BulkOperationKind, BulkProgress, BulkReschedulingOperation, DateRange,
    NotReverted, OptimizationConstraints, Placement, RollbackSummary, Session, SessionOutcome,
    SessionStatus, TherapistAvailability, TherapyRoom,
};
use crate::optimizer::{Deadline, ScheduleOptimizer, SlotSearch};
use crate::ports::{PortError, ScheduleStore};
use crate::retry::{describe, RetryPolicy};
use crate::validation::{ValidationError, ValidationErrorKind};

/// Reason recorded for items left when the time budget runs out.
const DEADLINE_EXCEEDED: &str = "deadline_exceeded";

const CHANGED_CONCURRENTLY: &str = "session changed concurrently";

/// Applies bulk operations against a store.
pub struct BulkCoordinator {
    store: Arc<dyn ScheduleStore>,
    locks: ScheduleLocks,
    detector: ConflictDetector,
    optimizer: ScheduleOptimizer,
    constraints: OptimizationConstraints,
    retry: RetryPolicy,
    config: BulkConfig,
}

/// Availability and rooms around an operation, read once.
struct Snapshot {
    range: DateRange,
    availabilities: Vec<TherapistAvailability>,
    rooms: Vec<TherapyRoom>,
}

impl BulkCoordinator {
    pub fn new(store: Arc<dyn ScheduleStore>, locks: ScheduleLocks) -> Self {
        Self::from_config(store, locks, &EngineConfig::default())
    }

    pub fn from_config(store: Arc<dyn ScheduleStore>, locks: ScheduleLocks, config: &EngineConfig) -> Self {
        let constraints = OptimizationConstraints::default();
        Self {
            store,
            locks,
            detector: detector_for(&config.detector, &constraints),
            optimizer: ScheduleOptimizer::from_config(config),
            constraints,
            retry: config.retry.clone(),
            config: config.bulk.clone(),
        }
    }

    /// Rules used when checking and searching slots.
    pub fn with_constraints(mut self, constraints: OptimizationConstraints) -> Self {
        self.detector = detector_for(self.detector.config(), &constraints);
        self.constraints = constraints;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Processes every session of `operation`.
    ///
    /// Per-session failures are reported in the result; `Err` means the
    /// operation itself was malformed, not pending, or could not be stored
    /// before any session was touched.
    pub async fn process_bulk_operation(
        &self,
        mut operation: BulkReschedulingOperation,
        progress: Option<&watch::Sender<BulkProgress>>,
    ) -> Result<BulkOperationResult> {
        validate_operation(&operation, &self.config)?;
        operation.start()?;
        self.save(&operation).await?;
        info!(
            operation_id = %operation.id,
            kind = operation.kind.name(),
            sessions = operation.session_ids.len(),
            "bulk operation started"
        );

        let budget = operation.time_budget_ms.or(if operation.kind.is_emergency() {
            Some(self.config.emergency_time_budget_ms)
        } else {
            None
        });
        let deadline = Deadline::new(budget);

        let mut sessions = Vec::new();
        for id in operation.session_ids.clone() {
            match self.retry.run("load session", || self.store.session(&id)).await {
                Ok(session) => sessions.push(session),
                Err(err) => {
                    let reason = match err {
                        PortError::NotFound(_) => format!("session '{id}' not found"),
                        other => describe("session load", &other),
                    };
                    operation.record_failure(SessionOutcome::failed(id.clone(), reason));
                    publish(progress, &operation);
                }
            }
        }

        let keys = lock_keys(&operation.kind, &sessions);
        let _guard = self.locks.acquire(keys).await;
        debug!(operation_id = %operation.id, "schedule locks acquired");
        let sessions = self.reload_unchanged(&mut operation, sessions, progress).await;

        let snapshot = match self.snapshot(&operation.kind, &sessions).await {
            Ok(snapshot) => Some(snapshot),
            Err(err) => {
                warn!(operation_id = %operation.id, error = %err, "snapshot unavailable");
                for session in &sessions {
                    operation.record_failure(SessionOutcome::failed(
                        session.id.clone(),
                        describe("snapshot", &err),
                    ));
                }
                None
            }
        };

        if let Some(snapshot) = snapshot {
            for session in &sessions {
                if deadline.expired() {
                    operation.deadline_reached = true;
                    operation.record_failure(SessionOutcome::failed(session.id.clone(), DEADLINE_EXCEEDED));
                } else {
                    self.process_session(&mut operation, session, &snapshot).await;
                }
                publish(progress, &operation);
                if let Err(err) = self.save(&operation).await {
                    warn!(operation_id = %operation.id, error = %err, "progress not persisted");
                }
            }
        }

        operation.finish();
        publish(progress, &operation);
        if let Err(err) = self.save(&operation).await {
            warn!(operation_id = %operation.id, error = %err, "final operation state not persisted");
        }
        info!(
            operation_id = %operation.id,
            status = operation.status.as_str(),
            successful = operation.progress.successful,
            failed = operation.progress.failed,
            deadline_reached = operation.deadline_reached,
            "bulk operation finished"
        );
        Ok(result_of(&operation))
    }

    /// Restores every session `operation_id` changed to its pre-operation
    /// placement and status.
    ///
    /// A session that changed again since the operation, or whose original
    /// slot is no longer free, is left alone and reported as not reverted.
    pub async fn rollback_changes(&self, operation_id: &str) -> Result<RollbackResult> {
        let mut operation = self
            .retry
            .run("load operation", || self.store.operation(operation_id))
            .await
            .map_err(|e| match e {
                PortError::NotFound(_) => Error::not_found("bulk operation", operation_id),
                other => Error::Port(other),
            })?;
        operation.ensure_rollbackable()?;

        let keys: Vec<LockKey> = operation
            .changes
            .iter()
            .flat_map(|c| {
                [
                    (c.before.therapist_id.clone(), c.before.date),
                    (c.after.therapist_id.clone(), c.after.date),
                ]
            })
            .collect();
        let _guard = self.locks.acquire(keys).await;

        let mut reverted = Vec::new();
        let mut not_reverted = Vec::new();
        let dates: Vec<NaiveDate> = operation.changes.iter().map(|c| c.before.date).collect();
        let reference = self.load_snapshot(span_or_today(&dates)).await;

        for change in operation.changes.iter().rev() {
            let outcome = match &reference {
                Ok(snapshot) => self.revert(change, snapshot).await,
                Err(e) => Err(describe("snapshot", e)),
            };
            match outcome {
                Ok(()) => reverted.push(change.session_id.clone()),
                Err(reason) => {
                    warn!(operation_id, session_id = %change.session_id, %reason, "session not reverted");
                    not_reverted.push(NotReverted {
                        session_id: change.session_id.clone(),
                        reason,
                    });
                }
            }
        }
        reverted.reverse();
        not_reverted.reverse();

        operation.mark_rolled_back(RollbackSummary {
            reverted: reverted.clone(),
            not_reverted: not_reverted.clone(),
            rolled_back_at: Utc::now(),
        });
        self.save(&operation).await?;
        info!(
            operation_id,
            reverted = reverted.len(),
            not_reverted = not_reverted.len(),
            "bulk operation rolled back"
        );

        Ok(RollbackResult {
            operation_id: operation.id.clone(),
            success: not_reverted.is_empty(),
            reverted,
            not_reverted,
            status: operation.status,
        })
    }

    /// Re-reads `loaded` under the locks, failing every session that moved
    /// or changed status in between. The survivors' lock keys are unchanged.
    async fn reload_unchanged(
        &self,
        operation: &mut BulkReschedulingOperation,
        loaded: Vec<Session>,
        progress: Option<&watch::Sender<BulkProgress>>,
    ) -> Vec<Session> {
        let mut fresh = Vec::with_capacity(loaded.len());
        for session in loaded {
            match self.retry.run("load session", || self.store.session(&session.id)).await {
                Ok(current) if same_slot(&current, &session) => fresh.push(current),
                Ok(current) => {
                    warn!(
                        operation_id = %operation.id,
                        session_id = %session.id,
                        placement = ?current.placement,
                        "session changed while waiting for locks"
                    );
                    operation.record_failure(SessionOutcome::failed(session.id.clone(), CHANGED_CONCURRENTLY));
                    publish(progress, operation);
                }
                Err(err) => {
                    operation.record_failure(SessionOutcome::failed(session.id.clone(), describe("session load", &err)));
                    publish(progress, operation);
                }
            }
        }
        fresh
    }

    async fn process_session(&self, operation: &mut BulkReschedulingOperation, session: &Session, snapshot: &Snapshot) {
        if let BulkOperationKind::CancelSessions { reason } = &operation.kind {
            if !session.is_active() {
                operation.record_failure(SessionOutcome::failed(session.id.clone(), "session is already cancelled"));
                return;
            }
            let cancelled = Session {
                status: SessionStatus::Cancelled,
                ..session.clone()
            };
            debug!(session_id = %session.id, %reason, "cancelling session");
            self.apply(operation, session, cancelled).await;
            return;
        }

        if !session.is_active() {
            operation.record_failure(SessionOutcome::failed(session.id.clone(), "cancelled sessions are not moved"));
            return;
        }
        let direct = match direct_placement(&operation.kind, session) {
            Ok(p) => p,
            Err(reason) => {
                operation.record_failure(SessionOutcome::failed(session.id.clone(), reason));
                return;
            }
        };

        let current = match self
            .retry
            .run("session snapshot", || self.store.sessions_in_range(snapshot.range))
            .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                operation.record_failure(SessionOutcome::failed(session.id.clone(), describe("session snapshot", &err)));
                return;
            }
        };

        if !current.iter().any(|s| s.id == session.id && same_slot(s, session)) {
            operation.record_failure(SessionOutcome::failed(session.id.clone(), CHANGED_CONCURRENTLY));
            return;
        }

        let conflicts = self.detector.check_placement(
            session,
            &direct,
            &current,
            &snapshot.availabilities,
            &snapshot.rooms,
        );
        let target = if conflicts.is_empty() {
            Some(direct)
        } else {
            let search = SlotSearch {
                therapists: vec![direct.therapist_id.clone()],
                dates: operation.kind.search_dates(session),
                emergency: operation.kind.is_emergency(),
                anchor: direct,
            };
            self.optimizer.best_slot(
                session,
                &search,
                &current,
                &snapshot.availabilities,
                &snapshot.rooms,
                &self.constraints,
            )
        };

        match target {
            Some(placement) => {
                let moved = Session {
                    status: SessionStatus::Rescheduled,
                    ..session.placed_at(placement)
                };
                self.apply(operation, session, moved).await;
            }
            None => {
                info!(session_id = %session.id, conflicts = conflicts.len(), "no conflict-free slot");
                operation.record_failure(
                    SessionOutcome::failed(session.id.clone(), "no conflict-free slot available").with_conflicts(conflicts),
                );
            }
        }
    }

    /// Writes `updated` and records the change.
    async fn apply(&self, operation: &mut BulkReschedulingOperation, before: &Session, updated: Session) {
        let write = self
            .retry
            .run("session write", || self.store.upsert_session(updated.clone()))
            .await;
        match write {
            Ok(()) => {
                info!(session_id = %updated.id, placement = ?updated.placement, status = ?updated.status, "session updated");
                let change = AppliedChange {
                    session_id: updated.id.clone(),
                    before: before.placement.clone(),
                    after: updated.placement.clone(),
                    previous_status: before.status,
                    new_status: updated.status,
                };
                operation.record_success(SessionOutcome::succeeded(updated.id.clone(), updated.placement), change);
            }
            Err(err) => {
                operation.record_failure(SessionOutcome::failed(updated.id.clone(), describe("session write", &err)));
            }
        }
    }

    /// Restores one change. `Err` carries the reason it was not reverted.
    async fn revert(&self, change: &AppliedChange, snapshot: &Snapshot) -> std::result::Result<(), String> {
        let current = self
            .retry
            .run("load session", || self.store.session(&change.session_id))
            .await
            .map_err(|e| describe("session load", &e))?;
        if current.placement != change.after || current.status != change.new_status {
            return Err("session changed since the operation".to_string());
        }

        let restored = Session {
            status: change.previous_status,
            ..current.placed_at(change.before.clone())
        };
        if restored.is_active() {
            let range = DateRange::day(change.before.date);
            let others = self
                .retry
                .run("session snapshot", || self.store.sessions_in_range(range))
                .await
                .map_err(|e| describe("session snapshot", &e))?;
            let conflicts = self.detector.check_placement(
                &restored,
                &change.before,
                &others,
                &snapshot.availabilities,
                &snapshot.rooms,
            );
            if !conflicts.is_empty() {
                let details: Vec<String> = conflicts.into_iter().map(|c| c.message).collect();
                return Err(format!("original slot is no longer free: {}", details.join("; ")));
            }
        }

        self.retry
            .run("session write", || self.store.upsert_session(restored.clone()))
            .await
            .map_err(|e| describe("session write", &e))
    }

    /// Availability and rooms for every date the operation may touch.
    async fn snapshot(&self, kind: &BulkOperationKind, sessions: &[Session]) -> std::result::Result<Snapshot, PortError> {
        let dates: Vec<NaiveDate> = sessions
            .iter()
            .flat_map(|s| {
                let mut d = kind.search_dates(s);
                d.push(s.date());
                if let Ok(p) = direct_placement(kind, s) {
                    d.push(p.date);
                }
                d
            })
            .collect();
        self.load_snapshot(span_or_today(&dates)).await
    }

    async fn load_snapshot(&self, range: DateRange) -> std::result::Result<Snapshot, PortError> {
        let availabilities = self
            .retry
            .run("availability", || self.store.availabilities(range))
            .await?;
        let rooms = self.retry.run("rooms", || self.store.rooms()).await?;
        Ok(Snapshot {
            range,
            availabilities,
            rooms,
        })
    }

    async fn save(&self, operation: &BulkReschedulingOperation) -> Result<()> {
        self.retry
            .run("save operation", || self.store.save_operation(operation.clone()))
            .await
            .map_err(Error::Port)
    }
}

fn detector_for(config: &DetectorConfig, constraints: &OptimizationConstraints) -> ConflictDetector {
    ConflictDetector::new(config.clone()).with_preferences(constraints)
}

/// Placement the operation asks for, before any conflict search.
fn direct_placement(kind: &BulkOperationKind, session: &Session) -> std::result::Result<Placement, String> {
    match kind {
        BulkOperationKind::RescheduleRange { source, .. } => {
            if !source.contains(session.date()) {
                return Err(format!("session date {} is outside the source range", session.date()));
            }
            session
                .placement
                .shifted_days(kind.day_shift())
                .ok_or_else(|| format!("shifting {} leaves the calendar", session.date()))
        }
        BulkOperationKind::RescheduleTherapist {
            from_therapist_id,
            to_therapist_id,
        } => {
            if session.therapist_id() != from_therapist_id {
                return Err(format!("session is not assigned to therapist '{from_therapist_id}'"));
            }
            Ok(session.placement.with_therapist(to_therapist_id.clone()))
        }
        BulkOperationKind::EmergencyReschedule {
            replacement_therapist_id,
            ..
        } => Ok(match replacement_therapist_id {
            Some(t) => session.placement.with_therapist(t.clone()),
            None => session.placement.clone(),
        }),
        BulkOperationKind::CancelSessions { .. } => Ok(session.placement.clone()),
    }
}

/// Every therapist-day the operation may read or write.
fn lock_keys(kind: &BulkOperationKind, sessions: &[Session]) -> Vec<LockKey> {
    let mut keys = Vec::new();
    for session in sessions {
        keys.push((session.therapist_id().to_string(), session.date()));
        if let Ok(target) = direct_placement(kind, session) {
            for date in kind.search_dates(session) {
                keys.push((target.therapist_id.clone(), date));
            }
            keys.push((target.therapist_id, target.date));
        }
    }
    keys
}

fn same_slot(a: &Session, b: &Session) -> bool {
    a.placement == b.placement && a.status == b.status
}

/// Smallest range covering `dates`; today when there are none.
fn span_or_today(dates: &[NaiveDate]) -> DateRange {
    match (dates.iter().min(), dates.iter().max()) {
        (Some(start), Some(end)) => DateRange::new(*start, *end),
        _ => DateRange::day(Utc::now().date_naive()),
    }
}

fn validate_operation(operation: &BulkReschedulingOperation, config: &BulkConfig) -> Result<()> {
    let mut errors = Vec::new();
    if operation.session_ids.is_empty() {
        errors.push(ValidationError::new(
            ValidationErrorKind::EmptyRequest,
            "bulk operation lists no sessions",
        ));
    }
    let mut seen = std::collections::HashSet::new();
    for id in &operation.session_ids {
        if !seen.insert(id.as_str()) {
            errors.push(ValidationError::new(
                ValidationErrorKind::DuplicateId,
                format!("session '{id}' listed twice"),
            ));
        }
    }
    match &operation.kind {
        BulkOperationKind::RescheduleRange { source, target } => {
            for (name, range) in [("source", source), ("target", target)] {
                if let Err(e) = crate::validation::validate_date_range(name, range) {
                    errors.extend(e);
                }
            }
            if source.is_well_formed() && target.is_well_formed() && source.days() != target.days() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidDateRange,
                    format!(
                        "source spans {} days but target spans {}",
                        source.days(),
                        target.days()
                    ),
                ));
            }
        }
        BulkOperationKind::RescheduleTherapist {
            from_therapist_id,
            to_therapist_id,
        } => {
            if from_therapist_id.is_empty() || to_therapist_id.is_empty() {
                errors.push(ValidationError::new(
                    ValidationErrorKind::MissingField,
                    "therapist reassignment needs both therapist ids",
                ));
            }
        }
        BulkOperationKind::EmergencyReschedule { max_day_offset, .. } => {
            if *max_day_offset > config.max_day_offset {
                errors.push(ValidationError::new(
                    ValidationErrorKind::OutOfRange,
                    format!(
                        "max_day_offset {max_day_offset} exceeds the limit of {}",
                        config.max_day_offset
                    ),
                ));
            }
        }
        BulkOperationKind::CancelSessions { .. } => {}
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::Validation(errors))
    }
}

fn publish(progress: Option<&watch::Sender<BulkProgress>>, operation: &BulkReschedulingOperation) {
    if let Some(tx) = progress {
        tx.send_replace(operation.progress);
    }
}

fn result_of(operation: &BulkReschedulingOperation) -> BulkOperationResult {
    BulkOperationResult {
        operation_id: operation.id.clone(),
        success: operation.progress.failed == 0,
        status: operation.status,
        progress: operation.progress,
        outcomes: operation.outcomes.clone(),
        conflicts: operation.conflicts.clone(),
        successful_session_ids: operation
            .outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.session_id.clone())
            .collect(),
        failed_session_ids: operation
            .outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.session_id.clone())
            .collect(),
        deadline_reached: operation.deadline_reached,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BulkOperationStatus, SessionType, TimeWindow};
    use crate::store::InMemoryStore;

    fn day(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, m, d).unwrap()
    }

    fn session(id: &str, therapist: &str, date: NaiveDate, window: TimeWindow) -> Session {
        Session::new(
            id,
            format!("ST-{id}"),
            SessionType::Speech,
            Placement::new(therapist, "R1", date, window),
        )
    }

    fn rooms() -> Vec<TherapyRoom> {
        vec![TherapyRoom::new("R1").supporting(SessionType::Speech)]
    }

    fn open(therapist: &str, date: NaiveDate) -> TherapistAvailability {
        TherapistAvailability::new(therapist, date, TimeWindow::hm((9, 0), (17, 0)))
    }

    fn coordinator(store: &InMemoryStore) -> BulkCoordinator {
        BulkCoordinator::new(Arc::new(store.clone()), ScheduleLocks::new()).with_retry(RetryPolicy::none())
    }

    fn nine() -> TimeWindow {
        TimeWindow::hm((9, 0), (10, 0))
    }

    #[tokio::test]
    async fn test_therapist_handover_and_rollback() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine()), session("S2", "T1", day(9, 2), nine())],
            vec![
                open("T1", day(9, 1)),
                open("T1", day(9, 2)),
                open("T2", day(9, 1)),
                open("T2", day(9, 2)),
            ],
            rooms(),
        );
        let coordinator = coordinator(&store);
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into(), "S2".into()],
        );
        let id = op.id.clone();

        let result = coordinator.process_bulk_operation(op, None).await.unwrap();
        assert!(result.success);
        assert_eq!(result.status, BulkOperationStatus::Completed);
        let s1 = store.get_session("S1").unwrap();
        assert_eq!(s1.therapist_id(), "T2");
        assert_eq!(s1.window(), nine());
        assert_eq!(s1.status, SessionStatus::Rescheduled);

        let rollback = coordinator.rollback_changes(&id).await.unwrap();
        assert!(rollback.success);
        assert_eq!(rollback.reverted, vec!["S1".to_string(), "S2".to_string()]);
        let s1 = store.get_session("S1").unwrap();
        assert_eq!(s1.therapist_id(), "T1");
        assert_eq!(s1.status, SessionStatus::Scheduled);

        let stored = store.operation(&id).await.unwrap();
        assert_eq!(stored.status, BulkOperationStatus::RolledBack);
        assert_eq!(stored.progress.successful, 0);
    }

    #[tokio::test]
    async fn test_conflicting_direct_move_uses_alternative() {
        let store = InMemoryStore::with_snapshot(
            vec![
                session("S1", "T1", day(9, 1), nine()),
                session("B1", "T2", day(9, 1), nine()),
            ],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let coordinator = coordinator(&store);
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into()],
        );
        let result = coordinator.process_bulk_operation(op, None).await.unwrap();
        assert!(result.success);
        let moved = store.get_session("S1").unwrap();
        assert_eq!(moved.therapist_id(), "T2");
        assert_eq!(moved.window(), TimeWindow::hm((10, 0), (11, 0)));
    }

    #[tokio::test]
    async fn test_rollback_skips_sessions_changed_since() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let coordinator = coordinator(&store);
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into()],
        );
        let id = op.id.clone();
        coordinator.process_bulk_operation(op, None).await.unwrap();

        let mut edited = store.get_session("S1").unwrap();
        edited.placement = edited.placement.starting_at(14 * 60);
        store.put_session(edited.clone());

        let rollback = coordinator.rollback_changes(&id).await.unwrap();
        assert!(!rollback.success);
        assert!(rollback.reverted.is_empty());
        assert_eq!(rollback.not_reverted.len(), 1);
        assert_eq!(store.get_session("S1").unwrap(), edited);
    }

    #[tokio::test]
    async fn test_cancel_sessions_and_restore() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1))],
            rooms(),
        );
        let coordinator = coordinator(&store);
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::CancelSessions {
                reason: "freeze".into(),
            },
            vec!["S1".into()],
        );
        let id = op.id.clone();
        let result = coordinator.process_bulk_operation(op, None).await.unwrap();
        assert!(result.success);
        assert_eq!(store.get_session("S1").unwrap().status, SessionStatus::Cancelled);

        coordinator.rollback_changes(&id).await.unwrap();
        assert_eq!(store.get_session("S1").unwrap().status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_zero_budget_fails_items_with_deadline() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into()],
        )
        .with_time_budget(0);
        let result = coordinator(&store).process_bulk_operation(op, None).await.unwrap();
        assert!(!result.success);
        assert!(result.deadline_reached);
        assert_eq!(result.outcomes[0].reason.as_deref(), Some(DEADLINE_EXCEEDED));
        assert_eq!(store.get_session("S1").unwrap().therapist_id(), "T1");
    }

    #[tokio::test]
    async fn test_emergency_takes_nearest_day() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 2), nine())],
            vec![
                open("T1", day(9, 2)).unavailable(),
                open("T1", day(9, 3)),
                open("T1", day(9, 5)),
            ],
            rooms(),
        );
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::EmergencyReschedule {
                max_day_offset: 3,
                replacement_therapist_id: None,
                reason: "illness".into(),
            },
            vec!["S1".into()],
        );
        let result = coordinator(&store).process_bulk_operation(op, None).await.unwrap();
        assert!(result.success);
        let moved = store.get_session("S1").unwrap();
        assert_eq!(moved.date(), day(9, 3));
        assert_eq!(moved.window(), nine());
    }

    #[tokio::test]
    async fn test_progress_channel_and_missing_session() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let (tx, rx) = watch::channel(BulkProgress::default());
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into(), "GONE".into()],
        );
        let result = coordinator(&store).process_bulk_operation(op, Some(&tx)).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_session_ids, vec!["GONE".to_string()]);
        let last = *rx.borrow();
        assert_eq!(last.processed, 2);
        assert_eq!(last.successful, 1);
        assert_eq!(last.failed, 1);
    }

    #[tokio::test]
    async fn test_invalid_requests_rejected() {
        let store = InMemoryStore::new();
        let coordinator = coordinator(&store);
        let empty = BulkReschedulingOperation::new(
            BulkOperationKind::CancelSessions { reason: "x".into() },
            Vec::new(),
        );
        assert!(matches!(
            coordinator.process_bulk_operation(empty, None).await,
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            coordinator.rollback_changes("missing").await,
            Err(Error::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_session_moved_while_waiting_for_locks_is_left_alone() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let locks = ScheduleLocks::new();
        let holder = locks.try_acquire([("T1".to_string(), day(9, 1))]);
        assert!(holder.is_some());

        let coordinator =
            BulkCoordinator::new(Arc::new(store.clone()), locks.clone()).with_retry(RetryPolicy::none());
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into()],
        );
        let afternoon = TimeWindow::hm((14, 0), (15, 0));
        let (result, ()) = tokio::join!(coordinator.process_bulk_operation(op, None), async {
            store.put_session(session("S1", "T1", day(9, 1), afternoon));
            drop(holder);
        });

        let result = result.unwrap();
        assert!(!result.success);
        assert_eq!(result.failed_session_ids, vec!["S1".to_string()]);
        assert_eq!(result.outcomes[0].reason.as_deref(), Some(CHANGED_CONCURRENTLY));
        let stored = store.get_session("S1").unwrap();
        assert_eq!(stored.therapist_id(), "T1");
        assert_eq!(stored.window(), afternoon);
        assert_eq!(stored.status, SessionStatus::Scheduled);
    }

    #[tokio::test]
    async fn test_waiting_operation_does_not_undo_earlier_operation() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T2", day(9, 1))],
            rooms(),
        );
        let locks = ScheduleLocks::new();
        // T2's day is busy, so the handover waits while the cancellation runs
        let holder = locks.try_acquire([("T2".to_string(), day(9, 1))]);
        assert!(holder.is_some());
        let first = BulkCoordinator::new(Arc::new(store.clone()), locks.clone()).with_retry(RetryPolicy::none());
        let second = BulkCoordinator::new(Arc::new(store.clone()), locks.clone()).with_retry(RetryPolicy::none());
        let handover = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleTherapist {
                from_therapist_id: "T1".into(),
                to_therapist_id: "T2".into(),
            },
            vec!["S1".into()],
        );
        let cancel = BulkReschedulingOperation::new(
            BulkOperationKind::CancelSessions { reason: "closure".into() },
            vec!["S1".into()],
        );

        let (moved, cancelled) = tokio::join!(first.process_bulk_operation(handover, None), async {
            let result = second.process_bulk_operation(cancel, None).await;
            drop(holder);
            result
        });
        assert!(cancelled.unwrap().success);
        let moved = moved.unwrap();
        assert!(!moved.success);
        assert_eq!(moved.outcomes[0].reason.as_deref(), Some(CHANGED_CONCURRENTLY));

        let stored = store.get_session("S1").unwrap();
        assert_eq!(stored.therapist_id(), "T1");
        assert_eq!(stored.status, SessionStatus::Cancelled);
        assert!(locks.try_acquire([("T1".to_string(), day(9, 1)), ("T2".to_string(), day(9, 1))]).is_some());
    }

    #[tokio::test]
    async fn test_emergency_offset_above_limit_rejected() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1))],
            rooms(),
        );
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::EmergencyReschedule {
                max_day_offset: 200_000_000,
                replacement_therapist_id: None,
                reason: "illness".into(),
            },
            vec!["S1".into()],
        );
        let id = op.id.clone();
        let err = coordinator(&store).process_bulk_operation(op, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ref errors) if errors.iter().any(|e| e.kind == ValidationErrorKind::OutOfRange)
        ));
        assert!(store.operation(&id).await.is_err());
        assert_eq!(store.get_session("S1").unwrap().date(), day(9, 1));
    }

    #[tokio::test]
    async fn test_mismatched_range_lengths_rejected() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![open("T1", day(9, 1)), open("T1", day(10, 1))],
            rooms(),
        );
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleRange {
                source: DateRange::new(day(9, 1), day(9, 5)),
                target: DateRange::new(day(10, 1), day(10, 2)),
            },
            vec!["S1".into()],
        );
        let err = coordinator(&store).process_bulk_operation(op, None).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ref errors) if errors.iter().any(|e| e.kind == ValidationErrorKind::InvalidDateRange)
        ));
        assert_eq!(store.get_session("S1").unwrap().date(), day(9, 1));
    }

    #[tokio::test]
    async fn test_range_fallback_stays_inside_target() {
        let store = InMemoryStore::with_snapshot(
            vec![session("S1", "T1", day(9, 1), nine())],
            vec![
                open("T1", day(9, 1)),
                open("T1", day(9, 8)).unavailable(),
                open("T1", day(9, 9)),
                open("T1", day(9, 10)),
            ],
            rooms(),
        );
        let target = DateRange::new(day(9, 8), day(9, 9));
        let op = BulkReschedulingOperation::new(
            BulkOperationKind::RescheduleRange {
                source: DateRange::new(day(9, 1), day(9, 2)),
                target,
            },
            vec!["S1".into()],
        );
        let result = coordinator(&store).process_bulk_operation(op, None).await.unwrap();
        assert!(result.success);
        let moved = store.get_session("S1").unwrap();
        assert!(target.contains(moved.date()));
        assert_eq!(moved.date(), day(9, 9));
    }
}
