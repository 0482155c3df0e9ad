//! Integration validation facade.
//!
//! Runs every check a session must pass before it is written:
//!
//! | Subsystem | Source |
//! |---|---|
//! | enrollment | [`EnrollmentService`] |
//! | therapist | conflict detector + [`QualificationService`] |
//! | room | conflict detector (room and equipment kinds) |
//! | billing | [`BillingService`] |
//!
//! Overall success is the AND of all subsystems. A collaborator that stays
//! unreachable after the retry policy fails its subsystem.
//!
//! [`IntegrationService::commit_session`] re-runs the detector against fresh
//! store data right before the upsert. A placement that became blocked in
//! between is reported as `concurrent_modification` and nothing is written.
//! Notification delivery is best-effort and never undoes a commit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::conflict::{Conflict, ConflictDetector, ConflictKind, DetectorConfig};
use crate::error::{Error, Result};
use crate::models::{
    DateRange, OptimizationConstraints, Placement, Session, SessionStatus, TherapistAvailability,
    TherapyRoom,
};
use crate::ports::{
    BillingService, CollaboratorResult, EnrollmentService, NotificationSink, PortResult,
    QualificationService, ScheduleEvent, ScheduleEventType, ScheduleStore,
};
use crate::retry::{describe, RetryPolicy};
use crate::validation::{into_error, validate_session};

/// Checked subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Enrollment,
    Therapist,
    Room,
    Billing,
}

impl Subsystem {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Enrollment => "enrollment",
            Self::Therapist => "therapist",
            Self::Room => "room",
            Self::Billing => "billing",
        }
    }
}

/// Outcome of one subsystem check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemResult {
    pub subsystem: Subsystem,
    pub success: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SubsystemResult {
    fn passed(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            success: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn fail(&mut self, message: impl Into<String>) {
        self.success = false;
        self.errors.push(message.into());
    }

    /// Folds a collaborator answer (or its terminal failure) into this result.
    fn absorb(&mut self, what: &str, outcome: PortResult<CollaboratorResult>) {
        match outcome {
            Ok(answer) => {
                self.warnings.extend(answer.warnings);
                if !answer.success {
                    let mut message = answer
                        .message
                        .unwrap_or_else(|| format!("{what} check failed"));
                    if !answer.conflicts.is_empty() {
                        message = format!("{message} ({})", answer.conflicts.join(", "));
                    }
                    self.fail(message);
                }
            }
            Err(err) => self.fail(describe(what, &err)),
        }
    }
}

/// Aggregated integration check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrationValidation {
    pub success: bool,
    /// Failing subsystem messages, joined. `None` on success.
    pub error: Option<String>,
    /// Union of all subsystem warnings, first occurrence order.
    pub warnings: Vec<String>,
    /// Detector findings, blocking and advisory.
    pub conflicts: Vec<Conflict>,
    /// Suggested slots when a blocking conflict exists.
    pub alternatives: Vec<Placement>,
    pub subsystems: Vec<SubsystemResult>,
}

impl IntegrationValidation {
    fn aggregate(subsystems: Vec<SubsystemResult>, conflicts: Vec<Conflict>, alternatives: Vec<Placement>) -> Self {
        let success = subsystems.iter().all(|s| s.success);
        let messages: Vec<String> = subsystems
            .iter()
            .flat_map(|s| s.errors.iter().map(move |e| format!("{}: {e}", s.subsystem.as_str())))
            .collect();
        let mut warnings: Vec<String> = Vec::new();
        for warning in subsystems.iter().flat_map(|s| s.warnings.iter()) {
            if !warnings.contains(warning) {
                warnings.push(warning.clone());
            }
        }
        Self {
            success,
            error: (!messages.is_empty()).then(|| messages.join("; ")),
            warnings,
            conflicts,
            alternatives,
            subsystems,
        }
    }
}

/// Result of [`IntegrationService::commit_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitResult {
    pub committed: bool,
    pub validation: IntegrationValidation,
    /// Event announced after the write.
    pub event: Option<ScheduleEvent>,
    /// Whether the notification collaborator accepted the event.
    pub notified: bool,
}

struct DaySnapshot {
    sessions: Vec<Session>,
    availabilities: Vec<TherapistAvailability>,
    rooms: Vec<TherapyRoom>,
}

/// Validates and commits single sessions.
pub struct IntegrationService {
    store: Arc<dyn ScheduleStore>,
    enrollment: Arc<dyn EnrollmentService>,
    billing: Arc<dyn BillingService>,
    qualification: Arc<dyn QualificationService>,
    notifications: Option<Arc<dyn NotificationSink>>,
    detector: ConflictDetector,
    retry: RetryPolicy,
}

impl IntegrationService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        enrollment: Arc<dyn EnrollmentService>,
        billing: Arc<dyn BillingService>,
        qualification: Arc<dyn QualificationService>,
    ) -> Self {
        Self {
            store,
            enrollment,
            billing,
            qualification,
            notifications: None,
            detector: ConflictDetector::new(DetectorConfig::default()),
            retry: RetryPolicy::default(),
        }
    }

    /// Takes detector and retry settings from `config`.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.detector = ConflictDetector::new(config.detector.clone());
        self.retry = config.retry.clone();
        self
    }

    /// Enables advisory checks against `constraints`.
    pub fn with_constraints(mut self, constraints: &OptimizationConstraints) -> Self {
        self.detector = self.detector.with_preferences(constraints);
        self
    }

    pub fn with_notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = Some(sink);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Runs all subsystem checks for `candidate`.
    ///
    /// # Errors
    /// Only for a structurally invalid session. Failed checks are reported in
    /// the result.
    pub async fn validate_session_integration(&self, candidate: &Session) -> Result<IntegrationValidation> {
        into_error(validate_session(candidate))?;
        let snapshot = self.load_day(candidate.date()).await;
        Ok(self.check(candidate, snapshot).await)
    }

    /// Validates `candidate`, re-checks it against fresh data and writes it.
    ///
    /// # Errors
    /// A structurally invalid session, or a store write failure.
    pub async fn commit_session(&self, candidate: Session) -> Result<CommitResult> {
        let validation = self.validate_session_integration(&candidate).await?;
        if !validation.success {
            info!(session_id = %candidate.id, error = ?validation.error, "session not committed");
            return Ok(CommitResult {
                committed: false,
                validation,
                event: None,
                notified: false,
            });
        }

        let fresh = self.load_day(candidate.date()).await.map_err(Error::Port)?;
        let raced: Vec<Conflict> = self
            .detector
            .detect_conflicts(&candidate, &fresh.sessions, &fresh.availabilities, &fresh.rooms)
            .conflicts
            .into_iter()
            .filter(Conflict::is_blocking)
            .collect();
        if !raced.is_empty() {
            warn!(session_id = %candidate.id, conflicts = raced.len(), "schedule changed before commit");
            let mut validation = validation;
            validation.conflicts.push(concurrent_modification(&candidate, &raced));
            validation.conflicts.extend(raced);
            validation.success = false;
            validation.error = Some("schedule changed since validation; retry with fresh data".into());
            return Ok(CommitResult {
                committed: false,
                validation,
                event: None,
                notified: false,
            });
        }

        let previous = fresh.sessions.iter().find(|s| s.id == candidate.id);
        let event_type = event_type(previous, &candidate);
        self.retry
            .run("session write", || self.store.upsert_session(candidate.clone()))
            .await?;
        info!(session_id = %candidate.id, event = ?event_type, "session committed");

        let event = ScheduleEvent::for_session(event_type, &candidate);
        let notified = self.notify(&event).await;
        Ok(CommitResult {
            committed: true,
            validation,
            event: Some(event),
            notified,
        })
    }

    async fn check(&self, candidate: &Session, snapshot: PortResult<DaySnapshot>) -> IntegrationValidation {
        let mut enrollment = SubsystemResult::passed(Subsystem::Enrollment);
        enrollment.absorb(
            "enrollment",
            self.retry
                .run("enrollment", || self.enrollment.check_enrollment(candidate))
                .await,
        );

        let mut therapist = SubsystemResult::passed(Subsystem::Therapist);
        let mut room = SubsystemResult::passed(Subsystem::Room);
        let mut conflicts = Vec::new();
        let mut alternatives = Vec::new();
        match snapshot {
            Ok(day) => {
                let report = self
                    .detector
                    .detect_conflicts(candidate, &day.sessions, &day.availabilities, &day.rooms);
                for conflict in &report.conflicts {
                    let target = if is_room_kind(conflict.kind) { &mut room } else { &mut therapist };
                    if conflict.is_blocking() {
                        target.fail(conflict.message.clone());
                    } else {
                        target.warnings.push(conflict.message.clone());
                    }
                }
                conflicts = report.conflicts;
                alternatives = report.alternatives;
            }
            Err(err) => {
                let message = describe("schedule snapshot", &err);
                therapist.fail(message.clone());
                room.fail(message);
            }
        }
        therapist.absorb(
            "qualification",
            self.retry
                .run("qualification", || self.qualification.check_qualification(candidate))
                .await,
        );

        let mut billing = SubsystemResult::passed(Subsystem::Billing);
        billing.absorb(
            "billing",
            self.retry
                .run("billing", || self.billing.check_billing(candidate))
                .await,
        );

        IntegrationValidation::aggregate(vec![enrollment, therapist, room, billing], conflicts, alternatives)
    }

    async fn load_day(&self, date: chrono::NaiveDate) -> PortResult<DaySnapshot> {
        let range = DateRange::day(date);
        let sessions = self
            .retry
            .run("sessions", || self.store.sessions_in_range(range))
            .await?;
        let availabilities = self
            .retry
            .run("availability", || self.store.availabilities(range))
            .await?;
        let rooms = self.retry.run("rooms", || self.store.rooms()).await?;
        Ok(DaySnapshot {
            sessions,
            availabilities,
            rooms,
        })
    }

    async fn notify(&self, event: &ScheduleEvent) -> bool {
        let Some(sink) = &self.notifications else {
            return false;
        };
        match self.retry.run("notification", || sink.publish(event.clone())).await {
            Ok(()) => true,
            Err(err) => {
                warn!(session_id = %event.session.id, error = %err, "notification delivery failed");
                false
            }
        }
    }
}

fn is_room_kind(kind: ConflictKind) -> bool {
    matches!(
        kind,
        ConflictKind::RoomCapacity
            | ConflictKind::RoomUnsupportedType
            | ConflictKind::RoomInactive
            | ConflictKind::UnknownRoom
            | ConflictKind::EquipmentUnavailable
            | ConflictKind::EquipmentInUse
    )
}

fn concurrent_modification(candidate: &Session, raced: &[Conflict]) -> Conflict {
    let mut ids = vec![candidate.id.clone()];
    for conflict in raced {
        for id in conflict.session_ids.iter().skip(1) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    }
    Conflict::new(
        ConflictKind::ConcurrentModification,
        ids,
        candidate.date(),
        candidate.window(),
        "placement was taken by a concurrent change",
    )
}

fn event_type(previous: Option<&Session>, candidate: &Session) -> ScheduleEventType {
    match previous {
        None => ScheduleEventType::SessionCreated,
        Some(_) if candidate.status == SessionStatus::Cancelled => ScheduleEventType::SessionCancelled,
        Some(old) if old.placement != candidate.placement => ScheduleEventType::SessionRescheduled,
        Some(_) => ScheduleEventType::SessionUpdated,
    }
}
