//! Service contracts for external collaborators.
//!
//! The engine owns no long-lived storage. Sessions, availability, rooms,
//! operation and freeze records live behind [`ScheduleStore`]; enrollment,
//! billing, qualification data and notification delivery are other systems.
//! Every trait is object-safe and used as `Arc<dyn Trait>`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{
    BulkReschedulingOperation, DateRange, Session, SubscriptionFreeze, TherapistAvailability,
    TherapyRoom,
};

/// Failure of a collaborator call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    /// Collaborator unreachable or timed out. Worth retrying.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    /// Collaborator refused the request.
    #[error("Request rejected: {0}")]
    Rejected(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

impl PortError {
    /// Whether a retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Unavailable(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

/// Result record returned by enrollment, billing and qualification checks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorResult {
    pub success: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CollaboratorResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Kind of schedule change announced to the notification collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleEventType {
    SessionCreated,
    SessionUpdated,
    SessionRescheduled,
    SessionCancelled,
}

/// Notification-worthy event emitted after a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    #[serde(rename = "type")]
    pub event_type: ScheduleEventType,
    pub session: Session,
    pub affected_user_ids: Vec<String>,
}

impl ScheduleEvent {
    /// Event for `session`; student and therapist are the affected users.
    pub fn for_session(event_type: ScheduleEventType, session: &Session) -> Self {
        Self {
            event_type,
            affected_user_ids: vec![session.student_id.clone(), session.therapist_id().to_string()],
            session: session.clone(),
        }
    }
}

/// Persistence collaborator. Single-record upserts only.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    // --- Sessions ---
    async fn session(&self, session_id: &str) -> PortResult<Session>;

    /// Sessions dated inside `range`, any status.
    async fn sessions_in_range(&self, range: DateRange) -> PortResult<Vec<Session>>;

    async fn sessions_for_student(&self, student_id: &str, range: DateRange)
        -> PortResult<Vec<Session>>;

    async fn upsert_session(&self, session: Session) -> PortResult<()>;

    // --- Resources ---
    async fn availabilities(&self, range: DateRange) -> PortResult<Vec<TherapistAvailability>>;

    async fn rooms(&self) -> PortResult<Vec<TherapyRoom>>;

    // --- Bulk operations ---
    async fn operation(&self, operation_id: &str) -> PortResult<BulkReschedulingOperation>;

    async fn save_operation(&self, operation: BulkReschedulingOperation) -> PortResult<()>;

    // --- Freezes ---
    async fn freeze(&self, freeze_id: &str) -> PortResult<SubscriptionFreeze>;

    async fn freezes_for_subscription(&self, subscription_id: &str)
        -> PortResult<Vec<SubscriptionFreeze>>;

    async fn save_freeze(&self, freeze: SubscriptionFreeze) -> PortResult<()>;
}

#[async_trait]
pub trait EnrollmentService: Send + Sync {
    /// Whether the student's enrollment covers this session.
    async fn check_enrollment(&self, session: &Session) -> PortResult<CollaboratorResult>;
}

#[async_trait]
pub trait BillingService: Send + Sync {
    /// Whether the session can be billed (active subscription, sessions left).
    async fn check_billing(&self, session: &Session) -> PortResult<CollaboratorResult>;
}

#[async_trait]
pub trait QualificationService: Send + Sync {
    /// Whether the therapist is qualified for the session type.
    async fn check_qualification(&self, session: &Session) -> PortResult<CollaboratorResult>;
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Hands an event over for delivery.
    async fn publish(&self, event: ScheduleEvent) -> PortResult<()>;
}
