//! Bulk rescheduling.
//!
//! Applies one change (date-range shift, therapist handover, emergency move,
//! cancellation) to many sessions, one at a time, recording per-session
//! outcomes and an undo log. Partial failure never triggers an automatic
//! rollback; [`BulkCoordinator::rollback_changes`] is an explicit request.

mod coordinator;

use serde::{Deserialize, Serialize};

use crate::conflict::Conflict;
use crate::models::{BulkOperationStatus, BulkProgress, NotReverted, SessionOutcome};

pub use coordinator::BulkCoordinator;

/// Coordinator tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    /// Budget of emergency operations that set none themselves.
    pub emergency_time_budget_ms: u64,
    /// Largest `max_day_offset` an emergency operation may ask for.
    pub max_day_offset: u32,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            emergency_time_budget_ms: 5_000,
            max_day_offset: 30,
        }
    }
}

/// Result of [`BulkCoordinator::process_bulk_operation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperationResult {
    pub operation_id: String,
    /// True only when every session was changed.
    pub success: bool,
    pub status: BulkOperationStatus,
    pub progress: BulkProgress,
    pub outcomes: Vec<SessionOutcome>,
    /// Blocking conflicts of the failed sessions.
    pub conflicts: Vec<Conflict>,
    pub successful_session_ids: Vec<String>,
    pub failed_session_ids: Vec<String>,
    pub deadline_reached: bool,
}

/// Result of [`BulkCoordinator::rollback_changes`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackResult {
    pub operation_id: String,
    /// True when every changed session was restored.
    pub success: bool,
    pub reverted: Vec<String>,
    pub not_reverted: Vec<NotReverted>,
    pub status: BulkOperationStatus,
}
