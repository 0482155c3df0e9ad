//! Scheduling domain models.
//!
//! Provides the core data types of a therapy center's schedule: who is
//! available when, which rooms can host what, the sessions themselves, and
//! the records of batch changes and subscription freezes.
//!
//! # Ownership
//!
//! Sessions, availability and rooms belong to the persistence collaborator.
//! The engine works on snapshots of them and returns proposed changes.
//!
//! | Type | Role |
//! |------|------|
//! | [`Session`] | One appointment; mutable part is its [`Placement`] |
//! | [`TherapistAvailability`] | Working window, breaks, daily cap |
//! | [`TherapyRoom`] | Capacity, supported types, equipment |
//! | [`OptimizationConstraints`] | Rules and weights of one optimization run |
//! | [`BulkReschedulingOperation`] | Batch change with undo log |
//! | [`SubscriptionFreeze`] | Program pause and its impact |

mod availability;
mod calendar;
mod constraint;
mod freeze;
mod operation;
mod room;
mod schedule;
mod session;

pub use availability::{AvailabilityStatus, TherapistAvailability};
pub use calendar::{hm, subtract_windows, DateRange, TimeWindow, MINUTES_PER_DAY};
pub use constraint::{
    FacilityConstraints, ObjectiveWeights, OptimizationConstraints, StudentConstraints,
    TherapistConstraints, WEIGHT_SUM_TOLERANCE,
};
pub use freeze::{FreezeRequest, FreezeStatus, FreezeStrategy, ImpactAnalysis, SubscriptionFreeze};
pub use operation::{
    AppliedChange, BulkOperationKind, BulkOperationStatus, BulkProgress,
    BulkReschedulingOperation, NotReverted, RollbackSummary, SessionOutcome,
};
pub use room::{find_room, TherapyRoom};
pub use schedule::{ProposedSchedule, SessionAssignment};
pub use session::{Placement, Session, SessionStatus, SessionType};
