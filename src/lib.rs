//! Scheduling engine for therapy centers.
//!
//! Places therapy sessions (student × therapist × room × time) so that no
//! therapist, room or student is double-booked, every session sits inside
//! its therapist's availability, and soft preferences are met as well as
//! possible.
//!
//! # Modules
//!
//! - **`models`**: Domain types: `Session`, `Placement`, `TherapistAvailability`,
//!   `TherapyRoom`, `OptimizationConstraints`, `BulkReschedulingOperation`,
//!   `SubscriptionFreeze`
//! - **`validation`**: Structural checks (duplicate IDs, inverted intervals, breaks, rooms)
//! - **`conflict`**: Blocking and advisory conflict detection with alternative slots
//! - **`optimizer`**: Genetic algorithm, simulated annealing, backtracking CSP and a
//!   hybrid strategy over one shared objective
//! - **`bulk`**: Many-session rescheduling with progress, per-item outcomes and rollback
//! - **`freeze`**: Subscription freeze impact and application
//! - **`integration`**: Enrollment, therapist, room and billing checks before a commit
//! - **`ports`**, **`store`**: Collaborator contracts and an in-memory store
//! - **`api`**: JSON request/response functions
//!
//! # Architecture
//!
//! The optimizer and detector are synchronous and work on a caller-supplied
//! snapshot. The bulk coordinator, freeze planner and integration facade are
//! async services built around injected `Arc<dyn Trait>` collaborators; none
//! of them keeps state between requests beyond what the store holds.
//! Optimization only proposes: nothing is written until a caller commits.
//!
//! # References
//!
//! - Burke & Petrovic (2002), "Recent research directions in automated timetabling"
//! - Kirkpatrick, Gelatt & Vecchi (1983), "Optimization by Simulated Annealing"
//! - Haralick & Elliott (1980), "Increasing tree search efficiency for constraint satisfaction problems"

pub mod api;
pub mod bulk;
pub mod config;
pub mod conflict;
pub mod error;
pub mod freeze;
pub mod integration;
pub mod locks;
pub mod models;
pub mod optimizer;
pub mod ports;
pub mod retry;
pub mod store;
pub mod validation;

pub use bulk::{BulkCoordinator, BulkOperationResult, RollbackResult};
pub use config::EngineConfig;
pub use conflict::{Conflict, ConflictDetector, ConflictKind, ConflictReport, Severity};
pub use error::{Error, Result};
pub use freeze::{FreezePlanner, FreezeResult};
pub use integration::{IntegrationService, IntegrationValidation};
pub use optimizer::{OptimizationRequest, OptimizationResult, OptimizerStrategy, PerformanceMode, ScheduleOptimizer};
