//! Schedule optimization.
//!
//! Assigns every session of a request a therapist, room, date and start so
//! that no blocking conflict exists, maximizing a weighted objective.
//! Strategies share one contract and are selected by explicit dispatch on
//! [`OptimizerStrategy`]:
//!
//! | Strategy | Module |
//! |----------|--------|
//! | Genetic algorithm | [`genetic`] |
//! | Simulated annealing | [`annealing`] |
//! | Constraint satisfaction | [`csp`] |
//! | Hybrid / adaptive | [`hybrid`] |
//!
//! Every strategy's output passes through the same repair step, so the
//! returned schedule never contains a blocking conflict, neither among the
//! optimized sessions nor against `fixed_sessions`. Sessions that cannot be
//! placed are listed as unresolved with their blocking reasons.
//!
//! Results are proposals. Nothing is written anywhere.

pub mod annealing;
pub mod csp;
pub mod genetic;
pub mod hybrid;
mod objective;
mod problem;

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::conflict::{ConflictDetector, DetectorConfig};
use crate::error::{Error, Result};
use crate::models::{
    DateRange, OptimizationConstraints, Placement, ProposedSchedule, Session,
    TherapistAvailability, TherapyRoom,
};
use crate::validation::{self, ValidationError, ValidationErrorKind};

pub use annealing::AnnealingConfig;
pub use csp::CspConfig;
pub use genetic::{CrossoverType, GeneticConfig, MutationType};
pub use hybrid::HybridConfig;
pub use objective::ObjectiveBreakdown;

use problem::{candidate_placements, SchedulingProblem};

/// Search strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerStrategy {
    GeneticAlgorithm,
    SimulatedAnnealing,
    ConstraintSatisfaction,
    #[default]
    Hybrid,
}

/// Quality/speed trade-off. Only [`OptimizerStrategy::Hybrid`] adapts to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceMode {
    #[default]
    Normal,
    PeakLoad,
}

/// One optimization run's input snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    /// Sessions to (re)place.
    pub sessions: Vec<Session>,
    /// Sessions outside the optimization scope; treated as fixed.
    #[serde(default)]
    pub fixed_sessions: Vec<Session>,
    pub availabilities: Vec<TherapistAvailability>,
    pub rooms: Vec<TherapyRoom>,
    #[serde(default)]
    pub constraints: OptimizationConstraints,
    #[serde(default)]
    pub strategy: OptimizerStrategy,
    #[serde(default)]
    pub mode: PerformanceMode,
    /// Extra therapists a session may move to, keyed by session id.
    #[serde(default)]
    pub candidate_therapists: BTreeMap<String, Vec<String>>,
    /// Dates sessions may move to. `None` keeps each on its own date.
    #[serde(default)]
    pub date_range: Option<DateRange>,
    /// Largest unresolved fraction still reported as success.
    #[serde(default)]
    pub unresolved_tolerance: f64,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    /// Overrides the optimizer's seed.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl OptimizationRequest {
    pub fn new(
        sessions: Vec<Session>,
        availabilities: Vec<TherapistAvailability>,
        rooms: Vec<TherapyRoom>,
    ) -> Self {
        Self {
            sessions,
            fixed_sessions: Vec::new(),
            availabilities,
            rooms,
            constraints: OptimizationConstraints::default(),
            strategy: OptimizerStrategy::default(),
            mode: PerformanceMode::default(),
            candidate_therapists: BTreeMap::new(),
            date_range: None,
            unresolved_tolerance: 0.0,
            time_budget_ms: None,
            seed: None,
        }
    }

    pub fn with_fixed_sessions(mut self, fixed: Vec<Session>) -> Self {
        self.fixed_sessions = fixed;
        self
    }

    pub fn with_constraints(mut self, constraints: OptimizationConstraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn with_strategy(mut self, strategy: OptimizerStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_mode(mut self, mode: PerformanceMode) -> Self {
        self.mode = mode;
        self
    }

    /// Lets `session_id` move to any of `therapists`.
    pub fn with_candidates(mut self, session_id: impl Into<String>, therapists: Vec<String>) -> Self {
        self.candidate_therapists.insert(session_id.into(), therapists);
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.unresolved_tolerance = tolerance;
        self
    }

    pub fn with_time_budget(mut self, budget_ms: u64) -> Self {
        self.time_budget_ms = Some(budget_ms);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Therapists `session` may be assigned to, its own first.
    pub fn therapists_for(&self, session: &Session) -> Vec<String> {
        let mut out = vec![session.therapist_id().to_string()];
        if let Some(extra) = self.candidate_therapists.get(&session.id) {
            for t in extra {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        }
        out
    }

    /// Dates `session` may be placed on.
    pub fn dates_for(&self, session: &Session) -> Vec<NaiveDate> {
        match &self.date_range {
            Some(range) => range.iter().collect(),
            None => vec![session.date()],
        }
    }

    /// Rejects malformed requests before anything is computed.
    pub fn validate(&self) -> Result<()> {
        self.constraints.validate()?;

        let mut all = self.sessions.clone();
        all.extend(self.fixed_sessions.iter().cloned());
        let mut errors = validation::validate_snapshot(&all, &self.availabilities, &self.rooms)
            .err()
            .unwrap_or_default();
        if let Some(range) = &self.date_range {
            if let Err(e) = validation::validate_date_range("date_range", range) {
                errors.extend(e);
            }
        }
        if !(0.0..=1.0).contains(&self.unresolved_tolerance) {
            errors.push(ValidationError::new(
                ValidationErrorKind::OutOfRange,
                format!("unresolved_tolerance {} is outside [0, 1]", self.unresolved_tolerance),
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(errors))
        }
    }
}

/// A session the optimizer could not place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedSession {
    pub session_id: String,
    /// Blocking reasons, most specific first.
    pub reasons: Vec<String>,
}

/// How the search went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMetadata {
    pub strategy_used: OptimizerStrategy,
    /// Concrete algorithm chain, e.g. `greedy+annealing`.
    pub algorithm: String,
    /// Generations, iterations or search nodes actually executed.
    pub iterations: usize,
    /// Stopped on its own criteria rather than the deadline.
    pub converged: bool,
    pub deadline_reached: bool,
    pub degradation_applied: bool,
    pub elapsed_ms: u64,
}

/// Result of [`ScheduleOptimizer::generate_optimal_schedule`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    /// False only when the unresolved fraction exceeds the tolerance.
    pub success: bool,
    pub schedule: ProposedSchedule,
    pub unresolved: Vec<UnresolvedSession>,
    /// Objective in [0, 1].
    pub score: f64,
    pub objective: ObjectiveBreakdown,
    pub metadata: SearchMetadata,
}

/// Time budget of one search.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    pub fn new(budget_ms: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            budget: budget_ms.map(Duration::from_millis),
        }
    }

    pub fn expired(&self) -> bool {
        self.budget.is_some_and(|b| self.start.elapsed() >= b)
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Raw output of one strategy, before repair.
#[derive(Debug, Clone)]
pub(crate) struct SearchOutcome {
    pub genes: Vec<Option<usize>>,
    pub iterations: usize,
    pub converged: bool,
    pub deadline_reached: bool,
    pub degradation_applied: bool,
    pub algorithm: &'static str,
}

impl SearchOutcome {
    /// Outcome of a search that ran to its own end.
    pub fn finished(genes: Vec<Option<usize>>, iterations: usize, algorithm: &'static str) -> Self {
        Self {
            genes,
            iterations,
            converged: true,
            deadline_reached: false,
            degradation_applied: false,
            algorithm,
        }
    }
}

/// Where to look for a single session's slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotSearch {
    /// Placement closeness is measured against.
    pub anchor: Placement,
    pub therapists: Vec<String>,
    pub dates: Vec<NaiveDate>,
    /// First feasible slot instead of the best one.
    pub emergency: bool,
}

/// Stateless optimizer service. Construct one per request or share it; it
/// keeps nothing between calls.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptimizer {
    detector: DetectorConfig,
    genetic: GeneticConfig,
    annealing: AnnealingConfig,
    csp: CspConfig,
    hybrid: HybridConfig,
    seed: u64,
}

impl ScheduleOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Optimizer tuned by `config`.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            detector: config.detector.clone(),
            genetic: config.genetic.clone(),
            annealing: config.annealing.clone(),
            csp: config.csp.clone(),
            hybrid: config.hybrid.clone(),
            seed: config.seed,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Produces a conflict-free proposed schedule for `request`.
    ///
    /// # Errors
    /// [`Error::Validation`] or [`Error::InvalidConstraints`] for malformed
    /// requests. Infeasibility is reported in the result, not as an error.
    pub fn generate_optimal_schedule(&self, request: &OptimizationRequest) -> Result<OptimizationResult> {
        request.validate()?;

        let budget = request.time_budget_ms.or(match request.strategy {
            OptimizerStrategy::Hybrid => Some(self.hybrid.time_budget_ms),
            _ => None,
        });
        let deadline = Deadline::new(budget);
        let seed = request.seed.unwrap_or(self.seed);

        let problem = SchedulingProblem::build(request, &self.detector);
        info!(
            strategy = ?request.strategy,
            mode = ?request.mode,
            sessions = problem.len(),
            unplaceable = problem.unplaceable.len(),
            "optimization started"
        );

        let outcome = match request.strategy {
            OptimizerStrategy::GeneticAlgorithm => genetic::run(&problem, &self.genetic, seed, &deadline),
            OptimizerStrategy::SimulatedAnnealing => {
                annealing::run(&problem, &self.annealing, seed, &deadline)
            }
            OptimizerStrategy::ConstraintSatisfaction => csp::run(&problem, &self.csp, &deadline),
            OptimizerStrategy::Hybrid => hybrid::run(
                &problem,
                &self.hybrid,
                &self.annealing,
                &self.csp,
                request.mode,
                seed,
                &deadline,
            ),
        };

        let (genes, repaired_out) = problem.repair(&outcome.genes);
        let mut unresolved = problem.unplaceable.clone();
        unresolved.extend(repaired_out);
        let objective = problem.objective(&genes);
        let schedule = problem.schedule(&genes);

        let total = request.sessions.iter().filter(|s| s.is_active()).count();
        let unresolved_fraction = if total == 0 {
            0.0
        } else {
            unresolved.len() as f64 / total as f64
        };
        let success = unresolved_fraction <= request.unresolved_tolerance + f64::EPSILON;

        let metadata = SearchMetadata {
            strategy_used: request.strategy,
            algorithm: outcome.algorithm.to_string(),
            iterations: outcome.iterations,
            converged: outcome.converged,
            deadline_reached: outcome.deadline_reached,
            degradation_applied: outcome.degradation_applied,
            elapsed_ms: deadline.elapsed_ms(),
        };
        info!(
            algorithm = %metadata.algorithm,
            placed = schedule.len(),
            unresolved = unresolved.len(),
            iterations = metadata.iterations,
            score = objective.score,
            converged = metadata.converged,
            degraded = metadata.degradation_applied,
            "optimization finished"
        );

        Ok(OptimizationResult {
            success,
            schedule,
            unresolved,
            score: objective.score,
            objective,
            metadata,
        })
    }

    /// Best conflict-free placement for one session, or `None`.
    ///
    /// `sessions` is the current snapshot (it may contain `session` itself).
    /// Normal mode picks the highest preference score, ties going to the
    /// slot closest to the anchor. Emergency mode takes the closest
    /// feasible slot.
    pub fn best_slot(
        &self,
        session: &Session,
        search: &SlotSearch,
        sessions: &[Session],
        availabilities: &[TherapistAvailability],
        rooms: &[TherapyRoom],
        constraints: &OptimizationConstraints,
    ) -> Option<Placement> {
        let detector = ConflictDetector::new(self.detector.clone()).with_preferences(constraints);
        let mut feasible: Vec<Placement> = candidate_placements(
            session,
            &search.therapists,
            &search.dates,
            availabilities,
            rooms,
            self.detector.slot_step_min.max(1),
            constraints.facility.enforce_equipment,
        )
        .into_iter()
        .filter(|p| {
            detector
                .check_placement(session, p, sessions, availabilities, rooms)
                .is_empty()
        })
        .collect();

        let anchor = &search.anchor;
        let distance = |p: &Placement| {
            (
                (p.date - anchor.date).num_days().abs(),
                (p.start_min - anchor.start_min).abs(),
                p.therapist_id != anchor.therapist_id,
                p.room_id != anchor.room_id,
            )
        };
        feasible.sort_by_key(|p| distance(p));
        debug!(session_id = %session.id, feasible = feasible.len(), emergency = search.emergency, "slot search");

        if search.emergency {
            return feasible.into_iter().next();
        }
        let mut best: Option<(f64, Placement)> = None;
        for p in feasible {
            let score = constraints.preference_score(&session.student_id, &p.window());
            // sorted by distance, so only a strictly higher score replaces
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, p));
            }
        }
        best.map(|(_, p)| p)
    }
}
