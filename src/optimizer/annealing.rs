//! Simulated annealing over slot assignments.
//!
//! # Algorithm
//!
//! A single current assignment is perturbed each iteration by one of:
//! - **Swap**: two sessions exchange slots, when each slot is in the
//!   other's domain
//! - **Move**: one session shifts to a neighboring start on the same
//!   therapist, room and date, or to a random domain entry
//!
//! Improving moves are always accepted, worsening ones with probability
//! `exp(-Δ/T)`. `T ← T × cooling_rate` until `min_temperature` or
//! `max_iterations`.
//!
//! # Reference
//! Kirkpatrick, Gelatt & Vecchi (1983), "Optimization by Simulated Annealing"

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::genetic::neighbor;
use super::hybrid::greedy_first_fit;
use super::problem::SchedulingProblem;
use super::{Deadline, SearchOutcome};

/// Probability of trying a swap before a move.
const SWAP_PROBABILITY: f64 = 0.3;

/// SA parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnealingConfig {
    pub initial_temperature: f64,
    /// Geometric decay factor in (0, 1).
    pub cooling_rate: f64,
    pub min_temperature: f64,
    pub max_iterations: usize,
}

impl Default for AnnealingConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 1.0,
            cooling_rate: 0.995,
            min_temperature: 1e-3,
            max_iterations: 5_000,
        }
    }
}

/// Runs SA from the greedy first-fit assignment.
pub(crate) fn run(
    problem: &SchedulingProblem<'_>,
    config: &AnnealingConfig,
    seed: u64,
    deadline: &Deadline,
) -> SearchOutcome {
    let initial = greedy_first_fit(problem)
        .into_iter()
        .map(|g| g.unwrap_or(0))
        .collect();
    anneal(problem, config, initial, seed, deadline)
}

/// Runs SA from `initial` (one domain index per session).
pub(crate) fn anneal(
    problem: &SchedulingProblem<'_>,
    config: &AnnealingConfig,
    initial: Vec<usize>,
    seed: u64,
    deadline: &Deadline,
) -> SearchOutcome {
    let n = problem.len();
    if n == 0 {
        return SearchOutcome::finished(Vec::new(), 0, "annealing");
    }
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut current = initial;
    let mut current_cost = problem.cost_full(&current);
    let mut best = current.clone();
    let mut best_cost = current_cost;

    let cooling = config.cooling_rate.clamp(0.0, 1.0 - f64::EPSILON);
    let mut temperature = config.initial_temperature;
    let mut iterations = 0;
    let mut deadline_reached = false;

    while iterations < config.max_iterations && temperature > config.min_temperature {
        if deadline.expired() {
            deadline_reached = true;
            break;
        }
        iterations += 1;

        let mut candidate = current.clone();
        if !perturb(problem, &mut candidate, &mut rng) {
            temperature *= cooling;
            continue;
        }
        let cost = problem.cost_full(&candidate);
        let delta = cost - current_cost;
        let accept = delta <= 0.0 || rng.random::<f64>() < (-delta / temperature).exp();
        if accept {
            current = candidate;
            current_cost = cost;
            if current_cost < best_cost {
                best = current.clone();
                best_cost = current_cost;
            }
        }
        if best_cost <= f64::EPSILON {
            break;
        }
        temperature *= cooling;
    }

    SearchOutcome {
        genes: best.into_iter().map(Some).collect(),
        iterations,
        converged: !deadline_reached,
        deadline_reached,
        degradation_applied: false,
        algorithm: "annealing",
    }
}

/// Applies one random move. Returns false when nothing changed.
fn perturb<R: Rng>(problem: &SchedulingProblem<'_>, genes: &mut [usize], rng: &mut R) -> bool {
    let n = genes.len();
    if n >= 2 && rng.random_bool(SWAP_PROBABILITY) {
        let i = rng.random_range(0..n);
        let j = rng.random_range(0..n);
        if i != j {
            if let Some((ki, kj)) = swapped(problem, i, genes[i], j, genes[j]) {
                genes[i] = ki;
                genes[j] = kj;
                return true;
            }
        }
    }

    let i = rng.random_range(0..n);
    let domain = problem.domains[i].len();
    if domain < 2 {
        return false;
    }
    let next = neighbor(problem, i, genes[i], rng).unwrap_or_else(|| rng.random_range(0..domain));
    if next == genes[i] {
        return false;
    }
    genes[i] = next;
    true
}

/// Domain indices that put `i` in `j`'s slot and `j` in `i`'s.
fn swapped(
    problem: &SchedulingProblem<'_>,
    i: usize,
    ki: usize,
    j: usize,
    kj: usize,
) -> Option<(usize, usize)> {
    let a = problem.placement(i, ki);
    let b = problem.placement(j, kj);
    let same_slot = |p: &crate::models::Placement, q: &crate::models::Placement| {
        p.therapist_id == q.therapist_id
            && p.room_id == q.room_id
            && p.date == q.date
            && p.start_min == q.start_min
    };
    let i_to_b = problem.domains[i].iter().position(|p| same_slot(p, b))?;
    let j_to_a = problem.domains[j].iter().position(|p| same_slot(p, a))?;
    Some((i_to_b, j_to_a))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::DetectorConfig;
    use crate::models::{Placement, Session, SessionType, TherapistAvailability, TherapyRoom, TimeWindow};
    use crate::optimizer::OptimizationRequest;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn crowded_request() -> OptimizationRequest {
        let sessions = (1..=3)
            .map(|i| {
                Session::new(
                    format!("S{i}"),
                    format!("ST{i}"),
                    SessionType::Speech,
                    Placement::new("T1", "R1", day(), TimeWindow::hm((9, 0), (10, 0))),
                )
            })
            .collect();
        OptimizationRequest::new(
            sessions,
            vec![TherapistAvailability::new("T1", day(), TimeWindow::hm((9, 0), (13, 0)))],
            vec![TherapyRoom::new("R1").supporting(SessionType::Speech)],
        )
    }

    #[test]
    fn test_anneal_resolves_stacked_sessions() {
        let req = crowded_request();
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let stacked = vec![0; problem.len()];
        assert!(problem.conflict_count(&[Some(0), Some(0), Some(0)]) > 0);

        let out = anneal(&problem, &AnnealingConfig::default(), stacked, 42, &Deadline::new(None));
        assert!(out.converged);
        assert!(!out.deadline_reached);
        assert!(out.iterations > 0);
        assert_eq!(problem.conflict_count(&out.genes), 0);
    }

    #[test]
    fn test_same_seed_same_result() {
        let req = crowded_request();
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let config = AnnealingConfig::default();
        let a = run(&problem, &config, 7, &Deadline::new(None));
        let b = run(&problem, &config, 7, &Deadline::new(None));
        assert_eq!(a.genes, b.genes);
        assert_eq!(a.iterations, b.iterations);
    }

    #[test]
    fn test_expired_deadline_stops_immediately() {
        let req = crowded_request();
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let out = anneal(
            &problem,
            &AnnealingConfig::default(),
            vec![0; problem.len()],
            42,
            &Deadline::new(Some(0)),
        );
        assert!(out.deadline_reached);
        assert!(!out.converged);
        assert_eq!(out.iterations, 0);
        assert_eq!(out.genes.len(), 3);
    }
}
