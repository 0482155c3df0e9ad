//! Adaptive strategy and the greedy first-fit pass.
//!
//! # Normal mode
//! - Up to `exact_threshold` sessions: exact backtracking search; if it
//!   cannot place everything, annealing continues from its best partial
//!   assignment.
//! - Larger problems: greedy first-fit, then annealing.
//!
//! # Peak load
//! Greedy first-fit followed by a short annealing pass (a tenth of the
//! usual iterations). The result is always flagged `degradation_applied`.
//!
//! In either mode, hitting the time budget also flags degradation.

use serde::{Deserialize, Serialize};

use super::annealing::{self, AnnealingConfig};
use super::csp::{self, CspConfig};
use super::problem::SchedulingProblem;
use super::{Deadline, PerformanceMode, SearchOutcome};

/// Hybrid strategy parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    /// Default time budget when the request sets none.
    pub time_budget_ms: u64,
    /// Largest problem solved by exact search first.
    pub exact_threshold: usize,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            time_budget_ms: 2_000,
            exact_threshold: 12,
        }
    }
}

/// Assigns sessions most constrained first, each to the first domain entry
/// free of conflicts with those already assigned. Sessions without such an
/// entry stay unassigned.
pub(crate) fn greedy_first_fit(problem: &SchedulingProblem<'_>) -> Vec<Option<usize>> {
    let mut genes = vec![None; problem.len()];
    for i in problem.most_constrained_order() {
        genes[i] = (0..problem.domains[i].len()).find(|&k| problem.session_conflicts(i, k, &genes) == 0);
    }
    genes
}

/// Runs the hybrid strategy.
pub(crate) fn run(
    problem: &SchedulingProblem<'_>,
    config: &HybridConfig,
    annealing_config: &AnnealingConfig,
    csp_config: &CspConfig,
    mode: PerformanceMode,
    seed: u64,
    deadline: &Deadline,
) -> SearchOutcome {
    if problem.is_empty() {
        let mut out = SearchOutcome::finished(Vec::new(), 0, "hybrid");
        out.degradation_applied = mode == PerformanceMode::PeakLoad;
        return out;
    }

    match mode {
        PerformanceMode::PeakLoad => {
            let greedy = greedy_first_fit(problem);
            let short = AnnealingConfig {
                max_iterations: (annealing_config.max_iterations / 10).max(1),
                ..annealing_config.clone()
            };
            let mut out = annealing::anneal(problem, &short, fill(&greedy), seed, deadline);
            out.iterations += 1;
            out.degradation_applied = true;
            out.algorithm = "greedy+annealing";
            out
        }
        PerformanceMode::Normal if problem.len() <= config.exact_threshold => {
            let exact = csp::run(problem, csp_config, deadline);
            let complete = exact.genes.iter().all(Option::is_some);
            if (complete && problem.conflict_count(&exact.genes) == 0) || exact.deadline_reached {
                let mut out = exact;
                out.degradation_applied = out.deadline_reached;
                return out;
            }
            let greedy = greedy_first_fit(problem);
            let start: Vec<usize> = exact
                .genes
                .iter()
                .zip(&greedy)
                .map(|(e, g)| e.or(*g).unwrap_or(0))
                .collect();
            let mut out = annealing::anneal(problem, annealing_config, start, seed, deadline);
            out.iterations += exact.iterations;
            out.degradation_applied = out.deadline_reached;
            out.algorithm = "csp+annealing";
            out
        }
        PerformanceMode::Normal => {
            let greedy = greedy_first_fit(problem);
            let mut out = annealing::anneal(problem, annealing_config, fill(&greedy), seed, deadline);
            out.iterations += 1;
            out.degradation_applied = out.deadline_reached;
            out.algorithm = "greedy+annealing";
            out
        }
    }
}

fn fill(genes: &[Option<usize>]) -> Vec<usize> {
    genes.iter().map(|g| g.unwrap_or(0)).collect()
}
