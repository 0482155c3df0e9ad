//! Backtracking constraint-satisfaction search.
//!
//! # Algorithm
//!
//! 1. Pick the unassigned session with the fewest remaining values (MRV).
//! 2. Try its values in descending preference order; a value must be free
//!    of conflicts with every assigned session.
//! 3. Forward checking: remove values of unassigned sessions that the new
//!    assignment rules out. A wiped-out domain rejects the value.
//! 4. Backtrack on dead ends, up to `max_backtracks`.
//!
//! When the search stops without a complete assignment, the best partial
//! assignment seen (most sessions placed) is returned.
//!
//! # Reference
//! Haralick & Elliott (1980), "Increasing Tree Search Efficiency for
//! Constraint Satisfaction Problems"

use serde::{Deserialize, Serialize};

use super::problem::SchedulingProblem;
use super::{Deadline, SearchOutcome};

/// CSP parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CspConfig {
    pub max_backtracks: usize,
}

impl Default for CspConfig {
    fn default() -> Self {
        Self {
            max_backtracks: 10_000,
        }
    }
}

struct Search<'p, 'r> {
    problem: &'p SchedulingProblem<'r>,
    config: &'p CspConfig,
    deadline: &'p Deadline,
    genes: Vec<Option<usize>>,
    best: Vec<Option<usize>>,
    best_assigned: usize,
    backtracks: usize,
    nodes: usize,
    stopped: bool,
    deadline_reached: bool,
}

/// Runs the backtracking search.
pub(crate) fn run(
    problem: &SchedulingProblem<'_>,
    config: &CspConfig,
    deadline: &Deadline,
) -> SearchOutcome {
    let n = problem.len();
    let mut search = Search {
        problem,
        config,
        deadline,
        genes: vec![None; n],
        best: vec![None; n],
        best_assigned: 0,
        backtracks: 0,
        nodes: 0,
        stopped: false,
        deadline_reached: false,
    };
    let domains: Vec<Vec<usize>> = problem
        .domains
        .iter()
        .map(|d| (0..d.len()).collect())
        .collect();
    search.solve(&domains);

    SearchOutcome {
        genes: search.best,
        iterations: search.nodes,
        converged: !search.deadline_reached,
        deadline_reached: search.deadline_reached,
        degradation_applied: false,
        algorithm: "csp",
    }
}

impl Search<'_, '_> {
    /// Returns true once every session is assigned.
    fn solve(&mut self, domains: &[Vec<usize>]) -> bool {
        self.nodes += 1;
        let assigned = self.genes.iter().filter(|g| g.is_some()).count();
        if assigned > self.best_assigned || self.nodes == 1 {
            self.best_assigned = assigned;
            self.best = self.genes.clone();
        }

        let Some(i) = (0..self.genes.len())
            .filter(|&j| self.genes[j].is_none())
            .min_by_key(|&j| (domains[j].len(), j))
        else {
            return true;
        };

        let mut values = domains[i].clone();
        values.sort_by(|&a, &b| {
            self.problem
                .preference(i, b)
                .total_cmp(&self.problem.preference(i, a))
        });

        for k in values {
            if self.backtracks >= self.config.max_backtracks {
                self.stopped = true;
            }
            if self.deadline.expired() {
                self.stopped = true;
                self.deadline_reached = true;
            }
            if self.stopped {
                return false;
            }
            if self.problem.session_conflicts(i, k, &self.genes) > 0 {
                continue;
            }

            let Some(next) = self.forward_check(domains, i, k) else {
                // the value is consistent even though it dooms the rest
                if assigned + 1 > self.best_assigned {
                    self.best_assigned = assigned + 1;
                    self.best = self.genes.clone();
                    self.best[i] = Some(k);
                }
                self.backtracks += 1;
                continue;
            };
            self.genes[i] = Some(k);
            if self.solve(&next) {
                return true;
            }
            self.genes[i] = None;
            if self.stopped {
                return false;
            }
            self.backtracks += 1;
        }
        false
    }

    /// Domains after assigning `k` to `i`, or `None` on a wipe-out.
    fn forward_check(&self, domains: &[Vec<usize>], i: usize, k: usize) -> Option<Vec<Vec<usize>>> {
        let p = self.problem.placement(i, k);
        let mut next = domains.to_vec();
        next[i] = vec![k];
        for (j, domain) in next.iter_mut().enumerate() {
            if j == i || self.genes[j].is_some() {
                continue;
            }
            domain.retain(|&l| !self.problem.excludes(i, p, j, self.problem.placement(j, l)));
            if domain.is_empty() {
                return None;
            }
        }
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::DetectorConfig;
    use crate::models::{
        OptimizationConstraints, Placement, Session, SessionType, TherapistAvailability, TherapyRoom,
        TimeWindow,
    };
    use crate::optimizer::OptimizationRequest;
    use chrono::NaiveDate;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
    }

    fn session(id: &str, student: &str) -> Session {
        Session::new(
            id,
            student,
            SessionType::Speech,
            Placement::new("T1", "R1", day(), TimeWindow::hm((9, 0), (10, 0))),
        )
    }

    fn request(sessions: Vec<Session>, until: (i32, i32)) -> OptimizationRequest {
        OptimizationRequest::new(
            sessions,
            vec![TherapistAvailability::new("T1", day(), TimeWindow::hm((9, 0), until))],
            vec![TherapyRoom::new("R1").supporting(SessionType::Speech)],
        )
    }

    #[test]
    fn test_finds_complete_assignment() {
        let req = request(vec![session("S1", "ST1"), session("S2", "ST2"), session("S3", "ST3")], (12, 0));
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let out = run(&problem, &CspConfig::default(), &Deadline::new(None));
        assert!(out.genes.iter().all(Option::is_some));
        assert_eq!(problem.conflict_count(&out.genes), 0);
        assert!(out.converged);
    }

    #[test]
    fn test_prefers_preferred_window() {
        let constraints = OptimizationConstraints::default()
            .with_preferred_window("ST1", TimeWindow::hm((11, 0), (12, 0)));
        let req = request(vec![session("S1", "ST1")], (12, 0)).with_constraints(constraints);
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let out = run(&problem, &CspConfig::default(), &Deadline::new(None));
        let k = out.genes[0].unwrap();
        assert_eq!(problem.placement(0, k).window(), TimeWindow::hm((11, 0), (12, 0)));
    }

    #[test]
    fn test_over_constrained_returns_best_partial() {
        // two hours, three one-hour sessions
        let req = request(vec![session("S1", "ST1"), session("S2", "ST2"), session("S3", "ST3")], (11, 0));
        let problem = SchedulingProblem::build(&req, &DetectorConfig::default());
        let config = CspConfig { max_backtracks: 200 };
        let out = run(&problem, &config, &Deadline::new(None));
        let placed = out.genes.iter().filter(|g| g.is_some()).count();
        assert_eq!(placed, 2);
        assert_eq!(problem.conflict_count(&out.genes), 0);
    }
}
