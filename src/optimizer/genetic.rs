//! Genetic algorithm over slot assignments.
//!
//! # Encoding
//!
//! A chromosome holds one domain index per schedulable session. Fitness is
//! the problem cost (lower = better), so infeasible chromosomes survive
//! only while nothing better exists.
//!
//! # Loop
//! 1. Seed: one greedy first-fit chromosome, the rest random.
//! 2. Each generation keeps `elite_count` best, then fills the population
//!    with tournament-selected parents, crossover and mutation.
//! 3. Stops at `max_generations`, after `stall_generations` without an
//!    improvement above `convergence_threshold`, or at the deadline.
//!
//! # Reference
//! Burke & Petrovic (2002), "Recent research directions in automated timetabling"

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::hybrid::greedy_first_fit;
use super::problem::SchedulingProblem;
use super::{Deadline, SearchOutcome};

/// Crossover strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrossoverType {
    /// Each gene from either parent with probability 0.5.
    Uniform,
    /// Prefix from one parent, suffix from the other.
    OnePoint,
}

/// Mutation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationType {
    /// Random new domain entry.
    Reassign,
    /// Neighboring start on the same therapist, room and date.
    Shift,
}

/// GA parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneticConfig {
    pub population_size: usize,
    pub max_generations: usize,
    pub crossover_rate: f64,
    /// Per-gene mutation probability.
    pub mutation_rate: f64,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub stall_generations: usize,
    pub convergence_threshold: f64,
    pub crossover_type: CrossoverType,
    pub mutation_type: MutationType,
}

impl Default for GeneticConfig {
    fn default() -> Self {
        Self {
            population_size: 40,
            max_generations: 150,
            crossover_rate: 0.85,
            mutation_rate: 0.1,
            elite_count: 2,
            tournament_size: 3,
            stall_generations: 25,
            convergence_threshold: 1e-6,
            crossover_type: CrossoverType::Uniform,
            mutation_type: MutationType::Shift,
        }
    }
}

#[derive(Debug, Clone)]
struct Chromosome {
    genes: Vec<usize>,
    /// Lower = better.
    fitness: f64,
}

impl Chromosome {
    fn random<R: Rng>(problem: &SchedulingProblem<'_>, rng: &mut R) -> Self {
        let genes = problem
            .domains
            .iter()
            .map(|d| rng.random_range(0..d.len()))
            .collect();
        Self {
            genes,
            fitness: f64::INFINITY,
        }
    }
}

/// Runs the GA.
pub(crate) fn run(
    problem: &SchedulingProblem<'_>,
    config: &GeneticConfig,
    seed: u64,
    deadline: &Deadline,
) -> SearchOutcome {
    let mut rng = SmallRng::seed_from_u64(seed);
    let n = problem.len();
    if n == 0 {
        return SearchOutcome::finished(Vec::new(), 0, "genetic");
    }
    let pop_size = config.population_size.max(2);
    let elite = config.elite_count.min(pop_size - 1);

    let seed_genes: Vec<usize> = greedy_first_fit(problem)
        .into_iter()
        .map(|g| g.unwrap_or(0))
        .collect();
    let mut population = vec![Chromosome {
        genes: seed_genes,
        fitness: f64::INFINITY,
    }];
    while population.len() < pop_size {
        population.push(Chromosome::random(problem, &mut rng));
    }
    evaluate(problem, &mut population);

    let mut best = population[0].clone();
    let mut stall = 0;
    let mut generations = 0;
    let mut deadline_reached = false;

    while generations < config.max_generations {
        if deadline.expired() {
            deadline_reached = true;
            break;
        }
        generations += 1;

        let mut next: Vec<Chromosome> = population.iter().take(elite).cloned().collect();
        while next.len() < pop_size {
            let p1 = tournament(&population, config.tournament_size, &mut rng);
            let p2 = tournament(&population, config.tournament_size, &mut rng);
            let (mut c1, mut c2) = if rng.random_bool(config.crossover_rate.clamp(0.0, 1.0)) {
                crossover(config.crossover_type, p1, p2, &mut rng)
            } else {
                (p1.clone(), p2.clone())
            };
            mutate(config, problem, &mut c1, &mut rng);
            mutate(config, problem, &mut c2, &mut rng);
            next.push(c1);
            if next.len() < pop_size {
                next.push(c2);
            }
        }
        evaluate(problem, &mut next);
        population = next;

        let improvement = best.fitness - population[0].fitness;
        if improvement > 0.0 {
            best = population[0].clone();
        }
        if improvement > config.convergence_threshold {
            stall = 0;
        } else {
            stall += 1;
            if stall >= config.stall_generations {
                break;
            }
        }
        // conflict-free with a perfect score
        if best.fitness <= f64::EPSILON {
            break;
        }
    }

    SearchOutcome {
        genes: best.genes.into_iter().map(Some).collect(),
        iterations: generations,
        converged: !deadline_reached,
        deadline_reached,
        degradation_applied: false,
        algorithm: "genetic",
    }
}

/// Scores and sorts best first.
fn evaluate(problem: &SchedulingProblem<'_>, population: &mut [Chromosome]) {
    for c in population.iter_mut() {
        if c.fitness.is_infinite() {
            c.fitness = problem.cost_full(&c.genes);
        }
    }
    population.sort_by(|a, b| a.fitness.total_cmp(&b.fitness));
}

fn tournament<'p, R: Rng>(population: &'p [Chromosome], size: usize, rng: &mut R) -> &'p Chromosome {
    let mut best = &population[rng.random_range(0..population.len())];
    for _ in 1..size.max(1) {
        let other = &population[rng.random_range(0..population.len())];
        if other.fitness < best.fitness {
            best = other;
        }
    }
    best
}

fn crossover<R: Rng>(
    kind: CrossoverType,
    p1: &Chromosome,
    p2: &Chromosome,
    rng: &mut R,
) -> (Chromosome, Chromosome) {
    let n = p1.genes.len();
    let mut g1 = Vec::with_capacity(n);
    let mut g2 = Vec::with_capacity(n);
    match kind {
        CrossoverType::Uniform => {
            for (a, b) in p1.genes.iter().zip(&p2.genes) {
                if rng.random_bool(0.5) {
                    g1.push(*a);
                    g2.push(*b);
                } else {
                    g1.push(*b);
                    g2.push(*a);
                }
            }
        }
        CrossoverType::OnePoint => {
            let cut = if n > 1 { rng.random_range(1..n) } else { 0 };
            g1.extend_from_slice(&p1.genes[..cut]);
            g1.extend_from_slice(&p2.genes[cut..]);
            g2.extend_from_slice(&p2.genes[..cut]);
            g2.extend_from_slice(&p1.genes[cut..]);
        }
    }
    (
        Chromosome {
            genes: g1,
            fitness: f64::INFINITY,
        },
        Chromosome {
            genes: g2,
            fitness: f64::INFINITY,
        },
    )
}

fn mutate<R: Rng>(
    config: &GeneticConfig,
    problem: &SchedulingProblem<'_>,
    chromosome: &mut Chromosome,
    rng: &mut R,
) {
    let rate = config.mutation_rate.clamp(0.0, 1.0);
    for i in 0..chromosome.genes.len() {
        if !rng.random_bool(rate) {
            continue;
        }
        let domain = problem.domains[i].len();
        chromosome.genes[i] = match config.mutation_type {
            MutationType::Reassign => rng.random_range(0..domain),
            MutationType::Shift => neighbor(problem, i, chromosome.genes[i], rng)
                .unwrap_or_else(|| rng.random_range(0..domain)),
        };
        chromosome.fitness = f64::INFINITY;
    }
}

/// A domain entry on the same therapist, room and date within two slot
/// steps of entry `k`.
pub(crate) fn neighbor<R: Rng>(
    problem: &SchedulingProblem<'_>,
    i: usize,
    k: usize,
    rng: &mut R,
) -> Option<usize> {
    let current = problem.placement(i, k);
    let reach = 2 * problem.slot_step();
    let near: Vec<usize> = problem.domains[i]
        .iter()
        .enumerate()
        .filter(|(j, p)| {
            *j != k
                && p.date == current.date
                && p.therapist_id == current.therapist_id
                && p.room_id == current.room_id
                && (p.start_min - current.start_min).abs() <= reach
        })
        .map(|(j, _)| j)
        .collect();
    if near.is_empty() {
        None
    } else {
        Some(near[rng.random_range(0..near.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let c = GeneticConfig::default();
        assert_eq!(c.crossover_type, CrossoverType::Uniform);
        assert_eq!(c.mutation_type, MutationType::Shift);
        assert!(c.elite_count < c.population_size);
    }

    #[test]
    fn test_crossover_keeps_length() {
        let mut rng = SmallRng::seed_from_u64(42);
        let p1 = Chromosome {
            genes: vec![0, 1, 2, 3],
            fitness: 1.0,
        };
        let p2 = Chromosome {
            genes: vec![4, 5, 6, 7],
            fitness: 2.0,
        };
        for kind in [CrossoverType::Uniform, CrossoverType::OnePoint] {
            let (c1, c2) = crossover(kind, &p1, &p2, &mut rng);
            assert_eq!(c1.genes.len(), 4);
            assert_eq!(c2.genes.len(), 4);
            for i in 0..4 {
                assert!(c1.genes[i] == p1.genes[i] || c1.genes[i] == p2.genes[i]);
                assert_eq!(c1.genes[i] + c2.genes[i], p1.genes[i] + p2.genes[i]);
            }
        }
    }

    #[test]
    fn test_tournament_prefers_fitter() {
        let mut rng = SmallRng::seed_from_u64(42);
        let population = vec![
            Chromosome {
                genes: vec![0],
                fitness: 0.1,
            },
            Chromosome {
                genes: vec![1],
                fitness: 5.0,
            },
        ];
        let mut wins = 0;
        for _ in 0..100 {
            if tournament(&population, 3, &mut rng).fitness < 1.0 {
                wins += 1;
            }
        }
        assert!(wins > 50);
    }
}
