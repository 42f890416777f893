//! Evolutionary solver: seedable genetic search over probability vectors
//!
//! Every individual is repaired onto the box-and-sum set after it is created,
//! so Σp = 1 and the tier bands always hold. Ordering is left to a penalty in
//! the fitness; the winner is projected onto the full region at the end.
//!
//! Fitness evaluation is independent per individual and runs on rayon. All
//! random draws happen on one sequential ChaCha stream, so a fixed seed gives
//! the same result on any thread count.

use super::projection::project_box_sum;
use super::{Problem, Solution, Solver, TIE_EPSILON};
use crate::config::{EngineConfig, EvolutionaryConfig};
use crate::stats::entropy_of;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct EvolutionarySolver {
    config: EvolutionaryConfig,
    projection_sweeps: usize,
    projection_tolerance: f64,
}

/// One scored population member.
#[derive(Debug, Clone)]
struct Scored {
    genes: Vec<f64>,
    fitness: f64,
    entropy: f64,
}

impl EvolutionarySolver {
    pub fn new(config: &EngineConfig) -> Self {
        EvolutionarySolver {
            config: config.evolutionary.clone(),
            projection_sweeps: config.direct.projection_sweeps,
            projection_tolerance: config.direct.tolerance,
        }
    }

    /// Problem objective plus the weighted ordering violation.
    fn fitness(&self, problem: &Problem<'_>, p: &[f64]) -> f64 {
        problem.objective(p) + self.config.ordering_penalty * problem.constraints.ordering_violation(p)
    }

    /// Score the whole population in parallel, then rank it: lowest fitness
    /// first, entropy breaking ties. Within [`TIE_EPSILON`] of the best
    /// fitness the highest-entropy member is moved to the front.
    fn rank(&self, problem: &Problem<'_>, population: Vec<Vec<f64>>) -> Vec<Scored> {
        let mut scored: Vec<Scored> = population
            .into_par_iter()
            .map(|genes| Scored {
                fitness: self.fitness(problem, &genes),
                entropy: entropy_of(&genes),
                genes,
            })
            .collect();
        scored.sort_by(|a, b| {
            a.fitness
                .total_cmp(&b.fitness)
                .then_with(|| b.entropy.total_cmp(&a.entropy))
        });
        if let Some(best) = scored.first().map(|s| s.fitness) {
            let tied = scored.partition_point(|s| s.fitness <= best + TIE_EPSILON);
            let widest = (0..tied)
                .max_by(|&a, &b| scored[a].entropy.total_cmp(&scored[b].entropy).then(b.cmp(&a)))
                .unwrap_or(0);
            scored[..=widest].rotate_right(1);
        }
        scored
    }

    fn repair(&self, problem: &Problem<'_>, genes: &[f64]) -> Vec<f64> {
        project_box_sum(genes, problem.constraints.bands())
    }

    fn initial_population(&self, problem: &Problem<'_>, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
        let n = problem.values.len();
        let size = self.config.population_size.max(2);
        let mut population = Vec::with_capacity(size);
        population.push(self.repair(problem, &problem.start));
        population.push(self.repair(problem, &problem.constraints.center()));
        while population.len() < size {
            // Normalized exponentials are uniform on the simplex
            let raw: Vec<f64> = (0..n).map(|_| -(1.0 - rng.gen::<f64>()).ln()).collect();
            let total: f64 = raw.iter().sum();
            let genes: Vec<f64> = raw.iter().map(|x| x / total).collect();
            population.push(self.repair(problem, &genes));
        }
        population
    }

    /// Lowest rank among `tournament_size` random picks; the population is
    /// already sorted best first.
    fn tournament<'p>(&self, ranked: &'p [Scored], rng: &mut ChaCha8Rng) -> &'p [f64] {
        let winner = (0..self.config.tournament_size.max(1))
            .map(|_| rng.gen_range(0..ranked.len()))
            .min()
            .unwrap_or(0);
        &ranked[winner].genes
    }

    fn breed(&self, problem: &Problem<'_>, ranked: &[Scored], rng: &mut ChaCha8Rng) -> Vec<f64> {
        let n = problem.values.len();
        let mother = self.tournament(ranked, rng);
        let father = self.tournament(ranked, rng);
        let mut child = if n > 1 && rng.gen::<f64>() < self.config.crossover_rate {
            let cut = rng.gen_range(1..n);
            mother[..cut].iter().chain(&father[cut..]).copied().collect()
        } else {
            mother.to_vec()
        };
        if rng.gen::<f64>() < self.config.mutation_rate {
            let scale = self.config.mutation_scale;
            for gene in &mut child {
                *gene = (*gene + rng.gen_range(-scale..=scale)).max(0.0);
            }
        }
        self.repair(problem, &child)
    }
}

impl Solver for EvolutionarySolver {
    fn name(&self) -> &'static str {
        "evolutionary"
    }

    fn solve(&self, problem: &Problem<'_>) -> Solution {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        debug!(
            seed,
            population = self.config.population_size,
            generations = self.config.generations,
            "evolutionary search starting"
        );

        let size = self.config.population_size.max(2);
        let elites = self.config.elitism.min(size - 1);
        let mut ranked = self.rank(problem, self.initial_population(problem, &mut rng));
        let mut trace = Vec::with_capacity(self.config.generations);

        for _ in 0..self.config.generations {
            let mut next: Vec<Vec<f64>> = Vec::with_capacity(size);
            next.extend(ranked[..elites].iter().map(|s| s.genes.clone()));
            while next.len() < size {
                next.push(self.breed(problem, &ranked, &mut rng));
            }
            ranked = self.rank(problem, next);
            trace.push(ranked[0].fitness);
        }

        let best = &ranked[0].genes;
        let (polished, _) = problem.constraints.project(
            best,
            None,
            self.projection_sweeps,
            self.projection_tolerance,
        );
        debug!(
            seed,
            fitness = ranked[0].fitness,
            edge = problem.edge(&polished),
            "evolutionary search done"
        );
        // A balanced problem has no target to hit; the budget is the stop rule
        Solution {
            converged: problem.is_balanced() || problem.hits_target(&polished),
            probabilities: polished,
            iterations: self.config.generations,
            trace,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Band;
    use crate::fixtures::{five_tier_skeleton, two_tier_config, two_tier_skeleton};
    use crate::model::{RarityTier, Skeleton};
    use crate::optimizer::Constraints;

    fn small(config: EngineConfig, seed: u64) -> EngineConfig {
        let mut config = config.seeded(seed);
        config.evolutionary.population_size = 40;
        config.evolutionary.generations = 120;
        config
    }

    fn solve(config: &EngineConfig, constraints: &Constraints, cost: f64, values: Vec<f64>, target: f64) -> Solution {
        let problem = Problem {
            cost,
            values,
            target_edge: target,
            target_tolerance: config.target_tolerance,
            constraints,
            start: constraints.center(),
            balance: None,
        };
        EvolutionarySolver::new(config).solve(&problem)
    }

    #[test]
    fn test_same_seed_same_answer() {
        let config = small(two_tier_config(), 42);
        let skeleton = two_tier_skeleton();
        let constraints = Constraints::new(&skeleton, &config.tier_bands);
        let a = solve(&config, &constraints, skeleton.cost, skeleton.values(), 0.15);
        let b = solve(&config, &constraints, skeleton.cost, skeleton.values(), 0.15);
        assert_eq!(a, b);
    }

    #[test]
    fn test_trace_is_non_increasing() {
        // Elitism keeps the best individual, so best fitness never gets worse
        let config = small(two_tier_config(), 3);
        let skeleton = two_tier_skeleton();
        let constraints = Constraints::new(&skeleton, &config.tier_bands);
        let solution = solve(&config, &constraints, skeleton.cost, skeleton.values(), 0.15);
        assert_eq!(solution.trace.len(), 120);
        for pair in solution.trace.windows(2) {
            assert!(pair[1] <= pair[0] + TIE_EPSILON);
        }
    }

    #[test]
    fn test_output_respects_region() {
        let config = small(EngineConfig::default(), 11);
        let skeleton = five_tier_skeleton();
        let constraints = Constraints::new(&skeleton, &config.tier_bands);
        let solution = solve(&config, &constraints, skeleton.cost, skeleton.values(), 0.2);
        assert!(constraints.check(&solution.probabilities, &config).is_ok());
    }

    #[test]
    fn test_single_item_skips_crossover() {
        let config = small(EngineConfig::with_bands(&[(RarityTier::Common, Band::new(0.0, 1.0))]), 5);
        let skeleton = Skeleton::from_triples("solo", 1.0, [("only", 0.5, RarityTier::Common)]);
        let constraints = Constraints::new(&skeleton, &config.tier_bands);
        let solution = solve(&config, &constraints, 1.0, skeleton.values(), 0.5);
        assert_eq!(solution.probabilities.len(), 1);
        assert!((solution.probabilities[0] - 1.0).abs() < 1e-12);
        assert!(solution.converged);
    }

    #[test]
    fn test_ties_prefer_entropy() {
        let config = small(two_tier_config(), 1);
        let skeleton = two_tier_skeleton();
        let constraints = Constraints::new(&skeleton, &config.tier_bands);
        let problem = Problem {
            cost: skeleton.cost,
            values: skeleton.values(),
            target_edge: 0.15,
            target_tolerance: config.target_tolerance,
            constraints: &constraints,
            start: constraints.center(),
            balance: None,
        };
        let l = 1.925 / 49.6;
        let c = 0.5 - l;
        // Same edge, the even split has more entropy
        let lopsided = vec![c + 0.01, c - 0.01, l, l];
        let even = vec![c, c, l, l];
        let ranked = EvolutionarySolver::new(&config).rank(&problem, vec![lopsided, even.clone()]);
        assert_eq!(ranked[0].genes, even);
    }
}
