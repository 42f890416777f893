//! Direct solver: two-phase projected gradient
//!
//! Phase 1 minimizes (v·p − E*)² over the region P, where E* = cost·(1 − target).
//! Its first step, 1/(2‖v‖²), moves exactly onto the target hyperplane before
//! projecting back onto P. It ends on the hyperplane when the target is
//! attainable and at the closest attainable expected value otherwise.
//!
//! Phase 2 maximizes Shannon entropy over P ∩ {v·p = L}, where L is E* when
//! phase 1 hit the target and the closest attainable expected value when it
//! did not. Entropy is strictly concave, so the answer is unique and
//! independent of the starting point.
//!
//! A balanced problem skips both phases and descends its weighted objective
//! once; entropy plays no part there.
//!
//! Both phases are projected gradient ascent with Barzilai-Borwein steps and
//! Armijo backtracking along the projection arc.

use super::{Problem, Solution, Solver};
use crate::config::{DirectConfig, EngineConfig};
use crate::stats::entropy_of;
use tracing::debug;

/// Armijo sufficient-increase constant
const ARMIJO: f64 = 1e-4;
/// Step bounds relative to a phase's first step. Backtracking below the
/// lower one means the point is stationary.
const MIN_STEP: f64 = 1e-12;
const MAX_STEP: f64 = 1e8;

#[derive(Debug, Clone)]
pub struct DirectSolver {
    config: DirectConfig,
    constraint_tolerance: f64,
}

impl DirectSolver {
    pub fn new(config: &EngineConfig) -> Self {
        DirectSolver {
            config: config.direct.clone(),
            constraint_tolerance: config.constraint_tolerance,
        }
    }

    /// Projection tolerance, two orders tighter than the outer loop's
    fn inner_tolerance(&self) -> f64 {
        self.config.tolerance * 1e-2
    }

    fn project(&self, problem: &Problem<'_>, y: &[f64], hyperplane: Option<(&[f64], f64)>) -> Vec<f64> {
        problem
            .constraints
            .project(y, hyperplane, self.config.projection_sweeps, self.inner_tolerance())
            .0
    }

    /// Phase 1. Returns the closest point found, iterations used and whether
    /// the step size fell below tolerance.
    fn close_gap(&self, problem: &Problem<'_>) -> (Vec<f64>, usize, bool) {
        let values = problem.values.as_slice();
        let target_ev = problem.target_ev();
        let norm_sq = dot(values, values);
        if norm_sq <= f64::EPSILON {
            // Every item is worthless; any point of P is as good as another
            return (self.project(problem, &problem.start, None), 0, true);
        }
        self.ascend(
            problem,
            &problem.start,
            None,
            |p| -(dot(values, p) - target_ev).powi(2),
            |p| {
                let gap = dot(values, p) - target_ev;
                values.iter().map(|v| -2.0 * gap * v).collect()
            },
            0.5 / norm_sq,
        )
    }

    /// Balanced solve: one descent on the full weighted objective. The
    /// first step is the inverse curvature of the edge term.
    fn balance(&self, problem: &Problem<'_>) -> (Vec<f64>, usize, bool) {
        let norm_sq = dot(&problem.values, &problem.values) / (problem.cost * problem.cost);
        self.ascend(
            problem,
            &problem.start,
            None,
            |p| -problem.objective(p),
            |p| problem.objective_gradient(p).into_iter().map(|g| -g).collect(),
            0.5 / norm_sq.max(1.0),
        )
    }

    /// Phase 2. Entropy ascent on the slice v·p = `level`, starting from `start`.
    fn spread(&self, problem: &Problem<'_>, start: &[f64], level: f64) -> (Vec<f64>, usize, bool) {
        let slice = Some((problem.values.as_slice(), level));
        self.ascend(problem, start, slice, entropy_of, entropy_gradient, 1.0)
    }

    /// Projected gradient ascent of `objective` over P (cut by `slice` when
    /// given). Barzilai-Borwein steps, backtracked until the Armijo condition
    /// holds along the projection arc.
    fn ascend(
        &self,
        problem: &Problem<'_>,
        start: &[f64],
        slice: Option<(&[f64], f64)>,
        objective: impl Fn(&[f64]) -> f64,
        gradient: impl Fn(&[f64]) -> Vec<f64>,
        first_step: f64,
    ) -> (Vec<f64>, usize, bool) {
        let mut p = self.project(problem, start, slice);
        let mut f = objective(&p);
        let mut grad = gradient(&p);
        let mut step = first_step;

        for iteration in 1..=self.config.max_iterations {
            let mut eta = step;
            let accepted = loop {
                let trial: Vec<f64> = p.iter().zip(&grad).map(|(pi, gi)| pi + eta * gi).collect();
                let candidate = self.project(problem, &trial, slice);
                let moved: Vec<f64> = candidate.iter().zip(&p).map(|(c, pi)| c - pi).collect();
                let f_candidate = objective(&candidate);
                if f_candidate >= f + ARMIJO * dot(&grad, &moved) {
                    break Some((candidate, moved, f_candidate));
                }
                eta *= 0.5;
                if eta < first_step * MIN_STEP {
                    break None;
                }
            };
            // No ascent direction left: stationary
            let Some((candidate, moved, f_candidate)) = accepted else {
                return (p, iteration, true);
            };

            let next_grad = gradient(&candidate);
            let grad_change: Vec<f64> = next_grad.iter().zip(&grad).map(|(a, b)| a - b).collect();
            // Concave objective: s·Δg < 0 along any real move
            let curvature = dot(&moved, &grad_change);
            step = if curvature < 0.0 {
                (-dot(&moved, &moved) / curvature).clamp(first_step * MIN_STEP, first_step * MAX_STEP)
            } else {
                first_step
            };

            let delta = moved.iter().fold(0.0_f64, |m, d| m.max(d.abs()));
            p = candidate;
            f = f_candidate;
            grad = next_grad;
            if delta < self.config.tolerance {
                return (p, iteration, true);
            }
        }
        (p, self.config.max_iterations, false)
    }
}

impl Solver for DirectSolver {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn solve(&self, problem: &Problem<'_>) -> Solution {
        if problem.is_balanced() {
            let (probabilities, iterations, converged) = self.balance(problem);
            debug!(
                iterations,
                converged,
                objective = problem.objective(&probabilities),
                "direct balanced solve done"
            );
            return Solution {
                probabilities,
                iterations,
                converged,
                trace: Vec::new(),
            };
        }

        let (closest, gap_iterations, gap_converged) = self.close_gap(problem);
        let reached = problem.hits_target(&closest);
        debug!(
            iterations = gap_iterations,
            converged = gap_converged,
            reached,
            edge = problem.edge(&closest),
            "direct phase 1 done"
        );

        // Unreachable targets still get the entropy tie-break, on the slice
        // of the closest attainable expected value
        let level = if reached {
            problem.target_ev()
        } else {
            dot(&problem.values, &closest)
        };
        let (spread, spread_iterations, spread_converged) = self.spread(problem, &closest, level);
        let iterations = gap_iterations + spread_iterations;
        debug!(
            iterations = spread_iterations,
            converged = spread_converged,
            entropy = entropy_of(&spread),
            "direct phase 2 done"
        );

        // Keep the phase 2 answer only if projection round-off left it valid
        // and no farther from the target than phase 1
        let slack = self.constraint_tolerance;
        let residual = |p: &[f64]| (problem.edge(p) - problem.target_edge).abs();
        let valid = (!reached || problem.hits_target(&spread))
            && residual(&spread) <= residual(&closest) + slack
            && problem.constraints.ordering_violation(&spread) <= slack * slack
            && spread.iter().zip(problem.constraints.bands()).all(|(&pi, b)| b.contains(pi, slack));
        let (probabilities, converged) = match (valid, reached) {
            (true, true) => (spread, gap_converged && spread_converged),
            // On an unreachable target phase 1 already fixed the objective
            (true, false) => (spread, gap_converged),
            (false, _) => (closest, gap_converged),
        };
        Solution {
            probabilities,
            iterations,
            converged,
            trace: Vec::new(),
        }
    }
}

/// ∂H/∂p = −(ln p + 1), with p floored to stay finite at the boundary
fn entropy_gradient(p: &[f64]) -> Vec<f64> {
    p.iter().map(|&pi| -(pi.max(f64::MIN_POSITIVE).ln() + 1.0)).collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
