//! Distribution optimizer
//!
//! Given a [`Skeleton`] and a target house edge in (0, 1), finds a probability
//! vector inside the constraint region (tier bands, Σp = 1, monotonic
//! commonality) whose house edge is as close to the target as the region
//! allows. Among equally good vectors the one with maximum Shannon entropy
//! wins.
//!
//! The facade owns everything both strategies share: input validation,
//! auto-normalization of seed probabilities, the analytic feasibility check
//! (no solver runs on an empty region), and the hard post-check on whatever a
//! solver returns. Solvers only see a [`Problem`] and hand back a [`Solution`].

pub mod balance;
pub mod constraints;
pub mod direct;
pub mod evolutionary;
pub(crate) mod projection;

pub use balance::{Balance, BalanceReport, BalanceTargets, TierShare};
pub use constraints::Constraints;
pub use direct::DirectSolver;
pub use evolutionary::EvolutionarySolver;

use crate::config::EngineConfig;
use crate::error::{Infeasibility, LootboxError, Result, Violation};
use crate::model::{RewardDistribution, Skeleton};
use crate::stats::{entropy_of, expected_value_of, house_edge_of};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Objective values closer than this count as equal (entropy decides).
pub const TIE_EPSILON: f64 = 1e-12;

/// Solving strategy, chosen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Deterministic projected gradient
    #[default]
    Direct,
    /// Seedable genetic search
    Evolutionary,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => f.write_str("direct"),
            Strategy::Evolutionary => f.write_str("evolutionary"),
        }
    }
}

/// One solve request, already validated and known to be feasible.
#[derive(Debug, Clone)]
pub struct Problem<'a> {
    pub cost: f64,
    pub values: Vec<f64>,
    pub target_edge: f64,
    /// |edge − target| at which the target counts as hit
    pub target_tolerance: f64,
    pub constraints: &'a Constraints,
    /// Starting guess; not necessarily inside the region
    pub start: Vec<f64>,
    /// Soft variance and tier-share terms; the edge becomes one soft term
    /// among several instead of a target to hit
    pub balance: Option<Balance>,
}

impl Problem<'_> {
    /// Expected value that realizes the target edge: cost · (1 − target).
    pub fn target_ev(&self) -> f64 {
        self.cost * (1.0 - self.target_edge)
    }

    pub fn edge(&self, p: &[f64]) -> f64 {
        house_edge_of(self.cost, &self.values, p)
    }

    /// (edge(p) − target)², plus the balance terms when present
    pub fn objective(&self, p: &[f64]) -> f64 {
        let edge_term = (self.edge(p) - self.target_edge).powi(2);
        match &self.balance {
            Some(balance) => edge_term + balance.penalty(&self.values, p),
            None => edge_term,
        }
    }

    /// ∇ of [`objective`](Self::objective)
    pub fn objective_gradient(&self, p: &[f64]) -> Vec<f64> {
        let pull = -2.0 * (self.edge(p) - self.target_edge) / self.cost;
        let mut grad: Vec<f64> = self.values.iter().map(|v| pull * v).collect();
        if let Some(balance) = &self.balance {
            for (g, b) in grad.iter_mut().zip(balance.penalty_gradient(&self.values, p)) {
                *g += b;
            }
        }
        grad
    }

    pub fn is_balanced(&self) -> bool {
        self.balance.is_some()
    }

    pub fn hits_target(&self, p: &[f64]) -> bool {
        (self.edge(p) - self.target_edge).abs() <= self.target_tolerance
    }
}

/// What a solver hands back. The facade decides feasibility and status.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub probabilities: Vec<f64>,
    /// Iterations (direct) or generations (evolutionary) spent
    pub iterations: usize,
    /// Stopped on tolerance rather than on budget
    pub converged: bool,
    /// Best fitness per generation; empty for the direct solver
    pub trace: Vec<f64>,
}

/// A probability-solving back-end.
pub trait Solver {
    fn name(&self) -> &'static str;

    fn solve(&self, problem: &Problem<'_>) -> Solution;
}

/// How a solve ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Converged,
    /// Region is non-empty but no vector in it reaches the target edge
    TargetUnreachable { closest: f64 },
    /// Budget ran out first; the vector is the best one found
    DidNotConverge { iterations: usize, residual: f64 },
    /// Region is empty; no solver was run
    Infeasible(Infeasibility),
    /// Solver output broke a hard constraint
    Rejected(Violation),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizationResult {
    pub solver: String,
    pub probabilities: Vec<f64>,
    pub achieved_house_edge: f64,
    pub target_house_edge: f64,
    pub expected_value: f64,
    /// Edge and EV of the seed probabilities, when the skeleton carried some
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_house_edge: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_expected_value: Option<f64>,
    /// Every hard constraint holds and the target is hit within tolerance
    /// (for a balanced solve: every hard constraint holds)
    pub feasible: bool,
    pub iterations: usize,
    pub status: SolveStatus,
    /// Sum of the seed probabilities when they were rescaled before solving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized_input: Option<f64>,
    pub entropy: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<BalanceReport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<f64>,
}

impl OptimizationResult {
    /// Turn an empty region or a rejected vector into an error.
    pub fn require_feasible(self) -> Result<Self> {
        match self.status {
            SolveStatus::Infeasible(reason) => Err(LootboxError::Infeasible(reason)),
            SolveStatus::Rejected(violation) => Err(LootboxError::InvalidDistribution(violation)),
            _ => Ok(self),
        }
    }

    /// Turn an exhausted budget into an error.
    pub fn require_converged(self) -> Result<Self> {
        match self.status {
            SolveStatus::DidNotConverge { iterations, residual } => {
                Err(LootboxError::OptimizationDidNotConverge { iterations, residual })
            }
            _ => Ok(self),
        }
    }

    pub fn into_distribution(self, skeleton: Skeleton) -> Result<RewardDistribution> {
        skeleton.into_distribution(&self.probabilities)
    }
}

/// One point of [`Optimizer::sweep_costs`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostPoint {
    pub cost: f64,
    pub result: OptimizationResult,
}

/// Strategy-agnostic optimizer bound to one configuration.
#[derive(Debug, Clone, Copy)]
pub struct Optimizer<'a> {
    config: &'a EngineConfig,
}

impl<'a> Optimizer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Optimizer { config }
    }

    pub fn optimize(
        &self,
        skeleton: &Skeleton,
        target_edge: f64,
        strategy: Strategy,
    ) -> Result<OptimizationResult> {
        match strategy {
            Strategy::Direct => self.optimize_with(skeleton, target_edge, &DirectSolver::new(self.config)),
            Strategy::Evolutionary => {
                self.optimize_with(skeleton, target_edge, &EvolutionarySolver::new(self.config))
            }
        }
    }

    /// Solve with a caller-supplied back-end.
    pub fn optimize_with(
        &self,
        skeleton: &Skeleton,
        target_edge: f64,
        solver: &dyn Solver,
    ) -> Result<OptimizationResult> {
        if !(target_edge.is_finite() && target_edge > 0.0 && target_edge < 1.0) {
            return Err(LootboxError::InvalidTarget(target_edge));
        }
        self.run(skeleton, target_edge, None, solver)
    }

    /// Trade the house edge off against a target variance and target tier
    /// shares. The edge is a soft term here, so a converged answer counts as
    /// feasible even when its edge is off the target.
    pub fn optimize_balanced(
        &self,
        skeleton: &Skeleton,
        targets: &BalanceTargets,
        strategy: Strategy,
    ) -> Result<OptimizationResult> {
        targets.validate()?;
        match strategy {
            Strategy::Direct => self.run(
                skeleton,
                targets.house_edge,
                Some(targets),
                &DirectSolver::new(self.config),
            ),
            Strategy::Evolutionary => self.run(
                skeleton,
                targets.house_edge,
                Some(targets),
                &EvolutionarySolver::new(self.config),
            ),
        }
    }

    fn run(
        &self,
        skeleton: &Skeleton,
        target_edge: f64,
        targets: Option<&BalanceTargets>,
        solver: &dyn Solver,
    ) -> Result<OptimizationResult> {
        self.config.validate()?;
        skeleton.validate(self.config)?;
        let (seed, normalized_input) = self.seed_probabilities(skeleton)?;

        let constraints = Constraints::new(skeleton, &self.config.tier_bands);
        let values = skeleton.values();
        let balance = targets.map(|t| Balance::new(t, &constraints));
        let original_expected_value = seed.as_ref().map(|p| expected_value_of(&values, p));
        let original_house_edge = seed.as_ref().map(|p| house_edge_of(skeleton.cost, &values, p));

        if let Err(reason) = constraints.feasibility() {
            warn!(skeleton = %skeleton.name, %reason, "constraint region is empty, solver not run");
            let probabilities = constraints.fallback();
            return Ok(OptimizationResult {
                solver: solver.name().to_string(),
                achieved_house_edge: house_edge_of(skeleton.cost, &values, &probabilities),
                target_house_edge: target_edge,
                expected_value: expected_value_of(&values, &probabilities),
                original_house_edge,
                original_expected_value,
                feasible: false,
                iterations: 0,
                status: SolveStatus::Infeasible(reason),
                normalized_input,
                entropy: entropy_of(&probabilities),
                balance: balance.map(|b| b.report(&values, &probabilities)),
                probabilities,
                trace: Vec::new(),
            });
        }

        let problem = Problem {
            cost: skeleton.cost,
            values,
            target_edge,
            target_tolerance: self.config.target_tolerance,
            constraints: &constraints,
            start: seed.unwrap_or_else(|| constraints.center()),
            balance,
        };
        debug!(
            skeleton = %skeleton.name,
            solver = solver.name(),
            items = problem.values.len(),
            target_ev = problem.target_ev(),
            balanced = problem.is_balanced(),
            "solving"
        );
        let solution = solver.solve(&problem);

        let achieved = problem.edge(&solution.probabilities);
        let residual = (achieved - target_edge).abs();
        // Only an exact-edge solve has a target to miss
        let missed = !problem.is_balanced() && residual > self.config.target_tolerance;
        let status = match constraints.check(&solution.probabilities, self.config) {
            Err(violation) => {
                warn!(solver = solver.name(), %violation, "solver output rejected");
                SolveStatus::Rejected(violation)
            }
            Ok(()) if !solution.converged => {
                warn!(
                    solver = solver.name(),
                    iterations = solution.iterations,
                    residual,
                    "solver budget exhausted"
                );
                SolveStatus::DidNotConverge {
                    iterations: solution.iterations,
                    residual,
                }
            }
            Ok(()) if missed => {
                warn!(target = target_edge, closest = achieved, "target edge not attainable");
                SolveStatus::TargetUnreachable { closest: achieved }
            }
            Ok(()) => SolveStatus::Converged,
        };
        let feasible = !matches!(status, SolveStatus::Rejected(_)) && !missed;

        info!(
            skeleton = %skeleton.name,
            solver = solver.name(),
            achieved,
            feasible,
            iterations = solution.iterations,
            "optimization finished"
        );
        Ok(OptimizationResult {
            solver: solver.name().to_string(),
            achieved_house_edge: achieved,
            target_house_edge: target_edge,
            expected_value: expected_value_of(&problem.values, &solution.probabilities),
            original_house_edge,
            original_expected_value,
            feasible,
            iterations: solution.iterations,
            status,
            normalized_input,
            entropy: entropy_of(&solution.probabilities),
            balance: problem.balance.as_ref().map(|b| b.report(&problem.values, &solution.probabilities)),
            probabilities: solution.probabilities,
            trace: solution.trace,
        })
    }

    /// Seed probabilities to start from, rescaled when they are only slightly
    /// off Σ = 1. Returns the original sum when rescaling happened.
    fn seed_probabilities(&self, skeleton: &Skeleton) -> Result<(Option<Vec<f64>>, Option<f64>)> {
        let Some(seed) = skeleton.seed_probabilities.as_ref() else {
            return Ok((None, None));
        };
        if seed.len() != skeleton.len() {
            return Err(Violation::LengthMismatch {
                expected: skeleton.len(),
                actual: seed.len(),
            }
            .into());
        }
        for (item, &probability) in skeleton.items.iter().zip(seed) {
            if !(probability.is_finite() && (0.0..=1.0).contains(&probability)) {
                return Err(Violation::ProbabilityOutOfRange {
                    item: item.name.clone(),
                    probability,
                }
                .into());
            }
        }
        let sum: f64 = seed.iter().sum();
        let off = (sum - 1.0).abs();
        if off <= self.config.sum_tolerance {
            return Ok((Some(seed.clone()), None));
        }
        if off <= self.config.normalize_tolerance && sum > 0.0 {
            warn!(skeleton = %skeleton.name, sum, "seed probabilities rescaled to sum to 1");
            return Ok((Some(seed.iter().map(|p| p / sum).collect()), Some(sum)));
        }
        Err(Violation::ProbabilitySum {
            sum,
            tolerance: self.config.normalize_tolerance,
        }
        .into())
    }

    /// Re-tune an existing distribution to a new target edge, starting from
    /// its current probabilities.
    pub fn optimize_distribution(
        &self,
        dist: &RewardDistribution,
        target_edge: f64,
        strategy: Strategy,
    ) -> Result<RewardDistribution> {
        let skeleton = Skeleton::from_distribution(dist);
        let result = self
            .optimize(&skeleton, target_edge, strategy)?
            .require_feasible()?;
        let mut out = result.into_distribution(skeleton)?;
        out.name = format!("{} (Optimized)", dist.name);
        out.description = dist.description.clone();
        Ok(out)
    }

    /// Solve the skeleton at `points` evenly spaced costs across the
    /// admissible range. Points are independent and run in parallel.
    pub fn sweep_costs(
        &self,
        skeleton: &Skeleton,
        target_edge: f64,
        points: usize,
        strategy: Strategy,
    ) -> Result<Vec<CostPoint>> {
        let range = self.config.cost_range;
        let step = if points > 1 {
            (range.max - range.min) / (points - 1) as f64
        } else {
            0.0
        };
        (0..points)
            .into_par_iter()
            .map(|k| {
                let cost = range.min + step * k as f64;
                let priced = skeleton.clone().with_cost(cost);
                let result = self.optimize(&priced, target_edge, strategy)?;
                Ok(CostPoint { cost, result })
            })
            .collect()
    }

    /// The analytic feasibility check on its own.
    pub fn feasibility(&self, skeleton: &Skeleton) -> Result<()> {
        self.config.validate()?;
        skeleton.validate(self.config)?;
        Constraints::new(skeleton, &self.config.tier_bands).feasibility()?;
        Ok(())
    }
}
