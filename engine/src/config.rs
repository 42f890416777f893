//! Engine configuration.
//!
//! All policy data (tier bands, admissible costs, tolerances, solver and
//! simulation budgets) lives in one [`EngineConfig`] record that callers pass
//! to each component explicitly. Every field has a documented default and the
//! whole record round-trips through serde, so an external collaborator can
//! load it from whatever format it likes.

use crate::error::{LootboxError, Result};
use crate::model::RarityTier;
use serde::{Deserialize, Serialize};

/// Closed probability interval `[low, high]` admissible for one item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub const fn new(low: f64, high: f64) -> Self {
        Band { low, high }
    }

    pub fn contains(&self, p: f64, slack: f64) -> bool {
        p >= self.low - slack && p <= self.high + slack
    }

    pub fn midpoint(&self) -> f64 {
        0.5 * (self.low + self.high)
    }
}

/// Per-item probability band for each rarity tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierBands {
    pub common: Band,
    pub uncommon: Band,
    pub rare: Band,
    pub epic: Band,
    pub legendary: Band,
    pub mythic: Band,
}

impl TierBands {
    pub fn get(&self, tier: RarityTier) -> Band {
        match tier {
            RarityTier::Common => self.common,
            RarityTier::Uncommon => self.uncommon,
            RarityTier::Rare => self.rare,
            RarityTier::Epic => self.epic,
            RarityTier::Legendary => self.legendary,
            RarityTier::Mythic => self.mythic,
        }
    }

    pub fn set(&mut self, tier: RarityTier, band: Band) {
        let slot = match tier {
            RarityTier::Common => &mut self.common,
            RarityTier::Uncommon => &mut self.uncommon,
            RarityTier::Rare => &mut self.rare,
            RarityTier::Epic => &mut self.epic,
            RarityTier::Legendary => &mut self.legendary,
            RarityTier::Mythic => &mut self.mythic,
        };
        *slot = band;
    }
}

impl Default for TierBands {
    fn default() -> Self {
        TierBands {
            common: Band::new(0.30, 0.80),
            uncommon: Band::new(0.10, 0.40),
            rare: Band::new(0.01, 0.10),
            epic: Band::new(0.001, 0.05),
            legendary: Band::new(0.0001, 0.01),
            mythic: Band::new(0.00001, 0.001),
        }
    }
}

/// Admissible box cost, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostRange {
    pub min: f64,
    pub max: f64,
}

impl Default for CostRange {
    fn default() -> Self {
        CostRange { min: 0.50, max: 1000.0 }
    }
}

/// Budget for the direct (projected-gradient) solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    /// Iteration cap for each of the two solve phases
    pub max_iterations: usize,
    /// Step size below which a phase is considered converged
    pub tolerance: f64,
    /// Cap on alternating-projection sweeps per projection
    pub projection_sweeps: usize,
}

impl Default for DirectConfig {
    fn default() -> Self {
        DirectConfig {
            max_iterations: 2000,
            tolerance: 1e-10,
            projection_sweeps: 2000,
        }
    }
}

/// Budget and operators for the evolutionary solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionaryConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Chance that an individual is mutated in a generation
    pub mutation_rate: f64,
    /// Half-width of the uniform noise added per entry on mutation
    pub mutation_scale: f64,
    /// Chance that a selected pair is recombined
    pub crossover_rate: f64,
    pub tournament_size: usize,
    /// Best individuals copied unchanged into the next generation
    pub elitism: usize,
    /// Weight on squared ordering violations in the fitness
    pub ordering_penalty: f64,
    /// Fixed seed for a deterministic run (None = fresh entropy)
    pub seed: Option<u64>,
}

impl Default for EvolutionaryConfig {
    fn default() -> Self {
        EvolutionaryConfig {
            population_size: 100,
            generations: 500,
            mutation_rate: 0.1,
            mutation_scale: 0.01,
            crossover_rate: 0.8,
            tournament_size: 3,
            elitism: 2,
            ordering_penalty: 1e3,
            seed: None,
        }
    }
}

/// Monte Carlo defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub default_trials: u64,
    /// Allowed |empirical − theoretical| house edge for a passing report
    pub edge_tolerance: f64,
    /// Number of fixed trial partitions (independent of thread count)
    pub partitions: usize,
    /// Trials per batch when estimating confidence intervals
    pub confidence_batch_size: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            default_trials: 10_000,
            edge_tolerance: 0.02,
            partitions: 16,
            confidence_batch_size: 1000,
        }
    }
}

impl SimulationConfig {
    /// Small runs for smoke checks.
    pub fn quick() -> Self {
        SimulationConfig {
            default_trials: 1_000,
            partitions: 4,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tier_bands: TierBands,
    pub cost_range: CostRange,
    /// Allowed |Σp − 1| on a valid distribution
    pub sum_tolerance: f64,
    /// Largest |Σp − 1| on skeleton seed probabilities the optimizer will rescale
    pub normalize_tolerance: f64,
    /// Slack for hard post-checks on solver output (bands, ordering)
    pub constraint_tolerance: f64,
    /// |achieved − target| house edge counted as hitting the target
    pub target_tolerance: f64,
    pub direct: DirectConfig,
    pub evolutionary: EvolutionaryConfig,
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tier_bands: TierBands::default(),
            cost_range: CostRange::default(),
            sum_tolerance: 1e-6,
            normalize_tolerance: 1e-3,
            constraint_tolerance: 1e-7,
            target_tolerance: 1e-3,
            direct: DirectConfig::default(),
            evolutionary: EvolutionaryConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Default config with the given tier bands overridden.
    pub fn with_bands(bands: &[(RarityTier, Band)]) -> Self {
        let mut config = EngineConfig::default();
        for &(tier, band) in bands {
            config.tier_bands.set(tier, band);
        }
        config
    }

    /// Same config with a fixed evolutionary seed.
    pub fn seeded(mut self, seed: u64) -> Self {
        self.evolutionary.seed = Some(seed);
        self
    }

    /// Reject values no component can work with. Inverted tier bands are
    /// left to the optimizer, which reports them as infeasible.
    pub fn validate(&self) -> Result<()> {
        for tier in RarityTier::ALL {
            let band = self.tier_bands.get(tier);
            let in_unit = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
            if !in_unit(band.low) || !in_unit(band.high) {
                return Err(LootboxError::InvalidConfig(format!(
                    "{tier} band [{}, {}] must lie within [0, 1]",
                    band.low, band.high
                )));
            }
        }
        let range = self.cost_range;
        if !(range.min > 0.0 && range.min <= range.max && range.max.is_finite()) {
            return Err(LootboxError::InvalidConfig(format!(
                "cost range [{}, {}] must be positive and ordered",
                range.min, range.max
            )));
        }
        let tolerances = [
            ("sum_tolerance", self.sum_tolerance),
            ("normalize_tolerance", self.normalize_tolerance),
            ("constraint_tolerance", self.constraint_tolerance),
            ("target_tolerance", self.target_tolerance),
            ("simulation.edge_tolerance", self.simulation.edge_tolerance),
        ];
        for (name, value) in tolerances {
            if !(value.is_finite() && value >= 0.0) {
                return Err(LootboxError::InvalidConfig(format!(
                    "{name} must be a non-negative number, got {value}"
                )));
            }
        }
        let evo = &self.evolutionary;
        if evo.population_size < 2 || evo.tournament_size == 0 || evo.elitism >= evo.population_size {
            return Err(LootboxError::InvalidConfig(
                "evolutionary population must hold at least 2 individuals, \
                 a non-empty tournament, and fewer elites than members"
                    .to_string(),
            ));
        }
        if !(evo.mutation_scale.is_finite() && evo.mutation_scale >= 0.0) {
            return Err(LootboxError::InvalidConfig(format!(
                "mutation_scale must be a non-negative number, got {}",
                evo.mutation_scale
            )));
        }
        if self.simulation.partitions == 0 || self.simulation.confidence_batch_size == 0 {
            return Err(LootboxError::InvalidConfig(
                "simulation partitions and batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
