//! Monte Carlo validation of a fully specified distribution
//!
//! Each trial draws one uniform number and inverts the cumulative probability
//! table, built over the distribution's items in their canonical order.
//!
//! Trials are split into a fixed number of partitions (from the config, never
//! from the thread count). Partition `k` draws from ChaCha stream `k` of the
//! run's seed, partitions run on rayon and are merged back in trial order.
//! Sums and counts merge trivially; streaks are merged explicitly across each
//! partition boundary. The same `(distribution, trials, seed)` always yields a
//! bit-identical report.

use crate::config::EngineConfig;
use crate::error::{LootboxError, Result};
use crate::model::{RarityTier, RewardDistribution};
use crate::stats::StatisticsEngine;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

/// Cumulative probability table for inverse-CDF sampling.
#[derive(Debug, Clone)]
pub struct Sampler {
    cumulative: Vec<f64>,
    /// Last item with positive probability
    last_live: usize,
}

impl Sampler {
    pub fn new(dist: &RewardDistribution) -> Self {
        let mut running = 0.0;
        let cumulative = dist
            .items
            .iter()
            .map(|item| {
                running += item.probability;
                running
            })
            .collect();
        let last_live = dist.items.iter().rposition(|item| item.probability > 0.0).unwrap_or(0);
        Sampler { cumulative, last_live }
    }

    /// Index of the drawn item: the first whose cumulative probability
    /// exceeds u, with u scaled to the table's actual total. Zero-probability
    /// items are never drawn, even when the total falls short of 1.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let total = self.cumulative.last().copied().unwrap_or(1.0);
        let u = rng.gen::<f64>() * total;
        self.cumulative.partition_point(|&c| c <= u).min(self.last_live)
    }
}

/// Runs of consecutive hits, in a form that merges across partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Streak {
    /// Trials seen
    len: u64,
    hits: u64,
    /// Maximal runs of hits
    runs: u64,
    /// Hits at the very start
    prefix: u64,
    /// Hits at the very end
    suffix: u64,
    best: u64,
}

impl Streak {
    fn push(&mut self, hit: bool) {
        if hit {
            if self.prefix == self.len {
                self.prefix += 1;
            }
            if self.suffix == 0 {
                self.runs += 1;
            }
            self.suffix += 1;
            self.hits += 1;
            self.best = self.best.max(self.suffix);
        } else {
            self.suffix = 0;
        }
        self.len += 1;
    }

    /// `self` followed by `next` in trial order.
    fn then(self, next: Streak) -> Streak {
        // A run crossing the boundary was counted once on each side
        let joined = u64::from(self.suffix > 0 && next.prefix > 0);
        Streak {
            len: self.len + next.len,
            hits: self.hits + next.hits,
            runs: self.runs + next.runs - joined,
            prefix: if self.prefix == self.len {
                self.len + next.prefix
            } else {
                self.prefix
            },
            suffix: if next.suffix == next.len {
                next.len + self.suffix
            } else {
                next.suffix
            },
            best: self.best.max(next.best).max(self.suffix + next.prefix),
        }
    }

    fn average(&self) -> f64 {
        if self.runs == 0 {
            0.0
        } else {
            self.hits as f64 / self.runs as f64
        }
    }
}

/// Accumulators for one contiguous block of trials.
#[derive(Debug, Clone)]
struct Partial {
    sum: f64,
    sum_sq: f64,
    hits: Vec<u64>,
    break_even: u64,
    profit: u64,
    wins: Streak,
    losses: Streak,
}

impl Partial {
    fn new(items: usize) -> Self {
        Partial {
            sum: 0.0,
            sum_sq: 0.0,
            hits: vec![0; items],
            break_even: 0,
            profit: 0,
            wins: Streak::default(),
            losses: Streak::default(),
        }
    }

    /// `win_at` is the value an opening must reach to extend a win streak.
    fn run(dist: &RewardDistribution, sampler: &Sampler, trials: u64, win_at: f64, rng: &mut ChaCha8Rng) -> Self {
        let mut partial = Partial::new(dist.items.len());
        for _ in 0..trials {
            let idx = sampler.draw(rng);
            let value = dist.items[idx].value;
            partial.sum += value;
            partial.sum_sq += value * value;
            partial.hits[idx] += 1;
            partial.break_even += u64::from(value >= dist.cost);
            partial.profit += u64::from(value > dist.cost);
            let won = value >= win_at;
            partial.wins.push(won);
            partial.losses.push(!won);
        }
        partial
    }

    fn then(mut self, next: Partial) -> Partial {
        self.sum += next.sum;
        self.sum_sq += next.sum_sq;
        for (a, b) in self.hits.iter_mut().zip(&next.hits) {
            *a += b;
        }
        self.break_even += next.break_even;
        self.profit += next.profit;
        self.wins = self.wins.then(next.wins);
        self.losses = self.losses.then(next.losses);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFrequency {
    pub name: String,
    pub hits: u64,
    pub frequency: f64,
    pub expected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierFrequency {
    pub rarity: RarityTier,
    pub frequency: f64,
    pub expected: f64,
}

/// Upper edges of the value histogram bins; the last bin is open-ended.
pub const VALUE_BIN_EDGES: [f64; 9] = [0.25, 0.50, 1.00, 2.00, 5.00, 10.00, 25.00, 50.00, 100.00];

/// Openings whose value fell in `[low, high)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueBin {
    pub label: String,
    pub low: f64,
    /// `None` for the open top bin
    pub high: Option<f64>,
    pub hits: u64,
    pub frequency: f64,
}

/// Win and loss runs against a value threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreakReport {
    pub distribution: String,
    pub seed: u64,
    pub trials: u64,
    /// An opening worth at least this much is a win
    pub threshold: f64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub longest_win_streak: u64,
    pub longest_loss_streak: u64,
    pub average_win_streak: f64,
    pub average_loss_streak: f64,
    pub win_streaks: u64,
    pub loss_streaks: u64,
}

/// Everything a simulation run measured, next to the closed-form values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    pub distribution: String,
    pub seed: u64,
    pub trials: u64,
    pub total_cost: f64,
    pub total_value: f64,
    pub expected_value: f64,
    pub std_dev: f64,
    /// std_dev / √trials
    pub standard_error: f64,
    pub house_edge: f64,
    pub median_value: f64,
    /// Share of trials with value ≥ cost
    pub break_even_rate: f64,
    /// Share of trials with value > cost
    pub profit_probability: f64,
    pub longest_win_streak: u64,
    pub longest_loss_streak: u64,
    pub item_frequencies: Vec<ItemFrequency>,
    pub tier_frequencies: Vec<TierFrequency>,
    /// Non-empty bins of [`VALUE_BIN_EDGES`], lowest first
    pub value_distribution: Vec<ValueBin>,
    pub theoretical_expected_value: f64,
    pub theoretical_house_edge: f64,
    pub edge_tolerance: f64,
    /// |house_edge − theoretical_house_edge| ≤ edge_tolerance
    pub passed: bool,
}

/// Percentile interval of a per-batch metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Interval {
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfidenceReport {
    pub level: f64,
    pub seed: u64,
    pub batches: usize,
    pub batch_size: u64,
    pub expected_value: Interval,
    pub house_edge: Interval,
    pub std_dev: Interval,
    pub profit_probability: Interval,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TierDeviation {
    pub rarity: RarityTier,
    pub expected: f64,
    pub observed: f64,
    pub relative_deviation: f64,
    pub within_tolerance: bool,
}

/// Simulation measured against closed-form predictions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TheoreticalCheck {
    pub tolerance: f64,
    pub ev_relative_deviation: f64,
    pub ev_within_tolerance: bool,
    pub edge_deviation: f64,
    pub edge_within_tolerance: bool,
    pub tiers: Vec<TierDeviation>,
    pub passed: bool,
    pub report: SimulationReport,
}

#[derive(Debug, Clone, Copy)]
pub struct SimulationEngine<'a> {
    config: &'a EngineConfig,
}

impl<'a> SimulationEngine<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        SimulationEngine { config }
    }

    /// Validated sampler for single draws outside a full run.
    pub fn sampler(&self, dist: &RewardDistribution) -> Result<Sampler> {
        self.config.validate()?;
        dist.validate_shape(self.config)?;
        Ok(Sampler::new(dist))
    }

    /// Simulate `trials` openings. Rarity ordering is not required: a
    /// hand-authored box may break it and still be simulated.
    pub fn simulate(&self, dist: &RewardDistribution, trials: i64, seed: Option<u64>) -> Result<SimulationReport> {
        self.config.validate()?;
        let trials = checked_trials(trials)?;
        let stats = StatisticsEngine::new(self.config);
        let theoretical_ev = stats.expected_value(dist)?;
        let theoretical_edge = stats.house_edge(dist)?;
        let seed = seed.unwrap_or_else(rand::random);

        let merged = self.run(dist, trials, seed, 0, dist.cost);
        let n = trials as f64;
        let mean = merged.sum / n;
        let std_dev = if trials > 1 {
            ((merged.sum_sq - merged.sum * mean) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
        let house_edge = (dist.cost - mean) / dist.cost;
        let tolerance = self.config.simulation.edge_tolerance;
        let passed = (house_edge - theoretical_edge).abs() <= tolerance;

        let item_frequencies: Vec<ItemFrequency> = dist
            .items
            .iter()
            .zip(&merged.hits)
            .map(|(item, &hits)| ItemFrequency {
                name: item.name.clone(),
                hits,
                frequency: hits as f64 / n,
                expected: item.probability,
            })
            .collect();
        let tier_frequencies = dist
            .tiers_present()
            .into_iter()
            .map(|rarity| TierFrequency {
                rarity,
                frequency: dist
                    .items
                    .iter()
                    .zip(&merged.hits)
                    .filter(|(item, _)| item.rarity == rarity)
                    .map(|(_, &hits)| hits as f64)
                    .sum::<f64>()
                    / n,
                expected: dist.probability_by_rarity(rarity),
            })
            .collect();

        let report = SimulationReport {
            distribution: dist.name.clone(),
            seed,
            trials,
            total_cost: dist.cost * n,
            total_value: merged.sum,
            expected_value: mean,
            std_dev,
            standard_error: std_dev / n.sqrt(),
            house_edge,
            median_value: median(dist, &merged.hits, trials),
            break_even_rate: merged.break_even as f64 / n,
            profit_probability: merged.profit as f64 / n,
            longest_win_streak: merged.wins.best,
            longest_loss_streak: merged.losses.best,
            item_frequencies,
            tier_frequencies,
            value_distribution: value_bins(dist, &merged.hits, trials),
            theoretical_expected_value: theoretical_ev,
            theoretical_house_edge: theoretical_edge,
            edge_tolerance: tolerance,
            passed,
        };
        info!(
            distribution = %dist.name,
            trials,
            seed,
            house_edge,
            theoretical_edge,
            "simulation finished"
        );
        if !passed {
            warn!(
                distribution = %dist.name,
                deviation = (house_edge - theoretical_edge).abs(),
                tolerance,
                "empirical house edge outside tolerance"
            );
        }
        Ok(report)
    }

    /// Win and loss streaks where a win is an opening worth at least
    /// `threshold` (the box cost when `None`).
    pub fn analyze_streaks(
        &self,
        dist: &RewardDistribution,
        trials: i64,
        threshold: Option<f64>,
        seed: Option<u64>,
    ) -> Result<StreakReport> {
        self.config.validate()?;
        let trials = checked_trials(trials)?;
        dist.validate_shape(self.config)?;
        let threshold = threshold.unwrap_or(dist.cost);
        if !threshold.is_finite() {
            return Err(LootboxError::InvalidConfig(format!(
                "streak threshold must be finite, got {threshold}"
            )));
        }
        let seed = seed.unwrap_or_else(rand::random);
        let merged = self.run(dist, trials, seed, 0, threshold);
        let (wins, losses) = (merged.wins, merged.losses);
        debug!(trials, seed, threshold, win_streaks = wins.runs, "streaks analyzed");
        Ok(StreakReport {
            distribution: dist.name.clone(),
            seed,
            trials,
            threshold,
            wins: wins.hits,
            losses: losses.hits,
            win_rate: wins.hits as f64 / trials as f64,
            longest_win_streak: wins.best,
            longest_loss_streak: losses.best,
            average_win_streak: wins.average(),
            average_loss_streak: losses.average(),
            win_streaks: wins.runs,
            loss_streaks: losses.runs,
        })
    }

    /// Split `trials` over the configured partitions, run them in parallel
    /// on streams `first_stream..`, and merge in trial order.
    fn run(&self, dist: &RewardDistribution, trials: u64, seed: u64, first_stream: u64, win_at: f64) -> Partial {
        let sampler = Sampler::new(dist);
        let parts = (self.config.simulation.partitions.max(1) as u64).min(trials);
        let base = trials / parts;
        let extra = trials % parts;
        debug!(trials, partitions = parts, seed, "simulating");
        (0..parts)
            .into_par_iter()
            .map(|k| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(first_stream + k);
                let count = base + u64::from(k < extra);
                Partial::run(dist, &sampler, count, win_at, &mut rng)
            })
            .collect::<Vec<_>>()
            .into_iter()
            .reduce(Partial::then)
            .unwrap_or_else(|| Partial::new(dist.items.len()))
    }

    /// Percentile intervals over per-batch statistics.
    ///
    /// The run is cut into batches of `confidence_batch_size` trials (one
    /// batch when `trials` is smaller), each with its own stream.
    pub fn confidence_intervals(
        &self,
        dist: &RewardDistribution,
        trials: i64,
        level: f64,
        seed: Option<u64>,
    ) -> Result<ConfidenceReport> {
        self.config.validate()?;
        let trials = checked_trials(trials)?;
        if !(level > 0.0 && level < 1.0) {
            return Err(LootboxError::InvalidConfig(format!(
                "confidence level must lie in (0, 1), got {level}"
            )));
        }
        dist.validate_shape(self.config)?;
        let seed = seed.unwrap_or_else(rand::random);
        let batch_size = self.config.simulation.confidence_batch_size.min(trials);
        let batches = (trials / batch_size) as usize;
        let sampler = Sampler::new(dist);

        // (mean, house edge, std dev, profit probability) per batch
        let samples: Vec<[f64; 4]> = (0..batches as u64)
            .into_par_iter()
            .map(|b| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                rng.set_stream(b);
                let partial = Partial::run(dist, &sampler, batch_size, dist.cost, &mut rng);
                let n = batch_size as f64;
                let mean = partial.sum / n;
                let var = if batch_size > 1 {
                    ((partial.sum_sq - partial.sum * mean) / (n - 1.0)).max(0.0)
                } else {
                    0.0
                };
                [mean, (dist.cost - mean) / dist.cost, var.sqrt(), partial.profit as f64 / n]
            })
            .collect();

        let column = |i: usize| interval(samples.iter().map(|s| s[i]).collect(), level);
        debug!(batches, batch_size, level, "confidence intervals computed");
        Ok(ConfidenceReport {
            level,
            seed,
            batches,
            batch_size,
            expected_value: column(0),
            house_edge: column(1),
            std_dev: column(2),
            profit_probability: column(3),
        })
    }

    /// Simulate and compare against closed-form values with one tolerance:
    /// relative for EV and tier frequencies, absolute for the house edge.
    pub fn validate_theoretical(
        &self,
        dist: &RewardDistribution,
        trials: i64,
        tolerance: f64,
        seed: Option<u64>,
    ) -> Result<TheoreticalCheck> {
        let report = self.simulate(dist, trials, seed)?;
        let ev_relative_deviation = relative_deviation(report.expected_value, report.theoretical_expected_value);
        let edge_deviation = (report.house_edge - report.theoretical_house_edge).abs();
        let tiers: Vec<TierDeviation> = report
            .tier_frequencies
            .iter()
            .map(|t| {
                let relative_deviation = relative_deviation(t.frequency, t.expected);
                TierDeviation {
                    rarity: t.rarity,
                    expected: t.expected,
                    observed: t.frequency,
                    relative_deviation,
                    within_tolerance: relative_deviation <= tolerance,
                }
            })
            .collect();
        let ev_within_tolerance = ev_relative_deviation <= tolerance;
        let edge_within_tolerance = edge_deviation <= tolerance;
        let passed = ev_within_tolerance && edge_within_tolerance && tiers.iter().all(|t| t.within_tolerance);
        Ok(TheoreticalCheck {
            tolerance,
            ev_relative_deviation,
            ev_within_tolerance,
            edge_deviation,
            edge_within_tolerance,
            tiers,
            passed,
            report,
        })
    }
}

fn checked_trials(trials: i64) -> Result<u64> {
    u64::try_from(trials)
        .ok()
        .filter(|&t| t > 0)
        .ok_or(LootboxError::InvalidTrialCount(trials))
}

/// |observed − expected| / expected, or the absolute gap when expected is 0.
fn relative_deviation(observed: f64, expected: f64) -> f64 {
    if expected == 0.0 {
        observed.abs()
    } else {
        (observed - expected).abs() / expected.abs()
    }
}

/// Sample median from per-item hit counts (mean of the middle pair for an
/// even count).
fn median(dist: &RewardDistribution, hits: &[u64], trials: u64) -> f64 {
    let mut by_value: Vec<(f64, u64)> = dist.items.iter().map(|i| i.value).zip(hits.iter().copied()).collect();
    by_value.sort_by(|a, b| a.0.total_cmp(&b.0));
    let value_at = |rank: u64| -> f64 {
        let mut seen = 0;
        for &(value, count) in &by_value {
            seen += count;
            if rank < seen {
                return value;
            }
        }
        by_value.last().map_or(0.0, |&(v, _)| v)
    };
    if trials % 2 == 1 {
        value_at(trials / 2)
    } else {
        0.5 * (value_at(trials / 2 - 1) + value_at(trials / 2))
    }
}

/// Hit counts folded into value bins; empty bins are dropped.
fn value_bins(dist: &RewardDistribution, hits: &[u64], trials: u64) -> Vec<ValueBin> {
    let mut counts = [0u64; VALUE_BIN_EDGES.len() + 1];
    for (item, &count) in dist.items.iter().zip(hits) {
        counts[VALUE_BIN_EDGES.partition_point(|&edge| edge <= item.value)] += count;
    }
    counts
        .iter()
        .enumerate()
        .filter(|&(_, &count)| count > 0)
        .map(|(bin, &count)| {
            let low = if bin == 0 { 0.0 } else { VALUE_BIN_EDGES[bin - 1] };
            let high = VALUE_BIN_EDGES.get(bin).copied();
            let label = match high {
                Some(high) => format!("${low:.2}-${high:.2}"),
                None => format!("${low:.2}+"),
            };
            ValueBin {
                label,
                low,
                high,
                hits: count,
                frequency: count as f64 / trials as f64,
            }
        })
        .collect()
}

/// Mean and central `level` percentile interval, nearest rank.
fn interval(mut samples: Vec<f64>, level: f64) -> Interval {
    if samples.is_empty() {
        return Interval { mean: 0.0, lower: 0.0, upper: 0.0 };
    }
    samples.sort_by(|a, b| a.total_cmp(b));
    let last = (samples.len() - 1) as f64;
    let at = |q: f64| samples[(q * last).round() as usize];
    Interval {
        mean: samples.iter().sum::<f64>() / samples.len() as f64,
        lower: at((1.0 - level) / 2.0),
        upper: at((1.0 + level) / 2.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Violation;
    use crate::fixtures::{five_tier_box, three_item_box};
    use crate::model::RewardItem;

    fn coin_box() -> RewardDistribution {
        RewardDistribution::new(
            "Coin Box",
            2.50,
            vec![
                RewardItem::new("Heads", 1.0, RarityTier::Common, 0.5),
                RewardItem::new("Tails", 3.0, RarityTier::Uncommon, 0.5),
            ],
        )
    }

    #[test]
    fn test_same_seed_bit_identical() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let a = sim.simulate(&five_tier_box(), 10_000, Some(42)).unwrap();
        let b = sim.simulate(&five_tier_box(), 10_000, Some(42)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.seed, 42);
    }

    #[test]
    fn test_thread_count_does_not_matter() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();
        let single = pool.install(|| sim.simulate(&three_item_box(), 5_000, Some(7)).unwrap());
        let many = sim.simulate(&three_item_box(), 5_000, Some(7)).unwrap();
        assert_eq!(single, many);
    }

    #[test]
    fn test_counts_add_up() {
        let config = EngineConfig::default();
        let report = SimulationEngine::new(&config)
            .simulate(&five_tier_box(), 12_345, Some(1))
            .unwrap();
        let hits: u64 = report.item_frequencies.iter().map(|f| f.hits).sum();
        assert_eq!(hits, 12_345);
        let tier_total: f64 = report.tier_frequencies.iter().map(|t| t.frequency).sum();
        assert!((tier_total - 1.0).abs() < 1e-12);
        assert!((report.total_cost - 12_345.0 * 2.0).abs() < 1e-9);
        assert!((report.total_value / 12_345.0 - report.expected_value).abs() < 1e-12);
        assert!(report.profit_probability <= report.break_even_rate);
    }

    #[test]
    fn test_non_positive_trials_rejected() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        for trials in [0, -5] {
            assert!(matches!(
                sim.simulate(&three_item_box(), trials, Some(1)),
                Err(LootboxError::InvalidTrialCount(t)) if t == trials
            ));
        }
    }

    #[test]
    fn test_invalid_distribution_fails_fast() {
        let config = EngineConfig::default();
        let mut dist = three_item_box();
        dist.items[0].probability = 0.4;
        assert!(matches!(
            SimulationEngine::new(&config).simulate(&dist, 100, Some(1)),
            Err(LootboxError::InvalidDistribution(Violation::ProbabilitySum { .. }))
        ));
    }

    #[test]
    fn test_unordered_hand_authored_box_simulates() {
        let config = EngineConfig::default();
        let dist = RewardDistribution::new(
            "Upside Down",
            1.0,
            vec![
                RewardItem::new("dust", 0.1, RarityTier::Common, 0.2),
                RewardItem::new("gem", 2.0, RarityTier::Legendary, 0.8),
            ],
        );
        assert!(SimulationEngine::new(&config).simulate(&dist, 1_000, Some(3)).is_ok());
    }

    #[test]
    fn test_single_trial() {
        let config = EngineConfig::default();
        let report = SimulationEngine::new(&config)
            .simulate(&coin_box(), 1, Some(9))
            .unwrap();
        assert_eq!(report.std_dev, 0.0);
        assert_eq!(report.median_value, report.expected_value);
        assert_eq!(report.longest_win_streak + report.longest_loss_streak, 1);
    }

    #[test]
    fn test_low_variance_box_passes() {
        // EV 2.0 at cost 2.5: edge 0.20, edge standard error ≈ 0.003 at 20k trials
        let config = EngineConfig::default();
        let report = SimulationEngine::new(&config)
            .simulate(&coin_box(), 20_000, Some(2024))
            .unwrap();
        assert!((report.theoretical_house_edge - 0.2).abs() < 1e-12);
        assert!(report.passed);
        assert!(report.median_value == 1.0 || report.median_value == 2.0 || report.median_value == 3.0);
    }

    #[test]
    fn test_zero_tolerance_fails() {
        let mut config = EngineConfig::default();
        config.simulation.edge_tolerance = 0.0;
        let report = SimulationEngine::new(&config)
            .simulate(&five_tier_box(), 10_000, Some(5))
            .unwrap();
        assert!(!report.passed);
    }

    #[test]
    fn test_converges_with_more_trials() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let dist = five_tier_box();
        let small = sim.simulate(&dist, 1_000, Some(77)).unwrap();
        let large = sim.simulate(&dist, 100_000, Some(77)).unwrap();
        assert!(large.standard_error < small.standard_error);
        let edge_se = large.standard_error / dist.cost;
        assert!((large.house_edge - large.theoretical_house_edge).abs() <= 5.0 * edge_se);
    }

    #[test]
    fn test_three_standard_errors_cover_most_runs() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let dist = five_tier_box();
        let covered = (0..200u64)
            .filter(|&seed| {
                let r = sim.simulate(&dist, 1_000, Some(seed)).unwrap();
                (r.expected_value - r.theoretical_expected_value).abs() <= 3.0 * r.standard_error
            })
            .count();
        assert!(covered >= 190, "only {covered}/200 runs within 3 SE");
    }

    #[test]
    fn test_streak_merge_matches_sequential() {
        let pattern = [
            true, true, false, true, true, true, false, false, true, true, true, true, false, true,
        ];
        let mut whole = Streak::default();
        for &hit in &pattern {
            whole.push(hit);
        }
        assert_eq!(whole.best, 4);
        assert_eq!(whole.runs, 4);
        assert_eq!(whole.hits, 10);
        for cut in 0..=pattern.len() {
            for cut2 in cut..=pattern.len() {
                let mut parts = [Streak::default(); 3];
                for (i, &hit) in pattern.iter().enumerate() {
                    let part = if i < cut { 0 } else if i < cut2 { 1 } else { 2 };
                    parts[part].push(hit);
                }
                assert_eq!(parts[0].then(parts[1]).then(parts[2]), whole, "cuts {cut}/{cut2}");
            }
        }
    }

    #[test]
    fn test_streak_all_hits_spans_partitions() {
        let mut a = Streak::default();
        let mut b = Streak::default();
        for _ in 0..3 {
            a.push(true);
        }
        for _ in 0..4 {
            b.push(true);
        }
        let merged = a.then(b);
        assert_eq!(merged.runs, 1);
        assert!((merged.average() - 7.0).abs() < 1e-12);
        assert_eq!(merged.best, 7);
        assert_eq!(merged.prefix, 7);
        assert_eq!(merged.suffix, 7);
    }

    #[test]
    fn test_streak_report_counts_runs() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let report = sim.analyze_streaks(&coin_box(), 10_000, None, Some(5)).unwrap();
        // Tails (3.0) beats the 2.50 cost half the time
        assert_eq!(report.threshold, 2.5);
        assert_eq!(report.wins + report.losses, 10_000);
        assert!((report.win_rate - 0.5).abs() < 0.03);
        // Fair coin: runs average 2 long and the two kinds alternate
        assert!((report.average_win_streak - 2.0).abs() < 0.2);
        assert!((report.average_loss_streak - 2.0).abs() < 0.2);
        assert!(report.win_streaks.abs_diff(report.loss_streaks) <= 1);
        assert!(report.longest_win_streak >= 5);

        let same = sim.analyze_streaks(&coin_box(), 10_000, None, Some(5)).unwrap();
        assert_eq!(report, same);
        // Matches the longest streaks of a plain run with the same seed
        let full = sim.simulate(&coin_box(), 10_000, Some(5)).unwrap();
        assert_eq!(full.longest_win_streak, report.longest_win_streak);
        assert_eq!(full.longest_loss_streak, report.longest_loss_streak);
    }

    #[test]
    fn test_streak_threshold_overrides_cost() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let low = sim.analyze_streaks(&coin_box(), 2_000, Some(0.5), Some(9)).unwrap();
        assert_eq!(low.wins, 2_000);
        assert_eq!(low.win_streaks, 1);
        assert_eq!(low.loss_streaks, 0);
        assert_eq!(low.average_loss_streak, 0.0);
        assert!(matches!(
            sim.analyze_streaks(&coin_box(), 2_000, Some(f64::NAN), Some(9)),
            Err(LootboxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_value_distribution_bins() {
        let config = EngineConfig::default();
        let report = SimulationEngine::new(&config)
            .simulate(&three_item_box(), 5_000, Some(13))
            .unwrap();
        // 0.20, 2.00 and 25.00 land in three different bins
        let labels: Vec<&str> = report.value_distribution.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["$0.00-$0.25", "$2.00-$5.00", "$25.00-$50.00"]);
        let total: u64 = report.value_distribution.iter().map(|b| b.hits).sum();
        assert_eq!(total, 5_000);
        assert_eq!(report.value_distribution[0].hits, report.item_frequencies[0].hits);
        assert!((report.value_distribution[2].low - 25.0).abs() < 1e-12);
        assert_eq!(report.value_distribution[2].high, Some(50.0));

        let mut jackpot = coin_box();
        jackpot.items[1].value = 250.0;
        let report = SimulationEngine::new(&config).simulate(&jackpot, 100, Some(1)).unwrap();
        let top = report.value_distribution.last().unwrap();
        assert_eq!(top.label, "$100.00+");
        assert_eq!(top.high, None);
    }

    /// Rng that always returns the same word.
    struct Fixed(u64);

    impl rand::RngCore for Fixed {
        fn next_u32(&mut self) -> u32 {
            self.0 as u32
        }
        fn next_u64(&mut self) -> u64 {
            self.0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            dest.fill(0);
            Ok(())
        }
    }

    #[test]
    fn test_sampler_inverts_cdf() {
        let sampler = Sampler::new(&three_item_box());
        // u = 0 picks the first item; u just under 1 picks the last
        assert_eq!(sampler.draw(&mut Fixed(0)), 0);
        assert_eq!(sampler.draw(&mut Fixed(u64::MAX)), 2);
    }

    #[test]
    fn test_sampler_never_draws_zero_probability_tail() {
        let config = EngineConfig::default();
        let dist = RewardDistribution::new(
            "Short Sum",
            1.0,
            vec![
                RewardItem::new("Dust", 0.1, RarityTier::Common, 0.5),
                RewardItem::new("Shard", 0.5, RarityTier::Common, 0.4999995),
                RewardItem::new("Jackpot", 100.0, RarityTier::Legendary, 0.0),
            ],
        );
        let sampler = SimulationEngine::new(&config).sampler(&dist).unwrap();
        assert_eq!(sampler.draw(&mut Fixed(u64::MAX)), 1);
        assert_eq!(sampler.draw(&mut Fixed(0)), 0);

        let report = SimulationEngine::new(&config).simulate(&dist, 20_000, Some(3)).unwrap();
        assert_eq!(report.item_frequencies[2].hits, 0);
    }

    #[test]
    fn test_zero_batch_size_is_a_config_error() {
        let mut config = EngineConfig::default();
        config.simulation.confidence_batch_size = 0;
        let sim = SimulationEngine::new(&config);
        assert!(matches!(
            sim.confidence_intervals(&coin_box(), 100, 0.9, Some(1)),
            Err(LootboxError::InvalidConfig(_))
        ));
        assert!(matches!(
            sim.simulate(&coin_box(), 100, Some(1)),
            Err(LootboxError::InvalidConfig(_))
        ));

        let mut config = EngineConfig::default();
        config.simulation.partitions = 0;
        assert!(matches!(
            SimulationEngine::new(&config).simulate(&coin_box(), 100, Some(1)),
            Err(LootboxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_confidence_intervals_bracket_theory() {
        let config = EngineConfig::default();
        let sim = SimulationEngine::new(&config);
        let ci = sim.confidence_intervals(&coin_box(), 50_000, 0.95, Some(11)).unwrap();
        assert_eq!(ci.batches, 50);
        assert_eq!(ci.batch_size, 1_000);
        assert!(ci.expected_value.lower <= ci.expected_value.upper);
        assert!(ci.expected_value.lower < 2.0 && ci.expected_value.upper > 2.0);
        assert!(matches!(
            sim.confidence_intervals(&coin_box(), 1_000, 1.5, None),
            Err(LootboxError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_theoretical() {
        let config = EngineConfig::default();
        let check = SimulationEngine::new(&config)
            .validate_theoretical(&coin_box(), 20_000, 0.05, Some(8))
            .unwrap();
        assert_eq!(check.tiers.len(), 2);
        assert!(check.ev_within_tolerance);
        assert!(check.edge_within_tolerance);
        assert!(check.passed);
        assert_eq!(check.report.trials, 20_000);
    }
}
