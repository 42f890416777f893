//! Closed-form statistics over a reward distribution.
//!
//! Every public method validates the distribution's shape first and fails
//! with `InvalidDistribution` rather than correcting it; all are O(n) in the
//! item count except the percentile helpers, which sort.
//!
//! The `*_of` free functions skip validation and work on raw value and
//! probability slices. The optimizer scores candidates with them.

use crate::config::EngineConfig;
use crate::error::{LootboxError, Result, Violation};
use crate::model::{RarityTier, RewardDistribution, RewardItem};
use serde::{Deserialize, Serialize};

/// Percentiles reported by [`StatisticsEngine::value_percentiles`].
pub const PERCENTILES: [u8; 7] = [5, 10, 25, 50, 75, 90, 95];

/// Σ value_i · p_i
pub fn expected_value_of(values: &[f64], probabilities: &[f64]) -> f64 {
    values.iter().zip(probabilities).map(|(&v, &p)| v * p).sum()
}

/// (cost − EV) / cost
pub fn house_edge_of(cost: f64, values: &[f64], probabilities: &[f64]) -> f64 {
    (cost - expected_value_of(values, probabilities)) / cost
}

/// Σ −p ln p, with 0 ln 0 = 0.
pub fn entropy_of(probabilities: &[f64]) -> f64 {
    probabilities
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Per-item return on cost: (value − cost) / cost.
pub fn roi(item: &RewardItem, cost: f64) -> Result<f64> {
    if !(cost.is_finite() && cost > 0.0) {
        return Err(Violation::NonPositiveCost { cost }.into());
    }
    Ok((item.value - cost) / cost)
}

/// Dispersion band of a distribution, by coefficient of variation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl RiskLevel {
    pub fn from_cv(cv: f64) -> Self {
        if cv < 0.5 {
            RiskLevel::Low
        } else if cv < 1.0 {
            RiskLevel::Medium
        } else if cv < 2.0 {
            RiskLevel::High
        } else {
            RiskLevel::VeryHigh
        }
    }
}

/// How good a box is for the buyer, by house edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueRating {
    PlayerAdvantage,
    VeryGood,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

impl ValueRating {
    pub fn from_house_edge(edge: f64) -> Self {
        if edge < 0.0 {
            ValueRating::PlayerAdvantage
        } else if edge < 0.1 {
            ValueRating::VeryGood
        } else if edge < 0.2 {
            ValueRating::Good
        } else if edge < 0.3 {
            ValueRating::Fair
        } else if edge < 0.4 {
            ValueRating::Poor
        } else {
            ValueRating::VeryPoor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBreakdown {
    pub rarity: RarityTier,
    pub item_count: usize,
    pub total_probability: f64,
    pub average_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub expected_contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiSummary {
    pub expected_roi: f64,
    pub roi_std_dev: f64,
    pub min_roi: f64,
    pub max_roi: f64,
}

/// Cost that would produce a target house edge at the current probabilities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostSuggestion {
    /// EV / (1 − target), clamped to the admissible cost range
    pub cost: f64,
    /// False when clamping was needed
    pub within_range: bool,
}

/// Full closed-form report for one distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionAnalytics {
    pub name: String,
    pub cost: f64,
    pub expected_value: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub house_edge: f64,
    pub break_even_probability: f64,
    pub coefficient_of_variation: f64,
    pub sharpe_ratio: f64,
    pub entropy: f64,
    pub risk_level: RiskLevel,
    pub value_rating: ValueRating,
    pub item_roi: Vec<(String, f64)>,
    pub roi: RoiSummary,
    pub value_percentiles: Vec<(u8, f64)>,
    pub rarity_breakdown: Vec<TierBreakdown>,
}

/// Pure, deterministic statistics bound to one configuration.
#[derive(Debug, Clone, Copy)]
pub struct StatisticsEngine<'a> {
    config: &'a EngineConfig,
}

impl<'a> StatisticsEngine<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        StatisticsEngine { config }
    }

    fn check(&self, dist: &RewardDistribution) -> Result<()> {
        dist.validate_shape(self.config)
    }

    pub fn expected_value(&self, dist: &RewardDistribution) -> Result<f64> {
        self.check(dist)?;
        Ok(dist.items.iter().map(|i| i.value * i.probability).sum())
    }

    pub fn variance(&self, dist: &RewardDistribution) -> Result<f64> {
        let ev = self.expected_value(dist)?;
        Ok(dist
            .items
            .iter()
            .map(|i| i.probability * (i.value - ev).powi(2))
            .sum())
    }

    pub fn std_dev(&self, dist: &RewardDistribution) -> Result<f64> {
        Ok(self.variance(dist)?.sqrt())
    }

    pub fn house_edge(&self, dist: &RewardDistribution) -> Result<f64> {
        let ev = self.expected_value(dist)?;
        Ok((dist.cost - ev) / dist.cost)
    }

    /// Σ p_i over items with value_i ≥ cost.
    pub fn break_even_probability(&self, dist: &RewardDistribution) -> Result<f64> {
        self.profit_probability(dist, 0.0)
    }

    /// Σ p_i over items with value_i ≥ cost · (1 + min_margin).
    pub fn profit_probability(&self, dist: &RewardDistribution, min_margin: f64) -> Result<f64> {
        self.check(dist)?;
        let threshold = dist.cost * (1.0 + min_margin);
        Ok(dist
            .items
            .iter()
            .filter(|i| i.value >= threshold)
            .map(|i| i.probability)
            .sum())
    }

    /// Standard deviation over EV; infinite when EV is zero.
    pub fn coefficient_of_variation(&self, dist: &RewardDistribution) -> Result<f64> {
        let ev = self.expected_value(dist)?;
        if ev == 0.0 {
            return Ok(f64::INFINITY);
        }
        Ok(self.std_dev(dist)? / ev)
    }

    /// Expected excess return per unit of return volatility, both relative to cost.
    pub fn sharpe_ratio(&self, dist: &RewardDistribution, risk_free_rate: f64) -> Result<f64> {
        let ev = self.expected_value(dist)?;
        let expected_return = (ev - dist.cost) / dist.cost;
        let volatility = self.std_dev(dist)? / dist.cost;
        if volatility == 0.0 {
            return Ok(if expected_return > risk_free_rate {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            });
        }
        Ok((expected_return - risk_free_rate) / volatility)
    }

    /// Value at each of [`PERCENTILES`]: the first value (ascending) whose
    /// cumulative probability exceeds the percentile.
    pub fn value_percentiles(&self, dist: &RewardDistribution) -> Result<Vec<(u8, f64)>> {
        self.check(dist)?;
        Ok(weighted_percentiles(
            dist.items.iter().map(|i| (i.value, i.probability)).collect(),
        ))
    }

    pub fn rarity_breakdown(&self, dist: &RewardDistribution) -> Result<Vec<TierBreakdown>> {
        self.check(dist)?;
        let breakdown = RarityTier::ALL
            .iter()
            .map(|&rarity| {
                let items: Vec<&RewardItem> = dist.items_by_rarity(rarity).collect();
                let total_probability: f64 = items.iter().map(|i| i.probability).sum();
                let expected_contribution: f64 =
                    items.iter().map(|i| i.value * i.probability).sum();
                let (min_value, max_value) = if items.is_empty() {
                    (0.0, 0.0)
                } else {
                    items.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), i| {
                        (lo.min(i.value), hi.max(i.value))
                    })
                };
                TierBreakdown {
                    rarity,
                    item_count: items.len(),
                    total_probability,
                    average_value: if total_probability > 0.0 {
                        expected_contribution / total_probability
                    } else {
                        0.0
                    },
                    min_value,
                    max_value,
                    expected_contribution,
                }
            })
            .collect();
        Ok(breakdown)
    }

    pub fn roi_summary(&self, dist: &RewardDistribution) -> Result<RoiSummary> {
        self.check(dist)?;
        let rois: Vec<(f64, f64)> = dist
            .items
            .iter()
            .map(|i| roi(i, dist.cost).map(|r| (r, i.probability)))
            .collect::<Result<_>>()?;
        let expected_roi: f64 = rois.iter().map(|&(r, p)| r * p).sum();
        let variance: f64 = rois.iter().map(|&(r, p)| p * (r - expected_roi).powi(2)).sum();
        let (min_roi, max_roi) = rois
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(r, _)| (lo.min(r), hi.max(r)));
        Ok(RoiSummary {
            expected_roi,
            roi_std_dev: variance.sqrt(),
            min_roi,
            max_roi,
        })
    }

    /// Cost at which the current probabilities would yield `target_edge`.
    pub fn optimal_cost(&self, dist: &RewardDistribution, target_edge: f64) -> Result<CostSuggestion> {
        if !(target_edge.is_finite() && target_edge < 1.0) {
            return Err(LootboxError::InvalidTarget(target_edge));
        }
        let ev = self.expected_value(dist)?;
        let raw = ev / (1.0 - target_edge);
        let range = self.config.cost_range;
        let cost = raw.clamp(range.min, range.max);
        Ok(CostSuggestion {
            cost,
            within_range: cost == raw,
        })
    }

    pub fn analyze(&self, dist: &RewardDistribution) -> Result<DistributionAnalytics> {
        let expected_value = self.expected_value(dist)?;
        let variance = self.variance(dist)?;
        let house_edge = self.house_edge(dist)?;
        let coefficient_of_variation = self.coefficient_of_variation(dist)?;
        let item_roi = dist
            .items
            .iter()
            .map(|i| roi(i, dist.cost).map(|r| (i.name.clone(), r)))
            .collect::<Result<_>>()?;
        Ok(DistributionAnalytics {
            name: dist.name.clone(),
            cost: dist.cost,
            expected_value,
            variance,
            std_dev: variance.sqrt(),
            house_edge,
            break_even_probability: self.break_even_probability(dist)?,
            coefficient_of_variation,
            sharpe_ratio: self.sharpe_ratio(dist, 0.0)?,
            entropy: entropy_of(&dist.probabilities()),
            risk_level: RiskLevel::from_cv(coefficient_of_variation),
            value_rating: ValueRating::from_house_edge(house_edge),
            item_roi,
            roi: self.roi_summary(dist)?,
            value_percentiles: self.value_percentiles(dist)?,
            rarity_breakdown: self.rarity_breakdown(dist)?,
        })
    }
}

/// Percentiles over `(value, weight)` pairs with weights summing to ~1.
pub(crate) fn weighted_percentiles(mut pairs: Vec<(f64, f64)>) -> Vec<(u8, f64)> {
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let mut cumulative = Vec::with_capacity(pairs.len());
    let mut running = 0.0;
    for &(_, w) in &pairs {
        running += w;
        cumulative.push(running);
    }
    PERCENTILES
        .iter()
        .map(|&pct| {
            let target = f64::from(pct) / 100.0;
            let idx = cumulative.partition_point(|&c| c <= target);
            let value = pairs
                .get(idx)
                .or_else(|| pairs.last())
                .map_or(0.0, |&(v, _)| v);
            (pct, value)
        })
        .collect()
}
