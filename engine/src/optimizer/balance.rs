//! Rarity-balanced objective
//!
//! A softer alternative to the exact house-edge solve: the squared edge error
//! is traded off against a target outcome variance and target total
//! probability per rarity tier,
//!
//!   (edge − E)² + w_v·(Var − V)² + w_t·Σ_tiers (share − S_tier)²
//!
//! minimized over the same region P. Tiers without an explicit share target
//! aim for [`DEFAULT_TIER_SHARE`].

use super::Constraints;
use crate::error::{LootboxError, Result};
use crate::model::RarityTier;
use crate::stats::expected_value_of;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Share a present tier aims for when no target is given.
pub const DEFAULT_TIER_SHARE: f64 = 0.1;

/// What a rarity-balanced solve aims for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalanceTargets {
    pub house_edge: f64,
    /// Target variance of the opened value
    pub variance: f64,
    /// Target total probability per tier
    pub tier_shares: BTreeMap<RarityTier, f64>,
    pub variance_weight: f64,
    pub tier_weight: f64,
}

impl Default for BalanceTargets {
    fn default() -> Self {
        BalanceTargets {
            house_edge: 0.15,
            variance: 1.0,
            tier_shares: BTreeMap::new(),
            variance_weight: 0.1,
            tier_weight: 0.1,
        }
    }
}

impl BalanceTargets {
    pub fn with_share(mut self, tier: RarityTier, share: f64) -> Self {
        self.tier_shares.insert(tier, share);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.house_edge.is_finite() && self.house_edge > 0.0 && self.house_edge < 1.0) {
            return Err(LootboxError::InvalidTarget(self.house_edge));
        }
        let non_negative = [
            ("variance", self.variance),
            ("variance_weight", self.variance_weight),
            ("tier_weight", self.tier_weight),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(LootboxError::InvalidConfig(format!(
                    "balance {name} must be a non-negative number, got {value}"
                )));
            }
        }
        for (tier, &share) in &self.tier_shares {
            if !(share.is_finite() && (0.0..=1.0).contains(&share)) {
                return Err(LootboxError::InvalidConfig(format!(
                    "{tier} share {share} must lie within [0, 1]"
                )));
            }
        }
        Ok(())
    }
}

/// Balance terms bound to one skeleton's tier groups.
#[derive(Debug, Clone, PartialEq)]
pub struct Balance {
    variance: f64,
    variance_weight: f64,
    tier_weight: f64,
    groups: Vec<(RarityTier, Vec<usize>, f64)>,
}

impl Balance {
    pub fn new(targets: &BalanceTargets, constraints: &Constraints) -> Self {
        let groups = constraints
            .groups()
            .iter()
            .map(|(tier, members)| {
                let share = targets.tier_shares.get(tier).copied().unwrap_or(DEFAULT_TIER_SHARE);
                (*tier, members.clone(), share)
            })
            .collect();
        Balance {
            variance: targets.variance,
            variance_weight: targets.variance_weight,
            tier_weight: targets.tier_weight,
            groups,
        }
    }

    /// Σ p·v² − (Σ p·v)²; equals the outcome variance on Σp = 1.
    pub fn variance_of(values: &[f64], p: &[f64]) -> f64 {
        let mean = expected_value_of(values, p);
        values.iter().zip(p).map(|(v, pi)| pi * v * v).sum::<f64>() - mean * mean
    }

    fn share(members: &[usize], p: &[f64]) -> f64 {
        members.iter().map(|&i| p[i]).sum()
    }

    /// Weighted variance and tier terms (the edge term lives on the problem).
    pub fn penalty(&self, values: &[f64], p: &[f64]) -> f64 {
        let variance_gap = Self::variance_of(values, p) - self.variance;
        let tiers: f64 = self
            .groups
            .iter()
            .map(|(_, members, target)| (Self::share(members, p) - target).powi(2))
            .sum();
        self.variance_weight * variance_gap * variance_gap + self.tier_weight * tiers
    }

    pub fn penalty_gradient(&self, values: &[f64], p: &[f64]) -> Vec<f64> {
        let mean = expected_value_of(values, p);
        let variance_gap = Self::variance_of(values, p) - self.variance;
        let mut grad: Vec<f64> = values
            .iter()
            .map(|v| 2.0 * self.variance_weight * variance_gap * (v * v - 2.0 * mean * v))
            .collect();
        for (_, members, target) in &self.groups {
            let pull = 2.0 * self.tier_weight * (Self::share(members, p) - target);
            for &i in members {
                grad[i] += pull;
            }
        }
        grad
    }

    pub fn report(&self, values: &[f64], p: &[f64]) -> BalanceReport {
        BalanceReport {
            variance: Self::variance_of(values, p),
            target_variance: self.variance,
            tiers: self
                .groups
                .iter()
                .map(|(rarity, members, target)| TierShare {
                    rarity: *rarity,
                    share: Self::share(members, p),
                    target: *target,
                })
                .collect(),
            penalty: self.penalty(values, p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TierShare {
    pub rarity: RarityTier,
    pub share: f64,
    pub target: f64,
}

/// How close a balanced solve came to each soft target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BalanceReport {
    pub variance: f64,
    pub target_variance: f64,
    pub tiers: Vec<TierShare>,
    /// Weighted variance and tier terms at the answer
    pub penalty: f64,
}
