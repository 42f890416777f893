//! Linear constraint region for one skeleton
//!
//! The region P is: per-item tier bands, Σp = 1, and monotonic commonality
//! between consecutive tiers present in the skeleton. Everything here is
//! derived once from the skeleton and the configured bands, then shared
//! read-only by both solvers.

use super::projection::{dykstra, ConvexSet};
use crate::config::{Band, EngineConfig, TierBands};
use crate::error::{Infeasibility, Violation};
use crate::model::{RarityTier, Skeleton};

/// Slack on the analytic bound sums, so a region that touches Σp = 1 exactly
/// is not declared empty by rounding.
const SUM_SLACK: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct Constraints {
    names: Vec<String>,
    /// Band of each item, from its tier
    bands: Vec<Band>,
    /// Present tiers, most common first, with the indices of their items
    groups: Vec<(RarityTier, Vec<usize>)>,
}

impl Constraints {
    pub fn new(skeleton: &Skeleton, tier_bands: &TierBands) -> Self {
        let names = skeleton.items.iter().map(|i| i.name.clone()).collect();
        let bands = skeleton.items.iter().map(|i| tier_bands.get(i.rarity)).collect();
        let mut groups: Vec<(RarityTier, Vec<usize>)> = Vec::new();
        for tier in RarityTier::ALL {
            let members: Vec<usize> = skeleton
                .items
                .iter()
                .enumerate()
                .filter(|(_, item)| item.rarity == tier)
                .map(|(idx, _)| idx)
                .collect();
            if !members.is_empty() {
                groups.push((tier, members));
            }
        }
        Constraints { names, bands, groups }
    }

    pub fn len(&self) -> usize {
        self.bands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bands.is_empty()
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn tiers(&self) -> impl Iterator<Item = RarityTier> + '_ {
        self.groups.iter().map(|(tier, _)| *tier)
    }

    /// Item indices per present tier, most common first.
    pub(crate) fn groups(&self) -> &[(RarityTier, Vec<usize>)] {
        &self.groups
    }

    fn group_band(&self, group: usize) -> Band {
        let (_, members) = &self.groups[group];
        self.bands[members[0]]
    }

    /// Analytic emptiness test. Runs before any solver is invoked.
    ///
    /// Checks, in order: inverted bands, raw bound sums, ordering between
    /// tiers, and finally the bound sums after ordering has tightened the
    /// bands. Passing all four means [`Constraints::center`] is feasible.
    pub fn feasibility(&self) -> Result<(), Infeasibility> {
        for (g, (tier, _)) in self.groups.iter().enumerate() {
            let band = self.group_band(g);
            if band.low > band.high {
                return Err(Infeasibility::InvertedBand {
                    tier: *tier,
                    low: band.low,
                    high: band.high,
                });
            }
        }
        let (low_sum, high_sum) = bound_sums(&self.bands);
        if low_sum > 1.0 + SUM_SLACK {
            return Err(Infeasibility::LowerBoundsExceedOne { sum: low_sum });
        }
        if high_sum < 1.0 - SUM_SLACK {
            return Err(Infeasibility::UpperBoundsBelowOne { sum: high_sum });
        }

        let effective = self.effective_group_bands();
        for eff in &effective {
            if eff.band.low > eff.band.high {
                return Err(Infeasibility::OrderingConflict {
                    common: self.groups[eff.high_from].0,
                    rare: self.groups[eff.low_from].0,
                });
            }
        }
        let item_bands = self.spread(&effective);
        let (low_sum, high_sum) = bound_sums(&item_bands);
        if low_sum > 1.0 + SUM_SLACK {
            return Err(Infeasibility::LowerBoundsExceedOne { sum: low_sum });
        }
        if high_sum < 1.0 - SUM_SLACK {
            return Err(Infeasibility::UpperBoundsBelowOne { sum: high_sum });
        }
        Ok(())
    }

    /// Per-tier bands tightened by the ordering constraint.
    ///
    /// A tier can be no likelier than any more common tier allows, and no
    /// less likely than any rarer tier requires.
    fn effective_group_bands(&self) -> Vec<EffectiveBand> {
        let count = self.groups.len();
        let mut out: Vec<EffectiveBand> = (0..count)
            .map(|g| EffectiveBand {
                band: self.group_band(g),
                high_from: g,
                low_from: g,
            })
            .collect();
        for g in 1..count {
            if out[g - 1].band.high < out[g].band.high {
                out[g].band.high = out[g - 1].band.high;
                out[g].high_from = out[g - 1].high_from;
            }
        }
        for g in (0..count.saturating_sub(1)).rev() {
            if out[g + 1].band.low > out[g].band.low {
                out[g].band.low = out[g + 1].band.low;
                out[g].low_from = out[g + 1].low_from;
            }
        }
        out
    }

    fn spread(&self, effective: &[EffectiveBand]) -> Vec<Band> {
        let mut item_bands = self.bands.clone();
        for ((_, members), eff) in self.groups.iter().zip(effective) {
            for &idx in members {
                item_bands[idx] = eff.band;
            }
        }
        item_bands
    }

    /// Per-item bands after ordering tightening.
    pub fn effective_bands(&self) -> Vec<Band> {
        self.spread(&self.effective_group_bands())
    }

    /// A point of the region: the same fraction λ of the way from every
    /// effective lower bound to its upper bound, with λ chosen so Σp = 1.
    ///
    /// Both bound vectors are non-increasing with rarity, so the mix is
    /// ordered. Only meaningful when [`Constraints::feasibility`] passes.
    pub fn center(&self) -> Vec<f64> {
        let bands = self.effective_bands();
        let (low_sum, high_sum) = bound_sums(&bands);
        let span = high_sum - low_sum;
        let lambda = if span > 0.0 {
            ((1.0 - low_sum) / span).clamp(0.0, 1.0)
        } else {
            0.0
        };
        bands
            .iter()
            .map(|b| b.low + lambda * (b.high - b.low))
            .collect()
    }

    /// Best-effort vector for an empty region: bounds rescaled to sum to one.
    pub fn fallback(&self) -> Vec<f64> {
        let (low_sum, high_sum) = bound_sums(&self.bands);
        let raw: Vec<f64> = if low_sum > 1.0 {
            self.bands.iter().map(|b| b.low).collect()
        } else if high_sum < 1.0 {
            self.bands.iter().map(|b| b.high).collect()
        } else {
            self.bands.iter().map(|b| b.midpoint()).collect()
        };
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            raw.iter().map(|p| p / total).collect()
        } else {
            vec![1.0 / self.len() as f64; self.len()]
        }
    }

    /// Consecutive present-tier pairs as (more common items, rarer items).
    pub(crate) fn boundaries(&self) -> impl Iterator<Item = (&[usize], &[usize])> {
        self.groups
            .windows(2)
            .map(|pair| (pair[0].1.as_slice(), pair[1].1.as_slice()))
    }

    /// Sets whose intersection is the region, optionally cut by an expected
    /// value hyperplane. The box-and-sum set comes last so projections satisfy
    /// it exactly.
    pub(crate) fn sets<'a>(&'a self, hyperplane: Option<(&'a [f64], f64)>) -> Vec<ConvexSet<'a>> {
        let mut sets: Vec<ConvexSet<'a>> = self
            .boundaries()
            .map(|(common, rare)| ConvexSet::Boundary { common, rare })
            .collect();
        if let Some((normal, offset)) = hyperplane {
            sets.push(ConvexSet::Hyperplane { normal, offset });
        }
        sets.push(ConvexSet::BoxSum(&self.bands));
        sets
    }

    /// Projection onto the region (or its slice at a fixed expected value).
    pub(crate) fn project(
        &self,
        y: &[f64],
        hyperplane: Option<(&[f64], f64)>,
        max_sweeps: usize,
        tolerance: f64,
    ) -> (Vec<f64>, bool) {
        dykstra(y, &self.sets(hyperplane), max_sweeps, tolerance)
    }

    /// Σ over tier boundaries of the squared amount by which the rarer tier's
    /// likeliest item beats the common tier's least likely one.
    pub fn ordering_violation(&self, p: &[f64]) -> f64 {
        self.boundaries()
            .map(|(common, rare)| {
                let min_common = common.iter().map(|&i| p[i]).fold(f64::INFINITY, f64::min);
                let max_rare = rare.iter().map(|&j| p[j]).fold(f64::NEG_INFINITY, f64::max);
                (max_rare - min_common).max(0.0).powi(2)
            })
            .sum()
    }

    /// Hard post-check on a solver's output. Bands and ordering get
    /// `constraint_tolerance` slack, the sum gets `sum_tolerance`.
    pub fn check(&self, p: &[f64], config: &EngineConfig) -> Result<(), Violation> {
        if p.len() != self.len() {
            return Err(Violation::LengthMismatch {
                expected: self.len(),
                actual: p.len(),
            });
        }
        let slack = config.constraint_tolerance;
        for ((name, band), &probability) in self.names.iter().zip(&self.bands).zip(p) {
            if !(probability.is_finite() && (0.0..=1.0).contains(&probability)) {
                return Err(Violation::ProbabilityOutOfRange {
                    item: name.clone(),
                    probability,
                });
            }
            if !band.contains(probability, slack) {
                return Err(Violation::OutsideBand {
                    item: name.clone(),
                    probability,
                    low: band.low,
                    high: band.high,
                });
            }
        }
        let sum: f64 = p.iter().sum();
        if (sum - 1.0).abs() > config.sum_tolerance {
            return Err(Violation::ProbabilitySum {
                sum,
                tolerance: config.sum_tolerance,
            });
        }
        for (common, rare) in self.boundaries() {
            let weakest = argmin(common, p);
            let strongest = argmax(rare, p);
            if p[weakest] + slack < p[strongest] {
                return Err(Violation::RarityOrder {
                    common_item: self.names[weakest].clone(),
                    common_probability: p[weakest],
                    rare_item: self.names[strongest].clone(),
                    rare_probability: p[strongest],
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct EffectiveBand {
    band: Band,
    /// Group whose upper bound capped this one
    high_from: usize,
    /// Group whose lower bound raised this one
    low_from: usize,
}

fn bound_sums(bands: &[Band]) -> (f64, f64) {
    bands
        .iter()
        .fold((0.0, 0.0), |(lo, hi), b| (lo + b.low, hi + b.high))
}

fn argmin(indices: &[usize], p: &[f64]) -> usize {
    indices
        .iter()
        .copied()
        .min_by(|&a, &b| p[a].total_cmp(&p[b]))
        .unwrap_or_default()
}

fn argmax(indices: &[usize], p: &[f64]) -> usize {
    indices
        .iter()
        .copied()
        .max_by(|&a, &b| p[a].total_cmp(&p[b]))
        .unwrap_or_default()
}
