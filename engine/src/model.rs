//! Reward box data model
//!
//! A [`RewardDistribution`] is a value object: components borrow it and hand
//! back new distributions (or probability vectors) rather than mutating it.
//! A [`Skeleton`] is the optimizer's input: items and cost fixed, probabilities
//! still to be solved.

use crate::config::EngineConfig;
use crate::error::{Result, Violation};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Rarity tiers, ordered from most to least frequent.
///
/// The derived `Ord` follows that order, so `Common < Mythic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RarityTier {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Mythic,
}

impl RarityTier {
    pub const ALL: [RarityTier; 6] = [
        RarityTier::Common,
        RarityTier::Uncommon,
        RarityTier::Rare,
        RarityTier::Epic,
        RarityTier::Legendary,
        RarityTier::Mythic,
    ];

    /// Position in the commonality order (0 = Common).
    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn is_more_common_than(self, other: RarityTier) -> bool {
        self < other
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RarityTier::Common => "common",
            RarityTier::Uncommon => "uncommon",
            RarityTier::Rare => "rare",
            RarityTier::Epic => "epic",
            RarityTier::Legendary => "legendary",
            RarityTier::Mythic => "mythic",
        }
    }
}

impl fmt::Display for RarityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One prize in the box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardItem {
    pub name: String,
    pub value: f64,
    pub rarity: RarityTier,
    pub probability: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RewardItem {
    pub fn new(name: impl Into<String>, value: f64, rarity: RarityTier, probability: f64) -> Self {
        RewardItem {
            name: name.into(),
            value,
            rarity,
            probability,
            description: None,
        }
    }
}

/// A complete box: cost plus an ordered, non-empty list of uniquely named items.
///
/// Item order is canonical: cumulative sums for sampling are built over it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardDistribution {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub cost: f64,
    pub items: Vec<RewardItem>,
}

impl RewardDistribution {
    pub fn new(name: impl Into<String>, cost: f64, items: Vec<RewardItem>) -> Self {
        RewardDistribution {
            name: name.into(),
            description: None,
            cost,
            items,
        }
    }

    /// Parse the persisted record and check its shape (see
    /// [`validate_shape`](Self::validate_shape)). Rarity ordering is not
    /// checked, so hand-authored boxes that break it still load.
    pub fn from_json(json: &str, config: &EngineConfig) -> Result<Self> {
        let dist: RewardDistribution = serde_json::from_str(json)?;
        dist.validate_shape(config)?;
        Ok(dist)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.items.iter().map(|i| i.probability).collect()
    }

    pub fn values(&self) -> Vec<f64> {
        self.items.iter().map(|i| i.value).collect()
    }

    pub fn probability_sum(&self) -> f64 {
        self.items.iter().map(|i| i.probability).sum()
    }

    pub fn items_by_rarity(&self, rarity: RarityTier) -> impl Iterator<Item = &RewardItem> {
        self.items.iter().filter(move |i| i.rarity == rarity)
    }

    pub fn probability_by_rarity(&self, rarity: RarityTier) -> f64 {
        self.items_by_rarity(rarity).map(|i| i.probability).sum()
    }

    /// Probability-weighted mean value of a tier; 0 when the tier is absent or
    /// carries no probability mass.
    pub fn avg_value_by_rarity(&self, rarity: RarityTier) -> f64 {
        let total = self.probability_by_rarity(rarity);
        if total <= 0.0 {
            return 0.0;
        }
        self.items_by_rarity(rarity)
            .map(|i| i.value * i.probability)
            .sum::<f64>()
            / total
    }

    /// Tiers with at least one item, most common first.
    pub fn tiers_present(&self) -> Vec<RarityTier> {
        tiers_present(self.items.iter().map(|i| i.rarity))
    }

    /// New distribution whose probabilities are divided by their sum.
    /// Returns an unchanged copy when the sum is not positive.
    pub fn normalized(&self) -> RewardDistribution {
        let total = self.probability_sum();
        let mut out = self.clone();
        if total > 0.0 {
            for item in &mut out.items {
                item.probability /= total;
            }
        }
        out
    }

    /// Same items and cost with a replacement probability vector.
    pub fn with_probabilities(&self, probabilities: &[f64]) -> Result<RewardDistribution> {
        if probabilities.len() != self.items.len() {
            return Err(Violation::LengthMismatch {
                expected: self.items.len(),
                actual: probabilities.len(),
            }
            .into());
        }
        let mut out = self.clone();
        for (item, &p) in out.items.iter_mut().zip(probabilities) {
            item.probability = p;
        }
        Ok(out)
    }

    /// Check every invariant except rarity ordering: items, names, values,
    /// probability ranges, sum-to-one and cost.
    pub fn validate_shape(&self, config: &EngineConfig) -> Result<()> {
        if self.items.is_empty() {
            return Err(Violation::NoItems.into());
        }
        let mut seen = HashSet::with_capacity(self.items.len());
        for (index, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                return Err(Violation::EmptyName { index }.into());
            }
            if !seen.insert(item.name.as_str()) {
                return Err(Violation::DuplicateName { name: item.name.clone() }.into());
            }
            if !(item.value.is_finite() && item.value >= 0.0) {
                return Err(Violation::InvalidValue {
                    item: item.name.clone(),
                    value: item.value,
                }
                .into());
            }
            if !(item.probability.is_finite() && (0.0..=1.0).contains(&item.probability)) {
                return Err(Violation::ProbabilityOutOfRange {
                    item: item.name.clone(),
                    probability: item.probability,
                }
                .into());
            }
        }
        let sum = self.probability_sum();
        if (sum - 1.0).abs() > config.sum_tolerance {
            return Err(Violation::ProbabilitySum {
                sum,
                tolerance: config.sum_tolerance,
            }
            .into());
        }
        validate_cost(self.cost, config)
    }

    /// Every invariant, including monotonic commonality (with
    /// `constraint_tolerance` slack for solver round-off).
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        self.validate_shape(config)?;
        check_ordering(&self.items, config.constraint_tolerance)?;
        Ok(())
    }
}

pub(crate) fn validate_cost(cost: f64, config: &EngineConfig) -> Result<()> {
    if !(cost.is_finite() && cost > 0.0) {
        return Err(Violation::NonPositiveCost { cost }.into());
    }
    let range = config.cost_range;
    if cost < range.min || cost > range.max {
        return Err(Violation::CostOutOfRange {
            cost,
            min: range.min,
            max: range.max,
        }
        .into());
    }
    Ok(())
}

pub(crate) fn tiers_present(tiers: impl Iterator<Item = RarityTier>) -> Vec<RarityTier> {
    let mut present: Vec<RarityTier> = tiers.collect();
    present.sort();
    present.dedup();
    present
}

/// First pair of items where a more common item is less likely than a rarer
/// one by more than `slack`.
fn check_ordering(items: &[RewardItem], slack: f64) -> std::result::Result<(), Violation> {
    for common in items {
        for rare in items {
            if common.rarity.is_more_common_than(rare.rarity)
                && common.probability + slack < rare.probability
            {
                return Err(Violation::RarityOrder {
                    common_item: common.name.clone(),
                    common_probability: common.probability,
                    rare_item: rare.name.clone(),
                    rare_probability: rare.probability,
                });
            }
        }
    }
    Ok(())
}

/// One skeleton entry: everything about an item except its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkeletonItem {
    pub name: String,
    pub value: f64,
    pub rarity: RarityTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Optimizer input: fixed items and cost, probabilities unresolved.
///
/// `seed_probabilities` optionally carries a starting guess (for example the
/// probabilities of a distribution being re-tuned).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub name: String,
    pub cost: f64,
    pub items: Vec<SkeletonItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed_probabilities: Option<Vec<f64>>,
}

impl Skeleton {
    /// Build from `(name, value, rarity)` triples.
    pub fn from_triples<S: Into<String>>(
        name: impl Into<String>,
        cost: f64,
        triples: impl IntoIterator<Item = (S, f64, RarityTier)>,
    ) -> Self {
        let items = triples
            .into_iter()
            .map(|(name, value, rarity)| SkeletonItem {
                name: name.into(),
                value,
                rarity,
                description: None,
            })
            .collect();
        Skeleton {
            name: name.into(),
            cost,
            items,
            seed_probabilities: None,
        }
    }

    /// Skeleton of an existing distribution, keeping its probabilities as the
    /// starting guess.
    pub fn from_distribution(dist: &RewardDistribution) -> Self {
        Skeleton {
            name: dist.name.clone(),
            cost: dist.cost,
            items: dist
                .items
                .iter()
                .map(|i| SkeletonItem {
                    name: i.name.clone(),
                    value: i.value,
                    rarity: i.rarity,
                    description: i.description.clone(),
                })
                .collect(),
            seed_probabilities: Some(dist.probabilities()),
        }
    }

    pub fn with_seed_probabilities(mut self, probabilities: Vec<f64>) -> Self {
        self.seed_probabilities = Some(probabilities);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn values(&self) -> Vec<f64> {
        self.items.iter().map(|i| i.value).collect()
    }

    pub fn tiers(&self) -> Vec<RarityTier> {
        self.items.iter().map(|i| i.rarity).collect()
    }

    /// Items, names, values and cost; probabilities are not looked at.
    pub fn validate(&self, config: &EngineConfig) -> Result<()> {
        if self.items.is_empty() {
            return Err(Violation::NoItems.into());
        }
        let mut seen = HashSet::with_capacity(self.items.len());
        for (index, item) in self.items.iter().enumerate() {
            if item.name.trim().is_empty() {
                return Err(Violation::EmptyName { index }.into());
            }
            if !seen.insert(item.name.as_str()) {
                return Err(Violation::DuplicateName { name: item.name.clone() }.into());
            }
            if !(item.value.is_finite() && item.value >= 0.0) {
                return Err(Violation::InvalidValue {
                    item: item.name.clone(),
                    value: item.value,
                }
                .into());
            }
        }
        validate_cost(self.cost, config)
    }

    /// Attach a probability vector, producing a full distribution.
    pub fn into_distribution(self, probabilities: &[f64]) -> Result<RewardDistribution> {
        if probabilities.len() != self.items.len() {
            return Err(Violation::LengthMismatch {
                expected: self.items.len(),
                actual: probabilities.len(),
            }
            .into());
        }
        let items = self
            .items
            .into_iter()
            .zip(probabilities)
            .map(|(item, &probability)| RewardItem {
                name: item.name,
                value: item.value,
                rarity: item.rarity,
                probability,
                description: item.description,
            })
            .collect();
        Ok(RewardDistribution {
            name: self.name,
            description: None,
            cost: self.cost,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LootboxError;
    use crate::fixtures::three_item_box;

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    fn violation(result: Result<()>) -> Violation {
        match result {
            Err(LootboxError::InvalidDistribution(v)) => v,
            other => panic!("expected InvalidDistribution, got {other:?}"),
        }
    }

    #[test]
    fn test_tier_order_most_to_least_common() {
        assert!(RarityTier::Common.is_more_common_than(RarityTier::Uncommon));
        assert!(RarityTier::Legendary.is_more_common_than(RarityTier::Mythic));
        assert!(!RarityTier::Rare.is_more_common_than(RarityTier::Rare));
        assert_eq!(RarityTier::Epic.rank(), 3);
    }

    #[test]
    fn test_valid_box_passes() {
        assert!(three_item_box().validate(&config()).is_ok());
    }

    #[test]
    fn test_sum_off_by_more_than_tolerance_rejected() {
        let mut dist = three_item_box();
        dist.items[0].probability += 1e-4;
        assert!(matches!(
            violation(dist.validate_shape(&config())),
            Violation::ProbabilitySum { .. }
        ));
    }

    #[test]
    fn test_sum_within_tolerance_accepted() {
        let mut dist = three_item_box();
        dist.items[0].probability += 5e-7;
        assert!(dist.validate_shape(&config()).is_ok());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut dist = three_item_box();
        dist.items[1].name = dist.items[0].name.clone();
        assert_eq!(
            violation(dist.validate_shape(&config())),
            Violation::DuplicateName { name: dist.items[0].name.clone() }
        );
    }

    #[test]
    fn test_negative_value_names_item() {
        let mut dist = three_item_box();
        dist.items[2].value = -1.0;
        match violation(dist.validate_shape(&config())) {
            Violation::InvalidValue { item, .. } => assert_eq!(item, dist.items[2].name),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_cost_range_is_policy() {
        let mut dist = three_item_box();
        dist.cost = 2000.0;
        assert!(matches!(
            violation(dist.validate_shape(&config())),
            Violation::CostOutOfRange { .. }
        ));
        let mut wide = config();
        wide.cost_range.max = 5000.0;
        assert!(dist.validate_shape(&wide).is_ok());
    }

    #[test]
    fn test_zero_cost_rejected() {
        let mut dist = three_item_box();
        dist.cost = 0.0;
        assert_eq!(
            violation(dist.validate_shape(&config())),
            Violation::NonPositiveCost { cost: 0.0 }
        );
    }

    #[test]
    fn test_ordering_violation_detected() {
        let dist = RewardDistribution::new(
            "inverted",
            1.0,
            vec![
                RewardItem::new("a", 0.1, RarityTier::Common, 0.3),
                RewardItem::new("b", 5.0, RarityTier::Rare, 0.7),
            ],
        );
        assert!(dist.validate_shape(&config()).is_ok());
        match violation(dist.validate(&config())) {
            Violation::RarityOrder { common_item, rare_item, .. } => {
                assert_eq!(common_item, "a");
                assert_eq!(rare_item, "b");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_json_round_trip_preserves_record() {
        let mut dist = three_item_box();
        dist.items[0].description = Some("pocket lint".to_string());
        let json = dist.to_json_pretty().unwrap();
        assert!(json.contains("\"rarity\": \"common\""));
        let back = RewardDistribution::from_json(&json, &config()).unwrap();
        assert_eq!(back, dist);
    }

    #[test]
    fn test_from_json_validates() {
        let json = r#"{"name": "bad", "cost": 1.0, "items": [
            {"name": "x", "value": 1.0, "rarity": "common", "probability": 0.5}
        ]}"#;
        assert!(matches!(
            RewardDistribution::from_json(json, &config()),
            Err(LootboxError::InvalidDistribution(Violation::ProbabilitySum { .. }))
        ));
    }

    #[test]
    fn test_from_json_accepts_unordered_box() {
        // Rare item more likely than the common one
        let json = r#"{"name": "upside down", "cost": 1.0, "items": [
            {"name": "x", "value": 0.5, "rarity": "common", "probability": 0.3},
            {"name": "y", "value": 2.0, "rarity": "rare", "probability": 0.7}
        ]}"#;
        let dist = RewardDistribution::from_json(json, &config()).unwrap();
        assert!(matches!(
            violation(dist.validate(&config())),
            Violation::RarityOrder { .. }
        ));
    }

    #[test]
    fn test_normalized_returns_new_value() {
        let mut dist = three_item_box();
        for item in &mut dist.items {
            item.probability *= 2.0;
        }
        let norm = dist.normalized();
        assert!((norm.probability_sum() - 1.0).abs() < 1e-12);
        assert!((dist.probability_sum() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_rarity_queries() {
        let dist = three_item_box();
        assert_eq!(
            dist.tiers_present(),
            vec![RarityTier::Common, RarityTier::Rare, RarityTier::Legendary]
        );
        assert!((dist.probability_by_rarity(RarityTier::Rare) - 0.40).abs() < 1e-12);
        assert!((dist.avg_value_by_rarity(RarityTier::Legendary) - 25.0).abs() < 1e-12);
        assert_eq!(dist.avg_value_by_rarity(RarityTier::Mythic), 0.0);
    }

    #[test]
    fn test_skeleton_round_trip_through_distribution() {
        let dist = three_item_box();
        let skeleton = Skeleton::from_distribution(&dist);
        assert_eq!(skeleton.seed_probabilities.as_deref(), Some(&dist.probabilities()[..]));
        let rebuilt = skeleton.into_distribution(&dist.probabilities()).unwrap();
        assert_eq!(rebuilt.items, dist.items);
    }

    #[test]
    fn test_skeleton_length_mismatch() {
        let skeleton = Skeleton::from_triples("s", 1.0, [("a", 1.0, RarityTier::Common)]);
        assert!(matches!(
            skeleton.into_distribution(&[0.5, 0.5]),
            Err(LootboxError::InvalidDistribution(Violation::LengthMismatch { expected: 1, actual: 2 }))
        ));
    }
}
