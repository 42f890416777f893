//! Hand-built boxes and skeletons shared by tests, benches and the CLI demo.
//!
//! `three_item_box` (cost 2.00):
//!   Pebble   0.20  common     p = 0.50
//!   Token    2.00  rare       p = 0.40
//!   Crown   25.00  legendary  p = 0.10
//!   EV = 3.40, house edge = -0.70 (player advantage)
//!
//! `five_tier_box` (cost 2.00):
//!   EV = 1.8275, house edge = 0.08625
//!
//! `two_tier_skeleton` (cost 2.50) pairs with `two_tier_config`:
//!   Common band [0.40, 0.60], Legendary band [0.01, 0.05].

use crate::config::{Band, EngineConfig};
use crate::model::{RarityTier, RewardDistribution, RewardItem, Skeleton};

pub fn three_item_box() -> RewardDistribution {
    RewardDistribution::new(
        "Three Item Box",
        2.00,
        vec![
            RewardItem::new("Pebble", 0.20, RarityTier::Common, 0.50),
            RewardItem::new("Token", 2.00, RarityTier::Rare, 0.40),
            RewardItem::new("Crown", 25.00, RarityTier::Legendary, 0.10),
        ],
    )
}

pub fn five_tier_box() -> RewardDistribution {
    RewardDistribution::new(
        "Five Tier Box",
        2.00,
        vec![
            RewardItem::new("Copper Pouch", 0.25, RarityTier::Common, 0.50),
            RewardItem::new("Silver Badge", 0.75, RarityTier::Uncommon, 0.25),
            RewardItem::new("Gold Gem", 2.50, RarityTier::Rare, 0.15),
            RewardItem::new("Diamond Ring", 8.00, RarityTier::Epic, 0.08),
            RewardItem::new("Dragon Blade", 25.00, RarityTier::Legendary, 0.02),
        ],
    )
}

/// Two Common items worth 0.20 and two Legendary items worth 25.00.
pub fn two_tier_skeleton() -> Skeleton {
    Skeleton::from_triples(
        "Two Tier Box",
        2.50,
        [
            ("Scrap A", 0.20, RarityTier::Common),
            ("Scrap B", 0.20, RarityTier::Common),
            ("Relic A", 25.00, RarityTier::Legendary),
            ("Relic B", 25.00, RarityTier::Legendary),
        ],
    )
}

pub fn two_tier_config() -> EngineConfig {
    EngineConfig::with_bands(&[
        (RarityTier::Common, Band::new(0.40, 0.60)),
        (RarityTier::Legendary, Band::new(0.01, 0.05)),
    ])
}

/// Items of [`five_tier_box`] priced at 1.00. Under the default bands the
/// attainable house edge spans roughly [-0.31, 0.62].
pub fn five_tier_skeleton() -> Skeleton {
    Skeleton::from_triples(
        "Five Tier Box",
        1.00,
        [
            ("Copper Pouch", 0.25, RarityTier::Common),
            ("Silver Badge", 0.75, RarityTier::Uncommon),
            ("Gold Gem", 2.50, RarityTier::Rare),
            ("Diamond Ring", 8.00, RarityTier::Epic),
            ("Dragon Blade", 25.00, RarityTier::Legendary),
        ],
    )
}
