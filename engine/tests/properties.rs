//! Property-based tests over randomized distributions and skeletons.

use proptest::prelude::*;

use lootbox_engine::optimizer::{Constraints, SolveStatus};
use lootbox_engine::{
    EngineConfig, Optimizer, RarityTier, RewardDistribution, RewardItem, Skeleton, StatisticsEngine,
    Strategy as SolveStrategy,
};

/// Strategy: (value, tier, raw weight) per item, 2-8 items.
fn items_strategy() -> impl Strategy<Value = Vec<(f64, usize, f64)>> {
    prop::collection::vec((0.0..50.0f64, 0..6usize, 0.01..1.0f64), 2..=8)
}

fn distribution(cost: f64, items: &[(f64, usize, f64)]) -> RewardDistribution {
    let total: f64 = items.iter().map(|&(_, _, w)| w).sum();
    RewardDistribution::new(
        "random",
        cost,
        items
            .iter()
            .enumerate()
            .map(|(i, &(value, tier, w))| RewardItem::new(format!("item{i}"), value, RarityTier::ALL[tier], w / total))
            .collect(),
    )
}

fn skeleton(cost: f64, items: &[(f64, usize, f64)]) -> Skeleton {
    Skeleton::from_triples(
        "random",
        cost,
        items
            .iter()
            .enumerate()
            .map(|(i, &(value, tier, _))| (format!("item{i}"), value, RarityTier::ALL[tier])),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // 1. Normalized weights always pass the sum-to-one check and the house
    //    edge equals (cost − Σ v·p) / cost
    #[test]
    fn house_edge_identity(cost in 1.0..100.0f64, items in items_strategy()) {
        let config = EngineConfig::default();
        let dist = distribution(cost, &items);
        prop_assert!((dist.probability_sum() - 1.0).abs() < 1e-6);
        let stats = StatisticsEngine::new(&config);
        let ev: f64 = dist.items.iter().map(|i| i.value * i.probability).sum();
        let edge = stats.house_edge(&dist).unwrap();
        prop_assert!((edge - (cost - ev) / cost).abs() < 1e-9, "edge={edge} ev={ev}");
    }

    // 2. Feasible optimizer output is ordered by rarity, sums to one and
    //    respects the bands
    #[test]
    fn feasible_results_are_ordered(
        cost in 1.0..20.0f64,
        items in items_strategy(),
        target in 0.05..0.6f64,
    ) {
        let config = EngineConfig::default();
        let skeleton = skeleton(cost, &items);
        let result = Optimizer::new(&config)
            .optimize(&skeleton, target, SolveStrategy::Direct)
            .unwrap();
        if !matches!(result.status, SolveStatus::Infeasible(_)) {
            let constraints = Constraints::new(&skeleton, &config.tier_bands);
            prop_assert!(constraints.check(&result.probabilities, &config).is_ok());
        }
        if result.feasible {
            let dist = skeleton.into_distribution(&result.probabilities).unwrap();
            prop_assert!(dist.validate(&config).is_ok());
            prop_assert!((result.achieved_house_edge - target).abs() <= config.target_tolerance);
        }
    }

    // 3. Same guarantees from a small seeded evolutionary run
    #[test]
    fn evolutionary_results_are_ordered(
        cost in 1.0..20.0f64,
        items in items_strategy(),
        target in 0.05..0.6f64,
        seed in any::<u64>(),
    ) {
        let mut config = EngineConfig::default().seeded(seed);
        config.evolutionary.population_size = 20;
        config.evolutionary.generations = 15;
        let skeleton = skeleton(cost, &items);
        let result = Optimizer::new(&config)
            .optimize(&skeleton, target, SolveStrategy::Evolutionary)
            .unwrap();
        let infeasible = matches!(result.status, SolveStatus::Infeasible(_));
        prop_assert_eq!(result.trace.len(), if infeasible { 0 } else { 15 });
        if !infeasible {
            prop_assert!(!matches!(result.status, SolveStatus::Rejected(_)), "status {:?}", result.status);
            let constraints = Constraints::new(&skeleton, &config.tier_bands);
            prop_assert!(constraints.check(&result.probabilities, &config).is_ok());
        }
        if result.feasible {
            let dist = skeleton.into_distribution(&result.probabilities).unwrap();
            prop_assert!(dist.validate(&config).is_ok());
        }
    }

    // 4. Re-optimizing the direct solver's own output returns the same vector
    #[test]
    fn direct_rerun_is_idempotent(
        cost in 1.0..20.0f64,
        items in items_strategy(),
        target in 0.05..0.6f64,
    ) {
        let config = EngineConfig::default();
        let optimizer = Optimizer::new(&config);
        let first = optimizer
            .optimize(&skeleton(cost, &items), target, SolveStrategy::Direct)
            .unwrap();
        prop_assume!(first.status == SolveStatus::Converged);
        let again = skeleton(cost, &items).with_seed_probabilities(first.probabilities.clone());
        let second = optimizer.optimize(&again, target, SolveStrategy::Direct).unwrap();
        prop_assume!(second.status == SolveStatus::Converged);
        for (a, b) in first.probabilities.iter().zip(&second.probabilities) {
            prop_assert!((a - b).abs() < 1e-5, "a={a} b={b}");
        }
    }
}
