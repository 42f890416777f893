//! lootbox Engine - reward box probability toolkit
//!
//! This crate contains the reward box data model, closed-form statistics,
//! the distribution optimizer (direct and evolutionary strategies, exact-edge
//! or rarity-balanced objectives) and the Monte Carlo simulation engine used
//! to confirm its output.
//!
//! The engine is platform-agnostic and performs no I/O. Configuration is a
//! single [`EngineConfig`] passed explicitly to each component.

pub mod config;
pub mod error;
pub mod fixtures;
pub mod model;
pub mod optimizer;
pub mod simulation;
pub mod stats;

pub use config::{Band, EngineConfig, TierBands};
pub use error::{Infeasibility, LootboxError, Result, Violation};
pub use model::{RarityTier, RewardDistribution, RewardItem, Skeleton, SkeletonItem};
pub use optimizer::{BalanceTargets, OptimizationResult, Optimizer, SolveStatus, Strategy};
pub use simulation::{SimulationEngine, SimulationReport, StreakReport};
pub use stats::{DistributionAnalytics, StatisticsEngine};
