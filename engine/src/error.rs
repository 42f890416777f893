//! Typed failures for every engine component.
//!
//! Each variant carries the offending field (item name, tier, bound) so a
//! caller can build an actionable message without re-deriving the cause.

use crate::model::RarityTier;
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LootboxError>;

#[derive(Debug, Error)]
pub enum LootboxError {
    #[error("invalid distribution: {0}")]
    InvalidDistribution(Violation),

    #[error("infeasible constraints: {0}")]
    Infeasible(Infeasibility),

    #[error("optimization did not converge after {iterations} iterations (residual {residual:e})")]
    OptimizationDidNotConverge { iterations: usize, residual: f64 },

    #[error("trial count must be positive, got {0}")]
    InvalidTrialCount(i64),

    #[error("target house edge must lie in (0, 1), got {0}")]
    InvalidTarget(f64),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A broken distribution invariant.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum Violation {
    #[error("distribution has no items")]
    NoItems,

    #[error("item #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("item name '{name}' appears more than once")]
    DuplicateName { name: String },

    #[error("item '{item}' has invalid value {value}")]
    InvalidValue { item: String, value: f64 },

    #[error("item '{item}' has probability {probability} outside [0, 1]")]
    ProbabilityOutOfRange { item: String, probability: f64 },

    #[error("probabilities sum to {sum}, expected 1 within {tolerance:e}")]
    ProbabilitySum { sum: f64, tolerance: f64 },

    #[error("cost must be positive, got {cost}")]
    NonPositiveCost { cost: f64 },

    #[error("cost {cost} outside admissible range [{min}, {max}]")]
    CostOutOfRange { cost: f64, min: f64, max: f64 },

    #[error(
        "'{common_item}' ({common_probability}) is more common than '{rare_item}' \
         ({rare_probability}) but less likely"
    )]
    RarityOrder {
        common_item: String,
        common_probability: f64,
        rare_item: String,
        rare_probability: f64,
    },

    #[error("item '{item}' has probability {probability} outside its band [{low}, {high}]")]
    OutsideBand { item: String, probability: f64, low: f64, high: f64 },

    #[error("probability vector has {actual} entries for {expected} items")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Why a constraint region is empty.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum Infeasibility {
    #[error("{tier} band is inverted: low {low} > high {high}")]
    InvertedBand { tier: RarityTier, low: f64, high: f64 },

    #[error("tier lower bounds sum to {sum} > 1")]
    LowerBoundsExceedOne { sum: f64 },

    #[error("tier upper bounds sum to {sum} < 1")]
    UpperBoundsBelowOne { sum: f64 },

    #[error("{common} items cannot be at least as likely as {rare} items within their bands")]
    OrderingConflict { common: RarityTier, rare: RarityTier },
}

impl From<Violation> for LootboxError {
    fn from(v: Violation) -> Self {
        LootboxError::InvalidDistribution(v)
    }
}

impl From<Infeasibility> for LootboxError {
    fn from(i: Infeasibility) -> Self {
        LootboxError::Infeasible(i)
    }
}
