//! Euclidean projections onto the pieces of the constraint region
//!
//! The feasible region is an intersection of simple convex sets, each with a
//! cheap exact projection:
//!   - `BoxSum`: per-item bands together with Σp = 1 (shift-and-clamp)
//!   - `Hyperplane`: a fixed expected value v·p = E
//!   - `Boundary`: every item of a more common tier ≥ every item of the next
//!     rarer tier (pool around a threshold)
//!
//! [`dykstra`] combines them into the projection onto the intersection.
//! Each piece returns a fresh vector; inputs are never mutated.

use crate::config::Band;

/// Bisection rounds for the 1-D root finds below (bracket shrinks by 2^-64).
const BISECTION_ROUNDS: usize = 64;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ConvexSet<'a> {
    BoxSum(&'a [Band]),
    Hyperplane { normal: &'a [f64], offset: f64 },
    Boundary { common: &'a [usize], rare: &'a [usize] },
}

impl ConvexSet<'_> {
    pub(crate) fn project(&self, y: &[f64]) -> Vec<f64> {
        match *self {
            ConvexSet::BoxSum(bands) => project_box_sum(y, bands),
            ConvexSet::Hyperplane { normal, offset } => project_hyperplane(y, normal, offset),
            ConvexSet::Boundary { common, rare } => project_boundary(y, common, rare),
        }
    }
}

/// Nearest point with lo_i ≤ p_i ≤ hi_i and Σp = 1.
///
/// The answer is p_i = clamp(y_i − τ) for the shift τ that makes the clamped
/// sum equal 1. Requires Σlo ≤ 1 ≤ Σhi; otherwise returns the closest end.
pub(crate) fn project_box_sum(y: &[f64], bands: &[Band]) -> Vec<f64> {
    let clamped_sum = |tau: f64| -> f64 {
        y.iter()
            .zip(bands)
            .map(|(&yi, b)| (yi - tau).clamp(b.low, b.high))
            .sum()
    };
    // At tau_lo every entry sits at its upper bound, at tau_hi at its lower one
    let mut tau_lo = y
        .iter()
        .zip(bands)
        .map(|(&yi, b)| yi - b.high)
        .fold(f64::INFINITY, f64::min);
    let mut tau_hi = y
        .iter()
        .zip(bands)
        .map(|(&yi, b)| yi - b.low)
        .fold(f64::NEG_INFINITY, f64::max);
    for _ in 0..BISECTION_ROUNDS {
        let mid = 0.5 * (tau_lo + tau_hi);
        if clamped_sum(mid) > 1.0 {
            tau_lo = mid;
        } else {
            tau_hi = mid;
        }
    }
    let tau = 0.5 * (tau_lo + tau_hi);
    y.iter()
        .zip(bands)
        .map(|(&yi, b)| (yi - tau).clamp(b.low, b.high))
        .collect()
}

/// Nearest point with normal · p = offset. A zero normal leaves `y` unchanged.
pub(crate) fn project_hyperplane(y: &[f64], normal: &[f64], offset: f64) -> Vec<f64> {
    let norm_sq: f64 = normal.iter().map(|v| v * v).sum();
    if norm_sq <= f64::EPSILON {
        return y.to_vec();
    }
    let dot: f64 = y.iter().zip(normal).map(|(a, b)| a * b).sum();
    let step = (dot - offset) / norm_sq;
    y.iter().zip(normal).map(|(&yi, &vi)| yi - step * vi).collect()
}

/// Nearest point where min over `common` ≥ max over `rare`.
///
/// Violating entries pool at a threshold θ: common entries below θ rise to it
/// and rare entries above θ drop to it, with θ balancing the two moves.
pub(crate) fn project_boundary(y: &[f64], common: &[usize], rare: &[usize]) -> Vec<f64> {
    let min_common = common.iter().map(|&i| y[i]).fold(f64::INFINITY, f64::min);
    let max_rare = rare.iter().map(|&j| y[j]).fold(f64::NEG_INFINITY, f64::max);
    if min_common >= max_rare {
        return y.to_vec();
    }
    let balance = |theta: f64| -> f64 {
        let raise: f64 = common.iter().map(|&i| (theta - y[i]).max(0.0)).sum();
        let lower: f64 = rare.iter().map(|&j| (y[j] - theta).max(0.0)).sum();
        raise - lower
    };
    let (mut lo, mut hi) = (min_common, max_rare);
    for _ in 0..BISECTION_ROUNDS {
        let mid = 0.5 * (lo + hi);
        if balance(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let theta = 0.5 * (lo + hi);
    let mut out = y.to_vec();
    for &i in common {
        out[i] = out[i].max(theta);
    }
    for &j in rare {
        out[j] = out[j].min(theta);
    }
    out
}

/// Dykstra's alternating projection onto the intersection of `sets`.
///
/// Returns the projection and whether the sweep-to-sweep change fell below
/// `tolerance` before `max_sweeps`. The last set in the list is satisfied
/// exactly by the returned point.
pub(crate) fn dykstra(y: &[f64], sets: &[ConvexSet<'_>], max_sweeps: usize, tolerance: f64) -> (Vec<f64>, bool) {
    let n = y.len();
    let mut x = y.to_vec();
    let mut increments = vec![vec![0.0_f64; n]; sets.len()];
    for _ in 0..max_sweeps.max(1) {
        let mut change = 0.0_f64;
        for (set, inc) in sets.iter().zip(increments.iter_mut()) {
            let z: Vec<f64> = x.iter().zip(inc.iter()).map(|(a, b)| a + b).collect();
            let projected = set.project(&z);
            for k in 0..n {
                inc[k] = z[k] - projected[k];
                change = change.max((projected[k] - x[k]).abs());
            }
            x = projected;
        }
        // A quiet sweep means no set moved the point
        if change < tolerance {
            return (x, true);
        }
    }
    (x, false)
}
