//! Generator cost models.

use serde::{Deserialize, Serialize};

/// Generator cost function.
///
/// Polynomial coefficients are stored in ascending order; the data
/// dictionary stores them highest order first and [`crate::Gen::cost_model`]
/// does the reversal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum CostModel {
    /// No cost function specified
    #[default]
    NoCost,
    /// Polynomial cost: `cost = sum(coeffs[i] * P^i)` where `coeffs[0]` is constant term.
    /// For quadratic: `coeffs = [c0, c1, c2]` means `cost = c0 + c1*P + c2*P^2`.
    Polynomial(Vec<f64>),
    /// Piecewise linear cost: `(p, cost)` breakpoints with increasing `p`.
    PiecewiseLinear(Vec<(f64, f64)>),
}

impl CostModel {
    /// Create quadratic cost: c0 + c1*P + c2*P^2
    pub fn quadratic(c0: f64, c1: f64, c2: f64) -> Self {
        CostModel::Polynomial(vec![c0, c1, c2])
    }

    /// Create linear cost: c0 + c1*P
    pub fn linear(c0: f64, c1: f64) -> Self {
        CostModel::Polynomial(vec![c0, c1])
    }

    /// Highest power with a nonzero coefficient (0 for constant or no cost).
    pub fn degree(&self) -> usize {
        match self {
            CostModel::Polynomial(coeffs) => coeffs
                .iter()
                .rposition(|c| *c != 0.0)
                .unwrap_or(0),
            CostModel::NoCost => 0,
            CostModel::PiecewiseLinear(_) => 1,
        }
    }

    /// Evaluate cost at power output `p`.
    pub fn evaluate(&self, p: f64) -> f64 {
        match self {
            CostModel::NoCost => 0.0,
            CostModel::Polynomial(coeffs) => coeffs
                .iter()
                .enumerate()
                .map(|(i, c)| c * p.powi(i as i32))
                .sum(),
            CostModel::PiecewiseLinear(points) => match (points.first(), points.last()) {
                (Some(first), Some(last)) => {
                    if p <= first.0 {
                        return first.1;
                    }
                    if p >= last.0 {
                        return last.1;
                    }
                    segments(points)
                        .find(|w| p >= w[0].0 && p <= w[1].0)
                        .map(|w| w[0].1 + (p - w[0].0) / (w[1].0 - w[0].0) * (w[1].1 - w[0].1))
                        .unwrap_or(0.0)
                }
                _ => 0.0,
            },
        }
    }

    /// Derivative of the cost function at `p`.
    pub fn marginal_cost(&self, p: f64) -> f64 {
        match self {
            CostModel::NoCost => 0.0,
            CostModel::Polynomial(coeffs) => coeffs
                .iter()
                .enumerate()
                .skip(1)
                .map(|(i, c)| (i as f64) * c * p.powi(i as i32 - 1))
                .sum(),
            CostModel::PiecewiseLinear(points) => {
                // Left segment wins at an interior breakpoint; outside the
                // breakpoint range the nearest end segment applies.
                let mut last = None;
                for w in segments(points) {
                    let slope = (w[1].1 - w[0].1) / (w[1].0 - w[0].0);
                    if p <= w[1].0 {
                        return slope;
                    }
                    last = Some(slope);
                }
                last.unwrap_or(0.0)
            }
        }
    }

    /// `(slope, intercept)` of every piecewise segment, in breakpoint order.
    ///
    /// Used by the epigraph formulation `cost >= slope * p + intercept`.
    pub fn slope_intercepts(&self) -> Vec<(f64, f64)> {
        match self {
            CostModel::PiecewiseLinear(points) => segments(points)
                .map(|w| {
                    let slope = (w[1].1 - w[0].1) / (w[1].0 - w[0].0);
                    (slope, w[0].1 - slope * w[0].0)
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Check if this cost model has actual cost data
    pub fn has_cost(&self) -> bool {
        !matches!(self, CostModel::NoCost)
    }
}

/// Consecutive breakpoint pairs of nonzero width.
fn segments(points: &[(f64, f64)]) -> impl Iterator<Item = &[(f64, f64)]> {
    points.windows(2).filter(|w| w[1].0 > w[0].0)
}
