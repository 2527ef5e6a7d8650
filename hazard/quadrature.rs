//! Adaptive Gauss-Legendre quadrature.
//!
//! A fixed-order Gauss-Legendre rule is applied to an interval and to its two
//! halves; the difference between the two estimates is the local error
//! estimate. Intervals that fail the tolerance are bisected until the
//! subdivision budget runs out. Semi-infinite ranges `[a, ∞)` are mapped onto
//! `[0, 1)` by `x = a + s / (1 - s)`.

use thiserror::Error;

/// Nodes per panel. Exact for polynomials up to degree 19.
pub const DEFAULT_ORDER: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum QuadratureError {
    #[error("Subdivision budget of {limit} intervals exhausted with error estimate {error_estimate:e}.")]
    SubdivisionLimit { limit: usize, error_estimate: f64 },

    #[error("The integrand returned a non-finite value ({0}).")]
    NonFinite(f64),
}

/// Tolerances and budget for [`GaussLegendre::integrate_adaptive`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveOptions {
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
    pub max_subdivisions: usize,
}

impl Default for AdaptiveOptions {
    fn default() -> Self {
        Self {
            abs_tolerance: 1e-10,
            rel_tolerance: 1e-10,
            max_subdivisions: 2000,
        }
    }
}

/// A Gauss-Legendre rule on `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct GaussLegendre {
    nodes: Vec<f64>,
    weights: Vec<f64>,
}

impl Default for GaussLegendre {
    fn default() -> Self {
        Self::new(DEFAULT_ORDER)
    }
}

/// `(P_n(x), P_{n-1}(x))` through the three-term recurrence.
fn legendre_pair(n: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0_f64;
    let mut p1 = x;
    for j in 2..=n {
        let jf = j as f64;
        let p2 = ((2.0 * jf - 1.0) * x * p1 - (jf - 1.0) * p0) / jf;
        p0 = p1;
        p1 = p2;
    }
    (p1, p0)
}

impl GaussLegendre {
    /// Builds an `n`-point rule. Roots of `P_n` are found by Newton iteration
    /// from the Chebyshev guess; only the non-negative half is computed and
    /// mirrored.
    pub fn new(n: usize) -> Self {
        let n = n.max(1);
        if n == 1 {
            return Self {
                nodes: vec![0.0],
                weights: vec![2.0],
            };
        }
        let nf = n as f64;
        let mut nodes = vec![0.0; n];
        let mut weights = vec![0.0; n];
        for i in 0..n.div_ceil(2) {
            let mut x = (std::f64::consts::PI * (i as f64 + 0.75) / (nf + 0.5)).cos();
            for _ in 0..100 {
                let (pn, pn1) = legendre_pair(n, x);
                let dp = nf * (x * pn - pn1) / (x * x - 1.0);
                let dx = pn / dp;
                x -= dx;
                if dx.abs() < 1e-15 {
                    break;
                }
            }
            let (pn, pn1) = legendre_pair(n, x);
            let dp = nf * (x * pn - pn1) / (x * x - 1.0);
            let w = 2.0 / ((1.0 - x * x) * dp * dp);
            nodes[i] = -x;
            nodes[n - 1 - i] = x;
            weights[i] = w;
            weights[n - 1 - i] = w;
        }
        Self { nodes, weights }
    }

    pub fn order(&self) -> usize {
        self.nodes.len()
    }

    /// One application of the rule on `[a, b]`.
    pub fn integrate<F>(&self, f: &F, a: f64, b: f64) -> f64
    where
        F: Fn(f64) -> f64,
    {
        let half = 0.5 * (b - a);
        let mid = 0.5 * (a + b);
        self.nodes
            .iter()
            .zip(&self.weights)
            .map(|(&x, &w)| w * f(mid + half * x))
            .sum::<f64>()
            * half
    }

    /// Integrates `f` over the finite interval `[a, b]`.
    pub fn integrate_adaptive<F>(
        &self,
        f: F,
        a: f64,
        b: f64,
        options: &AdaptiveOptions,
    ) -> Result<f64, QuadratureError>
    where
        F: Fn(f64) -> f64,
    {
        if a == b {
            return Ok(0.0);
        }
        let whole = self.integrate(&f, a, b);
        let total_width = (b - a).abs();
        let mut pending = vec![(a, b, whole)];
        let mut total = 0.0;
        let mut subdivisions = 0usize;
        while let Some((lo, hi, estimate)) = pending.pop() {
            let mid = 0.5 * (lo + hi);
            let left = self.integrate(&f, lo, mid);
            let right = self.integrate(&f, mid, hi);
            let refined = left + right;
            if !refined.is_finite() {
                return Err(QuadratureError::NonFinite(refined));
            }
            let error = (refined - estimate).abs();
            let share = (hi - lo).abs() / total_width;
            let allowed = (options.abs_tolerance * share).max(options.rel_tolerance * refined.abs());
            if error <= allowed || mid == lo || mid == hi {
                total += refined;
                continue;
            }
            subdivisions += 1;
            if subdivisions > options.max_subdivisions {
                return Err(QuadratureError::SubdivisionLimit {
                    limit: options.max_subdivisions,
                    error_estimate: error,
                });
            }
            pending.push((lo, mid, left));
            pending.push((mid, hi, right));
        }
        Ok(total)
    }

    /// Integrates `f` over `[a, ∞)` through `x = a + s / (1 - s)`.
    pub fn integrate_to_infinity<F>(
        &self,
        f: F,
        a: f64,
        options: &AdaptiveOptions,
    ) -> Result<f64, QuadratureError>
    where
        F: Fn(f64) -> f64,
    {
        let mapped = |s: f64| {
            let one_minus = 1.0 - s;
            let value = f(a + s / one_minus);
            if value == 0.0 {
                0.0
            } else {
                value / (one_minus * one_minus)
            }
        };
        self.integrate_adaptive(mapped, 0.0, 1.0, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rule_weights_sum_to_two_and_nodes_are_symmetric() {
        for n in [1, 2, 5, 10, 16] {
            let rule = GaussLegendre::new(n);
            assert_eq!(rule.order(), n);
            assert_relative_eq!(rule.weights.iter().sum::<f64>(), 2.0, epsilon = 1e-13);
            for i in 0..n {
                assert_relative_eq!(rule.nodes[i], -rule.nodes[n - 1 - i], epsilon = 1e-15);
            }
        }
    }

    #[test]
    fn rule_is_exact_for_high_degree_polynomials() {
        let rule = GaussLegendre::new(10);
        let value = rule.integrate(&|x: f64| x.powi(18) + 3.0 * x.powi(7), 0.0, 2.0);
        assert_relative_eq!(value, 2.0_f64.powi(19) / 19.0 + 3.0 * 2.0_f64.powi(8) / 8.0, max_relative = 1e-12);
    }

    #[test]
    fn adaptive_handles_a_kink() {
        let rule = GaussLegendre::default();
        let opts = AdaptiveOptions::default();
        let value = rule
            .integrate_adaptive(|x: f64| (x - 0.3).abs(), 0.0, 1.0, &opts)
            .unwrap();
        assert_relative_eq!(value, 0.5 * (0.09 + 0.49), epsilon = 1e-9);
    }

    #[test]
    fn semi_infinite_exponential() {
        let rule = GaussLegendre::default();
        let opts = AdaptiveOptions::default();
        let value = rule
            .integrate_to_infinity(|x: f64| (-0.5 * x).exp(), 1.0, &opts)
            .unwrap();
        assert_relative_eq!(value, 2.0 * (-0.5_f64).exp(), max_relative = 1e-8);
    }

    #[test]
    fn budget_exhaustion_is_an_error() {
        let rule = GaussLegendre::new(2);
        let opts = AdaptiveOptions {
            abs_tolerance: 0.0,
            rel_tolerance: 0.0,
            max_subdivisions: 3,
        };
        let result = rule.integrate_adaptive(|x: f64| (10.0 * x).sin(), 0.0, 3.0, &opts);
        assert!(matches!(result, Err(QuadratureError::SubdivisionLimit { limit: 3, .. })));
    }
}
