//! Restricted mean survival time and mean survival.
//!
//! `rmst(t) = ∫_start^t S(x) / S(start) dx`, integrated numerically. The
//! mean is the restricted mean with an infinite horizon, which is itself
//! infinite whenever part of the population is cured.

use crate::distribution::{DistributionError, SurvMSpline, check_survival};
use crate::quadrature::{AdaptiveOptions, GaussLegendre, QuadratureError};
use crate::recycle::{Entry, Recycled};
use ndarray::{Array1, ArrayView1};
use std::sync::atomic::{AtomicUsize, Ordering};

fn rmst_entry(
    dist: &SurvMSpline,
    entry: &Entry<'_>,
    start: f64,
    rule: &GaussLegendre,
    options: &AdaptiveOptions,
) -> Result<f64, QuadratureError> {
    let horizon = entry.value;
    if horizon <= start {
        return Ok(0.0);
    }
    if horizon == f64::INFINITY && entry.pcure > 0.0 {
        return Ok(f64::INFINITY);
    }
    let log_start = dist.model_log_scale(entry, start).log_survival;
    let conditional = |x: f64| (dist.model_log_scale(entry, x).log_survival - log_start).exp();
    if horizon.is_finite() {
        // Integrate piecewise between knots so that no panel straddles a join.
        let mut breaks: Vec<f64> = dist
            .spline()
            .knots()
            .as_slice()
            .iter()
            .copied()
            .filter(|&k| k > start && k < horizon)
            .collect();
        breaks.insert(0, start);
        breaks.push(horizon);
        breaks
            .windows(2)
            .map(|w| rule.integrate_adaptive(conditional, w[0], w[1], options))
            .sum()
    } else {
        rule.integrate_to_infinity(conditional, start, options)
    }
}

fn integrate_entries(
    dist: &SurvMSpline,
    horizons: ArrayView1<'_, f64>,
    start: f64,
    what: &'static str,
) -> Result<(Array1<f64>, usize), DistributionError> {
    if !start.is_finite() || start < 0.0 {
        return Err(DistributionError::InvalidStart(start));
    }
    if dist.background().is_some() {
        return Err(DistributionError::BackgroundNotSupported(what));
    }
    let recycled = Recycled::new(horizons.reborrow(), dist);
    if let Some(first) = recycled.first_valid().and_then(|i| recycled.entry(i)) {
        check_survival(dist.model_log_scale(&first, start).log_survival)?;
    }

    let rule = GaussLegendre::default();
    let options = AdaptiveOptions::default();
    let failures = AtomicUsize::new(0);
    let out = recycled.par_fill(|entry| {
        match rmst_entry(dist, entry, start, &rule, &options) {
            Ok(value) => value,
            Err(err) => {
                log::debug!("Integration failed for horizon {}: {}", entry.value, err);
                failures.fetch_add(1, Ordering::Relaxed);
                f64::NAN
            }
        }
    });
    Ok((out, failures.into_inner()))
}

fn warn_failures(what: &str, (out, failed): (Array1<f64>, usize)) -> Array1<f64> {
    if failed > 0 {
        log::warn!(
            "Numerical integration for {} failed for {} of {} entries; returning NaN for them.",
            what,
            failed,
            out.len()
        );
    }
    out
}

/// Restricted mean survival time up to each horizon, conditional on survival
/// to `start`. Horizons at or before `start` give zero.
pub fn rmst(
    dist: &SurvMSpline,
    horizons: ArrayView1<'_, f64>,
    start: f64,
) -> Result<Array1<f64>, DistributionError> {
    integrate_entries(dist, horizons, start, "rmst").map(|r| warn_failures("rmst", r))
}

/// Mean survival time for every parameter entry.
pub fn mean_survival(dist: &SurvMSpline) -> Result<Array1<f64>, DistributionError> {
    mean_survival_counting(dist).map(|r| warn_failures("mean survival", r))
}

/// [`rmst`] without the warning; the second value counts failed entries.
pub(crate) fn rmst_counting(
    dist: &SurvMSpline,
    horizons: ArrayView1<'_, f64>,
    start: f64,
) -> Result<(Array1<f64>, usize), DistributionError> {
    integrate_entries(dist, horizons, start, "rmst")
}

pub(crate) fn mean_survival_counting(
    dist: &SurvMSpline,
) -> Result<(Array1<f64>, usize), DistributionError> {
    let horizon = Array1::from_elem(1, f64::INFINITY);
    integrate_entries(dist, horizon.view(), 0.0, "mean survival")
}
