//! Quantiles and random variates of the M-spline survival distribution.
//!
//! `S(t) = 1 - p` has no closed form, so each entry is solved by bisection
//! on the log survival, which is monotone in `t`. The upper bracket starts at
//! the upper boundary knot and doubles until it encloses the root.

use crate::distribution::{DistributionError, SurvMSpline, check_survival};
use crate::recycle::{Entry, Recycled};
use ndarray::{Array1, ArrayView1};
use rand::Rng;
use rand::distributions::Open01;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Maximum number of times the upper bracket is doubled.
pub const MAX_BRACKET_DOUBLINGS: usize = 64;

/// Maximum number of bisection steps once the root is bracketed.
pub const MAX_BISECTIONS: usize = 200;

/// Bisection stops once the bracket is this narrow relative to its upper end.
pub const BISECTION_TOLERANCE: f64 = 1e-12;

/// Solves `S(t) = 1 - p` for one entry. `None` means the root finder gave up.
fn solve_entry(dist: &SurvMSpline, entry: &Entry<'_>) -> Option<f64> {
    let p = entry.value;
    if !(0.0..=1.0).contains(&p) {
        return Some(f64::NAN);
    }
    if p == 0.0 {
        return Some(0.0);
    }
    if p == 1.0 || 1.0 - p <= entry.pcure {
        return Some(f64::INFINITY);
    }

    let target = (-p).ln_1p();
    let excess = |t: f64| dist.model_log_scale(entry, t).log_survival - target;

    let mut lo = 0.0_f64;
    let mut hi = dist.spline().knots().upper();
    let mut doublings = 0;
    loop {
        let value = excess(hi);
        if value.is_nan() {
            return None;
        }
        if value <= 0.0 {
            break;
        }
        lo = hi;
        hi *= 2.0;
        doublings += 1;
        if doublings > MAX_BRACKET_DOUBLINGS {
            return None;
        }
    }

    for _ in 0..MAX_BISECTIONS {
        let mid = 0.5 * (lo + hi);
        if hi - lo <= BISECTION_TOLERANCE * hi || mid == lo || mid == hi {
            return Some(mid);
        }
        let value = excess(mid);
        if value.is_nan() {
            return None;
        }
        if value > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    None
}

/// Times `t` with `P(T <= t) = p`, vectorised over `probs` and the
/// distribution parameters. Probabilities outside `[0, 1]` give NaN; entries
/// where the root finder fails give NaN and one warning for the whole call.
pub fn quantile(
    dist: &SurvMSpline,
    probs: ArrayView1<'_, f64>,
) -> Result<Array1<f64>, DistributionError> {
    let (out, failed) = quantile_counting(dist, probs)?;
    if failed > 0 {
        log::warn!(
            "Quantile search did not converge for {} of {} entries; returning NaN for them.",
            failed,
            out.len()
        );
    }
    Ok(out)
}

/// As [`quantile`], but reports the number of failed entries instead of
/// logging them, so that callers looping over draws can warn once.
pub(crate) fn quantile_counting(
    dist: &SurvMSpline,
    probs: ArrayView1<'_, f64>,
) -> Result<(Array1<f64>, usize), DistributionError> {
    if dist.background().is_some() {
        return Err(DistributionError::BackgroundNotSupported("quantile"));
    }
    let recycled = Recycled::new(probs.reborrow(), dist);
    if let Some(first) = recycled.first_valid().and_then(|i| recycled.entry(i)) {
        let upper = dist.spline().knots().upper();
        check_survival(dist.model_log_scale(&first, upper).log_survival)?;
    }

    let failures = AtomicUsize::new(0);
    let out = recycled.par_fill(|entry| match solve_entry(dist, entry) {
        Some(t) => t,
        None => {
            failures.fetch_add(1, Ordering::Relaxed);
            f64::NAN
        }
    });
    Ok((out, failures.into_inner()))
}

/// Draws `n` event times by inverting the CDF at open-interval uniforms.
pub fn random_variates<R: Rng>(
    dist: &SurvMSpline,
    n: usize,
    rng: &mut R,
) -> Result<Array1<f64>, DistributionError> {
    let uniforms: Array1<f64> = (0..n).map(|_| rng.sample(Open01)).collect();
    log::debug!("Drawing {} survival times by inversion.", n);
    quantile(dist, uniforms.view())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{KnotSet, MSplineBasis, constant_hazard_coefs};
    use approx::assert_relative_eq;
    use ndarray::{Array2, Axis, array};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn spline() -> MSplineBasis {
        MSplineBasis::new(KnotSet::new(vec![0.0, 1.0, 2.0, 5.0]).unwrap(), 3)
    }

    fn exponential(rate: f64) -> SurvMSpline {
        let coefs = constant_hazard_coefs(&spline()).insert_axis(Axis(0));
        SurvMSpline::new(spline(), array![(5.0 * rate).ln()], coefs).unwrap()
    }

    #[test]
    fn exponential_quantiles_have_a_closed_form() {
        let dist = exponential(0.4);
        let probs = array![0.1, 0.5, 0.9, 0.999];
        let q = quantile(&dist, probs.view()).unwrap();
        for (i, &p) in probs.iter().enumerate() {
            assert_relative_eq!(q[i], -(1.0_f64 - p).ln() / 0.4, max_relative = 1e-9);
        }
    }

    #[test]
    fn quantile_inverts_the_cdf() {
        let coefs = array![[0.05, 0.4, 0.1, 0.15, 0.2, 0.1]];
        let dist = SurvMSpline::new(spline(), array![0.3], coefs).unwrap();
        let times = array![0.2, 0.8, 1.5, 3.7, 4.9];
        let cdf = dist.cdf(times.view()).unwrap();
        let back = quantile(&dist, cdf.view()).unwrap();
        for i in 0..times.len() {
            assert_relative_eq!(back[i], times[i], max_relative = 1e-8);
        }
    }

    #[test]
    fn boundary_probabilities() {
        let dist = exponential(1.0).with_cure(array![0.2]).unwrap();
        let q = quantile(&dist, array![0.0, 1.0, 0.85, -0.1, 1.5, f64::NAN].view()).unwrap();
        assert_eq!(q[0], 0.0);
        assert_eq!(q[1], f64::INFINITY);
        assert_eq!(q[2], f64::INFINITY);
        assert!(q[3].is_nan());
        assert!(q[4].is_nan());
        assert!(q[5].is_nan());
    }

    #[test]
    fn background_is_rejected() {
        let dist = exponential(1.0)
            .with_background(array![0.1], array![0.1])
            .unwrap();
        assert_eq!(
            quantile(&dist, array![0.5].view()).unwrap_err(),
            DistributionError::BackgroundNotSupported("quantile")
        );
    }

    #[test]
    fn random_variates_are_reproducible_and_match_the_mean() {
        let dist = exponential(0.5);
        let mut rng = StdRng::seed_from_u64(17);
        let draws = random_variates(&dist, 4000, &mut rng).unwrap();
        assert_eq!(draws.len(), 4000);
        assert!(draws.iter().all(|t| t.is_finite() && *t > 0.0));
        let mean = draws.mean().unwrap();
        assert!((mean - 2.0).abs() < 0.15, "sample mean {mean}");

        let mut again = StdRng::seed_from_u64(17);
        let repeat = random_variates(&dist, 4000, &mut again).unwrap();
        assert_eq!(draws, repeat);

        let rows = Array2::from_elem((2, 6), 1.0 / 6.0);
        let multi = SurvMSpline::new(spline(), array![0.0], rows).unwrap();
        assert_eq!(random_variates(&multi, 3, &mut rng).unwrap().len(), 3);
    }
}
