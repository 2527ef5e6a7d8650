use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cubic M-splines unless the caller asks otherwise.
pub const DEFAULT_DEGREE: usize = 3;

/// Default number of basis terms used when knots are placed from event times.
pub const DEFAULT_DF: usize = 10;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error("A knot set needs at least 2 knots, but {0} were supplied.")]
    TooFewKnots(usize),

    #[error("Boundary knots must be exactly 2 values, but {0} were supplied.")]
    BoundaryKnotCount(usize),

    #[error("Knots must be finite and non-negative, but knot {index} was {value}.")]
    InvalidKnot { index: usize, value: f64 },

    #[error("Boundary knots must satisfy lower < upper, but were ({0}, {1}).")]
    InvalidBoundary(f64, f64),

    #[error("Internal knot {value} does not lie strictly inside the boundary knots ({lower}, {upper}).")]
    InternalKnotOutsideBoundary { value: f64, lower: f64, upper: f64 },

    #[error("Internal knots must be strictly increasing, found {previous} followed by {next}.")]
    UnsortedInternalKnots { previous: f64, next: f64 },

    #[error("Default knot placement requires at least one positive, finite event time.")]
    NoEventTimes,

    #[error("df ({df}) must be at least degree + 1 ({min}).")]
    InvalidDf { df: usize, min: usize },

    #[error("Quantile knot {0} repeats a neighbouring knot; use a smaller df or supply knots explicitly.")]
    DuplicateQuantileKnot(f64),
}

/// An ordered, validated set of knots: the first and last entries are the
/// boundary knots, anything in between is an internal knot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct KnotSet {
    knots: Vec<f64>,
}

impl KnotSet {
    /// Builds a knot set from the full ordered sequence
    /// `[lower, internal..., upper]`.
    pub fn new(knots: Vec<f64>) -> Result<Self, BasisError> {
        if knots.len() < 2 {
            return Err(BasisError::TooFewKnots(knots.len()));
        }
        for (index, &value) in knots.iter().enumerate() {
            if !value.is_finite() || value < 0.0 {
                return Err(BasisError::InvalidKnot { index, value });
            }
        }
        let lower = knots[0];
        let upper = knots[knots.len() - 1];
        if lower >= upper {
            return Err(BasisError::InvalidBoundary(lower, upper));
        }
        let internal = &knots[1..knots.len() - 1];
        for &value in internal {
            if value <= lower || value >= upper {
                return Err(BasisError::InternalKnotOutsideBoundary {
                    value,
                    lower,
                    upper,
                });
            }
        }
        for pair in internal.windows(2) {
            if pair[1] <= pair[0] {
                return Err(BasisError::UnsortedInternalKnots {
                    previous: pair[0],
                    next: pair[1],
                });
            }
        }
        Ok(Self { knots })
    }

    /// Builds a knot set from separately supplied internal and boundary knots.
    pub fn from_parts(internal: &[f64], boundary: &[f64]) -> Result<Self, BasisError> {
        if boundary.len() != 2 {
            return Err(BasisError::BoundaryKnotCount(boundary.len()));
        }
        let mut knots = Vec::with_capacity(internal.len() + 2);
        knots.push(boundary[0]);
        knots.extend_from_slice(internal);
        knots.push(boundary[1]);
        Self::new(knots)
    }

    pub fn lower(&self) -> f64 {
        self.knots[0]
    }

    pub fn upper(&self) -> f64 {
        self.knots[self.knots.len() - 1]
    }

    pub fn internal(&self) -> &[f64] {
        &self.knots[1..self.knots.len() - 1]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.knots
    }
}

impl TryFrom<Vec<f64>> for KnotSet {
    type Error = BasisError;

    fn try_from(knots: Vec<f64>) -> Result<Self, Self::Error> {
        KnotSet::new(knots)
    }
}

impl From<KnotSet> for Vec<f64> {
    fn from(set: KnotSet) -> Self {
        set.knots
    }
}

/// Which member of the basis family to evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BasisKind {
    /// Raw M-spline terms, used for the hazard.
    Hazard,
    /// Integrated M-spline (I-spline) terms, used for the cumulative hazard.
    CumulativeHazard,
}

/// An M-spline basis on a fixed knot set, together with the clamped knot
/// vectors needed to evaluate it and its integral.
#[derive(Debug, Clone, PartialEq)]
pub struct MSplineBasis {
    knots: KnotSet,
    degree: usize,
    /// Boundary knots repeated `degree + 1` times.
    clamped: Vec<f64>,
    /// Boundary knots repeated `degree + 2` times, for the order `degree + 2`
    /// B-splines whose suffix sums give the I-splines.
    clamped_integral: Vec<f64>,
}

impl MSplineBasis {
    pub fn new(knots: KnotSet, degree: usize) -> Self {
        let clamped = clamped_knot_vector(&knots, degree);
        let clamped_integral = clamped_knot_vector(&knots, degree + 1);
        Self {
            knots,
            degree,
            clamped,
            clamped_integral,
        }
    }

    pub fn knots(&self) -> &KnotSet {
        &self.knots
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    /// `n_internal_knots + degree + 1`.
    pub fn n_basis(&self) -> usize {
        self.knots.internal().len() + self.degree + 1
    }

    /// Evaluates the basis at every time, one row per time.
    pub fn evaluate(&self, times: ArrayView1<'_, f64>, kind: BasisKind) -> Array2<f64> {
        let mut matrix = Array2::<f64>::zeros((times.len(), self.n_basis()));
        for (mut row, &t) in matrix.rows_mut().into_iter().zip(times.iter()) {
            let values = match kind {
                BasisKind::Hazard => self.hazard_row(t),
                BasisKind::CumulativeHazard => self.cumulative_row(t),
            };
            row.assign(&values);
        }
        matrix
    }

    /// One row of the hazard basis. The hazard is held constant beyond the
    /// boundary knots and is zero for non-positive times.
    pub fn hazard_row(&self, t: f64) -> Array1<f64> {
        if t.is_nan() {
            return Array1::from_elem(self.n_basis(), f64::NAN);
        }
        if t <= 0.0 {
            return Array1::zeros(self.n_basis());
        }
        let clamped = t.clamp(self.knots.lower(), self.knots.upper());
        self.mspline_within(clamped)
    }

    /// One row of the cumulative hazard basis, the integral of
    /// [`MSplineBasis::hazard_row`] from 0 to `t`.
    ///
    /// Below the lower boundary the hazard is flat, so the integral is
    /// `M(lower) t`; from the lower boundary on, the I-splines are shifted up
    /// by `M(lower) lower` to stay continuous. Above the upper boundary the
    /// integral continues linearly at the boundary hazard. At `t = ∞` terms
    /// with a positive boundary hazard are infinite and the rest keep their
    /// value at the upper boundary.
    pub fn cumulative_row(&self, t: f64) -> Array1<f64> {
        if t.is_nan() {
            return Array1::from_elem(self.n_basis(), f64::NAN);
        }
        if t <= 0.0 {
            return Array1::zeros(self.n_basis());
        }
        let lower = self.knots.lower();
        let upper = self.knots.upper();
        let below = self.mspline_within(lower);
        if t < lower {
            return below * t;
        }
        let offset = below * lower;
        if t > upper {
            let at_upper = self.ispline_within(upper) + &offset;
            let slope = self.mspline_within(upper);
            if t == f64::INFINITY {
                return Array1::from_iter(at_upper.iter().zip(slope.iter()).map(|(&a, &s)| {
                    if s > 0.0 { f64::INFINITY } else { a }
                }));
            }
            return at_upper + slope * (t - upper);
        }
        self.ispline_within(t) + offset
    }

    /// Ramsay-normalised M-splines at a point inside the boundary knots:
    /// `M_i = k B_i / (tau_{i+k} - tau_i)` with order `k = degree + 1`.
    fn mspline_within(&self, x: f64) -> Array1<f64> {
        let n = self.n_basis();
        let order = (self.degree + 1) as f64;
        let (span, values) = internal::nonzero_bsplines(x, self.degree, &self.clamped, n);
        let mut row = Array1::<f64>::zeros(n);
        for (r, &b) in values.iter().enumerate() {
            let i = span - self.degree + r;
            let width = self.clamped[i + self.degree + 1] - self.clamped[i];
            if width > 0.0 {
                row[i] = order * b / width;
            }
        }
        row
    }

    /// I-splines at a point inside the boundary knots.
    ///
    /// With `B'_j` the order `degree + 2` B-splines on the knot vector with
    /// one more repeated boundary knot, `I_i(x) = sum_{j > i} B'_j(x)`.
    fn ispline_within(&self, x: f64) -> Array1<f64> {
        let n = self.n_basis();
        let higher = self.degree + 1;
        let (span, values) = internal::nonzero_bsplines(x, higher, &self.clamped_integral, n + 1);
        let mut full = vec![0.0; n + 1];
        for (r, &b) in values.iter().enumerate() {
            full[span - higher + r] = b;
        }
        let mut row = Array1::<f64>::zeros(n);
        let mut suffix = 0.0;
        for i in (0..n).rev() {
            suffix += full[i + 1];
            row[i] = suffix.min(1.0);
        }
        row
    }
}

/// Evaluates an M-spline basis (`integrate = false`) or its integral
/// (`integrate = true`) at each time.
///
/// This is the argument-checking entry point for callers that carry knots
/// as plain arrays.
pub fn basis(
    times: ArrayView1<'_, f64>,
    internal_knots: &[f64],
    boundary_knots: &[f64],
    degree: usize,
    integrate: bool,
) -> Result<Array2<f64>, BasisError> {
    let knots = KnotSet::from_parts(internal_knots, boundary_knots)?;
    let spline = MSplineBasis::new(knots, degree);
    let kind = if integrate {
        BasisKind::CumulativeHazard
    } else {
        BasisKind::Hazard
    };
    Ok(spline.evaluate(times, kind))
}

/// Places knots from observed event times: the lower boundary is 0, the
/// upper boundary is the largest event time, and `df - degree - 1` internal
/// knots sit at evenly spaced quantiles of the event times.
pub fn default_knots(
    event_times: ArrayView1<'_, f64>,
    df: usize,
    degree: usize,
) -> Result<KnotSet, BasisError> {
    if df < degree + 1 {
        return Err(BasisError::InvalidDf {
            df,
            min: degree + 1,
        });
    }
    let positive: Vec<f64> = event_times
        .iter()
        .copied()
        .filter(|t| t.is_finite() && *t > 0.0)
        .collect();
    if positive.is_empty() {
        return Err(BasisError::NoEventTimes);
    }
    let upper = positive.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let num_internal = df - degree - 1;
    let internal = internal::quantiles(&positive, num_internal);

    let mut previous = 0.0;
    for &knot in &internal {
        if knot <= previous || knot >= upper {
            return Err(BasisError::DuplicateQuantileKnot(knot));
        }
        previous = knot;
    }
    KnotSet::from_parts(&internal, &[0.0, upper])
}

/// Coefficients under which the M-spline hazard is flat across the boundary
/// range: `c_i = (tau_{i+k} - tau_i) / (k (upper - lower))`. They sum to 1.
pub fn constant_hazard_coefs(spline: &MSplineBasis) -> Array1<f64> {
    let order = spline.degree + 1;
    let range = spline.knots.upper() - spline.knots.lower();
    Array1::from_iter((0..spline.n_basis()).map(|i| {
        (spline.clamped[i + order] - spline.clamped[i]) / (order as f64 * range)
    }))
}

/// Multinomial logits of [`constant_hazard_coefs`] against the first term,
/// i.e. `log(c_i / c_0)` for `i >= 1`. This is the prior mean of the spline
/// shape parameters.
pub fn constant_hazard_logits(spline: &MSplineBasis) -> Array1<f64> {
    let coefs = constant_hazard_coefs(spline);
    let reference = coefs[0].ln();
    coefs.iter().skip(1).map(|c| c.ln() - reference).collect()
}

fn clamped_knot_vector(knots: &KnotSet, degree: usize) -> Vec<f64> {
    let mut full = Vec::with_capacity(knots.internal().len() + 2 * (degree + 1));
    full.extend(std::iter::repeat_n(knots.lower(), degree + 1));
    full.extend_from_slice(knots.internal());
    full.extend(std::iter::repeat_n(knots.upper(), degree + 1));
    full
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    /// Calculates quantiles from a data vector using linear interpolation (Type 7 in R).
    pub(super) fn quantiles(data: &[f64], num_quantiles: usize) -> Vec<f64> {
        if num_quantiles == 0 {
            return Vec::new();
        }
        let mut sorted = data.to_vec();
        sorted.sort_unstable_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        (1..=num_quantiles)
            .map(|k| {
                let p = k as f64 / (num_quantiles as f64 + 1.0);
                let float_idx = (n as f64 - 1.0) * p;
                let lower_idx = float_idx.floor() as usize;
                let upper_idx = float_idx.ceil() as usize;
                if lower_idx == upper_idx {
                    sorted[lower_idx]
                } else {
                    let fraction = float_idx - lower_idx as f64;
                    sorted[lower_idx] * (1.0 - fraction) + sorted[upper_idx] * fraction
                }
            })
            .collect()
    }

    /// Evaluates the `degree + 1` B-splines that are non-zero at `x`, using the
    /// triangular Cox-de Boor scheme. Returns the knot span `mu` with
    /// `knots[mu] <= x < knots[mu + 1]` and the values of `B_{mu-degree..=mu}`.
    ///
    /// `x` must lie within the boundary knots; at the upper boundary the last
    /// non-degenerate span is used so the basis is left-continuous there.
    pub(super) fn nonzero_bsplines(
        x: f64,
        degree: usize,
        knots: &[f64],
        num_basis: usize,
    ) -> (usize, Vec<f64>) {
        let above = knots.partition_point(|&k| k <= x);
        let span = above.saturating_sub(1).clamp(degree, num_basis - 1);

        let mut values = vec![0.0; degree + 1];
        let mut left = vec![0.0; degree + 1];
        let mut right = vec![0.0; degree + 1];
        values[0] = 1.0;
        for j in 1..=degree {
            left[j] = x - knots[span + 1 - j];
            right[j] = knots[span + j] - x;
            let mut saved = 0.0;
            for r in 0..j {
                let denom = right[r + 1] + left[j - r];
                let temp = if denom > 0.0 { values[r] / denom } else { 0.0 };
                values[r] = saved + right[r + 1] * temp;
                saved = left[j - r] * temp;
            }
            values[j] = saved;
        }
        (span, values)
    }
}

// Unit tests are crucial for a mathematical library like this.
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn reference_spline() -> MSplineBasis {
        let knots = KnotSet::new(vec![0.0, 1.0, 2.0, 5.0]).unwrap();
        MSplineBasis::new(knots, 3)
    }

    fn simpson<F: Fn(f64) -> f64>(f: F, a: f64, b: f64, intervals: usize) -> f64 {
        let h = (b - a) / intervals as f64;
        let mut sum = f(a) + f(b);
        for i in 1..intervals {
            let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
            sum += weight * f(a + i as f64 * h);
        }
        sum * h / 3.0
    }

    #[test]
    fn basis_dimension_follows_knots_and_degree() {
        let spline = reference_spline();
        assert_eq!(spline.n_basis(), 2 + 3 + 1);
        let matrix = spline.evaluate(array![0.5, 1.5, 4.0].view(), BasisKind::Hazard);
        assert_eq!(matrix.shape(), &[3, 6]);
    }

    #[test]
    fn each_mspline_term_integrates_to_one() {
        let spline = reference_spline();
        for i in 0..spline.n_basis() {
            // Integrate piecewise so the polynomial pieces are exact under Simpson.
            let knots = [0.0, 1.0, 2.0, 5.0];
            let total: f64 = knots
                .windows(2)
                .map(|w| simpson(|t| spline.mspline_within(t)[i], w[0], w[1], 200))
                .sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-8);
        }
    }

    #[test]
    fn hazard_rows_are_constant_beyond_upper_boundary() {
        let spline = reference_spline();
        let at_upper = spline.hazard_row(5.0);
        for &t in &[5.0001, 7.0, 100.0, 1e6] {
            assert_eq!(spline.hazard_row(t), at_upper);
        }
    }

    #[test]
    fn rows_at_non_positive_times_are_zero() {
        let spline = reference_spline();
        for &t in &[0.0, -1.0, -1e-12] {
            assert!(spline.hazard_row(t).iter().all(|&v| v == 0.0));
            assert!(spline.cumulative_row(t).iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn nan_times_give_nan_rows() {
        let spline = reference_spline();
        assert!(spline.hazard_row(f64::NAN).iter().all(|v| v.is_nan()));
        assert!(spline.cumulative_row(f64::NAN).iter().all(|v| v.is_nan()));
    }

    #[test]
    fn cumulative_basis_matches_integral_of_hazard_basis() {
        let spline = reference_spline();
        for &t in &[0.3, 1.0, 1.7, 3.2, 5.0] {
            let ibasis = spline.cumulative_row(t);
            for i in 0..spline.n_basis() {
                let integral = simpson(|s| spline.mspline_within(s)[i], 0.0, t, 2000);
                assert_relative_eq!(ibasis[i], integral, epsilon = 1e-6);
            }
        }
        let at_upper = spline.cumulative_row(5.0);
        for v in at_upper.iter() {
            assert_relative_eq!(*v, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_basis_is_continuous_and_linear_above_upper() {
        let spline = reference_spline();
        let at_upper = spline.cumulative_row(5.0);
        let just_above = spline.cumulative_row(5.0 + 1e-9);
        for (a, b) in at_upper.iter().zip(just_above.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-8);
        }
        let slope = spline.hazard_row(5.0);
        let far = spline.cumulative_row(9.0);
        for i in 0..spline.n_basis() {
            assert_relative_eq!(far[i], at_upper[i] + slope[i] * 4.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_basis_below_lower_boundary_is_linear_through_origin() {
        let knots = KnotSet::new(vec![1.0, 2.0, 4.0]).unwrap();
        let spline = MSplineBasis::new(knots, 2);
        let slope = spline.hazard_row(1.0);
        let row = spline.cumulative_row(0.5);
        for i in 0..spline.n_basis() {
            assert_relative_eq!(row[i], slope[i] * 0.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_basis_is_continuous_at_a_positive_lower_boundary() {
        let knots = KnotSet::new(vec![1.0, 2.0, 4.0]).unwrap();
        let spline = MSplineBasis::new(knots, 2);
        let just_below = spline.cumulative_row(1.0 - 1e-9);
        let at_lower = spline.cumulative_row(1.0);
        let just_above = spline.cumulative_row(1.0 + 1e-9);
        for i in 0..spline.n_basis() {
            assert_relative_eq!(just_below[i], at_lower[i], epsilon = 1e-8);
            assert_relative_eq!(just_above[i], at_lower[i], epsilon = 1e-8);
        }
        // Each term integrates to one over [1, 4] on top of the flat start.
        let slope = spline.hazard_row(1.0);
        let at_upper = spline.cumulative_row(4.0);
        for i in 0..spline.n_basis() {
            assert_relative_eq!(at_upper[i], 1.0 + slope[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn cumulative_basis_at_infinity_has_no_nan() {
        let spline = reference_spline();
        let slope = spline.hazard_row(5.0);
        let at_upper = spline.cumulative_row(5.0);
        let row = spline.cumulative_row(f64::INFINITY);
        assert!(slope.iter().any(|&s| s == 0.0));
        for i in 0..spline.n_basis() {
            if slope[i] > 0.0 {
                assert_eq!(row[i], f64::INFINITY);
            } else {
                assert_eq!(row[i], at_upper[i]);
            }
        }
    }

    #[test]
    fn constant_hazard_coefficients_flatten_the_hazard() {
        let spline = reference_spline();
        let coefs = constant_hazard_coefs(&spline);
        assert_relative_eq!(coefs.sum(), 1.0, epsilon = 1e-12);
        for &t in &[0.1, 0.9, 2.5, 4.99, 8.0] {
            let hazard = spline.hazard_row(t).dot(&coefs);
            assert_relative_eq!(hazard, 1.0 / 5.0, epsilon = 1e-10);
        }
        let logits = constant_hazard_logits(&spline);
        assert_eq!(logits.len(), spline.n_basis() - 1);
        let back = crate::math::softmax_with_reference(logits.view());
        for (a, b) in back.iter().zip(coefs.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn degree_zero_basis_is_piecewise_constant() {
        let knots = KnotSet::new(vec![0.0, 2.0, 3.0]).unwrap();
        let spline = MSplineBasis::new(knots, 0);
        assert_eq!(spline.n_basis(), 2);
        assert_eq!(spline.hazard_row(1.0), array![0.5, 0.0]);
        assert_eq!(spline.hazard_row(2.5), array![0.0, 1.0]);
        let ibasis = spline.cumulative_row(1.0);
        assert_relative_eq!(ibasis[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ibasis[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn basis_entry_point_validates_arguments() {
        let times = array![1.0, 2.0];
        assert_eq!(
            basis(times.view(), &[1.0], &[0.0], 3, false).unwrap_err(),
            BasisError::BoundaryKnotCount(1)
        );
        assert_eq!(
            basis(times.view(), &[6.0], &[0.0, 5.0], 3, false).unwrap_err(),
            BasisError::InternalKnotOutsideBoundary {
                value: 6.0,
                lower: 0.0,
                upper: 5.0
            }
        );
        assert_eq!(
            basis(times.view(), &[2.0, 1.0], &[0.0, 5.0], 3, true).unwrap_err(),
            BasisError::UnsortedInternalKnots {
                previous: 2.0,
                next: 1.0
            }
        );
        assert!(matches!(
            basis(times.view(), &[-1.0], &[0.0, 5.0], 3, true).unwrap_err(),
            BasisError::InvalidKnot { index: 1, .. }
        ));
        assert_eq!(
            basis(times.view(), &[], &[3.0, 3.0], 3, true).unwrap_err(),
            BasisError::InvalidBoundary(3.0, 3.0)
        );
        let ok = basis(times.view(), &[1.0, 2.0], &[0.0, 5.0], 3, true).unwrap();
        assert_eq!(ok.shape(), &[2, 6]);
    }

    #[test]
    fn default_knots_use_event_time_quantiles() {
        let events = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let knots = default_knots(events.view(), 6, 3).unwrap();
        // Positive times 1..=8, quantiles at 1/3 and 2/3.
        assert_eq!(knots.lower(), 0.0);
        assert_eq!(knots.upper(), 8.0);
        let internal = knots.internal();
        assert_eq!(internal.len(), 2);
        assert_relative_eq!(internal[0], 1.0 + 7.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(internal[1], 1.0 + 14.0 / 3.0, epsilon = 1e-12);

        assert_eq!(
            default_knots(events.view(), 3, 3).unwrap_err(),
            BasisError::InvalidDf { df: 3, min: 4 }
        );
        assert_eq!(
            default_knots(array![0.0, -1.0].view(), 6, 3).unwrap_err(),
            BasisError::NoEventTimes
        );
        assert!(matches!(
            default_knots(array![2.0, 2.0, 2.0, 2.0].view(), 6, 3).unwrap_err(),
            BasisError::DuplicateQuantileKnot(_)
        ));
    }

    #[test]
    fn knot_sets_round_trip_through_serde() {
        let knots = KnotSet::new(vec![0.0, 1.0, 2.0, 5.0]).unwrap();
        let json = serde_json::to_string(&knots).unwrap();
        assert_eq!(json, "[0.0,1.0,2.0,5.0]");
        let back: KnotSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, knots);
        assert!(serde_json::from_str::<KnotSet>("[3.0,1.0]").is_err());
    }
}
