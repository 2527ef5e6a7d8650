//! The M-spline survival distribution.
//!
//! A hazard is `exp(alpha) * Σ c_i M_i(t)`; its integral follows from the
//! I-spline basis. On top of the base model sit an optional mixture cure
//! fraction and an optional background hazard for relative survival. Every
//! public function is vectorised over entries with argument recycling, see
//! [`crate::recycle`].

use crate::basis::{BasisError, KnotSet, MSplineBasis};
use crate::math::log_sum_exp;
use crate::recycle::{Entry, Recycled};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use thiserror::Error;

/// Slack allowed above one when checking an evaluated survival probability.
pub const SURVIVAL_SLACK: f64 = 1e-8;

/// Rows whose sum differs from one by more than this are rescaled.
pub const NORMALIZE_TOLERANCE: f64 = 1e-8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DistributionError {
    #[error("coefs must have {expected} columns (one per basis term), found {found}")]
    CoefficientLength { expected: usize, found: usize },

    #[error("coefs row {row} has an invalid entry {value}; coefficients must be finite and non-negative")]
    InvalidCoefficient { row: usize, value: f64 },

    #[error("coefs row {0} sums to zero and cannot be normalised")]
    ZeroCoefficientRow(usize),

    #[error("pcure must lie in [0, 1], found {0}")]
    InvalidCureProbability(f64),

    #[error("background {name} must be non-negative, found {value}")]
    InvalidBackground { name: &'static str, value: f64 },

    #[error("background hazard and cumulative hazard must not be empty")]
    EmptyBackground,

    #[error("survival probability {0} exceeds 1 at the first evaluated point")]
    SurvivalAboveOne(f64),

    #[error("{0} is not defined for a model with a background hazard")]
    BackgroundNotSupported(&'static str),

    #[error("start time must be finite and non-negative, found {0}")]
    InvalidStart(f64),

    #[error(transparent)]
    Basis(#[from] BasisError),
}

/// Rescales every row of `coefs` to sum to one.
///
/// Rows containing a NaN are passed through untouched so that the entries
/// they feed evaluate to NaN. Negative or infinite entries and all-zero rows
/// are rejected. One warning reports how many rows needed rescaling.
pub fn normalize_coefs(coefs: ArrayView2<'_, f64>) -> Result<Array2<f64>, DistributionError> {
    let mut out = coefs.to_owned();
    let mut rescaled = 0usize;
    for (row_index, mut row) in out.rows_mut().into_iter().enumerate() {
        if row.iter().any(|v| v.is_nan()) {
            continue;
        }
        if let Some(&value) = row.iter().find(|v| !v.is_finite() || **v < 0.0) {
            return Err(DistributionError::InvalidCoefficient {
                row: row_index,
                value,
            });
        }
        let total = row.sum();
        if total <= 0.0 {
            return Err(DistributionError::ZeroCoefficientRow(row_index));
        }
        if (total - 1.0).abs() > NORMALIZE_TOLERANCE {
            rescaled += 1;
        }
        row.mapv_inplace(|v| v / total);
    }
    if rescaled > 0 {
        log::warn!(
            "{} of {} coefficient rows did not sum to 1 and were rescaled",
            rescaled,
            out.nrows()
        );
    }
    Ok(out)
}

/// Log hazard and log survival of one entry, on the unconditional scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogScale {
    pub log_hazard: f64,
    pub log_survival: f64,
}

impl LogScale {
    /// The base M-spline model from pre-evaluated basis rows.
    pub fn base(
        alpha: f64,
        hazard_row: ArrayView1<'_, f64>,
        cumulative_row: ArrayView1<'_, f64>,
        coefs: ArrayView1<'_, f64>,
    ) -> Self {
        Self {
            log_hazard: alpha + hazard_row.dot(&coefs).ln(),
            log_survival: base_log_survival(alpha, cumulative_row, coefs),
        }
    }

    /// Mixture cure: `S = p + (1 - p) S_base`, with the hazard taken as the
    /// uncured density over the mixture survival.
    pub fn with_cure(self, pcure: f64) -> Self {
        if pcure == 0.0 {
            return self;
        }
        let log_uncured = (-pcure).ln_1p();
        let log_survival = mixture_log_survival(self.log_survival, pcure.ln(), log_uncured);
        let log_hazard = log_uncured + self.log_hazard + self.log_survival - log_survival;
        Self {
            log_hazard,
            log_survival,
        }
    }

    /// Adds a background hazard to the hazard and its cumulative hazard to
    /// the survival.
    pub fn with_background(self, offset_hazard: f64, offset_cumhaz: f64) -> Self {
        Self {
            log_hazard: log_sum_exp(offset_hazard.ln(), self.log_hazard),
            log_survival: self.log_survival - offset_cumhaz,
        }
    }

    pub fn log_density(&self) -> f64 {
        self.log_hazard + self.log_survival
    }
}

/// `log(p + (1 - p) S)` from `log S`, `log p` and `log(1 - p)`.
#[inline]
pub fn mixture_log_survival(log_survival: f64, log_pcure: f64, log_uncured: f64) -> f64 {
    log_sum_exp(log_pcure, log_uncured + log_survival)
}

/// Base-model log survival `-exp(alpha) * (ibasis . coefs)`.
///
/// Terms with a zero coefficient are skipped, so an infinite basis value at
/// `t = ∞` only counts where it carries weight.
#[inline]
pub fn base_log_survival(alpha: f64, cumulative_row: ArrayView1<'_, f64>, coefs: ArrayView1<'_, f64>) -> f64 {
    let cumulative: f64 = cumulative_row
        .iter()
        .zip(coefs.iter())
        .filter(|&(_, &c)| c != 0.0)
        .map(|(&b, &c)| b * c)
        .sum();
    -(alpha + cumulative.ln()).exp()
}

/// Rejects a survival probability above one beyond [`SURVIVAL_SLACK`].
pub fn check_survival(log_survival: f64) -> Result<(), DistributionError> {
    if log_survival > SURVIVAL_SLACK.ln_1p() {
        return Err(DistributionError::SurvivalAboveOne(log_survival.exp()));
    }
    Ok(())
}

/// A vectorised M-spline survival distribution.
///
/// `alpha`, the rows of `coefs`, `pcure` and the background vectors are all
/// recycled against the evaluation times.
#[derive(Debug, Clone)]
pub struct SurvMSpline {
    spline: MSplineBasis,
    alpha: Array1<f64>,
    coefs: Array2<f64>,
    pcure: Option<Array1<f64>>,
    background: Option<(Array1<f64>, Array1<f64>)>,
}

impl SurvMSpline {
    /// Builds the distribution, normalising the coefficient rows.
    pub fn new(
        spline: MSplineBasis,
        alpha: Array1<f64>,
        coefs: Array2<f64>,
    ) -> Result<Self, DistributionError> {
        if coefs.ncols() != spline.n_basis() {
            return Err(DistributionError::CoefficientLength {
                expected: spline.n_basis(),
                found: coefs.ncols(),
            });
        }
        let coefs = normalize_coefs(coefs.view())?;
        Ok(Self {
            spline,
            alpha,
            coefs,
            pcure: None,
            background: None,
        })
    }

    /// Convenience constructor from a full knot vector.
    pub fn from_knots(
        knots: &[f64],
        degree: usize,
        alpha: Array1<f64>,
        coefs: Array2<f64>,
    ) -> Result<Self, DistributionError> {
        let knots = KnotSet::new(knots.to_vec())?;
        Self::new(MSplineBasis::new(knots, degree), alpha, coefs)
    }

    pub fn with_cure(mut self, pcure: Array1<f64>) -> Result<Self, DistributionError> {
        if let Some(&bad) = pcure.iter().find(|p| !(p.is_nan() || (0.0..=1.0).contains(*p))) {
            return Err(DistributionError::InvalidCureProbability(bad));
        }
        self.pcure = Some(pcure);
        Ok(self)
    }

    /// Attaches a background hazard given per entry as the hazard at the
    /// evaluation time and the cumulative hazard up to it.
    pub fn with_background(
        mut self,
        hazard: Array1<f64>,
        cumhaz: Array1<f64>,
    ) -> Result<Self, DistributionError> {
        if hazard.is_empty() || cumhaz.is_empty() {
            return Err(DistributionError::EmptyBackground);
        }
        for (name, values) in [("hazard", &hazard), ("cumulative hazard", &cumhaz)] {
            if let Some(&value) = values.iter().find(|v| **v < 0.0) {
                return Err(DistributionError::InvalidBackground { name, value });
            }
        }
        self.background = Some((hazard, cumhaz));
        Ok(self)
    }

    pub fn spline(&self) -> &MSplineBasis {
        &self.spline
    }

    pub fn alpha(&self) -> &Array1<f64> {
        &self.alpha
    }

    pub fn coefs(&self) -> &Array2<f64> {
        &self.coefs
    }

    pub fn pcure(&self) -> Option<&Array1<f64>> {
        self.pcure.as_ref()
    }

    pub fn background(&self) -> Option<(&Array1<f64>, &Array1<f64>)> {
        self.background.as_ref().map(|(h, c)| (h, c))
    }

    /// Log hazard and log survival of an entry at its own value, including
    /// the cure fraction and background.
    pub fn log_scale(&self, entry: &Entry<'_>) -> LogScale {
        self.model_log_scale(entry, entry.value)
            .with_background(entry.offset_hazard, entry.offset_cumhaz)
    }

    /// Log hazard and log survival of an entry's model at an arbitrary time,
    /// including the cure fraction but not the background.
    pub fn model_log_scale(&self, entry: &Entry<'_>, t: f64) -> LogScale {
        let hazard_row = self.spline.hazard_row(t);
        let cumulative_row = self.spline.cumulative_row(t);
        LogScale::base(
            entry.alpha,
            hazard_row.view(),
            cumulative_row.view(),
            entry.coefs,
        )
        .with_cure(entry.pcure)
    }

    /// Survival of an entry's model at `t`, without background.
    pub fn survival_at(&self, entry: &Entry<'_>, t: f64) -> f64 {
        self.model_log_scale(entry, t).log_survival.exp()
    }

    fn evaluate<F>(&self, times: ArrayView1<'_, f64>, f: F) -> Result<Array1<f64>, DistributionError>
    where
        F: Fn(&LogScale) -> f64,
    {
        let recycled = Recycled::new(times.reborrow(), self);
        if let Some(first) = recycled.first_valid().and_then(|i| recycled.entry(i)) {
            check_survival(self.log_scale(&first).log_survival)?;
        }
        Ok(recycled.fill(|entry| f(&self.log_scale(entry))))
    }

    pub fn log_hazard(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_hazard)
    }

    pub fn hazard(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_hazard.exp())
    }

    /// Cumulative hazard `-log S`, on the unconditional scale.
    pub fn cumulative_hazard(
        &self,
        times: ArrayView1<'_, f64>,
    ) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| -s.log_survival)
    }

    pub fn log_survival(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_survival)
    }

    pub fn survival(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_survival.exp())
    }

    pub fn cdf(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| -s.log_survival.exp_m1())
    }

    pub fn log_density(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_density())
    }

    pub fn density(&self, times: ArrayView1<'_, f64>) -> Result<Array1<f64>, DistributionError> {
        self.evaluate(times, |s| s.log_density().exp())
    }
}
