//! From a parameter vector and one covariate profile to the quantities the
//! distribution functions take: the log-hazard scale `alpha`, the cure
//! probability and the spline coefficient row.

use super::layout::{LayoutError, ParameterLayout, Parameters, SmoothModel};
use crate::basis::{MSplineBasis, constant_hazard_logits};
use crate::math::{log_sigmoid, sigmoid, softmax_with_reference};
use ndarray::{Array1, ArrayView1};

#[derive(Debug, Clone)]
pub struct Predictor {
    layout: ParameterLayout,
    /// Logits of the constant-hazard coefficients.
    prior_mean: Array1<f64>,
    smooth_model: SmoothModel,
    fixed_log_smooth_sd: f64,
}

impl Predictor {
    /// `fixed_smooth_sd` is used only when the layout has no
    /// `log_smooth_sd` slot.
    pub fn new(
        layout: ParameterLayout,
        spline: &MSplineBasis,
        smooth_model: SmoothModel,
        fixed_smooth_sd: f64,
    ) -> Result<Self, LayoutError> {
        if spline.n_basis() != layout.nvars() {
            return Err(LayoutError::BasisMismatch {
                layout: layout.nvars(),
                basis: spline.n_basis(),
            });
        }
        if !(fixed_smooth_sd.is_finite() && fixed_smooth_sd > 0.0) {
            return Err(LayoutError::InvalidSmoothSd(fixed_smooth_sd));
        }
        Ok(Self {
            layout,
            prior_mean: constant_hazard_logits(spline),
            smooth_model,
            fixed_log_smooth_sd: fixed_smooth_sd.ln(),
        })
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    pub fn prior_mean(&self) -> &Array1<f64> {
        &self.prior_mean
    }

    pub fn unpack(&self, theta: &[f64]) -> Result<Parameters, LayoutError> {
        self.layout.unpack(theta, self.fixed_log_smooth_sd)
    }

    /// Baseline coefficient logits `prior_mean + smooth_sd * D(shape_err)`.
    pub fn shape_logits(&self, params: &Parameters) -> Array1<f64> {
        let sd = params.log_smooth_sd.exp();
        let deviations = match self.smooth_model {
            SmoothModel::Exchangeable => params.shape_err.clone(),
            SmoothModel::RandomWalk => {
                let mut running = 0.0;
                params.shape_err.mapv(|e| {
                    running += e;
                    running
                })
            }
        };
        &self.prior_mean + &(deviations * sd)
    }

    pub fn alpha(&self, params: &Parameters, x: ArrayView1<'_, f64>) -> f64 {
        params.alpha0 + x.dot(&params.loghr)
    }

    /// Logit of the cure probability for a cure-covariate row, if the model
    /// has a cure fraction.
    pub fn cure_logit(&self, params: &Parameters, x_cure: ArrayView1<'_, f64>) -> Option<f64> {
        params
            .logit_pcure
            .map(|z| z + x_cure.dot(&params.logor_cure))
    }

    pub fn pcure(&self, params: &Parameters, x_cure: ArrayView1<'_, f64>) -> f64 {
        self.cure_logit(params, x_cure).map_or(0.0, sigmoid)
    }

    /// `(log pcure, log(1 - pcure))`, or `None` without a cure fraction.
    pub fn log_cure_pair(&self, params: &Parameters, x_cure: ArrayView1<'_, f64>) -> Option<(f64, f64)> {
        self.cure_logit(params, x_cure)
            .map(|z| (log_sigmoid(z), log_sigmoid(-z)))
    }

    /// Whether coefficient rows depend on covariates.
    pub fn is_nonproportional(&self) -> bool {
        !self.layout.nonprop().is_empty()
    }

    /// Coefficient row for a covariate profile. With proportional hazards
    /// this is `softmax([0, beta])` for every row.
    pub fn coefs(&self, beta: &Array1<f64>, params: &Parameters, x: ArrayView1<'_, f64>) -> Array1<f64> {
        if !self.is_nonproportional() {
            return softmax_with_reference(beta.view());
        }
        let mut logits = beta.clone();
        for (j, &column) in self.layout.nonprop_columns().iter().enumerate() {
            let weight = x[column] * params.log_nph_sd[j].exp();
            if weight != 0.0 {
                logits.scaled_add(weight, &params.nph_err.row(j));
            }
        }
        softmax_with_reference(logits.view())
    }
}
