//! The log-posterior density of the M-spline survival model.
//!
//! Individual events and censored follow-up contribute the usual survival
//! likelihood. External aggregate data contribute a binomial term: of `n`
//! people alive at `t`, the number `r` still alive at `u` is
//! `Binom(n, S(u) / S(t))`. Priors are evaluated on the unconstrained scale
//! with the Jacobians of the log and logit transforms.

use super::data::ModelData;
use super::layout::{LayoutError, Parameters};
use super::model::{ModelError, ModelSpec};
use super::predictor::Predictor;
use super::priors::PriorSet;
use crate::distribution::{
    DistributionError, LogScale, base_log_survival, check_survival, mixture_log_survival,
};
use crate::math::binomial_logpmf_logp;
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

/// Relative step of the central finite-difference gradient.
pub const FD_STEP: f64 = 1e-6;

#[derive(Error, Debug)]
pub enum LikelihoodError {
    #[error("{0}")]
    Layout(#[from] LayoutError),
    #[error("{0}")]
    Model(#[from] ModelError),
    #[error("{0}")]
    Distribution(#[from] DistributionError),
    #[error("{which} in the data ({data:?}) do not match the model ({model:?})")]
    CovariateMismatch {
        which: &'static str,
        model: Vec<String>,
        data: Vec<String>,
    },
}

/// A differentiable log-density over a flat parameter vector, as consumed by
/// samplers and optimisers.
pub trait LogDensity: Send + Sync {
    fn dim(&self) -> usize;

    fn parameter_names(&self) -> Vec<String>;

    /// Non-finite densities are reported as `-inf`; only malformed input is
    /// an error.
    fn log_density(&self, theta: &[f64]) -> Result<f64, LikelihoodError>;

    fn gradient(&self, theta: &[f64]) -> Result<Vec<f64>, LikelihoodError> {
        finite_difference_gradient(|x| self.log_density(x), theta)
    }
}

/// Central differences with a step of `FD_STEP * max(1, |theta_i|)`.
pub fn finite_difference_gradient<F>(f: F, theta: &[f64]) -> Result<Vec<f64>, LikelihoodError>
where
    F: Fn(&[f64]) -> Result<f64, LikelihoodError>,
{
    let mut point = theta.to_vec();
    let mut grad = Vec::with_capacity(theta.len());
    for i in 0..theta.len() {
        let h = FD_STEP * theta[i].abs().max(1.0);
        point[i] = theta[i] + h;
        let up = f(&point)?;
        point[i] = theta[i] - h;
        let down = f(&point)?;
        point[i] = theta[i];
        grad.push((up - down) / (2.0 * h));
    }
    Ok(grad)
}

/// The log-density split by source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityParts {
    pub prior: f64,
    pub events: f64,
    pub censored: f64,
    pub external: f64,
}

impl DensityParts {
    pub fn total(&self) -> f64 {
        self.prior + self.events + self.censored + self.external
    }
}

/// Standard normal log-density.
fn std_normal_logpdf(z: f64) -> f64 {
    -0.5 * z * z - 0.5 * (2.0 * std::f64::consts::PI).ln()
}

/// Per-row evaluation context shared by the three data blocks.
struct RowModel<'a> {
    predictor: &'a Predictor,
    params: &'a Parameters,
    beta: Array1<f64>,
    /// Coefficients shared by every row under proportional hazards.
    shared_coefs: Option<Array1<f64>>,
}

impl<'a> RowModel<'a> {
    fn new(predictor: &'a Predictor, params: &'a Parameters) -> Self {
        let beta = predictor.shape_logits(params);
        let shared_coefs = (!predictor.is_nonproportional()).then(|| {
            let empty = Array1::<f64>::zeros(0);
            predictor.coefs(&beta, params, empty.view())
        });
        Self {
            predictor,
            params,
            beta,
            shared_coefs,
        }
    }

    fn coefs(&self, x: ArrayView1<'_, f64>) -> Array1<f64> {
        match &self.shared_coefs {
            Some(coefs) => coefs.clone(),
            None => self.predictor.coefs(&self.beta, self.params, x),
        }
    }

    fn alpha(&self, x: ArrayView1<'_, f64>) -> f64 {
        self.predictor.alpha(self.params, x)
    }

    /// Unconditional log survival from a cumulative basis row.
    fn log_survival(
        &self,
        x: ArrayView1<'_, f64>,
        x_cure: ArrayView1<'_, f64>,
        ibasis: ArrayView1<'_, f64>,
        coefs: ArrayView1<'_, f64>,
    ) -> f64 {
        let base = base_log_survival(self.alpha(x), ibasis, coefs);
        match self.predictor.log_cure_pair(self.params, x_cure) {
            Some((log_p, log_q)) => mixture_log_survival(base, log_p, log_q),
            None => base,
        }
    }
}

/// The posterior of an M-spline survival model given prepared data.
#[derive(Debug, Clone)]
pub struct SurvivalPosterior {
    data: ModelData,
    priors: PriorSet,
    predictor: Predictor,
}

impl SurvivalPosterior {
    pub fn new(spec: &ModelSpec, data: ModelData) -> Result<Self, LikelihoodError> {
        if data.covariates != spec.covariates {
            return Err(LikelihoodError::CovariateMismatch {
                which: "covariates",
                model: spec.covariates.clone(),
                data: data.covariates.clone(),
            });
        }
        let expected_cure = if spec.cure {
            spec.cure_covariates.clone()
        } else {
            Vec::new()
        };
        if data.cure_covariates != expected_cure {
            return Err(LikelihoodError::CovariateMismatch {
                which: "cure covariates",
                model: expected_cure,
                data: data.cure_covariates.clone(),
            });
        }
        let predictor = spec.predictor(&data.spline)?;
        log::info!(
            "Survival posterior with {} parameters over {} observations",
            predictor.layout().dim(),
            data.n_observations()
        );
        Ok(Self {
            data,
            priors: spec.priors.clone(),
            predictor,
        })
    }

    pub fn data(&self) -> &ModelData {
        &self.data
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    /// Zeros, with the intercept matched to the crude event rate.
    pub fn default_start(&self) -> Array1<f64> {
        let knots = self.data.spline.knots();
        let alpha0 = self
            .data
            .crude_rate()
            .map_or(0.0, |rate| (rate * (knots.upper() - knots.lower())).ln());
        self.predictor.layout().default_start(alpha0)
    }

    fn log_prior(&self, params: &Parameters) -> f64 {
        let layout = self.predictor.layout();
        let mut lp = self.priors.alpha0.logpdf(params.alpha0);
        for (j, &b) in params.loghr.iter().enumerate() {
            lp += self.priors.loghr_for(j).logpdf(b);
        }
        lp += params.shape_err.iter().map(|&e| std_normal_logpdf(e)).sum::<f64>();
        if layout.log_smooth_sd.is_some() {
            lp += self.priors.smooth_sd.logpdf_log(params.log_smooth_sd);
        }
        if let Some(z) = params.logit_pcure {
            lp += self.priors.pcure.logpdf_logit(z);
        }
        for (j, &b) in params.logor_cure.iter().enumerate() {
            lp += self.priors.logor_cure_for(j).logpdf(b);
        }
        lp += params.nph_err.iter().map(|&e| std_normal_logpdf(e)).sum::<f64>();
        for &u in params.log_nph_sd.iter() {
            lp += self.priors.nph_sd.logpdf_log(u);
        }
        lp
    }

    fn event_term(&self, rows: &RowModel<'_>) -> Result<f64, LikelihoodError> {
        let block = &self.data.events;
        let mut total = 0.0;
        for i in 0..block.x.nrows() {
            let x = block.x.row(i);
            let coefs = rows.coefs(x);
            // Relative survival: the background hazard adds to the excess
            // hazard, while the background survival is a constant factor.
            let scale = LogScale::base(
                rows.alpha(x),
                block.basis.row(i),
                block.ibasis.row(i),
                coefs.view(),
            )
            .with_cure(self.predictor.pcure(rows.params, block.x_cure.row(i)));
            if i == 0 {
                check_survival(scale.log_survival)?;
            }
            total += scale.with_background(block.backhaz[i], 0.0).log_density();
        }
        Ok(total)
    }

    fn censored_term(&self, rows: &RowModel<'_>) -> Result<f64, LikelihoodError> {
        let block = &self.data.censored;
        let mut total = 0.0;
        for i in 0..block.x.nrows() {
            let x = block.x.row(i);
            let coefs = rows.coefs(x);
            let log_survival = rows.log_survival(x, block.x_cure.row(i), block.ibasis.row(i), coefs.view());
            if i == 0 {
                check_survival(log_survival)?;
            }
            total += log_survival;
        }
        Ok(total)
    }

    fn external_term(&self, rows: &RowModel<'_>) -> Result<f64, LikelihoodError> {
        let block = &self.data.external;
        let mut total = 0.0;
        for i in 0..block.x.nrows() {
            let x = block.x.row(i);
            let x_cure = block.x_cure.row(i);
            let coefs = rows.coefs(x);
            let log_start = rows.log_survival(x, x_cure, block.ibasis_start.row(i), coefs.view())
                + block.backsurv_start[i].ln();
            let log_stop = rows.log_survival(x, x_cure, block.ibasis_stop.row(i), coefs.view())
                + block.backsurv_stop[i].ln();
            if i == 0 {
                check_survival(log_start)?;
            }
            if log_start == f64::NEG_INFINITY {
                return Ok(f64::NEG_INFINITY);
            }
            let log_ratio = (log_stop - log_start).min(0.0);
            total += binomial_logpmf_logp(block.r_stop[i], block.n_start[i], log_ratio);
        }
        Ok(total)
    }

    /// The log-density broken down by source.
    pub fn log_density_parts(&self, theta: &[f64]) -> Result<DensityParts, LikelihoodError> {
        let params = self.predictor.unpack(theta)?;
        let rows = RowModel::new(&self.predictor, &params);
        Ok(DensityParts {
            prior: self.log_prior(&params),
            events: self.event_term(&rows)?,
            censored: self.censored_term(&rows)?,
            external: self.external_term(&rows)?,
        })
    }
}

impl LogDensity for SurvivalPosterior {
    fn dim(&self) -> usize {
        self.predictor.layout().dim()
    }

    fn parameter_names(&self) -> Vec<String> {
        self.predictor.layout().names().to_vec()
    }

    fn log_density(&self, theta: &[f64]) -> Result<f64, LikelihoodError> {
        let total = self.log_density_parts(theta)?.total();
        if total.is_finite() {
            Ok(total)
        } else {
            log::debug!("Log-density is not finite ({}); returning -inf", total);
            Ok(f64::NEG_INFINITY)
        }
    }
}
