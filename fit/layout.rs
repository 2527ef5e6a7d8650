use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LayoutError {
    #[error("parameter vector has length {found}, expected {expected}")]
    WrongLength { expected: usize, found: usize },
    #[error("spline basis needs at least 2 terms, found {0}")]
    TooFewBasisTerms(usize),
    #[error("non-proportional covariate '{0}' is not one of the model covariates")]
    UnknownNonPropCovariate(String),
    #[error("layout expects {layout} basis terms but the spline has {basis}")]
    BasisMismatch { layout: usize, basis: usize },
    #[error("fixed smoothing SD must be finite and positive, found {0}")]
    InvalidSmoothSd(f64),
}

/// How the spline coefficient logits deviate from their prior mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SmoothModel {
    /// Independent deviations.
    #[default]
    Exchangeable,
    /// Deviations accumulate along the basis, so neighbouring terms are
    /// correlated.
    RandomWalk,
}

/// Where each parameter block sits in the flat unconstrained vector.
///
/// The order is fixed: `alpha0`, `loghr`, `shape_err`, `log_smooth_sd` (when
/// estimated), `logit_pcure` (cure model), `logor_cure`, `nph_err` (one row
/// of `nvars - 1` per non-proportional covariate, row-major), `log_nph_sd`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    nvars: usize,
    covariates: Vec<String>,
    cure_covariates: Vec<String>,
    nonprop: Vec<String>,
    /// Column of each non-proportional covariate among `covariates`.
    nonprop_columns: Vec<usize>,
    pub alpha0: usize,
    pub loghr: Range<usize>,
    pub shape_err: Range<usize>,
    pub log_smooth_sd: Option<usize>,
    pub logit_pcure: Option<usize>,
    pub logor_cure: Range<usize>,
    pub nph_err: Range<usize>,
    pub log_nph_sd: Range<usize>,
    names: Vec<String>,
}

fn block(next: &mut usize, len: usize) -> Range<usize> {
    let range = *next..*next + len;
    *next += len;
    range
}

impl ParameterLayout {
    /// `cure_covariates` is only used when `cure` is set.
    pub fn new(
        nvars: usize,
        covariates: &[String],
        estimate_smooth_sd: bool,
        cure: bool,
        cure_covariates: &[String],
        nonprop: &[String],
    ) -> Result<Self, LayoutError> {
        if nvars < 2 {
            return Err(LayoutError::TooFewBasisTerms(nvars));
        }
        let nonprop_columns = nonprop
            .iter()
            .map(|name| {
                covariates
                    .iter()
                    .position(|c| c == name)
                    .ok_or_else(|| LayoutError::UnknownNonPropCovariate(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let cure_covariates: Vec<String> = if cure { cure_covariates.to_vec() } else { Vec::new() };

        let mut next = 0;
        let alpha0 = block(&mut next, 1).start;
        let loghr = block(&mut next, covariates.len());
        let shape_err = block(&mut next, nvars - 1);
        let log_smooth_sd = estimate_smooth_sd.then(|| block(&mut next, 1).start);
        let logit_pcure = cure.then(|| block(&mut next, 1).start);
        let logor_cure = block(&mut next, cure_covariates.len());
        let nph_err = block(&mut next, nonprop.len() * (nvars - 1));
        let log_nph_sd = block(&mut next, nonprop.len());

        let mut names = Vec::with_capacity(next);
        names.push("alpha0".to_string());
        names.extend(covariates.iter().map(|c| format!("loghr[{c}]")));
        names.extend((1..nvars).map(|k| format!("shape_err[{k}]")));
        if log_smooth_sd.is_some() {
            names.push("log_smooth_sd".to_string());
        }
        if logit_pcure.is_some() {
            names.push("logit_pcure".to_string());
        }
        names.extend(cure_covariates.iter().map(|c| format!("logor_cure[{c}]")));
        for c in nonprop {
            names.extend((1..nvars).map(|k| format!("nph_err[{c},{k}]")));
        }
        names.extend(nonprop.iter().map(|c| format!("log_nph_sd[{c}]")));

        Ok(Self {
            nvars,
            covariates: covariates.to_vec(),
            cure_covariates,
            nonprop: nonprop.to_vec(),
            nonprop_columns,
            alpha0,
            loghr,
            shape_err,
            log_smooth_sd,
            logit_pcure,
            logor_cure,
            nph_err,
            log_nph_sd,
            names,
        })
    }

    pub fn dim(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn nvars(&self) -> usize {
        self.nvars
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    pub fn cure_covariates(&self) -> &[String] {
        &self.cure_covariates
    }

    pub fn nonprop(&self) -> &[String] {
        &self.nonprop
    }

    pub fn nonprop_columns(&self) -> &[usize] {
        &self.nonprop_columns
    }

    pub fn has_cure(&self) -> bool {
        self.logit_pcure.is_some()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Splits a flat vector into its blocks. `fixed_log_smooth_sd` stands in
    /// when the smoothing SD is not a free parameter.
    pub fn unpack(&self, theta: &[f64], fixed_log_smooth_sd: f64) -> Result<Parameters, LayoutError> {
        if theta.len() != self.dim() {
            return Err(LayoutError::WrongLength {
                expected: self.dim(),
                found: theta.len(),
            });
        }
        let nph_err = Array2::from_shape_vec(
            (self.nonprop.len(), self.nvars - 1),
            theta[self.nph_err.clone()].to_vec(),
        )
        .map_err(|_| LayoutError::WrongLength {
            expected: self.dim(),
            found: theta.len(),
        })?;
        Ok(Parameters {
            alpha0: theta[self.alpha0],
            loghr: Array1::from(theta[self.loghr.clone()].to_vec()),
            shape_err: Array1::from(theta[self.shape_err.clone()].to_vec()),
            log_smooth_sd: self.log_smooth_sd.map_or(fixed_log_smooth_sd, |i| theta[i]),
            logit_pcure: self.logit_pcure.map(|i| theta[i]),
            logor_cure: Array1::from(theta[self.logor_cure.clone()].to_vec()),
            nph_err,
            log_nph_sd: Array1::from(theta[self.log_nph_sd.clone()].to_vec()),
        })
    }

    /// Starting point for optimisation: zeros except the intercept.
    pub fn default_start(&self, alpha0: f64) -> Array1<f64> {
        let mut start = Array1::zeros(self.dim());
        start[self.alpha0] = alpha0;
        start
    }
}

/// The blocks of one parameter vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameters {
    pub alpha0: f64,
    pub loghr: Array1<f64>,
    pub shape_err: Array1<f64>,
    pub log_smooth_sd: f64,
    pub logit_pcure: Option<f64>,
    pub logor_cure: Array1<f64>,
    /// `[nonprop × (nvars - 1)]`.
    pub nph_err: Array2<f64>,
    pub log_nph_sd: Array1<f64>,
}
