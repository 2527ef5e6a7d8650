//! Prior distributions for the model parameters.
//!
//! `Prior` is a closed set of families. Constructors validate their
//! parameters, and [`Prior::validate`] re-checks values that arrived through
//! deserialisation. Log-densities include their normalising constants so the
//! posterior can be compared across models.

use crate::math::{log_sigmoid, sigmoid};
use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriorError {
    #[error("{family} prior parameter '{parameter}' must be finite and positive, found {value}")]
    NonPositive {
        family: &'static str,
        parameter: &'static str,
        value: f64,
    },
    #[error("{family} prior parameter '{parameter}' must be finite, found {value}")]
    NonFinite {
        family: &'static str,
        parameter: &'static str,
        value: f64,
    },
    #[error("a {family} prior cannot be used for {role}")]
    UnsupportedFamily {
        role: &'static str,
        family: &'static str,
    },
    #[error("{role} priors must be given once or once per covariate ({expected}), found {found}")]
    ListLength {
        role: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum Prior {
    /// Improper flat prior; contributes nothing.
    None,
    Normal {
        location: f64,
        scale: f64,
    },
    StudentT {
        location: f64,
        scale: f64,
        df: f64,
    },
    Beta {
        a: f64,
        b: f64,
    },
    Gamma {
        shape: f64,
        rate: f64,
    },
}

fn positive(family: &'static str, parameter: &'static str, value: f64) -> Result<(), PriorError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PriorError::NonPositive {
            family,
            parameter,
            value,
        })
    }
}

fn finite(family: &'static str, parameter: &'static str, value: f64) -> Result<(), PriorError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(PriorError::NonFinite {
            family,
            parameter,
            value,
        })
    }
}

fn ln_beta(a: f64, b: f64) -> f64 {
    ln_gamma(a) + ln_gamma(b) - ln_gamma(a + b)
}

impl Prior {
    pub fn normal(location: f64, scale: f64) -> Result<Self, PriorError> {
        let prior = Prior::Normal { location, scale };
        prior.validate()?;
        Ok(prior)
    }

    pub fn student_t(location: f64, scale: f64, df: f64) -> Result<Self, PriorError> {
        let prior = Prior::StudentT {
            location,
            scale,
            df,
        };
        prior.validate()?;
        Ok(prior)
    }

    pub fn beta(a: f64, b: f64) -> Result<Self, PriorError> {
        let prior = Prior::Beta { a, b };
        prior.validate()?;
        Ok(prior)
    }

    pub fn gamma(shape: f64, rate: f64) -> Result<Self, PriorError> {
        let prior = Prior::Gamma { shape, rate };
        prior.validate()?;
        Ok(prior)
    }

    pub fn family(&self) -> &'static str {
        match self {
            Prior::None => "flat",
            Prior::Normal { .. } => "normal",
            Prior::StudentT { .. } => "student-t",
            Prior::Beta { .. } => "beta",
            Prior::Gamma { .. } => "gamma",
        }
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        let family = self.family();
        match *self {
            Prior::None => Ok(()),
            Prior::Normal { location, scale } => {
                finite(family, "location", location)?;
                positive(family, "scale", scale)
            }
            Prior::StudentT {
                location,
                scale,
                df,
            } => {
                finite(family, "location", location)?;
                positive(family, "scale", scale)?;
                positive(family, "df", df)
            }
            Prior::Beta { a, b } => {
                positive(family, "a", a)?;
                positive(family, "b", b)
            }
            Prior::Gamma { shape, rate } => {
                positive(family, "shape", shape)?;
                positive(family, "rate", rate)
            }
        }
    }

    /// Log-density at `x` on the natural scale of the parameter.
    pub fn logpdf(&self, x: f64) -> f64 {
        match *self {
            Prior::None => 0.0,
            Prior::Normal { location, scale } => {
                let z = (x - location) / scale;
                -0.5 * z * z - scale.ln() - 0.5 * (2.0 * PI).ln()
            }
            Prior::StudentT {
                location,
                scale,
                df,
            } => {
                let z = (x - location) / scale;
                ln_gamma(0.5 * (df + 1.0)) - ln_gamma(0.5 * df) - 0.5 * (df * PI).ln() - scale.ln()
                    - 0.5 * (df + 1.0) * (z * z / df).ln_1p()
            }
            Prior::Beta { a, b } => {
                if !(0.0..=1.0).contains(&x) {
                    return f64::NEG_INFINITY;
                }
                (a - 1.0) * x.ln() + (b - 1.0) * (-x).ln_1p() - ln_beta(a, b)
            }
            Prior::Gamma { shape, rate } => {
                if x < 0.0 {
                    return f64::NEG_INFINITY;
                }
                shape * rate.ln() - ln_gamma(shape) + (shape - 1.0) * x.ln() - rate * x
            }
        }
    }

    /// Log-density of `u = log(x)`, including the Jacobian `+u`.
    pub fn logpdf_log(&self, u: f64) -> f64 {
        match *self {
            Prior::Gamma { shape, rate } => {
                shape * rate.ln() - ln_gamma(shape) + shape * u - rate * u.exp()
            }
            Prior::None => u,
            _ => self.logpdf(u.exp()) + u,
        }
    }

    /// Log-density of `z = logit(p)`, including the Jacobian
    /// `log p + log(1 - p)`.
    pub fn logpdf_logit(&self, z: f64) -> f64 {
        let log_p = log_sigmoid(z);
        let log_q = log_sigmoid(-z);
        match *self {
            Prior::Beta { a, b } => a * log_p + b * log_q - ln_beta(a, b),
            Prior::None => log_p + log_q,
            _ => self.logpdf(sigmoid(z)) + log_p + log_q,
        }
    }
}

/// Priors for every parameter block of the survival model.
///
/// Per-covariate lists (`loghr`, `logor_cure`) hold either one prior shared by
/// all covariates or exactly one prior per covariate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriorSet {
    /// Log-hazard intercept.
    pub alpha0: Prior,
    pub loghr: Vec<Prior>,
    /// Smoothing SD of the spline coefficient logits, when estimated.
    pub smooth_sd: Prior,
    pub pcure: Prior,
    pub logor_cure: Vec<Prior>,
    /// Scale of the non-proportional hazards deviations.
    pub nph_sd: Prior,
}

impl Default for PriorSet {
    fn default() -> Self {
        Self {
            alpha0: Prior::Normal {
                location: 0.0,
                scale: 20.0,
            },
            loghr: vec![Prior::Normal {
                location: 0.0,
                scale: 2.5,
            }],
            smooth_sd: Prior::Gamma {
                shape: 2.0,
                rate: 1.0,
            },
            pcure: Prior::Beta { a: 1.0, b: 1.0 },
            logor_cure: vec![Prior::Normal {
                location: 0.0,
                scale: 2.5,
            }],
            nph_sd: Prior::Gamma {
                shape: 2.0,
                rate: 1.0,
            },
        }
    }
}

fn check_family(role: &'static str, prior: &Prior, allowed: &[&'static str]) -> Result<(), PriorError> {
    prior.validate()?;
    if allowed.contains(&prior.family()) {
        Ok(())
    } else {
        Err(PriorError::UnsupportedFamily {
            role,
            family: prior.family(),
        })
    }
}

fn check_list(role: &'static str, priors: &[Prior], expected: usize) -> Result<(), PriorError> {
    if priors.len() != 1 && priors.len() != expected {
        return Err(PriorError::ListLength {
            role,
            expected,
            found: priors.len(),
        });
    }
    for prior in priors {
        check_family(role, prior, LOCATION_FAMILIES)?;
    }
    Ok(())
}

const LOCATION_FAMILIES: &[&str] = &["flat", "normal", "student-t"];

impl PriorSet {
    /// Checks every prior's parameters, families and list lengths.
    pub fn validate(&self, ncovs: usize, ncurecovs: usize) -> Result<(), PriorError> {
        check_family("alpha0", &self.alpha0, LOCATION_FAMILIES)?;
        check_list("loghr", &self.loghr, ncovs)?;
        check_family("smooth_sd", &self.smooth_sd, &["gamma"])?;
        check_family("pcure", &self.pcure, &["flat", "beta"])?;
        check_list("logor_cure", &self.logor_cure, ncurecovs)?;
        check_family("nph_sd", &self.nph_sd, &["gamma"])
    }

    /// The prior for log hazard ratio `j`, recycling a single shared prior.
    pub fn loghr_for(&self, j: usize) -> &Prior {
        &self.loghr[j % self.loghr.len()]
    }

    pub fn logor_cure_for(&self, j: usize) -> &Prior {
        &self.logor_cure[j % self.logor_cure.len()]
    }
}
