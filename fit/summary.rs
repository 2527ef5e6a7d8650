//! Posterior summaries of distribution functions over a matrix of draws.
//!
//! Each draw is turned into one single-entry `SurvMSpline` per covariate
//! profile; the requested functions are evaluated on it and the results are
//! reduced across draws to a median, an equal-tailed credible interval, a
//! mean and a standard deviation.

use super::layout::{LayoutError, Parameters};
use super::predictor::Predictor;
use crate::basis::MSplineBasis;
use crate::distribution::{DistributionError, SurvMSpline};
use crate::quantile::quantile_counting;
use crate::rmst::{mean_survival_counting, rmst_counting};
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SummaryError {
    #[error("No posterior draws to summarise")]
    NoDraws,
    #[error("Draws have {found} columns but the model has {expected} parameters")]
    DrawWidth { expected: usize, found: usize },
    #[error("Credible interval width must lie in (0, 1), found {0}")]
    InvalidInterval(f64),
    #[error("Profile '{label}' names covariates {found:?}, expected exactly {expected:?}")]
    ProfileMismatch {
        label: String,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{0}")]
    Layout(#[from] LayoutError),
    #[error("{0}")]
    Distribution(#[from] DistributionError),
}

/// A named covariate profile to predict for.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub label: String,
    /// Values of every hazard and cure covariate, by name.
    pub values: BTreeMap<String, f64>,
}

impl Profile {
    pub fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: f64) -> Self {
        self.values.insert(name.to_string(), value);
        self
    }

    /// Every covariate at zero.
    pub fn baseline(predictor: &Predictor) -> Self {
        let mut profile = Self::new("baseline");
        for name in covariate_names(predictor) {
            profile.values.insert(name, 0.0);
        }
        profile
    }
}

/// The union of hazard and cure covariate names, sorted.
fn covariate_names(predictor: &Predictor) -> BTreeSet<String> {
    let layout = predictor.layout();
    layout
        .covariates()
        .iter()
        .chain(layout.cure_covariates())
        .cloned()
        .collect()
}

/// A profile resolved to the model's covariate order.
struct ResolvedProfile {
    x: Array1<f64>,
    x_cure: Array1<f64>,
}

fn resolve(predictor: &Predictor, profile: &Profile) -> Result<ResolvedProfile, SummaryError> {
    let expected = covariate_names(predictor);
    let found: BTreeSet<String> = profile.values.keys().cloned().collect();
    if expected != found {
        return Err(SummaryError::ProfileMismatch {
            label: profile.label.clone(),
            expected: expected.into_iter().collect(),
            found: found.into_iter().collect(),
        });
    }
    let layout = predictor.layout();
    let pick = |names: &[String]| names.iter().map(|n| profile.values[n]).collect::<Array1<f64>>();
    Ok(ResolvedProfile {
        x: pick(layout.covariates()),
        x_cure: pick(layout.cure_covariates()),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Hazard,
    Survival,
    Rmst,
    Mean,
    Quantile,
    HazardRatio,
}

impl Quantity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantity::Hazard => "hazard",
            Quantity::Survival => "survival",
            Quantity::Rmst => "rmst",
            Quantity::Mean => "mean",
            Quantity::Quantile => "quantile",
            Quantity::HazardRatio => "hazard_ratio",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryOptions {
    /// Times for hazard, survival and hazard ratios.
    pub times: Vec<f64>,
    pub rmst_horizons: Vec<f64>,
    /// Probabilities for survival-time quantiles.
    pub probs: Vec<f64>,
    pub mean: bool,
    /// Width of the equal-tailed credible interval.
    pub interval: f64,
    /// Profile that hazard ratios are taken against.
    pub reference: Option<Profile>,
}

impl Default for SummaryOptions {
    fn default() -> Self {
        Self {
            times: Vec::new(),
            rmst_horizons: Vec::new(),
            probs: Vec::new(),
            mean: false,
            interval: 0.95,
            reference: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    pub mean: f64,
    pub sd: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRow {
    pub profile: String,
    pub quantity: Quantity,
    /// Time, horizon or probability; NaN for the mean.
    pub at: f64,
    pub stats: Stats,
}

/// Type-7 sample quantile of sorted values.
fn sorted_quantile(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Reduces one column of draws. NaN values are left out; a column with no
/// other values summarises to NaN.
pub fn summarize_values(values: &[f64], interval: f64) -> Stats {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return Stats {
            median: f64::NAN,
            lower: f64::NAN,
            upper: f64::NAN,
            mean: f64::NAN,
            sd: f64::NAN,
        };
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let sd = if sorted.len() > 1 {
        (sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        f64::NAN
    };
    let tail = (1.0 - interval) / 2.0;
    Stats {
        median: sorted_quantile(&sorted, 0.5),
        lower: sorted_quantile(&sorted, tail),
        upper: sorted_quantile(&sorted, 1.0 - tail),
        mean,
        sd,
    }
}

/// Everything needed to turn one draw into distributions.
struct DrawEvaluator<'a> {
    predictor: &'a Predictor,
    spline: &'a MSplineBasis,
    profiles: Vec<ResolvedProfile>,
    reference: Option<ResolvedProfile>,
    options: &'a SummaryOptions,
}

impl DrawEvaluator<'_> {
    fn distribution(
        &self,
        params: &Parameters,
        beta: &Array1<f64>,
        profile: &ResolvedProfile,
    ) -> Result<SurvMSpline, DistributionError> {
        let alpha = self.predictor.alpha(params, profile.x.view());
        let coefs = self
            .predictor
            .coefs(beta, params, profile.x.view())
            .insert_axis(Axis(0));
        let dist = SurvMSpline::new(self.spline.clone(), Array1::from_elem(1, alpha), coefs)?;
        if self.predictor.layout().has_cure() {
            let pcure = self.predictor.pcure(params, profile.x_cure.view());
            dist.with_cure(Array1::from_elem(1, pcure))
        } else {
            Ok(dist)
        }
    }

    /// All requested values for one draw, profile by profile in the column
    /// order of `columns`. Entries where integration or root finding failed
    /// are NaN and counted in `failures`.
    fn evaluate(
        &self,
        theta: ArrayView1<'_, f64>,
        failures: &AtomicUsize,
    ) -> Result<Vec<f64>, SummaryError> {
        let params = self.predictor.unpack(&theta.to_vec())?;
        let beta = self.predictor.shape_logits(&params);
        let times = Array1::from(self.options.times.clone());
        let reference_hazard = match &self.reference {
            Some(profile) => Some(self.distribution(&params, &beta, profile)?.hazard(times.view())?),
            None => None,
        };

        let mut out = Vec::new();
        let keep = |(values, failed): (Array1<f64>, usize), out: &mut Vec<f64>| {
            failures.fetch_add(failed, Ordering::Relaxed);
            out.extend(values.iter());
        };
        for profile in &self.profiles {
            let dist = self.distribution(&params, &beta, profile)?;
            let hazard = dist.hazard(times.view())?;
            out.extend(hazard.iter());
            out.extend(dist.survival(times.view())?.iter());
            if !self.options.rmst_horizons.is_empty() {
                let horizons = Array1::from(self.options.rmst_horizons.clone());
                keep(rmst_counting(&dist, horizons.view(), 0.0)?, &mut out);
            }
            if self.options.mean {
                keep(mean_survival_counting(&dist)?, &mut out);
            }
            if !self.options.probs.is_empty() {
                let probs = Array1::from(self.options.probs.clone());
                keep(quantile_counting(&dist, probs.view())?, &mut out);
            }
            if let Some(reference) = &reference_hazard {
                out.extend(hazard.iter().zip(reference.iter()).map(|(h, r)| h / r));
            }
        }
        Ok(out)
    }
}

/// The row labels matching `DrawEvaluator::evaluate`'s output order.
fn columns(profiles: &[Profile], options: &SummaryOptions) -> Vec<(String, Quantity, f64)> {
    let mut columns = Vec::new();
    for profile in profiles {
        let mut push = |quantity: Quantity, points: &[f64]| {
            for &at in points {
                columns.push((profile.label.clone(), quantity, at));
            }
        };
        push(Quantity::Hazard, &options.times);
        push(Quantity::Survival, &options.times);
        push(Quantity::Rmst, &options.rmst_horizons);
        if options.mean {
            push(Quantity::Mean, &[f64::NAN]);
        }
        push(Quantity::Quantile, &options.probs);
        if options.reference.is_some() {
            push(Quantity::HazardRatio, &options.times);
        }
    }
    columns
}

/// Summarises hazard, survival and the other requested functions for each
/// profile over the rows of `draws`. Draws are evaluated in parallel.
pub fn summarize(
    predictor: &Predictor,
    spline: &MSplineBasis,
    draws: ArrayView2<'_, f64>,
    profiles: &[Profile],
    options: &SummaryOptions,
) -> Result<Vec<SummaryRow>, SummaryError> {
    if draws.nrows() == 0 {
        return Err(SummaryError::NoDraws);
    }
    let dim = predictor.layout().dim();
    if draws.ncols() != dim {
        return Err(SummaryError::DrawWidth {
            expected: dim,
            found: draws.ncols(),
        });
    }
    if !(options.interval > 0.0 && options.interval < 1.0) {
        return Err(SummaryError::InvalidInterval(options.interval));
    }
    let evaluator = DrawEvaluator {
        predictor,
        spline,
        profiles: profiles
            .iter()
            .map(|p| resolve(predictor, p))
            .collect::<Result<_, _>>()?,
        reference: options
            .reference
            .as_ref()
            .map(|p| resolve(predictor, p))
            .transpose()?,
        options,
    };
    log::info!(
        "Summarising {} draws for {} profiles",
        draws.nrows(),
        profiles.len()
    );

    let failures = AtomicUsize::new(0);
    let per_draw: Vec<Vec<f64>> = (0..draws.nrows())
        .into_par_iter()
        .map(|i| evaluator.evaluate(draws.row(i), &failures))
        .collect::<Result<_, _>>()?;
    let failed = failures.into_inner();
    if failed > 0 {
        log::warn!(
            "Numerical integration or quantile search failed for {} values across {} draws; they are left out of the summaries.",
            failed,
            draws.nrows()
        );
    }

    let mut column = Vec::with_capacity(per_draw.len());
    let rows = columns(profiles, options)
        .into_iter()
        .enumerate()
        .map(|(j, (profile, quantity, at))| {
            column.clear();
            column.extend(per_draw.iter().map(|values| values[j]));
            SummaryRow {
                profile,
                quantity,
                at,
                stats: summarize_values(&column, options.interval),
            }
        })
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::KnotSet;
    use crate::fit::model::ModelSpec;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn type_seven_quantiles_and_moments() {
        let stats = summarize_values(&[5.0, 1.0, 4.0, 2.0, 3.0, f64::NAN], 0.5);
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.lower, 2.0);
        assert_eq!(stats.upper, 4.0);
        assert_eq!(stats.mean, 3.0);
        assert_relative_eq!(stats.sd, 2.5_f64.sqrt(), epsilon = 1e-12);

        let interpolated = summarize_values(&[0.0, 10.0], 0.9);
        assert_relative_eq!(interpolated.lower, 0.5, epsilon = 1e-12);
        assert_relative_eq!(interpolated.upper, 9.5, epsilon = 1e-12);
        assert!(summarize_values(&[f64::NAN], 0.95).median.is_nan());
    }

    fn setup() -> (Predictor, MSplineBasis) {
        let spec = ModelSpec {
            covariates: vec!["arm".to_string()],
            ..ModelSpec::default()
        };
        let spline = MSplineBasis::new(KnotSet::new(vec![0.0, 1.0, 3.0]).unwrap(), 3);
        (spec.predictor(&spline).unwrap(), spline)
    }

    #[test]
    fn identical_draws_collapse_to_the_point_values() {
        let (predictor, spline) = setup();
        let layout = predictor.layout().clone();
        let mut theta = layout.default_start((3.0_f64 * 0.4).ln());
        theta[layout.loghr.start] = 0.5;
        let draws = Array2::from_shape_fn((4, layout.dim()), |(_, j)| theta[j]);
        let options = SummaryOptions {
            times: vec![0.5, 2.0],
            rmst_horizons: vec![2.0],
            probs: vec![0.5],
            mean: true,
            reference: Some(Profile::new("control").with("arm", 0.0)),
            ..SummaryOptions::default()
        };
        let profiles = [Profile::new("treated").with("arm", 1.0)];
        let rows = summarize(&predictor, &spline, draws.view(), &profiles, &options).unwrap();
        assert_eq!(rows.len(), 2 + 2 + 1 + 1 + 1 + 2);

        // Flat hazard 0.4 * exp(0.5) for the treated profile.
        let rate = 0.4 * 0.5_f64.exp();
        let find = |quantity: Quantity| rows.iter().find(|r| r.quantity == quantity).unwrap();
        let survival = rows
            .iter()
            .find(|r| r.quantity == Quantity::Survival && r.at == 2.0)
            .unwrap();
        assert_relative_eq!(find(Quantity::Hazard).stats.median, rate, epsilon = 1e-10);
        assert_relative_eq!(survival.stats.median, (-rate * 2.0).exp(), epsilon = 1e-10);
        assert_relative_eq!(survival.stats.lower, survival.stats.upper, epsilon = 1e-15);
        assert_eq!(survival.stats.sd, 0.0);
        assert_relative_eq!(
            find(Quantity::Rmst).stats.median,
            (1.0 - (-rate * 2.0).exp()) / rate,
            epsilon = 1e-7
        );
        assert_relative_eq!(find(Quantity::Mean).stats.median, 1.0 / rate, epsilon = 1e-6);
        assert_relative_eq!(
            find(Quantity::Quantile).stats.median,
            2.0_f64.ln() / rate,
            epsilon = 1e-8
        );
        for row in rows.iter().filter(|r| r.quantity == Quantity::HazardRatio) {
            assert_relative_eq!(row.stats.median, 0.5_f64.exp(), epsilon = 1e-10);
        }
    }

    #[test]
    fn unreachable_quantiles_are_counted_once_per_value_across_draws() {
        let (predictor, spline) = setup();
        let layout = predictor.layout().clone();
        let mut theta = layout.default_start(1.2_f64.ln());
        // The last coefficient underflows to zero, so survival levels off
        // at exp(-1.2) beyond the upper knot.
        theta[layout.shape_err.end - 1] = -2000.0;
        let options = SummaryOptions {
            times: vec![1.0],
            probs: vec![0.5, 0.9],
            ..SummaryOptions::default()
        };
        let profile = Profile::new("control").with("arm", 0.0);
        let evaluator = DrawEvaluator {
            predictor: &predictor,
            spline: &spline,
            profiles: vec![resolve(&predictor, &profile).unwrap()],
            reference: None,
            options: &options,
        };
        let failures = AtomicUsize::new(0);
        for _ in 0..3 {
            let values = evaluator.evaluate(theta.view(), &failures).unwrap();
            assert!(values[2].is_finite());
            assert!(values[3].is_nan());
        }
        assert_eq!(failures.into_inner(), 3);

        let draws = Array2::from_shape_fn((3, layout.dim()), |(_, j)| theta[j]);
        let rows = summarize(&predictor, &spline, draws.view(), &[profile], &options).unwrap();
        let quantile_at = |p: f64| {
            rows.iter()
                .find(|r| r.quantity == Quantity::Quantile && r.at == p)
                .unwrap()
                .stats
        };
        assert!(quantile_at(0.5).median.is_finite());
        assert!(quantile_at(0.9).median.is_nan());
    }

    #[test]
    fn profiles_must_name_exactly_the_model_covariates() {
        let (predictor, spline) = setup();
        let draws = Array2::zeros((1, predictor.layout().dim()));
        let options = SummaryOptions {
            times: vec![1.0],
            ..SummaryOptions::default()
        };
        let wrong = [Profile::new("typo").with("arms", 1.0)];
        assert!(matches!(
            summarize(&predictor, &spline, draws.view(), &wrong, &options),
            Err(SummaryError::ProfileMismatch { .. })
        ));
        let narrow = Array2::zeros((1, 2));
        assert!(matches!(
            summarize(&predictor, &spline, narrow.view(), &[Profile::baseline(&predictor)], &options),
            Err(SummaryError::DrawWidth { .. })
        ));
    }
}
