use super::data::ModelDataBuilder;
use super::layout::{LayoutError, ParameterLayout, SmoothModel};
use super::predictor::Predictor;
use super::priors::{PriorError, PriorSet};
use crate::basis::{DEFAULT_DEGREE, DEFAULT_DF, KnotSet, MSplineBasis};
use crate::distribution::{DistributionError, SurvMSpline};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid prior specification: {0}")]
    Prior(#[from] PriorError),
    #[error("Invalid parameter layout: {0}")]
    Layout(#[from] LayoutError),
    #[error("The stored hazard is not a valid distribution: {0}")]
    Distribution(#[from] DistributionError),
}

/// The structural choices of a survival model, stored as TOML.
///
/// Every field has a default, so a spec file only needs to name what it
/// changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSpec {
    pub degree: usize,
    /// Number of basis terms when knots are placed automatically.
    pub df: usize,
    /// Explicit knots `[lower, internal..., upper]`; placed from the data
    /// when absent.
    pub knots: Option<KnotSet>,
    pub covariates: Vec<String>,
    pub cure: bool,
    pub cure_covariates: Vec<String>,
    /// Covariates whose effect changes the hazard shape, a subset of
    /// `covariates`.
    pub nonprop: Vec<String>,
    pub smooth_model: SmoothModel,
    pub estimate_smooth_sd: bool,
    pub fixed_smooth_sd: f64,
    pub priors: PriorSet,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            degree: DEFAULT_DEGREE,
            df: DEFAULT_DF,
            knots: None,
            covariates: Vec::new(),
            cure: false,
            cure_covariates: Vec::new(),
            nonprop: Vec::new(),
            smooth_model: SmoothModel::Exchangeable,
            estimate_smooth_sd: false,
            fixed_smooth_sd: 1.0,
            priors: PriorSet::default(),
        }
    }
}

impl ModelSpec {
    /// Checks the priors against the covariate lists.
    pub fn validate(&self) -> Result<(), ModelError> {
        let ncure = if self.cure { self.cure_covariates.len() } else { 0 };
        self.priors.validate(self.covariates.len(), ncure)?;
        if !(self.fixed_smooth_sd.is_finite() && self.fixed_smooth_sd > 0.0) {
            return Err(LayoutError::InvalidSmoothSd(self.fixed_smooth_sd).into());
        }
        Ok(())
    }

    /// A data builder configured with this spec's covariates and knots.
    pub fn data_builder(&self) -> ModelDataBuilder {
        let cure_covariates = if self.cure {
            self.cure_covariates.clone()
        } else {
            Vec::new()
        };
        let builder = ModelDataBuilder::new()
            .covariates(self.covariates.clone())
            .cure_covariates(cure_covariates)
            .degree(self.degree)
            .df(self.df);
        match &self.knots {
            Some(knots) => builder.knots(knots.clone()),
            None => builder,
        }
    }

    pub fn layout(&self, nvars: usize) -> Result<ParameterLayout, LayoutError> {
        ParameterLayout::new(
            nvars,
            &self.covariates,
            self.estimate_smooth_sd,
            self.cure,
            &self.cure_covariates,
            &self.nonprop,
        )
    }

    pub fn predictor(&self, spline: &MSplineBasis) -> Result<Predictor, ModelError> {
        self.validate()?;
        let layout = self.layout(spline.n_basis())?;
        Ok(Predictor::new(
            layout,
            spline,
            self.smooth_model,
            self.fixed_smooth_sd,
        )?)
    }

    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let spec: Self = toml::from_str(&toml_string)?;
        spec.validate()?;
        Ok(spec)
    }
}

/// A single hazard curve: enough to evaluate every distribution function
/// for the baseline profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedHazard {
    pub knots: KnotSet,
    pub degree: usize,
    pub alpha: f64,
    pub coefs: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcure: Option<f64>,
}

impl FittedHazard {
    /// The baseline hazard (all covariates zero) at parameter vector `theta`.
    pub fn from_parameters(
        predictor: &Predictor,
        spline: &MSplineBasis,
        theta: &[f64],
    ) -> Result<Self, ModelError> {
        let params = predictor.unpack(theta)?;
        let layout = predictor.layout();
        let zeros = Array1::zeros(layout.covariates().len());
        let cure_zeros = Array1::zeros(layout.cure_covariates().len());
        let beta = predictor.shape_logits(&params);
        let coefs = predictor.coefs(&beta, &params, zeros.view());
        Ok(Self {
            knots: spline.knots().clone(),
            degree: spline.degree(),
            alpha: predictor.alpha(&params, zeros.view()),
            coefs: coefs.to_vec(),
            pcure: layout
                .has_cure()
                .then(|| predictor.pcure(&params, cure_zeros.view())),
        })
    }

    pub fn spline(&self) -> MSplineBasis {
        MSplineBasis::new(self.knots.clone(), self.degree)
    }

    pub fn to_distribution(&self) -> Result<SurvMSpline, ModelError> {
        let coefs = Array2::from_shape_vec((1, self.coefs.len()), self.coefs.clone())
            .map_err(|_| DistributionError::CoefficientLength {
                expected: self.spline().n_basis(),
                found: self.coefs.len(),
            })?;
        let dist = SurvMSpline::new(self.spline(), Array1::from_elem(1, self.alpha), coefs)?;
        Ok(match self.pcure {
            Some(p) => dist.with_cure(Array1::from_elem(1, p))?,
            None => dist,
        })
    }

    pub fn save(&self, path: &str) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path)?;
        let hazard = toml::from_str(&toml_string)?;
        Ok(hazard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::priors::Prior;
    use approx::assert_relative_eq;
    use ndarray::array;
    use tempfile::tempdir;

    #[test]
    fn model_spec_round_trips_through_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spec.toml");
        let path = path.to_str().unwrap();

        let spec = ModelSpec {
            covariates: vec!["age".to_string(), "arm".to_string()],
            cure: true,
            cure_covariates: vec!["arm".to_string()],
            nonprop: vec!["arm".to_string()],
            knots: Some(KnotSet::new(vec![0.0, 1.0, 3.0, 6.0]).unwrap()),
            smooth_model: SmoothModel::RandomWalk,
            estimate_smooth_sd: true,
            ..ModelSpec::default()
        };
        spec.save(path).unwrap();
        let loaded = ModelSpec::load(path).unwrap();
        assert_eq!(loaded, spec);
    }

    #[test]
    fn sparse_spec_files_take_defaults() {
        let spec: ModelSpec = toml::from_str("covariates = [\"arm\"]\nsmooth_model = \"random_walk\"\n").unwrap();
        assert_eq!(spec.degree, DEFAULT_DEGREE);
        assert_eq!(spec.smooth_model, SmoothModel::RandomWalk);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn invalid_prior_lists_fail_validation() {
        let spec = ModelSpec {
            covariates: vec!["a".to_string(), "b".to_string(), "c".to_string()],
            priors: PriorSet {
                loghr: vec![Prior::normal(0.0, 1.0).unwrap(); 2],
                ..PriorSet::default()
            },
            ..ModelSpec::default()
        };
        assert!(matches!(
            spec.validate(),
            Err(ModelError::Prior(PriorError::ListLength { .. }))
        ));
    }

    #[test]
    fn fitted_hazard_round_trips_and_evaluates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hazard.toml");
        let path = path.to_str().unwrap();

        let spec = ModelSpec {
            cure: true,
            knots: Some(KnotSet::new(vec![0.0, 2.0, 4.0]).unwrap()),
            ..ModelSpec::default()
        };
        let spline = MSplineBasis::new(spec.knots.clone().unwrap(), 3);
        let predictor = spec.predictor(&spline).unwrap();
        let mut theta = predictor.layout().default_start(0.0).to_vec();
        theta[predictor.layout().logit_pcure.unwrap()] = -1.0;

        let hazard = FittedHazard::from_parameters(&predictor, &spline, &theta).unwrap();
        assert_relative_eq!(hazard.coefs.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        hazard.save(path).unwrap();
        let loaded = FittedHazard::load(path).unwrap();
        assert_eq!(loaded, hazard);

        // Constant hazard 1/4 on the boundary range, diluted by the cure fraction.
        let dist = loaded.to_distribution().unwrap();
        let s = dist.survival(array![2.0].view()).unwrap();
        let p = crate::math::sigmoid(-1.0);
        assert_relative_eq!(s[0], p + (1.0 - p) * (-0.5_f64).exp(), epsilon = 1e-10);
    }
}
