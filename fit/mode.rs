use super::likelihood::{LikelihoodError, LogDensity};
use ndarray::Array1;
use thiserror::Error;
use wolfe_bfgs::{Bfgs, BfgsSolution};

/// Cost returned to the line search where the log-density is not finite.
const NON_FINITE_COST: f64 = 1e10;

#[derive(Error, Debug)]
pub enum ModeError {
    #[error("Starting point has {found} parameters but the density has {expected}")]
    StartLength { expected: usize, found: usize },

    #[error("Log-density at the starting point is not finite: {0}. Cannot start BFGS optimization.")]
    NonFiniteStart(f64),

    #[error("Log-density evaluation failed: {0}")]
    Density(#[from] LikelihoodError),

    #[error("BFGS optimization failed to converge: {0}")]
    OptimizationFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModeOptions {
    /// Gradient-norm tolerance passed to BFGS.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for ModeOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-5,
            max_iterations: 1000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModeResult {
    pub point: Array1<f64>,
    pub log_density: f64,
    pub iterations: usize,
}

/// Maximises a log-density with BFGS on its negative, using the density's
/// own gradient.
pub fn find_mode<D>(density: &D, start: Array1<f64>, options: &ModeOptions) -> Result<ModeResult, ModeError>
where
    D: LogDensity + ?Sized,
{
    if start.len() != density.dim() {
        return Err(ModeError::StartLength {
            expected: density.dim(),
            found: start.len(),
        });
    }
    let initial = density.log_density(&start.to_vec())?;
    if !initial.is_finite() {
        return Err(ModeError::NonFiniteStart(initial));
    }
    log::info!(
        "Searching for the posterior mode over {} parameters; initial log-density {:.6}",
        density.dim(),
        initial
    );

    let cost_and_grad = |theta: &Array1<f64>| -> (f64, Array1<f64>) {
        let point = theta.to_vec();
        let cost = match density.log_density(&point) {
            Ok(value) if value.is_finite() => -value,
            Ok(value) => {
                log::warn!("Non-finite log-density encountered: {}, returning large finite cost", value);
                NON_FINITE_COST
            }
            Err(e) => {
                log::warn!("Log-density evaluation failed: {}, returning large finite cost", e);
                NON_FINITE_COST
            }
        };
        let grad = density
            .gradient(&point)
            .map(|g| {
                g.into_iter()
                    .map(|v| if v.is_finite() { -v } else { 0.0 })
                    .collect::<Array1<f64>>()
            })
            .unwrap_or_else(|_| Array1::zeros(point.len()));
        (cost, grad)
    };

    let BfgsSolution {
        final_point,
        final_value,
        iterations,
        ..
    } = Bfgs::new(start, cost_and_grad)
        .with_tolerance(options.tolerance)
        .with_max_iterations(options.max_iterations)
        .run()
        .map_err(|e| ModeError::OptimizationFailed(format!("BFGS failed: {:?}", e)))?;

    log::info!(
        "BFGS completed in {} iterations with log-density {:.6}",
        iterations,
        -final_value
    );
    Ok(ModeResult {
        point: final_point,
        log_density: -final_value,
        iterations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::KnotSet;
    use crate::fit::data::Observation;
    use crate::fit::likelihood::SurvivalPosterior;
    use crate::fit::model::{FittedHazard, ModelSpec};
    use crate::fit::priors::{Prior, PriorSet};
    use approx::assert_relative_eq;
    use ndarray::array;

    struct Gaussian {
        mean: [f64; 2],
    }

    impl LogDensity for Gaussian {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".to_string(), "y".to_string()]
        }

        fn log_density(&self, theta: &[f64]) -> Result<f64, LikelihoodError> {
            let dx = theta[0] - self.mean[0];
            let dy = theta[1] - self.mean[1];
            Ok(-0.5 * (dx * dx + 4.0 * dy * dy + dx * dy))
        }
    }

    #[test]
    fn finds_the_mean_of_a_correlated_gaussian() {
        let density = Gaussian { mean: [1.5, -2.0] };
        let mode = find_mode(&density, array![0.0, 0.0], &ModeOptions::default()).unwrap();
        assert_relative_eq!(mode.point[0], 1.5, epsilon = 1e-4);
        assert_relative_eq!(mode.point[1], -2.0, epsilon = 1e-4);
        assert!(mode.log_density <= 0.0);
        assert!(mode.log_density > -1e-6);
    }

    #[test]
    fn rejects_a_start_of_the_wrong_length() {
        let density = Gaussian { mean: [0.0, 0.0] };
        assert!(matches!(
            find_mode(&density, array![0.0], &ModeOptions::default()),
            Err(ModeError::StartLength { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn recovers_an_exponential_rate() {
        // Exponential quantiles with rate 0.5, administratively censored at 5.
        let rate: f64 = 0.5;
        let n = 200;
        let observations: Vec<Observation> = (1..=n)
            .map(|i| {
                let u = (i as f64 - 0.5) / n as f64;
                let t = -(1.0 - u).ln() / rate;
                if t < 5.0 {
                    Observation::event(t)
                } else {
                    Observation::censored(5.0)
                }
            })
            .collect();
        let spec = ModelSpec {
            knots: Some(KnotSet::new(vec![0.0, 1.0, 2.0, 5.0]).unwrap()),
            priors: PriorSet {
                alpha0: Prior::None,
                ..PriorSet::default()
            },
            ..ModelSpec::default()
        };
        let data = spec.data_builder().build(&observations).unwrap();
        let spline = data.spline.clone();
        let posterior = SurvivalPosterior::new(&spec, data).unwrap();
        let start = posterior.default_start();
        let mode = find_mode(&posterior, start, &ModeOptions::default()).unwrap();

        let fitted = FittedHazard::from_parameters(posterior.predictor(), &spline, mode.point.as_slice().unwrap())
            .unwrap()
            .to_distribution()
            .unwrap();
        let hazard = fitted.hazard(array![0.5, 1.5, 3.0, 4.5].view()).unwrap();
        for h in hazard.iter() {
            assert_relative_eq!(*h, rate, max_relative = 0.15);
        }
    }
}
