//! Observations and their preparation into basis and covariate matrices.
//!
//! Three kinds of evidence enter the likelihood: exact event times,
//! right-censored follow-up, and external aggregate counts of the form "of
//! `n` people alive at `start`, `r` were still alive at `stop`".

use crate::basis::{BasisError, BasisKind, KnotSet, MSplineBasis, default_knots};
use ndarray::{Array1, Array2, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("no observations were supplied")]
    NoObservations,
    #[error("observation {index}: time {time} must be finite and {requirement}")]
    InvalidTime {
        index: usize,
        time: f64,
        requirement: &'static str,
    },
    #[error("observation {index}: external interval [{start}, {stop}] must satisfy 0 <= start < stop < inf")]
    InvalidInterval { index: usize, start: f64, stop: f64 },
    #[error("observation {index}: {r} survivors out of {n} at risk is impossible")]
    InvalidCounts { index: usize, n: u64, r: u64 },
    #[error("observation {index}: {which} has {found} values, expected {expected}")]
    CovariateLength {
        index: usize,
        which: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("observation {index}: {which} contains a non-finite value")]
    NonFiniteCovariate { index: usize, which: &'static str },
    #[error("observation {index}: background {which} {value} is out of range")]
    InvalidBackground {
        index: usize,
        which: &'static str,
        value: f64,
    },
    #[error("basis error: {0}")]
    Basis(#[from] BasisError),
}

/// What was observed for one individual or one external summary.
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationKind {
    /// Failure at `time`; `backhaz` is the background hazard at that time
    /// (zero without relative survival).
    Event { time: f64, backhaz: f64 },
    /// Last seen alive at `time`.
    RightCensored { time: f64 },
    /// `r_stop` of the `n_start` alive at `start` survived to `stop`. The
    /// background survival probabilities at both ends scale the ratio.
    ExternalCount {
        start: f64,
        stop: f64,
        n_start: u64,
        r_stop: u64,
        backsurv_start: f64,
        backsurv_stop: f64,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub kind: ObservationKind,
    /// Values of the hazard covariates, in the model's covariate order.
    pub covariates: Vec<f64>,
    /// Values of the cure covariates.
    pub cure_covariates: Vec<f64>,
}

impl Observation {
    pub fn event(time: f64) -> Self {
        Self::from_kind(ObservationKind::Event { time, backhaz: 0.0 })
    }

    pub fn censored(time: f64) -> Self {
        Self::from_kind(ObservationKind::RightCensored { time })
    }

    pub fn external(start: f64, stop: f64, n_start: u64, r_stop: u64) -> Self {
        Self::from_kind(ObservationKind::ExternalCount {
            start,
            stop,
            n_start,
            r_stop,
            backsurv_start: 1.0,
            backsurv_stop: 1.0,
        })
    }

    fn from_kind(kind: ObservationKind) -> Self {
        Self {
            kind,
            covariates: Vec::new(),
            cure_covariates: Vec::new(),
        }
    }

    pub fn with_covariates(mut self, values: Vec<f64>) -> Self {
        self.covariates = values;
        self
    }

    pub fn with_cure_covariates(mut self, values: Vec<f64>) -> Self {
        self.cure_covariates = values;
        self
    }

    /// Background hazard at the event time. Ignored for other kinds.
    pub fn with_background_hazard(mut self, value: f64) -> Self {
        if let ObservationKind::Event { backhaz, .. } = &mut self.kind {
            *backhaz = value;
        }
        self
    }

    /// Background survival at the ends of an external interval. Ignored for
    /// other kinds.
    pub fn with_background_survival(mut self, at_start: f64, at_stop: f64) -> Self {
        if let ObservationKind::ExternalCount {
            backsurv_start,
            backsurv_stop,
            ..
        } = &mut self.kind
        {
            *backsurv_start = at_start;
            *backsurv_stop = at_stop;
        }
        self
    }

    fn follow_up(&self) -> f64 {
        match self.kind {
            ObservationKind::Event { time, .. } | ObservationKind::RightCensored { time } => time,
            ObservationKind::ExternalCount { stop, .. } => stop,
        }
    }
}

/// Event rows: hazard and cumulative hazard basis at the event time.
#[derive(Debug, Clone)]
pub struct EventBlock {
    pub basis: Array2<f64>,
    pub ibasis: Array2<f64>,
    pub x: Array2<f64>,
    pub x_cure: Array2<f64>,
    pub backhaz: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct CensoredBlock {
    pub ibasis: Array2<f64>,
    pub x: Array2<f64>,
    pub x_cure: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct ExternalBlock {
    pub ibasis_start: Array2<f64>,
    pub ibasis_stop: Array2<f64>,
    pub x: Array2<f64>,
    pub x_cure: Array2<f64>,
    pub n_start: Vec<u64>,
    pub r_stop: Vec<u64>,
    pub backsurv_start: Array1<f64>,
    pub backsurv_stop: Array1<f64>,
}

/// Everything the likelihood needs, with one block per observation class.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub spline: MSplineBasis,
    pub covariates: Vec<String>,
    pub cure_covariates: Vec<String>,
    /// Summed follow-up time of the individual records.
    pub exposure: f64,
    pub events: EventBlock,
    pub censored: CensoredBlock,
    pub external: ExternalBlock,
}

impl ModelData {
    /// Events per unit of individual follow-up, if there is any.
    pub fn crude_rate(&self) -> Option<f64> {
        let events = self.events.x.nrows();
        (events > 0 && self.exposure > 0.0).then(|| events as f64 / self.exposure)
    }

    pub fn n_observations(&self) -> usize {
        self.events.x.nrows() + self.censored.x.nrows() + self.external.x.nrows()
    }

    /// Whether any record carries background mortality.
    pub fn has_background(&self) -> bool {
        self.events.backhaz.iter().any(|&h| h > 0.0)
            || self.external.backsurv_start.iter().any(|&s| s < 1.0)
            || self.external.backsurv_stop.iter().any(|&s| s < 1.0)
    }
}

/// Turns a list of [`Observation`]s into a [`ModelData`].
///
/// Without explicit knots, internal knots go at quantiles of the event
/// times and the upper boundary at the longest follow-up, individual or
/// external.
#[derive(Debug, Clone)]
pub struct ModelDataBuilder {
    covariates: Vec<String>,
    cure_covariates: Vec<String>,
    knots: Option<KnotSet>,
    degree: usize,
    df: usize,
}

impl Default for ModelDataBuilder {
    fn default() -> Self {
        Self {
            covariates: Vec::new(),
            cure_covariates: Vec::new(),
            knots: None,
            degree: crate::basis::DEFAULT_DEGREE,
            df: crate::basis::DEFAULT_DF,
        }
    }
}

fn check_row(
    index: usize,
    which: &'static str,
    values: &[f64],
    expected: usize,
) -> Result<(), DataError> {
    if values.len() != expected {
        return Err(DataError::CovariateLength {
            index,
            which,
            expected,
            found: values.len(),
        });
    }
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteCovariate { index, which });
    }
    Ok(())
}

fn fill_rows(rows: &[&[f64]], ncols: usize) -> Array2<f64> {
    let mut matrix = Array2::zeros((rows.len(), ncols));
    for (mut target, source) in matrix.rows_mut().into_iter().zip(rows) {
        for (slot, &value) in target.iter_mut().zip(source.iter()) {
            *slot = value;
        }
    }
    matrix
}

impl ModelDataBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn covariates(mut self, names: Vec<String>) -> Self {
        self.covariates = names;
        self
    }

    pub fn cure_covariates(mut self, names: Vec<String>) -> Self {
        self.cure_covariates = names;
        self
    }

    pub fn knots(mut self, knots: KnotSet) -> Self {
        self.knots = Some(knots);
        self
    }

    pub fn degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn df(mut self, df: usize) -> Self {
        self.df = df;
        self
    }

    fn validate(&self, index: usize, obs: &Observation) -> Result<(), DataError> {
        check_row(index, "covariates", &obs.covariates, self.covariates.len())?;
        check_row(index, "cure covariates", &obs.cure_covariates, self.cure_covariates.len())?;
        match obs.kind {
            ObservationKind::Event { time, backhaz } => {
                if !(time.is_finite() && time > 0.0) {
                    return Err(DataError::InvalidTime {
                        index,
                        time,
                        requirement: "positive",
                    });
                }
                if !(backhaz.is_finite() && backhaz >= 0.0) {
                    return Err(DataError::InvalidBackground {
                        index,
                        which: "hazard",
                        value: backhaz,
                    });
                }
            }
            ObservationKind::RightCensored { time } => {
                if !(time.is_finite() && time >= 0.0) {
                    return Err(DataError::InvalidTime {
                        index,
                        time,
                        requirement: "non-negative",
                    });
                }
            }
            ObservationKind::ExternalCount {
                start,
                stop,
                n_start,
                r_stop,
                backsurv_start,
                backsurv_stop,
            } => {
                if !(start >= 0.0 && start < stop && stop.is_finite()) {
                    return Err(DataError::InvalidInterval { index, start, stop });
                }
                if r_stop > n_start {
                    return Err(DataError::InvalidCounts {
                        index,
                        n: n_start,
                        r: r_stop,
                    });
                }
                for value in [backsurv_start, backsurv_stop] {
                    if !(value > 0.0 && value <= 1.0) {
                        return Err(DataError::InvalidBackground {
                            index,
                            which: "survival",
                            value,
                        });
                    }
                }
            }
        }
        Ok(())
    }

    fn place_knots(&self, observations: &[Observation]) -> Result<KnotSet, DataError> {
        if let Some(knots) = &self.knots {
            return Ok(knots.clone());
        }
        let event_times: Vec<f64> = observations
            .iter()
            .filter_map(|obs| match obs.kind {
                ObservationKind::Event { time, .. } => Some(time),
                _ => None,
            })
            .collect();
        let knots = default_knots(ArrayView1::from(event_times.as_slice()), self.df, self.degree)?;
        let longest = observations
            .iter()
            .map(Observation::follow_up)
            .fold(knots.upper(), f64::max);
        if longest > knots.upper() {
            log::debug!(
                "Extending the upper boundary knot from {} to the longest follow-up {}",
                knots.upper(),
                longest
            );
            return Ok(KnotSet::from_parts(knots.internal(), &[knots.lower(), longest])?);
        }
        Ok(knots)
    }

    pub fn build(self, observations: &[Observation]) -> Result<ModelData, DataError> {
        if observations.is_empty() {
            return Err(DataError::NoObservations);
        }
        for (index, obs) in observations.iter().enumerate() {
            self.validate(index, obs)?;
        }
        let knots = self.place_knots(observations)?;
        let spline = MSplineBasis::new(knots, self.degree);
        let ncovs = self.covariates.len();
        let ncure = self.cure_covariates.len();

        let mut event_times = Vec::new();
        let mut event_backhaz = Vec::new();
        let mut event_rows: (Vec<&[f64]>, Vec<&[f64]>) = (Vec::new(), Vec::new());
        let mut censored_times = Vec::new();
        let mut censored_rows: (Vec<&[f64]>, Vec<&[f64]>) = (Vec::new(), Vec::new());
        let mut ext_start = Vec::new();
        let mut ext_stop = Vec::new();
        let mut ext_n = Vec::new();
        let mut ext_r = Vec::new();
        let mut ext_bs_start = Vec::new();
        let mut ext_bs_stop = Vec::new();
        let mut ext_rows: (Vec<&[f64]>, Vec<&[f64]>) = (Vec::new(), Vec::new());

        for obs in observations {
            let rows = match obs.kind {
                ObservationKind::Event { time, backhaz } => {
                    event_times.push(time);
                    event_backhaz.push(backhaz);
                    &mut event_rows
                }
                ObservationKind::RightCensored { time } => {
                    censored_times.push(time);
                    &mut censored_rows
                }
                ObservationKind::ExternalCount {
                    start,
                    stop,
                    n_start,
                    r_stop,
                    backsurv_start,
                    backsurv_stop,
                } => {
                    ext_start.push(start);
                    ext_stop.push(stop);
                    ext_n.push(n_start);
                    ext_r.push(r_stop);
                    ext_bs_start.push(backsurv_start);
                    ext_bs_stop.push(backsurv_stop);
                    &mut ext_rows
                }
            };
            rows.0.push(&obs.covariates);
            rows.1.push(&obs.cure_covariates);
        }

        let event_times = Array1::from(event_times);
        let censored_times = Array1::from(censored_times);
        let ext_start = Array1::from(ext_start);
        let ext_stop = Array1::from(ext_stop);

        log::info!(
            "Prepared {} events, {} censored and {} external records on {} basis terms",
            event_times.len(),
            censored_times.len(),
            ext_start.len(),
            spline.n_basis()
        );

        let exposure = event_times.sum() + censored_times.sum();
        Ok(ModelData {
            exposure,
            events: EventBlock {
                basis: spline.evaluate(event_times.view(), BasisKind::Hazard),
                ibasis: spline.evaluate(event_times.view(), BasisKind::CumulativeHazard),
                x: fill_rows(&event_rows.0, ncovs),
                x_cure: fill_rows(&event_rows.1, ncure),
                backhaz: Array1::from(event_backhaz),
            },
            censored: CensoredBlock {
                ibasis: spline.evaluate(censored_times.view(), BasisKind::CumulativeHazard),
                x: fill_rows(&censored_rows.0, ncovs),
                x_cure: fill_rows(&censored_rows.1, ncure),
            },
            external: ExternalBlock {
                ibasis_start: spline.evaluate(ext_start.view(), BasisKind::CumulativeHazard),
                ibasis_stop: spline.evaluate(ext_stop.view(), BasisKind::CumulativeHazard),
                x: fill_rows(&ext_rows.0, ncovs),
                x_cure: fill_rows(&ext_rows.1, ncure),
                n_start: ext_n,
                r_stop: ext_r,
                backsurv_start: Array1::from(ext_bs_start),
                backsurv_stop: Array1::from(ext_bs_stop),
            },
            spline,
            covariates: self.covariates,
            cure_covariates: self.cure_covariates,
        })
    }
}
