//! Delimited-text input: individual follow-up, external survivor counts and
//! posterior draws.
//!
//! Files ending in `.csv` are comma-separated; anything else is read as
//! tab-separated. Columns are found by header name, so their order is free.

use super::data::Observation;
use csv::{ReaderBuilder, StringRecord};
use ndarray::Array2;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Failed to open table: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse table: {0}")]
    Csv(#[from] csv::Error),
    #[error("Required column '{column}' is missing from '{path}'")]
    MissingColumn { column: String, path: String },
    #[error("Invalid value '{value}' in column '{column}' on data row {row}")]
    InvalidValue {
        column: String,
        row: usize,
        value: String,
    },
    #[error("Draw columns {found:?} do not match the model parameters {expected:?}")]
    DrawHeader {
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("Table '{0}' has no data rows")]
    Empty(String),
}

pub fn delimiter_for(path: &str) -> u8 {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("csv") => b',',
        _ => b'\t',
    }
}

/// Column positions resolved from a header row.
struct Columns<'a> {
    path: &'a str,
    header: StringRecord,
}

impl<'a> Columns<'a> {
    fn position(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    fn require(&self, name: &str) -> Result<usize, TableError> {
        self.position(name).ok_or_else(|| TableError::MissingColumn {
            column: name.to_string(),
            path: self.path.to_string(),
        })
    }

    fn require_all(&self, names: &[String]) -> Result<Vec<usize>, TableError> {
        names.iter().map(|n| self.require(n)).collect()
    }
}

fn open(path: &str) -> Result<csv::Reader<File>, TableError> {
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter_for(path))
        .has_headers(true)
        .from_reader(file))
}

fn parse<T: std::str::FromStr>(
    record: &StringRecord,
    header: &StringRecord,
    index: usize,
    row: usize,
) -> Result<T, TableError> {
    let raw = record.get(index).unwrap_or("").trim();
    raw.parse().map_err(|_| TableError::InvalidValue {
        column: header.get(index).unwrap_or("?").to_string(),
        row,
        value: raw.to_string(),
    })
}

fn parse_all(
    record: &StringRecord,
    header: &StringRecord,
    indices: &[usize],
    row: usize,
) -> Result<Vec<f64>, TableError> {
    indices
        .iter()
        .map(|&i| parse(record, header, i, row))
        .collect()
}

/// Individual data: `time`, `status` (1 = event, 0 = censored), an optional
/// `backhaz`, and one column per covariate and cure covariate.
pub fn load_individual(
    path: &str,
    covariates: &[String],
    cure_covariates: &[String],
) -> Result<Vec<Observation>, TableError> {
    let mut reader = open(path)?;
    let columns = Columns {
        path,
        header: reader.headers()?.clone(),
    };
    let time = columns.require("time")?;
    let status = columns.require("status")?;
    let backhaz = columns.position("backhaz");
    let x = columns.require_all(covariates)?;
    let x_cure = columns.require_all(cure_covariates)?;

    let mut observations = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let header = &columns.header;
        let t: f64 = parse(&record, header, time, row + 1)?;
        let observation = match parse::<u8>(&record, header, status, row + 1)? {
            0 => Observation::censored(t),
            1 => {
                let h = match backhaz {
                    Some(i) => parse(&record, header, i, row + 1)?,
                    None => 0.0,
                };
                Observation::event(t).with_background_hazard(h)
            }
            other => {
                return Err(TableError::InvalidValue {
                    column: "status".to_string(),
                    row: row + 1,
                    value: other.to_string(),
                });
            }
        };
        observations.push(
            observation
                .with_covariates(parse_all(&record, header, &x, row + 1)?)
                .with_cure_covariates(parse_all(&record, header, &x_cure, row + 1)?),
        );
    }
    log::info!("Loaded {} individual observations from {}", observations.len(), path);
    Ok(observations)
}

/// External survivor counts: `start`, `stop`, `n`, `r`, optional
/// `backsurv_start` and `backsurv_stop`, and the covariate columns.
pub fn load_external(
    path: &str,
    covariates: &[String],
    cure_covariates: &[String],
) -> Result<Vec<Observation>, TableError> {
    let mut reader = open(path)?;
    let columns = Columns {
        path,
        header: reader.headers()?.clone(),
    };
    let start = columns.require("start")?;
    let stop = columns.require("stop")?;
    let n = columns.require("n")?;
    let r = columns.require("r")?;
    let backsurv = columns
        .position("backsurv_start")
        .zip(columns.position("backsurv_stop"));
    let x = columns.require_all(covariates)?;
    let x_cure = columns.require_all(cure_covariates)?;

    let mut observations = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let header = &columns.header;
        let line = row + 1;
        let mut observation = Observation::external(
            parse(&record, header, start, line)?,
            parse(&record, header, stop, line)?,
            parse(&record, header, n, line)?,
            parse(&record, header, r, line)?,
        );
        if let Some((bs_start, bs_stop)) = backsurv {
            observation = observation.with_background_survival(
                parse(&record, header, bs_start, line)?,
                parse(&record, header, bs_stop, line)?,
            );
        }
        observations.push(
            observation
                .with_covariates(parse_all(&record, header, &x, line)?)
                .with_cure_covariates(parse_all(&record, header, &x_cure, line)?),
        );
    }
    log::info!("Loaded {} external count records from {}", observations.len(), path);
    Ok(observations)
}

/// Posterior draws, one row per draw. The header must list exactly the
/// model's parameter names in layout order.
pub fn load_draws(path: &str, names: &[String]) -> Result<Array2<f64>, TableError> {
    let mut reader = open(path)?;
    let header = reader.headers()?.clone();
    let found: Vec<String> = header.iter().map(|h| h.trim().to_string()).collect();
    if found != names {
        return Err(TableError::DrawHeader {
            expected: names.to_vec(),
            found,
        });
    }
    let indices: Vec<usize> = (0..names.len()).collect();
    let mut values = Vec::new();
    let mut rows = 0;
    for (row, record) in reader.records().enumerate() {
        values.extend(parse_all(&record?, &header, &indices, row + 1)?);
        rows += 1;
    }
    if rows == 0 {
        return Err(TableError::Empty(path.to_string()));
    }
    log::info!("Loaded {} posterior draws of {} parameters", rows, names.len());
    Array2::from_shape_vec((rows, names.len()), values).map_err(|_| TableError::Empty(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::data::ObservationKind;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn individual_rows_become_events_and_censorings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.tsv");
        fs::write(&path, "arm\ttime\tstatus\n1\t0.5\t1\n0\t2.0\t0\n").unwrap();
        let obs = load_individual(path.to_str().unwrap(), &["arm".to_string()], &[]).unwrap();
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].kind, ObservationKind::Event { time: 0.5, backhaz: 0.0 });
        assert_eq!(obs[0].covariates, vec![1.0]);
        assert_eq!(obs[1].kind, ObservationKind::RightCensored { time: 2.0 });
    }

    #[test]
    fn bad_status_and_missing_columns_are_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("obs.tsv");
        fs::write(&path, "time\tstatus\n1.0\t2\n").unwrap();
        assert!(matches!(
            load_individual(path.to_str().unwrap(), &[], &[]),
            Err(TableError::InvalidValue { row: 1, .. })
        ));
        assert!(matches!(
            load_individual(path.to_str().unwrap(), &["age".to_string()], &[]),
            Err(TableError::MissingColumn { .. })
        ));
    }

    #[test]
    fn external_counts_read_background_survival() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ext.csv");
        fs::write(
            &path,
            "start,stop,n,r,backsurv_start,backsurv_stop\n2,5,100,80,0.99,0.95\n",
        )
        .unwrap();
        let obs = load_external(path.to_str().unwrap(), &[], &[]).unwrap();
        assert_eq!(
            obs[0].kind,
            ObservationKind::ExternalCount {
                start: 2.0,
                stop: 5.0,
                n_start: 100,
                r_stop: 80,
                backsurv_start: 0.99,
                backsurv_stop: 0.95,
            }
        );
    }

    #[test]
    fn draw_headers_must_match_the_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("draws.csv");
        fs::write(&path, "alpha0,shape_err[1]\n0.1,0.2\n0.3,0.4\n").unwrap();
        let names = vec!["alpha0".to_string(), "shape_err[1]".to_string()];
        let draws = load_draws(path.to_str().unwrap(), &names).unwrap();
        assert_eq!(draws.dim(), (2, 2));
        assert_eq!(draws[[1, 0]], 0.3);

        let reordered = vec!["shape_err[1]".to_string(), "alpha0".to_string()];
        assert!(matches!(
            load_draws(path.to_str().unwrap(), &reordered),
            Err(TableError::DrawHeader { .. })
        ));
    }
}
