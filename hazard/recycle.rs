//! Recycling of vectorised distribution arguments.
//!
//! Every public distribution function takes a vector of times (or
//! probabilities) together with per-entry parameters of possibly different
//! lengths. Shorter arguments are recycled to the length of the longest one.
//! [`Recycled`] is the explicit record of that alignment: the common length,
//! and a validity mask marking entries with a missing (NaN) input, whose
//! output is NaN without being evaluated.

use crate::distribution::SurvMSpline;
use ndarray::{Array1, ArrayView1};
use rayon::prelude::*;

/// One fully-resolved entry of a vectorised call.
#[derive(Debug, Clone)]
pub struct Entry<'a> {
    /// The time or probability being evaluated.
    pub value: f64,
    pub alpha: f64,
    pub coefs: ArrayView1<'a, f64>,
    /// Zero when the cure model is not in use.
    pub pcure: f64,
    /// Background hazard at `value`; zero when absent.
    pub offset_hazard: f64,
    /// Background cumulative hazard at `value`; zero when absent.
    pub offset_cumhaz: f64,
}

/// The aligned view of a vectorised call.
#[derive(Debug)]
pub struct Recycled<'a> {
    values: ArrayView1<'a, f64>,
    dist: &'a SurvMSpline,
    len: usize,
    valid: Vec<bool>,
}

#[inline]
fn pick(values: &Array1<f64>, i: usize) -> f64 {
    values[i % values.len()]
}

impl<'a> Recycled<'a> {
    pub fn new(values: ArrayView1<'a, f64>, dist: &'a SurvMSpline) -> Self {
        let mut lengths = vec![values.len(), dist.alpha().len(), dist.coefs().nrows()];
        if let Some(pcure) = dist.pcure() {
            lengths.push(pcure.len());
        }
        if let Some((hazard, cumhaz)) = dist.background() {
            lengths.push(hazard.len());
            lengths.push(cumhaz.len());
        }
        let len = if lengths.contains(&0) {
            0
        } else {
            lengths.iter().copied().max().unwrap_or(0)
        };

        let mut recycled = Self {
            values,
            dist,
            len,
            valid: Vec::with_capacity(len),
        };
        let mask: Vec<bool> = (0..len)
            .map(|i| {
                let entry = recycled.raw_entry(i);
                !(entry.value.is_nan()
                    || entry.alpha.is_nan()
                    || entry.pcure.is_nan()
                    || entry.offset_hazard.is_nan()
                    || entry.offset_cumhaz.is_nan()
                    || entry.coefs.iter().any(|c| c.is_nan()))
            })
            .collect();
        recycled.valid = mask;
        recycled
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of entries that will actually be evaluated.
    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }

    fn raw_entry(&self, i: usize) -> Entry<'a> {
        let dist: &'a SurvMSpline = self.dist;
        let coefs = dist.coefs();
        let row = i % coefs.nrows();
        let (offset_hazard, offset_cumhaz) = match dist.background() {
            Some((hazard, cumhaz)) => (pick(hazard, i), pick(cumhaz, i)),
            None => (0.0, 0.0),
        };
        Entry {
            value: self.values[i % self.values.len()],
            alpha: pick(dist.alpha(), i),
            coefs: coefs.row(row),
            pcure: dist.pcure().map_or(0.0, |p| pick(p, i)),
            offset_hazard,
            offset_cumhaz,
        }
    }

    /// The `i`-th entry, or `None` when one of its inputs is missing.
    pub fn entry(&self, i: usize) -> Option<Entry<'a>> {
        if self.valid[i] {
            Some(self.raw_entry(i))
        } else {
            None
        }
    }

    /// Index of the first entry that will be evaluated.
    pub fn first_valid(&self) -> Option<usize> {
        self.valid.iter().position(|&v| v)
    }

    /// Evaluates `f` on every valid entry, writing NaN for the others.
    pub fn fill<F>(&self, f: F) -> Array1<f64>
    where
        F: Fn(&Entry<'a>) -> f64,
    {
        Array1::from_iter((0..self.len).map(|i| match self.entry(i) {
            Some(entry) => f(&entry),
            None => f64::NAN,
        }))
    }

    /// Parallel variant of [`Recycled::fill`] for per-entry work that is
    /// expensive (root finding, quadrature).
    pub fn par_fill<F>(&self, f: F) -> Array1<f64>
    where
        F: Fn(&Entry<'a>) -> f64 + Sync + Send,
    {
        let values: Vec<f64> = (0..self.len)
            .into_par_iter()
            .map(|i| match self.entry(i) {
                Some(entry) => f(&entry),
                None => f64::NAN,
            })
            .collect();
        Array1::from_vec(values)
    }
}
