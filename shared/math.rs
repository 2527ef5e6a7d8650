//! Small numerically-stable helpers shared by the hazard engines and the
//! posterior assembly. Everything here works on the log scale where it can.

use ndarray::{Array1, ArrayView1};
use statrs::function::gamma::ln_gamma;

/// Stable `log(exp(a) + exp(b))`.
///
/// Either argument may be `-inf` (a zero on the natural scale); NaN in either
/// argument propagates.
#[inline]
pub fn log_sum_exp(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    let hi = a.max(b);
    hi + (-(a - b).abs()).exp().ln_1p()
}

/// Stable `log(1 - exp(x))` for `x <= 0`.
#[inline]
pub fn log1m_exp(x: f64) -> f64 {
    if x > 0.0 {
        return f64::NAN;
    }
    if x > -std::f64::consts::LN_2 {
        (-x.exp_m1()).ln()
    } else {
        (-x.exp()).ln_1p()
    }
}

/// Stable sigmoid `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Stable `log(sigmoid(x))`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        -(-x).exp().ln_1p()
    } else {
        x - x.exp().ln_1p()
    }
}

/// `log(p / (1 - p))`.
#[inline]
pub fn logit(p: f64) -> f64 {
    p.ln() - (-p).ln_1p()
}

/// Softmax of `[0, logits...]`: the first category is the reference with a
/// fixed logit of zero, so the output has one more element than the input.
pub fn softmax_with_reference(logits: ArrayView1<'_, f64>) -> Array1<f64> {
    let hi = logits.iter().fold(0.0_f64, |acc, &v| acc.max(v));
    let mut out = Array1::<f64>::zeros(logits.len() + 1);
    out[0] = (-hi).exp();
    for (slot, &v) in out.iter_mut().skip(1).zip(logits.iter()) {
        *slot = (v - hi).exp();
    }
    let total = out.sum();
    out.mapv_inplace(|v| v / total);
    out
}

/// `ln(n choose k)` through the log-gamma function.
#[inline]
pub fn ln_choose(n: u64, k: u64) -> f64 {
    let n1 = n as f64 + 1.0;
    let k1 = k as f64 + 1.0;
    let nk1 = (n - k) as f64 + 1.0;
    ln_gamma(n1) - ln_gamma(k1) - ln_gamma(nk1)
}

/// Binomial log-mass `log Binom(k | n, p)` with the probability given as
/// `log p`. Zero-count terms are dropped so that `p = 0` or `p = 1` stay
/// finite when the data allow it.
pub fn binomial_logpmf_logp(k: u64, n: u64, log_p: f64) -> f64 {
    if k > n || log_p.is_nan() || log_p > 0.0 {
        return f64::NAN;
    }
    let mut value = ln_choose(n, k);
    if k > 0 {
        value += k as f64 * log_p;
    }
    if n > k {
        value += (n - k) as f64 * log1m_exp(log_p);
    }
    value
}
