//! Special functions and stable normalizations shared by the estimator and
//! the free-energy evaluator.
//!
//! Numerical notes:
//! - Softmax subtracts the maximum before exponentiating so that evidences in
//!   the thousands (typical for log model evidences) do not overflow.
//! - `LOG_EPS` guards `ln(0)` in entropy terms. It matches machine epsilon.

use nalgebra::DVector;
use statrs::function::gamma::{digamma, ln_gamma};

/// Additive guard inside `ln(p + LOG_EPS)`.
pub const LOG_EPS: f64 = f64::EPSILON;

/// Expected log frequencies under a Dirichlet: `ψ(α_k) - ψ(Σ α)`.
pub fn expected_log_frequencies(alpha: &DVector<f64>) -> DVector<f64> {
    let psi_sum = digamma(alpha.sum());
    alpha.map(|a| digamma(a) - psi_sum)
}

/// Log of the Dirichlet normalizer: `ln Γ(Σ α) - Σ ln Γ(α_k)`.
pub fn ln_dirichlet_norm(alpha: &DVector<f64>) -> f64 {
    ln_gamma(alpha.sum()) - alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>()
}

/// Max-shifted softmax, written into `out`.
///
/// `out` must have the same length as `logits`.
pub fn softmax_into(logits: &[f64], out: &mut [f64]) {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut total = 0.0;
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - max).exp();
        total += *o;
    }
    for o in out.iter_mut() {
        *o /= total;
    }
}

/// Logistic `1 / (1 + exp(x))` held strictly inside `(0, 1)`.
pub fn logistic_complement(x: f64) -> f64 {
    let p = 1.0 / (1.0 + x.exp());
    p.clamp(f64::MIN_POSITIVE, 1.0 - f64::EPSILON)
}
