//! Variational free energy of the fitted posterior and of null hypotheses.
//!
//! For the fitted Dirichlet posterior `{a, r}` with prior `a0`:
//!
//! ```text
//! Elogr_k = ψ(a_k) - ψ(Σ a)
//! Sqf     = Σ lnΓ(a_k) - lnΓ(Σ a) - Σ (a_k - 1) Elogr_k
//! Sqm     = - Σ_{k,i} r[k,i] ln(r[k,i] + eps)
//! ELJ     = lnΓ(Σ a0) - Σ lnΓ(a0_k) + Σ (a0_k - 1) Elogr_k
//!           + Σ_{k,i} r[k,i] (Elogr_k + L[k,i])
//! F1      = ELJ + Sqf + Sqm
//! ```
//!
//! Null hypotheses fix the model frequencies instead of fitting them. They are
//! pluggable through [`NullHypothesis`]; the primary pipeline uses
//! [`EqualModels`].

use nalgebra::DVector;

use crate::domain::{FamilyPartition, LogEvidenceMatrix, PosteriorBundle, PriorBundle};
use crate::error::BmsError;
use crate::math::{LOG_EPS, expected_log_frequencies, ln_dirichlet_norm, softmax_into};

/// Free energy `F1` of a fitted posterior.
pub fn fitted_free_energy(
    lme: &LogEvidenceMatrix,
    posterior: &PosteriorBundle,
    prior: &PriorBundle,
) -> Result<f64, BmsError> {
    let nk = lme.n_models();
    let ni = lme.n_subjects();
    if posterior.a.len() != nk || prior.a.len() != nk {
        return Err(BmsError::invalid_input(format!(
            "concentration vectors must have {nk} entries (posterior {}, prior {})",
            posterior.a.len(),
            prior.a.len()
        )));
    }
    if posterior.r.shape() != (nk, ni) {
        return Err(BmsError::invalid_input(format!(
            "responsibilities must be {nk}x{ni}, got {}x{}",
            posterior.r.nrows(),
            posterior.r.ncols()
        )));
    }

    let a = &posterior.a;
    let elogr = expected_log_frequencies(a);

    let sqf = -ln_dirichlet_norm(a) - weighted_shift(a, &elogr);

    let l = lme.by_model();
    let mut sqm = 0.0;
    let mut joint = 0.0;
    for i in 0..ni {
        for k in 0..nk {
            let r = posterior.r[(k, i)];
            // Zero responsibility contributes nothing, whatever the evidence.
            if r == 0.0 {
                continue;
            }
            sqm -= r * (r + LOG_EPS).ln();
            joint += r * (elogr[k] + l[(k, i)]);
        }
    }

    let elj = ln_dirichlet_norm(&prior.a) + weighted_shift(&prior.a, &elogr) + joint;

    Ok(elj + sqf + sqm)
}

/// `Σ (a_k - 1) Elogr_k`
fn weighted_shift(a: &DVector<f64>, elogr: &DVector<f64>) -> f64 {
    a.iter().zip(elogr.iter()).map(|(&ak, &e)| (ak - 1.0) * e).sum()
}

/// A hypothesis that fixes model frequencies, scored by its free energy.
pub trait NullHypothesis {
    /// Log frequency the hypothesis assigns to each of `n_models` models.
    fn log_frequencies(&self, n_models: usize) -> Result<Vec<f64>, BmsError>;

    /// Free energy `F0` of the hypothesis.
    ///
    /// Per subject, responsibilities are the softmax of the raw evidences and
    /// contribute `Σ_k g[k] (L[k,i] + ln f0_k - ln(g[k] + eps))`.
    fn free_energy(&self, lme: &LogEvidenceMatrix) -> Result<f64, BmsError> {
        let nk = lme.n_models();
        let log_f0 = self.log_frequencies(nk)?;

        let mut g = vec![0.0; nk];
        let mut f0 = 0.0;
        for i in 0..lme.n_subjects() {
            let evidences = lme.row(i);
            softmax_into(&evidences, &mut g);
            for k in 0..nk {
                if g[k] == 0.0 {
                    continue;
                }
                f0 += g[k] * (evidences[k] + log_f0[k] - (g[k] + LOG_EPS).ln());
            }
        }
        Ok(f0)
    }
}

/// All models equally frequent: `f0_k = 1 / Nk`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualModels;

impl NullHypothesis for EqualModels {
    fn log_frequencies(&self, n_models: usize) -> Result<Vec<f64>, BmsError> {
        if n_models == 0 {
            return Err(BmsError::invalid_input("at least one model is required"));
        }
        Ok(vec![-(n_models as f64).ln(); n_models])
    }
}

/// Families equally frequent, models equally frequent within a family.
#[derive(Debug, Clone)]
pub struct EqualFamilies {
    pub families: FamilyPartition,
}

impl EqualFamilies {
    pub fn new(families: FamilyPartition) -> Self {
        Self { families }
    }
}

impl NullHypothesis for EqualFamilies {
    fn log_frequencies(&self, n_models: usize) -> Result<Vec<f64>, BmsError> {
        if self.families.n_models() != n_models {
            return Err(BmsError::invalid_input(format!(
                "family partition covers {} models, evidence has {n_models}",
                self.families.n_models()
            )));
        }
        Ok(self.families.null_frequencies().into_iter().map(f64::ln).collect())
    }
}
