//! Variational-Bayes fixed point for the Dirichlet over model frequencies.
//!
//! Each iteration:
//!
//! ```text
//! log_u[i,k] = L[i,k] + ψ(α_k) - ψ(Σ α)
//! g[i,:]     = softmax(log_u[i,:])          (max-shifted)
//! α_new      = α0 + Σ_i g[i,:]
//! ```
//!
//! until `‖α_new - α_old‖₂ < tolerance` or the iteration cap is hit.
//!
//! Responsibilities are computed per subject in parallel and collected in
//! subject order; the column sums are then reduced sequentially, so the result
//! does not depend on the thread count.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::domain::{Convergence, LogEvidenceMatrix, PriorBundle};
use crate::error::BmsError;
use crate::math::{expected_log_frequencies, softmax_into};

/// Stopping rule for [`fit_variational`].
#[derive(Debug, Clone, Copy)]
pub struct VariationalOptions {
    pub tolerance: f64,
    pub max_iterations: usize,
}

/// Converged (or capped) variational posterior.
#[derive(Debug, Clone)]
pub struct VariationalFit {
    pub alpha: DVector<f64>,
    /// Subject × model responsibilities.
    pub g: DMatrix<f64>,
    pub convergence: Convergence,
}

/// Run the fixed-point iteration from `alpha = prior`.
pub fn fit_variational(
    lme: &LogEvidenceMatrix,
    prior: &PriorBundle,
    opts: &VariationalOptions,
) -> Result<VariationalFit, BmsError> {
    let nk = lme.n_models();
    if prior.a.len() != nk {
        return Err(BmsError::invalid_input(format!(
            "prior has {} entries, expected {nk}",
            prior.a.len()
        )));
    }
    if opts.max_iterations == 0 {
        return Err(BmsError::invalid_config("max_iterations must be >= 1"));
    }

    let mut alpha = prior.a.clone();
    let mut g = DMatrix::<f64>::zeros(lme.n_subjects(), nk);
    let mut convergence = Convergence {
        converged: false,
        iterations: 0,
        delta: f64::INFINITY,
    };

    while convergence.iterations < opts.max_iterations {
        g = responsibilities(lme, &alpha);
        let beta = g.row_sum().transpose();
        let alpha_new = &prior.a + beta;

        convergence.delta = (&alpha_new - &alpha).norm();
        convergence.iterations += 1;
        alpha = alpha_new;

        if convergence.delta < opts.tolerance {
            convergence.converged = true;
            break;
        }
    }

    if convergence.converged {
        tracing::debug!(
            iterations = convergence.iterations,
            delta = convergence.delta,
            "variational estimate converged"
        );
    } else {
        tracing::warn!(
            iterations = convergence.iterations,
            delta = convergence.delta,
            tolerance = opts.tolerance,
            "variational estimate hit the iteration cap before converging"
        );
    }

    Ok(VariationalFit {
        alpha,
        g,
        convergence,
    })
}

/// Posterior responsibilities `g[i,k]` given the current concentrations.
pub fn responsibilities(lme: &LogEvidenceMatrix, alpha: &DVector<f64>) -> DMatrix<f64> {
    let nk = lme.n_models();
    let elogr = expected_log_frequencies(alpha);

    let rows: Vec<Vec<f64>> = (0..lme.n_subjects())
        .into_par_iter()
        .map(|i| {
            let log_u: Vec<f64> = (0..nk).map(|k| lme.get(i, k) + elogr[k]).collect();
            let mut row = vec![0.0; nk];
            softmax_into(&log_u, &mut row);
            row
        })
        .collect();

    DMatrix::from_fn(lme.n_subjects(), nk, |i, k| rows[i][k])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts() -> VariationalOptions {
        VariationalOptions {
            tolerance: 1e-4,
            max_iterations: 1_000,
        }
    }

    #[test]
    fn equal_evidence_gives_symmetric_alpha() {
        let lme = LogEvidenceMatrix::from_row_slice(2, 2, &[0.0; 4]).unwrap();
        let fit = fit_variational(&lme, &PriorBundle::uniform(2), &opts()).unwrap();
        assert!(fit.convergence.converged);
        // Each subject splits evenly: α = 1 + 2 * 0.5.
        assert!((fit.alpha[0] - 2.0).abs() < 1e-12);
        assert!((fit.alpha[1] - 2.0).abs() < 1e-12);
        for i in 0..2 {
            assert!((fit.g[(i, 0)] - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn dominant_model_attracts_all_subjects() {
        let lme = LogEvidenceMatrix::from_rows(&[vec![10.0, 0.0], vec![10.0, 0.0], vec![10.0, 0.0]]).unwrap();
        let fit = fit_variational(&lme, &PriorBundle::uniform(2), &opts()).unwrap();
        assert!(fit.convergence.converged);
        assert!(fit.alpha[0] > 3.99);
        assert!(fit.alpha[1] < 1.01);
        assert!((fit.alpha.sum() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn rows_are_probability_vectors() {
        let lme = LogEvidenceMatrix::from_rows(&[
            vec![-1200.0, -1190.0, -1205.0],
            vec![3.0, 2.0, 1.0],
            vec![0.0, 0.0, 50.0],
        ])
        .unwrap();
        let fit = fit_variational(&lme, &PriorBundle::uniform(3), &opts()).unwrap();
        for row in fit.g.row_iter() {
            assert!(row.iter().all(|&v| (0.0..=1.0).contains(&v)));
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!(fit.alpha.iter().all(|&a| a > 0.0));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let lme = LogEvidenceMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 0.3], vec![2.0, 1.5]]).unwrap();
        let capped = VariationalOptions {
            tolerance: 1e-12,
            max_iterations: 1,
        };
        let fit = fit_variational(&lme, &PriorBundle::uniform(2), &capped).unwrap();
        assert!(!fit.convergence.converged);
        assert_eq!(fit.convergence.iterations, 1);
        assert!(fit.convergence.delta.is_finite());
        assert!(fit.alpha.iter().all(|&a| a > 0.0));
    }

    #[test]
    fn capped_run_matches_prefix_of_full_run() {
        let lme = LogEvidenceMatrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 0.3], vec![2.0, 1.5]]).unwrap();
        let full = fit_variational(&lme, &PriorBundle::uniform(2), &opts()).unwrap();
        let n = full.convergence.iterations;
        let capped = fit_variational(
            &lme,
            &PriorBundle::uniform(2),
            &VariationalOptions {
                tolerance: 1e-4,
                max_iterations: n,
            },
        )
        .unwrap();
        assert_eq!(full.alpha, capped.alpha);
    }

    #[test]
    fn prior_length_is_checked() {
        let lme = LogEvidenceMatrix::from_row_slice(1, 3, &[0.0, 1.0, 2.0]).unwrap();
        assert!(fit_variational(&lme, &PriorBundle::uniform(2), &opts()).is_err());
    }
}
