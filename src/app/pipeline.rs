//! The group BMS pipeline:
//! variational fit -> exp_r -> exceedance -> free energies -> bor -> pxp
//!
//! Fatal problems (bad dimensions, non-finite evidence, bad config) are
//! rejected before anything is computed. Non-fatal ones are attached to the
//! result as [`Diagnostic`] values.

use crate::domain::{
    BmsConfig, BmsResult, Diagnostic, FamilyEvidence, LogEvidenceMatrix, PosteriorBundle,
};
use crate::error::BmsError;
use crate::fit::{
    EqualFamilies, EqualModels, NullHypothesis, SamplerOptions, VariationalOptions,
    fitted_free_energy, fit_variational, sample_exceedance,
};
use crate::math::{logistic_complement, two_model_exceedance};

/// Run group BMS with the default configuration.
pub fn run_bms_default(lme: &LogEvidenceMatrix) -> Result<BmsResult, BmsError> {
    run_bms(lme, &BmsConfig::default())
}

/// Run group BMS on `lme` (subjects × models).
pub fn run_bms(lme: &LogEvidenceMatrix, config: &BmsConfig) -> Result<BmsResult, BmsError> {
    config.validate()?;
    let nk = lme.n_models();
    let prior = config.prior_for(nk)?;
    let family_null = match &config.families {
        Some(families) => {
            let null = EqualFamilies::new(families.clone());
            // Fail before fitting if the partition does not match the input.
            null.log_frequencies(nk)?;
            Some(null)
        }
        None => None,
    };

    tracing::debug!(
        subjects = lme.n_subjects(),
        models = nk,
        "running group BMS"
    );

    // 1) Variational posterior over model frequencies.
    let fit = fit_variational(
        lme,
        &prior,
        &VariationalOptions {
            tolerance: config.tolerance,
            max_iterations: config.max_iterations,
        },
    )?;

    let mut diagnostics = Vec::new();
    if !fit.convergence.converged {
        diagnostics.push(Diagnostic::NonConvergence {
            iterations: fit.convergence.iterations,
            delta: fit.convergence.delta,
        });
    }

    // 2) Expected frequencies.
    let alpha: Vec<f64> = fit.alpha.iter().copied().collect();
    let alpha_sum = fit.alpha.sum();
    let exp_r: Vec<f64> = alpha.iter().map(|a| a / alpha_sum).collect();

    // 3) Exceedance probabilities.
    let xp = match nk {
        1 => vec![1.0],
        2 => {
            let (xp, domain_errors) = two_model_exceedance([alpha[0], alpha[1]])?;
            if domain_errors > 0 {
                diagnostics.push(Diagnostic::NumericDomain {
                    positions: domain_errors,
                });
            }
            xp.to_vec()
        }
        _ => sample_exceedance(
            &alpha,
            &SamplerOptions {
                draws: config.draws,
                seed: config.seed,
                block_bytes: config.block_bytes,
            },
        )?,
    };

    // 4) Free energies of the null and the fitted posterior. Both carry the
    // same per-subject shift, so it is taken out before summing and only added
    // back to the reported totals.
    let (centered, offset) = lme.centered();
    let posterior = PosteriorBundle {
        a: fit.alpha.clone(),
        r: fit.g.transpose(),
    };
    let f0_rel = EqualModels.free_energy(&centered)?;
    let f1_rel = fitted_free_energy(&centered, &posterior, &prior)?;
    let f0 = f0_rel + offset;
    let f1 = f1_rel + offset;

    // 5) Omnibus risk and protected exceedance.
    let bor = logistic_complement(f1_rel - f0_rel);
    let uniform = bor / nk as f64;
    let pxp: Vec<f64> = xp.iter().map(|&p| (1.0 - bor) * p + uniform).collect();

    let family = match family_null {
        Some(null) => {
            let f0_family = null.free_energy(&centered)?;
            Some(FamilyEvidence {
                f0: f0_family + offset,
                bor: logistic_complement(f1_rel - f0_family),
            })
        }
        None => None,
    };

    tracing::debug!(bor, f0, f1, "group BMS finished");

    Ok(BmsResult {
        alpha,
        exp_r,
        xp,
        pxp,
        bor,
        f0,
        f1,
        responsibilities: fit.g,
        convergence: fit.convergence,
        diagnostics,
        family,
    })
}
