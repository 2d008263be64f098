use group_bms::domain::PriorBundle;
use group_bms::fit::{VariationalOptions, fit_variational};
use group_bms::{BmsConfig, LogEvidenceMatrix, run_bms};
use proptest::prelude::*;

fn evidence() -> impl Strategy<Value = LogEvidenceMatrix> {
    (1usize..6, 1usize..5).prop_flat_map(|(ni, nk)| {
        prop::collection::vec(-60.0f64..60.0, ni * nk)
            .prop_map(move |data| LogEvidenceMatrix::from_row_slice(ni, nk, &data).unwrap())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn outputs_are_normalized(lme in evidence(), seed in any::<u64>()) {
        let config = BmsConfig::default().with_draws(2_000).with_seed(seed);
        let res = run_bms(&lme, &config).unwrap();
        let nk = lme.n_models() as f64;

        prop_assert!(res.alpha.iter().all(|&a| a > 0.0));
        prop_assert!((res.exp_r.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        prop_assert!((res.xp.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        prop_assert!((res.pxp.iter().sum::<f64>() - 1.0).abs() < 1e-6);
        prop_assert!(res.bor > 0.0 && res.bor < 1.0, "bor={}", res.bor);
        for (p, x) in res.pxp.iter().zip(&res.xp) {
            prop_assert_eq!(*p, (1.0 - res.bor) * x + res.bor / nk);
        }
        for row in res.responsibilities.row_iter() {
            prop_assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn alpha_stays_positive_at_every_iteration(lme in evidence(), cap in 1usize..6) {
        let prior = PriorBundle::uniform(lme.n_models());
        let opts = VariationalOptions { tolerance: 1e-4, max_iterations: cap };
        let fit = fit_variational(&lme, &prior, &opts).unwrap();
        prop_assert!(fit.convergence.iterations <= cap);
        prop_assert!(fit.alpha.iter().all(|&a| a > 0.0));
        // Every subject is fully attributed: Σ alpha = Σ alpha0 + Ni.
        let expected = lme.n_models() as f64 + lme.n_subjects() as f64;
        prop_assert!((fit.alpha.sum() - expected).abs() < 1e-9);
    }

    #[test]
    fn shifting_a_subject_leaves_results_unchanged(lme in evidence(), shift in -500.0f64..500.0) {
        // Adding a constant to one subject's evidences changes no posterior quantity.
        let mut shifted = lme.as_matrix().clone();
        shifted.row_mut(0).add_scalar_mut(shift);
        let shifted = LogEvidenceMatrix::from_matrix(shifted).unwrap();

        let config = BmsConfig::default().with_draws(1_000).with_seed(3);
        let a = run_bms(&lme, &config).unwrap();
        let b = run_bms(&shifted, &config).unwrap();
        for (x, y) in a.alpha.iter().zip(&b.alpha) {
            prop_assert!((x - y).abs() < 1e-6);
        }
        prop_assert!((a.bor - b.bor).abs() < 1e-6);
    }
}
