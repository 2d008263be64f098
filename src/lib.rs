//! `group-bms` library crate.
//!
//! Random-effects Bayesian model selection at the group level. Given one log
//! model evidence per subject and model, it estimates:
//!
//! - the Dirichlet posterior over model frequencies (`alpha`, `exp_r`)
//! - exceedance probabilities (`xp`)
//! - the Bayes omnibus risk (`bor`) and protected exceedance probabilities (`pxp`)
//!
//! ```
//! use group_bms::{BmsConfig, LogEvidenceMatrix, run_bms};
//!
//! let lme = LogEvidenceMatrix::from_rows(&[
//!     vec![-120.0, -125.0],
//!     vec![-98.0, -104.5],
//!     vec![-143.0, -141.0],
//! ])
//! .unwrap();
//! let result = run_bms(&lme, &BmsConfig::default()).unwrap();
//! assert!((result.exp_r.iter().sum::<f64>() - 1.0).abs() < 1e-9);
//! assert!(result.bor > 0.0 && result.bor < 1.0);
//! ```

pub mod app;
pub mod domain;
pub mod error;
pub mod fit;
pub mod math;

pub use app::{run_bms, run_bms_default};
pub use domain::{BmsConfig, BmsResult, Diagnostic, FamilyPartition, LogEvidenceMatrix};
pub use error::BmsError;
