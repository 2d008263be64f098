//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - carried through the estimator / sampler / evaluator stages
//! - exported to JSON by callers that want to persist a run
//! - compared across runs (e.g. reproducibility checks on a fixed seed)

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::error::BmsError;

/// Default convergence tolerance on `‖alpha_new - alpha_old‖₂`.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;
/// Default cap on variational iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 1_000;
/// Default Monte Carlo draw budget for the exceedance sampler.
pub const DEFAULT_DRAWS: usize = 1_000_000;
/// Default cap on the byte footprint of a single sampling block (256 MiB).
pub const DEFAULT_BLOCK_BYTES: usize = 256 * 1024 * 1024;

/// Per-subject, per-model log model evidences (Ni subjects × Nk models).
///
/// Validated on construction: at least one subject, at least one model and
/// every entry finite. The matrix is immutable afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvidenceMatrix {
    inner: DMatrix<f64>,
}

impl LogEvidenceMatrix {
    /// Build from a row-major slice of `n_subjects * n_models` values.
    pub fn from_row_slice(n_subjects: usize, n_models: usize, data: &[f64]) -> Result<Self, BmsError> {
        if data.len() != n_subjects.saturating_mul(n_models) {
            return Err(BmsError::invalid_input(format!(
                "expected {} values for a {n_subjects}x{n_models} matrix, got {}",
                n_subjects.saturating_mul(n_models),
                data.len()
            )));
        }
        Self::from_matrix(DMatrix::from_row_slice(n_subjects, n_models, data))
    }

    /// Build from one row per subject. All rows must have the same length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self, BmsError> {
        let n_subjects = rows.len();
        let n_models = rows.first().map(Vec::len).unwrap_or(0);
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != n_models) {
            return Err(BmsError::invalid_input(format!(
                "subject {i} has {} evidences, expected {n_models}",
                row.len()
            )));
        }
        let data: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::from_row_slice(n_subjects, n_models, &data)
    }

    /// Wrap an existing matrix (rows = subjects, columns = models).
    pub fn from_matrix(inner: DMatrix<f64>) -> Result<Self, BmsError> {
        if inner.nrows() < 1 {
            return Err(BmsError::invalid_input("at least one subject is required"));
        }
        if inner.ncols() < 1 {
            return Err(BmsError::invalid_input("at least one model is required"));
        }
        if let Some(pos) = inner.iter().position(|v| !v.is_finite()) {
            // nalgebra storage is column-major.
            let (i, k) = (pos % inner.nrows(), pos / inner.nrows());
            return Err(BmsError::invalid_input(format!(
                "non-finite log evidence at subject {i}, model {k}"
            )));
        }
        Ok(Self { inner })
    }

    pub fn n_subjects(&self) -> usize {
        self.inner.nrows()
    }

    pub fn n_models(&self) -> usize {
        self.inner.ncols()
    }

    /// Log evidence of subject `i` under model `k`.
    pub fn get(&self, i: usize, k: usize) -> f64 {
        self.inner[(i, k)]
    }

    /// Evidences of subject `i` across all models.
    pub fn row(&self, i: usize) -> Vec<f64> {
        self.inner.row(i).iter().copied().collect()
    }

    /// Model-major orientation (Nk × Ni).
    pub fn by_model(&self) -> DMatrix<f64> {
        self.inner.transpose()
    }

    /// Each subject's evidences shifted so that its best model scores zero,
    /// together with the total shift `Σ_i max_k L[i,k]`.
    ///
    /// Posterior quantities are invariant to per-subject shifts, and free
    /// energies move by exactly the total shift. Gaps wider than `f64::MAX`
    /// are floored at `-f64::MAX` so entries stay finite; the total shift may
    /// overflow to infinity.
    pub fn centered(&self) -> (Self, f64) {
        let mut inner = self.inner.clone();
        let mut offset = 0.0;
        for mut row in inner.row_iter_mut() {
            let max = row.max();
            offset += max;
            row.apply(|v| *v = (*v - max).max(-f64::MAX));
        }
        (Self { inner }, offset)
    }

    pub fn as_matrix(&self) -> &DMatrix<f64> {
        &self.inner
    }
}

/// Prior Dirichlet concentration over model frequencies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorBundle {
    pub a: DVector<f64>,
}

impl PriorBundle {
    /// Uninformative prior: all ones.
    pub fn uniform(n_models: usize) -> Self {
        Self {
            a: DVector::from_element(n_models, 1.0),
        }
    }

    /// Validated prior for `n_models` models.
    pub fn new(a: Vec<f64>, n_models: usize) -> Result<Self, BmsError> {
        if a.len() != n_models {
            return Err(BmsError::invalid_input(format!(
                "prior has {} entries, expected {n_models}",
                a.len()
            )));
        }
        if a.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(BmsError::invalid_input(
                "prior concentrations must be finite and > 0",
            ));
        }
        Ok(Self { a: DVector::from_vec(a) })
    }
}

/// Fitted variational posterior: Dirichlet concentrations `a` and the
/// model-major responsibilities `r` (Nk × Ni).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorBundle {
    pub a: DVector<f64>,
    pub r: DMatrix<f64>,
}

/// Partition of the models into families.
///
/// Stored as one family index per model. Indices must cover `0..n_families`
/// with no empty family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<usize>", into = "Vec<usize>")]
pub struct FamilyPartition {
    assignments: Vec<usize>,
    n_families: usize,
}

impl FamilyPartition {
    /// Build from `assignments[k]` = family of model `k`.
    pub fn from_assignments(assignments: Vec<usize>) -> Result<Self, BmsError> {
        if assignments.is_empty() {
            return Err(BmsError::invalid_input("family partition has no models"));
        }
        let n_families = assignments.iter().copied().max().map_or(0, |m| m + 1);
        let mut sizes = vec![0usize; n_families];
        for &f in &assignments {
            sizes[f] += 1;
        }
        if let Some(empty) = sizes.iter().position(|&s| s == 0) {
            return Err(BmsError::invalid_input(format!("family {empty} has no models")));
        }
        Ok(Self {
            assignments,
            n_families,
        })
    }

    /// Build from an Nk × Nf membership matrix of zeros and ones.
    pub fn from_membership(membership: &DMatrix<f64>) -> Result<Self, BmsError> {
        let mut assignments = Vec::with_capacity(membership.nrows());
        for (k, row) in membership.row_iter().enumerate() {
            let mut family = None;
            for (f, &v) in row.iter().enumerate() {
                if v == 1.0 {
                    if family.is_some() {
                        return Err(BmsError::invalid_input(format!(
                            "model {k} belongs to more than one family"
                        )));
                    }
                    family = Some(f);
                } else if v != 0.0 {
                    return Err(BmsError::invalid_input(format!(
                        "membership entries must be 0 or 1 (model {k}, family {f})"
                    )));
                }
            }
            let Some(family) = family else {
                return Err(BmsError::invalid_input(format!("model {k} belongs to no family")));
            };
            assignments.push(family);
        }
        let partition = Self::from_assignments(assignments)?;
        if partition.n_families != membership.ncols() {
            return Err(BmsError::invalid_input("membership matrix has an empty family"));
        }
        Ok(partition)
    }

    pub fn n_models(&self) -> usize {
        self.assignments.len()
    }

    pub fn n_families(&self) -> usize {
        self.n_families
    }

    /// Null-hypothesis model frequencies: families equally likely, models
    /// equally likely within their family.
    pub fn null_frequencies(&self) -> Vec<f64> {
        let mut sizes = vec![0usize; self.n_families];
        for &f in &self.assignments {
            sizes[f] += 1;
        }
        let nf = self.n_families as f64;
        self.assignments
            .iter()
            .map(|&f| 1.0 / (nf * sizes[f] as f64))
            .collect()
    }
}

impl TryFrom<Vec<usize>> for FamilyPartition {
    type Error = BmsError;

    fn try_from(value: Vec<usize>) -> Result<Self, Self::Error> {
        Self::from_assignments(value)
    }
}

impl From<FamilyPartition> for Vec<usize> {
    fn from(value: FamilyPartition) -> Self {
        value.assignments
    }
}

/// Run configuration for [`run_bms`](crate::app::run_bms).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BmsConfig {
    /// Convergence threshold on the Euclidean change of `alpha`.
    pub tolerance: f64,
    /// Hard cap on variational iterations.
    pub max_iterations: usize,
    /// Prior concentrations. `None` means all ones.
    pub prior: Option<Vec<f64>>,
    /// Monte Carlo draw budget (only used when there are more than two models).
    pub draws: usize,
    /// Seed for the exceedance sampler.
    pub seed: u64,
    /// Byte cap for one sampling block (`draws × Nk × 8`).
    pub block_bytes: usize,
    /// Optional family partition for the family-level null hypothesis.
    pub families: Option<FamilyPartition>,
}

impl Default for BmsConfig {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            prior: None,
            draws: DEFAULT_DRAWS,
            seed: 0,
            block_bytes: DEFAULT_BLOCK_BYTES,
            families: None,
        }
    }
}

impl BmsConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_draws(mut self, draws: usize) -> Self {
        self.draws = draws;
        self
    }

    pub fn with_prior(mut self, prior: Vec<f64>) -> Self {
        self.prior = Some(prior);
        self
    }

    pub fn with_families(mut self, families: FamilyPartition) -> Self {
        self.families = Some(families);
        self
    }

    /// Check ranges that do not depend on the input matrix.
    pub fn validate(&self) -> Result<(), BmsError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(BmsError::invalid_config(format!(
                "tolerance must be finite and > 0 (got {})",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(BmsError::invalid_config("max_iterations must be >= 1"));
        }
        if self.draws == 0 {
            return Err(BmsError::invalid_config("draws must be >= 1"));
        }
        if self.block_bytes == 0 {
            return Err(BmsError::invalid_config("block_bytes must be >= 1"));
        }
        Ok(())
    }

    /// Resolve the prior for a problem with `n_models` models.
    pub fn prior_for(&self, n_models: usize) -> Result<PriorBundle, BmsError> {
        match &self.prior {
            None => Ok(PriorBundle::uniform(n_models)),
            Some(a) => PriorBundle::new(a.clone(), n_models),
        }
    }
}

/// Outcome of the bounded variational loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Convergence {
    pub converged: bool,
    pub iterations: usize,
    /// Last `‖alpha_new - alpha_old‖₂`.
    pub delta: f64,
}

/// Non-fatal conditions attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// The beta CDF received out-of-domain arguments; those positions are NaN.
    NumericDomain { positions: usize },
    /// The variational loop hit its iteration cap before meeting tolerance.
    NonConvergence { iterations: usize, delta: f64 },
}

/// Family-level null evidence and the omnibus risk derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FamilyEvidence {
    pub f0: f64,
    pub bor: f64,
}

/// Output of a group BMS run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BmsResult {
    /// Posterior Dirichlet concentrations.
    pub alpha: Vec<f64>,
    /// Expected model frequencies `alpha / Σ alpha`.
    pub exp_r: Vec<f64>,
    /// Exceedance probabilities.
    pub xp: Vec<f64>,
    /// Protected exceedance probabilities.
    pub pxp: Vec<f64>,
    /// Bayes omnibus risk.
    pub bor: f64,
    /// Free energy of the equal-frequency null.
    pub f0: f64,
    /// Free energy of the fitted posterior.
    pub f1: f64,
    /// Subject × model posterior responsibilities.
    pub responsibilities: DMatrix<f64>,
    pub convergence: Convergence,
    pub diagnostics: Vec<Diagnostic>,
    /// Present only when a family partition was configured.
    pub family: Option<FamilyEvidence>,
}

impl BmsResult {
    pub fn n_models(&self) -> usize {
        self.alpha.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_evidence_rejects_empty_and_non_finite() {
        assert!(LogEvidenceMatrix::from_rows(&[]).is_err());
        assert!(LogEvidenceMatrix::from_rows(&[vec![]]).is_err());

        let err = LogEvidenceMatrix::from_rows(&[vec![0.0, 1.0], vec![f64::NAN, 2.0]]).unwrap_err();
        assert_eq!(
            err,
            BmsError::invalid_input("non-finite log evidence at subject 1, model 0")
        );
        assert!(LogEvidenceMatrix::from_rows(&[vec![0.0, f64::INFINITY]]).is_err());
    }

    #[test]
    fn log_evidence_rejects_ragged_rows() {
        let err = LogEvidenceMatrix::from_rows(&[vec![0.0, 1.0], vec![2.0]]).unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn log_evidence_orientation() {
        let l = LogEvidenceMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(l.n_subjects(), 2);
        assert_eq!(l.n_models(), 3);
        assert_eq!(l.get(1, 0), 4.0);
        assert_eq!(l.row(0), vec![1.0, 2.0, 3.0]);
        let by_model = l.by_model();
        assert_eq!(by_model.shape(), (3, 2));
        assert_eq!(by_model[(2, 1)], 6.0);
    }

    #[test]
    fn centering_zeroes_each_subject_maximum() {
        let l = LogEvidenceMatrix::from_rows(&[vec![-120.0, -125.0], vec![1e308, 1e308], vec![f64::MAX, -f64::MAX]])
            .unwrap();
        let (c, offset) = l.centered();
        assert_eq!(c.row(0), vec![0.0, -5.0]);
        assert_eq!(c.row(1), vec![0.0, 0.0]);
        assert_eq!(c.row(2), vec![0.0, -f64::MAX]);
        assert!(c.as_matrix().iter().all(|v| v.is_finite()));
        assert_eq!(offset, f64::INFINITY);

        let (_, offset) = LogEvidenceMatrix::from_rows(&[vec![-3.0, 2.0], vec![4.0, 1.0]]).unwrap().centered();
        assert_eq!(offset, 6.0);
    }

    #[test]
    fn prior_validation() {
        assert!(PriorBundle::new(vec![1.0, 2.0], 3).is_err());
        assert!(PriorBundle::new(vec![1.0, 0.0], 2).is_err());
        assert!(PriorBundle::new(vec![1.0, f64::NAN], 2).is_err());
        let p = PriorBundle::new(vec![0.5, 2.0], 2).unwrap();
        assert_eq!(p.a.as_slice(), &[0.5, 2.0]);
        assert_eq!(PriorBundle::uniform(3).a.sum(), 3.0);
    }

    #[test]
    fn family_partition_from_membership() {
        let m = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 0.0, 0.0, 1.0]);
        let p = FamilyPartition::from_membership(&m).unwrap();
        assert_eq!(p.n_models(), 3);
        assert_eq!(p.n_families(), 2);
        assert_eq!(Vec::from(p.clone()), vec![0, 0, 1]);

        let f0 = p.null_frequencies();
        assert!((f0[0] - 0.25).abs() < 1e-15);
        assert!((f0[1] - 0.25).abs() < 1e-15);
        assert!((f0[2] - 0.5).abs() < 1e-15);
        assert!((f0.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn family_partition_rejects_bad_membership() {
        let both = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 0.0, 1.0]);
        assert!(FamilyPartition::from_membership(&both).is_err());
        let none = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 0.0, 1.0]);
        assert!(FamilyPartition::from_membership(&none).is_err());
        let empty_column = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 1.0, 0.0]);
        assert!(FamilyPartition::from_membership(&empty_column).is_err());
        assert!(FamilyPartition::from_assignments(vec![0, 2]).is_err());
    }

    #[test]
    fn config_validation() {
        assert!(BmsConfig::default().validate().is_ok());
        let bad = BmsConfig {
            tolerance: 0.0,
            ..BmsConfig::default()
        };
        assert!(bad.validate().is_err());
        assert!(BmsConfig::default().with_draws(0).validate().is_err());
        let bad = BmsConfig {
            max_iterations: 0,
            ..BmsConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_fills_defaults_from_partial_json() {
        let cfg: BmsConfig = serde_json::from_str(r#"{ "seed": 7, "families": [0, 0, 1] }"#).unwrap();
        assert_eq!(cfg.seed, 7);
        assert_eq!(cfg.draws, DEFAULT_DRAWS);
        assert_eq!(cfg.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(cfg.families.as_ref().map(FamilyPartition::n_families), Some(2));

        let bad: Result<BmsConfig, _> = serde_json::from_str(r#"{ "families": [0, 2] }"#);
        assert!(bad.is_err());
    }
}
