//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the validated input matrix (`LogEvidenceMatrix`)
//! - prior / posterior records (`PriorBundle`, `PosteriorBundle`)
//! - run configuration (`BmsConfig`, `FamilyPartition`)
//! - outputs (`BmsResult`, `Convergence`, `Diagnostic`)

pub mod types;

pub use types::*;
