//! Group BMS estimation stages.
//!
//! Responsibilities:
//!
//! - fit the Dirichlet posterior over model frequencies (variational fixed point)
//! - score the fitted posterior and null hypotheses (free energy)
//! - estimate exceedance probabilities by Dirichlet sampling (parallel blocks)

pub mod exceedance;
pub mod free_energy;
pub mod variational;

pub use exceedance::*;
pub use free_energy::*;
pub use variational::*;
