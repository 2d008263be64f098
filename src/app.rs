//! Top-level orchestration.
//!
//! This module is the public entry point that:
//! - validates the evidence matrix and run configuration
//! - fits the variational posterior over model frequencies
//! - derives exceedance probabilities (closed form or sampled)
//! - scores the fitted posterior against the null and blends the result

pub mod pipeline;

pub use pipeline::{run_bms, run_bms_default};
