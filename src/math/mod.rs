//! Mathematical utilities: special functions and the regularized incomplete beta.

pub mod beta_cdf;
pub mod special;

pub use beta_cdf::*;
pub use special::*;
