use thiserror::Error;

/// Fatal errors raised before any computation is performed.
///
/// Non-fatal conditions (out-of-domain beta arguments, a VB loop that hit its
/// iteration cap) are not errors; they are reported as
/// [`Diagnostic`](crate::domain::Diagnostic) values on the result.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BmsError {
    /// Malformed dimensions or non-finite evidence values.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Non-scalar arguments of differing length passed to the beta CDF.
    #[error("shape mismatch: expected length {expected}, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    /// Configuration values out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The Gamma sampler rejected a shape parameter.
    #[error("sampler error: {0}")]
    Sampler(String),
}

impl BmsError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// `true` for errors caused by the evidence matrix or prior rather than the config.
    pub fn is_input_error(&self) -> bool {
        matches!(self, Self::InvalidInput(_) | Self::ShapeMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let e = BmsError::ShapeMismatch { expected: 3, found: 2 };
        assert_eq!(e.to_string(), "shape mismatch: expected length 3, found 2");

        let e = BmsError::invalid_input("no subjects");
        assert_eq!(e.to_string(), "invalid input: no subjects");
        assert!(e.is_input_error());
        assert!(!BmsError::invalid_config("draws").is_input_error());
    }
}
