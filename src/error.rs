//! Error types for the decision core

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the decision core
///
/// None of these ever reach the caller of `process_signal`; each decision phase
/// maps them onto its own fallback. They surface only from configuration and
/// cache helpers that callers invoke directly.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Computation errors
    #[error("Scoring failed for {factor}: {reason}")]
    Scoring { factor: &'static str, reason: String },

    #[error("Conflict resolution failed: {0}")]
    Resolution(String),

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is a transient computation failure
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Scoring { .. } | Error::Resolution(_) | Error::Cache(_) | Error::Serialization(_)
        )
    }

    /// Check if this error was caused by malformed caller input
    pub fn is_input_error(&self) -> bool {
        matches!(self, Error::InvalidInput(_))
    }
}

/// Reject NaN and infinities before they reach a comparison
pub(crate) fn ensure_finite(name: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidInput(format!("{} is not finite ({})", name, value)))
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let scoring = Error::Scoring {
            factor: "zone",
            reason: "bad analysis".to_string(),
        };
        assert!(scoring.is_transient());
        assert!(!scoring.is_input_error());

        let input = Error::InvalidInput("margin".to_string());
        assert!(input.is_input_error());
        assert!(!input.is_transient());
    }

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("margin", 250.0).unwrap(), 250.0);
        assert!(ensure_finite("margin", f64::NAN).is_err());
        assert!(ensure_finite("health", f64::INFINITY).is_err());
    }
}
