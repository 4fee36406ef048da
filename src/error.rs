//! Error types for the persona learning engine
//!
//! This module provides structured error definitions using thiserror. The
//! numeric learning path never produces errors; everything here originates
//! from collaborators (lookup, persistence) or from configuration.

use thiserror::Error;

/// Main error type for persona learning operations
#[derive(Error, Debug)]
pub enum LearnerError {
    /// The response a feedback event refers to does not exist
    #[error("Response not found: {0}")]
    ResponseNotFound(String),

    /// Durable write or read through a collaborator failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Database operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Hyperparameter outside its valid range
    #[error("Invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML decoding error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl LearnerError {
    /// Whether this error came from a durable-storage collaborator.
    ///
    /// The engine swallows these after logging; everything else propagates.
    pub fn is_persistence(&self) -> bool {
        matches!(
            self,
            LearnerError::Persistence(_)
                | LearnerError::Database(_)
                | LearnerError::Io(_)
                | LearnerError::Serialization(_)
        )
    }
}

/// Result type alias for persona learning operations
pub type Result<T> = std::result::Result<T, LearnerError>;

/// Convert anyhow::Error to LearnerError
impl From<anyhow::Error> for LearnerError {
    fn from(err: anyhow::Error) -> Self {
        LearnerError::Other(err.to_string())
    }
}

impl From<libsql::Error> for LearnerError {
    fn from(err: libsql::Error) -> Self {
        LearnerError::Database(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LearnerError::ResponseNotFound("resp-42".to_string());
        assert_eq!(err.to_string(), "Response not found: resp-42");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json");
        assert!(json_err.is_err());

        let err: LearnerError = json_err.unwrap_err().into();
        assert!(matches!(err, LearnerError::Serialization(_)));
        assert!(err.is_persistence());
    }

    #[test]
    fn test_not_found_is_not_persistence() {
        let err = LearnerError::ResponseNotFound("x".to_string());
        assert!(!err.is_persistence());

        let err = LearnerError::InvalidHyperparameter("learning_rate".to_string());
        assert!(!err.is_persistence());
    }
}
