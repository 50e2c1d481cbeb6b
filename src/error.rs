//! Error types for the lexical substitution pipeline.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, LexsubError>;

/// Errors that can occur while indexing, training, persisting or querying.
#[derive(Debug, Error)]
pub enum LexsubError {
    /// Missing or invalid user-supplied option.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Vocabulary ids do not fit into `base^num_factors` digits.
    #[error("Capacity error: id {id} does not fit {num_factors} factors of base {base}")]
    Capacity {
        /// Offending id
        id: usize,
        /// Mixed-radix base
        base: usize,
        /// Number of digits available
        num_factors: usize,
    },

    /// Caller passed inconsistent or empty data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Inference or save requested before train/load.
    #[error("Model has not been trained or loaded")]
    ModelNotTrained,

    /// Archive could not be matched against the model it describes.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),
}

impl LexsubError {
    /// Create a Config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a Persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = LexsubError::Capacity {
            id: 9,
            base: 2,
            num_factors: 3,
        };
        assert_eq!(
            err.to_string(),
            "Capacity error: id 9 does not fit 3 factors of base 2"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: LexsubError = io.into();
        assert!(matches!(err, LexsubError::Io(_)));
    }
}
