//! Configuration: pipeline hyperparameters loadable from JSON
//!
//! Every field has a default, so a config file only needs the keys it changes.
//! CLI flags are applied on top of whatever was loaded.

use crate::error::{LexsubError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Full pipeline configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LexsubConfig {
    /// Embedding width; each RNN direction gets half of it
    pub word_dim: usize,
    /// Mixed-radix base of the factored output layer
    pub factor_base: usize,
    /// Upper bound on training epochs (early stopping may end sooner)
    pub num_epochs: usize,
    /// LSTM cells instead of simple RNN cells
    pub use_lstm: bool,
    /// Split punctuation off words before indexing
    pub tokenize: bool,
    /// Number of most frequent words considered as replacements
    pub search_space_size: usize,
    /// Substitutes returned per query
    pub num_substitutes: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// Fraction of rows held out (from the end) for early stopping
    pub validation_split: f64,
    /// Epochs without validation improvement tolerated before stopping
    pub patience: usize,
    pub embedding_dropout: f32,
    pub recurrent_dropout: f32,
    /// Seed for shuffling and location sampling
    pub seed: u64,
}

impl Default for LexsubConfig {
    fn default() -> Self {
        LexsubConfig {
            word_dim: 50,
            factor_base: 2,
            num_epochs: 20,
            use_lstm: false,
            tokenize: true,
            search_space_size: 5000,
            num_substitutes: 5,
            batch_size: 32,
            learning_rate: 0.001,
            validation_split: 0.1,
            patience: 0,
            embedding_dropout: 0.5,
            recurrent_dropout: 0.2,
            seed: 13,
        }
    }
}

impl LexsubConfig {
    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: LexsubConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the model cannot be built with
    pub fn validate(&self) -> Result<()> {
        if self.word_dim < 2 {
            return Err(LexsubError::config("word_dim must be at least 2"));
        }
        if self.factor_base < 2 {
            return Err(LexsubError::config("factor_base must be at least 2"));
        }
        if self.batch_size == 0 {
            return Err(LexsubError::config("batch_size must be positive"));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(LexsubError::config("validation_split must be in [0, 1)"));
        }
        for p in [self.embedding_dropout, self.recurrent_dropout] {
            if !(0.0..1.0).contains(&p) {
                return Err(LexsubError::config("dropout must be in [0, 1)"));
            }
        }
        Ok(())
    }

    /// Training options derived from this config
    pub fn train_options(&self) -> TrainOptions {
        TrainOptions {
            word_dim: self.word_dim,
            factor_base: self.factor_base,
            num_epochs: self.num_epochs,
            tokenize: self.tokenize,
            use_lstm: self.use_lstm,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            validation_split: self.validation_split,
            patience: self.patience,
            embedding_dropout: self.embedding_dropout,
            recurrent_dropout: self.recurrent_dropout,
            seed: self.seed,
        }
    }
}

/// Arguments of `WordReplacer::train_model`
#[derive(Clone, Debug, PartialEq)]
pub struct TrainOptions {
    pub word_dim: usize,
    pub factor_base: usize,
    pub num_epochs: usize,
    pub tokenize: bool,
    pub use_lstm: bool,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub validation_split: f64,
    pub patience: usize,
    pub embedding_dropout: f32,
    pub recurrent_dropout: f32,
    pub seed: u64,
}

impl Default for TrainOptions {
    fn default() -> Self {
        LexsubConfig::default().train_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_json_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"word_dim": 8, "use_lstm": true}}"#).unwrap();

        let config = LexsubConfig::load(file.path()).unwrap();
        assert_eq!(config.word_dim, 8);
        assert!(config.use_lstm);
        assert_eq!(config.factor_base, 2);
        assert_eq!(config.search_space_size, 5000);
    }

    #[test]
    fn test_rejects_bad_base() {
        let config = LexsubConfig {
            factor_base: 1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LexsubError::Config(_))));
    }

    #[test]
    fn test_train_options_follow_config() {
        let config = LexsubConfig {
            num_epochs: 3,
            ..Default::default()
        };
        let options = config.train_options();
        assert_eq!(options.num_epochs, 3);
        assert_eq!(options.word_dim, 50);
    }
}
