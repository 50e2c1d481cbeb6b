//! Lexical substitution with a factored-softmax bidirectional RNN
//!
//! Trains a word-level language model on sentences and uses it to rank
//! replacement words for a chosen position, producing corrupted sentence
//! variants.

pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod persistence;
pub mod replacer;

pub use config::{LexsubConfig, TrainOptions};
pub use error::{LexsubError, Result};
pub use llm::Substitute;
pub use replacer::WordReplacer;
