//! LLM Module: vocabulary, factored bidirectional RNN and substitute ranking
//!
//! # Components
//! - `tokenize.rs`: Word/punctuation and whitespace tokenizers
//! - `factoring.rs`: Mixed-radix id ↔ digit arithmetic
//! - `vocab.rs`: DataIndexer (vocabulary, padding, factored targets)
//! - `model.rs`: Candle bidirectional RNN with one softmax per factor
//! - `train.rs`: Minibatch training with early stopping
//! - `scoring.rs`: Ranked (score, word) substitutes
//! - `constraints.rs`: Stop-word filtering

pub mod constraints;
pub mod factoring;
pub mod model;
pub mod scoring;
pub mod tokenize;
pub mod train;
pub mod vocab;

pub use constraints::Constraints;
pub use model::{CellKind, LexicalModel, ModelConfig};
pub use scoring::Substitute;
pub use vocab::{DataIndexer, IndexMode, IndexedBatch};
