//! CLI support: corpus reading and the sentence corruption workflow
//!
//! # Components
//! - `corpus.rs`: reading sentence files, shuffling and capping training data
//! - `corrupt.rs`: location sampling, substitute selection and TSV output

pub mod corpus;
pub mod corrupt;

pub use corrupt::{corrupt_sentences, write_pairs, CorruptOptions, CorruptedPair};
