//! Sentence files: one sentence per line

use rand::seq::SliceRandom;
use rand::Rng;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Read trimmed, non-empty lines
pub fn read_sentences(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Shuffle training sentences and keep at most `max_instances`
pub fn sample_training<R: Rng>(
    mut sentences: Vec<String>,
    max_instances: Option<usize>,
    rng: &mut R,
) -> Vec<String> {
    sentences.shuffle(rng);
    if let Some(max) = max_instances {
        sentences.truncate(max);
    }
    sentences
}
