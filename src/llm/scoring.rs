//! Substitute scoring: ranked (score, word) candidates
//!
//! Scores are joint log-probabilities, so higher is better and every score
//! is `<= 0`.

use serde::{Deserialize, Serialize};

/// A candidate replacement word with its joint log-probability
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Substitute {
    pub score: f32,
    pub word: String,
}

impl Substitute {
    pub fn new(score: f32, word: impl Into<String>) -> Self {
        Substitute {
            score,
            word: word.into(),
        }
    }
}

/// Sort candidates by descending score and keep the best `top_k`
///
/// The sort is stable, so equal scores keep their incoming order.
pub fn rank(mut substitutes: Vec<Substitute>, top_k: usize) -> Vec<Substitute> {
    substitutes.sort_by(|a, b| b.score.total_cmp(&a.score));
    substitutes.truncate(top_k);
    substitutes
}

/// Whether a list is sorted best-first
pub fn is_ranked(substitutes: &[Substitute]) -> bool {
    substitutes.windows(2).all(|w| w[0].score >= w[1].score)
}
