//! Stop-word constraints: which positions may be replaced, and by what
//!
//! Uses a fixed stop-word list to:
//! - Skip sentences with nothing worth replacing
//! - Restrict the replaced position to content words
//! - Reject substitutes that are stop words or the original word

use crate::llm::scoring::Substitute;
use crate::llm::vocab::{BOS_TOKEN, EOS_TOKEN, PAD_TOKEN};
use rustc_hash::FxHashSet;

/// Words that are never replaced and never used as replacements
pub const DEFAULT_STOP_WORDS: &[&str] = &[
    BOS_TOKEN, EOS_TOKEN, PAD_TOKEN, ".", ",", "of", "in", "by", "the", "to", "and", "is", "a",
];

/// Constraints engine for replacement filtering
#[derive(Clone, Debug)]
pub struct Constraints {
    stop_words: FxHashSet<String>,
}

impl Constraints {
    /// Constraints over the default stop-word list
    pub fn new() -> Self {
        Self::with_stop_words(DEFAULT_STOP_WORDS.iter().copied())
    }

    pub fn with_stop_words<'a>(words: impl IntoIterator<Item = &'a str>) -> Self {
        Constraints {
            stop_words: words.into_iter().map(str::to_string).collect(),
        }
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(word)
    }

    /// True if at least one word is not a stop word
    pub fn has_content(&self, words: &[String]) -> bool {
        words.iter().any(|w| !self.is_stop_word(w))
    }

    /// Positions that may be replaced
    ///
    /// The last word is usually closing punctuation, so it is only a
    /// candidate in one-word sentences.
    pub fn eligible_locations(&self, words: &[String]) -> Vec<usize> {
        let upper = if words.len() > 1 {
            words.len() - 1
        } else {
            words.len()
        };
        (0..upper)
            .filter(|&i| !self.is_stop_word(&words[i]))
            .collect()
    }

    /// First ranked candidate that is neither a stop word nor `original`
    pub fn first_replacement<'a>(
        &self,
        candidates: &'a [Substitute],
        original: &str,
    ) -> Option<&'a Substitute> {
        candidates
            .iter()
            .find(|c| c.word != original && !self.is_stop_word(&c.word))
    }
}

impl Default for Constraints {
    fn default() -> Self {
        Self::new()
    }
}
