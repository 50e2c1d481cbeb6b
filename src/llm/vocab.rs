//! DataIndexer: word-level vocabulary, sentence indexing and factored targets
//!
//! Handles:
//! - Word to id mapping with reserved padding/unknown/boundary ids
//! - Left-padded, tail-truncated sentence batches
//! - Mixed-radix target factoring and unfactoring of digit probabilities
//! - Occurrence counts defining the substitute search space

use crate::error::{LexsubError, Result};
use crate::llm::factoring;
use crate::llm::scoring::{self, Substitute};
use crate::llm::tokenize::{Tokenizer, WhitespaceTokenizer, WordTokenizer};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

pub const PAD_TOKEN: &str = "PADDING";
pub const UNK_TOKEN: &str = "UNK";
pub const BOS_TOKEN: &str = "<s>";
pub const EOS_TOKEN: &str = "</s>";

pub const PAD_ID: u32 = 0;
pub const UNK_ID: u32 = 1;
pub const BOS_ID: u32 = 2;
pub const EOS_ID: u32 = 3;

/// Number of ids reserved before the first real word
pub const NUM_RESERVED: usize = 4;

/// Floor applied to probabilities before taking logs
const MIN_PROBABILITY: f32 = 1e-12;

/// Whether indexing may grow the vocabulary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexMode {
    /// Assign ids to unseen words and count occurrences
    Train,
    /// Map unseen words to `UNK`, leave the vocabulary untouched
    Lookup,
}

/// Rectangular batch of indexed sentences
#[derive(Clone, Debug, PartialEq)]
pub struct IndexedBatch {
    /// True length of every sentence, markers included, before truncation
    pub lengths: Vec<usize>,
    /// One row per sentence, all rows the same width, left-padded with 0
    pub ids: Vec<Vec<u32>>,
}

impl IndexedBatch {
    pub fn width(&self) -> usize {
        self.ids.first().map(Vec::len).unwrap_or(0)
    }

    /// Model inputs: every row without its last position
    pub fn inputs(&self) -> Vec<Vec<u32>> {
        self.ids
            .iter()
            .map(|row| row[..row.len().saturating_sub(1)].to_vec())
            .collect()
    }

    /// Model targets: every row without its first position
    pub fn targets(&self) -> Vec<Vec<u32>> {
        self.ids
            .iter()
            .map(|row| row.get(1..).unwrap_or_default().to_vec())
            .collect()
    }
}

/// One digit of every target id, for one factor
#[derive(Clone, Debug, PartialEq)]
pub struct FactoredTarget {
    pub base: usize,
    /// `(rows, timesteps)` digit values, each `< base`
    pub digits: Vec<Vec<u32>>,
}

impl FactoredTarget {
    /// `(rows, timesteps, base)`
    pub fn shape(&self) -> (usize, usize, usize) {
        let steps = self.digits.first().map(Vec::len).unwrap_or(0);
        (self.digits.len(), steps, self.base)
    }

    /// Row-major one-hot encoding of the digits
    pub fn one_hot(&self) -> Vec<f32> {
        let (rows, steps, base) = self.shape();
        let mut encoded = vec![0.0; rows * steps * base];
        for (r, row) in self.digits.iter().enumerate() {
            for (t, &digit) in row.iter().enumerate() {
                encoded[(r * steps + t) * base + digit as usize] = 1.0;
            }
        }
        encoded
    }
}

/// Word vocabulary plus the indexing/factoring operations built on it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataIndexer {
    word_to_id: FxHashMap<String, u32>,
    /// Id → word
    words: Vec<String>,
    /// Occurrences seen while indexing in `Train` mode, per id
    counts: Vec<u64>,
}

impl DataIndexer {
    /// Create an indexer holding only the reserved tokens
    pub fn new() -> Self {
        let mut indexer = DataIndexer {
            word_to_id: FxHashMap::default(),
            words: Vec::new(),
            counts: Vec::new(),
        };
        for token in [PAD_TOKEN, UNK_TOKEN, BOS_TOKEN, EOS_TOKEN] {
            indexer.add_word(token);
        }
        indexer
    }

    fn add_word(&mut self, word: &str) -> u32 {
        let id = self.words.len() as u32;
        self.word_to_id.insert(word.to_string(), id);
        self.words.push(word.to_string());
        self.counts.push(0);
        id
    }

    /// Train-mode lookup: assign an id if needed and count the occurrence
    fn insert_counted(&mut self, word: &str) -> u32 {
        let id = match self.word_to_id.get(word) {
            Some(&id) => id,
            None => self.add_word(word),
        };
        self.counts[id as usize] += 1;
        id
    }

    /// Index sentences with the built-in tokenizers
    ///
    /// `tokenize` selects word/punctuation splitting, otherwise sentences are
    /// split on whitespace.
    pub fn index_data(
        &mut self,
        sentences: &[String],
        max_length: Option<usize>,
        tokenize: bool,
        mode: IndexMode,
    ) -> IndexedBatch {
        if tokenize {
            self.index_data_with(sentences, max_length, &WordTokenizer, mode)
        } else {
            self.index_data_with(sentences, max_length, &WhitespaceTokenizer, mode)
        }
    }

    /// Index sentences with a caller-supplied tokenizer
    ///
    /// Rows are wrapped in `<s>`/`</s>`, left-padded with `PAD_ID` and cut at
    /// the tail to `max_length` (or the longest sentence when `None`).
    pub fn index_data_with(
        &mut self,
        sentences: &[String],
        max_length: Option<usize>,
        tokenizer: &dyn Tokenizer,
        mode: IndexMode,
    ) -> IndexedBatch {
        if mode == IndexMode::Lookup {
            return self.lookup_data_with(sentences, max_length, tokenizer);
        }

        let mut rows: Vec<Vec<u32>> = Vec::with_capacity(sentences.len());
        for sentence in sentences {
            let mut row = vec![self.insert_counted(BOS_TOKEN)];
            for word in tokenizer.tokenize(sentence) {
                row.push(self.insert_counted(&word));
            }
            row.push(self.insert_counted(EOS_TOKEN));
            rows.push(row);
        }
        Self::pad_rows(rows, max_length)
    }

    /// `Lookup`-mode indexing through a shared reference
    pub fn lookup_data(
        &self,
        sentences: &[String],
        max_length: Option<usize>,
        tokenize: bool,
    ) -> IndexedBatch {
        if tokenize {
            self.lookup_data_with(sentences, max_length, &WordTokenizer)
        } else {
            self.lookup_data_with(sentences, max_length, &WhitespaceTokenizer)
        }
    }

    pub fn lookup_data_with(
        &self,
        sentences: &[String],
        max_length: Option<usize>,
        tokenizer: &dyn Tokenizer,
    ) -> IndexedBatch {
        let rows = sentences
            .iter()
            .map(|sentence| {
                let mut row = vec![BOS_ID];
                row.extend(
                    tokenizer
                        .tokenize(sentence)
                        .iter()
                        .map(|word| self.id(word).unwrap_or(UNK_ID)),
                );
                row.push(EOS_ID);
                row
            })
            .collect();
        Self::pad_rows(rows, max_length)
    }

    fn pad_rows(rows: Vec<Vec<u32>>, max_length: Option<usize>) -> IndexedBatch {
        let lengths: Vec<usize> = rows.iter().map(Vec::len).collect();
        let width = max_length.unwrap_or_else(|| lengths.iter().copied().max().unwrap_or(0));

        let ids = rows
            .into_iter()
            .map(|mut row| {
                row.truncate(width);
                let mut padded = vec![PAD_ID; width - row.len()];
                padded.extend(row);
                padded
            })
            .collect();

        IndexedBatch { lengths, ids }
    }

    /// Number of digits needed to write every id in `base`
    pub fn num_factors(&self, base: usize) -> Result<usize> {
        factoring::num_factors(self.get_vocab_size(), base)
    }

    /// Split target ids into one digit array per factor
    ///
    /// Fails with `Capacity` if an id does not fit `base^num_factors`.
    pub fn factor_target_indices(
        &self,
        target_ids: &[Vec<u32>],
        base: usize,
    ) -> Result<Vec<FactoredTarget>> {
        let num_factors = self.num_factors(base)?;
        let mut factored: Vec<FactoredTarget> = (0..num_factors)
            .map(|_| FactoredTarget {
                base,
                digits: Vec::with_capacity(target_ids.len()),
            })
            .collect();

        for row in target_ids {
            let mut digit_rows = vec![Vec::with_capacity(row.len()); num_factors];
            for &id in row {
                let digits = factoring::factor_index(id as usize, base, num_factors)?;
                for (factor, digit) in digits.into_iter().enumerate() {
                    digit_rows[factor].push(digit as u32);
                }
            }
            for (target, digit_row) in factored.iter_mut().zip(digit_rows) {
                target.digits.push(digit_row);
            }
        }

        Ok(factored)
    }

    /// Non-reserved ids, most frequent first (ties by id)
    pub fn frequency_order(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = (NUM_RESERVED as u32..self.words.len() as u32).collect();
        ids.sort_by(|a, b| {
            self.counts[*b as usize]
                .cmp(&self.counts[*a as usize])
                .then(a.cmp(b))
        });
        ids
    }

    /// The `search_space_size` most frequent non-reserved ids
    pub fn search_space(&self, search_space_size: usize) -> Vec<u32> {
        let mut ids = self.frequency_order();
        ids.truncate(search_space_size);
        ids
    }

    /// Rank candidate words from per-factor digit distributions
    ///
    /// Scores each of the `search_space_size` most frequent words by the sum of
    /// its digits' log-probabilities, treating factors as independent.
    pub fn unfactor_probabilities(
        &self,
        factor_probabilities: &[Vec<f32>],
        search_space_size: usize,
    ) -> Result<Vec<Substitute>> {
        self.score_candidates(factor_probabilities, &self.search_space(search_space_size))
    }

    /// Score and rank `candidates`, which are taken to be in frequency order
    pub fn score_candidates(
        &self,
        factor_probabilities: &[Vec<f32>],
        candidates: &[u32],
    ) -> Result<Vec<Substitute>> {
        let num_factors = factor_probabilities.len();
        let base = factor_probabilities
            .first()
            .map(Vec::len)
            .ok_or_else(|| LexsubError::invalid_input("no factor probabilities"))?;
        if factor_probabilities.iter().any(|p| p.len() != base) {
            return Err(LexsubError::invalid_input(
                "factor distributions differ in width",
            ));
        }

        let log_probs: Vec<Vec<f32>> = factor_probabilities
            .iter()
            .map(|dist| dist.iter().map(|&p| p.max(MIN_PROBABILITY).ln()).collect())
            .collect();

        let mut substitutes = Vec::with_capacity(candidates.len());
        for &id in candidates {
            let word = self
                .word(id)
                .ok_or_else(|| LexsubError::invalid_input(format!("unknown id {id}")))?;
            let digits = factoring::factor_index(id as usize, base, num_factors)?;
            let score = digits
                .iter()
                .zip(&log_probs)
                .map(|(&digit, logp)| logp[digit])
                .sum();
            substitutes.push(Substitute::new(score, word));
        }

        // Ties stay in frequency order
        Ok(scoring::rank(substitutes, candidates.len()))
    }

    /// Vocabulary size, reserved ids included
    pub fn get_vocab_size(&self) -> usize {
        self.words.len()
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get(id as usize).map(String::as_str)
    }

    pub fn id(&self, word: &str) -> Option<u32> {
        self.word_to_id.get(word).copied()
    }

    #[cfg(test)]
    fn count(&self, word: &str) -> u64 {
        self.id(word).map(|id| self.counts[id as usize]).unwrap_or(0)
    }
}

impl Default for DataIndexer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reserved_ids() {
        let indexer = DataIndexer::new();
        assert_eq!(indexer.id(PAD_TOKEN), Some(PAD_ID));
        assert_eq!(indexer.id(UNK_TOKEN), Some(UNK_ID));
        assert_eq!(indexer.id(BOS_TOKEN), Some(BOS_ID));
        assert_eq!(indexer.id(EOS_TOKEN), Some(EOS_ID));
        assert_eq!(indexer.get_vocab_size(), NUM_RESERVED);
    }

    #[test]
    fn test_vocab_size_counts_unique_words() {
        let mut indexer = DataIndexer::new();
        indexer.index_data(
            &sentences(&["the cat sat", "the dog ran"]),
            None,
            true,
            IndexMode::Train,
        );
        assert_eq!(indexer.get_vocab_size(), 5 + NUM_RESERVED);
        assert_eq!(indexer.count("the"), 2);
    }

    #[test]
    fn test_left_padding_to_max_length() {
        let mut indexer = DataIndexer::new();
        let batch = indexer.index_data(
            &sentences(&["a b", "a b c d"]),
            Some(5),
            false,
            IndexMode::Train,
        );
        assert_eq!(batch.lengths, vec![4, 6]);
        assert!(batch.ids.iter().all(|row| row.len() == 5));

        // "a b" → <s> a b </s> with one leading pad
        assert_eq!(batch.ids[0][0], PAD_ID);
        assert_eq!(batch.ids[0][1], BOS_ID);
        assert_eq!(batch.ids[0][4], EOS_ID);

        // "a b c d" loses its tail (</s>)
        assert_eq!(batch.ids[1][0], BOS_ID);
        assert_eq!(indexer.word(batch.ids[1][4]), Some("d"));
    }

    #[test]
    fn test_batch_max_when_unspecified() {
        let mut indexer = DataIndexer::new();
        let batch = indexer.index_data(
            &sentences(&["one", "one two three"]),
            None,
            false,
            IndexMode::Train,
        );
        assert_eq!(batch.width(), 5);
        assert_eq!(batch.inputs()[0].len(), 4);
        assert_eq!(batch.targets()[1][3], EOS_ID);
    }

    #[test]
    fn test_lookup_mode_maps_unknown_words() {
        let mut indexer = DataIndexer::new();
        indexer.index_data(&sentences(&["the cat"]), None, false, IndexMode::Train);
        let size = indexer.get_vocab_size();

        let batch = indexer.index_data(&sentences(&["the zebra"]), None, false, IndexMode::Lookup);
        assert_eq!(indexer.get_vocab_size(), size);
        assert_eq!(batch.ids[0][2], UNK_ID);
        assert_eq!(indexer.count("the"), 1);

        let shared = indexer.lookup_data(&sentences(&["the zebra"]), None, false);
        assert_eq!(shared, batch);
    }

    #[test]
    fn test_factor_targets_recompose() {
        let mut indexer = DataIndexer::new();
        let batch = indexer.index_data(
            &sentences(&["the cat sat", "the dog ran"]),
            None,
            false,
            IndexMode::Train,
        );
        let targets = batch.targets();
        let factored = indexer.factor_target_indices(&targets, 2).unwrap();
        assert_eq!(factored.len(), 4); // 9 ids need 4 binary digits

        for (r, row) in targets.iter().enumerate() {
            for (t, &id) in row.iter().enumerate() {
                let digits: Vec<usize> =
                    factored.iter().map(|f| f.digits[r][t] as usize).collect();
                assert_eq!(factoring::unfactor_index(&digits, 2), id as usize);
            }
        }
    }

    #[test]
    fn test_one_hot_layout() {
        let target = FactoredTarget {
            base: 3,
            digits: vec![vec![2, 0]],
        };
        assert_eq!(target.shape(), (1, 2, 3));
        assert_eq!(target.one_hot(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_factor_capacity_checked() {
        let indexer = DataIndexer::new();
        let err = indexer.factor_target_indices(&[vec![7]], 2).unwrap_err();
        assert!(matches!(err, LexsubError::Capacity { id: 7, .. }));
    }

    #[test]
    fn test_unfactor_sums_log_probabilities() {
        let mut indexer = DataIndexer::new();
        // ids: cat=4 (100), dog=5 (101), cat twice so it ranks first in frequency
        indexer.index_data(&sentences(&["cat cat dog"]), None, false, IndexMode::Train);

        let probs = vec![vec![0.2, 0.8], vec![0.9, 0.1], vec![0.3, 0.7]];
        let ranked = indexer.unfactor_probabilities(&probs, 10).unwrap();
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].word, "dog");
        let expected = 0.8f32.ln() + 0.9f32.ln() + 0.7f32.ln();
        assert!((ranked[0].score - expected).abs() < 1e-6);
        assert!(ranked[0].score >= ranked[1].score);
    }

    #[test]
    fn test_search_space_takes_most_frequent() {
        let mut indexer = DataIndexer::new();
        indexer.index_data(
            &sentences(&["rare common common common"]),
            None,
            false,
            IndexMode::Train,
        );
        let probs = vec![vec![0.5, 0.5]; 3];
        let ranked = indexer.unfactor_probabilities(&probs, 1).unwrap();
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].word, "common");
    }

    #[test]
    fn test_shared_search_space_matches_per_query_ranking() {
        let mut indexer = DataIndexer::new();
        indexer.index_data(
            &sentences(&["a b b c c c d d d d"]),
            None,
            false,
            IndexMode::Train,
        );
        let space = indexer.search_space(3);
        assert_eq!(space.len(), 3);
        assert_eq!(indexer.word(space[0]), Some("d"));

        let probs = vec![vec![0.6, 0.4], vec![0.3, 0.7], vec![0.5, 0.5]];
        assert_eq!(
            indexer.score_candidates(&probs, &space).unwrap(),
            indexer.unfactor_probabilities(&probs, 3).unwrap()
        );
    }
}
