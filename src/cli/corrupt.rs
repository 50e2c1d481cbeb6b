//! Corruption workflow: swap one content word per test sentence
//!
//! For every test sentence a random replaceable position is chosen, the model
//! ranks substitutes for it, and the best one that is not a stop word (nor
//! the original word) produces the corrupted variant.

use rand::seq::SliceRandom;
use rand::Rng;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::Result;
use crate::llm::constraints::Constraints;
use crate::llm::scoring::Substitute;
use crate::llm::tokenize::{Tokenizer, WordTokenizer};
use crate::replacer::WordReplacer;

/// A test sentence with the position chosen for replacement
#[derive(Clone, Debug, PartialEq)]
pub struct PreparedSentence {
    pub words: Vec<String>,
    pub location: usize,
}

impl PreparedSentence {
    pub fn text(&self) -> String {
        self.words.join(" ")
    }
}

/// An original sentence and its corrupted variant
#[derive(Clone, Debug, PartialEq)]
pub struct CorruptedPair {
    pub original: String,
    pub corrupted: String,
}

/// Query settings forwarded to `WordReplacer::get_substitutes`
#[derive(Clone, Debug)]
pub struct CorruptOptions {
    pub num_substitutes: usize,
    pub tokenize: bool,
    pub search_space_size: usize,
}

/// Tokenize test lines and pick a replaceable location in each
///
/// Lines without any eligible position are dropped.
pub fn prepare_sentences<R: Rng>(
    lines: &[String],
    constraints: &Constraints,
    rng: &mut R,
) -> Vec<PreparedSentence> {
    let tokenizer = WordTokenizer;
    let mut prepared = Vec::with_capacity(lines.len());

    for line in lines {
        let words = tokenizer.tokenize(line.trim());
        if !constraints.has_content(&words) {
            debug!(line = %line, "Only stop words, skipping");
            continue;
        }
        match constraints.eligible_locations(&words).choose(rng) {
            Some(&location) => prepared.push(PreparedSentence { words, location }),
            None => debug!(line = %line, "No replaceable position, skipping"),
        }
    }

    prepared
}

/// Apply the first acceptable substitute of each sentence
pub fn corrupt(
    prepared: &[PreparedSentence],
    substitutes: &[Vec<Substitute>],
    constraints: &Constraints,
) -> Vec<CorruptedPair> {
    prepared
        .iter()
        .zip(substitutes)
        .filter_map(|(sentence, candidates)| {
            let original_word = &sentence.words[sentence.location];
            let replacement = constraints.first_replacement(candidates, original_word)?;

            let mut corrupted = sentence.words.clone();
            corrupted[sentence.location] = replacement.word.clone();
            Some(CorruptedPair {
                original: sentence.text(),
                corrupted: corrupted.join(" "),
            })
        })
        .collect()
}

/// Run the whole corruption workflow over raw test lines
pub fn corrupt_sentences<R: Rng>(
    replacer: &WordReplacer,
    lines: &[String],
    options: &CorruptOptions,
    constraints: &Constraints,
    rng: &mut R,
) -> Result<Vec<CorruptedPair>> {
    let prepared = prepare_sentences(lines, constraints, rng);
    let (_, train_sequence_length) = replacer.get_model_input_shape()?;
    info!(
        sentences = prepared.len(),
        skipped = lines.len() - prepared.len(),
        search_space_size = options.search_space_size,
        "Querying substitutes"
    );

    let texts: Vec<String> = prepared.iter().map(PreparedSentence::text).collect();
    let locations: Vec<usize> = prepared.iter().map(|p| p.location).collect();
    let substitutes = replacer.get_substitutes(
        &texts,
        &locations,
        train_sequence_length,
        options.num_substitutes,
        options.tokenize,
        options.search_space_size,
    )?;

    let pairs = corrupt(&prepared, &substitutes, constraints);
    info!(corrupted = pairs.len(), "Corruption finished");
    Ok(pairs)
}

/// Write `original \t corrupted` lines
pub fn write_pairs(path: &Path, pairs: &[CorruptedPair]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    for pair in pairs {
        writeln!(out, "{}\t{}", pair.original, pair.corrupted)?;
    }
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn lines(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_stop_word_sentence_is_skipped() {
        let mut rng = StdRng::seed_from_u64(1);
        let prepared = prepare_sentences(&lines(&["the , of a ."]), &Constraints::new(), &mut rng);
        assert!(prepared.is_empty());
    }

    #[test]
    fn test_location_is_content_word() {
        let mut rng = StdRng::seed_from_u64(7);
        let prepared = prepare_sentences(
            &lines(&["The cat sat on the mat."]),
            &Constraints::new(),
            &mut rng,
        );
        assert_eq!(prepared.len(), 1);
        let chosen = &prepared[0].words[prepared[0].location];
        assert!(!Constraints::new().is_stop_word(chosen));
        assert_ne!(chosen, ".");
    }

    #[test]
    fn test_corrupt_skips_when_no_replacement() {
        let prepared = vec![PreparedSentence {
            words: lines(&["the", "cat", "sat", "."]),
            location: 1,
        }];
        let substitutes = vec![vec![Substitute::new(-0.1, "cat"), Substitute::new(-0.2, "the")]];
        assert!(corrupt(&prepared, &substitutes, &Constraints::new()).is_empty());
    }

    #[test]
    fn test_corrupt_replaces_location() {
        let prepared = vec![PreparedSentence {
            words: lines(&["the", "cat", "sat", "."]),
            location: 1,
        }];
        let substitutes = vec![vec![Substitute::new(-0.1, "the"), Substitute::new(-0.2, "dog")]];
        let pairs = corrupt(&prepared, &substitutes, &Constraints::new());
        assert_eq!(
            pairs,
            vec![CorruptedPair {
                original: "the cat sat .".to_string(),
                corrupted: "the dog sat .".to_string(),
            }]
        );
    }

    #[test]
    fn test_write_pairs_tab_separated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let pairs = vec![CorruptedPair {
            original: "a cat".to_string(),
            corrupted: "a dog".to_string(),
        }];
        write_pairs(&path, &pairs).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a cat\ta dog\n");
    }
}
