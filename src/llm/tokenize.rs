//! Tokenizers: turn a raw sentence into word tokens
//!
//! Handles:
//! - Whitespace splitting (used when tokenization is switched off)
//! - Splitting leading/trailing punctuation into tokens of their own
//! - Normalization of typographic apostrophes

/// Splits a sentence into word tokens
pub trait Tokenizer {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Plain whitespace splitting, no normalization
#[derive(Clone, Copy, Debug, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.split_whitespace().map(str::to_string).collect()
    }
}

/// Word/punctuation tokenizer
///
/// `"Hello, world."` becomes `["Hello", ",", "world", "."]`. Punctuation
/// inside a word (`don't`, `e-mail`) is left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct WordTokenizer;

impl WordTokenizer {
    fn is_punct(c: char) -> bool {
        c.is_ascii_punctuation()
            || matches!(c, '«' | '»' | '“' | '”' | '‘' | '…' | '—' | '–')
    }

    fn normalize(text: &str) -> String {
        text.replace(['’', 'ʼ', '`'], "'")
    }
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let normalized = Self::normalize(text);
        let mut tokens = Vec::new();

        for chunk in normalized.split_whitespace() {
            let chars: Vec<char> = chunk.chars().collect();
            let mut start = 0;
            let mut end = chars.len();

            while start < end && Self::is_punct(chars[start]) {
                tokens.push(chars[start].to_string());
                start += 1;
            }

            let mut trailing = Vec::new();
            while end > start && Self::is_punct(chars[end - 1]) {
                trailing.push(chars[end - 1].to_string());
                end -= 1;
            }

            if start < end {
                tokens.push(chars[start..end].iter().collect());
            }
            tokens.extend(trailing.into_iter().rev());
        }

        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_punctuation_split() {
        let tokens = WordTokenizer.tokenize("Hello, world.");
        assert_eq!(tokens, vec!["Hello", ",", "world", "."]);
    }

    #[test]
    fn test_inner_punctuation_kept() {
        let tokens = WordTokenizer.tokenize("(don’t) e-mail!?");
        assert_eq!(tokens, vec!["(", "don't", ")", "e-mail", "!", "?"]);
    }

    #[test]
    fn test_whitespace_only_split() {
        let tokens = WhitespaceTokenizer.tokenize("  the cat,  sat ");
        assert_eq!(tokens, vec!["the", "cat,", "sat"]);
    }
}
