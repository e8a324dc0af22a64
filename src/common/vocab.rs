use crate::common::error::RustSummarusError;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Padding token, implicitly mapped to index 0.
pub const PADDING_TOKEN: &str = "@@PADDING@@";
/// Out-of-vocabulary token, expected at index 1.
pub const OOV_TOKEN: &str = "@@UNKNOWN@@";
/// Sentence start symbol prepended to target sequences.
pub const START_TOKEN: &str = "@start@";
/// Sentence end symbol appended to target sequences.
pub const END_TOKEN: &str = "@end@";

/// # Token/index vocabulary shared by source and target sequences
/// Follows the AllenNLP conventions used to train the original summarus
/// models: index 0 is reserved for padding, index 1 for the out-of-vocabulary
/// token, and looking up a token absent from the vocabulary returns the
/// out-of-vocabulary index rather than an error.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    token_to_index: HashMap<String, i64>,
    index_to_token: Vec<String>,
}

impl Vocabulary {
    /// Loads a vocabulary from a `tokens.txt`-style file: one token per line,
    /// the first line holding the out-of-vocabulary token. The padding token
    /// is not stored in the file and is implicitly assigned index 0.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Vocabulary, RustSummarusError> {
        let f = File::open(path.as_ref())?;
        let mut index_to_token = vec![PADDING_TOKEN.to_string()];
        for line in BufReader::new(f).lines() {
            let token = line?;
            if !token.is_empty() {
                index_to_token.push(token);
            }
        }
        let vocabulary = Vocabulary::from_index(index_to_token);
        if !vocabulary.token_to_index.contains_key(OOV_TOKEN) {
            return Err(RustSummarusError::InvalidConfigurationError(format!(
                "vocabulary file {:?} does not contain the {} token",
                path.as_ref(),
                OOV_TOKEN
            )));
        }
        Ok(vocabulary)
    }

    /// Builds an in-memory vocabulary from a list of tokens, prepending the
    /// padding, out-of-vocabulary and sentence boundary symbols.
    pub fn from_tokens(tokens: &[&str]) -> Vocabulary {
        let mut index_to_token: Vec<String> = [PADDING_TOKEN, OOV_TOKEN, START_TOKEN, END_TOKEN]
            .iter()
            .map(|token| token.to_string())
            .collect();
        for token in tokens {
            if !index_to_token.iter().any(|existing| existing == token) {
                index_to_token.push(token.to_string());
            }
        }
        Vocabulary::from_index(index_to_token)
    }

    fn from_index(index_to_token: Vec<String>) -> Vocabulary {
        let mut token_to_index = HashMap::with_capacity(index_to_token.len());
        for (index, token) in index_to_token.iter().enumerate() {
            token_to_index
                .entry(token.clone())
                .or_insert(index as i64);
        }
        Vocabulary {
            token_to_index,
            index_to_token,
        }
    }

    pub fn size(&self) -> i64 {
        self.index_to_token.len() as i64
    }

    /// Returns the index of `token`, or the out-of-vocabulary index if the
    /// token is not part of the vocabulary.
    pub fn token_to_id(&self, token: &str) -> i64 {
        match self.token_to_index.get(token) {
            Some(index) => *index,
            None => self.oov_index(),
        }
    }

    pub fn id_to_token(&self, id: i64) -> Option<&str> {
        self.index_to_token.get(id as usize).map(String::as_str)
    }

    pub fn pad_index(&self) -> i64 {
        0
    }

    pub fn oov_index(&self) -> i64 {
        match self.token_to_index.get(OOV_TOKEN) {
            Some(index) => *index,
            None => 1,
        }
    }

    pub fn start_index(&self) -> i64 {
        self.token_to_id(START_TOKEN)
    }

    pub fn end_index(&self) -> i64 {
        self.token_to_id(END_TOKEN)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn vocabulary_lookup() {
        let vocabulary = Vocabulary::from_tokens(&["the", "cat", "sat"]);

        assert_eq!(vocabulary.size(), 7);
        assert_eq!(vocabulary.pad_index(), 0);
        assert_eq!(vocabulary.oov_index(), 1);
        assert_eq!(vocabulary.token_to_id("the"), 4);
        assert_eq!(vocabulary.token_to_id("zorblax"), vocabulary.oov_index());
        assert_eq!(vocabulary.id_to_token(5), Some("cat"));
        assert_eq!(vocabulary.id_to_token(42), None);
    }

    #[test]
    fn vocabulary_duplicate_tokens_keep_first_index() {
        let vocabulary = Vocabulary::from_tokens(&["the", "the", "cat"]);

        assert_eq!(vocabulary.size(), 6);
        assert_eq!(vocabulary.token_to_id("cat"), 5);
    }
}
