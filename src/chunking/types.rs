//! Type definitions for paragraph cleaning and chunk building

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A paragraph as produced by the external extractor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paragraph {
    pub text: String,
    pub page_number: u32,
    pub index: usize,
}

impl Paragraph {
    pub fn new(text: impl Into<String>, page_number: u32, index: usize) -> Self {
        Self {
            text: text.into(),
            page_number,
            index,
        }
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// A packed chunk ready for embedding and matching
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub page_number: u32,
    pub chunk_index: usize,
    pub character_count: usize,
}

static SENTENCE_BOUNDARY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[.!?]["')\]]?\s+"#).expect("sentence boundary regex"));

/// Split text into sentences at terminal punctuation
///
/// The boundary is terminal punctuation optionally followed by a closing
/// quote or bracket, then whitespace. The trailing sentence is always
/// emitted, so the concatenation of the parts reproduces the input minus
/// inter-sentence whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;

    for boundary in SENTENCE_BOUNDARY.find_iter(text) {
        let end = boundary.end();
        let sentence = text[last..end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last = end;
    }

    let tail = text[last..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}
