//! Greedy chunk builder over cleaned paragraphs

use super::clean;
use super::types::{split_sentences, Chunk, Paragraph};
use crate::config::ChunkerConfig;
use crate::error::Result;
use tracing::debug;

/// Words that signal a paragraph was cut mid-clause by the extractor
const TRAILING_STOP_WORDS: &[&str] = &[
    "the", "a", "an", "of", "to", "in", "on", "at", "by", "for", "with", "and", "or", "as",
    "any", "each", "such", "its", "their",
];

/// Builds ordered, non-overlapping chunks from extracted paragraphs
///
/// Every chunk stays within the configured hard character budget; the
/// paragraph cleaning rules run first, in their contractual order.
pub struct Chunker {
    config: ChunkerConfig,
}

impl Chunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Run the full cleaning and packing pipeline
    pub fn chunk(&self, paragraphs: Vec<Paragraph>) -> Result<Vec<Chunk>> {
        let max = self.config.max_characters;
        let min = self.config.min_characters;
        let input_count = paragraphs.len();

        let paragraphs = clean::drop_footnotes(paragraphs);
        let paragraphs = clean::merge_form_options(paragraphs, max);
        let paragraphs = clean::drop_noise(paragraphs);
        let paragraphs = clean::strip_prefixes(paragraphs);
        let paragraphs = merge_incomplete(paragraphs, max);
        let paragraphs = merge_tiny(paragraphs, min, max);
        let paragraphs = split_oversized(paragraphs, max);
        let chunks = pack(paragraphs, max);

        debug!(
            input_paragraphs = input_count,
            chunks = chunks.len(),
            "chunked document"
        );
        Ok(chunks)
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkerConfig::default(),
        }
    }
}

fn ends_with_terminal_punctuation(text: &str) -> bool {
    let trimmed = text.trim_end_matches(['"', '\'', ')', ']']);
    trimmed.ends_with(['.', '!', '?', ':', ';'])
}

fn ends_with_stop_word(text: &str) -> bool {
    let last = text
        .trim_end_matches(|c: char| !c.is_alphanumeric())
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or("");
    TRAILING_STOP_WORDS
        .iter()
        .any(|w| last.eq_ignore_ascii_case(w))
}

fn starts_lowercase(text: &str) -> bool {
    text.trim_start()
        .chars()
        .next()
        .map(|c| c.is_lowercase())
        .unwrap_or(false)
}

/// Merge paragraphs the extractor cut mid-sentence
fn merge_incomplete(paragraphs: Vec<Paragraph>, max_characters: usize) -> Vec<Paragraph> {
    let mut result: Vec<Paragraph> = Vec::with_capacity(paragraphs.len());

    for paragraph in paragraphs {
        if let Some(last) = result.last_mut() {
            let incomplete = !ends_with_terminal_punctuation(&last.text)
                || ends_with_stop_word(&last.text)
                || starts_lowercase(&paragraph.text);
            if incomplete && last.char_count() + 1 + paragraph.char_count() <= max_characters {
                last.text.push(' ');
                last.text.push_str(paragraph.text.trim());
                continue;
            }
        }
        result.push(paragraph);
    }

    result
}

/// Merge paragraphs below the soft floor with a neighbour under the cap
fn merge_tiny(paragraphs: Vec<Paragraph>, min_characters: usize, max_characters: usize) -> Vec<Paragraph> {
    let mut result: Vec<Paragraph> = Vec::with_capacity(paragraphs.len());

    for paragraph in paragraphs {
        if let Some(last) = result.last_mut() {
            let either_tiny = last.char_count() < min_characters
                || paragraph.char_count() < min_characters;
            if either_tiny && last.char_count() + 1 + paragraph.char_count() <= max_characters {
                last.text.push(' ');
                last.text.push_str(paragraph.text.trim());
                continue;
            }
        }
        result.push(paragraph);
    }

    result
}

/// Split paragraphs over the cap at sentence boundaries
///
/// A single sentence longer than the cap falls back to word-boundary
/// splits so the size invariant holds for pathological extractions.
fn split_oversized(paragraphs: Vec<Paragraph>, max_characters: usize) -> Vec<Paragraph> {
    let mut result = Vec::with_capacity(paragraphs.len());

    for paragraph in paragraphs {
        if paragraph.char_count() <= max_characters {
            result.push(paragraph);
            continue;
        }

        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        for sentence in split_sentences(&paragraph.text) {
            for fragment in split_long_sentence(&sentence, max_characters) {
                let extra = if current.is_empty() { 0 } else { 1 };
                if !current.is_empty()
                    && current.chars().count() + extra + fragment.chars().count() > max_characters
                {
                    pieces.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&fragment);
            }
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        for text in pieces {
            result.push(Paragraph::new(text, paragraph.page_number, paragraph.index));
        }
    }

    result
}

/// Split one sentence into fragments no longer than the cap
fn split_long_sentence(sentence: &str, max_characters: usize) -> Vec<String> {
    if sentence.chars().count() <= max_characters {
        return vec![sentence.to_string()];
    }

    let mut fragments = Vec::new();
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        let extra = if current.is_empty() { 0 } else { 1 };
        if !current.is_empty()
            && current.chars().count() + extra + word.chars().count() > max_characters
        {
            fragments.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        // A single word over the cap is cut at the character level
        if word.chars().count() > max_characters {
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_characters) {
                fragments.push(piece.iter().collect());
            }
            continue;
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        fragments.push(current);
    }

    fragments
}

/// Greedily pack paragraphs into chunks under the cap
///
/// Each chunk holds at least one paragraph; further paragraphs join while
/// the running total plus the joining space fits. Zero overlap by
/// construction; the chunk takes the first packed paragraph's page.
fn pack(paragraphs: Vec<Paragraph>, max_characters: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current_text = String::new();
    let mut current_page = 0u32;

    for paragraph in paragraphs {
        if current_text.is_empty() {
            current_text = paragraph.text;
            current_page = paragraph.page_number;
            continue;
        }

        if current_text.chars().count() + 1 + paragraph.char_count() <= max_characters {
            current_text.push(' ');
            current_text.push_str(&paragraph.text);
        } else {
            chunks.push(seal(std::mem::take(&mut current_text), current_page, chunks.len()));
            current_text = paragraph.text;
            current_page = paragraph.page_number;
        }
    }

    if !current_text.is_empty() {
        chunks.push(seal(current_text, current_page, chunks.len()));
    }

    chunks
}

fn seal(text: String, page_number: u32, chunk_index: usize) -> Chunk {
    let character_count = text.chars().count();
    Chunk {
        text,
        page_number,
        chunk_index,
        character_count,
    }
}
