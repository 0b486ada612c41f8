//! Paragraph cleaning and chunk building
//!
//! Turns the ordered paragraphs of an extracted document into ordered,
//! non-overlapping chunks under a hard character budget. Chunk granularity
//! determines matching correctness downstream, so the cleaning and packing
//! rules here are the contract the matcher relies on.

pub mod chunker;
pub mod clean;
pub mod types;

pub use chunker::Chunker;
pub use types::{split_sentences, Chunk, Paragraph};
