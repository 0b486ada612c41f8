//! Adaptive coverage scoring
//!
//! Coverage is directional and character-based: the fraction of each
//! document's characters covered by its uniquely matched chunks. Neither
//! score is collapsed into a single number here; the presentation layer
//! decides how to combine them.

use super::types::{ChunkMatch, SimilarityScores};
use crate::error::{Result, SearchError};
use std::collections::HashSet;

/// Absolute floor on matched characters, roughly eight typical chunks
pub const MIN_EVIDENCE_CHARS: u64 = 1600;

/// Fraction of the smaller document that must be matched
pub const MIN_EVIDENCE_FRACTION: f64 = 0.05;

/// Matched characters required before a similarity decision is allowed
pub fn minimum_evidence_threshold(total_source_chars: u64, total_target_chars: u64) -> u64 {
    let smaller = total_source_chars.min(total_target_chars);
    let fraction = (smaller as f64 * MIN_EVIDENCE_FRACTION).ceil() as u64;
    MIN_EVIDENCE_CHARS.max(fraction)
}

/// Whether matched characters clear the minimum-evidence floor
pub fn has_minimum_evidence(
    matched_chars: u64,
    total_source_chars: u64,
    total_target_chars: u64,
) -> bool {
    matched_chars >= minimum_evidence_threshold(total_source_chars, total_target_chars)
}

/// Compute directional coverage scores for a match set
pub fn score_matches(
    matches: &[ChunkMatch],
    total_source_chars: u64,
    total_target_chars: u64,
) -> Result<SimilarityScores> {
    if total_source_chars == 0 {
        return Err(SearchError::EmptyDocument("source".to_string()).into());
    }
    if total_target_chars == 0 {
        return Err(SearchError::EmptyDocument("target".to_string()).into());
    }

    let mut seen_source = HashSet::new();
    let mut seen_target = HashSet::new();
    let mut matched_source_chars = 0u64;
    let mut matched_target_chars = 0u64;

    for m in matches {
        if seen_source.insert(m.source.id.as_str()) {
            matched_source_chars += m.source.character_count as u64;
        }
        if seen_target.insert(m.target.id.as_str()) {
            matched_target_chars += m.target.character_count as u64;
        }
    }

    let source_score = (matched_source_chars as f64 / total_source_chars as f64).min(1.0) as f32;
    let target_score = (matched_target_chars as f64 / total_target_chars as f64).min(1.0) as f32;

    let explanation = format!(
        "{:.1}% of source characters ({} of {}) and {:.1}% of target characters ({} of {}) are covered by {} matched chunk pairs",
        source_score * 100.0,
        matched_source_chars,
        total_source_chars,
        target_score * 100.0,
        matched_target_chars,
        total_target_chars,
        matches.len(),
    );

    Ok(SimilarityScores {
        source_score,
        target_score,
        matched_source_chars,
        matched_target_chars,
        explanation,
    })
}
