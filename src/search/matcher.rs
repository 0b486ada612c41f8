//! Bidirectional chunk matcher
//!
//! Per-direction best-match with non-maximum suppression and a page-distance
//! tie-break, merged across both directions, topped up by a lower-threshold
//! reciprocal fallback, and gated on a minimum-evidence floor.

use super::scorer::has_minimum_evidence;
use super::types::{ChunkMatch, ChunkRecord};
use crate::config::SearchOptions;
use crate::error::{Result, SearchError};
use crate::vector::dot;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Scores closer than this are ties, resolved by page distance
const TIE_EPSILON: f32 = 1e-3;

/// Source chunks probed before an unrelated candidate is abandoned
const EARLY_BAIL_PROBE: usize = 40;

/// Options for the reciprocal fallback pass
#[derive(Debug, Clone)]
pub struct FallbackOptions {
    pub enabled: bool,
    pub threshold: f32,
    pub top_k: usize,
    pub proximity_score: f32,
    pub max_page_distance: Option<u32>,
    pub max_index_distance: Option<u32>,
    pub max_length_ratio: f32,
}

/// Options for one matcher invocation
#[derive(Debug, Clone)]
pub struct MatcherOptions {
    pub primary_threshold: f32,
    pub fallback: FallbackOptions,
}

impl MatcherOptions {
    /// Derive matcher options from the pipeline options, applying the
    /// fallback-threshold clamp
    pub fn from_search_options(options: &SearchOptions) -> Self {
        Self {
            primary_threshold: options.stage2_threshold,
            fallback: FallbackOptions {
                enabled: options.stage2_fallback_enabled,
                threshold: options.effective_fallback_threshold(),
                top_k: options.stage2_fallback_top_k,
                proximity_score: options.stage2_proximity_score,
                max_page_distance: options.stage2_max_page_distance,
                max_index_distance: options.stage2_max_index_distance,
                max_length_ratio: options.stage2_max_length_ratio,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("primary_threshold", self.primary_threshold),
            ("fallback_threshold", self.fallback.threshold),
            ("proximity_score", self.fallback.proximity_score),
        ] {
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(SearchError::ThresholdOutOfRange { name, value }.into());
            }
        }
        Ok(())
    }
}

impl Default for MatcherOptions {
    fn default() -> Self {
        Self::from_search_options(&SearchOptions::default())
    }
}

/// Match two chunk arrays bidirectionally
///
/// Returns `Ok(None)` when the matched characters fall below the
/// minimum-evidence floor, so callers can distinguish "unrelated" from a
/// broken candidate. Dimension mismatches surface as errors for the caller
/// to log and localize.
pub fn match_chunks(
    source: &[ChunkRecord],
    target: &[ChunkRecord],
    options: &MatcherOptions,
) -> Result<Option<Vec<ChunkMatch>>> {
    options.validate()?;

    if source.is_empty() || target.is_empty() {
        return Ok(None);
    }

    // Step 1+2: directional best matches with NMS, tie-break, early bail
    let forward = directional_best_matches(source, target, options.primary_threshold)?;
    let backward = directional_best_matches(target, source, options.primary_threshold)?;

    // Step 3: merge both directions with source-document orientation
    let mut pairs: Vec<ChunkMatch> = Vec::with_capacity(forward.len() + backward.len());
    for (i, j, score) in forward {
        pairs.push(ChunkMatch {
            source: source[i].as_ref_descriptor(),
            target: target[j].as_ref_descriptor(),
            score,
        });
    }
    for (i, j, score) in backward {
        pairs.push(ChunkMatch {
            source: source[j].as_ref_descriptor(),
            target: target[i].as_ref_descriptor(),
            score,
        });
    }
    let mut pairs = dedup_pairs(pairs);

    // Step 4: reciprocal fallback for chunks the primary pass left out
    if options.fallback.enabled {
        let fallback_pairs = reciprocal_fallback(source, target, &pairs, &options.fallback)?;
        if !fallback_pairs.is_empty() {
            debug!(count = fallback_pairs.len(), "fallback pass added pairs");
            pairs.extend(fallback_pairs);
            pairs = dedup_pairs(pairs);
        }
    }

    // Step 5: minimum evidence gate
    let total_source: u64 = source.iter().map(|c| c.character_count as u64).sum();
    let total_target: u64 = target.iter().map(|c| c.character_count as u64).sum();
    let matched_source: u64 = unique_char_sum(pairs.iter().map(|p| (&p.source.id, p.source.character_count)));
    let matched_target: u64 = unique_char_sum(pairs.iter().map(|p| (&p.target.id, p.target.character_count)));
    let matched = matched_source.min(matched_target);

    if !has_minimum_evidence(matched, total_source, total_target) {
        debug!(
            matched,
            total_source, total_target, "insufficient evidence, dropping candidate"
        );
        return Ok(None);
    }

    Ok(Some(pairs))
}

/// Best match per `from` chunk against `to`, with NMS and tie-breaking
///
/// Gives up on the direction when the first `min(40, |from|)` chunks see
/// zero above-threshold candidates, to skip obviously unrelated documents
/// quickly.
fn directional_best_matches(
    from: &[ChunkRecord],
    to: &[ChunkRecord],
    threshold: f32,
) -> Result<Vec<(usize, usize, f32)>> {
    let probe = EARLY_BAIL_PROBE.min(from.len());
    let mut any_candidate = false;
    let mut matches = Vec::new();

    for (i, chunk) in from.iter().enumerate() {
        let mut best: Option<(usize, f32, u32)> = None;

        for (j, other) in to.iter().enumerate() {
            let score = dot(&chunk.embedding, &other.embedding)?;
            if score < threshold {
                continue;
            }
            any_candidate = true;
            let page_distance = chunk.page_number.abs_diff(other.page_number);
            best = match best {
                None => Some((j, score, page_distance)),
                Some((bj, bscore, bdist)) => {
                    if (score - bscore).abs() < TIE_EPSILON {
                        if page_distance < bdist {
                            Some((j, score, page_distance))
                        } else {
                            Some((bj, bscore, bdist))
                        }
                    } else if score > bscore {
                        Some((j, score, page_distance))
                    } else {
                        Some((bj, bscore, bdist))
                    }
                }
            };
        }

        if let Some((j, score, _)) = best {
            matches.push((i, j, score));
        }

        if i + 1 == probe && !any_candidate {
            return Ok(Vec::new());
        }
    }

    Ok(matches)
}

/// Sort by score descending and keep the first of each (source, target) pair
fn dedup_pairs(mut pairs: Vec<ChunkMatch>) -> Vec<ChunkMatch> {
    pairs.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen: HashSet<(String, String)> = HashSet::with_capacity(pairs.len());
    pairs.retain(|p| seen.insert((p.source.id.clone(), p.target.id.clone())));
    pairs
}

fn unique_char_sum<'a>(items: impl Iterator<Item = (&'a String, u32)>) -> u64 {
    let mut seen = HashSet::new();
    let mut sum = 0u64;
    for (id, chars) in items {
        if seen.insert(id) {
            sum += chars as u64;
        }
    }
    sum
}

/// Reciprocal lower-threshold pass over chunks the primary pass missed
fn reciprocal_fallback(
    source: &[ChunkRecord],
    target: &[ChunkRecord],
    primary: &[ChunkMatch],
    options: &FallbackOptions,
) -> Result<Vec<ChunkMatch>> {
    let matched_source: HashSet<&str> = primary.iter().map(|p| p.source.id.as_str()).collect();
    let matched_target: HashSet<&str> = primary.iter().map(|p| p.target.id.as_str()).collect();

    let open_source: Vec<&ChunkRecord> = source
        .iter()
        .filter(|c| !matched_source.contains(c.id.as_str()))
        .collect();
    let open_target: Vec<&ChunkRecord> = target
        .iter()
        .filter(|c| !matched_target.contains(c.id.as_str()))
        .collect();

    if open_source.is_empty() || open_target.is_empty() {
        return Ok(Vec::new());
    }

    // Top-K neighbour lists at the fallback threshold, both directions
    let source_top = top_k_lists(&open_source, &open_target, options.threshold, options.top_k)?;
    let target_top = top_k_lists(&open_target, &open_source, options.threshold, options.top_k)?;

    let target_by_id: HashMap<&str, &ChunkRecord> =
        open_target.iter().map(|c| (c.id.as_str(), *c)).collect();

    let mut accepted = Vec::new();
    for chunk in &open_source {
        let Some(neighbours) = source_top.get(chunk.id.as_str()) else {
            continue;
        };
        for (target_id, forward_score) in neighbours {
            // Reciprocity: the pair must sit in each other's top-K
            let Some(reverse) = target_top.get(target_id.as_str()) else {
                continue;
            };
            let Some((_, reverse_score)) = reverse.iter().find(|(id, _)| id == &chunk.id) else {
                continue;
            };

            if forward_score.min(*reverse_score) < options.threshold {
                continue;
            }

            let other = target_by_id[target_id.as_str()];
            let pair_score = (forward_score + reverse_score) / 2.0;

            if pair_score < options.proximity_score
                && !within_proximity(chunk, other, options)
            {
                continue;
            }

            let len_a = chunk.character_count as f32;
            let len_b = other.character_count as f32;
            if (len_a - len_b).abs() / len_a.max(len_b) > options.max_length_ratio {
                continue;
            }

            accepted.push(ChunkMatch {
                source: chunk.as_ref_descriptor(),
                target: other.as_ref_descriptor(),
                score: pair_score,
            });
        }
    }

    Ok(accepted)
}

/// Spatial proximity check for low-scoring fallback pairs
///
/// Passes when any enabled constraint holds; with no constraints enabled
/// there is nothing to check.
fn within_proximity(a: &ChunkRecord, b: &ChunkRecord, options: &FallbackOptions) -> bool {
    let mut any_enabled = false;

    if let Some(max_index) = options.max_index_distance {
        any_enabled = true;
        if a.chunk_index.abs_diff(b.chunk_index) as u32 <= max_index {
            return true;
        }
    }
    if let Some(max_pages) = options.max_page_distance {
        any_enabled = true;
        if a.page_number.abs_diff(b.page_number) <= max_pages {
            return true;
        }
    }

    !any_enabled
}

/// Per-chunk top-K neighbours at or above the threshold
fn top_k_lists<'a>(
    from: &[&'a ChunkRecord],
    to: &[&'a ChunkRecord],
    threshold: f32,
    top_k: usize,
) -> Result<HashMap<&'a str, Vec<(String, f32)>>> {
    let mut lists = HashMap::with_capacity(from.len());

    for chunk in from {
        let mut neighbours: Vec<(String, f32)> = Vec::new();
        for other in to {
            let score = dot(&chunk.embedding, &other.embedding)?;
            if score >= threshold {
                neighbours.push((other.id.clone(), score));
            }
        }
        if neighbours.is_empty() {
            continue;
        }
        neighbours.sort_by(|a, b| b.1.total_cmp(&a.1));
        neighbours.truncate(top_k);
        lists.insert(chunk.id.as_str(), neighbours);
    }

    Ok(lists)
}
