//! Stage-1 chunk-level candidate pre-filter
//!
//! Shrinks an oversized stage-0 candidate set by counting chunk-level ANN
//! matches restricted to those candidates. A pass-through when the set
//! already fits stage-2's capacity.

use super::types::{ChunkRecord, Stage0Result, Stage1Result};
use crate::config::SearchOptions;
use crate::error::Result;
use crate::store::{QueryFilter, VectorIndex};
use futures::future::join_all;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, warn};

/// Per-chunk neighbour budget, auto-sized from the candidate count
pub fn auto_neighbors_per_chunk(candidate_count: usize) -> usize {
    match candidate_count {
        n if n < 400 => 36,
        n if n < 600 => 45,
        n if n < 800 => 54,
        _ => 60,
    }
}

/// Pre-filter stage-0 candidates with candidate-restricted chunk ANN
pub async fn prefilter_candidates(
    index: &dyn VectorIndex,
    source_chunks: &[ChunkRecord],
    stage0: &Stage0Result,
    options: &SearchOptions,
) -> Result<Stage1Result> {
    let started = Instant::now();
    let candidate_count = stage0.candidate_ids.len();

    // Pass-through: the candidate set already fits stage-2's capacity
    if !options.stage1_enabled || candidate_count <= options.stage1_top_k {
        return Ok(Stage1Result {
            candidate_ids: stage0.candidate_ids.clone(),
            match_counts: vec![0; candidate_count],
            time_ms: started.elapsed().as_millis() as u64,
        });
    }

    let neighbors = options
        .stage1_neighbors_per_chunk
        .unwrap_or_else(|| auto_neighbors_per_chunk(candidate_count));
    let filter = QueryFilter::new().in_set("document_id", stage0.candidate_ids.clone());

    let mut counts: HashMap<&str, usize> = HashMap::with_capacity(candidate_count);
    let candidate_rank: HashMap<&str, usize> = stage0
        .candidate_ids
        .iter()
        .enumerate()
        .map(|(rank, id)| (id.as_str(), rank))
        .collect();

    for batch in source_chunks.chunks(options.stage1_batch_size) {
        let queries = batch
            .iter()
            .map(|chunk| index.query(&chunk.embedding, neighbors, &filter, true));

        for outcome in join_all(queries).await {
            let hits = match outcome {
                Ok(hits) => hits,
                Err(err) => {
                    warn!(error = %err, "stage-1 chunk query failed, skipping batch entry");
                    continue;
                }
            };
            for hit in hits {
                let Some(document_id) = hit.document_id() else {
                    continue;
                };
                if let Some((&id, _)) = candidate_rank.get_key_value(document_id) {
                    *counts.entry(id).or_insert(0) += 1;
                }
            }
        }
    }

    // Rank by match count, stage-0 order breaking ties
    let mut ranked: Vec<(&str, usize)> = stage0
        .candidate_ids
        .iter()
        .map(|id| (id.as_str(), counts.get(id.as_str()).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.cmp(&a.1)
            .then_with(|| candidate_rank[a.0].cmp(&candidate_rank[b.0]))
    });
    ranked.truncate(options.stage1_top_k);

    let time_ms = started.elapsed().as_millis() as u64;
    info!(
        in_candidates = candidate_count,
        out_candidates = ranked.len(),
        neighbors,
        time_ms,
        "stage-1 pre-filter complete"
    );

    Ok(Stage1Result {
        candidate_ids: ranked.iter().map(|(id, _)| id.to_string()).collect(),
        match_counts: ranked.iter().map(|(_, count)| *count).collect(),
        time_ms,
    })
}
