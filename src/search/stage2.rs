//! Stage-2 final scoring fan-out
//!
//! Candidates are partitioned across a bounded worker pool; each worker is
//! strictly sequential over its slice, and every candidate races a
//! deadline. Failures stay local to one candidate.

use super::matcher::{match_chunks, MatcherOptions};
use super::scorer::score_matches;
use super::sections::detect_sections;
use super::types::{ChunkRecord, DocumentSummary, SimilarityResult};
use crate::config::SearchOptions;
use crate::error::Result;
use crate::store::{read_all_chunks, ChunkEmbeddingReader, DocumentReader};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Results kept after the final sort
pub const MAX_RESULTS: usize = 30;

/// Hard ceiling on the worker pool
pub const MAX_WORKERS: usize = 28;

/// Read-only source context shared by every worker
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub document_id: String,
    pub chunks: Arc<Vec<ChunkRecord>>,
    pub total_characters: u64,
}

/// Worker count auto-sized from the candidate count
pub fn auto_worker_count(candidate_count: usize) -> usize {
    MAX_WORKERS.min(candidate_count.div_ceil(8).max(4))
}

/// Score every candidate and keep the best-ranked results
pub async fn score_candidates(
    documents: Arc<dyn DocumentReader>,
    chunk_reader: Arc<dyn ChunkEmbeddingReader>,
    source: SourceContext,
    candidate_ids: Vec<String>,
    options: &SearchOptions,
) -> Result<Vec<SimilarityResult>> {
    if candidate_ids.is_empty() {
        return Ok(Vec::new());
    }

    let workers = options
        .stage2_parallel_workers
        .unwrap_or_else(|| auto_worker_count(candidate_ids.len()))
        .max(1);
    let batch_size = candidate_ids.len().div_ceil(workers);
    let matcher_options = Arc::new(MatcherOptions::from_search_options(options));
    let deadline = Duration::from_millis(options.stage2_timeout_ms);
    let max_page_gap = options.max_page_gap;

    let mut tasks = Vec::with_capacity(workers);
    for batch in candidate_ids.chunks(batch_size) {
        let batch: Vec<String> = batch.to_vec();
        let documents = documents.clone();
        let chunk_reader = chunk_reader.clone();
        let source = source.clone();
        let matcher_options = matcher_options.clone();

        tasks.push(tokio::spawn(async move {
            let mut results = Vec::with_capacity(batch.len());
            for candidate_id in batch {
                let outcome = timeout(
                    deadline,
                    process_candidate(
                        documents.as_ref(),
                        chunk_reader.as_ref(),
                        &source,
                        &candidate_id,
                        &matcher_options,
                        max_page_gap,
                    ),
                )
                .await;
                match outcome {
                    Ok(result) => results.push(result),
                    Err(_) => {
                        warn!(
                            source_id = %source.document_id,
                            candidate_id = %candidate_id,
                            timeout_ms = deadline.as_millis() as u64,
                            "candidate deadline exceeded, skipping"
                        );
                        results.push(None);
                    }
                }
            }
            results
        }));
    }

    let mut results: Vec<SimilarityResult> = Vec::new();
    for joined in join_all(tasks).await {
        match joined {
            Ok(batch_results) => results.extend(batch_results.into_iter().flatten()),
            Err(err) => warn!(error = %err, "stage-2 worker task failed"),
        }
    }

    // Deterministic final ranking; document id is the last tie-break so
    // repeat invocations produce identical arrays
    results.sort_by(|a, b| {
        b.scores
            .source_score
            .total_cmp(&a.scores.source_score)
            .then(b.scores.target_score.total_cmp(&a.scores.target_score))
            .then(b.scores.matched_target_chars.cmp(&a.scores.matched_target_chars))
            .then(b.matched_chunks.cmp(&a.matched_chunks))
            .then(a.document.id.cmp(&b.document.id))
    });
    results.truncate(MAX_RESULTS);

    Ok(results)
}

/// Score one candidate; data-quality problems yield `None`, never an error
async fn process_candidate(
    documents: &dyn DocumentReader,
    chunk_reader: &dyn ChunkEmbeddingReader,
    source: &SourceContext,
    candidate_id: &str,
    matcher_options: &MatcherOptions,
    max_page_gap: u32,
) -> Option<SimilarityResult> {
    let source_id = source.document_id.as_str();

    let record = match documents.get_document(candidate_id).await {
        Ok(Some(record)) => record,
        Ok(None) => {
            warn!(source_id, candidate_id, "candidate document missing, skipping");
            return None;
        }
        Err(err) => {
            warn!(source_id, candidate_id, error = %err, "candidate metadata read failed, skipping");
            return None;
        }
    };

    let total_target_chars = match record.total_characters {
        Some(total) if total > 0 => total,
        _ => {
            warn!(source_id, candidate_id, "candidate has no totalCharacters, skipping");
            return None;
        }
    };

    let rows = match read_all_chunks(chunk_reader, candidate_id, None).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(source_id, candidate_id, error = %err, "candidate chunk read failed, skipping");
            return None;
        }
    };
    if rows.is_empty() {
        warn!(source_id, candidate_id, "candidate has no chunks, skipping");
        return None;
    }

    let target_chunks = match build_chunk_records(candidate_id, rows) {
        Ok(chunks) => chunks,
        Err(err) => {
            warn!(source_id, candidate_id, error = %err, "candidate embedding unparseable, skipping");
            return None;
        }
    };

    let matches = match match_chunks(&source.chunks, &target_chunks, matcher_options) {
        Ok(Some(matches)) => matches,
        Ok(None) => {
            debug!(source_id, candidate_id, "insufficient evidence, dropping candidate");
            return None;
        }
        Err(err) => {
            warn!(source_id, candidate_id, error = %err, "matcher failed, skipping candidate");
            return None;
        }
    };

    let scores = match score_matches(&matches, source.total_characters, total_target_chars) {
        Ok(scores) => scores,
        Err(err) => {
            warn!(source_id, candidate_id, error = %err, "scoring failed, skipping candidate");
            return None;
        }
    };

    let sections = detect_sections(&matches, max_page_gap);

    Some(SimilarityResult {
        document: DocumentSummary::from_record(&record, total_target_chars),
        scores,
        matched_chunks: matches.len(),
        sections,
    })
}

/// Deduplicate rows by chunk index and parse their embeddings
pub fn build_chunk_records(
    document_id: &str,
    rows: Vec<crate::store::ChunkEmbeddingRow>,
) -> Result<Vec<ChunkRecord>> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        if !seen.insert(row.chunk_index) {
            continue;
        }
        records.push(ChunkRecord::from_row(document_id, &row)?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ChunkEmbeddingRow, DocumentRecord, InMemoryDocumentStore};
    use serde_json::json;

    fn row(index: usize, page: u32, embedding: Vec<f32>, chars: u32) -> ChunkEmbeddingRow {
        ChunkEmbeddingRow {
            chunk_index: index,
            page_number: page,
            embedding: json!(embedding),
            chunk_text: None,
            character_count: chars,
        }
    }

    fn record(id: &str, total: Option<u64>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            title: Some(format!("Document {id}")),
            filename: None,
            page_count: Some(5),
            centroid_embedding: None,
            effective_chunk_count: Some(2),
            total_characters: total,
            embedding_model: None,
        }
    }

    fn axis(dim: usize, i: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[i] = 1.0;
        v
    }

    fn source_context(dim: usize) -> SourceContext {
        let chunks: Vec<ChunkRecord> = (0..2)
            .map(|i| ChunkRecord {
                id: format!("src#{i}"),
                document_id: "src".to_string(),
                chunk_index: i,
                page_number: i as u32 + 1,
                embedding: axis(dim, i),
                character_count: 2000,
                text: None,
            })
            .collect();
        SourceContext {
            document_id: "src".to_string(),
            chunks: Arc::new(chunks),
            total_characters: 4000,
        }
    }

    #[test]
    fn test_auto_worker_count() {
        assert_eq!(auto_worker_count(1), 4);
        assert_eq!(auto_worker_count(32), 4);
        assert_eq!(auto_worker_count(80), 10);
        assert_eq!(auto_worker_count(600), 28);
    }

    #[test]
    fn test_build_chunk_records_dedups_by_index() {
        let rows = vec![
            row(0, 1, vec![1.0, 0.0], 500),
            row(0, 1, vec![1.0, 0.0], 500),
            row(1, 2, vec![0.0, 1.0], 500),
        ];
        let records = build_chunk_records("doc", rows).unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_candidate_without_totals_is_skipped() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.put_document(record("cand", None)).await;
        store
            .put_chunks("cand", vec![row(0, 1, axis(4, 0), 1000)])
            .await;

        let results = score_candidates(
            store.clone(),
            store.clone(),
            source_context(4),
            vec!["cand".to_string()],
            &SearchOptions::default(),
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_matching_candidate_is_scored_and_ranked() {
        let dim = 4;
        let store = Arc::new(InMemoryDocumentStore::new());

        // full: both source chunks; half: one source chunk plus noise
        store.put_document(record("full", Some(2000))).await;
        store
            .put_chunks(
                "full",
                vec![
                    row(0, 1, axis(dim, 0), 1000),
                    row(1, 2, axis(dim, 1), 1000),
                ],
            )
            .await;
        store.put_document(record("half", Some(4000))).await;
        store
            .put_chunks(
                "half",
                vec![
                    row(0, 1, axis(dim, 0), 2000),
                    row(1, 2, axis(dim, 3), 2000),
                ],
            )
            .await;

        let results = score_candidates(
            store.clone(),
            store.clone(),
            source_context(dim),
            vec!["half".to_string(), "full".to_string()],
            &SearchOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].document.id, "full");
        assert!((results[0].scores.source_score - 1.0).abs() < 1e-6);
        assert!((results[0].scores.target_score - 1.0).abs() < 1e-6);
        assert_eq!(results[1].document.id, "half");
        assert!(results[1].scores.source_score < 1.0);
    }

    #[tokio::test]
    async fn test_timeout_skips_candidate_without_failing_pipeline() {
        use crate::config::PageRange;
        use crate::error::Result as CrateResult;
        use async_trait::async_trait;

        /// Chunk reader that hangs on one document
        struct SlowReader {
            inner: Arc<InMemoryDocumentStore>,
            slow_id: String,
        }

        #[async_trait]
        impl ChunkEmbeddingReader for SlowReader {
            async fn list_chunk_embeddings(
                &self,
                document_id: &str,
                page_range: Option<PageRange>,
                page_size: usize,
                offset: usize,
            ) -> CrateResult<Vec<ChunkEmbeddingRow>> {
                if document_id == self.slow_id {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                }
                self.inner
                    .list_chunk_embeddings(document_id, page_range, page_size, offset)
                    .await
            }
        }

        let dim = 4;
        let store = Arc::new(InMemoryDocumentStore::new());
        store.put_document(record("ok", Some(2000))).await;
        store
            .put_chunks(
                "ok",
                vec![row(0, 1, axis(dim, 0), 1000), row(1, 2, axis(dim, 1), 1000)],
            )
            .await;
        store.put_document(record("stuck", Some(2000))).await;
        store
            .put_chunks("stuck", vec![row(0, 1, axis(dim, 0), 2000)])
            .await;

        let slow = Arc::new(SlowReader {
            inner: store.clone(),
            slow_id: "stuck".to_string(),
        });
        let options = SearchOptions {
            stage2_timeout_ms: 200,
            ..Default::default()
        };

        let results = score_candidates(
            store.clone(),
            slow,
            source_context(dim),
            vec!["stuck".to_string(), "ok".to_string()],
            &options,
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document.id, "ok");
    }
}
