//! Stage-0 candidate retrieval by document centroid

use super::types::Stage0Result;
use crate::config::SearchOptions;
use crate::error::{Result, StoreError};
use crate::store::{DocumentReader, VectorIndex};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Retrieve candidate documents via the centroid ANN query
///
/// The source document is always excluded, even against caller-supplied
/// `document_id` filters; an empty intersection short-circuits to "no
/// candidates" without touching the index. When a page range restricts the
/// source scope the caller passes the scope centroid as `override_vector`.
pub async fn retrieve_candidates(
    index: &dyn VectorIndex,
    documents: &dyn DocumentReader,
    source_doc_id: &str,
    options: &SearchOptions,
    override_vector: Option<&[f32]>,
) -> Result<Stage0Result> {
    let started = Instant::now();

    let record = documents
        .get_document(source_doc_id)
        .await?
        .ok_or_else(|| StoreError::DocumentNotFound(source_doc_id.to_string()))?;

    let owned_centroid;
    let query_vector: &[f32] = match override_vector {
        Some(vector) => vector,
        None => {
            if record.effective_chunk_count.unwrap_or(0) == 0 {
                return Err(crate::error::SearchError::StageFailed {
                    stage: "stage0",
                    source_id: source_doc_id.to_string(),
                    reason: "source document has no effective chunks".to_string(),
                }
                .into());
            }
            owned_centroid = record
                .centroid_embedding
                .ok_or_else(|| StoreError::MissingCentroid(source_doc_id.to_string()))?;
            &owned_centroid
        }
    };

    let Some(filter) = options.stage0_filters.with_document_exclusion(source_doc_id) else {
        info!(
            source_doc_id,
            "caller filter excludes every candidate, returning none"
        );
        return Ok(Stage0Result {
            candidate_ids: Vec::new(),
            scores: Vec::new(),
            time_ms: started.elapsed().as_millis() as u64,
        });
    };

    // Over-fetch to absorb multiple chunk hits per document
    let hits = index
        .query(query_vector, options.stage0_top_k * 2, &filter, true)
        .await?;

    // Reduce chunk hits to documents, keeping the best score per document
    let mut best: HashMap<String, f32> = HashMap::new();
    for hit in &hits {
        let Some(document_id) = hit.document_id() else {
            warn!(hit_id = %hit.id, "index hit without document_id metadata, skipping");
            continue;
        };
        if document_id == source_doc_id {
            continue;
        }
        let entry = best.entry(document_id.to_string()).or_insert(f32::MIN);
        if hit.score > *entry {
            *entry = hit.score;
        }
    }

    let mut ranked: Vec<(String, f32)> = best.into_iter().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.truncate(options.stage0_top_k);

    if ranked.is_empty() && filter.has_key("user_id") {
        // Diagnostic only: see whether the user scope is what empties the
        // result. These ids are never returned or fed to later stages.
        let diagnostic_filter = filter.without_key("user_id");
        match index
            .query(query_vector, options.stage0_top_k * 2, &diagnostic_filter, true)
            .await
        {
            Ok(unscoped) => info!(
                source_doc_id,
                unscoped_hits = unscoped.len(),
                "no candidates within user scope"
            ),
            Err(err) => debug!(source_doc_id, error = %err, "diagnostic requery failed"),
        }
    }

    let (candidate_ids, scores): (Vec<String>, Vec<f32>) = ranked.into_iter().unzip();
    let time_ms = started.elapsed().as_millis() as u64;
    info!(
        source_doc_id,
        candidates = candidate_ids.len(),
        time_ms,
        "stage-0 retrieval complete"
    );

    Ok(Stage0Result {
        candidate_ids,
        scores,
        time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentRecord, InMemoryDocumentStore, InMemoryVectorIndex, QueryFilter};
    use std::collections::HashMap as Map;

    fn metadata(doc: &str) -> Map<String, String> {
        let mut m = Map::new();
        m.insert("document_id".to_string(), doc.to_string());
        m
    }

    fn record(id: &str, centroid: Option<Vec<f32>>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            title: None,
            filename: None,
            page_count: Some(10),
            centroid_embedding: centroid,
            effective_chunk_count: Some(5),
            total_characters: Some(10_000),
            embedding_model: None,
        }
    }

    async fn seeded() -> (InMemoryVectorIndex, InMemoryDocumentStore) {
        let index = InMemoryVectorIndex::new();
        let store = InMemoryDocumentStore::new();
        store
            .put_document(record("src", Some(vec![1.0, 0.0])))
            .await;

        // Source's own chunks plus two other documents
        index.add("src#0", vec![1.0, 0.0], metadata("src")).await;
        index.add("near#0", vec![0.9, 0.1], metadata("near")).await;
        index.add("near#1", vec![0.95, 0.05], metadata("near")).await;
        index.add("far#0", vec![0.0, 1.0], metadata("far")).await;
        (index, store)
    }

    #[tokio::test]
    async fn test_source_document_always_excluded() {
        let (index, store) = seeded().await;
        let result = retrieve_candidates(&index, &store, "src", &SearchOptions::default(), None)
            .await
            .unwrap();
        assert!(!result.candidate_ids.contains(&"src".to_string()));
        assert_eq!(result.candidate_ids[0], "near");
    }

    #[tokio::test]
    async fn test_caller_filter_on_source_short_circuits() {
        let (index, store) = seeded().await;
        let options = SearchOptions {
            stage0_filters: QueryFilter::new().eq("document_id", "src"),
            ..Default::default()
        };
        let result = retrieve_candidates(&index, &store, "src", &options, None)
            .await
            .unwrap();
        assert!(result.candidate_ids.is_empty());
    }

    #[tokio::test]
    async fn test_best_score_per_document() {
        let (index, store) = seeded().await;
        let result = retrieve_candidates(&index, &store, "src", &SearchOptions::default(), None)
            .await
            .unwrap();
        let near_rank = result
            .candidate_ids
            .iter()
            .position(|id| id == "near")
            .unwrap();
        // The better of near's two chunks carries its document score
        assert!(result.scores[near_rank] > 0.94);
        // Each document appears once despite multiple chunk hits
        assert_eq!(
            result
                .candidate_ids
                .iter()
                .filter(|id| *id == "near")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_missing_centroid_is_fatal_without_override() {
        let (index, store) = seeded().await;
        store.put_document(record("bare", None)).await;
        let err = retrieve_candidates(&index, &store, "bare", &SearchOptions::default(), None)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "store");
    }

    #[tokio::test]
    async fn test_override_vector_skips_centroid_requirement() {
        let (index, store) = seeded().await;
        store.put_document(record("bare", None)).await;
        let result = retrieve_candidates(
            &index,
            &store,
            "bare",
            &SearchOptions::default(),
            Some(&[1.0, 0.0]),
        )
        .await
        .unwrap();
        assert!(result.candidate_ids.contains(&"near".to_string()));
    }

    #[tokio::test]
    async fn test_missing_document_is_fatal() {
        let (index, store) = seeded().await;
        assert!(
            retrieve_candidates(&index, &store, "ghost", &SearchOptions::default(), None)
                .await
                .is_err()
        );
    }
}
