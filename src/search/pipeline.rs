//! Pipeline orchestrator and document readiness validator

use super::stage0;
use super::stage1;
use super::stage2::{self, SourceContext};
use super::types::{SimilaritySearchResult, StageCounts, StageTimings};
use crate::config::SearchOptions;
use crate::error::{Result, SearchError};
use crate::store::{read_all_chunks, ChunkEmbeddingReader, DocumentReader, VectorIndex};
use crate::vector;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Embedding model tags the corpus is known to be ingested with
const KNOWN_EMBEDDING_MODELS: &[&str] = &["text-embedding-3-small", "text-embedding-3-large"];

/// Readiness report for a document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReadiness {
    pub document_id: String,
    pub ready: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

/// The three-stage similarity search pipeline
///
/// Owns nothing but handles to the external collaborators; all per-search
/// state lives inside a single `execute_similarity_search` call.
pub struct SimilarityPipeline {
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentReader>,
    chunks: Arc<dyn ChunkEmbeddingReader>,
}

impl SimilarityPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentReader>,
        chunks: Arc<dyn ChunkEmbeddingReader>,
    ) -> Self {
        Self {
            index,
            documents,
            chunks,
        }
    }

    /// Run the full candidate → pre-filter → scoring pipeline
    pub async fn execute_similarity_search(
        &self,
        source_doc_id: &str,
        options: SearchOptions,
    ) -> Result<SimilaritySearchResult> {
        options.validate()?;

        let search_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            %search_id,
            source_doc_id,
            page_range = ?options.source_page_range,
            "similarity search started"
        );

        // A restricted scope needs the source chunks up front so the
        // stage-0 query can use the scope centroid instead of the stored
        // document centroid.
        let (preloaded_chunks, override_vector) = match options.source_page_range {
            Some(range) => {
                let rows =
                    read_all_chunks(&*self.chunks, source_doc_id, Some(range)).await?;
                let records = stage2::build_chunk_records(source_doc_id, rows)?;
                if records.is_empty() {
                    return Err(SearchError::EmptySourceScope(source_doc_id.to_string()).into());
                }
                let embeddings: Vec<Vec<f32>> =
                    records.iter().map(|c| c.embedding.clone()).collect();
                let scope_centroid = vector::centroid(&embeddings)?;
                (Some(records), Some(scope_centroid))
            }
            None => (None, None),
        };

        let stage0_result = stage0::retrieve_candidates(
            &*self.index,
            &*self.documents,
            source_doc_id,
            &options,
            override_vector.as_deref(),
        )
        .await?;

        if stage0_result.candidate_ids.is_empty() {
            info!(%search_id, source_doc_id, "no candidates, finishing empty");
            return Ok(SimilaritySearchResult {
                results: Vec::new(),
                timing: StageTimings {
                    stage0_ms: stage0_result.time_ms,
                    stage1_ms: 0,
                    stage2_ms: 0,
                    total_ms: started.elapsed().as_millis() as u64,
                },
                stages: StageCounts::default(),
                completed_at: Utc::now(),
            });
        }

        // Source chunks are fetched exactly once per invocation and shared
        // with stage-1 and every stage-2 worker.
        let source_chunks = match preloaded_chunks {
            Some(records) => records,
            None => {
                let rows = read_all_chunks(&*self.chunks, source_doc_id, None).await?;
                let records = stage2::build_chunk_records(source_doc_id, rows)?;
                if records.is_empty() {
                    return Err(SearchError::EmptySourceScope(source_doc_id.to_string()).into());
                }
                records
            }
        };
        let total_source_chars: u64 = source_chunks
            .iter()
            .map(|c| c.character_count as u64)
            .sum();
        if total_source_chars == 0 {
            return Err(SearchError::EmptyDocument(source_doc_id.to_string()).into());
        }

        let stage1_result =
            stage1::prefilter_candidates(&*self.index, &source_chunks, &stage0_result, &options)
                .await?;

        let source_context = SourceContext {
            document_id: source_doc_id.to_string(),
            chunks: Arc::new(source_chunks),
            total_characters: total_source_chars,
        };

        let stage2_started = Instant::now();
        let results = stage2::score_candidates(
            self.documents.clone(),
            self.chunks.clone(),
            source_context,
            stage1_result.candidate_ids.clone(),
            &options,
        )
        .await?;
        let stage2_ms = stage2_started.elapsed().as_millis() as u64;

        let timing = StageTimings {
            stage0_ms: stage0_result.time_ms,
            stage1_ms: stage1_result.time_ms,
            stage2_ms,
            total_ms: started.elapsed().as_millis() as u64,
        };
        let stages = StageCounts {
            stage0_candidates: stage0_result.candidate_ids.len(),
            stage1_candidates: stage1_result.candidate_ids.len(),
            final_results: results.len(),
        };

        info!(
            %search_id,
            source_doc_id,
            stage0_candidates = stages.stage0_candidates,
            stage1_candidates = stages.stage1_candidates,
            final_results = stages.final_results,
            total_ms = timing.total_ms,
            "similarity search complete"
        );

        Ok(SimilaritySearchResult {
            results,
            timing,
            stages,
            completed_at: Utc::now(),
        })
    }

    /// Check whether a document is ready to be used as a search source
    pub async fn validate_document(&self, document_id: &str) -> Result<DocumentReadiness> {
        let mut issues = Vec::new();
        let mut warnings = Vec::new();

        let record = match self.documents.get_document(document_id).await? {
            Some(record) => record,
            None => {
                return Ok(DocumentReadiness {
                    document_id: document_id.to_string(),
                    ready: false,
                    issues: vec!["document not found".to_string()],
                    warnings,
                });
            }
        };

        if record.centroid_embedding.is_none() {
            issues.push("missing centroid embedding".to_string());
        }
        if record.effective_chunk_count.unwrap_or(0) == 0 {
            issues.push("effective chunk count is zero".to_string());
        }
        if record.total_characters.unwrap_or(0) == 0 {
            issues.push("total characters is zero".to_string());
        }

        match self
            .chunks
            .list_chunk_embeddings(document_id, None, 1, 0)
            .await
        {
            Ok(rows) if rows.is_empty() => {
                issues.push("no stored chunk embeddings".to_string());
            }
            Ok(rows) => {
                let probe_id = format!("{}#{}", document_id, rows[0].chunk_index);
                if crate::store::parse_embedding(&probe_id, &rows[0].embedding).is_err() {
                    issues.push("first chunk embedding is unparseable".to_string());
                }
            }
            Err(err) => {
                warn!(document_id, error = %err, "chunk probe failed during validation");
                issues.push(format!("chunk read failed: {err}"));
            }
        }

        match record.embedding_model.as_deref() {
            Some(model) if !KNOWN_EMBEDDING_MODELS.contains(&model) => {
                warnings.push(format!("unexpected embedding model tag: {model}"));
            }
            None => warnings.push("missing embedding model tag".to_string()),
            Some(_) => {}
        }

        Ok(DocumentReadiness {
            document_id: document_id.to_string(),
            ready: issues.is_empty(),
            issues,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{
        ChunkEmbeddingRow, DocumentRecord, InMemoryDocumentStore, InMemoryVectorIndex,
    };
    use serde_json::json;

    async fn pipeline_with(
        store: Arc<InMemoryDocumentStore>,
        index: Arc<InMemoryVectorIndex>,
    ) -> SimilarityPipeline {
        SimilarityPipeline::new(index, store.clone(), store)
    }

    fn record(id: &str, model: Option<&str>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            title: None,
            filename: None,
            page_count: Some(3),
            centroid_embedding: Some(vec![1.0, 0.0]),
            effective_chunk_count: Some(1),
            total_characters: Some(2000),
            embedding_model: model.map(|m| m.to_string()),
        }
    }

    fn row(index: usize) -> ChunkEmbeddingRow {
        ChunkEmbeddingRow {
            chunk_index: index,
            page_number: 1,
            embedding: json!([1.0, 0.0]),
            chunk_text: None,
            character_count: 2000,
        }
    }

    #[tokio::test]
    async fn test_validate_ready_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        store
            .put_document(record("doc", Some("text-embedding-3-small")))
            .await;
        store.put_chunks("doc", vec![row(0)]).await;

        let pipeline = pipeline_with(store, index).await;
        let readiness = pipeline.validate_document("doc").await.unwrap();
        assert!(readiness.ready);
        assert!(readiness.issues.is_empty());
        assert!(readiness.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_validate_flags_missing_pieces() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let mut bare = record("bare", Some("home-grown-embedder"));
        bare.centroid_embedding = None;
        store.put_document(bare).await;

        let pipeline = pipeline_with(store, index).await;
        let readiness = pipeline.validate_document("bare").await.unwrap();
        assert!(!readiness.ready);
        assert!(readiness
            .issues
            .iter()
            .any(|i| i.contains("centroid")));
        assert!(readiness
            .issues
            .iter()
            .any(|i| i.contains("no stored chunk embeddings")));
        assert!(readiness
            .warnings
            .iter()
            .any(|w| w.contains("home-grown-embedder")));
    }

    #[tokio::test]
    async fn test_validate_missing_document() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let pipeline = pipeline_with(store, index).await;
        let readiness = pipeline.validate_document("ghost").await.unwrap();
        assert!(!readiness.ready);
    }

    #[tokio::test]
    async fn test_empty_source_scope_is_fatal() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        store.put_document(record("doc", None)).await;
        // Chunks exist, but none inside the requested page range
        store.put_chunks("doc", vec![row(0)]).await;

        let pipeline = pipeline_with(store, index).await;
        let options = SearchOptions {
            source_page_range: Some(crate::config::PageRange::new(7, 9)),
            ..Default::default()
        };
        let err = pipeline
            .execute_similarity_search("doc", options)
            .await
            .unwrap_err();
        assert_eq!(err.category(), "search");
    }

    #[tokio::test]
    async fn test_no_candidates_finishes_empty() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        store.put_document(record("doc", None)).await;
        store.put_chunks("doc", vec![row(0)]).await;

        let pipeline = pipeline_with(store, index).await;
        let outcome = pipeline
            .execute_similarity_search("doc", SearchOptions::default())
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.stages.stage0_candidates, 0);
        assert_eq!(outcome.timing.stage2_ms, 0);
    }

    #[tokio::test]
    async fn test_missing_source_document_is_fatal() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let pipeline = pipeline_with(store, index).await;
        let err = pipeline
            .execute_similarity_search("ghost", SearchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.category(), "store");
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_up_front() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let index = Arc::new(InMemoryVectorIndex::new());
        let pipeline = pipeline_with(store, index).await;

        let options = SearchOptions {
            stage2_threshold: 7.0,
            ..Default::default()
        };
        assert!(pipeline
            .execute_similarity_search("doc", options)
            .await
            .is_err());
    }
}
