//! Type definitions for the similarity search pipeline

use crate::error::{Result, StoreError};
use crate::store::{ChunkEmbeddingRow, DocumentRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A chunk with its parsed embedding, ready for matching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub page_number: u32,
    pub embedding: Vec<f32>,
    pub character_count: u32,
    pub text: Option<String>,
}

impl ChunkRecord {
    /// Build a record from a store row, parsing the embedding payload
    pub fn from_row(document_id: &str, row: &ChunkEmbeddingRow) -> Result<Self> {
        let id = format!("{}#{}", document_id, row.chunk_index);
        let embedding = crate::store::parse_embedding(&id, &row.embedding)?;
        // Embeddings are stored L2-normalized by the ingestor; a drifting
        // norm means something upstream changed and scores are suspect.
        if crate::vector::check_normalized(&embedding).is_err() {
            warn!(chunk_id = %id, "chunk embedding is not L2-normalized");
        }
        if row.character_count == 0 {
            return Err(StoreError::BadEmbedding {
                chunk_id: id,
                reason: "chunk has zero character count".to_string(),
            }
            .into());
        }
        Ok(Self {
            id,
            document_id: document_id.to_string(),
            chunk_index: row.chunk_index,
            page_number: row.page_number,
            embedding,
            character_count: row.character_count,
            text: row.chunk_text.clone(),
        })
    }

    pub fn as_ref_descriptor(&self) -> ChunkRef {
        ChunkRef {
            id: self.id.clone(),
            chunk_index: self.chunk_index,
            page_number: self.page_number,
            character_count: self.character_count,
        }
    }
}

/// Lightweight chunk descriptor carried inside a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    pub id: String,
    pub chunk_index: usize,
    pub page_number: u32,
    pub character_count: u32,
}

/// One matched chunk pair; `source` always belongs to the source document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub source: ChunkRef,
    pub target: ChunkRef,
    pub score: f32,
}

/// Directional character-coverage scores for a document pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityScores {
    pub source_score: f32,
    pub target_score: f32,
    pub matched_source_chars: u64,
    pub matched_target_chars: u64,
    pub explanation: String,
}

/// A contiguous run of matches forming a page-range pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionMatch {
    pub source_pages: String,
    pub target_pages: String,
    pub avg_score: f32,
    pub chunk_count: usize,
    pub reusable: bool,
}

/// Candidate document summary carried in a result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub page_count: Option<u32>,
    pub total_characters: u64,
}

impl DocumentSummary {
    pub fn from_record(record: &DocumentRecord, total_characters: u64) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            filename: record.filename.clone(),
            page_count: record.page_count,
            total_characters,
        }
    }
}

/// One ranked candidate with its evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub document: DocumentSummary,
    pub scores: SimilarityScores,
    pub matched_chunks: usize,
    pub sections: Vec<SectionMatch>,
}

/// Wall-clock timings per stage in milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub stage0_ms: u64,
    pub stage1_ms: u64,
    pub stage2_ms: u64,
    pub total_ms: u64,
}

/// Candidate counts at each stage boundary
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounts {
    pub stage0_candidates: usize,
    pub stage1_candidates: usize,
    pub final_results: usize,
}

/// The full outcome of one pipeline invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilaritySearchResult {
    pub results: Vec<SimilarityResult>,
    pub timing: StageTimings,
    pub stages: StageCounts,
    pub completed_at: DateTime<Utc>,
}

/// Stage-0 output: candidate document ids with their best chunk scores
#[derive(Debug, Clone, Default)]
pub struct Stage0Result {
    pub candidate_ids: Vec<String>,
    pub scores: Vec<f32>,
    pub time_ms: u64,
}

/// Stage-1 output: surviving candidates with chunk-level match counts
#[derive(Debug, Clone, Default)]
pub struct Stage1Result {
    pub candidate_ids: Vec<String>,
    pub match_counts: Vec<usize>,
    pub time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_record_from_row() {
        let row = ChunkEmbeddingRow {
            chunk_index: 3,
            page_number: 2,
            embedding: json!([1.0, 0.0]),
            chunk_text: Some("text".to_string()),
            character_count: 4,
        };
        let record = ChunkRecord::from_row("doc-a", &row).unwrap();
        assert_eq!(record.id, "doc-a#3");
        assert_eq!(record.embedding, vec![1.0, 0.0]);
        assert_eq!(record.page_number, 2);
    }

    #[test]
    fn test_chunk_record_rejects_bad_rows() {
        let bad_embedding = ChunkEmbeddingRow {
            chunk_index: 0,
            page_number: 1,
            embedding: json!("not a vector"),
            chunk_text: None,
            character_count: 10,
        };
        assert!(ChunkRecord::from_row("doc-a", &bad_embedding).is_err());

        let zero_chars = ChunkEmbeddingRow {
            chunk_index: 0,
            page_number: 1,
            embedding: json!([1.0]),
            chunk_text: None,
            character_count: 0,
        };
        assert!(ChunkRecord::from_row("doc-a", &zero_chars).is_err());
    }
}
