//! Document Similarity Search Core
//!
//! The similarity engine behind "how much of document A is reused in
//! document B, and where?" for subscription-agreement corpora:
//! - Paragraph-greedy chunking under a strict character budget
//! - Bidirectional chunk matching with NMS, tie-breaking, and a
//!   reciprocal lower-threshold fallback
//! - Directional character-coverage scoring with a minimum-evidence gate
//! - Contiguous page-range section detection
//! - A three-stage candidate → pre-filter → scoring pipeline over an
//!   external ANN index and metadata store
//!
//! # Example
//!
//! ```rust,no_run
//! use docsim::{SearchOptions, SimilarityPipeline};
//! use std::sync::Arc;
//!
//! # async fn example(
//! #     index: Arc<dyn docsim::VectorIndex>,
//! #     documents: Arc<dyn docsim::DocumentReader>,
//! #     chunks: Arc<dyn docsim::ChunkEmbeddingReader>,
//! # ) -> docsim::Result<()> {
//! let pipeline = SimilarityPipeline::new(index, documents, chunks);
//! let outcome = pipeline
//!     .execute_similarity_search("doc-123", SearchOptions::default())
//!     .await?;
//!
//! for result in &outcome.results {
//!     println!(
//!         "{}: {:.0}% of source reused",
//!         result.document.id,
//!         result.scores.source_score * 100.0
//!     );
//! }
//! # Ok(())
//! # }
//! ```

pub mod chunking;
pub mod config;
pub mod error;
pub mod search;
pub mod store;
pub mod vector;

// Re-export main types
pub use chunking::{split_sentences, Chunk, Chunker, Paragraph};
pub use config::{ChunkerConfig, PageRange, SearchOptions};
pub use error::{ChunkError, DocsimError, Result, SearchError, StoreError, VectorError};
pub use search::{
    classify_sections, detect_sections, has_minimum_evidence, match_chunks,
    minimum_evidence_threshold, score_matches, section_page_coverage, ChunkMatch, ChunkRecord,
    ChunkRef, DocumentReadiness, DocumentSummary, FallbackOptions, MatcherOptions,
    SectionClasses, SectionMatch,
    SimilarityPipeline, SimilarityResult, SimilarityScores, SimilaritySearchResult, StageCounts,
    StageTimings,
};
pub use store::{
    parse_embedding, read_all_chunks, ChunkEmbeddingReader, ChunkEmbeddingRow, DocumentReader,
    DocumentRecord, FilterClause, FilterValue, InMemoryDocumentStore, InMemoryVectorIndex,
    IndexHit, QueryFilter, VectorIndex,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
