//! The three-stage similarity search pipeline
//!
//! Stage-0 retrieves candidate documents by centroid, stage-1 optionally
//! shrinks the set with a chunk-level pre-filter, and stage-2 scores each
//! survivor with the bidirectional matcher, the adaptive coverage scorer,
//! and the section detector.

pub mod matcher;
pub mod pipeline;
pub mod scorer;
pub mod sections;
pub mod stage0;
pub mod stage1;
pub mod stage2;
pub mod types;

pub use matcher::{match_chunks, FallbackOptions, MatcherOptions};
pub use pipeline::{DocumentReadiness, SimilarityPipeline};
pub use scorer::{has_minimum_evidence, minimum_evidence_threshold, score_matches};
pub use sections::{classify_sections, detect_sections, section_page_coverage, SectionClasses};
pub use types::{
    ChunkMatch, ChunkRecord, ChunkRef, DocumentSummary, SectionMatch, SimilarityResult,
    SimilarityScores, SimilaritySearchResult, StageCounts, StageTimings,
};
