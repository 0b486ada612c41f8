//! Error handling for the similarity search core

use thiserror::Error;

/// Result type alias for the similarity search core
pub type Result<T> = std::result::Result<T, DocsimError>;

/// Main error type for the similarity search core
#[derive(Error, Debug)]
pub enum DocsimError {
    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),

    #[error("Chunking error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors related to vector arithmetic
#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Cannot normalize a zero-length vector")]
    ZeroNorm,

    #[error("Empty vector set")]
    EmptyInput,

    #[error("Vector is not L2-normalized: norm {norm}")]
    NotNormalized { norm: f32 },
}

/// Errors related to paragraph cleaning and chunk building
#[derive(Error, Debug)]
pub enum ChunkError {
    #[error("Invalid chunker configuration: {0}")]
    InvalidConfig(String),

    #[error("Paragraph {index} on page {page} exceeds the character budget after splitting")]
    OversizedParagraph { index: usize, page: u32 },
}

/// Errors related to the external vector index and metadata store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Document {0} has no centroid embedding")]
    MissingCentroid(String),

    #[error("Unparseable embedding for chunk {chunk_id}: {reason}")]
    BadEmbedding { chunk_id: String, reason: String },

    #[error("Index query failed: {0}")]
    QueryFailed(String),

    #[error("Read timed out at page size {page_size}")]
    ReadTimeout { page_size: usize },

    #[error("Storage failed: {0}")]
    StorageFailed(String),
}

/// Errors related to matching, scoring, and pipeline execution
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Threshold out of range: {name} = {value}, expected [0, 1]")]
    ThresholdOutOfRange { name: &'static str, value: f32 },

    #[error("Document has no usable characters: {0}")]
    EmptyDocument(String),

    #[error("Source scope is empty for document {0}")]
    EmptySourceScope(String),

    #[error("Stage {stage} failed for source {source_id}: {reason}")]
    StageFailed {
        stage: &'static str,
        source_id: String,
        reason: String,
    },

    #[error("Candidate deadline exceeded after {0} ms")]
    DeadlineExceeded(u64),
}

impl DocsimError {
    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DocsimError::Store(StoreError::ReadTimeout { .. })
                | DocsimError::Store(StoreError::QueryFailed(_))
                | DocsimError::Search(SearchError::DeadlineExceeded(_))
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            DocsimError::Vector(_) => "vector",
            DocsimError::Chunk(_) => "chunk",
            DocsimError::Store(_) => "store",
            DocsimError::Search(_) => "search",
            DocsimError::Config(_) => "config",
            DocsimError::Serialization(_) => "serialization",
            DocsimError::Generic(_) => "generic",
        }
    }
}
