//! Capability interfaces for the external vector index and metadata store
//!
//! The pipeline consumes three narrow capabilities: one vector search, one
//! document metadata reader, one chunk embeddings reader. Production
//! supplies adapters over the real index and store; tests and small
//! deployments use the in-memory implementations below. The core never
//! mutates external state through these interfaces.

use crate::config::PageRange;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Initial page size for chunk-embedding reads
pub const DEFAULT_READ_PAGE_SIZE: usize = 100;

/// Floor below which timed-out reads are no longer retried
pub const MIN_READ_PAGE_SIZE: usize = 25;

/// A single filter condition on a metadata key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterValue {
    /// Key must equal the value
    Eq(String),
    /// Key must be one of the values
    In(Vec<String>),
    /// Key must differ from the value
    Ne(String),
}

/// One keyed clause of an ANN query filter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterClause {
    pub key: String,
    pub value: FilterValue,
}

/// Conjunction of filter clauses applied to an ANN query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryFilter {
    pub clauses: Vec<FilterClause>,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn eq(mut self, key: &str, value: &str) -> Self {
        self.clauses.push(FilterClause {
            key: key.to_string(),
            value: FilterValue::Eq(value.to_string()),
        });
        self
    }

    pub fn in_set(mut self, key: &str, values: Vec<String>) -> Self {
        self.clauses.push(FilterClause {
            key: key.to_string(),
            value: FilterValue::In(values),
        });
        self
    }

    pub fn ne(mut self, key: &str, value: &str) -> Self {
        self.clauses.push(FilterClause {
            key: key.to_string(),
            value: FilterValue::Ne(value.to_string()),
        });
        self
    }

    /// Whether any clause mentions the given key
    pub fn has_key(&self, key: &str) -> bool {
        self.clauses.iter().any(|c| c.key == key)
    }

    /// Drop every clause on the given key
    pub fn without_key(&self, key: &str) -> Self {
        Self {
            clauses: self
                .clauses
                .iter()
                .filter(|c| c.key != key)
                .cloned()
                .collect(),
        }
    }

    /// Merge a `document_id ≠ doc_id` exclusion into this filter
    ///
    /// Caller-supplied equality and set clauses on `document_id` are
    /// intersected with the exclusion. Returns `None` when the
    /// intersection is provably empty, which callers must treat as "no
    /// candidates" without querying the index.
    pub fn with_document_exclusion(&self, doc_id: &str) -> Option<Self> {
        let mut clauses = Vec::with_capacity(self.clauses.len() + 1);

        for clause in &self.clauses {
            if clause.key != "document_id" {
                clauses.push(clause.clone());
                continue;
            }
            match &clause.value {
                FilterValue::Eq(value) => {
                    if value == doc_id {
                        return None;
                    }
                    clauses.push(clause.clone());
                }
                FilterValue::In(values) => {
                    let remaining: Vec<String> =
                        values.iter().filter(|v| *v != doc_id).cloned().collect();
                    if remaining.is_empty() {
                        return None;
                    }
                    clauses.push(FilterClause {
                        key: clause.key.clone(),
                        value: FilterValue::In(remaining),
                    });
                }
                FilterValue::Ne(_) => clauses.push(clause.clone()),
            }
        }

        clauses.push(FilterClause {
            key: "document_id".to_string(),
            value: FilterValue::Ne(doc_id.to_string()),
        });

        Some(Self { clauses })
    }

    /// Evaluate the conjunction against a metadata map
    pub fn matches(&self, metadata: &HashMap<String, String>) -> bool {
        self.clauses.iter().all(|clause| {
            let actual = metadata.get(&clause.key);
            match &clause.value {
                FilterValue::Eq(value) => actual == Some(value),
                FilterValue::In(values) => {
                    actual.map(|a| values.iter().any(|v| v == a)).unwrap_or(false)
                }
                FilterValue::Ne(value) => actual != Some(value),
            }
        })
    }
}

/// A hit returned by the ANN index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexHit {
    pub id: String,
    pub score: f32,
    pub metadata: HashMap<String, String>,
}

impl IndexHit {
    /// Owning document of the hit chunk, from index metadata
    pub fn document_id(&self) -> Option<&str> {
        self.metadata.get("document_id").map(|s| s.as_str())
    }
}

/// Document summary row from the metadata store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub title: Option<String>,
    pub filename: Option<String>,
    pub page_count: Option<u32>,
    pub centroid_embedding: Option<Vec<f32>>,
    pub effective_chunk_count: Option<usize>,
    pub total_characters: Option<u64>,
    pub embedding_model: Option<String>,
}

/// Chunk embedding row from the metadata store
///
/// The embedding arrives as raw JSON (the store's wire form) and is parsed
/// by the core; rows may repeat a `chunk_index`, which the core
/// deduplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkEmbeddingRow {
    pub chunk_index: usize,
    pub page_number: u32,
    pub embedding: serde_json::Value,
    pub chunk_text: Option<String>,
    pub character_count: u32,
}

/// Parse a stored embedding payload into a float vector
pub fn parse_embedding(chunk_id: &str, payload: &serde_json::Value) -> Result<Vec<f32>> {
    let items = payload.as_array().ok_or_else(|| StoreError::BadEmbedding {
        chunk_id: chunk_id.to_string(),
        reason: "payload is not an array".to_string(),
    })?;

    let mut vector = Vec::with_capacity(items.len());
    for item in items {
        let value = item.as_f64().ok_or_else(|| StoreError::BadEmbedding {
            chunk_id: chunk_id.to_string(),
            reason: format!("non-numeric component {item}"),
        })?;
        vector.push(value as f32);
    }

    if vector.is_empty() {
        return Err(StoreError::BadEmbedding {
            chunk_id: chunk_id.to_string(),
            reason: "empty embedding".to_string(),
        }
        .into());
    }

    Ok(vector)
}

/// Approximate nearest-neighbour query capability
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Query the index for the `top_k` nearest stored vectors
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
        include_metadata: bool,
    ) -> Result<Vec<IndexHit>>;
}

/// Document metadata reader capability
#[async_trait]
pub trait DocumentReader: Send + Sync {
    /// Fetch a document summary row by id
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;
}

/// Chunk embeddings reader capability
#[async_trait]
pub trait ChunkEmbeddingReader: Send + Sync {
    /// List chunk rows for a document, ordered by chunk index ascending
    async fn list_chunk_embeddings(
        &self,
        document_id: &str,
        page_range: Option<PageRange>,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<ChunkEmbeddingRow>>;
}

/// Read every chunk row for a document with adaptive paging
///
/// Starts at [`DEFAULT_READ_PAGE_SIZE`] and halves the page size on
/// timeout-class errors down to [`MIN_READ_PAGE_SIZE`]; a timeout at the
/// floor degrades to "no chunks for this document" so the caller can skip
/// the candidate instead of failing the pipeline.
pub async fn read_all_chunks(
    reader: &dyn ChunkEmbeddingReader,
    document_id: &str,
    page_range: Option<PageRange>,
) -> Result<Vec<ChunkEmbeddingRow>> {
    let mut page_size = DEFAULT_READ_PAGE_SIZE;
    let mut offset = 0usize;
    let mut rows = Vec::new();

    loop {
        match reader
            .list_chunk_embeddings(document_id, page_range, page_size, offset)
            .await
        {
            Ok(page) => {
                let fetched = page.len();
                rows.extend(page);
                if fetched < page_size {
                    return Ok(rows);
                }
                offset += fetched;
            }
            Err(err) if err.is_retryable() && page_size > MIN_READ_PAGE_SIZE => {
                page_size = (page_size / 2).max(MIN_READ_PAGE_SIZE);
                warn!(
                    document_id,
                    page_size, "chunk read timed out, retrying with smaller page"
                );
            }
            Err(err) if err.is_retryable() => {
                warn!(
                    document_id,
                    error = %err,
                    "chunk read exhausted retries, treating document as empty"
                );
                return Ok(Vec::new());
            }
            Err(err) => return Err(err),
        }
    }
}

/// In-memory ANN index for tests and small corpora
///
/// Brute-force exact search over the stored vectors; scores are dot
/// products, matching the stored-normalized cosine convention.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: Arc<RwLock<Vec<IndexEntry>>>,
}

struct IndexEntry {
    id: String,
    vector: Vec<f32>,
    metadata: HashMap<String, String>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a vector with its metadata
    pub async fn add(&self, id: &str, vector: Vec<f32>, metadata: HashMap<String, String>) {
        self.entries.write().await.push(IndexEntry {
            id: id.to_string(),
            vector,
            metadata,
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
        include_metadata: bool,
    ) -> Result<Vec<IndexHit>> {
        let entries = self.entries.read().await;
        let mut hits = Vec::new();

        for entry in entries.iter() {
            if !filter.matches(&entry.metadata) {
                continue;
            }
            let score = crate::vector::dot(vector, &entry.vector)?;
            hits.push(IndexHit {
                id: entry.id.clone(),
                score,
                metadata: if include_metadata {
                    entry.metadata.clone()
                } else {
                    HashMap::new()
                },
            });
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

/// In-memory document and chunk store for tests and small corpora
#[derive(Default)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<String, DocumentRecord>>>,
    chunks: Arc<RwLock<HashMap<String, Vec<ChunkEmbeddingRow>>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document summary row
    pub async fn put_document(&self, record: DocumentRecord) {
        self.documents
            .write()
            .await
            .insert(record.id.clone(), record);
    }

    /// Insert or replace the chunk rows of a document
    pub async fn put_chunks(&self, document_id: &str, mut rows: Vec<ChunkEmbeddingRow>) {
        rows.sort_by_key(|r| r.chunk_index);
        self.chunks
            .write()
            .await
            .insert(document_id.to_string(), rows);
    }
}

#[async_trait]
impl DocumentReader for InMemoryDocumentStore {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        Ok(self.documents.read().await.get(id).cloned())
    }
}

#[async_trait]
impl ChunkEmbeddingReader for InMemoryDocumentStore {
    async fn list_chunk_embeddings(
        &self,
        document_id: &str,
        page_range: Option<PageRange>,
        page_size: usize,
        offset: usize,
    ) -> Result<Vec<ChunkEmbeddingRow>> {
        let chunks = self.chunks.read().await;
        let rows = chunks
            .get(document_id)
            .map(|rows| {
                rows.iter()
                    .filter(|r| {
                        page_range
                            .map(|range| range.contains(r.page_number))
                            .unwrap_or(true)
                    })
                    .skip(offset)
                    .take(page_size)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}
