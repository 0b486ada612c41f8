//! Configuration for the similarity search pipeline

use crate::error::{DocsimError, Result, SearchError};
use crate::store::QueryFilter;
use serde::{Deserialize, Serialize};

/// Inclusive page range restricting the source document's scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRange {
    pub start_page: u32,
    pub end_page: u32,
}

impl PageRange {
    pub fn new(start_page: u32, end_page: u32) -> Self {
        Self {
            start_page,
            end_page,
        }
    }

    pub fn contains(&self, page: u32) -> bool {
        page >= self.start_page && page <= self.end_page
    }
}

/// Options for a similarity search invocation
///
/// One structure threads through all three stages; every field has a
/// serde default so callers only set what they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Candidates returned by the centroid ANN query
    #[serde(default = "default_stage0_top_k")]
    pub stage0_top_k: usize,

    /// Extra ANN filter clauses merged with the self-exclusion filter
    #[serde(default)]
    pub stage0_filters: QueryFilter,

    /// Maximum candidates kept after the chunk-level pre-filter
    #[serde(default = "default_stage1_top_k")]
    pub stage1_top_k: usize,

    /// Per-chunk ANN fan-out; auto-sized from the candidate count when unset
    #[serde(default)]
    pub stage1_neighbors_per_chunk: Option<usize>,

    /// Source-chunk batch size for the pre-filter queries
    #[serde(default = "default_stage1_batch_size")]
    pub stage1_batch_size: usize,

    /// Disable the chunk-level pre-filter entirely
    #[serde(default = "default_true")]
    pub stage1_enabled: bool,

    /// Worker pool size; auto-sized from the candidate count when unset
    #[serde(default)]
    pub stage2_parallel_workers: Option<usize>,

    /// Primary cosine threshold for chunk matching
    #[serde(default = "default_stage2_threshold")]
    pub stage2_threshold: f32,

    /// Lower threshold for the reciprocal fallback pass; derived from the
    /// primary threshold when unset, clamped either way
    #[serde(default)]
    pub stage2_fallback_threshold: Option<f32>,

    /// Enable the reciprocal fallback pass
    #[serde(default = "default_true")]
    pub stage2_fallback_enabled: bool,

    /// Candidates considered per side in the fallback top-K check
    #[serde(default = "default_fallback_top_k")]
    pub stage2_fallback_top_k: usize,

    /// Fallback pairs scoring below this need spatial proximity to be kept
    #[serde(default = "default_proximity_score")]
    pub stage2_proximity_score: f32,

    /// Maximum page distance for low-scoring fallback pairs
    #[serde(default = "default_max_page_distance")]
    pub stage2_max_page_distance: Option<u32>,

    /// Maximum chunk-index distance for low-scoring fallback pairs
    #[serde(default = "default_max_index_distance")]
    pub stage2_max_index_distance: Option<u32>,

    /// Maximum relative length difference for fallback pairs
    #[serde(default = "default_max_length_ratio")]
    pub stage2_max_length_ratio: f32,

    /// Per-candidate deadline in milliseconds
    #[serde(default = "default_stage2_timeout_ms")]
    pub stage2_timeout_ms: u64,

    /// Page gap above which a new section opens
    #[serde(default = "default_max_page_gap")]
    pub max_page_gap: u32,

    /// Restrict source chunks and the stage-0 centroid to this range
    #[serde(default)]
    pub source_page_range: Option<PageRange>,
}

fn default_stage0_top_k() -> usize {
    600
}

fn default_stage1_top_k() -> usize {
    250
}

fn default_stage1_batch_size() -> usize {
    150
}

fn default_stage2_threshold() -> f32 {
    0.85
}

fn default_fallback_top_k() -> usize {
    5
}

fn default_proximity_score() -> f32 {
    0.82
}

fn default_max_page_distance() -> Option<u32> {
    Some(2)
}

fn default_max_index_distance() -> Option<u32> {
    Some(3)
}

fn default_max_length_ratio() -> f32 {
    0.4
}

fn default_stage2_timeout_ms() -> u64 {
    180_000
}

fn default_max_page_gap() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            stage0_top_k: default_stage0_top_k(),
            stage0_filters: QueryFilter::default(),
            stage1_top_k: default_stage1_top_k(),
            stage1_neighbors_per_chunk: None,
            stage1_batch_size: default_stage1_batch_size(),
            stage1_enabled: true,
            stage2_parallel_workers: None,
            stage2_threshold: default_stage2_threshold(),
            stage2_fallback_threshold: None,
            stage2_fallback_enabled: true,
            stage2_fallback_top_k: default_fallback_top_k(),
            stage2_proximity_score: default_proximity_score(),
            stage2_max_page_distance: default_max_page_distance(),
            stage2_max_index_distance: default_max_index_distance(),
            stage2_max_length_ratio: default_max_length_ratio(),
            stage2_timeout_ms: default_stage2_timeout_ms(),
            max_page_gap: default_max_page_gap(),
            source_page_range: None,
        }
    }
}

impl SearchOptions {
    /// Validate threshold parameters before the pipeline starts
    pub fn validate(&self) -> Result<()> {
        check_threshold("stage2_threshold", self.stage2_threshold)?;
        if let Some(fallback) = self.stage2_fallback_threshold {
            check_threshold("stage2_fallback_threshold", fallback)?;
        }
        check_threshold("stage2_proximity_score", self.stage2_proximity_score)?;

        if self.stage0_top_k == 0 {
            return Err(DocsimError::Config("stage0_top_k must be > 0".to_string()));
        }
        if self.stage1_batch_size == 0 {
            return Err(DocsimError::Config(
                "stage1_batch_size must be > 0".to_string(),
            ));
        }
        if let Some(range) = &self.source_page_range {
            if range.start_page == 0 || range.end_page < range.start_page {
                return Err(DocsimError::Config(format!(
                    "invalid source_page_range {}-{}",
                    range.start_page, range.end_page
                )));
            }
        }

        Ok(())
    }

    /// Fallback threshold after defaulting and clamping
    ///
    /// Defaults to `max(primary − 0.15, 0.65)`, then clamps into
    /// `[0.5, primary − 0.01]` so the fallback pass always sits below the
    /// primary pass.
    pub fn effective_fallback_threshold(&self) -> f32 {
        let primary = self.stage2_threshold;
        let requested = self
            .stage2_fallback_threshold
            .unwrap_or_else(|| (primary - 0.15).max(0.65));
        requested.min(primary - 0.01).max(0.5)
    }
}

fn check_threshold(name: &'static str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(SearchError::ThresholdOutOfRange { name, value }.into());
    }
    Ok(())
}

/// Configuration for the paragraph-greedy chunk builder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Hard upper bound on chunk size in characters
    #[serde(default = "default_max_characters")]
    pub max_characters: usize,

    /// Soft lower bound below which paragraphs are merged with neighbours
    #[serde(default = "default_min_characters")]
    pub min_characters: usize,
}

fn default_max_characters() -> usize {
    2000
}

fn default_min_characters() -> usize {
    120
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            max_characters: default_max_characters(),
            min_characters: default_min_characters(),
        }
    }
}

impl ChunkerConfig {
    /// Load chunking defaults, allowing environment overrides
    ///
    /// Recognizes `DOCSIM_CHUNK_MAX_CHARACTERS` and
    /// `DOCSIM_CHUNK_MIN_CHARACTERS`.
    pub fn from_env() -> Result<Self> {
        let source = config::Config::builder()
            .add_source(config::Environment::with_prefix("DOCSIM"))
            .build()
            .map_err(|e| DocsimError::Config(e.to_string()))?;

        let mut cfg = Self::default();
        if let Ok(max) = source.get_int("chunk_max_characters") {
            cfg.max_characters = max as usize;
        }
        if let Ok(min) = source.get_int("chunk_min_characters") {
            cfg.min_characters = min as usize;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_characters == 0 {
            return Err(crate::error::ChunkError::InvalidConfig(
                "max_characters must be > 0".to_string(),
            )
            .into());
        }
        if self.min_characters >= self.max_characters {
            return Err(crate::error::ChunkError::InvalidConfig(format!(
                "min_characters {} must be below max_characters {}",
                self.min_characters, self.max_characters
            ))
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_validate() {
        let options = SearchOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.stage0_top_k, 600);
        assert_eq!(options.stage1_top_k, 250);
        assert_eq!(options.stage2_timeout_ms, 180_000);
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let options = SearchOptions {
            stage2_threshold: 1.2,
            ..Default::default()
        };
        assert!(options.validate().is_err());

        let options = SearchOptions {
            stage2_fallback_threshold: Some(-0.1),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_fallback_threshold_defaults_below_primary() {
        let options = SearchOptions::default();
        let fallback = options.effective_fallback_threshold();
        assert!(fallback <= options.stage2_threshold - 0.01);
        assert!(fallback >= 0.5);
        assert!((fallback - 0.70).abs() < 1e-6);
    }

    #[test]
    fn test_fallback_threshold_clamped_to_primary() {
        let options = SearchOptions {
            stage2_threshold: 0.85,
            stage2_fallback_threshold: Some(0.95),
            ..Default::default()
        };
        assert!((options.effective_fallback_threshold() - 0.84).abs() < 1e-6);

        let options = SearchOptions {
            stage2_threshold: 0.6,
            stage2_fallback_threshold: Some(0.1),
            ..Default::default()
        };
        assert!((options.effective_fallback_threshold() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_invalid_page_range_rejected() {
        let options = SearchOptions {
            source_page_range: Some(PageRange::new(5, 2)),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_chunker_config_validate() {
        assert!(ChunkerConfig::default().validate().is_ok());

        let bad = ChunkerConfig {
            max_characters: 100,
            min_characters: 200,
        };
        assert!(bad.validate().is_err());
    }
}
