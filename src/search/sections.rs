//! Grouping of matched chunks into contiguous page-range sections

use super::types::{ChunkMatch, SectionMatch};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Average score above which a section counts as reusable
pub const REUSABLE_THRESHOLD: f32 = 0.85;

/// Average score below which a section is low similarity
pub const LOW_SIMILARITY_THRESHOLD: f32 = 0.65;

/// Sections partitioned by how directly their text can be reused
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SectionClasses {
    pub highly_reusable: Vec<SectionMatch>,
    pub needs_review: Vec<SectionMatch>,
    pub low_similarity: Vec<SectionMatch>,
}

/// Group matches into sections contiguous in the source document
///
/// Matches are swept in source-page order; a gap larger than
/// `max_page_gap` opens a new section.
pub fn detect_sections(matches: &[ChunkMatch], max_page_gap: u32) -> Vec<SectionMatch> {
    if matches.is_empty() {
        return Vec::new();
    }

    let mut ordered: Vec<&ChunkMatch> = matches.iter().collect();
    ordered.sort_by(|a, b| {
        a.source
            .page_number
            .cmp(&b.source.page_number)
            .then(a.source.chunk_index.cmp(&b.source.chunk_index))
    });

    let mut sections = Vec::new();
    let mut current: Vec<&ChunkMatch> = vec![ordered[0]];
    let mut last_page = ordered[0].source.page_number;

    for m in &ordered[1..] {
        if m.source.page_number > last_page + max_page_gap {
            sections.push(build_section(&current));
            current.clear();
        }
        last_page = m.source.page_number;
        current.push(m);
    }
    sections.push(build_section(&current));

    sections
}

fn build_section(matches: &[&ChunkMatch]) -> SectionMatch {
    let source_start = matches.iter().map(|m| m.source.page_number).min().unwrap_or(1);
    let source_end = matches.iter().map(|m| m.source.page_number).max().unwrap_or(1);
    let target_start = matches.iter().map(|m| m.target.page_number).min().unwrap_or(1);
    let target_end = matches.iter().map(|m| m.target.page_number).max().unwrap_or(1);

    let avg_score = matches.iter().map(|m| m.score).sum::<f32>() / matches.len() as f32;

    SectionMatch {
        source_pages: format_page_range(source_start, source_end),
        target_pages: format_page_range(target_start, target_end),
        avg_score,
        chunk_count: matches.len(),
        reusable: avg_score > REUSABLE_THRESHOLD,
    }
}

/// Format a page range as "p" or "p-q"
pub fn format_page_range(start: u32, end: u32) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

/// Partition sections by reusability
pub fn classify_sections(sections: &[SectionMatch]) -> SectionClasses {
    let mut classes = SectionClasses::default();
    for section in sections {
        if section.avg_score > REUSABLE_THRESHOLD {
            classes.highly_reusable.push(section.clone());
        } else if section.avg_score >= LOW_SIMILARITY_THRESHOLD {
            classes.needs_review.push(section.clone());
        } else {
            classes.low_similarity.push(section.clone());
        }
    }
    classes
}

/// Covered page sets per side, for UI coverage percentages
pub fn section_page_coverage(sections: &[SectionMatch]) -> (BTreeSet<u32>, BTreeSet<u32>) {
    let mut source_pages = BTreeSet::new();
    let mut target_pages = BTreeSet::new();
    for section in sections {
        expand_page_range(&section.source_pages, &mut source_pages);
        expand_page_range(&section.target_pages, &mut target_pages);
    }
    (source_pages, target_pages)
}

fn expand_page_range(range: &str, pages: &mut BTreeSet<u32>) {
    let mut parts = range.splitn(2, '-');
    let start = parts.next().and_then(|p| p.parse::<u32>().ok());
    let end = parts.next().and_then(|p| p.parse::<u32>().ok());
    if let Some(start) = start {
        let end = end.unwrap_or(start);
        for page in start..=end.max(start) {
            pages.insert(page);
        }
    }
}
