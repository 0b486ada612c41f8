//! Paragraph cleaning rules applied ahead of chunk packing
//!
//! Rule order is part of the chunking contract: footnotes go first, form
//! options are merged before the noise filter can eat them, and prefix
//! stripping runs most-specific-first so "2.2 Text" collapses to "Text"
//! and never to "2 Text".

use super::types::Paragraph;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Leading footnote marker: one to three plain or superscript digits
static FOOTNOTE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9¹²³⁴⁵⁶⁷⁸⁹⁰]{1,3}\s*").expect("footnote marker regex"));

/// Preamble phrases that identify legal footnotes once the marker is removed
const FOOTNOTE_PREAMBLES: &[&str] = &[
    "the information",
    "as used herein",
    "as defined in",
    "for purposes of",
    "capitalized terms",
    "pursuant to",
    "reference is made",
    "see ",
    "this summary",
    "the term",
];

/// Standalone enumerators such as "(a)", "1.", "iv)", "A."
static ENUMERATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(?[A-Za-z0-9]{1,3}\)?\.?$").expect("enumerator regex"));

/// Bare percent values such as "50%" or "%"
static BARE_PERCENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{0,3}\s*%$").expect("bare percent regex"));

/// Page markers such as "Page 3", "3 of 12"
static PAGE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^(page\s+)?\d+(\s+of\s+\d+)?$").expect("page marker regex"));

/// Fill-in blanks: runs of underscores and whitespace
static UNDERSCORE_BLANK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[_\s]+$").expect("underscore blank regex"));

/// Short standalone form options: "Yes", "No", "N/A", checkbox glyphs
static FORM_OPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[☐☑☒■□]?\s*(yes|no|n/?a|none of the above)?[.:]?$")
        .expect("form option regex")
});

/// Ordered structural prefix rules, most specific first
static PREFIX_RULES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^\d+\.\d+\s+",                                      // "2.2 Text"
        r"^\d+\.[A-Za-z]\s+",                                 // "2.a Text"
        r"^[A-Z]\.\s+",                                       // "B. Text"
        r"^\d+\.\s+",                                         // "3. Text"
        r"^\d+[ \t]+",                                        // "3 Text"
        r"^\d+\r?\n\s*",                                      // bare number line
        r"^[A-Z]\r?\n\s*",                                    // bare letter line
        r"^\((?:i|ii|iii|iv|v|vi|vii|viii|ix|x|xi|xii)\)\s+", // "(iv) Text"
        r"^\([a-z]\)\s+",                                     // "(b) Text"
    ]
    .iter()
    .map(|p| Regex::new(p).expect("prefix rule regex"))
    .collect()
});

/// Whether a paragraph is a legal footnote
pub fn is_footnote(text: &str) -> bool {
    let trimmed = text.trim_start();
    let Some(marker) = FOOTNOTE_MARKER.find(trimmed) else {
        return false;
    };
    let rest = trimmed[marker.end()..].to_lowercase();
    FOOTNOTE_PREAMBLES
        .iter()
        .any(|phrase| rest.starts_with(phrase))
}

/// Whether a paragraph is layout noise with no matching value
pub fn is_noise(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < 10 {
        return true;
    }
    ENUMERATOR.is_match(trimmed)
        || BARE_PERCENT.is_match(trimmed)
        || PAGE_MARKER.is_match(trimmed)
        || UNDERSCORE_BLANK.is_match(trimmed)
}

/// Whether a paragraph is a short standalone form option
pub fn is_form_option(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 24 {
        return false;
    }
    // The regex admits a bare checkbox, a bare option word, or both
    FORM_OPTION.is_match(trimmed)
        && (trimmed.chars().any(|c| "☐☑☒■□".contains(c))
            || !trimmed.chars().all(|c| c.is_ascii_punctuation()))
}

/// Strip the first matching structural prefix from a paragraph
///
/// Exactly one rule fires per call, so already-stripped text is untouched.
pub fn strip_structural_prefix(text: &str) -> String {
    for rule in PREFIX_RULES.iter() {
        if let Some(found) = rule.find(text) {
            return text[found.end()..].to_string();
        }
    }
    text.to_string()
}

/// Drop legal footnotes
pub fn drop_footnotes(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    let before = paragraphs.len();
    let kept: Vec<Paragraph> = paragraphs
        .into_iter()
        .filter(|p| !is_footnote(&p.text))
        .collect();
    if kept.len() < before {
        debug!(dropped = before - kept.len(), "dropped footnote paragraphs");
    }
    kept
}

/// Merge short form options into the nearest preceding substantive paragraph
///
/// Noise paragraphs between the option and its question are skipped. The
/// merge only happens while the combined size stays under `max_characters`;
/// otherwise the option stays standalone.
pub fn merge_form_options(paragraphs: Vec<Paragraph>, max_characters: usize) -> Vec<Paragraph> {
    let mut result: Vec<Paragraph> = Vec::with_capacity(paragraphs.len());

    for paragraph in paragraphs {
        if !is_form_option(&paragraph.text) {
            result.push(paragraph);
            continue;
        }

        let target = result
            .iter()
            .rposition(|p| !is_noise(&p.text) && !is_form_option(&p.text));

        match target {
            Some(i)
                if result[i].char_count() + 1 + paragraph.char_count() <= max_characters =>
            {
                result[i].text.push(' ');
                result[i].text.push_str(paragraph.text.trim());
            }
            _ => result.push(paragraph),
        }
    }

    result
}

/// Drop layout noise paragraphs
pub fn drop_noise(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    paragraphs
        .into_iter()
        .filter(|p| !is_noise(&p.text))
        .collect()
}

/// Strip structural prefixes in place, then drop paragraphs emptied by it
pub fn strip_prefixes(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    paragraphs
        .into_iter()
        .map(|mut p| {
            p.text = strip_structural_prefix(&p.text).trim().to_string();
            p
        })
        .filter(|p| !p.text.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn para(text: &str) -> Paragraph {
        Paragraph::new(text, 1, 0)
    }

    #[test]
    fn test_footnote_detection() {
        assert!(is_footnote(
            "1 The information contained herein is confidential."
        ));
        assert!(is_footnote("² As defined in Rule 501(a)."));
        assert!(!is_footnote(
            "2 subscribers have agreed to the revised terms."
        ));
        assert!(!is_footnote(
            "The information below summarizes the offering."
        ));
    }

    #[test]
    fn test_noise_detection() {
        assert!(is_noise("(a)"));
        assert!(is_noise("iv."));
        assert!(is_noise("50%"));
        assert!(is_noise("Page 3"));
        assert!(is_noise("12 of 120"));
        assert!(is_noise("________________"));
        assert!(is_noise("short"));
        assert!(!is_noise(
            "The investor acknowledges receipt of the memorandum."
        ));
    }

    #[test]
    fn test_form_option_detection() {
        assert!(is_form_option("Yes"));
        assert!(is_form_option("No"));
        assert!(is_form_option("N/A"));
        assert!(is_form_option("☐ Yes"));
        assert!(is_form_option("☑"));
        assert!(!is_form_option("Yes, the investor has previously subscribed."));
    }

    #[test]
    fn test_prefix_strip_most_specific_first() {
        assert_eq!(strip_structural_prefix("2.2 Text"), "Text");
        assert_eq!(strip_structural_prefix("2.a Text"), "Text");
        assert_eq!(strip_structural_prefix("B. Text"), "Text");
        assert_eq!(strip_structural_prefix("3. Text"), "Text");
        assert_eq!(strip_structural_prefix("3 Text"), "Text");
        assert_eq!(strip_structural_prefix("3\nText"), "Text");
        assert_eq!(strip_structural_prefix("B\nText"), "Text");
        assert_eq!(strip_structural_prefix("(iv) Text"), "Text");
        assert_eq!(strip_structural_prefix("(b) Text"), "Text");
    }

    #[test]
    fn test_prefix_strip_idempotent() {
        let stripped = strip_structural_prefix("2.2 Subscription amounts are binding.");
        assert_eq!(stripped, "Subscription amounts are binding.");
        assert_eq!(strip_structural_prefix(&stripped), stripped);
    }

    #[test]
    fn test_statutory_reference_preserved() {
        let text = "Section 2510.3-101 of the plan asset regulations applies.";
        assert_eq!(strip_structural_prefix(text), text);

        let text = "2510.3-101 is the operative regulation.";
        assert_eq!(strip_structural_prefix(text), text);
    }

    #[test]
    fn test_merge_form_options_into_preceding() {
        let paragraphs = vec![
            Paragraph::new("Is the subscriber an accredited investor as defined?", 1, 0),
            Paragraph::new("(a)", 1, 1),
            Paragraph::new("Yes", 1, 2),
        ];
        let merged = merge_form_options(paragraphs, 2000);
        assert_eq!(merged.len(), 2);
        assert!(merged[0].text.ends_with("Yes"));
        assert_eq!(merged[1].text, "(a)");
    }

    #[test]
    fn test_merge_form_options_respects_budget() {
        let long_question = "q".repeat(1998);
        let paragraphs = vec![para(&long_question), Paragraph::new("Yes", 1, 1)];
        let merged = merge_form_options(paragraphs, 2000);
        // 1998 + 1 + 3 > 2000, so the option stays standalone
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[1].text, "Yes");
    }

    #[test]
    fn test_strip_prefixes_drops_emptied() {
        let paragraphs = vec![
            Paragraph::new("3 ", 1, 0),
            Paragraph::new("1.1 Representations and warranties survive closing.", 1, 1),
        ];
        let stripped = strip_prefixes(paragraphs);
        assert_eq!(stripped.len(), 1);
        assert_eq!(
            stripped[0].text,
            "Representations and warranties survive closing."
        );
    }
}
