//! Reference list extraction
//!
//! Entries are the paragraphs after the reference heading that look like
//! `Authors. Title[J]. Venue...`. An entry's index is its extraction order,
//! not the numeral printed in front of it.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Heading paragraph that opens the reference list
pub const DEFAULT_REFERENCES_HEADING: &str = "参考文献";

static TITLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.\s*([^\.]+?)\s*\[[A-Z]\]").unwrap());

static PRINTED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:\[(\d+)\]|(\d+)[\.\s])").unwrap());

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("no reference list found: no paragraph equals {heading:?}")]
    MissingReferenceList { heading: String },
}

/// One entry of the reference list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceEntry {
    /// 1-based position in the extracted list
    pub index: u32,
    pub title: String,
    /// Numeral printed at the start of the entry, if any
    pub printed: Option<u32>,
}

/// Extract reference titles from the paragraphs following `heading`
pub fn extract_references(
    paragraphs: &[String],
    heading: &str,
) -> Result<Vec<ReferenceEntry>, ExtractionError> {
    let start = paragraphs
        .iter()
        .position(|p| p == heading)
        .ok_or_else(|| ExtractionError::MissingReferenceList {
            heading: heading.to_string(),
        })?;

    let mut entries = Vec::new();
    for paragraph in &paragraphs[start + 1..] {
        let Some(cap) = TITLE_RE.captures(paragraph) else {
            tracing::debug!(paragraph = %paragraph, "skipping unmatched reference paragraph");
            continue;
        };
        entries.push(ReferenceEntry {
            index: entries.len() as u32 + 1,
            title: cap[1].trim().to_string(),
            printed: printed_number(paragraph),
        });
    }

    Ok(entries)
}

fn printed_number(paragraph: &str) -> Option<u32> {
    let cap = PRINTED_RE.captures(paragraph)?;
    cap.get(1).or_else(|| cap.get(2))?.as_str().parse().ok()
}

/// Entries whose printed numeral disagrees with their extraction index.
///
/// Citation numbers resolve by extraction order, so every entry listed here
/// (and usually every one after it) may map to the wrong source.
pub fn numbering_drift(entries: &[ReferenceEntry]) -> Vec<&ReferenceEntry> {
    entries
        .iter()
        .filter(|e| e.printed.is_some_and(|p| p != e.index))
        .collect()
}
