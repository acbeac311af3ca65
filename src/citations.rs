//! Citation marker extraction
//!
//! Finds bracketed numeric markers like `[3]` or `[3, 7]` and captures the
//! sentence(s) around each one, bounded by the full-width period `。`.

use once_cell::sync::Lazy;
use regex::Regex;

/// Sentence terminator used to bound citation spans
pub const SENTENCE_TERMINATOR: char = '。';

static MARKER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\s*\d+(?:\s*,\s*\d+)*)\s*\]").unwrap());

/// An in-text citation and the text it is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationMarker {
    /// Reference numbers as written, order and repeats kept
    pub numbers: Vec<u32>,
    /// Enclosing sentence(s), trailing terminator included when present
    pub span: String,
}

impl CitationMarker {
    /// Unique cited indices, ascending
    pub fn references(&self) -> Vec<u32> {
        let mut refs = self.numbers.clone();
        refs.sort_unstable();
        refs.dedup();
        refs
    }

    /// Marker as it would be written, e.g. `[3, 7]`
    pub fn label(&self) -> String {
        let parts: Vec<String> = self.numbers.iter().map(|n| n.to_string()).collect();
        format!("[{}]", parts.join(", "))
    }
}

/// A bracketed marker that could not be turned into reference numbers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMarker {
    pub raw: String,
    pub reason: String,
}

/// Everything found by a citation scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CitationScan {
    pub markers: Vec<CitationMarker>,
    pub malformed: Vec<MalformedMarker>,
}

impl CitationScan {
    /// All cited numbers across markers, duplicates preserved
    pub fn cited_numbers(&self) -> Vec<u32> {
        self.markers
            .iter()
            .flat_map(|m| m.numbers.iter().copied())
            .collect()
    }
}

/// Scan every paragraph for citation markers, in document order
pub fn extract_citations(paragraphs: &[String]) -> CitationScan {
    let mut scan = CitationScan::default();
    for paragraph in paragraphs {
        scan_paragraph(paragraph, &mut scan);
    }
    scan
}

fn scan_paragraph(text: &str, scan: &mut CitationScan) {
    for mat in MARKER_RE.find_iter(text) {
        match parse_numbers(mat.as_str()) {
            Ok(numbers) => scan.markers.push(CitationMarker {
                numbers,
                span: sentence_span(text, mat.start(), mat.end()).to_string(),
            }),
            Err(reason) => {
                tracing::warn!(marker = mat.as_str(), %reason, "ignoring malformed citation marker");
                scan.malformed.push(MalformedMarker {
                    raw: mat.as_str().to_string(),
                    reason,
                });
            }
        }
    }
}

fn parse_numbers(marker: &str) -> Result<Vec<u32>, String> {
    marker
        .trim_start_matches('[')
        .trim_end_matches(']')
        .split(',')
        .map(|token| {
            let token = token.trim();
            match token.parse::<u32>() {
                Ok(0) => Err("reference number 0 is not valid".to_string()),
                Ok(n) => Ok(n),
                Err(e) => Err(format!("{:?} is not a reference number: {}", token, e)),
            }
        })
        .collect()
}

/// Byte range of the sentence(s) containing `start..end`
fn sentence_span(text: &str, start: usize, end: usize) -> &str {
    let from = text[..start]
        .rfind(SENTENCE_TERMINATOR)
        .map(|i| i + SENTENCE_TERMINATOR.len_utf8())
        .unwrap_or(0);
    let to = text[end..]
        .find(SENTENCE_TERMINATOR)
        .map(|i| end + i + SENTENCE_TERMINATOR.len_utf8())
        .unwrap_or(text.len());
    &text[from..to]
}
