//! Document loading: turn a .docx (or plain text) file into paragraphs
//!
//! Paragraph order is significant downstream; empty paragraphs are dropped.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DOCUMENT_PART: &str = "word/document.xml";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not a valid .docx container: {source}")]
    Container {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("malformed document XML: {0}")]
    Xml(String),

    #[error("unsupported document format: {0} (expected .docx or .txt)")]
    UnsupportedFormat(PathBuf),
}

/// Load the ordered, non-empty paragraphs of a document
pub fn load_paragraphs(path: &Path) -> Result<Vec<String>, DocumentError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "docx" => {
            let xml = read_docx_part(path)?;
            paragraphs_from_docx_xml(&xml)
        }
        "txt" | "md" | "" => {
            let text = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(paragraphs_from_text(&text))
        }
        _ => Err(DocumentError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read_docx_part(path: &Path) -> Result<String, DocumentError> {
    let container_err = |source| DocumentError::Container {
        path: path.to_path_buf(),
        source,
    };

    let file = File::open(path).map_err(|source| DocumentError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut archive = zip::ZipArchive::new(file).map_err(container_err)?;
    let mut part = archive.by_name(DOCUMENT_PART).map_err(container_err)?;

    let mut xml = String::new();
    part.read_to_string(&mut xml)
        .map_err(|source| DocumentError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(xml)
}

/// One paragraph per non-empty line
pub fn paragraphs_from_text(text: &str) -> Vec<String> {
    text.lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect()
}

/// Extract body paragraphs from a WordprocessingML `document.xml`.
///
/// Table cells are skipped: only top-level body paragraphs count. Paragraphs
/// nested inside a body paragraph (text boxes, drawing fallbacks) contribute
/// no text, and the enclosing paragraph keeps its own runs.
pub fn paragraphs_from_docx_xml(xml: &str) -> Result<Vec<String>, DocumentError> {
    let mut reader = Reader::from_str(xml);

    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut table_depth = 0usize;
    let mut paragraph_depth = 0usize;
    let mut in_text = false;

    loop {
        let collecting = paragraph_depth == 1 && table_depth == 0;
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"w:tbl" => table_depth += 1,
                b"w:p" if table_depth == 0 => {
                    paragraph_depth += 1;
                    if paragraph_depth == 1 {
                        current.clear();
                    }
                }
                b"w:t" if collecting => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.name().as_ref() {
                b"w:tab" if collecting => current.push('\t'),
                b"w:br" | b"w:cr" if collecting => current.push('\n'),
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_text => {
                let text = e
                    .unescape()
                    .map_err(|err| DocumentError::Xml(err.to_string()))?;
                current.push_str(&text);
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                b"w:p" if table_depth == 0 && paragraph_depth > 0 => {
                    paragraph_depth -= 1;
                    if paragraph_depth == 0 && !current.is_empty() {
                        paragraphs.push(std::mem::take(&mut current));
                    }
                }
                b"w:t" => in_text = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(DocumentError::Xml(e.to_string())),
            _ => {}
        }
    }

    Ok(paragraphs)
}
