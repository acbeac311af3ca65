//! Local store of retrieved reference sources
//!
//! Files are named by 1-based reference index (`3.pdf` is reference 3).
//! PDFs are extracted with pdf-extract; any other extension is read as text.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to access source store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed for {path}: {message}")]
    Pdf { path: PathBuf, message: String },

    #[error("no source stored for reference [{0}]")]
    Missing(u32),

    #[error("source extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Lookup from reference index to locally available source text
pub trait SourceLookup: Send + Sync {
    fn contains(&self, index: u32) -> bool;

    /// Concatenated text of the given references, in the order given
    fn load<'a>(
        &'a self,
        indices: &'a [u32],
    ) -> Pin<Box<dyn Future<Output = Result<String, SourceError>> + Send + 'a>>;
}

/// Directory-backed store, indexed once when opened
#[derive(Debug, Clone)]
pub struct SourceStore {
    dir: PathBuf,
    files: BTreeMap<u32, PathBuf>,
}

impl SourceStore {
    /// Open (creating if needed) and index `dir`
    pub fn open(dir: &Path) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(io_err)?;

        let mut files = BTreeMap::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if !path.is_file() {
                continue;
            }
            let Some(index) = index_of(&path) else {
                continue;
            };
            // Prefer the PDF when several files share an index
            let is_pdf = has_pdf_extension(&path);
            files
                .entry(index)
                .and_modify(|existing: &mut PathBuf| {
                    if is_pdf && !has_pdf_extension(existing) {
                        *existing = path.clone();
                    }
                })
                .or_insert(path);
        }

        tracing::debug!(dir = %dir.display(), sources = files.len(), "indexed source store");
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Indices with a stored source, ascending
    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.files.keys().copied()
    }

    /// Where a downloaded source for `index` is written
    pub fn download_name(index: u32) -> String {
        format!("{}.pdf", index)
    }
}

impl SourceLookup for SourceStore {
    fn contains(&self, index: u32) -> bool {
        self.files.contains_key(&index)
    }

    fn load<'a>(
        &'a self,
        indices: &'a [u32],
    ) -> Pin<Box<dyn Future<Output = Result<String, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            let paths = indices
                .iter()
                .map(|i| self.files.get(i).cloned().ok_or(SourceError::Missing(*i)))
                .collect::<Result<Vec<_>, _>>()?;
            // pdf-extract is synchronous and CPU-bound
            tokio::task::spawn_blocking(move || extract_text(&paths)).await?
        })
    }
}

fn index_of(path: &Path) -> Option<u32> {
    path.file_stem()?
        .to_str()?
        .parse::<u32>()
        .ok()
        .filter(|&n| n > 0)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Extract and concatenate the text of `paths`, in order
pub fn extract_text(paths: &[PathBuf]) -> Result<String, SourceError> {
    let mut text = String::new();
    for path in paths {
        if has_pdf_extension(path) {
            let extracted = pdf_extract::extract_text(path).map_err(|e| SourceError::Pdf {
                path: path.clone(),
                message: e.to_string(),
            })?;
            text.push_str(&extracted);
        } else {
            let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
                path: path.clone(),
                source,
            })?;
            text.push_str(&content);
        }
    }
    Ok(text)
}
