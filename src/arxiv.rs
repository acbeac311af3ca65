//! Reference source retrieval from arXiv
//!
//! Searches the arXiv Atom API by title and downloads the PDF of the first
//! candidate whose title matches exactly (case-insensitive).

use crate::retry::{status_error, ExternalCallError, RetryPolicy};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use url::Url;

pub const DEFAULT_ARXIV_URL: &str = "http://export.arxiv.org";

const MAX_RESULTS: usize = 5;

/// A search hit that can be downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperCandidate {
    pub title: String,
    pub pdf_url: Option<String>,
}

/// Title search plus download of the matched paper
pub trait PaperLocator: Send + Sync {
    fn name(&self) -> &str;

    fn search<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperCandidate>, ExternalCallError>> + Send + 'a>>;

    /// Persist the candidate's full text as `dir/filename`
    fn download<'a>(
        &'a self,
        candidate: &'a PaperCandidate,
        dir: &'a Path,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, ExternalCallError>> + Send + 'a>>;
}

/// First candidate whose title equals `title`, ignoring case
pub fn find_exact<'c>(candidates: &'c [PaperCandidate], title: &str) -> Option<&'c PaperCandidate> {
    let wanted = title.to_lowercase();
    candidates.iter().find(|c| c.title.to_lowercase() == wanted)
}

pub struct ArxivClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ArxivClient {
    pub fn new(base_url: &str, retry: RetryPolicy) -> Result<Self, ExternalCallError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("cite-audit/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    fn query_url(&self, title: &str) -> Result<Url, ExternalCallError> {
        let max = MAX_RESULTS.to_string();
        Url::parse_with_params(
            &format!("{}/api/query", self.base_url),
            &[
                ("search_query", title),
                ("start", "0"),
                ("max_results", max.as_str()),
            ],
        )
        .map_err(|e| ExternalCallError::Malformed {
            service: "arXiv",
            message: format!("bad base URL {}: {}", self.base_url, e),
        })
    }

    async fn search_once(&self, url: &Url) -> Result<Vec<PaperCandidate>, ExternalCallError> {
        let resp = self
            .http
            .get(url.clone())
            .timeout(self.retry.timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("arXiv", resp).await);
        }
        let body = resp.text().await?;
        parse_feed(&body)
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<u8>, ExternalCallError> {
        let resp = self
            .http
            .get(url)
            .timeout(self.retry.timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(status_error("arXiv", resp).await);
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

impl PaperLocator for ArxivClient {
    fn name(&self) -> &str {
        "arXiv"
    }

    fn search<'a>(
        &'a self,
        title: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperCandidate>, ExternalCallError>> + Send + 'a>>
    {
        Box::pin(async move {
            let url = self.query_url(title)?;
            tracing::debug!(%url, "arXiv search");
            self.retry
                .run("arXiv search", || self.search_once(&url))
                .await
        })
    }

    fn download<'a>(
        &'a self,
        candidate: &'a PaperCandidate,
        dir: &'a Path,
        filename: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, ExternalCallError>> + Send + 'a>> {
        Box::pin(async move {
            let url = candidate
                .pdf_url
                .as_deref()
                .ok_or_else(|| ExternalCallError::Malformed {
                    service: "arXiv",
                    message: format!("no PDF link for {:?}", candidate.title),
                })?;

            let bytes = self
                .retry
                .run("arXiv download", || self.fetch_once(url))
                .await?;

            let path = dir.join(filename);
            tokio::fs::write(&path, bytes)
                .await
                .map_err(|source| ExternalCallError::Io {
                    path: path.clone(),
                    source,
                })?;
            Ok(path)
        })
    }
}

/// Parse an arXiv Atom feed into candidates, in feed order
pub fn parse_feed(xml: &str) -> Result<Vec<PaperCandidate>, ExternalCallError> {
    let mut reader = Reader::from_str(xml);

    let mut candidates = Vec::new();
    let mut in_entry = false;
    let mut in_title = false;
    let mut in_id = false;
    let mut title = String::new();
    let mut id = String::new();
    let mut pdf_url: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    title.clear();
                    id.clear();
                    pdf_url = None;
                }
                b"title" if in_entry => in_title = true,
                b"id" if in_entry => in_id = true,
                b"link" if in_entry => pdf_url = pdf_url.or_else(|| pdf_link(e)),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if in_entry && e.local_name().as_ref() == b"link" {
                    pdf_url = pdf_url.or_else(|| pdf_link(e));
                }
            }
            Ok(Event::Text(ref e)) => {
                if in_title || in_id {
                    let text = e.unescape().map_err(|err| ExternalCallError::Malformed {
                        service: "arXiv",
                        message: err.to_string(),
                    })?;
                    if in_title {
                        title.push_str(&text);
                    } else {
                        id.push_str(&text);
                    }
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"entry" => {
                    in_entry = false;
                    let url = pdf_url.take().or_else(|| pdf_from_id(id.trim()));
                    candidates.push(PaperCandidate {
                        title: collapse_whitespace(&title),
                        pdf_url: url,
                    });
                }
                b"title" => in_title = false,
                b"id" => in_id = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ExternalCallError::Malformed {
                    service: "arXiv",
                    message: format!("XML parse error: {}", e),
                })
            }
            _ => {}
        }
    }

    Ok(candidates)
}

fn pdf_link(e: &BytesStart<'_>) -> Option<String> {
    let mut href = None;
    let mut is_pdf = false;
    for attr in e.attributes().flatten() {
        match attr.key.as_ref() {
            b"href" => href = Some(String::from_utf8_lossy(&attr.value).to_string()),
            b"title" => is_pdf |= attr.value.as_ref() == b"pdf",
            b"type" => is_pdf |= attr.value.as_ref() == b"application/pdf",
            _ => {}
        }
    }
    href.filter(|_| is_pdf)
}

fn pdf_from_id(id: &str) -> Option<String> {
    id.contains("/abs/").then(|| id.replacen("/abs/", "/pdf/", 1))
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
