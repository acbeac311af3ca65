//! Timeout-bounded external calls with a small retry budget

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Failure of a network collaborator (search, download, model)
#[derive(Debug, Error)]
pub enum ExternalCallError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("malformed {service} response: {message}")]
    Malformed {
        service: &'static str,
        message: String,
    },

    #[error("failed to write {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExternalCallError {
    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        match self {
            ExternalCallError::Http(e) => e.is_timeout() || e.is_connect(),
            ExternalCallError::Status { status, .. } => *status == 429 || *status >= 500,
            ExternalCallError::Malformed { .. } | ExternalCallError::Io { .. } => false,
        }
    }
}

/// Per-call timeout plus exponential backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            initial_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or retries run out
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, ExternalCallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExternalCallError>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "{}: {} (retry {}/{} in {:.1}s)",
                        what,
                        e,
                        attempt,
                        self.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Read an error body for a failed response
pub(crate) async fn status_error(service: &'static str, resp: reqwest::Response) -> ExternalCallError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ExternalCallError::Status {
        service,
        status,
        body: truncate(&body, 200),
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
