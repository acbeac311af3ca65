//! Runtime configuration from the environment (and `.env`)
//!
//! | Variable | Default |
//! |---|---|
//! | `ZHIPUAI_API_KEY` | required for verification |
//! | `CITE_AUDIT_MODEL_URL` | Zhipu BigModel v4 endpoint |
//! | `CITE_AUDIT_ARXIV_URL` | `http://export.arxiv.org` |
//! | `CITE_AUDIT_TIMEOUT_SECS` | 60 |
//! | `CITE_AUDIT_RETRIES` | 2 |
//! | `CITE_AUDIT_DOWNLOAD_CONCURRENCY` | 4 |
//! | `CITE_AUDIT_REFERENCES_HEADING` | `参考文献` |
//! | `CITE_AUDIT_AFFIRMATIVE` / `CITE_AUDIT_NEGATIVE` | `<是>` / `否` |

use crate::arxiv::DEFAULT_ARXIV_URL;
use crate::llm::DEFAULT_MODEL_URL;
use crate::references::DEFAULT_REFERENCES_HEADING;
use crate::retry::RetryPolicy;
use crate::verify::VerdictMarkers;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const API_KEY_VAR: &str = "ZHIPUAI_API_KEY";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name}={value:?} is not a valid number")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be at least 1")]
    Zero { name: &'static str },

    #[error("{0} is not set; it is required to call the language model")]
    MissingApiKey(&'static str),
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub api_key: Option<String>,
    pub model_url: String,
    pub arxiv_url: String,
    pub retry: RetryPolicy,
    pub download_concurrency: usize,
    pub references_heading: String,
    pub markers: VerdictMarkers,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model_url: DEFAULT_MODEL_URL.to_string(),
            arxiv_url: DEFAULT_ARXIV_URL.to_string(),
            retry: RetryPolicy::default(),
            download_concurrency: 4,
            references_heading: DEFAULT_REFERENCES_HEADING.to_string(),
            markers: VerdictMarkers::default(),
        }
    }
}

impl AuditConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; unset or empty values keep defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        config.api_key = get(API_KEY_VAR);
        if let Some(url) = get("CITE_AUDIT_MODEL_URL") {
            config.model_url = url;
        }
        if let Some(url) = get("CITE_AUDIT_ARXIV_URL") {
            config.arxiv_url = url;
        }
        if let Some(v) = get("CITE_AUDIT_TIMEOUT_SECS") {
            let secs: u64 = parse_number("CITE_AUDIT_TIMEOUT_SECS", &v)?;
            if secs == 0 {
                return Err(ConfigError::Zero {
                    name: "CITE_AUDIT_TIMEOUT_SECS",
                });
            }
            config.retry.timeout = Duration::from_secs(secs);
        }
        if let Some(v) = get("CITE_AUDIT_RETRIES") {
            config.retry.max_retries = parse_number("CITE_AUDIT_RETRIES", &v)?;
        }
        if let Some(v) = get("CITE_AUDIT_DOWNLOAD_CONCURRENCY") {
            let n: usize = parse_number("CITE_AUDIT_DOWNLOAD_CONCURRENCY", &v)?;
            if n == 0 {
                return Err(ConfigError::Zero {
                    name: "CITE_AUDIT_DOWNLOAD_CONCURRENCY",
                });
            }
            config.download_concurrency = n;
        }
        if let Some(heading) = get("CITE_AUDIT_REFERENCES_HEADING") {
            config.references_heading = heading;
        }
        if let Some(token) = get("CITE_AUDIT_AFFIRMATIVE") {
            config.markers.affirmative = token;
        }
        if let Some(token) = get("CITE_AUDIT_NEGATIVE") {
            config.markers.negative = token;
        }

        Ok(config)
    }

    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key
            .as_deref()
            .ok_or(ConfigError::MissingApiKey(API_KEY_VAR))
    }
}

fn parse_number<T: FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}
