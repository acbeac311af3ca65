//! Citation-to-source verification
//!
//! Each citation span is checked against the text of every reference it
//! cites. The model answers in free text, so verdicts include an explicit
//! `Unclassified` outcome for answers that match neither marker.

use crate::citations::CitationMarker;
use crate::llm::LanguageModel;
use crate::prompt::PromptTemplate;
use crate::retry::ExternalCallError;
use crate::store::{SourceError, SourceLookup};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_AFFIRMATIVE: &str = "<是>";
pub const DEFAULT_NEGATIVE: &str = "否";

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("model call failed: {0}")]
    Model(#[from] ExternalCallError),
}

/// Tokens that classify a model answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerdictMarkers {
    /// Whole answer must equal this to count as supported
    pub affirmative: String,
    /// Answer containing this counts as unsupported
    pub negative: String,
}

impl Default for VerdictMarkers {
    fn default() -> Self {
        Self {
            affirmative: DEFAULT_AFFIRMATIVE.to_string(),
            negative: DEFAULT_NEGATIVE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Some cited references have no stored source
    NotRetrieved { missing: Vec<u32> },
    /// A stored source could not be turned into text
    Unreadable { error: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotRetrieved { .. } => write!(f, "not retrieved"),
            SkipReason::Unreadable { .. } => write!(f, "unreadable source"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Supported,
    Unsupported { response: String },
    Unclassified { response: String },
    Skipped { reason: SkipReason },
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Supported => write!(f, "supported"),
            Verdict::Unsupported { .. } => write!(f, "unsupported"),
            Verdict::Unclassified { .. } => write!(f, "unclassified"),
            Verdict::Skipped { reason } => write!(f, "skipped ({})", reason),
        }
    }
}

/// Classify a trimmed model answer
pub fn classify(response: &str, markers: &VerdictMarkers) -> Verdict {
    if response == markers.affirmative {
        Verdict::Supported
    } else if response.contains(&markers.negative) {
        Verdict::Unsupported {
            response: response.to_string(),
        }
    } else {
        Verdict::Unclassified {
            response: response.to_string(),
        }
    }
}

/// Everything needed to verify citations
pub struct Verifier<'a> {
    pub sources: &'a dyn SourceLookup,
    pub model: &'a dyn LanguageModel,
    pub template: &'a PromptTemplate,
    pub markers: &'a VerdictMarkers,
}

impl Verifier<'_> {
    /// Verify one citation. Missing or unreadable sources skip the model call.
    pub async fn verify(&self, citation: &CitationMarker) -> Result<Verdict, VerifyError> {
        let refs = citation.references();

        let missing: Vec<u32> = refs
            .iter()
            .copied()
            .filter(|&i| !self.sources.contains(i))
            .collect();
        if !missing.is_empty() {
            return Ok(Verdict::Skipped {
                reason: SkipReason::NotRetrieved { missing },
            });
        }

        let reference_text = match self.sources.load(&refs).await {
            Ok(text) => text,
            Err(
                e @ (SourceError::Pdf { .. } | SourceError::Io { .. } | SourceError::Task(_)),
            ) => {
                tracing::warn!(citation = %citation.label(), error = %e, "skipping unreadable source");
                return Ok(Verdict::Skipped {
                    reason: SkipReason::Unreadable {
                        error: e.to_string(),
                    },
                });
            }
            Err(SourceError::Missing(i)) => {
                return Ok(Verdict::Skipped {
                    reason: SkipReason::NotRetrieved { missing: vec![i] },
                });
            }
        };

        let prompt = self.template.render(&citation.span, &reference_text);
        let response = self.model.complete(&prompt).await?;
        tracing::debug!(citation = %citation.label(), %response, "model verdict");
        Ok(classify(&response, self.markers))
    }
}
