//! cite-audit: citation audit for academic documents
//!
//! Steps:
//! - count check: every reference-list entry cited exactly once
//! - download: fetch cited papers from arXiv into a local store
//! - verify: ask a language model whether each citing sentence is supported

pub mod arxiv;
pub mod audit;
pub mod citations;
pub mod config;
pub mod document;
pub mod llm;
pub mod prompt;
pub mod reconcile;
pub mod references;
pub mod retry;
pub mod store;
pub mod verify;

pub use audit::{Auditor, CitationResult, CountCheck, DownloadOutcome, VerificationRun};
pub use citations::{extract_citations, CitationMarker, CitationScan};
pub use config::AuditConfig;
pub use reconcile::{reconcile, ReconciliationReport};
pub use references::{extract_references, ExtractionError, ReferenceEntry};
pub use verify::{Verdict, Verifier};
