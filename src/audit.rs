//! The three audit steps: count check, source download, citation verification
//!
//! Each step returns structured results whose `Display` output is the
//! human-readable report line(s) printed by the CLI.

use crate::arxiv::{find_exact, PaperLocator};
use crate::citations::{extract_citations, CitationMarker, CitationScan, MalformedMarker};
use crate::reconcile::{reconcile, ReconciliationReport};
use crate::references::{extract_references, numbering_drift, ExtractionError, ReferenceEntry};
use crate::retry::truncate;
use crate::store::{SourceError, SourceLookup, SourceStore};
use crate::verify::{SkipReason, Verdict, Verifier, VerifyError};
use futures::stream::{self, StreamExt};
use std::fmt;
use std::path::{Path, PathBuf};

/// A parsed document ready for auditing
#[derive(Debug, Clone)]
pub struct Auditor {
    references: Vec<ReferenceEntry>,
    scan: CitationScan,
}

impl Auditor {
    /// Fails when the document has no reference list heading
    pub fn new(paragraphs: &[String], heading: &str) -> Result<Self, ExtractionError> {
        let references = extract_references(paragraphs, heading)?;
        let scan = extract_citations(paragraphs);
        tracing::debug!(
            references = references.len(),
            citations = scan.markers.len(),
            "parsed document"
        );
        Ok(Self { references, scan })
    }

    pub fn references(&self) -> &[ReferenceEntry] {
        &self.references
    }

    pub fn citations(&self) -> &[CitationMarker] {
        &self.scan.markers
    }

    /// Step 1: every reference cited exactly once
    pub fn check_citation_counts(&self) -> CountCheck {
        let report = reconcile(self.references.len() as u32, &self.scan.cited_numbers());
        CountCheck {
            total: self.references.len(),
            report,
            drift: numbering_drift(&self.references)
                .into_iter()
                .cloned()
                .collect(),
            malformed: self.scan.malformed.clone(),
        }
    }

    /// Step 2: fetch a source for every reference not yet in `store_dir`.
    ///
    /// Searches run `concurrency` at a time; outcomes arrive in list order.
    pub async fn download_references<F>(
        &self,
        locator: &dyn PaperLocator,
        store_dir: &Path,
        concurrency: usize,
        mut on_outcome: F,
    ) -> Result<Vec<DownloadOutcome>, SourceError>
    where
        F: FnMut(&DownloadOutcome),
    {
        let store = SourceStore::open(store_dir)?;

        let mut pending = stream::iter(&self.references)
            .map(|entry| fetch_reference(locator, &store, entry))
            .buffered(concurrency.max(1));

        let mut outcomes = Vec::with_capacity(self.references.len());
        while let Some(outcome) = pending.next().await {
            on_outcome(&outcome);
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Step 3: verify each citation in document order.
    ///
    /// A failed model call aborts the whole step.
    pub async fn verify_citation_sentences<F>(
        &self,
        verifier: &Verifier<'_>,
        mut on_result: F,
    ) -> Result<VerificationRun, VerifyError>
    where
        F: FnMut(&CitationResult),
    {
        let mut results = Vec::with_capacity(self.scan.markers.len());
        for citation in &self.scan.markers {
            let verdict = verifier.verify(citation).await?;
            let result = CitationResult {
                citation: citation.clone(),
                verdict,
            };
            on_result(&result);
            results.push(result);
        }
        Ok(VerificationRun { results })
    }
}

async fn fetch_reference(
    locator: &dyn PaperLocator,
    store: &SourceStore,
    entry: &ReferenceEntry,
) -> DownloadOutcome {
    let index = entry.index;
    let title = entry.title.clone();

    if store.contains(index) {
        return DownloadOutcome::AlreadyStored { index, title };
    }

    let candidates = match locator.search(&entry.title).await {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(index, error = %e, "{} search failed", locator.name());
            return DownloadOutcome::Failed {
                index,
                title,
                error: e.to_string(),
            };
        }
    };

    let Some(hit) = find_exact(&candidates, &entry.title) else {
        return DownloadOutcome::NotFound {
            index,
            title,
            source: locator.name().to_string(),
        };
    };

    let filename = SourceStore::download_name(index);
    match locator.download(hit, store.dir(), &filename).await {
        Ok(path) => DownloadOutcome::Downloaded {
            index,
            title: hit.title.clone(),
            path,
        },
        Err(e) => {
            tracing::warn!(index, error = %e, "download failed");
            DownloadOutcome::Failed {
                index,
                title,
                error: e.to_string(),
            }
        }
    }
}

/// Step 1 findings
#[derive(Debug, Clone)]
pub struct CountCheck {
    pub total: usize,
    pub report: ReconciliationReport,
    pub drift: Vec<ReferenceEntry>,
    pub malformed: Vec<MalformedMarker>,
}

impl fmt::Display for CountCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reference list contains {} references", self.total)?;
        if self.report.is_clean() {
            writeln!(f, "Every reference is cited exactly once")?;
        }
        for n in &self.report.unreferenced {
            writeln!(f, "Reference [{}] is never cited", n)?;
        }
        for (n, count) in &self.report.over_cited {
            writeln!(f, "Reference [{}] is cited more than once ({} times)", n, count)?;
        }
        for n in &self.report.out_of_range {
            writeln!(f, "Citation [{}] has no entry in the reference list", n)?;
        }
        for m in &self.malformed {
            writeln!(f, "Ignored malformed citation {}: {}", m.raw, m.reason)?;
        }
        for e in &self.drift {
            if let Some(printed) = e.printed {
                writeln!(
                    f,
                    "Warning: entry printed as [{}] is reference [{}] by list order: {}",
                    printed, e.index, e.title
                )?;
            }
        }
        Ok(())
    }
}

/// Step 2 result for one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    AlreadyStored {
        index: u32,
        title: String,
    },
    Downloaded {
        index: u32,
        title: String,
        path: PathBuf,
    },
    NotFound {
        index: u32,
        title: String,
        source: String,
    },
    Failed {
        index: u32,
        title: String,
        error: String,
    },
}

impl DownloadOutcome {
    pub fn index(&self) -> u32 {
        match self {
            DownloadOutcome::AlreadyStored { index, .. }
            | DownloadOutcome::Downloaded { index, .. }
            | DownloadOutcome::NotFound { index, .. }
            | DownloadOutcome::Failed { index, .. } => *index,
        }
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadOutcome::AlreadyStored { index, title } => {
                write!(f, "[{}] already stored: {}", index, title)
            }
            DownloadOutcome::Downloaded { index, title, path } => {
                write!(f, "[{}] downloaded: {} -> {}", index, title, path.display())
            }
            DownloadOutcome::NotFound {
                index,
                title,
                source,
            } => write!(f, "[{}] not found on {}: {}", index, source, title),
            DownloadOutcome::Failed {
                index,
                title,
                error,
            } => write!(f, "[{}] retrieval failed for {}: {}", index, title, error),
        }
    }
}

/// Step 3 result for one citation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationResult {
    pub citation: CitationMarker,
    pub verdict: Verdict,
}

impl fmt::Display for CitationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.citation.label();
        match &self.verdict {
            Verdict::Supported => write!(f, "Citation {} verified", label),
            Verdict::Unsupported { response } => {
                write!(f, "Citation {} flagged: {}", label, response)
            }
            Verdict::Unclassified { response } => {
                write!(f, "Citation {} got an unclassified answer: {}", label, response)
            }
            Verdict::Skipped { reason } => {
                let detail = match reason {
                    SkipReason::NotRetrieved { missing } => {
                        let m: Vec<String> = missing.iter().map(|n| n.to_string()).collect();
                        format!("not retrieved: [{}]", m.join(", "))
                    }
                    SkipReason::Unreadable { error } => error.clone(),
                };
                write!(
                    f,
                    "Skipping citation {} ({}): {}",
                    label,
                    detail,
                    truncate(&self.citation.span, 80)
                )
            }
        }
    }
}

/// All step 3 results, in citation order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationRun {
    pub results: Vec<CitationResult>,
}

impl VerificationRun {
    fn count(&self, pred: impl Fn(&Verdict) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.verdict)).count()
    }

    pub fn supported(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Supported))
    }

    pub fn unsupported(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Unsupported { .. }))
    }

    pub fn unclassified(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Unclassified { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|v| matches!(v, Verdict::Skipped { .. }))
    }
}

impl fmt::Display for VerificationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} citation(s) flagged as unsupported",
            self.unsupported()
        )?;
        write!(
            f,
            "({} supported, {} unclassified, {} skipped, {} total)",
            self.supported(),
            self.unclassified(),
            self.skipped(),
            self.results.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arxiv::PaperCandidate;
    use crate::llm::LanguageModel;
    use crate::prompt::PromptTemplate;
    use crate::retry::ExternalCallError;
    use crate::verify::VerdictMarkers;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn document() -> Vec<String> {
        [
            "深度学习改变了自然语言处理[1]。",
            "残差网络解决了退化问题[2]。注意力机制再次被提及[1]。",
            "参考文献",
            "Vaswani A. Attention Is All You Need[C]. NeurIPS, 2017.",
            "He K. Deep Residual Learning for Image Recognition[C]. CVPR, 2016.",
            "Nobody. An Uncited Paper[J]. Nowhere, 2000.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    /// Locator that knows a fixed set of titles; downloads write the title
    struct FakeLocator {
        known: Vec<&'static str>,
        delay_first: bool,
        searches: AtomicUsize,
    }

    impl PaperLocator for FakeLocator {
        fn name(&self) -> &str {
            "fake"
        }

        fn search<'a>(
            &'a self,
            title: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<PaperCandidate>, ExternalCallError>> + Send + 'a>>
        {
            let n = self.searches.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if self.delay_first && n == 0 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                if title.contains("Uncited") {
                    return Err(ExternalCallError::Malformed {
                        service: "fake",
                        message: "boom".to_string(),
                    });
                }
                Ok(self
                    .known
                    .iter()
                    .filter(|k| k.eq_ignore_ascii_case(title))
                    .map(|k| PaperCandidate {
                        title: k.to_string(),
                        pdf_url: Some("unused".to_string()),
                    })
                    .collect())
            })
        }

        fn download<'a>(
            &'a self,
            candidate: &'a PaperCandidate,
            dir: &'a Path,
            filename: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<PathBuf, ExternalCallError>> + Send + 'a>> {
            Box::pin(async move {
                let path = dir.join(filename);
                std::fs::write(&path, &candidate.title).map_err(|source| {
                    ExternalCallError::Io {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(path)
            })
        }
    }

    struct FixedModel(&'static str);

    impl LanguageModel for FixedModel {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, ExternalCallError>> + Send + 'a>> {
            let answer = self.0.to_string();
            Box::pin(async move { Ok(answer) })
        }
    }

    struct FailingModel;

    impl LanguageModel for FailingModel {
        fn complete<'a>(
            &'a self,
            _prompt: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String, ExternalCallError>> + Send + 'a>> {
            Box::pin(async {
                Err(ExternalCallError::Status {
                    service: "model",
                    status: 500,
                    body: "down".to_string(),
                })
            })
        }
    }

    #[test]
    fn test_missing_heading_aborts() {
        let doc = vec!["正文[1]。".to_string()];
        assert!(Auditor::new(&doc, "参考文献").is_err());
    }

    #[test]
    fn test_check_citation_counts() {
        let auditor = Auditor::new(&document(), "参考文献").unwrap();
        assert_eq!(auditor.references().len(), 3);
        assert_eq!(auditor.citations().len(), 3);

        let check = auditor.check_citation_counts();
        let text = check.to_string();
        assert!(text.contains("Reference list contains 3 references"));
        assert!(text.contains("Reference [3] is never cited"));
        assert!(text.contains("Reference [1] is cited more than once (2 times)"));
        assert!(!text.contains("Every reference is cited exactly once"));
    }

    #[test]
    fn test_clean_document_says_so() {
        let doc: Vec<String> = [
            "甲[1]。乙[2]。",
            "参考文献",
            "Smith J. First Paper[J]. Nature, 2020.",
            "Lee K. Second Paper[J]. Science, 2019.",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let check = Auditor::new(&doc, "参考文献").unwrap().check_citation_counts();
        assert!(check.report.is_clean());
        assert_eq!(
            check.to_string(),
            "Reference list contains 2 references\nEvery reference is cited exactly once\n"
        );
    }

    #[tokio::test]
    async fn test_download_references_keeps_list_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("2.txt"), "already here").unwrap();

        let auditor = Auditor::new(&document(), "参考文献").unwrap();
        let locator = FakeLocator {
            known: vec!["attention is all you need"],
            delay_first: true,
            searches: AtomicUsize::new(0),
        };

        let mut seen = Vec::new();
        let outcomes = auditor
            .download_references(&locator, dir.path(), 4, |o| seen.push(o.index()))
            .await
            .unwrap();

        assert_eq!(seen, vec![1, 2, 3]);
        assert!(matches!(outcomes[0], DownloadOutcome::Downloaded { index: 1, .. }));
        assert!(matches!(outcomes[1], DownloadOutcome::AlreadyStored { index: 2, .. }));
        assert!(matches!(outcomes[2], DownloadOutcome::Failed { index: 3, .. }));
        assert!(dir.path().join("1.pdf").exists());
        assert_eq!(locator.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_not_found_without_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        let doc: Vec<String> = ["参考文献", "A B. Some Title[J]. X, 2020."]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let auditor = Auditor::new(&doc, "参考文献").unwrap();
        let locator = FakeLocator {
            known: vec!["Some Title, Extended"],
            delay_first: false,
            searches: AtomicUsize::new(0),
        };
        let outcomes = auditor
            .download_references(&locator, dir.path(), 1, |_| {})
            .await
            .unwrap();
        assert_eq!(
            outcomes,
            vec![DownloadOutcome::NotFound {
                index: 1,
                title: "Some Title".to_string(),
                source: "fake".to_string()
            }]
        );
        assert_eq!(outcomes[0].to_string(), "[1] not found on fake: Some Title");
    }

    #[tokio::test]
    async fn test_verify_citation_sentences() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.txt"), "transformer paper").unwrap();
        let store = SourceStore::open(dir.path()).unwrap();

        let auditor = Auditor::new(&document(), "参考文献").unwrap();
        let model = FixedModel("<否> 不支持");
        let template = PromptTemplate::parse("{} {}").unwrap();
        let markers = VerdictMarkers::default();
        let verifier = Verifier {
            sources: &store,
            model: &model,
            template: &template,
            markers: &markers,
        };

        let mut lines = Vec::new();
        let run = auditor
            .verify_citation_sentences(&verifier, |r| lines.push(r.to_string()))
            .await
            .unwrap();

        assert_eq!(run.results.len(), 3);
        assert_eq!(run.unsupported(), 2);
        assert_eq!(run.skipped(), 1);
        assert_eq!(lines[0], "Citation [1] flagged: <否> 不支持");
        assert!(lines[1].starts_with("Skipping citation [2] (not retrieved: [2])"));
        assert!(run
            .to_string()
            .starts_with("2 citation(s) flagged as unsupported"));
    }

    #[tokio::test]
    async fn test_model_failure_aborts_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("1.txt"), "paper").unwrap();
        let store = SourceStore::open(dir.path()).unwrap();

        let auditor = Auditor::new(&document(), "参考文献").unwrap();
        let template = PromptTemplate::parse("{} {}").unwrap();
        let markers = VerdictMarkers::default();
        let verifier = Verifier {
            sources: &store,
            model: &FailingModel,
            template: &template,
            markers: &markers,
        };

        let result = auditor.verify_citation_sentences(&verifier, |_| {}).await;
        assert!(matches!(result, Err(VerifyError::Model(_))));
    }
}
