//! Sync Engine - Orchestrates revision-history synchronization for a batch of documents
//!
//! Documents are processed one after another. A document whose listing fails is
//! reported as [`DocumentResult::Failed`] and the batch moves on to the next one.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::{Config, DocumentConfig};
use crate::download::{DownloadReport, DownloadRequest, RevisionDownloader};
use crate::drive::DriveApi;
use crate::retry::RetryExecutor;

/// Outcome for one document in a batch
#[derive(Debug, Clone)]
pub enum DocumentResult {
    Synced {
        doc_id: String,
        report: DownloadReport,
    },
    Failed {
        doc_id: String,
        error: String,
    },
}

impl DocumentResult {
    pub fn doc_id(&self) -> &str {
        match self {
            DocumentResult::Synced { doc_id, .. } | DocumentResult::Failed { doc_id, .. } => doc_id,
        }
    }
}

/// Results from a complete sync operation
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub total_documents: usize,
    pub successful_documents: usize,
    pub failed_documents: usize,
    pub files_written: usize,
    pub revisions_skipped: usize,
    /// Revisions skipped because of fetch or write errors
    pub revision_failures: usize,
    pub duration: Duration,
    pub results: Vec<DocumentResult>,
}

impl SyncSummary {
    pub fn is_success(&self) -> bool {
        self.failed_documents == 0
    }
}

/// The main sync engine that drives the revision downloader over many documents
#[derive(Clone)]
pub struct SyncEngine {
    config: Arc<Config>,
    downloader: RevisionDownloader,
}

impl SyncEngine {
    /// Create a sync engine using the retry policy from `config`
    pub fn new(config: Config, api: Arc<dyn DriveApi>) -> Self {
        let retry = RetryExecutor::new(config.backoff_policy());
        Self::with_retry(config, api, retry)
    }

    pub fn with_retry(config: Config, api: Arc<dyn DriveApi>, retry: RetryExecutor) -> Self {
        let downloader = RevisionDownloader::new(api, retry)
            .with_preserve_timestamps(config.advanced.preserve_timestamps);

        Self {
            config: Arc::new(config),
            downloader,
        }
    }

    /// Download revision history for every document in `documents`
    pub async fn run_sync(
        &self,
        documents: &[DocumentConfig],
        since: Option<DateTime<Utc>>,
    ) -> SyncSummary {
        let start_time = Instant::now();

        info!(
            "Starting revision sync for {} document(s) into {}",
            documents.len(),
            self.config.revisions_directory
        );

        let mut results = Vec::with_capacity(documents.len());
        for document in documents {
            results.push(self.sync_document(document, since).await);
        }

        let summary = compile_summary(results, start_time.elapsed());

        info!(
            "Sync completed in {:.2}s: {} successful, {} failed, {} files written",
            summary.duration.as_secs_f64(),
            summary.successful_documents,
            summary.failed_documents,
            summary.files_written
        );

        summary
    }

    async fn sync_document(
        &self,
        document: &DocumentConfig,
        since: Option<DateTime<Utc>>,
    ) -> DocumentResult {
        let request =
            DownloadRequest::from_document(document, &self.config.revisions_dir()).with_since(since);

        match self.downloader.download(&request).await {
            Ok(report) => DocumentResult::Synced {
                doc_id: document.doc_id.clone(),
                report,
            },
            Err(e) => {
                error!("Failed to sync document {}: {}", document.doc_id, e);
                DocumentResult::Failed {
                    doc_id: document.doc_id.clone(),
                    error: e.to_string(),
                }
            }
        }
    }

    /// Get configuration for external inspection
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Compile sync summary from per-document results
fn compile_summary(results: Vec<DocumentResult>, duration: Duration) -> SyncSummary {
    let mut summary = SyncSummary {
        total_documents: results.len(),
        successful_documents: 0,
        failed_documents: 0,
        files_written: 0,
        revisions_skipped: 0,
        revision_failures: 0,
        duration,
        results: Vec::new(),
    };

    for result in &results {
        match result {
            DocumentResult::Synced { report, .. } => {
                summary.successful_documents += 1;
                summary.files_written += report.written.len();
                summary.revisions_skipped += report.skipped.len();
                summary.revision_failures += report.failures();
            }
            DocumentResult::Failed { .. } => summary.failed_documents += 1,
        }
    }

    summary.results = results;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::{SkipReason, SkippedRevision};
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn synced(doc_id: &str, written: usize, skipped: Vec<SkipReason>) -> DocumentResult {
        let modified_at = Utc.with_ymd_and_hms(2025, 1, 15, 10, 0, 0).unwrap();
        DocumentResult::Synced {
            doc_id: doc_id.to_string(),
            report: DownloadReport {
                directory: PathBuf::from("/tmp/revisions").join(doc_id),
                listed: written + skipped.len(),
                selected: written + skipped.len(),
                written: (0..written)
                    .map(|i| PathBuf::from(format!("/tmp/revisions/{}/{}.txt", doc_id, i)))
                    .collect(),
                skipped: skipped
                    .into_iter()
                    .enumerate()
                    .map(|(i, reason)| SkippedRevision {
                        revision_id: i.to_string(),
                        modified_at,
                        reason,
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn test_sync_summary_calculation() {
        let results = vec![
            synced("doc-a", 3, vec![SkipReason::NoTextExport]),
            DocumentResult::Failed {
                doc_id: "doc-b".to_string(),
                error: "Failed to list revisions".to_string(),
            },
            synced(
                "doc-c",
                1,
                vec![
                    SkipReason::FetchFailed("429".to_string()),
                    SkipReason::AlreadyCaptured(PathBuf::from("x.txt")),
                ],
            ),
        ];

        let duration = Duration::from_secs(12);
        let summary = compile_summary(results, duration);

        assert_eq!(summary.total_documents, 3);
        assert_eq!(summary.successful_documents, 2);
        assert_eq!(summary.failed_documents, 1);
        assert_eq!(summary.files_written, 4);
        assert_eq!(summary.revisions_skipped, 3);
        assert_eq!(summary.revision_failures, 1);
        assert_eq!(summary.duration, duration);
        assert!(!summary.is_success());

        let ids: Vec<&str> = summary.results.iter().map(|r| r.doc_id()).collect();
        assert_eq!(ids, vec!["doc-a", "doc-b", "doc-c"]);
    }

    #[test]
    fn test_empty_batch_summary() {
        let summary = compile_summary(Vec::new(), Duration::ZERO);
        assert_eq!(summary.total_documents, 0);
        assert!(summary.is_success());
    }
}
