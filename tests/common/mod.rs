//! Common test utilities and helpers for docsentry tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use docsentry::drive::{parse_timestamp, DriveApi, RevisionPage, RevisionRecord};
use docsentry::retry::{BackoffPolicy, RetryExecutor, Sleeper};
use docsentry::ApiError;

/// Build a revision; `with_link` controls whether it has a text/plain export
pub fn rev(id: &str, timestamp: &str, with_link: bool) -> RevisionRecord {
    RevisionRecord {
        id: id.to_string(),
        modified_at: parse_timestamp(timestamp).expect("valid test timestamp"),
        text_export_link: with_link.then(|| export_link(id)),
        modifier_email: None,
    }
}

pub fn export_link(revision_id: &str) -> String {
    format!("https://docs.example.test/export/{}?format=txt", revision_id)
}

/// In-memory Drive API with scripted failures
#[derive(Default)]
pub struct FakeDriveApi {
    /// Pages per document, served in order; page N is requested with token `page-N`
    pages: HashMap<String, Vec<Vec<RevisionRecord>>>,
    content: HashMap<String, Vec<u8>>,
    failing_documents: HashSet<String>,
    fatal_links: HashSet<String>,
    rate_limits: Mutex<HashMap<String, u32>>,
    list_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
}

impl FakeDriveApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document's revision pages; content for linked revisions is `revision <id>`
    pub fn with_document(mut self, doc_id: &str, pages: Vec<Vec<RevisionRecord>>) -> Self {
        for revision in pages.iter().flatten() {
            if let Some(link) = &revision.text_export_link {
                self.content
                    .insert(link.clone(), format!("revision {}", revision.id).into_bytes());
            }
        }
        self.pages.insert(doc_id.to_string(), pages);
        self
    }

    /// Listing this document fails with a fatal 404
    pub fn with_failing_document(mut self, doc_id: &str) -> Self {
        self.failing_documents.insert(doc_id.to_string());
        self
    }

    /// Fetching this revision fails with a fatal 403
    pub fn with_fatal_revision(mut self, revision_id: &str) -> Self {
        self.fatal_links.insert(export_link(revision_id));
        self
    }

    /// Fetching this revision is rate limited `times` times before succeeding
    pub fn with_rate_limited_revision(self, revision_id: &str, times: u32) -> Self {
        self.rate_limits
            .lock()
            .unwrap()
            .insert(export_link(revision_id), times);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn take_rate_limit(&self, key: &str) -> bool {
        let mut remaining = self.rate_limits.lock().unwrap();
        match remaining.get_mut(key) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DriveApi for FakeDriveApi {
    async fn list_revisions(
        &self,
        doc_id: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionPage, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);

        if self.failing_documents.contains(doc_id) {
            return Err(ApiError::Status {
                status: 404,
                message: "File not found".to_string(),
            });
        }

        let pages = self.pages.get(doc_id).cloned().unwrap_or_default();
        let index = match page_token {
            None => 0,
            Some(token) => token
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .expect("fake page token"),
        };

        let items = pages.get(index).cloned().unwrap_or_default();
        let next_page_token = (index + 1 < pages.len()).then(|| format!("page-{}", index + 1));

        Ok(RevisionPage {
            items,
            next_page_token,
        })
    }

    async fn fetch_revision_content(&self, export_link: &str) -> Result<Vec<u8>, ApiError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.fatal_links.contains(export_link) {
            return Err(ApiError::Status {
                status: 403,
                message: "The user does not have sufficient permissions".to_string(),
            });
        }
        if self.take_rate_limit(export_link) {
            return Err(ApiError::RateLimited("429: Too Many Requests".to_string()));
        }

        self.content
            .get(export_link)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "Export not found".to_string(),
            })
    }

    async fn fetch_document_title(&self, _doc_id: &str) -> Result<String, ApiError> {
        Ok("Fake Document".to_string())
    }

    async fn export_document_text(&self, _doc_id: &str) -> Result<String, ApiError> {
        Ok("current text".to_string())
    }
}

/// Sleeper that records requested delays and returns immediately
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().unwrap().push(delay);
    }
}

/// Retry executor with the default policy that never actually sleeps
pub fn instant_retry() -> (RetryExecutor, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::default());
    let executor = RetryExecutor::with_sleeper(BackoffPolicy::default(), sleeper.clone());
    (executor, sleeper)
}

/// Names of the files in `dir`, sorted
pub fn file_names(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read directory")
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Assertion helpers for test validation
pub fn assert_contains_all(text: &str, expected: &[&str]) {
    for item in expected {
        assert!(
            text.contains(item),
            "Expected text to contain '{}', but it didn't. Text: {}",
            item,
            text
        );
    }
}
