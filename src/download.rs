//! Revision Downloader - fetches a document's revision history to disk
//!
//! Layout: `<export_dir>/<folder name or doc id>/<normalized timestamp>.txt`.
//! A failing revision never aborts the document: it is recorded as a
//! [`SkipReason`] and the next revision is processed. Listing failures abort
//! only the document being downloaded.

use chrono::{DateTime, SecondsFormat, Utc};
use filetime::FileTime;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::DocumentConfig;
use crate::drive::{DriveApi, RevisionRecord};
use crate::error::SyncError;
use crate::granularity::{bucket, Granularity};
use crate::lister::list_revisions;
use crate::retry::RetryExecutor;
use crate::sanitize::{sanitize_filename, DEFAULT_MAX_LENGTH};

/// Extension used for every revision snapshot
pub const SNAPSHOT_EXTENSION: &str = "txt";

/// What to download for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub doc_id: String,
    pub export_dir: PathBuf,
    pub granularity: Granularity,
    pub folder_name: Option<String>,
    /// Only revisions modified at or after this instant; `None` means full history
    pub since: Option<DateTime<Utc>>,
}

impl DownloadRequest {
    pub fn new(doc_id: impl Into<String>, export_dir: impl Into<PathBuf>) -> Self {
        Self {
            doc_id: doc_id.into(),
            export_dir: export_dir.into(),
            granularity: Granularity::All,
            folder_name: None,
            since: None,
        }
    }

    pub fn from_document(document: &DocumentConfig, export_dir: &Path) -> Self {
        Self {
            doc_id: document.doc_id.clone(),
            export_dir: export_dir.to_path_buf(),
            granularity: document.granularity,
            folder_name: document.folder_name.clone(),
            since: None,
        }
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn with_folder_name(mut self, folder_name: impl Into<String>) -> Self {
        self.folder_name = Some(folder_name.into());
        self
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    /// Directory the revisions of this document are written to.
    ///
    /// A configured folder name is sanitized. Without one, a plain Drive id is used as-is.
    pub fn target_directory(&self) -> PathBuf {
        let folder = self
            .folder_name
            .as_deref()
            .filter(|name| !name.trim().is_empty());

        match folder {
            Some(name) => self.export_dir.join(sanitize_filename(name, DEFAULT_MAX_LENGTH)),
            None if is_plain_id(&self.doc_id) => self.export_dir.join(&self.doc_id),
            None => self
                .export_dir
                .join(sanitize_filename(&self.doc_id, DEFAULT_MAX_LENGTH)),
        }
    }
}

/// Drive ids are drawn from `[A-Za-z0-9_-]`
fn is_plain_id(doc_id: &str) -> bool {
    !doc_id.is_empty()
        && doc_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Why a revision produced no new file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The revision has no plain-text export link
    NoTextExport,
    /// A snapshot for this timestamp is already on disk
    AlreadyCaptured(PathBuf),
    /// Fetching failed fatally or retries were exhausted
    FetchFailed(String),
    /// Content was fetched but could not be written
    WriteFailed(String),
}

impl SkipReason {
    /// Whether this skip represents an error rather than an expected condition
    pub fn is_failure(&self) -> bool {
        matches!(self, SkipReason::FetchFailed(_) | SkipReason::WriteFailed(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoTextExport => write!(f, "no text/plain export link"),
            SkipReason::AlreadyCaptured(path) => write!(f, "already captured at {}", path.display()),
            SkipReason::FetchFailed(error) => write!(f, "fetch failed: {}", error),
            SkipReason::WriteFailed(error) => write!(f, "write failed: {}", error),
        }
    }
}

/// Result of processing a single revision
pub type RevisionOutcome = Result<PathBuf, SkipReason>;

#[derive(Debug, Clone)]
pub struct SkippedRevision {
    pub revision_id: String,
    pub modified_at: DateTime<Utc>,
    pub reason: SkipReason,
}

/// Outcome of downloading one document
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    pub directory: PathBuf,
    /// Revisions returned by the API
    pub listed: usize,
    /// Revisions left after granularity bucketing
    pub selected: usize,
    /// Newly written snapshot files, oldest first
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedRevision>,
}

impl DownloadReport {
    pub fn failures(&self) -> usize {
        self.skipped.iter().filter(|s| s.reason.is_failure()).count()
    }
}

/// Snapshot filename for a revision: its UTC timestamp with `:` and `.` replaced by `-`
pub fn revision_filename(revision: &RevisionRecord) -> String {
    let timestamp = revision
        .modified_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!("{}.{}", timestamp, SNAPSHOT_EXTENSION)
}

/// Downloads revision history for one document at a time
#[derive(Clone)]
pub struct RevisionDownloader {
    api: Arc<dyn DriveApi>,
    retry: RetryExecutor,
    preserve_timestamps: bool,
}

impl RevisionDownloader {
    pub fn new(api: Arc<dyn DriveApi>, retry: RetryExecutor) -> Self {
        Self {
            api,
            retry,
            preserve_timestamps: false,
        }
    }

    /// Set each snapshot's mtime to the revision's modification time
    pub fn with_preserve_timestamps(mut self, preserve: bool) -> Self {
        self.preserve_timestamps = preserve;
        self
    }

    /// Download the (bucketed) revision history described by `request`
    pub async fn download(&self, request: &DownloadRequest) -> Result<DownloadReport, SyncError> {
        let directory = request.target_directory();
        info!(
            "Downloading revisions of {} into {} (granularity: {})",
            request.doc_id,
            directory.display(),
            request.granularity
        );

        tokio::fs::create_dir_all(&directory)
            .await
            .map_err(|source| SyncError::Directory {
                path: directory.clone(),
                source,
            })?;

        let revisions = list_revisions(
            self.api.as_ref(),
            &self.retry,
            &request.doc_id,
            request.since,
        )
        .await
        .map_err(|source| SyncError::Listing {
            doc_id: request.doc_id.clone(),
            source,
        })?;

        let mut report = DownloadReport {
            directory: directory.clone(),
            listed: revisions.len(),
            ..Default::default()
        };

        if revisions.is_empty() {
            info!("No revisions available for {}", request.doc_id);
            return Ok(report);
        }

        let selected = bucket(revisions, request.granularity);
        report.selected = selected.len();

        for revision in &selected {
            match self.download_revision(&directory, revision).await {
                Ok(path) => report.written.push(path),
                Err(reason) => {
                    if reason.is_failure() {
                        warn!("Could not download revision {}: {}", revision.id, reason);
                    } else {
                        debug!("Skipping revision {}: {}", revision.id, reason);
                    }
                    report.skipped.push(SkippedRevision {
                        revision_id: revision.id.clone(),
                        modified_at: revision.modified_at,
                        reason,
                    });
                }
            }
        }

        info!(
            "Finished {}: {} listed, {} selected, {} written, {} skipped ({} failed)",
            request.doc_id,
            report.listed,
            report.selected,
            report.written.len(),
            report.skipped.len(),
            report.failures()
        );

        Ok(report)
    }

    async fn download_revision(&self, directory: &Path, revision: &RevisionRecord) -> RevisionOutcome {
        let export_link = revision
            .text_export_link
            .as_deref()
            .ok_or(SkipReason::NoTextExport)?;

        let path = directory.join(revision_filename(revision));
        if path.exists() {
            return Err(SkipReason::AlreadyCaptured(path));
        }

        let content = self
            .retry
            .run("fetch_revision_content", || {
                self.api.fetch_revision_content(export_link)
            })
            .await
            .map_err(|e| SkipReason::FetchFailed(e.to_string()))?;

        write_atomically(&path, &content)
            .await
            .map_err(|e| SkipReason::WriteFailed(e.to_string()))?;

        if self.preserve_timestamps {
            let mtime = FileTime::from_unix_time(
                revision.modified_at.timestamp(),
                revision.modified_at.timestamp_subsec_nanos(),
            );
            if let Err(e) = filetime::set_file_mtime(&path, mtime) {
                warn!("Failed to set modification time on {}: {}", path.display(), e);
            }
        }

        debug!("Wrote revision {} to {}", revision.id, path.display());
        Ok(path)
    }
}

/// Write to a hidden temporary file and rename it into place
async fn write_atomically(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{}.part", file_name));

    if let Err(e) = tokio::fs::write(&temp_path, content).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    if let Err(e) = tokio::fs::rename(&temp_path, path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(e);
    }

    Ok(())
}
