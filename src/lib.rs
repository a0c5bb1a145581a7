//! docsentry - Google Docs snapshot and revision-history sync
//!
//! docsentry keeps a local, plain-text history of Google Docs: timestamped exports of
//! the current content, line diffs between exports, and the full revision history
//! downloaded one file per revision.
//!
//! ## Core Features
//!
//! - **Revision Sync**: Paginated revision listing with rate-limit backoff
//! - **Granularity**: Keep every revision or the latest per hour, day, ISO week or month
//! - **Snapshots & Diffs**: Timestamped exports and zero-context unified diffs
//! - **Configuration Management**: YAML-based configuration with XDG compliance
//! - **Authentication**: Google OAuth installed-app flow with token refresh
//!
//! ## Modules
//!
//! - [`config`]: Configuration management and parsing
//! - [`auth`]: OAuth tokens and credential providers
//! - [`drive`]: Drive API client and revision records
//! - [`retry`]: Exponential backoff for rate-limited calls
//! - [`lister`]: Paginated revision listing
//! - [`granularity`]: Time-bucketed revision sampling
//! - [`download`]: Per-document revision downloads
//! - [`sync`]: Batch orchestration across documents
//! - [`export`] and [`diff`]: Current-content snapshots and diffs
//! - [`sanitize`]: Filesystem-safe names from document titles

pub mod auth;
pub mod config;
pub mod diff;
pub mod download;
pub mod drive;
pub mod error;
pub mod export;
pub mod granularity;
pub mod lister;
pub mod retry;
pub mod sanitize;
pub mod sync;

pub use config::{Config, DocumentConfig};
pub use download::{DownloadReport, DownloadRequest, RevisionDownloader, SkipReason};
pub use drive::{DriveApi, DriveClient, RevisionPage, RevisionRecord};
pub use error::{ApiError, AuthError, SyncError};
pub use granularity::Granularity;
pub use retry::{BackoffPolicy, RetryExecutor};
pub use sanitize::sanitize_filename;
pub use sync::{DocumentResult, SyncEngine, SyncSummary};
