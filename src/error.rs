//! Error types shared across the revision sync engine.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the Drive API client.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The API signalled a rate limit (HTTP 429 or a 403 carrying a rate-limit reason).
    #[error("Rate limited by Drive API: {0}")]
    RateLimited(String),

    /// Any other non-success HTTP status.
    #[error("Drive API returned {status}: {message}")]
    Status { status: u16, message: String },

    /// Connection, TLS or protocol failure below HTTP.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response body did not have the expected shape.
    #[error("Failed to decode Drive API response: {0}")]
    Decode(String),

    /// The configured base URL cannot carry the request path.
    #[error("Invalid Drive API URL: {0}")]
    InvalidUrl(String),

    /// No usable access token.
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// Classifies errors for the retry executor.
pub trait Retryable {
    /// Whether the operation that produced this error may succeed if repeated.
    fn is_retryable(&self) -> bool;
}

impl Retryable for ApiError {
    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::RateLimited(_))
    }
}

/// Errors produced while obtaining or persisting credentials.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authorization timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("No stored credentials found. Run: docsentry auth login")]
    NotAuthenticated,

    #[error("Failed to read client secrets {path:?}: {message}")]
    ClientSecrets { path: PathBuf, message: String },

    #[error("Token endpoint rejected the request: {0}")]
    TokenEndpoint(String),

    #[error("Authorization flow failed: {0}")]
    Flow(String),

    #[error("Token storage error: {0}")]
    Storage(String),

    #[error("HTTP error during authorization: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error during authorization: {0}")]
    Io(#[from] std::io::Error),
}

/// Document-level failures surfaced to the orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A required setting is missing; carries a user-facing remediation message.
    #[error("{0}")]
    Config(String),

    #[error("Failed to list revisions for {doc_id}: {source}")]
    Listing {
        doc_id: String,
        #[source]
        source: ApiError,
    },

    #[error("Failed to prepare directory {path:?}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
