//! Google Drive API integration
//!
//! Revision history comes from the Drive v2 `revisions` endpoint (v3 does not expose
//! per-revision export links). Document metadata and the current text export use v3.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, IntoUrl, Response, StatusCode, Url};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::CredentialProvider;
use crate::error::ApiError;

/// Default Drive API host
pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com";

/// Title used when the API does not return one
pub const UNTITLED_DOCUMENT: &str = "Untitled Document";

const TEXT_MIME_TYPE: &str = "text/plain";

/// One historical version of a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionRecord {
    pub id: String,
    pub modified_at: DateTime<Utc>,
    /// Plain-text export URL; revisions without one cannot be downloaded
    pub text_export_link: Option<String>,
    pub modifier_email: Option<String>,
}

/// One page of a revision listing
#[derive(Debug, Clone, Default)]
pub struct RevisionPage {
    pub items: Vec<RevisionRecord>,
    pub next_page_token: Option<String>,
}

/// Revision as returned on the wire, before validation
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRevision {
    pub id: Option<String>,
    pub modified_date: Option<String>,
    #[serde(default)]
    pub export_links: HashMap<String, String>,
    pub last_modifying_user: Option<RawUser>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawUser {
    pub email_address: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRevisionPage {
    #[serde(default)]
    pub items: Vec<RawRevision>,
    pub next_page_token: Option<String>,
}

impl TryFrom<RawRevision> for RevisionRecord {
    type Error = String;

    fn try_from(raw: RawRevision) -> Result<Self, Self::Error> {
        let id = raw
            .id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "revision without id".to_string())?;

        let modified = raw
            .modified_date
            .ok_or_else(|| format!("revision {} has no modifiedDate", id))?;

        let modified_at = parse_timestamp(&modified)
            .ok_or_else(|| format!("revision {} has unparseable modifiedDate '{}'", id, modified))?;

        Ok(Self {
            id,
            modified_at,
            text_export_link: raw.export_links.get(TEXT_MIME_TYPE).cloned(),
            modifier_email: raw.last_modifying_user.and_then(|user| user.email_address),
        })
    }
}

impl From<RawRevisionPage> for RevisionPage {
    /// Malformed records are dropped with a warning rather than failing the page
    fn from(raw: RawRevisionPage) -> Self {
        let items = raw
            .items
            .into_iter()
            .filter_map(|raw_revision| match RevisionRecord::try_from(raw_revision) {
                Ok(record) => Some(record),
                Err(reason) => {
                    warn!("Skipping malformed revision record: {}", reason);
                    None
                }
            })
            .collect();

        Self {
            items,
            next_page_token: raw.next_page_token.filter(|token| !token.is_empty()),
        }
    }
}

/// Parse an RFC 3339 timestamp (`Z` suffix or explicit offset) into UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Remote document operations the sync engine depends on
#[async_trait]
pub trait DriveApi: Send + Sync {
    /// Fetch one page of a document's revision history
    async fn list_revisions(
        &self,
        doc_id: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionPage, ApiError>;

    /// Download the content behind a revision export link
    async fn fetch_revision_content(&self, export_link: &str) -> Result<Vec<u8>, ApiError>;

    /// Document title, or [`UNTITLED_DOCUMENT`] when the API has none
    async fn fetch_document_title(&self, doc_id: &str) -> Result<String, ApiError>;

    /// Current document content as plain text
    async fn export_document_text(&self, doc_id: &str) -> Result<String, ApiError>;
}

/// reqwest-backed Drive client
#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl DriveClient {
    /// Create a client against the public Drive API
    pub fn new(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::with_base_url(credentials, DEFAULT_BASE_URL)
    }

    /// Create a client against a custom host (used by tests and proxies)
    pub fn with_base_url(credentials: Arc<dyn CredentialProvider>, base_url: &str) -> Self {
        let http = Client::builder()
            .user_agent(concat!("docsentry/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Endpoint URL with each segment percent-encoded, so ids cannot alter the path or query
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ApiError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn authorized_get<U: IntoUrl>(&self, url: U) -> Result<reqwest::RequestBuilder, ApiError> {
        let token = self.credentials.access_token().await?;
        Ok(self.http.get(url).bearer_auth(token))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(classify_failure(response).await)
        }
    }
}

/// Map a failed response to an [`ApiError`], detecting rate limits
async fn classify_failure(response: Response) -> ApiError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let envelope = serde_json::from_str::<ErrorEnvelope>(&body).ok();

    let message = envelope
        .as_ref()
        .map(|e| e.error.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unknown error")
                .to_string()
        });

    let rate_limit_reason = envelope.as_ref().is_some_and(|e| {
        e.error
            .errors
            .iter()
            .any(|d| d.reason == "rateLimitExceeded" || d.reason == "userRateLimitExceeded")
    });

    if status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && rate_limit_reason)
    {
        ApiError::RateLimited(format!("{}: {}", status.as_u16(), message))
    } else {
        ApiError::Status {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl DriveApi for DriveClient {
    async fn list_revisions(
        &self,
        doc_id: &str,
        page_token: Option<&str>,
    ) -> Result<RevisionPage, ApiError> {
        let url = self.endpoint(&["drive", "v2", "files", doc_id, "revisions"])?;
        debug!("Listing revisions for {} (page token: {:?})", doc_id, page_token);

        let mut request = self.authorized_get(url).await?;
        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = self.send(request).await?;
        let raw: RawRevisionPage = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(raw.into())
    }

    async fn fetch_revision_content(&self, export_link: &str) -> Result<Vec<u8>, ApiError> {
        let request = self.authorized_get(export_link).await?;
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(bytes.to_vec())
    }

    async fn fetch_document_title(&self, doc_id: &str) -> Result<String, ApiError> {
        let url = self.endpoint(&["drive", "v3", "files", doc_id])?;
        let request = self.authorized_get(url).await?.query(&[("fields", "name")]);
        let response = self.send(request).await?;
        let metadata: FileMetadata = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(metadata
            .name
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNTITLED_DOCUMENT.to_string()))
    }

    async fn export_document_text(&self, doc_id: &str) -> Result<String, ApiError> {
        let url = self.endpoint(&["drive", "v3", "files", doc_id, "export"])?;
        let request = self
            .authorized_get(url)
            .await?
            .query(&[("mimeType", TEXT_MIME_TYPE)]);
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_revision_conversion() {
        let json = r#"{
            "id": "42",
            "modifiedDate": "2025-01-15T10:00:00.000Z",
            "exportLinks": {
                "text/plain": "https://docs.google.com/export?id=abc&revision=42&exportFormat=txt",
                "application/pdf": "https://docs.google.com/export?pdf"
            },
            "lastModifyingUser": { "emailAddress": "writer@example.com" }
        }"#;

        let raw: RawRevision = serde_json::from_str(json).unwrap();
        let record = RevisionRecord::try_from(raw).unwrap();

        assert_eq!(record.id, "42");
        assert_eq!(
            record.modified_at,
            parse_timestamp("2025-01-15T10:00:00Z").unwrap()
        );
        assert!(record.text_export_link.unwrap().contains("exportFormat=txt"));
        assert_eq!(record.modifier_email.as_deref(), Some("writer@example.com"));
    }

    #[test]
    fn test_missing_export_link_is_preserved_as_none() {
        let raw: RawRevision =
            serde_json::from_str(r#"{"id": "1", "modifiedDate": "2025-01-15T10:00:00Z"}"#)
                .unwrap();
        let record = RevisionRecord::try_from(raw).unwrap();
        assert!(record.text_export_link.is_none());
        assert!(record.modifier_email.is_none());
    }

    #[test]
    fn test_malformed_records_are_dropped_from_page() {
        let json = r#"{
            "items": [
                {"id": "ok", "modifiedDate": "2025-01-15T10:00:00Z"},
                {"modifiedDate": "2025-01-15T11:00:00Z"},
                {"id": "bad-date", "modifiedDate": "yesterday"},
                {"id": "no-date"}
            ],
            "nextPageToken": ""
        }"#;

        let raw: RawRevisionPage = serde_json::from_str(json).unwrap();
        let page = RevisionPage::from(raw);

        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "ok");
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_parse_timestamp_normalizes_offsets() {
        let zulu = parse_timestamp("2025-01-15T10:00:00Z").unwrap();
        let offset = parse_timestamp("2025-01-15T12:00:00+02:00").unwrap();
        assert_eq!(zulu, offset);
        assert!(parse_timestamp("not a date").is_none());
    }
}
