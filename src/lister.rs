//! Paginated revision listing

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::drive::{DriveApi, RevisionRecord};
use crate::error::ApiError;
use crate::retry::RetryExecutor;

/// List every revision of `doc_id`, oldest first.
///
/// All pages are drained before filtering since page order is not chronological.
/// Each page request is retried on rate limits.
pub async fn list_revisions(
    api: &dyn DriveApi,
    retry: &RetryExecutor,
    doc_id: &str,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<RevisionRecord>, ApiError> {
    let mut revisions = Vec::new();
    let mut page_token: Option<String> = None;
    let mut pages = 0usize;

    loop {
        let token = page_token.take();
        let page = retry
            .run("list_revisions", || api.list_revisions(doc_id, token.as_deref()))
            .await?;

        pages += 1;
        debug!(
            "Fetched revision page {} for {} ({} items)",
            pages,
            doc_id,
            page.items.len()
        );
        revisions.extend(page.items);

        match page.next_page_token {
            Some(next) => page_token = Some(next),
            None => break,
        }
    }

    if let Some(since) = since {
        revisions.retain(|revision| revision.modified_at >= since);
    }

    revisions.sort_by_key(|revision| revision.modified_at);

    debug!(
        "Listed {} revisions for {} across {} pages",
        revisions.len(),
        doc_id,
        pages
    );
    Ok(revisions)
}

/// Full-history listing
pub async fn list_all_revisions(
    api: &dyn DriveApi,
    retry: &RetryExecutor,
    doc_id: &str,
) -> Result<Vec<RevisionRecord>, ApiError> {
    list_revisions(api, retry, doc_id, None).await
}
