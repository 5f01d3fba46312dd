// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Upstream portal - the scraping adapter.
//!
//! Workers talk to the upstream writing platform exclusively through the
//! [`UpstreamPortal`] trait. Implementations authenticate per worker
//! invocation (or per call) and never retain an upstream session across
//! database sessions. All calls happen with no database connection checked
//! out.

pub mod http;
pub mod mock;

pub use self::http::HttpPortal;
pub use self::mock::MockPortal;

use async_trait::async_trait;
use thiserror::Error;

use yourmoment_core::model::{ArticleContent, ArticleFilters, ArticleMeta, CredentialSnapshot};

/// Errors from upstream portal calls.
///
/// The transient/permanent split drives retry policy: transient failures
/// leave a record retriable, permanent failures fail it directly.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Login was rejected for the credential. Permanent.
    #[error("Upstream authentication failed: {0}")]
    Auth(String),

    /// Temporary upstream condition (timeout, 5xx, connection reset).
    #[error("Transient upstream error: {0}")]
    Transient(String),

    /// The upstream rejected the request for good (404, malformed payload,
    /// content policy).
    #[error("Permanent upstream error: {0}")]
    Permanent(String),
}

impl UpstreamError {
    /// Whether a retry can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        // Timeouts, connect errors and 5xx responses are worth retrying;
        // anything else (4xx bodies, redirect loops) is not.
        let transient = err.is_timeout()
            || err.is_connect()
            || err
                .status()
                .map(|s| s.is_server_error())
                .unwrap_or(false);

        if transient {
            UpstreamError::Transient(err.to_string())
        } else {
            UpstreamError::Permanent(err.to_string())
        }
    }
}

/// Result type for portal calls.
pub type PortalResult<T> = std::result::Result<T, UpstreamError>;

/// The scraping adapter surface consumed by the stage workers.
#[async_trait]
pub trait UpstreamPortal: Send + Sync {
    /// Enumerate article metadata visible to the credential, matching the
    /// filters. Enumeration order is preserved by callers.
    async fn list_articles(
        &self,
        credential: &CredentialSnapshot,
        filters: &ArticleFilters,
    ) -> PortalResult<Vec<ArticleMeta>>;

    /// Fetch full content for one article.
    async fn fetch_article_content(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
    ) -> PortalResult<ArticleContent>;

    /// Post a comment on an article. The upstream returns no stable comment
    /// identifier; callers synthesize an idempotency marker.
    async fn post_comment(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
        text: &str,
    ) -> PortalResult<()>;
}
