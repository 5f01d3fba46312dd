// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock upstream portal for testing.
//!
//! Serves a scripted article set per credential and records every
//! `post_comment` call so tests can assert exactly what reached the
//! upstream. Individual articles can be scripted to fail content fetches
//! or posts, transiently or permanently.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use async_trait::async_trait;

use yourmoment_core::model::{ArticleContent, ArticleFilters, ArticleMeta, CredentialSnapshot};

use super::{PortalResult, UpstreamError, UpstreamPortal};

/// Scripted failure behavior for one article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockBehavior {
    /// Everything succeeds.
    #[default]
    Ok,
    /// Content fetch fails transiently.
    FetchTransient,
    /// Content fetch fails permanently.
    FetchPermanent,
    /// Posting fails transiently (every attempt).
    PostTransient,
    /// Posting fails permanently.
    PostPermanent,
}

#[derive(Debug, Clone)]
struct MockArticle {
    meta: ArticleMeta,
    content: ArticleContent,
    behavior: MockBehavior,
}

/// A comment the mock accepted.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedComment {
    /// Credential that posted.
    pub credential_id: uuid::Uuid,
    /// Target article.
    pub article_id: String,
    /// Posted text.
    pub text: String,
}

/// Scriptable portal for tests.
#[derive(Clone, Default)]
pub struct MockPortal {
    articles: Arc<Mutex<Vec<MockArticle>>>,
    posted: Arc<Mutex<Vec<PostedComment>>>,
    fetch_attempts: Arc<Mutex<HashMap<String, u32>>>,
    post_attempts: Arc<Mutex<HashMap<String, u32>>>,
    reject_logins: Arc<Mutex<bool>>,
}

impl MockPortal {
    /// Create an empty portal.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an article with default content and behavior.
    pub async fn add_article(&self, id: &str, title: &str) {
        self.add_article_with(id, title, MockBehavior::Ok).await;
    }

    /// Add an article with scripted behavior.
    pub async fn add_article_with(&self, id: &str, title: &str, behavior: MockBehavior) {
        let meta = ArticleMeta {
            id: id.to_string(),
            title: title.to_string(),
            author: "GracefulUnicorn".to_string(),
            category: Some("Schule".to_string()),
            url: format!("https://upstream.example/article/{id}/"),
            edited_at: None,
        };
        let content = ArticleContent {
            content: format!("Inhalt von Artikel {id}."),
            raw_html: format!("<article><p>Inhalt von Artikel {id}.</p></article>"),
            published_at: None,
        };
        self.articles.lock().await.push(MockArticle {
            meta,
            content,
            behavior,
        });
    }

    /// Make every login fail, simulating revoked credentials.
    pub async fn reject_logins(&self, reject: bool) {
        *self.reject_logins.lock().await = reject;
    }

    /// All comments accepted so far, in posting order.
    pub async fn posted_comments(&self) -> Vec<PostedComment> {
        self.posted.lock().await.clone()
    }

    /// How often content was fetched for an article.
    pub async fn fetch_attempts(&self, article_id: &str) -> u32 {
        self.fetch_attempts
            .lock()
            .await
            .get(article_id)
            .copied()
            .unwrap_or(0)
    }

    /// How often a post was attempted for an article.
    pub async fn post_attempts(&self, article_id: &str) -> u32 {
        self.post_attempts
            .lock()
            .await
            .get(article_id)
            .copied()
            .unwrap_or(0)
    }

    async fn check_login(&self, credential: &CredentialSnapshot) -> PortalResult<()> {
        if *self.reject_logins.lock().await {
            return Err(UpstreamError::Auth(format!(
                "mock rejected login for '{}'",
                credential.username
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl UpstreamPortal for MockPortal {
    async fn list_articles(
        &self,
        credential: &CredentialSnapshot,
        filters: &ArticleFilters,
    ) -> PortalResult<Vec<ArticleMeta>> {
        self.check_login(credential).await?;

        let keywords: Vec<String> = filters.keywords.iter().map(|k| k.to_lowercase()).collect();
        let articles = self.articles.lock().await;
        Ok(articles
            .iter()
            .map(|a| &a.meta)
            .filter(|meta| {
                keywords.is_empty()
                    || keywords
                        .iter()
                        .any(|k| meta.title.to_lowercase().contains(k))
            })
            .cloned()
            .collect())
    }

    async fn fetch_article_content(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
    ) -> PortalResult<ArticleContent> {
        self.check_login(credential).await?;
        *self
            .fetch_attempts
            .lock()
            .await
            .entry(article_id.to_string())
            .or_insert(0) += 1;

        let articles = self.articles.lock().await;
        let article = articles
            .iter()
            .find(|a| a.meta.id == article_id)
            .ok_or_else(|| {
                UpstreamError::Permanent(format!("mock article '{article_id}' not found"))
            })?;

        match article.behavior {
            MockBehavior::FetchTransient => Err(UpstreamError::Transient(format!(
                "mock transient fetch failure for '{article_id}'"
            ))),
            MockBehavior::FetchPermanent => Err(UpstreamError::Permanent(format!(
                "mock permanent fetch failure for '{article_id}'"
            ))),
            _ => Ok(article.content.clone()),
        }
    }

    async fn post_comment(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
        text: &str,
    ) -> PortalResult<()> {
        self.check_login(credential).await?;
        *self
            .post_attempts
            .lock()
            .await
            .entry(article_id.to_string())
            .or_insert(0) += 1;

        let behavior = {
            let articles = self.articles.lock().await;
            articles
                .iter()
                .find(|a| a.meta.id == article_id)
                .map(|a| a.behavior)
                .unwrap_or(MockBehavior::Ok)
        };

        match behavior {
            MockBehavior::PostTransient => Err(UpstreamError::Transient(format!(
                "mock transient post failure for '{article_id}'"
            ))),
            MockBehavior::PostPermanent => Err(UpstreamError::Permanent(format!(
                "mock permanent post failure for '{article_id}'"
            ))),
            _ => {
                self.posted.lock().await.push(PostedComment {
                    credential_id: credential.id,
                    article_id: article_id.to_string(),
                    text: text.to_string(),
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn credential() -> CredentialSnapshot {
        CredentialSnapshot {
            id: Uuid::new_v4(),
            display_name: "Klasse 4a".to_string(),
            username: "schreiber01".to_string(),
            password: "geheim".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_portal_lists_and_posts() {
        let portal = MockPortal::new();
        portal.add_article("a1", "Mein Wochenende").await;
        let credential = credential();

        let articles = portal
            .list_articles(&credential, &ArticleFilters::default())
            .await
            .unwrap();
        assert_eq!(articles.len(), 1);

        portal
            .post_comment(&credential, "a1", "[KI] Toll!")
            .await
            .unwrap();
        let posted = portal.posted_comments().await;
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].text, "[KI] Toll!");
        assert_eq!(portal.post_attempts("a1").await, 1);
    }

    #[tokio::test]
    async fn test_mock_portal_keyword_filter() {
        let portal = MockPortal::new();
        portal.add_article("a1", "Mein Wochenende im Zoo").await;
        portal.add_article("a2", "Rechnen mit Brüchen").await;
        let credential = credential();

        let filters = ArticleFilters {
            keywords: vec!["zoo".to_string()],
            ..Default::default()
        };
        let articles = portal.list_articles(&credential, &filters).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].id, "a1");
    }

    #[tokio::test]
    async fn test_mock_portal_scripted_failures() {
        let portal = MockPortal::new();
        portal
            .add_article_with("bad", "Kaputt", MockBehavior::FetchTransient)
            .await;
        let credential = credential();

        let err = portal
            .fetch_article_content(&credential, "bad")
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(portal.fetch_attempts("bad").await, 1);
    }

    #[tokio::test]
    async fn test_mock_portal_rejects_logins() {
        let portal = MockPortal::new();
        portal.add_article("a1", "Titel").await;
        portal.reject_logins(true).await;
        let credential = credential();

        let err = portal
            .list_articles(&credential, &ArticleFilters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Auth(_)));
    }
}
