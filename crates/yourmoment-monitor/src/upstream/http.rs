// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! HTTP implementation of the upstream portal.
//!
//! The upstream is a classic server-rendered platform: form login with a
//! CSRF token, article index pages, article detail pages and a comment
//! form. Each portal call runs inside a fresh authenticated session (own
//! cookie store), which keeps upstream sessions strictly scoped to one
//! call and never alive across database sessions.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use yourmoment_core::model::{ArticleContent, ArticleFilters, ArticleMeta, CredentialSnapshot};

use super::{PortalResult, UpstreamError, UpstreamPortal};

/// Configuration for the HTTP portal.
#[derive(Debug, Clone)]
pub struct HttpPortalConfig {
    /// Upstream origin, e.g. `https://new.mymoment.ch`.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum articles read from one index enumeration.
    pub max_articles_per_listing: usize,
}

impl Default for HttpPortalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://new.mymoment.ch".to_string(),
            timeout: Duration::from_secs(30),
            max_articles_per_listing: 20,
        }
    }
}

/// Portal over the real upstream platform.
pub struct HttpPortal {
    config: HttpPortalConfig,
}

impl HttpPortal {
    /// Create a portal with the given configuration.
    pub fn new(config: HttpPortalConfig) -> Self {
        Self { config }
    }

    /// Open a fresh authenticated session for one portal call.
    async fn login(&self, credential: &CredentialSnapshot) -> PortalResult<reqwest::Client> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| UpstreamError::Permanent(format!("failed to build HTTP client: {e}")))?;

        let login_url = format!("{}/accounts/login/", self.config.base_url);

        // First GET carries the CSRF token in the form.
        let login_page = client.get(&login_url).send().await?.error_for_status()?;
        let body = login_page.text().await?;
        let csrf = extract_csrf_token(&body).ok_or_else(|| {
            UpstreamError::Transient("login page carried no CSRF token".to_string())
        })?;

        let response = client
            .post(&login_url)
            .form(&[
                ("csrfmiddlewaretoken", csrf.as_str()),
                ("username", credential.username.as_str()),
                ("password", credential.password.as_str()),
            ])
            .header("Referer", &login_url)
            .send()
            .await?;

        // A failed login re-renders the form with an error box instead of
        // redirecting away from the login page.
        let final_url = response.url().to_string();
        let status = response.status();
        if !status.is_success() && !status.is_redirection() {
            return Err(UpstreamError::Transient(format!(
                "login returned HTTP {status}"
            )));
        }
        if final_url.contains("/accounts/login") {
            let body = response.text().await.unwrap_or_default();
            if body.contains("errorlist") || body.contains("csrfmiddlewaretoken") {
                return Err(UpstreamError::Auth(format!(
                    "upstream rejected credentials for '{}'",
                    credential.username
                )));
            }
        }

        debug!(username = %credential.username, "Upstream login succeeded");
        Ok(client)
    }

    fn article_url(&self, article_id: &str) -> String {
        format!("{}/article/{}/", self.config.base_url, article_id)
    }
}

#[async_trait]
impl UpstreamPortal for HttpPortal {
    async fn list_articles(
        &self,
        credential: &CredentialSnapshot,
        filters: &ArticleFilters,
    ) -> PortalResult<Vec<ArticleMeta>> {
        let client = self.login(credential).await?;

        // One index request per requested tab; the upstream default tab
        // when none is configured.
        let tabs: Vec<Option<&str>> = if filters.tabs.is_empty() {
            vec![None]
        } else {
            filters.tabs.iter().map(|t| Some(t.as_str())).collect()
        };

        let mut articles = Vec::new();
        for tab in tabs {
            let mut request = client.get(format!("{}/articles/", self.config.base_url));
            if let Some(tab) = tab {
                request = request.query(&[("tab", tab)]);
            }
            if let Some(category) = &filters.category {
                request = request.query(&[("category", category.as_str())]);
            }

            let body = request.send().await?.error_for_status()?.text().await?;
            let mut page = parse_article_index(&body, &self.config.base_url);
            debug!(
                tab = tab.unwrap_or("default"),
                count = page.len(),
                "Enumerated upstream index page"
            );
            articles.append(&mut page);

            if articles.len() >= self.config.max_articles_per_listing {
                articles.truncate(self.config.max_articles_per_listing);
                break;
            }
        }

        // Keyword filters match against titles, case-insensitively.
        if !filters.keywords.is_empty() {
            let keywords: Vec<String> =
                filters.keywords.iter().map(|k| k.to_lowercase()).collect();
            articles.retain(|a| {
                let title = a.title.to_lowercase();
                keywords.iter().any(|k| title.contains(k))
            });
        }

        // Dedup across tabs while preserving enumeration order.
        let mut seen = std::collections::HashSet::new();
        articles.retain(|a| seen.insert(a.id.clone()));

        Ok(articles)
    }

    async fn fetch_article_content(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
    ) -> PortalResult<ArticleContent> {
        let client = self.login(credential).await?;

        let response = client.get(self.article_url(article_id)).send().await?;
        if response.status().as_u16() == 404 {
            return Err(UpstreamError::Permanent(format!(
                "article '{article_id}' no longer exists upstream"
            )));
        }
        let body = response.error_for_status()?.text().await?;

        Ok(parse_article_page(&body))
    }

    async fn post_comment(
        &self,
        credential: &CredentialSnapshot,
        article_id: &str,
        text: &str,
    ) -> PortalResult<()> {
        let client = self.login(credential).await?;

        let article_url = self.article_url(article_id);
        let body = client
            .get(&article_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let csrf = extract_csrf_token(&body).ok_or_else(|| {
            UpstreamError::Transient("article page carried no CSRF token".to_string())
        })?;

        let response = client
            .post(format!("{article_url}comment/"))
            .form(&[("csrfmiddlewaretoken", csrf.as_str()), ("comment", text)])
            .header("Referer", &article_url)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status.is_redirection() {
            return Ok(());
        }
        if status.as_u16() == 403 {
            return Err(UpstreamError::Auth(format!(
                "comment rejected for '{}' (HTTP 403)",
                credential.username
            )));
        }
        if status.is_server_error() {
            return Err(UpstreamError::Transient(format!(
                "comment submission returned HTTP {status}"
            )));
        }
        Err(UpstreamError::Permanent(format!(
            "comment submission returned HTTP {status}"
        )))
    }
}

/// Pull the CSRF token out of a rendered form.
fn extract_csrf_token(body: &str) -> Option<String> {
    let document = Html::parse_document(body);
    let selector = Selector::parse(r#"input[name="csrfmiddlewaretoken"]"#).ok()?;
    document
        .select(&selector)
        .next()
        .and_then(|input| input.value().attr("value"))
        .map(|v| v.to_string())
}

/// Parse an article index page into metadata entries.
fn parse_article_index(body: &str, base_url: &str) -> Vec<ArticleMeta> {
    let document = Html::parse_document(body);
    let Ok(card_selector) = Selector::parse("article.article-card, div.article-card") else {
        return Vec::new();
    };
    let title_selector = Selector::parse("h2, h3, .article-title").ok();
    let author_selector = Selector::parse(".article-author, .author").ok();
    let category_selector = Selector::parse(".article-category, .category").ok();
    let link_selector = Selector::parse("a[href]").ok();

    let mut articles = Vec::new();
    for card in document.select(&card_selector) {
        let id = card
            .value()
            .attr("data-article-id")
            .map(|v| v.to_string())
            .or_else(|| {
                link_selector.as_ref().and_then(|sel| {
                    card.select(sel)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .and_then(article_id_from_href)
                })
            });
        let Some(id) = id else {
            warn!("Index card without article id, skipping");
            continue;
        };

        let text_of = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .and_then(|sel| card.select(sel).next())
                .map(|el| el.text().collect::<String>().trim().to_string())
        };

        articles.push(ArticleMeta {
            url: format!("{base_url}/article/{id}/"),
            title: text_of(&title_selector).unwrap_or_default(),
            author: text_of(&author_selector).unwrap_or_default(),
            category: text_of(&category_selector).filter(|c| !c.is_empty()),
            edited_at: card
                .value()
                .attr("data-edited-at")
                .and_then(parse_upstream_timestamp),
            id,
        });
    }

    articles
}

/// Parse an article detail page into its content snapshot.
fn parse_article_page(body: &str) -> ArticleContent {
    let document = Html::parse_document(body);

    // Most-specific container first; the bare <article> is the fallback.
    let content = ["div.article-body", "article .content", "article"]
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|sel| {
            document
                .select(&sel)
                .next()
                .map(|el| el.text().collect::<Vec<_>>().join(" "))
        })
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    let published_at = Selector::parse("time[datetime]")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .and_then(parse_upstream_timestamp)
        });

    ArticleContent {
        content,
        raw_html: body.to_string(),
        published_at,
    }
}

fn article_id_from_href(href: &str) -> Option<String> {
    let mut segments = href.trim_matches('/').split('/');
    match (segments.next(), segments.next()) {
        (Some("article"), Some(id)) if !id.is_empty() => Some(id.to_string()),
        _ => None,
    }
}

fn parse_upstream_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
