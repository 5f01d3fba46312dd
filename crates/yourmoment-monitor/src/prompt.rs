// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Prompt rendering and disclosure-prefix enforcement.
//!
//! User prompt templates carry article placeholders in curly braces.
//! Known placeholders are substituted (missing values render as the empty
//! string); unknown placeholders are left literal so template typos stay
//! visible in the rendered prompt instead of silently vanishing.

use chrono::{DateTime, Utc};

use yourmoment_core::model::WorkRecord;

/// Maximum accepted comment length in characters. Longer generations fail
/// validation instead of being silently truncated.
pub const MAX_COMMENT_CHARS: usize = 4000;

/// Length of the `article_excerpt` placeholder value.
const EXCERPT_CHARS: usize = 200;

/// Article values substituted into a user prompt template.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    /// Article title.
    pub article_title: String,
    /// Author pseudonym.
    pub article_author: String,
    /// Full article text.
    pub article_content: String,
    /// Upstream category.
    pub article_category: String,
    /// Commenting identity shown to readers.
    pub user_nickname: String,
    /// Render time, formatted as a date.
    pub now: DateTime<Utc>,
}

impl PromptContext {
    /// Build a context from a prepared work record and the commenting
    /// identity's display name.
    pub fn from_record(record: &WorkRecord, user_nickname: &str, now: DateTime<Utc>) -> Self {
        Self {
            article_title: record.article_title.clone(),
            article_author: record.article_author.clone(),
            article_content: record.article_content.clone().unwrap_or_default(),
            article_category: record.article_category.clone().unwrap_or_default(),
            user_nickname: user_nickname.to_string(),
            now,
        }
    }

    fn excerpt(&self) -> String {
        if self.article_content.chars().count() <= EXCERPT_CHARS {
            return self.article_content.clone();
        }
        let cut: String = self.article_content.chars().take(EXCERPT_CHARS).collect();
        format!("{}…", cut.trim_end())
    }
}

/// Render a user prompt template against article values.
pub fn render(template: &str, context: &PromptContext) -> String {
    let substitutions = [
        ("{article_title}", context.article_title.clone()),
        ("{article_author}", context.article_author.clone()),
        ("{article_content}", context.article_content.clone()),
        ("{article_excerpt}", context.excerpt()),
        ("{article_category}", context.article_category.clone()),
        ("{current_date}", context.now.format("%Y-%m-%d").to_string()),
        ("{user_nickname}", context.user_nickname.clone()),
    ];

    let mut rendered = template.to_string();
    for (placeholder, value) in substitutions {
        rendered = rendered.replace(placeholder, &value);
    }
    rendered
}

/// Errors from comment validation.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommentError {
    /// The backend returned nothing usable.
    #[error("Generated comment is empty")]
    Empty,
    /// The comment exceeds the accepted length.
    #[error("Generated comment has {0} characters (limit {MAX_COMMENT_CHARS})")]
    TooLong(usize),
}

/// Validate a generated comment and enforce the disclosure prefix.
///
/// The system prompt instructs the model to lead with the prefix, but the
/// output is validated post-hoc: a missing prefix is prepended rather than
/// trusted. The returned text always begins with `prefix`.
pub fn finalize_comment(raw: &str, prefix: &str) -> Result<String, CommentError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CommentError::Empty);
    }

    let with_prefix = if trimmed.starts_with(prefix) {
        trimmed.to_string()
    } else {
        format!("{prefix} {trimmed}")
    };

    let chars = with_prefix.chars().count();
    if chars > MAX_COMMENT_CHARS {
        return Err(CommentError::TooLong(chars));
    }

    Ok(with_prefix)
}
