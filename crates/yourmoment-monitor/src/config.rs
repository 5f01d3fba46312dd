// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for yourmoment-monitor.
//!
//! Intervals and rate limits are tunable through the environment; none of
//! them changes pipeline semantics.

use std::time::Duration;

/// Default disclosure prefix every generated comment must begin with.
pub const DEFAULT_AI_COMMENT_PREFIX: &str = "[Dieser Kommentar stammt von einem KI-ChatBot.]";

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Coordinator period (T_trigger).
    pub trigger_interval: Duration,
    /// Timeout enforcer period (T_timeout).
    pub timeout_interval: Duration,
    /// Delay between content fetches per credential (R_prep).
    pub preparation_rate_limit: Duration,
    /// Delay between comment posts (R_post).
    pub posting_rate_limit: Duration,
    /// Transient posting failures tolerated before a record fails (N_retry).
    pub max_posting_retries: i32,
    /// Mandated prefix for generated comments.
    pub ai_comment_prefix: String,
    /// Upstream platform origin.
    pub upstream_base_url: String,
    /// Per-call HTTP timeout for upstream and LLM requests.
    pub http_timeout: Duration,
    /// Executor concurrency bound across all stage tasks.
    pub max_concurrent_stage_tasks: usize,
    /// Executor queue poll period while idle.
    pub executor_poll_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            trigger_interval: Duration::from_secs(60),
            timeout_interval: Duration::from_secs(30),
            preparation_rate_limit: Duration::from_secs(2),
            posting_rate_limit: Duration::from_secs(30),
            max_posting_retries: 3,
            ai_comment_prefix: DEFAULT_AI_COMMENT_PREFIX.to_string(),
            upstream_base_url: "https://new.mymoment.ch".to_string(),
            http_timeout: Duration::from_secs(30),
            max_concurrent_stage_tasks: 8,
            executor_poll_interval: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment variables, defaulting every
    /// unset value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            trigger_interval: secs_var("YOURMOMENT_TRIGGER_INTERVAL_SECS", defaults.trigger_interval)?,
            timeout_interval: secs_var("YOURMOMENT_TIMEOUT_INTERVAL_SECS", defaults.timeout_interval)?,
            preparation_rate_limit: secs_var(
                "YOURMOMENT_PREPARATION_RATE_LIMIT_SECS",
                defaults.preparation_rate_limit,
            )?,
            posting_rate_limit: secs_var(
                "YOURMOMENT_POSTING_RATE_LIMIT_SECS",
                defaults.posting_rate_limit,
            )?,
            max_posting_retries: parse_var(
                "YOURMOMENT_MAX_POSTING_RETRIES",
                defaults.max_posting_retries,
            )?,
            ai_comment_prefix: std::env::var("YOURMOMENT_AI_COMMENT_PREFIX")
                .unwrap_or(defaults.ai_comment_prefix),
            upstream_base_url: std::env::var("YOURMOMENT_UPSTREAM_BASE_URL")
                .unwrap_or(defaults.upstream_base_url),
            http_timeout: secs_var("YOURMOMENT_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
            max_concurrent_stage_tasks: parse_var(
                "YOURMOMENT_MAX_CONCURRENT_STAGE_TASKS",
                defaults.max_concurrent_stage_tasks,
            )?,
            executor_poll_interval: secs_var(
                "YOURMOMENT_EXECUTOR_POLL_INTERVAL_SECS",
                defaults.executor_poll_interval,
            )?,
        })
    }
}

fn secs_var(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unparseable value.
    #[error("Invalid value for {0}")]
    InvalidValue(&'static str),
}
