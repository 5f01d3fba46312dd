// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for yourmoment-monitor.

use thiserror::Error;

/// Monitor errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Core persistence or broker operation failed.
    #[error("Core error: {0}")]
    Core(#[from] yourmoment_core::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Upstream portal call failed.
    #[error("Upstream error: {0}")]
    Upstream(#[from] crate::upstream::UpstreamError),

    /// LLM call failed.
    #[error("LLM error: {0}")]
    Llm(#[from] crate::llm::LlmError),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the monitor Error.
pub type Result<T> = std::result::Result<T, Error>;
