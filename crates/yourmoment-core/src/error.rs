// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for yourmoment-core.

use thiserror::Error;
use uuid::Uuid;

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration loading failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Secret encryption or decryption failed.
    #[error("Crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    /// Monitoring process was not found.
    #[error("Monitoring process not found: {0}")]
    ProcessNotFound(Uuid),

    /// Process configuration failed validation at start.
    #[error("Invalid process configuration: {0}")]
    InvalidConfiguration(String),

    /// Process is in the wrong status for the requested operation.
    #[error("Process {process_id} is '{actual}', expected '{expected}'")]
    InvalidProcessState {
        /// The process in question.
        process_id: Uuid,
        /// Status required by the operation.
        expected: String,
        /// Status actually observed.
        actual: String,
    },

    /// A stored status value could not be parsed.
    #[error("Unknown status value '{0}'")]
    UnknownStatus(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Result type using the core Error.
pub type Result<T> = std::result::Result<T, Error>;
