// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! yourMoment Monitor - Pipeline Server
//!
//! Runs the full monitoring pipeline against Postgres and the real
//! upstream platform:
//! - Coordinator re-spawning stage tasks for running processes
//! - Stage executor draining the four stage queues
//! - Timeout enforcer bounding process wall time

use std::sync::Arc;

use tracing::{info, warn};

use yourmoment_core::broker::PgBroker;
use yourmoment_core::crypto::FieldCipher;
use yourmoment_monitor::config::Config as MonitorConfig;
use yourmoment_monitor::llm::{HttpLlmClient, http::HttpLlmConfig};
use yourmoment_monitor::runtime::MonitorRuntime;
use yourmoment_monitor::upstream::{HttpPortal, http::HttpPortalConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "yourmoment_monitor=info,yourmoment_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        warn!("No .env file loaded: {}", e);
    }

    // Load configuration
    let core_config = yourmoment_core::config::Config::from_env()?;
    let monitor_config = MonitorConfig::from_env()?;

    info!(
        trigger_interval_secs = monitor_config.trigger_interval.as_secs(),
        timeout_interval_secs = monitor_config.timeout_interval.as_secs(),
        upstream = %monitor_config.upstream_base_url,
        "Starting yourMoment Monitor"
    );

    // Secrets-at-rest cipher; the key is loaded once and never logged.
    let cipher = FieldCipher::from_base64_key(&core_config.encryption_key)?;

    // Connect to database
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(core_config.db_pool_size)
        .connect(&core_config.database_url)
        .await?;

    info!("Connected to database");

    yourmoment_core::migrations::run(&pool).await?;
    info!("Database schema verified");

    // External adapters
    let broker = Arc::new(PgBroker::new(pool.clone()));
    let portal = Arc::new(HttpPortal::new(HttpPortalConfig {
        base_url: monitor_config.upstream_base_url.clone(),
        timeout: monitor_config.http_timeout,
        ..Default::default()
    }));
    let llm = Arc::new(HttpLlmClient::new(HttpLlmConfig {
        timeout: monitor_config.http_timeout,
        ..Default::default()
    })?);

    // Start the runtime
    let runtime = MonitorRuntime::builder()
        .pool(pool)
        .broker(broker)
        .portal(portal)
        .llm(llm)
        .cipher(cipher)
        .config(monitor_config)
        .build()?
        .start()
        .await?;

    info!("yourMoment Monitor ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Graceful shutdown
    runtime.shutdown().await?;

    info!("yourMoment Monitor shut down");
    Ok(())
}
