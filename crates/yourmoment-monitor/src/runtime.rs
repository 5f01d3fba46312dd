// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for yourmoment-monitor.
//!
//! Wires the coordinator, the stage executor and the timeout enforcer
//! into one startable unit, for the server binary as well as for embedding
//! into an existing tokio application.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use yourmoment_monitor::runtime::MonitorRuntime;
//!
//! let runtime = MonitorRuntime::builder()
//!     .pool(pool)
//!     .broker(broker)
//!     .portal(portal)
//!     .llm(llm)
//!     .cipher(cipher)
//!     .build()?
//!     .start()
//!     .await?;
//!
//! // ... run your application ...
//!
//! runtime.shutdown().await?;
//! ```

use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{error, info};

use yourmoment_core::broker::Broker;
use yourmoment_core::crypto::FieldCipher;

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorConfig};
use crate::executor::StageExecutor;
use crate::llm::LlmClient;
use crate::timeout_enforcer::{TimeoutEnforcer, TimeoutEnforcerConfig};
use crate::upstream::UpstreamPortal;

/// Builder for creating a [`MonitorRuntime`].
#[derive(Default)]
pub struct MonitorRuntimeBuilder {
    pool: Option<PgPool>,
    broker: Option<Arc<dyn Broker>>,
    portal: Option<Arc<dyn UpstreamPortal>>,
    llm: Option<Arc<dyn LlmClient>>,
    cipher: Option<FieldCipher>,
    config: Option<Config>,
}

impl MonitorRuntimeBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the Postgres connection pool (required).
    pub fn pool(mut self, pool: PgPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set the work broker (required).
    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Set the upstream portal (required).
    pub fn portal(mut self, portal: Arc<dyn UpstreamPortal>) -> Self {
        self.portal = Some(portal);
        self
    }

    /// Set the LLM client (required).
    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Set the field cipher (required).
    pub fn cipher(mut self, cipher: FieldCipher) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Override the monitor configuration. Defaults to [`Config::default`].
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the runtime configuration.
    pub fn build(self) -> Result<MonitorRuntimeConfig> {
        Ok(MonitorRuntimeConfig {
            pool: self.pool.ok_or_else(|| anyhow::anyhow!("pool is required"))?,
            broker: self
                .broker
                .ok_or_else(|| anyhow::anyhow!("broker is required"))?,
            portal: self
                .portal
                .ok_or_else(|| anyhow::anyhow!("portal is required"))?,
            llm: self.llm.ok_or_else(|| anyhow::anyhow!("llm is required"))?,
            cipher: self
                .cipher
                .ok_or_else(|| anyhow::anyhow!("cipher is required"))?,
            config: self.config.unwrap_or_default(),
        })
    }
}

/// Configuration for a [`MonitorRuntime`].
pub struct MonitorRuntimeConfig {
    pool: PgPool,
    broker: Arc<dyn Broker>,
    portal: Arc<dyn UpstreamPortal>,
    llm: Arc<dyn LlmClient>,
    cipher: FieldCipher,
    config: Config,
}

impl MonitorRuntimeConfig {
    /// Start the runtime, spawning the three periodic tasks.
    pub async fn start(self) -> Result<MonitorRuntime> {
        let coordinator = Coordinator::new(
            self.pool.clone(),
            self.broker.clone(),
            CoordinatorConfig {
                trigger_interval: self.config.trigger_interval,
            },
        );
        let coordinator_shutdown = coordinator.shutdown_handle();
        let coordinator_handle = tokio::spawn(coordinator.run());

        let executor = Arc::new(StageExecutor::new(
            self.pool.clone(),
            self.broker.clone(),
            self.portal,
            self.llm,
            self.cipher,
            &self.config,
        ));
        let executor_shutdown = executor.shutdown_handle();
        let executor_handle = tokio::spawn(executor.run());

        let enforcer = TimeoutEnforcer::new(
            self.pool,
            self.broker,
            TimeoutEnforcerConfig {
                poll_interval: self.config.timeout_interval,
            },
        );
        let enforcer_shutdown = enforcer.shutdown_handle();
        let enforcer_handle = tokio::spawn(enforcer.run());

        info!("MonitorRuntime started");

        Ok(MonitorRuntime {
            coordinator_handle,
            executor_handle,
            enforcer_handle,
            coordinator_shutdown,
            executor_shutdown,
            enforcer_shutdown,
        })
    }
}

/// A running monitor that can be embedded in an application.
pub struct MonitorRuntime {
    coordinator_handle: JoinHandle<()>,
    executor_handle: JoinHandle<()>,
    enforcer_handle: JoinHandle<()>,
    coordinator_shutdown: Arc<Notify>,
    executor_shutdown: Arc<Notify>,
    enforcer_shutdown: Arc<Notify>,
}

impl MonitorRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> MonitorRuntimeBuilder {
        MonitorRuntimeBuilder::new()
    }

    /// Gracefully shut down the runtime.
    pub async fn shutdown(self) -> Result<()> {
        info!("MonitorRuntime shutting down...");

        self.coordinator_shutdown.notify_one();
        self.executor_shutdown.notify_one();
        self.enforcer_shutdown.notify_one();

        for (name, handle) in [
            ("coordinator", self.coordinator_handle),
            ("executor", self.executor_handle),
            ("timeout enforcer", self.enforcer_handle),
        ] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Runtime task panicked");
            }
        }

        info!("MonitorRuntime shutdown complete");
        Ok(())
    }

    /// Check if all runtime tasks are still running.
    pub fn is_running(&self) -> bool {
        !self.coordinator_handle.is_finished()
            && !self.executor_handle.is_finished()
            && !self.enforcer_handle.is_finished()
    }
}
