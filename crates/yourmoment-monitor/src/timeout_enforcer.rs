// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timeout enforcer - the sole wall-time bound on monitoring processes.
//!
//! Periodically stops every running process that has outlived its
//! `expires_at`: revokes all four stored stage tasks on the broker
//! (idempotent) and, in one short transaction, flips the process to
//! stopped with `stop_reason = timeout` and clears the task slots so the
//! coordinator will not revive them.
//!
//! A second sweep clears stray task ids from processes that are no longer
//! running, keeping "not running implies no stored task ids" true within
//! one enforcement tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use yourmoment_core::broker::Broker;
use yourmoment_core::db;
use yourmoment_core::lifecycle::{self, STOP_REASON_TIMEOUT};

use crate::Result;

/// Timeout enforcer configuration.
#[derive(Debug, Clone)]
pub struct TimeoutEnforcerConfig {
    /// How often to check running processes (T_timeout).
    pub poll_interval: Duration,
}

impl Default for TimeoutEnforcerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// Counts emitted per enforcement tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnforcementSummary {
    /// Processes stopped because their budget was exhausted.
    pub stopped: u32,
    /// Non-running processes whose stray task ids were cleared.
    pub swept: u32,
}

/// Periodic wall-time budget enforcement.
pub struct TimeoutEnforcer {
    pool: PgPool,
    broker: Arc<dyn Broker>,
    config: TimeoutEnforcerConfig,
    shutdown: Arc<Notify>,
}

impl TimeoutEnforcer {
    /// Create an enforcer over the shared pool and broker.
    pub fn new(pool: PgPool, broker: Arc<dyn Broker>, config: TimeoutEnforcerConfig) -> Self {
        Self {
            pool,
            broker,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Get a handle to signal shutdown.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        self.shutdown.clone()
    }

    /// Run the enforcement loop.
    pub async fn run(self) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            "Timeout enforcer started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Timeout enforcer shutting down");
                    break;
                }

                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "Timeout enforcement tick failed");
                    }
                }
            }
        }
    }

    /// Run one enforcement pass.
    pub async fn tick(&self) -> Result<EnforcementSummary> {
        let mut summary = EnforcementSummary::default();

        // Pass 1: stop processes past their budget.
        let expired = db::list_expired_processes(&self.pool, Utc::now()).await?;
        for process in &expired {
            warn!(
                process_id = %process.id,
                expires_at = ?process.expires_at,
                max_duration_minutes = process.max_duration_minutes,
                "Process exceeded its maximum duration, stopping"
            );

            lifecycle::revoke_stage_tasks(self.broker.as_ref(), process).await;

            if db::mark_process_stopped(&self.pool, process.id, STOP_REASON_TIMEOUT).await? {
                summary.stopped += 1;
                info!(process_id = %process.id, "Process stopped by timeout");
            }
        }

        // Pass 2: sweep stray task ids from processes that stopped through
        // other paths while tasks were still stored.
        let stale = db::list_processes_with_stale_tasks(&self.pool).await?;
        for process in &stale {
            debug!(process_id = %process.id, "Clearing stray stage task ids");
            lifecycle::revoke_stage_tasks(self.broker.as_ref(), process).await;
            db::clear_stage_task_ids(&self.pool, process.id).await?;
            summary.swept += 1;
        }

        if summary.stopped > 0 || summary.swept > 0 {
            info!(
                stopped = summary.stopped,
                swept = summary.swept,
                "Timeout enforcement tick finished"
            );
        }

        Ok(summary)
    }
}
