// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pipeline coordinator.
//!
//! Runs unconditionally every trigger interval. For each running process
//! and each of its active stages, inspects the stored task id against the
//! broker and enqueues a fresh stage task whenever none is in flight.
//! Stage workers are short-lived single-pass batch processors; this
//! periodic re-spawn - not the workers themselves - is what makes
//! monitoring continuous, and the in-flight check is what prevents
//! double-spawning.
//!
//! Broker inspection errors fall back to "skip spawn": a duplicate task is
//! worse than a late one, and the next tick re-evaluates.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use yourmoment_core::broker::Broker;
use yourmoment_core::db;
use yourmoment_core::model::MonitoringProcess;

use crate::Result;

/// Coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How often to evaluate running processes (T_trigger).
    pub trigger_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            trigger_interval: Duration::from_secs(60),
        }
    }
}

/// Counts emitted per coordinator tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Stage tasks freshly enqueued this tick.
    pub spawned: u32,
    /// Stages left alone because a task was in flight (or the broker could
    /// not be inspected).
    pub skipped: u32,
}

/// Periodic stage-task spawner.
pub struct Coordinator {
    pool: PgPool,
    broker: Arc<dyn Broker>,
    config: CoordinatorConfig,
    shutdown: Arc<Notify>,
}

impl Coordinator {
    /// Create a coordinator over the shared pool and broker.
    pub fn new(pool: PgPool, broker: Arc<dyn Broker>, config: CoordinatorConfig) -> Self {
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

    /// Run the coordinator loop.
    pub async fn run(self) {
        info!(
            trigger_interval_secs = self.config.trigger_interval.as_secs(),
            "Coordinator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Coordinator shutting down");
                    break;
                }

                _ = tokio::time::sleep(self.config.trigger_interval) => {
                    match self.tick().await {
                        Ok(summary) => {
                            info!(
                                spawned = summary.spawned,
                                skipped = summary.skipped,
                                "Coordinator tick finished"
                            );
                        }
                        Err(e) => {
                            error!(error = %e, "Coordinator tick failed");
                        }
                    }
                }
            }
        }
    }

    /// Evaluate every running process once.
    pub async fn tick(&self) -> Result<TickSummary> {
        let processes = db::list_running_processes(&self.pool).await?;
        let mut summary = TickSummary::default();

        for process in &processes {
            self.evaluate_process(process, &mut summary).await;
        }

        Ok(summary)
    }

    /// Spawn stage tasks for one process where none is in flight.
    async fn evaluate_process(&self, process: &MonitoringProcess, summary: &mut TickSummary) {
        for stage in process.active_stages() {
            let stage = *stage;

            // A task is in flight iff its broker state is pending, started
            // or retry. A missing id, an expired id and every terminal
            // state mean the stage needs a fresh task.
            let in_flight = match process.stage_task_id(stage) {
                None => false,
                Some(task_id) => match self.broker.task_state(task_id).await {
                    Ok(Some(state)) => state.is_in_flight(),
                    Ok(None) => {
                        debug!(
                            process_id = %process.id,
                            stage = %stage,
                            task_id = %task_id,
                            "Stored task expired on the broker"
                        );
                        false
                    }
                    Err(e) => {
                        // Better a late task than a duplicate one.
                        warn!(
                            process_id = %process.id,
                            stage = %stage,
                            error = %e,
                            "Broker inspection failed, treating stage as in flight"
                        );
                        summary.skipped += 1;
                        continue;
                    }
                },
            };

            if in_flight {
                summary.skipped += 1;
                continue;
            }

            match self.broker.enqueue(stage.queue(), stage, process.id).await {
                Ok(task_id) => {
                    if let Err(e) =
                        db::set_stage_task_id(&self.pool, process.id, stage, task_id).await
                    {
                        error!(
                            process_id = %process.id,
                            stage = %stage,
                            task_id = %task_id,
                            error = %e,
                            "Failed to persist new stage task id"
                        );
                        continue;
                    }
                    debug!(
                        process_id = %process.id,
                        stage = %stage,
                        task_id = %task_id,
                        "Spawned stage task"
                    );
                    summary.spawned += 1;
                }
                Err(e) => {
                    error!(
                        process_id = %process.id,
                        stage = %stage,
                        error = %e,
                        "Failed to enqueue stage task"
                    );
                    summary.skipped += 1;
                }
            }
        }
    }
}
