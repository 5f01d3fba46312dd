// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Stage executor - the broker consumer.
//!
//! Claims pending tasks from the four stage queues and runs the matching
//! stage worker on a spawned tokio task. Concurrency is bounded by a
//! semaphore; within one claimed task the stage worker iterates serially.
//! Process-level and stage-level parallelism both come from multiple
//! claimed tasks coexisting.
//!
//! A worker's top-level failure is caught here: the stage error counter is
//! bumped, the broker task is marked failed, and the coordinator's next
//! tick spawns a fresh attempt. Errors never escape a task.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info};

use yourmoment_core::broker::{Broker, ClaimedTask};
use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db;
use yourmoment_core::model::{Stage, queues};

use crate::config::Config;
use crate::llm::LlmClient;
use crate::stages::{
    DiscoveryWorker, GenerationWorker, PostingWorker, PreparationWorker, RevocationProbe,
    StageOutcome,
};
use crate::upstream::UpstreamPortal;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Queue poll period while idle.
    pub poll_interval: Duration,
    /// Concurrency bound across all claimed stage tasks.
    pub max_concurrent_tasks: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_tasks: 8,
        }
    }
}

impl ExecutorConfig {
    /// Derive the executor configuration from the monitor configuration.
    pub fn from_monitor_config(config: &Config) -> Self {
        Self {
            poll_interval: config.executor_poll_interval,
            max_concurrent_tasks: config.max_concurrent_stage_tasks,
        }
    }
}

/// Broker consumer running the four stage workers.
pub struct StageExecutor {
    pool: PgPool,
    broker: Arc<dyn Broker>,
    discovery: DiscoveryWorker,
    preparation: PreparationWorker,
    generation: GenerationWorker,
    posting: PostingWorker,
    config: ExecutorConfig,
    semaphore: Arc<Semaphore>,
    shutdown: Arc<Notify>,
}

impl StageExecutor {
    /// Wire an executor from the shared dependencies.
    pub fn new(
        pool: PgPool,
        broker: Arc<dyn Broker>,
        portal: Arc<dyn UpstreamPortal>,
        llm: Arc<dyn LlmClient>,
        cipher: FieldCipher,
        monitor_config: &Config,
    ) -> Self {
        let config = ExecutorConfig::from_monitor_config(monitor_config);

        Self {
            discovery: DiscoveryWorker::new(pool.clone(), portal.clone(), cipher.clone()),
            preparation: PreparationWorker::new(
                pool.clone(),
                portal.clone(),
                cipher.clone(),
                monitor_config.preparation_rate_limit,
            ),
            generation: GenerationWorker::new(
                pool.clone(),
                llm,
                cipher.clone(),
                monitor_config.ai_comment_prefix.clone(),
            ),
            posting: PostingWorker::new(
                pool.clone(),
                portal,
                cipher,
                monitor_config.posting_rate_limit,
                monitor_config.max_posting_retries,
            ),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
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

    /// Run the claim loop until shutdown.
    pub async fn run(self: Arc<Self>) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            max_concurrent = self.config.max_concurrent_tasks,
            "Stage executor started"
        );

        loop {
            // Hold a permit before claiming so claimed tasks never pile up
            // unexecuted.
            let permit = tokio::select! {
                biased;

                _ = self.shutdown.notified() => {
                    info!("Stage executor shutting down");
                    break;
                }

                permit = self.semaphore.clone().acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };

            match self.broker.claim(&queues::STAGES).await {
                Ok(Some(task)) => {
                    let executor = self.clone();
                    tokio::spawn(async move {
                        executor.execute(task).await;
                        drop(permit);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        biased;

                        _ = self.shutdown.notified() => {
                            info!("Stage executor shutting down");
                            break;
                        }
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(error = %e, "Task claim failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        info!("Stage executor stopped");
    }

    /// Execute one claimed stage task.
    pub async fn execute(&self, task: ClaimedTask) {
        debug!(
            task_id = %task.task_id,
            stage = %task.stage,
            process_id = %task.process_id,
            "Executing stage task"
        );

        let probe = RevocationProbe::new(self.broker.clone(), task.task_id);
        let result = match task.stage {
            Stage::Discovery => self.discovery.run(task.process_id, &probe).await,
            Stage::Preparation => self.preparation.run(task.process_id, &probe).await,
            Stage::Generation => self.generation.run(task.process_id, &probe).await,
            Stage::Posting => self.posting.run(task.process_id, &probe).await,
        };

        match result {
            Ok(StageOutcome { processed, failed }) => {
                debug!(
                    task_id = %task.task_id,
                    stage = %task.stage,
                    processed,
                    failed,
                    "Stage task finished"
                );
                if let Err(e) = self.broker.complete(task.task_id).await {
                    error!(task_id = %task.task_id, error = %e, "Failed to complete broker task");
                }
            }
            Err(e) => {
                // Unexpected worker failure: count it against the stage and
                // rely on the coordinator for re-entry.
                error!(
                    task_id = %task.task_id,
                    stage = %task.stage,
                    process_id = %task.process_id,
                    error = %e,
                    "Stage task failed"
                );
                if let Err(inner) =
                    db::increment_stage_errors(&self.pool, task.process_id, task.stage, 1).await
                {
                    error!(error = %inner, "Failed to record stage error");
                }
                if let Err(inner) = self.broker.fail(task.task_id, &e.to_string()).await {
                    error!(task_id = %task.task_id, error = %inner, "Failed to fail broker task");
                }
            }
        }
    }
}
