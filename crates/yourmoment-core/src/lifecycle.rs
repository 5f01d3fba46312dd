// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Process lifecycle operations consumed by the API collaborator.
//!
//! `start` validates the configuration and flips the process to running;
//! it never spawns workers. The coordinator notices the process on its
//! next tick, which bounds start latency to one trigger interval.
//! `stop` revokes whatever stage tasks are stored and clears the slots.

use chrono::{Duration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::db;
use crate::model::{MonitoringProcess, PipelineCounts, ProcessStatus, Stage};
use crate::{Error, Result};

/// Reason recorded when an operator stops a process.
pub const STOP_REASON_MANUAL: &str = "manual";
/// Reason recorded when the timeout enforcer stops a process.
pub const STOP_REASON_TIMEOUT: &str = "timeout";

/// Process fields plus derived pipeline counters.
#[derive(Debug, Clone)]
pub struct ProcessStatusView {
    /// The process row.
    pub process: MonitoringProcess,
    /// Work record counts per status.
    pub pipeline: PipelineCounts,
}

/// Start a monitoring process.
///
/// Validates that the credential and template sets are non-empty, that the
/// referenced provider exists and belongs to the owning user, and that the
/// user is under the running-process quota. On success sets
/// `started_at = now`, `expires_at = started_at + max_duration_minutes`
/// and `status = running`.
pub async fn start(pool: &PgPool, process_id: Uuid, max_processes_per_user: i64) -> Result<()> {
    let process = db::get_process(pool, process_id)
        .await?
        .ok_or(Error::ProcessNotFound(process_id))?;

    match process.process_status()? {
        ProcessStatus::Created | ProcessStatus::Stopped => {}
        other => {
            return Err(Error::InvalidProcessState {
                process_id,
                expected: "created or stopped".to_string(),
                actual: other.to_string(),
            });
        }
    }

    let config = db::get_process_config(pool, process_id).await?;

    if config.credential_ids.is_empty() {
        return Err(Error::InvalidConfiguration(
            "process has no active upstream credentials".to_string(),
        ));
    }
    if config.template_ids.is_empty() {
        return Err(Error::InvalidConfiguration(
            "process has no prompt templates".to_string(),
        ));
    }
    if !db::provider_belongs_to_user(pool, config.llm_provider_id, config.user_id).await? {
        return Err(Error::InvalidConfiguration(format!(
            "LLM provider {} does not exist or does not belong to the user",
            config.llm_provider_id
        )));
    }

    let running = db::count_running_for_user(pool, config.user_id).await?;
    if running >= max_processes_per_user {
        return Err(Error::InvalidConfiguration(format!(
            "user already has {running} running processes (limit {max_processes_per_user})"
        )));
    }

    let started_at = Utc::now();
    let expires_at = started_at + Duration::minutes(process.max_duration_minutes as i64);

    if !db::mark_process_running(pool, process_id, started_at, expires_at).await? {
        // Lost a race with another start/stop; the guard makes this a no-op.
        warn!(process_id = %process_id, "Process changed status during start");
        return Err(Error::InvalidProcessState {
            process_id,
            expected: "created or stopped".to_string(),
            actual: "changed concurrently".to_string(),
        });
    }

    info!(
        process_id = %process_id,
        expires_at = %expires_at,
        credentials = config.credential_ids.len(),
        templates = config.template_ids.len(),
        generate_only = config.generate_only,
        "Monitoring process started"
    );

    Ok(())
}

/// Stop a monitoring process manually.
///
/// Revokes all stored stage tasks on the broker (idempotent) and clears
/// the slots together with the status flip.
pub async fn stop(pool: &PgPool, broker: &dyn Broker, process_id: Uuid) -> Result<()> {
    let process = db::get_process(pool, process_id)
        .await?
        .ok_or(Error::ProcessNotFound(process_id))?;

    revoke_stage_tasks(broker, &process).await;

    if !db::mark_process_stopped(pool, process_id, STOP_REASON_MANUAL).await? {
        return Err(Error::InvalidProcessState {
            process_id,
            expected: ProcessStatus::Running.to_string(),
            actual: process.status,
        });
    }

    info!(process_id = %process_id, "Monitoring process stopped manually");
    Ok(())
}

/// Process fields plus pipeline counters from one aggregation query.
pub async fn status(pool: &PgPool, process_id: Uuid) -> Result<ProcessStatusView> {
    let process = db::get_process(pool, process_id)
        .await?
        .ok_or(Error::ProcessNotFound(process_id))?;
    let pipeline = db::pipeline_counts(pool, process_id).await?;

    Ok(ProcessStatusView { process, pipeline })
}

/// Revoke every stage task stored on a process. Broker errors are logged
/// and swallowed; revocation is idempotent and retried by the enforcer.
pub async fn revoke_stage_tasks(broker: &dyn Broker, process: &MonitoringProcess) {
    for stage in Stage::ALL {
        if let Some(task_id) = process.stage_task_id(stage)
            && let Err(e) = broker.revoke(task_id).await
        {
            warn!(
                process_id = %process.id,
                stage = %stage,
                task_id = %task_id,
                error = %e,
                "Failed to revoke stage task"
            );
        }
    }
}
