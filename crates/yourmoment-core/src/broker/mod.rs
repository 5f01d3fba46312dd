// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Work broker abstraction.
//!
//! The coordinator enqueues one short-lived task per (process, stage); an
//! executor claims and runs them. The broker is the only place task state
//! lives, so "is a stage in flight" is always answered by
//! [`Broker::task_state`] against the stored task id.
//!
//! Two backends ship with the crate:
//! - [`PgBroker`]: durable tasks in the `broker_tasks` table, claimed with a
//!   `FOR UPDATE SKIP LOCKED` pop so concurrent executors never double-claim
//! - [`InMemoryBroker`]: process-local queues for tests and embedded use

pub mod memory;
pub mod postgres;

pub use self::memory::InMemoryBroker;
pub use self::postgres::PgBroker;

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::model::{Stage, TaskState};

/// A claimed stage task handed to an executor.
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    /// Task id, also stored on the owning process row.
    pub task_id: Uuid,
    /// Queue the task was claimed from.
    pub queue: String,
    /// Stage to execute.
    pub stage: Stage,
    /// Task argument: the monitoring process.
    pub process_id: Uuid,
}

/// Task queue with durable enqueue, addressable state and revoke.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Enqueue a stage task for a process. Returns the new task id.
    async fn enqueue(&self, queue: &str, stage: Stage, process_id: Uuid) -> Result<Uuid>;

    /// Look up the state of a task. `None` means the broker no longer knows
    /// the id (expired or lost), which callers treat as terminal.
    async fn task_state(&self, task_id: Uuid) -> Result<Option<TaskState>>;

    /// Revoke a task. Idempotent; a no-op for tasks already terminal.
    async fn revoke(&self, task_id: Uuid) -> Result<()>;

    /// Claim the oldest pending task from any of the given queues and mark
    /// it started. Returns `None` when all queues are empty.
    async fn claim(&self, queues: &[&str]) -> Result<Option<ClaimedTask>>;

    /// Mark a started task successful.
    async fn complete(&self, task_id: Uuid) -> Result<()>;

    /// Mark a started task failed with an error message.
    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()>;
}
