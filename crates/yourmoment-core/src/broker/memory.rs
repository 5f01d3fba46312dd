// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory work broker for tests and embedded use.
//!
//! Semantically equivalent to [`super::PgBroker`] but process-local:
//! tasks live in a mutex-guarded map and queues are FIFO vectors. The
//! optional failure switch makes broker-inspection error paths testable.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Broker, ClaimedTask};
use crate::model::{Stage, TaskState};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct TaskEntry {
    queue: String,
    stage: Stage,
    process_id: Uuid,
    state: TaskState,
}

/// Process-local broker.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    tasks: Arc<Mutex<HashMap<Uuid, TaskEntry>>>,
    order: Arc<Mutex<Vec<Uuid>>>,
    fail_inspection: Arc<AtomicBool>,
}

impl InMemoryBroker {
    /// Create an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `task_state` calls fail, simulating a broker outage.
    pub fn set_inspection_failure(&self, fail: bool) {
        self.fail_inspection.store(fail, Ordering::SeqCst);
    }

    /// Number of tasks currently pending across all queues.
    pub async fn pending_count(&self) -> usize {
        let tasks = self.tasks.lock().await;
        tasks
            .values()
            .filter(|t| t.state == TaskState::Pending)
            .count()
    }

    /// All task ids ever enqueued for a process, in enqueue order.
    pub async fn task_ids_for_process(&self, process_id: Uuid) -> Vec<Uuid> {
        let tasks = self.tasks.lock().await;
        let order = self.order.lock().await;
        order
            .iter()
            .filter(|id| {
                tasks
                    .get(id)
                    .is_some_and(|t| t.process_id == process_id)
            })
            .copied()
            .collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn enqueue(&self, queue: &str, stage: Stage, process_id: Uuid) -> Result<Uuid> {
        let task_id = Uuid::new_v4();

        let mut tasks = self.tasks.lock().await;
        tasks.insert(
            task_id,
            TaskEntry {
                queue: queue.to_string(),
                stage,
                process_id,
                state: TaskState::Pending,
            },
        );
        self.order.lock().await.push(task_id);

        Ok(task_id)
    }

    async fn task_state(&self, task_id: Uuid) -> Result<Option<TaskState>> {
        if self.fail_inspection.load(Ordering::SeqCst) {
            return Err(Error::Other("broker inspection unavailable".to_string()));
        }

        let tasks = self.tasks.lock().await;
        Ok(tasks.get(&task_id).map(|t| t.state))
    }

    async fn revoke(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(&task_id)
            && task.state.is_in_flight()
        {
            task.state = TaskState::Revoked;
        }
        Ok(())
    }

    async fn claim(&self, queues: &[&str]) -> Result<Option<ClaimedTask>> {
        let mut tasks = self.tasks.lock().await;
        let order = self.order.lock().await;

        for task_id in order.iter() {
            if let Some(task) = tasks.get_mut(task_id)
                && task.state == TaskState::Pending
                && queues.contains(&task.queue.as_str())
            {
                task.state = TaskState::Started;
                return Ok(Some(ClaimedTask {
                    task_id: *task_id,
                    queue: task.queue.clone(),
                    stage: task.stage,
                    process_id: task.process_id,
                }));
            }
        }

        Ok(None)
    }

    async fn complete(&self, task_id: Uuid) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(&task_id)
            && task.state == TaskState::Started
        {
            task.state = TaskState::Success;
        }
        Ok(())
    }

    async fn fail(&self, task_id: Uuid, _error: &str) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.get_mut(&task_id)
            && task.state == TaskState::Started
        {
            task.state = TaskState::Failure;
        }
        Ok(())
    }
}
