// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Postgres-backed work broker.
//!
//! Tasks live in the `broker_tasks` table. Claims use a
//! `FOR UPDATE SKIP LOCKED` pop so any number of executors can drain the
//! same queues without double-claiming. All statements are single
//! short-lived round trips.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Broker, ClaimedTask};
use crate::model::{Stage, TaskState};
use crate::{Error, Result};

/// Durable broker over the shared Postgres pool.
#[derive(Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    /// Create a broker over an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Broker for PgBroker {
    async fn enqueue(&self, queue: &str, stage: Stage, process_id: Uuid) -> Result<Uuid> {
        let task_id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO broker_tasks (task_id, queue, stage, process_id, state, enqueued_at)
            VALUES ($1, $2, $3, $4, 'pending', NOW())
            "#,
        )
        .bind(task_id)
        .bind(queue)
        .bind(stage.to_string())
        .bind(process_id)
        .execute(&self.pool)
        .await?;

        Ok(task_id)
    }

    async fn task_state(&self, task_id: Uuid) -> Result<Option<TaskState>> {
        let state: Option<String> =
            sqlx::query_scalar("SELECT state FROM broker_tasks WHERE task_id = $1")
                .bind(task_id)
                .fetch_optional(&self.pool)
                .await?;

        match state {
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|_| Error::UnknownStatus(raw)),
            None => Ok(None),
        }
    }

    async fn revoke(&self, task_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE broker_tasks
            SET state = 'revoked', finished_at = NOW()
            WHERE task_id = $1 AND state IN ('pending', 'started', 'retry')
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn claim(&self, queues: &[&str]) -> Result<Option<ClaimedTask>> {
        let queues: Vec<String> = queues.iter().map(|q| q.to_string()).collect();

        let row: Option<(Uuid, String, String, Uuid)> = sqlx::query_as(
            r#"
            UPDATE broker_tasks
            SET state = 'started', started_at = NOW()
            WHERE task_id = (
                SELECT task_id FROM broker_tasks
                WHERE queue = ANY($1) AND state = 'pending'
                ORDER BY enqueued_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING task_id, queue, stage, process_id
            "#,
        )
        .bind(&queues)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((task_id, queue, stage, process_id)) => {
                let stage = stage
                    .parse::<Stage>()
                    .map_err(|_| Error::UnknownStatus(stage))?;
                Ok(Some(ClaimedTask {
                    task_id,
                    queue,
                    stage,
                    process_id,
                }))
            }
            None => Ok(None),
        }
    }

    async fn complete(&self, task_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE broker_tasks
            SET state = 'success', finished_at = NOW()
            WHERE task_id = $1 AND state = 'started'
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE broker_tasks
            SET state = 'failure', error = $2, finished_at = NOW()
            WHERE task_id = $1 AND state = 'started'
            "#,
        )
        .bind(task_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
