// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Timeout enforcer tests: expired processes are stopped with their tasks
//! revoked, and stray task ids on non-running processes are swept.

mod common;

use std::sync::Arc;

use sqlx::PgPool;
use uuid::Uuid;
use yourmoment_core::broker::{Broker, InMemoryBroker};
use yourmoment_core::db;
use yourmoment_core::model::{ProcessStatus, Stage, TaskState, queues};
use yourmoment_monitor::timeout_enforcer::{TimeoutEnforcer, TimeoutEnforcerConfig};

async fn expire_process(pool: &PgPool, process_id: Uuid) {
    sqlx::query(
        "UPDATE monitoring_processes SET expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1",
    )
    .bind(process_id)
    .execute(pool)
    .await
    .expect("Failed to expire process");
}

#[tokio::test]
async fn test_expired_process_is_stopped_and_revoked() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 1).await;
    let broker = Arc::new(InMemoryBroker::new());

    // Simulate in-flight stage tasks stored on the process.
    let mut task_ids = Vec::new();
    for stage in Stage::ALL {
        let task_id = broker.enqueue(stage.queue(), stage, process_id).await.unwrap();
        db::set_stage_task_id(&pool, process_id, stage, task_id)
            .await
            .unwrap();
        task_ids.push(task_id);
    }

    expire_process(&pool, process_id).await;

    let enforcer = TimeoutEnforcer::new(
        pool.clone(),
        broker.clone(),
        TimeoutEnforcerConfig::default(),
    );
    let summary = enforcer.tick().await.unwrap();
    assert!(summary.stopped >= 1);

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.process_status().unwrap(), ProcessStatus::Stopped);
    assert_eq!(process.stop_reason.as_deref(), Some("timeout"));
    assert!(process.stopped_at.is_some());
    for stage in Stage::ALL {
        assert_eq!(process.stage_task_id(stage), None);
    }

    // All four tasks were revoked on the broker.
    for task_id in task_ids {
        assert_eq!(
            broker.task_state(task_id).await.unwrap(),
            Some(TaskState::Revoked)
        );
    }

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_timeout_is_idempotent_across_ticks() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 1).await;
    let broker = Arc::new(InMemoryBroker::new());

    expire_process(&pool, process_id).await;

    let enforcer = TimeoutEnforcer::new(
        pool.clone(),
        broker.clone(),
        TimeoutEnforcerConfig::default(),
    );
    enforcer.tick().await.unwrap();

    let first = db::get_process(&pool, process_id).await.unwrap().unwrap();
    let stopped_at = first.stopped_at;

    // A second tick finds nothing to do and changes nothing.
    enforcer.tick().await.unwrap();
    let second = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(second.stopped_at, stopped_at);
    assert_eq!(second.stop_reason.as_deref(), Some("timeout"));

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_running_process_within_budget_is_untouched() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 60).await;
    let broker = Arc::new(InMemoryBroker::new());

    let enforcer = TimeoutEnforcer::new(
        pool.clone(),
        broker.clone(),
        TimeoutEnforcerConfig::default(),
    );
    enforcer.tick().await.unwrap();

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.process_status().unwrap(), ProcessStatus::Running);
    assert!(process.stopped_at.is_none());

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_stray_task_ids_are_swept() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let broker = Arc::new(InMemoryBroker::new());

    let task_id = broker
        .enqueue(queues::GENERATION, Stage::Generation, process_id)
        .await
        .unwrap();
    db::set_stage_task_id(&pool, process_id, Stage::Generation, task_id)
        .await
        .unwrap();

    // The process leaves running through a path that does not clear slots.
    sqlx::query("UPDATE monitoring_processes SET status = 'failed' WHERE id = $1")
        .bind(process_id)
        .execute(&pool)
        .await
        .unwrap();

    let enforcer = TimeoutEnforcer::new(
        pool.clone(),
        broker.clone(),
        TimeoutEnforcerConfig::default(),
    );
    let summary = enforcer.tick().await.unwrap();
    assert!(summary.swept >= 1);

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.stage_task_id(Stage::Generation), None);
    assert_eq!(
        broker.task_state(task_id).await.unwrap(),
        Some(TaskState::Revoked)
    );

    common::cleanup_process(&pool, process_id).await;
}
