// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tests for the process lifecycle service.

mod common;

use chrono::Utc;
use uuid::Uuid;
use yourmoment_core::broker::{Broker, InMemoryBroker};
use yourmoment_core::db::{self, NewProcess};
use yourmoment_core::model::{ArticleFilters, ProcessStatus, Stage, TaskState, queues};
use yourmoment_core::{Error, lifecycle};

#[tokio::test]
async fn test_start_sets_running_and_expiry() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;
    let process_id = common::create_test_process(&pool, &seed, false, 45).await;

    lifecycle::start(&pool, process_id, 10).await.unwrap();

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.process_status().unwrap(), ProcessStatus::Running);

    let started_at = process.started_at.expect("started_at must be set");
    let expires_at = process.expires_at.expect("expires_at must be set");
    assert_eq!(expires_at - started_at, chrono::Duration::minutes(45));
    assert!(started_at <= Utc::now());

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_start_rejects_missing_process() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };

    let result = lifecycle::start(&pool, Uuid::new_v4(), 10).await;
    assert!(matches!(result, Err(Error::ProcessNotFound(_))));
}

#[tokio::test]
async fn test_start_rejects_empty_credentials() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;

    // Process without any credentials attached.
    let process_id = db::create_process(
        &pool,
        NewProcess {
            user_id: seed.user_id,
            name: "no credentials",
            description: "",
            llm_provider_id: seed.provider_id,
            credential_ids: &[],
            template_ids: &[seed.template_id],
            filters: ArticleFilters::default(),
            generate_only: false,
            max_duration_minutes: 10,
        },
    )
    .await
    .unwrap();

    let result = lifecycle::start(&pool, process_id, 10).await;
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    // The process never reaches running.
    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.process_status().unwrap(), ProcessStatus::Created);

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_start_rejects_foreign_provider() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;
    let other = common::seed_entities(&pool, &cipher).await;

    // Provider owned by a different user.
    let process_id = db::create_process(
        &pool,
        NewProcess {
            user_id: seed.user_id,
            name: "foreign provider",
            description: "",
            llm_provider_id: other.provider_id,
            credential_ids: &[seed.credential_id],
            template_ids: &[seed.template_id],
            filters: ArticleFilters::default(),
            generate_only: false,
            max_duration_minutes: 10,
        },
    )
    .await
    .unwrap();

    let result = lifecycle::start(&pool, process_id, 10).await;
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_start_enforces_user_quota() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;

    let first = common::create_test_process(&pool, &seed, false, 10).await;
    let second = common::create_test_process(&pool, &seed, false, 10).await;

    lifecycle::start(&pool, first, 1).await.unwrap();
    let result = lifecycle::start(&pool, second, 1).await;
    assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

    common::cleanup_process(&pool, first).await;
    common::cleanup_process(&pool, second).await;
}

#[tokio::test]
async fn test_stop_revokes_tasks_and_clears_slots() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;
    let process_id = common::create_test_process(&pool, &seed, false, 10).await;
    let broker = InMemoryBroker::new();

    lifecycle::start(&pool, process_id, 10).await.unwrap();

    // Simulate the coordinator having spawned two stage tasks.
    let discovery_task = broker
        .enqueue(queues::DISCOVERY, Stage::Discovery, process_id)
        .await
        .unwrap();
    let posting_task = broker
        .enqueue(queues::POSTING, Stage::Posting, process_id)
        .await
        .unwrap();
    db::set_stage_task_id(&pool, process_id, Stage::Discovery, discovery_task)
        .await
        .unwrap();
    db::set_stage_task_id(&pool, process_id, Stage::Posting, posting_task)
        .await
        .unwrap();

    lifecycle::stop(&pool, &broker, process_id).await.unwrap();

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.process_status().unwrap(), ProcessStatus::Stopped);
    assert_eq!(process.stop_reason.as_deref(), Some("manual"));
    assert!(process.stopped_at.is_some());
    for stage in Stage::ALL {
        assert_eq!(process.stage_task_id(stage), None);
    }

    assert_eq!(
        broker.task_state(discovery_task).await.unwrap(),
        Some(TaskState::Revoked)
    );
    assert_eq!(
        broker.task_state(posting_task).await.unwrap(),
        Some(TaskState::Revoked)
    );

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_stop_requires_running() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;
    let process_id = common::create_test_process(&pool, &seed, false, 10).await;
    let broker = InMemoryBroker::new();

    let result = lifecycle::stop(&pool, &broker, process_id).await;
    assert!(matches!(result, Err(Error::InvalidProcessState { .. })));

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_status_view_aggregates_pipeline() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let cipher = common::test_cipher();
    let seed = common::seed_entities(&pool, &cipher).await;
    let process_id = common::create_test_process(&pool, &seed, true, 10).await;

    let view = lifecycle::status(&pool, process_id).await.unwrap();
    assert_eq!(view.process.id, process_id);
    assert_eq!(view.pipeline.total(), 0);
    assert!(view.process.generate_only);

    common::cleanup_process(&pool, process_id).await;
}
