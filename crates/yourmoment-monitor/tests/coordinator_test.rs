// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Coordinator tests: single in-flight task per stage, re-spawn after
//! terminal states, broker outage fallback.

mod common;

use yourmoment_core::broker::Broker;
use yourmoment_core::db;
use yourmoment_core::model::{Stage, queues};
use yourmoment_monitor::llm::MockLlmClient;
use yourmoment_monitor::upstream::MockPortal;

#[tokio::test]
async fn test_tick_spawns_all_active_stages_once() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    let summary = pipeline.coordinator.tick().await.unwrap();
    assert_eq!(summary.spawned, 4);
    assert_eq!(summary.skipped, 0);

    // All four slots are populated and the ids resolve on the broker.
    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    for stage in Stage::ALL {
        let task_id = process
            .stage_task_id(stage)
            .expect("stage task id must be stored");
        assert!(
            pipeline
                .broker
                .task_state(task_id)
                .await
                .unwrap()
                .unwrap()
                .is_in_flight()
        );
    }

    // While tasks are pending, another tick spawns nothing: at most one
    // in-flight task per stage at any moment.
    let summary = pipeline.coordinator.tick().await.unwrap();
    assert_eq!(summary.spawned, 0);
    assert_eq!(summary.skipped, 4);
    assert_eq!(pipeline.broker.task_ids_for_process(process_id).await.len(), 4);

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_tick_skips_posting_for_generate_only() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, true, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    let summary = pipeline.coordinator.tick().await.unwrap();
    assert_eq!(summary.spawned, 3);

    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    assert_eq!(process.stage_task_id(Stage::Posting), None);

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_tick_respawns_after_terminal_states() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    pipeline.coordinator.tick().await.unwrap();

    // Drive every task to a terminal state.
    while let Some(task) = pipeline.broker.claim(&queues::STAGES).await.unwrap() {
        pipeline.broker.complete(task.task_id).await.unwrap();
    }

    let summary = pipeline.coordinator.tick().await.unwrap();
    assert_eq!(summary.spawned, 4, "terminal tasks must be replaced");

    // The stored ids now point at the fresh tasks.
    let process = db::get_process(&pool, process_id).await.unwrap().unwrap();
    for stage in Stage::ALL {
        let task_id = process.stage_task_id(stage).unwrap();
        assert!(
            pipeline
                .broker
                .task_state(task_id)
                .await
                .unwrap()
                .unwrap()
                .is_in_flight()
        );
    }

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_tick_resumes_after_lost_task_ids() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    pipeline.coordinator.tick().await.unwrap();

    // Simulate a broker that lost its tasks: fresh broker, stale stored ids.
    let fresh = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());
    let summary = fresh.coordinator.tick().await.unwrap();
    assert_eq!(
        summary.spawned, 4,
        "stored ids unknown to the broker must be treated as terminal"
    );

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_tick_skips_spawn_on_broker_outage() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    pipeline.coordinator.tick().await.unwrap();
    let before = pipeline.broker.task_ids_for_process(process_id).await.len();

    // Inspection fails: stages with stored ids are treated as in flight.
    pipeline.broker.set_inspection_failure(true);
    let summary = pipeline.coordinator.tick().await.unwrap();
    assert_eq!(summary.spawned, 0);
    assert_eq!(summary.skipped, 4);

    pipeline.broker.set_inspection_failure(false);
    assert_eq!(
        pipeline.broker.task_ids_for_process(process_id).await.len(),
        before,
        "no duplicate tasks during an outage"
    );

    common::cleanup_process(&pool, process_id).await;
}

#[tokio::test]
async fn test_tick_ignores_non_running_processes() {
    skip_if_no_db!();
    let Some(pool) = common::test_pool().await else {
        return;
    };
    let _guard = common::PIPELINE_MUTEX.lock().await;

    let seed = common::seed_entities(&pool).await;
    let process_id = common::start_test_process(&pool, &seed, false, 10).await;
    let pipeline = common::Pipeline::new(pool.clone(), MockPortal::new(), MockLlmClient::default());

    yourmoment_core::lifecycle::stop(&pool, pipeline.broker.as_ref(), process_id)
        .await
        .unwrap();

    pipeline.coordinator.tick().await.unwrap();
    assert!(
        pipeline
            .broker
            .task_ids_for_process(process_id)
            .await
            .is_empty(),
        "stopped processes get no stage tasks"
    );

    common::cleanup_process(&pool, process_id).await;
}
