// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for yourmoment-monitor integration tests.
//!
//! Drives the real pipeline against Postgres with the in-memory broker
//! and the mock upstream/LLM adapters: one coordinator tick enqueues the
//! stage tasks, `drain` claims and executes them in order.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sqlx::PgPool;
use uuid::Uuid;

use yourmoment_core::broker::{Broker, InMemoryBroker};
use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db::{self, NewProcess};
use yourmoment_core::model::{ArticleFilters, queues};
use yourmoment_monitor::config::Config;
use yourmoment_monitor::coordinator::{Coordinator, CoordinatorConfig};
use yourmoment_monitor::executor::StageExecutor;
use yourmoment_monitor::llm::MockLlmClient;
use yourmoment_monitor::upstream::MockPortal;

/// Serializes tests that drive the coordinator/executor: both operate on
/// every running process in the shared database, so concurrent tests would
/// execute each other's processes against the wrong mocks.
pub static PIPELINE_MUTEX: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Helper macro to skip tests if database URL is not set.
#[macro_export]
macro_rules! skip_if_no_db {
    () => {
        if std::env::var("TEST_DATABASE_URL").is_err()
            && std::env::var("YOURMOMENT_DATABASE_URL").is_err()
        {
            eprintln!("Skipping test: TEST_DATABASE_URL or YOURMOMENT_DATABASE_URL not set");
            return;
        }
    };
}

/// Get a migrated database pool for testing.
pub async fn test_pool() -> Option<PgPool> {
    let database_url = std::env::var("TEST_DATABASE_URL")
        .or_else(|_| std::env::var("YOURMOMENT_DATABASE_URL"))
        .ok()?;
    let pool = PgPool::connect(&database_url).await.ok()?;
    yourmoment_core::migrations::run(&pool).await.ok()?;
    Some(pool)
}

/// Deterministic cipher for tests.
pub fn test_cipher() -> FieldCipher {
    FieldCipher::from_base64_key(&URL_SAFE_NO_PAD.encode([42u8; 32])).unwrap()
}

/// Monitor configuration without rate-limit delays, for fast tests.
pub fn test_config() -> Config {
    Config {
        preparation_rate_limit: Duration::from_secs(0),
        posting_rate_limit: Duration::from_secs(0),
        ai_comment_prefix: "[KI]".to_string(),
        ..Config::default()
    }
}

/// A fully wired test pipeline over mocks.
pub struct Pipeline {
    pub pool: PgPool,
    pub broker: Arc<InMemoryBroker>,
    pub portal: Arc<MockPortal>,
    pub llm: Arc<MockLlmClient>,
    pub coordinator: Coordinator,
    pub executor: StageExecutor,
}

impl Pipeline {
    /// Wire coordinator and executor over the given pool and mocks.
    pub fn new(pool: PgPool, portal: MockPortal, llm: MockLlmClient) -> Self {
        let broker = Arc::new(InMemoryBroker::new());
        let portal = Arc::new(portal);
        let llm = Arc::new(llm);
        let config = test_config();

        let coordinator = Coordinator::new(
            pool.clone(),
            broker.clone(),
            CoordinatorConfig::default(),
        );
        let executor = StageExecutor::new(
            pool.clone(),
            broker.clone(),
            portal.clone(),
            llm.clone(),
            test_cipher(),
            &config,
        );

        Self {
            pool,
            broker,
            portal,
            llm,
            coordinator,
            executor,
        }
    }

    /// One coordinator tick followed by a full drain of the stage queues.
    pub async fn tick_and_drain(&self) {
        self.coordinator.tick().await.expect("coordinator tick failed");
        self.drain().await;
    }

    /// Claim and execute stage tasks until the queues are empty.
    pub async fn drain(&self) {
        while let Some(task) = self
            .broker
            .claim(&queues::STAGES)
            .await
            .expect("claim failed")
        {
            self.executor.execute(task).await;
        }
    }
}

/// Seeded reference entities for one test.
pub struct Seed {
    pub user_id: Uuid,
    pub credential_id: Uuid,
    pub provider_id: Uuid,
    pub template_id: Uuid,
}

/// Create a user with one credential, one provider and one template.
pub async fn seed_entities(pool: &PgPool) -> Seed {
    let cipher = test_cipher();

    let user_id = db::create_user(
        pool,
        &format!("test-{}@example.com", Uuid::new_v4()),
        "argon2id$fixture",
    )
    .await
    .expect("Failed to create user");

    let credential_id = db::create_credential(
        pool,
        &cipher,
        user_id,
        "Klasse 4a",
        "schreiber01",
        "geheim-passwort",
    )
    .await
    .expect("Failed to create credential");

    let provider_id = db::create_provider(
        pool,
        &cipher,
        user_id,
        "mistral",
        "mistral-small-latest",
        "sk-test-key",
        0.7,
        256,
        false,
    )
    .await
    .expect("Failed to create provider");

    let template_id = db::create_template(
        pool,
        Some(user_id),
        "Lob und Ermunterung",
        "Du bist ein Schüler aus der 4. Klasse.",
        "Kommentiere {article_title} von {article_author}:\n{article_content}",
    )
    .await
    .expect("Failed to create template");

    Seed {
        user_id,
        credential_id,
        provider_id,
        template_id,
    }
}

/// Stop running test processes left behind by earlier aborted runs so
/// coordinator tick summaries only see the current test's process.
/// Callers hold [`PIPELINE_MUTEX`].
pub async fn stop_stale_processes(pool: &PgPool) {
    sqlx::query(
        r#"
        UPDATE monitoring_processes
        SET status = 'stopped', stop_reason = 'manual', stopped_at = NOW(),
            discovery_task_id = NULL, preparation_task_id = NULL,
            generation_task_id = NULL, posting_task_id = NULL
        WHERE status = 'running' AND name = 'test process'
        "#,
    )
    .execute(pool)
    .await
    .ok();
}

/// Create and start a monitoring process over the seeded entities.
pub async fn start_test_process(
    pool: &PgPool,
    seed: &Seed,
    generate_only: bool,
    max_duration_minutes: i32,
) -> Uuid {
    stop_stale_processes(pool).await;

    let process_id = db::create_process(
        pool,
        NewProcess {
            user_id: seed.user_id,
            name: "test process",
            description: "",
            llm_provider_id: seed.provider_id,
            credential_ids: &[seed.credential_id],
            template_ids: &[seed.template_id],
            filters: ArticleFilters::default(),
            generate_only,
            max_duration_minutes,
        },
    )
    .await
    .expect("Failed to create process");

    yourmoment_core::lifecycle::start(pool, process_id, 100)
        .await
        .expect("Failed to start process");

    process_id
}

/// Delete a process (work records cascade with it).
pub async fn cleanup_process(pool: &PgPool, process_id: Uuid) {
    sqlx::query("DELETE FROM monitoring_processes WHERE id = $1")
        .bind(process_id)
        .execute(pool)
        .await
        .ok();
}
