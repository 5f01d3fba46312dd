// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Common test infrastructure for yourmoment-core integration tests.

#![allow(dead_code)]

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sqlx::PgPool;
use uuid::Uuid;

use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db::{self, NewProcess};
use yourmoment_core::model::ArticleFilters;

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

/// Seeded reference entities for one test.
pub struct Seed {
    pub user_id: Uuid,
    pub credential_id: Uuid,
    pub provider_id: Uuid,
    pub template_id: Uuid,
}

/// Create a user with one credential, one provider and one template.
pub async fn seed_entities(pool: &PgPool, cipher: &FieldCipher) -> Seed {
    let user_id = db::create_user(
        pool,
        &format!("test-{}@example.com", Uuid::new_v4()),
        "argon2id$fixture",
    )
    .await
    .expect("Failed to create user");

    let credential_id = db::create_credential(
        pool,
        cipher,
        user_id,
        "Klasse 4a",
        "schreiber01",
        "geheim-passwort",
    )
    .await
    .expect("Failed to create credential");

    let provider_id = db::create_provider(
        pool,
        cipher,
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
        "Du kommentierst Texte von Primarschulkindern.",
        "Schreibe einen kurzen Kommentar zu {article_title} von {article_author}:\n{article_content}",
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

/// Create a monitoring process over the seeded entities.
pub async fn create_test_process(
    pool: &PgPool,
    seed: &Seed,
    generate_only: bool,
    max_duration_minutes: i32,
) -> Uuid {
    db::create_process(
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
    .expect("Failed to create process")
}

/// Delete a process (work records cascade with it).
pub async fn cleanup_process(pool: &PgPool, process_id: Uuid) {
    sqlx::query("DELETE FROM monitoring_processes WHERE id = $1")
        .bind(process_id)
        .execute(pool)
        .await
        .ok();
}
