// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Persistence operations for yourmoment-core.
//!
//! Free functions over `&PgPool`, each a single short round trip (or one
//! short transaction for the batch insert). Callers snapshot results into
//! owned structs before doing any external I/O; no function here performs
//! I/O beyond the database itself.
//!
//! Stage transitions are guarded (`WHERE id = $1 AND status = $2`) and
//! report through their return value whether the guard matched, so racing
//! duplicate workers degrade to no-ops. Counter updates use atomic
//! `SET c = c + $delta` arithmetic.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::crypto::FieldCipher;
use crate::model::{
    ArticleContent, ArticleFilters, CredentialSnapshot, MonitoringProcess, PipelineCounts,
    ProcessConfig, ProspectiveRecord, ProviderSnapshot, RecordStatus, Stage, TemplateSnapshot,
    WorkRecord,
};
use crate::{Error, Result};

const PROCESS_COLUMNS: &str = r#"
    id, user_id, name, description, llm_provider_id,
    tab_filters, category_filter, keyword_filters,
    generate_only, max_duration_minutes, status, stop_reason,
    started_at, expires_at, stopped_at,
    discovery_task_id, preparation_task_id, generation_task_id, posting_task_id,
    articles_discovered, articles_prepared, comments_generated, comments_posted,
    errors_discovery, errors_preparation, errors_generation, errors_posting,
    error_message, created_at, updated_at
"#;

const RECORD_COLUMNS: &str = r#"
    id, process_id, user_id, credential_id, template_id, llm_provider_id,
    upstream_article_id, article_title, article_author, article_category,
    article_url, article_edited_at, article_content, article_raw_html,
    article_published_at, comment_content, upstream_comment_id,
    ai_model_name, ai_vendor_tag, generation_tokens, generation_time_ms,
    status, error_message, retry_count, article_scraped_at, posted_at,
    failed_at, created_at, updated_at
"#;

// ============================================================================
// Users and Reference Entities
// ============================================================================

/// Create a user. Returns the new id.
pub async fn create_user(pool: &PgPool, email: &str, password_hash: &str) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email, password_hash) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(email)
        .bind(password_hash)
        .execute(pool)
        .await?;
    Ok(id)
}

/// Create an upstream credential, encrypting the password at the mapper
/// boundary. Returns the new id.
pub async fn create_credential(
    pool: &PgPool,
    cipher: &FieldCipher,
    user_id: Uuid,
    display_name: &str,
    username: &str,
    password: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let password_encrypted = cipher.encrypt(password)?;

    sqlx::query(
        r#"
        INSERT INTO upstream_credentials (id, user_id, display_name, username, password_encrypted)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(display_name)
    .bind(username)
    .bind(password_encrypted)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Create an LLM provider configuration, encrypting the API key. Returns
/// the new id.
#[allow(clippy::too_many_arguments)]
pub async fn create_provider(
    pool: &PgPool,
    cipher: &FieldCipher,
    user_id: Uuid,
    vendor_tag: &str,
    model_name: &str,
    api_key: &str,
    temperature: f64,
    max_tokens: i32,
    json_mode: bool,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    let api_key_encrypted = cipher.encrypt(api_key)?;

    sqlx::query(
        r#"
        INSERT INTO llm_providers
            (id, user_id, vendor_tag, model_name, api_key_encrypted, temperature, max_tokens, json_mode)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(vendor_tag)
    .bind(model_name)
    .bind(api_key_encrypted)
    .bind(temperature)
    .bind(max_tokens)
    .bind(json_mode)
    .execute(pool)
    .await?;

    Ok(id)
}

/// Create a prompt template. Returns the new id.
pub async fn create_template(
    pool: &PgPool,
    owner_user_id: Option<Uuid>,
    name: &str,
    system_prompt: &str,
    user_prompt_template: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO prompt_templates (id, owner_user_id, name, system_prompt, user_prompt_template, is_system)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(id)
    .bind(owner_user_id)
    .bind(name)
    .bind(system_prompt)
    .bind(user_prompt_template)
    .bind(owner_user_id.is_none())
    .execute(pool)
    .await?;

    Ok(id)
}

// ============================================================================
// Monitoring Processes
// ============================================================================

/// Parameters for creating a monitoring process.
#[derive(Debug, Clone)]
pub struct NewProcess<'a> {
    /// Owning user.
    pub user_id: Uuid,
    /// Human-readable name.
    pub name: &'a str,
    /// Free-form description.
    pub description: &'a str,
    /// Provider used for generation.
    pub llm_provider_id: Uuid,
    /// Credential identities (non-empty, validated at start).
    pub credential_ids: &'a [Uuid],
    /// Prompt templates (non-empty, validated at start).
    pub template_ids: &'a [Uuid],
    /// Upstream filters.
    pub filters: ArticleFilters,
    /// Whether posting is disabled.
    pub generate_only: bool,
    /// Wall-time budget in minutes.
    pub max_duration_minutes: i32,
}

/// Create a monitoring process with its credential and template junctions.
pub async fn create_process(pool: &PgPool, new: NewProcess<'_>) -> Result<Uuid> {
    let id = Uuid::new_v4();

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        INSERT INTO monitoring_processes
            (id, user_id, name, description, llm_provider_id,
             tab_filters, category_filter, keyword_filters,
             generate_only, max_duration_minutes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(id)
    .bind(new.user_id)
    .bind(new.name)
    .bind(new.description)
    .bind(new.llm_provider_id)
    .bind(&new.filters.tabs)
    .bind(&new.filters.category)
    .bind(&new.filters.keywords)
    .bind(new.generate_only)
    .bind(new.max_duration_minutes)
    .execute(&mut *tx)
    .await?;

    for credential_id in new.credential_ids {
        sqlx::query(
            "INSERT INTO monitoring_process_credentials (process_id, credential_id) VALUES ($1, $2)",
        )
        .bind(id)
        .bind(credential_id)
        .execute(&mut *tx)
        .await?;
    }

    for template_id in new.template_ids {
        sqlx::query(
            "INSERT INTO monitoring_process_templates (process_id, template_id) VALUES ($1, $2)",
        )
        .bind(id)
        .bind(template_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(id)
}

/// Get a process by id.
pub async fn get_process(pool: &PgPool, process_id: Uuid) -> Result<Option<MonitoringProcess>> {
    let process = sqlx::query_as::<_, MonitoringProcess>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM monitoring_processes WHERE id = $1"
    ))
    .bind(process_id)
    .fetch_optional(pool)
    .await?;

    Ok(process)
}

/// List all running processes.
pub async fn list_running_processes(pool: &PgPool) -> Result<Vec<MonitoringProcess>> {
    let processes = sqlx::query_as::<_, MonitoringProcess>(&format!(
        "SELECT {PROCESS_COLUMNS} FROM monitoring_processes WHERE status = 'running' ORDER BY created_at"
    ))
    .fetch_all(pool)
    .await?;

    Ok(processes)
}

/// List running processes whose wall-time budget is exhausted.
pub async fn list_expired_processes(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<MonitoringProcess>> {
    let processes = sqlx::query_as::<_, MonitoringProcess>(&format!(
        r#"
        SELECT {PROCESS_COLUMNS} FROM monitoring_processes
        WHERE status = 'running' AND expires_at IS NOT NULL AND expires_at <= $1
        ORDER BY expires_at
        "#
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;

    Ok(processes)
}

/// List non-running processes that still carry stage task ids.
///
/// The timeout enforcer sweeps these so the invariant "not running implies
/// no stored task ids" holds within one enforcement tick.
pub async fn list_processes_with_stale_tasks(pool: &PgPool) -> Result<Vec<MonitoringProcess>> {
    let processes = sqlx::query_as::<_, MonitoringProcess>(&format!(
        r#"
        SELECT {PROCESS_COLUMNS} FROM monitoring_processes
        WHERE status <> 'running'
          AND (discovery_task_id IS NOT NULL
               OR preparation_task_id IS NOT NULL
               OR generation_task_id IS NOT NULL
               OR posting_task_id IS NOT NULL)
        "#
    ))
    .fetch_all(pool)
    .await?;

    Ok(processes)
}

/// Count running processes owned by a user.
pub async fn count_running_for_user(pool: &PgPool, user_id: Uuid) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM monitoring_processes WHERE user_id = $1 AND status = 'running'",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Transition a process into running with its expiry computed. Guarded on
/// the current status; returns false when the guard did not match.
pub async fn mark_process_running(
    pool: &PgPool,
    process_id: Uuid,
    started_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE monitoring_processes
        SET status = 'running', started_at = $2, expires_at = $3,
            stopped_at = NULL, stop_reason = NULL, error_message = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('created', 'stopped')
        "#,
    )
    .bind(process_id)
    .bind(started_at)
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stop a running process and clear its stage task slots in one statement.
/// Returns false when the process was not running.
pub async fn mark_process_stopped(pool: &PgPool, process_id: Uuid, reason: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE monitoring_processes
        SET status = 'stopped', stop_reason = $2, stopped_at = NOW(),
            discovery_task_id = NULL, preparation_task_id = NULL,
            generation_task_id = NULL, posting_task_id = NULL,
            updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(process_id)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a process-level configuration failure.
pub async fn mark_process_failed(pool: &PgPool, process_id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE monitoring_processes
        SET status = 'failed', error_message = $2, stopped_at = NOW(), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(process_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist a freshly enqueued task id in the stage's slot.
pub async fn set_stage_task_id(
    pool: &PgPool,
    process_id: Uuid,
    stage: Stage,
    task_id: Uuid,
) -> Result<()> {
    let column = stage_task_column(stage);
    sqlx::query(&format!(
        "UPDATE monitoring_processes SET {column} = $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(process_id)
    .bind(task_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Clear all four stage task slots.
pub async fn clear_stage_task_ids(pool: &PgPool, process_id: Uuid) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE monitoring_processes
        SET discovery_task_id = NULL, preparation_task_id = NULL,
            generation_task_id = NULL, posting_task_id = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(process_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Add to a stage's progress counter.
pub async fn increment_stage_counter(
    pool: &PgPool,
    process_id: Uuid,
    stage: Stage,
    delta: i32,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }

    let column = match stage {
        Stage::Discovery => "articles_discovered",
        Stage::Preparation => "articles_prepared",
        Stage::Generation => "comments_generated",
        Stage::Posting => "comments_posted",
    };

    sqlx::query(&format!(
        "UPDATE monitoring_processes SET {column} = {column} + $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(process_id)
    .bind(delta)
    .execute(pool)
    .await?;

    Ok(())
}

/// Add to a stage's error counter.
pub async fn increment_stage_errors(
    pool: &PgPool,
    process_id: Uuid,
    stage: Stage,
    delta: i32,
) -> Result<()> {
    if delta == 0 {
        return Ok(());
    }

    let column = match stage {
        Stage::Discovery => "errors_discovery",
        Stage::Preparation => "errors_preparation",
        Stage::Generation => "errors_generation",
        Stage::Posting => "errors_posting",
    };

    sqlx::query(&format!(
        "UPDATE monitoring_processes SET {column} = {column} + $2, updated_at = NOW() WHERE id = $1"
    ))
    .bind(process_id)
    .bind(delta)
    .execute(pool)
    .await?;

    Ok(())
}

fn stage_task_column(stage: Stage) -> &'static str {
    match stage {
        Stage::Discovery => "discovery_task_id",
        Stage::Preparation => "preparation_task_id",
        Stage::Generation => "generation_task_id",
        Stage::Posting => "posting_task_id",
    }
}

// ============================================================================
// Configuration Snapshots
// ============================================================================

/// Read a process configuration snapshot in one short session pattern:
/// process row plus joined credential and template id lists.
pub async fn get_process_config(pool: &PgPool, process_id: Uuid) -> Result<ProcessConfig> {
    let process = get_process(pool, process_id)
        .await?
        .ok_or(Error::ProcessNotFound(process_id))?;

    let credential_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT c.credential_id
        FROM monitoring_process_credentials c
        JOIN upstream_credentials u ON u.id = c.credential_id
        WHERE c.process_id = $1 AND u.is_active
        "#,
    )
    .bind(process_id)
    .fetch_all(pool)
    .await?;

    let template_ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT template_id FROM monitoring_process_templates WHERE process_id = $1")
            .bind(process_id)
            .fetch_all(pool)
            .await?;

    Ok(ProcessConfig {
        process_id,
        user_id: process.user_id,
        credential_ids,
        template_ids,
        llm_provider_id: process.llm_provider_id,
        filters: process.filters(),
        generate_only: process.generate_only,
    })
}

/// Load and decrypt upstream credentials by id. Rows that fail to decrypt
/// are skipped; the caller sees them as missing and fails the affected
/// records individually.
pub async fn load_credentials(
    pool: &PgPool,
    cipher: &FieldCipher,
    ids: &[Uuid],
) -> Result<Vec<CredentialSnapshot>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(Uuid, String, String, String)> = sqlx::query_as(
        r#"
        SELECT id, display_name, username, password_encrypted
        FROM upstream_credentials
        WHERE id = ANY($1) AND is_active
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for (id, display_name, username, password_encrypted) in rows {
        match cipher.decrypt(&password_encrypted) {
            Ok(password) => snapshots.push(CredentialSnapshot {
                id,
                display_name,
                username,
                password,
            }),
            Err(e) => {
                tracing::error!(credential_id = %id, error = %e, "Failed to decrypt credential");
            }
        }
    }

    Ok(snapshots)
}

/// Load and decrypt LLM provider configurations by id.
pub async fn load_providers(
    pool: &PgPool,
    cipher: &FieldCipher,
    ids: &[Uuid],
) -> Result<Vec<ProviderSnapshot>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(Uuid, String, String, String, f64, i32, bool)> = sqlx::query_as(
        r#"
        SELECT id, vendor_tag, model_name, api_key_encrypted, temperature, max_tokens, json_mode
        FROM llm_providers
        WHERE id = ANY($1) AND is_active
        "#,
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    let mut snapshots = Vec::with_capacity(rows.len());
    for (id, vendor_tag, model_name, api_key_encrypted, temperature, max_tokens, json_mode) in rows
    {
        let vendor = vendor_tag
            .parse()
            .map_err(|_| Error::UnknownStatus(vendor_tag))?;
        match cipher.decrypt(&api_key_encrypted) {
            Ok(api_key) => snapshots.push(ProviderSnapshot {
                id,
                vendor,
                model_name,
                api_key,
                temperature,
                max_tokens,
                json_mode,
            }),
            Err(e) => {
                tracing::error!(provider_id = %id, error = %e, "Failed to decrypt provider API key");
            }
        }
    }

    Ok(snapshots)
}

/// Load prompt templates by id.
pub async fn load_templates(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<TemplateSnapshot>> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(Uuid, String, String)> = sqlx::query_as(
        "SELECT id, system_prompt, user_prompt_template FROM prompt_templates WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(id, system_prompt, user_prompt_template)| TemplateSnapshot {
            id,
            system_prompt,
            user_prompt_template,
        })
        .collect())
}

/// Record that credentials were just used upstream.
pub async fn touch_credentials(pool: &PgPool, ids: &[Uuid]) -> Result<()> {
    if ids.is_empty() {
        return Ok(());
    }

    sqlx::query("UPDATE upstream_credentials SET last_used_at = NOW() WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?;

    Ok(())
}

/// Check that a provider exists, is active and belongs to the user.
pub async fn provider_belongs_to_user(
    pool: &PgPool,
    provider_id: Uuid,
    user_id: Uuid,
) -> Result<bool> {
    let exists: Option<i32> = sqlx::query_scalar(
        "SELECT 1 FROM llm_providers WHERE id = $1 AND user_id = $2 AND is_active",
    )
    .bind(provider_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(exists.is_some())
}

// ============================================================================
// Work Records
// ============================================================================

/// Batch-insert prospective records from discovery.
///
/// One transaction; every insert is conditional on the record identity
/// `(process_id, credential_id, template_id, upstream_article_id)` so
/// re-discovery is a silent no-op. Returns the number of rows actually
/// inserted.
pub async fn insert_discovered_batch(
    pool: &PgPool,
    records: &[ProspectiveRecord],
) -> Result<u64> {
    if records.is_empty() {
        return Ok(0);
    }

    let mut inserted = 0u64;
    let mut tx = pool.begin().await?;

    for record in records {
        let result = sqlx::query(
            r#"
            INSERT INTO work_records
                (id, process_id, user_id, credential_id, template_id, llm_provider_id,
                 upstream_article_id, article_title, article_author, article_category,
                 article_url, article_edited_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 'discovered')
            ON CONFLICT ON CONSTRAINT work_records_identity DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.process_id)
        .bind(record.user_id)
        .bind(record.credential_id)
        .bind(record.template_id)
        .bind(record.llm_provider_id)
        .bind(&record.meta.id)
        .bind(&record.meta.title)
        .bind(&record.meta.author)
        .bind(&record.meta.category)
        .bind(&record.meta.url)
        .bind(record.meta.edited_at)
        .execute(&mut *tx)
        .await?;

        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Get a work record by id.
pub async fn get_record(pool: &PgPool, record_id: Uuid) -> Result<Option<WorkRecord>> {
    let record = sqlx::query_as::<_, WorkRecord>(&format!(
        "SELECT {RECORD_COLUMNS} FROM work_records WHERE id = $1"
    ))
    .bind(record_id)
    .fetch_optional(pool)
    .await?;

    Ok(record)
}

/// Snapshot all records of a process in a given status, oldest first.
pub async fn list_records_in_status(
    pool: &PgPool,
    process_id: Uuid,
    status: RecordStatus,
) -> Result<Vec<WorkRecord>> {
    let records = sqlx::query_as::<_, WorkRecord>(&format!(
        r#"
        SELECT {RECORD_COLUMNS} FROM work_records
        WHERE process_id = $1 AND status = $2
        ORDER BY created_at
        "#
    ))
    .bind(process_id)
    .bind(status.to_string())
    .fetch_all(pool)
    .await?;

    Ok(records)
}

/// Guarded transition discovered → prepared with the fetched content.
/// Returns false when the record was not in discovered.
pub async fn mark_record_prepared(
    pool: &PgPool,
    record_id: Uuid,
    content: &ArticleContent,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE work_records
        SET article_content = $2, article_raw_html = $3, article_published_at = $4,
            article_scraped_at = NOW(), status = 'prepared', updated_at = NOW()
        WHERE id = $1 AND status = 'discovered'
        "#,
    )
    .bind(record_id)
    .bind(&content.content)
    .bind(&content.raw_html)
    .bind(content.published_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded transition prepared → generated with the generation result.
/// Returns false when the record was not in prepared.
#[allow(clippy::too_many_arguments)]
pub async fn mark_record_generated(
    pool: &PgPool,
    record_id: Uuid,
    comment_content: &str,
    model_name: &str,
    vendor_tag: &str,
    generation_tokens: Option<i32>,
    generation_time_ms: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE work_records
        SET comment_content = $2, ai_model_name = $3, ai_vendor_tag = $4,
            generation_tokens = $5, generation_time_ms = $6,
            status = 'generated', updated_at = NOW()
        WHERE id = $1 AND status = 'prepared'
        "#,
    )
    .bind(record_id)
    .bind(comment_content)
    .bind(model_name)
    .bind(vendor_tag)
    .bind(generation_tokens)
    .bind(generation_time_ms)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded transition generated → posted with the idempotency marker.
/// Returns false when the record was not in generated.
pub async fn mark_record_posted(pool: &PgPool, record_id: Uuid, marker: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE work_records
        SET upstream_comment_id = $2, posted_at = NOW(), error_message = NULL,
            status = 'posted', updated_at = NOW()
        WHERE id = $1 AND status = 'generated'
        "#,
    )
    .bind(record_id)
    .bind(marker)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded terminal transition into failed. The guard keeps failure writes
/// from clobbering a record another worker already advanced.
pub async fn mark_record_failed(
    pool: &PgPool,
    record_id: Uuid,
    from_status: RecordStatus,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE work_records
        SET status = 'failed', error_message = $3, failed_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(record_id)
    .bind(from_status.to_string())
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Guarded terminal failure that also counts the attempt, used by the
/// preparation stage.
pub async fn mark_record_failed_with_retry(
    pool: &PgPool,
    record_id: Uuid,
    from_status: RecordStatus,
    error: &str,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE work_records
        SET status = 'failed', error_message = $3, failed_at = NOW(),
            retry_count = retry_count + 1, updated_at = NOW()
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(record_id)
    .bind(from_status.to_string())
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Count a transient posting failure. The record stays generated so the
/// next posting task retries it. Returns the new retry count, or None when
/// the record was no longer in generated.
pub async fn bump_posting_retry(
    pool: &PgPool,
    record_id: Uuid,
    error: &str,
) -> Result<Option<i32>> {
    let retry_count: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE work_records
        SET retry_count = retry_count + 1, error_message = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'generated'
        RETURNING retry_count
        "#,
    )
    .bind(record_id)
    .bind(error)
    .fetch_optional(pool)
    .await?;

    Ok(retry_count)
}

/// Aggregate work record counts per status for one process.
pub async fn pipeline_counts(pool: &PgPool, process_id: Uuid) -> Result<PipelineCounts> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT status, COUNT(*) FROM work_records WHERE process_id = $1 GROUP BY status",
    )
    .bind(process_id)
    .fetch_all(pool)
    .await?;

    let mut counts = PipelineCounts::default();
    for (status, count) in rows {
        match status.parse::<RecordStatus>() {
            Ok(RecordStatus::Discovered) => counts.discovered = count,
            Ok(RecordStatus::Prepared) => counts.prepared = count,
            Ok(RecordStatus::Generated) => counts.generated = count,
            Ok(RecordStatus::Posted) => counts.posted = count,
            Ok(RecordStatus::Failed) => counts.failed = count,
            Err(_) => return Err(Error::UnknownStatus(status)),
        }
    }

    Ok(counts)
}
