// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Generation stage worker.
//!
//! Renders the prompt for every record in `prepared` and calls the LLM
//! backend. Provider configurations, templates and credential display
//! names are loaded and cached once per run, with API keys decrypted a
//! single time. The LLM call is the long-latency path and runs with no
//! database connection checked out.
//!
//! Transient backend failures (rate limits, 5xx) leave the record in
//! `prepared` so the next coordinator tick retries it; permanent failures
//! and validation failures move the record to `failed`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db;
use yourmoment_core::model::{
    CredentialSnapshot, ProviderSnapshot, RecordStatus, Stage, TemplateSnapshot,
};

use crate::Result;
use crate::llm::{GenerationRequest, LlmClient};
use crate::prompt::{self, PromptContext};

use super::{RevocationProbe, StageOutcome};

/// Single-pass generation worker.
pub struct GenerationWorker {
    pool: PgPool,
    llm: Arc<dyn LlmClient>,
    cipher: FieldCipher,
    ai_comment_prefix: String,
}

impl GenerationWorker {
    /// Create a worker over the shared pool and LLM client.
    pub fn new(
        pool: PgPool,
        llm: Arc<dyn LlmClient>,
        cipher: FieldCipher,
        ai_comment_prefix: String,
    ) -> Self {
        Self {
            pool,
            llm,
            cipher,
            ai_comment_prefix,
        }
    }

    /// Run one generation pass for a process.
    pub async fn run(&self, process_id: Uuid, probe: &RevocationProbe) -> Result<StageOutcome> {
        // Snapshot the batch and collect the referenced configuration ids.
        let records =
            db::list_records_in_status(&self.pool, process_id, RecordStatus::Prepared).await?;
        if records.is_empty() {
            return Ok(StageOutcome::default());
        }

        let provider_ids = distinct(records.iter().map(|r| r.llm_provider_id));
        let template_ids = distinct(records.iter().map(|r| r.template_id));
        let credential_ids = distinct(records.iter().map(|r| r.credential_id));

        // Cache reference data in memory; API keys are decrypted once per run.
        let providers: HashMap<Uuid, ProviderSnapshot> =
            db::load_providers(&self.pool, &self.cipher, &provider_ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect();
        let templates: HashMap<Uuid, TemplateSnapshot> =
            db::load_templates(&self.pool, &template_ids)
                .await?
                .into_iter()
                .map(|t| (t.id, t))
                .collect();
        let credentials: HashMap<Uuid, CredentialSnapshot> =
            db::load_credentials(&self.pool, &self.cipher, &credential_ids)
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();

        info!(
            process_id = %process_id,
            records = records.len(),
            providers = providers.len(),
            templates = templates.len(),
            "Generation pass started"
        );

        let mut outcome = StageOutcome::default();

        for record in &records {
            if probe.is_revoked().await {
                info!(process_id = %process_id, "Generation revoked, stopping");
                break;
            }

            let Some(provider) = providers.get(&record.llm_provider_id) else {
                self.fail_record(
                    process_id,
                    record.id,
                    &mut outcome,
                    "LLM provider configuration is missing or undecryptable",
                )
                .await?;
                continue;
            };
            let Some(template) = templates.get(&record.template_id) else {
                self.fail_record(process_id, record.id, &mut outcome, "prompt template is missing")
                    .await?;
                continue;
            };

            let nickname = credentials
                .get(&record.credential_id)
                .map(|c| c.display_name.as_str())
                .unwrap_or_default();
            let context = PromptContext::from_record(record, nickname, Utc::now());
            let user_prompt = prompt::render(&template.user_prompt_template, &context);

            let request = GenerationRequest {
                provider: provider.clone(),
                system_prompt: template.system_prompt.clone(),
                user_prompt,
            };

            // The long-latency path; wall time is measured around the call.
            let started = Instant::now();
            match self.llm.generate(&request).await {
                Ok(generation) => {
                    let elapsed_ms = started.elapsed().as_millis() as i64;
                    match prompt::finalize_comment(&generation.text, &self.ai_comment_prefix) {
                        Ok(comment) => {
                            let advanced = db::mark_record_generated(
                                &self.pool,
                                record.id,
                                &comment,
                                &provider.model_name,
                                &provider.vendor.to_string(),
                                generation.total_tokens(),
                                elapsed_ms,
                            )
                            .await?;
                            if advanced {
                                outcome.processed += 1;
                            }
                        }
                        Err(e) => {
                            self.fail_record(process_id, record.id, &mut outcome, &e.to_string())
                                .await?;
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    // The record stays prepared; the next tick retries.
                    error!(
                        record_id = %record.id,
                        error = %e,
                        "Transient generation failure, leaving record for retry"
                    );
                    outcome.failed += 1;
                    db::increment_stage_errors(&self.pool, process_id, Stage::Generation, 1)
                        .await?;
                }
                Err(e) => {
                    self.fail_record(process_id, record.id, &mut outcome, &e.to_string())
                        .await?;
                }
            }
        }

        db::increment_stage_counter(
            &self.pool,
            process_id,
            Stage::Generation,
            outcome.processed as i32,
        )
        .await?;

        info!(
            process_id = %process_id,
            generated = outcome.processed,
            failed = outcome.failed,
            "Generation pass finished"
        );

        Ok(outcome)
    }

    async fn fail_record(
        &self,
        process_id: Uuid,
        record_id: Uuid,
        outcome: &mut StageOutcome,
        message: &str,
    ) -> Result<()> {
        error!(record_id = %record_id, error = %message, "Generation failed for record");
        db::mark_record_failed(&self.pool, record_id, RecordStatus::Prepared, message).await?;
        db::increment_stage_errors(&self.pool, process_id, Stage::Generation, 1).await?;
        outcome.failed += 1;
        Ok(())
    }
}

fn distinct(ids: impl Iterator<Item = Uuid>) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = ids.collect();
    ids.sort();
    ids.dedup();
    ids
}
