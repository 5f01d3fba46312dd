// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Posting stage worker.
//!
//! Submits generated comments upstream. The upstream returns no stable
//! comment identifier, so every successful post is recorded under a
//! deterministic idempotency marker derived from the record identity.
//!
//! Transient failures leave the record in `generated` with a bumped retry
//! count; the coordinator's next tick spawns a fresh posting task that
//! retries it. Once the retry budget is exhausted the record fails.
//! Permanent failures (authorization rejected, malformed payload) fail
//! the record directly.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db;
use yourmoment_core::model::{CredentialSnapshot, RecordStatus, Stage, idempotency_marker};

use crate::Result;
use crate::upstream::UpstreamPortal;

use super::{RevocationProbe, StageOutcome};

/// Single-pass posting worker.
pub struct PostingWorker {
    pool: PgPool,
    portal: Arc<dyn UpstreamPortal>,
    cipher: FieldCipher,
    rate_limit: Duration,
    max_retries: i32,
}

impl PostingWorker {
    /// Create a worker over the shared pool and portal.
    pub fn new(
        pool: PgPool,
        portal: Arc<dyn UpstreamPortal>,
        cipher: FieldCipher,
        rate_limit: Duration,
        max_retries: i32,
    ) -> Self {
        Self {
            pool,
            portal,
            cipher,
            rate_limit,
            max_retries,
        }
    }

    /// Run one posting pass for a process.
    pub async fn run(&self, process_id: Uuid, probe: &RevocationProbe) -> Result<StageOutcome> {
        // Snapshot the batch, then cache decrypted credentials once per run.
        let records =
            db::list_records_in_status(&self.pool, process_id, RecordStatus::Generated).await?;
        if records.is_empty() {
            return Ok(StageOutcome::default());
        }

        let credential_ids: Vec<Uuid> = {
            let mut ids: Vec<Uuid> = records.iter().map(|r| r.credential_id).collect();
            ids.sort();
            ids.dedup();
            ids
        };
        let credentials: HashMap<Uuid, CredentialSnapshot> =
            db::load_credentials(&self.pool, &self.cipher, &credential_ids)
                .await?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();

        info!(
            process_id = %process_id,
            records = records.len(),
            "Posting pass started"
        );

        let mut outcome = StageOutcome::default();
        let mut used_credentials: Vec<Uuid> = Vec::new();
        let mut first_post = true;

        for record in &records {
            if probe.is_revoked().await {
                info!(process_id = %process_id, "Posting revoked, stopping");
                break;
            }

            let Some(comment) = record.comment_content.as_deref() else {
                db::mark_record_failed(
                    &self.pool,
                    record.id,
                    RecordStatus::Generated,
                    "record reached posting without comment content",
                )
                .await?;
                outcome.failed += 1;
                db::increment_stage_errors(&self.pool, process_id, Stage::Posting, 1).await?;
                continue;
            };

            let Some(credential) = credentials.get(&record.credential_id) else {
                db::mark_record_failed(
                    &self.pool,
                    record.id,
                    RecordStatus::Generated,
                    &format!(
                        "credential {} is missing, inactive or undecryptable",
                        record.credential_id
                    ),
                )
                .await?;
                outcome.failed += 1;
                db::increment_stage_errors(&self.pool, process_id, Stage::Posting, 1).await?;
                continue;
            };

            if !first_post {
                tokio::time::sleep(self.rate_limit).await;
            }
            first_post = false;

            // The submission runs with no DB session held.
            match self
                .portal
                .post_comment(credential, &record.upstream_article_id, comment)
                .await
            {
                Ok(()) => {
                    let marker =
                        idempotency_marker(process_id, &record.upstream_article_id, record.id);
                    if db::mark_record_posted(&self.pool, record.id, &marker).await? {
                        outcome.processed += 1;
                        if !used_credentials.contains(&credential.id) {
                            used_credentials.push(credential.id);
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    error!(
                        record_id = %record.id,
                        article_id = %record.upstream_article_id,
                        error = %e,
                        "Transient posting failure"
                    );
                    outcome.failed += 1;
                    db::increment_stage_errors(&self.pool, process_id, Stage::Posting, 1).await?;

                    match db::bump_posting_retry(&self.pool, record.id, &e.to_string()).await? {
                        Some(retries) if retries >= self.max_retries => {
                            db::mark_record_failed(
                                &self.pool,
                                record.id,
                                RecordStatus::Generated,
                                &format!("posting retries exhausted after {retries} attempts: {e}"),
                            )
                            .await?;
                        }
                        _ => {
                            // Still generated; a later posting task retries.
                        }
                    }
                }
                Err(e) => {
                    error!(
                        record_id = %record.id,
                        article_id = %record.upstream_article_id,
                        error = %e,
                        "Permanent posting failure"
                    );
                    db::mark_record_failed(
                        &self.pool,
                        record.id,
                        RecordStatus::Generated,
                        &e.to_string(),
                    )
                    .await?;
                    outcome.failed += 1;
                    db::increment_stage_errors(&self.pool, process_id, Stage::Posting, 1).await?;
                }
            }
        }

        db::increment_stage_counter(
            &self.pool,
            process_id,
            Stage::Posting,
            outcome.processed as i32,
        )
        .await?;
        db::touch_credentials(&self.pool, &used_credentials).await?;

        info!(
            process_id = %process_id,
            posted = outcome.processed,
            failed = outcome.failed,
            "Posting pass finished"
        );

        Ok(outcome)
    }
}
