// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Preparation stage worker.
//!
//! Fetches full article content for records in `discovered`. Every fetch
//! happens with no database connection checked out; the write-back is one
//! guarded single-record transaction. Fetches under the same credential
//! are spaced by the preparation rate limit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::time::Instant;
use tracing::{error, info};
use uuid::Uuid;

use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db;
use yourmoment_core::model::{CredentialSnapshot, RecordStatus, Stage};

use crate::Result;
use crate::upstream::UpstreamPortal;

use super::{RevocationProbe, StageOutcome};

/// Single-pass preparation worker.
pub struct PreparationWorker {
    pool: PgPool,
    portal: Arc<dyn UpstreamPortal>,
    cipher: FieldCipher,
    rate_limit: Duration,
}

impl PreparationWorker {
    /// Create a worker over the shared pool and portal.
    pub fn new(
        pool: PgPool,
        portal: Arc<dyn UpstreamPortal>,
        cipher: FieldCipher,
        rate_limit: Duration,
    ) -> Self {
        Self {
            pool,
            portal,
            cipher,
            rate_limit,
        }
    }

    /// Run one preparation pass for a process.
    pub async fn run(&self, process_id: Uuid, probe: &RevocationProbe) -> Result<StageOutcome> {
        // Snapshot the batch, then release the session before any fetch.
        let records =
            db::list_records_in_status(&self.pool, process_id, RecordStatus::Discovered).await?;
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
            "Preparation pass started"
        );

        let mut outcome = StageOutcome::default();
        let mut last_fetch: HashMap<Uuid, Instant> = HashMap::new();

        for record in &records {
            if probe.is_revoked().await {
                info!(process_id = %process_id, "Preparation revoked, stopping");
                break;
            }

            let Some(credential) = credentials.get(&record.credential_id) else {
                let message = format!(
                    "credential {} is missing, inactive or undecryptable",
                    record.credential_id
                );
                db::mark_record_failed_with_retry(
                    &self.pool,
                    record.id,
                    RecordStatus::Discovered,
                    &message,
                )
                .await?;
                outcome.failed += 1;
                continue;
            };

            // Respect the per-credential upstream budget.
            if let Some(previous) = last_fetch.get(&credential.id) {
                let elapsed = previous.elapsed();
                if elapsed < self.rate_limit {
                    tokio::time::sleep(self.rate_limit - elapsed).await;
                }
            }
            last_fetch.insert(credential.id, Instant::now());

            // The fetch runs with no DB session held.
            match self
                .portal
                .fetch_article_content(credential, &record.upstream_article_id)
                .await
            {
                Ok(content) => {
                    if db::mark_record_prepared(&self.pool, record.id, &content).await? {
                        outcome.processed += 1;
                    }
                }
                Err(e) => {
                    error!(
                        record_id = %record.id,
                        article_id = %record.upstream_article_id,
                        error = %e,
                        "Content fetch failed"
                    );
                    db::mark_record_failed_with_retry(
                        &self.pool,
                        record.id,
                        RecordStatus::Discovered,
                        &e.to_string(),
                    )
                    .await?;
                    outcome.failed += 1;
                }
            }
        }

        db::increment_stage_counter(
            &self.pool,
            process_id,
            Stage::Preparation,
            outcome.processed as i32,
        )
        .await?;
        db::increment_stage_errors(
            &self.pool,
            process_id,
            Stage::Preparation,
            outcome.failed as i32,
        )
        .await?;

        info!(
            process_id = %process_id,
            prepared = outcome.processed,
            failed = outcome.failed,
            "Preparation pass finished"
        );

        Ok(outcome)
    }
}
