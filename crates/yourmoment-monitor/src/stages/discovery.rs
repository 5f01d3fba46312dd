// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Discovery stage worker.
//!
//! Enumerates upstream articles for each credential of a process and fans
//! out to one prospective work record per (article × template). Records are
//! created with metadata only; content is fetched by the preparation
//! stage. The batch insert is conditional on the record identity, so
//! re-running discovery against the same upstream set creates nothing.

use std::sync::Arc;

use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use yourmoment_core::crypto::FieldCipher;
use yourmoment_core::db;
use yourmoment_core::model::{ProspectiveRecord, Stage};

use crate::Result;
use crate::upstream::UpstreamPortal;

use super::{RevocationProbe, StageOutcome};

/// Single-pass discovery worker.
pub struct DiscoveryWorker {
    pool: PgPool,
    portal: Arc<dyn UpstreamPortal>,
    cipher: FieldCipher,
}

impl DiscoveryWorker {
    /// Create a worker over the shared pool and portal.
    pub fn new(pool: PgPool, portal: Arc<dyn UpstreamPortal>, cipher: FieldCipher) -> Self {
        Self {
            pool,
            portal,
            cipher,
        }
    }

    /// Run one discovery pass for a process.
    pub async fn run(&self, process_id: Uuid, probe: &RevocationProbe) -> Result<StageOutcome> {
        // Short session 1: configuration snapshot, closed before scraping.
        let config = db::get_process_config(&self.pool, process_id).await?;
        let credentials =
            db::load_credentials(&self.pool, &self.cipher, &config.credential_ids).await?;

        info!(
            process_id = %process_id,
            credentials = credentials.len(),
            templates = config.template_ids.len(),
            "Discovery pass started"
        );

        let mut outcome = StageOutcome::default();
        // Credentials whose rows failed to decrypt count as discovery errors.
        outcome.failed += (config.credential_ids.len() - credentials.len()) as u32;

        // Upstream enumeration per credential, outside any DB session.
        // Enumeration order within a credential is preserved as insertion
        // order; a failing credential never aborts the others.
        let mut prospective: Vec<ProspectiveRecord> = Vec::new();
        let mut used_credentials: Vec<Uuid> = Vec::new();

        for credential in &credentials {
            if probe.is_revoked().await {
                info!(process_id = %process_id, "Discovery revoked, stopping");
                break;
            }

            match self.portal.list_articles(credential, &config.filters).await {
                Ok(articles) => {
                    info!(
                        credential_id = %credential.id,
                        count = articles.len(),
                        "Enumerated upstream articles"
                    );
                    used_credentials.push(credential.id);
                    for article in articles {
                        for template_id in &config.template_ids {
                            prospective.push(ProspectiveRecord {
                                process_id,
                                user_id: config.user_id,
                                credential_id: credential.id,
                                template_id: *template_id,
                                llm_provider_id: config.llm_provider_id,
                                meta: article.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    error!(
                        credential_id = %credential.id,
                        error = %e,
                        "Article enumeration failed for credential"
                    );
                    outcome.failed += 1;
                }
            }
        }

        // Short session 2: conditional batch insert; duplicates skipped.
        let inserted = db::insert_discovered_batch(&self.pool, &prospective).await?;
        outcome.processed = inserted as u32;

        // Separate short transactions for the counters.
        db::increment_stage_counter(&self.pool, process_id, Stage::Discovery, inserted as i32)
            .await?;
        db::increment_stage_errors(&self.pool, process_id, Stage::Discovery, outcome.failed as i32)
            .await?;
        db::touch_credentials(&self.pool, &used_credentials).await?;

        info!(
            process_id = %process_id,
            discovered = outcome.processed,
            errors = outcome.failed,
            "Discovery pass finished"
        );

        Ok(outcome)
    }
}
