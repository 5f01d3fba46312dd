// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The four stage workers.
//!
//! A stage worker is a short-lived single-pass batch processor: snapshot
//! the records in its input status, do the external work record by record
//! with no database session held, write each result back in its own
//! guarded short transaction. Iteration within a worker is serial, which
//! keeps rate-limit accounting trivial; parallelism comes from multiple
//! stage workers coexisting.
//!
//! Failure of one record never affects another. A worker reports per-item
//! failures through the process's stage error counters and keeps going.

pub mod discovery;
pub mod generation;
pub mod posting;
pub mod preparation;

pub use discovery::DiscoveryWorker;
pub use generation::GenerationWorker;
pub use posting::PostingWorker;
pub use preparation::PreparationWorker;

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use yourmoment_core::broker::Broker;
use yourmoment_core::model::TaskState;

/// Counts reported by one stage worker pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Records advanced to the stage's output status.
    pub processed: u32,
    /// Records that failed (or, for discovery, credentials that failed).
    pub failed: u32,
}

/// Cooperative revocation probe.
///
/// Workers consult the probe between records; once the owning broker task
/// is revoked the worker stops spawning new work and returns. Broker
/// inspection errors are treated as "keep going" - the timeout enforcer
/// owns the hard stop.
#[derive(Clone)]
pub struct RevocationProbe {
    broker: Option<Arc<dyn Broker>>,
    task_id: Uuid,
}

impl RevocationProbe {
    /// Probe for a claimed broker task.
    pub fn new(broker: Arc<dyn Broker>, task_id: Uuid) -> Self {
        Self {
            broker: Some(broker),
            task_id,
        }
    }

    /// Probe that never reports revocation (direct invocations, tests).
    pub fn disabled() -> Self {
        Self {
            broker: None,
            task_id: Uuid::nil(),
        }
    }

    /// Whether the owning task has been revoked.
    pub async fn is_revoked(&self) -> bool {
        let Some(broker) = &self.broker else {
            return false;
        };

        match broker.task_state(self.task_id).await {
            Ok(Some(TaskState::Revoked)) => true,
            Ok(_) => false,
            Err(e) => {
                warn!(task_id = %self.task_id, error = %e, "Revocation probe failed");
                false
            }
        }
    }
}
