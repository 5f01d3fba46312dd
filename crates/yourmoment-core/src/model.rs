// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Entities, status enums and worker snapshot types.
//!
//! Database rows are mapped into `sqlx::FromRow` structs with plain text
//! status columns; the typed enums below are the Rust-side vocabulary.
//! Workers never hold live rows across external I/O - they operate on the
//! owned snapshot types defined here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum::{Display, EnumString};
use uuid::Uuid;

// ============================================================================
// Status Enums
// ============================================================================

/// Lifecycle status of a monitoring process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProcessStatus {
    /// Configured but never started.
    Created,
    /// Considered by the coordinator and the timeout enforcer.
    Running,
    /// Stopped manually or by the timeout enforcer.
    Stopped,
    /// Finished by an operator decision; the core never sets this itself.
    Completed,
    /// Rejected by a configuration invariant.
    Failed,
}

/// Pipeline status of a work record.
///
/// Transitions are monotone: `discovered → prepared → generated → posted`,
/// with `failed` reachable from any non-terminal state and terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RecordStatus {
    /// Metadata captured by discovery; no content yet.
    Discovered,
    /// Full article content fetched.
    Prepared,
    /// Comment text generated; terminal when the process is generate-only.
    Generated,
    /// Comment submitted upstream.
    Posted,
    /// Terminal failure; never retried by the core.
    Failed,
}

/// One of the four pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// Enumerate upstream articles and fan out work records.
    Discovery,
    /// Fetch full article content.
    Preparation,
    /// Render prompts and call the LLM.
    Generation,
    /// Submit comments upstream.
    Posting,
}

impl Stage {
    /// All stages in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Discovery,
        Stage::Preparation,
        Stage::Generation,
        Stage::Posting,
    ];

    /// The broker queue this stage's tasks are enqueued on.
    pub fn queue(&self) -> &'static str {
        match self {
            Stage::Discovery => queues::DISCOVERY,
            Stage::Preparation => queues::PREPARATION,
            Stage::Generation => queues::GENERATION,
            Stage::Posting => queues::POSTING,
        }
    }

    /// The record status this stage consumes, if any.
    pub fn input_status(&self) -> Option<RecordStatus> {
        match self {
            Stage::Discovery => None,
            Stage::Preparation => Some(RecordStatus::Discovered),
            Stage::Generation => Some(RecordStatus::Prepared),
            Stage::Posting => Some(RecordStatus::Generated),
        }
    }
}

/// Named broker queues.
pub mod queues {
    /// Discovery stage tasks.
    pub const DISCOVERY: &str = "discovery";
    /// Preparation stage tasks.
    pub const PREPARATION: &str = "preparation";
    /// Generation stage tasks.
    pub const GENERATION: &str = "generation";
    /// Posting stage tasks.
    pub const POSTING: &str = "posting";
    /// Timeout enforcement ticks.
    pub const TIMEOUTS: &str = "timeouts";
    /// Coordinator scheduling ticks.
    pub const SCHEDULER: &str = "scheduler";
    /// Upstream session maintenance.
    pub const SESSIONS: &str = "sessions";

    /// The four stage queues an executor drains.
    pub const STAGES: [&str; 4] = [DISCOVERY, PREPARATION, GENERATION, POSTING];
}

/// Broker-side state of a stage task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TaskState {
    /// Enqueued, not yet claimed.
    Pending,
    /// Claimed by an executor.
    Started,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failure,
    /// Scheduled for another attempt.
    Retry,
    /// Revoked before or during execution.
    Revoked,
}

impl TaskState {
    /// A task in one of these states blocks the coordinator from spawning a
    /// fresh task for the same stage.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Started | TaskState::Retry)
    }
}

/// Supported LLM vendors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LlmVendor {
    /// OpenAI chat completions.
    OpenAi,
    /// Mistral chat completions.
    Mistral,
}

impl LlmVendor {
    /// Default API origin for the vendor.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            LlmVendor::OpenAi => "https://api.openai.com/v1",
            LlmVendor::Mistral => "https://api.mistral.ai/v1",
        }
    }
}

// ============================================================================
// Rows
// ============================================================================

/// Monitoring process row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MonitoringProcess {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Human-readable name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// LLM provider used for all records of this process.
    pub llm_provider_id: Uuid,
    /// Upstream tab filters; empty means all tabs.
    pub tab_filters: Vec<String>,
    /// Optional upstream category filter.
    pub category_filter: Option<String>,
    /// Keyword filters applied to article titles; empty means no filter.
    pub keyword_filters: Vec<String>,
    /// When true, the posting stage never runs for this process.
    pub generate_only: bool,
    /// Wall-time budget enforced by the timeout enforcer.
    pub max_duration_minutes: i32,
    /// Current lifecycle status (created, running, stopped, completed, failed).
    pub status: String,
    /// Why the process stopped (manual, timeout).
    pub stop_reason: Option<String>,
    /// When the process entered running.
    pub started_at: Option<DateTime<Utc>>,
    /// started_at + max_duration_minutes while running.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the process stopped.
    pub stopped_at: Option<DateTime<Utc>>,
    /// In-flight discovery task, if any.
    pub discovery_task_id: Option<Uuid>,
    /// In-flight preparation task, if any.
    pub preparation_task_id: Option<Uuid>,
    /// In-flight generation task, if any.
    pub generation_task_id: Option<Uuid>,
    /// In-flight posting task, if any. Always NULL when generate_only.
    pub posting_task_id: Option<Uuid>,
    /// Work records created by discovery.
    pub articles_discovered: i32,
    /// Records that reached prepared.
    pub articles_prepared: i32,
    /// Records that reached generated.
    pub comments_generated: i32,
    /// Records that reached posted.
    pub comments_posted: i32,
    /// Discovery-stage error count.
    pub errors_discovery: i32,
    /// Preparation-stage error count.
    pub errors_preparation: i32,
    /// Generation-stage error count.
    pub errors_generation: i32,
    /// Posting-stage error count.
    pub errors_posting: i32,
    /// Last process-level error message.
    pub error_message: Option<String>,
    /// When the process was created.
    pub created_at: DateTime<Utc>,
    /// When the process row last changed.
    pub updated_at: DateTime<Utc>,
}

impl MonitoringProcess {
    /// Typed view of the status column.
    pub fn process_status(&self) -> Result<ProcessStatus, crate::Error> {
        self.status
            .parse()
            .map_err(|_| crate::Error::UnknownStatus(self.status.clone()))
    }

    /// Stored task id for a stage.
    pub fn stage_task_id(&self, stage: Stage) -> Option<Uuid> {
        match stage {
            Stage::Discovery => self.discovery_task_id,
            Stage::Preparation => self.preparation_task_id,
            Stage::Generation => self.generation_task_id,
            Stage::Posting => self.posting_task_id,
        }
    }

    /// Stages the coordinator drives for this process.
    pub fn active_stages(&self) -> &'static [Stage] {
        if self.generate_only {
            &[Stage::Discovery, Stage::Preparation, Stage::Generation]
        } else {
            &Stage::ALL
        }
    }

    /// Filters snapshot for the upstream portal.
    pub fn filters(&self) -> ArticleFilters {
        ArticleFilters {
            tabs: self.tab_filters.clone(),
            category: self.category_filter.clone(),
            keywords: self.keyword_filters.clone(),
        }
    }
}

/// Work record row - the unit of work and the coordination primitive.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkRecord {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning process; records are cascade-deleted with it.
    pub process_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Upstream identity this record acts as.
    pub credential_id: Uuid,
    /// Prompt template used for generation.
    pub template_id: Uuid,
    /// Provider used for generation.
    pub llm_provider_id: Uuid,
    /// Article identifier on the upstream platform.
    pub upstream_article_id: String,
    /// Article title captured at discovery.
    pub article_title: String,
    /// Article author (pseudonym) captured at discovery.
    pub article_author: String,
    /// Upstream category, if known.
    pub article_category: Option<String>,
    /// Article URL.
    pub article_url: String,
    /// Upstream edit timestamp, if the index exposes one.
    pub article_edited_at: Option<DateTime<Utc>>,
    /// Extracted article text; set by preparation.
    pub article_content: Option<String>,
    /// Raw article HTML; set by preparation.
    pub article_raw_html: Option<String>,
    /// Upstream publication timestamp; set by preparation.
    pub article_published_at: Option<DateTime<Utc>>,
    /// Generated comment text including the disclosure prefix.
    pub comment_content: Option<String>,
    /// Deterministic idempotency marker recorded after a successful post.
    pub upstream_comment_id: Option<String>,
    /// Model that generated the comment.
    pub ai_model_name: Option<String>,
    /// Vendor that generated the comment.
    pub ai_vendor_tag: Option<String>,
    /// Total tokens consumed by generation.
    pub generation_tokens: Option<i32>,
    /// Wall time of the generation call.
    pub generation_time_ms: Option<i64>,
    /// Pipeline status (discovered, prepared, generated, posted, failed).
    pub status: String,
    /// Failure explanation.
    pub error_message: Option<String>,
    /// Posting retry attempts so far.
    pub retry_count: i32,
    /// When content was fetched.
    pub article_scraped_at: Option<DateTime<Utc>>,
    /// When the comment was posted.
    pub posted_at: Option<DateTime<Utc>>,
    /// When the record failed.
    pub failed_at: Option<DateTime<Utc>>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

impl WorkRecord {
    /// Typed view of the status column.
    pub fn record_status(&self) -> Result<RecordStatus, crate::Error> {
        self.status
            .parse()
            .map_err(|_| crate::Error::UnknownStatus(self.status.clone()))
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// Upstream article filters of a monitoring process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArticleFilters {
    /// Tabs to enumerate; empty means the upstream default.
    pub tabs: Vec<String>,
    /// Optional category restriction.
    pub category: Option<String>,
    /// Keywords matched against article titles; empty means no filter.
    pub keywords: Vec<String>,
}

/// Immutable configuration snapshot of a process, taken in one short
/// session before any external I/O.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// The process.
    pub process_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Credential identities to enumerate under.
    pub credential_ids: Vec<Uuid>,
    /// Templates to fan out over.
    pub template_ids: Vec<Uuid>,
    /// Provider used for generation.
    pub llm_provider_id: Uuid,
    /// Upstream filters.
    pub filters: ArticleFilters,
    /// Whether posting is disabled.
    pub generate_only: bool,
}

/// Decrypted upstream credential held in memory for one worker invocation.
#[derive(Clone)]
pub struct CredentialSnapshot {
    /// Credential id.
    pub id: Uuid,
    /// Display name shown as the commenting identity.
    pub display_name: String,
    /// Upstream username.
    pub username: String,
    /// Decrypted upstream password.
    pub password: String,
}

impl std::fmt::Debug for CredentialSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSnapshot")
            .field("id", &self.id)
            .field("display_name", &self.display_name)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Decrypted LLM provider configuration held in memory for one run.
#[derive(Clone)]
pub struct ProviderSnapshot {
    /// Provider id.
    pub id: Uuid,
    /// Vendor tag.
    pub vendor: LlmVendor,
    /// Model name passed to the vendor.
    pub model_name: String,
    /// Decrypted API key.
    pub api_key: String,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token budget.
    pub max_tokens: i32,
    /// Whether the vendor is asked for JSON output.
    pub json_mode: bool,
}

impl std::fmt::Debug for ProviderSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSnapshot")
            .field("id", &self.id)
            .field("vendor", &self.vendor)
            .field("model_name", &self.model_name)
            .finish_non_exhaustive()
    }
}

/// Prompt template snapshot.
#[derive(Debug, Clone)]
pub struct TemplateSnapshot {
    /// Template id.
    pub id: Uuid,
    /// System prompt.
    pub system_prompt: String,
    /// User prompt with article placeholders.
    pub user_prompt_template: String,
}

/// Article metadata from the upstream index; no content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMeta {
    /// Upstream article id.
    pub id: String,
    /// Title.
    pub title: String,
    /// Author pseudonym.
    pub author: String,
    /// Category, if shown on the index.
    pub category: Option<String>,
    /// Absolute article URL.
    pub url: String,
    /// Last-edited timestamp, if shown on the index.
    pub edited_at: Option<DateTime<Utc>>,
}

/// Full article content fetched by the preparation stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleContent {
    /// Extracted article text.
    pub content: String,
    /// Raw article HTML.
    pub raw_html: String,
    /// Publication timestamp, if the article page exposes one.
    pub published_at: Option<DateTime<Utc>>,
}

/// A prospective work record built by discovery before the batch insert.
#[derive(Debug, Clone)]
pub struct ProspectiveRecord {
    /// Owning process.
    pub process_id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Identity the article was discovered under.
    pub credential_id: Uuid,
    /// Template to generate with.
    pub template_id: Uuid,
    /// Provider to generate with.
    pub llm_provider_id: Uuid,
    /// Article metadata from the index.
    pub meta: ArticleMeta,
}

/// Work record counts per status for one process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineCounts {
    /// Records in discovered.
    pub discovered: i64,
    /// Records in prepared.
    pub prepared: i64,
    /// Records in generated.
    pub generated: i64,
    /// Records in posted.
    pub posted: i64,
    /// Records in failed.
    pub failed: i64,
}

impl PipelineCounts {
    /// Total records of the process.
    pub fn total(&self) -> i64 {
        self.discovered + self.prepared + self.generated + self.posted + self.failed
    }
}

// ============================================================================
// Idempotency Marker
// ============================================================================

/// Deterministic idempotency marker for a successful post.
///
/// The upstream returns no stable comment identifier, so the marker is
/// synthesized from the record identity. The same record always maps to the
/// same marker, which makes duplicate successful posts detectable.
pub fn idempotency_marker(process_id: Uuid, upstream_article_id: &str, record_id: Uuid) -> String {
    let mut hasher = Sha256::new();
    hasher.update(process_id.as_bytes());
    hasher.update(upstream_article_id.as_bytes());
    hasher.update(record_id.as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(32);
    for byte in digest.iter().take(16) {
        hex.push_str(&format!("{:02x}", byte));
    }
    format!("ym-{hex}")
}
