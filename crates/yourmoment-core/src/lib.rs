// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! yourMoment Core - Data Model, Persistence and Work Broker
//!
//! This crate holds everything the monitoring pipeline coordinates through:
//! the relational schema, short-session persistence operations, the work
//! broker abstraction, secret-field encryption, and the process lifecycle
//! service consumed by the API layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        API collaborator (REST)                          │
//! │                start / stop / status / entity CRUD                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     yourmoment-core (This Crate)                        │
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐  ┌─────────────┐    │
//! │  │  Lifecycle  │  │ Persistence │  │    Work     │  │   Secret    │    │
//! │  │   Service   │  │  (db ops)   │  │   Broker    │  │   Cipher    │    │
//! │  └─────────────┘  └─────────────┘  └─────────────┘  └─────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//!           │                │                │
//!           │                │                │ claim / revoke
//!           ▼                ▼                ▼
//! ┌───────────────────────────────────┐  ┌────────────────────────────────┐
//! │            PostgreSQL             │  │      yourmoment-monitor        │
//! │  (processes, work records, broker │  │  (coordinator, stage workers,  │
//! │   tasks, encrypted secrets)       │  │      timeout enforcer)         │
//! └───────────────────────────────────┘  └────────────────────────────────┘
//! ```
//!
//! # Coordination Model
//!
//! There is no inter-worker messaging. Stage workers coordinate exclusively
//! through the persistent state of [`model::WorkRecord`] rows:
//!
//! ```text
//!   discovered ──▶ prepared ──▶ generated ──▶ posted
//!        │             │             │
//!        └─────────────┴─────────────┴──────▶ failed (terminal)
//! ```
//!
//! Every transition is a guarded single-row update
//! (`UPDATE … WHERE id = $1 AND status = $2`), so a racing duplicate worker
//! observes zero affected rows and moves on.
//!
//! # Session Discipline
//!
//! Database access in this crate follows four patterns and nothing else:
//! config reads snapshotted into plain structs, batch inserts with
//! `ON CONFLICT DO NOTHING`, guarded single-record updates, and batch reads
//! with cached reference data. External I/O never happens while a
//! connection is checked out; callers get owned snapshots and come back for
//! the write.
//!
//! # Modules
//!
//! - [`broker`]: work queue abstraction with Postgres and in-memory backends
//! - [`config`]: core configuration from `YOURMOMENT_*` environment variables
//! - [`crypto`]: ChaCha20-Poly1305 field cipher for secrets at rest
//! - [`db`]: persistence operations over `&PgPool`
//! - [`error`]: unified core error type
//! - [`lifecycle`]: start/stop/status operations on monitoring processes
//! - [`migrations`]: embedded sqlx migrations
//! - [`model`]: entities, status enums and snapshot types

pub mod broker;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod migrations;
pub mod model;

pub use error::{Error, Result};
