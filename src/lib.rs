//! # Gatewright: Constitutionally Governed Workflow Engine
//!
//! Gatewright is a persistent orchestrator that hands discrete units of
//! work (UOWs) to external actors (human, automated, or AI), intercepts
//! every hand-off through programmable policy gates, and preserves a
//! cryptographically linked audit trail. It is built for mixed pipelines
//! where every routing decision must be explainable, every state
//! transition reversible to audit, and every stuck token reclaimable.
//!
//! ## Core Concepts
//!
//! - **Unit of Work (UOW)**: one atomic token of work with identity,
//!   versioned attributes, a status, and an append-only history.
//! - **Interaction**: a named queue between roles; work sits in an
//!   interaction while waiting to be leased.
//! - **Guard**: a policy attached to a component edge that converts a
//!   UOW's attributes into a routing decision via a restricted
//!   expression DSL.
//! - **Lease**: exclusive ownership of an ACTIVE UOW, kept alive by
//!   heartbeats and reclaimed by the zombie sweeper when it stops.
//! - **Pilot**: the human override surface: kill-switch, clarification,
//!   waiver, resume, cancel. Audited and never counted as routing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gatewright::engine::WorkflowEngine;
//! use gatewright::events::{EventBus, MemorySink};
//! use gatewright::storage::memory::MemoryStorage;
//! use gatewright::types::Principal;
//! use serde_json::json;
//!
//! # async fn example(template_yaml: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let bus = EventBus::with_sink(MemorySink::new());
//! bus.listen_for_events();
//!
//! let engine = WorkflowEngine::new(Arc::new(MemoryStorage::new()))
//!     .with_emitter(bus.emitter());
//!
//! let template_id = engine.import_template_yaml(template_yaml).await?;
//! let instance_id = engine
//!     .instantiate_workflow(
//!         &template_id,
//!         [("amount".to_string(), json!(100))],
//!         Default::default(),
//!     )
//!     .await?;
//!
//! // An actor leases work, does it, and hands the result back.
//! let worker = Principal::new("actor-w1");
//! # let role_id = todo!();
//! if let Some(receipt) = engine.checkout_work(&worker, &role_id).await? {
//!     engine
//!         .submit_work(
//!             &receipt.uow_id,
//!             &worker,
//!             [("score".to_string(), json!(0.1))],
//!             None,
//!         )
//!         .await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! All mutation flows through [`engine::WorkflowEngine`] under one
//! storage transaction per public operation. The state machine
//! ([`state_machine`]) gates every status edge; the ledger ([`history`])
//! chains a SHA-256 content hash per transition; the guard machinery
//! ([`guards`], [`expr`]) is pure and total: expression failures land in
//! a shadow log, never in the caller's lap.
//!
//! Storage is pluggable behind [`storage::Storage`]: a process-local
//! memory driver is always available, and a durable SQLite driver ships
//! behind the default `sqlite` feature.
//!
//! ## Module Guide
//!
//! - [`engine`] - The facade: instantiate, checkout, submit, decompose,
//!   pilot surface, sweeper, admin
//! - [`template`] - Import format and the structural validator
//! - [`guards`] - Interaction policies and guard dispatch
//! - [`expr`] - The restricted condition DSL
//! - [`attrs`] - Versioned attributes and the two-namespace merge
//! - [`history`] - The append-only hash-chained ledger
//! - [`state_machine`] - Legal status transitions
//! - [`hashing`] - Canonical attribute serialization and chaining
//! - [`events`] - Engine events, bus, and sinks
//! - [`storage`] - Driver contract and bundled drivers
//! - [`config`] - Engine configuration
//! - [`types`] - Shared identifiers and enums

pub mod attrs;
pub mod config;
pub mod engine;
pub mod events;
pub mod expr;
pub mod guards;
pub mod hashing;
pub mod history;
pub mod state_machine;
pub mod storage;
pub mod telemetry;
pub mod template;
pub mod types;
pub mod utils;
