//! The workflow engine facade.
//!
//! [`WorkflowEngine`] is the single entry point callers hold: it owns the
//! storage driver, the event emitter, the function allow-list, and the
//! configuration, and exposes every public operation: instantiate,
//! checkout, submit, fail, heartbeat, decompose, the pilot surface, the
//! sweeper, and the administrative tools. Each operation runs inside
//! exactly one storage transaction; on error the transaction drops and
//! nothing is observable.
//!
//! The engine executes no actor logic. Actors live outside the process,
//! lease work, and hand results back; everything here is bookkeeping with
//! teeth.
//!
//! # Examples
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use gatewright::engine::WorkflowEngine;
//! use gatewright::storage::memory::MemoryStorage;
//! use gatewright::template::TemplateSpec;
//! use gatewright::types::Principal;
//! use serde_json::json;
//!
//! # async fn example(template_yaml: &str) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = WorkflowEngine::new(Arc::new(MemoryStorage::new()));
//!
//! let spec = TemplateSpec::from_yaml(template_yaml)?;
//! let template_id = engine.import_template(&spec).await?;
//! let instance_id = engine
//!     .instantiate_workflow(&template_id, [("amount".to_string(), json!(100))], Default::default())
//!     .await?;
//!
//! let worker = Principal::new("actor-w1");
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod checkout;
pub mod decompose;
pub mod materialize;
pub mod pilot;
pub mod submit;
pub mod sweeper;

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use thiserror::Error;

use crate::attrs::{self, AttributeRecord, AttributeWrite};
use crate::config::EngineConfig;
use crate::events::{EngineEvent, EventEmitter, EventKind, NullEmitter};
use crate::expr::functions::FunctionRegistry;
use crate::guards::{self, CerberusFacts};
use crate::hashing::{canonical_attributes, chain_hash};
use crate::history::{HistoryEntry, TransitionRecord};
use crate::state_machine::{self, IllegalTransition};
use crate::storage::{Blueprint, Storage, StorageError, StorageTxn, UowRecord};
use crate::template::TemplateValidationError;
use crate::types::{ActorId, InstanceId, Principal, UowId, UowStatus};
use crate::utils::ids::IdGenerator;

pub use sweeper::{SweepReport, ZombieSweeper};

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Illegal(#[from] IllegalTransition),

    /// The caller's lease is gone: expired, reclaimed, or never granted.
    #[error("lease lost on {uow_id} for {actor_id}")]
    #[diagnostic(
        code(gatewright::engine::lease_lost),
        help("Re-checkout the work; the previous lease was reclaimed or taken over.")
    )]
    LeaseLost { uow_id: UowId, actor_id: ActorId },

    #[error("{what} not found: {id}")]
    #[diagnostic(code(gatewright::engine::not_found))]
    NotFound { what: &'static str, id: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Template(#[from] TemplateValidationError),

    /// Malformed input: unparsable template text, empty waiver reason,
    /// zero-child decomposition, actor class mismatch.
    #[error("validation error: {message}")]
    #[diagnostic(code(gatewright::engine::validation))]
    Validation { message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(StorageError),
}

impl EngineError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
        }
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { what, id } => EngineError::NotFound { what, id },
            other => EngineError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// The engine. Cheap to clone pieces; hold it in an `Arc` and share.
pub struct WorkflowEngine {
    storage: Arc<dyn Storage>,
    emitter: Arc<dyn EventEmitter>,
    functions: Arc<FunctionRegistry>,
    config: EngineConfig,
    ids: IdGenerator,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl WorkflowEngine {
    /// Engine with defaults: events discarded, builtin function
    /// allow-list, default configuration.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            emitter: Arc::new(NullEmitter),
            functions: Arc::new(FunctionRegistry::with_builtins()),
            config: EngineConfig::default(),
            ids: IdGenerator::new(),
        }
    }

    /// Engine over a durable SQLite store at the configured database URL
    /// (`EngineConfig::database_url`, resolved from `GATEWRIGHT_DB_URL`).
    #[cfg(feature = "sqlite")]
    pub async fn connect_sqlite(config: EngineConfig) -> Result<Self> {
        let url = config
            .database_url
            .clone()
            .ok_or_else(|| EngineError::validation("no database url configured"))?;
        let storage = crate::storage::sqlite::SqliteStorage::connect(&url).await?;
        Ok(Self::new(Arc::new(storage)).with_config(config))
    }

    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = emitter;
        self
    }

    #[must_use]
    pub fn with_functions(mut self, functions: Arc<FunctionRegistry>) -> Self {
        self.functions = functions;
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Fire-and-account event emission; the status is the hub's concern.
    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.emitter.emit(event);
    }

    /// Apply one status transition: legality check, hash-chain link,
    /// ledger append, row update, `state_transition` event. Rows with
    /// `from == to` are audit-only entries (decomposition, toxic marks):
    /// they skip the legality check and emit no `state_transition` event,
    /// since the status did not change. The ledger row is their audit
    /// record.
    ///
    /// Leaving `ACTIVE` always clears the lease; entering it requires the
    /// caller to have set one.
    pub(crate) async fn transition(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &mut UowRecord,
        record: TransitionRecord,
    ) -> Result<HistoryEntry> {
        let audit_only = record.from_status == Some(record.to_status);
        if let Some(from) = record.from_status {
            if from != record.to_status {
                state_machine::check_transition(from, record.to_status)?;
            }
        }

        if record.to_status != UowStatus::Active {
            uow.lease_actor_id = None;
        } else {
            debug_assert!(
                uow.lease_actor_id.is_some(),
                "entering ACTIVE requires a lease holder"
            );
        }

        let attributes = txn.load_attributes(&uow.id).await?;
        let canonical = canonical_attributes(&attrs::global_view(&attributes));
        let new_hash = chain_hash(&uow.content_hash, &canonical);

        let entry = HistoryEntry {
            uow_id: uow.id.clone(),
            seq: 0,
            from_status: record.from_status,
            to_status: record.to_status,
            actor_id: record.actor_id.clone(),
            event_type: record.event_type,
            reason: record.reason.clone(),
            prev_content_hash: uow.content_hash.clone(),
            new_content_hash: new_hash.clone(),
            recorded_at: Utc::now(),
            metadata: record.metadata.clone(),
        };
        let entry = txn.append_history(entry).await?;

        uow.content_hash = new_hash;
        uow.status = record.to_status;
        uow.updated_at = Utc::now();
        txn.update_uow(uow).await?;

        if !audit_only {
            self.emit(
                EngineEvent::new(
                    EventKind::StateTransition,
                    serde_json::json!({
                        "from": record.from_status.map(UowStatus::encode),
                        "to": record.to_status.encode(),
                        "event_type": record.event_type.encode(),
                        "seq": entry.seq,
                        "actor_id": record.actor_id,
                    }),
                )
                .for_uow(uow.id.clone())
                .for_instance(uow.instance_id.clone()),
            );
        }

        Ok(entry)
    }

    /// Insert a batch of attribute writes, allocating versions per key.
    pub(crate) async fn write_attributes(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow_id: &UowId,
        writes: &[AttributeWrite],
        author: &ActorId,
    ) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut existing = txn.load_attributes(uow_id).await?;
        for write in writes {
            let version = attrs::next_version(&existing, &write.key);
            let record = AttributeRecord {
                uow_id: uow_id.clone(),
                key: write.key.clone(),
                version,
                value: write.value.clone(),
                owner_actor_id: write.owner_actor_id.clone(),
                author_actor_id: author.clone(),
                reasoning: write.reasoning.clone(),
                written_at: Utc::now(),
            };
            txn.insert_attribute(record.clone()).await?;
            existing.push(record);
        }
        Ok(())
    }

    /// The condition scope a guard sees for this UOW as viewed by an
    /// actor: merged attributes with reserved metadata layered on top
    /// (reserved names always win; `actor_id` is never bound).
    pub(crate) async fn policy_scope(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &UowRecord,
        viewer: &ActorId,
    ) -> Result<FxHashMap<String, Json>> {
        let attributes = txn.load_attributes(&uow.id).await?;
        let mut scope = attrs::latest_view(&attributes, viewer);
        scope.extend(guards::reserved_scope(
            &uow.id,
            uow.parent_id.as_ref(),
            uow.status,
            uow.child_count,
            uow.finished_child_count,
            uow.interaction_count,
        ));
        Ok(scope)
    }

    /// CERBERUS facts for a parent: counters from the row, liveness from
    /// a children scan.
    pub(crate) async fn cerberus_facts(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &UowRecord,
    ) -> Result<CerberusFacts> {
        let children = txn.children_of(&uow.id).await?;
        let has_nonterminal_child = children.iter().any(|c| !c.status.is_terminal());
        Ok(CerberusFacts {
            child_count: uow.child_count,
            finished_child_count: uow.finished_child_count,
            has_nonterminal_child,
        })
    }

    /// When a child reaches a terminal status, credit the parent's
    /// finished-child counter.
    pub(crate) async fn credit_parent_terminal(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &UowRecord,
    ) -> Result<()> {
        let Some(parent_id) = &uow.parent_id else {
            return Ok(());
        };
        let mut parent = txn.load_uow(parent_id).await?;
        parent.finished_child_count = (parent.finished_child_count + 1).min(parent.child_count);
        parent.updated_at = Utc::now();
        txn.update_uow(&parent).await?;
        Ok(())
    }

    /// Resolve the role that consumes the UOW's current interaction, used
    /// by submit to find the outbound edges. With several inbound
    /// consumers the principal's class disambiguates.
    pub(crate) fn consuming_role<'bp>(
        &self,
        blueprint: &'bp Blueprint,
        uow: &UowRecord,
        principal: &Principal,
    ) -> Result<&'bp crate::storage::RoleRecord> {
        let interaction_id =
            uow.current_interaction_id
                .as_ref()
                .ok_or_else(|| EngineError::NotFound {
                    what: "current interaction",
                    id: uow.id.to_string(),
                })?;
        let inbound =
            blueprint.components_of_interaction(interaction_id, crate::types::Direction::Inbound);
        let mut candidates = inbound
            .iter()
            .filter_map(|c| blueprint.role(&c.role_id))
            .filter(|role| role_admits(role, principal));
        candidates.next().ok_or_else(|| EngineError::NotFound {
            what: "consuming role",
            id: interaction_id.to_string(),
        })
    }

    /// Walk a UOW's ledger backwards for the most recent recorded lease
    /// holder, used by pilot operations to restore the lease on resume.
    pub(crate) async fn previous_lease_holder(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow_id: &UowId,
    ) -> Result<Option<ActorId>> {
        let history = txn.load_history(uow_id).await?;
        for entry in history.iter().rev() {
            if let Some(previous) = entry
                .metadata
                .get("previous_lease_actor")
                .and_then(Json::as_str)
            {
                return Ok(Some(ActorId::from(previous)));
            }
        }
        Ok(None)
    }

    /// Load the instance-scoped blueprint for a UOW.
    pub(crate) async fn blueprint_of(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        instance_id: &InstanceId,
    ) -> Result<Blueprint> {
        Ok(txn.fetch_blueprint(instance_id.as_str()).await?)
    }

    pub(crate) fn mint<T: From<String>>(&self, prefix: &str) -> T {
        T::from(self.ids.generate(prefix))
    }
}

pub(crate) fn role_admits(role: &crate::storage::RoleRecord, principal: &Principal) -> bool {
    if role.actor_classes.is_empty() {
        return true;
    }
    principal
        .class
        .as_ref()
        .is_some_and(|class| role.actor_classes.contains(class))
}

/// Options for [`WorkflowEngine::instantiate_workflow`].
#[derive(Clone, Debug, Default)]
pub struct InstantiateOptions {
    /// Instance display name; defaults to the template name.
    pub name: Option<String>,
    /// Routing-advance ceiling for the seed UOW; defaults from config.
    pub max_interactions: Option<u32>,
    /// Checkout priority of the seed UOW.
    pub priority: i32,
}

// Re-exported operation types, so callers import from `engine` alone.
pub use admin::DecayReport;
pub use checkout::{CheckoutReceipt, HeartbeatStatus};
pub use pilot::KillSwitchReport;
pub use submit::{SubmitOutcome, SubmitReceipt};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RoleRecord;
    use crate::types::RoleId;

    fn role_with_classes(classes: &[&str]) -> RoleRecord {
        RoleRecord {
            id: RoleId::from("role-1"),
            scope_id: "inst-1".to_string(),
            name: "Workers".to_string(),
            kind: crate::types::RoleKind::Beta,
            strategy: None,
            actor_classes: classes.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    #[test]
    fn open_role_admits_anyone() {
        let role = role_with_classes(&[]);
        assert!(role_admits(&role, &Principal::new("actor-a")));
    }

    #[test]
    fn restricted_role_requires_matching_class() {
        let role = role_with_classes(&["ai", "human"]);
        assert!(!role_admits(&role, &Principal::new("actor-a")));
        assert!(role_admits(
            &role,
            &Principal::new("actor-a").with_class("ai")
        ));
        assert!(!role_admits(
            &role,
            &Principal::new("actor-a").with_class("cron")
        ));
    }
}
