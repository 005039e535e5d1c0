//! Pluggable persistence: records for the mandated schema, the
//! transactional driver contract, and the bundled drivers.
//!
//! The core never talks to a database directly. Every public engine
//! operation begins exactly one [`StorageTxn`], performs all reads and
//! writes through it, and commits; dropping a transaction without
//! committing rolls everything back, so no partial state is ever
//! observable. Drivers provide `SELECT … FOR UPDATE`-equivalent semantics
//! for [`StorageTxn::load_uow`]: within a transaction, a loaded UOW row is
//! protected from concurrent mutation until commit.
//!
//! Bundled drivers:
//! - [`memory::MemoryStorage`]: whole-store mutex, snapshot rollback;
//!   the test and ephemeral-run backend.
//! - `sqlite::SqliteStorage` (feature `sqlite`): durable sqlx-backed
//!   driver with embedded migrations.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::attrs::AttributeRecord;
use crate::guards::GuardLogic;
use crate::history::HistoryEntry;
use crate::types::{
    ActorId, ComponentId, DecompositionStrategy, Direction, GuardId, GuardKind, InstanceId,
    InteractionId, RoleId, RoleKind, TemplateId, UowId, UowStatus,
};

/// Errors surfaced by storage drivers.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("{what} not found: {id}")]
    #[diagnostic(code(gatewright::storage::not_found))]
    NotFound { what: &'static str, id: String },

    /// Retryable contention: another writer got there first.
    #[error("storage conflict: {message}")]
    #[diagnostic(
        code(gatewright::storage::conflict),
        help("The operation lost a race; retry against fresh state.")
    )]
    Conflict { message: String },

    #[error("serialization error: {message}")]
    #[diagnostic(code(gatewright::storage::serde))]
    Serialization { message: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(gatewright::storage::backend))]
    Backend { message: String },
}

impl StorageError {
    pub fn backend(message: impl Into<String>) -> Self {
        StorageError::Backend {
            message: message.into(),
        }
    }

    pub fn serde(err: impl std::fmt::Display) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// An imported workflow blueprint header.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub id: TemplateId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub ai_context: Option<String>,
    /// Attribute keys referencable from guard conditions.
    pub attributes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A role row, scoped to a template or an instance. `scope_id` is the raw
/// id of whichever owns the row; materialization clones template-scoped
/// rows into instance scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub id: RoleId,
    pub scope_id: String,
    pub name: String,
    pub kind: RoleKind,
    pub strategy: Option<DecompositionStrategy>,
    pub actor_classes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub id: InteractionId,
    pub scope_id: String,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub id: ComponentId,
    pub scope_id: String,
    pub name: String,
    pub role_id: RoleId,
    pub interaction_id: InteractionId,
    pub direction: Direction,
    pub guard_id: Option<GuardId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardRecord {
    pub id: GuardId,
    pub scope_id: String,
    pub kind: GuardKind,
    /// The evaluatable form, persisted as JSON.
    pub logic: GuardLogic,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub template_id: TemplateId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub id: ActorId,
    pub class: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// The unit-of-work row. One row per token of work; every mutation happens
/// under the driver's row protection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UowRecord {
    pub id: UowId,
    pub instance_id: InstanceId,
    pub parent_id: Option<UowId>,
    pub status: UowStatus,
    pub interaction_count: u32,
    pub max_interactions: u32,
    pub current_interaction_id: Option<InteractionId>,
    pub lease_actor_id: Option<ActorId>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub child_count: u32,
    pub finished_child_count: u32,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A scope's full wiring, loaded in one shot. The engine navigates this
/// in memory rather than issuing a query per hop.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Blueprint {
    pub roles: Vec<RoleRecord>,
    pub interactions: Vec<InteractionRecord>,
    pub components: Vec<ComponentRecord>,
    pub guards: Vec<GuardRecord>,
}

impl Blueprint {
    pub fn role(&self, id: &RoleId) -> Option<&RoleRecord> {
        self.roles.iter().find(|r| &r.id == id)
    }

    pub fn role_of_kind(&self, kind: RoleKind) -> Option<&RoleRecord> {
        self.roles.iter().find(|r| r.kind == kind)
    }

    pub fn interaction(&self, id: &InteractionId) -> Option<&InteractionRecord> {
        self.interactions.iter().find(|i| &i.id == id)
    }

    pub fn interaction_by_name(&self, name: &str) -> Option<&InteractionRecord> {
        self.interactions.iter().find(|i| i.name == name)
    }

    pub fn guard(&self, id: &GuardId) -> Option<&GuardRecord> {
        self.guards.iter().find(|g| &g.id == id)
    }

    /// Components of a role in a given direction, in declaration order.
    pub fn components_of_role(
        &self,
        role_id: &RoleId,
        direction: Direction,
    ) -> Vec<&ComponentRecord> {
        self.components
            .iter()
            .filter(|c| &c.role_id == role_id && c.direction == direction)
            .collect()
    }

    /// Components attached to an interaction in a given direction.
    pub fn components_of_interaction(
        &self,
        interaction_id: &InteractionId,
        direction: Direction,
    ) -> Vec<&ComponentRecord> {
        self.components
            .iter()
            .filter(|c| &c.interaction_id == interaction_id && c.direction == direction)
            .collect()
    }

    /// Interactions a role consumes from (its INBOUND edges).
    pub fn inbound_interactions_of_role(&self, role_id: &RoleId) -> Vec<InteractionId> {
        self.components_of_role(role_id, Direction::Inbound)
            .into_iter()
            .map(|c| c.interaction_id.clone())
            .collect()
    }
}

/// A live transaction. All methods run inside the driver transaction
/// opened by [`Storage::begin`]; nothing is visible to other transactions
/// until [`commit`](Self::commit). Dropping without committing rolls back.
#[async_trait]
pub trait StorageTxn: Send {
    // -- blueprint ---------------------------------------------------------

    async fn insert_template(&mut self, template: TemplateRecord) -> Result<()>;
    async fn fetch_template(&mut self, id: &TemplateId) -> Result<TemplateRecord>;
    async fn insert_role(&mut self, role: RoleRecord) -> Result<()>;
    async fn fetch_role(&mut self, id: &RoleId) -> Result<RoleRecord>;
    async fn insert_interaction(&mut self, interaction: InteractionRecord) -> Result<()>;
    async fn insert_component(&mut self, component: ComponentRecord) -> Result<()>;
    async fn insert_guard(&mut self, guard: GuardRecord) -> Result<()>;
    /// Load the full wiring of a scope (template id or instance id).
    async fn fetch_blueprint(&mut self, scope_id: &str) -> Result<Blueprint>;

    // -- instances & actors -----------------------------------------------

    async fn insert_instance(&mut self, instance: InstanceRecord) -> Result<()>;
    async fn fetch_instance(&mut self, id: &InstanceId) -> Result<InstanceRecord>;
    async fn upsert_actor(&mut self, actor: ActorRecord) -> Result<()>;

    // -- units of work -----------------------------------------------------

    async fn insert_uow(&mut self, uow: UowRecord) -> Result<()>;
    /// Load a UOW row under the transaction's row protection.
    async fn load_uow(&mut self, id: &UowId) -> Result<UowRecord>;
    async fn update_uow(&mut self, uow: &UowRecord) -> Result<()>;
    /// PENDING rows sitting in any of the given interactions, ordered by
    /// `(priority desc, created_at asc, id asc)`.
    async fn pending_uows_in(&mut self, interactions: &[InteractionId]) -> Result<Vec<UowRecord>>;
    async fn active_uows_of_instance(&mut self, instance: &InstanceId) -> Result<Vec<UowRecord>>;
    /// ACTIVE rows whose last heartbeat is older than the cutoff.
    async fn active_uows_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>>;
    /// ZOMBIED_SOFT rows whose last heartbeat is older than the cutoff.
    async fn soft_zombies_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>>;
    /// Children of a parent, ordered by id (the decomposer's lock order).
    async fn children_of(&mut self, parent: &UowId) -> Result<Vec<UowRecord>>;

    // -- attributes --------------------------------------------------------

    async fn insert_attribute(&mut self, attribute: AttributeRecord) -> Result<()>;
    async fn load_attributes(&mut self, uow: &UowId) -> Result<Vec<AttributeRecord>>;
    /// Administrative decay: delete superseded (non-latest) attribute
    /// versions written before the cutoff. Returns the number deleted.
    async fn delete_superseded_attributes_before(&mut self, cutoff: DateTime<Utc>)
    -> Result<u64>;

    // -- history -----------------------------------------------------------

    /// Append a ledger row. `entry.seq == 0` asks the driver to allocate
    /// the next sequence number for the UOW; a non-zero seq re-appends
    /// idempotently (same `(uow_id, seq)` is a conflict unless identical).
    async fn append_history(&mut self, entry: HistoryEntry) -> Result<HistoryEntry>;
    async fn load_history(&mut self, uow: &UowId) -> Result<Vec<HistoryEntry>>;

    /// Commit everything. Consumes the transaction.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// A storage driver: a factory for transactions.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StorageTxn>>;
}
