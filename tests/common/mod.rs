//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use gatewright::attrs::AttributeRecord;
use gatewright::engine::WorkflowEngine;
use gatewright::events::{EventBus, MemorySink};
use gatewright::storage::memory::MemoryStorage;
use gatewright::storage::{Storage, UowRecord};
use gatewright::types::{ActorId, InstanceId, RoleId, UowId};

/// The baseline template: ALPHA → BETA(HOMOGENEOUS) → OMEGA with an
/// EPSILON Ate Path and a TAU janitor. Workers route by `score`.
pub const TRIAGE_TEMPLATE: &str = r#"
workflow:
  name: invoice-triage
  version: "1.0"
  description: Routes invoices by score.
  attributes: [amount, score, risk, undefined_attr]
  roles:
    - { name: Intake, kind: ALPHA }
    - { name: Workers, kind: BETA, strategy: HOMOGENEOUS }
    - { name: Archive, kind: OMEGA }
    - { name: Triage, kind: EPSILON }
    - { name: Janitor, kind: TAU }
  interactions:
    - { name: Inbox }
    - { name: Done }
    - { name: AtePath }
  components:
    - { name: intake-out, role: Intake, interaction: Inbox, direction: OUTBOUND }
    - { name: workers-in, role: Workers, interaction: Inbox, direction: INBOUND }
    - name: workers-out
      role: Workers
      interaction: Done
      direction: OUTBOUND
      guardian:
        type: CRITERIA_GATE
        attributes:
          interaction_policy:
            branches:
              - { condition: "score < 0.5", action: ROUTE, next_interaction: Done }
            default: { action: ROUTE, next_interaction: Done }
    - name: archive-in
      role: Archive
      interaction: Done
      direction: INBOUND
      guardian: { type: CERBERUS }
    - name: triage-in
      role: Triage
      interaction: AtePath
      direction: INBOUND
      guardian: { type: PASS_THRU }
    - { name: janitor-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }
"#;

/// Fork template: Workers split traffic by `risk` into two downstream
/// BETA queues that both converge on the terminal gate.
pub const FORK_TEMPLATE: &str = r#"
workflow:
  name: risk-fork
  version: "1.0"
  attributes: [risk, undefined_attr]
  roles:
    - { name: Intake, kind: ALPHA }
    - { name: Screeners, kind: BETA, strategy: HETEROGENEOUS }
    - { name: CriticalDesk, kind: BETA, strategy: HOMOGENEOUS }
    - { name: StandardDesk, kind: BETA, strategy: HOMOGENEOUS }
    - { name: Archive, kind: OMEGA }
    - { name: Triage, kind: EPSILON }
    - { name: Janitor, kind: TAU }
  interactions:
    - { name: Screening }
    - { name: Critical_Queue }
    - { name: Standard_Queue }
    - { name: Done }
    - { name: AtePath }
  components:
    - { name: intake-out, role: Intake, interaction: Screening, direction: OUTBOUND }
    - { name: screeners-in, role: Screeners, interaction: Screening, direction: INBOUND }
    - name: screeners-out-critical
      role: Screeners
      interaction: Critical_Queue
      direction: OUTBOUND
      guardian:
        type: CRITERIA_GATE
        attributes:
          interaction_policy:
            branches:
              - { condition: "risk > 0.8", action: ROUTE, next_interaction: Critical_Queue }
            default: { action: ROUTE, next_interaction: Standard_Queue }
    - name: screeners-out-standard
      role: Screeners
      interaction: Standard_Queue
      direction: OUTBOUND
      guardian:
        type: CRITERIA_GATE
        attributes:
          interaction_policy:
            branches:
              - { condition: "risk > 0.8", action: ROUTE, next_interaction: Critical_Queue }
            default: { action: ROUTE, next_interaction: Standard_Queue }
    - { name: critical-in, role: CriticalDesk, interaction: Critical_Queue, direction: INBOUND }
    - { name: critical-out, role: CriticalDesk, interaction: Done, direction: OUTBOUND }
    - { name: standard-in, role: StandardDesk, interaction: Standard_Queue, direction: INBOUND }
    - { name: standard-out, role: StandardDesk, interaction: Done, direction: OUTBOUND }
    - name: archive-in
      role: Archive
      interaction: Done
      direction: INBOUND
      guardian: { type: CERBERUS }
    - name: triage-in
      role: Triage
      interaction: AtePath
      direction: INBOUND
      guardian: { type: PASS_THRU }
    - { name: janitor-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }
"#;

/// Self-loop template for the ambiguity-lock scenario: Workers route
/// their output straight back to their own inbox.
pub const LOOP_TEMPLATE: &str = r#"
workflow:
  name: treadmill
  version: "1.0"
  attributes: [amount]
  roles:
    - { name: Intake, kind: ALPHA }
    - { name: Workers, kind: BETA, strategy: HOMOGENEOUS }
    - { name: Archive, kind: OMEGA }
    - { name: Triage, kind: EPSILON }
    - { name: Janitor, kind: TAU }
  interactions:
    - { name: Inbox }
    - { name: Done }
    - { name: AtePath }
  components:
    - { name: intake-out, role: Intake, interaction: Inbox, direction: OUTBOUND }
    - { name: workers-in, role: Workers, interaction: Inbox, direction: INBOUND }
    - name: workers-out
      role: Workers
      interaction: Inbox
      direction: OUTBOUND
      guardian:
        type: CRITERIA_GATE
        attributes:
          interaction_policy:
            default: { action: ROUTE, next_interaction: Inbox }
    - { name: omega-feeder, role: Triage, interaction: Done, direction: OUTBOUND }
    - name: archive-in
      role: Archive
      interaction: Done
      direction: INBOUND
      guardian: { type: CERBERUS }
    - name: triage-in
      role: Triage
      interaction: AtePath
      direction: INBOUND
      guardian: { type: PASS_THRU }
    - { name: janitor-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }
"#;

/// An engine over fresh memory storage plus the hooks tests assert on.
pub struct Harness {
    pub engine: Arc<WorkflowEngine>,
    pub storage: Arc<MemoryStorage>,
    pub sink: MemorySink,
    pub bus: EventBus,
}

pub fn harness() -> Harness {
    harness_with(|engine| engine)
}

pub fn harness_with(customize: impl FnOnce(WorkflowEngine) -> WorkflowEngine) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let sink = MemorySink::new();
    let bus = EventBus::with_sink(sink.clone());
    bus.listen_for_events();
    let engine = customize(
        WorkflowEngine::new(storage.clone() as Arc<dyn Storage>).with_emitter(bus.emitter()),
    );
    Harness {
        engine: Arc::new(engine),
        storage,
        sink,
        bus,
    }
}

/// Resolve an instance-scoped role id by name.
pub async fn role_id(storage: &MemoryStorage, instance: &InstanceId, name: &str) -> RoleId {
    let mut txn = storage.begin().await.unwrap();
    let blueprint = txn.fetch_blueprint(instance.as_str()).await.unwrap();
    blueprint
        .roles
        .iter()
        .find(|r| r.name == name)
        .unwrap_or_else(|| panic!("no role named {name}"))
        .id
        .clone()
}

pub async fn load_uow(storage: &MemoryStorage, id: &UowId) -> UowRecord {
    let mut txn = storage.begin().await.unwrap();
    txn.load_uow(id).await.unwrap()
}

pub async fn load_history(
    storage: &MemoryStorage,
    id: &UowId,
) -> Vec<gatewright::history::HistoryEntry> {
    let mut txn = storage.begin().await.unwrap();
    txn.load_history(id).await.unwrap()
}

pub async fn load_attributes(storage: &MemoryStorage, id: &UowId) -> Vec<AttributeRecord> {
    let mut txn = storage.begin().await.unwrap();
    txn.load_attributes(id).await.unwrap()
}

/// Write an attribute row directly, bypassing the engine (for fixtures
/// that need a Personal Playbook entry in place).
pub async fn write_raw_attribute(storage: &MemoryStorage, record: AttributeRecord) {
    let mut txn = storage.begin().await.unwrap();
    txn.insert_attribute(record).await.unwrap();
    txn.commit().await.unwrap();
}

pub fn actor(name: &str) -> gatewright::types::Principal {
    gatewright::types::Principal::new(ActorId::from(name))
}

/// Interaction name a UOW currently sits in.
pub async fn interaction_name(
    storage: &MemoryStorage,
    instance: &InstanceId,
    uow: &UowRecord,
) -> Option<String> {
    let mut txn = storage.begin().await.unwrap();
    let blueprint = txn.fetch_blueprint(instance.as_str()).await.unwrap();
    uow.current_interaction_id
        .as_ref()
        .and_then(|id| blueprint.interaction(id))
        .map(|i| i.name.clone())
}
