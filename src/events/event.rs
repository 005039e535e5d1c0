//! The engine event record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

use crate::types::{InstanceId, UowId};

/// Kinds of events the engine emits. Wire names follow the audit stream
/// contract; `CONSTITUTIONAL_WAIVER` is uppercase there by convention.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    InterventionRequest,
    AmbiguityLockDetected,
    ZombieSoftDetected,
    ZombieReclaimed,
    ConstitutionalWaiver,
    GuardDecision,
    StateTransition,
}

impl EventKind {
    #[must_use]
    pub fn wire_name(self) -> &'static str {
        match self {
            EventKind::InterventionRequest => "intervention_request",
            EventKind::AmbiguityLockDetected => "ambiguity_lock_detected",
            EventKind::ZombieSoftDetected => "zombie_soft_detected",
            EventKind::ZombieReclaimed => "zombie_reclaimed",
            EventKind::ConstitutionalWaiver => "CONSTITUTIONAL_WAIVER",
            EventKind::GuardDecision => "guard_decision",
            EventKind::StateTransition => "state_transition",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

/// One append-only event record:
/// `{seq, ts_utc, type, uow_id?, instance_id?, payload}`.
///
/// `seq` is assigned by the hub at publish time and is globally monotonic
/// within a process; cross-process ordering is the backend's concern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineEvent {
    pub seq: u64,
    pub ts_utc: DateTime<Utc>,
    pub kind: EventKind,
    #[serde(default)]
    pub uow_id: Option<UowId>,
    #[serde(default)]
    pub instance_id: Option<InstanceId>,
    pub payload: Json,
}

impl EngineEvent {
    /// Build an event with `seq` unassigned (zero); the hub stamps the
    /// real sequence number on publish.
    pub fn new(kind: EventKind, payload: Json) -> Self {
        Self {
            seq: 0,
            ts_utc: Utc::now(),
            kind,
            uow_id: None,
            instance_id: None,
            payload,
        }
    }

    #[must_use]
    pub fn for_uow(mut self, uow_id: UowId) -> Self {
        self.uow_id = Some(uow_id);
        self
    }

    #[must_use]
    pub fn for_instance(mut self, instance_id: InstanceId) -> Self {
        self.instance_id = Some(instance_id);
        self
    }

    /// Serialize to the normalized wire shape (one JSON object, `type` as
    /// the wire name).
    pub fn to_json_value(&self) -> Json {
        serde_json::json!({
            "seq": self.seq,
            "ts_utc": self.ts_utc.to_rfc3339(),
            "type": self.kind.wire_name(),
            "uow_id": self.uow_id,
            "instance_id": self.instance_id,
            "payload": self.payload,
        })
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_json_value())
    }
}

impl fmt::Display for EngineEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.uow_id {
            Some(uow) => write!(f, "[{}] {}", uow, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_names_match_contract() {
        assert_eq!(EventKind::InterventionRequest.wire_name(), "intervention_request");
        assert_eq!(
            EventKind::ConstitutionalWaiver.wire_name(),
            "CONSTITUTIONAL_WAIVER"
        );
        assert_eq!(EventKind::StateTransition.wire_name(), "state_transition");
    }

    #[test]
    fn wire_shape() {
        let event = EngineEvent::new(EventKind::GuardDecision, json!({"matched_branch": 1}))
            .for_uow(UowId::from("uow-9"));
        let value = event.to_json_value();
        assert_eq!(value["type"], "guard_decision");
        assert_eq!(value["uow_id"], "uow-9");
        assert_eq!(value["payload"]["matched_branch"], 1);
    }
}
