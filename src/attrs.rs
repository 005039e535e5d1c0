//! Versioned unit-of-work attributes and the two-namespace merge.
//!
//! Attributes are insert-only rows `(uow_id, key, version, value, owner,
//! author, reasoning)`. Versions per `(uow_id, key)` are strictly
//! increasing across both namespaces. Ownership splits the rows in two:
//!
//! - **Global Blueprint**: `owner_actor_id == None`, visible to everyone,
//!   inherited by children on decomposition, and the namespace the content
//!   hash covers.
//! - **Personal Playbook**: `owner_actor_id == Some(actor)`, visible only
//!   to that actor, overriding the global value for them alone. Never
//!   inherited, never hashed.
//!
//! A reader's view is simply the highest version it is allowed to see for
//! each key. There is no deletion; superseded versions stay for audit until
//! administrative decay removes them.

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::BTreeMap;

use crate::types::{ActorId, UowId};

/// One persisted attribute version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeRecord {
    pub uow_id: UowId,
    pub key: String,
    pub version: u32,
    pub value: Json,
    /// `None` = Global Blueprint; `Some(actor)` = that actor's Personal
    /// Playbook entry.
    pub owner_actor_id: Option<ActorId>,
    pub author_actor_id: ActorId,
    pub reasoning: Option<String>,
    pub written_at: DateTime<Utc>,
}

/// A pending attribute write, before a version has been allocated.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeWrite {
    pub key: String,
    pub value: Json,
    pub owner_actor_id: Option<ActorId>,
    pub reasoning: Option<String>,
}

impl AttributeWrite {
    pub fn global(key: impl Into<String>, value: Json) -> Self {
        Self {
            key: key.into(),
            value,
            owner_actor_id: None,
            reasoning: None,
        }
    }

    #[must_use]
    pub fn personal(mut self, owner: ActorId) -> Self {
        self.owner_actor_id = Some(owner);
        self
    }

    #[must_use]
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

/// One entry of an attribute diff: `old == None` is an introduction,
/// `new == None` a disappearance (only possible through decay).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDelta {
    pub key: String,
    pub old: Option<Json>,
    pub new: Option<Json>,
}

/// Merge records into the view a given actor is allowed to see: for each
/// key, the highest version whose owner is global or the viewer itself.
pub fn latest_view(records: &[AttributeRecord], viewer: &ActorId) -> FxHashMap<String, Json> {
    let mut best: FxHashMap<&str, &AttributeRecord> = FxHashMap::default();
    for record in records {
        let visible = match &record.owner_actor_id {
            None => true,
            Some(owner) => owner == viewer,
        };
        if !visible {
            continue;
        }
        match best.get(record.key.as_str()) {
            Some(current) if current.version >= record.version => {}
            _ => {
                best.insert(record.key.as_str(), record);
            }
        }
    }
    best.into_iter()
        .map(|(key, record)| (key.to_string(), record.value.clone()))
        .collect()
}

/// The Global Blueprint view: latest owner-less version per key, sorted.
/// This is the map the content hash covers and the map children inherit.
pub fn global_view(records: &[AttributeRecord]) -> BTreeMap<String, Json> {
    let mut best: BTreeMap<&str, &AttributeRecord> = BTreeMap::new();
    for record in records {
        if record.owner_actor_id.is_some() {
            continue;
        }
        match best.get(record.key.as_str()) {
            Some(current) if current.version >= record.version => {}
            _ => {
                best.insert(record.key.as_str(), record);
            }
        }
    }
    best.into_iter()
        .map(|(key, record)| (key.to_string(), record.value.clone()))
        .collect()
}

/// Next version for `(uow, key)`: one past the highest existing version in
/// either namespace.
pub fn next_version(records: &[AttributeRecord], key: &str) -> u32 {
    records
        .iter()
        .filter(|r| r.key == key)
        .map(|r| r.version)
        .max()
        .unwrap_or(0)
        + 1
}

/// Key-wise diff between two attribute views.
pub fn diff(
    old: &FxHashMap<String, Json>,
    new: &FxHashMap<String, Json>,
) -> Vec<AttributeDelta> {
    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort_unstable();
    keys.dedup();
    keys.into_iter()
        .filter_map(|key| {
            let before = old.get(key);
            let after = new.get(key);
            if before == after {
                return None;
            }
            Some(AttributeDelta {
                key: key.clone(),
                old: before.cloned(),
                new: after.cloned(),
            })
        })
        .collect()
}
