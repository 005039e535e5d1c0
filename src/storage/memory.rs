//! In-memory storage driver.
//!
//! The whole store sits behind one async mutex; a transaction owns the
//! guard for its full duration, which gives single-writer serialization
//! (the same discipline SQLite enforces) and trivially correct row
//! protection. Rollback is a snapshot restore: `begin` clones the store,
//! and a transaction dropped without commit writes the clone back.
//!
//! Volatile by design; use it for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
    ActorRecord, Blueprint, ComponentRecord, GuardRecord, InstanceRecord, InteractionRecord,
    Result, RoleRecord, Storage, StorageError, StorageTxn, TemplateRecord, UowRecord,
};
use crate::attrs::AttributeRecord;
use crate::history::HistoryEntry;
use crate::types::{InstanceId, InteractionId, TemplateId, UowId, UowStatus};

#[derive(Clone, Debug, Default)]
struct MemoryInner {
    templates: BTreeMap<String, TemplateRecord>,
    roles: Vec<RoleRecord>,
    interactions: Vec<InteractionRecord>,
    components: Vec<ComponentRecord>,
    guards: Vec<GuardRecord>,
    instances: BTreeMap<String, InstanceRecord>,
    actors: BTreeMap<String, ActorRecord>,
    uows: BTreeMap<String, UowRecord>,
    attributes: Vec<AttributeRecord>,
    history: Vec<HistoryEntry>,
}

/// Process-local storage with snapshot rollback.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTxn>> {
        let guard = Arc::clone(&self.inner).lock_owned().await;
        let snapshot = guard.clone();
        Ok(Box::new(MemoryTxn {
            guard,
            snapshot,
            committed: false,
        }))
    }
}

pub struct MemoryTxn {
    guard: OwnedMutexGuard<MemoryInner>,
    snapshot: MemoryInner,
    committed: bool,
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.committed {
            // Roll back: restore the pre-transaction snapshot.
            *self.guard = std::mem::take(&mut self.snapshot);
        }
    }
}

#[async_trait]
impl StorageTxn for MemoryTxn {
    async fn insert_template(&mut self, template: TemplateRecord) -> Result<()> {
        let key = template.id.to_string();
        if self.guard.templates.contains_key(&key) {
            return Err(StorageError::Conflict {
                message: format!("template {key} already exists"),
            });
        }
        self.guard.templates.insert(key, template);
        Ok(())
    }

    async fn fetch_template(&mut self, id: &TemplateId) -> Result<TemplateRecord> {
        self.guard
            .templates
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: "template",
                id: id.to_string(),
            })
    }

    async fn insert_role(&mut self, role: RoleRecord) -> Result<()> {
        self.guard.roles.push(role);
        Ok(())
    }

    async fn fetch_role(&mut self, id: &crate::types::RoleId) -> Result<RoleRecord> {
        self.guard
            .roles
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: "role",
                id: id.to_string(),
            })
    }

    async fn insert_interaction(&mut self, interaction: InteractionRecord) -> Result<()> {
        self.guard.interactions.push(interaction);
        Ok(())
    }

    async fn insert_component(&mut self, component: ComponentRecord) -> Result<()> {
        self.guard.components.push(component);
        Ok(())
    }

    async fn insert_guard(&mut self, guard: GuardRecord) -> Result<()> {
        self.guard.guards.push(guard);
        Ok(())
    }

    async fn fetch_blueprint(&mut self, scope_id: &str) -> Result<Blueprint> {
        Ok(Blueprint {
            roles: self
                .guard
                .roles
                .iter()
                .filter(|r| r.scope_id == scope_id)
                .cloned()
                .collect(),
            interactions: self
                .guard
                .interactions
                .iter()
                .filter(|i| i.scope_id == scope_id)
                .cloned()
                .collect(),
            components: self
                .guard
                .components
                .iter()
                .filter(|c| c.scope_id == scope_id)
                .cloned()
                .collect(),
            guards: self
                .guard
                .guards
                .iter()
                .filter(|g| g.scope_id == scope_id)
                .cloned()
                .collect(),
        })
    }

    async fn insert_instance(&mut self, instance: InstanceRecord) -> Result<()> {
        self.guard
            .instances
            .insert(instance.id.to_string(), instance);
        Ok(())
    }

    async fn fetch_instance(&mut self, id: &InstanceId) -> Result<InstanceRecord> {
        self.guard
            .instances
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: "instance",
                id: id.to_string(),
            })
    }

    async fn upsert_actor(&mut self, actor: ActorRecord) -> Result<()> {
        self.guard
            .actors
            .entry(actor.id.to_string())
            .and_modify(|existing| {
                existing.last_seen = actor.last_seen;
                if existing.class.is_none() {
                    existing.class = actor.class.clone();
                }
            })
            .or_insert(actor);
        Ok(())
    }

    async fn insert_uow(&mut self, uow: UowRecord) -> Result<()> {
        let key = uow.id.to_string();
        if self.guard.uows.contains_key(&key) {
            return Err(StorageError::Conflict {
                message: format!("uow {key} already exists"),
            });
        }
        self.guard.uows.insert(key, uow);
        Ok(())
    }

    async fn load_uow(&mut self, id: &UowId) -> Result<UowRecord> {
        self.guard
            .uows
            .get(id.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                what: "uow",
                id: id.to_string(),
            })
    }

    async fn update_uow(&mut self, uow: &UowRecord) -> Result<()> {
        match self.guard.uows.get_mut(uow.id.as_str()) {
            Some(row) => {
                *row = uow.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                what: "uow",
                id: uow.id.to_string(),
            }),
        }
    }

    async fn pending_uows_in(&mut self, interactions: &[InteractionId]) -> Result<Vec<UowRecord>> {
        let mut rows: Vec<UowRecord> = self
            .guard
            .uows
            .values()
            .filter(|u| {
                u.status == UowStatus::Pending
                    && u.current_interaction_id
                        .as_ref()
                        .is_some_and(|i| interactions.contains(i))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(rows)
    }

    async fn active_uows_of_instance(&mut self, instance: &InstanceId) -> Result<Vec<UowRecord>> {
        Ok(self
            .guard
            .uows
            .values()
            .filter(|u| u.status == UowStatus::Active && &u.instance_id == instance)
            .cloned()
            .collect())
    }

    async fn active_uows_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>> {
        Ok(self
            .guard
            .uows
            .values()
            .filter(|u| {
                u.status == UowStatus::Active
                    && u.last_heartbeat.is_some_and(|hb| hb < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn soft_zombies_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>> {
        Ok(self
            .guard
            .uows
            .values()
            .filter(|u| {
                u.status == UowStatus::ZombiedSoft
                    && u.last_heartbeat.is_some_and(|hb| hb < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn children_of(&mut self, parent: &UowId) -> Result<Vec<UowRecord>> {
        let mut rows: Vec<UowRecord> = self
            .guard
            .uows
            .values()
            .filter(|u| u.parent_id.as_ref() == Some(parent))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn insert_attribute(&mut self, attribute: AttributeRecord) -> Result<()> {
        let clash = self.guard.attributes.iter().any(|a| {
            a.uow_id == attribute.uow_id && a.key == attribute.key && a.version == attribute.version
        });
        if clash {
            return Err(StorageError::Conflict {
                message: format!(
                    "attribute version already exists: {}/{}/v{}",
                    attribute.uow_id, attribute.key, attribute.version
                ),
            });
        }
        self.guard.attributes.push(attribute);
        Ok(())
    }

    async fn load_attributes(&mut self, uow: &UowId) -> Result<Vec<AttributeRecord>> {
        Ok(self
            .guard
            .attributes
            .iter()
            .filter(|a| &a.uow_id == uow)
            .cloned()
            .collect())
    }

    async fn delete_superseded_attributes_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let latest: Vec<(UowId, String, u32)> = {
            let mut best: BTreeMap<(String, String), u32> = BTreeMap::new();
            for a in &self.guard.attributes {
                let key = (a.uow_id.to_string(), a.key.clone());
                let entry = best.entry(key).or_insert(0);
                if a.version > *entry {
                    *entry = a.version;
                }
            }
            best.into_iter()
                .map(|((uow, key), v)| (UowId::new(uow), key, v))
                .collect()
        };
        let is_latest = |a: &AttributeRecord| {
            latest
                .iter()
                .any(|(uow, key, v)| uow == &a.uow_id && key == &a.key && *v == a.version)
        };
        let before = self.guard.attributes.len();
        self.guard
            .attributes
            .retain(|a| is_latest(a) || a.written_at >= cutoff);
        Ok((before - self.guard.attributes.len()) as u64)
    }

    async fn append_history(&mut self, mut entry: HistoryEntry) -> Result<HistoryEntry> {
        let next_seq = self
            .guard
            .history
            .iter()
            .filter(|h| h.uow_id == entry.uow_id)
            .map(|h| h.seq)
            .max()
            .unwrap_or(0)
            + 1;
        if entry.seq == 0 {
            entry.seq = next_seq;
        } else if entry.seq != next_seq {
            let identical = self
                .guard
                .history
                .iter()
                .any(|h| h.uow_id == entry.uow_id && h.seq == entry.seq && *h == entry);
            if identical {
                // Idempotent re-append of the same row.
                return Ok(entry);
            }
            return Err(StorageError::Conflict {
                message: format!(
                    "history seq {} already taken for {}",
                    entry.seq, entry.uow_id
                ),
            });
        }
        self.guard.history.push(entry.clone());
        Ok(entry)
    }

    async fn load_history(&mut self, uow: &UowId) -> Result<Vec<HistoryEntry>> {
        let mut rows: Vec<HistoryEntry> = self
            .guard
            .history
            .iter()
            .filter(|h| &h.uow_id == uow)
            .cloned()
            .collect();
        rows.sort_by_key(|h| h.seq);
        Ok(rows)
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.committed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::TransitionKind;
    use crate::types::ActorId;
    use serde_json::Value as Json;

    fn uow(id: &str) -> UowRecord {
        UowRecord {
            id: UowId::from(id),
            instance_id: InstanceId::from("inst-1"),
            parent_id: None,
            status: UowStatus::Pending,
            interaction_count: 0,
            max_interactions: 10,
            current_interaction_id: Some(InteractionId::from("ixn-1")),
            lease_actor_id: None,
            last_heartbeat: None,
            content_hash: String::new(),
            child_count: 0,
            finished_child_count: 0,
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uncommitted_txn_rolls_back() {
        let storage = MemoryStorage::new();
        {
            let mut txn = storage.begin().await.unwrap();
            txn.insert_uow(uow("uow-a")).await.unwrap();
            // dropped without commit
        }
        let mut txn = storage.begin().await.unwrap();
        assert!(matches!(
            txn.load_uow(&UowId::from("uow-a")).await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn committed_txn_persists() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin().await.unwrap();
        txn.insert_uow(uow("uow-a")).await.unwrap();
        txn.commit().await.unwrap();

        let mut txn = storage.begin().await.unwrap();
        let loaded = txn.load_uow(&UowId::from("uow-a")).await.unwrap();
        assert_eq!(loaded.status, UowStatus::Pending);
    }

    #[tokio::test]
    async fn pending_ordering_is_priority_then_age() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin().await.unwrap();
        let mut low = uow("uow-low");
        low.priority = 0;
        let mut high = uow("uow-high");
        high.priority = 5;
        high.created_at = low.created_at + chrono::Duration::seconds(10);
        txn.insert_uow(low).await.unwrap();
        txn.insert_uow(high).await.unwrap();

        let rows = txn
            .pending_uows_in(&[InteractionId::from("ixn-1")])
            .await
            .unwrap();
        assert_eq!(rows[0].id.as_str(), "uow-high");
        assert_eq!(rows[1].id.as_str(), "uow-low");
    }

    #[tokio::test]
    async fn history_seq_allocates_monotonically() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin().await.unwrap();
        let entry = HistoryEntry {
            uow_id: UowId::from("uow-a"),
            seq: 0,
            from_status: None,
            to_status: UowStatus::Pending,
            actor_id: ActorId::system(),
            event_type: TransitionKind::Created,
            reason: None,
            prev_content_hash: String::new(),
            new_content_hash: "h1".into(),
            recorded_at: Utc::now(),
            metadata: Json::Null,
        };
        let first = txn.append_history(entry.clone()).await.unwrap();
        let second = txn.append_history(entry).await.unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
    }

    #[tokio::test]
    async fn history_rows_cannot_be_rewritten() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin().await.unwrap();
        let entry = HistoryEntry {
            uow_id: UowId::from("uow-a"),
            seq: 0,
            from_status: None,
            to_status: UowStatus::Pending,
            actor_id: ActorId::system(),
            event_type: TransitionKind::Created,
            reason: None,
            prev_content_hash: String::new(),
            new_content_hash: "h1".into(),
            recorded_at: Utc::now(),
            metadata: Json::Null,
        };
        let stamped = txn.append_history(entry).await.unwrap();
        let mut rewrite = stamped.clone();
        rewrite.new_content_hash = "tampered".into();
        assert!(matches!(
            txn.append_history(rewrite).await,
            Err(StorageError::Conflict { .. })
        ));
    }
}
