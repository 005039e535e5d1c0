//! BETA decomposition: fan a parent out into child tokens.
//!
//! Children inherit the parent's Global Blueprint attributes only;
//! Personal Playbook rows never cross the parent/child boundary. The
//! parent's `child_count` grows by `n`; its status does not change, but
//! the fan-out is an audit row on the parent and a creation row per
//! child. Lock order is parent first, then children in id order.

use chrono::Utc;
use tracing::instrument;

use super::{EngineError, Result, WorkflowEngine};
use crate::attrs::AttributeWrite;
use crate::history::{TransitionKind, TransitionRecord};
use crate::storage::UowRecord;
use crate::types::{Principal, RoleId, UowId, UowStatus};

impl WorkflowEngine {
    /// Create `n` children of `parent_uow_id` under the given BETA role.
    /// Returns the child ids in creation (= lock) order.
    #[instrument(skip(self, principal), fields(parent = %parent_uow_id, n))]
    pub async fn decompose(
        &self,
        parent_uow_id: &UowId,
        role_id: &RoleId,
        n: u32,
        principal: &Principal,
    ) -> Result<Vec<UowId>> {
        if n == 0 {
            return Err(EngineError::validation("decomposition needs at least one child"));
        }

        let mut txn = self.storage().begin().await?;
        let role = txn.fetch_role(role_id).await?;
        if !role.kind.may_decompose() {
            return Err(EngineError::validation(format!(
                "role `{}` is {}, only BETA roles decompose",
                role.name, role.kind
            )));
        }
        let strategy = role.strategy.ok_or_else(|| {
            EngineError::validation(format!("BETA role `{}` has no strategy", role.name))
        })?;

        let mut parent = txn.load_uow(parent_uow_id).await?;
        if parent.status.is_terminal() {
            return Err(EngineError::validation(
                "terminal units of work cannot decompose",
            ));
        }

        // Global Blueprint only; personal rows stay with the parent.
        let parent_attrs = txn.load_attributes(parent_uow_id).await?;
        let inherited: Vec<AttributeWrite> = crate::attrs::global_view(&parent_attrs)
            .into_iter()
            .map(|(key, value)| AttributeWrite::global(key, value))
            .collect();

        let mut child_ids: Vec<UowId> = (0..n).map(|_| self.mint(UowId::PREFIX)).collect();
        child_ids.sort();

        let now = Utc::now();
        for child_id in &child_ids {
            let mut child = UowRecord {
                id: child_id.clone(),
                instance_id: parent.instance_id.clone(),
                parent_id: Some(parent.id.clone()),
                status: UowStatus::Pending,
                interaction_count: 0,
                max_interactions: parent.max_interactions,
                current_interaction_id: parent.current_interaction_id.clone(),
                lease_actor_id: None,
                last_heartbeat: None,
                content_hash: String::new(),
                child_count: 0,
                finished_child_count: 0,
                priority: parent.priority,
                created_at: now,
                updated_at: now,
            };
            txn.insert_uow(child.clone()).await?;
            self.write_attributes(&mut txn, child_id, &inherited, &principal.actor_id)
                .await?;
            self.transition(
                &mut txn,
                &mut child,
                TransitionRecord::new(
                    None,
                    UowStatus::Pending,
                    principal.actor_id.clone(),
                    TransitionKind::Created,
                )
                .with_metadata(serde_json::json!({
                    "parent_id": parent.id.clone(),
                    "strategy": strategy.encode(),
                })),
            )
            .await?;
        }

        parent.child_count += n;
        let parent_status = parent.status;
        self.transition(
            &mut txn,
            &mut parent,
            TransitionRecord::new(
                Some(parent_status),
                parent_status,
                principal.actor_id.clone(),
                TransitionKind::Decomposition,
            )
            .with_metadata(serde_json::json!({
                "children": child_ids.clone(),
                "strategy": strategy.encode(),
            })),
        )
        .await?;

        txn.commit().await?;
        Ok(child_ids)
    }
}
