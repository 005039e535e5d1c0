//! Checkout, heartbeat, and failure reporting.
//!
//! Checkout is the only writer that grants `ACTIVE`: it scans the role's
//! inbound interactions for the best PENDING candidate, applies the
//! ambiguity-lock gate, and leases atomically. A candidate that has burned
//! through its routing allowance is soft-zombied and "no work" is returned
//! rather than silently skipping to the next row; the stall must become
//! visible, not buried.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use tracing::instrument;

use super::{EngineError, Result, WorkflowEngine, role_admits};
use crate::events::{EngineEvent, EventKind};
use crate::history::{TransitionKind, TransitionRecord};
use crate::storage::ActorRecord;
use crate::types::{Principal, RoleId, UowId, UowStatus};

/// A granted lease: the work item plus the attribute view the actor is
/// allowed to see.
#[derive(Clone, Debug)]
pub struct CheckoutReceipt {
    pub uow_id: UowId,
    pub attributes: FxHashMap<String, Json>,
}

/// Result of a heartbeat.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatStatus {
    /// Lease confirmed, clock reset.
    Fresh,
    /// The lease is gone; stop working and re-checkout.
    Stale,
}

impl WorkflowEngine {
    /// Find and lease the next eligible unit of work for `role`.
    ///
    /// Returns `Ok(None)` when the queue is empty, and also when the
    /// best candidate tripped the ambiguity lock, which parks it in
    /// `ZOMBIED_SOFT` for a pilot instead of handing it out.
    #[instrument(skip(self, principal), fields(actor = %principal.actor_id, role = %role_id))]
    pub async fn checkout_work(
        &self,
        principal: &Principal,
        role_id: &RoleId,
    ) -> Result<Option<CheckoutReceipt>> {
        if principal.actor_id.is_system() {
            return Err(EngineError::validation(
                "the system actor cannot lease work",
            ));
        }

        let mut txn = self.storage().begin().await?;
        let role = txn.fetch_role(role_id).await?;
        if !role_admits(&role, principal) {
            return Err(EngineError::validation(format!(
                "actor class {:?} is not admitted by role `{}`",
                principal.class, role.name
            )));
        }

        let now = Utc::now();
        txn.upsert_actor(ActorRecord {
            id: principal.actor_id.clone(),
            class: principal.class.clone(),
            first_seen: now,
            last_seen: now,
        })
        .await?;

        let blueprint = txn.fetch_blueprint(&role.scope_id).await?;
        let inbound = blueprint.inbound_interactions_of_role(&role.id);
        if inbound.is_empty() {
            txn.commit().await?;
            return Ok(None);
        }

        let candidates = txn.pending_uows_in(&inbound).await?;
        let Some(candidate) = candidates.into_iter().next() else {
            txn.commit().await?;
            return Ok(None);
        };
        let mut uow = txn.load_uow(&candidate.id).await?;

        // Ambiguity-lock gate: a token that has exhausted its routing
        // allowance is stalled, not leased.
        if uow.interaction_count >= uow.max_interactions {
            let interaction_count = uow.interaction_count;
            let max_interactions = uow.max_interactions;
            self.transition(
                &mut txn,
                &mut uow,
                TransitionRecord::new(
                    Some(UowStatus::Pending),
                    UowStatus::ZombiedSoft,
                    principal.actor_id.clone(),
                    TransitionKind::AmbiguityLock,
                )
                .with_reason("interaction budget exhausted")
                .with_metadata(serde_json::json!({
                    "interaction_count": interaction_count,
                    "max_interactions": max_interactions,
                })),
            )
            .await?;
            self.emit(
                EngineEvent::new(
                    EventKind::AmbiguityLockDetected,
                    serde_json::json!({
                        "interaction_count": uow.interaction_count,
                        "max_interactions": uow.max_interactions,
                    }),
                )
                .for_uow(uow.id.clone())
                .for_instance(uow.instance_id.clone()),
            );
            txn.commit().await?;
            return Ok(None);
        }

        uow.lease_actor_id = Some(principal.actor_id.clone());
        uow.last_heartbeat = Some(now);
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::Pending),
                UowStatus::Active,
                principal.actor_id.clone(),
                TransitionKind::Checkout,
            )
            .with_metadata(serde_json::json!({"role": role.name})),
        )
        .await?;

        let attributes = txn.load_attributes(&uow.id).await?;
        let view = crate::attrs::latest_view(&attributes, &principal.actor_id);
        txn.commit().await?;

        Ok(Some(CheckoutReceipt {
            uow_id: uow.id,
            attributes: view,
        }))
    }

    /// Refresh a lease. `Stale` is an answer, not an error: the actor
    /// learns it lost the lease and should re-checkout.
    pub async fn heartbeat(&self, uow_id: &UowId, actor_id: &crate::types::ActorId) -> Result<HeartbeatStatus> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        if uow.status != UowStatus::Active || uow.lease_actor_id.as_ref() != Some(actor_id) {
            return Ok(HeartbeatStatus::Stale);
        }
        uow.last_heartbeat = Some(Utc::now());
        uow.updated_at = Utc::now();
        txn.update_uow(&uow).await?;
        txn.commit().await?;
        Ok(HeartbeatStatus::Fresh)
    }

    /// Report a failure on leased work: the token fails and lands on the
    /// EPSILON role's inbound interaction (the Ate Path) for post-mortem.
    #[instrument(skip(self, details), fields(uow = %uow_id, code))]
    pub async fn report_failure(
        &self,
        uow_id: &UowId,
        principal: &Principal,
        code: &str,
        details: &str,
    ) -> Result<()> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        if uow.status != UowStatus::Active
            || uow.lease_actor_id.as_ref() != Some(&principal.actor_id)
        {
            return Err(EngineError::LeaseLost {
                uow_id: uow_id.clone(),
                actor_id: principal.actor_id.clone(),
            });
        }

        let instance_id = uow.instance_id.clone();
        let blueprint = self.blueprint_of(&mut txn, &instance_id).await?;
        let ate_path = blueprint
            .role_of_kind(crate::types::RoleKind::Epsilon)
            .map(|epsilon| blueprint.inbound_interactions_of_role(&epsilon.id))
            .and_then(|mut interactions| {
                if interactions.is_empty() {
                    None
                } else {
                    Some(interactions.remove(0))
                }
            });
        if let Some(interaction) = ate_path {
            uow.current_interaction_id = Some(interaction);
        }

        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::Active),
                UowStatus::Failed,
                principal.actor_id.clone(),
                TransitionKind::Failure,
            )
            .with_reason(code)
            .with_metadata(serde_json::json!({"details": details})),
        )
        .await?;
        self.credit_parent_terminal(&mut txn, &uow).await?;
        txn.commit().await?;
        Ok(())
    }
}
