//! The pilot intervention surface: kill-switch, clarify, waive, resume,
//! cancel.
//!
//! Interventions never touch `interaction_count`: a human stepping in is
//! not a routing advance. Every operation checks its precondition against
//! the live row and fails with `IllegalTransition` when the unit of work
//! is not where the pilot thinks it is. Operations that re-enter `ACTIVE`
//! restore the previous lease holder recorded in the ledger, falling back
//! to the pilot itself when none is known.

use chrono::Utc;
use tracing::instrument;

use super::{EngineError, Result, WorkflowEngine};
use crate::attrs::AttributeWrite;
use crate::events::{EngineEvent, EventKind};
use crate::history::{TransitionKind, TransitionRecord};
use crate::state_machine::IllegalTransition;
use crate::types::{InstanceId, Principal, UowId, UowStatus};

/// Outcome of a kill-switch sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KillSwitchReport {
    pub paused_count: u32,
}

impl WorkflowEngine {
    /// Pause every ACTIVE unit of work in an instance.
    #[instrument(skip(self, pilot), fields(instance = %instance_id))]
    pub async fn pilot_kill_switch(
        &self,
        instance_id: &InstanceId,
        reason: &str,
        pilot: &Principal,
    ) -> Result<KillSwitchReport> {
        let mut txn = self.storage().begin().await?;
        // Verify the instance exists before sweeping.
        txn.fetch_instance(instance_id).await?;
        let active = txn.active_uows_of_instance(instance_id).await?;
        let mut paused_count = 0;
        for row in active {
            let mut uow = txn.load_uow(&row.id).await?;
            if uow.status != UowStatus::Active {
                continue;
            }
            let previous = uow.lease_actor_id.clone();
            self.transition(
                &mut txn,
                &mut uow,
                TransitionRecord::new(
                    Some(UowStatus::Active),
                    UowStatus::Paused,
                    pilot.actor_id.clone(),
                    TransitionKind::KillSwitch,
                )
                .with_reason(reason)
                .with_metadata(serde_json::json!({
                    "previous_lease_actor": previous,
                })),
            )
            .await?;
            paused_count += 1;
        }
        txn.commit().await?;
        Ok(KillSwitchReport { paused_count })
    }

    /// Unstick a soft zombie with human guidance. The clarification text
    /// lands as a Global Blueprint attribute authored by the pilot;
    /// `interaction_count` is untouched.
    #[instrument(skip(self, pilot, text), fields(uow = %uow_id))]
    pub async fn pilot_clarify(
        &self,
        uow_id: &UowId,
        text: &str,
        pilot: &Principal,
    ) -> Result<()> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        require_status(&uow.status, UowStatus::ZombiedSoft, UowStatus::Active)?;

        self.write_attributes(
            &mut txn,
            uow_id,
            &[AttributeWrite::global(
                "pilot_clarification",
                serde_json::json!(text),
            )],
            &pilot.actor_id,
        )
        .await?;

        let holder = self
            .previous_lease_holder(&mut txn, uow_id)
            .await?
            .unwrap_or_else(|| pilot.actor_id.clone());
        uow.lease_actor_id = Some(holder);
        uow.last_heartbeat = Some(Utc::now());
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::ZombiedSoft),
                UowStatus::Active,
                pilot.actor_id.clone(),
                TransitionKind::Clarification,
            ),
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Waive the rule that paused a unit of work. The reason is
    /// mandatory: a waiver without a reason is not an audit trail.
    #[instrument(skip(self, pilot), fields(uow = %uow_id, rule_id))]
    pub async fn pilot_waive(
        &self,
        uow_id: &UowId,
        rule_id: &str,
        reason: &str,
        pilot: &Principal,
    ) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(EngineError::validation("waiver reason must be non-empty"));
        }
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        require_status(&uow.status, UowStatus::Paused, UowStatus::Active)?;

        let holder = self
            .previous_lease_holder(&mut txn, uow_id)
            .await?
            .unwrap_or_else(|| pilot.actor_id.clone());
        uow.lease_actor_id = Some(holder);
        uow.last_heartbeat = Some(Utc::now());
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::Paused),
                UowStatus::Active,
                pilot.actor_id.clone(),
                TransitionKind::ConstitutionalWaiver,
            )
            .with_reason(reason)
            .with_metadata(serde_json::json!({"rule_id": rule_id})),
        )
        .await?;
        self.emit(
            EngineEvent::new(
                EventKind::ConstitutionalWaiver,
                serde_json::json!({"rule_id": rule_id, "reason": reason}),
            )
            .for_uow(uow.id.clone())
            .for_instance(uow.instance_id.clone()),
        );
        txn.commit().await?;
        Ok(())
    }

    /// Release parked work back to its original holder.
    #[instrument(skip(self, pilot), fields(uow = %uow_id))]
    pub async fn pilot_resume(&self, uow_id: &UowId, pilot: &Principal) -> Result<()> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        require_status(
            &uow.status,
            UowStatus::PendingPilotApproval,
            UowStatus::Active,
        )?;

        let holder = self
            .previous_lease_holder(&mut txn, uow_id)
            .await?
            .unwrap_or_else(|| pilot.actor_id.clone());
        uow.lease_actor_id = Some(holder);
        uow.last_heartbeat = Some(Utc::now());
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::PendingPilotApproval),
                UowStatus::Active,
                pilot.actor_id.clone(),
                TransitionKind::PilotResume,
            ),
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Refuse parked work: terminal failure, parent credited.
    #[instrument(skip(self, pilot), fields(uow = %uow_id))]
    pub async fn pilot_cancel(
        &self,
        uow_id: &UowId,
        reason: &str,
        pilot: &Principal,
    ) -> Result<()> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        require_status(
            &uow.status,
            UowStatus::PendingPilotApproval,
            UowStatus::Failed,
        )?;

        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::PendingPilotApproval),
                UowStatus::Failed,
                pilot.actor_id.clone(),
                TransitionKind::PilotCancel,
            )
            .with_reason(reason),
        )
        .await?;
        self.credit_parent_terminal(&mut txn, &uow).await?;
        txn.commit().await?;
        Ok(())
    }
}

fn require_status(
    actual: &UowStatus,
    expected: UowStatus,
    target: UowStatus,
) -> std::result::Result<(), EngineError> {
    if *actual == expected {
        Ok(())
    } else {
        Err(EngineError::Illegal(IllegalTransition {
            from: *actual,
            to: target,
        }))
    }
}
