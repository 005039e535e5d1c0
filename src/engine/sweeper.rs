//! The zombie sweeper: heartbeat-age enforcement.
//!
//! Actors don't enforce their own lease timeouts; the sweeper does. A
//! pass has two stages: ACTIVE leases whose heartbeat aged past the soft
//! threshold become `ZOMBIED_SOFT`; stalls that age past the hard
//! threshold are forfeited through `ZOMBIED_DEAD` back to `PENDING`, each
//! step its own ledger row. Candidate discovery and per-row mutation use
//! separate transactions, so one wedged row never blocks the rest of the
//! sweep.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use super::{Result, WorkflowEngine};
use crate::events::{EngineEvent, EventKind};
use crate::history::{TransitionKind, TransitionRecord};
use crate::types::{ActorId, UowId, UowStatus};

/// Counts from one sweep pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// ACTIVE leases demoted to ZOMBIED_SOFT this pass.
    pub soft_zombied: u32,
    /// Tokens reclaimed to PENDING this pass.
    pub reclaimed: u32,
}

impl WorkflowEngine {
    /// One sweep pass with explicit thresholds (seconds).
    #[instrument(skip(self))]
    pub async fn admin_run_zombie_sweep(
        &self,
        soft_secs: u64,
        hard_secs: u64,
    ) -> Result<SweepReport> {
        let now = Utc::now();
        let soft_cutoff = now - chrono::Duration::seconds(soft_secs as i64);
        let hard_cutoff = now - chrono::Duration::seconds(hard_secs as i64);
        let mut report = SweepReport::default();

        // Discovery in its own read transaction.
        let (stale_active, stale_soft) = {
            let mut txn = self.storage().begin().await?;
            let active = txn.active_uows_stale_since(soft_cutoff).await?;
            let soft = txn.soft_zombies_stale_since(hard_cutoff).await?;
            txn.commit().await?;
            (active, soft)
        };

        for row in stale_active {
            let hard = row.last_heartbeat.is_some_and(|hb| hb < hard_cutoff);
            match self.sweep_active(&row.id, hard).await {
                Ok(reclaimed) => {
                    report.soft_zombied += u32::from(!reclaimed);
                    report.reclaimed += u32::from(reclaimed);
                }
                Err(err) => {
                    warn!(target: "gatewright::sweeper", uow = %row.id, error = %err, "sweep row failed");
                }
            }
        }

        for row in stale_soft {
            match self.sweep_soft_zombie(&row.id).await {
                Ok(true) => report.reclaimed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(target: "gatewright::sweeper", uow = %row.id, error = %err, "sweep row failed");
                }
            }
        }

        info!(
            target: "gatewright::sweeper",
            soft_zombied = report.soft_zombied,
            reclaimed = report.reclaimed,
            "zombie sweep pass complete"
        );
        Ok(report)
    }

    /// Demote one stale ACTIVE lease; push it all the way back to
    /// PENDING when the hard threshold has passed too. Returns whether
    /// the token was reclaimed.
    async fn sweep_active(&self, uow_id: &UowId, hard: bool) -> Result<bool> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        // Re-verify under the row lock: the actor may have come back.
        if uow.status != UowStatus::Active {
            return Ok(false);
        }
        let previous = uow.lease_actor_id.clone();

        if hard {
            self.transition(
                &mut txn,
                &mut uow,
                TransitionRecord::new(
                    Some(UowStatus::Active),
                    UowStatus::ZombiedDead,
                    ActorId::system(),
                    TransitionKind::ZombieDead,
                )
                .with_metadata(serde_json::json!({"previous_lease_actor": previous.clone()})),
            )
            .await?;
            self.reclaim(&mut txn, &mut uow).await?;
            txn.commit().await?;
            return Ok(true);
        }

        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::Active),
                UowStatus::ZombiedSoft,
                ActorId::system(),
                TransitionKind::ZombieSoft,
            )
            .with_metadata(serde_json::json!({"previous_lease_actor": previous.clone()})),
        )
        .await?;
        self.emit(
            EngineEvent::new(
                EventKind::ZombieSoftDetected,
                serde_json::json!({"previous_lease_actor": previous.clone()}),
            )
            .for_uow(uow.id.clone())
            .for_instance(uow.instance_id.clone()),
        );
        txn.commit().await?;
        Ok(false)
    }

    /// Forfeit one hard-stalled soft zombie back to PENDING.
    async fn sweep_soft_zombie(&self, uow_id: &UowId) -> Result<bool> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;
        if uow.status != UowStatus::ZombiedSoft {
            return Ok(false);
        }
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                Some(UowStatus::ZombiedSoft),
                UowStatus::ZombiedDead,
                ActorId::system(),
                TransitionKind::ZombieDead,
            ),
        )
        .await?;
        self.reclaim(&mut txn, &mut uow).await?;
        txn.commit().await?;
        Ok(true)
    }

    /// ZOMBIED_DEAD → PENDING: clear the forfeited lease and re-queue.
    async fn reclaim(
        &self,
        txn: &mut Box<dyn crate::storage::StorageTxn>,
        uow: &mut crate::storage::UowRecord,
    ) -> Result<()> {
        uow.last_heartbeat = None;
        self.transition(
            txn,
            uow,
            TransitionRecord::new(
                Some(UowStatus::ZombiedDead),
                UowStatus::Pending,
                ActorId::system(),
                TransitionKind::ZombieReclaimed,
            ),
        )
        .await?;
        self.emit(
            EngineEvent::new(EventKind::ZombieReclaimed, serde_json::json!({}))
                .for_uow(uow.id.clone())
                .for_instance(uow.instance_id.clone()),
        );
        Ok(())
    }
}

/// Background driver running sweep passes on an interval until told to
/// stop.
pub struct ZombieSweeper {
    engine: std::sync::Arc<WorkflowEngine>,
}

impl ZombieSweeper {
    pub fn new(engine: std::sync::Arc<WorkflowEngine>) -> Self {
        Self { engine }
    }

    /// Run passes every `interval` until `shutdown` flips to `true`.
    /// Thresholds come from the engine config.
    pub async fn run_until_shutdown(&self, mut shutdown: watch::Receiver<bool>) {
        let config = self.engine.config().clone();
        let mut ticker = tokio::time::interval(config.sweep_interval.max(Duration::from_millis(10)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let soft = config.soft_timeout.as_secs();
                    let hard = config.hard_timeout.as_secs();
                    if let Err(err) = self.engine.admin_run_zombie_sweep(soft, hard).await {
                        warn!(target: "gatewright::sweeper", error = %err, "sweep pass errored");
                    }
                }
            }
        }
    }
}
