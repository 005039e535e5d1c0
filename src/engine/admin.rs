//! Administrative operations: toxic attribute marking and memory decay.

use chrono::Utc;
use tracing::instrument;

use super::{Result, WorkflowEngine};
use crate::attrs::AttributeWrite;
use crate::history::{TransitionKind, TransitionRecord};
use crate::types::{ActorId, UowId};

/// Outcome of a memory-decay pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecayReport {
    pub deleted: u64,
}

impl WorkflowEngine {
    /// Tombstone a poisoned attribute: a new null version (global
    /// namespace, system author) supersedes the toxic value, and an audit
    /// row records who asked and why. Old versions stay for forensics.
    #[instrument(skip(self), fields(uow = %uow_id, attr_key))]
    pub async fn admin_mark_toxic(
        &self,
        attr_key: &str,
        uow_id: &UowId,
        reason: &str,
    ) -> Result<()> {
        let mut txn = self.storage().begin().await?;
        let mut uow = txn.load_uow(uow_id).await?;

        self.write_attributes(
            &mut txn,
            uow_id,
            &[
                AttributeWrite::global(attr_key, serde_json::Value::Null)
                    .with_reasoning(format!("toxic: {reason}")),
            ],
            &ActorId::system(),
        )
        .await?;

        let status = uow.status;
        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(Some(status), status, ActorId::system(), TransitionKind::ToxicMark)
                .with_reason(reason)
                .with_metadata(serde_json::json!({"attr_key": attr_key})),
        )
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Delete superseded attribute versions older than the retention
    /// window. Latest versions and history rows are never touched.
    #[instrument(skip(self))]
    pub async fn admin_run_memory_decay(&self, retention_days: u32) -> Result<DecayReport> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(retention_days));
        let mut txn = self.storage().begin().await?;
        let deleted = txn.delete_superseded_attributes_before(cutoff).await?;
        txn.commit().await?;
        Ok(DecayReport { deleted })
    }
}
