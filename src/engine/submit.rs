//! Submit: accept results, consult the guard, advance the token.
//!
//! The sequence is fixed: verify the lease, persist result attributes,
//! evaluate the consuming role's outbound guard, then act on the decision.
//! ROUTE advances the token (and only ROUTE increments
//! `interaction_count`); HALT fails it onto the Ate Path; INJECT attaches
//! the mutation payload and leaves the interaction untouched. A route
//! whose resolved next status is high-risk is intercepted by Park &
//! Notify: the token parks in `PENDING_PILOT_APPROVAL`, one
//! `intervention_request` event fires, and the call returns immediately;
//! no thread ever waits for a human.

use serde_json::Value as Json;
use tracing::instrument;

use super::{EngineError, Result, WorkflowEngine};
use crate::attrs::AttributeWrite;
use crate::events::{EngineEvent, EventKind};
use crate::guards::{
    GuardLogic, HaltReason, InjectionAudit, Mutation, PolicyContext, PolicyOutcome,
    RoutingDecision,
};
use crate::history::{TransitionKind, TransitionRecord};
use crate::storage::{Blueprint, StorageTxn, UowRecord};
use crate::types::{Direction, Principal, RoleKind, UowId, UowStatus};

/// What a submit did.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// Advanced into the named interaction, back to `PENDING` for the
    /// next role.
    Routed { interaction: String },
    /// Passed the terminal gate; the token is `COMPLETED`.
    Completed,
    /// Intercepted by Park & Notify; a pilot decides next.
    Parked { original_target: String },
    /// Mutation payload attached; interaction and counter unchanged.
    Injected {
        mutations: Vec<Mutation>,
        audit: Vec<InjectionAudit>,
    },
    /// Guard halted; the token is `FAILED` on the Ate Path. Surfaced as
    /// an ordinary outcome, not an error; the submitter did its job.
    Halted { reason: String },
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitReceipt {
    pub uow_id: UowId,
    pub outcome: SubmitOutcome,
}

impl WorkflowEngine {
    /// Submit results for leased work with Global Blueprint scope.
    pub async fn submit_work(
        &self,
        uow_id: &UowId,
        principal: &Principal,
        result_attrs: impl IntoIterator<Item = (String, Json)>,
        reasoning: Option<String>,
    ) -> Result<SubmitReceipt> {
        let writes: Vec<AttributeWrite> = result_attrs
            .into_iter()
            .map(|(key, value)| {
                let mut write = AttributeWrite::global(key, value);
                if let Some(reasoning) = &reasoning {
                    write = write.with_reasoning(reasoning.clone());
                }
                write
            })
            .collect();
        self.submit_work_scoped(uow_id, principal, writes).await
    }

    /// Submit with explicit per-write ownership (Personal Playbook writes
    /// carry `owner_actor_id`).
    #[instrument(skip(self, writes), fields(uow = %uow_id, actor = %principal.actor_id))]
    pub async fn submit_work_scoped(
        &self,
        uow_id: &UowId,
        principal: &Principal,
        writes: Vec<AttributeWrite>,
    ) -> Result<SubmitReceipt> {
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

        let view_before = {
            let attributes = txn.load_attributes(uow_id).await?;
            crate::attrs::latest_view(&attributes, &principal.actor_id)
        };
        self.write_attributes(&mut txn, uow_id, &writes, &principal.actor_id)
            .await?;
        let view_after = {
            let attributes = txn.load_attributes(uow_id).await?;
            crate::attrs::latest_view(&attributes, &principal.actor_id)
        };
        let deltas = crate::attrs::diff(&view_before, &view_after);

        let instance_id = uow.instance_id.clone();
        let blueprint = self.blueprint_of(&mut txn, &instance_id).await?;
        let role = self.consuming_role(&blueprint, &uow, principal)?.clone();
        let outbound = blueprint.components_of_role(&role.id, Direction::Outbound);

        // The routing policy lives on the role's guarded outbound edge;
        // an unguarded single edge routes structurally.
        let outcome = {
            let scope = self.policy_scope(&mut txn, &uow, &principal.actor_id).await?;
            let cerberus = self.cerberus_facts(&mut txn, &uow).await?;
            let ctx = PolicyContext {
                uow_id: &uow.id,
                scope: &scope,
                registry: self.functions(),
                cerberus,
            };
            let guarded = outbound
                .iter()
                .find_map(|c| c.guard_id.as_ref().and_then(|id| blueprint.guard(id)));
            match guarded {
                Some(guard) => guard.logic.evaluate(&ctx),
                None => PolicyOutcome::pass(),
            }
        };

        for entry in &outcome.shadow {
            tracing::warn!(
                target: "gatewright::guards",
                uow_id = %entry.uow_id,
                branch = entry.branch_index,
                condition = %entry.condition,
                error = %entry.error,
                "guard condition error captured in shadow log"
            );
        }
        self.emit(
            EngineEvent::new(
                EventKind::GuardDecision,
                serde_json::json!({
                    "decision": decision_label(&outcome.decision),
                    "matched_branch": outcome.matched_branch,
                    "shadow_entries": outcome.shadow.len(),
                    "attribute_deltas": deltas,
                }),
            )
            .for_uow(uow.id.clone())
            .for_instance(instance_id.clone()),
        );

        let receipt = match outcome.decision {
            RoutingDecision::Pass => {
                // Structural route: exactly one outbound edge.
                match outbound.as_slice() {
                    [only] => {
                        let target = blueprint
                            .interaction(&only.interaction_id)
                            .map(|i| i.name.clone())
                            .ok_or_else(|| EngineError::NotFound {
                                what: "interaction",
                                id: only.interaction_id.to_string(),
                            })?;
                        self.route(&mut txn, &mut uow, &blueprint, principal, &target)
                            .await?
                    }
                    _ => {
                        self.halt(
                            &mut txn,
                            &mut uow,
                            &blueprint,
                            principal,
                            "NO_MATCH".to_string(),
                        )
                        .await?
                    }
                }
            }
            RoutingDecision::Route { target } => {
                self.route(&mut txn, &mut uow, &blueprint, principal, &target)
                    .await?
            }
            RoutingDecision::Halt { reason } => {
                self.halt(&mut txn, &mut uow, &blueprint, principal, halt_label(&reason))
                    .await?
            }
            RoutingDecision::Inject => {
                // The interaction does not change; the payload rides the
                // receipt and the ledger gets an audit row.
                self.transition(
                    &mut txn,
                    &mut uow,
                    TransitionRecord::new(
                        Some(UowStatus::Active),
                        UowStatus::Pending,
                        principal.actor_id.clone(),
                        TransitionKind::Injection,
                    )
                    .with_metadata(serde_json::json!({
                        "mutations": outcome.mutations.clone(),
                        "audit": outcome.injection_audit.clone(),
                    })),
                )
                .await?;
                SubmitOutcome::Injected {
                    mutations: outcome.mutations,
                    audit: outcome.injection_audit,
                }
            }
        };

        txn.commit().await?;
        Ok(SubmitReceipt {
            uow_id: uow_id.clone(),
            outcome: receipt,
        })
    }

    /// Route into `target`. Applies the terminal CERBERUS gate when the
    /// target feeds only the OMEGA role, then the Park & Notify intercept.
    async fn route(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &mut UowRecord,
        blueprint: &Blueprint,
        principal: &Principal,
        target: &str,
    ) -> Result<SubmitOutcome> {
        let Some(interaction) = blueprint.interaction_by_name(target) else {
            // A policy routed to an interaction this instance doesn't
            // have; that's a no-match, not a crash.
            return self
                .halt(txn, uow, blueprint, principal, format!("NO_MATCH:{target}"))
                .await;
        };
        let interaction_id = interaction.id.clone();
        let interaction_name = interaction.name.clone();

        let consumers = blueprint.components_of_interaction(&interaction_id, Direction::Inbound);
        let feeds_only_omega = !consumers.is_empty()
            && consumers.iter().all(|c| {
                blueprint.role(&c.role_id).map(|r| r.kind) == Some(RoleKind::Omega)
            });
        let cerberus_guard = consumers.iter().any(|c| {
            c.guard_id
                .as_ref()
                .and_then(|id| blueprint.guard(id))
                .is_some_and(|g| matches!(g.logic, GuardLogic::Cerberus))
        });

        let mut proposed = UowStatus::Pending;
        if cerberus_guard {
            let facts = self.cerberus_facts(txn, uow).await?;
            if !facts.admits() {
                return self
                    .halt(
                        txn,
                        uow,
                        blueprint,
                        principal,
                        format!(
                            "CERBERUS_BLOCKED:{}/{}",
                            facts.finished_child_count, facts.child_count
                        ),
                    )
                    .await;
            }
            if feeds_only_omega {
                proposed = UowStatus::Completed;
            }
        }

        // Park & Notify: high-risk targets go to a pilot, not through.
        if self.config().high_risk_statuses.contains(&proposed) {
            self.transition(
                txn,
                uow,
                TransitionRecord::new(
                    Some(UowStatus::Active),
                    UowStatus::PendingPilotApproval,
                    principal.actor_id.clone(),
                    TransitionKind::ParkAndNotify,
                )
                .with_metadata(serde_json::json!({
                    "original_target": interaction_name.clone(),
                    "original_status": proposed.encode(),
                    "previous_lease_actor": principal.actor_id.clone(),
                })),
            )
            .await?;
            self.emit(
                EngineEvent::new(
                    EventKind::InterventionRequest,
                    serde_json::json!({
                        "original_target": interaction_name.clone(),
                        "original_status": proposed.encode(),
                        "reason": "high-risk transition parked for pilot review",
                        "pilot_options": ["resume", "cancel"],
                    }),
                )
                .for_uow(uow.id.clone())
                .for_instance(uow.instance_id.clone()),
            );
            return Ok(SubmitOutcome::Parked {
                original_target: interaction_name,
            });
        }

        uow.current_interaction_id = Some(interaction_id);
        uow.interaction_count += 1;
        self.transition(
            txn,
            uow,
            TransitionRecord::new(
                Some(UowStatus::Active),
                proposed,
                principal.actor_id.clone(),
                TransitionKind::Submit,
            )
            .with_metadata(serde_json::json!({
                "interaction": interaction_name.clone(),
                "interaction_count": uow.interaction_count,
            })),
        )
        .await?;

        if proposed == UowStatus::Completed {
            self.credit_parent_terminal(txn, uow).await?;
            Ok(SubmitOutcome::Completed)
        } else {
            Ok(SubmitOutcome::Routed {
                interaction: interaction_name,
            })
        }
    }

    /// Guard said stop: fail the token onto the Ate Path.
    async fn halt(
        &self,
        txn: &mut Box<dyn StorageTxn>,
        uow: &mut UowRecord,
        blueprint: &Blueprint,
        principal: &Principal,
        reason: String,
    ) -> Result<SubmitOutcome> {
        if let Some(epsilon) = blueprint.role_of_kind(RoleKind::Epsilon) {
            let mut ate = blueprint.inbound_interactions_of_role(&epsilon.id);
            if !ate.is_empty() {
                uow.current_interaction_id = Some(ate.remove(0));
            }
        }
        self.transition(
            txn,
            uow,
            TransitionRecord::new(
                Some(UowStatus::Active),
                UowStatus::Failed,
                principal.actor_id.clone(),
                TransitionKind::Failure,
            )
            .with_reason(reason.clone()),
        )
        .await?;
        self.credit_parent_terminal(txn, uow).await?;
        Ok(SubmitOutcome::Halted { reason })
    }
}

fn decision_label(decision: &RoutingDecision) -> &'static str {
    match decision {
        RoutingDecision::Route { .. } => "ROUTE",
        RoutingDecision::Halt { .. } => "HALT",
        RoutingDecision::Inject => "INJECT",
        RoutingDecision::Pass => "PASS",
    }
}

fn halt_label(reason: &HaltReason) -> String {
    match reason {
        HaltReason::NoMatch => "NO_MATCH".to_string(),
        HaltReason::BranchHalt { branch } => format!("BRANCH_HALT:{branch}"),
        HaltReason::MissingTarget { branch } => format!("MISSING_TARGET:{branch}"),
        HaltReason::CerberusBlocked {
            child_count,
            finished_child_count,
        } => format!("CERBERUS_BLOCKED:{finished_child_count}/{child_count}"),
    }
}
