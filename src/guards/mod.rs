//! Guards: programmable policy gates attached to component edges.
//!
//! A guard converts a unit of work's accumulated attributes into a routing
//! decision. The policy machinery never lets an expression failure escape:
//! errors are captured into a shadow log and, at most, redirect evaluation
//! to an `on_error` branch. Callers always receive a decision.
//!
//! Guard kinds dispatch through [`GuardLogic`], a tagged variant with one
//! `evaluate` contract. `COMPOSITE` holds child guards and an AND/OR
//! reducer; `CERBERUS` ignores attributes entirely and admits a parent only
//! when every child is terminal.

pub mod policy;

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::expr::functions::FunctionRegistry;
use crate::types::{UowId, UowStatus};

pub use policy::{
    Branch, DefaultBranch, HaltReason, InteractionPolicy, Mutation, PolicyAction, PolicyOutcome,
    RoutingDecision, ShadowLogEntry,
};

/// Names always bindable in a condition scope, beyond declared attribute
/// keys. `actor_id` is deliberately absent and can never be bound.
pub const RESERVED_NAMES: [&str; 6] = [
    "uow_id",
    "parent_id",
    "status",
    "child_count",
    "finished_child_count",
    "interaction_count",
];

/// Facts CERBERUS judges: the parent's child counters and whether any child
/// is still in a non-terminal status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CerberusFacts {
    pub child_count: u32,
    pub finished_child_count: u32,
    pub has_nonterminal_child: bool,
}

impl CerberusFacts {
    /// The admission rule: at least one child, all of them finished, none
    /// of them still live.
    #[must_use]
    pub fn admits(self) -> bool {
        self.child_count > 0
            && self.finished_child_count == self.child_count
            && !self.has_nonterminal_child
    }
}

/// Everything a guard needs to decide, borrowed from the engine's
/// transaction: the merged attribute scope (attributes plus reserved
/// metadata), the function allow-list, and the CERBERUS facts.
pub struct PolicyContext<'a> {
    pub uow_id: &'a UowId,
    pub scope: &'a FxHashMap<String, Json>,
    pub registry: &'a FunctionRegistry,
    pub cerberus: CerberusFacts,
}

/// AND/OR reducer for composite guards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompositeReducer {
    And,
    Or,
}

/// The evaluatable form of a guard, decoded from its persisted record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardLogic {
    /// No policy; the structural route applies.
    PassThru,
    CriteriaGate { policy: InteractionPolicy },
    DirectionalFilter { policy: InteractionPolicy },
    TtlCheck { policy: InteractionPolicy },
    ConditionalInjector { policy: InteractionPolicy },
    Cerberus,
    Composite {
        members: Vec<GuardLogic>,
        reducer: CompositeReducer,
    },
}

impl GuardLogic {
    /// The interaction policy carried by this guard, if any.
    pub fn interaction_policy(&self) -> Option<&InteractionPolicy> {
        match self {
            GuardLogic::CriteriaGate { policy }
            | GuardLogic::DirectionalFilter { policy }
            | GuardLogic::TtlCheck { policy }
            | GuardLogic::ConditionalInjector { policy } => Some(policy),
            _ => None,
        }
    }

    /// Evaluate this guard against a context. Total: never panics, never
    /// returns an error; the worst case is a HALT decision.
    pub fn evaluate(&self, ctx: &PolicyContext<'_>) -> PolicyOutcome {
        match self {
            GuardLogic::PassThru => PolicyOutcome::pass(),
            GuardLogic::Cerberus => {
                if ctx.cerberus.admits() {
                    PolicyOutcome::pass()
                } else {
                    PolicyOutcome::halt(HaltReason::CerberusBlocked {
                        child_count: ctx.cerberus.child_count,
                        finished_child_count: ctx.cerberus.finished_child_count,
                    })
                }
            }
            GuardLogic::CriteriaGate { policy }
            | GuardLogic::DirectionalFilter { policy }
            | GuardLogic::TtlCheck { policy } => policy::evaluate_policy(policy, ctx, false),
            GuardLogic::ConditionalInjector { policy } => {
                policy::evaluate_policy(policy, ctx, true)
            }
            GuardLogic::Composite { members, reducer } => {
                Self::evaluate_composite(members, *reducer, ctx)
            }
        }
    }

    fn evaluate_composite(
        members: &[GuardLogic],
        reducer: CompositeReducer,
        ctx: &PolicyContext<'_>,
    ) -> PolicyOutcome {
        let mut shadow = Vec::new();
        let mut first_route: Option<PolicyOutcome> = None;
        let mut last_halt: Option<PolicyOutcome> = None;
        let mut any_passed = false;

        for member in members {
            let mut outcome = member.evaluate(ctx);
            shadow.append(&mut outcome.shadow);
            match &outcome.decision {
                RoutingDecision::Halt { .. } => {
                    if reducer == CompositeReducer::And {
                        outcome.shadow = shadow;
                        return outcome;
                    }
                    last_halt = Some(outcome);
                }
                RoutingDecision::Pass => any_passed = true,
                RoutingDecision::Route { .. } | RoutingDecision::Inject => {
                    if first_route.is_none() {
                        first_route = Some(outcome);
                    }
                }
            }
        }

        let mut result = match (first_route, reducer) {
            (Some(route), _) => route,
            (None, CompositeReducer::Or) if !any_passed => last_halt
                .unwrap_or_else(PolicyOutcome::pass),
            _ => PolicyOutcome::pass(),
        };
        // Re-attach the shadow entries accumulated across members unless the
        // chosen outcome already carried them.
        if result.shadow.is_empty() {
            result.shadow = shadow;
        }
        result
    }
}

/// Build the reserved-metadata slice of a condition scope.
pub fn reserved_scope(
    uow_id: &UowId,
    parent_id: Option<&UowId>,
    status: UowStatus,
    child_count: u32,
    finished_child_count: u32,
    interaction_count: u32,
) -> FxHashMap<String, Json> {
    let mut scope = FxHashMap::default();
    scope.insert("uow_id".to_string(), Json::String(uow_id.to_string()));
    scope.insert(
        "parent_id".to_string(),
        parent_id.map_or(Json::Null, |p| Json::String(p.to_string())),
    );
    scope.insert(
        "status".to_string(),
        Json::String(status.encode().to_string()),
    );
    scope.insert("child_count".to_string(), Json::from(child_count));
    scope.insert(
        "finished_child_count".to_string(),
        Json::from(finished_child_count),
    );
    scope.insert(
        "interaction_count".to_string(),
        Json::from(interaction_count),
    );
    scope
}

/// An injection audit record, appended whenever a mutation matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InjectionAudit {
    pub condition: String,
    pub matched_index: usize,
    pub timestamp: DateTime<Utc>,
}
