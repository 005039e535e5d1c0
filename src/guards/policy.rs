//! Interaction policies: ordered branch lists with `on_error` and `default`.
//!
//! The walk is deterministic (first matching branch wins) and total: a
//! condition that throws marks "error occurred", lands in the shadow log,
//! and evaluation continues. `on_error` branches are skipped until an error
//! has actually occurred; if the main walk ends matchless after an error,
//! the earliest `on_error` branch gets a chance before `default` does.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::debug;

use super::{InjectionAudit, PolicyContext};
use crate::expr::{self, eval::Evaluator};

/// What a branch does when its condition holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PolicyAction {
    Route,
    Halt,
    Inject,
}

/// One condition → action rule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    #[serde(default)]
    pub name: Option<String>,
    pub condition: String,
    pub action: PolicyAction,
    #[serde(default)]
    pub next_interaction: Option<String>,
    #[serde(default)]
    pub on_error: bool,
}

/// The fallback applied when no branch matches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DefaultBranch {
    pub action: PolicyAction,
    #[serde(default)]
    pub next_interaction: Option<String>,
}

/// A mutation row for `CONDITIONAL_INJECTOR` guards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub condition: String,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub injected_instructions: Option<String>,
    #[serde(default)]
    pub knowledge_fragment_refs: Vec<String>,
}

/// The full policy attached to a guard.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractionPolicy {
    #[serde(default)]
    pub branches: Vec<Branch>,
    #[serde(default, rename = "default")]
    pub default_branch: Option<DefaultBranch>,
    #[serde(default)]
    pub mutations: Vec<Mutation>,
}

impl InteractionPolicy {
    /// Every condition string in the policy, branches and mutations alike.
    /// The template validator parses each of these (rule R11).
    pub fn conditions(&self) -> impl Iterator<Item = &str> {
        self.branches
            .iter()
            .map(|b| b.condition.as_str())
            .chain(self.mutations.iter().map(|m| m.condition.as_str()))
    }
}

/// Why evaluation halted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HaltReason {
    /// No branch matched and there was no default.
    NoMatch,
    /// A matching branch explicitly said HALT.
    BranchHalt { branch: usize },
    /// A ROUTE branch matched but named no target interaction.
    MissingTarget { branch: usize },
    /// CERBERUS refused the parent.
    CerberusBlocked {
        child_count: u32,
        finished_child_count: u32,
    },
}

/// The decision handed back to the coordinator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    /// Move the unit of work to the named interaction.
    Route { target: String },
    /// Stop: the coordinator fails the unit of work onto the Ate Path.
    Halt { reason: HaltReason },
    /// Attach the mutation payload; the interaction does not change.
    Inject,
    /// The guard has no opinion; the structural route applies.
    Pass,
}

/// One captured condition failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowLogEntry {
    pub uow_id: String,
    pub branch_index: usize,
    pub condition: String,
    pub variables: FxHashMap<String, Json>,
    pub error: String,
    pub when: chrono::DateTime<Utc>,
}

/// Everything a policy evaluation produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PolicyOutcome {
    pub decision: RoutingDecision,
    pub matched_branch: Option<usize>,
    pub shadow: Vec<ShadowLogEntry>,
    /// Mutations whose condition held (conditional injectors only).
    pub mutations: Vec<Mutation>,
    pub injection_audit: Vec<InjectionAudit>,
}

impl PolicyOutcome {
    pub(crate) fn pass() -> Self {
        Self {
            decision: RoutingDecision::Pass,
            matched_branch: None,
            shadow: Vec::new(),
            mutations: Vec::new(),
            injection_audit: Vec::new(),
        }
    }

    pub(crate) fn halt(reason: HaltReason) -> Self {
        Self {
            decision: RoutingDecision::Halt { reason },
            matched_branch: None,
            shadow: Vec::new(),
            mutations: Vec::new(),
            injection_audit: Vec::new(),
        }
    }
}

/// Walk a policy's branches against the context. With `collect_mutations`
/// set (CONDITIONAL_INJECTOR), matching mutation payloads and their audit
/// records ride along on the outcome.
pub fn evaluate_policy(
    policy: &InteractionPolicy,
    ctx: &PolicyContext<'_>,
    collect_mutations: bool,
) -> PolicyOutcome {
    let mut shadow: Vec<ShadowLogEntry> = Vec::new();
    let mut error_occurred = false;
    let mut skipped_on_error: Vec<usize> = Vec::new();
    let mut matched: Option<(usize, &Branch)> = None;

    for (index, branch) in policy.branches.iter().enumerate() {
        if branch.on_error && !error_occurred {
            skipped_on_error.push(index);
            continue;
        }
        match eval_condition(&branch.condition, ctx) {
            Ok(true) => {
                matched = Some((index, branch));
                break;
            }
            Ok(false) => {}
            Err(message) => {
                error_occurred = true;
                shadow.push(shadow_entry(ctx, index, &branch.condition, message));
            }
        }
    }

    // A matchless walk after an error gives earlier on_error branches a turn.
    if matched.is_none() && error_occurred {
        for index in skipped_on_error {
            let branch = &policy.branches[index];
            match eval_condition(&branch.condition, ctx) {
                Ok(true) => {
                    matched = Some((index, branch));
                    break;
                }
                Ok(false) => {}
                Err(message) => {
                    shadow.push(shadow_entry(ctx, index, &branch.condition, message));
                }
            }
        }
    }

    let decision = match matched {
        Some((index, branch)) => {
            debug!(
                uow_id = %ctx.uow_id,
                branch = index,
                action = ?branch.action,
                "guard branch matched"
            );
            Some((decide(branch.action, branch.next_interaction.as_deref(), index), Some(index)))
        }
        None => None,
    };

    let (decision, matched_branch) = match decision {
        Some((d, m)) => (d, m),
        None => match &policy.default_branch {
            Some(default) => (
                decide_default(default),
                None,
            ),
            None => (
                RoutingDecision::Halt {
                    reason: HaltReason::NoMatch,
                },
                None,
            ),
        },
    };

    let (mutations, injection_audit) = if collect_mutations {
        collect_matching_mutations(policy, ctx, &mut shadow)
    } else {
        (Vec::new(), Vec::new())
    };

    PolicyOutcome {
        decision,
        matched_branch,
        shadow,
        mutations,
        injection_audit,
    }
}

fn decide(action: PolicyAction, target: Option<&str>, branch: usize) -> RoutingDecision {
    match action {
        PolicyAction::Route => match target {
            Some(target) => RoutingDecision::Route {
                target: target.to_string(),
            },
            None => RoutingDecision::Halt {
                reason: HaltReason::MissingTarget { branch },
            },
        },
        PolicyAction::Halt => RoutingDecision::Halt {
            reason: HaltReason::BranchHalt { branch },
        },
        PolicyAction::Inject => RoutingDecision::Inject,
    }
}

fn decide_default(default: &DefaultBranch) -> RoutingDecision {
    match default.action {
        PolicyAction::Route => match &default.next_interaction {
            Some(target) => RoutingDecision::Route {
                target: target.clone(),
            },
            None => RoutingDecision::Halt {
                reason: HaltReason::NoMatch,
            },
        },
        PolicyAction::Halt => RoutingDecision::Halt {
            reason: HaltReason::NoMatch,
        },
        PolicyAction::Inject => RoutingDecision::Inject,
    }
}

fn collect_matching_mutations(
    policy: &InteractionPolicy,
    ctx: &PolicyContext<'_>,
    shadow: &mut Vec<ShadowLogEntry>,
) -> (Vec<Mutation>, Vec<InjectionAudit>) {
    let mut mutations = Vec::new();
    let mut audit = Vec::new();
    for (index, mutation) in policy.mutations.iter().enumerate() {
        match eval_condition(&mutation.condition, ctx) {
            Ok(true) => {
                audit.push(InjectionAudit {
                    condition: mutation.condition.clone(),
                    matched_index: index,
                    timestamp: Utc::now(),
                });
                mutations.push(mutation.clone());
            }
            Ok(false) => {}
            Err(message) => {
                shadow.push(shadow_entry(ctx, index, &mutation.condition, message));
            }
        }
    }
    (mutations, audit)
}

fn eval_condition(condition: &str, ctx: &PolicyContext<'_>) -> Result<bool, String> {
    let expr = expr::parse(condition).map_err(|e| e.to_string())?;
    Evaluator::new(ctx.scope, ctx.registry)
        .eval(&expr)
        .map(|value| value.is_truthy())
        .map_err(|e| e.to_string())
}

fn shadow_entry(
    ctx: &PolicyContext<'_>,
    branch_index: usize,
    condition: &str,
    error: String,
) -> ShadowLogEntry {
    ShadowLogEntry {
        uow_id: ctx.uow_id.to_string(),
        branch_index,
        condition: condition.to_string(),
        variables: ctx.scope.clone(),
        error,
        when: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::functions::FunctionRegistry;
    use crate::guards::CerberusFacts;
    use crate::types::UowId;
    use serde_json::json;

    fn ctx_with<'a>(
        uow_id: &'a UowId,
        scope: &'a FxHashMap<String, Json>,
        registry: &'a FunctionRegistry,
    ) -> PolicyContext<'a> {
        PolicyContext {
            uow_id,
            scope,
            registry,
            cerberus: CerberusFacts::default(),
        }
    }

    fn route_branch(condition: &str, target: &str) -> Branch {
        Branch {
            name: None,
            condition: condition.to_string(),
            action: PolicyAction::Route,
            next_interaction: Some(target.to_string()),
            on_error: false,
        }
    }

    #[test]
    fn first_matching_branch_wins() {
        let policy = InteractionPolicy {
            branches: vec![
                route_branch("risk > 0.8", "Critical_Queue"),
                route_branch("true", "Standard_Queue"),
            ],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");

        let mut scope = FxHashMap::default();
        scope.insert("risk".to_string(), json!(0.95));
        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route {
                target: "Critical_Queue".into()
            }
        );
        assert_eq!(outcome.matched_branch, Some(0));

        scope.insert("risk".to_string(), json!(0.2));
        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route {
                target: "Standard_Queue".into()
            }
        );
        assert_eq!(outcome.matched_branch, Some(1));
    }

    #[test]
    fn error_falls_through_to_on_error_branch() {
        let mut on_error = route_branch("true", "B");
        on_error.on_error = true;
        let policy = InteractionPolicy {
            branches: vec![route_branch("undefined_attr > 0", "A"), on_error],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let scope = FxHashMap::default();

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route { target: "B".into() }
        );
        assert_eq!(outcome.matched_branch, Some(1));
        assert_eq!(outcome.shadow.len(), 1);
        assert_eq!(outcome.shadow[0].branch_index, 0);
        assert!(outcome.shadow[0].error.contains("undefined_attr"));
    }

    #[test]
    fn on_error_branch_skipped_without_error() {
        let mut on_error = route_branch("true", "B");
        on_error.on_error = true;
        let policy = InteractionPolicy {
            branches: vec![on_error, route_branch("true", "A")],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let scope = FxHashMap::default();

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route { target: "A".into() }
        );
    }

    #[test]
    fn earlier_on_error_branch_reconsidered_after_error() {
        let mut on_error = route_branch("true", "Recovery");
        on_error.on_error = true;
        let policy = InteractionPolicy {
            branches: vec![on_error, route_branch("boom > 1", "A")],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let scope = FxHashMap::default();

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route {
                target: "Recovery".into()
            }
        );
        assert_eq!(outcome.matched_branch, Some(0));
    }

    #[test]
    fn no_match_without_default_halts() {
        let policy = InteractionPolicy {
            branches: vec![route_branch("false", "A")],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let scope = FxHashMap::default();

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Halt {
                reason: HaltReason::NoMatch
            }
        );
    }

    #[test]
    fn default_branch_applies() {
        let policy = InteractionPolicy {
            branches: vec![route_branch("false", "A")],
            default_branch: Some(DefaultBranch {
                action: PolicyAction::Route,
                next_interaction: Some("Fallback".into()),
            }),
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let scope = FxHashMap::default();

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), false);
        assert_eq!(
            outcome.decision,
            RoutingDecision::Route {
                target: "Fallback".into()
            }
        );
        assert_eq!(outcome.matched_branch, None);
    }

    #[test]
    fn determinism_across_runs() {
        let policy = InteractionPolicy {
            branches: vec![
                route_branch("score < 0.5", "Standard"),
                route_branch("true", "Review"),
            ],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let mut scope = FxHashMap::default();
        scope.insert("score".to_string(), json!(0.1));
        let ctx = ctx_with(&uow, &scope, &registry);

        let first = evaluate_policy(&policy, &ctx, false);
        for _ in 0..10 {
            let again = evaluate_policy(&policy, &ctx, false);
            assert_eq!(again.decision, first.decision);
            assert_eq!(again.matched_branch, first.matched_branch);
        }
    }

    #[test]
    fn injector_collects_matching_mutations() {
        let policy = InteractionPolicy {
            branches: vec![route_branch("true", "Next")],
            mutations: vec![
                Mutation {
                    condition: "risk > 0.5".into(),
                    model_id: Some("model-careful".into()),
                    injected_instructions: Some("double-check totals".into()),
                    knowledge_fragment_refs: vec!["kf-7".into()],
                },
                Mutation {
                    condition: "risk > 0.99".into(),
                    model_id: None,
                    injected_instructions: None,
                    knowledge_fragment_refs: vec![],
                },
            ],
            ..Default::default()
        };
        let registry = FunctionRegistry::with_builtins();
        let uow = UowId::from("uow-1");
        let mut scope = FxHashMap::default();
        scope.insert("risk".to_string(), json!(0.8));

        let outcome = evaluate_policy(&policy, &ctx_with(&uow, &scope, &registry), true);
        assert_eq!(outcome.mutations.len(), 1);
        assert_eq!(outcome.mutations[0].model_id.as_deref(), Some("model-careful"));
        assert_eq!(outcome.injection_audit.len(), 1);
        assert_eq!(outcome.injection_audit[0].matched_index, 0);
    }
}
