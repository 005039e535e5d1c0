//! Import-time structural validation, rules R1–R12 plus the R13 extension.
//!
//! All rules run; a failing template reports every violation at once, each
//! tagged with its article number. The materializer refuses to persist
//! anything for a template with at least one violation, so imports are
//! atomic by construction.
//!
//! R6 (component direction validity) never produces a violation here: the
//! `Direction` enum rejects bad values at deserialization, before the
//! validator sees the spec. R13 is this crate's extension article for
//! dangling component references, which the base rule table does not
//! cover.

use std::collections::HashSet;

use miette::Diagnostic;
use thiserror::Error;

use super::model::{GuardianSpec, WorkflowSpec};
use crate::expr::{self, functions::FunctionRegistry};
use crate::guards::RESERVED_NAMES;
use crate::types::{Direction, GuardKind, RoleKind};

/// One broken rule.
#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
#[error("article {article}: {message}")]
#[diagnostic(code(gatewright::template::violation))]
pub struct TemplateViolation {
    pub article: &'static str,
    pub message: String,
}

/// The aggregate failure for a template import.
#[derive(Debug, Error, Diagnostic)]
#[error("template `{name}` failed validation ({} violation(s))", violations.len())]
#[diagnostic(
    code(gatewright::template::invalid),
    help("Fix every listed article and re-import; nothing was persisted.")
)]
pub struct TemplateValidationError {
    pub name: String,
    #[related]
    pub violations: Vec<TemplateViolation>,
}

fn violation(article: &'static str, message: impl Into<String>) -> TemplateViolation {
    TemplateViolation {
        article,
        message: message.into(),
    }
}

/// Validate a workflow spec against rules R1–R12 and extension R13.
pub fn validate(
    spec: &WorkflowSpec,
    registry: &FunctionRegistry,
) -> Result<(), TemplateValidationError> {
    let mut violations = Vec::new();

    check_role_cardinality(spec, &mut violations);
    check_beta_strategies(spec, &mut violations);
    check_component_references(spec, &mut violations);
    check_interaction_flow(spec, &mut violations);
    check_epsilon_guards(spec, &mut violations);
    check_omega_cerberus(spec, &mut violations);
    check_alpha_omega_components(spec, &mut violations);
    check_policy_conditions(spec, registry, &mut violations);
    check_outbound_sibling_policies(spec, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(TemplateValidationError {
            name: spec.name.clone(),
            violations,
        })
    }
}

/// R1–R4: exactly one role each of ALPHA, OMEGA, EPSILON, TAU.
fn check_role_cardinality(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    let singles = [
        ("R1", RoleKind::Alpha),
        ("R2", RoleKind::Omega),
        ("R3", RoleKind::Epsilon),
        ("R4", RoleKind::Tau),
    ];
    for (article, kind) in singles {
        let count = spec.roles.iter().filter(|r| r.kind == kind).count();
        if count != 1 {
            out.push(violation(
                article,
                format!("expected exactly one {kind} role, found {count}"),
            ));
        }
    }
}

/// R5: every BETA role carries a strategy.
fn check_beta_strategies(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    for role in &spec.roles {
        if role.kind == RoleKind::Beta && role.strategy.is_none() {
            out.push(violation(
                "R5",
                format!("BETA role `{}` has no decomposition strategy", role.name),
            ));
        }
    }
}

/// R13 (extension): components are well-formed edges over declared roles
/// and interactions. Not part of the base R1–R12 table, which leaves
/// dangling references unaddressed; direction validity (R6) is already
/// guaranteed by the `Direction` type at parse time.
fn check_component_references(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    let roles: HashSet<&str> = spec.roles.iter().map(|r| r.name.as_str()).collect();
    let interactions: HashSet<&str> =
        spec.interactions.iter().map(|i| i.name.as_str()).collect();
    for component in &spec.components {
        if !roles.contains(component.role.as_str()) {
            out.push(violation(
                "R13",
                format!(
                    "component `{}` references unknown role `{}`",
                    component.name, component.role
                ),
            ));
        }
        if !interactions.contains(component.interaction.as_str()) {
            out.push(violation(
                "R13",
                format!(
                    "component `{}` references unknown interaction `{}`",
                    component.name, component.interaction
                ),
            ));
        }
    }
}

/// R7: every interaction has at least one producer and one consumer.
fn check_interaction_flow(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    for interaction in &spec.interactions {
        let producers = spec
            .components
            .iter()
            .filter(|c| c.interaction == interaction.name && c.direction == Direction::Outbound)
            .count();
        let consumers = spec
            .components
            .iter()
            .filter(|c| c.interaction == interaction.name && c.direction == Direction::Inbound)
            .count();
        if producers == 0 {
            out.push(violation(
                "R7",
                format!("interaction `{}` has no OUTBOUND producer", interaction.name),
            ));
        }
        if consumers == 0 {
            out.push(violation(
                "R7",
                format!("interaction `{}` has no INBOUND consumer", interaction.name),
            ));
        }
    }
}

fn role_kind<'a>(spec: &'a WorkflowSpec, name: &str) -> Option<RoleKind> {
    spec.roles.iter().find(|r| r.name == name).map(|r| r.kind)
}

/// R8: every INBOUND component feeding the EPSILON role has a guard.
fn check_epsilon_guards(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    for component in &spec.components {
        if component.direction == Direction::Inbound
            && role_kind(spec, &component.role) == Some(RoleKind::Epsilon)
            && component.guardian.is_none()
        {
            out.push(violation(
                "R8",
                format!(
                    "EPSILON inbound component `{}` has no guard",
                    component.name
                ),
            ));
        }
    }
}

/// R9: every INBOUND component feeding the OMEGA role has a CERBERUS guard.
fn check_omega_cerberus(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    for component in &spec.components {
        if component.direction == Direction::Inbound
            && role_kind(spec, &component.role) == Some(RoleKind::Omega)
        {
            let is_cerberus = component
                .guardian
                .as_ref()
                .is_some_and(|g| g.kind == GuardKind::Cerberus);
            if !is_cerberus {
                out.push(violation(
                    "R9",
                    format!(
                        "OMEGA inbound component `{}` must carry a CERBERUS guard",
                        component.name
                    ),
                ));
            }
        }
    }
}

/// R10: ALPHA has OUTBOUND components; OMEGA has INBOUND components.
fn check_alpha_omega_components(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    let has_edge = |kind: RoleKind, direction: Direction| {
        spec.components.iter().any(|c| {
            c.direction == direction && role_kind(spec, &c.role) == Some(kind)
        })
    };
    if spec.roles.iter().any(|r| r.kind == RoleKind::Alpha)
        && !has_edge(RoleKind::Alpha, Direction::Outbound)
    {
        out.push(violation("R10", "ALPHA role has no OUTBOUND component"));
    }
    if spec.roles.iter().any(|r| r.kind == RoleKind::Omega)
        && !has_edge(RoleKind::Omega, Direction::Inbound)
    {
        out.push(violation("R10", "OMEGA role has no INBOUND component"));
    }
}

/// R11: every policy condition parses and references only declared
/// attribute keys, reserved metadata names, and registered functions.
fn check_policy_conditions(
    spec: &WorkflowSpec,
    registry: &FunctionRegistry,
    out: &mut Vec<TemplateViolation>,
) {
    let mut permitted: HashSet<String> =
        spec.attributes.iter().cloned().collect();
    permitted.extend(RESERVED_NAMES.iter().map(|s| (*s).to_string()));

    for component in &spec.components {
        let Some(guardian) = &component.guardian else {
            continue;
        };
        check_guardian_conditions(guardian, &component.name, &permitted, registry, out);
    }
}

fn check_guardian_conditions(
    guardian: &GuardianSpec,
    component_name: &str,
    permitted: &HashSet<String>,
    registry: &FunctionRegistry,
    out: &mut Vec<TemplateViolation>,
) {
    if let Some(policy) = &guardian.attributes.interaction_policy {
        for condition in policy.conditions() {
            match expr::parse(condition) {
                Err(err) => out.push(violation(
                    "R11",
                    format!(
                        "component `{component_name}`: condition `{condition}` does not parse: {err}"
                    ),
                )),
                Ok(ast) => {
                    if let Err(err) = expr::validate(&ast, permitted, registry) {
                        out.push(violation(
                            "R11",
                            format!(
                                "component `{component_name}`: condition `{condition}`: {err}"
                            ),
                        ));
                    }
                }
            }
        }
    }
    for member in &guardian.attributes.members {
        check_guardian_conditions(member, component_name, permitted, registry, out);
    }
}

/// R12: a component with more than one OUTBOUND sibling of the same role
/// must carry an interaction policy to disambiguate routing.
fn check_outbound_sibling_policies(spec: &WorkflowSpec, out: &mut Vec<TemplateViolation>) {
    for component in &spec.components {
        if component.direction != Direction::Outbound {
            continue;
        }
        let siblings = spec
            .components
            .iter()
            .filter(|c| c.role == component.role && c.direction == Direction::Outbound)
            .count();
        if siblings <= 1 {
            continue;
        }
        let has_policy = component.guardian.as_ref().is_some_and(|g| {
            g.attributes.interaction_policy.is_some()
                || g.attributes
                    .members
                    .iter()
                    .any(|m| m.attributes.interaction_policy.is_some())
        });
        if !has_policy {
            out.push(violation(
                "R12",
                format!(
                    "component `{}` shares {} OUTBOUND edges for role `{}` but has no interaction policy",
                    component.name, siblings, component.role
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::model::TemplateSpec;

    fn minimal_valid() -> &'static str {
        r#"
workflow:
  name: t
  version: "1"
  attributes: [risk]
  roles:
    - { name: Origin, kind: ALPHA }
    - { name: Work, kind: BETA, strategy: HOMOGENEOUS }
    - { name: Archive, kind: OMEGA }
    - { name: Triage, kind: EPSILON }
    - { name: Janitor, kind: TAU }
  interactions:
    - { name: Inbox }
    - { name: Done }
    - { name: AtePath }
  components:
    - { name: origin-out, role: Origin, interaction: Inbox, direction: OUTBOUND }
    - { name: work-in, role: Work, interaction: Inbox, direction: INBOUND }
    - name: work-out
      role: Work
      interaction: Done
      direction: OUTBOUND
      guardian:
        type: CRITERIA_GATE
        attributes:
          interaction_policy:
            branches:
              - { condition: "risk < 0.5", action: ROUTE, next_interaction: Done }
            default: { action: ROUTE, next_interaction: Done }
    - name: archive-in
      role: Archive
      interaction: Done
      direction: INBOUND
      guardian: { type: CERBERUS }
    - name: triage-in
      role: Triage
      interaction: AtePath
      direction: INBOUND
      guardian: { type: PASS_THRU }
    - { name: work-fail-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }
"#
    }

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[test]
    fn minimal_template_passes() {
        let spec = TemplateSpec::from_yaml(minimal_valid()).unwrap();
        validate(&spec.workflow, &registry()).unwrap();
    }

    #[test]
    fn missing_omega_cerberus_fails_r9() {
        let text = minimal_valid().replace(
            "guardian: { type: CERBERUS }",
            "guardian: { type: PASS_THRU }",
        );
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R9"), "{err:?}");
    }

    #[test]
    fn duplicate_alpha_fails_r1() {
        let text = minimal_valid().replace(
            "- { name: Janitor, kind: TAU }",
            "- { name: Janitor, kind: TAU }\n    - { name: Origin2, kind: ALPHA }",
        );
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R1"));
    }

    #[test]
    fn beta_without_strategy_fails_r5() {
        let text = minimal_valid().replace(", strategy: HOMOGENEOUS", "");
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R5"));
    }

    #[test]
    fn undeclared_condition_name_fails_r11() {
        let text = minimal_valid().replace("risk < 0.5", "actor_id < 0.5");
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        let r11 = err
            .violations
            .iter()
            .find(|v| v.article == "R11")
            .expect("expected R11");
        assert!(r11.message.contains("actor_id"));
    }

    #[test]
    fn malformed_condition_fails_r11() {
        let text = minimal_valid().replace("risk < 0.5", "risk <");
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R11"));
    }

    #[test]
    fn ambiguous_outbound_without_policy_fails_r12() {
        let text = minimal_valid().replace(
            "    - { name: work-fail-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }",
            "    - { name: work-fail-out, role: Janitor, interaction: AtePath, direction: OUTBOUND }\n    - { name: work-out-2, role: Work, interaction: AtePath, direction: OUTBOUND }",
        );
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R12"), "{err:?}");
    }

    #[test]
    fn dangling_reference_fails_r13() {
        let text = minimal_valid().replace(
            "{ name: origin-out, role: Origin, interaction: Inbox, direction: OUTBOUND }",
            "{ name: origin-out, role: Ghost, interaction: Inbox, direction: OUTBOUND }",
        );
        let spec = TemplateSpec::from_yaml(&text).unwrap();
        let err = validate(&spec.workflow, &registry()).unwrap_err();
        assert!(err.violations.iter().any(|v| v.article == "R13"));
    }
}
