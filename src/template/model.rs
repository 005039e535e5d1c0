//! Serde model of the template import format.
//!
//! ```yaml
//! workflow:
//!   name: invoice-triage
//!   version: "1.0"
//!   description: Routes invoices by risk.
//!   attributes: [amount, risk, score]
//!   roles:
//!     - { name: Intake, kind: ALPHA }
//!     - { name: Workers, kind: BETA, strategy: HOMOGENEOUS }
//!     - { name: Archive, kind: OMEGA }
//!     - { name: Triage, kind: EPSILON }
//!     - { name: Janitor, kind: TAU }
//!   interactions:
//!     - { name: Inbox }
//!     - { name: Done }
//!   components:
//!     - name: intake-out
//!       role: Intake
//!       interaction: Inbox
//!       direction: OUTBOUND
//! ```
//!
//! The `guardian` block mirrors the persisted guard shape: a `type` plus an
//! `attributes` map that may carry an `interaction_policy` and, for
//! composites, `members` and a `reducer`.

use serde::{Deserialize, Serialize};

use crate::guards::{CompositeReducer, GuardLogic, InteractionPolicy};
use crate::types::{DecompositionStrategy, Direction, GuardKind, RoleKind};

/// Top-level import document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub workflow: WorkflowSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub ai_context: Option<String>,
    /// Attribute keys referencable from guard conditions (rule R11).
    #[serde(default)]
    pub attributes: Vec<String>,
    pub roles: Vec<RoleSpec>,
    pub interactions: Vec<InteractionSpec>,
    pub components: Vec<ComponentSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoleSpec {
    pub name: String,
    pub kind: RoleKind,
    /// Required for BETA roles, meaningless elsewhere (rule R5).
    #[serde(default)]
    pub strategy: Option<DecompositionStrategy>,
    /// Actor classes allowed to hold this role's work; empty = anyone.
    #[serde(default)]
    pub actor_classes: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub name: String,
    pub role: String,
    pub interaction: String,
    pub direction: Direction,
    #[serde(default)]
    pub guardian: Option<GuardianSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GuardianSpec {
    #[serde(rename = "type")]
    pub kind: GuardKind,
    #[serde(default)]
    pub attributes: GuardianAttributes,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardianAttributes {
    #[serde(default)]
    pub interaction_policy: Option<InteractionPolicy>,
    /// Child guardians, COMPOSITE only.
    #[serde(default)]
    pub members: Vec<GuardianSpec>,
    /// AND/OR, COMPOSITE only; defaults to AND.
    #[serde(default)]
    pub reducer: Option<CompositeReducer>,
}

impl TemplateSpec {
    /// Parse from YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl GuardianSpec {
    /// Decode into the evaluatable guard form. An absent policy degrades to
    /// PASS_THRU semantics for the policy-bearing kinds.
    pub fn to_logic(&self) -> GuardLogic {
        let policy = || {
            self.attributes
                .interaction_policy
                .clone()
                .unwrap_or_default()
        };
        match self.kind {
            GuardKind::PassThru => GuardLogic::PassThru,
            GuardKind::Cerberus => GuardLogic::Cerberus,
            GuardKind::CriteriaGate => GuardLogic::CriteriaGate { policy: policy() },
            GuardKind::DirectionalFilter => GuardLogic::DirectionalFilter { policy: policy() },
            GuardKind::TtlCheck => GuardLogic::TtlCheck { policy: policy() },
            GuardKind::ConditionalInjector => GuardLogic::ConditionalInjector { policy: policy() },
            GuardKind::Composite => GuardLogic::Composite {
                members: self.attributes.members.iter().map(Self::to_logic).collect(),
                reducer: self.attributes.reducer.unwrap_or(CompositeReducer::And),
            },
        }
    }
}
