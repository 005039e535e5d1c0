//! Core domain types for the gatewright workflow engine.
//!
//! This module defines the vocabulary shared by every subsystem: identifier
//! newtypes for the persisted entities, the unit-of-work status enum with its
//! persisted string form, and the small classification enums (role kinds,
//! component directions, guard kinds, decomposition strategies).
//!
//! Identifiers are opaque strings minted by [`crate::utils::ids::IdGenerator`]
//! at creation time. They stay strings all the way down to the storage driver
//! so that drivers never need to agree on a binary id representation.
//!
//! # Examples
//!
//! ```rust
//! use gatewright::types::{UowStatus, RoleKind};
//!
//! let status = UowStatus::PendingPilotApproval;
//! assert_eq!(status.encode(), "PENDING_PILOT_APPROVAL");
//! assert_eq!(UowStatus::decode("PENDING_PILOT_APPROVAL"), Some(status));
//! assert!(RoleKind::Beta.may_decompose());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Reserved actor id used by the engine itself (sweeper, materializer,
/// administrative operations). Never leasable.
pub const SYSTEM_ACTOR_ID: &str = "actor-system";

macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// The prefix new ids of this kind are minted with.
            pub const PREFIX: &'static str = $prefix;

            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Identifier of an imported workflow blueprint.
    TemplateId,
    "tpl"
);
string_id!(
    /// Identifier of a materialized instance of a template.
    InstanceId,
    "inst"
);
string_id!(
    /// Identifier of a role within a template or instance scope.
    RoleId,
    "role"
);
string_id!(
    /// Identifier of an interaction (a named queue between roles).
    InteractionId,
    "ixn"
);
string_id!(
    /// Identifier of a component edge `(role, interaction, direction)`.
    ComponentId,
    "cmp"
);
string_id!(
    /// Identifier of a guard attached to a component.
    GuardId,
    "grd"
);
string_id!(
    /// Identifier of a single unit of work.
    UowId,
    "uow"
);
string_id!(
    /// Identifier of an authenticated principal that leases work.
    ActorId,
    "actor"
);

impl ActorId {
    /// The reserved system actor.
    pub fn system() -> Self {
        Self(SYSTEM_ACTOR_ID.to_string())
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_ACTOR_ID
    }
}

/// A caller-supplied principal. The engine never resolves identities; it
/// trusts whatever the transport layer authenticated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub actor_id: ActorId,
    /// Optional actor class, matched against a role's `actor_classes` list
    /// at checkout when the role restricts who may hold its work.
    pub class: Option<String>,
}

impl Principal {
    pub fn new(actor_id: impl Into<ActorId>) -> Self {
        Self {
            actor_id: actor_id.into(),
            class: None,
        }
    }

    #[must_use]
    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    /// The reserved engine-internal principal.
    pub fn system() -> Self {
        Self {
            actor_id: ActorId::system(),
            class: None,
        }
    }
}

/// Lifecycle status of a unit of work.
///
/// The legal transition graph lives in [`crate::state_machine`]; this enum is
/// only the vocabulary. `Completed` and `Failed` are terminal and permanent.
///
/// # Persistence
///
/// Statuses persist as SCREAMING_SNAKE strings via [`encode`](Self::encode) /
/// [`decode`](Self::decode) so that rows stay legible in any storage backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UowStatus {
    /// Sitting in an interaction, waiting to be leased.
    Pending,
    /// Exclusively leased by one actor.
    Active,
    /// Terminal success.
    Completed,
    /// Terminal failure.
    Failed,
    /// Suspended by the pilot kill-switch; resumable via waiver.
    Paused,
    /// Parked for a pilot decision (Park & Notify).
    PendingPilotApproval,
    /// Recoverable stall: soft timeout or ambiguity lock.
    ZombiedSoft,
    /// Hard timeout; lease forfeited, awaiting reclamation.
    ZombiedDead,
}

impl UowStatus {
    pub const ALL: [UowStatus; 8] = [
        UowStatus::Pending,
        UowStatus::Active,
        UowStatus::Completed,
        UowStatus::Failed,
        UowStatus::Paused,
        UowStatus::PendingPilotApproval,
        UowStatus::ZombiedSoft,
        UowStatus::ZombiedDead,
    ];

    /// Encode into the persisted string form.
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            UowStatus::Pending => "PENDING",
            UowStatus::Active => "ACTIVE",
            UowStatus::Completed => "COMPLETED",
            UowStatus::Failed => "FAILED",
            UowStatus::Paused => "PAUSED",
            UowStatus::PendingPilotApproval => "PENDING_PILOT_APPROVAL",
            UowStatus::ZombiedSoft => "ZOMBIED_SOFT",
            UowStatus::ZombiedDead => "ZOMBIED_DEAD",
        }
    }

    /// Decode a persisted string form. Returns `None` for unknown strings so
    /// storage drivers can surface corruption instead of guessing.
    pub fn decode(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|st| st.encode() == s)
    }

    /// Terminal statuses are permanent: no transition leaves them.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, UowStatus::Completed | UowStatus::Failed)
    }
}

impl fmt::Display for UowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Role kinds. One each of ALPHA/OMEGA/EPSILON/TAU per template (R1–R4);
/// any number of BETA workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RoleKind {
    /// Origin: seeds the initial unit of work.
    Alpha,
    /// Worker, possibly decomposing into children.
    Beta,
    /// Terminal consumer, gated by CERBERUS.
    Omega,
    /// Error handler (the Ate Path).
    Epsilon,
    /// Timeout sweeper role.
    Tau,
}

impl RoleKind {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            RoleKind::Alpha => "ALPHA",
            RoleKind::Beta => "BETA",
            RoleKind::Omega => "OMEGA",
            RoleKind::Epsilon => "EPSILON",
            RoleKind::Tau => "TAU",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "ALPHA" => Some(RoleKind::Alpha),
            "BETA" => Some(RoleKind::Beta),
            "OMEGA" => Some(RoleKind::Omega),
            "EPSILON" => Some(RoleKind::Epsilon),
            "TAU" => Some(RoleKind::Tau),
            _ => None,
        }
    }

    /// Only BETA roles fan a parent out into children.
    #[must_use]
    pub fn may_decompose(self) -> bool {
        matches!(self, RoleKind::Beta)
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// How a BETA role splits a parent into children.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DecompositionStrategy {
    /// Children are interchangeable shards of the parent.
    Homogeneous,
    /// Children carry distinct sub-tasks.
    Heterogeneous,
}

impl DecompositionStrategy {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            DecompositionStrategy::Homogeneous => "HOMOGENEOUS",
            DecompositionStrategy::Heterogeneous => "HETEROGENEOUS",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "HOMOGENEOUS" => Some(DecompositionStrategy::Homogeneous),
            "HETEROGENEOUS" => Some(DecompositionStrategy::Heterogeneous),
            _ => None,
        }
    }
}

/// Direction of a component edge between a role and an interaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Role consumes from the interaction.
    Inbound,
    /// Role produces into the interaction.
    Outbound,
}

impl Direction {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            Direction::Inbound => "INBOUND",
            Direction::Outbound => "OUTBOUND",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "INBOUND" => Some(Direction::Inbound),
            "OUTBOUND" => Some(Direction::Outbound),
            _ => None,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Kinds of guard attachable to a component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GuardKind {
    /// No policy; work flows through untouched.
    PassThru,
    /// Routes by evaluating the interaction policy branches.
    CriteriaGate,
    /// Filters by direction-specific criteria; same policy machinery.
    DirectionalFilter,
    /// Admits a parent only when every child is terminal.
    Cerberus,
    /// Policy with time-to-live semantics over attribute ages.
    TtlCheck,
    /// Routes and may attach mutation payloads to the outbound context.
    ConditionalInjector,
    /// Holds child guards joined by an AND/OR reducer.
    Composite,
}

impl GuardKind {
    #[must_use]
    pub fn encode(self) -> &'static str {
        match self {
            GuardKind::PassThru => "PASS_THRU",
            GuardKind::CriteriaGate => "CRITERIA_GATE",
            GuardKind::DirectionalFilter => "DIRECTIONAL_FILTER",
            GuardKind::Cerberus => "CERBERUS",
            GuardKind::TtlCheck => "TTL_CHECK",
            GuardKind::ConditionalInjector => "CONDITIONAL_INJECTOR",
            GuardKind::Composite => "COMPOSITE",
        }
    }

    pub fn decode(s: &str) -> Option<Self> {
        match s {
            "PASS_THRU" => Some(GuardKind::PassThru),
            "CRITERIA_GATE" => Some(GuardKind::CriteriaGate),
            "DIRECTIONAL_FILTER" => Some(GuardKind::DirectionalFilter),
            "CERBERUS" => Some(GuardKind::Cerberus),
            "TTL_CHECK" => Some(GuardKind::TtlCheck),
            "CONDITIONAL_INJECTOR" => Some(GuardKind::ConditionalInjector),
            "COMPOSITE" => Some(GuardKind::Composite),
            _ => None,
        }
    }
}

impl fmt::Display for GuardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}
