//! Workflow templates: the importable blueprint format and its validator.
//!
//! A template is order-independent text (YAML or JSON) naming roles,
//! interactions, and directed components with optional guardians. Names are
//! the identifiers within the file; the materializer assigns opaque ids on
//! import. Import is atomic: a template that fails any structural rule
//! persists nothing.

pub mod model;
pub mod validator;

pub use model::{
    ComponentSpec, GuardianAttributes, GuardianSpec, InteractionSpec, RoleSpec, TemplateSpec,
    WorkflowSpec,
};
pub use validator::{TemplateValidationError, TemplateViolation, validate};
