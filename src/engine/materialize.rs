//! Template import and instance materialization.
//!
//! Import validates first and persists second, so a rejected template
//! leaves no rows behind. Materialization clones the template's wiring
//! into instance scope (fresh ids, same names), seeds the ALPHA unit of
//! work with the caller's initial context as Global Blueprint attributes,
//! and parks it on the ALPHA role's outbound interaction.

use chrono::Utc;
use serde_json::Value as Json;
use tracing::instrument;

use super::{EngineError, InstantiateOptions, Result, WorkflowEngine};
use crate::attrs::AttributeWrite;
use crate::history::{TransitionKind, TransitionRecord};
use crate::storage::{
    ComponentRecord, GuardRecord, InstanceRecord, InteractionRecord, RoleRecord, TemplateRecord,
    UowRecord,
};
use crate::template::{TemplateSpec, validate};
use crate::types::{
    ActorId, ComponentId, Direction, GuardId, InstanceId, InteractionId, RoleId, RoleKind,
    TemplateId, UowId, UowStatus,
};

impl WorkflowEngine {
    /// Import a template from YAML text.
    pub async fn import_template_yaml(&self, text: &str) -> Result<TemplateId> {
        let spec = TemplateSpec::from_yaml(text)
            .map_err(|e| EngineError::validation(format!("template parse error: {e}")))?;
        self.import_template(&spec).await
    }

    /// Import a template from JSON text.
    pub async fn import_template_json(&self, text: &str) -> Result<TemplateId> {
        let spec = TemplateSpec::from_json(text)
            .map_err(|e| EngineError::validation(format!("template parse error: {e}")))?;
        self.import_template(&spec).await
    }

    /// Validate and persist a parsed template. Atomic: any rule violation
    /// aborts before the first write.
    #[instrument(skip(self, spec), fields(template = %spec.workflow.name))]
    pub async fn import_template(&self, spec: &TemplateSpec) -> Result<TemplateId> {
        validate(&spec.workflow, self.functions())?;

        let workflow = &spec.workflow;
        let template_id: TemplateId = self.mint(TemplateId::PREFIX);
        let scope_id = template_id.to_string();

        let mut txn = self.storage().begin().await?;
        txn.insert_template(TemplateRecord {
            id: template_id.clone(),
            name: workflow.name.clone(),
            version: workflow.version.clone(),
            description: workflow.description.clone(),
            ai_context: workflow.ai_context.clone(),
            attributes: workflow.attributes.clone(),
            created_at: Utc::now(),
        })
        .await?;

        // Name → id maps let components resolve their endpoints.
        let mut role_ids = std::collections::HashMap::new();
        for role in &workflow.roles {
            let id: RoleId = self.mint(RoleId::PREFIX);
            role_ids.insert(role.name.clone(), id.clone());
            txn.insert_role(RoleRecord {
                id,
                scope_id: scope_id.clone(),
                name: role.name.clone(),
                kind: role.kind,
                strategy: role.strategy,
                actor_classes: role.actor_classes.clone(),
            })
            .await?;
        }

        let mut interaction_ids = std::collections::HashMap::new();
        for interaction in &workflow.interactions {
            let id: InteractionId = self.mint(InteractionId::PREFIX);
            interaction_ids.insert(interaction.name.clone(), id.clone());
            txn.insert_interaction(InteractionRecord {
                id,
                scope_id: scope_id.clone(),
                name: interaction.name.clone(),
                description: interaction.description.clone(),
            })
            .await?;
        }

        for component in &workflow.components {
            let guard_id = match &component.guardian {
                Some(guardian) => {
                    let id: GuardId = self.mint(GuardId::PREFIX);
                    txn.insert_guard(GuardRecord {
                        id: id.clone(),
                        scope_id: scope_id.clone(),
                        kind: guardian.kind,
                        logic: guardian.to_logic(),
                    })
                    .await?;
                    Some(id)
                }
                None => None,
            };
            let role_id = role_ids
                .get(&component.role)
                .cloned()
                .ok_or_else(|| EngineError::validation("component references unknown role"))?;
            let interaction_id = interaction_ids
                .get(&component.interaction)
                .cloned()
                .ok_or_else(|| {
                    EngineError::validation("component references unknown interaction")
                })?;
            txn.insert_component(ComponentRecord {
                id: self.mint(ComponentId::PREFIX),
                scope_id: scope_id.clone(),
                name: component.name.clone(),
                role_id,
                interaction_id,
                direction: component.direction,
                guard_id,
            })
            .await?;
        }

        txn.commit().await?;
        Ok(template_id)
    }

    /// Materialize a template into a runnable instance and seed the ALPHA
    /// unit of work with `initial_context` (all Global Blueprint).
    #[instrument(skip(self, initial_context, options), fields(template = %template_id))]
    pub async fn instantiate_workflow(
        &self,
        template_id: &TemplateId,
        initial_context: impl IntoIterator<Item = (String, Json)>,
        options: InstantiateOptions,
    ) -> Result<InstanceId> {
        let mut txn = self.storage().begin().await?;
        let template = txn.fetch_template(template_id).await?;
        let blueprint = txn.fetch_blueprint(template_id.as_str()).await?;

        let instance_id: InstanceId = self.mint(InstanceId::PREFIX);
        let scope_id = instance_id.to_string();
        txn.insert_instance(InstanceRecord {
            id: instance_id.clone(),
            template_id: template_id.clone(),
            name: options.name.unwrap_or_else(|| template.name.clone()),
            created_at: Utc::now(),
        })
        .await?;

        // Clone the wiring into instance scope with fresh ids.
        let mut role_ids = std::collections::HashMap::new();
        for role in &blueprint.roles {
            let id: RoleId = self.mint(RoleId::PREFIX);
            role_ids.insert(role.id.clone(), id.clone());
            txn.insert_role(RoleRecord {
                id,
                scope_id: scope_id.clone(),
                ..role.clone()
            })
            .await?;
        }
        let mut interaction_ids = std::collections::HashMap::new();
        for interaction in &blueprint.interactions {
            let id: InteractionId = self.mint(InteractionId::PREFIX);
            interaction_ids.insert(interaction.id.clone(), id.clone());
            txn.insert_interaction(InteractionRecord {
                id,
                scope_id: scope_id.clone(),
                ..interaction.clone()
            })
            .await?;
        }
        let mut guard_ids = std::collections::HashMap::new();
        for guard in &blueprint.guards {
            let id: GuardId = self.mint(GuardId::PREFIX);
            guard_ids.insert(guard.id.clone(), id.clone());
            txn.insert_guard(GuardRecord {
                id,
                scope_id: scope_id.clone(),
                ..guard.clone()
            })
            .await?;
        }
        let mut alpha_outbound: Option<InteractionId> = None;
        for component in &blueprint.components {
            let role_id = role_ids
                .get(&component.role_id)
                .cloned()
                .ok_or_else(|| EngineError::validation("dangling component role"))?;
            let interaction_id = interaction_ids
                .get(&component.interaction_id)
                .cloned()
                .ok_or_else(|| EngineError::validation("dangling component interaction"))?;
            let guard_id = match &component.guard_id {
                Some(old) => Some(
                    guard_ids
                        .get(old)
                        .cloned()
                        .ok_or_else(|| EngineError::validation("dangling component guard"))?,
                ),
                None => None,
            };
            if component.direction == Direction::Outbound
                && blueprint.role(&component.role_id).map(|r| r.kind) == Some(RoleKind::Alpha)
                && alpha_outbound.is_none()
            {
                alpha_outbound = Some(interaction_id.clone());
            }
            txn.insert_component(ComponentRecord {
                id: self.mint(ComponentId::PREFIX),
                scope_id: scope_id.clone(),
                name: component.name.clone(),
                role_id,
                interaction_id,
                direction: component.direction,
                guard_id,
            })
            .await?;
        }

        let seed_interaction = alpha_outbound
            .ok_or_else(|| EngineError::validation("template has no ALPHA outbound component"))?;

        // Seed the ALPHA unit of work.
        let uow_id: UowId = self.mint(UowId::PREFIX);
        let now = Utc::now();
        let mut uow = UowRecord {
            id: uow_id.clone(),
            instance_id: instance_id.clone(),
            parent_id: None,
            status: UowStatus::Pending,
            interaction_count: 0,
            max_interactions: options
                .max_interactions
                .unwrap_or(self.config().default_max_interactions),
            current_interaction_id: Some(seed_interaction),
            lease_actor_id: None,
            last_heartbeat: None,
            content_hash: String::new(),
            child_count: 0,
            finished_child_count: 0,
            priority: options.priority,
            created_at: now,
            updated_at: now,
        };
        txn.insert_uow(uow.clone()).await?;

        let writes: Vec<AttributeWrite> = initial_context
            .into_iter()
            .map(|(key, value)| AttributeWrite::global(key, value))
            .collect();
        self.write_attributes(&mut txn, &uow_id, &writes, &ActorId::system())
            .await?;

        self.transition(
            &mut txn,
            &mut uow,
            TransitionRecord::new(
                None,
                UowStatus::Pending,
                ActorId::system(),
                TransitionKind::Created,
            )
            .with_metadata(serde_json::json!({"seed": true})),
        )
        .await?;

        txn.commit().await?;
        Ok(instance_id)
    }
}
