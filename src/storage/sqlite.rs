/*!
SQLite storage driver

Durable implementation of the `Storage`/`StorageTxn` traits over `sqlx`.

## Behavior

- One sqlx transaction per engine operation; SQLite's single-writer model
  supplies the row protection the trait demands.
- JSON-bearing columns (`attributes_json`, `logic_json`, `value_json`,
  `metadata_json`) round-trip through `serde_json`; pure serialization
  stays out of the query code.
- When the `sqlite-migrations` feature is enabled (default), embedded
  migrations (`sqlx::migrate!("./migrations")`) run on connect; disabling
  the feature assumes external migration orchestration.
- `uow_history` is guarded by append-only triggers; an UPDATE or DELETE
  aborts at the database level regardless of what the process asks for.
*/

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, Sqlite, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::{
    ActorRecord, Blueprint, ComponentRecord, GuardRecord, InstanceRecord, InteractionRecord,
    Result, RoleRecord, Storage, StorageError, StorageTxn, TemplateRecord, UowRecord,
};
use crate::attrs::AttributeRecord;
use crate::guards::GuardLogic;
use crate::history::{HistoryEntry, TransitionKind};
use crate::types::{
    ActorId, ComponentId, DecompositionStrategy, Direction, GuardId, GuardKind, InstanceId,
    InteractionId, RoleId, RoleKind, TemplateId, UowId, UowStatus,
};

/// SQLite-backed storage. Cheap to clone; the pool is shared.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl std::fmt::Debug for SqliteStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStorage").finish()
    }
}

impl SqliteStorage {
    /// Connect (or create) a SQLite database at `database_url`.
    /// Example URL: `sqlite://gatewright.db?mode=rwc`.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| StorageError::backend(format!("connect error: {e}")))?;
        #[cfg(feature = "sqlite-migrations")]
        {
            if let Err(e) = sqlx::migrate!("./migrations").run(&pool).await {
                return Err(StorageError::backend(format!("migration failure: {e}")));
            }
        }
        Ok(Self { pool })
    }

    /// Wrap an existing pool (the caller already ran migrations).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool, for maintenance queries outside the engine.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn begin(&self) -> Result<Box<dyn StorageTxn>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::backend(format!("tx begin: {e}")))?;
        Ok(Box::new(SqliteTxn { tx }))
    }
}

pub struct SqliteTxn {
    tx: sqlx::Transaction<'static, Sqlite>,
}

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> StorageError + '_ {
    move |e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StorageError::Conflict {
            message: format!("{context}: {db}"),
        },
        _ => StorageError::backend(format!("{context}: {e}")),
    }
}

fn decode_field<T>(value: Option<T>, what: &'static str, raw: &str) -> Result<T> {
    value.ok_or_else(|| StorageError::Serialization {
        message: format!("unrecognized {what}: {raw}"),
    })
}

fn row_to_uow(row: &SqliteRow) -> Result<UowRecord> {
    let status_raw: String = row.try_get("status").map_err(db_err("uows.status"))?;
    let status = decode_field(UowStatus::decode(&status_raw), "uow status", &status_raw)?;
    Ok(UowRecord {
        id: UowId::new(
            row.try_get::<String, _>("id")
                .map_err(db_err("uows.id"))?,
        ),
        instance_id: InstanceId::new(
            row.try_get::<String, _>("instance_id")
                .map_err(db_err("uows.instance_id"))?,
        ),
        parent_id: row
            .try_get::<Option<String>, _>("parent_id")
            .map_err(db_err("uows.parent_id"))?
            .map(UowId::new),
        status,
        interaction_count: row
            .try_get::<i64, _>("interaction_count")
            .map_err(db_err("uows.interaction_count"))? as u32,
        max_interactions: row
            .try_get::<i64, _>("max_interactions")
            .map_err(db_err("uows.max_interactions"))? as u32,
        current_interaction_id: row
            .try_get::<Option<String>, _>("current_interaction_id")
            .map_err(db_err("uows.current_interaction_id"))?
            .map(InteractionId::new),
        lease_actor_id: row
            .try_get::<Option<String>, _>("lease_actor_id")
            .map_err(db_err("uows.lease_actor_id"))?
            .map(ActorId::new),
        last_heartbeat: row
            .try_get::<Option<DateTime<Utc>>, _>("last_heartbeat")
            .map_err(db_err("uows.last_heartbeat"))?,
        content_hash: row
            .try_get("content_hash")
            .map_err(db_err("uows.content_hash"))?,
        child_count: row
            .try_get::<i64, _>("child_count")
            .map_err(db_err("uows.child_count"))? as u32,
        finished_child_count: row
            .try_get::<i64, _>("finished_child_count")
            .map_err(db_err("uows.finished_child_count"))? as u32,
        priority: row
            .try_get::<i64, _>("priority")
            .map_err(db_err("uows.priority"))? as i32,
        created_at: row
            .try_get("created_at")
            .map_err(db_err("uows.created_at"))?,
        updated_at: row
            .try_get("updated_at")
            .map_err(db_err("uows.updated_at"))?,
    })
}

fn row_to_history(row: &SqliteRow) -> Result<HistoryEntry> {
    let to_raw: String = row
        .try_get("to_status")
        .map_err(db_err("uow_history.to_status"))?;
    let from_raw: Option<String> = row
        .try_get("from_status")
        .map_err(db_err("uow_history.from_status"))?;
    let event_raw: String = row
        .try_get("event_type")
        .map_err(db_err("uow_history.event_type"))?;
    let metadata_raw: String = row
        .try_get("metadata_json")
        .map_err(db_err("uow_history.metadata_json"))?;
    Ok(HistoryEntry {
        uow_id: UowId::new(
            row.try_get::<String, _>("uow_id")
                .map_err(db_err("uow_history.uow_id"))?,
        ),
        seq: row.try_get::<i64, _>("seq").map_err(db_err("uow_history.seq"))? as u64,
        from_status: match from_raw {
            Some(raw) => Some(decode_field(
                UowStatus::decode(&raw),
                "history from_status",
                &raw,
            )?),
            None => None,
        },
        to_status: decode_field(UowStatus::decode(&to_raw), "history to_status", &to_raw)?,
        actor_id: ActorId::new(
            row.try_get::<String, _>("actor_id")
                .map_err(db_err("uow_history.actor_id"))?,
        ),
        event_type: decode_field(
            TransitionKind::decode(&event_raw),
            "history event_type",
            &event_raw,
        )?,
        reason: row
            .try_get("reason")
            .map_err(db_err("uow_history.reason"))?,
        prev_content_hash: row
            .try_get("prev_content_hash")
            .map_err(db_err("uow_history.prev_content_hash"))?,
        new_content_hash: row
            .try_get("new_content_hash")
            .map_err(db_err("uow_history.new_content_hash"))?,
        recorded_at: row
            .try_get("recorded_at")
            .map_err(db_err("uow_history.recorded_at"))?,
        metadata: serde_json::from_str(&metadata_raw).map_err(StorageError::serde)?,
    })
}

fn row_to_attribute(row: &SqliteRow) -> Result<AttributeRecord> {
    let value_raw: String = row
        .try_get("value_json")
        .map_err(db_err("uow_attributes.value_json"))?;
    Ok(AttributeRecord {
        uow_id: UowId::new(
            row.try_get::<String, _>("uow_id")
                .map_err(db_err("uow_attributes.uow_id"))?,
        ),
        key: row.try_get("key").map_err(db_err("uow_attributes.key"))?,
        version: row
            .try_get::<i64, _>("version")
            .map_err(db_err("uow_attributes.version"))? as u32,
        value: serde_json::from_str(&value_raw).map_err(StorageError::serde)?,
        owner_actor_id: row
            .try_get::<Option<String>, _>("owner_actor_id")
            .map_err(db_err("uow_attributes.owner_actor_id"))?
            .map(ActorId::new),
        author_actor_id: ActorId::new(
            row.try_get::<String, _>("author_actor_id")
                .map_err(db_err("uow_attributes.author_actor_id"))?,
        ),
        reasoning: row
            .try_get("reasoning")
            .map_err(db_err("uow_attributes.reasoning"))?,
        written_at: row
            .try_get("written_at")
            .map_err(db_err("uow_attributes.written_at"))?,
    })
}

#[async_trait]
impl StorageTxn for SqliteTxn {
    async fn insert_template(&mut self, template: TemplateRecord) -> Result<()> {
        let attributes_json =
            serde_json::to_string(&template.attributes).map_err(StorageError::serde)?;
        sqlx::query(
            r#"
            INSERT INTO templates (id, name, version, description, ai_context, attributes_json, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        )
        .bind(template.id.as_str())
        .bind(&template.name)
        .bind(&template.version)
        .bind(&template.description)
        .bind(&template.ai_context)
        .bind(&attributes_json)
        .bind(template.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert template"))?;
        Ok(())
    }

    async fn fetch_template(&mut self, id: &TemplateId) -> Result<TemplateRecord> {
        let row = sqlx::query("SELECT * FROM templates WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err("fetch template"))?
            .ok_or_else(|| StorageError::NotFound {
                what: "template",
                id: id.to_string(),
            })?;
        let attributes_raw: String = row
            .try_get("attributes_json")
            .map_err(db_err("templates.attributes_json"))?;
        Ok(TemplateRecord {
            id: id.clone(),
            name: row.try_get("name").map_err(db_err("templates.name"))?,
            version: row
                .try_get("version")
                .map_err(db_err("templates.version"))?,
            description: row
                .try_get("description")
                .map_err(db_err("templates.description"))?,
            ai_context: row
                .try_get("ai_context")
                .map_err(db_err("templates.ai_context"))?,
            attributes: serde_json::from_str(&attributes_raw).map_err(StorageError::serde)?,
            created_at: row
                .try_get("created_at")
                .map_err(db_err("templates.created_at"))?,
        })
    }

    async fn insert_role(&mut self, role: RoleRecord) -> Result<()> {
        let classes_json =
            serde_json::to_string(&role.actor_classes).map_err(StorageError::serde)?;
        sqlx::query(
            r#"
            INSERT INTO roles (id, scope_id, name, kind, strategy, actor_classes_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        )
        .bind(role.id.as_str())
        .bind(&role.scope_id)
        .bind(&role.name)
        .bind(role.kind.encode())
        .bind(role.strategy.map(DecompositionStrategy::encode))
        .bind(&classes_json)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert role"))?;
        Ok(())
    }

    async fn fetch_role(&mut self, id: &RoleId) -> Result<RoleRecord> {
        let row = sqlx::query("SELECT * FROM roles WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err("fetch role"))?
            .ok_or_else(|| StorageError::NotFound {
                what: "role",
                id: id.to_string(),
            })?;
        let kind_raw: String = row.try_get("kind").map_err(db_err("roles.kind"))?;
        let strategy_raw: Option<String> =
            row.try_get("strategy").map_err(db_err("roles.strategy"))?;
        let classes_raw: String = row
            .try_get("actor_classes_json")
            .map_err(db_err("roles.actor_classes_json"))?;
        Ok(RoleRecord {
            id: id.clone(),
            scope_id: row.try_get("scope_id").map_err(db_err("roles.scope_id"))?,
            name: row.try_get("name").map_err(db_err("roles.name"))?,
            kind: decode_field(RoleKind::decode(&kind_raw), "role kind", &kind_raw)?,
            strategy: match strategy_raw {
                Some(raw) => Some(decode_field(
                    DecompositionStrategy::decode(&raw),
                    "role strategy",
                    &raw,
                )?),
                None => None,
            },
            actor_classes: serde_json::from_str(&classes_raw).map_err(StorageError::serde)?,
        })
    }

    async fn insert_interaction(&mut self, interaction: InteractionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO interactions (id, scope_id, name, description)
            VALUES (?1, ?2, ?3, ?4)
        "#,
        )
        .bind(interaction.id.as_str())
        .bind(&interaction.scope_id)
        .bind(&interaction.name)
        .bind(&interaction.description)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert interaction"))?;
        Ok(())
    }

    async fn insert_component(&mut self, component: ComponentRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO components (id, scope_id, name, role_id, interaction_id, direction, guard_id)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        )
        .bind(component.id.as_str())
        .bind(&component.scope_id)
        .bind(&component.name)
        .bind(component.role_id.as_str())
        .bind(component.interaction_id.as_str())
        .bind(component.direction.encode())
        .bind(component.guard_id.as_ref().map(GuardId::as_str))
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert component"))?;
        Ok(())
    }

    async fn insert_guard(&mut self, guard: GuardRecord) -> Result<()> {
        let logic_json = serde_json::to_string(&guard.logic).map_err(StorageError::serde)?;
        sqlx::query(
            r#"
            INSERT INTO guards (id, scope_id, kind, logic_json)
            VALUES (?1, ?2, ?3, ?4)
        "#,
        )
        .bind(guard.id.as_str())
        .bind(&guard.scope_id)
        .bind(guard.kind.encode())
        .bind(&logic_json)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert guard"))?;
        Ok(())
    }

    async fn fetch_blueprint(&mut self, scope_id: &str) -> Result<Blueprint> {
        let role_rows = sqlx::query("SELECT * FROM roles WHERE scope_id = ?1 ORDER BY id")
            .bind(scope_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err("fetch roles"))?;
        let mut roles = Vec::with_capacity(role_rows.len());
        for row in &role_rows {
            let kind_raw: String = row.try_get("kind").map_err(db_err("roles.kind"))?;
            let strategy_raw: Option<String> =
                row.try_get("strategy").map_err(db_err("roles.strategy"))?;
            let classes_raw: String = row
                .try_get("actor_classes_json")
                .map_err(db_err("roles.actor_classes_json"))?;
            roles.push(RoleRecord {
                id: RoleId::new(row.try_get::<String, _>("id").map_err(db_err("roles.id"))?),
                scope_id: row
                    .try_get("scope_id")
                    .map_err(db_err("roles.scope_id"))?,
                name: row.try_get("name").map_err(db_err("roles.name"))?,
                kind: decode_field(RoleKind::decode(&kind_raw), "role kind", &kind_raw)?,
                strategy: match strategy_raw {
                    Some(raw) => Some(decode_field(
                        DecompositionStrategy::decode(&raw),
                        "role strategy",
                        &raw,
                    )?),
                    None => None,
                },
                actor_classes: serde_json::from_str(&classes_raw).map_err(StorageError::serde)?,
            });
        }

        let interaction_rows =
            sqlx::query("SELECT * FROM interactions WHERE scope_id = ?1 ORDER BY id")
                .bind(scope_id)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(db_err("fetch interactions"))?;
        let mut interactions = Vec::with_capacity(interaction_rows.len());
        for row in &interaction_rows {
            interactions.push(InteractionRecord {
                id: InteractionId::new(
                    row.try_get::<String, _>("id")
                        .map_err(db_err("interactions.id"))?,
                ),
                scope_id: row
                    .try_get("scope_id")
                    .map_err(db_err("interactions.scope_id"))?,
                name: row.try_get("name").map_err(db_err("interactions.name"))?,
                description: row
                    .try_get("description")
                    .map_err(db_err("interactions.description"))?,
            });
        }

        let component_rows =
            sqlx::query("SELECT * FROM components WHERE scope_id = ?1 ORDER BY id")
                .bind(scope_id)
                .fetch_all(&mut *self.tx)
                .await
                .map_err(db_err("fetch components"))?;
        let mut components = Vec::with_capacity(component_rows.len());
        for row in &component_rows {
            let direction_raw: String = row
                .try_get("direction")
                .map_err(db_err("components.direction"))?;
            components.push(ComponentRecord {
                id: ComponentId::new(
                    row.try_get::<String, _>("id")
                        .map_err(db_err("components.id"))?,
                ),
                scope_id: row
                    .try_get("scope_id")
                    .map_err(db_err("components.scope_id"))?,
                name: row.try_get("name").map_err(db_err("components.name"))?,
                role_id: RoleId::new(
                    row.try_get::<String, _>("role_id")
                        .map_err(db_err("components.role_id"))?,
                ),
                interaction_id: InteractionId::new(
                    row.try_get::<String, _>("interaction_id")
                        .map_err(db_err("components.interaction_id"))?,
                ),
                direction: decode_field(
                    Direction::decode(&direction_raw),
                    "component direction",
                    &direction_raw,
                )?,
                guard_id: row
                    .try_get::<Option<String>, _>("guard_id")
                    .map_err(db_err("components.guard_id"))?
                    .map(GuardId::new),
            });
        }

        let guard_rows = sqlx::query("SELECT * FROM guards WHERE scope_id = ?1 ORDER BY id")
            .bind(scope_id)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err("fetch guards"))?;
        let mut guards = Vec::with_capacity(guard_rows.len());
        for row in &guard_rows {
            let kind_raw: String = row.try_get("kind").map_err(db_err("guards.kind"))?;
            let logic_raw: String = row
                .try_get("logic_json")
                .map_err(db_err("guards.logic_json"))?;
            let logic: GuardLogic =
                serde_json::from_str(&logic_raw).map_err(StorageError::serde)?;
            guards.push(GuardRecord {
                id: GuardId::new(
                    row.try_get::<String, _>("id")
                        .map_err(db_err("guards.id"))?,
                ),
                scope_id: row
                    .try_get("scope_id")
                    .map_err(db_err("guards.scope_id"))?,
                kind: decode_field(GuardKind::decode(&kind_raw), "guard kind", &kind_raw)?,
                logic,
            });
        }

        Ok(Blueprint {
            roles,
            interactions,
            components,
            guards,
        })
    }

    async fn insert_instance(&mut self, instance: InstanceRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (id, template_id, name, created_at)
            VALUES (?1, ?2, ?3, ?4)
        "#,
        )
        .bind(instance.id.as_str())
        .bind(instance.template_id.as_str())
        .bind(&instance.name)
        .bind(instance.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert instance"))?;
        Ok(())
    }

    async fn fetch_instance(&mut self, id: &InstanceId) -> Result<InstanceRecord> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err("fetch instance"))?
            .ok_or_else(|| StorageError::NotFound {
                what: "instance",
                id: id.to_string(),
            })?;
        Ok(InstanceRecord {
            id: id.clone(),
            template_id: TemplateId::new(
                row.try_get::<String, _>("template_id")
                    .map_err(db_err("instances.template_id"))?,
            ),
            name: row.try_get("name").map_err(db_err("instances.name"))?,
            created_at: row
                .try_get("created_at")
                .map_err(db_err("instances.created_at"))?,
        })
    }

    async fn upsert_actor(&mut self, actor: ActorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO actors (id, class, first_seen, last_seen)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (id) DO UPDATE SET
                last_seen = excluded.last_seen,
                class = COALESCE(actors.class, excluded.class)
        "#,
        )
        .bind(actor.id.as_str())
        .bind(&actor.class)
        .bind(actor.first_seen)
        .bind(actor.last_seen)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("upsert actor"))?;
        Ok(())
    }

    async fn insert_uow(&mut self, uow: UowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO uows (
                id, instance_id, parent_id, status,
                interaction_count, max_interactions, current_interaction_id,
                lease_actor_id, last_heartbeat, content_hash,
                child_count, finished_child_count, priority,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
        )
        .bind(uow.id.as_str())
        .bind(uow.instance_id.as_str())
        .bind(uow.parent_id.as_ref().map(UowId::as_str))
        .bind(uow.status.encode())
        .bind(uow.interaction_count as i64)
        .bind(uow.max_interactions as i64)
        .bind(uow.current_interaction_id.as_ref().map(InteractionId::as_str))
        .bind(uow.lease_actor_id.as_ref().map(ActorId::as_str))
        .bind(uow.last_heartbeat)
        .bind(&uow.content_hash)
        .bind(uow.child_count as i64)
        .bind(uow.finished_child_count as i64)
        .bind(uow.priority as i64)
        .bind(uow.created_at)
        .bind(uow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert uow"))?;
        Ok(())
    }

    async fn load_uow(&mut self, id: &UowId) -> Result<UowRecord> {
        let row = sqlx::query("SELECT * FROM uows WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_err("load uow"))?
            .ok_or_else(|| StorageError::NotFound {
                what: "uow",
                id: id.to_string(),
            })?;
        row_to_uow(&row)
    }

    async fn update_uow(&mut self, uow: &UowRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE uows SET
                status = ?2,
                interaction_count = ?3,
                max_interactions = ?4,
                current_interaction_id = ?5,
                lease_actor_id = ?6,
                last_heartbeat = ?7,
                content_hash = ?8,
                child_count = ?9,
                finished_child_count = ?10,
                priority = ?11,
                updated_at = ?12
            WHERE id = ?1
        "#,
        )
        .bind(uow.id.as_str())
        .bind(uow.status.encode())
        .bind(uow.interaction_count as i64)
        .bind(uow.max_interactions as i64)
        .bind(uow.current_interaction_id.as_ref().map(InteractionId::as_str))
        .bind(uow.lease_actor_id.as_ref().map(ActorId::as_str))
        .bind(uow.last_heartbeat)
        .bind(&uow.content_hash)
        .bind(uow.child_count as i64)
        .bind(uow.finished_child_count as i64)
        .bind(uow.priority as i64)
        .bind(uow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("update uow"))?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound {
                what: "uow",
                id: uow.id.to_string(),
            });
        }
        Ok(())
    }

    async fn pending_uows_in(&mut self, interactions: &[InteractionId]) -> Result<Vec<UowRecord>> {
        if interactions.is_empty() {
            return Ok(Vec::new());
        }
        // sqlx has no array binds for SQLite; build the placeholder list.
        let placeholders: Vec<String> =
            (0..interactions.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            r#"
            SELECT * FROM uows
            WHERE status = ?1 AND current_interaction_id IN ({})
            ORDER BY priority DESC, created_at ASC, id ASC
        "#,
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql).bind(UowStatus::Pending.encode());
        for interaction in interactions {
            query = query.bind(interaction.as_str());
        }
        let rows = query
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err("pending uows"))?;
        rows.iter().map(row_to_uow).collect()
    }

    async fn active_uows_of_instance(&mut self, instance: &InstanceId) -> Result<Vec<UowRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM uows WHERE status = ?1 AND instance_id = ?2 ORDER BY id",
        )
        .bind(UowStatus::Active.encode())
        .bind(instance.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err("active uows"))?;
        rows.iter().map(row_to_uow).collect()
    }

    async fn active_uows_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM uows WHERE status = ?1 AND last_heartbeat IS NOT NULL AND last_heartbeat < ?2 ORDER BY id",
        )
        .bind(UowStatus::Active.encode())
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err("stale active uows"))?;
        rows.iter().map(row_to_uow).collect()
    }

    async fn soft_zombies_stale_since(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<UowRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM uows WHERE status = ?1 AND last_heartbeat IS NOT NULL AND last_heartbeat < ?2 ORDER BY id",
        )
        .bind(UowStatus::ZombiedSoft.encode())
        .bind(cutoff)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err("stale soft zombies"))?;
        rows.iter().map(row_to_uow).collect()
    }

    async fn children_of(&mut self, parent: &UowId) -> Result<Vec<UowRecord>> {
        let rows = sqlx::query("SELECT * FROM uows WHERE parent_id = ?1 ORDER BY id")
            .bind(parent.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err("children of uow"))?;
        rows.iter().map(row_to_uow).collect()
    }

    async fn insert_attribute(&mut self, attribute: AttributeRecord) -> Result<()> {
        let value_json = serde_json::to_string(&attribute.value).map_err(StorageError::serde)?;
        sqlx::query(
            r#"
            INSERT INTO uow_attributes (
                uow_id, key, version, value_json,
                owner_actor_id, author_actor_id, reasoning, written_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        )
        .bind(attribute.uow_id.as_str())
        .bind(&attribute.key)
        .bind(attribute.version as i64)
        .bind(&value_json)
        .bind(attribute.owner_actor_id.as_ref().map(ActorId::as_str))
        .bind(attribute.author_actor_id.as_str())
        .bind(&attribute.reasoning)
        .bind(attribute.written_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("insert attribute"))?;
        Ok(())
    }

    async fn load_attributes(&mut self, uow: &UowId) -> Result<Vec<AttributeRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM uow_attributes WHERE uow_id = ?1 ORDER BY key, version",
        )
        .bind(uow.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_err("load attributes"))?;
        rows.iter().map(row_to_attribute).collect()
    }

    async fn delete_superseded_attributes_before(
        &mut self,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM uow_attributes
            WHERE written_at < ?1
              AND version < (
                  SELECT MAX(newer.version) FROM uow_attributes AS newer
                  WHERE newer.uow_id = uow_attributes.uow_id
                    AND newer.key = uow_attributes.key
              )
        "#,
        )
        .bind(cutoff)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("attribute decay"))?;
        Ok(result.rows_affected())
    }

    async fn append_history(&mut self, mut entry: HistoryEntry) -> Result<HistoryEntry> {
        if entry.seq == 0 {
            let row = sqlx::query(
                "SELECT COALESCE(MAX(seq), 0) AS max_seq FROM uow_history WHERE uow_id = ?1",
            )
            .bind(entry.uow_id.as_str())
            .fetch_one(&mut *self.tx)
            .await
            .map_err(db_err("history seq"))?;
            let max_seq: i64 = row.try_get("max_seq").map_err(db_err("history max_seq"))?;
            entry.seq = max_seq as u64 + 1;
        }
        let metadata_json =
            serde_json::to_string(&entry.metadata).map_err(StorageError::serde)?;
        sqlx::query(
            r#"
            INSERT INTO uow_history (
                uow_id, seq, from_status, to_status, actor_id, event_type,
                reason, prev_content_hash, new_content_hash, recorded_at, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
        "#,
        )
        .bind(entry.uow_id.as_str())
        .bind(entry.seq as i64)
        .bind(entry.from_status.map(UowStatus::encode))
        .bind(entry.to_status.encode())
        .bind(entry.actor_id.as_str())
        .bind(entry.event_type.encode())
        .bind(&entry.reason)
        .bind(&entry.prev_content_hash)
        .bind(&entry.new_content_hash)
        .bind(entry.recorded_at)
        .bind(&metadata_json)
        .execute(&mut *self.tx)
        .await
        .map_err(db_err("append history"))?;
        Ok(entry)
    }

    async fn load_history(&mut self, uow: &UowId) -> Result<Vec<HistoryEntry>> {
        let rows = sqlx::query("SELECT * FROM uow_history WHERE uow_id = ?1 ORDER BY seq")
            .bind(uow.as_str())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_err("load history"))?;
        rows.iter().map(row_to_history).collect()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| StorageError::backend(format!("tx commit: {e}")))
    }
}
