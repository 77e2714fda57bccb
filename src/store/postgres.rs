use anyhow::{anyhow, Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::model::{
    EntityDefinition, EntityInstance, FieldDef, FieldKind, Id, RelationEdge, TypeTier,
};
use crate::store::traits::{EdgeStore, EntityDefStore, FieldStore, InstanceRowStore, Store};

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Create a new PostgreSQL store with the given database URL
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await
            .context("Failed to create PostgreSQL connection pool")?;

        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist. All statements are
    /// idempotent, so running at every startup is safe.
    pub async fn migrate(&self) -> Result<()> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS entity_definitions (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                storage_key TEXT NOT NULL UNIQUE,
                tier TEXT NOT NULL,
                permissions JSONB NOT NULL,
                page_policy JSONB NOT NULL,
                section_titles JSONB,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_by TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS fields (
                id TEXT PRIMARY KEY,
                entity_definition_id TEXT NOT NULL,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                display_index INTEGER NOT NULL,
                show_on_create BOOLEAN NOT NULL,
                show_on_edit BOOLEAN NOT NULL,
                show_in_table BOOLEAN NOT NULL,
                searchable BOOLEAN NOT NULL,
                filterable BOOLEAN NOT NULL,
                is_title BOOLEAN NOT NULL,
                required BOOLEAN NOT NULL,
                default_value JSONB,
                related_entity_definition_id TEXT,
                relation_field_id TEXT,
                is_relation_source BOOLEAN NOT NULL,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_by TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (entity_definition_id, name)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS instances (
                id TEXT PRIMARY KEY,
                entity_definition_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                attributes JSONB NOT NULL,
                created_by TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_by TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_instances_definition_project
                ON instances (entity_definition_id, project_id)
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS relation_edges (
                id TEXT PRIMARY KEY,
                source_instance_id TEXT NOT NULL,
                target_instance_id TEXT NOT NULL,
                field_id TEXT NOT NULL,
                reverse_field_id TEXT,
                kind TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                UNIQUE (source_instance_id, field_id, target_instance_id)
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_edges_target
                ON relation_edges (field_id, target_instance_id)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .context("Failed to run schema migration")?;
        }
        Ok(())
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn tier_to_str(tier: TypeTier) -> &'static str {
    match tier {
        TypeTier::Primary => "primary",
        TypeTier::Secondary => "secondary",
        TypeTier::Tertiary => "tertiary",
    }
}

fn parse_tier(raw: &str) -> Result<TypeTier> {
    match raw {
        "primary" => Ok(TypeTier::Primary),
        "secondary" => Ok(TypeTier::Secondary),
        "tertiary" => Ok(TypeTier::Tertiary),
        other => Err(anyhow!("unknown type tier '{}'", other)),
    }
}

fn parse_kind(raw: &str) -> Result<FieldKind> {
    match raw {
        "string" => Ok(FieldKind::String),
        "number" => Ok(FieldKind::Number),
        "boolean" => Ok(FieldKind::Boolean),
        "date" => Ok(FieldKind::Date),
        "manyToOne" => Ok(FieldKind::ManyToOne),
        "oneToMany" => Ok(FieldKind::OneToMany),
        "oneToOne" => Ok(FieldKind::OneToOne),
        "manyToMany" => Ok(FieldKind::ManyToMany),
        other => Err(anyhow!("unknown field kind '{}'", other)),
    }
}

fn row_to_definition(row: &sqlx::postgres::PgRow) -> Result<EntityDefinition> {
    let tier: String = row.get("tier");
    let permissions: serde_json::Value = row.get("permissions");
    let page_policy: serde_json::Value = row.get("page_policy");
    let section_titles: Option<serde_json::Value> = row.get("section_titles");

    Ok(EntityDefinition {
        id: row.get("id"),
        name: row.get("name"),
        storage_key: row.get("storage_key"),
        tier: parse_tier(&tier)?,
        permissions: serde_json::from_value(permissions)
            .context("Failed to decode permissions")?,
        page_policy: serde_json::from_value(page_policy)
            .context("Failed to decode page policy")?,
        section_titles: section_titles
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to decode section titles")?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_by: row.get("updated_by"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_field(row: &sqlx::postgres::PgRow) -> Result<FieldDef> {
    let kind: String = row.get("kind");
    let default_value: Option<serde_json::Value> = row.get("default_value");

    Ok(FieldDef {
        id: row.get("id"),
        entity_definition_id: row.get("entity_definition_id"),
        name: row.get("name"),
        kind: parse_kind(&kind)?,
        display_index: row.get("display_index"),
        show_on_create: row.get("show_on_create"),
        show_on_edit: row.get("show_on_edit"),
        show_in_table: row.get("show_in_table"),
        searchable: row.get("searchable"),
        filterable: row.get("filterable"),
        is_title: row.get("is_title"),
        required: row.get("required"),
        default_value: default_value
            .map(serde_json::from_value)
            .transpose()
            .context("Failed to decode default value")?,
        related_entity_definition_id: row.get("related_entity_definition_id"),
        relation_field_id: row.get("relation_field_id"),
        is_relation_source: row.get("is_relation_source"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_by: row.get("updated_by"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_instance(row: &sqlx::postgres::PgRow) -> Result<EntityInstance> {
    let attributes: serde_json::Value = row.get("attributes");
    Ok(EntityInstance {
        id: row.get("id"),
        entity_definition_id: row.get("entity_definition_id"),
        project_id: row.get("project_id"),
        attributes: serde_json::from_value(attributes).context("Failed to decode attributes")?,
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_by: row.get("updated_by"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_edge(row: &sqlx::postgres::PgRow) -> Result<RelationEdge> {
    let kind: String = row.get("kind");
    Ok(RelationEdge {
        id: row.get("id"),
        source_instance_id: row.get("source_instance_id"),
        target_instance_id: row.get("target_instance_id"),
        field_id: row.get("field_id"),
        reverse_field_id: row.get("reverse_field_id"),
        kind: parse_kind(&kind)?,
        created_at: row.get("created_at"),
    })
}

const FIELD_UPSERT: &str = r#"
    INSERT INTO fields (
        id, entity_definition_id, name, kind, display_index,
        show_on_create, show_on_edit, show_in_table, searchable, filterable,
        is_title, required, default_value, related_entity_definition_id,
        relation_field_id, is_relation_source,
        created_by, created_at, updated_by, updated_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
    ON CONFLICT (id) DO UPDATE SET
        name = EXCLUDED.name,
        display_index = EXCLUDED.display_index,
        show_on_create = EXCLUDED.show_on_create,
        show_on_edit = EXCLUDED.show_on_edit,
        show_in_table = EXCLUDED.show_in_table,
        searchable = EXCLUDED.searchable,
        filterable = EXCLUDED.filterable,
        is_title = EXCLUDED.is_title,
        required = EXCLUDED.required,
        default_value = EXCLUDED.default_value,
        related_entity_definition_id = EXCLUDED.related_entity_definition_id,
        relation_field_id = EXCLUDED.relation_field_id,
        is_relation_source = EXCLUDED.is_relation_source,
        updated_by = EXCLUDED.updated_by,
        updated_at = EXCLUDED.updated_at
"#;

fn bind_field<'q>(
    query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    field: &'q FieldDef,
) -> Result<sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>> {
    let default_value = field
        .default_value
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .context("Failed to encode default value")?;
    Ok(query
        .bind(&field.id)
        .bind(&field.entity_definition_id)
        .bind(&field.name)
        .bind(field.kind.as_str())
        .bind(field.display_index)
        .bind(field.show_on_create)
        .bind(field.show_on_edit)
        .bind(field.show_in_table)
        .bind(field.searchable)
        .bind(field.filterable)
        .bind(field.is_title)
        .bind(field.required)
        .bind(default_value)
        .bind(&field.related_entity_definition_id)
        .bind(&field.relation_field_id)
        .bind(field.is_relation_source)
        .bind(&field.created_by)
        .bind(field.created_at)
        .bind(&field.updated_by)
        .bind(field.updated_at))
}

#[async_trait::async_trait]
impl EntityDefStore for PostgresStore {
    async fn get_entity_definition(&self, id: &Id) -> Result<Option<EntityDefinition>> {
        let row = sqlx::query("SELECT * FROM entity_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch entity definition")?;

        row.as_ref().map(row_to_definition).transpose()
    }

    async fn get_entity_definition_by_storage_key(
        &self,
        storage_key: &str,
    ) -> Result<Option<EntityDefinition>> {
        let row = sqlx::query("SELECT * FROM entity_definitions WHERE storage_key = $1")
            .bind(storage_key)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch entity definition by storage key")?;

        row.as_ref().map(row_to_definition).transpose()
    }

    async fn list_entity_definitions(&self) -> Result<Vec<EntityDefinition>> {
        let rows = sqlx::query("SELECT * FROM entity_definitions ORDER BY created_at, id")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list entity definitions")?;

        rows.iter().map(row_to_definition).collect()
    }

    async fn insert_entity_definition(&self, definition: EntityDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO entity_definitions (
                id, name, storage_key, tier, permissions, page_policy,
                section_titles, created_by, created_at, updated_by, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(&definition.storage_key)
        .bind(tier_to_str(definition.tier))
        .bind(serde_json::to_value(&definition.permissions)?)
        .bind(serde_json::to_value(&definition.page_policy)?)
        .bind(
            definition
                .section_titles
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(&definition.created_by)
        .bind(definition.created_at)
        .bind(&definition.updated_by)
        .bind(definition.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert entity definition")?;

        Ok(())
    }

    async fn update_entity_definition(&self, definition: EntityDefinition) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE entity_definitions SET
                name = $2, tier = $3, permissions = $4, page_policy = $5,
                section_titles = $6, updated_by = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(&definition.id)
        .bind(&definition.name)
        .bind(tier_to_str(definition.tier))
        .bind(serde_json::to_value(&definition.permissions)?)
        .bind(serde_json::to_value(&definition.page_policy)?)
        .bind(
            definition
                .section_titles
                .as_ref()
                .map(serde_json::to_value)
                .transpose()?,
        )
        .bind(&definition.updated_by)
        .bind(definition.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update entity definition")?;

        Ok(())
    }

    async fn delete_entity_definition(&self, id: &Id) -> Result<bool> {
        let result = sqlx::query("DELETE FROM entity_definitions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete entity definition")?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl FieldStore for PostgresStore {
    async fn get_field(&self, id: &Id) -> Result<Option<FieldDef>> {
        let row = sqlx::query("SELECT * FROM fields WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch field")?;

        row.as_ref().map(row_to_field).transpose()
    }

    async fn list_fields_for_definition(&self, definition_id: &Id) -> Result<Vec<FieldDef>> {
        let rows = sqlx::query(
            "SELECT * FROM fields WHERE entity_definition_id = $1 ORDER BY display_index, created_at",
        )
        .bind(definition_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list fields")?;

        rows.iter().map(row_to_field).collect()
    }

    async fn list_relation_fields_targeting(&self, definition_id: &Id) -> Result<Vec<FieldDef>> {
        let rows = sqlx::query("SELECT * FROM fields WHERE related_entity_definition_id = $1")
            .bind(definition_id)
            .fetch_all(&self.pool)
            .await
            .context("Failed to list relation fields targeting definition")?;

        rows.iter().map(row_to_field).collect()
    }

    async fn insert_field(&self, field: FieldDef) -> Result<()> {
        bind_field(sqlx::query(FIELD_UPSERT), &field)?
            .execute(&self.pool)
            .await
            .context("Failed to insert field")?;
        Ok(())
    }

    async fn upsert_field_pair(&self, field: FieldDef, partner: FieldDef) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin field-pair transaction")?;

        bind_field(sqlx::query(FIELD_UPSERT), &field)?
            .execute(&mut *tx)
            .await
            .context("Failed to upsert relation field")?;
        bind_field(sqlx::query(FIELD_UPSERT), &partner)?
            .execute(&mut *tx)
            .await
            .context("Failed to upsert paired field")?;

        tx.commit()
            .await
            .context("Failed to commit field-pair transaction")?;
        Ok(())
    }

    async fn update_field(&self, field: FieldDef) -> Result<()> {
        bind_field(sqlx::query(FIELD_UPSERT), &field)?
            .execute(&self.pool)
            .await
            .context("Failed to update field")?;
        Ok(())
    }

    async fn delete_fields(&self, ids: &[Id]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM fields WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .execute(&self.pool)
            .await
            .context("Failed to delete fields")?;
        Ok(result.rows_affected())
    }
}

#[async_trait::async_trait]
impl InstanceRowStore for PostgresStore {
    async fn get_instance(&self, id: &Id) -> Result<Option<EntityInstance>> {
        let row = sqlx::query("SELECT * FROM instances WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch instance")?;

        row.as_ref().map(row_to_instance).transpose()
    }

    async fn get_instances_by_ids(&self, ids: &[Id]) -> Result<Vec<EntityInstance>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query("SELECT * FROM instances WHERE id = ANY($1)")
            .bind(ids.to_vec())
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch instances by id")?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn list_instances(
        &self,
        definition_id: &Id,
        project_id: Option<&Id>,
    ) -> Result<Vec<EntityInstance>> {
        let rows = match project_id {
            Some(project_id) => {
                sqlx::query(
                    "SELECT * FROM instances WHERE entity_definition_id = $1 AND project_id = $2",
                )
                .bind(definition_id)
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM instances WHERE entity_definition_id = $1")
                    .bind(definition_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list instances")?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn count_instances(&self, definition_id: &Id) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM instances WHERE entity_definition_id = $1")
            .bind(definition_id)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count instances")?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn insert_instance(&self, instance: EntityInstance) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO instances (
                id, entity_definition_id, project_id, attributes,
                created_by, created_at, updated_by, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&instance.id)
        .bind(&instance.entity_definition_id)
        .bind(&instance.project_id)
        .bind(serde_json::to_value(&instance.attributes)?)
        .bind(&instance.created_by)
        .bind(instance.created_at)
        .bind(&instance.updated_by)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to insert instance")?;

        Ok(())
    }

    async fn update_instance(&self, instance: EntityInstance) -> Result<()> {
        sqlx::query(
            "UPDATE instances SET attributes = $2, updated_by = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(&instance.id)
        .bind(serde_json::to_value(&instance.attributes)?)
        .bind(&instance.updated_by)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .context("Failed to update instance")?;

        Ok(())
    }

    async fn delete_instance_with_edges(&self, id: &Id) -> Result<bool> {
        // Edges first, then the row, in one transaction: a concurrent
        // reader never observes an instance-less edge
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin cascade-delete transaction")?;

        sqlx::query(
            "DELETE FROM relation_edges WHERE source_instance_id = $1 OR target_instance_id = $1",
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete edges for instance")?;

        let result = sqlx::query("DELETE FROM instances WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete instance")?;

        tx.commit()
            .await
            .context("Failed to commit cascade-delete transaction")?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_instances_for_definition(&self, definition_id: &Id) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin definition-cascade transaction")?;

        sqlx::query(
            r#"
            DELETE FROM relation_edges WHERE
                source_instance_id IN (SELECT id FROM instances WHERE entity_definition_id = $1)
                OR target_instance_id IN (SELECT id FROM instances WHERE entity_definition_id = $1)
            "#,
        )
        .bind(definition_id)
        .execute(&mut *tx)
        .await
        .context("Failed to delete edges for definition")?;

        let result = sqlx::query("DELETE FROM instances WHERE entity_definition_id = $1")
            .bind(definition_id)
            .execute(&mut *tx)
            .await
            .context("Failed to delete instances for definition")?;

        tx.commit()
            .await
            .context("Failed to commit definition-cascade transaction")?;
        Ok(result.rows_affected())
    }
}

const EDGE_INSERT: &str = r#"
    INSERT INTO relation_edges (
        id, source_instance_id, target_instance_id, field_id,
        reverse_field_id, kind, created_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (source_instance_id, field_id, target_instance_id) DO NOTHING
"#;

#[async_trait::async_trait]
impl EdgeStore for PostgresStore {
    async fn edges_from(&self, source_id: &Id, field_id: &Id) -> Result<Vec<RelationEdge>> {
        let rows = sqlx::query(
            "SELECT * FROM relation_edges WHERE source_instance_id = $1 AND field_id = $2 ORDER BY created_at",
        )
        .bind(source_id)
        .bind(field_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch edges for source")?;

        rows.iter().map(row_to_edge).collect()
    }

    async fn edges_from_any(
        &self,
        field_id: &Id,
        source_ids: &[Id],
    ) -> Result<Vec<RelationEdge>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM relation_edges WHERE field_id = $1 AND source_instance_id = ANY($2) ORDER BY created_at",
        )
        .bind(field_id)
        .bind(source_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch edges for source batch")?;

        rows.iter().map(row_to_edge).collect()
    }

    async fn edges_to_any(&self, field_id: &Id, target_ids: &[Id]) -> Result<Vec<RelationEdge>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            "SELECT * FROM relation_edges WHERE field_id = $1 AND target_instance_id = ANY($2)",
        )
        .bind(field_id)
        .bind(target_ids.to_vec())
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch edges for target batch")?;

        rows.iter().map(row_to_edge).collect()
    }

    async fn insert_edges(&self, edges: Vec<RelationEdge>) -> Result<()> {
        if edges.is_empty() {
            return Ok(());
        }
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin edge-insert transaction")?;
        for edge in &edges {
            sqlx::query(EDGE_INSERT)
                .bind(&edge.id)
                .bind(&edge.source_instance_id)
                .bind(&edge.target_instance_id)
                .bind(&edge.field_id)
                .bind(&edge.reverse_field_id)
                .bind(edge.kind.as_str())
                .bind(edge.created_at)
                .execute(&mut *tx)
                .await
                .context("Failed to insert edge")?;
        }
        tx.commit()
            .await
            .context("Failed to commit edge-insert transaction")?;
        Ok(())
    }

    async fn reconcile_edges(
        &self,
        source_id: &Id,
        field_id: &Id,
        added: Vec<RelationEdge>,
        removed_targets: &[Id],
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin reconcile transaction")?;

        if !removed_targets.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM relation_edges
                WHERE source_instance_id = $1 AND field_id = $2 AND target_instance_id = ANY($3)
                "#,
            )
            .bind(source_id)
            .bind(field_id)
            .bind(removed_targets.to_vec())
            .execute(&mut *tx)
            .await
            .context("Failed to delete stale edges")?;
        }

        for edge in &added {
            sqlx::query(EDGE_INSERT)
                .bind(&edge.id)
                .bind(&edge.source_instance_id)
                .bind(&edge.target_instance_id)
                .bind(&edge.field_id)
                .bind(&edge.reverse_field_id)
                .bind(edge.kind.as_str())
                .bind(edge.created_at)
                .execute(&mut *tx)
                .await
                .context("Failed to insert reconciled edge")?;
        }

        tx.commit()
            .await
            .context("Failed to commit reconcile transaction")?;
        Ok(())
    }

    async fn delete_edges_for_field(&self, field_id: &Id) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM relation_edges WHERE field_id = $1 OR reverse_field_id = $1")
                .bind(field_id)
                .execute(&self.pool)
                .await
                .context("Failed to delete edges for field")?;
        Ok(result.rows_affected())
    }
}

impl Store for PostgresStore {}
