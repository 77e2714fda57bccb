use crate::model::{EntityDefinition, EntityInstance, FieldDef, Id, RelationEdge};
use anyhow::Result;

/// Persists entity-type metadata.
#[async_trait::async_trait]
pub trait EntityDefStore: Send + Sync {
    async fn get_entity_definition(&self, id: &Id) -> Result<Option<EntityDefinition>>;
    async fn get_entity_definition_by_storage_key(
        &self,
        storage_key: &str,
    ) -> Result<Option<EntityDefinition>>;
    async fn list_entity_definitions(&self) -> Result<Vec<EntityDefinition>>;
    async fn insert_entity_definition(&self, definition: EntityDefinition) -> Result<()>;
    async fn update_entity_definition(&self, definition: EntityDefinition) -> Result<()>;
    async fn delete_entity_definition(&self, id: &Id) -> Result<bool>;
}

/// Persists field metadata per entity definition.
#[async_trait::async_trait]
pub trait FieldStore: Send + Sync {
    async fn get_field(&self, id: &Id) -> Result<Option<FieldDef>>;
    /// Fields of a definition, sorted by display index
    async fn list_fields_for_definition(&self, definition_id: &Id) -> Result<Vec<FieldDef>>;
    /// Relation fields on other definitions that target the given one
    async fn list_relation_fields_targeting(&self, definition_id: &Id) -> Result<Vec<FieldDef>>;
    async fn insert_field(&self, field: FieldDef) -> Result<()>;
    /// Upsert both sides of a relation pair in one transaction; a pair is
    /// never observable half-created.
    async fn upsert_field_pair(&self, field: FieldDef, partner: FieldDef) -> Result<()>;
    async fn update_field(&self, field: FieldDef) -> Result<()>;
    async fn delete_fields(&self, ids: &[Id]) -> Result<u64>;
}

/// Persists per-instance scalar attribute rows.
#[async_trait::async_trait]
pub trait InstanceRowStore: Send + Sync {
    async fn get_instance(&self, id: &Id) -> Result<Option<EntityInstance>>;
    /// Batch fetch by id; missing ids are simply absent from the result
    async fn get_instances_by_ids(&self, ids: &[Id]) -> Result<Vec<EntityInstance>>;
    /// All instances of a definition, optionally narrowed to one project
    async fn list_instances(
        &self,
        definition_id: &Id,
        project_id: Option<&Id>,
    ) -> Result<Vec<EntityInstance>>;
    async fn count_instances(&self, definition_id: &Id) -> Result<usize>;
    async fn insert_instance(&self, instance: EntityInstance) -> Result<()>;
    async fn update_instance(&self, instance: EntityInstance) -> Result<()>;
    /// Cascade delete: removes every edge referencing the instance (either
    /// direction) and then the row itself, atomically where the backend
    /// supports it. Edge removal always happens first.
    async fn delete_instance_with_edges(&self, id: &Id) -> Result<bool>;
    /// Cascade delete of every instance of a definition together with all
    /// edges touching them.
    async fn delete_instances_for_definition(&self, definition_id: &Id) -> Result<u64>;
}

/// Persists directed relation links between instances, keyed by the owning
/// field.
#[async_trait::async_trait]
pub trait EdgeStore: Send + Sync {
    /// Outgoing edges of one source instance for one field
    async fn edges_from(&self, source_id: &Id, field_id: &Id) -> Result<Vec<RelationEdge>>;
    /// Outgoing edges for a whole page of source instances at once
    async fn edges_from_any(&self, field_id: &Id, source_ids: &[Id]) -> Result<Vec<RelationEdge>>;
    /// Edges of one field pointing at any of the given targets
    async fn edges_to_any(&self, field_id: &Id, target_ids: &[Id]) -> Result<Vec<RelationEdge>>;
    /// Insert edges; duplicates on (source, field, target) are ignored, so
    /// insertion is idempotent and concurrency-safe.
    async fn insert_edges(&self, edges: Vec<RelationEdge>) -> Result<()>;
    /// Apply one reconciliation step for a (source, field): remove the
    /// stale targets and add the new edges in one transaction where the
    /// backend supports it.
    async fn reconcile_edges(
        &self,
        source_id: &Id,
        field_id: &Id,
        added: Vec<RelationEdge>,
        removed_targets: &[Id],
    ) -> Result<()>;
    async fn delete_edges_for_field(&self, field_id: &Id) -> Result<u64>;
}

pub trait Store:
    EntityDefStore + FieldStore + InstanceRowStore + EdgeStore + Send + Sync
{
}
