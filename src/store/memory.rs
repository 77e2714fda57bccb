use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::model::{EntityDefinition, EntityInstance, FieldDef, Id, RelationEdge};
use crate::store::traits::{EdgeStore, EntityDefStore, FieldStore, InstanceRowStore, Store};

/// In-memory store backing tests, seed previews and embedded use. Each
/// trait method takes its locks for the duration of the call only; no lock
/// is held across awaits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    definitions: RwLock<HashMap<Id, EntityDefinition>>,
    fields: RwLock<HashMap<Id, FieldDef>>,
    instances: RwLock<HashMap<Id, EntityInstance>>,
    edges: RwLock<Vec<RelationEdge>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl EntityDefStore for MemoryStore {
    async fn get_entity_definition(&self, id: &Id) -> Result<Option<EntityDefinition>> {
        Ok(self.definitions.read().get(id).cloned())
    }

    async fn get_entity_definition_by_storage_key(
        &self,
        storage_key: &str,
    ) -> Result<Option<EntityDefinition>> {
        Ok(self
            .definitions
            .read()
            .values()
            .find(|d| d.storage_key == storage_key)
            .cloned())
    }

    async fn list_entity_definitions(&self) -> Result<Vec<EntityDefinition>> {
        let mut definitions: Vec<_> = self.definitions.read().values().cloned().collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(definitions)
    }

    async fn insert_entity_definition(&self, definition: EntityDefinition) -> Result<()> {
        self.definitions
            .write()
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn update_entity_definition(&self, definition: EntityDefinition) -> Result<()> {
        self.definitions
            .write()
            .insert(definition.id.clone(), definition);
        Ok(())
    }

    async fn delete_entity_definition(&self, id: &Id) -> Result<bool> {
        Ok(self.definitions.write().remove(id).is_some())
    }
}

#[async_trait::async_trait]
impl FieldStore for MemoryStore {
    async fn get_field(&self, id: &Id) -> Result<Option<FieldDef>> {
        Ok(self.fields.read().get(id).cloned())
    }

    async fn list_fields_for_definition(&self, definition_id: &Id) -> Result<Vec<FieldDef>> {
        let mut fields: Vec<_> = self
            .fields
            .read()
            .values()
            .filter(|f| &f.entity_definition_id == definition_id)
            .cloned()
            .collect();
        fields.sort_by(|a, b| {
            a.display_index
                .cmp(&b.display_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(fields)
    }

    async fn list_relation_fields_targeting(&self, definition_id: &Id) -> Result<Vec<FieldDef>> {
        Ok(self
            .fields
            .read()
            .values()
            .filter(|f| f.related_entity_definition_id.as_ref() == Some(definition_id))
            .cloned()
            .collect())
    }

    async fn insert_field(&self, field: FieldDef) -> Result<()> {
        self.fields.write().insert(field.id.clone(), field);
        Ok(())
    }

    async fn upsert_field_pair(&self, field: FieldDef, partner: FieldDef) -> Result<()> {
        // One lock acquisition covers both writes
        let mut fields = self.fields.write();
        fields.insert(field.id.clone(), field);
        fields.insert(partner.id.clone(), partner);
        Ok(())
    }

    async fn update_field(&self, field: FieldDef) -> Result<()> {
        self.fields.write().insert(field.id.clone(), field);
        Ok(())
    }

    async fn delete_fields(&self, ids: &[Id]) -> Result<u64> {
        let mut fields = self.fields.write();
        let mut removed = 0;
        for id in ids {
            if fields.remove(id).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait::async_trait]
impl InstanceRowStore for MemoryStore {
    async fn get_instance(&self, id: &Id) -> Result<Option<EntityInstance>> {
        Ok(self.instances.read().get(id).cloned())
    }

    async fn get_instances_by_ids(&self, ids: &[Id]) -> Result<Vec<EntityInstance>> {
        let instances = self.instances.read();
        Ok(ids.iter().filter_map(|id| instances.get(id).cloned()).collect())
    }

    async fn list_instances(
        &self,
        definition_id: &Id,
        project_id: Option<&Id>,
    ) -> Result<Vec<EntityInstance>> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| &i.entity_definition_id == definition_id)
            .filter(|i| project_id.map_or(true, |p| &i.project_id == p))
            .cloned()
            .collect())
    }

    async fn count_instances(&self, definition_id: &Id) -> Result<usize> {
        Ok(self
            .instances
            .read()
            .values()
            .filter(|i| &i.entity_definition_id == definition_id)
            .count())
    }

    async fn insert_instance(&self, instance: EntityInstance) -> Result<()> {
        self.instances.write().insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn update_instance(&self, instance: EntityInstance) -> Result<()> {
        self.instances.write().insert(instance.id.clone(), instance);
        Ok(())
    }

    async fn delete_instance_with_edges(&self, id: &Id) -> Result<bool> {
        // Edges first, then the row, under both locks so no reader sees a
        // half-deleted state
        let mut edges = self.edges.write();
        let mut instances = self.instances.write();
        edges.retain(|e| &e.source_instance_id != id && &e.target_instance_id != id);
        Ok(instances.remove(id).is_some())
    }

    async fn delete_instances_for_definition(&self, definition_id: &Id) -> Result<u64> {
        let mut edges = self.edges.write();
        let mut instances = self.instances.write();
        let doomed: Vec<Id> = instances
            .values()
            .filter(|i| &i.entity_definition_id == definition_id)
            .map(|i| i.id.clone())
            .collect();
        edges.retain(|e| {
            !doomed.contains(&e.source_instance_id) && !doomed.contains(&e.target_instance_id)
        });
        for id in &doomed {
            instances.remove(id);
        }
        Ok(doomed.len() as u64)
    }
}

#[async_trait::async_trait]
impl EdgeStore for MemoryStore {
    async fn edges_from(&self, source_id: &Id, field_id: &Id) -> Result<Vec<RelationEdge>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| &e.source_instance_id == source_id && &e.field_id == field_id)
            .cloned()
            .collect())
    }

    async fn edges_from_any(
        &self,
        field_id: &Id,
        source_ids: &[Id],
    ) -> Result<Vec<RelationEdge>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| &e.field_id == field_id && source_ids.contains(&e.source_instance_id))
            .cloned()
            .collect())
    }

    async fn edges_to_any(&self, field_id: &Id, target_ids: &[Id]) -> Result<Vec<RelationEdge>> {
        Ok(self
            .edges
            .read()
            .iter()
            .filter(|e| &e.field_id == field_id && target_ids.contains(&e.target_instance_id))
            .cloned()
            .collect())
    }

    async fn insert_edges(&self, new_edges: Vec<RelationEdge>) -> Result<()> {
        let mut edges = self.edges.write();
        for edge in new_edges {
            let exists = edges.iter().any(|e| e.identity() == edge.identity());
            if !exists {
                edges.push(edge);
            }
        }
        Ok(())
    }

    async fn reconcile_edges(
        &self,
        source_id: &Id,
        field_id: &Id,
        added: Vec<RelationEdge>,
        removed_targets: &[Id],
    ) -> Result<()> {
        let mut edges = self.edges.write();
        edges.retain(|e| {
            !(&e.source_instance_id == source_id
                && &e.field_id == field_id
                && removed_targets.contains(&e.target_instance_id))
        });
        for edge in added {
            let exists = edges.iter().any(|e| e.identity() == edge.identity());
            if !exists {
                edges.push(edge);
            }
        }
        Ok(())
    }

    async fn delete_edges_for_field(&self, field_id: &Id) -> Result<u64> {
        let mut edges = self.edges.write();
        let before = edges.len();
        edges.retain(|e| {
            &e.field_id != field_id && e.reverse_field_id.as_ref() != Some(field_id)
        });
        Ok((before - edges.len()) as u64)
    }
}

impl Store for MemoryStore {}
