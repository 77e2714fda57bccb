use std::collections::HashMap;

use itertools::Itertools;

use crate::error::{CoreError, CoreResult};
use crate::logic::authz::{Authorizer, ALLOW_ALL};
use crate::logic::hooks::{WriteHook, NOOP_HOOK};
use crate::model::{
    Action, AttributeValue, EntityDefinition, EntityInstance, FieldDef, Id, InstanceView,
    RelationEdge, RelationValue, UserContext,
};
use crate::store::traits::Store;

/// A write payload split along the definition's field kinds: scalar
/// attributes on one side, relation target lists on the other. Relation
/// values are normalized to 0..n-element id lists before validation.
#[derive(Debug)]
pub struct PartitionedPayload {
    pub scalars: HashMap<String, AttributeValue>,
    pub relations: Vec<(FieldDef, Vec<Id>)>,
}

fn normalize_targets(field: &FieldDef, value: &serde_json::Value) -> CoreResult<Vec<Id>> {
    let targets: Vec<Id> = match value {
        serde_json::Value::Null => Vec::new(),
        serde_json::Value::String(s) if s.is_empty() => Vec::new(),
        serde_json::Value::String(s) => vec![s.clone()],
        serde_json::Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    CoreError::validation(format!(
                        "relation '{}' targets must be instance ids",
                        field.name
                    ))
                })
            })
            .collect::<CoreResult<_>>()?,
        _ => {
            return Err(CoreError::validation(format!(
                "relation '{}' expects an id or a list of ids",
                field.name
            )))
        }
    };
    Ok(targets.into_iter().unique().collect())
}

/// Partition a caller payload against the definition's fields. Keys naming
/// scalar fields become typed attribute values, keys naming relation
/// fields become target-id lists. Unknown keys are rejected in strict mode
/// and dropped otherwise.
pub fn partition_payload(
    fields: &[FieldDef],
    payload: &HashMap<String, serde_json::Value>,
    strict_unknown_keys: bool,
) -> CoreResult<PartitionedPayload> {
    let by_name: HashMap<&str, &FieldDef> = fields.iter().map(|f| (f.name.as_str(), f)).collect();

    let mut scalars = HashMap::new();
    let mut relations = Vec::new();
    let mut unknown = Vec::new();

    for (key, value) in payload {
        match by_name.get(key.as_str()) {
            Some(field) if field.is_relation() => {
                relations.push(((*field).clone(), normalize_targets(field, value)?));
            }
            Some(field) => {
                let attribute = AttributeValue::from_json(value).ok_or_else(|| {
                    CoreError::validation(format!("attribute '{}' is not a scalar value", key))
                })?;
                if !attribute.matches_kind(&field.kind) {
                    return Err(CoreError::validation(format!(
                        "attribute '{}' does not match kind {}",
                        key,
                        field.kind.as_str()
                    )));
                }
                scalars.insert(key.clone(), attribute);
            }
            None => unknown.push(key.clone()),
        }
    }

    if !unknown.is_empty() {
        unknown.sort();
        if strict_unknown_keys {
            return Err(CoreError::validation(format!(
                "unknown attribute keys: {}",
                unknown.join(", ")
            )));
        }
        log::debug!("dropping unknown attribute keys: {}", unknown.join(", "));
    }

    Ok(PartitionedPayload { scalars, relations })
}

/// Instance write path: create, update and delete with relation
/// reconciliation through the edge store.
pub struct InstanceOps<'a, S: Store> {
    store: &'a S,
    authorizer: &'a dyn Authorizer,
    hook: &'a dyn WriteHook,
    strict_unknown_keys: bool,
}

impl<'a, S: Store> InstanceOps<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            authorizer: &ALLOW_ALL,
            hook: &NOOP_HOOK,
            strict_unknown_keys: true,
        }
    }

    pub fn with_authorizer(mut self, authorizer: &'a dyn Authorizer) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_hook(mut self, hook: &'a dyn WriteHook) -> Self {
        self.hook = hook;
        self
    }

    pub fn with_unknown_key_policy(mut self, strict: bool) -> Self {
        self.strict_unknown_keys = strict;
        self
    }

    pub async fn create_instance(
        &self,
        definition_id: &Id,
        project_id: &Id,
        payload: HashMap<String, serde_json::Value>,
        ctx: &UserContext,
    ) -> CoreResult<InstanceView> {
        let definition = self.require_definition(definition_id).await?;
        if !self.authorizer.can_perform(Action::Create, &definition, ctx) {
            return Err(CoreError::forbidden(format!(
                "cannot create instances of '{}'",
                definition.name
            )));
        }

        let fields = self.store.list_fields_for_definition(definition_id).await?;
        let partitioned = partition_payload(&fields, &payload, self.strict_unknown_keys)?;

        let mut scalars = partitioned.scalars;
        for field in fields.iter().filter(|f| !f.is_relation()) {
            if !scalars.contains_key(&field.name) {
                if let Some(default) = &field.default_value {
                    scalars.insert(field.name.clone(), default.clone());
                }
            }
        }
        // Explicit nulls clear rather than store
        scalars.retain(|_, value| !value.is_null());
        check_required(&fields, &scalars)?;

        self.validate_relation_targets(&partitioned.relations).await?;

        let instance = EntityInstance::new(
            definition_id.clone(),
            project_id.clone(),
            scalars,
            ctx.user_id.clone(),
        );
        self.store.insert_instance(instance.clone()).await?;

        let mut edges = Vec::new();
        for (field, targets) in &partitioned.relations {
            for target in targets {
                edges.push(RelationEdge::new(instance.id.clone(), target.clone(), field));
            }
        }
        self.store.insert_edges(edges).await?;

        self.hook
            .after_write("instance.create", definition_id, Some(&instance.id))
            .await;

        // Same shape a subsequent ids-only get returns: every relation
        // field present, unsupplied ones empty
        let supplied: HashMap<&str, &Vec<Id>> = partitioned
            .relations
            .iter()
            .map(|(field, targets)| (field.name.as_str(), targets))
            .collect();
        let relations = fields
            .iter()
            .filter(|f| f.is_relation())
            .map(|field| {
                let ids = supplied
                    .get(field.name.as_str())
                    .map(|targets| (*targets).clone())
                    .unwrap_or_default();
                (field.name.clone(), RelationValue::Ids(ids))
            })
            .collect();

        Ok(InstanceView {
            instance,
            relations,
        })
    }

    pub async fn update_instance(
        &self,
        id: &Id,
        payload: HashMap<String, serde_json::Value>,
        ctx: &UserContext,
    ) -> CoreResult<InstanceView> {
        let mut instance = self
            .store
            .get_instance(id)
            .await?
            .ok_or_else(|| CoreError::not_found("instance", id))?;
        let definition = self.require_definition(&instance.entity_definition_id).await?;
        if !self.authorizer.can_perform(Action::Update, &definition, ctx) {
            return Err(CoreError::forbidden(format!(
                "cannot update instances of '{}'",
                definition.name
            )));
        }

        let fields = self
            .store
            .list_fields_for_definition(&instance.entity_definition_id)
            .await?;
        let partitioned = partition_payload(&fields, &payload, self.strict_unknown_keys)?;
        self.validate_relation_targets(&partitioned.relations).await?;

        // Partial update: only supplied keys change; explicit null unsets
        for (key, value) in partitioned.scalars {
            if value.is_null() {
                instance.attributes.remove(&key);
            } else {
                instance.attributes.insert(key, value);
            }
        }
        check_required(&fields, &instance.attributes)?;

        instance.updated_by = ctx.user_id.clone();
        instance.updated_at = chrono::Utc::now();
        self.store.update_instance(instance.clone()).await?;

        // Reconcile each supplied relation field by set difference against
        // its current edges; untouched targets stay, so re-running the
        // same update converges
        for (field, desired) in &partitioned.relations {
            let current: Vec<Id> = self
                .store
                .edges_from(id, &field.id)
                .await?
                .into_iter()
                .map(|e| e.target_instance_id)
                .collect();

            let removed: Vec<Id> = current
                .iter()
                .filter(|t| !desired.contains(t))
                .cloned()
                .collect();
            let added: Vec<RelationEdge> = desired
                .iter()
                .filter(|t| !current.contains(t))
                .map(|t| RelationEdge::new(id.clone(), t.clone(), field))
                .collect();

            if removed.is_empty() && added.is_empty() {
                continue;
            }
            self.store
                .reconcile_edges(id, &field.id, added, &removed)
                .await?;
        }

        self.hook
            .after_write("instance.update", &instance.entity_definition_id, Some(id))
            .await;

        let mut relations = HashMap::new();
        for field in fields.iter().filter(|f| f.is_relation()) {
            let ids: Vec<Id> = self
                .store
                .edges_from(id, &field.id)
                .await?
                .into_iter()
                .map(|e| e.target_instance_id)
                .collect();
            relations.insert(field.name.clone(), RelationValue::Ids(ids));
        }

        Ok(InstanceView {
            instance,
            relations,
        })
    }

    pub async fn delete_instance(&self, id: &Id, ctx: &UserContext) -> CoreResult<()> {
        let instance = self
            .store
            .get_instance(id)
            .await?
            .ok_or_else(|| CoreError::not_found("instance", id))?;
        let definition = self.require_definition(&instance.entity_definition_id).await?;
        if !self.authorizer.can_perform(Action::Delete, &definition, ctx) {
            return Err(CoreError::forbidden(format!(
                "cannot delete instances of '{}'",
                definition.name
            )));
        }

        if !self.store.delete_instance_with_edges(id).await? {
            return Err(CoreError::not_found("instance", id));
        }

        self.hook
            .after_write("instance.delete", &instance.entity_definition_id, Some(id))
            .await;
        Ok(())
    }

    async fn require_definition(&self, id: &Id) -> CoreResult<EntityDefinition> {
        self.store
            .get_entity_definition(id)
            .await?
            .ok_or_else(|| CoreError::not_found("entity definition", id))
    }

    /// Relation targets must reference existing instances of the expected
    /// related type; single-cardinality fields accept at most one target.
    async fn validate_relation_targets(
        &self,
        relations: &[(FieldDef, Vec<Id>)],
    ) -> CoreResult<()> {
        let all_targets: Vec<Id> = relations
            .iter()
            .flat_map(|(_, targets)| targets.iter().cloned())
            .unique()
            .collect();
        let found: HashMap<Id, Id> = self
            .store
            .get_instances_by_ids(&all_targets)
            .await?
            .into_iter()
            .map(|i| (i.id, i.entity_definition_id))
            .collect();

        for (field, targets) in relations {
            if field.kind.is_single_cardinality() && targets.len() > 1 {
                return Err(CoreError::validation(format!(
                    "relation '{}' accepts at most one target",
                    field.name
                )));
            }
            let related = field.related_entity_definition_id.as_ref().ok_or_else(|| {
                CoreError::validation(format!("relation '{}' has no related type", field.name))
            })?;
            for target in targets {
                match found.get(target) {
                    None => {
                        return Err(CoreError::validation(format!(
                            "relation '{}' target '{}' does not exist",
                            field.name, target
                        )))
                    }
                    Some(actual) if actual != related => {
                        return Err(CoreError::validation(format!(
                            "relation '{}' target '{}' is not a '{}' instance",
                            field.name, target, related
                        )))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }
}

fn check_required(
    fields: &[FieldDef],
    attributes: &HashMap<String, AttributeValue>,
) -> CoreResult<()> {
    for field in fields.iter().filter(|f| !f.is_relation() && f.required) {
        match attributes.get(&field.name) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(CoreError::validation(format!(
                    "missing required attribute '{}'",
                    field.name
                )))
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, NewFieldDef};
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{EdgeStore, EntityDefStore, FieldStore};
    use serde_json::json;

    fn new_field(name: &str, kind: FieldKind) -> NewFieldDef {
        NewFieldDef {
            id: Some(format!("f-{}", name)),
            name: name.to_string(),
            kind,
            display_index: None,
            show_on_create: None,
            show_on_edit: None,
            show_in_table: None,
            searchable: None,
            filterable: None,
            is_title: None,
            required: None,
            default_value: None,
            related_entity_definition_id: None,
            relation_field_id: None,
            is_relation_source: None,
        }
    }

    fn definition(id: &str, name: &str, storage_key: &str) -> EntityDefinition {
        EntityDefinition::from_new(
            crate::model::NewEntityDefinition {
                id: Some(id.to_string()),
                name: name.to_string(),
                storage_key: storage_key.to_string(),
                tier: Default::default(),
                permissions: None,
                page_policy: None,
                section_titles: None,
            },
            "test".to_string(),
        )
    }

    /// Post (title required, status with default, tags m2m -> Tag) and Tag
    /// (label)
    async fn setup(store: &MemoryStore) {
        store
            .insert_entity_definition(definition("def-post", "Post", "posts"))
            .await
            .unwrap();
        store
            .insert_entity_definition(definition("def-tag", "Tag", "tags"))
            .await
            .unwrap();

        let mut title = FieldDef::from_new(
            new_field("title", FieldKind::String),
            "def-post".to_string(),
            "test".to_string(),
        );
        title.required = true;
        title.is_title = true;
        store.insert_field(title).await.unwrap();

        let mut status = FieldDef::from_new(
            new_field("status", FieldKind::String),
            "def-post".to_string(),
            "test".to_string(),
        );
        status.default_value = Some(AttributeValue::String("draft".to_string()));
        store.insert_field(status).await.unwrap();

        store
            .insert_field(FieldDef::from_new(
                new_field("label", FieldKind::String),
                "def-tag".to_string(),
                "test".to_string(),
            ))
            .await
            .unwrap();

        let mut tags = FieldDef::from_new(
            new_field("tags", FieldKind::ManyToMany),
            "def-post".to_string(),
            "test".to_string(),
        );
        tags.related_entity_definition_id = Some("def-tag".to_string());
        tags.relation_field_id = Some("f-posts".to_string());
        let mut posts = FieldDef::from_new(
            new_field("posts", FieldKind::ManyToMany),
            "def-tag".to_string(),
            "test".to_string(),
        );
        posts.related_entity_definition_id = Some("def-post".to_string());
        posts.relation_field_id = Some("f-tags".to_string());
        posts.is_relation_source = false;
        store.upsert_field_pair(tags, posts).await.unwrap();

        let mut author_field = FieldDef::from_new(
            new_field("author", FieldKind::ManyToOne),
            "def-post".to_string(),
            "test".to_string(),
        );
        author_field.related_entity_definition_id = Some("def-author".to_string());
        store.insert_field(author_field).await.unwrap();
        store
            .insert_entity_definition(definition("def-author", "Author", "authors"))
            .await
            .unwrap();
        store
            .insert_field(FieldDef::from_new(
                new_field("name", FieldKind::String),
                "def-author".to_string(),
                "test".to_string(),
            ))
            .await
            .unwrap();
    }

    async fn create_tag(store: &MemoryStore, label: &str) -> Id {
        let ops = InstanceOps::new(store);
        let view = ops
            .create_instance(
                &"def-tag".to_string(),
                &"proj-1".to_string(),
                HashMap::from([("label".to_string(), json!(label))]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        view.instance.id
    }

    #[tokio::test]
    async fn test_create_partitions_and_applies_defaults() {
        let store = MemoryStore::new();
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;

        let ops = InstanceOps::new(&store);
        let view = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("tags".to_string(), json!([t1.clone()])),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap();

        // Relation keys never land in the attribute map
        assert!(!view.instance.attributes.contains_key("tags"));
        assert_eq!(
            view.instance.attributes.get("status"),
            Some(&AttributeValue::String("draft".to_string()))
        );
        assert_eq!(view.relations.get("tags").unwrap().ids(), vec![t1]);
        assert!(view.relations.get("author").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_keys_rejected_in_strict_mode() {
        let store = MemoryStore::new();
        setup(&store).await;

        let ops = InstanceOps::new(&store);
        let result = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("bogus".to_string(), json!(1)),
                ]),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        // Lenient mode drops the key instead
        let ops = InstanceOps::new(&store).with_unknown_key_policy(false);
        let view = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("bogus".to_string(), json!(1)),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        assert!(!view.instance.attributes.contains_key("bogus"));
    }

    #[tokio::test]
    async fn test_missing_required_attribute_rejected() {
        let store = MemoryStore::new();
        setup(&store).await;

        let ops = InstanceOps::new(&store);
        let result = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::new(),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_relation_target_type_checked() {
        let store = MemoryStore::new();
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;

        let ops = InstanceOps::new(&store);
        // A tag id supplied as the author target has the wrong type
        let result = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("author".to_string(), json!(t1)),
                ]),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        let result = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("tags".to_string(), json!(["missing-tag"])),
                ]),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_update_reconciles_by_set_difference() {
        let store = MemoryStore::new();
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;
        let t2 = create_tag(&store, "tokio").await;

        let ops = InstanceOps::new(&store);
        let view = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("tags".to_string(), json!([t1.clone(), t2.clone()])),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        let post_id = view.instance.id.clone();

        // Shrink to just t2: edge to t1 goes away
        let view = ops
            .update_instance(
                &post_id,
                HashMap::from([("tags".to_string(), json!([t2.clone()]))]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        assert_eq!(view.relations.get("tags").unwrap().ids(), vec![t2.clone()]);

        // Idempotent: same set again leaves the edge count unchanged
        ops.update_instance(
            &post_id,
            HashMap::from([("tags".to_string(), json!([t2.clone()]))]),
            &UserContext::system(),
        )
        .await
        .unwrap();
        let edges = store
            .edges_from(&post_id, &"f-tags".to_string())
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target_instance_id, t2);

        // A payload without "tags" leaves the relation untouched
        let view = ops
            .update_instance(
                &post_id,
                HashMap::from([("title".to_string(), json!("Hello again"))]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        assert_eq!(view.relations.get("tags").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_single_cardinality_replaces() {
        let store = MemoryStore::new();
        setup(&store).await;

        let ops = InstanceOps::new(&store);
        let a1 = ops
            .create_instance(
                &"def-author".to_string(),
                &"proj-1".to_string(),
                HashMap::from([("name".to_string(), json!("Ada"))]),
                &UserContext::system(),
            )
            .await
            .unwrap()
            .instance
            .id;
        let a2 = ops
            .create_instance(
                &"def-author".to_string(),
                &"proj-1".to_string(),
                HashMap::from([("name".to_string(), json!("Grace"))]),
                &UserContext::system(),
            )
            .await
            .unwrap()
            .instance
            .id;

        let post = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("author".to_string(), json!(a1.clone())),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap()
            .instance
            .id;

        // Two targets on a many-to-one field is invalid
        let result = ops
            .update_instance(
                &post,
                HashMap::from([("author".to_string(), json!([a1.clone(), a2.clone()]))]),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));

        // Retargeting replaces, never appends
        let view = ops
            .update_instance(
                &post,
                HashMap::from([("author".to_string(), json!(a2.clone()))]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        assert_eq!(view.relations.get("author").unwrap().ids(), vec![a2]);
        let edges = store
            .edges_from(&post, &"f-author".to_string())
            .await
            .unwrap();
        assert_eq!(edges.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_edges_in_both_directions() {
        let store = MemoryStore::new();
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;

        let ops = InstanceOps::new(&store);
        let post = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("tags".to_string(), json!([t1.clone()])),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap()
            .instance
            .id;

        // Deleting the tag (edge target) removes the post's edge too
        ops.delete_instance(&t1, &UserContext::system()).await.unwrap();
        let edges = store
            .edges_from(&post, &"f-tags".to_string())
            .await
            .unwrap();
        assert!(edges.is_empty());

        let result = ops.delete_instance(&t1, &UserContext::system()).await;
        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_null_unsets_attribute() {
        let store = MemoryStore::new();
        setup(&store).await;

        let ops = InstanceOps::new(&store);
        let post = ops
            .create_instance(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                HashMap::from([
                    ("title".to_string(), json!("Hello")),
                    ("status".to_string(), json!("published")),
                ]),
                &UserContext::system(),
            )
            .await
            .unwrap()
            .instance
            .id;

        let view = ops
            .update_instance(
                &post,
                HashMap::from([("status".to_string(), serde_json::Value::Null)]),
                &UserContext::system(),
            )
            .await
            .unwrap();
        assert!(!view.instance.attributes.contains_key("status"));

        // Unsetting a required attribute is rejected
        let result = ops
            .update_instance(
                &post,
                HashMap::from([("title".to_string(), serde_json::Value::Null)]),
                &UserContext::system(),
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
