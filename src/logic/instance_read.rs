use std::cmp::Ordering;
use std::collections::HashMap;

use itertools::Itertools;

use crate::error::{CoreError, CoreResult};
use crate::logic::filter_compile::FilterCompiler;
use crate::logic::options::OptionResolver;
use crate::model::{
    AttributeValue, EntityInstance, FieldDef, Id, InstancePage, InstanceView, ListQuery, OptionRef,
    PaginationMeta, RelationValue, SortDirection,
};
use crate::store::traits::Store;

enum SortKey {
    CreatedAt,
    UpdatedAt,
    Attribute(String),
}

/// Relation-aware read paths: single-instance gets and filtered, searched,
/// paginated lists with page-level batch edge loading.
pub struct InstanceReader<'a, S: Store> {
    store: &'a S,
    resolver: &'a OptionResolver<S>,
}

impl<'a, S: Store> InstanceReader<'a, S> {
    pub fn new(store: &'a S, resolver: &'a OptionResolver<S>) -> Self {
        Self { store, resolver }
    }

    /// Load one instance. `relation_field_names` narrows which relation
    /// fields are attached (all of them when `None`); `relations_as_ids`
    /// picks the raw-id representation edit forms re-submit, otherwise
    /// targets resolve to `{id, title}` pairs.
    pub async fn get_instance_by_id(
        &self,
        id: &Id,
        relation_field_names: Option<&[String]>,
        relations_as_ids: bool,
    ) -> CoreResult<InstanceView> {
        let instance = self
            .store
            .get_instance(id)
            .await?
            .ok_or_else(|| CoreError::not_found("instance", id))?;
        let fields = self
            .store
            .list_fields_for_definition(&instance.entity_definition_id)
            .await?;
        let requested = requested_relation_fields(&fields, relation_field_names)?;

        let mut relations = HashMap::new();
        for field in requested {
            let targets: Vec<Id> = self
                .store
                .edges_from(id, &field.id)
                .await?
                .into_iter()
                .map(|e| e.target_instance_id)
                .collect();
            let value = if relations_as_ids {
                RelationValue::Ids(targets)
            } else {
                RelationValue::Titled(self.resolve_targets(field, &targets).await?)
            };
            relations.insert(field.name.clone(), value);
        }

        Ok(InstanceView {
            instance,
            relations,
        })
    }

    /// Filtered, searched, ordered, paginated list. Edges for the result
    /// page are loaded in one query per included relation field, never per
    /// row.
    pub async fn get_instances(
        &self,
        definition_id: &Id,
        project_id: &Id,
        query: &ListQuery,
    ) -> CoreResult<InstancePage> {
        let definition = self
            .store
            .get_entity_definition(definition_id)
            .await?
            .ok_or_else(|| CoreError::not_found("entity definition", definition_id))?;
        let fields = self.store.list_fields_for_definition(definition_id).await?;

        let limit = query.limit.unwrap_or(definition.page_policy.page_size).max(1);
        let offset = query.offset;
        let sort_key = sort_key(&fields, query.order_by.as_deref())?;
        let descending = match query.order {
            Some(SortDirection::Asc) => false,
            Some(SortDirection::Desc) => true,
            // Creation time sorts newest-first by default, explicit sort
            // fields ascending
            None => query.order_by.is_none(),
        };

        let compiled = FilterCompiler::compile(self.store, &fields, &query.filters).await?;
        if compiled.is_empty_match() {
            return Ok(InstancePage {
                data: Vec::new(),
                pagination: PaginationMeta::new(0, limit, offset),
            });
        }

        let mut rows: Vec<EntityInstance> = self
            .store
            .list_instances(definition_id, Some(project_id))
            .await?
            .into_iter()
            .filter(|row| compiled.matches(row))
            .collect();

        if let Some(needle) = query.search.as_deref().filter(|s| !s.is_empty()) {
            let needle = needle.to_lowercase();
            let searchable: Vec<&FieldDef> = fields
                .iter()
                .filter(|f| f.searchable && !f.is_relation())
                .collect();
            rows.retain(|row| {
                searchable.iter().any(|field| {
                    row.attributes
                        .get(&field.name)
                        .map(|v| v.render().to_lowercase().contains(&needle))
                        .unwrap_or(false)
                })
            });
        }

        rows.sort_by(|a, b| {
            let ordering = compare_rows(a, b, &sort_key);
            let ordering = if descending { ordering.reverse() } else { ordering };
            // Stable total order so pages never overlap or gap
            ordering.then_with(|| a.id.cmp(&b.id))
        });

        let total = rows.len();
        let page_rows: Vec<EntityInstance> =
            rows.into_iter().skip(offset).take(limit).collect();

        let data = self
            .attach_page_relations(&fields, page_rows, query)
            .await?;

        Ok(InstancePage {
            data,
            pagination: PaginationMeta::new(total, limit, offset),
        })
    }

    async fn attach_page_relations(
        &self,
        fields: &[FieldDef],
        page_rows: Vec<EntityInstance>,
        query: &ListQuery,
    ) -> CoreResult<Vec<InstanceView>> {
        let included = requested_relation_fields(fields, Some(query.include_relations.as_slice()))?;
        let page_ids: Vec<Id> = page_rows.iter().map(|r| r.id.clone()).collect();

        // field name -> source id -> ordered target ids
        let mut per_field: HashMap<String, HashMap<Id, Vec<Id>>> = HashMap::new();
        let mut titles: HashMap<String, HashMap<Id, String>> = HashMap::new();

        for field in &included {
            let edges = self.store.edges_from_any(&field.id, &page_ids).await?;
            let mut by_source: HashMap<Id, Vec<Id>> = HashMap::new();
            for edge in edges {
                by_source
                    .entry(edge.source_instance_id)
                    .or_default()
                    .push(edge.target_instance_id);
            }

            if !query.relations_as_ids {
                let all_targets: Vec<Id> = by_source
                    .values()
                    .flatten()
                    .cloned()
                    .unique()
                    .collect();
                let resolved = self.resolve_targets(field, &all_targets).await?;
                titles.insert(
                    field.name.clone(),
                    resolved.into_iter().map(|r| (r.id, r.title)).collect(),
                );
            }
            per_field.insert(field.name.clone(), by_source);
        }

        Ok(page_rows
            .into_iter()
            .map(|instance| {
                let relations = included
                    .iter()
                    .map(|field| {
                        let targets = per_field
                            .get(&field.name)
                            .and_then(|by_source| by_source.get(&instance.id))
                            .cloned()
                            .unwrap_or_default();
                        let value = if query.relations_as_ids {
                            RelationValue::Ids(targets)
                        } else {
                            let field_titles = titles.get(&field.name);
                            RelationValue::Titled(
                                targets
                                    .into_iter()
                                    .map(|id| OptionRef {
                                        title: field_titles
                                            .and_then(|t| t.get(&id).cloned())
                                            .unwrap_or_else(|| id.clone()),
                                        id,
                                    })
                                    .collect(),
                            )
                        };
                        (field.name.clone(), value)
                    })
                    .collect();
                InstanceView {
                    instance,
                    relations,
                }
            })
            .collect())
    }

    async fn resolve_targets(
        &self,
        field: &FieldDef,
        targets: &[Id],
    ) -> CoreResult<Vec<OptionRef>> {
        let related = field.related_entity_definition_id.as_ref().ok_or_else(|| {
            CoreError::validation(format!("relation '{}' has no related type", field.name))
        })?;
        self.resolver.resolve_titles(related, targets).await
    }
}

/// Resolve requested relation field names against the definition's fields.
/// `None` means all relation fields; an unknown or non-relation name is a
/// validation error.
fn requested_relation_fields<'f>(
    fields: &'f [FieldDef],
    names: Option<&[String]>,
) -> CoreResult<Vec<&'f FieldDef>> {
    match names {
        None => Ok(fields.iter().filter(|f| f.is_relation()).collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                fields
                    .iter()
                    .find(|f| &f.name == name && f.is_relation())
                    .ok_or_else(|| {
                        CoreError::validation(format!("unknown relation field '{}'", name))
                    })
            })
            .collect(),
    }
}

fn sort_key(fields: &[FieldDef], order_by: Option<&str>) -> CoreResult<SortKey> {
    match order_by {
        None | Some("created_at") => Ok(SortKey::CreatedAt),
        Some("updated_at") => Ok(SortKey::UpdatedAt),
        Some(name) => {
            let known = fields.iter().any(|f| f.name == name && !f.is_relation());
            if !known {
                return Err(CoreError::validation(format!(
                    "unknown sort field '{}'",
                    name
                )));
            }
            Ok(SortKey::Attribute(name.to_string()))
        }
    }
}

fn compare_rows(a: &EntityInstance, b: &EntityInstance, key: &SortKey) -> Ordering {
    match key {
        SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortKey::Attribute(name) => {
            attr_ordering(a.attributes.get(name), b.attributes.get(name))
        }
    }
}

fn attr_ordering(a: Option<&AttributeValue>, b: Option<&AttributeValue>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (AttributeValue::Number(x), AttributeValue::Number(y)) => {
                x.partial_cmp(y).unwrap_or(Ordering::Equal)
            }
            (AttributeValue::String(x), AttributeValue::String(y)) => x.cmp(y),
            (AttributeValue::Boolean(x), AttributeValue::Boolean(y)) => x.cmp(y),
            _ => a.render().cmp(&b.render()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::instance_ops::InstanceOps;
    use crate::model::{
        EntityDefinition, FieldKind, FilterSpec, MatchMode, NewEntityDefinition, NewFieldDef,
        UserContext,
    };
    use crate::store::memory::MemoryStore;
    use crate::store::traits::{EntityDefStore, FieldStore};
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

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

    async fn setup(store: &MemoryStore) {
        for (id, name, key) in [
            ("def-post", "Post", "posts"),
            ("def-tag", "Tag", "tags"),
        ] {
            store
                .insert_entity_definition(EntityDefinition::from_new(
                    NewEntityDefinition {
                        id: Some(id.to_string()),
                        name: name.to_string(),
                        storage_key: key.to_string(),
                        tier: Default::default(),
                        permissions: None,
                        page_policy: None,
                        section_titles: None,
                    },
                    "test".to_string(),
                ))
                .await
                .unwrap();
        }

        let mut title = crate::model::FieldDef::from_new(
            new_field("title", FieldKind::String),
            "def-post".to_string(),
            "test".to_string(),
        );
        title.searchable = true;
        title.is_title = true;
        store.insert_field(title).await.unwrap();

        let mut status = crate::model::FieldDef::from_new(
            new_field("status", FieldKind::String),
            "def-post".to_string(),
            "test".to_string(),
        );
        status.filterable = true;
        store.insert_field(status).await.unwrap();

        let mut label = crate::model::FieldDef::from_new(
            new_field("label", FieldKind::String),
            "def-tag".to_string(),
            "test".to_string(),
        );
        label.is_title = true;
        store.insert_field(label).await.unwrap();

        let mut tags = crate::model::FieldDef::from_new(
            new_field("tags", FieldKind::ManyToMany),
            "def-post".to_string(),
            "test".to_string(),
        );
        tags.related_entity_definition_id = Some("def-tag".to_string());
        tags.relation_field_id = Some("f-posts".to_string());
        let mut posts = crate::model::FieldDef::from_new(
            new_field("posts", FieldKind::ManyToMany),
            "def-tag".to_string(),
            "test".to_string(),
        );
        posts.related_entity_definition_id = Some("def-post".to_string());
        posts.relation_field_id = Some("f-tags".to_string());
        posts.is_relation_source = false;
        store.upsert_field_pair(tags, posts).await.unwrap();
    }

    async fn create_post(
        store: &MemoryStore,
        title: &str,
        status: &str,
        tags: Vec<String>,
    ) -> Id {
        let ops = InstanceOps::new(store);
        ops.create_instance(
            &"def-post".to_string(),
            &"proj-1".to_string(),
            HashMap::from([
                ("title".to_string(), json!(title)),
                ("status".to_string(), json!(status)),
                ("tags".to_string(), json!(tags)),
            ]),
            &UserContext::system(),
        )
        .await
        .unwrap()
        .instance
        .id
    }

    async fn create_tag(store: &MemoryStore, label: &str) -> Id {
        let ops = InstanceOps::new(store);
        ops.create_instance(
            &"def-tag".to_string(),
            &"proj-1".to_string(),
            HashMap::from([("label".to_string(), json!(label))]),
            &UserContext::system(),
        )
        .await
        .unwrap()
        .instance
        .id
    }

    #[tokio::test]
    async fn test_get_instance_titled_and_ids() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;
        let post = create_post(&store, "Hello", "published", vec![t1.clone()]).await;

        let resolver = OptionResolver::with_ttl(store.clone(), Duration::ZERO);
        let reader = InstanceReader::new(store.as_ref(), &resolver);

        let view = reader.get_instance_by_id(&post, None, true).await.unwrap();
        assert_eq!(view.relations.get("tags").unwrap().ids(), vec![t1.clone()]);

        let view = reader.get_instance_by_id(&post, None, false).await.unwrap();
        match view.relations.get("tags").unwrap() {
            RelationValue::Titled(refs) => {
                assert_eq!(refs[0].id, t1);
                assert_eq!(refs[0].title, "rust");
            }
            other => panic!("expected titled relations, got {:?}", other),
        }

        let result = reader
            .get_instance_by_id(&post, Some(&["nope".to_string()]), true)
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_pagination_concatenates_without_gaps() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        for i in 0..25 {
            create_post(&store, &format!("Post {}", i), "published", vec![]).await;
        }

        let resolver = OptionResolver::with_ttl(store.clone(), Duration::ZERO);
        let reader = InstanceReader::new(store.as_ref(), &resolver);

        let mut seen = HashSet::new();
        let mut offset = 0;
        loop {
            let page = reader
                .get_instances(
                    &"def-post".to_string(),
                    &"proj-1".to_string(),
                    &ListQuery {
                        limit: Some(10),
                        offset,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(page.pagination.total, 25);
            assert_eq!(page.pagination.total_pages, 3);
            for view in &page.data {
                assert!(seen.insert(view.instance.id.clone()), "duplicate across pages");
            }
            if !page.pagination.has_next_page {
                break;
            }
            offset += 10;
        }
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn test_search_and_filter_intersect() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;
        let hit = create_post(&store, "Async in Rust", "published", vec![t1.clone()]).await;
        create_post(&store, "Async elsewhere", "published", vec![]).await;
        create_post(&store, "Async in Rust, draft", "draft", vec![t1.clone()]).await;

        let resolver = OptionResolver::with_ttl(store.clone(), Duration::ZERO);
        let reader = InstanceReader::new(store.as_ref(), &resolver);

        // status eq published AND tagged rust AND search "async" — only
        // the intersection survives
        let page = reader
            .get_instances(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                &ListQuery {
                    search: Some("async".to_string()),
                    filters: vec![
                        FilterSpec::Simple {
                            field: "status".to_string(),
                            operator: crate::model::FilterOperator::Eq,
                            value: json!("published"),
                        },
                        FilterSpec::ManyToMany {
                            field: "tags".to_string(),
                            values: vec![t1],
                            mode: MatchMode::Or,
                        },
                    ],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.pagination.total, 1);
        assert_eq!(page.data[0].instance.id, hit);
    }

    #[tokio::test]
    async fn test_page_relations_batched_and_titled() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        let t1 = create_tag(&store, "rust").await;
        let t2 = create_tag(&store, "tokio").await;
        create_post(&store, "One", "published", vec![t1.clone(), t2.clone()]).await;
        create_post(&store, "Two", "published", vec![t2.clone()]).await;

        let resolver = OptionResolver::with_ttl(store.clone(), Duration::ZERO);
        let reader = InstanceReader::new(store.as_ref(), &resolver);

        let page = reader
            .get_instances(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                &ListQuery {
                    include_relations: vec!["tags".to_string()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.data.len(), 2);
        for view in &page.data {
            match view.relations.get("tags").unwrap() {
                RelationValue::Titled(refs) => {
                    assert!(!refs.is_empty());
                    assert!(refs.iter().all(|r| !r.title.is_empty()));
                }
                other => panic!("expected titled relations, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_order_by_attribute() {
        let store = Arc::new(MemoryStore::new());
        setup(&store).await;
        create_post(&store, "Banana", "published", vec![]).await;
        create_post(&store, "Apple", "published", vec![]).await;
        create_post(&store, "Cherry", "published", vec![]).await;

        let resolver = OptionResolver::with_ttl(store.clone(), Duration::ZERO);
        let reader = InstanceReader::new(store.as_ref(), &resolver);

        let page = reader
            .get_instances(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                &ListQuery {
                    order_by: Some("title".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let titles: Vec<String> = page
            .data
            .iter()
            .map(|v| v.instance.attributes.get("title").unwrap().render())
            .collect();
        assert_eq!(titles, vec!["Apple", "Banana", "Cherry"]);

        let result = reader
            .get_instances(
                &"def-post".to_string(),
                &"proj-1".to_string(),
                &ListQuery {
                    order_by: Some("bogus".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }
}
