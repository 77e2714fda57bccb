use std::collections::{HashMap, HashSet};

use itertools::Itertools;

use crate::error::{CoreError, CoreResult};
use crate::model::{
    AttributeValue, EntityInstance, FieldDef, FilterOperator, FilterSpec, Id, MatchMode,
};
use crate::store::traits::Store;

/// A compiled filter list: edge-backed specs resolved into id-sets, scalar
/// specs into predicates. All parts are conjunctive, so a candidate
/// instance must be in every id-set and satisfy every predicate.
#[derive(Debug, Default)]
pub struct CompiledFilter {
    id_sets: Vec<HashSet<Id>>,
    predicates: Vec<ScalarPredicate>,
}

#[derive(Debug)]
struct ScalarPredicate {
    field: String,
    operator: FilterOperator,
    value: serde_json::Value,
}

impl CompiledFilter {
    /// True when some id-set came back empty: nothing can match and the
    /// caller may skip row scanning entirely. Empty match means empty
    /// result, never "all".
    pub fn is_empty_match(&self) -> bool {
        self.id_sets.iter().any(|set| set.is_empty())
    }

    pub fn matches(&self, instance: &EntityInstance) -> bool {
        self.id_sets.iter().all(|set| set.contains(&instance.id))
            && self
                .predicates
                .iter()
                .all(|predicate| predicate.matches(instance))
    }
}

impl ScalarPredicate {
    fn matches(&self, instance: &EntityInstance) -> bool {
        let attribute = instance.attributes.get(&self.field);
        match self.operator {
            FilterOperator::Eq => loose_eq(attribute, &self.value),
            FilterOperator::Neq => !loose_eq(attribute, &self.value),
            FilterOperator::Gt => compare(attribute, &self.value)
                .map_or(false, |o| o == std::cmp::Ordering::Greater),
            FilterOperator::Lt => compare(attribute, &self.value)
                .map_or(false, |o| o == std::cmp::Ordering::Less),
            FilterOperator::Gte => compare(attribute, &self.value)
                .map_or(false, |o| o != std::cmp::Ordering::Less),
            FilterOperator::Lte => compare(attribute, &self.value)
                .map_or(false, |o| o != std::cmp::Ordering::Greater),
            FilterOperator::Like => substring_match(attribute, &self.value, false),
            FilterOperator::Ilike => substring_match(attribute, &self.value, true),
            FilterOperator::In => match &self.value {
                serde_json::Value::Array(candidates) => {
                    candidates.iter().any(|c| loose_eq(attribute, c))
                }
                _ => false,
            },
        }
    }
}

/// Equality with numeric coercion: a stored number compares equal to a
/// filter string that parses to the same number, and vice versa.
fn loose_eq(attribute: Option<&AttributeValue>, value: &serde_json::Value) -> bool {
    match (attribute, value) {
        (None, _) | (Some(AttributeValue::Null), _) => value.is_null(),
        (Some(AttributeValue::Boolean(a)), serde_json::Value::Bool(b)) => a == b,
        (Some(AttributeValue::String(a)), serde_json::Value::String(b)) => a == b,
        (Some(attribute), value) => match (as_number(attribute), json_number(value)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        _ => false,
    }
}

fn compare(
    attribute: Option<&AttributeValue>,
    value: &serde_json::Value,
) -> Option<std::cmp::Ordering> {
    let attribute = attribute?;
    if let (Some(a), Some(b)) = (as_number(attribute), json_number(value)) {
        return a.partial_cmp(&b);
    }
    match (attribute, value) {
        (AttributeValue::String(a), serde_json::Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        _ => None,
    }
}

fn as_number(attribute: &AttributeValue) -> Option<f64> {
    match attribute {
        AttributeValue::Number(n) => Some(*n),
        AttributeValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn json_number(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn substring_match(
    attribute: Option<&AttributeValue>,
    value: &serde_json::Value,
    case_insensitive: bool,
) -> bool {
    let (Some(AttributeValue::String(haystack)), serde_json::Value::String(needle)) =
        (attribute, value)
    else {
        return false;
    };
    if case_insensitive {
        haystack.to_lowercase().contains(&needle.to_lowercase())
    } else {
        haystack.contains(needle)
    }
}

pub struct FilterCompiler;

impl FilterCompiler {
    /// Compile an ordered list of filter specs against a definition's
    /// fields. A spec referencing an unknown field is a validation error,
    /// never a silent no-op. Edge-backed specs each cost one edge query;
    /// scalar specs compile to in-memory predicates over the candidate
    /// rows.
    pub async fn compile<S: Store>(
        store: &S,
        fields: &[FieldDef],
        specs: &[FilterSpec],
    ) -> CoreResult<CompiledFilter> {
        let by_name: HashMap<&str, &FieldDef> =
            fields.iter().map(|f| (f.name.as_str(), f)).collect();

        let mut compiled = CompiledFilter::default();

        for spec in specs {
            let field = *by_name.get(spec.field()).ok_or_else(|| {
                CoreError::validation(format!("unknown filter field '{}'", spec.field()))
            })?;

            match spec {
                FilterSpec::Simple {
                    operator, value, ..
                } => {
                    if field.is_relation() {
                        return Err(CoreError::validation(format!(
                            "field '{}' is a relation; use a relation filter",
                            field.name
                        )));
                    }
                    compiled.predicates.push(ScalarPredicate {
                        field: field.name.clone(),
                        operator: *operator,
                        value: value.clone(),
                    });
                }
                FilterSpec::Relation { value, .. } => {
                    if !field.kind.is_single_cardinality() {
                        return Err(CoreError::validation(format!(
                            "field '{}' is not a single-cardinality relation",
                            field.name
                        )));
                    }
                    let edges = store
                        .edges_to_any(&field.id, std::slice::from_ref(value))
                        .await?;
                    compiled
                        .id_sets
                        .push(edges.into_iter().map(|e| e.source_instance_id).collect());
                }
                FilterSpec::ManyToMany { values, mode, .. } => {
                    if !field.is_relation() || field.kind.is_single_cardinality() {
                        return Err(CoreError::validation(format!(
                            "field '{}' is not a multi-cardinality relation",
                            field.name
                        )));
                    }
                    let wanted: Vec<Id> = values.iter().unique().cloned().collect();
                    let edges = store.edges_to_any(&field.id, &wanted).await?;
                    let set: HashSet<Id> = match mode {
                        // At least one edge into the wanted set
                        MatchMode::Or => {
                            edges.into_iter().map(|e| e.source_instance_id).collect()
                        }
                        // Every wanted target must be linked: group matched
                        // edges by source and require the distinct-target
                        // count to reach the full wanted count
                        MatchMode::And => {
                            let mut per_source: HashMap<Id, HashSet<Id>> = HashMap::new();
                            for edge in edges {
                                per_source
                                    .entry(edge.source_instance_id)
                                    .or_default()
                                    .insert(edge.target_instance_id);
                            }
                            per_source
                                .into_iter()
                                .filter(|(_, targets)| targets.len() == wanted.len())
                                .map(|(source, _)| source)
                                .collect()
                        }
                    };
                    compiled.id_sets.push(set);
                }
            }
        }

        Ok(compiled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldKind, NewFieldDef, RelationEdge};
    use crate::store::memory::MemoryStore;
    use crate::store::traits::EdgeStore;
    use std::collections::HashMap as StdHashMap;

    fn scalar_field(name: &str, kind: FieldKind) -> FieldDef {
        FieldDef::from_new(
            NewFieldDef {
                id: Some(format!("f-{}", name)),
                name: name.to_string(),
                kind,
                display_index: None,
                show_on_create: None,
                show_on_edit: None,
                show_in_table: None,
                searchable: None,
                filterable: Some(true),
                is_title: None,
                required: None,
                default_value: None,
                related_entity_definition_id: None,
                relation_field_id: None,
                is_relation_source: None,
            },
            "def-post".to_string(),
            "test".to_string(),
        )
    }

    fn relation_field(name: &str, kind: FieldKind) -> FieldDef {
        let mut field = scalar_field(name, kind);
        field.related_entity_definition_id = Some("def-tag".to_string());
        field
    }

    fn instance(id: &str, attrs: Vec<(&str, AttributeValue)>) -> EntityInstance {
        let mut attributes = StdHashMap::new();
        for (k, v) in attrs {
            attributes.insert(k.to_string(), v);
        }
        let mut inst = EntityInstance::new(
            "def-post".to_string(),
            "proj-1".to_string(),
            attributes,
            "test".to_string(),
        );
        inst.id = id.to_string();
        inst
    }

    async fn link(store: &MemoryStore, field: &FieldDef, source: &str, target: &str) {
        store
            .insert_edges(vec![RelationEdge::new(
                source.to_string(),
                target.to_string(),
                field,
            )])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_field_is_validation_error() {
        let store = MemoryStore::new();
        let fields = vec![scalar_field("status", FieldKind::String)];
        let specs: Vec<FilterSpec> =
            serde_json::from_str(r#"[{"field":"nope","operator":"eq","value":1}]"#).unwrap();
        let result = FilterCompiler::compile(&store, &fields, &specs).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[tokio::test]
    async fn test_simple_predicates() {
        let store = MemoryStore::new();
        let fields = vec![
            scalar_field("status", FieldKind::String),
            scalar_field("views", FieldKind::Number),
        ];
        let specs: Vec<FilterSpec> = serde_json::from_str(
            r#"[
                {"field":"status","operator":"eq","value":"published"},
                {"field":"views","operator":"gte","value":10}
            ]"#,
        )
        .unwrap();
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();

        let hit = instance(
            "x",
            vec![
                ("status", AttributeValue::String("published".into())),
                ("views", AttributeValue::Number(12.0)),
            ],
        );
        let miss = instance(
            "y",
            vec![
                ("status", AttributeValue::String("draft".into())),
                ("views", AttributeValue::Number(12.0)),
            ],
        );
        assert!(compiled.matches(&hit));
        assert!(!compiled.matches(&miss));
    }

    #[tokio::test]
    async fn test_ilike_and_in_operators() {
        let store = MemoryStore::new();
        let fields = vec![scalar_field("title", FieldKind::String)];

        let specs: Vec<FilterSpec> =
            serde_json::from_str(r#"[{"field":"title","operator":"ilike","value":"WORLD"}]"#)
                .unwrap();
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();
        let inst = instance("x", vec![("title", AttributeValue::String("Hello world".into()))]);
        assert!(compiled.matches(&inst));

        let specs: Vec<FilterSpec> =
            serde_json::from_str(r#"[{"field":"title","operator":"in","value":["a","Hello world"]}]"#)
                .unwrap();
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();
        assert!(compiled.matches(&inst));
    }

    // Fixtures: X→{A}, Y→{A,B}, Z→{B}. OR over [A,B] matches all three,
    // AND only Y.
    #[tokio::test]
    async fn test_many_to_many_or_and() {
        let store = MemoryStore::new();
        let tags = relation_field("tags", FieldKind::ManyToMany);
        let fields = vec![tags.clone()];

        link(&store, &tags, "X", "A").await;
        link(&store, &tags, "Y", "A").await;
        link(&store, &tags, "Y", "B").await;
        link(&store, &tags, "Z", "B").await;

        let or_specs = vec![FilterSpec::ManyToMany {
            field: "tags".to_string(),
            values: vec!["A".to_string(), "B".to_string()],
            mode: MatchMode::Or,
        }];
        let compiled = FilterCompiler::compile(&store, &fields, &or_specs).await.unwrap();
        for id in ["X", "Y", "Z"] {
            assert!(compiled.matches(&instance(id, vec![])), "{} should match OR", id);
        }

        let and_specs = vec![FilterSpec::ManyToMany {
            field: "tags".to_string(),
            values: vec!["A".to_string(), "B".to_string()],
            mode: MatchMode::And,
        }];
        let compiled = FilterCompiler::compile(&store, &fields, &and_specs).await.unwrap();
        assert!(!compiled.matches(&instance("X", vec![])));
        assert!(compiled.matches(&instance("Y", vec![])));
        assert!(!compiled.matches(&instance("Z", vec![])));
    }

    #[tokio::test]
    async fn test_many_to_many_empty_match_is_empty_result() {
        let store = MemoryStore::new();
        let tags = relation_field("tags", FieldKind::ManyToMany);
        let fields = vec![tags.clone()];
        link(&store, &tags, "X", "A").await;

        let specs = vec![FilterSpec::ManyToMany {
            field: "tags".to_string(),
            values: vec!["unknown-tag".to_string()],
            mode: MatchMode::Or,
        }];
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();
        assert!(compiled.is_empty_match());
        assert!(!compiled.matches(&instance("X", vec![])));
    }

    #[tokio::test]
    async fn test_and_counts_distinct_targets_not_edges() {
        let store = MemoryStore::new();
        let tags = relation_field("tags", FieldKind::ManyToMany);
        let fields = vec![tags.clone()];
        // duplicated value in the spec must not lower the bar
        link(&store, &tags, "X", "A").await;

        let specs = vec![FilterSpec::ManyToMany {
            field: "tags".to_string(),
            values: vec!["A".to_string(), "A".to_string(), "B".to_string()],
            mode: MatchMode::And,
        }];
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();
        assert!(!compiled.matches(&instance("X", vec![])));
    }

    #[tokio::test]
    async fn test_relation_filter_exact_target() {
        let store = MemoryStore::new();
        let author = relation_field("author", FieldKind::ManyToOne);
        let fields = vec![author.clone()];
        link(&store, &author, "X", "author-1").await;
        link(&store, &author, "Y", "author-2").await;

        let specs = vec![FilterSpec::Relation {
            field: "author".to_string(),
            value: "author-1".to_string(),
        }];
        let compiled = FilterCompiler::compile(&store, &fields, &specs).await.unwrap();
        assert!(compiled.matches(&instance("X", vec![])));
        assert!(!compiled.matches(&instance("Y", vec![])));
    }
}
