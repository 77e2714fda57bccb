use crate::model::{AttributeValue, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_user() -> String {
    "legacy-user".to_string()
}

fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(|| Utc::now())
}

/// One record of an entity definition, scoped to a project namespace.
///
/// The attribute map holds scalar values only; its keys are exactly the
/// non-relation field names of the definition. Relation targets live in
/// relation edges, never in here — edges are the single source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInstance {
    pub id: Id,
    #[serde(rename = "type")]
    pub entity_definition_id: Id,
    #[serde(rename = "project")]
    pub project_id: Id,
    pub attributes: HashMap<String, AttributeValue>,

    #[serde(default = "default_user")]
    pub created_by: String,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_user")]
    pub updated_by: String,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

impl EntityInstance {
    pub fn new(
        entity_definition_id: Id,
        project_id: Id,
        attributes: HashMap<String, AttributeValue>,
        user_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: crate::model::generate_id(),
            entity_definition_id,
            project_id,
            attributes,
            created_by: user_id.clone(),
            created_at: now,
            updated_by: user_id,
            updated_at: now,
        }
    }
}

/// An `{id, title}` pair produced by the option resolver for selector UIs
/// and titled relation reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionRef {
    pub id: Id,
    pub title: String,
}

/// Relation representation on a read: raw target ids (edit forms re-submit
/// these) or resolved `{id, title}` pairs (display).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RelationValue {
    Ids(Vec<Id>),
    Titled(Vec<OptionRef>),
}

impl RelationValue {
    pub fn ids(&self) -> Vec<Id> {
        match self {
            RelationValue::Ids(ids) => ids.clone(),
            RelationValue::Titled(refs) => refs.iter().map(|r| r.id.clone()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationValue::Ids(ids) => ids.len(),
            RelationValue::Titled(refs) => refs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An instance as returned by the read paths: the stored row plus the
/// requested relation fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceView {
    #[serde(flatten)]
    pub instance: EntityInstance,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub relations: HashMap<String, RelationValue>,
}

/// Pagination metadata returned alongside every instance list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationMeta {
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub total_pages: usize,
    pub has_previous_page: bool,
    pub has_next_page: bool,
}

impl PaginationMeta {
    pub fn new(total: usize, limit: usize, offset: usize) -> Self {
        let limit = limit.max(1);
        let total_pages = total.div_ceil(limit);
        let page = offset / limit + 1;
        Self {
            page,
            limit,
            total,
            total_pages,
            has_previous_page: page > 1,
            has_next_page: page < total_pages,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstancePage {
    pub data: Vec<InstanceView>,
    pub pagination: PaginationMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_meta() {
        let meta = PaginationMeta::new(45, 10, 0);
        assert_eq!(meta.page, 1);
        assert_eq!(meta.total_pages, 5);
        assert!(!meta.has_previous_page);
        assert!(meta.has_next_page);

        let meta = PaginationMeta::new(45, 10, 40);
        assert_eq!(meta.page, 5);
        assert!(meta.has_previous_page);
        assert!(!meta.has_next_page);

        let meta = PaginationMeta::new(0, 10, 0);
        assert_eq!(meta.total_pages, 0);
        assert!(!meta.has_next_page);
    }

    #[test]
    fn test_relation_value_serde_shapes() {
        let ids = RelationValue::Ids(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(serde_json::to_string(&ids).unwrap(), r#"["a","b"]"#);

        let titled = RelationValue::Titled(vec![OptionRef {
            id: "a".to_string(),
            title: "Alpha".to_string(),
        }]);
        assert_eq!(
            serde_json::to_string(&titled).unwrap(),
            r#"[{"id":"a","title":"Alpha"}]"#
        );
    }
}
