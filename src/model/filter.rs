use crate::model::Id;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    Eq,
    Neq,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
    Ilike,
    In,
}

/// Set-membership semantics for many-to-many filters: `or` matches
/// instances linked to at least one of the values, `and` only instances
/// linked to every value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    Or,
    And,
}

/// One declarative filter spec. A request carries an ordered list of these;
/// all specs are conjunctive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    // Untagged: most specific shape first. ManyToMany carries values+mode,
    // Simple carries operator+value, Relation is the bare field+value rest.
    ManyToMany {
        field: String,
        values: Vec<Id>,
        mode: MatchMode,
    },
    Simple {
        field: String,
        operator: FilterOperator,
        value: serde_json::Value,
    },
    Relation {
        field: String,
        value: Id,
    },
}

impl FilterSpec {
    pub fn field(&self) -> &str {
        match self {
            FilterSpec::ManyToMany { field, .. } => field,
            FilterSpec::Simple { field, .. } => field,
            FilterSpec::Relation { field, .. } => field,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Query options for paginated instance lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
    /// Relation field names to batch-load for the result page
    #[serde(default)]
    pub include_relations: Vec<String>,
    /// Raw target-id lists instead of titled pairs for included relations
    #[serde(default)]
    pub relations_as_ids: bool,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    /// Case-insensitive substring search across searchable fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    /// Attribute name, "created_at" or "updated_at"; creation time when
    /// absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<SortDirection>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            limit: None,
            offset: 0,
            include_relations: Vec::new(),
            relations_as_ids: false,
            filters: Vec::new(),
            search: None,
            order_by: None,
            order: None,
        }
    }
}
