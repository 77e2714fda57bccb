use crate::model::{FieldDef, FieldKind, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A directed link from a source instance to a target instance, owned by a
/// relation field.
///
/// Uniqueness on (source, field, target) makes insertion idempotent; edges
/// are destroyed when either endpoint instance is destroyed and are never
/// left dangling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationEdge {
    pub id: Id,
    pub source_instance_id: Id,
    pub target_instance_id: Id,
    /// The relation field on the source side that owns this edge
    pub field_id: Id,
    /// The paired field on the target side, if the pair is complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reverse_field_id: Option<Id>,
    /// Relation kind of the owning side
    pub kind: FieldKind,
    pub created_at: DateTime<Utc>,
}

impl RelationEdge {
    pub fn new(source_instance_id: Id, target_instance_id: Id, field: &FieldDef) -> Self {
        Self {
            id: crate::model::generate_id(),
            source_instance_id,
            target_instance_id,
            field_id: field.id.clone(),
            reverse_field_id: field.relation_field_id.clone(),
            kind: field.kind,
            created_at: Utc::now(),
        }
    }

    /// The dedup key the stores enforce uniqueness on.
    pub fn identity(&self) -> (&Id, &Id, &Id) {
        (
            &self.source_instance_id,
            &self.field_id,
            &self.target_instance_id,
        )
    }
}
