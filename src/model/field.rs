use crate::model::{AttributeValue, FieldKind, Id};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_user() -> String {
    "legacy-user".to_string()
}

fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(|| Utc::now())
}

fn default_true() -> bool {
    true
}

/// One named, typed attribute or relation slot on an entity definition.
///
/// Relation fields always exist in pairs: the field on the owning side and
/// the paired field on the related definition, linked through
/// `relation_field_id` back-pointers. `is_relation_source` marks which side
/// owns edge creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub id: Id,
    pub entity_definition_id: Id,

    /// Unique within the owning definition
    pub name: String,
    pub kind: FieldKind,

    /// Ordering index for display
    #[serde(default)]
    pub display_index: i32,

    #[serde(default = "default_true")]
    pub show_on_create: bool,
    #[serde(default = "default_true")]
    pub show_on_edit: bool,
    #[serde(default = "default_true")]
    pub show_in_table: bool,
    #[serde(default)]
    pub searchable: bool,
    #[serde(default)]
    pub filterable: bool,
    /// Marks this field's value as the human-readable label for instances
    /// of the definition. At most one per definition.
    #[serde(default)]
    pub is_title: bool,

    #[serde(default)]
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<AttributeValue>,

    /// Relation kinds only: the definition this field points at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity_definition_id: Option<Id>,
    /// Relation kinds only: back-pointer to the paired field on the related
    /// definition. Nullable until the pair is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_field_id: Option<Id>,
    #[serde(default)]
    pub is_relation_source: bool,

    #[serde(default = "default_user")]
    pub created_by: String,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_user")]
    pub updated_by: String,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Field input model for creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFieldDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub name: String,
    pub kind: FieldKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_on_create: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_on_edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_in_table: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_title: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<AttributeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub related_entity_definition_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_field_id: Option<Id>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_relation_source: Option<bool>,
}

/// Field update model for PATCH operations. The kind and relation wiring
/// are immutable after creation; retargeting a relation means deleting and
/// recreating the pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_index: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_on_create: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_on_edit: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_in_table: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searchable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filterable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_title: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_value: Option<AttributeValue>,
}

impl FieldDef {
    pub fn from_new(new_field: NewFieldDef, entity_definition_id: Id, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_field.id.unwrap_or_else(crate::model::generate_id),
            entity_definition_id,
            name: new_field.name,
            kind: new_field.kind,
            display_index: new_field.display_index.unwrap_or(0),
            show_on_create: new_field.show_on_create.unwrap_or(true),
            show_on_edit: new_field.show_on_edit.unwrap_or(true),
            show_in_table: new_field.show_in_table.unwrap_or(true),
            searchable: new_field.searchable.unwrap_or(false),
            filterable: new_field.filterable.unwrap_or(false),
            is_title: new_field.is_title.unwrap_or(false),
            required: new_field.required.unwrap_or(false),
            default_value: new_field.default_value,
            related_entity_definition_id: new_field.related_entity_definition_id,
            relation_field_id: new_field.relation_field_id,
            is_relation_source: new_field.is_relation_source.unwrap_or(new_field.kind.is_relation()),
            created_by: user_id.clone(),
            created_at: now,
            updated_by: user_id,
            updated_at: now,
        }
    }

    pub fn apply_update(&mut self, update: FieldDefUpdate, user_id: String) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(display_index) = update.display_index {
            self.display_index = display_index;
        }
        if let Some(v) = update.show_on_create {
            self.show_on_create = v;
        }
        if let Some(v) = update.show_on_edit {
            self.show_on_edit = v;
        }
        if let Some(v) = update.show_in_table {
            self.show_in_table = v;
        }
        if let Some(v) = update.searchable {
            self.searchable = v;
        }
        if let Some(v) = update.filterable {
            self.filterable = v;
        }
        if let Some(v) = update.is_title {
            self.is_title = v;
        }
        if let Some(v) = update.required {
            self.required = v;
        }
        if let Some(v) = update.default_value {
            self.default_value = Some(v);
        }

        self.updated_by = user_id;
        self.updated_at = Utc::now();
    }

    pub fn is_relation(&self) -> bool {
        self.kind.is_relation()
    }

    /// Pair-invariant check for relation fields. `partner` is the field on
    /// the other side. Returns a description of the first violation.
    pub fn check_pair(&self, partner: &FieldDef) -> Result<(), String> {
        if !self.is_relation() || !partner.is_relation() {
            return Err("both sides of a relation pair must be relation fields".to_string());
        }
        if self.kind.paired() != Some(partner.kind) {
            return Err(format!(
                "relation kind {} pairs with {}, not {}",
                self.kind.as_str(),
                self.kind.paired().map(|k| k.as_str()).unwrap_or("?"),
                partner.kind.as_str()
            ));
        }
        if self.related_entity_definition_id.as_ref() != Some(&partner.entity_definition_id) {
            return Err("related definition does not match the partner's owner".to_string());
        }
        if partner.related_entity_definition_id.as_ref() != Some(&self.entity_definition_id) {
            return Err("partner's related definition does not point back".to_string());
        }
        if self.relation_field_id.as_ref() != Some(&partner.id)
            || partner.relation_field_id.as_ref() != Some(&self.id)
        {
            return Err("relation back-pointers are not mutual".to_string());
        }
        if self.is_relation_source == partner.is_relation_source {
            return Err("exactly one side of a relation pair must be the source".to_string());
        }
        Ok(())
    }
}

/// Pick the title field for a definition: the flagged field if any, else
/// the lowest-display-index scalar field. `None` means callers fall back to
/// the instance id.
pub fn title_field(fields: &[FieldDef]) -> Option<&FieldDef> {
    fields
        .iter()
        .find(|f| f.is_title && !f.is_relation())
        .or_else(|| {
            fields
                .iter()
                .filter(|f| !f.is_relation())
                .min_by_key(|f| f.display_index)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation_field(
        id: &str,
        owner: &str,
        kind: FieldKind,
        related: &str,
        partner: &str,
        source: bool,
    ) -> FieldDef {
        let mut f = FieldDef::from_new(
            NewFieldDef {
                id: Some(id.to_string()),
                name: format!("rel-{}", id),
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
                related_entity_definition_id: Some(related.to_string()),
                relation_field_id: Some(partner.to_string()),
                is_relation_source: Some(source),
            },
            owner.to_string(),
            "test".to_string(),
        );
        f.display_index = 0;
        f
    }

    #[test]
    fn test_check_pair_accepts_valid_pair() {
        let a = relation_field("fa", "def-post", FieldKind::ManyToMany, "def-tag", "fb", true);
        let b = relation_field("fb", "def-tag", FieldKind::ManyToMany, "def-post", "fa", false);
        assert!(a.check_pair(&b).is_ok());
        assert!(b.check_pair(&a).is_ok());
    }

    #[test]
    fn test_check_pair_rejects_cardinality_mismatch() {
        let a = relation_field("fa", "def-post", FieldKind::ManyToOne, "def-author", "fb", true);
        let b = relation_field("fb", "def-author", FieldKind::ManyToOne, "def-post", "fa", false);
        assert!(a.check_pair(&b).is_err());
    }

    #[test]
    fn test_check_pair_rejects_two_sources() {
        let a = relation_field("fa", "def-post", FieldKind::OneToOne, "def-meta", "fb", true);
        let b = relation_field("fb", "def-meta", FieldKind::OneToOne, "def-post", "fa", true);
        assert!(a.check_pair(&b).is_err());
    }

    #[test]
    fn test_title_field_selection() {
        let mut name = FieldDef::from_new(
            NewFieldDef {
                id: Some("f-name".to_string()),
                name: "name".to_string(),
                kind: FieldKind::String,
                display_index: Some(2),
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
            },
            "def-1".to_string(),
            "test".to_string(),
        );
        let mut code = name.clone();
        code.id = "f-code".to_string();
        code.name = "code".to_string();
        code.display_index = 1;

        // No flagged title: lowest display index wins
        let fields = vec![name.clone(), code.clone()];
        assert_eq!(title_field(&fields).unwrap().id, "f-code");

        // Flagged title wins regardless of display index
        name.is_title = true;
        let fields = vec![name, code];
        assert_eq!(title_field(&fields).unwrap().id, "f-name");

        // No fields at all: None (callers fall back to the id)
        assert!(title_field(&[]).is_none());
    }
}
