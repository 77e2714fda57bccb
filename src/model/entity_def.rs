use crate::model::{FieldDef, Id, TypeTier};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default user for legacy data
fn default_user() -> String {
    "legacy-user".to_string()
}

/// Default timestamp for legacy data
fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).unwrap_or_else(|| Utc::now())
}

/// A mutating/reading operation on instances of an entity definition,
/// checked against the definition's [`PermissionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Read,
    Update,
    Delete,
}

/// One permission expression per operation. Expressions are opaque to the
/// model layer; the injected `Authorizer` evaluates them against the
/// caller's context (e.g. "any", "authenticated", "role:editor").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub create: String,
    pub read: String,
    pub update: String,
    pub delete: String,
}

impl Default for PermissionSet {
    fn default() -> Self {
        Self {
            create: "any".to_string(),
            read: "any".to_string(),
            update: "any".to_string(),
            delete: "any".to_string(),
        }
    }
}

impl PermissionSet {
    pub fn expression_for(&self, action: Action) -> &str {
        match action {
            Action::Create => &self.create,
            Action::Read => &self.read,
            Action::Update => &self.update,
            Action::Delete => &self.delete,
        }
    }
}

fn default_page_size() -> usize {
    25
}

/// Pagination and filter policy for list views of a definition's instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PagePolicy {
    /// Page size used when the caller does not supply a limit
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Filter field names exposed in list views; empty means all filterable
    /// fields
    #[serde(default)]
    pub enabled_filters: Vec<String>,
    /// Related definition ids whose instances may be used as filter targets
    #[serde(default)]
    pub filterable_related_types: Vec<Id>,
}

impl Default for PagePolicy {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            enabled_filters: Vec::new(),
            filterable_related_types: Vec::new(),
        }
    }
}

/// A runtime-defined record type. Instances of the definition are stored
/// and queried without any migration step when the definition changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinition {
    pub id: Id,

    /// Human name shown in navigation and titles (e.g. "Article")
    pub name: String,

    /// Storage key instances are persisted under. Immutable after creation;
    /// existing instances reference it.
    pub storage_key: String,

    /// Navigation grouping tier
    #[serde(default)]
    pub tier: TypeTier,

    /// Per-operation permission expressions
    #[serde(default)]
    pub permissions: PermissionSet,

    /// Pagination/filter policy for list views
    #[serde(default)]
    pub page_policy: PagePolicy,

    /// Optional display-section titles for the create/edit forms, keyed by
    /// section name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_titles: Option<HashMap<String, String>>,

    #[serde(default = "default_user")]
    pub created_by: String,
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_user")]
    pub updated_by: String,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

/// Entity definition input model for creation.
/// The ID can be provided by the caller or will be generated server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntityDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub name: String,
    pub storage_key: String,
    #[serde(default)]
    pub tier: TypeTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_policy: Option<PagePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_titles: Option<HashMap<String, String>>,
}

/// Entity definition update model for PATCH operations.
/// All fields are optional for partial updates. `storage_key` is present
/// only so that attempts to change it can be rejected explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDefinitionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<TypeTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<PermissionSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_policy: Option<PagePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section_titles: Option<HashMap<String, String>>,
}

impl EntityDefinition {
    /// Create a new EntityDefinition from NewEntityDefinition with audit
    /// information
    pub fn from_new(new_def: NewEntityDefinition, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: new_def.id.unwrap_or_else(crate::model::generate_id),
            name: new_def.name,
            storage_key: new_def.storage_key,
            tier: new_def.tier,
            permissions: new_def.permissions.unwrap_or_default(),
            page_policy: new_def.page_policy.unwrap_or_default(),
            section_titles: new_def.section_titles,
            created_by: user_id.clone(),
            created_at: now,
            updated_by: user_id,
            updated_at: now,
        }
    }

    /// Update this EntityDefinition with changes from
    /// EntityDefinitionUpdate, preserving the audit trail. The storage key
    /// is never touched here; callers reject attempts to change it before
    /// applying.
    pub fn apply_update(&mut self, update: EntityDefinitionUpdate, user_id: String) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(tier) = update.tier {
            self.tier = tier;
        }
        if let Some(permissions) = update.permissions {
            self.permissions = permissions;
        }
        if let Some(page_policy) = update.page_policy {
            self.page_policy = page_policy;
        }
        if let Some(section_titles) = update.section_titles {
            self.section_titles = Some(section_titles);
        }

        self.updated_by = user_id;
        self.updated_at = Utc::now();
    }
}

/// Composite read: the definition together with its fields, sorted by
/// display index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinitionWithFields {
    #[serde(flatten)]
    pub definition: EntityDefinition,
    pub fields: Vec<FieldDef>,
}
