use crate::error::{CoreError, CoreResult};
use crate::logic::authz::{Authorizer, ALLOW_ALL};
use crate::logic::hooks::{WriteHook, NOOP_HOOK};
use crate::model::{
    EntityDefinition, EntityDefinitionUpdate, EntityDefinitionWithFields, FieldDef,
    FieldDefUpdate, FieldKind, Id, NewEntityDefinition, NewFieldDef, UserContext,
};
use crate::store::traits::Store;

/// Entity definition and field management. Schema mutations are restricted
/// to privileged callers; relation fields are created and destroyed in
/// pairs, atomically.
pub struct SchemaOps<'a, S: Store> {
    store: &'a S,
    authorizer: &'a dyn Authorizer,
    hook: &'a dyn WriteHook,
}

impl<'a, S: Store> SchemaOps<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            authorizer: &ALLOW_ALL,
            hook: &NOOP_HOOK,
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

    pub async fn get_definition(&self, id: &Id) -> CoreResult<EntityDefinition> {
        self.store
            .get_entity_definition(id)
            .await?
            .ok_or_else(|| CoreError::not_found("entity definition", id))
    }

    pub async fn get_definition_with_fields(
        &self,
        id: &Id,
    ) -> CoreResult<EntityDefinitionWithFields> {
        let definition = self.get_definition(id).await?;
        let fields = self.store.list_fields_for_definition(id).await?;
        Ok(EntityDefinitionWithFields { definition, fields })
    }

    pub async fn list_definitions(&self) -> CoreResult<Vec<EntityDefinition>> {
        Ok(self.store.list_entity_definitions().await?)
    }

    pub async fn create_definition(
        &self,
        new_definition: NewEntityDefinition,
        ctx: &UserContext,
    ) -> CoreResult<EntityDefinition> {
        self.require_schema_access(ctx)?;
        if new_definition.name.trim().is_empty() || new_definition.storage_key.trim().is_empty() {
            return Err(CoreError::validation(
                "entity definitions need a name and a storage key",
            ));
        }
        if self
            .store
            .get_entity_definition_by_storage_key(&new_definition.storage_key)
            .await?
            .is_some()
        {
            return Err(CoreError::conflict(format!(
                "storage key '{}' is already in use",
                new_definition.storage_key
            )));
        }

        let definition = EntityDefinition::from_new(new_definition, ctx.user_id.clone());
        self.store
            .insert_entity_definition(definition.clone())
            .await?;
        self.hook
            .after_write("definition.create", &definition.id, None)
            .await;
        Ok(definition)
    }

    pub async fn update_definition(
        &self,
        id: &Id,
        update: EntityDefinitionUpdate,
        ctx: &UserContext,
    ) -> CoreResult<EntityDefinition> {
        self.require_schema_access(ctx)?;
        let mut definition = self.get_definition(id).await?;
        if let Some(storage_key) = &update.storage_key {
            if storage_key != &definition.storage_key {
                return Err(CoreError::validation(
                    "the storage key is immutable; instances already reference it",
                ));
            }
        }
        definition.apply_update(update, ctx.user_id.clone());
        self.store
            .update_entity_definition(definition.clone())
            .await?;
        self.hook.after_write("definition.update", id, None).await;
        Ok(definition)
    }

    /// Delete a definition. Refuses with `Conflict` while instances exist
    /// unless `cascade` is set, in which case instances, their edges, the
    /// definition's fields and any relation fields on other definitions
    /// that target it are removed as well.
    pub async fn delete_definition(
        &self,
        id: &Id,
        cascade: bool,
        ctx: &UserContext,
    ) -> CoreResult<()> {
        self.require_schema_access(ctx)?;
        let definition = self.get_definition(id).await?;

        let instance_count = self.store.count_instances(id).await?;
        if instance_count > 0 && !cascade {
            return Err(CoreError::conflict(format!(
                "'{}' still has {} instances; delete them or request cascade",
                definition.name, instance_count
            )));
        }
        if cascade && instance_count > 0 {
            let removed = self.store.delete_instances_for_definition(id).await?;
            log::info!("cascade removed {} instances of '{}'", removed, definition.name);
        }

        let own_fields = self.store.list_fields_for_definition(id).await?;
        let targeting = self.store.list_relation_fields_targeting(id).await?;
        let mut doomed: Vec<Id> = Vec::new();
        for field in own_fields.iter().chain(targeting.iter()) {
            if field.is_relation() {
                self.store.delete_edges_for_field(&field.id).await?;
            }
            doomed.push(field.id.clone());
        }
        self.store.delete_fields(&doomed).await?;

        if !self.store.delete_entity_definition(id).await? {
            return Err(CoreError::not_found("entity definition", id));
        }
        self.hook.after_write("definition.delete", id, None).await;
        Ok(())
    }

    /// Create a field. For relation kinds this either attaches to an
    /// existing paired field (`relation_field_id` supplied) or synthesizes
    /// the paired field on the related definition; both rows are written in
    /// one store transaction, so a relation field is never left
    /// half-created.
    pub async fn create_field(
        &self,
        definition_id: &Id,
        new_field: NewFieldDef,
        ctx: &UserContext,
    ) -> CoreResult<FieldDef> {
        self.require_schema_access(ctx)?;
        let definition = self.get_definition(definition_id).await?;
        let existing = self.store.list_fields_for_definition(definition_id).await?;

        if existing.iter().any(|f| f.name == new_field.name) {
            return Err(CoreError::conflict(format!(
                "'{}' already has a field named '{}'",
                definition.name, new_field.name
            )));
        }
        if new_field.is_title.unwrap_or(false) && existing.iter().any(|f| f.is_title) {
            return Err(CoreError::validation(format!(
                "'{}' already has a title field",
                definition.name
            )));
        }

        let mut field = FieldDef::from_new(new_field, definition_id.clone(), ctx.user_id.clone());
        if field.display_index == 0 && !existing.is_empty() {
            field.display_index = existing.iter().map(|f| f.display_index).max().unwrap_or(0) + 1;
        }

        if !field.is_relation() {
            if let Some(default) = &field.default_value {
                if !default.matches_kind(&field.kind) {
                    return Err(CoreError::validation(format!(
                        "default value for '{}' does not match kind {}",
                        field.name,
                        field.kind.as_str()
                    )));
                }
            }
            self.store.insert_field(field.clone()).await?;
            self.hook.after_write("field.create", definition_id, None).await;
            return Ok(field);
        }

        if field.default_value.is_some() {
            return Err(CoreError::validation(
                "relation fields cannot carry a default value",
            ));
        }
        let related_id = field
            .related_entity_definition_id
            .clone()
            .ok_or_else(|| {
                CoreError::validation(format!(
                    "relation field '{}' needs a related entity definition",
                    field.name
                ))
            })?;
        let related = self
            .store
            .get_entity_definition(&related_id)
            .await?
            .ok_or_else(|| {
                CoreError::validation(format!("related entity definition '{}' does not exist", related_id))
            })?;

        let partner = match field.relation_field_id.clone() {
            Some(partner_id) => {
                let mut partner = self
                    .store
                    .get_field(&partner_id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::validation(format!(
                            "paired field '{}' does not exist",
                            partner_id
                        ))
                    })?;
                if partner.entity_definition_id != related_id {
                    return Err(CoreError::validation(format!(
                        "paired field '{}' belongs to a different definition",
                        partner.name
                    )));
                }
                if partner
                    .relation_field_id
                    .as_ref()
                    .is_some_and(|existing| existing != &field.id)
                {
                    return Err(CoreError::validation(format!(
                        "field '{}' is already paired",
                        partner.name
                    )));
                }
                partner.relation_field_id = Some(field.id.clone());
                partner.related_entity_definition_id = Some(definition_id.clone());
                partner.is_relation_source = !field.is_relation_source;
                partner.updated_by = ctx.user_id.clone();
                partner.updated_at = chrono::Utc::now();
                partner
            }
            None => {
                let partner_kind = field.kind.paired().ok_or_else(|| {
                    CoreError::validation(format!(
                        "'{}' is not a relation kind",
                        field.kind.as_str()
                    ))
                })?;
                let partner_name = synthesized_partner_name(&definition.name, partner_kind);
                let related_fields =
                    self.store.list_fields_for_definition(&related_id).await?;
                if related_fields.iter().any(|f| f.name == partner_name) {
                    return Err(CoreError::conflict(format!(
                        "'{}' already has a field named '{}'",
                        related.name, partner_name
                    )));
                }
                let next_index = related_fields
                    .iter()
                    .map(|f| f.display_index)
                    .max()
                    .unwrap_or(0)
                    + 1;
                FieldDef::from_new(
                    NewFieldDef {
                        id: None,
                        name: partner_name,
                        kind: partner_kind,
                        display_index: Some(next_index),
                        show_on_create: Some(false),
                        show_on_edit: Some(true),
                        show_in_table: Some(false),
                        searchable: None,
                        filterable: None,
                        is_title: None,
                        required: None,
                        default_value: None,
                        related_entity_definition_id: Some(definition_id.clone()),
                        relation_field_id: Some(field.id.clone()),
                        is_relation_source: Some(!field.is_relation_source),
                    },
                    related_id.clone(),
                    ctx.user_id.clone(),
                )
            }
        };

        field.relation_field_id = Some(partner.id.clone());
        field
            .check_pair(&partner)
            .map_err(CoreError::validation)?;

        self.store.upsert_field_pair(field.clone(), partner).await?;
        self.hook.after_write("field.create", definition_id, None).await;
        Ok(field)
    }

    pub async fn update_field(
        &self,
        field_id: &Id,
        update: FieldDefUpdate,
        ctx: &UserContext,
    ) -> CoreResult<FieldDef> {
        self.require_schema_access(ctx)?;
        let mut field = self
            .store
            .get_field(field_id)
            .await?
            .ok_or_else(|| CoreError::not_found("field", field_id))?;
        let siblings = self
            .store
            .list_fields_for_definition(&field.entity_definition_id)
            .await?;

        if let Some(name) = &update.name {
            if siblings.iter().any(|f| &f.name == name && f.id != field.id) {
                return Err(CoreError::conflict(format!(
                    "a field named '{}' already exists",
                    name
                )));
            }
        }
        if update.is_title == Some(true)
            && siblings.iter().any(|f| f.is_title && f.id != field.id)
        {
            return Err(CoreError::validation("the definition already has a title field"));
        }
        if update.default_value.is_some() && field.is_relation() {
            return Err(CoreError::validation(
                "relation fields cannot carry a default value",
            ));
        }

        field.apply_update(update, ctx.user_id.clone());

        if let Some(default) = &field.default_value {
            if !default.matches_kind(&field.kind) {
                return Err(CoreError::validation(format!(
                    "default value for '{}' does not match kind {}",
                    field.name,
                    field.kind.as_str()
                )));
            }
        }

        // The pair invariant is re-checked on every update of either side
        if field.is_relation() {
            if let Some(partner_id) = &field.relation_field_id {
                let partner = self
                    .store
                    .get_field(partner_id)
                    .await?
                    .ok_or_else(|| CoreError::not_found("paired field", partner_id))?;
                field.check_pair(&partner).map_err(CoreError::validation)?;
            }
        }

        self.store.update_field(field.clone()).await?;
        self.hook
            .after_write("field.update", &field.entity_definition_id, None)
            .await;
        Ok(field)
    }

    /// Delete a field. Relation fields take their paired field and every
    /// edge owned by either side with them; a half-deleted pair is never
    /// observable.
    pub async fn delete_field(&self, field_id: &Id, ctx: &UserContext) -> CoreResult<()> {
        self.require_schema_access(ctx)?;
        let field = self
            .store
            .get_field(field_id)
            .await?
            .ok_or_else(|| CoreError::not_found("field", field_id))?;

        let mut doomed = vec![field.id.clone()];
        if field.is_relation() {
            self.store.delete_edges_for_field(&field.id).await?;
            if let Some(partner_id) = &field.relation_field_id {
                self.store.delete_edges_for_field(partner_id).await?;
                doomed.push(partner_id.clone());
            }
        }
        self.store.delete_fields(&doomed).await?;
        self.hook
            .after_write("field.delete", &field.entity_definition_id, None)
            .await;
        Ok(())
    }

    fn require_schema_access(&self, ctx: &UserContext) -> CoreResult<()> {
        if !self.authorizer.can_manage_schema(ctx) {
            return Err(CoreError::forbidden("schema changes need a privileged caller"));
        }
        Ok(())
    }
}

/// Name for a synthesized paired field, derived from the owning
/// definition: multi-cardinality sides get a crude plural.
fn synthesized_partner_name(owner_name: &str, partner_kind: FieldKind) -> String {
    let base = owner_name.to_lowercase().replace(' ', "_");
    if partner_kind.is_single_cardinality() {
        base
    } else if base.ends_with('s') {
        format!("{}_items", base)
    } else {
        format!("{}s", base)
    }
}
