use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

use crate::logic::{InstanceOps, SchemaOps};
use crate::model::{FieldKind, Id, NewEntityDefinition, NewFieldDef, TypeTier, UserContext};
use crate::store::traits::Store;

const DEMO_PROJECT: &str = "demo";

fn new_field(name: &str, kind: FieldKind) -> NewFieldDef {
    NewFieldDef {
        id: None,
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

/// Load a small demo content model (articles, authors, tags) so a fresh
/// server has something to browse. Skips when the model already exists.
pub async fn load_seed_data<S: Store>(store: &S) -> Result<()> {
    if store
        .get_entity_definition_by_storage_key("articles")
        .await?
        .is_some()
    {
        log::info!("seed data already present, skipping");
        return Ok(());
    }

    let ctx = UserContext::system();
    let schema = SchemaOps::new(store);

    let author = schema
        .create_definition(
            NewEntityDefinition {
                id: None,
                name: "Author".to_string(),
                storage_key: "authors".to_string(),
                tier: TypeTier::Secondary,
                permissions: None,
                page_policy: None,
                section_titles: None,
            },
            &ctx,
        )
        .await?;
    let mut name = new_field("name", FieldKind::String);
    name.required = Some(true);
    name.is_title = Some(true);
    name.searchable = Some(true);
    schema.create_field(&author.id, name, &ctx).await?;

    let tag = schema
        .create_definition(
            NewEntityDefinition {
                id: None,
                name: "Tag".to_string(),
                storage_key: "tags".to_string(),
                tier: TypeTier::Tertiary,
                permissions: None,
                page_policy: None,
                section_titles: None,
            },
            &ctx,
        )
        .await?;
    let mut label = new_field("label", FieldKind::String);
    label.required = Some(true);
    label.is_title = Some(true);
    schema.create_field(&tag.id, label, &ctx).await?;

    let article = schema
        .create_definition(
            NewEntityDefinition {
                id: None,
                name: "Article".to_string(),
                storage_key: "articles".to_string(),
                tier: TypeTier::Primary,
                permissions: None,
                page_policy: None,
                section_titles: None,
            },
            &ctx,
        )
        .await?;
    let mut title = new_field("title", FieldKind::String);
    title.required = Some(true);
    title.is_title = Some(true);
    title.searchable = Some(true);
    schema.create_field(&article.id, title, &ctx).await?;
    let mut body = new_field("body", FieldKind::String);
    body.searchable = Some(true);
    body.show_in_table = Some(false);
    schema.create_field(&article.id, body, &ctx).await?;
    let mut published = new_field("published", FieldKind::Boolean);
    published.filterable = Some(true);
    published.default_value = Some(crate::model::AttributeValue::Boolean(false));
    schema.create_field(&article.id, published, &ctx).await?;

    let mut author_rel = new_field("author", FieldKind::ManyToOne);
    author_rel.related_entity_definition_id = Some(author.id.clone());
    author_rel.filterable = Some(true);
    schema.create_field(&article.id, author_rel, &ctx).await?;
    let mut tags_rel = new_field("tags", FieldKind::ManyToMany);
    tags_rel.related_entity_definition_id = Some(tag.id.clone());
    tags_rel.filterable = Some(true);
    schema.create_field(&article.id, tags_rel, &ctx).await?;

    let instances = InstanceOps::new(store);
    let project = DEMO_PROJECT.to_string();

    let ada = create(&instances, &author.id, &project, &ctx, [("name", json!("Ada"))]).await?;
    let rust_tag = create(&instances, &tag.id, &project, &ctx, [("label", json!("rust"))]).await?;
    let db_tag = create(
        &instances,
        &tag.id,
        &project,
        &ctx,
        [("label", json!("databases"))],
    )
    .await?;

    create(
        &instances,
        &article.id,
        &project,
        &ctx,
        [
            ("title", json!("Runtime schemas without migrations")),
            ("body", json!("Define the record type first, ship later.")),
            ("published", json!(true)),
            ("author", json!(ada)),
            ("tags", json!([rust_tag, db_tag])),
        ],
    )
    .await?;

    log::info!("seed data loaded into project '{}'", DEMO_PROJECT);
    Ok(())
}

async fn create<S: Store, const N: usize>(
    instances: &InstanceOps<'_, S>,
    definition_id: &Id,
    project_id: &Id,
    ctx: &UserContext,
    payload: [(&str, serde_json::Value); N],
) -> Result<Id> {
    let payload: HashMap<String, serde_json::Value> = payload
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
    let view = instances
        .create_instance(definition_id, project_id, payload, ctx)
        .await
        .map_err(|e| anyhow::anyhow!("seed create failed: {}", e))?;
    Ok(view.instance.id)
}
