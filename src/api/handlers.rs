use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::logic::{
    Authorizer, ExprAuthorizer, InstanceOps, InstanceReader, LoggingHook, OptionResolver,
    SchemaOps, WriteHook,
};
use crate::model::{
    EntityDefinition, EntityDefinitionUpdate, EntityDefinitionWithFields, FieldDef,
    FieldDefUpdate, FilterSpec, Id, InstancePage, InstanceView, ListQuery, NewEntityDefinition,
    NewFieldDef, OptionRef, SortDirection, UserContext,
};
use crate::store::traits::Store;

/// Shared application context handed to every handler
pub struct AppContext<S: Store> {
    pub store: Arc<S>,
    pub options: Arc<OptionResolver<S>>,
    pub authorizer: Arc<dyn Authorizer>,
    pub hook: Arc<dyn WriteHook>,
    pub strict_unknown_keys: bool,
}

pub type AppState<S> = Arc<AppContext<S>>;

impl<S: Store> AppContext<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_core_config(store, &CoreConfig::default())
    }

    pub fn with_core_config(store: Arc<S>, core: &CoreConfig) -> Self {
        Self {
            options: Arc::new(OptionResolver::with_ttl(
                store.clone(),
                Duration::from_secs(core.options_ttl_secs),
            )),
            store,
            authorizer: Arc::new(ExprAuthorizer),
            hook: Arc::new(LoggingHook),
            strict_unknown_keys: core.strict_unknown_keys,
        }
    }

    fn schema_ops(&self) -> SchemaOps<'_, S> {
        SchemaOps::new(self.store.as_ref())
            .with_authorizer(self.authorizer.as_ref())
            .with_hook(self.hook.as_ref())
    }

    fn instance_ops(&self) -> InstanceOps<'_, S> {
        InstanceOps::new(self.store.as_ref())
            .with_authorizer(self.authorizer.as_ref())
            .with_hook(self.hook.as_ref())
            .with_unknown_key_policy(self.strict_unknown_keys)
    }

    fn reader(&self) -> InstanceReader<'_, S> {
        InstanceReader::new(self.store.as_ref(), self.options.as_ref())
    }
}

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(error: CoreError) -> ApiError {
    match &error {
        CoreError::Validation(_) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(&error.to_string())),
        ),
        CoreError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(&error.to_string())),
        ),
        CoreError::Conflict(_) => (
            StatusCode::CONFLICT,
            Json(ErrorResponse::new(&error.to_string())),
        ),
        CoreError::Forbidden(_) => (
            StatusCode::FORBIDDEN,
            Json(ErrorResponse::new(&error.to_string())),
        ),
        CoreError::Store(cause) => {
            // Persistence failures stay opaque to the caller
            log::error!("store failure: {:#}", cause);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("internal storage failure")),
            )
        }
    }
}

// ---- entity definitions ----

pub async fn list_definitions<S: Store>(
    State(state): State<AppState<S>>,
) -> Result<Json<ListResponse<EntityDefinition>>, ApiError> {
    let items = state
        .schema_ops()
        .list_definitions()
        .await
        .map_err(error_response)?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}

pub async fn get_definition<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
) -> Result<Json<EntityDefinitionWithFields>, ApiError> {
    state
        .schema_ops()
        .get_definition_with_fields(&definition_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_definition<S: Store>(
    State(state): State<AppState<S>>,
    ctx: UserContext,
    Json(new_definition): Json<NewEntityDefinition>,
) -> Result<(StatusCode, Json<EntityDefinition>), ApiError> {
    state
        .schema_ops()
        .create_definition(new_definition, &ctx)
        .await
        .map(|definition| (StatusCode::CREATED, Json(definition)))
        .map_err(error_response)
}

pub async fn update_definition<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
    ctx: UserContext,
    Json(update): Json<EntityDefinitionUpdate>,
) -> Result<Json<EntityDefinition>, ApiError> {
    state
        .schema_ops()
        .update_definition(&definition_id, update, &ctx)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct DeleteDefinitionQuery {
    pub cascade: Option<bool>,
}

pub async fn delete_definition<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
    Query(query): Query<DeleteDefinitionQuery>,
    ctx: UserContext,
) -> Result<StatusCode, ApiError> {
    state
        .schema_ops()
        .delete_definition(&definition_id, query.cascade.unwrap_or(false), &ctx)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// ---- fields ----

pub async fn list_fields<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
) -> Result<Json<ListResponse<FieldDef>>, ApiError> {
    let composite = state
        .schema_ops()
        .get_definition_with_fields(&definition_id)
        .await
        .map_err(error_response)?;
    let total = composite.fields.len();
    Ok(Json(ListResponse {
        items: composite.fields,
        total,
    }))
}

pub async fn create_field<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
    ctx: UserContext,
    Json(new_field): Json<NewFieldDef>,
) -> Result<(StatusCode, Json<FieldDef>), ApiError> {
    state
        .schema_ops()
        .create_field(&definition_id, new_field, &ctx)
        .await
        .map(|field| (StatusCode::CREATED, Json(field)))
        .map_err(error_response)
}

pub async fn update_field<S: Store>(
    State(state): State<AppState<S>>,
    Path(field_id): Path<Id>,
    ctx: UserContext,
    Json(update): Json<FieldDefUpdate>,
) -> Result<Json<FieldDef>, ApiError> {
    state
        .schema_ops()
        .update_field(&field_id, update, &ctx)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_field<S: Store>(
    State(state): State<AppState<S>>,
    Path(field_id): Path<Id>,
    ctx: UserContext,
) -> Result<StatusCode, ApiError> {
    state
        .schema_ops()
        .delete_field(&field_id, &ctx)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// ---- instances ----

#[derive(Debug, Deserialize)]
pub struct ListInstancesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub search: Option<String>,
    /// Comma-separated relation field names to include
    pub include: Option<String>,
    /// JSON-encoded list of filter specs
    pub filters: Option<String>,
    pub order_by: Option<String>,
    pub order: Option<SortDirection>,
    pub relations_as_ids: Option<bool>,
}

fn parse_list_query(query: ListInstancesQuery) -> Result<ListQuery, ApiError> {
    let filters: Vec<FilterSpec> = match query.filters.as_deref().filter(|f| !f.is_empty()) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| {
            error_response(CoreError::validation(format!("malformed filters: {}", e)))
        })?,
        None => Vec::new(),
    };
    let include_relations = query
        .include
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(ListQuery {
        limit: query.limit,
        offset: query.offset.unwrap_or(0),
        include_relations,
        relations_as_ids: query.relations_as_ids.unwrap_or(false),
        filters,
        search: query.search,
        order_by: query.order_by,
        order: query.order,
    })
}

pub async fn list_instances<S: Store>(
    State(state): State<AppState<S>>,
    Path((project_id, definition_id)): Path<(Id, Id)>,
    Query(query): Query<ListInstancesQuery>,
) -> Result<Json<InstancePage>, ApiError> {
    let query = parse_list_query(query)?;
    state
        .reader()
        .get_instances(&definition_id, &project_id, &query)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn create_instance<S: Store>(
    State(state): State<AppState<S>>,
    Path((project_id, definition_id)): Path<(Id, Id)>,
    ctx: UserContext,
    Json(payload): Json<HashMap<String, serde_json::Value>>,
) -> Result<(StatusCode, Json<InstanceView>), ApiError> {
    state
        .instance_ops()
        .create_instance(&definition_id, &project_id, payload, &ctx)
        .await
        .map(|view| (StatusCode::CREATED, Json(view)))
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct GetInstanceQuery {
    /// Comma-separated relation field names; all relation fields when
    /// absent
    pub include: Option<String>,
    pub relations_as_ids: Option<bool>,
}

pub async fn get_instance<S: Store>(
    State(state): State<AppState<S>>,
    Path(instance_id): Path<Id>,
    Query(query): Query<GetInstanceQuery>,
) -> Result<Json<InstanceView>, ApiError> {
    let names: Option<Vec<String>> = query.include.as_deref().map(|raw| {
        raw.split(',')
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect()
    });
    state
        .reader()
        .get_instance_by_id(
            &instance_id,
            names.as_deref(),
            query.relations_as_ids.unwrap_or(false),
        )
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn update_instance<S: Store>(
    State(state): State<AppState<S>>,
    Path(instance_id): Path<Id>,
    ctx: UserContext,
    Json(payload): Json<HashMap<String, serde_json::Value>>,
) -> Result<Json<InstanceView>, ApiError> {
    state
        .instance_ops()
        .update_instance(&instance_id, payload, &ctx)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn delete_instance<S: Store>(
    State(state): State<AppState<S>>,
    Path(instance_id): Path<Id>,
    ctx: UserContext,
) -> Result<StatusCode, ApiError> {
    state
        .instance_ops()
        .delete_instance(&instance_id, &ctx)
        .await
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(error_response)
}

// ---- options ----

pub async fn get_options<S: Store>(
    State(state): State<AppState<S>>,
    Path(definition_id): Path<Id>,
) -> Result<Json<ListResponse<OptionRef>>, ApiError> {
    let items = state
        .options
        .options_for_type(&definition_id)
        .await
        .map_err(error_response)?;
    let total = items.len();
    Ok(Json(ListResponse { items, total }))
}
