use axum::{
    routing::{delete, get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::api::handlers::{self, AppState};
use crate::store::traits::Store;

pub fn create_router<S: Store + 'static>() -> Router<AppState<S>> {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Entity definition management
        .route("/entity-definitions", get(handlers::list_definitions::<S>))
        .route("/entity-definitions", post(handlers::create_definition::<S>))
        .route(
            "/entity-definitions/:definition_id",
            get(handlers::get_definition::<S>),
        )
        .route(
            "/entity-definitions/:definition_id",
            patch(handlers::update_definition::<S>),
        )
        .route(
            "/entity-definitions/:definition_id",
            delete(handlers::delete_definition::<S>),
        )
        // Field management
        .route(
            "/entity-definitions/:definition_id/fields",
            get(handlers::list_fields::<S>),
        )
        .route(
            "/entity-definitions/:definition_id/fields",
            post(handlers::create_field::<S>),
        )
        .route("/fields/:field_id", patch(handlers::update_field::<S>))
        .route("/fields/:field_id", delete(handlers::delete_field::<S>))
        // Instances, scoped by project and type
        .route(
            "/projects/:project_id/types/:definition_id/instances",
            get(handlers::list_instances::<S>),
        )
        .route(
            "/projects/:project_id/types/:definition_id/instances",
            post(handlers::create_instance::<S>),
        )
        .route("/instances/:instance_id", get(handlers::get_instance::<S>))
        .route(
            "/instances/:instance_id",
            patch(handlers::update_instance::<S>),
        )
        .route(
            "/instances/:instance_id",
            delete(handlers::delete_instance::<S>),
        )
        // Selector options
        .route(
            "/entity-definitions/:definition_id/options",
            get(handlers::get_options::<S>),
        )
        .layer(CorsLayer::permissive())
}
