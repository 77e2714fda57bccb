pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod seed;
pub mod store;

// Export API types
pub use api::{create_router, AppContext, AppState};

// Export the error taxonomy
pub use error::{CoreError, CoreResult};

// Export logic types
pub use logic::{
    partition_payload, AllowAll, Authorizer, CompiledFilter, ExprAuthorizer, FilterCompiler,
    InstanceOps, InstanceReader, LoggingHook, NoopHook, OptionResolver, SchemaOps, WriteHook,
};

// Export all model types
pub use model::*;

// Export store types
pub use store::{
    EdgeStore, EntityDefStore, FieldStore, InstanceRowStore, MemoryStore, PostgresStore, Store,
};

// Function for integration testing
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with INFO level only (suppress DEBUG logs)
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    // Load configuration
    let config = crate::config::AppConfig::load()?;

    // Connect to PostgreSQL
    let database_url = config.database_url()?;
    let postgres_store = crate::store::PostgresStore::new(&database_url).await?;

    // Run migrations
    postgres_store.migrate().await?;

    let state = Arc::new(AppContext::with_core_config(
        Arc::new(postgres_store),
        &config.core,
    ));

    // Create router with state
    let app = crate::api::routes::create_router().with_state(state);

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;

    serve(listener, app).await?;

    Ok(())
}
