/// Server setup and initialization
///
/// Wires together all components: database, automation storage and registry,
/// execution recorder, executor, dispatcher and HTTP routes.
/// Provides the main application factory function for creating the Axum app.

use crate::{
    api::{create_api_routes, AppState},
    automation::{registry::AutomationRegistry, storage::AutomationStorage},
    config::Config,
    db,
    recorder::{ExecutionRecorder, SqliteRecorder},
    runtime::{EventDispatcher, HttpInvoker, TriggerMatcher, WorkflowExecutor},
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes and middleware
///
/// Connects to the configured database and builds the application on it.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("🏗️ Connecting to database: {}", config.database.url);
    let pool = db::connect(&config.database.url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?;

    create_app_with_pool(config, pool).await
}

/// Build the application on an existing pool (tests use an in-memory one)
pub async fn create_app_with_pool(config: Config, pool: SqlitePool) -> Result<Router> {
    tracing::info!("📋 Initializing automation storage");
    let storage = AutomationStorage::new(pool.clone());
    storage.init_schema().await?;

    tracing::info!("📝 Initializing execution recorder");
    let sqlite_recorder = SqliteRecorder::new(pool);
    sqlite_recorder
        .init_schema()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize execution recorder: {}", e))?;
    let recorder: Arc<dyn ExecutionRecorder> = Arc::new(sqlite_recorder);

    tracing::info!("📊 Initializing automation registry");
    let registry = Arc::new(AutomationRegistry::new(storage.clone()));

    tracing::info!("📥 Loading existing automations from storage");
    registry
        .init_from_storage()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load automations from storage: {}", e))?;

    tracing::info!("🚀 Initializing workflow executor");
    let invoker = Arc::new(HttpInvoker::new()?);
    let executor = Arc::new(WorkflowExecutor::new(
        Arc::clone(&recorder),
        invoker,
        config.engine.executor_settings(),
    ));
    let dispatcher = EventDispatcher::new(TriggerMatcher::new(Arc::clone(&registry)), executor);

    let app_state = AppState {
        storage,
        registry,
        recorder,
        dispatcher,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        // Health check endpoint
        .route("/healthz", get(health_check))
        .merge(create_api_routes().with_state(app_state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // RUST_LOG controls verbosity; info by default
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting radflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
