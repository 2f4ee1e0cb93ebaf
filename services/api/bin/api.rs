//! Main Entrypoint for the Sage API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the storage backend and memory system.
//! 3. Wiring the provider adapters and the orchestrator.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use sage_api::{
    config::{Config, Provider},
    router::create_router,
    state::AppState,
};
use sage_core::provider::gemini::GeminiAdapter;
use sage_core::provider::openai::OpenAiAdapter;
use sage_core::{
    InMemoryStore, JsonFileStore, KeyValueStore, LanguageProvider, MemorySystem, Orchestrator,
    ProviderId,
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Storage and Memory ---
    let store: Arc<dyn KeyValueStore> = match &config.storage_path {
        Some(path) => {
            info!(path = %path.display(), "Using JSON file storage");
            Arc::new(JsonFileStore::new(path)?)
        }
        None => {
            info!("Using in-memory storage");
            Arc::new(InMemoryStore::new())
        }
    };
    let memory = Arc::new(MemorySystem::new(store));

    // --- 4. Wire Providers and the Orchestrator ---
    let default_provider = match config.provider {
        Provider::OpenAI => ProviderId::OpenAi,
        Provider::Gemini => ProviderId::Gemini,
    };
    let mut provider = LanguageProvider::new(default_provider);
    if let Some(api_key) = &config.openai_api_key {
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        provider = provider.with_adapter(Arc::new(OpenAiAdapter::new(
            openai_config,
            config.chat_model.clone(),
        )));
    }
    if let Some(api_key) = &config.gemini_api_key {
        provider = provider.with_adapter(Arc::new(GeminiAdapter::new(
            api_key.clone(),
            config.gemini_model.clone(),
        )));
    }

    let orchestrator = Orchestrator::new(Arc::new(provider), memory);
    orchestrator
        .initialize()
        .await
        .context("Failed to initialize the agent")?;

    let app_state = Arc::new(AppState {
        orchestrator,
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
