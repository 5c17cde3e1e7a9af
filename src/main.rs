//! App Forge - AI app-generation orchestration server
//!
//! Guides a user from a one-line idea through clarification, design and
//! planning to a generated app, streaming progress as it goes.

mod agent;
mod api;
mod app_spec;
mod config;
mod conversation;
mod error;
mod event_bus;
mod generation;
mod llm;
mod migration;
mod runtime;
mod store;

use api::{create_router, AppState};
use config::ServerConfig;
use event_bus::EventBus;
use llm::LlmConfig;
use runtime::Orchestrator;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use store::SqliteStore;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "app_forge=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = ServerConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = PathBuf::from(&config.db_path).parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path, "Opening database");
    let store = Arc::new(SqliteStore::open(&config.db_path)?);

    let llm = llm::connect(&LlmConfig::from_env());
    match &llm {
        Some(service) => tracing::info!(model = %service.model_id(), "Model client ready"),
        None => tracing::warn!(
            "No model configured, running model-free. Set ANTHROPIC_API_KEY or LLM_GATEWAY."
        ),
    }

    let bus = Arc::new(EventBus::new(config.bus));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        bus,
        llm,
        config.agent,
        config.connect_wait,
    ));
    let state = AppState::new(orchestrator, config.environment)
        .with_keep_alive(config.bus.heartbeat_interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let compression = CompressionLayer::new()
        .gzip(true)
        .br(true)
        .deflate(true)
        .zstd(true);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(compression);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(environment = ?config.environment, "App Forge server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
