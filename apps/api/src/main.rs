mod config;
mod errors;
mod interview;
mod llm_client;
mod pdf;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::interview::engine::InterviewEngine;
use crate::interview::store::{InMemorySessionStore, RedisSessionStore, SessionStore};
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting interviewer API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize LLM client
    let llm = LlmClient::new(
        config.anthropic_api_key.clone(),
        config.llm_timeout,
        config.llm_max_retries,
    )?;
    info!(
        "LLM client initialized (model: {}, timeout: {}s, retries: {})",
        llm_client::MODEL,
        config.llm_timeout.as_secs(),
        config.llm_max_retries
    );

    // Initialize session store (Redis when configured, process memory otherwise)
    let store: Arc<dyn SessionStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisSessionStore::connect(url, config.session_ttl).await?),
        None => {
            info!("REDIS_URL not set, sessions are kept in memory");
            Arc::new(InMemorySessionStore::new())
        }
    };

    let engine = InterviewEngine::new(Arc::new(llm), store, config.llm_timeout);
    let state = AppState {
        engine: Arc::new(engine),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
