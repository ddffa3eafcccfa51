mod api;
mod config;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_core::{Agent, AgentConfig};
use agent_tools::load_tools;

use crate::config::{ApiStyle, GatewayConfig};
use crate::routes::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // 1. Logging Setup
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    info!("Agent Gateway Initializing...");

    // 2. Configuration, read once and shared by reference
    let gateway = GatewayConfig::from_env()?;
    let agent_config = Arc::new(AgentConfig::from_env().context("invalid agent configuration")?);
    info!("Model: {}", agent_config.model);

    // 3. The agent (tools + model) is built on the first invoke, so /ping
    // answers even while the knowledge server is still unreachable.
    let state = AppState::new(move || {
        let config = Arc::clone(&agent_config);
        async move {
            let tools = load_tools(&config).await.context("failed to load tools")?;
            Ok::<_, anyhow::Error>(Agent::new(&config, tools))
        }
    });

    // 4. Define Routes
    let app = routes::router(gateway.api_style, state).layer(TraceLayer::new_for_http());

    // 5. Start Server
    let listener = TcpListener::bind(("0.0.0.0", gateway.port))
        .await
        .with_context(|| format!("failed to bind port {}", gateway.port))?;
    info!("Gateway listening on port {}...", gateway.port);
    info!("Health check: http://localhost:{}/ping", gateway.port);
    match gateway.api_style {
        ApiStyle::Basic => info!("Agent: POST http://localhost:{}/invoke", gateway.port),
        ApiStyle::Managed => info!("Agent: POST http://localhost:{}/invocations", gateway.port),
    }

    axum::serve(listener, app).await?;
    Ok(())
}
