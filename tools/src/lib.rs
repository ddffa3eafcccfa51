//! Tools available to the agent: two local ones plus whatever the
//! configured knowledge server offers.

mod datetime;
mod weather;

use std::sync::Arc;

use agent_core::mcp::{load_remote_tools, McpError};
use agent_core::registry::{ToolError, ToolRegistry};
use agent_core::AgentConfig;
use thiserror::Error;
use tracing::info;

pub use datetime::{format_datetime, DateTimeTool};
pub use weather::WeatherTool;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("knowledge server: {0}")]
    Remote(#[from] McpError),

    #[error(transparent)]
    Registry(#[from] ToolError),
}

/// Registry holding only the local tools.
pub fn local_tools() -> Result<ToolRegistry, ToolError> {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WeatherTool))?;
    registry.register(Arc::new(DateTimeTool::new()))?;
    Ok(registry)
}

/// Build the full tool registry: remote tools first, then the local ones.
pub async fn load_tools(config: &AgentConfig) -> Result<ToolRegistry, LoadError> {
    let mut registry = ToolRegistry::new();

    if let Some(server) = &config.mcp {
        for tool in load_remote_tools(server).await? {
            registry.register(tool)?;
        }
    }

    for tool in local_tools()?.iter() {
        registry.register(Arc::clone(tool))?;
    }

    info!("Loaded {} tools: {}", registry.len(), registry.names().join(", "));
    Ok(registry)
}
