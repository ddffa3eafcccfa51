use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.anthropic.com/v1";
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Use the available tools when they help answer the user.";
pub const DEFAULT_MAX_ITERATIONS: usize = 25;
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

const DEFAULT_MCP_COMMAND: &str = "npx";
const DEFAULT_MCP_ARGS: &str = "-y mcp-remote https://knowledge-mcp.global.api.aws";
const DEFAULT_MCP_SERVER_NAME: &str = "aws-knowledge-mcp-server";
const DEFAULT_MCP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name} has an invalid value '{value}'")]
    Invalid { name: &'static str, value: String },
}

/// How to launch the knowledge server that supplies remote tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

/// Everything the agent needs, read once at startup.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    pub api_key: String,
    pub api_base: String,
    pub system_prompt: String,
    pub max_iterations: usize,
    pub max_tokens: u32,
    /// `None` when remote tools are switched off.
    pub mcp: Option<McpServerConfig>,
}

impl AgentConfig {
    /// Read the configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(name))
        };

        let model = required("CLAUDE_MODEL")?;
        let api_key = required("ANTHROPIC_API_KEY")?;
        let api_base = lookup("ANTHROPIC_BASE_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        let system_prompt =
            lookup("AGENT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());
        let max_iterations =
            parse_or("AGENT_MAX_ITERATIONS", lookup("AGENT_MAX_ITERATIONS"), DEFAULT_MAX_ITERATIONS)?;
        let max_tokens = parse_or("AGENT_MAX_TOKENS", lookup("AGENT_MAX_TOKENS"), DEFAULT_MAX_TOKENS)?;

        if max_iterations == 0 {
            return Err(ConfigError::Invalid {
                name: "AGENT_MAX_ITERATIONS",
                value: "0".to_string(),
            });
        }

        let command = lookup("MCP_COMMAND").unwrap_or_else(|| DEFAULT_MCP_COMMAND.to_string());
        let mcp = if command.trim().is_empty() {
            None
        } else {
            let args = lookup("MCP_ARGS")
                .unwrap_or_else(|| DEFAULT_MCP_ARGS.to_string())
                .split_whitespace()
                .map(str::to_string)
                .collect();
            let timeout_secs =
                parse_or("MCP_TIMEOUT_SECS", lookup("MCP_TIMEOUT_SECS"), DEFAULT_MCP_TIMEOUT_SECS)?;
            Some(McpServerConfig {
                name: lookup("MCP_SERVER_NAME").unwrap_or_else(|| DEFAULT_MCP_SERVER_NAME.to_string()),
                command: command.trim().to_string(),
                args,
                timeout: Duration::from_secs(timeout_secs),
            })
        };

        Ok(Self {
            model,
            api_key,
            api_base,
            system_prompt,
            max_iterations,
            max_tokens,
            mcp,
        })
    }

    /// A config for tests and local runs: no remote tools, dummy credentials.
    pub fn offline(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_tokens: DEFAULT_MAX_TOKENS,
            mcp: None,
        }
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
    }
}
