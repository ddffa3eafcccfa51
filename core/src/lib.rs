pub mod agent;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod message;
pub mod registry;
pub mod rpc;

pub use agent::{Agent, AgentError};
pub use config::{AgentConfig, ConfigError, McpServerConfig};
pub use llm::{Brain, ChatModel, LlmError, MockChatModel};
pub use message::{Content, Message, Role, ToolCall};
pub use registry::{Tool, ToolError, ToolOutput, ToolRegistry, ToolSchema};
