use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AgentConfig;
use crate::llm::{Brain, ChatModel, LlmError};
use crate::message::{last_assistant, Message};
use crate::registry::{ToolError, ToolRegistry};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Model(#[from] LlmError),

    #[error("model requested unknown tool '{0}'")]
    UnknownTool(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("no final answer after {0} model calls")]
    IterationLimit(usize),

    #[error("transcript contains no assistant message")]
    NoReply,
}

/// A chat model bound to a tool set.
///
/// Each call runs the model, executes any tools it asks for, feeds the
/// results back, and stops at the first reply that requests no tools.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: ToolRegistry,
    system_prompt: String,
    max_iterations: usize,
}

impl Agent {
    /// Agent backed by the configured Claude model.
    pub fn new(config: &AgentConfig, tools: ToolRegistry) -> Self {
        Self::with_model(Arc::new(Brain::new(config)), tools, config)
    }

    pub fn with_model(model: Arc<dyn ChatModel>, tools: ToolRegistry, config: &AgentConfig) -> Self {
        info!(
            "Agent ready: model '{}', {} tools",
            model.model(),
            tools.len()
        );
        Self {
            model,
            tools,
            system_prompt: config.system_prompt.clone(),
            max_iterations: config.max_iterations,
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// False when any tool has lost its backing connection. A caller that
    /// caches the agent should build a fresh one.
    pub fn is_healthy(&self) -> bool {
        self.tools().iter().all(|tool| tool.is_available())
    }

    /// Answer a single prompt.
    pub async fn invoke(&self, prompt: &str) -> Result<Message, AgentError> {
        self.invoke_with_messages(&[Message::human(prompt)]).await
    }

    /// Continue a conversation. `history` holds the prior human and
    /// assistant turns, oldest first.
    pub async fn invoke_with_messages(&self, history: &[Message]) -> Result<Message, AgentError> {
        let transcript = self.run(history).await?;
        last_assistant(&transcript)
            .cloned()
            .ok_or(AgentError::NoReply)
    }

    /// Run the loop and return the full transcript, system prompt included.
    pub async fn run(&self, history: &[Message]) -> Result<Vec<Message>, AgentError> {
        let mut transcript = Vec::with_capacity(history.len() + 2);
        if !self.system_prompt.is_empty() {
            transcript.push(Message::system(self.system_prompt.as_str()));
        }
        transcript.extend_from_slice(history);

        let schemas = self.tools.schemas();

        for iteration in 1..=self.max_iterations {
            let reply = self.model.complete(&transcript, &schemas).await?;
            let calls = reply.tool_calls().to_vec();
            transcript.push(reply);

            if calls.is_empty() {
                debug!("final answer after {} model calls", iteration);
                return Ok(transcript);
            }

            for call in calls {
                let tool = self
                    .tools
                    .get(&call.name)
                    .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

                info!("Calling tool '{}'", call.name);
                debug!("arguments: {}", call.arguments);
                let output = tool.invoke(call.arguments.clone()).await.map_err(|e| {
                    warn!("Tool '{}' failed: {}", call.name, e);
                    e
                })?;
                transcript.push(Message::tool_result(call.id, call.name, output.content));
            }
        }

        Err(AgentError::IterationLimit(self.max_iterations))
    }
}
