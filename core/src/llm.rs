use std::collections::VecDeque;
use std::sync::Mutex;

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
        ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType,
        CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
    },
    Client,
};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::message::{Content, Message, ToolCall};
use crate::registry::ToolSchema;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model API error: {0}")]
    Api(#[from] OpenAIError),

    #[error("model returned no choices")]
    EmptyResponse,

    #[error("model sent malformed arguments for tool '{name}': {reason}")]
    MalformedToolCall { name: String, reason: String },

    #[error("model provider error: {0}")]
    Provider(String),
}

/// One round trip to a chat model: transcript plus tool menu in, one
/// assistant message out.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[Message], tools: &[ToolSchema])
        -> Result<Message, LlmError>;

    fn model(&self) -> &str;
}

/// Chat client for Claude through the OpenAI-compatible endpoint.
pub struct Brain {
    client: Client<OpenAIConfig>,
    model: String,
    max_tokens: u32,
}

impl Brain {
    pub fn new(config: &AgentConfig) -> Self {
        let openai = OpenAIConfig::new()
            .with_api_key(config.api_key.as_str())
            .with_api_base(config.api_base.as_str());
        let client = Client::with_config(openai);

        info!("Brain connected. Model: {}", config.model);
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl ChatModel for Brain {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
    ) -> Result<Message, LlmError> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(to_request_messages(messages)?)
            .max_completion_tokens(self.max_tokens);
        if !tools.is_empty() {
            args.tools(to_request_tools(tools)?);
        }
        let request = args.build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse)?;
        debug!("finish reason: {:?}", choice.finish_reason);

        assistant_from_parts(
            choice.message.content,
            choice.message.tool_calls.unwrap_or_default(),
        )
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Convert our transcript into the SDK's request messages.
pub fn to_request_messages(
    messages: &[Message],
) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    messages
        .iter()
        .map(|m| -> Result<ChatCompletionRequestMessage, OpenAIError> {
            let converted: ChatCompletionRequestMessage = match m {
                Message::System { content } => ChatCompletionRequestSystemMessageArgs::default()
                    .content(content.as_str())
                    .build()?
                    .into(),
                Message::Human { content } => ChatCompletionRequestUserMessageArgs::default()
                    .content(content.as_str())
                    .build()?
                    .into(),
                Message::Assistant {
                    content,
                    tool_calls,
                } => {
                    let mut args = ChatCompletionRequestAssistantMessageArgs::default();
                    if let Some(content) = content {
                        args.content(content.to_text());
                    }
                    if !tool_calls.is_empty() {
                        args.tool_calls(tool_calls.iter().map(to_sdk_tool_call).collect::<Vec<_>>());
                    }
                    args.build()?.into()
                }
                Message::Tool {
                    tool_call_id,
                    content,
                    ..
                } => ChatCompletionRequestToolMessageArgs::default()
                    .content(content.as_str())
                    .tool_call_id(tool_call_id.as_str())
                    .build()?
                    .into(),
            };
            Ok(converted)
        })
        .collect()
}

/// Convert registry schemas into the SDK's function-tool list.
pub fn to_request_tools(tools: &[ToolSchema]) -> Result<Vec<ChatCompletionTool>, OpenAIError> {
    tools
        .iter()
        .map(|t| -> Result<ChatCompletionTool, OpenAIError> {
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(
                    FunctionObjectArgs::default()
                        .name(&t.name)
                        .description(&t.description)
                        .parameters(t.parameters.clone())
                        .build()?,
                )
                .build()
        })
        .collect()
}

fn to_sdk_tool_call(call: &ToolCall) -> ChatCompletionMessageToolCall {
    ChatCompletionMessageToolCall {
        id: call.id.clone(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: call.name.clone(),
            arguments: call.arguments.to_string(),
        },
    }
}

/// Build an assistant message from the SDK's response fields.
pub fn assistant_from_parts(
    content: Option<String>,
    tool_calls: Vec<ChatCompletionMessageToolCall>,
) -> Result<Message, LlmError> {
    let tool_calls = tool_calls
        .into_iter()
        .map(|call| -> Result<ToolCall, LlmError> {
            let raw = call.function.arguments.trim();
            let arguments = if raw.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(raw).map_err(|e| LlmError::MalformedToolCall {
                    name: call.function.name.clone(),
                    reason: e.to_string(),
                })?
            };
            Ok(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments,
            })
        })
        .collect::<Result<Vec<_>, LlmError>>()?;

    Ok(Message::Assistant {
        content: content.filter(|c| !c.is_empty()).map(Content::Text),
        tool_calls,
    })
}

/// Scripted model for tests and offline demos. Replies are handed out in
/// order; every request transcript is recorded.
#[derive(Default)]
pub struct MockChatModel {
    replies: Mutex<VecDeque<Result<Message, String>>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl MockChatModel {
    pub fn new(replies: impl IntoIterator<Item = Message>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A model whose first call fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        let model = Self::default();
        model.push_error(reason);
        model
    }

    pub fn push_reply(&self, reply: Message) {
        lock(&self.replies).push_back(Ok(reply));
    }

    pub fn push_error(&self, reason: impl Into<String>) {
        lock(&self.replies).push_back(Err(reason.into()));
    }

    /// Transcripts received so far, one per call.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn complete(
        &self,
        messages: &[Message],
        _tools: &[ToolSchema],
    ) -> Result<Message, LlmError> {
        lock(&self.requests).push(messages.to_vec());
        match lock(&self.replies).pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(reason)) => Err(LlmError::Provider(reason)),
            None => Err(LlmError::EmptyResponse),
        }
    }

    fn model(&self) -> &str {
        "mock"
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
