use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
    Tool,
}

/// Message body. Models normally answer with text, but tool-aware
/// providers can hand back structured blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(Value),
}

impl Content {
    /// Text form of the content; structured content becomes JSON text.
    pub fn to_text(&self) -> String {
        match self {
            Content::Text(text) => text.clone(),
            Content::Structured(value) => value.to_string(),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One turn of a conversation. The role is fixed by the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    Human {
        content: String,
    },
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Content>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    /// A plain assistant reply with no tool calls.
    pub fn assistant(content: impl Into<Content>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::Human { .. } => Role::Human,
            Message::Assistant { .. } => Role::Assistant,
            Message::Tool { .. } => Role::Tool,
        }
    }

    /// The message text, if any. Structured assistant content is rendered as JSON.
    pub fn text(&self) -> Option<String> {
        match self {
            Message::System { content } | Message::Human { content } => Some(content.clone()),
            Message::Tool { content, .. } => Some(content.clone()),
            Message::Assistant { content, .. } => content.as_ref().map(Content::to_text),
        }
    }

    /// Tool calls carried by an assistant message.
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Last assistant-authored message in a transcript.
pub fn last_assistant(transcript: &[Message]) -> Option<&Message> {
    transcript
        .iter()
        .rev()
        .find(|m| m.role() == Role::Assistant)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_role_follows_variant() {
        assert_eq!(Message::system("s").role(), Role::System);
        assert_eq!(Message::human("h").role(), Role::Human);
        assert_eq!(Message::assistant("a").role(), Role::Assistant);
        assert_eq!(Message::tool_result("1", "t", "r").role(), Role::Tool);
    }

    #[test]
    fn test_structured_content_renders_as_json() {
        let msg = Message::Assistant {
            content: Some(Content::Structured(json!([{"type": "text", "text": "hi"}]))),
            tool_calls: Vec::new(),
        };
        let text = msg.text().unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed[0]["text"], "hi");
    }

    #[test]
    fn test_assistant_without_content_has_no_text() {
        let msg = Message::Assistant {
            content: None,
            tool_calls: vec![ToolCall {
                id: "call_1".to_string(),
                name: "get_weather".to_string(),
                arguments: json!({"city": "Tokyo"}),
            }],
        };
        assert!(msg.text().is_none());
        assert_eq!(msg.tool_calls().len(), 1);
    }

    #[test]
    fn test_last_assistant_scans_from_end() {
        let transcript = vec![
            Message::system("s"),
            Message::human("q1"),
            Message::assistant("first"),
            Message::human("q2"),
            Message::assistant("second"),
            Message::tool_result("1", "t", "r"),
        ];
        let last = last_assistant(&transcript).unwrap();
        assert_eq!(last.text().as_deref(), Some("second"));
    }

    #[test]
    fn test_last_assistant_none() {
        let transcript = vec![Message::human("hello")];
        assert!(last_assistant(&transcript).is_none());
    }

    #[test]
    fn test_serialized_role_tag() {
        let value = serde_json::to_value(Message::human("hi")).unwrap();
        assert_eq!(value, json!({"role": "human", "content": "hi"}));
    }
}
