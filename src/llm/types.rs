//! Wire types for OpenAI-style chat completions and tool calls.
use serde::{Deserialize, Serialize};

/// One chat turn. Only user turns are ever sent: every model question is single-shot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

impl ChatMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self { role: "user".into(), content: MessageContent::Text(text.into()) }
    }

    /// Prompt plus a PNG screenshot sent inline as a data URL.
    pub fn user_with_image(text: impl Into<String>, png_base64: &str) -> Self {
        let image = ContentPart::ImageUrl {
            image_url: ImageUrl { url: format!("data:image/png;base64,{png_base64}") },
        };
        Self {
            role: "user".into(),
            content: MessageContent::Parts(vec![ContentPart::Text { text: text.into() }, image]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Model and sampling settings for one request, resolved from a [`Role`](super::Role).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    pub model: String,
    pub temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A tool invocation produced by the agent's planner; `arguments` is a JSON object string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// Schema of one built-in tool, in the `tools` array format of chat-completions APIs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    #[serde(rename = "type", default = "function_type")]
    pub def_type: String,
    pub function: FunctionDef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

fn function_type() -> String {
    "function".into()
}
