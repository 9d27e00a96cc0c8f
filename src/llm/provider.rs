use async_trait::async_trait;

use crate::errors::PinpointResult;
use crate::llm::types::{CallConfig, ChatMessage};

/// A chat-completions backend, registered under its config.toml key.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One non-streaming completion; returns the assistant's text.
    async fn complete(&self, messages: &[ChatMessage], cfg: &CallConfig) -> PinpointResult<String>;
}
