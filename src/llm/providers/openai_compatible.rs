use async_trait::async_trait;

use crate::errors::{PinpointError, PinpointResult};
use crate::llm::provider::LlmProvider;
use crate::llm::types::{CallConfig, ChatMessage};

pub struct OpenAiCompatibleProvider {
    id: String,
    api_base: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatibleProvider {
    pub fn new(id: String, api_base: String, api_key: String) -> Self {
        Self {
            id,
            api_base,
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.id
    }

    async fn complete(&self, messages: &[ChatMessage], cfg: &CallConfig) -> PinpointResult<String> {
        let mut body = serde_json::json!({
            "model": cfg.model,
            "messages": messages,
            "stream": false,
            "temperature": cfg.temperature,
        });
        if let Some(max_tokens) = cfg.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        tracing::debug!(provider = %self.id, model = %cfg.model, "sending completion request");
        tracing::debug!(body = %sanitized_for_log(&body), "request body");

        let response = self
            .client
            .post(&self.api_base)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err_body = response.text().await.unwrap_or_default();
            return Err(PinpointError::LlmProvider(format!("{status}: {err_body}")));
        }

        let json: serde_json::Value = response.json().await?;
        let content = completion_text(&json)?;
        tracing::info!(provider = %self.id, content_len = content.len(), "completion received");
        Ok(content)
    }
}

/// Copy of the request body with image payloads replaced, for logging only.
fn sanitized_for_log(body: &serde_json::Value) -> String {
    let mut log_body = body.clone();
    if let Some(msgs) = log_body.get_mut("messages").and_then(|m| m.as_array_mut()) {
        for msg in msgs {
            // content can be string or array of parts; we only touch the array case.
            let Some(parts) = msg.get_mut("content").and_then(|c| c.as_array_mut()) else {
                continue;
            };
            for part in parts {
                if part.get("type").and_then(|t| t.as_str()) == Some("image_url") {
                    if let Some(url) = part.get_mut("image_url").and_then(|u| u.get_mut("url")) {
                        *url = serde_json::Value::String("<omitted_base64_image>".to_string());
                    }
                }
            }
        }
    }
    serde_json::to_string(&log_body).unwrap_or_default()
}

/// Assistant text of the first choice. A reply without choices is a provider error;
/// a choice with null content is an empty answer.
fn completion_text(json: &serde_json::Value) -> PinpointResult<String> {
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(PinpointError::LlmProvider(message.to_string()));
    }
    let choice = json["choices"]
        .get(0)
        .ok_or_else(|| PinpointError::LlmProvider("completion carried no choices".into()))?;
    Ok(choice["message"]["content"].as_str().unwrap_or("").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_trimmed() {
        let json = serde_json::json!({
            "choices": [
                {"message": {"role": "assistant", "content": " 3\n"}},
                {"message": {"role": "assistant", "content": "7"}}
            ]
        });
        assert_eq!(completion_text(&json).unwrap(), "3");
        let null_content = serde_json::json!({"choices": [{"message": {"content": null}}]});
        assert_eq!(completion_text(&null_content).unwrap(), "");
    }

    #[test]
    fn missing_choices_or_error_body_is_an_error() {
        assert!(completion_text(&serde_json::json!({})).is_err());
        let err = completion_text(&serde_json::json!({"error": {"message": "model not found"}}))
            .unwrap_err();
        assert_eq!(err.to_string(), "LLM provider error: model not found");
    }

    #[test]
    fn log_body_omits_images() {
        let msg = ChatMessage::user_with_image("where is OK?", "AAAA");
        let body = serde_json::json!({ "messages": [msg] });
        let logged = sanitized_for_log(&body);
        assert!(logged.contains("<omitted_base64_image>"));
        assert!(!logged.contains("AAAA"));
        assert!(logged.contains("where is OK?"));
    }
}
