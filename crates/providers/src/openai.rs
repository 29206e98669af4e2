use async_trait::async_trait;
use replayscan_core::{ChatMessage, Error, LLMResponse, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::{build_http_client, classify_http_error};
use crate::{preview, Provider};

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// Any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Self {
        Self::new_with_proxy(api_key, api_base, model, max_tokens, temperature, None, None, &[])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new_with_proxy(
        api_key: &str,
        api_base: Option<&str>,
        model: &str,
        max_tokens: u32,
        temperature: f32,
        provider_proxy: Option<&str>,
        global_proxy: Option<&str>,
        no_proxy: &[String],
    ) -> Self {
        let resolved_base = api_base
            .unwrap_or(OPENAI_API_BASE)
            .trim_end_matches('/')
            .to_string();
        let client = build_http_client(
            provider_proxy,
            global_proxy,
            no_proxy,
            &resolved_base,
            Duration::from_secs(300),
        );
        Self {
            client,
            api_key: api_key.to_string(),
            api_base: resolved_base,
            // "openai/gpt-4o" style prefixes are routing hints, not model ids.
            model: model.strip_prefix("openai/").unwrap_or(model).to_string(),
            max_tokens,
            temperature,
        }
    }

    fn build_request(&self, messages: &[ChatMessage]) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

fn into_response(chat_response: ChatResponse) -> Result<LLMResponse> {
    let choice = chat_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

    let finish_reason = choice.finish_reason.unwrap_or_else(|| "stop".to_string());
    if finish_reason == "content_filter" {
        return Err(Error::ContentFiltered(
            "completion stopped by content filter".to_string(),
        ));
    }

    let content = choice.message.content.unwrap_or_default();
    Ok(LLMResponse {
        content: if content.is_empty() { None } else { Some(content) },
        finish_reason,
        usage: chat_response.usage.unwrap_or(Value::Null),
    })
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let request = self.build_request(messages);

        info!(url = %url, model = %self.model, messages_count = messages.len(), "Calling LLM");

        let request_body = serde_json::to_string(&request)
            .map_err(|e| Error::Provider(format!("Failed to serialize request: {}", e)))?;
        debug!(body_len = request_body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %preview(&raw_body), "LLM API error");
            return Err(classify_http_error("OpenAI", status, &raw_body));
        }

        debug!(body_len = raw_body.len(), preview = %preview(&raw_body), "LLM raw response");

        let chat_response: ChatResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Provider(format!(
                "Failed to parse response: {}. Body: {}",
                e,
                preview(&raw_body)
            ))
        })?;

        into_response(chat_response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let p = OpenAIProvider::new("sk", Some("https://relay.example/v1/"), "openai/gpt-4o", 512, 0.1);
        assert_eq!(p.api_base, "https://relay.example/v1");
        let req = p.build_request(&[ChatMessage::system("s"), ChatMessage::user("u")]);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"], "gpt-4o");
        assert_eq!(v["messages"][1]["role"], "user");
        assert_eq!(v["max_tokens"], 512);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"choices":[{"message":{"content":"{\"ok\":true}"},"finish_reason":"stop"}],"usage":{"total_tokens":12}}"#;
        let resp = into_response(serde_json::from_str(raw).unwrap()).unwrap();
        assert_eq!(resp.content.as_deref(), Some("{\"ok\":true}"));
        assert_eq!(resp.usage["total_tokens"], 12);
    }

    #[test]
    fn test_content_filter_finish_reason() {
        let raw = r#"{"choices":[{"message":{"content":null},"finish_reason":"content_filter"}]}"#;
        let err = into_response(serde_json::from_str(raw).unwrap()).unwrap_err();
        assert!(matches!(err, Error::ContentFiltered(_)));
    }

    #[test]
    fn test_empty_choices_is_error() {
        let err = into_response(serde_json::from_str(r#"{"choices":[]}"#).unwrap()).unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}
