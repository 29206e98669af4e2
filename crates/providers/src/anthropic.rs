use async_trait::async_trait;
use replayscan_core::{ChatMessage, Error, LLMResponse, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::client::{build_http_client, classify_http_error};
use crate::{preview, Provider};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl AnthropicProvider {
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
            .unwrap_or(ANTHROPIC_API_BASE)
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
            model: model.to_string(),
            max_tokens,
            temperature,
        }
    }

    /// Split out the system prompt; Anthropic takes it as a top-level field
    /// and requires user/assistant turns to alternate.
    fn convert_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<Value>) {
        let mut system_text: Option<String> = None;
        let mut turns: Vec<(String, String)> = Vec::new();

        for msg in messages {
            if msg.role == "system" {
                system_text = Some(match system_text {
                    Some(existing) => format!("{}\n\n{}", existing, msg.content),
                    None => msg.content.clone(),
                });
                continue;
            }
            let role = if msg.role == "assistant" { "assistant" } else { "user" };
            match turns.last_mut() {
                Some((last_role, text)) if last_role == role => {
                    text.push_str("\n\n");
                    text.push_str(&msg.content);
                }
                _ => turns.push((role.to_string(), msg.content.clone())),
            }
        }

        let converted = turns
            .into_iter()
            .map(|(role, content)| json!({"role": role, "content": content}))
            .collect();
        (system_text, converted)
    }

    fn normalize_model(model: &str) -> &str {
        model.strip_prefix("anthropic/").unwrap_or(model)
    }

    fn build_request(&self, messages: &[ChatMessage]) -> Value {
        let (system, converted) = Self::convert_messages(messages);
        let mut request = json!({
            "model": Self::normalize_model(&self.model),
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "messages": converted,
        });
        if let Some(sys) = system {
            request["system"] = Value::String(sys);
        }
        request
    }
}

fn into_response(resp: AnthropicResponse) -> Result<LLMResponse> {
    if resp.stop_reason.as_deref() == Some("refusal") {
        return Err(Error::ContentFiltered("model refused the request".to_string()));
    }

    let text_parts: Vec<String> = resp
        .content
        .iter()
        .filter(|b| b.block_type == "text")
        .filter_map(|b| b.text.clone())
        .filter(|t| !t.is_empty())
        .collect();

    let finish_reason = match resp.stop_reason.as_deref() {
        Some("end_turn") | None => "stop".to_string(),
        Some("max_tokens") => "length".to_string(),
        Some(other) => other.to_string(),
    };

    let usage = json!({
        "prompt_tokens": resp.usage.as_ref().and_then(|u| u.input_tokens),
        "completion_tokens": resp.usage.as_ref().and_then(|u| u.output_tokens),
    });

    Ok(LLMResponse {
        content: if text_parts.is_empty() {
            None
        } else {
            Some(text_parts.join("\n"))
        },
        finish_reason,
        usage,
    })
}

#[async_trait]
impl Provider for AnthropicProvider {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse> {
        let url = format!("{}/messages", self.api_base);
        let request = self.build_request(messages);

        info!(
            url = %url,
            model = %Self::normalize_model(&self.model),
            messages_count = messages.len(),
            "Calling Anthropic API"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %preview(&raw_body), "Anthropic API error");
            return Err(classify_http_error("Anthropic", status, &raw_body));
        }

        debug!(body_len = raw_body.len(), "Anthropic raw response");

        let resp: AnthropicResponse = serde_json::from_str(&raw_body).map_err(|e| {
            Error::Provider(format!(
                "Failed to parse Anthropic response: {}. Body: {}",
                e,
                preview(&raw_body)
            ))
        })?;

        let parsed = into_response(resp)?;
        info!(
            content_len = parsed.content.as_ref().map(|c| c.len()).unwrap_or(0),
            finish_reason = %parsed.finish_reason,
            "Anthropic response parsed"
        );
        Ok(parsed)
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}
