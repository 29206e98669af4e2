pub mod anthropic;
pub mod client;
pub mod factory;
pub mod openai;

use async_trait::async_trait;
use replayscan_core::{ChatMessage, LLMResponse, Result};

/// A chat-completion backend. Implementations map quota replies to
/// `Error::RateLimited` and policy refusals to `Error::ContentFiltered`.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<LLMResponse>;
}

pub use anthropic::AnthropicProvider;
pub use factory::{create_provider, infer_provider_from_model};
pub use openai::OpenAIProvider;

/// First 500 bytes of a response body, for logs and error messages.
pub(crate) fn preview(body: &str) -> &str {
    replayscan_core::safe_truncate(body, 500)
}
