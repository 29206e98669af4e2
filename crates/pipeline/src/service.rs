//! Deadline-bounded text completion over a [`Provider`].

use replayscan_core::{ChatMessage, Error};
use replayscan_providers::Provider;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::deadline;

/// Why a text-analysis call produced nothing usable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalysisFailure {
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("content filtered: {0}")]
    ContentFilter(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl AnalysisFailure {
    pub fn reason(&self) -> &'static str {
        match self {
            AnalysisFailure::Timeout { .. } => "timeout",
            AnalysisFailure::Quota(_) => "quota",
            AnalysisFailure::ContentFilter(_) => "content_filter",
            AnalysisFailure::Provider(_) => "provider",
            AnalysisFailure::InvalidResponse(_) => "invalid_response",
        }
    }
}

impl From<Error> for AnalysisFailure {
    fn from(e: Error) -> Self {
        match e {
            Error::Timeout { operation, after_ms } => AnalysisFailure::Timeout { operation, after_ms },
            Error::RateLimited(msg) => AnalysisFailure::Quota(msg),
            Error::ContentFiltered(msg) => AnalysisFailure::ContentFilter(msg),
            Error::Json(e) => AnalysisFailure::InvalidResponse(e.to_string()),
            other => AnalysisFailure::Provider(other.to_string()),
        }
    }
}

pub type AnalysisOutcome<T> = std::result::Result<T, AnalysisFailure>;

#[derive(Clone)]
pub struct AnalysisService {
    provider: Arc<dyn Provider>,
    timeout: Duration,
}

impl AnalysisService {
    pub fn new(provider: Arc<dyn Provider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    /// One system + user exchange, raced against the configured deadline.
    pub async fn complete(&self, operation: &str, system: &str, prompt: &str) -> AnalysisOutcome<String> {
        let messages = [ChatMessage::system(system), ChatMessage::user(prompt)];
        debug!(operation, prompt_len = prompt.len(), "Calling analysis service");

        let result = deadline::within(operation, self.timeout, self.provider.chat(&messages))
            .await
            .map_err(AnalysisFailure::from)
            .and_then(|response| {
                response
                    .content
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| AnalysisFailure::InvalidResponse("empty reply".to_string()))
            });

        if let Err(failure) = &result {
            warn!(operation, reason = failure.reason(), error = %failure, "Analysis call failed");
        }
        result
    }

    pub async fn complete_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        system: &str,
        prompt: &str,
    ) -> AnalysisOutcome<T> {
        let text = self.complete(operation, system, prompt).await?;
        extract_json(&text).map_err(|failure| {
            warn!(operation, reason = failure.reason(), "Analysis reply was not valid JSON");
            failure
        })
    }
}

fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) on the opening line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Parse the first JSON object or array in `text`, ignoring code fences and
/// any prose before or after it.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> AnalysisOutcome<T> {
    let body = strip_fences(text);
    let start = body
        .find(['{', '['])
        .ok_or_else(|| AnalysisFailure::InvalidResponse("no JSON value in reply".to_string()))?;
    let mut values = serde_json::Deserializer::from_str(&body[start..]).into_iter::<T>();
    match values.next() {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(AnalysisFailure::InvalidResponse(e.to_string())),
        None => Err(AnalysisFailure::InvalidResponse("empty JSON body".to_string())),
    }
}
