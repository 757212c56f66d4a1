// ABOUTME: Provider-neutral streaming interface every LLM backend implements.
// ABOUTME: A request yields a stream of text chunks, complete tool calls, and usage reports.

use std::pin::Pin;

use archscribe_core::{StorageMessage, TokenUsage};
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::tools::ToolDescriptor;

/// A fully assembled tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// One item of a provider response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderEvent {
    Text(String),
    ToolCall(ToolCall),
    Usage(TokenUsage),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Authentication failed")]
    Unauthorized,

    #[error("stream error: {0}")]
    Stream(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

pub type ProviderStream = Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

/// What the context manager needs to know about a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    pub context_window: u64,
    pub max_tokens: u32,
    pub supports_prompt_cache: bool,
}

/// A streaming LLM backend. Adapters are stateless between requests.
pub trait ProviderAdapter: Send + Sync {
    /// Start a request. Errors surface as items of the returned stream.
    fn stream(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> ProviderStream;

    fn model_info(&self) -> ModelInfo;

    /// Provider name for logging (e.g. "anthropic", "openai").
    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Map a non-success HTTP status to a provider error.
pub(crate) fn status_error(status: reqwest::StatusCode, body: String) -> ProviderError {
    match status.as_u16() {
        429 => ProviderError::RateLimited,
        401 | 403 => ProviderError::Unauthorized,
        code => ProviderError::Api { status: code, body },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(reqwest::StatusCode::TOO_MANY_REQUESTS, String::new()),
            ProviderError::RateLimited
        ));
        assert!(matches!(
            status_error(reqwest::StatusCode::UNAUTHORIZED, String::new()),
            ProviderError::Unauthorized
        ));
        match status_error(reqwest::StatusCode::BAD_GATEWAY, "upstream".to_string()) {
            ProviderError::Api { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream");
            }
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn provider_error_display() {
        assert_eq!(ProviderError::RateLimited.to_string(), "Rate limited");
        assert_eq!(
            ProviderError::Stream("overloaded".into()).to_string(),
            "stream error: overloaded"
        );
    }
}
