// ABOUTME: Provider module aggregating the streaming LLM backends and their shared helpers.
// ABOUTME: Builds the configured adapter and flattens model history into alternating text turns.

pub mod anthropic;
pub mod openai;
pub mod sse;

use std::sync::Arc;

use archscribe_core::{MessageRole, StorageMessage};

use crate::config::{AgentConfig, ProviderKind};
use crate::provider::ProviderAdapter;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Create the adapter selected by `config`.
pub fn create_provider(config: &AgentConfig) -> Arc<dyn ProviderAdapter> {
    match config.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::from_config(config)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_config(config)),
    }
}

/// Render history as text turns, merging consecutive messages of the same
/// role so user and assistant turns strictly alternate.
pub(crate) fn coalesce_messages(messages: &[StorageMessage]) -> Vec<(MessageRole, String)> {
    let mut result: Vec<(MessageRole, String)> = Vec::new();
    for message in messages {
        let content = message.render();
        if let Some((last_role, last_content)) = result.last_mut() {
            if *last_role == message.role {
                last_content.push_str("\n\n");
                last_content.push_str(&content);
                continue;
            }
        }
        result.push((message.role, content));
    }
    result
}

pub(crate) fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

/// Parse accumulated tool-call argument text. Empty or malformed input
/// becomes an empty object so the call still reaches its executor.
pub(crate) fn parse_tool_input(tool_name: &str, raw: &str) -> serde_json::Value {
    if raw.trim().is_empty() {
        return serde_json::json!({});
    }
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            tracing::warn!(
                tool = %tool_name,
                len = raw.len(),
                "tool call arguments are not a JSON object, passing an empty input"
            );
            serde_json::json!({})
        }
    }
}
