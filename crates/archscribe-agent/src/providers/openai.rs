// ABOUTME: OpenAI-compatible Chat Completions adapter streaming text, tool calls, and usage over SSE.
// ABOUTME: Tool call fragments are keyed by index and emitted once the choice finishes.

use std::collections::BTreeMap;

use archscribe_core::{StorageMessage, TokenUsage};
use futures::StreamExt;
use serde_json::{Value, json};

use crate::config::AgentConfig;
use crate::provider::{
    ModelInfo, ProviderAdapter, ProviderError, ProviderEvent, ProviderStream, ToolCall,
    status_error,
};
use crate::providers::sse::SseLineBuffer;
use crate::providers::{coalesce_messages, parse_tool_input, role_name};
use crate::tools::ToolDescriptor;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI runtime adapter. Works with any endpoint speaking the Chat
/// Completions streaming protocol.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: String, model: String, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
            max_tokens,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            config.model.clone(),
            config.max_tokens,
        )
    }

    /// Build the JSON request body for a streaming chat completion.
    pub fn build_request_body(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> Value {
        let mut wire = vec![json!({"role": "system", "content": system_prompt})];
        wire.extend(
            coalesce_messages(messages)
                .into_iter()
                .map(|(role, content)| json!({"role": role_name(role), "content": content})),
        );

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": wire,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(build_openai_tools(tools));
            body["tool_choice"] = json!("auto");
        }
        body
    }
}

/// Convert tool descriptors to OpenAI's function-calling format.
fn build_openai_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.input_schema(),
                }
            })
        })
        .collect()
}

/// Context window inferred from an OpenAI-style model id.
pub fn context_window_for(model: &str) -> u64 {
    let id = model.to_ascii_lowercase();
    if id.contains("gpt-4o") || id.contains("gpt-4.1") || id.starts_with('o') {
        return 128_000;
    }
    if id.contains("gpt-4-turbo") || id.contains("gpt-4-1106") {
        return 128_000;
    }
    if id.contains("gpt-4") {
        return 8_192;
    }
    if id.contains("gpt-3.5-turbo-16k") {
        return 16_385;
    }
    if id.contains("gpt-3.5") {
        return 4_096;
    }
    128_000
}

impl ProviderAdapter for OpenAiProvider {
    fn stream(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> ProviderStream {
        let body = self.build_request_body(system_prompt, messages, tools);
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body);
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            tracing::debug!(model = %model, "sending OpenAI streaming request");
            let response = match request.send().await {
                Ok(response) => response,
                Err(e) => {
                    yield Err(ProviderError::Http(e.to_string()));
                    return;
                }
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                yield Err(status_error(status, body));
                return;
            }

            let mut bytes = response.bytes_stream();
            let mut lines = SseLineBuffer::new();
            let mut parser = OpenAiStreamParser::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(ProviderError::Http(e.to_string()));
                        return;
                    }
                };
                for data in lines.push(&chunk) {
                    match parser.feed(&data) {
                        Ok(events) => {
                            for event in events {
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }
            if let Some(data) = lines.finish() {
                if let Ok(events) = parser.feed(&data) {
                    for event in events {
                        yield Ok(event);
                    }
                }
            }
            for event in parser.finish() {
                yield Ok(event);
            }
        })
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            id: self.model.clone(),
            context_window: context_window_for(&self.model),
            max_tokens: self.max_tokens,
            supports_prompt_cache: false,
        }
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

/// Incremental decoder for Chat Completions chunks.
#[derive(Debug, Default)]
pub struct OpenAiStreamParser {
    calls: BTreeMap<u64, PendingCall>,
    done: bool,
}

impl OpenAiStreamParser {
    pub fn feed(&mut self, data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
        if data.trim() == "[DONE]" {
            self.done = true;
            return Ok(self.flush_calls());
        }
        let chunk: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable OpenAI stream chunk");
                return Ok(Vec::new());
            }
        };
        if let Some(message) = chunk.pointer("/error/message").and_then(Value::as_str) {
            return Err(ProviderError::Stream(message.to_string()));
        }

        let mut out = Vec::new();
        if let Some(choice) = chunk.pointer("/choices/0") {
            let delta = choice.get("delta").cloned().unwrap_or(Value::Null);
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(ProviderEvent::Text(text.to_string()));
                }
            }
            if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
                for fragment in fragments {
                    self.absorb(fragment);
                }
            }
            let finished = choice
                .get("finish_reason")
                .is_some_and(|reason| !reason.is_null());
            if finished {
                out.extend(self.flush_calls());
            }
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            let field = |path: &str| usage.pointer(path).and_then(Value::as_u64);
            out.push(ProviderEvent::Usage(TokenUsage {
                input_tokens: field("/prompt_tokens").unwrap_or(0),
                output_tokens: field("/completion_tokens").unwrap_or(0),
                cache_write_tokens: None,
                cache_read_tokens: field("/prompt_tokens_details/cached_tokens"),
            }));
        }
        Ok(out)
    }

    /// Emit any calls still buffered when the stream ends.
    pub fn finish(&mut self) -> Vec<ProviderEvent> {
        self.flush_calls()
    }

    fn absorb(&mut self, fragment: &Value) {
        let index = fragment.get("index").and_then(Value::as_u64).unwrap_or(0);
        let pending = self.calls.entry(index).or_default();
        if let Some(id) = fragment.get("id").and_then(Value::as_str) {
            pending.id = id.to_string();
        }
        if let Some(function) = fragment.get("function") {
            if let Some(name) = function.get("name").and_then(Value::as_str) {
                pending.name.push_str(name);
            }
            if let Some(arguments) = function.get("arguments").and_then(Value::as_str) {
                pending.arguments.push_str(arguments);
            }
        }
    }

    fn flush_calls(&mut self) -> Vec<ProviderEvent> {
        std::mem::take(&mut self.calls)
            .into_iter()
            .filter(|(_, call)| !call.name.is_empty())
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{index}")
                } else {
                    call.id
                };
                ProviderEvent::ToolCall(ToolCall {
                    input: parse_tool_input(&call.name, &call.arguments),
                    id,
                    name: call.name,
                })
            })
            .collect()
    }
}
