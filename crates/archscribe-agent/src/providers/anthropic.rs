// ABOUTME: Anthropic Messages API adapter streaming text, tool_use blocks, and usage over SSE.
// ABOUTME: Tool input arrives as input_json_delta fragments and is assembled per content block.

use std::collections::HashMap;

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

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const CLAUDE_CONTEXT_WINDOW: u64 = 200_000;
const DEFAULT_CONTEXT_WINDOW: u64 = 128_000;

/// Anthropic runtime adapter. Streams the Messages API with tool definitions.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicProvider {
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

    /// Build the JSON request body for a streaming Messages API call.
    pub fn build_request_body(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> Value {
        let messages: Vec<Value> = coalesce_messages(messages)
            .into_iter()
            .map(|(role, content)| json!({"role": role_name(role), "content": content}))
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": 0,
            "stream": true,
            "system": [{
                "type": "text",
                "text": system_prompt,
                "cache_control": {"type": "ephemeral"}
            }],
            "messages": messages,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(build_anthropic_tools(tools));
        }
        body
    }
}

/// Convert tool descriptors to Anthropic's tool format.
fn build_anthropic_tools(tools: &[ToolDescriptor]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema(),
            })
        })
        .collect()
}

/// Context window for a Claude model id.
pub fn context_window_for(model: &str) -> u64 {
    if model.contains("claude") {
        CLAUDE_CONTEXT_WINDOW
    } else {
        DEFAULT_CONTEXT_WINDOW
    }
}

impl ProviderAdapter for AnthropicProvider {
    fn stream(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> ProviderStream {
        let body = self.build_request_body(system_prompt, messages, tools);
        let request = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body);
        let model = self.model.clone();

        Box::pin(async_stream::stream! {
            tracing::debug!(model = %model, "sending Anthropic streaming request");
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
            let mut parser = AnthropicStreamParser::default();
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
            supports_prompt_cache: true,
        }
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[derive(Debug)]
struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

/// Incremental decoder for the Messages API event stream.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    tool_blocks: HashMap<u64, PendingToolUse>,
    usage: TokenUsage,
    saw_usage: bool,
    usage_sent: bool,
}

impl AnthropicStreamParser {
    /// Decode one `data:` payload.
    pub fn feed(&mut self, data: &str) -> Result<Vec<ProviderEvent>, ProviderError> {
        let event: Value = match serde_json::from_str(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "skipping unparseable Anthropic stream event");
                return Ok(Vec::new());
            }
        };

        let mut out = Vec::new();
        match event.get("type").and_then(Value::as_str).unwrap_or("") {
            "message_start" => {
                if let Some(usage) = event.pointer("/message/usage") {
                    self.record_usage(usage);
                }
            }
            "content_block_start" => {
                let index = block_index(&event);
                let block = event.get("content_block").cloned().unwrap_or(Value::Null);
                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => {
                        self.tool_blocks.insert(
                            index,
                            PendingToolUse {
                                id: str_field(&block, "id"),
                                name: str_field(&block, "name"),
                                input_json: String::new(),
                            },
                        );
                    }
                    Some("text") => {
                        let text = str_field(&block, "text");
                        if !text.is_empty() {
                            out.push(ProviderEvent::Text(text));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_delta" => {
                let index = block_index(&event);
                let delta = event.get("delta").cloned().unwrap_or(Value::Null);
                match delta.get("type").and_then(Value::as_str) {
                    Some("text_delta") => {
                        let text = str_field(&delta, "text");
                        if !text.is_empty() {
                            out.push(ProviderEvent::Text(text));
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(pending) = self.tool_blocks.get_mut(&index) {
                            pending.input_json.push_str(&str_field(&delta, "partial_json"));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = block_index(&event);
                if let Some(pending) = self.tool_blocks.remove(&index) {
                    out.push(finish_tool_use(pending));
                }
            }
            "message_delta" => {
                if let Some(usage) = event.get("usage") {
                    self.record_usage(usage);
                }
            }
            "message_stop" => {
                out.extend(self.take_usage());
            }
            "error" => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown stream error")
                    .to_string();
                return Err(ProviderError::Stream(message));
            }
            _ => {}
        }
        Ok(out)
    }

    /// Flush tool blocks left open and usage not yet reported.
    pub fn finish(&mut self) -> Vec<ProviderEvent> {
        let mut indices: Vec<u64> = self.tool_blocks.keys().copied().collect();
        indices.sort_unstable();
        let mut out: Vec<ProviderEvent> = indices
            .into_iter()
            .filter_map(|i| self.tool_blocks.remove(&i))
            .map(finish_tool_use)
            .collect();
        out.extend(self.take_usage());
        out
    }

    fn record_usage(&mut self, usage: &Value) {
        let field = |name: &str| usage.get(name).and_then(Value::as_u64);
        if let Some(n) = field("input_tokens") {
            self.usage.input_tokens = n;
        }
        // message_delta reports the cumulative output count
        if let Some(n) = field("output_tokens") {
            self.usage.output_tokens = n;
        }
        if let Some(n) = field("cache_creation_input_tokens") {
            self.usage.cache_write_tokens = Some(n);
        }
        if let Some(n) = field("cache_read_input_tokens") {
            self.usage.cache_read_tokens = Some(n);
        }
        self.saw_usage = true;
    }

    fn take_usage(&mut self) -> Option<ProviderEvent> {
        if self.saw_usage && !self.usage_sent {
            self.usage_sent = true;
            Some(ProviderEvent::Usage(self.usage))
        } else {
            None
        }
    }
}

fn block_index(event: &Value) -> u64 {
    event.get("index").and_then(Value::as_u64).unwrap_or(0)
}

fn str_field(value: &Value, name: &str) -> String {
    value
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn finish_tool_use(pending: PendingToolUse) -> ProviderEvent {
    let input = parse_tool_input(&pending.name, &pending.input_json);
    ProviderEvent::ToolCall(ToolCall {
        id: pending.id,
        name: pending.name,
        input,
    })
}
