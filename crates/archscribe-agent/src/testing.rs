// ABOUTME: Test utilities for archscribe-agent, including a scripted provider.
// ABOUTME: Replays canned model turns and records every request so tests can drive the task loop offline.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use archscribe_core::{StorageMessage, TokenUsage};

use crate::provider::{ModelInfo, ProviderAdapter, ProviderError, ProviderEvent, ProviderStream, ToolCall};
use crate::tools::ToolDescriptor;

#[derive(Debug, Clone)]
enum Step {
    Text(String),
    ToolCall(ToolCall),
    Usage(TokenUsage),
    Fail(String),
}

/// One canned model response, built up in stream order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    steps: Vec<Step>,
}

impl ScriptedTurn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, text: &str) -> Self {
        self.steps.push(Step::Text(text.to_owned()));
        self
    }

    /// Add a tool call. Ids are assigned when the turn is replayed.
    pub fn tool_call(mut self, name: &str, input: serde_json::Value) -> Self {
        self.steps.push(Step::ToolCall(ToolCall {
            id: String::new(),
            name: name.to_owned(),
            input,
        }));
        self
    }

    pub fn usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.steps.push(Step::Usage(TokenUsage {
            input_tokens,
            output_tokens,
            ..TokenUsage::default()
        }));
        self
    }

    /// End the stream with an error after whatever came before.
    pub fn fail(mut self, message: &str) -> Self {
        self.steps.push(Step::Fail(message.to_owned()));
        self
    }
}

/// A request the provider received.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub system_prompt: String,
    pub messages: Vec<StorageMessage>,
    pub tools: Vec<String>,
}

impl RecordedRequest {
    pub fn offers(&self, tool: &str) -> bool {
        self.tools.iter().any(|t| t == tool)
    }
}

/// A provider that replays scripted turns in order. Once the script runs
/// out, every request fails with a stream error.
pub struct ScriptedProvider {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    requests: Mutex<Vec<RecordedRequest>>,
    model: ModelInfo,
    next_call: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
            model: ModelInfo {
                id: "scripted-model".to_owned(),
                context_window: 200_000,
                max_tokens: 4096,
                supports_prompt_cache: false,
            },
            next_call: AtomicUsize::new(1),
        }
    }

    /// Shrink the context window so compaction triggers with small usage.
    pub fn with_context_window(mut self, context_window: u64) -> Self {
        self.model.context_window = context_window;
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    pub fn remaining_turns(&self) -> usize {
        self.turns.lock().map(|turns| turns.len()).unwrap_or_default()
    }
}

impl ProviderAdapter for ScriptedProvider {
    fn stream(
        &self,
        system_prompt: &str,
        messages: &[StorageMessage],
        tools: &[ToolDescriptor],
    ) -> ProviderStream {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(RecordedRequest {
                system_prompt: system_prompt.to_owned(),
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }

        let turn = self.turns.lock().ok().and_then(|mut turns| turns.pop_front());
        let Some(turn) = turn else {
            return Box::pin(futures::stream::iter(vec![Err(ProviderError::Stream(
                "scripted provider has no turns left".to_owned(),
            ))]));
        };

        let events: Vec<Result<ProviderEvent, ProviderError>> = turn
            .steps
            .into_iter()
            .map(|step| match step {
                Step::Text(text) => Ok(ProviderEvent::Text(text)),
                Step::ToolCall(mut call) => {
                    let n = self.next_call.fetch_add(1, Ordering::Relaxed);
                    call.id = format!("call_{n}");
                    Ok(ProviderEvent::ToolCall(call))
                }
                Step::Usage(usage) => Ok(ProviderEvent::Usage(usage)),
                Step::Fail(message) => Err(ProviderError::Stream(message)),
            })
            .collect();
        Box::pin(futures::stream::iter(events))
    }

    fn model_info(&self) -> ModelInfo {
        self.model.clone()
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        &self.model.id
    }
}
