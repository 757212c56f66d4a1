// ABOUTME: The orchestration loop: drives model turns, runs tool calls, and streams events to the caller.
// ABOUTME: Ends on attempt_completion, the turn ceiling, a provider failure, or an unusable first diagram.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use archscribe_core::prompt::{NO_TOOL_USED, SUMMARIZE_INSTRUCTION, system_prompt};
use archscribe_core::truncation::apply_deleted_range;
use archscribe_core::{
    ContentBlock, ConversationMessage, DiagramType, MessageMetrics, ModelRef, StorageMessage,
    TokenUsage,
};
use archscribe_store::{MessageStateHandler, StoreError};
use futures::StreamExt;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use ulid::Ulid;

use crate::config::{AgentConfig, DEFAULT_GRACE_TURNS, DEFAULT_MAX_TURNS};
use crate::context::ContextWindowManager;
use crate::provider::{ProviderAdapter, ProviderError, ToolCall};
use crate::tools::{
    SummarizeTaskTool, ToolCatalog, ToolCategory, ToolEffect, ToolOutput, base_tools,
    new_diagram_slot,
};

/// What the caller asks the agent to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub message: String,
    #[serde(
        default,
        rename = "diagramType",
        alias = "diagram_type",
        deserialize_with = "lenient_diagram_type"
    )]
    pub diagram_type: DiagramType,
}

/// Unknown or null diagram types select the default instead of failing.
fn lenient_diagram_type<'de, D>(deserializer: D) -> Result<DiagramType, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|s| DiagramType::parse_or_default(&s))
        .unwrap_or_default())
}

impl TaskRequest {
    pub fn new(message: impl Into<String>, diagram_type: DiagramType) -> Self {
        Self {
            message: message.into(),
            diagram_type,
        }
    }
}

/// How a task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Completed,
    MaxTurns,
    Failed,
}

/// Events streamed to the caller while a task runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    Text {
        text: String,
    },
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    Usage {
        usage: TokenUsage,
    },
    ToolResult {
        tool_name: String,
        result: String,
        is_error: bool,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_truncated: bool,
    },
    Diagram {
        xml: String,
        cell_count: usize,
    },
    Error {
        error: String,
    },
    MaxTurns {
        turns: usize,
    },
    Done {
        status: TaskStatus,
    },
}

impl LoopEvent {
    /// Event name used for server-sent event framing.
    pub fn name(&self) -> &'static str {
        match self {
            LoopEvent::Text { .. } => "text",
            LoopEvent::ToolCall { .. } => "tool_call",
            LoopEvent::Usage { .. } => "usage",
            LoopEvent::ToolResult { .. } => "tool_result",
            LoopEvent::Diagram { .. } => "diagram",
            LoopEvent::Error { .. } => "error",
            LoopEvent::MaxTurns { .. } => "max_turns",
            LoopEvent::Done { .. } => "done",
        }
    }
}

/// Push side of the caller's event stream. Once the receiver is gone every
/// later emit is a no-op; the loop itself keeps running.
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<LoopEvent>,
    closed: AtomicBool,
}

impl EventEmitter {
    pub fn new(tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self {
            tx,
            closed: AtomicBool::new(false),
        }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Returns false when the event was dropped.
    pub fn emit(&self, event: LoopEvent) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        if self.tx.send(event).is_err() {
            if !self.closed.swap(true, Ordering::Relaxed) {
                tracing::warn!("event consumer disconnected, continuing without streaming");
            }
            return false;
        }
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("message store failure: {0}")]
    Store(#[from] StoreError),
}

/// Summary of a finished task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: Ulid,
    pub status: TaskStatus,
    pub turns: usize,
    /// The final serialized diagram, if one was ever displayed.
    pub diagram: Option<String>,
    /// The attempt_completion result text.
    pub completion: Option<String>,
    pub error: Option<String>,
}

/// Turn limits and the compaction override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopSettings {
    pub max_turns: usize,
    /// Turns run before the context window is first consulted.
    pub grace_turns: usize,
    pub condense_threshold: Option<f64>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            grace_turns: DEFAULT_GRACE_TURNS,
            condense_threshold: None,
        }
    }
}

impl From<&AgentConfig> for LoopSettings {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_turns: config.max_turns,
            grace_turns: config.grace_turns,
            condense_threshold: config.condense_threshold,
        }
    }
}

/// Everything one model response produced.
#[derive(Default)]
struct TurnResponse {
    text: String,
    calls: Vec<ToolCall>,
    usage: Option<TokenUsage>,
}

/// Loop-level consequences of one turn's tool results.
#[derive(Default)]
struct TurnEffects {
    completion: Option<String>,
    fatal: Option<String>,
    summarized: bool,
}

/// Runs one task against one provider and one message store.
pub struct TaskRunner {
    provider: Arc<dyn ProviderAdapter>,
    handler: Arc<MessageStateHandler>,
    settings: LoopSettings,
    context: ContextWindowManager,
}

impl TaskRunner {
    pub fn new(
        provider: Arc<dyn ProviderAdapter>,
        handler: Arc<MessageStateHandler>,
        settings: LoopSettings,
    ) -> Self {
        let context = ContextWindowManager::new(settings.condense_threshold);
        Self {
            provider,
            handler,
            settings,
            context,
        }
    }

    pub fn task_id(&self) -> Ulid {
        self.handler.task_id()
    }

    /// Run the task to completion. Only message store failures are returned
    /// as errors; every other ending is reported through the outcome and
    /// the event stream.
    pub async fn run(
        &self,
        request: TaskRequest,
        events: &EventEmitter,
    ) -> Result<TaskOutcome, LoopError> {
        let task_id = self.task_id();
        tracing::info!(
            task_id = %task_id,
            provider = %self.provider.provider_name(),
            model = %self.provider.model_name(),
            diagram_type = %request.diagram_type,
            "task started"
        );

        self.handler
            .add_api_message(StorageMessage::user_text(&request.message))?;
        self.handler
            .add_conversation_message(ConversationMessage::task(&request.message))?;

        let system = system_prompt(request.diagram_type);
        let diagram = new_diagram_slot();
        let mut catalog = ToolCatalog::new(base_tools(Arc::clone(&diagram)));

        let mut continuing_after_summary = false;
        let mut awaiting_summary = false;
        let mut turn = 0;
        let mut status = None;
        let mut completion = None;
        let mut error = None;

        while turn < self.settings.max_turns {
            turn += 1;
            tracing::info!(task_id = %task_id, turn, "turn started");

            if continuing_after_summary {
                continuing_after_summary = false;
                tracing::info!(task_id = %task_id, turn, "continuing with compacted history");
            } else if turn > self.settings.grace_turns {
                self.manage_context(&mut catalog, &mut awaiting_summary)?;
            }

            let state = self.handler.snapshot();
            let visible = apply_deleted_range(&state.api_messages, state.deleted_range);
            let response = match self
                .request_turn(&system, &visible, &catalog, events)
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(task_id = %task_id, turn, error = %e, "provider request failed");
                    let message = e.to_string();
                    self.handler
                        .add_conversation_message(ConversationMessage::error(&message))?;
                    events.emit(LoopEvent::Error {
                        error: message.clone(),
                    });
                    error = Some(message);
                    status = Some(TaskStatus::Failed);
                    break;
                }
            };

            self.record_response(&response)?;

            if response.calls.is_empty() {
                tracing::warn!(task_id = %task_id, turn, "turn ended without a tool call");
                self.handler
                    .add_api_message(StorageMessage::user_text(NO_TOOL_USED))?;
                continue;
            }

            let outputs = execute_calls(&catalog, &response.calls).await;
            let effects = self.apply_results(&response.calls, outputs, events)?;

            if effects.summarized {
                continuing_after_summary = true;
                awaiting_summary = false;
            }
            if let Some(message) = effects.fatal {
                self.handler
                    .add_conversation_message(ConversationMessage::error(&message))?;
                events.emit(LoopEvent::Error {
                    error: message.clone(),
                });
                error = Some(message);
                status = Some(TaskStatus::Failed);
                break;
            }
            if effects.completion.is_some() {
                completion = effects.completion;
                status = Some(TaskStatus::Completed);
                break;
            }
        }

        let status = match status {
            Some(status) => status,
            None => {
                tracing::warn!(task_id = %task_id, turns = turn, "maximum turns reached");
                self.handler.add_conversation_message(ConversationMessage::error(
                    "Maximum conversation turns reached",
                ))?;
                events.emit(LoopEvent::MaxTurns { turns: turn });
                TaskStatus::MaxTurns
            }
        };
        events.emit(LoopEvent::Done { status });
        tracing::info!(task_id = %task_id, turns = turn, status = ?status, "task finished");

        let diagram = diagram.lock().await.as_ref().map(|d| d.as_xml().to_string());
        Ok(TaskOutcome {
            task_id,
            status,
            turns: turn,
            diagram,
            completion,
            error,
        })
    }

    /// Tier 1 then Tier 2 remediation when usage nears the context limit.
    /// The summarize instruction goes out once and stays pending until the
    /// model calls summarize_task.
    fn manage_context(
        &self,
        catalog: &mut ToolCatalog,
        awaiting_summary: &mut bool,
    ) -> Result<(), LoopError> {
        let model = self.provider.model_info();
        let conversation = self.handler.conversation_messages();
        let last_request = archscribe_core::conversation::last_api_request_index(&conversation);
        if !self
            .context
            .should_compact(&conversation, &model, last_request)
        {
            return Ok(());
        }

        tracing::info!(task_id = %self.task_id(), "context window nearly full");
        let needs_truncation = self.context.attempt_file_read_optimization(
            &self.handler,
            &conversation,
            &model,
            last_request,
        )?;
        if !needs_truncation {
            return Ok(());
        }
        if *awaiting_summary {
            tracing::debug!(task_id = %self.task_id(), "summary still pending");
            return Ok(());
        }

        if catalog.extend(Arc::new(SummarizeTaskTool)) {
            tracing::info!(task_id = %self.task_id(), "summarize_task offered");
        }
        self.handler
            .add_api_message(StorageMessage::user_text(SUMMARIZE_INSTRUCTION))?;
        *awaiting_summary = true;
        Ok(())
    }

    /// Stream one model response, forwarding every chunk as it arrives.
    async fn request_turn(
        &self,
        system: &str,
        messages: &[StorageMessage],
        catalog: &ToolCatalog,
        events: &EventEmitter,
    ) -> Result<TurnResponse, ProviderError> {
        let descriptors = catalog.descriptors();
        tracing::debug!(
            task_id = %self.task_id(),
            messages = messages.len(),
            tools = descriptors.len(),
            "requesting model response"
        );
        let mut stream = self.provider.stream(system, messages, &descriptors);
        let mut response = TurnResponse::default();
        while let Some(event) = stream.next().await {
            match event? {
                crate::provider::ProviderEvent::Text(text) => {
                    events.emit(LoopEvent::Text { text: text.clone() });
                    response.text.push_str(&text);
                }
                crate::provider::ProviderEvent::ToolCall(call) => {
                    tracing::debug!(task_id = %self.task_id(), tool = %call.name, "tool call received");
                    events.emit(LoopEvent::ToolCall {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.input.clone(),
                    });
                    response.calls.push(call);
                }
                crate::provider::ProviderEvent::Usage(usage) => {
                    events.emit(LoopEvent::Usage { usage });
                    response
                        .usage
                        .get_or_insert_with(TokenUsage::default)
                        .accumulate(&usage);
                }
            }
        }
        Ok(response)
    }

    /// Append the assistant turn and its request-tracking entry.
    fn record_response(&self, response: &TurnResponse) -> Result<(), LoopError> {
        let has_text = !response.text.trim().is_empty();
        if has_text || !response.calls.is_empty() {
            let mut message = if response.calls.is_empty() {
                StorageMessage::assistant_text(&response.text)
            } else {
                let mut blocks = Vec::with_capacity(response.calls.len() + 1);
                if has_text {
                    blocks.push(ContentBlock::Text {
                        text: response.text.clone(),
                    });
                }
                blocks.extend(response.calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.input.clone(),
                }));
                StorageMessage::assistant_blocks(blocks)
            };
            message = message.with_model(ModelRef {
                model_id: self.provider.model_name().to_string(),
                provider_id: self.provider.provider_name().to_string(),
            });
            if let Some(usage) = response.usage {
                message = message.with_metrics(MessageMetrics {
                    tokens: usage,
                    cost: None,
                });
            }
            self.handler.add_api_message(message)?;
        }
        if has_text {
            self.handler
                .add_conversation_message(ConversationMessage::text(&response.text))?;
        }
        if has_text || response.usage.is_some() {
            self.handler
                .add_conversation_message(ConversationMessage::api_request(
                    response.usage.unwrap_or_default(),
                ))?;
        }
        Ok(())
    }

    /// Record each result in call order and work out what the loop must do.
    fn apply_results(
        &self,
        calls: &[ToolCall],
        outputs: Vec<ToolOutput>,
        events: &EventEmitter,
    ) -> Result<TurnEffects, LoopError> {
        let mut effects = TurnEffects::default();
        for (call, output) in calls.iter().zip(outputs) {
            let mut is_truncated = false;
            match &output.effect {
                ToolEffect::None => {}
                ToolEffect::DiagramUpdated { xml, cell_count } => {
                    self.handler
                        .add_conversation_message(ConversationMessage::diagram(xml))?;
                    events.emit(LoopEvent::Diagram {
                        xml: xml.clone(),
                        cell_count: *cell_count,
                    });
                }
                ToolEffect::DiagramRejected {
                    truncated,
                    had_diagram,
                } => {
                    is_truncated = *truncated;
                    if call.name == "display_diagram" && !truncated && !had_diagram {
                        let first_line = output.content.lines().next().unwrap_or_default();
                        effects.fatal = Some(format!("Diagram generation failed: {first_line}"));
                    }
                }
                ToolEffect::Summarized { .. } => {
                    // hide the summarized history before the continuation prompt lands
                    if let Some(range) = ContextWindowManager::truncation_after_summary(&self.handler)
                    {
                        if self.handler.deleted_range() != Some(range) {
                            self.handler.set_deleted_range(range)?;
                            tracing::info!(
                                task_id = %self.task_id(),
                                start = range.start,
                                end = range.end,
                                "history truncated after summary"
                            );
                        }
                    }
                    effects.summarized = true;
                }
                ToolEffect::Completed { result } => {
                    self.handler
                        .add_conversation_message(ConversationMessage::completion(result))?;
                    effects.completion = Some(result.clone());
                }
            }

            events.emit(LoopEvent::ToolResult {
                tool_name: call.name.clone(),
                result: output.content.clone(),
                is_error: output.is_error,
                is_truncated,
            });
            self.handler.add_api_message(StorageMessage::tool_result(
                &call.id,
                &call.name,
                &output.content,
                output.is_error,
            ))?;
            self.handler.add_conversation_message(ConversationMessage::tool(
                &call.name,
                &output.content,
                output.is_error,
            ))?;
        }
        Ok(effects)
    }
}

/// Execute calls in order. Runs of consecutive read-only calls execute
/// concurrently; everything else runs one at a time. Results come back in
/// call order.
pub(crate) async fn execute_calls(catalog: &ToolCatalog, calls: &[ToolCall]) -> Vec<ToolOutput> {
    let mut outputs = Vec::with_capacity(calls.len());
    let mut i = 0;
    while i < calls.len() {
        let Some(tool) = catalog.get(&calls[i].name) else {
            tracing::warn!(tool = %calls[i].name, "unknown tool requested");
            outputs.push(ToolOutput::error(format!("Unknown tool: {}", calls[i].name)));
            i += 1;
            continue;
        };

        if tool.category() == ToolCategory::Mutating {
            tracing::debug!(tool = %calls[i].name, "executing tool");
            outputs.push(tool.execute(&calls[i].input).await);
            i += 1;
            continue;
        }

        let mut batch = Vec::new();
        while i < calls.len() {
            match catalog.get(&calls[i].name) {
                Some(tool) if tool.category() == ToolCategory::ReadOnly => {
                    batch.push((tool, &calls[i].input));
                    i += 1;
                }
                _ => break,
            }
        }
        tracing::debug!(count = batch.len(), "executing read-only tools concurrently");
        let results = join_all(
            batch
                .iter()
                .map(|(tool, input)| async move { tool.execute(input).await }),
        )
        .await;
        outputs.extend(results);
    }
    outputs
}
