// ABOUTME: Model-facing conversation records: roles, structured content blocks, and per-request usage.
// ABOUTME: These are the messages sent to the LLM provider and persisted as api-messages.json.

use serde::{Deserialize, Serialize};

/// Who authored a model-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// A structured piece of message content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        tool_name: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Render the block as plain text, the form every provider accepts.
    pub fn render(&self) -> String {
        match self {
            ContentBlock::Text { text } => text.clone(),
            ContentBlock::ToolUse { name, input, .. } => {
                format!("<tool_use tool_name=\"{name}\">\n{input}\n</tool_use>")
            }
            ContentBlock::ToolResult {
                tool_name, content, ..
            } => format!("<tool_result tool_name=\"{tool_name}\">\n{content}\n</tool_result>"),
        }
    }
}

/// Message content is either a bare string or a list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Flatten the content into a single string, blocks separated by blank lines.
    pub fn render(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(ContentBlock::render)
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    /// Character count used for rough token estimation.
    pub fn char_len(&self) -> usize {
        match self {
            MessageContent::Text(text) => text.chars().count(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => text.chars().count(),
                    ContentBlock::ToolUse { name, input, .. } => {
                        name.chars().count() + input.to_string().chars().count()
                    }
                    ContentBlock::ToolResult {
                        tool_name, content, ..
                    } => tool_name.chars().count() + content.chars().count(),
                })
                .sum(),
        }
    }
}

/// Token usage reported for one model request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_tokens: Option<u64>,
}

impl TokenUsage {
    /// Sum of input, output, and both cache counters.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_write_tokens.unwrap_or(0)
            + self.cache_read_tokens.unwrap_or(0)
    }

    /// Fold another usage report into this one. Cache counters stay `None`
    /// unless at least one side reported them.
    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_write_tokens = add_optional(self.cache_write_tokens, other.cache_write_tokens);
        self.cache_read_tokens = add_optional(self.cache_read_tokens, other.cache_read_tokens);
    }
}

fn add_optional(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

/// Optional metadata attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub tokens: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Identifies the model that produced a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRef {
    pub model_id: String,
    pub provider_id: String,
}

/// One entry in the model-facing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMessage {
    pub role: MessageRole,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MessageMetrics>,
}

impl StorageMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Text(text.into()),
            model_info: None,
            metrics: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Text(text.into()),
            model_info: None,
            metrics: None,
        }
    }

    /// An assistant turn carrying text and tool-use blocks.
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: MessageContent::Blocks(blocks),
            model_info: None,
            metrics: None,
        }
    }

    /// A user-role message carrying the outcome of one tool call.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            role: MessageRole::User,
            content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                tool_use_id: tool_use_id.into(),
                tool_name: tool_name.into(),
                content: content.into(),
                is_error,
            }]),
            model_info: None,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MessageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_model(mut self, model: ModelRef) -> Self {
        self.model_info = Some(model);
        self
    }

    /// The tool result block, if this message is a single tool result.
    pub fn as_tool_result(&self) -> Option<(&str, &str)> {
        match &self.content {
            MessageContent::Blocks(blocks) => blocks.iter().find_map(|block| match block {
                ContentBlock::ToolResult {
                    tool_name, content, ..
                } => Some((tool_name.as_str(), content.as_str())),
                _ => None,
            }),
            MessageContent::Text(_) => None,
        }
    }

    pub fn render(&self) -> String {
        self.content.render()
    }
}

/// Tokens reported across every message that carries metrics.
pub fn history_tokens(messages: &[StorageMessage]) -> u64 {
    messages
        .iter()
        .filter_map(|m| m.metrics.as_ref())
        .map(|metrics| metrics.tokens.total())
        .sum()
}

/// Summed cost, or `None` when no message reported one.
pub fn history_cost(messages: &[StorageMessage]) -> Option<f64> {
    messages
        .iter()
        .filter_map(|m| m.metrics.as_ref().and_then(|metrics| metrics.cost))
        .fold(None, |sum, cost| Some(sum.unwrap_or(0.0) + cost))
}

/// Rough token estimate: one token per four characters, rounded up.
pub fn estimate_tokens(messages: &[StorageMessage]) -> usize {
    let chars: usize = messages.iter().map(|m| m.content.char_len()).sum();
    chars.div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_totals_skip_messages_without_metrics() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cache_write_tokens: None,
            cache_read_tokens: Some(30),
        };
        let history = vec![
            StorageMessage::user_text("task"),
            StorageMessage::assistant_text("a").with_metrics(MessageMetrics {
                tokens: usage,
                cost: Some(0.25),
            }),
            StorageMessage::assistant_text("b").with_metrics(MessageMetrics {
                tokens: usage,
                cost: None,
            }),
        ];
        assert_eq!(history_tokens(&history), 300);
        assert_eq!(history_cost(&history), Some(0.25));
        assert_eq!(history_cost(&history[..1]), None);
    }

    #[test]
    fn tool_result_renders_as_tagged_text() {
        let msg = StorageMessage::tool_result("call_1", "read_file", "File: a.rs", false);
        assert_eq!(msg.role, MessageRole::User);
        assert_eq!(
            msg.render(),
            "<tool_result tool_name=\"read_file\">\nFile: a.rs\n</tool_result>"
        );
        assert_eq!(msg.as_tool_result(), Some(("read_file", "File: a.rs")));
    }

    #[test]
    fn plain_text_is_not_a_tool_result() {
        let msg = StorageMessage::user_text("hello");
        assert!(msg.as_tool_result().is_none());
    }

    #[test]
    fn storage_message_json_shape() {
        let msg = StorageMessage::assistant_text("thinking").with_metrics(MessageMetrics {
            tokens: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
            cost: None,
        });
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], "thinking");
        assert_eq!(json["metrics"]["tokens"]["input_tokens"], 10);
        assert!(json.get("model_info").is_none());

        let back: StorageMessage = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn usage_total_counts_cache_tokens() {
        let usage = TokenUsage {
            input_tokens: 100,
            output_tokens: 20,
            cache_write_tokens: Some(5),
            cache_read_tokens: Some(7),
        };
        assert_eq!(usage.total(), 132);
    }

    #[test]
    fn accumulate_keeps_absent_cache_counters_absent() {
        let mut usage = TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            ..Default::default()
        };
        usage.accumulate(&TokenUsage {
            input_tokens: 3,
            output_tokens: 4,
            ..Default::default()
        });
        assert_eq!(usage.input_tokens, 4);
        assert_eq!(usage.output_tokens, 6);
        assert_eq!(usage.cache_read_tokens, None);

        usage.accumulate(&TokenUsage {
            cache_read_tokens: Some(9),
            ..Default::default()
        });
        assert_eq!(usage.cache_read_tokens, Some(9));
        assert_eq!(usage.cache_write_tokens, None);
    }

    #[test]
    fn estimate_tokens_rounds_up() {
        let messages = vec![StorageMessage::user_text("abcde")];
        assert_eq!(estimate_tokens(&messages), 2);
        assert_eq!(estimate_tokens(&[]), 0);
    }
}
