// ABOUTME: UI-facing conversation records persisted as conversation-messages.json.
// ABOUTME: Each entry is stamped with the model-history index and deleted range active when it was added.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::TokenUsage;
use crate::truncation::DeletedRange;

/// Maximum characters of tool output kept in a UI tool entry.
pub const TOOL_PREVIEW_CHARS: usize = 200;

/// What a conversation entry represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Task,
    Text,
    Tool,
    ApiReqStarted,
    Diagram,
    CompletionResult,
    Error,
}

/// Request-tracking payload for an `ApiReqStarted` entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequestInfo {
    pub usage: TokenUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

/// Summary of a tool invocation shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub tool: String,
    pub preview: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub ts: DateTime<Utc>,
    pub kind: ConversationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_request: Option<ApiRequestInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolEntry>,
    /// Index of the last model-history message when this entry was added.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_history_deleted_range: Option<DeletedRange>,
}

impl ConversationMessage {
    fn bare(kind: ConversationKind) -> Self {
        Self {
            ts: Utc::now(),
            kind,
            text: None,
            api_request: None,
            tool: None,
            conversation_history_index: None,
            conversation_history_deleted_range: None,
        }
    }

    pub fn task(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(ConversationKind::Task)
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::bare(ConversationKind::Text)
        }
    }

    pub fn api_request(usage: TokenUsage) -> Self {
        Self {
            api_request: Some(ApiRequestInfo { usage, cost: None }),
            ..Self::bare(ConversationKind::ApiReqStarted)
        }
    }

    /// A tool entry whose preview is the output cut to [`TOOL_PREVIEW_CHARS`].
    pub fn tool(name: impl Into<String>, output: &str, is_error: bool) -> Self {
        Self {
            tool: Some(ToolEntry {
                tool: name.into(),
                preview: preview(output),
                is_error,
            }),
            ..Self::bare(ConversationKind::Tool)
        }
    }

    pub fn diagram(xml: impl Into<String>) -> Self {
        Self {
            text: Some(xml.into()),
            ..Self::bare(ConversationKind::Diagram)
        }
    }

    pub fn completion(result: impl Into<String>) -> Self {
        Self {
            text: Some(result.into()),
            ..Self::bare(ConversationKind::CompletionResult)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: Some(message.into()),
            ..Self::bare(ConversationKind::Error)
        }
    }
}

/// Cut `output` to the preview length, appending an ellipsis when cut.
pub fn preview(output: &str) -> String {
    if output.chars().count() <= TOOL_PREVIEW_CHARS {
        return output.to_string();
    }
    let mut cut: String = output.chars().take(TOOL_PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Position of the most recent request-tracking entry.
pub fn last_api_request_index(messages: &[ConversationMessage]) -> Option<usize> {
    messages
        .iter()
        .rposition(|m| m.kind == ConversationKind::ApiReqStarted)
}
