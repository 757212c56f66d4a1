// ABOUTME: summarize_task tool: offered only when the context window is nearly full.
// ABOUTME: Its result is a continuation prompt that replaces the truncated history.

use archscribe_core::prompt::{continuation_prompt, parse_required_files};
use async_trait::async_trait;
use serde_json::Value;

use super::{ParamType, Tool, ToolCategory, ToolEffect, ToolOutput, ToolParameter, required_str};

pub struct SummarizeTaskTool;

#[async_trait]
impl Tool for SummarizeTaskTool {
    fn name(&self) -> &str {
        "summarize_task"
    }

    fn description(&self) -> &str {
        "Summarize the task so far so the conversation can continue in a fresh context. Call it only when asked to; follow the numbered section layout from the request."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "context",
            ParamType::String,
            "Detailed summary of the task, findings, diagram progress, and next step",
        )]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let summary = match required_str(input, "context") {
            Ok(summary) => summary,
            Err(e) => return ToolOutput::error(e),
        };
        let required_files = parse_required_files(summary);
        tracing::info!(
            summary_chars = summary.len(),
            required_files = required_files.len(),
            "task summarized"
        );
        ToolOutput::text(continuation_prompt(summary)).with_effect(ToolEffect::Summarized {
            summary: summary.to_string(),
        })
    }
}
