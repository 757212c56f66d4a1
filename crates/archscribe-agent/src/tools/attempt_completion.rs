// ABOUTME: attempt_completion tool: the only way the model tells the loop the task is finished.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    ParamType, Tool, ToolCategory, ToolEffect, ToolOutput, ToolParameter, optional_str,
    required_str,
};

pub struct AttemptCompletionTool;

pub(crate) fn completion_message(result: &str, command: Option<&str>) -> String {
    let mut message = format!("[attempt_completion] Result:\n{result}");
    if let Some(command) = command {
        message.push_str(&format!("\n\nDemo command: {command}"));
    }
    message
}

#[async_trait]
impl Tool for AttemptCompletionTool {
    fn name(&self) -> &str {
        "attempt_completion"
    }

    fn description(&self) -> &str {
        "Finish the task once the diagram has been displayed. Describe what the diagram shows in result. Do not end the result with a question or an offer of further help."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required(
                "result",
                ParamType::String,
                "Final description of the generated diagram",
            ),
            ToolParameter::optional(
                "command",
                ParamType::String,
                "Optional command that demonstrates the result",
            ),
        ]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let result = match required_str(input, "result") {
            Ok(result) => result,
            Err(e) => return ToolOutput::error(e),
        };
        let message = completion_message(result, optional_str(input, "command"));
        ToolOutput::text(message).with_effect(ToolEffect::Completed {
            result: result.to_string(),
        })
    }
}
