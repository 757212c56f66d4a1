// ABOUTME: display_diagram tool: creates the task's diagram from a fragment of sibling mxCell elements.
// ABOUTME: Replaces any earlier diagram; the whole fragment must validate or nothing changes.

use archscribe_core::{DiagramDocument, DiagramError};
use async_trait::async_trait;
use serde_json::Value;

use super::{DiagramSlot, ParamType, Tool, ToolCategory, ToolEffect, ToolOutput, ToolParameter};

const ECHO_CHARS: usize = 500;

pub struct DisplayDiagramTool {
    diagram: DiagramSlot,
}

impl DisplayDiagramTool {
    pub fn new(diagram: DiagramSlot) -> Self {
        Self { diagram }
    }
}

pub(crate) const MISSING_XML: &str = "Missing or invalid xml parameter. The xml field is required and must be a string.

EXAMPLE USAGE:
{\"xml\": \"<mxCell id=\\\"2\\\" value=\\\"Component A\\\" style=\\\"rounded=1;\\\" vertex=\\\"1\\\" parent=\\\"1\\\"><mxGeometry x=\\\"40\\\" y=\\\"40\\\" width=\\\"120\\\" height=\\\"60\\\" as=\\\"geometry\\\"/></mxCell>\"}

Please provide the xml parameter with mxCell elements.";

pub(crate) fn truncated_message(tail: &str, solution: &str) -> String {
    format!(
        "Output was truncated due to length limits. The XML is incomplete.\n\nXML ending (last 200 chars):\n{tail}\n\nSOLUTION: {solution}"
    )
}

fn rejected_message(error: &DiagramError, xml: &str) -> String {
    match error {
        DiagramError::Truncated { tail } => truncated_message(
            tail,
            "Please regenerate with a simpler diagram or break it into smaller parts.",
        ),
        other => {
            let echoed: String = xml.chars().take(ECHO_CHARS).collect();
            let ellipsis = if xml.chars().count() > ECHO_CHARS { "..." } else { "" };
            format!("{other}\n\nYour XML:\n{echoed}{ellipsis}\n\nPlease fix the XML issues and try again.")
        }
    }
}

#[async_trait]
impl Tool for DisplayDiagramTool {
    fn name(&self) -> &str {
        "display_diagram"
    }

    fn description(&self) -> &str {
        "Create the diagram from draw.io mxCell elements. Provide only sibling mxCell elements starting at id=\"2\"; the document wrapper and root cells are added automatically. Keep the first batch to about 8-12 components and add the rest with append_diagram."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "xml",
            ParamType::String,
            "Sibling mxCell elements, without <mxfile>, <mxGraphModel>, <root>, or the cells with id 0 and 1",
        )]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let Some(xml) = input.get("xml").and_then(Value::as_str) else {
            return ToolOutput::error(MISSING_XML);
        };

        let mut slot = self.diagram.lock().await;
        let had_diagram = slot.is_some();
        match DiagramDocument::initialize(xml) {
            Ok(document) => {
                let effect = ToolEffect::DiagramUpdated {
                    xml: document.as_xml().to_string(),
                    cell_count: document.cell_count(),
                };
                tracing::info!(cells = document.cell_count(), replaced = had_diagram, "diagram displayed");
                *slot = Some(document);
                ToolOutput::text(
                    "Diagram generated and displayed successfully. You should now call attempt_completion to finish the task.",
                )
                .with_effect(effect)
            }
            Err(e) => {
                tracing::warn!(error = %e, truncated = e.is_truncated(), "display_diagram rejected");
                ToolOutput::error(rejected_message(&e, xml)).with_effect(ToolEffect::DiagramRejected {
                    truncated: e.is_truncated(),
                    had_diagram,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::new_diagram_slot;
    use serde_json::json;

    const TWO_BOXES: &str = r#"<mxCell id="2" value="API" vertex="1" parent="1"><mxGeometry x="40" y="40" width="120" height="60" as="geometry"/></mxCell>
<mxCell id="3" value="DB" vertex="1" parent="1"><mxGeometry x="240" y="40" width="120" height="60" as="geometry"/></mxCell>"#;

    #[tokio::test]
    async fn valid_fragment_fills_the_slot() {
        let slot = new_diagram_slot();
        let tool = DisplayDiagramTool::new(slot.clone());
        let output = tool.execute(&json!({ "xml": TWO_BOXES })).await;

        assert!(!output.is_error);
        assert!(output.content.contains("attempt_completion"));
        match &output.effect {
            ToolEffect::DiagramUpdated { xml, cell_count } => {
                assert_eq!(*cell_count, 2);
                assert!(xml.contains("<mxfile"));
            }
            other => panic!("unexpected effect {other:?}"),
        }
        assert_eq!(slot.lock().await.as_ref().map(|d| d.cell_count()), Some(2));
    }

    #[tokio::test]
    async fn truncated_fragment_reports_tail() {
        let slot = new_diagram_slot();
        let tool = DisplayDiagramTool::new(slot.clone());
        let cut = "<mxCell id=\"2\" value=\"API\" vertex=\"1\" parent=\"1\"><mxGeometry x=\"4";
        let output = tool.execute(&json!({ "xml": cut })).await;

        assert!(output.is_error);
        assert!(output.content.starts_with("Output was truncated"));
        assert!(output.content.contains(cut));
        assert!(output.content.contains("SOLUTION:"));
        assert_eq!(
            output.effect,
            ToolEffect::DiagramRejected {
                truncated: true,
                had_diagram: false
            }
        );
        assert!(slot.lock().await.is_none());
    }

    #[tokio::test]
    async fn invalid_fragment_keeps_previous_diagram() {
        let slot = new_diagram_slot();
        let tool = DisplayDiagramTool::new(slot.clone());
        tool.execute(&json!({ "xml": TWO_BOXES })).await;

        let output = tool
            .execute(&json!({ "xml": "<mxfile><mxCell id=\"9\" parent=\"1\"/></mxfile>" }))
            .await;
        assert!(output.is_error);
        assert!(output.content.contains("Your XML:"));
        assert_eq!(
            output.effect,
            ToolEffect::DiagramRejected {
                truncated: false,
                had_diagram: true
            }
        );
        assert_eq!(slot.lock().await.as_ref().map(|d| d.cell_count()), Some(2));
    }

    #[tokio::test]
    async fn missing_xml_shows_example() {
        let tool = DisplayDiagramTool::new(new_diagram_slot());
        let output = tool.execute(&json!({})).await;
        assert!(output.is_error);
        assert!(output.content.contains("EXAMPLE USAGE"));
        assert_eq!(output.effect, ToolEffect::None);
    }

    #[test]
    fn long_xml_is_echoed_with_ellipsis() {
        let xml = format!("<bogus>{}</bogus>", "x".repeat(600));
        let message = rejected_message(&DiagramError::Invalid("bad".to_string()), &xml);
        assert!(message.starts_with("bad\n\nYour XML:\n<bogus>"));
        assert!(message.contains("...\n\nPlease fix"));
    }
}
