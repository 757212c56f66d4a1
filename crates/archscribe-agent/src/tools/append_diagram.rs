// ABOUTME: append_diagram tool: merges more mxCell elements into the diagram created by display_diagram.
// ABOUTME: Cells are accepted or rejected one by one; the call fails only when none could be merged.

use archscribe_core::DiagramError;
use archscribe_core::diagram::append_to;
use async_trait::async_trait;
use serde_json::Value;

use super::display_diagram::truncated_message;
use super::{DiagramSlot, ParamType, Tool, ToolCategory, ToolEffect, ToolOutput, ToolParameter};

const NO_DIAGRAM: &str = "No existing diagram found. Use display_diagram to create a diagram first, then append_diagram to add more elements.";

pub struct AppendDiagramTool {
    diagram: DiagramSlot,
}

impl AppendDiagramTool {
    pub fn new(diagram: DiagramSlot) -> Self {
        Self { diagram }
    }
}

fn failure_message(error: &DiagramError) -> String {
    match error {
        DiagramError::Truncated { tail } => truncated_message(
            tail,
            "Please regenerate with fewer components (8-12 max per append_diagram call).",
        ),
        DiagramError::NoExistingDiagram => NO_DIAGRAM.to_string(),
        DiagramError::NothingAppended { errors } => {
            format!("No cells could be appended. Errors:\n{}", errors.join("\n"))
        }
        DiagramError::Invalid(reason) => format!("Failed to append diagram: {reason}"),
    }
}

#[async_trait]
impl Tool for AppendDiagramTool {
    fn name(&self) -> &str {
        "append_diagram"
    }

    fn description(&self) -> &str {
        "Add more mxCell elements to the diagram created by display_diagram. Use new unique ids that continue from the ones already used; parent, source, and target must reference existing cells or cells earlier in the same call. Send 8-12 components per call."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "xml",
            ParamType::String,
            "Additional sibling mxCell elements with ids not yet used in the diagram",
        )]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let Some(xml) = input.get("xml").and_then(Value::as_str) else {
            return ToolOutput::error(
                "Missing or invalid xml parameter. The xml field is required and must be a string.",
            );
        };

        let mut slot = self.diagram.lock().await;
        let had_diagram = slot.is_some();
        match append_to(slot.as_ref(), xml) {
            Ok(outcome) => {
                let mut message = format!(
                    "Successfully appended {} component(s) to the diagram.",
                    outcome.appended
                );
                if !outcome.rejected.is_empty() {
                    message.push_str(&format!(
                        " Note: {} cell(s) were skipped:\n{}\n",
                        outcome.rejected.len(),
                        outcome.rejected.join("\n")
                    ));
                }
                message.push_str(
                    " You can continue appending more if needed, or call attempt_completion to finish.",
                );
                tracing::info!(
                    appended = outcome.appended,
                    skipped = outcome.rejected.len(),
                    total = outcome.document.cell_count(),
                    "diagram appended"
                );

                let effect = ToolEffect::DiagramUpdated {
                    xml: outcome.document.as_xml().to_string(),
                    cell_count: outcome.document.cell_count(),
                };
                *slot = Some(outcome.document);
                ToolOutput::text(message).with_effect(effect)
            }
            Err(e) => {
                tracing::warn!(error = %e, "append_diagram rejected");
                ToolOutput::error(failure_message(&e)).with_effect(ToolEffect::DiagramRejected {
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
    use crate::tools::{DisplayDiagramTool, new_diagram_slot};
    use serde_json::json;

    const FIRST: &str = r#"<mxCell id="2" value="API" vertex="1" parent="1"><mxGeometry x="40" y="40" width="120" height="60" as="geometry"/></mxCell>"#;

    async fn seeded() -> (DiagramSlot, AppendDiagramTool) {
        let slot = new_diagram_slot();
        DisplayDiagramTool::new(slot.clone())
            .execute(&json!({ "xml": FIRST }))
            .await;
        let tool = AppendDiagramTool::new(slot.clone());
        (slot, tool)
    }

    #[tokio::test]
    async fn appends_new_cells() {
        let (slot, tool) = seeded().await;
        let xml = r#"<mxCell id="3" value="DB" vertex="1" parent="1"><mxGeometry x="240" y="40" width="120" height="60" as="geometry"/></mxCell>
<mxCell id="4" edge="1" source="2" target="3" parent="1"><mxGeometry relative="1" as="geometry"/></mxCell>"#;
        let output = tool.execute(&json!({ "xml": xml })).await;

        assert!(!output.is_error, "{}", output.content);
        assert!(output.content.starts_with("Successfully appended 2 component(s)"));
        assert!(!output.content.contains("Note:"));
        assert!(matches!(
            output.effect,
            ToolEffect::DiagramUpdated { cell_count: 3, .. }
        ));
        assert_eq!(slot.lock().await.as_ref().map(|d| d.cell_count()), Some(3));
    }

    #[tokio::test]
    async fn partial_append_notes_skipped_cells() {
        let (_slot, tool) = seeded().await;
        let xml = r#"<mxCell id="2" value="dup" vertex="1" parent="1"/><mxCell id="5" value="Cache" vertex="1" parent="1"/>"#;
        let output = tool.execute(&json!({ "xml": xml })).await;

        assert!(!output.is_error);
        assert!(output.content.contains("Successfully appended 1 component(s)"));
        assert!(output.content.contains("Note: 1 cell(s) were skipped"));
        assert!(output.content.contains("\"2\""));
    }

    #[tokio::test]
    async fn nothing_appended_lists_errors() {
        let (slot, tool) = seeded().await;
        let xml = r#"<mxCell id="2" value="dup" vertex="1" parent="1"/>"#;
        let output = tool.execute(&json!({ "xml": xml })).await;

        assert!(output.is_error);
        assert!(output.content.starts_with("No cells could be appended. Errors:\n"));
        assert_eq!(
            output.effect,
            ToolEffect::DiagramRejected {
                truncated: false,
                had_diagram: true
            }
        );
        assert_eq!(slot.lock().await.as_ref().map(|d| d.cell_count()), Some(1));
    }

    #[tokio::test]
    async fn requires_existing_diagram() {
        let tool = AppendDiagramTool::new(new_diagram_slot());
        let output = tool
            .execute(&json!({ "xml": r#"<mxCell id="3" vertex="1" parent="1"/>"# }))
            .await;
        assert!(output.is_error);
        assert_eq!(output.content, NO_DIAGRAM);
        assert_eq!(
            output.effect,
            ToolEffect::DiagramRejected {
                truncated: false,
                had_diagram: false
            }
        );
    }

    #[tokio::test]
    async fn truncation_is_reported_before_missing_diagram() {
        let tool = AppendDiagramTool::new(new_diagram_slot());
        let output = tool
            .execute(&json!({ "xml": r#"<mxCell id="3" vertex="1" parent="1"><mxGeo"# }))
            .await;
        assert!(output.content.starts_with("Output was truncated"));
        assert!(output.content.contains("8-12 max per append_diagram call"));
        assert!(matches!(
            output.effect,
            ToolEffect::DiagramRejected { truncated: true, .. }
        ));
    }
}
