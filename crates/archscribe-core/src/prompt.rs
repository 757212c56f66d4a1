// ABOUTME: Prompt text for the diagram agent: the sectioned system prompt and compaction prompts.
// ABOUTME: Also parses the "Required Files" list out of a model-written task summary.

use std::sync::LazyLock;

use regex::Regex;

use crate::diagram_type::DiagramType;

/// Sent when a turn ends without any tool call.
pub const NO_TOOL_USED: &str = "[ERROR] You did not use a tool in your previous response! Please retry with a tool use.\n\nIf you have completed the analysis and generated the diagram, use the attempt_completion tool.\nIf you need to generate the diagram, use the display_diagram tool.\nOtherwise, continue with the next step of the analysis.\n\n(This is an automated message, so do not respond to it conversationally.)";

/// Replaces the body of an earlier read of a file that was read again later.
pub const DUPLICATE_FILE_READ_NOTICE: &str =
    "[NOTE] Earlier read of this file elided; see the latest read below.";

fn agent_role() -> String {
    "You are archscribe, a senior software engineer who reads unfamiliar codebases and turns them into clear, professional draw.io architecture diagrams. You identify the components that matter, the relationships between them, and present them so a developer understands the system at a glance.".to_string()
}

fn rules(diagram_type: DiagramType) -> String {
    format!(
        "====

RULES

1. Every response MUST include at least one tool call. Start with list_files_recursive or list_directories to learn the project layout.
2. Always pass absolute paths. You cannot change directory, and ~ or $HOME are not expanded.
3. Batch read-only calls. When you need several files, searches, or definition listings, request them all in one turn; they run in parallel.
4. Prefer list_code_definition_names before read_file, and read only the files central to the architecture (five to eight is usually enough).
5. For a {name} diagram, focus on: {focus}
6. Keep the first display_diagram small (eight to twelve components) and add further batches with append_diagram.
7. After display_diagram succeeds you MUST call attempt_completion. Do not ask follow-up questions and do not end the result with an offer of further help.

====",
        name = diagram_type.display_name(),
        focus = diagram_type.description(),
    )
}

fn workflow(diagram_type: DiagramType) -> String {
    format!(
        "====

WORKFLOW

1. PLAN: decide which information you need and gather as much of it as possible per turn.
2. EXPLORE: map the structure, list definitions, read the key configuration and implementation files, and search for specific patterns.
3. GENERATE: call display_diagram with the {id} diagram, then append_diagram for any remaining components.
4. COMPLETE: call attempt_completion with a short description of what the diagram shows.

====",
        id = diagram_type.as_str(),
    )
}

fn drawio_reference() -> String {
    r#"====

DRAW.IO XML REFERENCE

You produce ONLY sibling mxCell elements. The document wrapper and the root cells are added for you:

<mxGraphModel>
  <root>
    <mxCell id="0"/>
    <mxCell id="1" parent="0"/>
    <!-- your cells, starting at id="2" -->
  </root>
</mxGraphModel>

Validation rules (violations are rejected):
1. Never emit <mxfile>, <mxGraphModel>, or <root>, and never emit the cells with id="0" or id="1".
2. mxCell elements are siblings; never nest one mxCell inside another.
3. Every mxCell has a unique id and a parent that references an existing cell. Use parent="1" for top-level shapes.
4. Edge source and target attributes must reference existing cell ids.
5. Escape special characters in attribute values: &lt; &gt; &amp; &quot;

Shape:
<mxCell id="2" value="Label" style="rounded=1;whiteSpace=wrap;html=1;" vertex="1" parent="1">
  <mxGeometry x="100" y="100" width="120" height="60" as="geometry"/>
</mxCell>

Connector:
<mxCell id="3" style="endArrow=classic;html=1;" edge="1" parent="1" source="2" target="4">
  <mxGeometry relative="1" as="geometry"/>
</mxCell>

===="#
        .to_string()
}

fn objective(diagram_type: DiagramType) -> String {
    format!(
        "====

OBJECTIVE

Work iteratively. Break the task into goals, pursue them in order with the tools available, and once the {name} diagram is displayed, present the result with attempt_completion.",
        name = diagram_type.display_name(),
    )
}

/// Build the system prompt for a task.
pub fn system_prompt(diagram_type: DiagramType) -> String {
    [
        agent_role(),
        rules(diagram_type),
        workflow(diagram_type),
        drawio_reference(),
        objective(diagram_type),
    ]
    .join("\n\n")
}

/// Injected as a user message when the context window is nearly full and
/// deduplication alone was not enough.
pub const SUMMARIZE_INSTRUCTION: &str = "[CONTEXT WINDOW NEARLY FULL] The conversation is about to exceed the model's context window. If the diagram is already displayed and the task is done, call attempt_completion. Otherwise call the summarize_task tool now. Its context parameter must be a detailed summary that lets you continue the task without the earlier conversation. Use these numbered sections:

1. Primary Request and Intent: what the user asked for, including the diagram type.
2. Key Findings: the architecture you have discovered so far.
3. Files and Code Sections: the files you examined and what each contributes.
4. Diagram Progress: whether a diagram was displayed and which component ids it already uses.
5. Problem Solving: errors encountered and how they were resolved.
6. Pending Tasks: what remains to be explored or drawn.
7. Next Step: the single next action you will take.
8. Required Files:
   - /absolute/path/to/file

(This is an automated message, so do not respond to it conversationally.)";

/// Result text of a summarize_task call; becomes the first visible message
/// after the truncated range.
pub fn continuation_prompt(summary: &str) -> String {
    format!(
        "This session is being continued from a previous conversation that ran out of context. The conversation is summarized below:\n\n{summary}\n\nContinue the task from where it left off without asking further questions. Resume with the next tool call."
    )
}

static REQUIRED_FILES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)8\.\s*(?:Optional\s+)?Required Files:\s*((?:\n\s*-\s*.+)+)")
        .expect("valid required files regex")
});

/// File paths listed under "8. Required Files:" in a summary.
pub fn parse_required_files(summary: &str) -> Vec<String> {
    let Some(captures) = REQUIRED_FILES.captures(summary) else {
        return Vec::new();
    };
    captures[1]
        .lines()
        .filter_map(|line| line.trim().strip_prefix('-'))
        .map(|path| path.trim().to_string())
        .filter(|path| !path.is_empty())
        .collect()
}
