// ABOUTME: The tool surface offered to the model: the Tool trait, descriptors, outputs, and the catalog.
// ABOUTME: Read-only exploration tools may run concurrently; diagram and control tools run one at a time.

mod append_diagram;
mod attempt_completion;
mod display_diagram;
mod extract;
mod list_code_definitions;
mod list_directories;
mod list_files_recursive;
mod path_guard;
mod read_file;
mod search_files;
mod summarize_task;

pub use append_diagram::AppendDiagramTool;
pub use attempt_completion::AttemptCompletionTool;
pub use display_diagram::DisplayDiagramTool;
pub use list_code_definitions::ListCodeDefinitionsTool;
pub use list_directories::ListDirectoriesTool;
pub use list_files_recursive::ListFilesRecursiveTool;
pub use path_guard::is_path_safe;
pub use read_file::{ReadFileTool, read_file_header};
pub use search_files::SearchFilesTool;
pub use summarize_task::SummarizeTaskTool;

use std::sync::Arc;

use archscribe_core::DiagramDocument;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;

/// The task's current diagram, shared between the diagram tools.
pub type DiagramSlot = Arc<Mutex<Option<DiagramDocument>>>;

pub fn new_diagram_slot() -> DiagramSlot {
    Arc::new(Mutex::new(None))
}

/// Tools that only read the filesystem and may run concurrently.
pub const READ_ONLY_TOOLS: &[&str] = &[
    "list_directories",
    "list_files_recursive",
    "read_file",
    "list_code_definition_names",
    "search_files",
];

/// Tools that change task state and run one at a time, in call order.
pub const WRITE_TOOLS: &[&str] = &[
    "display_diagram",
    "append_diagram",
    "attempt_completion",
    "summarize_task",
];

pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_TOOLS.contains(&name)
}

pub fn is_write_tool(name: &str) -> bool {
    WRITE_TOOLS.contains(&name)
}

/// Whether a tool may run alongside others in the same turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    ReadOnly,
    Mutating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Boolean,
}

impl ParamType {
    fn json_name(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolParameter {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
}

impl ToolParameter {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }
}

/// Provider-independent description of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

impl ToolDescriptor {
    /// JSON Schema object for the tool's input.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for param in &self.parameters {
            properties.insert(
                param.name.clone(),
                json!({"type": param.kind.json_name(), "description": param.description}),
            );
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// Side effects the task loop acts on after a tool ran.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEffect {
    None,
    DiagramUpdated { xml: String, cell_count: usize },
    DiagramRejected { truncated: bool, had_diagram: bool },
    Summarized { summary: String },
    Completed { result: String },
}

/// What a tool hands back. Failures are outputs too; executors never panic
/// or return errors to the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
    pub effect: ToolEffect,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
            effect: ToolEffect::None,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
            effect: ToolEffect::None,
        }
    }

    pub fn with_effect(mut self, effect: ToolEffect) -> Self {
        self.effect = effect;
        self
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> Vec<ToolParameter>;

    fn category(&self) -> ToolCategory;

    async fn execute(&self, input: &Value) -> ToolOutput;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

/// Fetch a required string parameter.
pub(crate) fn required_str<'a>(input: &'a Value, name: &str) -> Result<&'a str, String> {
    input
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("Missing required parameter: {name}"))
}

pub(crate) fn optional_str<'a>(input: &'a Value, name: &str) -> Option<&'a str> {
    input
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Integers sometimes arrive as strings; accept both.
pub(crate) fn optional_u64(input: &Value, name: &str) -> Option<u64> {
    match input.get(name)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn optional_bool(input: &Value, name: &str) -> Option<bool> {
    match input.get(name)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Run blocking filesystem work off the async executor.
pub(crate) async fn run_blocking<F>(tool: &str, work: F) -> ToolOutput
where
    F: FnOnce() -> ToolOutput + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(output) => output,
        Err(e) => {
            tracing::error!(tool = %tool, error = %e, "tool worker failed");
            ToolOutput::error(format!("Error: {tool} failed: {e}"))
        }
    }
}

/// The always-available tools: exploration, diagram building, and completion.
pub fn base_tools(diagram: DiagramSlot) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(ListDirectoriesTool),
        Arc::new(ListFilesRecursiveTool),
        Arc::new(ReadFileTool),
        Arc::new(SearchFilesTool),
        Arc::new(ListCodeDefinitionsTool),
        Arc::new(DisplayDiagramTool::new(Arc::clone(&diagram))),
        Arc::new(AppendDiagramTool::new(diagram)),
        Arc::new(AttemptCompletionTool),
    ]
}

/// An immutable base tool set plus per-task extensions, unioned on lookup.
#[derive(Clone)]
pub struct ToolCatalog {
    base: Arc<[Arc<dyn Tool>]>,
    extensions: Vec<Arc<dyn Tool>>,
}

impl ToolCatalog {
    pub fn new(base: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            base: base.into(),
            extensions: Vec::new(),
        }
    }

    /// Add a tool for the rest of the task. Returns false if a tool with the
    /// same name is already offered.
    pub fn extend(&mut self, tool: Arc<dyn Tool>) -> bool {
        if self.get(tool.name()).is_some() {
            return false;
        }
        self.extensions.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.base
            .iter()
            .chain(self.extensions.iter())
            .find(|tool| tool.name() == name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.base
            .iter()
            .chain(self.extensions.iter())
            .map(|tool| tool.descriptor())
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.base
            .iter()
            .chain(self.extensions.iter())
            .map(|tool| tool.name().to_string())
            .collect()
    }
}
