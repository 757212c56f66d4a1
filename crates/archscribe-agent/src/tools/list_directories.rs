// ABOUTME: list_directories tool: one level of a directory, each entry marked as file or directory.

use std::fs;

use async_trait::async_trait;
use serde_json::Value;

use super::path_guard::{ACCESS_DENIED, is_path_safe};
use super::{ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, required_str, run_blocking};

pub struct ListDirectoriesTool;

pub(crate) fn list_directory(path: &str) -> ToolOutput {
    if !is_path_safe(path) {
        return ToolOutput::error(ACCESS_DENIED);
    }
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => return ToolOutput::error(format!("Error reading directory: {e}")),
    };

    let mut rows: Vec<(String, bool)> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            (entry.file_name().to_string_lossy().into_owned(), is_dir)
        })
        .collect();
    if rows.is_empty() {
        return ToolOutput::text("Empty directory");
    }
    rows.sort();

    let lines: Vec<String> = rows
        .into_iter()
        .map(|(name, is_dir)| {
            let kind = if is_dir { "📁 DIR" } else { "📄 FILE" };
            format!("{kind}  {name}")
        })
        .collect();
    ToolOutput::text(lines.join("\n"))
}

#[async_trait]
impl Tool for ListDirectoriesTool {
    fn name(&self) -> &str {
        "list_directories"
    }

    fn description(&self) -> &str {
        "List the immediate contents of a directory, marking each entry as a file or a directory. Use it for a quick look at one level of the project."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "path",
            ParamType::String,
            "Absolute path of the directory to list",
        )]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let path = match required_str(input, "path") {
            Ok(path) => path.to_string(),
            Err(e) => return ToolOutput::error(e),
        };
        run_blocking(self.name(), move || list_directory(&path)).await
    }
}
