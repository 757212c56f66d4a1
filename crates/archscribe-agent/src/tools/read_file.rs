// ABOUTME: read_file tool: returns a file's text with a path header and right-aligned line numbers.
// ABOUTME: Failures carry a hint pointing the model at a better tool for the situation.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::extract::{ExtractError, extract_text};
use super::path_guard::{ACCESS_DENIED, is_path_safe};
use super::{ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, required_str, run_blocking};

const SEPARATOR_WIDTH: usize = 80;

pub struct ReadFileTool;

/// The header every successful read starts with. Context deduplication
/// keys on it to find repeated reads of one path.
pub fn read_file_header(path: &str) -> String {
    format!("File: {path}\n{}", "=".repeat(SEPARATOR_WIDTH))
}

fn number_lines(text: &str) -> String {
    text.lines()
        .enumerate()
        .map(|(i, line)| format!("{:>4} | {line}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn read_file(path: &str) -> ToolOutput {
    if !is_path_safe(path) {
        return ToolOutput::error(ACCESS_DENIED);
    }
    match extract_text(Path::new(path)) {
        Ok(text) => ToolOutput::text(format!("{}\n{}", read_file_header(path), number_lines(&text))),
        Err(e @ ExtractError::TooLarge { .. }) => ToolOutput::error(format!(
            "Error reading file: {e}\n\nFile: {path}\n\nUse search_files to find the relevant parts of this file instead."
        )),
        Err(ExtractError::Binary) => ToolOutput::error(format!(
            "Error reading file: Cannot read binary file\n\nFile: {path}\n\nUse list_files_recursive to look for source or documentation files instead."
        )),
        Err(e) => ToolOutput::error(format!("Error reading file: {e}\n\nFile: {path}")),
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file. Text is returned with line numbers. Jupyter notebooks, Word documents, spreadsheets, and PDFs are converted to text. Binary files and files over 20MB are refused."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "path",
            ParamType::String,
            "Absolute path of the file to read",
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
        tracing::debug!(path = %path, "reading file");
        run_blocking(self.name(), move || read_file(&path)).await
    }
}
