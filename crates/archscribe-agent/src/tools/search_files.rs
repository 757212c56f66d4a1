// ABOUTME: search_files tool: case-insensitive regex search over a glob-filtered set of files.
// ABOUTME: Scans a bounded number of files and reports a bounded number of matching lines per file.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use glob::Pattern;
use regex::RegexBuilder;
use serde_json::Value;
use walkdir::WalkDir;

use super::path_guard::{ACCESS_DENIED, is_path_safe};
use super::{
    ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, optional_str, required_str,
    run_blocking,
};

pub const MAX_FILES: usize = 50;
pub const MAX_MATCHES_PER_FILE: usize = 10;
const DEFAULT_FILE_PATTERN: &str = "**/*";
const IGNORED_DIRS: &[&str] = &["node_modules", ".git", "dist", "target"];

pub struct SearchFilesTool;

struct FileMatches {
    relative: String,
    lines: Vec<(usize, String)>,
}

pub(crate) fn search(root: &str, pattern: &str, file_pattern: &str) -> ToolOutput {
    if !is_path_safe(root) {
        return ToolOutput::error(ACCESS_DENIED);
    }
    let regex = match RegexBuilder::new(pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(e) => return ToolOutput::error(format!("Error searching files: invalid regex: {e}")),
    };
    let glob = match Pattern::new(file_pattern) {
        Ok(glob) => glob,
        Err(e) => {
            return ToolOutput::error(format!("Error searching files: invalid file pattern: {e}"));
        }
    };
    let root_path = Path::new(root);
    if !root_path.is_dir() {
        return ToolOutput::error(format!("Error searching files: {root} is not a directory"));
    }

    let candidates = WalkDir::new(root_path)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && IGNORED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry
                .path()
                .strip_prefix(root_path)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");
            // a bare name pattern like "*.rs" also matches nested files
            let selected = glob.matches(&relative)
                || glob.matches(&entry.file_name().to_string_lossy());
            selected.then(|| (entry.into_path(), relative))
        })
        .take(MAX_FILES);

    let mut found = Vec::new();
    for (path, relative) in candidates {
        // unreadable or non-UTF-8 files are skipped
        let Ok(content) = fs::read_to_string(&path) else {
            continue;
        };
        let lines: Vec<(usize, String)> = content
            .lines()
            .enumerate()
            .filter(|(_, line)| regex.is_match(line))
            .take(MAX_MATCHES_PER_FILE)
            .map(|(i, line)| (i + 1, line.trim().to_string()))
            .collect();
        if !lines.is_empty() {
            found.push(FileMatches { relative, lines });
        }
    }

    if found.is_empty() {
        return ToolOutput::text(format!("No matches found for pattern: {pattern}"));
    }

    let mut out = format!("Found {} file(s) with matches:\n", found.len());
    for file in found {
        out.push_str(&format!("\n📄 {}\n", file.relative));
        for (line_no, text) in file.lines {
            out.push_str(&format!("  Line {line_no}: {text}\n"));
        }
    }
    ToolOutput::text(out.trim_end())
}

#[async_trait]
impl Tool for SearchFilesTool {
    fn name(&self) -> &str {
        "search_files"
    }

    fn description(&self) -> &str {
        "Search file contents with a case-insensitive regular expression. Only the first 50 files matching file_pattern are scanned and at most 10 matching lines are reported per file. node_modules, .git, dist, and target are skipped."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "Absolute path of the directory to search"),
            ToolParameter::required("regex", ParamType::String, "Regular expression to look for"),
            ToolParameter::optional(
                "file_pattern",
                ParamType::String,
                "Glob restricting which files are searched, e.g. *.ts (default **/*)",
            ),
        ]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let (path, regex) = match (required_str(input, "path"), required_str(input, "regex")) {
            (Ok(path), Ok(regex)) => (path.to_string(), regex.to_string()),
            (Err(e), _) | (_, Err(e)) => return ToolOutput::error(e),
        };
        let file_pattern = optional_str(input, "file_pattern")
            .unwrap_or(DEFAULT_FILE_PATTERN)
            .to_string();
        run_blocking(self.name(), move || search(&path, &regex, &file_pattern)).await
    }
}
