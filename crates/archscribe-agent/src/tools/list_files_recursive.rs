// ABOUTME: list_files_recursive tool: a depth-limited file tree capped at a fixed number of entries.
// ABOUTME: Vendor and VCS directories are shown but never descended into.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use walkdir::{DirEntry, WalkDir};

use super::path_guard::{ACCESS_DENIED, is_path_safe};
use super::{
    ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, optional_u64, required_str,
    run_blocking,
};

pub const MAX_ENTRIES: usize = 200;
pub const DEFAULT_MAX_DEPTH: usize = 3;
const OPAQUE_DIRS: &[&str] = &[".git", "node_modules", "target", "dist"];

pub struct ListFilesRecursiveTool;

struct TreeEntry {
    depth: usize,
    name: String,
    is_dir: bool,
}

/// Children of opaque directories are filtered out, so the directory itself
/// still shows up in the tree.
fn inside_opaque_dir(entry: &DirEntry) -> bool {
    entry.depth() >= 2
        && entry
            .path()
            .parent()
            .and_then(Path::file_name)
            .is_some_and(|parent| OPAQUE_DIRS.iter().any(|dir| parent == *dir))
}

/// Collect at most one entry past the cap, so the caller knows whether the
/// listing was cut short.
fn collect_entries(path: &str, max_depth: usize) -> Result<Vec<TreeEntry>, walkdir::Error> {
    let walker = WalkDir::new(path)
        .min_depth(1)
        .max_depth(max_depth + 1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !inside_opaque_dir(entry));

    let mut entries = Vec::new();
    for item in walker {
        match item {
            Ok(entry) => entries.push(TreeEntry {
                depth: entry.depth(),
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: entry.file_type().is_dir(),
            }),
            Err(e) if e.depth() == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(
                    root = %path,
                    error = %e,
                    "skipping unreadable entry in file tree"
                );
            }
        }
        if entries.len() > MAX_ENTRIES {
            break;
        }
    }
    Ok(entries)
}

/// Whether `entries[index]` closes its sibling group. Unknown when the
/// listing was cut before the group ended, in which case more siblings exist.
fn is_last_sibling(entries: &[TreeEntry], index: usize, truncated: bool) -> bool {
    let depth = entries[index].depth;
    for later in &entries[index + 1..] {
        if later.depth < depth {
            return true;
        }
        if later.depth == depth {
            return false;
        }
    }
    !truncated
}

pub(crate) fn list_tree(path: &str, max_depth: usize) -> ToolOutput {
    if !is_path_safe(path) {
        return ToolOutput::error(ACCESS_DENIED);
    }
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return ToolOutput::error(format!("Error listing files: {path} is not a directory"));
        }
        Err(e) => return ToolOutput::error(format!("Error listing files: {e}")),
    }
    let entries = match collect_entries(path, max_depth) {
        Ok(entries) => entries,
        Err(e) => return ToolOutput::error(format!("Error listing files: {e}")),
    };
    if entries.is_empty() {
        return ToolOutput::text("Empty directory");
    }

    let hit_limit = entries.len() > MAX_ENTRIES;
    let shown = entries.len().min(MAX_ENTRIES);
    // closed[k] is true when the ancestor at depth k + 1 was the last of its siblings
    let mut closed: Vec<bool> = Vec::new();
    let mut lines = Vec::with_capacity(shown + 1);
    for (index, entry) in entries.iter().enumerate() {
        closed.truncate(entry.depth - 1);
        let prefix: String = closed
            .iter()
            .map(|&last| if last { "    " } else { "│   " })
            .collect();
        if index == MAX_ENTRIES {
            lines.push(format!(
                "{prefix}[Stopped: Listed {MAX_ENTRIES} files. Use search_files to find specific files.]"
            ));
            break;
        }

        let last = is_last_sibling(&entries, index, hit_limit);
        let connector = if last { "└── " } else { "├── " };
        if entry.is_dir {
            lines.push(format!("{prefix}{connector}📁 {}/", entry.name));
        } else {
            lines.push(format!("{prefix}{connector}📄 {}", entry.name));
        }
        closed.push(last);
    }

    let tree = lines.join("\n");
    if hit_limit {
        return ToolOutput::text(format!(
            "{tree}\n\n⚠️  Listing stopped at {MAX_ENTRIES} items. Use search_files tool to find specific files or patterns."
        ));
    }
    ToolOutput::text(tree)
}

#[async_trait]
impl Tool for ListFilesRecursiveTool {
    fn name(&self) -> &str {
        "list_files_recursive"
    }

    fn description(&self) -> &str {
        "Show the project as a file tree, descending up to max_depth levels (default 3). Output stops after 200 entries; use search_files to locate specific files in larger projects."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![
            ToolParameter::required("path", ParamType::String, "Absolute path of the root directory"),
            ToolParameter::optional(
                "max_depth",
                ParamType::Integer,
                "How many directory levels to descend (default 3)",
            ),
        ]
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::ReadOnly
    }

    async fn execute(&self, input: &Value) -> ToolOutput {
        let path = match required_str(input, "path") {
            Ok(path) => path.to_string(),
            Err(e) => return ToolOutput::error(e),
        };
        let max_depth = optional_u64(input, "max_depth")
            .map(|d| d as usize)
            .unwrap_or(DEFAULT_MAX_DEPTH);
        run_blocking(self.name(), move || list_tree(&path, max_depth)).await
    }
}
