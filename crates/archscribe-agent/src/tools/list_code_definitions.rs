// ABOUTME: list_code_definition_names tool: a pattern-based scan for declared names in one source file.
// ABOUTME: Approximate by construction; it matches declaration shapes, it does not parse the language.

use std::fs;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use super::path_guard::{ACCESS_DENIED, is_path_safe};
use super::{ParamType, Tool, ToolCategory, ToolOutput, ToolParameter, required_str, run_blocking};

/// Declaration shapes, scanned in this order. The last one matches any
/// indented `name(` and so also picks up calls and control keywords.
static DEFINITION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:export\s+)?(?:async\s+)?function\s+(\w+)",
        r"(?:export\s+)?class\s+(\w+)",
        r"(?:export\s+)?interface\s+(\w+)",
        r"(?:export\s+)?type\s+(\w+)",
        r"(?:export\s+)?const\s+(\w+)\s*=",
        r"(?m)^\s+(?:async\s+)?(\w+)\s*\(",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid definition pattern"))
    .collect()
});

pub struct ListCodeDefinitionsTool;

/// Names in first-seen order, without repeats.
pub(crate) fn definition_names(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for pattern in DEFINITION_PATTERNS.iter() {
        for captures in pattern.captures_iter(source) {
            let name = &captures[1];
            if !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

pub(crate) fn list_definitions(path: &str) -> ToolOutput {
    if !is_path_safe(path) {
        return ToolOutput::error(ACCESS_DENIED);
    }
    let source = match fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => return ToolOutput::error(format!("Error analyzing file: {e}")),
    };
    let names = definition_names(&source);
    if names.is_empty() {
        return ToolOutput::text(format!("No code definitions found in {path}"));
    }
    let listing: Vec<String> = names.iter().map(|name| format!("  - {name}")).collect();
    ToolOutput::text(format!("Code definitions in {path}:\n{}", listing.join("\n")))
}

#[async_trait]
impl Tool for ListCodeDefinitionsTool {
    fn name(&self) -> &str {
        "list_code_definition_names"
    }

    fn description(&self) -> &str {
        "List the functions, classes, interfaces, types, and constants declared in a source file without reading its full content. The scan is pattern based and approximate."
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        vec![ToolParameter::required(
            "path",
            ParamType::String,
            "Absolute path of the source file",
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
        run_blocking(self.name(), move || list_definitions(&path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SERVICE_TS: &str = r#"
export interface User { id: string }
export type UserId = string;
export const DEFAULT_LIMIT = 20;

export class UserService {
  constructor(private repo: Repo) {}

  async findAll() {
    return this.repo.list();
  }
}

export async function bootstrap() {}
function helper() {}
"#;

    #[test]
    fn extracts_declared_names_in_pattern_order() {
        let names = definition_names(SERVICE_TS);
        assert_eq!(
            names,
            vec![
                "bootstrap",
                "helper",
                "UserService",
                "User",
                "UserId",
                "DEFAULT_LIMIT",
                "constructor",
                "findAll",
            ]
        );
    }

    #[test]
    fn scan_is_pattern_based_not_syntax_aware() {
        // keywords inside function bodies and names in comments are picked up
        let source = "// class Ghost\nfn run() {\n    if (ready) {\n        start();\n    }\n}\n";
        let names = definition_names(source);
        assert!(names.contains(&"Ghost".to_string()));
        assert!(names.contains(&"if".to_string()));
        assert!(names.contains(&"start".to_string()));
        // Rust's fn keyword is not one of the shapes
        assert!(!names.contains(&"run".to_string()));
    }

    #[test]
    fn repeated_names_are_listed_once() {
        let names = definition_names("function a() {}\nfunction a() {}\n  a(1)\n");
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn formats_listing_and_empty_result() {
        let dir = TempDir::new().unwrap();
        let with_defs = dir.path().join("service.ts");
        let without = dir.path().join("notes.txt");
        fs::write(&with_defs, "class Router {}\n").unwrap();
        fs::write(&without, "plain prose\n").unwrap();

        let path = with_defs.to_str().unwrap();
        assert_eq!(
            list_definitions(path).content,
            format!("Code definitions in {path}:\n  - Router")
        );
        let path = without.to_str().unwrap();
        assert_eq!(
            list_definitions(path).content,
            format!("No code definitions found in {path}")
        );
    }

    #[test]
    fn unreadable_file_is_an_error_output() {
        let output = list_definitions("/no/such/source.ts");
        assert!(output.is_error);
        assert!(output.content.starts_with("Error analyzing file"));
    }
}
