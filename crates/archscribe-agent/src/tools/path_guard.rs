// ABOUTME: Deny-list check applied before any tool touches the filesystem.
// ABOUTME: Blocks credential stores and environment files regardless of where they live.

use std::path::{Component, Path, PathBuf};

pub(crate) const ACCESS_DENIED: &str = "Error: Access denied to sensitive path";
const SENSITIVE_FRAGMENTS: &[&str] = &[".ssh", ".aws", ".env"];

/// Lexically normalize `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// False for paths that reach system password files, SSH or AWS
/// credentials, or `.env` files.
pub fn is_path_safe(path: &str) -> bool {
    let normalized = normalize(Path::new(path));
    let text = normalized.to_string_lossy();
    if text.contains("/etc/passwd") || text.contains("/etc/shadow") {
        return false;
    }
    !normalized.components().any(|component| {
        let name = component.as_os_str().to_string_lossy();
        SENSITIVE_FRAGMENTS
            .iter()
            .any(|fragment| name.contains(fragment))
    })
}
