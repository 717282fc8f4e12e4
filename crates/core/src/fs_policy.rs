//! Filesystem security policy enforcement.
//!
//! Validates caller-supplied paths before they are used for file mutation
//! inside a sandbox. Container paths are always POSIX, regardless of the
//! host platform, so validation works on slash-separated segments rather
//! than `std::path` components.

use crate::{Error, Result};

/// Resolve a caller-supplied path against the sandbox workspace root.
///
/// Rejects absolute paths (POSIX and Windows-drive style) and any path that
/// escapes the root through `..` segments. Returns the absolute in-container
/// path, e.g. `resolve_workspace_path("/workspace", "src/a.txt")` →
/// `"/workspace/src/a.txt"`.
pub fn resolve_workspace_path(root: &str, input: &str) -> Result<String> {
    if input.starts_with('/') || input.starts_with('\\') {
        return Err(Error::security(format!(
            "Absolute paths are not allowed in sandbox: {}",
            input
        )));
    }
    if input.len() >= 2
        && input.as_bytes()[1] == b':'
        && input.as_bytes()[0].is_ascii_alphabetic()
    {
        return Err(Error::security(format!(
            "Absolute paths are not allowed in sandbox: {}",
            input
        )));
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in input.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(Error::security(format!(
                        "Path traversal detected in path: {}",
                        input
                    )));
                }
            }
            s => segments.push(s),
        }
    }

    if segments.is_empty() {
        return Err(Error::invalid_request(format!(
            "Path resolves to the workspace root itself: {}",
            input
        )));
    }

    Ok(format!(
        "{}/{}",
        root.trim_end_matches('/'),
        segments.join("/")
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert_eq!(
            resolve_workspace_path("/workspace", "main.py").unwrap(),
            "/workspace/main.py"
        );
        assert_eq!(
            resolve_workspace_path("/workspace", "src/app.js").unwrap(),
            "/workspace/src/app.js"
        );
        assert_eq!(
            resolve_workspace_path("/workspace", "./local.txt").unwrap(),
            "/workspace/local.txt"
        );
        assert_eq!(
            resolve_workspace_path("/workspace/", "a//b.txt").unwrap(),
            "/workspace/a/b.txt"
        );
    }

    #[test]
    fn test_interior_dotdot_is_normalized() {
        assert_eq!(
            resolve_workspace_path("/workspace", "src/../docs/readme.md").unwrap(),
            "/workspace/docs/readme.md"
        );
    }

    #[test]
    fn test_traversal_rejection() {
        assert!(resolve_workspace_path("/workspace", "../etc/passwd").is_err());
        assert!(resolve_workspace_path("/workspace", "src/../../etc/passwd").is_err());
    }

    #[test]
    fn test_absolute_path_rejection() {
        assert!(resolve_workspace_path("/workspace", "/etc/passwd").is_err());
        assert!(resolve_workspace_path("/workspace", "C:\\Windows\\System32").is_err());
    }

    #[test]
    fn test_empty_path_rejection() {
        assert!(resolve_workspace_path("/workspace", "").is_err());
        assert!(resolve_workspace_path("/workspace", "./").is_err());
    }
}
