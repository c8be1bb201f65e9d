//! Architectural Enforcement Integration Tests
//!
//! Source scanners shared by the enforcement tests in `tests/`:
//! - No sleep() calls in production code
//! - No blocking I/O inside async code
//!
//! Scans are line-based. They skip comments and `#[cfg(test)]` modules, so
//! test code can wait on timers freely.

use std::fs;
use std::path::{Path, PathBuf};

/// Production source directories, relative to the workspace root
pub const PRODUCTION_DIRS: &[&str] = &["composer/core/src", "composer/headless/src"];

/// One offending line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// File containing the line
    pub path: PathBuf,
    /// 1-based line number
    pub line: usize,
    /// The trimmed source line
    pub source: String,
    /// What rule it breaks
    pub rule: &'static str,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} - {}: {}",
            self.path.display(),
            self.line,
            self.rule,
            self.source
        )
    }
}

/// Workspace root, two levels above this package
pub fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(2)
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// All `.rs` files under `dir`, relative to the workspace root
pub fn source_files(dir: &str) -> Vec<PathBuf> {
    let root = workspace_root().join(dir);
    if !root.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Read a file into lines; unreadable files yield nothing
pub fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// The part of a line before any `//` comment
pub fn code_part(line: &str) -> &str {
    line.split("//").next().unwrap_or(line)
}

/// Index of the first `#[cfg(test)]` line, if any
///
/// Everything from there on is treated as test code.
pub fn test_module_start(lines: &[String]) -> Option<usize> {
    lines
        .iter()
        .position(|line| line.trim_start().starts_with("#[cfg(test)]"))
}

/// Whether the line sits in a `#[test]` or `#[tokio::test]` function
pub fn is_in_test_function(lines: &[String], current_idx: usize) -> bool {
    for line in lines[..current_idx].iter().rev() {
        let line = line.trim();

        if line.starts_with("#[test]") || line.starts_with("#[tokio::test") {
            return true;
        }
        if (line.starts_with("fn ") || line.starts_with("async fn ") || line.starts_with("pub "))
            && line.contains("fn ")
            && !line.contains("test")
        {
            return false;
        }
        // Stop at module boundaries
        if line.starts_with("mod ") || line.starts_with("impl ") {
            return false;
        }
    }
    false
}

/// Whether the nearest enclosing function header above the line is `async`
pub fn is_in_async_function(lines: &[String], current_idx: usize) -> bool {
    for line in lines[..=current_idx].iter().rev() {
        let code = code_part(line).trim();
        if let Some(pos) = code.find("fn ") {
            let before = &code[..pos];
            let is_header = before.is_empty()
                || before.ends_with("pub ")
                || before.ends_with("pub(crate) ")
                || before.ends_with("async ")
                || before.ends_with("const ");
            if is_header {
                return before.contains("async");
            }
        }
        // Closures and blocks spawned onto the runtime
        if code.contains("async move {") || code.contains("tokio::spawn(") {
            return true;
        }
    }
    false
}

/// Scan production sources, reporting lines `matches` flags outside test code
pub fn scan_production<F>(rule: &'static str, mut matches: F) -> Vec<Violation>
where
    F: FnMut(&[String], usize, &str) -> bool,
{
    let mut violations = Vec::new();
    for dir in PRODUCTION_DIRS {
        for path in source_files(dir) {
            let lines = read_lines(&path);
            let end = test_module_start(&lines).unwrap_or(lines.len());
            for idx in 0..end {
                let code = code_part(&lines[idx]);
                if is_in_test_function(&lines, idx) {
                    continue;
                }
                if matches(&lines, idx, code) {
                    violations.push(Violation {
                        path: path.clone(),
                        line: idx + 1,
                        source: lines[idx].trim().to_string(),
                        rule,
                    });
                }
            }
        }
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(source: &[&str]) -> Vec<String> {
        source.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_code_part_strips_comments() {
        assert_eq!(code_part("let x = 1; // std::fs::read"), "let x = 1; ");
    }

    #[test]
    fn test_test_module_detection() {
        let source = lines(&["fn a() {}", "", "#[cfg(test)]", "mod tests {}"]);
        assert_eq!(test_module_start(&source), Some(2));
    }

    #[test]
    fn test_async_function_detection() {
        let source = lines(&[
            "pub async fn load(path: &Path) {",
            "    let x = read(path);",
            "}",
            "fn sync_load() {",
            "    let y = read(path);",
            "}",
        ]);
        assert!(is_in_async_function(&source, 1));
        assert!(!is_in_async_function(&source, 4));
    }

    #[test]
    fn test_workspace_root_contains_composer() {
        assert!(workspace_root().join("composer").exists());
        assert!(!source_files("composer/core/src").is_empty());
    }
}
