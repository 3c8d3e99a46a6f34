//! Architectural Enforcement Integration Tests
//!
//! This package contains integration tests that enforce architectural principles:
//! - No sleep() calls in production code
//! - No blocking I/O inside async functions
//! - No panicking shortcuts in the conversation core
//! - The core stays free of UI and binary-only dependencies
//!
//! The helpers here read the workspace sources; the rules live in `tests/`.

use std::fs;
use std::path::{Path, PathBuf};

/// Root of the `voicekit/` crates
#[must_use]
pub fn voicekit_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join("voicekit")
}

/// Every `.rs` file under `voicekit/<crate_dir>/src`
#[must_use]
pub fn source_files(crate_dir: &str) -> Vec<PathBuf> {
    let root = voicekit_dir().join(crate_dir).join("src");
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.path().extension().and_then(|s| s.to_str()) == Some("rs"))
        .map(|entry| entry.into_path())
        .collect()
}

/// A production line: 1-based number, code with comments stripped, and
/// whether it sits inside an `async fn`
#[derive(Clone, Debug)]
pub struct CodeLine {
    /// 1-based line number
    pub number: usize,
    /// Code before any `//` comment
    pub code: String,
    /// The nearest enclosing function signature is `async`
    pub in_async_fn: bool,
}

/// Production lines of `path`
///
/// Everything from the first `#[cfg(test)]` on is test code and skipped,
/// matching the layout where unit tests close each module.
#[must_use]
pub fn production_lines(path: &Path) -> Vec<CodeLine> {
    let Ok(content) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut lines = Vec::new();
    let mut in_async_fn = false;
    for (idx, raw) in content.lines().enumerate() {
        let trimmed = raw.trim_start();
        if trimmed.starts_with("#[cfg(test)]") {
            break;
        }
        if trimmed.starts_with("//") {
            continue;
        }
        let code = raw.split("//").next().unwrap_or(raw).to_string();
        if is_fn_signature(&code) {
            in_async_fn = code.contains("async fn");
        }
        lines.push(CodeLine {
            number: idx + 1,
            code,
            in_async_fn,
        });
    }
    lines
}

fn is_fn_signature(code: &str) -> bool {
    let trimmed = code.trim_start();
    trimmed.starts_with("fn ")
        || trimmed.starts_with("pub fn ")
        || trimmed.starts_with("pub(crate) fn ")
        || trimmed.starts_with("async fn ")
        || trimmed.starts_with("pub async fn ")
        || trimmed.starts_with("pub(crate) async fn ")
}

/// Format a violation for the report
#[must_use]
pub fn violation(path: &Path, line: &CodeLine, what: &str) -> String {
    format!(
        "{}:{} - {}: {}",
        path.display(),
        line.number,
        what,
        line.code.trim()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_are_found() {
        assert!(!source_files("core").is_empty());
        assert!(!source_files("console").is_empty());
    }

    #[test]
    fn test_test_modules_are_skipped() {
        let dir = std::env::temp_dir().join(format!("arch-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let file = dir.join("sample.rs");
        fs::write(
            &file,
            "fn sync_one() {\n    a();\n}\n\nasync fn async_one() {\n    b(); // note\n}\n\n#[cfg(test)]\nmod tests {}\n",
        )
        .unwrap();

        let lines = production_lines(&file);
        assert_eq!(lines.len(), 8);
        assert!(!lines[1].in_async_fn);
        assert!(lines[5].in_async_fn);
        assert_eq!(lines[5].code.trim(), "b();");

        fs::remove_dir_all(&dir).unwrap();
    }
}
