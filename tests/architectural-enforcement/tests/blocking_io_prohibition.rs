//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: Inside `async fn`, I/O goes through `tokio::fs`, `tokio::io`
//! and `reqwest`'s async client.
//! **Acceptable**: blocking calls in plain functions that run before the
//! runtime does (config loading), and test code.

use architectural_enforcement::{production_lines, source_files, violation};

const FORBIDDEN: &[(&str, &str)] = &[
    ("std::fs::", "Blocking file I/O"),
    ("std::net::", "Blocking network I/O"),
    ("std::thread::sleep", "Thread sleep"),
    ("reqwest::blocking", "Blocking HTTP client"),
    (".blocking_send(", "Blocking channel send"),
    (".blocking_recv(", "Blocking channel receive"),
    ("std::io::stdin()", "Blocking stdin"),
];

#[test]
fn test_no_blocking_io_in_async_code() {
    let mut violations = Vec::new();

    for crate_dir in ["core", "console"] {
        for path in source_files(crate_dir) {
            for line in production_lines(&path) {
                if !line.in_async_fn {
                    continue;
                }
                for (pattern, what) in FORBIDDEN {
                    if line.code.contains(pattern) {
                        violations.push(violation(&path, &line, what));
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nBlocking I/O found in async code:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        panic!("Found {} blocking I/O violation(s)", violations.len());
    }
}

#[test]
fn test_no_blocking_http_anywhere() {
    let violations: Vec<String> = ["core", "console"]
        .into_iter()
        .flat_map(source_files)
        .flat_map(|path| {
            production_lines(&path)
                .into_iter()
                .filter(|line| line.code.contains("reqwest::blocking"))
                .map(|line| violation(&path, &line, "Blocking HTTP client"))
                .collect::<Vec<_>>()
        })
        .collect();

    assert!(violations.is_empty(), "{violations:#?}");
}
