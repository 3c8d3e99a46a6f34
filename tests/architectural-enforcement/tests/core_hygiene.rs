//! Integration Test: Conversation Core Hygiene
//!
//! **Policy**: the core library propagates errors and logs through
//! `tracing`. It never panics on purpose, never prints, and never depends
//! on crates that only a binary or a UI needs.

use std::fs;

use architectural_enforcement::{production_lines, source_files, violation, voicekit_dir};

const PANICKING: &[(&str, &str)] = &[
    (".unwrap()", "unwrap"),
    (".expect(", "expect"),
    ("panic!(", "panic"),
    ("todo!(", "todo"),
    ("unimplemented!(", "unimplemented"),
];

const PRINTING: &[&str] = &["println!(", "eprintln!(", "print!(", "dbg!("];

#[test]
fn test_core_does_not_panic() {
    let mut violations = Vec::new();
    for path in source_files("core") {
        for line in production_lines(&path) {
            for (pattern, what) in PANICKING {
                if line.code.contains(pattern) {
                    violations.push(violation(&path, &line, what));
                }
            }
        }
    }
    assert!(
        violations.is_empty(),
        "Return a Result instead:\n{violations:#?}"
    );
}

#[test]
fn test_core_logs_instead_of_printing() {
    let mut violations = Vec::new();
    for path in source_files("core") {
        for line in production_lines(&path) {
            if PRINTING.iter().any(|pattern| line.code.contains(pattern)) {
                violations.push(violation(&path, &line, "Direct output"));
            }
        }
    }
    assert!(violations.is_empty(), "Use tracing:\n{violations:#?}");
}

#[test]
fn test_core_has_no_binary_dependencies() {
    let manifest = fs::read_to_string(voicekit_dir().join("core").join("Cargo.toml"))
        .expect("core manifest");

    let dependencies: Vec<&str> = manifest
        .lines()
        .skip_while(|line| line.trim() != "[dependencies]")
        .skip(1)
        .take_while(|line| !line.trim_start().starts_with('['))
        .filter_map(|line| line.split('=').next())
        .map(str::trim)
        .filter(|name| !name.is_empty() && !name.starts_with('#'))
        .collect();

    assert!(dependencies.contains(&"tokio"), "{dependencies:?}");
    for forbidden in ["clap", "anyhow", "tracing-subscriber", "ratatui", "crossterm"] {
        assert!(
            !dependencies.contains(&forbidden),
            "voicekit-core must not depend on {forbidden}"
        );
    }
}
