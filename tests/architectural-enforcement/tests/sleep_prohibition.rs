//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Waiting happens
//! on channels and I/O, never on the clock.
//! **Exceptions**: test code

use architectural_enforcement::{production_lines, source_files, violation};

#[test]
fn test_no_sleep_in_production_code() {
    let mut violations = Vec::new();

    for crate_dir in ["core", "console"] {
        for path in source_files(crate_dir) {
            for line in production_lines(&path) {
                if line.code.contains("::sleep(") || line.code.contains(".sleep(") {
                    violations.push(violation(&path, &line, "Sleep call"));
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nSleep calls found in production code:\n");
        for v in &violations {
            eprintln!("  {v}");
        }
        eprintln!("\nWait on a channel, a timer interval or the I/O itself instead.");
        panic!("Found {} sleep violation(s)", violations.len());
    }
}
