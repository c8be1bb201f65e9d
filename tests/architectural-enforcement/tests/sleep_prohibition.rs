//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code in the composer crates MUST NOT call sleep
//! methods. Waiting happens on channels, `watch` receivers and `Notify`.
//! **Exceptions**: test code, periodic tasks driven by `tokio::time::interval`

use architectural_enforcement::{scan_production, Violation};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = find_sleep_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Sleep calls found in production code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n✅ ACCEPTABLE:");
        eprintln!("  - Test code (#[cfg(test)] modules, #[test] and #[tokio::test] functions)");
        eprintln!("  - Periodic tasks using tokio::time::interval()");
        eprintln!("\n❌ FORBIDDEN:");
        eprintln!("  - Sleep in polling loops");
        eprintln!("  - Sleep to 'wait' for a stream or a submission (use the event channel!)");

        panic!(
            "\nFound {} sleep violation(s) in production code.\nFix these before merging!",
            violations.len()
        );
    }
}

fn find_sleep_violations() -> Vec<Violation> {
    scan_production("Sleep call", |lines, idx, code| {
        (code.contains("::sleep(") || code.contains(".sleep(")) && !is_interval_pattern(lines, idx)
    })
}

/// Check if this is a `tokio::time::interval` loop
fn is_interval_pattern(lines: &[String], current_idx: usize) -> bool {
    let start = current_idx.saturating_sub(20);
    let end = std::cmp::min(current_idx + 5, lines.len());
    lines[start..end]
        .iter()
        .any(|line| line.contains("interval.tick()") || line.contains("tokio::time::interval"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_detection() {
        let source: Vec<String> = [
            "let mut interval = tokio::time::interval(period);",
            "loop {",
            "    interval.tick().await;",
            "    tokio::time::sleep(jitter).await;",
            "}",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();

        assert!(is_interval_pattern(&source, 3));
    }
}
