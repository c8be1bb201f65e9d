//! Integration Test: Blocking I/O Prohibition
//!
//! **Policy**: async code in the composer crates MUST NOT use blocking I/O.
//! **Required**: `tokio::fs`, `tokio::net` and async `reqwest`, not `std::fs`,
//! `std::net` or `reqwest::blocking`
//!
//! Synchronous functions (configuration loading before the runtime starts)
//! may use `std::fs`.

use architectural_enforcement::{is_in_async_function, scan_production, Violation};

/// Test that async production code does not use blocking I/O
#[test]
fn test_no_blocking_io_in_async_code() {
    let violations = find_blocking_io_violations();

    if !violations.is_empty() {
        eprintln!("\n❌ CRITICAL: Blocking I/O calls found in async code!\n");
        for violation in &violations {
            eprintln!("  ❌ {violation}");
        }
        eprintln!("\n❌ FORBIDDEN blocking I/O:");
        eprintln!("  - std::fs::read(), std::fs::write(), std::fs::File");
        eprintln!("  - std::net::TcpStream, std::net::TcpListener");
        eprintln!("  - reqwest::blocking::*");
        eprintln!("\n✅ REQUIRED async I/O:");
        eprintln!("  - tokio::fs::read().await, tokio::fs::write().await");
        eprintln!("  - reqwest::Client::get().send().await");

        panic!(
            "\nFound {} blocking I/O violation(s) in async code.\nFix these before merging!",
            violations.len()
        );
    }
}

/// `reqwest::blocking` is never acceptable, sync or not
#[test]
fn test_no_blocking_http_client() {
    let violations = scan_production("Blocking HTTP client", |_, _, code| {
        code.contains("reqwest::blocking")
    });
    assert!(
        violations.is_empty(),
        "Blocking HTTP client in production code:\n{}",
        render(&violations)
    );
}

fn find_blocking_io_violations() -> Vec<Violation> {
    scan_production("Blocking I/O", |lines, idx, code| {
        let blocking = code.contains("std::fs::")
            || code.contains("std::net::")
            || code.contains("std::thread::sleep");
        blocking && is_in_async_function(lines, idx)
    })
}

fn render(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}
