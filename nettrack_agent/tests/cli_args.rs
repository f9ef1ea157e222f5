//! CLI arg parsing tests for nettrack_agent
use assert_cmd::prelude::*;
use std::process::Command;

fn run_agent(args: &[&str]) -> (bool, String) {
    let output = Command::cargo_bin("nettrack_agent")
        .expect("binary exists")
        .args(args)
        .output()
        .expect("run nettrack_agent");
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    (output.status.success(), text)
}

#[test]
fn test_help_mentions_short_and_long_flags() {
    let (ok, text) = run_agent(&["--help"]);
    assert!(ok, "nettrack_agent --help did not succeed");
    assert!(
        text.contains("Usage:")
            && text.contains("--once")
            && text.contains("--interval")
            && text.contains("-i")
            && text.contains("--filter")
            && text.contains("-f"),
        "help text missing expected flags\n{text}"
    );
}

#[test]
fn test_flags_accepted_before_help() {
    for args in [
        &["--interval", "250", "--help"][..],
        &["-i", "250", "-f", "chrome", "--help"][..],
        &["--interval=250", "--filter=chrome", "--help"][..],
    ] {
        let (ok, text) = run_agent(args);
        assert!(ok, "{args:?} did not succeed");
        assert!(text.contains("Usage:"), "{args:?}: {text}");
    }
}

#[test]
fn test_unknown_flag_reports_usage() {
    let (_, text) = run_agent(&["--port", "3000"]);
    assert!(text.contains("Unexpected argument '--port'"), "{text}");
    assert!(text.contains("Usage:"));
}
