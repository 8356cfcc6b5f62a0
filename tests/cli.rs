mod common;

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;

use common::handbook;

fn docent_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docent");
    path
}

fn setup_test_env() -> TempDir {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("handbook.txt"), handbook()).unwrap();
    fs::write(
        tmp.path().join("note.md"),
        "# Parking\n\nVisitors park in the north lot.",
    )
    .unwrap();
    tmp
}

fn run(tmp: &TempDir, args: &[&str]) -> std::process::Output {
    Command::new(docent_binary())
        .args(args)
        .current_dir(tmp.path())
        .env("RUST_LOG", "error")
        .output()
        .expect("failed to run docent")
}

#[test]
fn test_segment_lists_chapters() {
    let tmp = setup_test_env();
    let output = run(&tmp, &["segment", "handbook.txt"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("large document"));
    assert!(stdout.contains("strategy: chapters"));
    assert!(stdout.contains("Chapter 3: Leave requests"));
    assert_eq!(stdout.matches("tokens  importance").count(), 6);
}

#[test]
fn test_segment_json() {
    let tmp = setup_test_env();
    let output = run(&tmp, &["segment", "note.md", "--json"]);
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["name"], "note.md");
    assert_eq!(json["kind"], "small");
}

#[test]
fn test_rank_puts_matching_chapter_first() {
    let tmp = setup_test_env();
    let output = run(&tmp, &["rank", "handbook.txt", "leave requests approval", "--limit", "2"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let first = stdout.lines().next().unwrap();
    assert!(first.starts_with("1. "));
    assert!(first.contains("Chapter 3: Leave requests"));
    assert_eq!(stdout.lines().count(), 2);
}

#[test]
fn test_context_respects_budget() {
    let tmp = setup_test_env();
    let output = run(&tmp, &["context", "handbook.txt", "travel receipts", "--budget", "3000"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("DOCUMENT CONTEXT:"));
    assert!(stdout.contains("=== Chapter 5: Travel ==="));
    assert!(stdout.len() / 4 <= 3_100);
}

#[test]
fn test_missing_file_fails() {
    let tmp = setup_test_env();
    let output = run(&tmp, &["segment", "nope.txt"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("nope.txt"));
}

#[test]
fn test_invalid_config_fails() {
    let tmp = setup_test_env();
    let config = tmp.path().join("bad.toml");
    fs::write(&config, "[cache]\ncapacity = 0\n").unwrap();
    let output = run(&tmp, &["--config", config.to_str().unwrap(), "segment", "note.md"]);
    assert!(!output.status.success());
}
