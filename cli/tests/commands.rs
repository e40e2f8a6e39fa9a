use std::path::Path;
use std::process::{Command, Output};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Run the binary with an isolated home so no user config leaks in.
fn parallax(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_parallax"))
        .args(args)
        .env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("RUST_LOG")
        .env("PARALLAX_LOG_LEVEL", "warn")
        .output()
        .expect("failed to launch parallax")
}

fn write_plan(dir: &Path, json: &str) -> String {
    let path = dir.join("plan.json");
    std::fs::write(&path, json).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn validate_prints_stages() {
    let home = TempDir::new().unwrap();
    let plan = write_plan(
        home.path(),
        r#"{"tasks": [
            {"id": "a", "run": "true"},
            {"id": "b", "run": "true", "depends_on": ["a"]},
            {"id": "c", "run": "true", "depends_on": ["a"]}
        ]}"#,
    );

    let out = parallax(home.path(), &["validate", &plan]);
    assert_eq!(out.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("stage 1: a"), "{stdout}");
    assert!(stdout.contains("stage 2: b, c"), "{stdout}");
}

#[test]
fn validate_rejects_cycles() {
    let home = TempDir::new().unwrap();
    let plan = write_plan(
        home.path(),
        r#"{"tasks": [{"id": "a", "run": "true"}, {"id": "b", "run": "true"}],
            "edges": [["a", "b"], ["b", "a"]]}"#,
    );

    let out = parallax(home.path(), &["validate", &plan]);
    assert_eq!(out.status.code(), Some(12));
    assert!(String::from_utf8_lossy(&out.stdout).contains("cycle:"));
}

#[test]
fn malformed_plan_is_a_plan_error() {
    let home = TempDir::new().unwrap();
    let plan = write_plan(home.path(), "[]");
    let out = parallax(home.path(), &["run", &plan]);
    assert_eq!(out.status.code(), Some(12));
}

#[cfg(unix)]
#[test]
fn run_writes_events_and_checkpoints() {
    let home = TempDir::new().unwrap();
    let plan = write_plan(
        home.path(),
        r#"{"tasks": [
            {"id": "make", "run": "echo built > artifact.txt", "files": ["artifact.txt"]},
            {"id": "check", "run": "grep built artifact.txt", "reads": ["artifact.txt"], "depends_on": ["make"]}
        ]}"#,
    );
    let events = home.path().join("events.jsonl");

    let out = parallax(
        home.path(),
        &["run", &plan, "--concurrency", "2", "--events-out", &events.to_string_lossy()],
    );
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert_eq!(out.status.code(), Some(0), "{stdout}");
    assert!(stdout.contains("completed 2, failed 0, blocked 0"), "{stdout}");

    let lines = std::fs::read_to_string(&events).unwrap();
    let first: serde_json::Value = serde_json::from_str(lines.lines().next().unwrap()).unwrap();
    assert_eq!(first["type"], "session_started");
    assert!(lines.lines().last().unwrap().contains("session_completed"));

    let checkpoints = home.path().join(".parallax").join("checkpoints");
    let report = parallax(home.path(), &["report", &checkpoints.to_string_lossy()]);
    assert_eq!(report.status.code(), Some(0));
    let text = String::from_utf8_lossy(&report.stdout);
    assert!(text.contains("(completed)"), "{text}");
}

#[cfg(unix)]
#[test]
fn failing_task_exits_non_zero() {
    let home = TempDir::new().unwrap();
    let plan = write_plan(
        home.path(),
        r#"{"tasks": [{"id": "boom", "run": "exit 4"}, {"id": "after", "run": "true", "depends_on": ["boom"]}]}"#,
    );

    let out = parallax(home.path(), &["run", &plan, "--max-retries", "0"]);
    assert_eq!(out.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("blocked by boom"), "{stdout}");
}
