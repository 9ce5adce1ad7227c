//! End-to-end tests for the dw binary

use std::fs;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

/// `dw` with an isolated configuration file
fn dw(config: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_dw"));
    cmd.env("DIRWATCH_CONFIG", config)
        .env_remove("DIRWATCH_METHOD")
        .env_remove("DIRWATCH_POLL_INTERVAL")
        .env_remove("RUST_LOG");
    cmd
}

fn stdout_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_config_path_honors_override() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");

    let output = dw(&config).args(["config", "--path"]).output().unwrap();

    assert!(output.status.success());
    assert_eq!(stdout_of(&output).trim(), config.display().to_string());
}

#[test]
fn test_config_prints_effective_values() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");
    fs::write(&config, "poll_interval_ms = 250\npreferred_backend = \"stat\"\n").unwrap();

    let output = dw(&config).arg("config").output().unwrap();

    assert!(output.status.success());
    let stdout = stdout_of(&output);
    assert!(stdout.contains("poll_interval_ms = 250"));
    assert!(stdout.contains("preferred_backend = \"stat\""));
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");
    fs::write(&config, "poll_interval_ms = 0\n").unwrap();

    let output = dw(&config).arg("config").output().unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_unknown_method_is_a_usage_error() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");

    let output = dw(&config)
        .args(["watch", "--method", "carrier-pigeon"])
        .arg(temp_dir.path())
        .output()
        .unwrap();

    assert!(!output.status.success());
}

#[test]
fn test_watch_prints_created_file_as_json() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("dirwatch.toml");
    fs::write(&config, "poll_interval_ms = 100\n").unwrap();
    let watched = temp_dir.path().join("watched");
    fs::create_dir(&watched).unwrap();

    let mut child = dw(&config)
        .args(["watch", "--files", "--json", "--method", "stat", "--duration", "3"])
        .arg(&watched)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    thread::sleep(Duration::from_millis(1000));
    let file = watched.join("hello.txt");
    fs::write(&file, b"hi").unwrap();

    let output = child.wait_with_output().unwrap();
    let stdout = stdout_of(&output);

    assert!(output.status.success());
    let created = stdout
        .lines()
        .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
        .any(|event| event["kind"] == "created" && event["path"] == file.display().to_string());
    assert!(created, "no created event in output:\n{}", stdout);
}
