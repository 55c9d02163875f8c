#![cfg(all(unix, feature = "cli"))]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const BANNER: &[u8] = b"capabilities: getencoding runcommand\nencoding: UTF-8\npid: 77";

fn frame(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = vec![tag];
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn result(code: i32) -> Vec<u8> {
    let mut out = vec![b'r', 0, 0, 0, 4];
    out.extend_from_slice(&code.to_be_bytes());
    out
}

fn emit(bytes: &[u8]) -> String {
    let escaped: String = bytes.iter().map(|b| format!("\\{b:03o}")).collect();
    format!("printf '{escaped}'")
}

/// `dd` swallowing one request for `argv`: marker, length, NUL-joined blob.
fn consume(argv: &[&str]) -> String {
    let blob = argv.join("\0").len();
    format!(
        "dd bs=1 count={} of=/dev/null 2>/dev/null",
        "runcommand\n".len() + 4 + blob
    )
}

/// Write a config that launches `sh -c <script>` with no preflight checks.
fn write_config(dir: &Path, script: &str) -> PathBuf {
    let config = serde_json::json!({
        "program": "sh",
        "server_args": ["-c", script],
        "min_version": null,
        "repository_marker": null,
        "startup_timeout_ms": 5000,
        "shutdown_timeout_ms": 1000,
    });
    let path = dir.join("server.json");
    std::fs::write(&path, config.to_string()).expect("config should be writable");
    path
}

fn cmdserver(args: &[&str], config: &Path, stdin: &[u8]) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_cmdserver"))
        .args(["--log-level", "error"])
        .args(args)
        .env("CMDSERVER_CONFIG", config)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("cmdserver should start");
    child
        .stdin
        .take()
        .expect("stdin should be piped")
        .write_all(stdin)
        .expect("stdin should be writable");
    child.wait_with_output().expect("cmdserver should finish")
}

#[test]
fn run_writes_raw_output_and_passes_code_through() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let script = [
        emit(&frame(b'o', BANNER)),
        consume(&["status"]),
        emit(&frame(b'o', b"M a.txt\n")),
        emit(&frame(b'e', b"warning: dirty\n")),
        emit(&result(2)),
        "exec cat >/dev/null".to_string(),
    ]
    .join("; ");
    let config = write_config(dir.path(), &script);

    let out = cmdserver(&["run", repo, "--", "status"], &config, b"");
    assert_eq!(out.status.code(), Some(2));
    assert_eq!(out.stdout, b"M a.txt\n");
    assert_eq!(String::from_utf8_lossy(&out.stderr), "warning: dirty\n");
}

#[test]
fn run_failure_maps_to_exit_code() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let script = [
        emit(&frame(b'o', BANNER)),
        consume(&["pull", "nonexistent"]),
        emit(&frame(b'e', b"abort: not found\n")),
        emit(&result(255)),
        "exec cat >/dev/null".to_string(),
    ]
    .join("; ");
    let config = write_config(dir.path(), &script);

    let out = cmdserver(&["run", repo, "--", "pull", "nonexistent"], &config, b"");
    assert_eq!(out.status.code(), Some(1));
    assert!(out.stdout.is_empty());
    assert!(String::from_utf8_lossy(&out.stderr).contains("abort: not found"));
}

#[test]
fn run_json_summary() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let script = [
        emit(&frame(b'o', BANNER)),
        consume(&["log", "-l", "1"]),
        emit(&frame(b'o', b"abc123\n")),
        emit(&result(0)),
        "exec cat >/dev/null".to_string(),
    ]
    .join("; ");
    let config = write_config(dir.path(), &script);

    let out = cmdserver(
        &["--format", "json", "run", repo, "--", "log", "-l", "1"],
        &config,
        b"",
    );
    assert_eq!(out.status.code(), Some(0));
    let summary: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("stdout should be json");
    assert_eq!(summary["code"], 0);
    assert_eq!(summary["output"], "abc123\n");
    assert_eq!(summary["command"], serde_json::json!(["log", "-l", "1"]));
}

#[test]
fn hello_prints_banner_fields() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let script = [
        emit(&frame(b'o', BANNER)),
        "exec cat >/dev/null".to_string(),
    ]
    .join("; ");
    let config = write_config(dir.path(), &script);

    let out = cmdserver(&["hello", repo, "--format", "json"], &config, b"");
    assert_eq!(out.status.code(), Some(0));
    let hello: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("stdout should be json");
    assert_eq!(hello["pid"], 77);
    assert_eq!(hello["encoding"], "UTF-8");
    assert_eq!(
        hello["capabilities"],
        serde_json::json!(["getencoding", "runcommand"])
    );
}

#[test]
fn batch_reuses_one_server() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let script = format!(
        "{}; for n in 1 2; do {}; {}; {}; done; exec cat >/dev/null",
        emit(&frame(b'o', BANNER)),
        consume(&["id", "-n"]),
        emit(&frame(b'o', b"7\n")),
        emit(&result(0)),
    );
    let config = write_config(dir.path(), &script);

    let out = cmdserver(&["batch", repo], &config, b"id -n\n\n  id   -n  \n");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(out.stdout, b"7\n7\n");
}

#[test]
fn version_prints_package_version() {
    let out = Command::new(env!("CARGO_BIN_EXE_cmdserver"))
        .arg("version")
        .output()
        .expect("version should run");
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        format!("cmdserver {}", env!("CARGO_PKG_VERSION"))
    );
}

#[test]
fn missing_config_is_usage_error() {
    let dir = tempfile::tempdir().expect("temp dir should be creatable");
    let repo = dir.path().to_str().expect("temp path should be utf-8");
    let out = cmdserver(
        &["run", repo, "--", "id"],
        &dir.path().join("absent.json"),
        b"",
    );
    assert_eq!(out.status.code(), Some(64));
}
