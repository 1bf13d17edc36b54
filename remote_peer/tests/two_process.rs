//! Two-process tests
//!
//! Runs the real binary: the parent spawns itself as the child and talks to
//! it over piped stdio.

use std::io::Write;
use std::process::Command;

fn remote_peer() -> Command {
    Command::new(env!("CARGO_BIN_EXE_remote_peer"))
}

#[test]
fn test_parent_drives_child_over_stdio() {
    let output = remote_peer()
        .args(["--value", "21"])
        .output()
        .expect("Failed to run remote_peer");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("double = 42"), "stdout: {}", stdout);
    assert!(stdout.contains("add = 63"), "stdout: {}", stdout);
    assert!(stdout.contains("\"tags\":[\"parent\",\"child\"]"), "stdout: {}", stdout);
}

#[test]
fn test_config_file_is_shared_with_child() {
    let mut file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    write!(
        file,
        r#"{{ "stop_ack_timeout": 500, "recv_poll_interval": 20, "max_workers": 2 }}"#
    )
    .expect("Failed to write config");

    let output = remote_peer()
        .args(["--value", "5", "--config"])
        .arg(file.path())
        .output()
        .expect("Failed to run remote_peer");

    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("double = 10"));
}

#[test]
fn test_remote_failure_exits_nonzero() {
    let output = remote_peer()
        .args(["--value", &i64::MAX.to_string()])
        .output()
        .expect("Failed to run remote_peer");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Overflow"), "stderr: {}", stderr);
}

#[test]
fn test_invalid_arguments() {
    let output = remote_peer()
        .args(["--role", "sideways"])
        .output()
        .expect("Failed to run remote_peer");

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid role"));

    let output = remote_peer()
        .args(["--value"])
        .output()
        .expect("Failed to run remote_peer");
    assert!(!output.status.success());
}
