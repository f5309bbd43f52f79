//! Smoke tests for the `runhook` binary.
//!
//! Each test builds a throwaway unit directory with a charm directory and
//! fake hook tools on `PATH`, then runs the binary the way the orchestrator
//! would.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

struct Unit {
    dir: TempDir,
}

impl Unit {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("charm")).unwrap();
        std::fs::create_dir(dir.path().join("bin")).unwrap();
        let unit = Unit { dir };
        unit.tool("relation-ids", "echo '[]'");
        unit.tool("config-get", "echo '\"hi there\"'");
        unit.tool("status-set", "echo \"$@\" > \"$CHARM_DIR/../status\"");
        unit.tool("juju-log", "exit 0");
        unit
    }

    fn tool(&self, name: &str, body: &str) {
        let path = self.dir.path().join("bin").join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn charm_dir(&self) -> PathBuf {
        self.path("charm")
    }

    fn bare(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_runhook"));
        let path = format!("{}:/usr/bin:/bin", self.path("bin").display());
        cmd.env_clear().env("PATH", path).env("CHARMKIT_LOG", "debug");
        cmd
    }

    fn runhook(&self, args: &[&str]) -> Output {
        self.bare()
            .args(args)
            .env("JUJU_MODEL_UUID", "5f2a7c9e-model")
            .env("JUJU_UNIT_NAME", "kit/0")
            .env("CHARM_DIR", self.charm_dir())
            .env("JUJU_CONTEXT_ID", "kit/0-hook-1")
            .env("JUJU_AGENT_SOCKET", self.path("agent.socket"))
            .output()
            .expect("failed to execute runhook")
    }
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn read_json(path: &Path) -> serde_json::Value {
    let data = std::fs::read(path).unwrap_or_else(|e| panic!("{}: {e}", path.display()));
    serde_json::from_slice(&data).unwrap()
}

// ── Arguments and environment ────────────────────────────────────────────────

#[test]
fn no_arguments_is_a_precondition_failure() {
    let unit = Unit::new();
    let output = unit.runhook(&[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("no hook name provided"), "{}", stderr(&output));
}

#[test]
fn unknown_command_prints_sorted_usage() {
    let unit = Unit::new();
    let output = unit.runhook(&["cmd-nope"]);
    assert_eq!(output.status.code(), Some(2));
    let err = stderr(&output);
    assert!(
        err.contains(
            "usage: runhook cmd-counter/status [arg...]\n\t| runhook cmd-counter/watch [arg...]"
        ),
        "{err}"
    );
    assert!(err.contains("\n\t| runhook config-changed\n\t| runhook install"), "{err}");
}

#[test]
fn unknown_hook_is_a_usage_error() {
    let unit = Unit::new();
    let output = unit.runhook(&["leader-elected"]);
    assert_eq!(output.status.code(), Some(2), "{}", stderr(&output));
}

#[test]
fn missing_environment_is_reported_by_name() {
    let unit = Unit::new();
    let output = unit
        .bare()
        .arg("install")
        .output()
        .expect("failed to execute runhook");
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("JUJU_MODEL_UUID"), "{}", stderr(&output));
}

// ── Hooks and commands ───────────────────────────────────────────────────────

#[test]
fn install_is_counted_and_visible_to_status() {
    let unit = Unit::new();
    let output = unit.runhook(&["install"]);
    assert!(output.status.success(), "install failed: {}", stderr(&output));

    let counter = read_json(&unit.path("charmkit-state/counter.json"));
    assert_eq!(counter["hooks"], 1);
    assert!(unit.path("charmkit-state/peer.json").exists());

    let output = unit.runhook(&["cmd-counter/status", "--json"]);
    assert!(output.status.success(), "status failed: {}", stderr(&output));
    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["hooks"], 1);
    assert_eq!(status["last_hook"], "install");
}

#[test]
fn config_changed_sets_greeting_status() {
    let unit = Unit::new();
    let output = unit.runhook(&["config-changed"]);
    assert!(output.status.success(), "config-changed failed: {}", stderr(&output));
    let status = std::fs::read_to_string(unit.path("status")).unwrap();
    assert_eq!(status.trim(), "active hi there");
}

#[test]
fn failing_tool_fails_the_hook() {
    let unit = Unit::new();
    unit.tool("relation-ids", "echo 'error: permission denied' >&2; exit 1");
    let output = unit.runhook(&["install"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("permission denied"), "{}", stderr(&output));
}

#[test]
fn state_dir_comes_from_charm_config() {
    let unit = Unit::new();
    std::fs::write(unit.charm_dir().join("charmkit.toml"), "state_dir = \"state\"\n").unwrap();
    let output = unit.runhook(&["start"]);
    assert!(output.status.success(), "start failed: {}", stderr(&output));
    assert_eq!(read_json(&unit.path("charm/state/counter.json"))["last_hook"], "start");
}

#[test]
fn watch_command_runs_until_done() {
    let unit = Unit::new();
    let output = unit.runhook(&["cmd-counter/watch", "--iterations", "2", "--interval-ms", "1"]);
    assert!(output.status.success(), "watch failed: {}", stderr(&output));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["no hooks run yet"; 2]);
}

#[test]
fn command_help_goes_to_stdout() {
    let unit = Unit::new();
    let output = unit.runhook(&["cmd-counter/status", "--help"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("--json"));
}
