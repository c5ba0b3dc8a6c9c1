// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::fs;
use std::path::Path;
use std::process::Command;

use attachbox::{ErrorInfo, NodeSpec, RunResult, RunStatus, Scenario};

fn attachbox_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_attachbox"));
    cmd.env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

fn write_scenario(path: &Path, scenario: &Scenario) {
    fs::write(path, serde_json::to_vec_pretty(scenario).unwrap()).unwrap();
}

fn cat_scenario(script: &str) -> Scenario {
    let mut scenario = Scenario::new("cat", NodeSpec::new("/bin/cat"), script);
    scenario.shutdown.close_stdin = true;
    scenario.timeouts.node_ms = 1000;
    scenario
}

#[cfg(unix)]
#[test]
fn run_passing_scenario_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.json");
    write_scenario(&path, &cat_scenario("{{input \"hello\"}}\n"));

    let output = attachbox_bin()
        .args(["run", "--json", "--scenario"])
        .arg(&path)
        .output()
        .expect("failed to execute");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result: RunResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result.status, RunStatus::Passed);
    assert_eq!(result.nodes.len(), 2);
    assert_eq!(result.trailing_bytes, 0);
}

#[cfg(unix)]
#[test]
fn run_failing_scenario_exits_with_mismatch_code() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.json");
    write_scenario(&path, &cat_scenario("{{input \"hello\"}}\ngoodbye"));

    let output = attachbox_bin()
        .args(["run", "--json", "--scenario"])
        .arg(&path)
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(8), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let result: RunResult = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.error.unwrap().code.as_str(), "E_TIMEOUT");
}

#[cfg(unix)]
#[test]
fn run_with_bindings_and_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cat.yaml");
    let yaml = r#"
name: cat-bound
node:
  command: /bin/cat
script: '{{input "hi"}}{{if loud}}{{input "HI"}}{{end}}{{who}}'
shutdown:
  close_stdin: true
"#;
    fs::write(&path, yaml).unwrap();
    let artifacts = dir.path().join("artifacts");

    // `{{input}}` inside a conditional is a syntax error.
    let output = attachbox_bin()
        .args(["run", "--scenario"])
        .arg(&path)
        .args(["--bind", "who=x", "--flag", "loud=false"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(6));

    let yaml = yaml.replace(r#"{{if loud}}{{input "HI"}}{{end}}"#, "");
    fs::write(&path, yaml).unwrap();
    let output = attachbox_bin()
        .args(["run", "--verbose", "--scenario"])
        .arg(&path)
        .args(["--bind", "who=", "--artifacts"])
        .arg(&artifacts)
        .output()
        .expect("failed to execute");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("run started: cat-bound"));
    assert!(artifacts.join("run.json").exists());
    assert!(artifacts.join("checksums.json").exists());
}

#[test]
fn unknown_placeholder_json_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.json");
    write_scenario(&path, &cat_scenario("{{nobody}}"));

    let output = attachbox_bin()
        .args(["run", "--json", "--scenario"])
        .arg(&path)
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(4));
    let info: ErrorInfo = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(info.code.as_str(), "E_UNKNOWN_PLACEHOLDER");
}

#[test]
fn missing_scenario_file_is_io_error() {
    let output = attachbox_bin()
        .args(["run", "--scenario", "/definitely/not/here.json"])
        .output()
        .expect("failed to execute");
    assert_eq!(output.status.code(), Some(14));
}

#[test]
fn run_help_shows_verbose_flag() {
    let output = attachbox_bin()
        .args(["run", "--help"])
        .output()
        .expect("failed to execute");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--verbose"));
    assert!(stdout.contains("--artifacts"));
}
