// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::fs;

use attachbox::scenario::{load_scenario_file, parse_scenario};
use attachbox::{CaptureMode, EchoMode, ErrorCode, ExitExpectation, IoMode, TransportKind};

const YAML: &str = r#"
name: ipc-welcome
node:
  command: attachbox-fake-node
  args: ["--nodiscover", "--maxpeers", "0", "--shh"]
  capture: separate
attach: "ipc:/tmp/node/skaina.ipc"
script: |
  Welcome to the skaina JavaScript console!
bindings:
  apis: "eth:1.0"
conditions:
  verbose: false
readiness:
  log_pattern: "IPC endpoint opened"
shutdown:
  interrupt: true
expect_exit: any
timeouts:
  connect_ms: 2000
"#;

#[test]
fn yaml_scenario_with_defaults() {
    let scenario = parse_scenario(YAML, true).unwrap();
    assert_eq!(scenario.name, "ipc-welcome");
    assert_eq!(scenario.scenario_version, 1);
    assert_eq!(scenario.node.capture, CaptureMode::Separate);
    assert_eq!(scenario.node.io, IoMode::Pipes);
    assert!(scenario.node.env.inherit);
    assert_eq!(scenario.echo, EchoMode::Echo);
    assert!(scenario.shutdown.interrupt);
    assert!(!scenario.shutdown.close_stdin);
    assert_eq!(scenario.expect_exit, ExitExpectation::Any);
    assert_eq!(scenario.timeouts.connect_ms, 2000);
    assert_eq!(scenario.timeouts.node_ms, 5000);
    assert_eq!(scenario.timeouts.scenario_ms, 60_000);
    assert_eq!(scenario.bindings["apis"], "eth:1.0");
    assert!(!scenario.conditions["verbose"]);
}

#[test]
fn json_scenario_minimal() {
    let scenario = parse_scenario(
        r#"{"name": "cat", "node": {"command": "/bin/cat", "io": {"mode": "pty", "rows": 24, "cols": 80}}, "script": "x"}"#,
        false,
    )
    .unwrap();
    assert_eq!(scenario.attach, "console");
    assert_eq!(scenario.node.io, IoMode::Pty { rows: 24, cols: 80 });
    assert!(scenario.readiness.is_none());
    assert_eq!(scenario.expect_exit, ExitExpectation::Code(0));
}

#[test]
fn file_extension_selects_format() {
    let dir = tempfile::tempdir().unwrap();
    let yaml = dir.path().join("welcome.yml");
    fs::write(&yaml, YAML).unwrap();
    assert_eq!(load_scenario_file(&yaml).unwrap().name, "ipc-welcome");

    let json = dir.path().join("welcome.json");
    fs::write(&json, YAML).unwrap();
    let err = load_scenario_file(&json).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
    assert_eq!(err.context.unwrap()["format"], "json");
}

#[test]
fn missing_file_is_io() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_scenario_file(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(err.code, ErrorCode::Io);
}

#[test]
fn missing_required_field_is_config() {
    let err = parse_scenario("name: x\nscript: y\n", true).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
}

#[test]
fn transport_kind_serializes_snake_case() {
    assert_eq!(serde_json::to_string(&TransportKind::DomainSocket).unwrap(), "\"domain_socket\"");
}
