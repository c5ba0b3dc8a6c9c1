use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const SCENARIO_VERSION: u32 = 1;

/// One test case: launch a node, attach, drive a script, check the exit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_scenario_version")]
    pub scenario_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub node: NodeSpec,
    /// Endpoint string to attach to (`console`, `ipc:<path>`, `http://…`, `ws://…`).
    #[serde(default = "default_attach")]
    pub attach: String,
    /// Raw interaction script.
    pub script: String,
    /// Static value bindings available to the script.
    #[serde(default)]
    pub bindings: BTreeMap<String, String>,
    /// Static condition bindings available to the script.
    #[serde(default)]
    pub conditions: BTreeMap<String, bool>,
    #[serde(default)]
    pub readiness: Option<Readiness>,
    #[serde(default)]
    pub echo: EchoMode,
    #[serde(default)]
    pub shutdown: ShutdownPlan,
    #[serde(default)]
    pub expect_exit: ExitExpectation,
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_scenario_version() -> u32 {
    SCENARIO_VERSION
}

fn default_attach() -> String {
    crate::model::CONSOLE_ENDPOINT.to_string()
}

impl Scenario {
    /// Minimal scenario attaching to the node's own console.
    pub fn new(name: impl Into<String>, node: NodeSpec, script: impl Into<String>) -> Self {
        Self {
            scenario_version: SCENARIO_VERSION,
            name: name.into(),
            description: None,
            node,
            attach: default_attach(),
            script: script.into(),
            bindings: BTreeMap::new(),
            conditions: BTreeMap::new(),
            readiness: None,
            echo: EchoMode::default(),
            shutdown: ShutdownPlan::default(),
            expect_exit: ExitExpectation::default(),
            timeouts: Timeouts::default(),
        }
    }
}

/// How to launch the node process.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub env: EnvSpec,
    #[serde(default)]
    pub io: IoMode,
    #[serde(default)]
    pub capture: CaptureMode,
}

impl NodeSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: EnvSpec::default(),
            io: IoMode::default(),
            capture: CaptureMode::default(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    #[must_use]
    pub fn io(mut self, io: IoMode) -> Self {
        self.io = io;
        self
    }
}

/// Child environment.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvSpec {
    /// Start from the harness environment.
    #[serde(default = "default_true")]
    pub inherit: bool,
    /// Variables to set on top.
    #[serde(default)]
    pub set: BTreeMap<String, String>,
}

impl Default for EnvSpec {
    fn default() -> Self {
        Self {
            inherit: true,
            set: BTreeMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

/// How the child's standard streams are wired.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum IoMode {
    /// Plain OS pipes.
    #[default]
    Pipes,
    /// A pseudo-terminal of the given size.
    Pty { rows: u16, cols: u16 },
}

/// Where stderr goes.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Interleaved into the main output buffer.
    #[default]
    Combined,
    /// Kept in its own buffer so logs do not disturb the console stream.
    Separate,
}

/// Whether a remote session reproduces typed input in its output stream.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EchoMode {
    #[default]
    Echo,
    Silent,
}

/// Log line that signals the node is ready to be attached to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Readiness {
    /// Regular expression matched against the instance output.
    pub log_pattern: String,
}

/// Steps taken after the script completes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShutdownPlan {
    /// Line written to the node's stdin.
    #[serde(default)]
    pub exit_command: Option<String>,
    /// Close the node's stdin.
    #[serde(default)]
    pub close_stdin: bool,
    /// Send the interrupt signal.
    #[serde(default)]
    pub interrupt: bool,
}

/// Accepted process termination.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExitExpectation {
    Code(i32),
    Signaled,
    Any,
}

impl Default for ExitExpectation {
    fn default() -> Self {
        Self::Code(0)
    }
}

/// Time budgets, in milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timeouts {
    #[serde(default = "default_node_ms")]
    pub node_ms: u64,
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_exit_ms")]
    pub exit_ms: u64,
    #[serde(default = "default_scenario_ms")]
    pub scenario_ms: u64,
    #[serde(default = "default_call_ms")]
    pub call_ms: u64,
}

fn default_node_ms() -> u64 {
    5_000
}

fn default_connect_ms() -> u64 {
    10_000
}

fn default_exit_ms() -> u64 {
    10_000
}

fn default_scenario_ms() -> u64 {
    60_000
}

fn default_call_ms() -> u64 {
    5_000
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            node_ms: default_node_ms(),
            connect_ms: default_connect_ms(),
            exit_ms: default_exit_ms(),
            scenario_ms: default_scenario_ms(),
            call_ms: default_call_ms(),
        }
    }
}

impl Timeouts {
    pub fn node(&self) -> Duration {
        Duration::from_millis(self.node_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn exit(&self) -> Duration {
        Duration::from_millis(self.exit_ms)
    }

    pub fn scenario(&self) -> Duration {
        Duration::from_millis(self.scenario_ms)
    }

    pub fn call(&self) -> Duration {
        Duration::from_millis(self.call_ms)
    }
}
