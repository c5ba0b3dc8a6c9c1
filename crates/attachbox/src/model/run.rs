use crate::error::{ErrorInfo, HarnessError, HarnessResult};
use crate::model::{RunId, TransportKind};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const RUN_RESULT_VERSION: u32 = 1;

/// Lifecycle state of a supervised process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum ExitState {
    /// Still running.
    Pending,
    /// Exited on its own with this code.
    Exited(i32),
    /// Terminated by this signal number.
    Signaled(i32),
    /// Force-killed by the harness.
    Killed,
}

impl ExitState {
    pub fn is_pending(self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Exit code if the process exited normally.
    pub fn code(self) -> Option<i32> {
        match self {
            Self::Exited(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Exited(code) => write!(f, "exited with code {code}"),
            Self::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            Self::Killed => f.write_str("killed by harness"),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Passed,
    Failed,
}

/// Which script node kind an outcome refers to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Literal,
    Field,
    Conditional,
    Input,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Expected bytes were observed.
    Matched,
    /// Disabled conditional, nothing expected.
    Skipped,
    /// Input written; the session does not echo so nothing was matched.
    Sent,
}

/// Per-node record of a driver run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeOutcome {
    pub index: usize,
    pub kind: NodeKind,
    pub status: NodeStatus,
    /// Cursor before the node ran.
    pub start: usize,
    /// Cursor after the node completed.
    pub end: usize,
    pub elapsed_ms: u64,
}

/// Serializable record of one scenario run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunResult {
    pub run_result_version: u32,
    pub run_id: RunId,
    pub scenario: String,
    pub status: RunStatus,
    /// Wall-clock start, RFC 3339.
    pub started_at: String,
    pub duration_ms: u64,
    pub endpoint: String,
    pub transport: TransportKind,
    pub pid: Option<u32>,
    pub nodes: Vec<NodeOutcome>,
    pub cursor: usize,
    pub trailing_bytes: usize,
    pub exit: Option<ExitState>,
    pub error: Option<ErrorInfo>,
    pub output_tail: Option<String>,
    pub stderr_tail: Option<String>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.status == RunStatus::Passed
    }

    /// Turn a failed run into its error, for test code that wants `?`.
    pub fn into_result(self) -> HarnessResult<Self> {
        match (self.status, &self.error) {
            (RunStatus::Passed, _) => Ok(self),
            (RunStatus::Failed, Some(info)) => Err(HarnessError::from(info.clone())),
            (RunStatus::Failed, None) => Err(HarnessError::internal(format!(
                "scenario '{}' failed without an error record",
                self.scenario
            ))),
        }
    }
}

pub(crate) fn elapsed_ms(started: &std::time::Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
