//! Executes a compiled [`Script`] against a live [`Session`].
//!
//! The driver keeps its own copy of everything the session produced and a
//! single cursor into it. Each node either waits for its expected bytes past
//! the cursor and advances it, or writes input. The cursor never moves back.

use crate::error::{lossy, ErrorCode, HarnessError, HarnessResult};
use crate::model::{elapsed_ms, NodeOutcome, NodeStatus};
use crate::retry::{Backoff, Deadline};
use crate::template::{Node, Script};
use crate::transport::Session;
use serde_json::json;
use std::time::{Duration, Instant};

/// Default per-node wait budget.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(5);

/// Extra bytes of context shown past the expected length on mismatch.
const MISMATCH_CONTEXT_BYTES: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Matching(usize),
    Matched(usize),
    Done,
    Failed(usize),
}

#[derive(Clone, Copy, Debug)]
pub struct DriverConfig {
    pub node_timeout: Duration,
    /// Overall deadline shared with the surrounding scenario.
    pub deadline: Option<Deadline>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            node_timeout: DEFAULT_NODE_TIMEOUT,
            deadline: None,
        }
    }
}

/// Summary of a completed script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverReport {
    pub nodes: Vec<NodeOutcome>,
    /// Bytes consumed by the script.
    pub cursor: usize,
    /// Bytes received past the cursor; not an error.
    pub trailing_bytes: usize,
}

pub struct Driver<'a, 's> {
    session: &'a mut (dyn Session + 's),
    config: DriverConfig,
    stream: Vec<u8>,
    cursor: usize,
    state: DriverState,
}

impl<'a, 's> Driver<'a, 's> {
    pub fn new(session: &'a mut (dyn Session + 's), config: DriverConfig) -> Self {
        Self {
            session,
            config,
            stream: Vec::new(),
            cursor: 0,
            state: DriverState::Idle,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Everything received from the session so far.
    pub fn transcript(&self) -> &[u8] {
        &self.stream
    }

    /// Run every node in order.
    ///
    /// # Errors
    /// `E_EXPECTATION_MISMATCH`, `E_TIMEOUT`, `E_STREAM_CLOSED`, or whatever
    /// the session reports while reading or writing.
    pub fn run(&mut self, script: &Script) -> HarnessResult<DriverReport> {
        self.run_with(script, |_| {})
    }

    /// [`run`](Self::run), calling `on_node` after each node completes.
    pub fn run_with<F>(&mut self, script: &Script, mut on_node: F) -> HarnessResult<DriverReport>
    where
        F: FnMut(&NodeOutcome),
    {
        let echoes = self.session.echoes_input();
        let mut outcomes = Vec::with_capacity(script.len());
        tracing::debug!(
            endpoint = %self.session.describe(),
            nodes = script.len(),
            echoes,
            "driver started"
        );
        for (index, node) in script.nodes().iter().enumerate() {
            self.state = DriverState::Matching(index);
            let started = Instant::now();
            let start = self.cursor;
            let status = match self.step(index, node, echoes) {
                Ok(status) => status,
                Err(err) => {
                    self.state = DriverState::Failed(index);
                    tracing::warn!(node_index = index, code = %err.code, cursor = self.cursor, "driver failed: {}", err.message);
                    return Err(err);
                }
            };
            let outcome = NodeOutcome {
                index,
                kind: node.kind(),
                status,
                start,
                end: self.cursor,
                elapsed_ms: elapsed_ms(&started),
            };
            self.state = DriverState::Matched(index);
            tracing::debug!(node_index = index, kind = ?outcome.kind, ?status, cursor = self.cursor, "node completed");
            on_node(&outcome);
            outcomes.push(outcome);
        }
        // Pick up anything already waiting so trailing output is reported.
        if let Err(err) = self.pull() {
            tracing::warn!(code = %err.code, cursor = self.cursor, "failed to read trailing output: {}", err.message);
        }
        self.state = DriverState::Done;
        let report = DriverReport {
            nodes: outcomes,
            cursor: self.cursor,
            trailing_bytes: self.stream.len().saturating_sub(self.cursor),
        };
        tracing::debug!(cursor = report.cursor, trailing = report.trailing_bytes, "driver done");
        Ok(report)
    }

    fn step(&mut self, index: usize, node: &Node, echoes: bool) -> HarnessResult<NodeStatus> {
        match node {
            Node::Conditional { enabled: false, .. } => Ok(NodeStatus::Skipped),
            Node::Input { text } => {
                self.session.write_line(text)?;
                tracing::debug!(node_index = index, input = %text, "input sent");
                if echoes {
                    self.expect(index, node.expected(true).as_bytes())?;
                    Ok(NodeStatus::Matched)
                } else {
                    Ok(NodeStatus::Sent)
                }
            }
            _ => {
                self.expect(index, node.expected(echoes).as_bytes())?;
                Ok(NodeStatus::Matched)
            }
        }
    }

    fn pull(&mut self) -> HarnessResult<usize> {
        let chunk = self.session.read_available()?;
        self.stream.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    fn node_deadline(&self) -> Deadline {
        match self.config.deadline {
            Some(deadline) => deadline.min_with(self.config.node_timeout),
            None => Deadline::after(self.config.node_timeout),
        }
    }

    /// Wait until `expected` is available past the cursor and consume it.
    fn expect(&mut self, index: usize, expected: &[u8]) -> HarnessResult<()> {
        if expected.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let deadline = self.node_deadline();
        let mut backoff = Backoff::default();
        loop {
            let closed = self.session.is_closed();
            if self.pull()? > 0 {
                backoff.reset();
            }
            let available = self.stream.get(self.cursor..).unwrap_or_default();
            let compared = available.len().min(expected.len());
            let (seen, wanted) = (
                available.get(..compared).unwrap_or_default(),
                expected.get(..compared).unwrap_or_default(),
            );
            if let Some(offset) = first_difference(seen, wanted) {
                return Err(self.mismatch(index, expected, offset));
            }
            if compared == expected.len() {
                self.cursor += expected.len();
                return Ok(());
            }
            if closed {
                return Err(self.failure(
                    ErrorCode::StreamClosed,
                    format!("output ended before node {index} completed"),
                    index,
                    expected,
                    &started,
                ));
            }
            if !backoff.wait(&deadline) {
                return Err(self.failure(
                    ErrorCode::Timeout,
                    format!("timed out waiting for node {index}"),
                    index,
                    expected,
                    &started,
                ));
            }
        }
    }

    fn mismatch(&self, index: usize, expected: &[u8], offset: usize) -> HarnessError {
        let available = self.stream.get(self.cursor..).unwrap_or_default();
        let shown = available
            .get(..available.len().min(expected.len() + MISMATCH_CONTEXT_BYTES))
            .unwrap_or_default();
        HarnessError::new(
            ErrorCode::ExpectationMismatch,
            format!(
                "output diverged from node {index} at byte {}",
                self.cursor + offset
            ),
            json!({
                "node_index": index,
                "cursor": self.cursor,
                "first_difference": offset,
                "expected": lossy(expected),
                "actual": lossy(shown),
            }),
        )
    }

    fn failure(
        &self,
        code: ErrorCode,
        message: String,
        index: usize,
        expected: &[u8],
        started: &Instant,
    ) -> HarnessError {
        let received = self.stream.get(self.cursor..).unwrap_or_default();
        HarnessError::new(
            code,
            message,
            json!({
                "node_index": index,
                "cursor": self.cursor,
                "expected": lossy(expected),
                "received": lossy(received),
                "waited_ms": elapsed_ms(started),
            }),
        )
    }
}

fn first_difference(seen: &[u8], wanted: &[u8]) -> Option<usize> {
    seen.iter().zip(wanted).position(|(a, b)| a != b)
}

/// Convenience: run `script` on `session` with `config`.
pub fn run_script(
    session: &mut dyn Session,
    script: &Script,
    config: DriverConfig,
) -> HarnessResult<DriverReport> {
    Driver::new(session, config).run(script)
}
