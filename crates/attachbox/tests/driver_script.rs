// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::collections::VecDeque;
use std::time::Duration;

use attachbox::driver::{run_script, Driver, DriverConfig, DriverState};
use attachbox::error::{HarnessError, HarnessResult};
use attachbox::template::{self, Bindings};
use attachbox::transport::Session;
use attachbox::{Endpoint, ErrorCode, NodeStatus};

/// In-memory session: hands out prepared chunks one per read and answers
/// every written line with a fixed reply.
struct ScriptedSession {
    endpoint: Endpoint,
    chunks: VecDeque<Vec<u8>>,
    echo: bool,
    reply: Option<String>,
    close_when_drained: bool,
    reject_writes: bool,
    fail_drained_reads: bool,
    written: Vec<String>,
}

impl ScriptedSession {
    fn new(chunks: &[&str]) -> Self {
        Self {
            endpoint: Endpoint::local_console(),
            chunks: chunks.iter().map(|chunk| chunk.as_bytes().to_vec()).collect(),
            echo: true,
            reply: None,
            close_when_drained: false,
            reject_writes: false,
            fail_drained_reads: false,
            written: Vec::new(),
        }
    }

    fn silent(mut self) -> Self {
        self.echo = false;
        self
    }

    fn closing(mut self) -> Self {
        self.close_when_drained = true;
        self
    }

    fn failing_once_drained(mut self) -> Self {
        self.fail_drained_reads = true;
        self
    }

    fn rejecting_writes(mut self) -> Self {
        self.reject_writes = true;
        self
    }

    fn reply(mut self, text: &str) -> Self {
        self.reply = Some(text.to_string());
        self
    }
}

impl Session for ScriptedSession {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn write_line(&mut self, line: &str) -> HarnessResult<()> {
        if self.reject_writes {
            return Err(HarnessError::new(ErrorCode::StreamClosed, "session is closed", serde_json::json!({ "line": line })));
        }
        self.written.push(line.to_string());
        let mut output = String::new();
        if self.echo {
            output.push_str(line);
            output.push('\n');
        }
        if let Some(reply) = &self.reply {
            output.push_str(reply);
        }
        if !output.is_empty() {
            self.chunks.push_back(output.into_bytes());
        }
        Ok(())
    }

    fn read_available(&mut self) -> HarnessResult<Vec<u8>> {
        match self.chunks.pop_front() {
            Some(chunk) => Ok(chunk),
            None if self.fail_drained_reads => Err(HarnessError::new(
                ErrorCode::Io,
                "read failed",
                serde_json::json!({ "endpoint": self.endpoint.to_string() }),
            )),
            None => Ok(Vec::new()),
        }
    }

    fn is_closed(&self) -> bool {
        self.close_when_drained && self.chunks.is_empty()
    }

    fn echoes_input(&self) -> bool {
        self.echo
    }
}

fn quick() -> DriverConfig {
    DriverConfig {
        node_timeout: Duration::from_millis(200),
        deadline: None,
    }
}

fn bindings() -> Bindings {
    Bindings::new()
        .constant("name", "skaina")
        .flag("ipc", true)
        .flag("http", false)
}

#[test]
fn matches_output_split_across_reads() {
    let script = template::compile(
        "Welcome to the {{name}} console!\n{{if ipc}}ipc\n{{end}}{{if http}}http\n{{end}}> {{input \"exit\"}}\n",
        &bindings(),
    )
    .unwrap();
    let mut session = ScriptedSession::new(&["Welc", "ome to the sk", "aina console!\nip", "c\n> "]);
    let report = run_script(&mut session, &script, quick()).unwrap();

    assert_eq!(session.written, vec!["exit"]);
    assert_eq!(report.trailing_bytes, 0);
    assert_eq!(report.nodes.len(), script.len());
    let statuses: Vec<NodeStatus> = report.nodes.iter().map(|node| node.status).collect();
    assert!(statuses.contains(&NodeStatus::Skipped));
    assert_eq!(statuses.last(), Some(&NodeStatus::Matched));
    assert_eq!(report.cursor, script.expected_text(true).len());
}

#[test]
fn trailing_output_is_reported_not_rejected() {
    let script = template::compile("hello", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["hello world"]);
    let report = run_script(&mut session, &script, quick()).unwrap();
    assert_eq!(report.cursor, 5);
    assert_eq!(report.trailing_bytes, 6);
}

#[test]
fn divergence_fails_immediately_with_context() {
    let script = template::compile("Welcome to the {{name}} console!", &bindings()).unwrap();
    let mut session = ScriptedSession::new(&["Welcome to the other console!"]);
    let err = run_script(&mut session, &script, quick()).unwrap_err();
    assert_eq!(err.code, ErrorCode::ExpectationMismatch);
    let context = err.context.unwrap();
    assert_eq!(context["node_index"], 1);
    assert_eq!(context["cursor"], 15);
    assert_eq!(context["first_difference"], 0);
    assert_eq!(context["expected"], "skaina");
}

#[test]
fn starved_node_times_out() {
    let script = template::compile("abc then more", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["abc"]);
    let err = run_script(&mut session, &script, quick()).unwrap_err();
    assert_eq!(err.code, ErrorCode::Timeout);
    let context = err.context.unwrap();
    assert_eq!(context["received"], "abc");
}

#[test]
fn closed_stream_fails_without_waiting_for_timeout() {
    let script = template::compile("abc then more", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["abc"]).closing();
    let config = DriverConfig {
        node_timeout: Duration::from_secs(30),
        deadline: None,
    };
    let started = std::time::Instant::now();
    let err = run_script(&mut session, &script, config).unwrap_err();
    assert_eq!(err.code, ErrorCode::StreamClosed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn silent_session_sends_input_without_expecting_echo() {
    let script = template::compile("> {{input \"eth.blockNumber\"}}0\n> ", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["> "]).silent().reply("0\n> ");
    let report = run_script(&mut session, &script, quick()).unwrap();
    assert_eq!(report.nodes[1].status, NodeStatus::Sent);
    assert_eq!(session.written, vec!["eth.blockNumber"]);
}

#[test]
fn input_echo_is_matched_as_part_of_the_node() {
    let script = template::compile("> {{input \"exit\"}}\n", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["> "]);
    let mut seen = Vec::new();
    let mut driver = Driver::new(&mut session, quick());
    let report = driver
        .run_with(&script, |outcome| seen.push((outcome.index, outcome.status)))
        .unwrap();
    assert_eq!(driver.state(), DriverState::Done);
    assert_eq!(driver.transcript(), b"> exit\n");
    assert_eq!(
        seen,
        vec![(0, NodeStatus::Matched), (1, NodeStatus::Matched), (2, NodeStatus::Matched)]
    );
    assert_eq!(report.nodes[1].start, 2);
    assert_eq!(report.nodes[1].end, 6);
    assert_eq!(report.nodes[2].end, 7);
    assert_eq!(report.trailing_bytes, 0);
}

#[test]
fn line_end_after_input_comes_from_the_script() {
    let script = template::compile("hello\n> {{input \"exit\"}}\nbye\n", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["hello\n> "]).reply("bye\n").closing();
    let report = run_script(&mut session, &script, quick()).unwrap();
    assert_eq!(report.cursor, "hello\n> exit\nbye\n".len());
    assert_eq!(report.trailing_bytes, 0);
}

#[test]
fn read_error_after_the_last_node_does_not_fail_the_script() {
    let script = template::compile("hello", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["hello"]).failing_once_drained();
    let report = run_script(&mut session, &script, quick()).unwrap();
    assert_eq!(report.cursor, 5);
    assert_eq!(report.trailing_bytes, 0);
}

#[test]
fn failed_write_surfaces_the_session_error() {
    let script = template::compile("hi\n{{input \"x\"}}", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["hi\n"]).rejecting_writes();
    let err = run_script(&mut session, &script, quick()).unwrap_err();
    assert_eq!(err.code, ErrorCode::StreamClosed);
    assert!(session.written.is_empty());
}

#[test]
fn failed_driver_keeps_its_state() {
    let script = template::compile("abc", &Bindings::new()).unwrap();
    let mut session = ScriptedSession::new(&["xyz"]);
    let mut driver = Driver::new(&mut session, quick());
    assert!(driver.run(&script).is_err());
    assert_eq!(driver.state(), DriverState::Failed(0));
    assert_eq!(driver.cursor(), 0);
}
