//! Scenario loading and orchestration.
//!
//! [`run_scenario`] ties the pieces together for one test case: it checks
//! the script against the available bindings, starts the node, waits for it
//! to become ready, attaches, drives the script and finally shuts the node
//! down and checks how it exited.

pub mod progress;

pub use progress::{NoopProgress, ProgressCallback, ProgressEvent};

use crate::artifacts::{ArtifactsWriter, ArtifactsWriterConfig};
use crate::driver::{Driver, DriverConfig, DriverReport};
use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{
    elapsed_ms, Endpoint, ExitExpectation, ExitState, RunId, RunResult, RunStatus, Scenario,
    ShutdownPlan, TransportKind, RUN_RESULT_VERSION,
};
use crate::retry::{Backoff, Deadline};
use crate::supervisor::{self, Instance, InstanceConfig, OUTPUT_TAIL_BYTES};
use crate::template::{Bindings, Script, Template};
use crate::transport::{self, AttachOptions};
use regex::Regex;
use serde_json::json;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Longest readiness pattern accepted.
pub const MAX_REGEX_PATTERN_LEN: usize = 1000;

#[derive(Clone, Default)]
pub struct RunOptions {
    pub artifacts: Option<ArtifactsWriterConfig>,
    pub progress: Option<Arc<dyn ProgressCallback>>,
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("artifacts", &self.artifacts)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Load a scenario from a `.json`, `.yaml` or `.yml` file.
pub fn load_scenario_file(path: &Path) -> HarnessResult<Scenario> {
    let data = fs::read_to_string(path)
        .map_err(|err| HarnessError::io("failed to read scenario file", err).with_context("path", path.display().to_string()))?;
    let yaml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));
    parse_scenario(&data, yaml)
}

/// Parse scenario text as YAML or JSON.
pub fn parse_scenario(data: &str, yaml: bool) -> HarnessResult<Scenario> {
    let parsed = if yaml {
        serde_yml::from_str(data).map_err(|err| err.to_string())
    } else {
        serde_json::from_str(data).map_err(|err| err.to_string())
    };
    parsed.map_err(|source| {
        HarnessError::config(
            "failed to parse scenario",
            json!({ "format": if yaml { "yaml" } else { "json" }, "source": source }),
        )
    })
}

/// Bindings every script gets for free.
///
/// `pid` resolves only once the instance exists.
pub fn builtin_bindings(endpoint: &Endpoint, pid: Option<u32>) -> Bindings {
    let kind = endpoint.kind();
    Bindings::new()
        .with_host_defaults()
        .value("pid", move || pid.map(|pid| pid.to_string()))
        .constant("endpoint", endpoint.address())
        .constant("transport", kind.as_str())
        .flag("console", kind == TransportKind::LocalConsole)
        .flag("ipc", kind == TransportKind::DomainSocket)
        .flag("http", kind == TransportKind::Http)
        .flag("ws", kind == TransportKind::WebSocket)
}

/// The scenario file's own `bindings` and `conditions`.
pub fn scenario_bindings(scenario: &Scenario) -> Bindings {
    let values = scenario
        .bindings
        .iter()
        .fold(Bindings::new(), |acc, (name, value)| acc.constant(name.clone(), value.clone()));
    scenario
        .conditions
        .iter()
        .fold(values, |acc, (name, enabled)| acc.flag(name.clone(), *enabled))
}

fn layered_bindings(scenario: &Scenario, endpoint: &Endpoint, pid: Option<u32>, caller: &Bindings) -> Bindings {
    builtin_bindings(endpoint, pid)
        .extend(scenario_bindings(scenario))
        .extend(caller.clone())
}

struct Preflight {
    template: Template,
    endpoint: Endpoint,
    readiness: Option<Regex>,
}

/// Everything that can be checked without starting a process.
fn preflight(scenario: &Scenario, caller: &Bindings) -> HarnessResult<Preflight> {
    if scenario.timeouts.scenario_ms == 0 || scenario.timeouts.node_ms == 0 {
        return Err(HarnessError::config(
            "scenario and node timeouts must be positive",
            json!({ "timeouts": scenario.timeouts }),
        ));
    }
    let template = Template::parse(&scenario.script)?;
    let endpoint = Endpoint::parse(&scenario.attach)?;
    let readiness = scenario
        .readiness
        .as_ref()
        .map(|readiness| compile_pattern(&readiness.log_pattern))
        .transpose()?;
    let known = layered_bindings(scenario, &endpoint, None, caller);
    let unknown = template.unknown_placeholders(&known);
    if let Some(first) = unknown.first() {
        return Err(HarnessError::new(
            ErrorCode::UnknownPlaceholder,
            format!("script references unknown placeholder '{first}'"),
            json!({ "unknown": unknown, "known": known.names().collect::<Vec<_>>() }),
        ));
    }
    Ok(Preflight {
        template,
        endpoint,
        readiness,
    })
}

fn compile_pattern(pattern: &str) -> HarnessResult<Regex> {
    if pattern.len() > MAX_REGEX_PATTERN_LEN {
        return Err(HarnessError::config(
            "readiness pattern too long",
            json!({ "max_len": MAX_REGEX_PATTERN_LEN, "len": pattern.len() }),
        ));
    }
    Regex::new(pattern).map_err(|err| {
        HarnessError::config(
            "invalid readiness pattern",
            json!({ "pattern": pattern, "source": err.to_string() }),
        )
    })
}

/// What a run produced, kept for the result and the artifacts even on failure.
#[derive(Default)]
struct RunRecord {
    script: Option<Script>,
    transcript: Vec<u8>,
    report: Option<DriverReport>,
    exit: Option<ExitState>,
}

/// Run one scenario.
///
/// Problems found before the node starts (bad script, unknown placeholder,
/// bad endpoint, spawn failure) are returned as `Err`. Anything that goes
/// wrong afterwards yields a `RunResult` with status `Failed`; use
/// [`RunResult::into_result`] to turn that into an error.
pub fn run_scenario(scenario: &Scenario, bindings: Bindings, options: RunOptions) -> HarnessResult<RunResult> {
    let run_id = RunId::new();
    let started = Instant::now();
    let started_at = chrono::Utc::now().to_rfc3339();
    let progress: Arc<dyn ProgressCallback> = options.progress.clone().unwrap_or_else(|| Arc::new(NoopProgress));
    progress.on_progress(&ProgressEvent::RunStarted {
        run_id,
        scenario: scenario.name.clone(),
    });
    tracing::info!(%run_id, scenario = %scenario.name, attach = %scenario.attach, "scenario started");

    let Preflight {
        template,
        endpoint,
        readiness,
    } = preflight(scenario, &bindings)?;

    let mut artifacts = options.artifacts.map(ArtifactsWriter::new).transpose()?;
    if let Some(writer) = artifacts.as_mut() {
        writer.write_scenario(scenario)?;
    }

    let deadline = Deadline::after(scenario.timeouts.scenario());
    let instance = supervisor::start(InstanceConfig::from_spec(&scenario.node))?;
    progress.on_progress(&ProgressEvent::InstanceStarted { pid: instance.pid() });

    let mut record = RunRecord::default();
    let context = RunContext {
        scenario,
        endpoint: &endpoint,
        instance: &instance,
        deadline,
        progress: progress.as_ref(),
    };
    let outcome = context.drive(&template, readiness.as_ref(), &bindings, &mut record);

    if let Err(err) = &outcome {
        tracing::warn!(%run_id, code = %err.code, "scenario failed: {}", err.message);
        if let Err(kill_err) = instance.kill() {
            tracing::warn!(%run_id, "failed to kill instance: {}", kill_err.message);
        }
    }
    let exit = record.exit.or_else(|| Some(instance.exit_state()));

    let report = record.report.as_ref();
    let run_result = RunResult {
        run_result_version: RUN_RESULT_VERSION,
        run_id,
        scenario: scenario.name.clone(),
        status: if outcome.is_ok() { RunStatus::Passed } else { RunStatus::Failed },
        started_at,
        duration_ms: elapsed_ms(&started),
        endpoint: endpoint.to_string(),
        transport: endpoint.kind(),
        pid: Some(instance.pid()),
        nodes: report.map(|r| r.nodes.clone()).unwrap_or_default(),
        cursor: report.map_or(0, |r| r.cursor),
        trailing_bytes: report.map_or(0, |r| r.trailing_bytes),
        exit,
        error: outcome.as_ref().err().map(HarnessError::to_error_info),
        output_tail: Some(instance.output().tail_string(OUTPUT_TAIL_BYTES)),
        stderr_tail: instance.stderr().map(|buffer| buffer.tail_string(OUTPUT_TAIL_BYTES)),
    };

    if let Some(writer) = artifacts.as_mut() {
        write_artifacts(writer, &record, &instance, &run_result)?;
    }

    progress.on_progress(&ProgressEvent::RunCompleted {
        run_id,
        success: run_result.passed(),
        duration_ms: run_result.duration_ms,
    });
    tracing::info!(%run_id, status = ?run_result.status, duration_ms = run_result.duration_ms, "scenario finished");
    Ok(run_result)
}

fn write_artifacts(
    writer: &mut ArtifactsWriter,
    record: &RunRecord,
    instance: &Instance,
    run_result: &RunResult,
) -> HarnessResult<()> {
    if let Some(script) = &record.script {
        writer.write_script(script)?;
    }
    writer.write_transcript(&record.transcript)?;
    writer.write_instance_log(&instance.output().snapshot())?;
    if let Some(stderr) = instance.stderr() {
        writer.write_instance_stderr(&stderr.snapshot())?;
    }
    writer.write_run_result(run_result)
}

struct RunContext<'a> {
    scenario: &'a Scenario,
    endpoint: &'a Endpoint,
    instance: &'a Instance,
    deadline: Deadline,
    progress: &'a dyn ProgressCallback,
}

impl RunContext<'_> {
    fn drive(
        &self,
        template: &Template,
        readiness: Option<&Regex>,
        caller: &Bindings,
        record: &mut RunRecord,
    ) -> HarnessResult<()> {
        let timeouts = &self.scenario.timeouts;
        if let Some(pattern) = readiness {
            wait_for_log(self.instance, pattern, self.deadline.min_with(timeouts.connect()))?;
        }

        let bindings = layered_bindings(self.scenario, self.endpoint, Some(self.instance.pid()), caller);
        let script = template.compile(&bindings)?;
        record.script = Some(script.clone());

        let attach = AttachOptions {
            connect_timeout: timeouts.connect(),
            call_timeout: timeouts.call(),
            echo: self.scenario.echo,
            deadline: Some(self.deadline),
        };
        let mut session = transport::open(self.endpoint, Some(self.instance), &attach)?;
        let total_nodes = script.len();
        self.progress.on_progress(&ProgressEvent::SessionOpened {
            endpoint: self.endpoint.to_string(),
            total_nodes,
        });

        let mut driver = Driver::new(
            session.as_mut(),
            DriverConfig {
                node_timeout: timeouts.node(),
                deadline: Some(self.deadline),
            },
        );
        let result = driver.run_with(&script, |outcome| {
            self.progress.on_progress(&ProgressEvent::NodeCompleted {
                node_index: outcome.index + 1,
                total_nodes,
                kind: outcome.kind,
                status: outcome.status,
                duration_ms: outcome.elapsed_ms,
            });
        });
        record.transcript = driver.transcript().to_vec();
        record.report = Some(result?);
        drop(session);

        shutdown(self.instance, &self.scenario.shutdown)?;
        let budget = self.deadline.min_with(timeouts.exit()).remaining();
        let state = self.instance.wait_exit(budget)?;
        record.exit = Some(state);
        check_exit(self.scenario.expect_exit, state)
    }
}

fn shutdown(instance: &Instance, plan: &ShutdownPlan) -> HarnessResult<()> {
    if let Some(command) = &plan.exit_command {
        instance.write_stdin_line(command)?;
    }
    if plan.close_stdin {
        instance.close_stdin()?;
    }
    if plan.interrupt {
        instance.interrupt()?;
    }
    Ok(())
}

fn check_exit(expected: ExitExpectation, actual: ExitState) -> HarnessResult<()> {
    let accepted = match expected {
        ExitExpectation::Code(code) => actual == ExitState::Exited(code),
        ExitExpectation::Signaled => matches!(actual, ExitState::Signaled(_)),
        ExitExpectation::Any => !matches!(actual, ExitState::Pending | ExitState::Killed),
    };
    if accepted {
        return Ok(());
    }
    Err(HarnessError::new(
        ErrorCode::ExitMismatch,
        format!("process {actual}, expected {expected:?}"),
        json!({ "expected": expected, "actual": actual }),
    ))
}

/// Poll the instance output until `pattern` matches.
fn wait_for_log(instance: &Instance, pattern: &Regex, deadline: Deadline) -> HarnessResult<()> {
    let mut backoff = Backoff::default();
    loop {
        let stderr_closed = match instance.stderr() {
            Some(buffer) => buffer.is_closed(),
            None => true,
        };
        let closed = instance.output().is_closed() && stderr_closed;
        let matched = pattern.is_match(&instance.output().to_string_lossy())
            || instance
                .stderr()
                .is_some_and(|buffer| pattern.is_match(&buffer.to_string_lossy()));
        if matched {
            tracing::debug!(pattern = %pattern, "readiness line seen");
            return Ok(());
        }
        let reason = if closed {
            "instance closed its output before becoming ready"
        } else if !backoff.wait(&deadline) {
            "readiness line never appeared"
        } else {
            continue;
        };
        return Err(HarnessError::connect_timeout(
            reason,
            json!({
                "pattern": pattern.as_str(),
                "output_tail": instance.output().tail_string(OUTPUT_TAIL_BYTES),
                "stderr_tail": instance.stderr().map(|buffer| buffer.tail_string(OUTPUT_TAIL_BYTES)),
            }),
        ));
    }
}
