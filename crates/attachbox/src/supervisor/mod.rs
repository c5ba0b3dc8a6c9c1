//! Process supervision for the node under test.
//!
//! [`start`] launches a child either on plain pipes or inside a PTY, drains
//! its output on background threads into an [`OutputBuffer`], and hands back
//! an [`Instance`] that can feed stdin, interrupt, wait and kill the child.
//!
//! # Example
//!
//! ```no_run
//! use attachbox::supervisor::{self, InstanceConfig};
//! use std::time::Duration;
//!
//! # fn example() -> attachbox::HarnessResult<()> {
//! let instance = supervisor::start(InstanceConfig::new("/bin/cat"))?;
//! instance.write_stdin_line("hello")?;
//! instance.close_stdin()?;
//! let state = instance.wait_exit(Duration::from_secs(2))?;
//! println!("{state}: {}", instance.output().to_string_lossy());
//! # Ok(())
//! # }
//! ```

mod output;

pub use output::OutputBuffer;

use crate::error::{ErrorCode, HarnessError, HarnessResult};
use crate::model::{CaptureMode, EnvSpec, ExitState, InstanceId, IoMode, NodeSpec};
#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Bytes of output attached to diagnostics.
pub const OUTPUT_TAIL_BYTES: usize = 512;

const EXIT_POLL: Duration = Duration::from_millis(10);

/// Launch parameters for [`start`].
#[derive(Clone, Debug)]
pub struct InstanceConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: EnvSpec,
    pub io: IoMode,
    pub capture: CaptureMode,
}

impl InstanceConfig {
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

    /// Config for a scenario's node launch spec.
    pub fn from_spec(spec: &NodeSpec) -> Self {
        Self {
            command: spec.command.clone(),
            args: spec.args.clone(),
            cwd: spec.cwd.as_ref().map(PathBuf::from),
            env: spec.env.clone(),
            io: spec.io,
            capture: spec.capture,
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
    pub fn io(mut self, io: IoMode) -> Self {
        self.io = io;
        self
    }

    #[must_use]
    pub fn capture(mut self, capture: CaptureMode) -> Self {
        self.capture = capture;
        self
    }

    #[must_use]
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.set.insert(key.into(), value.into());
        self
    }
}

enum Child {
    Pipes(std::process::Child),
    Pty {
        child: Box<dyn portable_pty::Child + Send + Sync>,
        // The master must outlive the child or the PTY is torn down under it.
        _master: Box<dyn portable_pty::MasterPty + Send>,
    },
}

impl Child {
    fn try_wait(&mut self) -> std::io::Result<Option<ExitState>> {
        match self {
            Self::Pipes(child) => Ok(child.try_wait()?.map(exit_state_from_std)),
            Self::Pty { child, .. } => Ok(child.try_wait()?.map(|status| {
                ExitState::Exited(i32::try_from(status.exit_code()).unwrap_or(i32::MAX))
            })),
        }
    }

    fn kill(&mut self) -> std::io::Result<()> {
        let result = match self {
            Self::Pipes(child) => child.kill(),
            Self::Pty { child, .. } => child.kill(),
        };
        match result {
            // Already reaped.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            other => other,
        }
    }

    fn wait(&mut self) -> std::io::Result<()> {
        match self {
            Self::Pipes(child) => child.wait().map(|_| ()),
            Self::Pty { child, .. } => child.wait().map(|_| ()),
        }
    }
}

fn exit_state_from_std(status: std::process::ExitStatus) -> ExitState {
    if let Some(code) = status.code() {
        return ExitState::Exited(code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitState::Signaled(signal);
        }
    }
    ExitState::Exited(-1)
}

/// One supervised process.
///
/// All methods take `&self`; the child handle, stdin and exit state each sit
/// behind their own mutex so a session can borrow the instance while the
/// orchestrator still signals it. Dropping the instance kills a running child.
pub struct Instance {
    id: InstanceId,
    command: String,
    args: Vec<String>,
    pid: u32,
    io: IoMode,
    child: Mutex<Child>,
    stdin: Mutex<Option<Box<dyn Write + Send>>>,
    output: OutputBuffer,
    stderr: Option<OutputBuffer>,
    state: Mutex<ExitState>,
    interrupted: AtomicBool,
    started_at: Instant,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("io", &self.io)
            .finish_non_exhaustive()
    }
}

/// Launch a child process.
///
/// # Errors
/// - `E_SPAWN`: the executable could not be launched
/// - `E_IO`: PTY setup or reader thread creation failed
pub fn start(config: InstanceConfig) -> HarnessResult<Instance> {
    let started_at = Instant::now();
    let output = OutputBuffer::new();
    let (child, pid, stdin, stderr) = match config.io {
        IoMode::Pipes => spawn_pipes(&config, &output)?,
        IoMode::Pty { rows, cols } => spawn_pty(&config, &output, rows, cols)?,
    };
    tracing::info!(
        pid,
        command = %config.command,
        args = ?config.args,
        io = ?config.io,
        "instance started"
    );
    Ok(Instance {
        id: InstanceId::new(),
        command: config.command,
        args: config.args,
        pid,
        io: config.io,
        child: Mutex::new(child),
        stdin: Mutex::new(Some(stdin)),
        output,
        stderr,
        state: Mutex::new(ExitState::Pending),
        interrupted: AtomicBool::new(false),
        started_at,
    })
}

type Spawned = (Child, u32, Box<dyn Write + Send>, Option<OutputBuffer>);

fn spawn_error(config: &InstanceConfig, err: impl std::fmt::Display) -> HarnessError {
    HarnessError::spawn(format!("failed to launch '{}'", config.command), err)
        .with_context("command", config.command.clone())
        .with_context("args", config.args.clone())
}

fn spawn_pipes(config: &InstanceConfig, output: &OutputBuffer) -> HarnessResult<Spawned> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = &config.cwd {
        cmd.current_dir(cwd);
    }
    if !config.env.inherit {
        cmd.env_clear();
    }
    cmd.envs(&config.env.set);

    let mut child = cmd.spawn().map_err(|err| spawn_error(config, err))?;
    let pid = child.id();
    let missing = || HarnessError::internal("child pipes were not captured");
    let stdin = child.stdin.take().ok_or_else(missing)?;
    let stdout = child.stdout.take().ok_or_else(missing)?;
    let child_stderr = child.stderr.take().ok_or_else(missing)?;

    output.spawn_drain("stdout", stdout, false)?;
    let stderr = match config.capture {
        CaptureMode::Combined => {
            output.spawn_drain("stderr", child_stderr, false)?;
            None
        }
        CaptureMode::Separate => {
            let buffer = OutputBuffer::new();
            buffer.spawn_drain("stderr", child_stderr, false)?;
            Some(buffer)
        }
    };
    Ok((Child::Pipes(child), pid, Box::new(stdin), stderr))
}

fn spawn_pty(
    config: &InstanceConfig,
    output: &OutputBuffer,
    rows: u16,
    cols: u16,
) -> HarnessResult<Spawned> {
    let pair = native_pty_system()
        .openpty(PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|err| HarnessError::io("failed to open pty", err))?;

    let mut cmd = CommandBuilder::new(&config.command);
    cmd.args(&config.args);
    if let Some(cwd) = &config.cwd {
        cmd.cwd(cwd);
    }
    if !config.env.inherit {
        cmd.env_clear();
    }
    for (key, value) in &config.env.set {
        cmd.env(key, value);
    }

    let child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|err| spawn_error(config, err))?;
    // Keeping the slave open would hide EOF once the child exits.
    drop(pair.slave);

    let pid = child
        .process_id()
        .ok_or_else(|| HarnessError::internal("pty child has no process id"))?;
    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|err| HarnessError::io("failed to clone pty reader", err))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|err| HarnessError::io("failed to take pty writer", err))?;
    output.spawn_drain("pty", reader, true)?;

    Ok((
        Child::Pty {
            child,
            _master: pair.master,
        },
        pid,
        writer,
        None,
    ))
}

fn poisoned(what: &str) -> HarnessError {
    HarnessError::internal(format!("instance {what} lock poisoned"))
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn io_mode(&self) -> IoMode {
        self.io
    }

    /// Main output buffer (stdout, plus stderr in combined mode).
    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    /// Separate stderr buffer, when captured that way.
    pub fn stderr(&self) -> Option<&OutputBuffer> {
        self.stderr.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn lock_stdin(&self) -> HarnessResult<MutexGuard<'_, Option<Box<dyn Write + Send>>>> {
        self.stdin.lock().map_err(|_| poisoned("stdin"))
    }

    fn lock_child(&self) -> HarnessResult<MutexGuard<'_, Child>> {
        self.child.lock().map_err(|_| poisoned("child"))
    }

    fn lock_state(&self) -> HarnessResult<MutexGuard<'_, ExitState>> {
        self.state.lock().map_err(|_| poisoned("state"))
    }

    /// Write `line` plus a newline to the child's stdin as one unit.
    ///
    /// # Errors
    /// - `E_STREAM_CLOSED`: the child no longer reads its stdin
    /// - `E_IO`: stdin was closed by [`close_stdin`](Self::close_stdin) or the
    ///   write failed otherwise
    pub fn write_stdin_line(&self, line: &str) -> HarnessResult<()> {
        let mut guard = self.lock_stdin()?;
        let writer = guard.as_mut().ok_or_else(|| {
            HarnessError::new(
                ErrorCode::Io,
                "stdin is closed",
                serde_json::json!({ "line": line }),
            )
        })?;
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        writer
            .write_all(&data)
            .and_then(|()| writer.flush())
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::BrokenPipe {
                    HarnessError::new(
                        ErrorCode::StreamClosed,
                        "instance stopped reading its stdin",
                        serde_json::json!({ "pid": self.pid, "line": line }),
                    )
                } else {
                    HarnessError::io("failed to write to instance stdin", err)
                }
            })?;
        tracing::debug!(pid = self.pid, line, "wrote stdin line");
        Ok(())
    }

    /// Close stdin so the child sees EOF. Idempotent.
    pub fn close_stdin(&self) -> HarnessResult<()> {
        let mut guard = self.lock_stdin()?;
        if let Some(mut writer) = guard.take() {
            let _ = writer.flush();
            tracing::debug!(pid = self.pid, "closed stdin");
        }
        Ok(())
    }

    /// Send the interrupt signal once. Later calls do nothing.
    ///
    /// # Errors
    /// `E_IO` if signalling failed for a reason other than the process being gone.
    pub fn interrupt(&self) -> HarnessResult<()> {
        let _stdin = self.lock_stdin()?;
        if self.interrupted.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        tracing::debug!(pid = self.pid, "interrupting instance");
        self.signal_interrupt()
    }

    #[cfg(unix)]
    fn signal_interrupt(&self) -> HarnessResult<()> {
        send_signal(self.pid, Signal::SIGINT)
    }

    #[cfg(not(unix))]
    fn signal_interrupt(&self) -> HarnessResult<()> {
        self.lock_child()?
            .kill()
            .map_err(|err| HarnessError::io("failed to interrupt instance", err))
    }

    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Non-blocking exit check.
    ///
    /// # Errors
    /// `E_IO` if the OS wait call failed.
    pub fn poll_exit(&self) -> HarnessResult<ExitState> {
        let mut state = self.lock_state()?;
        if !state.is_pending() {
            return Ok(*state);
        }
        let observed = self
            .lock_child()?
            .try_wait()
            .map_err(|err| HarnessError::io("failed to check instance status", err))?;
        if let Some(exit) = observed {
            tracing::info!(pid = self.pid, %exit, "instance exited");
            *state = exit;
        }
        Ok(*state)
    }

    /// Last known exit state, refreshed without blocking.
    pub fn exit_state(&self) -> ExitState {
        self.poll_exit()
            .or_else(|_| self.lock_state().map(|state| *state))
            .unwrap_or(ExitState::Pending)
    }

    /// Wait for the child to exit.
    ///
    /// # Errors
    /// `E_STUCK_PROCESS` when the budget runs out; the child is killed first
    /// and the error context carries the tail of its output.
    pub fn wait_exit(&self, timeout: Duration) -> HarnessResult<ExitState> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.poll_exit()?;
            if !state.is_pending() {
                return Ok(state);
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(EXIT_POLL);
        }
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        tracing::warn!(pid = self.pid, timeout_ms, "instance did not exit, killing");
        self.kill()?;
        Err(HarnessError::new(
            ErrorCode::StuckProcess,
            format!("process {} did not exit within {timeout_ms} ms", self.pid),
            serde_json::json!({
                "pid": self.pid,
                "timeout_ms": timeout_ms,
                "output_tail": self.output.tail_string(OUTPUT_TAIL_BYTES),
            }),
        ))
    }

    /// Force-kill and reap the child. No-op once it has exited.
    pub fn kill(&self) -> HarnessResult<()> {
        let mut state = self.lock_state()?;
        if !state.is_pending() {
            return Ok(());
        }
        let mut child = self.lock_child()?;
        if let Some(exit) = child
            .try_wait()
            .map_err(|err| HarnessError::io("failed to check instance status", err))?
        {
            *state = exit;
            return Ok(());
        }
        child
            .kill()
            .map_err(|err| HarnessError::io("failed to kill instance", err))?;
        child
            .wait()
            .map_err(|err| HarnessError::io("failed to reap instance", err))?;
        *state = ExitState::Killed;
        tracing::info!(pid = self.pid, "instance killed");
        Ok(())
    }
}

impl Drop for Instance {
    /// Best-effort: closes stdin and kills a still-running child.
    fn drop(&mut self) {
        if let Ok(mut stdin) = self.stdin.lock() {
            stdin.take();
        }
        let _ = self.kill();
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: Signal) -> HarnessResult<()> {
    let raw = i32::try_from(pid)
        .map_err(|_| HarnessError::internal(format!("pid {pid} out of range")))?;
    match kill(Pid::from_raw(raw), signal) {
        // ESRCH means the process is already gone.
        Ok(()) | Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(err) => Err(HarnessError::io("failed to signal instance", err)),
    }
}
