// Test module - relaxed lint rules
#![cfg(unix)]
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use attachbox::supervisor::{start, Instance, InstanceConfig};
use attachbox::{CaptureMode, ErrorCode, ExitState, IoMode};

fn sh(script: &str) -> InstanceConfig {
    InstanceConfig::new("/bin/sh").args(["-c", script])
}

fn wait_for_output(instance: &Instance, needle: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !instance.output().contains(needle.as_bytes()) {
        assert!(Instant::now() < deadline, "never saw {needle:?}, got {:?}", instance.output().to_string_lossy());
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn missing_executable_is_a_spawn_error() {
    let err = start(InstanceConfig::new("/definitely/not/here")).unwrap_err();
    assert_eq!(err.code, ErrorCode::Spawn);
    assert_eq!(err.context.unwrap()["command"], "/definitely/not/here");
}

#[test]
fn exit_code_is_reported() {
    let instance = start(sh("echo done; exit 3")).unwrap();
    let state = instance.wait_exit(Duration::from_secs(5)).unwrap();
    assert_eq!(state, ExitState::Exited(3));
    wait_for_output(&instance, "done\n");
}

#[test]
fn stdin_lines_reach_the_child() {
    let instance = start(InstanceConfig::new("/bin/cat")).unwrap();
    instance.write_stdin_line("hello").unwrap();
    wait_for_output(&instance, "hello\n");
    instance.close_stdin().unwrap();
    instance.close_stdin().unwrap();
    assert_eq!(instance.wait_exit(Duration::from_secs(5)).unwrap(), ExitState::Exited(0));
    let err = instance.write_stdin_line("late").unwrap_err();
    assert_eq!(err.code, ErrorCode::Io);
}

#[test]
fn writing_to_a_child_that_closed_stdin_is_stream_closed() {
    let instance = start(sh("exec 0<&-; echo gone")).unwrap();
    assert_eq!(instance.wait_exit(Duration::from_secs(5)).unwrap(), ExitState::Exited(0));
    let err = instance.write_stdin_line("x").unwrap_err();
    assert_eq!(err.code, ErrorCode::StreamClosed);
}

#[test]
fn concurrent_writes_are_not_interleaved() {
    let instance = Arc::new(start(InstanceConfig::new("/bin/cat")).unwrap());
    let line_a = "a".repeat(2000);
    let line_b = "b".repeat(2000);
    let writers: Vec<_> = [line_a.clone(), line_b.clone()]
        .into_iter()
        .map(|line| {
            let instance = Arc::clone(&instance);
            thread::spawn(move || {
                for _ in 0..20 {
                    instance.write_stdin_line(&line).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    instance.close_stdin().unwrap();
    instance.wait_exit(Duration::from_secs(5)).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !instance.output().is_closed() {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    let text = instance.output().to_string_lossy();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 40);
    assert!(lines.iter().all(|line| *line == line_a || *line == line_b));
}

#[test]
fn interrupt_twice_is_harmless() {
    let instance = start(sh("trap 'echo caught; exit 0' INT; echo ready; while :; do sleep 0.05; done")).unwrap();
    wait_for_output(&instance, "ready");
    instance.interrupt().unwrap();
    instance.interrupt().unwrap();
    assert!(instance.was_interrupted());
    let state = instance.wait_exit(Duration::from_secs(5)).unwrap();
    assert_eq!(state, ExitState::Exited(0));
    wait_for_output(&instance, "caught");
}

#[test]
fn interrupt_after_exit_is_not_an_error() {
    let instance = start(sh("exit 0")).unwrap();
    instance.wait_exit(Duration::from_secs(5)).unwrap();
    instance.interrupt().unwrap();
}

#[test]
fn stuck_process_is_killed_with_output_tail() {
    let instance = start(sh("trap '' INT; echo stubborn; exec sleep 30")).unwrap();
    wait_for_output(&instance, "stubborn");
    instance.interrupt().unwrap();
    let started = Instant::now();
    let err = instance.wait_exit(Duration::from_millis(300)).unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(err.code, ErrorCode::StuckProcess);
    let context = err.context.unwrap();
    assert!(context["output_tail"].as_str().unwrap().contains("stubborn"));
    assert_eq!(instance.exit_state(), ExitState::Killed);
}

#[test]
fn separate_capture_keeps_stderr_out_of_the_console() {
    let instance = start(sh("echo out; echo err >&2").capture(CaptureMode::Separate)).unwrap();
    instance.wait_exit(Duration::from_secs(5)).unwrap();
    wait_for_output(&instance, "out");
    let stderr = instance.stderr().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while !stderr.contains(b"err") {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(10));
    }
    assert!(!instance.output().contains(b"err"));
}

#[test]
fn pty_output_is_normalized() {
    let instance = start(sh("printf 'one\\ntwo\\n'").io(IoMode::Pty { rows: 24, cols: 80 })).unwrap();
    wait_for_output(&instance, "one\ntwo\n");
    assert!(!instance.output().contains(b"\r\n"));
    instance.wait_exit(Duration::from_secs(5)).unwrap();
}

#[test]
fn dropping_an_instance_kills_it() {
    let instance = start(InstanceConfig::new("/bin/sleep").args(["30"])).unwrap();
    let pid = instance.pid();
    drop(instance);
    let still_running = std::process::Command::new("/bin/sh")
        .args(["-c", &format!("kill -0 {pid} 2>/dev/null")])
        .status()
        .unwrap();
    assert!(!still_running.success());
}
