//! Verbose progress output using indicatif.

use attachbox::scenario::{ProgressCallback, ProgressEvent};
use attachbox::NodeStatus;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::sync::Mutex;

/// Progress callback that reports each script node on stderr.
///
/// A spinner runs while a node is being matched.
pub struct VerboseProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl VerboseProgress {
    pub fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn start_spinner(&self, message: String) {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message);
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(previous) = spinner.replace(pb) {
                previous.finish_and_clear();
            }
        }
    }

    fn clear_spinner(&self) {
        if let Ok(mut spinner) = self.spinner.lock() {
            if let Some(pb) = spinner.take() {
                pb.finish_and_clear();
            }
        }
    }
}

impl ProgressCallback for VerboseProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { run_id, scenario } => {
                // Print to stderr without affecting stdout JSON output
                let _ = writeln!(std::io::stderr(), "run started: {scenario} ({run_id})");
                self.start_spinner("starting node".to_string());
            }
            ProgressEvent::InstanceStarted { pid } => {
                self.start_spinner(format!("node running (pid {pid}), attaching"));
            }
            ProgressEvent::SessionOpened {
                endpoint,
                total_nodes,
            } => {
                self.clear_spinner();
                let _ = writeln!(
                    std::io::stderr(),
                    "  attached to {endpoint} ({total_nodes} nodes)"
                );
                if *total_nodes > 0 {
                    self.start_spinner(format!("[1/{total_nodes}] matching"));
                }
            }
            ProgressEvent::NodeCompleted {
                node_index,
                total_nodes,
                kind,
                status,
                duration_ms,
            } => {
                self.clear_spinner();
                let status_icon = match status {
                    NodeStatus::Matched => "\x1b[32m✓\x1b[0m",
                    NodeStatus::Sent => "\x1b[36m→\x1b[0m",
                    NodeStatus::Skipped => "\x1b[33m-\x1b[0m",
                };
                let _ = writeln!(
                    std::io::stderr(),
                    "  {status_icon} [{node_index}/{total_nodes}] {kind:?} ({duration_ms}ms)"
                );
                if node_index < total_nodes {
                    self.start_spinner(format!("[{}/{total_nodes}] matching", node_index + 1));
                }
            }
            ProgressEvent::RunCompleted {
                run_id: _,
                success,
                duration_ms,
            } => {
                self.clear_spinner();
                let status_msg = if *success {
                    "\x1b[32mpassed\x1b[0m"
                } else {
                    "\x1b[31mfailed\x1b[0m"
                };
                let _ = writeln!(
                    std::io::stderr(),
                    "run {status_msg}: {duration_ms}ms total"
                );
            }
        }
    }
}
